//! Background expiry sweeps on independent timers.
//!
//! Each tick is a single transaction, so a sweep interrupted by shutdown
//! leaves rows either fully removed or untouched.

use crate::challenge::DomainChallengeService;
use crate::tokens::TokenStore;
use botnet_types::config::SweepConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Run `tick` every `interval` until the shutdown signal fires.
///
/// The first tick happens one interval after spawning.
pub fn spawn_periodic<F>(
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn() + Send + 'static,
{
    info!(task = name, interval_secs = interval.as_secs(), "Starting periodic task");
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        timer.tick().await;
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = timer.tick() => tick(),
                _ = shutdown.changed() => {
                    debug!(task = name, "Shutdown signal received");
                    break;
                }
            }
        }
    })
}

/// Spawn the token-expiry and challenge-expiry sweeps.
pub fn spawn_sweepers(
    tokens: Arc<TokenStore>,
    challenges: Arc<DomainChallengeService>,
    config: &SweepConfig,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let token_sweep = spawn_periodic(
        "token_sweep",
        Duration::from_secs(config.token_interval_secs.max(1)),
        shutdown.clone(),
        move || match tokens.sweep_expired() {
            Ok(report) if report.negotiation_tokens + report.sessions > 0 => info!(
                negotiation_tokens = report.negotiation_tokens,
                sessions = report.sessions,
                "Swept expired tokens"
            ),
            Ok(_) => {}
            Err(e) => error!(error = %e, "Token sweep failed"),
        },
    );
    let challenge_sweep = spawn_periodic(
        "challenge_sweep",
        Duration::from_secs(config.challenge_interval_secs.max(1)),
        shutdown,
        move || match challenges.sweep() {
            Ok(0) => {}
            Ok(expired) => info!(expired, "Expired unanswered domain challenges"),
            Err(e) => error!(error = %e, "Challenge sweep failed"),
        },
    );
    vec![token_sweep, challenge_sweep]
}
