//! BotNetKernel: assembles the trust services and owns their lifecycle.

use crate::auth::AuthGate;
use crate::challenge::{DomainChallengeService, DomainFetcher, HttpDomainFetcher};
use crate::error::{KernelError, KernelResult};
use crate::friendship::{classify_with, FriendshipStateMachine};
use crate::proofs::PublishedProofs;
use crate::sweeper::spawn_sweepers;
use crate::tokens::TokenStore;
use botnet_memory::TrustSubstrate;
use botnet_types::config::NodeConfig;
use botnet_types::peer::PeerClass;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// The running trust layer of one node.
pub struct BotNetKernel {
    pub config: NodeConfig,
    pub db: TrustSubstrate,
    pub tokens: Arc<TokenStore>,
    pub friendships: Arc<FriendshipStateMachine>,
    pub challenges: Arc<DomainChallengeService>,
    pub gate: AuthGate,
    /// Proofs this node serves for challenges it is answering.
    pub proofs: Arc<PublishedProofs>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BotNetKernel {
    /// Boot with the on-disk database and the HTTP proof fetcher.
    pub fn boot(config: NodeConfig) -> KernelResult<Self> {
        let path = config.database_path();
        let db = TrustSubstrate::open(&path)
            .map_err(|e| KernelError::BootFailed(format!("database {}: {e}", path.display())))?;
        let fetcher = HttpDomainFetcher::new(&config.challenge)?;
        Self::boot_with(config, db, Arc::new(fetcher))
    }

    /// Boot over an existing database and fetcher.
    pub fn boot_with(
        config: NodeConfig,
        db: TrustSubstrate,
        fetcher: Arc<dyn DomainFetcher>,
    ) -> KernelResult<Self> {
        validate(&config)?;

        let tokens = Arc::new(TokenStore::new(
            db.clone(),
            config.node_id.clone(),
            config.tokens.clone(),
        ));
        let friendships = Arc::new(FriendshipStateMachine::new(
            db.clone(),
            tokens.clone(),
            config.federation_prefix.clone(),
        ));
        let challenges = Arc::new(DomainChallengeService::new(
            db.clone(),
            tokens.clone(),
            friendships.clone(),
            config.challenge.clone(),
            fetcher,
        ));
        let gate = AuthGate::new(tokens.clone());
        let (shutdown_tx, _) = watch::channel(false);

        info!(
            node_id = %config.node_id,
            federation_prefix = %config.federation_prefix,
            cascade = config.tokens.cascade_session_revocation,
            "BotNet kernel booted"
        );

        Ok(Self {
            config,
            db,
            tokens,
            friendships,
            challenges,
            gate,
            proofs: Arc::new(PublishedProofs::new()),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start the expiry sweeps. Must be called inside a tokio runtime.
    pub fn start_background_tasks(&self) {
        let handles = spawn_sweepers(
            self.tokens.clone(),
            self.challenges.clone(),
            &self.config.sweep,
            self.subscribe_shutdown(),
        );
        match self.tasks.lock() {
            Ok(mut tasks) => tasks.extend(handles),
            Err(e) => warn!(error = %e, "Task list poisoned, sweeps will not be joined"),
        }
    }

    /// A receiver that flips to `true` on shutdown.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Signal shutdown and wait for the background tasks to stop.
    pub async fn shutdown(&self) {
        info!("Shutting down BotNet kernel");
        self.shutdown_tx.send_replace(true);
        let handles = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
    }
}

fn validate(config: &NodeConfig) -> KernelResult<()> {
    if config.federation_prefix.is_empty() || !config.federation_prefix.ends_with('.') {
        return Err(KernelError::BootFailed(format!(
            "federation_prefix '{}' must be non-empty and end with '.'",
            config.federation_prefix
        )));
    }
    if classify_with(&config.federation_prefix, &config.node_id) == PeerClass::Invalid {
        return Err(KernelError::BootFailed(format!(
            "node_id '{}' is not a valid peer identifier",
            config.node_id
        )));
    }
    if config.challenge.max_attempts == 0 {
        return Err(KernelError::BootFailed(
            "challenge.max_attempts must be at least 1".into(),
        ));
    }
    if config.tokens.session_ttl_secs > config.tokens.session_max_lifetime_secs {
        warn!("session_ttl_secs exceeds session_max_lifetime_secs; sessions are capped at the maximum");
    }
    Ok(())
}
