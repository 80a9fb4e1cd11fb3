//! BotNet CLI: run a node and manage its friendships.

mod cli;

use crate::cli::{Cli, Commands};
use botnet_api::client::PeerClient;
use botnet_api::node::InMemoryNode;
use botnet_api::routes::AppState;
use botnet_api::server::{run_server, serve};
use botnet_kernel::config::{default_config_path, load_config};
use botnet_kernel::BotNetKernel;
use botnet_types::config::NodeConfig;
use botnet_types::error::BotNetResult;
use botnet_types::friendship::FriendshipState;
use botnet_types::token::NegotiationToken;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn fail(msg: impl std::fmt::Display) -> ! {
    eprintln!("error: {msg}");
    std::process::exit(1);
}

fn boot(config: NodeConfig) -> Arc<BotNetKernel> {
    match BotNetKernel::boot(config) {
        Ok(k) => Arc::new(k),
        Err(e) => fail(format!("boot failed: {e}")),
    }
}

fn main() {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());
    init_tracing(&config.log_level);

    match cli.command {
        Commands::Init { node_id, force } => cmd_init(cli.config, node_id, force),
        Commands::Start => run_async(cmd_start(config)),
        Commands::Status => cmd_status(config),
        Commands::Friends { state } => cmd_friends(config, state.as_deref()),
        Commands::Request { peer, endpoint } => run_async(cmd_request(config, peer, endpoint)),
        Commands::Poll {
            peer,
            endpoint,
            token,
        } => run_async(cmd_poll(config, peer, endpoint, token)),
        Commands::Prove { endpoint, token } => run_async(cmd_prove(config, endpoint, token)),
        Commands::Decline { peer } => {
            let kernel = boot(config);
            match kernel.friendships.decline(&peer) {
                Ok(f) => println!("{}: {}", f.peer_identifier, f.state),
                Err(e) => fail(e),
            }
        }
        Commands::Unfriend { peer } => {
            let kernel = boot(config);
            match kernel.friendships.unfriend(&peer) {
                Ok(f) => println!("{}: {}", f.peer_identifier, f.state),
                Err(e) => fail(e),
            }
        }
        Commands::Sweep => cmd_sweep(config),
    }
}

fn run_async<F: std::future::Future<Output = ()>>(fut: F) {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt.block_on(fut),
        Err(e) => fail(format!("tokio runtime: {e}")),
    }
}

fn cmd_init(path: Option<PathBuf>, node_id: String, force: bool) {
    let path = path.unwrap_or_else(default_config_path);
    if path.exists() && !force {
        fail(format!("{} exists (use --force to overwrite)", path.display()));
    }
    let config = NodeConfig {
        node_id,
        ..NodeConfig::default()
    };
    if let Err(e) = write_config(&path, &config) {
        fail(e);
    }
    println!("Wrote {}", path.display());
}

fn write_config(path: &Path, config: &NodeConfig) -> Result<(), String> {
    let text = toml::to_string_pretty(config).map_err(|e| format!("serialize config: {e}"))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("create {}: {e}", parent.display()))?;
    }
    std::fs::write(path, text).map_err(|e| format!("write {}: {e}", path.display()))
}

async fn cmd_start(config: NodeConfig) {
    let kernel = boot(config);
    kernel.start_background_tasks();
    let node = Arc::new(InMemoryNode::new(kernel.config.node_id.clone()));

    let server = tokio::spawn(run_server(kernel.clone(), node));
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!(error = %e, "Failed to listen for Ctrl+C");
            }
            info!("Ctrl+C received");
        }
        _ = kernel_stopped(&kernel) => {}
    }
    kernel.shutdown().await;
    match server.await {
        Ok(Ok(())) => println!("BotNet node stopped."),
        Ok(Err(e)) => fail(format!("server error: {e}")),
        Err(e) => fail(format!("server task: {e}")),
    }
}

async fn kernel_stopped(kernel: &BotNetKernel) {
    let mut rx = kernel.subscribe_shutdown();
    let _ = rx.wait_for(|stop| *stop).await;
}

fn cmd_status(config: NodeConfig) {
    let kernel = boot(config);
    let count = |r: BotNetResult<usize>| match r {
        Ok(n) => n.to_string(),
        Err(e) => format!("error: {e}"),
    };
    let friends = kernel
        .friendships
        .list(Some(FriendshipState::Active))
        .map(|v| v.len());
    println!("node_id:             {}", kernel.config.node_id);
    println!("listen_addr:         {}", kernel.config.listen_addr);
    println!("federation_prefix:   {}", kernel.config.federation_prefix);
    println!("database:            {}", kernel.config.database_path().display());
    println!("active friends:      {}", count(friends));
    println!("active credentials:  {}", count(kernel.tokens.active_credential_count()));
    println!("live sessions:       {}", count(kernel.tokens.active_session_count()));
    println!("pending challenges:  {}", count(kernel.challenges.pending_count()));
}

fn cmd_friends(config: NodeConfig, state: Option<&str>) {
    let filter = match state {
        None => None,
        Some(s) => match FriendshipState::parse(s) {
            Some(st) => Some(st),
            None => fail(format!("unknown state '{s}'")),
        },
    };
    let kernel = boot(config);
    let friends = match kernel.friendships.list(filter) {
        Ok(f) => f,
        Err(e) => fail(e),
    };
    if friends.is_empty() {
        println!("No friendships.");
        return;
    }
    for f in friends {
        println!(
            "{:<40} {:<10} {:<11} {:<16} {}",
            f.peer_identifier, f.kind, f.state, f.tier, f.interaction_count
        );
    }
}

fn client(kernel: &Arc<BotNetKernel>) -> PeerClient {
    match PeerClient::new(kernel.clone()) {
        Ok(c) => c,
        Err(e) => fail(e),
    }
}

async fn cmd_request(config: NodeConfig, peer: String, endpoint: String) {
    let kernel = boot(config);
    match client(&kernel).request_friendship(&peer, &endpoint).await {
        Ok(out) => {
            println!("status:            {}", out.status);
            match &out.negotiation_token {
                Some(token) => println!("negotiation_token: {}", token.as_str()),
                None => {
                    println!("negotiation_token: none (a request is already on record at {peer})")
                }
            }
            if out.challenge_required {
                println!("A domain challenge is required: run `botnet prove` with this token.");
            }
        }
        Err(e) => fail(e),
    }
}

async fn cmd_poll(config: NodeConfig, peer: String, endpoint: String, token: String) {
    let token = NegotiationToken::parse(&token).unwrap_or_else(|e| fail(e));
    let kernel = boot(config);
    match client(&kernel).poll_friendship(&peer, &endpoint, &token).await {
        Ok(check) => println!("status: {}", check.status),
        Err(e) => fail(e),
    }
}

async fn cmd_prove(config: NodeConfig, endpoint: String, token: String) {
    let token = NegotiationToken::parse(&token).unwrap_or_else(|e| fail(e));
    let kernel = boot(config);

    // The proof is served from this process, so it needs the listen address.
    let listener = match tokio::net::TcpListener::bind(kernel.config.listen_addr).await {
        Ok(l) => l,
        Err(e) => fail(format!(
            "bind {}: {e} (stop `botnet start` first)",
            kernel.config.listen_addr
        )),
    };
    let node = Arc::new(InMemoryNode::new(kernel.config.node_id.clone()));
    let server = tokio::spawn(serve(Arc::new(AppState::new(kernel.clone(), node)), listener));

    let result = client(&kernel).answer_challenge(&endpoint, &token).await;
    kernel.shutdown().await;
    let _ = server.await;
    match result {
        Ok(outcome) => println!(
            "{}",
            serde_json::to_string(&outcome).unwrap_or_else(|_| format!("{outcome:?}"))
        ),
        Err(e) => fail(e),
    }
}

fn cmd_sweep(config: NodeConfig) {
    let kernel = boot(config);
    let tokens = kernel.tokens.sweep_expired().unwrap_or_else(|e| fail(e));
    let challenges = kernel.challenges.sweep().unwrap_or_else(|e| fail(e));
    println!(
        "Removed {} negotiation tokens and {} sessions; expired {} challenges.",
        tokens.negotiation_tokens, tokens.sessions, challenges
    );
}
