//! The TMSrv world server binary: wires the session service, the world
//! tick and the audit/persistence sinks together.
use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use futures::channel::oneshot;
use log::info;
use tokio::net::TcpListener;

use network_session::{
    handshake::{AccountAuthority, AuthRefusal},
    packets::TICKET_LEN,
    Service, ServiceConfig,
};
use tmsrv_primitives::AccountId;
use world_core::{ContentTables, Core, LogAuditSink, MemoryStore, WorldConfig};

#[derive(Parser, Debug)]
#[command(name = "tmsrv", about = "Authoritative world server")]
struct Config {
    /// TCP port for game clients.
    #[arg(long, default_value_t = 8281)]
    port: u16,
    /// Directory with the content tables; the built-in fixture is used
    /// when omitted.
    #[arg(long)]
    content_dir: Option<PathBuf>,
    /// Accounts allowed to run admin commands. Repeatable.
    #[arg(long = "admin-account")]
    admin_accounts: Vec<u32>,
    /// Seed for the deterministic world RNG.
    #[arg(long)]
    seed: Option<u64>,
}

/// Development stand-in for the external account authority: any non-zero
/// ticket authenticates, and the account id is derived from the name.
/// Production deployments implement [AccountAuthority] against the real
/// AccountSrv.
struct DevAuthority;

#[async_trait::async_trait]
impl AccountAuthority for DevAuthority {
    async fn verify_ticket(
        &self,
        account: &str,
        ticket: [u8; TICKET_LEN],
        _address: &str,
    ) -> Result<AccountId, AuthRefusal> {
        if account.is_empty() || ticket == [0u8; TICKET_LEN] {
            return Err(AuthRefusal::BadTicket);
        }
        // "admin" gets a stable id so --admin-account 1 just works
        if account == "admin" {
            return Ok(AccountId(1));
        }
        let id = account
            .bytes()
            .fold(0xcbf2_9ce4u32, |acc, b| {
                (acc ^ u32::from(b)).wrapping_mul(0x0100_0193)
            })
            .max(2);
        Ok(AccountId(id))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::parse();
    info!("Starting tmsrv with {:?}", config);

    let content = match &config.content_dir {
        Some(dir) => ContentTables::load(dir)
            .with_context(|| format!("loading content from {}", dir.display()))?,
        None => {
            info!("No content directory given; running on the built-in fixture tables.");
            ContentTables::fixture()
        }
    };

    let mut world_config = WorldConfig {
        admin_accounts: config.admin_accounts.clone(),
        content_dir: config.content_dir.clone(),
        ..WorldConfig::default()
    };
    if let Some(seed) = config.seed {
        world_config.rng_seed = seed;
    }

    let store = Arc::new(MemoryStore::default());
    let core = Core::assemble(world_config, content, store, LogAuditSink);
    let Core {
        world,
        audit_task,
        persistence_task,
    } = core;
    tokio::spawn(audit_task);
    tokio::spawn(persistence_task);

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;
    info!("Listening on port {}.", config.port);
    let (service, session_events) = Service::new(
        listener,
        Arc::new(DevAuthority),
        ServiceConfig::default(),
    );
    let (service_exit_tx, service_exit_rx) = oneshot::channel();
    tokio::spawn(service.run(service_exit_rx));

    let (world_exit_tx, world_exit_rx) = oneshot::channel();
    let world_handle = tokio::spawn(world_core::run_world(
        world,
        session_events,
        world_exit_rx,
    ));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutting down.");
    let _ = service_exit_tx.send(());
    let _ = world_exit_tx.send(());
    world_handle.await.context("world task panicked")?;
    Ok(())
}
