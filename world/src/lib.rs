//! The authoritative game-world core: a single-writer simulation tick over
//! characters, mobs and items, fed by the session service and flanked by
//! audit and persistence sinks.
//!
//! [Core] is the composition root: it owns every subsystem, wires the
//! channels between them and hands back the futures the binary spawns.
//! Subsystems never reach each other through globals; cross references are
//! ids resolved through the owning manager.
use std::sync::Arc;

use futures::channel::{mpsc as fmpsc, oneshot};
use tokio::sync::mpsc;

pub mod admin;
pub mod ai;
pub mod audit;
pub mod character;
pub mod combat;
pub mod config;
pub mod content;
pub mod error;
pub mod event;
pub mod forge;
mod handlers;
pub mod items;
pub mod loot;
pub mod market;
pub mod persistence;
pub mod player;
pub mod quest;
pub mod security;
pub mod social;
pub mod spatial;
pub mod tick;
pub mod trade;

pub use audit::{AuditLog, AuditSink, LogAuditSink};
pub use config::WorldConfig;
pub use content::ContentTables;
pub use error::{WorldError, WorldResult};
pub use persistence::{MemoryStore, RecordStore};
pub use tick::World;

const LOG_TARGET: &str = "world-core";

/// Everything the server binary needs to run a world: the assembled
/// [World] plus the background futures that must be spawned beside it.
pub struct Core {
    pub world: World,
    pub audit_task: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>,
    pub persistence_task: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>,
}

impl Core {
    pub fn assemble(
        config: WorldConfig,
        content: Arc<ContentTables>,
        store: Arc<dyn RecordStore>,
        sink: impl AuditSink,
    ) -> Self {
        let (audit, audit_task) = AuditLog::new(config.persistence_alarm_backlog, sink);
        let (batch_sender, batch_receiver) = mpsc::channel(config.persistence_alarm_backlog);
        let persistence_task = persistence::run_persistence_writer(store, batch_receiver);
        let world = World::new(config, content, audit, batch_sender);
        Self {
            world,
            audit_task: Box::pin(audit_task),
            persistence_task: Box::pin(persistence_task),
        }
    }
}

/// Runs the world tick until the exit signal. The audit and persistence
/// task futures from [Core::assemble] must be spawned separately.
pub async fn run_world(
    world: World,
    session_events: fmpsc::UnboundedReceiver<network_session::SessionEvent>,
    exit: oneshot::Receiver<()>,
) {
    tick::run(world, session_events, exit).await;
}
