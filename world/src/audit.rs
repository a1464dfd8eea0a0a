//! Immutable audit records for every item mutation, gold mutation, trade
//! commit and admin action. Producers are many; one sink task consumes.
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use log::{error, info, warn};
use tokio::sync::mpsc;

use tmsrv_primitives::{AccountId, AuctionId, CharacterId, ListingId, MobId, TradeId};

use crate::LOG_TARGET;

#[derive(Clone, Debug)]
pub enum AuditEvent {
    ItemCreated {
        owner: CharacterId,
        item_id: u16,
        count: u32,
        source: &'static str,
    },
    ItemDestroyed {
        owner: CharacterId,
        item_id: u16,
        count: u32,
        reason: &'static str,
    },
    ItemMoved {
        owner: CharacterId,
        item_id: u16,
        count: u32,
    },
    GoldDelta {
        owner: CharacterId,
        delta: i64,
        reason: &'static str,
    },
    TradeCommitted {
        trade: TradeId,
        a: CharacterId,
        b: CharacterId,
        items_a_to_b: u32,
        items_b_to_a: u32,
        gold_a_to_b: u32,
        gold_b_to_a: u32,
    },
    RefineRolled {
        owner: CharacterId,
        item_id: u16,
        roll: u32,
        outcome: &'static str,
        protection_consumed: bool,
    },
    SocketFilled {
        owner: CharacterId,
        item_id: u16,
        gem_id: u16,
    },
    MobKilled {
        mob: MobId,
        template: u16,
        by: CharacterId,
    },
    QuestRewarded {
        character: CharacterId,
        quest: u16,
        experience: u64,
        gold: u32,
    },
    ListingSettled {
        listing: ListingId,
        seller: CharacterId,
        buyer: CharacterId,
        price: u32,
    },
    AuctionSettled {
        auction: AuctionId,
        seller: CharacterId,
        winner: Option<CharacterId>,
        price: u32,
    },
    ViolationRecorded {
        account: AccountId,
        kind: &'static str,
        action: &'static str,
    },
    AdminAction {
        admin: AccountId,
        command: String,
        succeeded: bool,
    },
    /// Invariant break; the entity was quarantined.
    Critical {
        context: String,
    },
}

#[derive(Clone, Debug)]
pub struct AuditRecord {
    pub sequence: u64,
    pub at_ms: u64,
    pub event: AuditEvent,
}

/// Consumes the ordered record stream. Implementations append somewhere
/// durable; the default writes structured log lines.
pub trait AuditSink: Send + 'static {
    fn append(&mut self, record: &AuditRecord);
}

pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn append(&mut self, record: &AuditRecord) {
        match &record.event {
            AuditEvent::Critical { context } => error!(
                target: LOG_TARGET,
                "AUDIT CRITICAL #{} @{}ms: {}", record.sequence, record.at_ms, context
            ),
            event => info!(
                target: LOG_TARGET,
                "AUDIT #{} @{}ms: {:?}", record.sequence, record.at_ms, event
            ),
        }
    }
}

/// Cloneable producer handle. Records are sequenced at submission so sink
/// order equals submission order.
#[derive(Clone)]
pub struct AuditLog {
    sender: mpsc::Sender<AuditRecord>,
    sequence: Arc<AtomicU64>,
    alarm: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl AuditLog {
    /// Builds the handle and the sink task future. Capacity bounds memory;
    /// overflow raises the health alarm rather than blocking the tick.
    pub fn new(capacity: usize, mut sink: impl AuditSink) -> (Self, impl std::future::Future<Output = ()>) {
        let (sender, mut receiver) = mpsc::channel::<AuditRecord>(capacity);
        let handle = Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
            alarm: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        let task = async move {
            while let Some(record) = receiver.recv().await {
                sink.append(&record);
            }
            info!(target: LOG_TARGET, "Audit sink finished.");
        };
        (handle, task)
    }

    pub fn record(&self, at_ms: u64, event: AuditEvent) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let record = AuditRecord {
            sequence,
            at_ms,
            event,
        };
        match self.sender.try_send(record) {
            Ok(()) => (),
            Err(mpsc::error::TrySendError::Full(record)) => {
                // backpressure: count, alarm, and surface in the logs; the
                // tick keeps running
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if !self.alarm.swap(true, Ordering::Relaxed) {
                    warn!(
                        target: LOG_TARGET,
                        "Audit queue full; records are being counted as dropped starting with #{}.",
                        record.sequence
                    );
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(target: LOG_TARGET, "Audit sink is gone.");
            }
        }
    }

    pub fn alarm_raised(&self) -> bool {
        self.alarm.load(Ordering::Relaxed)
    }

    pub fn dropped_records(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Clone, Default)]
    struct VecSink(Arc<Mutex<Vec<AuditRecord>>>);

    impl AuditSink for VecSink {
        fn append(&mut self, record: &AuditRecord) {
            self.0.lock().expect("no poisoning in tests").push(record.clone());
        }
    }

    #[tokio::test]
    async fn records_arrive_in_submission_order() {
        let sink = VecSink::default();
        let seen = sink.0.clone();
        let (log, task) = AuditLog::new(64, sink);
        let worker = tokio::spawn(task);
        for index in 0..10i64 {
            log.record(
                index as u64,
                AuditEvent::GoldDelta {
                    owner: CharacterId(1),
                    delta: index,
                    reason: "test",
                },
            );
        }
        drop(log);
        worker.await.expect("sink task should finish");
        let records = seen.lock().expect("no poisoning in tests");
        assert_eq!(records.len(), 10);
        for (index, record) in records.iter().enumerate() {
            assert_eq!(record.sequence, index as u64);
        }
    }

    #[tokio::test]
    async fn overflow_raises_the_alarm_instead_of_blocking() {
        let sink = VecSink::default();
        let (log, _task) = AuditLog::new(2, sink);
        // the sink task is never polled, so the queue jams
        for _ in 0..5 {
            log.record(
                0,
                AuditEvent::Critical {
                    context: "overflow probe".into(),
                },
            );
        }
        assert!(log.alarm_raised());
        assert_eq!(log.dropped_records(), 3);
    }
}
