//! Violation rules, escalation and bans.
//!
//! Each (violation kind, severity) pair maps to an action; counts over a
//! sliding window escalate. Bans are checked at handshake through the
//! account authority seam.
use std::{
    collections::HashMap,
    num::NonZeroUsize,
    time::Duration,
};

use lru::LruCache;

use tmsrv_primitives::{AccountId, CharacterId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ViolationKind {
    PacketFlood,
    InvalidPacket,
    StaleSequence,
    InvalidState,
    ForbiddenOperation,
    SpeedHack,
    DuplicationAttempt,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SecurityAction {
    Log,
    Warn,
    BlockPacket,
    RateLimit,
    Disconnect,
    TempBan { hours: u32 },
    PermBan,
}

/// One escalation rule: crossing `threshold` occurrences within the window
/// upgrades the base action to the escalated one.
#[derive(Clone, Copy, Debug)]
pub struct SecurityRule {
    pub severity: Severity,
    pub base_action: SecurityAction,
    pub threshold: u32,
    pub escalated_action: SecurityAction,
}

fn default_rules() -> HashMap<ViolationKind, SecurityRule> {
    use SecurityAction::*;
    use ViolationKind::*;
    HashMap::from([
        (
            PacketFlood,
            SecurityRule {
                severity: Severity::Medium,
                base_action: RateLimit,
                threshold: 5,
                escalated_action: Disconnect,
            },
        ),
        (
            InvalidPacket,
            SecurityRule {
                severity: Severity::Medium,
                base_action: Log,
                threshold: 10,
                escalated_action: Disconnect,
            },
        ),
        (
            StaleSequence,
            SecurityRule {
                severity: Severity::High,
                base_action: BlockPacket,
                threshold: 3,
                escalated_action: Disconnect,
            },
        ),
        (
            InvalidState,
            SecurityRule {
                severity: Severity::High,
                base_action: BlockPacket,
                threshold: 5,
                escalated_action: Disconnect,
            },
        ),
        (
            ForbiddenOperation,
            SecurityRule {
                severity: Severity::Medium,
                base_action: Warn,
                threshold: 10,
                escalated_action: Disconnect,
            },
        ),
        (
            SpeedHack,
            SecurityRule {
                severity: Severity::High,
                base_action: BlockPacket,
                threshold: 5,
                escalated_action: TempBan { hours: 24 },
            },
        ),
        (
            DuplicationAttempt,
            SecurityRule {
                severity: Severity::Critical,
                base_action: Disconnect,
                threshold: 2,
                escalated_action: PermBan,
            },
        ),
    ])
}

#[derive(Clone, Debug)]
pub struct BanEntry {
    pub address: Option<String>,
    pub account: Option<AccountId>,
    pub character: Option<CharacterId>,
    pub reason: String,
    pub start_ms: u64,
    /// Ignored when permanent.
    pub end_ms: u64,
    pub permanent: bool,
}

impl BanEntry {
    pub fn active(&self, now_ms: u64) -> bool {
        self.permanent || now_ms < self.end_ms
    }
}

/// Recent violation timestamps per (account, kind), bounded so a crowd of
/// offenders cannot grow memory without limit.
type ViolationWindow = LruCache<(AccountId, ViolationKind), Vec<u64>>;

pub struct SecurityManager {
    rules: HashMap<ViolationKind, SecurityRule>,
    window: Duration,
    recent: ViolationWindow,
    bans: Vec<BanEntry>,
}

impl SecurityManager {
    pub fn new(window: Duration) -> Self {
        Self {
            rules: default_rules(),
            window,
            recent: LruCache::new(NonZeroUsize::new(4096).expect("4096 > 0 qed")),
            bans: Vec::new(),
        }
    }

    /// Records a violation and returns the action to take now.
    pub fn record_violation(
        &mut self,
        account: AccountId,
        kind: ViolationKind,
        now_ms: u64,
    ) -> SecurityAction {
        let Some(rule) = self.rules.get(&kind).copied() else {
            return SecurityAction::Log;
        };
        let key = (account, kind);
        let window_ms = self.window.as_millis() as u64;
        let timestamps = self.recent.get_or_insert_mut(key, Vec::new);
        timestamps.retain(|at| now_ms.saturating_sub(*at) < window_ms);
        timestamps.push(now_ms);
        let action = if timestamps.len() as u32 >= rule.threshold {
            rule.escalated_action
        } else {
            rule.base_action
        };
        if let SecurityAction::TempBan { hours } = action {
            self.bans.push(BanEntry {
                address: None,
                account: Some(account),
                character: None,
                reason: format!("{kind:?} threshold"),
                start_ms: now_ms,
                end_ms: now_ms + u64::from(hours) * 60 * 60 * 1000,
                permanent: false,
            });
        }
        if action == SecurityAction::PermBan {
            self.bans.push(BanEntry {
                address: None,
                account: Some(account),
                character: None,
                reason: format!("{kind:?} threshold"),
                start_ms: now_ms,
                end_ms: 0,
                permanent: true,
            });
        }
        action
    }

    pub fn add_ban(&mut self, ban: BanEntry) {
        self.bans.push(ban);
    }

    /// Lifts bans matching the account; returns how many were removed.
    pub fn unban_account(&mut self, account: AccountId) -> usize {
        let before = self.bans.len();
        self.bans.retain(|ban| ban.account != Some(account));
        before - self.bans.len()
    }

    pub fn is_banned(
        &self,
        address: &str,
        account: Option<AccountId>,
        character: Option<CharacterId>,
        now_ms: u64,
    ) -> bool {
        self.bans.iter().any(|ban| {
            ban.active(now_ms)
                && (ban.address.as_deref() == Some(address)
                    || (ban.account.is_some() && ban.account == account)
                    || (ban.character.is_some() && ban.character == character))
        })
    }

    pub fn sweep_expired(&mut self, now_ms: u64) {
        self.bans.retain(|ban| ban.active(now_ms));
    }

    pub fn ban_count(&self) -> usize {
        self.bans.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SecurityManager {
        SecurityManager::new(Duration::from_secs(60))
    }

    #[test]
    fn escalates_at_the_threshold() {
        let mut m = manager();
        let account = AccountId(5);
        for _ in 0..4 {
            assert_eq!(
                m.record_violation(account, ViolationKind::PacketFlood, 1000),
                SecurityAction::RateLimit
            );
        }
        assert_eq!(
            m.record_violation(account, ViolationKind::PacketFlood, 1000),
            SecurityAction::Disconnect
        );
    }

    #[test]
    fn window_expiry_resets_the_count() {
        let mut m = manager();
        let account = AccountId(5);
        for at in [0u64, 1000, 2000, 3000] {
            m.record_violation(account, ViolationKind::PacketFlood, at);
        }
        // a minute later the old strikes have rolled off
        assert_eq!(
            m.record_violation(account, ViolationKind::PacketFlood, 70_000),
            SecurityAction::RateLimit
        );
    }

    #[test]
    fn duplication_attempts_earn_a_permban() {
        let mut m = manager();
        let account = AccountId(9);
        assert_eq!(
            m.record_violation(account, ViolationKind::DuplicationAttempt, 0),
            SecurityAction::Disconnect
        );
        assert_eq!(
            m.record_violation(account, ViolationKind::DuplicationAttempt, 1),
            SecurityAction::PermBan
        );
        assert!(m.is_banned("1.2.3.4", Some(account), None, 999_999_999));
    }

    #[test]
    fn temp_bans_expire() {
        let mut m = manager();
        m.add_ban(BanEntry {
            address: Some("10.0.0.1".into()),
            account: None,
            character: None,
            reason: "test".into(),
            start_ms: 0,
            end_ms: 1000,
            permanent: false,
        });
        assert!(m.is_banned("10.0.0.1", None, None, 500));
        assert!(!m.is_banned("10.0.0.1", None, None, 1000));
        m.sweep_expired(1000);
        assert_eq!(m.ban_count(), 0);
    }

    #[test]
    fn ban_matches_any_identity_axis() {
        let mut m = manager();
        m.add_ban(BanEntry {
            address: None,
            account: None,
            character: Some(CharacterId(3)),
            reason: "rmt".into(),
            start_ms: 0,
            end_ms: 0,
            permanent: true,
        });
        assert!(m.is_banned("anywhere", None, Some(CharacterId(3)), 10));
        assert!(!m.is_banned("anywhere", None, Some(CharacterId(4)), 10));
    }
}
