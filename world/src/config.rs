use std::{path::PathBuf, time::Duration};

/// Tuning for the world simulation. Content tables are loaded separately;
/// everything here is deployment policy.
#[derive(Clone, Debug)]
pub struct WorldConfig {
    /// Cadence of the simulation step.
    pub tick_interval: Duration,
    /// Base seed for the per-tick deterministic RNG.
    pub rng_seed: u64,
    /// How often dirty characters are flushed to the record store.
    pub autosave_interval: Duration,
    /// No action for this long marks a character AFK.
    pub afk_threshold: Duration,
    /// AFK for this long forces a disconnect.
    pub afk_disconnect: Duration,
    /// Lifetime of a party invitation.
    pub invite_timeout: Duration,
    /// Lifetime of an open trade with no activity.
    pub trade_timeout: Duration,
    /// Exclusive pickup window for the killer or their party.
    pub loot_right_window: Duration,
    /// Ground items despawn after this long.
    pub ground_item_ttl: Duration,
    /// Fraction of current-level experience lost on death, in permille.
    pub death_xp_loss_permille: u32,
    /// Refine degrade severity.
    pub degrade_step: u8,
    /// Anti-sniping: a bid this close to the end extends the auction.
    pub snipe_window: Duration,
    /// Anti-sniping extension per late bid.
    pub snipe_extend: Duration,
    /// Cap on total anti-sniping extension.
    pub snipe_extend_cap: Duration,
    /// Character slots of AoI broadcast radius, in cells.
    pub aoi_radius: u16,
    /// Per-character cap on friend and block lists.
    pub friend_list_cap: usize,
    /// Cast interrupted when a single hit exceeds this damage.
    pub cast_interrupt_damage: u32,
    /// Violation escalation window.
    pub violation_window: Duration,
    /// Backlog at which the persistence queue raises a health alarm.
    pub persistence_alarm_backlog: usize,
    /// Accounts allowed to issue admin commands.
    pub admin_accounts: Vec<u32>,
    /// Where content tables were loaded from; reload-content re-reads it.
    pub content_dir: Option<PathBuf>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
            rng_seed: 0x7D4A_11CE,
            autosave_interval: Duration::from_secs(60),
            afk_threshold: Duration::from_secs(600),
            afk_disconnect: Duration::from_secs(1200),
            invite_timeout: Duration::from_secs(30),
            trade_timeout: Duration::from_secs(120),
            loot_right_window: Duration::from_secs(30),
            ground_item_ttl: Duration::from_secs(120),
            death_xp_loss_permille: 10,
            degrade_step: 1,
            snipe_window: Duration::from_secs(10),
            snipe_extend: Duration::from_secs(30),
            snipe_extend_cap: Duration::from_secs(120),
            aoi_radius: 24,
            friend_list_cap: 50,
            cast_interrupt_damage: 100,
            violation_window: Duration::from_secs(60),
            persistence_alarm_backlog: 4096,
            admin_accounts: Vec::new(),
            content_dir: None,
        }
    }
}
