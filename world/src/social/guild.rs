//! Guilds: ranks, mastership, wars and alliances.
use std::collections::HashMap;

use tmsrv_primitives::{CharacterId, GuildId};

use crate::error::{WorldError, WorldResult};

/// Roles form a total order; permissions attach to the rank.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum GuildRole {
    Member,
    Senior,
    Captain,
    SubMaster,
    Master,
}

impl GuildRole {
    pub fn from_u8(raw: u8) -> WorldResult<Self> {
        match raw {
            0 => Ok(GuildRole::Member),
            1 => Ok(GuildRole::Senior),
            2 => Ok(GuildRole::Captain),
            3 => Ok(GuildRole::SubMaster),
            4 => Ok(GuildRole::Master),
            _ => Err(WorldError::InvalidAmount),
        }
    }

    pub fn can_invite(&self) -> bool {
        *self >= GuildRole::Senior
    }

    pub fn can_kick(&self) -> bool {
        *self >= GuildRole::Captain
    }

    pub fn can_edit_notice(&self) -> bool {
        *self >= GuildRole::Captain
    }

    pub fn can_declare_war(&self) -> bool {
        *self >= GuildRole::SubMaster
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AllianceKind {
    Ally,
    Neutral,
    Enemy,
    /// This guild serves the other.
    Vassal,
    /// The other guild serves this one.
    Suzerain,
}

impl AllianceKind {
    pub fn from_u8(raw: u8) -> WorldResult<Self> {
        match raw {
            0 => Ok(AllianceKind::Ally),
            1 => Ok(AllianceKind::Neutral),
            2 => Ok(AllianceKind::Enemy),
            3 => Ok(AllianceKind::Vassal),
            4 => Ok(AllianceKind::Suzerain),
            _ => Err(WorldError::InvalidAmount),
        }
    }

    /// What the counterparty records when this side records `self`.
    fn mirrored(&self) -> AllianceKind {
        match self {
            AllianceKind::Vassal => AllianceKind::Suzerain,
            AllianceKind::Suzerain => AllianceKind::Vassal,
            other => *other,
        }
    }

    /// Vassalage implies friendly behavior.
    pub fn friendly(&self) -> bool {
        matches!(
            self,
            AllianceKind::Ally | AllianceKind::Vassal | AllianceKind::Suzerain
        )
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WarState {
    Pending,
    Active,
    Ended,
    Surrendered,
    Refused,
}

#[derive(Clone, Copy, Debug)]
pub struct GuildHistoryEntry {
    pub at_ms: u64,
    pub event: GuildEvent,
}

#[derive(Clone, Copy, Debug)]
pub enum GuildEvent {
    Founded { master: CharacterId },
    Joined { member: CharacterId },
    Left { member: CharacterId },
    Kicked { member: CharacterId, by: CharacterId },
    Promoted { member: CharacterId, to: GuildRole },
    MasteryPassed { from: CharacterId, to: CharacterId },
    WarDeclared { against: GuildId },
    WarResolved { against: GuildId, state: WarState },
}

#[derive(Clone, Debug)]
pub struct Guild {
    pub id: GuildId,
    pub name: String,
    pub master: CharacterId,
    pub members: HashMap<CharacterId, GuildRole>,
    pub treasury: u64,
    pub notice: String,
    /// Emblem index the client renders.
    pub mark: u16,
    /// At most one entry per counterparty; the invariant of one war entry
    /// per ordered pair holds by construction.
    pub wars: HashMap<GuildId, WarState>,
    pub alliances: HashMap<GuildId, AllianceKind>,
    pub history: Vec<GuildHistoryEntry>,
}

impl Guild {
    pub fn role_of(&self, who: CharacterId) -> WorldResult<GuildRole> {
        self.members
            .get(&who)
            .copied()
            .ok_or(WorldError::InvalidTarget)
    }

    fn record(&mut self, at_ms: u64, event: GuildEvent) {
        self.history.push(GuildHistoryEntry { at_ms, event });
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GuildInvitation {
    pub guild: GuildId,
    pub inviter: CharacterId,
    pub expires_at_ms: u64,
}

#[derive(Default)]
pub struct GuildManager {
    guilds: HashMap<GuildId, Guild>,
    names: HashMap<String, GuildId>,
    invitations: HashMap<CharacterId, GuildInvitation>,
    next_id: u32,
}

impl GuildManager {
    pub fn get(&self, id: GuildId) -> WorldResult<&Guild> {
        self.guilds.get(&id).ok_or(WorldError::InvalidTarget)
    }

    pub fn get_mut(&mut self, id: GuildId) -> WorldResult<&mut Guild> {
        self.guilds.get_mut(&id).ok_or(WorldError::InvalidTarget)
    }

    pub fn create(
        &mut self,
        name: &str,
        founder: CharacterId,
        now_ms: u64,
    ) -> WorldResult<GuildId> {
        let trimmed = name.trim();
        if trimmed.is_empty() || trimmed.len() > 24 || self.names.contains_key(trimmed) {
            return Err(WorldError::InvalidName);
        }
        self.next_id += 1;
        let id = GuildId(self.next_id);
        let mut guild = Guild {
            id,
            name: trimmed.to_owned(),
            master: founder,
            members: HashMap::from([(founder, GuildRole::Master)]),
            treasury: 0,
            notice: String::new(),
            mark: 0,
            wars: HashMap::new(),
            alliances: HashMap::new(),
            history: Vec::new(),
        };
        guild.record(now_ms, GuildEvent::Founded { master: founder });
        self.names.insert(trimmed.to_owned(), id);
        self.guilds.insert(id, guild);
        Ok(id)
    }

    pub fn invite(
        &mut self,
        id: GuildId,
        inviter: CharacterId,
        invitee: CharacterId,
        invitee_guild: Option<GuildId>,
        now_ms: u64,
        timeout_ms: u64,
    ) -> WorldResult<()> {
        if invitee_guild.is_some() {
            return Err(WorldError::AlreadyInGuild);
        }
        let guild = self.get(id)?;
        if !guild.role_of(inviter)?.can_invite() {
            return Err(WorldError::InsufficientRank);
        }
        self.invitations.insert(
            invitee,
            GuildInvitation {
                guild: id,
                inviter,
                expires_at_ms: now_ms + timeout_ms,
            },
        );
        Ok(())
    }

    pub fn accept(&mut self, invitee: CharacterId, now_ms: u64) -> WorldResult<GuildId> {
        let invitation = self
            .invitations
            .remove(&invitee)
            .ok_or(WorldError::NoInvitation)?;
        if invitation.expires_at_ms <= now_ms {
            return Err(WorldError::NoInvitation);
        }
        let guild = self.get_mut(invitation.guild)?;
        guild.members.insert(invitee, GuildRole::Member);
        guild.record(now_ms, GuildEvent::Joined { member: invitee });
        Ok(invitation.guild)
    }

    /// A member leaves. The master may only leave an otherwise-empty
    /// guild, which dissolves it.
    pub fn leave(&mut self, id: GuildId, who: CharacterId, now_ms: u64) -> WorldResult<bool> {
        let guild = self.get_mut(id)?;
        guild.role_of(who)?;
        if guild.master == who {
            if guild.members.len() > 1 {
                return Err(WorldError::NotLeader);
            }
            let guild = self.guilds.remove(&id).expect("present just above; qed");
            self.names.remove(&guild.name);
            return Ok(true);
        }
        guild.members.remove(&who);
        guild.record(now_ms, GuildEvent::Left { member: who });
        Ok(false)
    }

    pub fn kick(
        &mut self,
        id: GuildId,
        by: CharacterId,
        target: CharacterId,
        now_ms: u64,
    ) -> WorldResult<()> {
        let guild = self.get_mut(id)?;
        let by_role = guild.role_of(by)?;
        let target_role = guild.role_of(target)?;
        if !by_role.can_kick() || by_role <= target_role {
            return Err(WorldError::InsufficientRank);
        }
        guild.members.remove(&target);
        guild.record(now_ms, GuildEvent::Kicked { member: target, by });
        Ok(())
    }

    /// Promotion and demotion. Passing [GuildRole::Master] transfers
    /// mastership atomically: the old master becomes SubMaster in the same
    /// call.
    pub fn set_role(
        &mut self,
        id: GuildId,
        by: CharacterId,
        target: CharacterId,
        role: GuildRole,
        now_ms: u64,
    ) -> WorldResult<()> {
        let guild = self.get_mut(id)?;
        if guild.master != by {
            return Err(WorldError::InsufficientRank);
        }
        guild.role_of(target)?;
        if target == by {
            return Err(WorldError::InvalidTarget);
        }
        if role == GuildRole::Master {
            guild.members.insert(by, GuildRole::SubMaster);
            guild.members.insert(target, GuildRole::Master);
            guild.master = target;
            guild.record(now_ms, GuildEvent::MasteryPassed { from: by, to: target });
        } else {
            guild.members.insert(target, role);
            guild.record(now_ms, GuildEvent::Promoted { member: target, to: role });
        }
        Ok(())
    }

    pub fn set_notice(&mut self, id: GuildId, by: CharacterId, notice: String) -> WorldResult<()> {
        let guild = self.get_mut(id)?;
        if !guild.role_of(by)?.can_edit_notice() {
            return Err(WorldError::InsufficientRank);
        }
        guild.notice = notice;
        Ok(())
    }

    /// War declaration: a Pending entry on both sides. Only one live war
    /// entry may exist between two guilds.
    pub fn declare_war(
        &mut self,
        id: GuildId,
        by: CharacterId,
        against: GuildId,
        now_ms: u64,
    ) -> WorldResult<()> {
        if id == against {
            return Err(WorldError::InvalidTarget);
        }
        if !self.get(id)?.role_of(by)?.can_declare_war() {
            return Err(WorldError::InsufficientRank);
        }
        self.get(against)?;
        let existing = self.get(id)?.wars.get(&against).copied();
        if matches!(existing, Some(WarState::Pending | WarState::Active)) {
            return Err(WorldError::WrongState);
        }
        let guild = self.get_mut(id)?;
        guild.wars.insert(against, WarState::Pending);
        guild.record(now_ms, GuildEvent::WarDeclared { against });
        let other = self.get_mut(against)?;
        other.wars.insert(id, WarState::Pending);
        other.record(now_ms, GuildEvent::WarDeclared { against: id });
        Ok(())
    }

    /// The challenged side accepts or refuses a pending war.
    pub fn respond_war(
        &mut self,
        id: GuildId,
        by: CharacterId,
        challenger: GuildId,
        accept: bool,
        now_ms: u64,
    ) -> WorldResult<WarState> {
        if !self.get(id)?.role_of(by)?.can_declare_war() {
            return Err(WorldError::InsufficientRank);
        }
        let state = if accept {
            WarState::Active
        } else {
            WarState::Refused
        };
        self.resolve_war_entry(id, challenger, state, now_ms)?;
        Ok(state)
    }

    /// Surrender or mutually end an active war.
    pub fn end_war(
        &mut self,
        id: GuildId,
        by: CharacterId,
        against: GuildId,
        surrender: bool,
        now_ms: u64,
    ) -> WorldResult<WarState> {
        if !self.get(id)?.role_of(by)?.can_declare_war() {
            return Err(WorldError::InsufficientRank);
        }
        let current = self.get(id)?.wars.get(&against).copied();
        if current != Some(WarState::Active) {
            return Err(WorldError::WrongState);
        }
        let state = if surrender {
            WarState::Surrendered
        } else {
            WarState::Ended
        };
        self.resolve_war_entry(id, against, state, now_ms)?;
        Ok(state)
    }

    fn resolve_war_entry(
        &mut self,
        a: GuildId,
        b: GuildId,
        state: WarState,
        now_ms: u64,
    ) -> WorldResult<()> {
        let guild = self.get_mut(a)?;
        if !guild.wars.contains_key(&b) {
            return Err(WorldError::WrongState);
        }
        guild.wars.insert(b, state);
        guild.record(now_ms, GuildEvent::WarResolved { against: b, state });
        let other = self.get_mut(b)?;
        other.wars.insert(a, state);
        other.record(now_ms, GuildEvent::WarResolved { against: a, state });
        Ok(())
    }

    /// Symmetric alliance write; vassal/suzerain mirror each other.
    pub fn set_alliance(
        &mut self,
        id: GuildId,
        by: CharacterId,
        other: GuildId,
        kind: AllianceKind,
    ) -> WorldResult<()> {
        if id == other {
            return Err(WorldError::InvalidTarget);
        }
        if !self.get(id)?.role_of(by)?.can_declare_war() {
            return Err(WorldError::InsufficientRank);
        }
        self.get(other)?;
        self.get_mut(id)?.alliances.insert(other, kind);
        self.get_mut(other)?.alliances.insert(id, kind.mirrored());
        Ok(())
    }

    /// Whether PvP between members of the two guilds is forced on by an
    /// active war (sanctuaries still win, which the caller checks).
    pub fn at_war(&self, a: GuildId, b: GuildId) -> bool {
        self.guilds
            .get(&a)
            .and_then(|g| g.wars.get(&b))
            .map(|state| *state == WarState::Active)
            .unwrap_or(false)
    }

    pub fn expire_invitations(&mut self, now_ms: u64) {
        self.invitations.retain(|_, i| i.expires_at_ms > now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn founded(manager: &mut GuildManager) -> GuildId {
        manager
            .create("Hand of Noatun", CharacterId(1), 0)
            .expect("guild forms")
    }

    fn join(manager: &mut GuildManager, guild: GuildId, who: u32) {
        manager
            .invite(guild, CharacterId(1), CharacterId(who), None, 0, 30_000)
            .expect("invite");
        manager.accept(CharacterId(who), 10).expect("join");
    }

    #[test]
    fn names_are_unique() {
        let mut manager = GuildManager::default();
        founded(&mut manager);
        assert_eq!(
            manager.create("Hand of Noatun", CharacterId(2), 0),
            Err(WorldError::InvalidName)
        );
    }

    #[test]
    fn member_rank_cannot_invite() {
        let mut manager = GuildManager::default();
        let guild = founded(&mut manager);
        join(&mut manager, guild, 2);
        assert_eq!(
            manager.invite(guild, CharacterId(2), CharacterId(3), None, 0, 30_000),
            Err(WorldError::InsufficientRank)
        );
    }

    #[test]
    fn mastership_transfer_is_atomic() {
        let mut manager = GuildManager::default();
        let guild = founded(&mut manager);
        join(&mut manager, guild, 2);
        manager
            .set_role(guild, CharacterId(1), CharacterId(2), GuildRole::Master, 50)
            .expect("pass mastership");
        let g = manager.get(guild).expect("guild");
        assert_eq!(g.master, CharacterId(2));
        assert_eq!(g.role_of(CharacterId(2)).expect("role"), GuildRole::Master);
        assert_eq!(
            g.role_of(CharacterId(1)).expect("role"),
            GuildRole::SubMaster
        );
    }

    #[test]
    fn kick_requires_higher_rank() {
        let mut manager = GuildManager::default();
        let guild = founded(&mut manager);
        join(&mut manager, guild, 2);
        join(&mut manager, guild, 3);
        manager
            .set_role(guild, CharacterId(1), CharacterId(2), GuildRole::Captain, 20)
            .expect("promote");
        manager
            .set_role(guild, CharacterId(1), CharacterId(3), GuildRole::Captain, 21)
            .expect("promote");
        // equal rank cannot kick
        assert_eq!(
            manager.kick(guild, CharacterId(2), CharacterId(3), 30),
            Err(WorldError::InsufficientRank)
        );
        manager
            .kick(guild, CharacterId(1), CharacterId(3), 31)
            .expect("master kicks");
    }

    #[test]
    fn war_lifecycle_pending_active_surrendered() {
        let mut manager = GuildManager::default();
        let a = founded(&mut manager);
        let b = manager
            .create("Akneian Circle", CharacterId(9), 0)
            .expect("second guild");
        manager
            .declare_war(a, CharacterId(1), b, 10)
            .expect("declare");
        assert!(!manager.at_war(a, b));
        // only one live entry per pair
        assert_eq!(
            manager.declare_war(a, CharacterId(1), b, 11),
            Err(WorldError::WrongState)
        );
        manager
            .respond_war(b, CharacterId(9), a, true, 20)
            .expect("accept");
        assert!(manager.at_war(a, b));
        assert!(manager.at_war(b, a));
        manager
            .end_war(b, CharacterId(9), a, true, 30)
            .expect("surrender");
        assert!(!manager.at_war(a, b));
        // a new war may start after resolution
        manager
            .declare_war(a, CharacterId(1), b, 40)
            .expect("declare again");
    }

    #[test]
    fn refused_war_never_activates() {
        let mut manager = GuildManager::default();
        let a = founded(&mut manager);
        let b = manager
            .create("Akneian Circle", CharacterId(9), 0)
            .expect("second guild");
        manager.declare_war(a, CharacterId(1), b, 10).expect("declare");
        assert_eq!(
            manager
                .respond_war(b, CharacterId(9), a, false, 20)
                .expect("refuse"),
            WarState::Refused
        );
        assert!(!manager.at_war(a, b));
    }

    #[test]
    fn vassalage_mirrors_as_suzerain() {
        let mut manager = GuildManager::default();
        let a = founded(&mut manager);
        let b = manager
            .create("Akneian Circle", CharacterId(9), 0)
            .expect("second guild");
        manager
            .set_alliance(a, CharacterId(1), b, AllianceKind::Vassal)
            .expect("swear fealty");
        assert_eq!(
            manager.get(a).expect("a").alliances.get(&b),
            Some(&AllianceKind::Vassal)
        );
        assert_eq!(
            manager.get(b).expect("b").alliances.get(&a),
            Some(&AllianceKind::Suzerain)
        );
        assert!(AllianceKind::Vassal.friendly());
    }

    #[test]
    fn master_cannot_abandon_a_populated_guild() {
        let mut manager = GuildManager::default();
        let guild = founded(&mut manager);
        join(&mut manager, guild, 2);
        assert_eq!(
            manager.leave(guild, CharacterId(1), 10),
            Err(WorldError::NotLeader)
        );
        manager.leave(guild, CharacterId(2), 11).expect("member leaves");
        assert!(manager.leave(guild, CharacterId(1), 12).expect("dissolves"));
        assert!(manager.get(guild).is_err());
    }
}
