//! Parties: invitations, membership, leadership and the experience split.
use std::collections::HashMap;

use tmsrv_primitives::{CharacterId, PartyId, MAX_PARTY_MEMBERS};

use crate::error::{WorldError, WorldResult};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LootPolicy {
    #[default]
    FreeForAll,
    RoundRobin,
    Master,
    Group,
    NeedBeforeGreed,
}

impl LootPolicy {
    pub fn from_u8(raw: u8) -> WorldResult<Self> {
        match raw {
            0 => Ok(LootPolicy::FreeForAll),
            1 => Ok(LootPolicy::RoundRobin),
            2 => Ok(LootPolicy::Master),
            3 => Ok(LootPolicy::Group),
            4 => Ok(LootPolicy::NeedBeforeGreed),
            _ => Err(WorldError::InvalidAmount),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ExpPolicy {
    #[default]
    Equal,
    LevelWeighted,
    Contribution,
}

impl ExpPolicy {
    pub fn from_u8(raw: u8) -> WorldResult<Self> {
        match raw {
            0 => Ok(ExpPolicy::Equal),
            1 => Ok(ExpPolicy::LevelWeighted),
            2 => Ok(ExpPolicy::Contribution),
            _ => Err(WorldError::InvalidAmount),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Party {
    pub id: PartyId,
    pub leader: CharacterId,
    /// Join order; seniority rules read from the front.
    pub members: Vec<CharacterId>,
    pub loot_policy: LootPolicy,
    pub exp_policy: ExpPolicy,
    pub master_looter: Option<CharacterId>,
    round_robin_cursor: usize,
}

impl Party {
    pub fn contains(&self, who: CharacterId) -> bool {
        self.members.contains(&who)
    }

    /// Round-robin pick among present members, advancing the cursor.
    pub fn next_round_robin(&mut self, present: &[CharacterId]) -> Option<CharacterId> {
        if present.is_empty() {
            return None;
        }
        for _ in 0..self.members.len() {
            self.round_robin_cursor = (self.round_robin_cursor + 1) % self.members.len();
            let candidate = self.members[self.round_robin_cursor];
            if present.contains(&candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Invitation {
    pub inviter: CharacterId,
    pub invitee: CharacterId,
    /// Present when the inviter already has a party.
    pub party: Option<PartyId>,
    pub expires_at_ms: u64,
}

#[derive(Default)]
pub struct PartyManager {
    parties: HashMap<PartyId, Party>,
    /// At most one pending invitation per invitee.
    invitations: HashMap<CharacterId, Invitation>,
    next_id: u32,
}

impl PartyManager {
    pub fn get(&self, id: PartyId) -> WorldResult<&Party> {
        self.parties.get(&id).ok_or(WorldError::InvalidTarget)
    }

    pub fn get_mut(&mut self, id: PartyId) -> WorldResult<&mut Party> {
        self.parties.get_mut(&id).ok_or(WorldError::InvalidTarget)
    }

    pub fn invite(
        &mut self,
        inviter: CharacterId,
        inviter_party: Option<PartyId>,
        invitee: CharacterId,
        invitee_party: Option<PartyId>,
        now_ms: u64,
        timeout_ms: u64,
    ) -> WorldResult<()> {
        if inviter == invitee || invitee_party.is_some() {
            return Err(WorldError::AlreadyInParty);
        }
        if let Some(party) = inviter_party {
            let party = self.get(party)?;
            if party.leader != inviter {
                return Err(WorldError::NotLeader);
            }
            if party.members.len() >= MAX_PARTY_MEMBERS {
                return Err(WorldError::PartyFull);
            }
        }
        self.invitations.insert(
            invitee,
            Invitation {
                inviter,
                invitee,
                party: inviter_party,
                expires_at_ms: now_ms + timeout_ms,
            },
        );
        Ok(())
    }

    /// Accepting either joins the inviter's party or founds a new one.
    /// Returns the party id and the full member list for notification.
    pub fn accept(
        &mut self,
        invitee: CharacterId,
        now_ms: u64,
    ) -> WorldResult<(PartyId, CharacterId)> {
        let invitation = self
            .invitations
            .remove(&invitee)
            .ok_or(WorldError::NoInvitation)?;
        if invitation.expires_at_ms <= now_ms {
            return Err(WorldError::NoInvitation);
        }
        let party_id = match invitation.party {
            Some(id) => {
                let party = self.get_mut(id)?;
                if party.members.len() >= MAX_PARTY_MEMBERS {
                    return Err(WorldError::PartyFull);
                }
                party.members.push(invitee);
                id
            }
            None => {
                self.next_id += 1;
                let id = PartyId(self.next_id);
                self.parties.insert(
                    id,
                    Party {
                        id,
                        leader: invitation.inviter,
                        members: vec![invitation.inviter, invitee],
                        loot_policy: LootPolicy::default(),
                        exp_policy: ExpPolicy::default(),
                        master_looter: None,
                        round_robin_cursor: 0,
                    },
                );
                id
            }
        };
        Ok((party_id, invitation.inviter))
    }

    pub fn decline(&mut self, invitee: CharacterId) -> WorldResult<Invitation> {
        self.invitations
            .remove(&invitee)
            .ok_or(WorldError::NoInvitation)
    }

    pub fn expire_invitations(&mut self, now_ms: u64) -> Vec<Invitation> {
        let expired: Vec<CharacterId> = self
            .invitations
            .values()
            .filter(|i| i.expires_at_ms <= now_ms)
            .map(|i| i.invitee)
            .collect();
        expired
            .iter()
            .filter_map(|invitee| self.invitations.remove(invitee))
            .collect()
    }

    /// Removes a member. Leadership passes by seniority; the party
    /// disbands when one member would remain. Returns the disbanded
    /// member list, if any.
    pub fn remove_member(
        &mut self,
        id: PartyId,
        who: CharacterId,
    ) -> WorldResult<Option<Vec<CharacterId>>> {
        let party = self.parties.get_mut(&id).ok_or(WorldError::InvalidTarget)?;
        if !party.contains(who) {
            return Err(WorldError::InvalidTarget);
        }
        party.members.retain(|m| *m != who);
        if party.master_looter == Some(who) {
            party.master_looter = None;
        }
        if party.members.len() <= 1 {
            let party = self.parties.remove(&id).expect("present just above; qed");
            return Ok(Some(party.members));
        }
        if party.leader == who {
            party.leader = party.members[0];
        }
        Ok(None)
    }

    pub fn kick(
        &mut self,
        id: PartyId,
        leader: CharacterId,
        target: CharacterId,
    ) -> WorldResult<Option<Vec<CharacterId>>> {
        let party = self.get(id)?;
        if party.leader != leader {
            return Err(WorldError::NotLeader);
        }
        if leader == target {
            return Err(WorldError::InvalidTarget);
        }
        self.remove_member(id, target)
    }

    pub fn disband(&mut self, id: PartyId, leader: CharacterId) -> WorldResult<Vec<CharacterId>> {
        let party = self.get(id)?;
        if party.leader != leader {
            return Err(WorldError::NotLeader);
        }
        let party = self.parties.remove(&id).expect("present just above; qed");
        Ok(party.members)
    }

    pub fn set_policies(
        &mut self,
        id: PartyId,
        leader: CharacterId,
        loot: LootPolicy,
        exp: ExpPolicy,
    ) -> WorldResult<()> {
        let party = self.parties.get_mut(&id).ok_or(WorldError::InvalidTarget)?;
        if party.leader != leader {
            return Err(WorldError::NotLeader);
        }
        party.loot_policy = loot;
        party.exp_policy = exp;
        Ok(())
    }
}

/// A member's view for the experience split.
#[derive(Clone, Copy, Debug)]
pub struct ExpShareInput {
    pub character: CharacterId,
    pub level: u16,
    /// Damage plus healing contributed to the kill.
    pub contribution: u64,
}

/// Splits `total` experience between eligible members. Shares floor; the
/// remainder goes to the member with the highest contribution.
pub fn split_experience(
    total: u64,
    policy: ExpPolicy,
    members: &[ExpShareInput],
) -> Vec<(CharacterId, u64)> {
    if members.is_empty() {
        return Vec::new();
    }
    let mut shares: Vec<(CharacterId, u64)> = match policy {
        ExpPolicy::Equal => {
            let each = total / members.len() as u64;
            members.iter().map(|m| (m.character, each)).collect()
        }
        ExpPolicy::LevelWeighted => {
            let level_sum: u64 = members.iter().map(|m| u64::from(m.level)).sum();
            if level_sum == 0 {
                return members.iter().map(|m| (m.character, 0)).collect();
            }
            members
                .iter()
                .map(|m| (m.character, total * u64::from(m.level) / level_sum))
                .collect()
        }
        ExpPolicy::Contribution => {
            let contribution_sum: u64 = members.iter().map(|m| m.contribution).sum();
            if contribution_sum == 0 {
                let each = total / members.len() as u64;
                members.iter().map(|m| (m.character, each)).collect()
            } else {
                members
                    .iter()
                    .map(|m| (m.character, total * m.contribution / contribution_sum))
                    .collect()
            }
        }
    };
    let distributed: u64 = shares.iter().map(|(_, share)| share).sum();
    let remainder = total - distributed;
    if remainder > 0 {
        let top = members
            .iter()
            .enumerate()
            .max_by_key(|(_, m)| m.contribution)
            .map(|(index, _)| index)
            .unwrap_or(0);
        shares[top].1 += remainder;
    }
    shares
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form_party(manager: &mut PartyManager, leader: u32, joiner: u32) -> PartyId {
        manager
            .invite(
                CharacterId(leader),
                None,
                CharacterId(joiner),
                None,
                0,
                30_000,
            )
            .expect("invite");
        let (party, _) = manager.accept(CharacterId(joiner), 10).expect("accept");
        party
    }

    #[test]
    fn invite_accept_forms_a_party() {
        let mut manager = PartyManager::default();
        let id = form_party(&mut manager, 1, 2);
        let party = manager.get(id).expect("party exists");
        assert_eq!(party.leader, CharacterId(1));
        assert_eq!(party.members, vec![CharacterId(1), CharacterId(2)]);
    }

    #[test]
    fn expired_invitations_cannot_be_accepted() {
        let mut manager = PartyManager::default();
        manager
            .invite(CharacterId(1), None, CharacterId(2), None, 0, 1000)
            .expect("invite");
        assert_eq!(
            manager.accept(CharacterId(2), 1000),
            Err(WorldError::NoInvitation)
        );
    }

    #[test]
    fn leader_leaving_passes_by_seniority() {
        let mut manager = PartyManager::default();
        let id = form_party(&mut manager, 1, 2);
        manager
            .invite(CharacterId(1), Some(id), CharacterId(3), None, 0, 30_000)
            .expect("invite third");
        manager.accept(CharacterId(3), 10).expect("third joins");
        let disbanded = manager.remove_member(id, CharacterId(1)).expect("leader leaves");
        assert!(disbanded.is_none());
        assert_eq!(manager.get(id).expect("alive").leader, CharacterId(2));
    }

    #[test]
    fn two_member_party_disbands_on_leave() {
        let mut manager = PartyManager::default();
        let id = form_party(&mut manager, 1, 2);
        let disbanded = manager
            .remove_member(id, CharacterId(2))
            .expect("member leaves");
        assert_eq!(disbanded, Some(vec![CharacterId(1)]));
        assert!(manager.get(id).is_err());
    }

    #[test]
    fn only_the_leader_kicks() {
        let mut manager = PartyManager::default();
        let id = form_party(&mut manager, 1, 2);
        manager
            .invite(CharacterId(1), Some(id), CharacterId(3), None, 0, 30_000)
            .expect("invite third");
        manager.accept(CharacterId(3), 10).expect("third joins");
        assert_eq!(
            manager.kick(id, CharacterId(2), CharacterId(3)),
            Err(WorldError::NotLeader)
        );
        manager
            .kick(id, CharacterId(1), CharacterId(3))
            .expect("leader kicks");
    }

    #[test]
    fn level_weighted_split_matches_the_book() {
        let shares = split_experience(
            100,
            ExpPolicy::LevelWeighted,
            &[
                ExpShareInput {
                    character: CharacterId(1),
                    level: 10,
                    contribution: 40,
                },
                ExpShareInput {
                    character: CharacterId(2),
                    level: 20,
                    contribution: 400,
                },
            ],
        );
        // floor(100*10/30)=33, floor(100*20/30)=66, remainder 1 to the
        // higher contributor
        assert_eq!(shares, vec![(CharacterId(1), 33), (CharacterId(2), 67)]);
    }

    #[test]
    fn equal_split_gives_remainder_to_top_contributor() {
        let shares = split_experience(
            101,
            ExpPolicy::Equal,
            &[
                ExpShareInput {
                    character: CharacterId(1),
                    level: 10,
                    contribution: 500,
                },
                ExpShareInput {
                    character: CharacterId(2),
                    level: 10,
                    contribution: 100,
                },
            ],
        );
        assert_eq!(shares, vec![(CharacterId(1), 51), (CharacterId(2), 50)]);
    }

    #[test]
    fn round_robin_skips_absent_members() {
        let mut party = Party {
            id: PartyId(1),
            leader: CharacterId(1),
            members: vec![CharacterId(1), CharacterId(2), CharacterId(3)],
            loot_policy: LootPolicy::RoundRobin,
            exp_policy: ExpPolicy::Equal,
            master_looter: None,
            round_robin_cursor: 0,
        };
        let present = vec![CharacterId(1), CharacterId(3)];
        assert_eq!(party.next_round_robin(&present), Some(CharacterId(3)));
        assert_eq!(party.next_round_robin(&present), Some(CharacterId(1)));
        assert_eq!(party.next_round_robin(&present), Some(CharacterId(3)));
    }

    #[test]
    fn full_party_rejects_invitations() {
        let mut manager = PartyManager::default();
        let id = form_party(&mut manager, 1, 2);
        for joiner in 3..=12u32 {
            manager
                .invite(CharacterId(1), Some(id), CharacterId(joiner), None, 0, 30_000)
                .expect("invite");
            manager.accept(CharacterId(joiner), 10).expect("join");
        }
        assert_eq!(manager.get(id).expect("alive").members.len(), MAX_PARTY_MEMBERS);
        assert_eq!(
            manager.invite(CharacterId(1), Some(id), CharacterId(99), None, 0, 30_000),
            Err(WorldError::PartyFull)
        );
    }
}
