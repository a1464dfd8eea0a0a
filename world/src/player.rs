//! The player manager: authoritative owner of in-memory character records,
//! session routing, the autosave dirty set and AFK policy.
use std::collections::{HashMap, HashSet};

use network_session::SessionId;

use tmsrv_primitives::{AccountId, CharacterClass, CharacterId, Position, NAME_LENGTH};

use crate::{
    character::Character,
    content::ContentTables,
    error::{WorldError, WorldResult},
};

/// Character slots per account.
pub const ACCOUNT_SLOTS: usize = 4;

/// Advisory AFK outcome of the idle scan.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IdleVerdict {
    Afk,
    ForceDisconnect,
}

#[derive(Default)]
pub struct PlayerManager {
    characters: HashMap<CharacterId, Character>,
    by_name: HashMap<String, CharacterId>,
    by_account: HashMap<AccountId, Vec<CharacterId>>,
    session_of: HashMap<CharacterId, SessionId>,
    character_of: HashMap<SessionId, CharacterId>,
    dirty: HashSet<CharacterId>,
    afk_marked: HashSet<CharacterId>,
    next_id: u32,
    /// Bumped on every snapshot batch; persisted with it.
    version: u64,
}

impl PlayerManager {
    /// Restores the id allocator after a restart so ids never recur.
    pub fn restore_allocator(&mut self, last_id: u32, version: u64) {
        self.next_id = self.next_id.max(last_id);
        self.version = self.version.max(version);
    }

    pub fn last_allocated_id(&self) -> u32 {
        self.next_id
    }

    pub fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    pub fn get(&self, id: CharacterId) -> WorldResult<&Character> {
        self.characters.get(&id).ok_or(WorldError::UnknownCharacter)
    }

    pub fn get_mut(&mut self, id: CharacterId) -> WorldResult<&mut Character> {
        self.characters
            .get_mut(&id)
            .ok_or(WorldError::UnknownCharacter)
    }

    pub fn by_name(&self, name: &str) -> Option<CharacterId> {
        self.by_name.get(name).copied()
    }

    pub fn characters_of(&self, account: AccountId) -> Vec<CharacterId> {
        self.by_account.get(&account).cloned().unwrap_or_default()
    }

    pub fn ids(&self) -> Vec<CharacterId> {
        self.characters.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    /// Two distinct records at once, for trades and other pairwise commits.
    /// The records are taken out and reinserted; callers must not look
    /// either character up while the closure runs.
    pub fn with_pair<R>(
        &mut self,
        a: CharacterId,
        b: CharacterId,
        operate: impl FnOnce(&mut Character, &mut Character) -> R,
    ) -> WorldResult<R> {
        if a == b {
            return Err(WorldError::InternalError);
        }
        let mut char_a = self.characters.remove(&a).ok_or(WorldError::UnknownCharacter)?;
        let Some(mut char_b) = self.characters.remove(&b) else {
            self.characters.insert(a, char_a);
            return Err(WorldError::UnknownCharacter);
        };
        let result = operate(&mut char_a, &mut char_b);
        self.characters.insert(a, char_a);
        self.characters.insert(b, char_b);
        self.mark_dirty(a);
        self.mark_dirty(b);
        Ok(result)
    }

    // --- creation and deletion ----------------------------------------

    pub fn create_character(
        &mut self,
        content: &ContentTables,
        account: AccountId,
        name: &str,
        class: CharacterClass,
        spawn: Position,
    ) -> WorldResult<CharacterId> {
        let name = name.trim();
        if name.is_empty() || name.len() > NAME_LENGTH || self.by_name.contains_key(name) {
            return Err(WorldError::InvalidName);
        }
        let slots = self.by_account.entry(account).or_default();
        if slots.len() >= ACCOUNT_SLOTS {
            return Err(WorldError::ResourceExhaustion);
        }
        self.next_id += 1;
        let id = CharacterId(self.next_id);
        let character = Character::new(content, id, account, name.to_owned(), class, spawn);
        slots.push(id);
        self.by_name.insert(name.to_owned(), id);
        self.characters.insert(id, character);
        self.mark_dirty(id);
        Ok(id)
    }

    pub fn delete_character(&mut self, account: AccountId, name: &str) -> WorldResult<CharacterId> {
        let id = self.by_name(name).ok_or(WorldError::UnknownCharacter)?;
        let character = self.get(id)?;
        if character.account != account {
            return Err(WorldError::RequirementUnmet);
        }
        if self.session_of.contains_key(&id) {
            return Err(WorldError::WrongState);
        }
        self.by_name.remove(name);
        if let Some(slots) = self.by_account.get_mut(&account) {
            slots.retain(|slot| *slot != id);
        }
        self.characters.remove(&id);
        self.dirty.remove(&id);
        Ok(id)
    }

    /// Inserts a restored character, as on cold load from the store.
    pub fn adopt(&mut self, character: Character) -> WorldResult<CharacterId> {
        let id = character.id;
        if self.characters.contains_key(&id) || self.by_name.contains_key(&character.name) {
            return Err(WorldError::InternalError);
        }
        self.next_id = self.next_id.max(id.0);
        self.by_name.insert(character.name.clone(), id);
        self.by_account
            .entry(character.account)
            .or_default()
            .push(id);
        self.characters.insert(id, character);
        Ok(id)
    }

    // --- session routing -----------------------------------------------

    pub fn bind_session(&mut self, id: CharacterId, session: SessionId) -> WorldResult<()> {
        if self.session_of.contains_key(&id) {
            return Err(WorldError::WrongState);
        }
        self.session_of.insert(id, session);
        self.character_of.insert(session, id);
        Ok(())
    }

    pub fn unbind_session(&mut self, session: SessionId) -> Option<CharacterId> {
        let id = self.character_of.remove(&session)?;
        self.session_of.remove(&id);
        self.afk_marked.remove(&id);
        Some(id)
    }

    pub fn session_of(&self, id: CharacterId) -> Option<SessionId> {
        self.session_of.get(&id).copied()
    }

    pub fn character_of(&self, session: SessionId) -> Option<CharacterId> {
        self.character_of.get(&session).copied()
    }

    pub fn online(&self) -> impl Iterator<Item = CharacterId> + '_ {
        self.session_of.keys().copied()
    }

    pub fn is_online(&self, id: CharacterId) -> bool {
        self.session_of.contains_key(&id)
    }

    // --- autosave ------------------------------------------------------

    pub fn mark_dirty(&mut self, id: CharacterId) {
        self.dirty.insert(id);
    }

    pub fn drain_dirty(&mut self) -> Vec<CharacterId> {
        self.dirty.drain().collect()
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    // --- idle policy ---------------------------------------------------

    pub fn note_action(&mut self, id: CharacterId, now_ms: u64) {
        if let Some(character) = self.characters.get_mut(&id) {
            character.last_action_ms = now_ms;
            self.afk_marked.remove(&id);
        }
    }

    /// Scans online characters against the idle thresholds. An AFK verdict
    /// fires once per idle stretch; the disconnect verdict repeats until
    /// acted on.
    pub fn scan_idle(
        &mut self,
        now_ms: u64,
        afk_threshold_ms: u64,
        disconnect_threshold_ms: u64,
    ) -> Vec<(CharacterId, IdleVerdict)> {
        let mut verdicts = Vec::new();
        let online: Vec<CharacterId> = self.session_of.keys().copied().collect();
        for id in online {
            let Some(character) = self.characters.get(&id) else {
                continue;
            };
            let idle = now_ms.saturating_sub(character.last_action_ms);
            if idle >= disconnect_threshold_ms {
                verdicts.push((id, IdleVerdict::ForceDisconnect));
            } else if idle >= afk_threshold_ms && self.afk_marked.insert(id) {
                verdicts.push((id, IdleVerdict::Afk));
            }
        }
        verdicts
    }
}

#[cfg(test)]
mod tests {
    use tmsrv_primitives::MapId;

    use super::*;
    use crate::content::ContentTables;

    fn spawn() -> Position {
        Position::new(MapId(1), 100, 100)
    }

    fn manager_with_two(content: &ContentTables) -> (PlayerManager, CharacterId, CharacterId) {
        let mut manager = PlayerManager::default();
        let a = manager
            .create_character(content, AccountId(1), "alda", CharacterClass::Foema, spawn())
            .expect("create a");
        let b = manager
            .create_character(
                content,
                AccountId(2),
                "brum",
                CharacterClass::TransKnight,
                spawn(),
            )
            .expect("create b");
        (manager, a, b)
    }

    #[test]
    fn names_are_unique_and_ids_monotonic() {
        let content = ContentTables::fixture();
        let (mut manager, a, b) = manager_with_two(&content);
        assert!(b.0 > a.0);
        assert_eq!(
            manager.create_character(
                &content,
                AccountId(3),
                "alda",
                CharacterClass::Foema,
                spawn()
            ),
            Err(WorldError::InvalidName)
        );
        // deletion frees the name but never the id
        manager
            .delete_character(AccountId(1), "alda")
            .expect("delete");
        let again = manager
            .create_character(&content, AccountId(3), "alda", CharacterClass::Foema, spawn())
            .expect("recreate");
        assert!(again.0 > b.0);
    }

    #[test]
    fn account_slots_cap_out() {
        let content = ContentTables::fixture();
        let mut manager = PlayerManager::default();
        for index in 0..ACCOUNT_SLOTS {
            manager
                .create_character(
                    &content,
                    AccountId(1),
                    &format!("char{index}"),
                    CharacterClass::Foema,
                    spawn(),
                )
                .expect("slot fits");
        }
        assert_eq!(
            manager.create_character(
                &content,
                AccountId(1),
                "overflow",
                CharacterClass::Foema,
                spawn()
            ),
            Err(WorldError::ResourceExhaustion)
        );
    }

    #[test]
    fn session_binding_is_exclusive() {
        let content = ContentTables::fixture();
        let (mut manager, a, _) = manager_with_two(&content);
        manager.bind_session(a, SessionId(10)).expect("bind");
        assert_eq!(
            manager.bind_session(a, SessionId(11)),
            Err(WorldError::WrongState)
        );
        assert_eq!(manager.character_of(SessionId(10)), Some(a));
        assert_eq!(manager.unbind_session(SessionId(10)), Some(a));
        assert_eq!(manager.session_of(a), None);
    }

    #[test]
    fn online_character_cannot_be_deleted() {
        let content = ContentTables::fixture();
        let (mut manager, a, _) = manager_with_two(&content);
        manager.bind_session(a, SessionId(10)).expect("bind");
        assert_eq!(
            manager.delete_character(AccountId(1), "alda"),
            Err(WorldError::WrongState)
        );
    }

    #[test]
    fn with_pair_reinserts_both() {
        let content = ContentTables::fixture();
        let (mut manager, a, b) = manager_with_two(&content);
        manager
            .with_pair(a, b, |first, second| {
                first.add_gold(100).expect("gold fits");
                second.add_gold(200).expect("gold fits");
            })
            .expect("pairwise op");
        assert_eq!(manager.get(a).expect("a").gold, 100);
        assert_eq!(manager.get(b).expect("b").gold, 200);
        assert_eq!(manager.with_pair(a, a, |_, _| ()), Err(WorldError::InternalError));
        let dirty = manager.drain_dirty();
        assert!(dirty.contains(&a) && dirty.contains(&b));
    }

    #[test]
    fn idle_scan_escalates() {
        let content = ContentTables::fixture();
        let (mut manager, a, _) = manager_with_two(&content);
        manager.bind_session(a, SessionId(10)).expect("bind");
        manager.note_action(a, 0);
        assert!(manager.scan_idle(500, 1000, 2000).is_empty());
        assert_eq!(
            manager.scan_idle(1500, 1000, 2000),
            vec![(a, IdleVerdict::Afk)]
        );
        // the afk verdict does not repeat
        assert!(manager.scan_idle(1600, 1000, 2000).is_empty());
        assert_eq!(
            manager.scan_idle(2500, 1000, 2000),
            vec![(a, IdleVerdict::ForceDisconnect)]
        );
        // activity clears the mark
        manager.note_action(a, 2600);
        assert!(manager.scan_idle(2700, 1000, 2000).is_empty());
    }
}
