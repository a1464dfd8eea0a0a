//! The persistence seam: versioned record batches, a store trait and the
//! background writer that drains the dirty set off the tick thread.
use std::{collections::HashMap, sync::Arc};

use codec::{Decode, Encode};
use log::{info, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use tmsrv_primitives::{
    AccountId, CharacterId, ItemInstance, Position, BANK_SLOTS, EQUIPMENT_SLOTS, INVENTORY_SLOTS,
};

use crate::{character::Character, content::ContentTables, LOG_TARGET};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Encode, Decode)]
pub enum RecordKind {
    Character,
    Guild,
    Market,
    /// Last allocated value per id domain, so restarts never reuse ids.
    IdAllocators,
}

/// One versioned blob. Writes are idempotent on (kind, id, version).
#[derive(Clone, Debug, Encode, Decode)]
pub struct Record {
    pub kind: RecordKind,
    pub id: u64,
    pub version: u64,
    pub blob: Vec<u8>,
}

/// The external record store. Batches commit atomically; a re-delivered
/// batch with already-seen versions must be a no-op.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync + 'static {
    async fn put_batch(&self, batch: Vec<Record>) -> Result<(), StoreError>;
    async fn load_latest(&self, kind: RecordKind, id: u64) -> Result<Option<Record>, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// In-memory store for tests and the dev server.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(RecordKind, u64), Record>>,
}

#[async_trait::async_trait]
impl RecordStore for MemoryStore {
    async fn put_batch(&self, batch: Vec<Record>) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        for record in batch {
            let key = (record.kind, record.id);
            match records.get(&key) {
                Some(existing) if existing.version >= record.version => (),
                _ => {
                    records.insert(key, record);
                }
            }
        }
        Ok(())
    }

    async fn load_latest(&self, kind: RecordKind, id: u64) -> Result<Option<Record>, StoreError> {
        Ok(self.records.lock().get(&(kind, id)).cloned())
    }
}

/// Fixed-layout character snapshot, little-endian packed via fixed-width
/// fields. Restoring one reproduces everything a client can observe.
#[derive(Clone, Debug, Encode, Decode)]
pub struct CharacterSnapshot {
    pub id: u32,
    pub account: u32,
    pub name: [u8; 16],
    pub class: u8,
    pub level: u16,
    pub experience: u64,
    pub strength: u16,
    pub intelligence: u16,
    pub dexterity: u16,
    pub constitution: u16,
    pub hp: u32,
    pub mp: u32,
    pub map: u16,
    pub x: u16,
    pub y: u16,
    pub gold: u32,
    pub bank_gold: u32,
    pub alignment: i32,
    pub inventory: [ItemInstance; INVENTORY_SLOTS],
    pub equipment: [ItemInstance; EQUIPMENT_SLOTS],
    pub bank: [ItemInstance; BANK_SLOTS],
    pub learned_skills: [u16; tmsrv_primitives::MAX_SKILLS],
}

impl CharacterSnapshot {
    pub fn capture(character: &Character) -> Self {
        let mut name = [0u8; 16];
        let bytes = character.name.as_bytes();
        let len = bytes.len().min(16);
        name[..len].copy_from_slice(&bytes[..len]);
        let mut inventory = [ItemInstance::EMPTY; INVENTORY_SLOTS];
        inventory.copy_from_slice(character.containers.inventory());
        let mut equipment = [ItemInstance::EMPTY; EQUIPMENT_SLOTS];
        equipment.copy_from_slice(character.containers.equipment());
        let mut bank = [ItemInstance::EMPTY; BANK_SLOTS];
        for (index, slot) in bank.iter_mut().enumerate() {
            *slot = *character
                .containers
                .slot(crate::items::SlotRef::bank(index as u8))
                .expect("bank index in range; qed");
        }
        let mut learned_skills = [0u16; tmsrv_primitives::MAX_SKILLS];
        for (slot, skill) in learned_skills
            .iter_mut()
            .zip(character.learned_skills.iter())
        {
            *slot = *skill;
        }
        Self {
            id: character.id.0,
            account: character.account.0,
            name,
            class: match character.class {
                tmsrv_primitives::CharacterClass::TransKnight => 0,
                tmsrv_primitives::CharacterClass::Foema => 1,
                tmsrv_primitives::CharacterClass::BeastMaster => 2,
                tmsrv_primitives::CharacterClass::Huntress => 3,
            },
            level: character.level,
            experience: character.experience,
            strength: character.stats.strength,
            intelligence: character.stats.intelligence,
            dexterity: character.stats.dexterity,
            constitution: character.stats.constitution,
            hp: character.hp,
            mp: character.mp,
            map: character.position.map.0,
            x: character.position.x,
            y: character.position.y,
            gold: character.gold,
            bank_gold: character.bank_gold,
            alignment: character.alignment,
            inventory,
            equipment,
            bank,
            learned_skills,
        }
    }

    pub fn restore(&self, content: &ContentTables) -> Character {
        let class = match self.class {
            0 => tmsrv_primitives::CharacterClass::TransKnight,
            1 => tmsrv_primitives::CharacterClass::Foema,
            2 => tmsrv_primitives::CharacterClass::BeastMaster,
            _ => tmsrv_primitives::CharacterClass::Huntress,
        };
        let end = self.name.iter().position(|b| *b == 0).unwrap_or(16);
        let name = String::from_utf8_lossy(&self.name[..end]).into_owned();
        let mut character = Character::new(
            content,
            CharacterId(self.id),
            AccountId(self.account),
            name,
            class,
            Position::new(tmsrv_primitives::MapId(self.map), self.x, self.y),
        );
        character.level = self.level;
        character.experience = self.experience;
        character.stats.strength = self.strength;
        character.stats.intelligence = self.intelligence;
        character.stats.dexterity = self.dexterity;
        character.stats.constitution = self.constitution;
        character.gold = self.gold;
        character.bank_gold = self.bank_gold;
        character.alignment = self.alignment;
        character.learned_skills = self
            .learned_skills
            .iter()
            .copied()
            .filter(|skill| *skill != 0)
            .collect();
        for (index, item) in self.inventory.iter().enumerate() {
            *character
                .containers
                .slot_mut(crate::items::SlotRef::inventory(index as u8))
                .expect("inventory index in range; qed") = *item;
        }
        for (index, item) in self.equipment.iter().enumerate() {
            *character
                .containers
                .slot_mut(crate::items::SlotRef::equipment(index as u8))
                .expect("equipment index in range; qed") = *item;
        }
        for (index, item) in self.bank.iter().enumerate() {
            *character
                .containers
                .slot_mut(crate::items::SlotRef::bank(index as u8))
                .expect("bank index in range; qed") = *item;
        }
        character.recompute_with_equipment(content);
        character.hp = self.hp.min(character.derived.max_hp);
        character.mp = self.mp.min(character.derived.max_mp);
        character
    }
}

/// Runs beside the tick: receives batches and pushes them to the store.
/// A failed batch is retried once, then dropped with a warning; the next
/// autosave re-captures the same characters at a later version.
pub async fn run_persistence_writer(
    store: Arc<dyn RecordStore>,
    mut batches: mpsc::Receiver<Vec<Record>>,
) {
    while let Some(batch) = batches.recv().await {
        if batch.is_empty() {
            continue;
        }
        let size = batch.len();
        match store.put_batch(batch.clone()).await {
            Ok(()) => (),
            Err(first_error) => {
                warn!(
                    target: LOG_TARGET,
                    "Persistence batch of {} failed ({}), retrying once.", size, first_error
                );
                if let Err(e) = store.put_batch(batch).await {
                    warn!(
                        target: LOG_TARGET,
                        "Persistence batch of {} lost after retry: {}.", size, e
                    );
                }
            }
        }
    }
    info!(target: LOG_TARGET, "Persistence writer finished.");
}

#[cfg(test)]
mod tests {
    use tmsrv_primitives::{CharacterClass, MapId};

    use super::*;
    use crate::content::EquipSlot;

    fn veteran(content: &ContentTables) -> Character {
        let mut character = Character::new(
            content,
            CharacterId(42),
            AccountId(7),
            "veteran".into(),
            CharacterClass::Huntress,
            Position::new(MapId(1), 150, 151),
        );
        character.level = 37;
        character.experience = 123_456;
        character.gold = 98_765;
        character.bank_gold = 11_111;
        character
            .containers
            .add_to_inventory(&content.items, ItemInstance::new(100, 42))
            .expect("potions");
        character
            .containers
            .add_to_inventory(&content.items, ItemInstance::new(2, 80))
            .expect("armor");
        character.equip(content, 1, EquipSlot::Armor as u8).expect("equip");
        character.recompute_with_equipment(content);
        character
    }

    #[test]
    fn snapshot_restores_observable_state() {
        let content = ContentTables::fixture();
        let original = veteran(&content);
        let snapshot = CharacterSnapshot::capture(&original);
        let encoded = snapshot.encode();
        let decoded =
            CharacterSnapshot::decode(&mut &encoded[..]).expect("snapshot decodes");
        let restored = decoded.restore(&content);

        assert_eq!(restored.id, original.id);
        assert_eq!(restored.name, original.name);
        assert_eq!(restored.level, original.level);
        assert_eq!(restored.experience, original.experience);
        assert_eq!(restored.gold, original.gold);
        assert_eq!(restored.bank_gold, original.bank_gold);
        assert_eq!(restored.position, original.position);
        assert_eq!(restored.derived, original.derived);
        assert_eq!(
            restored.containers.count_in_inventory(100),
            original.containers.count_in_inventory(100)
        );
        assert_eq!(restored.containers.equipment(), original.containers.equipment());
        // byte-equal round trip of the blob itself
        assert_eq!(CharacterSnapshot::capture(&restored).encode(), encoded);
    }

    #[tokio::test]
    async fn memory_store_is_idempotent_by_version() {
        let store = MemoryStore::default();
        let record = |version: u64, payload: u8| Record {
            kind: RecordKind::Character,
            id: 1,
            version,
            blob: vec![payload],
        };
        store
            .put_batch(vec![record(2, 7)])
            .await
            .expect("first write");
        // an older or re-delivered version never clobbers
        store
            .put_batch(vec![record(1, 9), record(2, 9)])
            .await
            .expect("redelivery");
        let latest = store
            .load_latest(RecordKind::Character, 1)
            .await
            .expect("load")
            .expect("present");
        assert_eq!(latest.version, 2);
        assert_eq!(latest.blob, vec![7]);
    }
}
