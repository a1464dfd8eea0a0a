//! The authoritative per-character record and its deterministic derived
//! stats.
use std::collections::HashMap;

use tmsrv_primitives::{
    AccountId, CharacterClass, CharacterId, GuildId, ItemInstance, PartyId, Position, TradeId,
    GOLD_LIMIT, MAX_LEVEL,
};

use crate::{
    combat::status::StatusBar,
    content::{ContentTables, EquipSlot, StatRequirements},
    error::{WorldError, WorldResult},
    items::{ContainerKind, Containers, SlotRef},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PrimaryStats {
    pub strength: u16,
    pub intelligence: u16,
    pub dexterity: u16,
    pub constitution: u16,
}

impl PrimaryStats {
    pub fn starting_for(class: CharacterClass) -> Self {
        match class {
            CharacterClass::TransKnight => Self {
                strength: 12,
                intelligence: 4,
                dexterity: 8,
                constitution: 10,
            },
            CharacterClass::Foema => Self {
                strength: 4,
                intelligence: 14,
                dexterity: 6,
                constitution: 8,
            },
            CharacterClass::BeastMaster => Self {
                strength: 8,
                intelligence: 6,
                dexterity: 8,
                constitution: 12,
            },
            CharacterClass::Huntress => Self {
                strength: 6,
                intelligence: 6,
                dexterity: 14,
                constitution: 8,
            },
        }
    }

    fn as_requirements(&self) -> StatRequirements {
        StatRequirements {
            strength: self.strength,
            intelligence: self.intelligence,
            dexterity: self.dexterity,
            constitution: self.constitution,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DerivedStats {
    pub max_hp: u32,
    pub max_mp: u32,
    pub armor_class: i32,
    pub attack_min: u32,
    pub attack_max: u32,
    /// Mitigation permille per damage type, indexed by [DamageType] order.
    pub resistances: [u32; 6],
}

/// Experience required to advance from `level` to the next.
pub fn exp_to_next(level: u16) -> u64 {
    u64::from(level).pow(3) * 50
}

pub struct Character {
    pub id: CharacterId,
    pub account: AccountId,
    pub name: String,
    pub class: CharacterClass,
    pub level: u16,
    pub experience: u64,
    pub stats: PrimaryStats,
    pub derived: DerivedStats,
    pub hp: u32,
    pub mp: u32,
    pub position: Position,
    pub containers: Containers,
    pub gold: u32,
    pub bank_gold: u32,
    pub alignment: i32,
    pub party: Option<PartyId>,
    pub guild: Option<GuildId>,
    pub trade: Option<TradeId>,
    pub learned_skills: Vec<u16>,
    /// skill id → world ms when it is ready again.
    pub cooldowns: HashMap<u16, u64>,
    pub casting: Option<CastingState>,
    pub status: StatusBar,
    pub friends: Vec<String>,
    pub blocked: Vec<String>,
    pub last_action_ms: u64,
    pub dead: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CastingState {
    pub skill: u16,
    pub target: tmsrv_primitives::UnitId,
    pub finish_at_ms: u64,
}

impl Character {
    pub fn new(
        content: &ContentTables,
        id: CharacterId,
        account: AccountId,
        name: String,
        class: CharacterClass,
        position: Position,
    ) -> Self {
        let stats = PrimaryStats::starting_for(class);
        let mut character = Self {
            id,
            account,
            name,
            class,
            level: 1,
            experience: 0,
            stats,
            derived: DerivedStats::default(),
            hp: 0,
            mp: 0,
            position,
            containers: Containers::default(),
            gold: 0,
            bank_gold: 0,
            alignment: 0,
            party: None,
            guild: None,
            trade: None,
            learned_skills: vec![10],
            cooldowns: HashMap::new(),
            casting: None,
            status: StatusBar::default(),
            friends: Vec::new(),
            blocked: Vec::new(),
            last_action_ms: 0,
            dead: false,
        };
        character.recompute_with_equipment(content);
        character.hp = character.derived.max_hp;
        character.mp = character.derived.max_mp;
        character
    }

    pub fn gain_experience(&mut self, content: &ContentTables, amount: u64) -> bool {
        if self.level >= MAX_LEVEL {
            return false;
        }
        self.experience += amount;
        let mut leveled = false;
        while self.level < MAX_LEVEL && self.experience >= exp_to_next(self.level) {
            self.experience -= exp_to_next(self.level);
            self.level += 1;
            leveled = true;
        }
        if leveled {
            self.recompute_with_equipment(content);
            self.hp = self.derived.max_hp;
            self.mp = self.derived.max_mp;
        }
        leveled
    }

    /// Death penalty: a configured permille of the experience accumulated
    /// toward the next level.
    pub fn lose_experience_on_death(&mut self, permille: u32) -> u64 {
        let loss = self.experience * u64::from(permille) / 1000;
        self.experience -= loss;
        loss
    }

    pub fn add_gold(&mut self, amount: u32) -> WorldResult<()> {
        let total = self.gold.checked_add(amount).ok_or(WorldError::InvalidAmount)?;
        if total > GOLD_LIMIT {
            return Err(WorldError::InvalidAmount);
        }
        self.gold = total;
        Ok(())
    }

    pub fn take_gold(&mut self, amount: u32) -> WorldResult<()> {
        if self.gold < amount {
            return Err(WorldError::InsufficientFunds);
        }
        self.gold -= amount;
        Ok(())
    }

    pub fn apply_damage(&mut self, amount: u32) {
        self.hp = self.hp.saturating_sub(amount);
        if self.hp == 0 {
            self.dead = true;
        }
    }

    pub fn apply_heal(&mut self, amount: u32) {
        if self.dead {
            return;
        }
        self.hp = (self.hp + amount).min(self.derived.max_hp);
    }

    pub fn spend_mana(&mut self, amount: u32) -> WorldResult<()> {
        if self.mp < amount {
            return Err(WorldError::InsufficientResource);
        }
        self.mp -= amount;
        Ok(())
    }

    pub fn respawn(&mut self, at: Position) {
        self.dead = false;
        self.position = at;
        self.hp = self.derived.max_hp / 2;
        self.mp = self.derived.max_mp / 2;
        self.casting = None;
        self.status.clear();
    }
}

/// Equip and unequip live outside the plain move primitive: they gate on
/// the item template and trigger a derived recompute.
impl Character {
    pub fn equip(
        &mut self,
        content: &ContentTables,
        inventory_slot: u8,
        equipment_slot: u8,
    ) -> WorldResult<()> {
        let src = SlotRef::inventory(inventory_slot);
        if self.containers.is_locked(src) {
            return Err(WorldError::ItemLocked);
        }
        let item = *self.containers.slot(src)?;
        if item.is_empty() {
            return Err(WorldError::EmptySlot);
        }
        let template = content.items.template(item.item_id)?;
        let Some(expected_slot) = template.equip_slot else {
            return Err(WorldError::RequirementUnmet);
        };
        if expected_slot as u8 != equipment_slot {
            return Err(WorldError::InvalidSlot);
        }
        if !template.satisfies_requirements(self.class, self.level, &self.stats.as_requirements())
        {
            return Err(WorldError::RequirementUnmet);
        }
        let dst = SlotRef::equipment(equipment_slot);
        let previous = *self.containers.slot(dst)?;
        *self.containers.slot_mut(dst)? = item;
        if previous.is_empty() {
            self.containers.slot_mut(src)?.clear();
        } else {
            *self.containers.slot_mut(src)? = previous;
        }
        self.recompute_with_equipment(content);
        Ok(())
    }

    pub fn unequip(&mut self, content: &ContentTables, equipment_slot: u8) -> WorldResult<()> {
        let src = SlotRef::equipment(equipment_slot);
        let item = *self.containers.slot(src)?;
        if item.is_empty() {
            return Err(WorldError::EmptySlot);
        }
        let slot = self
            .containers
            .add_to_inventory(&content.items, item)
            .map_err(|_| WorldError::InventoryFull)?;
        let _ = slot;
        self.containers.slot_mut(src)?.clear();
        self.recompute_with_equipment(content);
        Ok(())
    }

    /// Recomputes derived stats from level, class, primary stats, equipped
    /// items and active status modifiers. Idempotent: calling it twice in a
    /// row changes nothing. Current vitals are clamped, never raised.
    pub fn recompute_with_equipment(&mut self, content: &ContentTables) {
        let stats = self.stats;
        let level = u32::from(self.level);

        let mut max_hp = 50 + level * 10 + u32::from(stats.constitution) * 8;
        let mut max_mp = 30 + level * 6 + u32::from(stats.intelligence) * 8;
        let mut armor_class = i32::from(stats.dexterity) / 4;
        let primary = match self.class {
            CharacterClass::TransKnight | CharacterClass::BeastMaster => u32::from(stats.strength),
            CharacterClass::Foema => u32::from(stats.intelligence),
            CharacterClass::Huntress => u32::from(stats.dexterity),
        };
        let mut attack_min = primary / 2 + level / 4;
        let mut attack_max = primary + level / 2;

        for item in self.containers.equipment() {
            if item.is_empty() || item.value == 0 {
                continue;
            }
            if let Ok(template) = content.items.template(item.item_id) {
                let bonuses = template.bonuses;
                max_hp = max_hp.saturating_add_signed(bonuses.max_hp);
                max_mp = max_mp.saturating_add_signed(bonuses.max_mp);
                armor_class += i32::from(bonuses.armor_class);
                // refine adds a tenth of weapon attack per level
                let refine_bonus = |value: u32| {
                    value + value * u32::from(item.refine_level()) / 10
                };
                attack_min += refine_bonus(u32::from(bonuses.attack_min));
                attack_max += refine_bonus(u32::from(bonuses.attack_max));
            }
        }

        let (attack_delta, defense_delta) = self.status.stat_deltas();
        attack_min = attack_min.saturating_add_signed(attack_delta);
        attack_max = attack_max.saturating_add_signed(attack_delta).max(attack_min);
        armor_class += defense_delta as i32;

        self.derived = DerivedStats {
            max_hp,
            max_mp,
            armor_class,
            attack_min,
            attack_max,
            resistances: self.derived.resistances,
        };
        self.hp = self.hp.min(max_hp);
        self.mp = self.mp.min(max_mp);
    }

    /// Weapon durability decays by one per landed hit; at zero the item
    /// stops contributing but survives.
    pub fn decay_weapon_durability(&mut self, content: &ContentTables) {
        let slot = SlotRef {
            container: ContainerKind::Equipment,
            slot: EquipSlot::Weapon as u8,
        };
        let mut broke = false;
        if let Ok(item) = self.containers.slot_mut(slot) {
            if !item.is_empty() && item.value > 0 {
                item.value -= 1;
                broke = item.value == 0;
            }
        }
        if broke {
            self.recompute_with_equipment(content);
        }
    }
}

#[cfg(test)]
mod tests {
    use tmsrv_primitives::MapId;

    use super::*;
    use crate::content::ContentTables;

    fn hero(content: &ContentTables) -> Character {
        Character::new(
            content,
            CharacterId(1),
            AccountId(1),
            "hero".into(),
            CharacterClass::TransKnight,
            Position::new(MapId(1), 100, 100),
        )
    }

    #[test]
    fn recompute_is_idempotent() {
        let content = ContentTables::fixture();
        let mut character = hero(&content);
        character.recompute_with_equipment(&content);
        let first = character.derived;
        character.recompute_with_equipment(&content);
        assert_eq!(character.derived, first);
    }

    #[test]
    fn equip_applies_and_unequip_reverts() {
        let content = ContentTables::fixture();
        let mut character = hero(&content);
        let bare = character.derived;
        character
            .containers
            .add_to_inventory(&content.items, ItemInstance::new(2, 80))
            .expect("armor fits");
        character
            .equip(&content, 0, EquipSlot::Armor as u8)
            .expect("armor equips");
        assert_eq!(character.derived.max_hp, bare.max_hp + 20);
        assert_eq!(character.derived.armor_class, bare.armor_class + 5);
        character
            .unequip(&content, EquipSlot::Armor as u8)
            .expect("armor unequips");
        assert_eq!(character.derived, bare);
    }

    #[test]
    fn equip_gates_on_level_class_and_stats() {
        let content = ContentTables::fixture();
        let mut character = hero(&content);
        character
            .containers
            .add_to_inventory(&content.items, ItemInstance::new(3, 120))
            .expect("blade fits");
        // level 1 TK lacks level 100 and 80 strength
        assert_eq!(
            character.equip(&content, 0, EquipSlot::Weapon as u8),
            Err(WorldError::RequirementUnmet)
        );
        character.level = 100;
        character.stats.strength = 80;
        character.equip(&content, 0, EquipSlot::Weapon as u8).expect("now it fits");
    }

    #[test]
    fn equip_to_wrong_slot_is_rejected() {
        let content = ContentTables::fixture();
        let mut character = hero(&content);
        character
            .containers
            .add_to_inventory(&content.items, ItemInstance::new(1, 100))
            .expect("sword fits");
        assert_eq!(
            character.equip(&content, 0, EquipSlot::Helmet as u8),
            Err(WorldError::InvalidSlot)
        );
    }

    #[test]
    fn damage_clamps_and_marks_death() {
        let content = ContentTables::fixture();
        let mut character = hero(&content);
        let max = character.derived.max_hp;
        character.apply_damage(max + 500);
        assert_eq!(character.hp, 0);
        assert!(character.dead);
        character.respawn(Position::new(MapId(1), 100, 100));
        assert!(!character.dead);
        assert_eq!(character.hp, max / 2);
        character.apply_heal(u32::MAX / 2);
        assert_eq!(character.hp, max);
    }

    #[test]
    fn experience_levels_up_and_restores_vitals() {
        let content = ContentTables::fixture();
        let mut character = hero(&content);
        character.hp = 1;
        assert!(character.gain_experience(&content, exp_to_next(1)));
        assert_eq!(character.level, 2);
        assert_eq!(character.hp, character.derived.max_hp);
    }

    #[test]
    fn death_penalty_takes_a_fraction() {
        let content = ContentTables::fixture();
        let mut character = hero(&content);
        character.experience = 1000;
        let lost = character.lose_experience_on_death(10);
        assert_eq!(lost, 10);
        assert_eq!(character.experience, 990);
    }

    #[test]
    fn gold_respects_the_limit() {
        let content = ContentTables::fixture();
        let mut character = hero(&content);
        character.add_gold(GOLD_LIMIT).expect("cap itself is fine");
        assert_eq!(character.add_gold(1), Err(WorldError::InvalidAmount));
        character.take_gold(GOLD_LIMIT).expect("spend it all");
        assert_eq!(character.take_gold(1), Err(WorldError::InsufficientFunds));
    }

    #[test]
    fn broken_weapon_stops_contributing() {
        let content = ContentTables::fixture();
        let mut character = hero(&content);
        character
            .containers
            .add_to_inventory(&content.items, ItemInstance::new(1, 2))
            .expect("sword fits");
        character.equip(&content, 0, EquipSlot::Weapon as u8).expect("equips");
        let armed = character.derived.attack_max;
        character.decay_weapon_durability(&content);
        assert_eq!(character.derived.attack_max, armed, "still one durability left");
        character.decay_weapon_durability(&content);
        assert!(character.derived.attack_max < armed, "broken weapon adds nothing");
    }
}
