//! Item templates, flag ranges and the refine probability table.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use tmsrv_primitives::{CharacterClass, MAX_REFINE_LEVEL};

use crate::error::{WorldError, WorldResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ItemKind {
    Weapon,
    Armor,
    Shield,
    Helmet,
    Accessory,
    Consumable,
    Material,
    Gem,
    QuestItem,
    RefineMaterial,
    ProtectionScroll,
    SkillBook,
}

impl ItemKind {
    pub fn is_equipment(&self) -> bool {
        matches!(
            self,
            ItemKind::Weapon
                | ItemKind::Armor
                | ItemKind::Shield
                | ItemKind::Helmet
                | ItemKind::Accessory
        )
    }
}

/// The sixteen semantic equipment slots.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EquipSlot {
    Helmet = 0,
    Armor = 1,
    Weapon = 2,
    Shield = 3,
    Gloves = 4,
    Boots = 5,
    RingLeft = 6,
    RingRight = 7,
    Amulet = 8,
    Belt = 9,
    Cloak = 10,
    Earring = 11,
    Bracelet = 12,
    Mount = 13,
    Mantle = 14,
    Costume = 15,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StatRequirements {
    pub strength: u16,
    pub intelligence: u16,
    pub dexterity: u16,
    pub constitution: u16,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StatBonuses {
    pub strength: i16,
    pub intelligence: i16,
    pub dexterity: i16,
    pub constitution: i16,
    pub max_hp: i32,
    pub max_mp: i32,
    pub armor_class: i16,
    pub attack_min: u16,
    pub attack_max: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemTemplate {
    pub id: u16,
    pub name: String,
    pub kind: ItemKind,
    /// 1 for equipment; stackables carry their cap.
    pub stack_cap: u32,
    /// Durability ceiling before refine bonuses; 0 for stackables.
    pub max_durability: u32,
    pub level_req: u16,
    /// Zero means all classes.
    pub class_mask: u8,
    pub stat_req: StatRequirements,
    pub equip_slot: Option<EquipSlot>,
    pub bonuses: StatBonuses,
    pub weight: u16,
    /// Base vendor price; shops and fees derive from it.
    pub price: u32,
}

impl ItemTemplate {
    pub fn is_equipment(&self) -> bool {
        self.kind.is_equipment()
    }

    pub fn satisfies_requirements(
        &self,
        class: CharacterClass,
        level: u16,
        stats: &StatRequirements,
    ) -> bool {
        class.satisfies_mask(self.class_mask)
            && level >= self.level_req
            && stats.strength >= self.stat_req.strength
            && stats.intelligence >= self.stat_req.intelligence
            && stats.dexterity >= self.stat_req.dexterity
            && stats.constitution >= self.stat_req.constitution
    }

    /// Refine raises the durability ceiling by ten percent per level.
    pub fn durability_cap(&self, refine_level: u8) -> u32 {
        self.max_durability + self.max_durability * u32::from(refine_level) / 10
    }
}

/// What an item id range is forbidden from doing.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ItemFlags {
    pub tradable: bool,
    pub storable: bool,
    pub droppable: bool,
    pub sellable: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FlagRanges {
    pub non_tradable: Vec<(u16, u16)>,
    pub non_storable: Vec<(u16, u16)>,
    pub non_droppable: Vec<(u16, u16)>,
    pub non_sellable: Vec<(u16, u16)>,
}

fn in_ranges(ranges: &[(u16, u16)], id: u16) -> bool {
    ranges.iter().any(|(lo, hi)| (*lo..=*hi).contains(&id))
}

/// One row of the refine table, in permille. Probabilities must sum to 1000.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RefineRow {
    pub success: u32,
    pub degrade: u32,
    pub break_: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefineTable {
    /// Indexed by current refine level, 0..MAX_REFINE_LEVEL.
    pub rows: Vec<RefineRow>,
}

impl RefineTable {
    pub fn row(&self, refine_level: u8) -> WorldResult<RefineRow> {
        self.rows
            .get(refine_level as usize)
            .copied()
            .ok_or(WorldError::RequirementUnmet)
    }

    pub fn validate(&self) -> WorldResult<()> {
        if self.rows.len() != MAX_REFINE_LEVEL as usize {
            return Err(WorldError::InternalError);
        }
        for row in &self.rows {
            if row.success + row.degrade + row.break_ != 1000 {
                return Err(WorldError::InternalError);
            }
        }
        Ok(())
    }
}

impl Default for RefineTable {
    /// The classic curve: safe early levels, coin-flip endgame.
    fn default() -> Self {
        Self {
            rows: vec![
                RefineRow { success: 1000, degrade: 0, break_: 0 },
                RefineRow { success: 900, degrade: 100, break_: 0 },
                RefineRow { success: 800, degrade: 150, break_: 50 },
                RefineRow { success: 700, degrade: 200, break_: 100 },
                RefineRow { success: 600, degrade: 250, break_: 150 },
                RefineRow { success: 500, degrade: 300, break_: 200 },
                RefineRow { success: 400, degrade: 300, break_: 300 },
                RefineRow { success: 300, degrade: 350, break_: 350 },
                RefineRow { success: 200, degrade: 400, break_: 400 },
            ],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemTable {
    pub templates: HashMap<u16, ItemTemplate>,
    pub flag_ranges: FlagRanges,
    pub refine: RefineTable,
}

impl ItemTable {
    pub fn template(&self, id: u16) -> WorldResult<&ItemTemplate> {
        self.templates.get(&id).ok_or(WorldError::InvalidTarget)
    }

    pub fn flags(&self, id: u16) -> ItemFlags {
        ItemFlags {
            tradable: !in_ranges(&self.flag_ranges.non_tradable, id),
            storable: !in_ranges(&self.flag_ranges.non_storable, id),
            droppable: !in_ranges(&self.flag_ranges.non_droppable, id),
            sellable: !in_ranges(&self.flag_ranges.non_sellable, id),
        }
    }

    pub fn validate(&self) -> WorldResult<()> {
        self.refine.validate()?;
        for (id, template) in &self.templates {
            if *id != template.id || template.stack_cap == 0 {
                return Err(WorldError::InternalError);
            }
            if template.is_equipment() && template.stack_cap != 1 {
                return Err(WorldError::InternalError);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_refine_rows_sum_to_one() {
        let table = RefineTable::default();
        table.validate().expect("default table should be sane");
        assert_eq!(table.rows.len(), MAX_REFINE_LEVEL as usize);
    }

    #[test]
    fn flag_ranges_are_inclusive() {
        let table = ItemTable {
            templates: HashMap::new(),
            flag_ranges: FlagRanges {
                non_tradable: vec![(100, 200)],
                non_storable: vec![],
                non_droppable: vec![(150, 150)],
                non_sellable: vec![],
            },
            refine: RefineTable::default(),
        };
        assert!(!table.flags(100).tradable);
        assert!(!table.flags(200).tradable);
        assert!(table.flags(201).tradable);
        assert!(!table.flags(150).droppable);
        assert!(table.flags(150).storable);
    }

    #[test]
    fn durability_cap_scales_with_refine() {
        let template = ItemTemplate {
            id: 1,
            name: "sword".into(),
            kind: ItemKind::Weapon,
            stack_cap: 1,
            max_durability: 100,
            level_req: 1,
            class_mask: 0,
            stat_req: StatRequirements::default(),
            equip_slot: Some(EquipSlot::Weapon),
            bonuses: StatBonuses::default(),
            weight: 10,
            price: 500,
        };
        assert_eq!(template.durability_cap(0), 100);
        assert_eq!(template.durability_cap(5), 150);
    }
}
