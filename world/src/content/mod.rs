//! Static content tables, immutable after boot and shared without
//! synchronization.
use std::{collections::HashMap, fs::File, io::BufReader, path::Path, sync::Arc};

use log::info;
use serde::de::DeserializeOwned;

use tmsrv_primitives::MapId;

use crate::{
    error::{WorldError, WorldResult},
    LOG_TARGET,
};

pub mod economy;
pub mod items;
pub mod maps;
pub mod mobs;
pub mod quests;
pub mod skills;

pub use economy::{EconomyTable, FeeSchedule, NpcDef, NpcKind, ShopDef, ShopEntry, TransactionKind};
pub use items::{
    EquipSlot, FlagRanges, ItemFlags, ItemKind, ItemTable, ItemTemplate, RefineRow, RefineTable,
    StatBonuses, StatRequirements,
};
pub use maps::{MapDef, MapTable, Zone, ZoneFlags};
pub use mobs::{
    Aggression, Brain, DropEntry, DropGroup, DropMode, MobRank, MobTable, MobTemplate, SkillSelection,
    SpawnPoint, TargetSelection,
};
pub use quests::{ObjectiveDef, ObjectiveKind, QuestTable, QuestTemplate, RewardDef};
pub use skills::{
    CombatCoefficients, DamageType, EffectKind, EffectTemplate, SkillKind, SkillTable,
    SkillTemplate, StackPolicy, TargetRule,
};

pub struct ContentTables {
    pub items: ItemTable,
    pub mobs: MobTable,
    pub maps: MapTable,
    pub skills: SkillTable,
    pub quests: QuestTable,
    pub economy: EconomyTable,
}

fn load_json<T: DeserializeOwned>(dir: &Path, file: &str) -> std::io::Result<T> {
    let reader = BufReader::new(File::open(dir.join(file))?);
    serde_json::from_reader(reader)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl ContentTables {
    /// Loads all tables from a content directory and cross-validates them.
    pub fn load(dir: &Path) -> std::io::Result<Arc<Self>> {
        let tables = Self {
            items: load_json(dir, "items.json")?,
            mobs: load_json(dir, "mobs.json")?,
            maps: load_json(dir, "maps.json")?,
            skills: load_json(dir, "skills.json")?,
            quests: load_json(dir, "quests.json")?,
            economy: load_json(dir, "economy.json")?,
        };
        tables.validate().map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, format!("content: {e}"))
        })?;
        info!(
            target: LOG_TARGET,
            "Loaded content: {} items, {} mobs, {} maps, {} skills, {} quests.",
            tables.items.templates.len(),
            tables.mobs.templates.len(),
            tables.maps.maps.len(),
            tables.skills.skills.len(),
            tables.quests.quests.len(),
        );
        Ok(Arc::new(tables))
    }

    pub fn validate(&self) -> WorldResult<()> {
        self.items.validate()?;
        self.mobs.validate()?;
        self.maps.validate()?;
        self.skills.validate()?;
        self.quests.validate()?;
        self.economy.validate()?;
        // cross-table references
        for mob in self.mobs.templates.values() {
            for skill in &mob.skills {
                if !self.skills.skills.contains_key(skill) {
                    return Err(WorldError::InternalError);
                }
            }
        }
        for group in self.mobs.drop_groups.values() {
            for entry in &group.entries {
                if !self.items.templates.contains_key(&entry.item_id) {
                    return Err(WorldError::InternalError);
                }
            }
        }
        for quest in self.quests.quests.values() {
            for (item, _) in quest.rewards.items.iter().chain(&quest.rewards.choice_items) {
                if !self.items.templates.contains_key(item) {
                    return Err(WorldError::InternalError);
                }
            }
        }
        Ok(())
    }

    /// A small but coherent content set for tests and the dev server.
    pub fn fixture() -> Arc<Self> {
        use items::*;
        use mobs::*;
        use skills::*;

        let mut templates = HashMap::new();
        let mut add_item = |template: ItemTemplate| {
            templates.insert(template.id, template);
        };
        add_item(ItemTemplate {
            id: 1,
            name: "short sword".into(),
            kind: ItemKind::Weapon,
            stack_cap: 1,
            max_durability: 100,
            level_req: 1,
            class_mask: 0,
            stat_req: StatRequirements::default(),
            equip_slot: Some(EquipSlot::Weapon),
            bonuses: StatBonuses {
                attack_min: 5,
                attack_max: 10,
                ..StatBonuses::default()
            },
            weight: 20,
            price: 500,
        });
        add_item(ItemTemplate {
            id: 2,
            name: "leather armor".into(),
            kind: ItemKind::Armor,
            stack_cap: 1,
            max_durability: 80,
            level_req: 1,
            class_mask: 0,
            stat_req: StatRequirements::default(),
            equip_slot: Some(EquipSlot::Armor),
            bonuses: StatBonuses {
                armor_class: 5,
                max_hp: 20,
                ..StatBonuses::default()
            },
            weight: 30,
            price: 400,
        });
        add_item(ItemTemplate {
            id: 3,
            name: "knight blade".into(),
            kind: ItemKind::Weapon,
            stack_cap: 1,
            max_durability: 120,
            level_req: 100,
            class_mask: 1,
            stat_req: StatRequirements {
                strength: 80,
                ..StatRequirements::default()
            },
            equip_slot: Some(EquipSlot::Weapon),
            bonuses: StatBonuses {
                attack_min: 40,
                attack_max: 60,
                ..StatBonuses::default()
            },
            weight: 40,
            price: 20_000,
        });
        add_item(ItemTemplate {
            id: 100,
            name: "healing potion".into(),
            kind: ItemKind::Consumable,
            stack_cap: 99,
            max_durability: 0,
            level_req: 1,
            class_mask: 0,
            stat_req: StatRequirements::default(),
            equip_slot: None,
            // consumables restore the vital amounts named in their bonuses
            bonuses: StatBonuses {
                max_hp: 100,
                ..StatBonuses::default()
            },
            weight: 2,
            price: 50,
        });
        add_item(ItemTemplate {
            id: 300,
            name: "refine stone".into(),
            kind: ItemKind::RefineMaterial,
            stack_cap: 99,
            max_durability: 0,
            level_req: 1,
            class_mask: 0,
            stat_req: StatRequirements::default(),
            equip_slot: None,
            bonuses: StatBonuses::default(),
            weight: 5,
            price: 1000,
        });
        add_item(ItemTemplate {
            id: 301,
            name: "protection scroll".into(),
            kind: ItemKind::ProtectionScroll,
            stack_cap: 99,
            max_durability: 0,
            level_req: 1,
            class_mask: 0,
            stat_req: StatRequirements::default(),
            equip_slot: None,
            bonuses: StatBonuses::default(),
            weight: 1,
            price: 5000,
        });
        add_item(ItemTemplate {
            id: 400,
            name: "ruby".into(),
            kind: ItemKind::Gem,
            stack_cap: 99,
            max_durability: 0,
            level_req: 1,
            class_mask: 0,
            stat_req: StatRequirements::default(),
            equip_slot: None,
            bonuses: StatBonuses::default(),
            weight: 1,
            price: 2000,
        });
        add_item(ItemTemplate {
            id: 500,
            name: "wolf fang".into(),
            kind: ItemKind::QuestItem,
            stack_cap: 99,
            max_durability: 0,
            level_req: 1,
            class_mask: 0,
            stat_req: StatRequirements::default(),
            equip_slot: None,
            bonuses: StatBonuses::default(),
            weight: 1,
            price: 0,
        });

        let items = ItemTable {
            templates,
            flag_ranges: FlagRanges {
                non_tradable: vec![(500, 599)],
                non_storable: vec![(500, 599)],
                non_droppable: vec![(500, 599)],
                non_sellable: vec![(500, 599)],
            },
            refine: RefineTable::default(),
        };

        let mut mob_templates = HashMap::new();
        mob_templates.insert(
            501,
            MobTemplate {
                id: 501,
                name: "gray wolf".into(),
                level: 10,
                max_hp: 200,
                attack_min: 8,
                attack_max: 14,
                defense: 5,
                attack_range: 1,
                move_cells_per_tick: 1,
                experience: 100,
                rank: MobRank::Normal,
                brain: Brain::default(),
                skills: vec![],
                drop_groups: vec![1],
                gold_min: 10,
                gold_max: 30,
            },
        );
        mob_templates.insert(
            502,
            MobTemplate {
                id: 502,
                name: "brown bear".into(),
                level: 14,
                max_hp: 400,
                attack_min: 12,
                attack_max: 20,
                defense: 10,
                attack_range: 1,
                move_cells_per_tick: 1,
                experience: 180,
                rank: MobRank::Elite,
                brain: Brain {
                    flee_health_permille: 150,
                    ..Brain::default()
                },
                skills: vec![],
                drop_groups: vec![1],
                gold_min: 20,
                gold_max: 60,
            },
        );
        let mut drop_groups = HashMap::new();
        drop_groups.insert(
            1,
            DropGroup {
                id: 1,
                mode: DropMode::Independent,
                chance_permille: 1000,
                entries: vec![
                    DropEntry {
                        item_id: 100,
                        chance_permille: 500,
                        count_min: 1,
                        count_max: 3,
                    },
                    DropEntry {
                        item_id: 500,
                        chance_permille: 1000,
                        count_min: 1,
                        count_max: 1,
                    },
                ],
            },
        );
        let mobs = MobTable {
            templates: mob_templates,
            drop_groups,
            spawns: vec![SpawnPoint {
                template: 501,
                map: MapId(1),
                x: 120,
                y: 120,
                count: 2,
                respawn_secs: 30,
                patrol: vec![(118, 120), (124, 120)],
            }],
        };

        let mut map_defs = HashMap::new();
        map_defs.insert(
            MapId(1),
            MapDef {
                id: MapId(1),
                name: "plains of kersef".into(),
                zones: vec![Zone {
                    x1: 90,
                    y1: 90,
                    x2: 110,
                    y2: 110,
                    flags: ZoneFlags {
                        allow_pvp: false,
                        allow_pve: false,
                        sanctuary: true,
                    },
                }],
                blocked: [(130u16, 130u16)].into_iter().collect(),
                respawn_x: 100,
                respawn_y: 100,
                default_flags: ZoneFlags {
                    allow_pvp: false,
                    allow_pve: true,
                    sanctuary: false,
                },
            },
        );
        map_defs.insert(
            MapId(2),
            MapDef {
                id: MapId(2),
                name: "noatun arena".into(),
                zones: vec![],
                blocked: std::collections::HashSet::new(),
                respawn_x: 50,
                respawn_y: 50,
                default_flags: ZoneFlags {
                    allow_pvp: true,
                    allow_pve: true,
                    sanctuary: false,
                },
            },
        );
        let maps = MapTable { maps: map_defs };

        let mut skill_defs = HashMap::new();
        skill_defs.insert(
            10,
            SkillTemplate {
                id: 10,
                name: "slash".into(),
                class_mask: 0,
                level_req: 1,
                mana_cost: 5,
                cooldown_ms: 1000,
                cast_time_ms: 0,
                range: 2,
                target: TargetRule::Enemy,
                kind: SkillKind::Damage {
                    base: 20,
                    scale_permille: 1200,
                    damage_type: DamageType::Physical,
                },
            },
        );
        skill_defs.insert(
            11,
            SkillTemplate {
                id: 11,
                name: "fireball".into(),
                class_mask: 0,
                level_req: 1,
                mana_cost: 20,
                cooldown_ms: 3000,
                cast_time_ms: 1500,
                range: 8,
                target: TargetRule::Enemy,
                kind: SkillKind::Damage {
                    base: 60,
                    scale_permille: 800,
                    damage_type: DamageType::Fire,
                },
            },
        );
        skill_defs.insert(
            12,
            SkillTemplate {
                id: 12,
                name: "envenom".into(),
                class_mask: 0,
                level_req: 1,
                mana_cost: 15,
                cooldown_ms: 5000,
                cast_time_ms: 0,
                range: 2,
                target: TargetRule::Enemy,
                kind: SkillKind::ApplyEffect { effect: 1 },
            },
        );
        skill_defs.insert(
            13,
            SkillTemplate {
                id: 13,
                name: "renew".into(),
                class_mask: 0,
                level_req: 1,
                mana_cost: 25,
                cooldown_ms: 2000,
                cast_time_ms: 0,
                range: 8,
                target: TargetRule::Ally,
                kind: SkillKind::ApplyEffect { effect: 2 },
            },
        );
        let mut effect_defs = HashMap::new();
        effect_defs.insert(
            1,
            EffectTemplate {
                id: 1,
                name: "poison".into(),
                kind: EffectKind::DamageOverTime {
                    per_tick: 10,
                    damage_type: DamageType::Shadow,
                },
                duration_ms: 5000,
                tick_interval_ms: 1000,
                stack_policy: StackPolicy::Refresh,
            },
        );
        effect_defs.insert(
            2,
            EffectTemplate {
                id: 2,
                name: "renewal".into(),
                kind: EffectKind::HealOverTime { per_tick: 15 },
                duration_ms: 6000,
                tick_interval_ms: 1000,
                stack_policy: StackPolicy::Stackable { max_stacks: 3 },
            },
        );
        effect_defs.insert(
            3,
            EffectTemplate {
                id: 3,
                name: "stun".into(),
                kind: EffectKind::Stun,
                duration_ms: 2000,
                tick_interval_ms: 0,
                stack_policy: StackPolicy::None,
            },
        );
        let skills = SkillTable {
            skills: skill_defs,
            effects: effect_defs,
            combat: CombatCoefficients::default(),
        };

        let mut quest_defs = HashMap::new();
        quest_defs.insert(
            900,
            QuestTemplate {
                id: 900,
                name: "cull the wolves".into(),
                min_level: 1,
                max_level: 400,
                prereq_quests: vec![],
                exclusive_quests: vec![],
                start_npc: 2,
                end_npc: 2,
                objectives: vec![ObjectiveDef {
                    kind: ObjectiveKind::Kill { mob: 501, count: 5 },
                    required: true,
                }],
                rewards: RewardDef {
                    experience: 500,
                    gold: 200,
                    items: vec![(100, 2)],
                    choice_items: vec![],
                },
                time_limit_ms: None,
                repeatable: false,
                auto_complete: true,
                repeat_cooldown_ms: 0,
            },
        );
        quest_defs.insert(
            901,
            QuestTemplate {
                id: 901,
                name: "fangs for the collector".into(),
                min_level: 1,
                max_level: 400,
                prereq_quests: vec![900],
                exclusive_quests: vec![],
                start_npc: 2,
                end_npc: 2,
                objectives: vec![ObjectiveDef {
                    kind: ObjectiveKind::Collect { item: 500, count: 3 },
                    required: true,
                }],
                rewards: RewardDef {
                    experience: 800,
                    gold: 500,
                    items: vec![],
                    choice_items: vec![(1, 1), (2, 1)],
                },
                time_limit_ms: Some(30 * 60 * 1000),
                repeatable: true,
                auto_complete: false,
                repeat_cooldown_ms: 60 * 60 * 1000,
            },
        );
        let quests = QuestTable { quests: quest_defs };

        let mut fees = HashMap::new();
        fees.insert(
            TransactionKind::MarketListing,
            FeeSchedule {
                base_rate_permille: 10,
                min_fee: 10,
                max_fee: 100_000,
                discount_permille: 0,
            },
        );
        fees.insert(
            TransactionKind::MarketSale,
            FeeSchedule {
                base_rate_permille: 50,
                min_fee: 0,
                max_fee: 1_000_000,
                discount_permille: 0,
            },
        );
        fees.insert(
            TransactionKind::AuctionSale,
            FeeSchedule {
                base_rate_permille: 50,
                min_fee: 0,
                max_fee: 1_000_000,
                discount_permille: 0,
            },
        );
        let mut npcs = HashMap::new();
        npcs.insert(
            1,
            NpcDef {
                id: 1,
                name: "armorer jun".into(),
                map: MapId(1),
                x: 102,
                y: 98,
                kind: NpcKind::Shopkeeper,
                interact_range: 4,
            },
        );
        npcs.insert(
            2,
            NpcDef {
                id: 2,
                name: "hunter ewan".into(),
                map: MapId(1),
                x: 98,
                y: 98,
                kind: NpcKind::QuestGiver,
                interact_range: 4,
            },
        );
        npcs.insert(
            3,
            NpcDef {
                id: 3,
                name: "banker odes".into(),
                map: MapId(1),
                x: 96,
                y: 102,
                kind: NpcKind::Banker,
                interact_range: 4,
            },
        );
        let mut shops = HashMap::new();
        shops.insert(
            1,
            ShopDef {
                npc: 1,
                entries: vec![
                    ShopEntry {
                        item_id: 100,
                        price: 50,
                        count: 1,
                    },
                    ShopEntry {
                        item_id: 1,
                        price: 500,
                        count: 1,
                    },
                    ShopEntry {
                        item_id: 300,
                        price: 1000,
                        count: 1,
                    },
                ],
                sell_back_permille: 400,
            },
        );
        let economy = EconomyTable { fees, shops, npcs };

        let tables = Self {
            items,
            mobs,
            maps,
            skills,
            quests,
            economy,
        };
        tables.validate().expect("fixture content should validate");
        Arc::new(tables)
    }
}
