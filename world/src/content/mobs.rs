//! Mob templates, brains and drop groups.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use tmsrv_primitives::MapId;

use crate::error::{WorldError, WorldResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MobRank {
    Normal,
    Elite,
    Boss,
}

impl MobRank {
    /// Multiplier applied to refine/option rolls on drops, in permille.
    pub fn drop_quality_permille(&self) -> u32 {
        match self {
            MobRank::Normal => 1000,
            MobRank::Elite => 1500,
            MobRank::Boss => 2500,
        }
    }
}

/// How eagerly a brain picks fights.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Aggression {
    Passive,
    Defensive,
    Aggressive,
}

/// How a brain picks its victim from the threat table.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TargetSelection {
    HighestThreat,
    Closest,
    LowestHealth,
    Random,
}

/// How a brain picks between melee and its skill list.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SkillSelection {
    MeleeOnly,
    FirstOffCooldown,
    Random,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Brain {
    pub aggression: Aggression,
    pub target_selection: TargetSelection,
    pub skill_selection: SkillSelection,
    pub sight_range: u16,
    /// Flee when health drops under this many permille.
    pub flee_health_permille: u32,
    pub leash_radius: u16,
    /// Mobs in this radius join in when an ally is attacked.
    pub call_for_help_radius: u16,
}

impl Default for Brain {
    fn default() -> Self {
        Self {
            aggression: Aggression::Aggressive,
            target_selection: TargetSelection::HighestThreat,
            skill_selection: SkillSelection::MeleeOnly,
            sight_range: 10,
            flee_health_permille: 0,
            leash_radius: 40,
            call_for_help_radius: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MobTemplate {
    pub id: u16,
    pub name: String,
    pub level: u16,
    pub max_hp: u32,
    pub attack_min: u32,
    pub attack_max: u32,
    pub defense: u32,
    pub attack_range: u16,
    pub move_cells_per_tick: u16,
    pub experience: u32,
    pub rank: MobRank,
    pub brain: Brain,
    pub skills: Vec<u16>,
    pub drop_groups: Vec<u16>,
    /// Gold dropped on death, rolled uniformly.
    pub gold_min: u32,
    pub gold_max: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DropMode {
    /// At most one entry of the group drops, picked by weight.
    Exclusive,
    /// Every entry rolls independently.
    Independent,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DropEntry {
    pub item_id: u16,
    pub chance_permille: u32,
    pub count_min: u32,
    pub count_max: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DropGroup {
    pub id: u16,
    pub mode: DropMode,
    /// Chance that the group fires at all.
    pub chance_permille: u32,
    pub entries: Vec<DropEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub template: u16,
    pub map: MapId,
    pub x: u16,
    pub y: u16,
    pub count: u16,
    pub respawn_secs: u32,
    /// Patrol waypoints; empty means the mob idles at home.
    pub patrol: Vec<(u16, u16)>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MobTable {
    pub templates: HashMap<u16, MobTemplate>,
    pub drop_groups: HashMap<u16, DropGroup>,
    pub spawns: Vec<SpawnPoint>,
}

impl MobTable {
    pub fn template(&self, id: u16) -> WorldResult<&MobTemplate> {
        self.templates.get(&id).ok_or(WorldError::InvalidTarget)
    }

    pub fn drop_group(&self, id: u16) -> Option<&DropGroup> {
        self.drop_groups.get(&id)
    }

    pub fn validate(&self) -> WorldResult<()> {
        for (id, template) in &self.templates {
            if *id != template.id
                || template.max_hp == 0
                || template.attack_min > template.attack_max
                || template.gold_min > template.gold_max
            {
                return Err(WorldError::InternalError);
            }
            for group in &template.drop_groups {
                if !self.drop_groups.contains_key(group) {
                    return Err(WorldError::InternalError);
                }
            }
        }
        for spawn in &self.spawns {
            if !self.templates.contains_key(&spawn.template) {
                return Err(WorldError::InternalError);
            }
        }
        Ok(())
    }
}
