//! Skill and status-effect templates, plus the pluggable damage
//! coefficients the combat engine reads.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{WorldError, WorldResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum DamageType {
    Physical,
    Fire,
    Ice,
    Lightning,
    Holy,
    Shadow,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TargetRule {
    Enemy,
    Ally,
    SelfOnly,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum SkillKind {
    /// Direct damage: `base + attack * scale_permille / 1000` per skill
    /// level.
    Damage {
        base: u32,
        scale_permille: u32,
        damage_type: DamageType,
    },
    Heal {
        base: u32,
        scale_permille: u32,
    },
    /// Applies a status effect from the effect table.
    ApplyEffect {
        effect: u16,
    },
    /// Damage repeated every `tick_ms` until `ticks` run out or the channel
    /// breaks.
    Channel {
        damage_per_tick: u32,
        tick_ms: u32,
        ticks: u32,
        damage_type: DamageType,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SkillTemplate {
    pub id: u16,
    pub name: String,
    /// Zero means all classes.
    pub class_mask: u8,
    pub level_req: u16,
    pub mana_cost: u32,
    pub cooldown_ms: u32,
    pub cast_time_ms: u32,
    pub range: u16,
    pub target: TargetRule,
    pub kind: SkillKind,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum StackPolicy {
    /// Reject when the same effect is already present.
    None,
    /// Extend the duration of the running instance.
    Refresh,
    /// Count stacks up to the cap.
    Stackable { max_stacks: u8 },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum EffectKind {
    DamageOverTime { per_tick: u32, damage_type: DamageType },
    HealOverTime { per_tick: u32 },
    StatModifier { attack_delta: i32, defense_delta: i32 },
    Stun,
    Silence,
    Slow { permille: u32 },
    Fear,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EffectTemplate {
    pub id: u16,
    pub name: String,
    pub kind: EffectKind,
    pub duration_ms: u32,
    /// Zero for effects that only tick on apply/expiry.
    pub tick_interval_ms: u32,
    pub stack_policy: StackPolicy,
}

/// Reference damage coefficients, per attacker class index. The formula
/// itself lives in the combat engine; content only supplies numbers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CombatCoefficients {
    /// Contribution of the class's primary stat, permille.
    pub stat_scale_permille: u32,
    /// Contribution of weapon attack, permille.
    pub weapon_scale_permille: u32,
    /// Mitigation granted per point of defense, permille.
    pub defense_scale_permille: u32,
    pub base_dodge_permille: u32,
    pub base_parry_permille: u32,
    pub base_block_permille: u32,
    pub base_critical_permille: u32,
    pub critical_bonus_permille: u32,
}

impl Default for CombatCoefficients {
    fn default() -> Self {
        Self {
            stat_scale_permille: 500,
            weapon_scale_permille: 1000,
            defense_scale_permille: 400,
            base_dodge_permille: 50,
            base_parry_permille: 40,
            base_block_permille: 30,
            base_critical_permille: 50,
            critical_bonus_permille: 1500,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SkillTable {
    pub skills: HashMap<u16, SkillTemplate>,
    pub effects: HashMap<u16, EffectTemplate>,
    pub combat: CombatCoefficients,
}

impl SkillTable {
    pub fn skill(&self, id: u16) -> WorldResult<&SkillTemplate> {
        self.skills.get(&id).ok_or(WorldError::InvalidTarget)
    }

    pub fn effect(&self, id: u16) -> WorldResult<&EffectTemplate> {
        self.effects.get(&id).ok_or(WorldError::InvalidTarget)
    }

    pub fn validate(&self) -> WorldResult<()> {
        for (id, skill) in &self.skills {
            if *id != skill.id {
                return Err(WorldError::InternalError);
            }
            if let SkillKind::ApplyEffect { effect } = skill.kind {
                if !self.effects.contains_key(&effect) {
                    return Err(WorldError::InternalError);
                }
            }
        }
        for (id, effect) in &self.effects {
            if *id != effect.id {
                return Err(WorldError::InternalError);
            }
            if let StackPolicy::Stackable { max_stacks: 0 } = effect.stack_policy {
                return Err(WorldError::InternalError);
            }
        }
        Ok(())
    }
}
