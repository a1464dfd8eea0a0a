//! Server-side attack resolution.
//!
//! The resolution order is fixed: target validity is checked by the caller
//! (same map, range, zone flags), then hit, parry, block and critical rolls,
//! then the damage formula with resistance mitigation, then reflect and
//! absorb. HP application and death handling stay with the tick, which owns
//! the records.
use rand::Rng;

use crate::content::{CombatCoefficients, DamageType, SkillKind, SkillTemplate};
use crate::error::{WorldError, WorldResult};

pub mod status;

/// A flattened view of either a character or a mob, as the resolver needs
/// it. Snapshots are cheap and keep the resolver free of record borrows.
#[derive(Clone, Copy, Debug, Default)]
pub struct CombatantView {
    pub level: u16,
    pub attack_min: u32,
    pub attack_max: u32,
    pub defense: u32,
    pub dodge_permille: u32,
    pub parry_permille: u32,
    pub block_permille: u32,
    pub critical_permille: u32,
    /// Mitigation permille per [DamageType] index.
    pub resistance_permille: [u32; 6],
    /// Damage returned to the attacker, permille.
    pub reflect_permille: u32,
    /// Flat damage soaked after everything else.
    pub absorb_flat: u32,
    /// Immune targets take no damage at all.
    pub immune: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttackOutcome {
    Miss,
    Parry,
    Block,
    Hit,
    Critical,
    Immune,
}

impl AttackOutcome {
    pub fn wire_code(&self) -> u8 {
        match self {
            AttackOutcome::Miss => 0,
            AttackOutcome::Hit => 1,
            AttackOutcome::Parry => 2,
            AttackOutcome::Block => 3,
            AttackOutcome::Critical => 4,
            AttackOutcome::Immune => 5,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AttackResolution {
    pub outcome: AttackOutcome,
    /// Damage to apply to the target; zero on miss/parry/immune.
    pub damage: u32,
    /// Damage reflected back at the attacker.
    pub reflected: u32,
}

fn damage_type_index(damage_type: DamageType) -> usize {
    match damage_type {
        DamageType::Physical => 0,
        DamageType::Fire => 1,
        DamageType::Ice => 2,
        DamageType::Lightning => 3,
        DamageType::Holy => 4,
        DamageType::Shadow => 5,
    }
}

fn roll(rng: &mut impl Rng, chance_permille: u32) -> bool {
    rng.gen_range(0..1000) < chance_permille.min(1000)
}

/// Extra damage a skill contributes on top of the weapon swing.
#[derive(Clone, Copy, Debug, Default)]
pub struct SkillDamage {
    pub base: u32,
    pub scale_permille: u32,
}

/// Resolves one attack. Damage is clamped to at least 1 on any connecting
/// hit; the caller further clamps to the target's remaining HP.
pub fn resolve_attack(
    rng: &mut impl Rng,
    coeffs: &CombatCoefficients,
    attacker: &CombatantView,
    target: &CombatantView,
    damage_type: DamageType,
    skill: Option<SkillDamage>,
) -> AttackResolution {
    if target.immune {
        return AttackResolution {
            outcome: AttackOutcome::Immune,
            damage: 0,
            reflected: 0,
        };
    }

    // 1: hit roll against dodge
    let dodge = coeffs.base_dodge_permille + target.dodge_permille;
    if roll(rng, dodge) {
        return AttackResolution {
            outcome: AttackOutcome::Miss,
            damage: 0,
            reflected: 0,
        };
    }
    // 2: parry
    let parry = coeffs.base_parry_permille + target.parry_permille;
    if roll(rng, parry) {
        return AttackResolution {
            outcome: AttackOutcome::Parry,
            damage: 0,
            reflected: 0,
        };
    }
    // 3: block
    let blocked = roll(rng, coeffs.base_block_permille + target.block_permille);
    // 4: critical
    let critical = roll(rng, coeffs.base_critical_permille + attacker.critical_permille);

    // 5: damage formula
    let swing = if attacker.attack_max > attacker.attack_min {
        rng.gen_range(attacker.attack_min..=attacker.attack_max)
    } else {
        attacker.attack_min
    };
    let weapon = u64::from(swing) * u64::from(coeffs.weapon_scale_permille) / 1000;
    let skill_part = skill
        .map(|s| u64::from(s.base) + u64::from(swing) * u64::from(s.scale_permille) / 1000)
        .unwrap_or(0);
    let mitigation = u64::from(target.defense) * u64::from(coeffs.defense_scale_permille) / 1000;
    let mut damage = (weapon + skill_part).saturating_sub(mitigation).max(1);

    if critical {
        damage = damage * u64::from(coeffs.critical_bonus_permille) / 1000;
    }
    if blocked {
        damage /= 2;
    }
    let resist = target.resistance_permille[damage_type_index(damage_type)].min(1000);
    damage = damage * u64::from(1000 - resist) / 1000;
    let mut damage = (damage as u32).max(1);

    // 6: absorb, then reflect on what connected
    damage = damage.saturating_sub(target.absorb_flat).max(1);
    let reflected = u64::from(damage) * u64::from(target.reflect_permille.min(1000)) / 1000;

    AttackResolution {
        outcome: if critical {
            AttackOutcome::Critical
        } else if blocked {
            AttackOutcome::Block
        } else {
            AttackOutcome::Hit
        },
        damage,
        reflected: reflected as u32,
    }
}

/// Gates common to every skill use: alive, not incapacitated, learned, off
/// cooldown, resources available. Range and target class are validated by
/// the caller, which knows the positions.
pub fn validate_skill_use(
    skill: &SkillTemplate,
    learned: &[u16],
    mp: u32,
    cooldown_ready_at: Option<u64>,
    now_ms: u64,
    dead: bool,
    stunned: bool,
    silenced: bool,
) -> WorldResult<()> {
    if dead {
        return Err(WorldError::Dead);
    }
    if stunned || silenced {
        return Err(WorldError::Incapacitated);
    }
    if !learned.contains(&skill.id) {
        return Err(WorldError::RequirementUnmet);
    }
    if let Some(ready_at) = cooldown_ready_at {
        if now_ms < ready_at {
            return Err(WorldError::Cooldown);
        }
    }
    if mp < skill.mana_cost {
        return Err(WorldError::InsufficientResource);
    }
    Ok(())
}

/// Channeled and cast-time skills suspend the caster; this answers whether
/// a damage event breaks the cast.
pub fn cast_interrupted_by(damage: u32, threshold: u32) -> bool {
    damage >= threshold
}

/// Damage contributed by a skill template, when it is a direct-damage one.
pub fn skill_damage_of(skill: &SkillTemplate) -> Option<(SkillDamage, DamageType)> {
    match skill.kind {
        SkillKind::Damage {
            base,
            scale_permille,
            damage_type,
        } => Some((
            SkillDamage {
                base,
                scale_permille,
            },
            damage_type,
        )),
        SkillKind::Channel {
            damage_per_tick,
            damage_type,
            ..
        } => Some((
            SkillDamage {
                base: damage_per_tick,
                scale_permille: 0,
            },
            damage_type,
        )),
        _ => None,
    }
}
