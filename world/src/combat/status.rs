//! Status effects. Magnitudes are snapshotted at apply time so the bar can
//! answer questions without a content lookup.
use tmsrv_primitives::{UnitId, MAX_AFFECTS};

use crate::{
    content::{EffectKind, EffectTemplate, StackPolicy},
    error::{WorldError, WorldResult},
};

#[derive(Clone, Copy, Debug)]
pub struct ActiveEffect {
    pub effect: u16,
    pub kind: EffectKind,
    pub stacks: u8,
    pub source: UnitId,
    pub expires_at_ms: u64,
    /// Zero when the effect has no periodic pulse.
    pub next_tick_ms: u64,
    tick_interval_ms: u32,
    duration_ms: u32,
}

/// One periodic pulse owed to the holder this tick.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EffectPulse {
    Damage { effect: u16, amount: u32 },
    Heal { effect: u16, amount: u32 },
}

/// An effect ran out; the holder's stats may need a recompute.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EffectExpiry {
    pub effect: u16,
}

#[derive(Default)]
pub struct StatusBar {
    effects: Vec<ActiveEffect>,
}

impl StatusBar {
    /// Applies an effect honoring its stack policy. Returns whether the bar
    /// changed.
    pub fn apply(
        &mut self,
        template: &EffectTemplate,
        source: UnitId,
        now_ms: u64,
    ) -> WorldResult<bool> {
        if let Some(existing) = self.effects.iter_mut().find(|e| e.effect == template.id) {
            return match template.stack_policy {
                StackPolicy::None => Ok(false),
                StackPolicy::Refresh => {
                    existing.expires_at_ms = now_ms + u64::from(template.duration_ms);
                    Ok(true)
                }
                StackPolicy::Stackable { max_stacks } => {
                    if existing.stacks < max_stacks {
                        existing.stacks += 1;
                    }
                    existing.expires_at_ms = now_ms + u64::from(template.duration_ms);
                    Ok(true)
                }
            };
        }
        if self.effects.len() >= MAX_AFFECTS {
            return Err(WorldError::ResourceExhaustion);
        }
        self.effects.push(ActiveEffect {
            effect: template.id,
            kind: template.kind,
            stacks: 1,
            source,
            expires_at_ms: now_ms + u64::from(template.duration_ms),
            next_tick_ms: if template.tick_interval_ms > 0 {
                now_ms + u64::from(template.tick_interval_ms)
            } else {
                0
            },
            tick_interval_ms: template.tick_interval_ms,
            duration_ms: template.duration_ms,
        });
        Ok(true)
    }

    /// Advances the bar to `now_ms`: collects due pulses, drops expired
    /// effects and reports them so the holder can recompute stats.
    pub fn advance(&mut self, now_ms: u64) -> (Vec<EffectPulse>, Vec<EffectExpiry>) {
        let mut pulses = Vec::new();
        for effect in &mut self.effects {
            while effect.next_tick_ms != 0
                && effect.next_tick_ms <= now_ms
                && effect.next_tick_ms <= effect.expires_at_ms
            {
                match effect.kind {
                    EffectKind::DamageOverTime { per_tick, .. } => pulses.push(EffectPulse::Damage {
                        effect: effect.effect,
                        amount: per_tick * u32::from(effect.stacks),
                    }),
                    EffectKind::HealOverTime { per_tick } => pulses.push(EffectPulse::Heal {
                        effect: effect.effect,
                        amount: per_tick * u32::from(effect.stacks),
                    }),
                    _ => (),
                }
                effect.next_tick_ms += u64::from(effect.tick_interval_ms.max(1));
            }
        }
        let mut expired = Vec::new();
        self.effects.retain(|effect| {
            if effect.expires_at_ms <= now_ms {
                expired.push(EffectExpiry {
                    effect: effect.effect,
                });
                false
            } else {
                true
            }
        });
        (pulses, expired)
    }

    /// Summed (attack, defense) deltas from stat-modifier effects.
    pub fn stat_deltas(&self) -> (i32, i32) {
        self.effects
            .iter()
            .filter_map(|e| match e.kind {
                EffectKind::StatModifier {
                    attack_delta,
                    defense_delta,
                } => Some((
                    attack_delta * i32::from(e.stacks),
                    defense_delta * i32::from(e.stacks),
                )),
                _ => None,
            })
            .fold((0, 0), |(a, d), (da, dd)| (a + da, d + dd))
    }

    pub fn is_stunned(&self) -> bool {
        self.effects.iter().any(|e| matches!(e.kind, EffectKind::Stun))
    }

    pub fn is_silenced(&self) -> bool {
        self.effects
            .iter()
            .any(|e| matches!(e.kind, EffectKind::Silence))
    }

    pub fn is_feared(&self) -> bool {
        self.effects.iter().any(|e| matches!(e.kind, EffectKind::Fear))
    }

    /// Strongest movement slow, permille.
    pub fn slow_permille(&self) -> u32 {
        self.effects
            .iter()
            .filter_map(|e| match e.kind {
                EffectKind::Slow { permille } => Some(permille),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    pub fn contains(&self, effect: u16) -> bool {
        self.effects.iter().any(|e| e.effect == effect)
    }

    pub fn stacks_of(&self, effect: u16) -> u8 {
        self.effects
            .iter()
            .find(|e| e.effect == effect)
            .map(|e| e.stacks)
            .unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.effects.clear();
    }
}
