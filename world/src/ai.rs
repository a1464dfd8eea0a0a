//! Per-mob brains: threat tables, the mob FSM and the per-tick decision
//! function. The tick applies the returned action; nothing here touches
//! world state directly.
use std::collections::HashMap;

use tmsrv_primitives::{CharacterId, MobId, Position};

use crate::{
    combat::status::StatusBar,
    content::{Aggression, Brain, MobTemplate, TargetSelection},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MobState {
    Idle,
    Alert,
    Chase,
    Attack,
    Flee,
    Heal,
    Patrol,
    Return,
    Dead,
    Stunned,
    Feared,
}

/// Decaying aggro scores per attacker.
#[derive(Clone, Debug, Default)]
pub struct ThreatTable {
    entries: HashMap<CharacterId, u64>,
}

impl ThreatTable {
    pub fn add(&mut self, who: CharacterId, amount: u64) {
        *self.entries.entry(who).or_insert(0) += amount;
    }

    /// Old grudges fade a little every tick.
    pub fn decay(&mut self, permille: u32) {
        self.entries
            .retain(|_, threat| {
                *threat = *threat * u64::from(1000 - permille.min(1000)) / 1000;
                *threat > 0
            });
    }

    pub fn remove(&mut self, who: CharacterId) {
        self.entries.remove(&who);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn threat_of(&self, who: CharacterId) -> u64 {
        self.entries.get(&who).copied().unwrap_or(0)
    }

    pub fn highest(&self) -> Option<CharacterId> {
        self.entries
            .iter()
            .max_by_key(|(_, threat)| **threat)
            .map(|(who, _)| *who)
    }

    /// Highest contributor, for loot credit.
    pub fn top_contributor(&self) -> Option<(CharacterId, u64)> {
        self.entries
            .iter()
            .max_by_key(|(_, threat)| **threat)
            .map(|(who, threat)| (*who, *threat))
    }
}

pub struct Mob {
    pub id: MobId,
    pub template: u16,
    pub position: Position,
    pub home: Position,
    pub hp: u32,
    pub state: MobState,
    pub threat: ThreatTable,
    pub status: StatusBar,
    pub patrol: Vec<(u16, u16)>,
    pub patrol_cursor: usize,
    pub next_attack_ms: u64,
    pub skill_cooldowns: HashMap<u16, u64>,
    /// Set while dead, for the respawn sweep.
    pub respawn_at_ms: Option<u64>,
}

impl Mob {
    pub fn new(id: MobId, template: &MobTemplate, home: Position, patrol: Vec<(u16, u16)>) -> Self {
        Self {
            id,
            template: template.id,
            position: home,
            home,
            hp: template.max_hp,
            state: MobState::Idle,
            threat: ThreatTable::default(),
            status: StatusBar::default(),
            patrol,
            patrol_cursor: 0,
            next_attack_ms: 0,
            skill_cooldowns: HashMap::new(),
            respawn_at_ms: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.state != MobState::Dead
    }

    /// Leash: past this, the mob gives up, walks home and heals up.
    pub fn over_leash(&self, brain: &Brain) -> bool {
        self.position.distance(&self.home) > brain.leash_radius
    }
}

/// What the brain perceives this tick: candidate targets with distance and
/// health, already filtered to the same map and sight range by the caller.
#[derive(Clone, Copy, Debug)]
pub struct PerceivedTarget {
    pub character: CharacterId,
    pub position: Position,
    pub hp_permille: u32,
}

/// The action the tick should carry out for the mob.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MobAction {
    None,
    MoveTowards(Position),
    Attack(CharacterId),
    CastSkill { skill: u16, target: CharacterId },
    /// Walk home, drop aggro, heal to full on arrival.
    ReturnHome,
}

/// Events that drive transitions outside the regular decision step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MobEvent {
    Damaged { by: CharacterId, amount: u32 },
    TargetLost { who: CharacterId },
    AllyKilled,
}

pub fn on_event(mob: &mut Mob, template: &MobTemplate, event: MobEvent) {
    match event {
        MobEvent::Damaged { by, amount } => {
            // threat scales with damage; even a scratch registers
            mob.threat.add(by, u64::from(amount).max(1));
            if matches!(mob.state, MobState::Idle | MobState::Patrol | MobState::Alert) {
                mob.state = MobState::Alert;
            }
        }
        MobEvent::TargetLost { who } => {
            mob.threat.remove(who);
            if mob.threat.is_empty() && mob.is_alive() {
                mob.state = MobState::Return;
            }
        }
        MobEvent::AllyKilled => {
            if template.brain.aggression != Aggression::Passive && mob.is_alive() {
                mob.state = MobState::Alert;
            }
        }
    }
}

fn select_target(
    brain: &Brain,
    threat: &ThreatTable,
    mob_position: &Position,
    perceived: &[PerceivedTarget],
    roll: usize,
) -> Option<CharacterId> {
    if perceived.is_empty() {
        return None;
    }
    match brain.target_selection {
        TargetSelection::HighestThreat => {
            // prefer the biggest grudge that is still visible
            perceived
                .iter()
                .max_by_key(|t| threat.threat_of(t.character))
                .filter(|t| threat.threat_of(t.character) > 0)
                .or_else(|| {
                    perceived
                        .iter()
                        .min_by_key(|t| mob_position.distance(&t.position))
                })
                .map(|t| t.character)
        }
        TargetSelection::Closest => perceived
            .iter()
            .min_by_key(|t| mob_position.distance(&t.position))
            .map(|t| t.character),
        TargetSelection::LowestHealth => perceived
            .iter()
            .min_by_key(|t| t.hp_permille)
            .map(|t| t.character),
        TargetSelection::Random => perceived.get(roll % perceived.len()).map(|t| t.character),
    }
}

/// One step toward `to`, clamped to the mob's speed.
pub fn step_towards(from: &Position, to: &Position, cells: u16) -> Position {
    let mut next = *from;
    let step = |current: u16, target: u16| -> u16 {
        let delta = target.abs_diff(current).min(cells);
        if target > current {
            current + delta
        } else {
            current - delta
        }
    };
    next.x = step(from.x, to.x);
    next.y = step(from.y, to.y);
    next
}

/// The per-tick decision. Order: incapacitation, leash, flee threshold,
/// target selection, then attack/cast/pursue, falling back to patrol.
pub fn decide(
    mob: &mut Mob,
    template: &MobTemplate,
    perceived: &[PerceivedTarget],
    now_ms: u64,
    roll: usize,
) -> MobAction {
    let brain = &template.brain;
    if !mob.is_alive() {
        return MobAction::None;
    }
    if mob.status.is_stunned() {
        mob.state = MobState::Stunned;
        return MobAction::None;
    }
    if mob.status.is_feared() {
        mob.state = MobState::Feared;
        // run from the scariest thing in sight
        if let Some(nearest) = perceived
            .iter()
            .min_by_key(|t| mob.position.distance(&t.position))
        {
            let away = Position {
                map: mob.position.map,
                x: mob
                    .position
                    .x
                    .saturating_add(mob.position.x.saturating_sub(nearest.position.x)),
                y: mob
                    .position
                    .y
                    .saturating_add(mob.position.y.saturating_sub(nearest.position.y)),
                facing: mob.position.facing,
            };
            return MobAction::MoveTowards(step_towards(
                &mob.position,
                &away,
                template.move_cells_per_tick,
            ));
        }
        return MobAction::None;
    }

    if mob.state == MobState::Return {
        if mob.position.distance(&mob.home) == 0 {
            mob.hp = template.max_hp;
            mob.threat.clear();
            mob.state = MobState::Idle;
            return MobAction::None;
        }
        return MobAction::ReturnHome;
    }
    if mob.over_leash(brain) {
        mob.state = MobState::Return;
        return MobAction::ReturnHome;
    }

    let hp_permille = u64::from(mob.hp) * 1000 / u64::from(template.max_hp.max(1));
    if brain.flee_health_permille > 0
        && (hp_permille as u32) < brain.flee_health_permille
        && !perceived.is_empty()
    {
        mob.state = MobState::Flee;
        return MobAction::ReturnHome;
    }

    // aggression gates unprovoked attacks; a provoked passive mob still
    // fights whoever is on its threat table
    let provoked = !mob.threat.is_empty();
    let hostile = match brain.aggression {
        Aggression::Aggressive => true,
        Aggression::Defensive | Aggression::Passive => provoked,
    };
    if hostile {
        if let Some(target) = select_target(brain, &mob.threat, &mob.position, perceived, roll) {
            let target_position = perceived
                .iter()
                .find(|t| t.character == target)
                .map(|t| t.position)
                .expect("selected from perceived; qed");
            let distance = mob.position.distance(&target_position);
            if distance <= template.attack_range {
                mob.state = MobState::Attack;
                if now_ms < mob.next_attack_ms {
                    return MobAction::None;
                }
                // pick a ready skill when the brain wants one
                if !matches!(
                    brain.skill_selection,
                    crate::content::SkillSelection::MeleeOnly
                ) {
                    if let Some(skill) = template.skills.iter().find(|skill| {
                        mob.skill_cooldowns
                            .get(skill)
                            .map(|ready| *ready <= now_ms)
                            .unwrap_or(true)
                    }) {
                        return MobAction::CastSkill {
                            skill: *skill,
                            target,
                        };
                    }
                }
                return MobAction::Attack(target);
            }
            mob.state = MobState::Chase;
            return MobAction::MoveTowards(step_towards(
                &mob.position,
                &target_position,
                template.move_cells_per_tick,
            ));
        }
    }

    // nothing to fight: patrol or idle
    if !mob.patrol.is_empty() {
        mob.state = MobState::Patrol;
        let (x, y) = mob.patrol[mob.patrol_cursor];
        let waypoint = Position::new(mob.position.map, x, y);
        if mob.position.distance(&waypoint) == 0 {
            mob.patrol_cursor = (mob.patrol_cursor + 1) % mob.patrol.len();
            return MobAction::None;
        }
        return MobAction::MoveTowards(step_towards(
            &mob.position,
            &waypoint,
            template.move_cells_per_tick,
        ));
    }
    mob.state = MobState::Idle;
    MobAction::None
}

#[cfg(test)]
mod tests {
    use tmsrv_primitives::MapId;

    use super::*;
    use crate::content::ContentTables;

    fn wolf_at(content: &ContentTables, x: u16, y: u16) -> (Mob, MobTemplate) {
        let template = content.mobs.template(501).expect("fixture wolf").clone();
        let mob = Mob::new(
            MobId(1),
            &template,
            Position::new(MapId(1), x, y),
            vec![],
        );
        (mob, template)
    }

    fn seen(character: u32, x: u16, y: u16, hp_permille: u32) -> PerceivedTarget {
        PerceivedTarget {
            character: CharacterId(character),
            position: Position::new(MapId(1), x, y),
            hp_permille,
        }
    }

    #[test]
    fn threat_decays_to_zero() {
        let mut threat = ThreatTable::default();
        threat.add(CharacterId(1), 100);
        threat.add(CharacterId(2), 10);
        threat.decay(500);
        assert_eq!(threat.threat_of(CharacterId(1)), 50);
        threat.decay(1000);
        assert!(threat.is_empty());
    }

    #[test]
    fn aggressive_mob_chases_then_attacks() {
        let content = ContentTables::fixture();
        let (mut mob, template) = wolf_at(&content, 100, 100);
        let action = decide(&mut mob, &template, &[seen(7, 105, 100, 1000)], 0, 0);
        assert_eq!(
            action,
            MobAction::MoveTowards(Position::new(MapId(1), 101, 100))
        );
        assert_eq!(mob.state, MobState::Chase);

        let action = decide(&mut mob, &template, &[seen(7, 101, 100, 1000)], 0, 0);
        assert_eq!(action, MobAction::Attack(CharacterId(7)));
        assert_eq!(mob.state, MobState::Attack);
    }

    #[test]
    fn highest_threat_wins_target_selection() {
        let content = ContentTables::fixture();
        let (mut mob, template) = wolf_at(&content, 100, 100);
        on_event(&mut mob, &template, MobEvent::Damaged { by: CharacterId(8), amount: 50 });
        on_event(&mut mob, &template, MobEvent::Damaged { by: CharacterId(7), amount: 10 });
        let action = decide(
            &mut mob,
            &template,
            &[seen(7, 101, 100, 1000), seen(8, 101, 100, 1000)],
            0,
            0,
        );
        assert_eq!(action, MobAction::Attack(CharacterId(8)));
    }

    #[test]
    fn leash_sends_the_mob_home_and_heals() {
        let content = ContentTables::fixture();
        let (mut mob, template) = wolf_at(&content, 100, 100);
        mob.hp = 10;
        mob.threat.add(CharacterId(7), 100);
        mob.position = Position::new(MapId(1), 100 + template.brain.leash_radius + 1, 100);
        let action = decide(&mut mob, &template, &[seen(7, 160, 100, 1000)], 0, 0);
        assert_eq!(action, MobAction::ReturnHome);
        assert_eq!(mob.state, MobState::Return);

        // walk it home and confirm the reset
        mob.position = mob.home;
        let action = decide(&mut mob, &template, &[], 0, 0);
        assert_eq!(action, MobAction::None);
        assert_eq!(mob.state, MobState::Idle);
        assert_eq!(mob.hp, template.max_hp);
        assert!(mob.threat.is_empty());
    }

    #[test]
    fn wounded_bear_flees() {
        let content = ContentTables::fixture();
        let template = content.mobs.template(502).expect("fixture bear").clone();
        let mut mob = Mob::new(MobId(2), &template, Position::new(MapId(1), 100, 100), vec![]);
        mob.hp = template.max_hp / 10; // 100 permille, under the 150 threshold
        let action = decide(&mut mob, &template, &[seen(7, 101, 100, 1000)], 0, 0);
        assert_eq!(action, MobAction::ReturnHome);
        assert_eq!(mob.state, MobState::Flee);
    }

    #[test]
    fn passive_until_provoked() {
        let content = ContentTables::fixture();
        let (mut mob, mut template) = wolf_at(&content, 100, 100);
        template.brain.aggression = Aggression::Passive;
        let action = decide(&mut mob, &template, &[seen(7, 101, 100, 1000)], 0, 0);
        assert_eq!(action, MobAction::None);
        on_event(&mut mob, &template, MobEvent::Damaged { by: CharacterId(7), amount: 5 });
        let action = decide(&mut mob, &template, &[seen(7, 101, 100, 1000)], 0, 0);
        assert_eq!(action, MobAction::Attack(CharacterId(7)));
    }

    #[test]
    fn patrols_between_waypoints() {
        let content = ContentTables::fixture();
        let template = content.mobs.template(501).expect("fixture wolf").clone();
        let mut mob = Mob::new(
            MobId(3),
            &template,
            Position::new(MapId(1), 100, 100),
            vec![(101, 100), (99, 100)],
        );
        let action = decide(&mut mob, &template, &[], 0, 0);
        assert_eq!(
            action,
            MobAction::MoveTowards(Position::new(MapId(1), 101, 100))
        );
        assert_eq!(mob.state, MobState::Patrol);
        mob.position = Position::new(MapId(1), 101, 100);
        // arrival advances the cursor
        assert_eq!(decide(&mut mob, &template, &[], 0, 0), MobAction::None);
        let action = decide(&mut mob, &template, &[], 0, 0);
        assert_eq!(
            action,
            MobAction::MoveTowards(Position::new(MapId(1), 100, 100))
        );
    }

    #[test]
    fn stun_freezes_the_brain() {
        let content = ContentTables::fixture();
        let (mut mob, template) = wolf_at(&content, 100, 100);
        let stun = content.skills.effect(3).expect("fixture stun");
        mob.status
            .apply(stun, tmsrv_primitives::UnitId::Character(CharacterId(7)), 0)
            .expect("applies");
        let action = decide(&mut mob, &template, &[seen(7, 101, 100, 1000)], 0, 0);
        assert_eq!(action, MobAction::None);
        assert_eq!(mob.state, MobState::Stunned);
    }
}
