//! Quest instances, event-driven objective progress and idempotent reward
//! grants.
//!
//! Combat, inventory, session and character events never scan the full
//! active set: per-character reverse indices map mob, item and npc ids to
//! the objectives that care.
use std::collections::HashMap;

use tmsrv_primitives::{CharacterId, MapId, QuestInstanceId};

use crate::{
    content::{ContentTables, ObjectiveKind, QuestTemplate},
    error::{WorldError, WorldResult},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QuestState {
    Active,
    /// All required objectives met; waiting for the end-npc visit or for
    /// inventory room when rewards did not fit.
    ReadyToTurnIn,
    Complete,
    Failed,
    Abandoned,
}

impl QuestState {
    pub fn wire_code(&self) -> u8 {
        match self {
            QuestState::Active => 0,
            QuestState::ReadyToTurnIn => 1,
            QuestState::Complete => 2,
            QuestState::Failed => 3,
            QuestState::Abandoned => 4,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self,
            QuestState::Complete | QuestState::Failed | QuestState::Abandoned
        )
    }
}

#[derive(Clone, Debug)]
pub struct QuestInstance {
    pub id: QuestInstanceId,
    pub quest: u16,
    pub character: CharacterId,
    pub state: QuestState,
    pub accepted_at_ms: u64,
    pub progress: Vec<u32>,
    pub selected_reward: Option<u8>,
    /// Set once rewards have been handed over; the grant never repeats.
    pub rewarded: bool,
}

/// What the tick must hand the player on completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RewardGrant {
    pub experience: u64,
    pub gold: u32,
    pub items: Vec<(u16, u32)>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QuestEvent {
    Kill { mob: u16 },
    ItemAcquired { item: u16, total_held: u32 },
    ItemUsed { item: u16 },
    SkillUsed { skill: u16 },
    Talk { npc: u32 },
    Visit { map: MapId, x: u16, y: u16 },
    LevelReached { level: u16 },
}

type ObjectiveRef = (QuestInstanceId, usize);

#[derive(Default)]
pub struct QuestEngine {
    instances: HashMap<QuestInstanceId, QuestInstance>,
    by_character: HashMap<CharacterId, Vec<QuestInstanceId>>,
    /// (character, completions, last completion time) per quest template.
    completions: HashMap<(CharacterId, u16), (u32, u64)>,
    kill_index: HashMap<(CharacterId, u16), Vec<ObjectiveRef>>,
    item_index: HashMap<(CharacterId, u16), Vec<ObjectiveRef>>,
    npc_index: HashMap<(CharacterId, u32), Vec<ObjectiveRef>>,
    skill_index: HashMap<(CharacterId, u16), Vec<ObjectiveRef>>,
    next_id: u32,
}

impl QuestEngine {
    pub fn instance(&self, id: QuestInstanceId) -> WorldResult<&QuestInstance> {
        self.instances.get(&id).ok_or(WorldError::InvalidTarget)
    }

    pub fn active_of(&self, character: CharacterId) -> Vec<&QuestInstance> {
        self.by_character
            .get(&character)
            .into_iter()
            .flatten()
            .filter_map(|id| self.instances.get(id))
            .filter(|i| !i.state.is_terminal())
            .collect()
    }

    pub fn completions_of(&self, character: CharacterId) -> Vec<(u16, u32)> {
        self.completions
            .iter()
            .filter(|((who, _), _)| *who == character)
            .map(|((_, quest), (count, _))| (*quest, *count))
            .collect()
    }

    /// Acceptance gates, per the template: level window, prerequisites
    /// complete, no exclusive quest active, not already active, repeat
    /// cooldown elapsed.
    pub fn accept(
        &mut self,
        content: &ContentTables,
        character: CharacterId,
        level: u16,
        quest_id: u16,
        now_ms: u64,
    ) -> WorldResult<QuestInstanceId> {
        let template = content.quests.quest(quest_id)?;
        if level < template.min_level || level > template.max_level {
            return Err(WorldError::RequirementUnmet);
        }
        for prereq in &template.prereq_quests {
            match self.completions.get(&(character, *prereq)) {
                Some((count, _)) if *count > 0 => (),
                _ => return Err(WorldError::QuestPrereq),
            }
        }
        let active: Vec<u16> = self
            .active_of(character)
            .iter()
            .map(|i| i.quest)
            .collect();
        if active.contains(&quest_id) {
            return Err(WorldError::QuestPrereq);
        }
        if template
            .exclusive_quests
            .iter()
            .any(|excluded| active.contains(excluded))
        {
            return Err(WorldError::QuestPrereq);
        }
        if let Some((count, last_ms)) = self.completions.get(&(character, quest_id)) {
            if *count > 0 {
                if !template.repeatable {
                    return Err(WorldError::QuestPrereq);
                }
                if now_ms < last_ms + template.repeat_cooldown_ms {
                    return Err(WorldError::Cooldown);
                }
            }
        }

        self.next_id += 1;
        let id = QuestInstanceId(self.next_id);
        let instance = QuestInstance {
            id,
            quest: quest_id,
            character,
            state: QuestState::Active,
            accepted_at_ms: now_ms,
            progress: vec![0; template.objectives.len()],
            selected_reward: None,
            rewarded: false,
        };
        self.index_objectives(character, id, template);
        self.by_character.entry(character).or_default().push(id);
        self.instances.insert(id, instance);
        Ok(id)
    }

    fn index_objectives(
        &mut self,
        character: CharacterId,
        id: QuestInstanceId,
        template: &QuestTemplate,
    ) {
        for (index, objective) in template.objectives.iter().enumerate() {
            match objective.kind {
                ObjectiveKind::Kill { mob, .. } => self
                    .kill_index
                    .entry((character, mob))
                    .or_default()
                    .push((id, index)),
                ObjectiveKind::Collect { item, .. }
                | ObjectiveKind::Deliver { item, .. }
                | ObjectiveKind::UseItem { item, .. } => self
                    .item_index
                    .entry((character, item))
                    .or_default()
                    .push((id, index)),
                ObjectiveKind::Talk { npc } => self
                    .npc_index
                    .entry((character, npc))
                    .or_default()
                    .push((id, index)),
                ObjectiveKind::UseSkill { skill, .. } => self
                    .skill_index
                    .entry((character, skill))
                    .or_default()
                    .push((id, index)),
                // visit and level events are rare enough to walk the
                // character's active list
                ObjectiveKind::Visit { .. } | ObjectiveKind::ReachLevel { .. } => (),
            }
        }
    }

    fn unindex(&mut self, character: CharacterId, id: QuestInstanceId) {
        for index in [
            &mut self.kill_index,
            &mut self.item_index,
            &mut self.skill_index,
        ] {
            for refs in index.values_mut() {
                refs.retain(|(instance, _)| *instance != id);
            }
        }
        for refs in self.npc_index.values_mut() {
            refs.retain(|(instance, _)| *instance != id);
        }
    }

    /// Feeds one domain event into the indexed objectives. Returns the
    /// instances whose progress changed and those that newly satisfied all
    /// required objectives.
    pub fn on_event(
        &mut self,
        content: &ContentTables,
        character: CharacterId,
        event: QuestEvent,
    ) -> QuestProgressReport {
        let mut report = QuestProgressReport::default();
        let targets: Vec<ObjectiveRef> = match event {
            QuestEvent::Kill { mob } => self
                .kill_index
                .get(&(character, mob))
                .cloned()
                .unwrap_or_default(),
            QuestEvent::ItemAcquired { item, .. } | QuestEvent::ItemUsed { item } => self
                .item_index
                .get(&(character, item))
                .cloned()
                .unwrap_or_default(),
            QuestEvent::SkillUsed { skill } => self
                .skill_index
                .get(&(character, skill))
                .cloned()
                .unwrap_or_default(),
            QuestEvent::Talk { npc } => self
                .npc_index
                .get(&(character, npc))
                .cloned()
                .unwrap_or_default(),
            QuestEvent::Visit { .. } | QuestEvent::LevelReached { .. } => self
                .active_of(character)
                .iter()
                .flat_map(|i| {
                    (0..i.progress.len()).map(move |objective| (i.id, objective))
                })
                .collect(),
        };

        for (id, objective_index) in targets {
            let Some(instance) = self.instances.get_mut(&id) else {
                continue;
            };
            if instance.state != QuestState::Active {
                continue;
            }
            let Ok(template) = content.quests.quest(instance.quest) else {
                continue;
            };
            let Some(objective) = template.objectives.get(objective_index) else {
                continue;
            };
            let threshold = objective.kind.threshold();
            let progress = &mut instance.progress[objective_index];
            let before = *progress;
            match (&objective.kind, event) {
                (ObjectiveKind::Kill { .. }, QuestEvent::Kill { .. }) => {
                    *progress = (*progress + 1).min(threshold);
                }
                (
                    ObjectiveKind::Collect { .. },
                    QuestEvent::ItemAcquired { total_held, .. },
                ) => {
                    *progress = total_held.min(threshold);
                }
                (ObjectiveKind::Deliver { .. }, QuestEvent::ItemAcquired { total_held, .. }) => {
                    *progress = total_held.min(threshold);
                }
                (ObjectiveKind::UseItem { .. }, QuestEvent::ItemUsed { .. }) => {
                    *progress = (*progress + 1).min(threshold);
                }
                (ObjectiveKind::UseSkill { .. }, QuestEvent::SkillUsed { .. }) => {
                    *progress = (*progress + 1).min(threshold);
                }
                (ObjectiveKind::Talk { .. }, QuestEvent::Talk { .. }) => {
                    *progress = threshold;
                }
                (
                    ObjectiveKind::Visit {
                        map, x, y, radius, ..
                    },
                    QuestEvent::Visit {
                        map: at_map,
                        x: at_x,
                        y: at_y,
                    },
                ) => {
                    if *map == at_map
                        && at_x.abs_diff(*x).max(at_y.abs_diff(*y)) <= *radius
                    {
                        *progress = threshold;
                    }
                }
                (ObjectiveKind::ReachLevel { .. }, QuestEvent::LevelReached { level }) => {
                    *progress = (*progress).max(u32::from(level)).min(threshold);
                }
                _ => continue,
            }
            if *progress != before {
                report.progressed.push(id);
                let all_required_met = template
                    .objectives
                    .iter()
                    .enumerate()
                    .filter(|(_, o)| o.required)
                    .all(|(i, o)| instance.progress[i] >= o.kind.threshold());
                if all_required_met {
                    instance.state = QuestState::ReadyToTurnIn;
                    report
                        .ready
                        .push((id, template.auto_complete));
                }
            }
        }
        report
    }

    /// Completes a ready quest. `at_npc` is checked unless the quest
    /// auto-completes; `has_space` reflects whether the forced reward items
    /// fit, re-checked by the caller against the live inventory. Rewards
    /// are granted exactly once; a second call is a no-op error.
    pub fn complete(
        &mut self,
        content: &ContentTables,
        id: QuestInstanceId,
        at_npc: Option<u32>,
        reward_choice: Option<u8>,
        has_space: bool,
        now_ms: u64,
    ) -> WorldResult<RewardGrant> {
        let instance = self.instances.get_mut(&id).ok_or(WorldError::InvalidTarget)?;
        if instance.state != QuestState::ReadyToTurnIn {
            return Err(WorldError::QuestNotReady);
        }
        let template = content.quests.quest(instance.quest)?;
        if !template.auto_complete {
            match at_npc {
                Some(npc) if npc == template.end_npc => (),
                _ => return Err(WorldError::QuestNotReady),
            }
        }
        if !has_space {
            // deferred: stays ready, the player frees a slot and retries
            return Err(WorldError::InventoryFull);
        }
        if instance.rewarded {
            return Err(WorldError::QuestNotReady);
        }

        let mut grant = RewardGrant {
            experience: template.rewards.experience,
            gold: template.rewards.gold,
            items: template.rewards.items.clone(),
        };
        if !template.rewards.choice_items.is_empty() {
            let choice = reward_choice.ok_or(WorldError::RequirementUnmet)? as usize;
            let chosen = template
                .rewards
                .choice_items
                .get(choice)
                .ok_or(WorldError::RequirementUnmet)?;
            grant.items.push(*chosen);
            instance.selected_reward = reward_choice;
        }
        instance.rewarded = true;
        instance.state = QuestState::Complete;
        let character = instance.character;
        let entry = self
            .completions
            .entry((character, instance.quest))
            .or_insert((0, 0));
        entry.0 += 1;
        entry.1 = now_ms;
        self.unindex(character, id);
        Ok(grant)
    }

    pub fn abandon(&mut self, id: QuestInstanceId, who: CharacterId) -> WorldResult<u16> {
        let instance = self.instances.get_mut(&id).ok_or(WorldError::InvalidTarget)?;
        if instance.character != who || instance.state.is_terminal() {
            return Err(WorldError::InvalidTarget);
        }
        instance.state = QuestState::Abandoned;
        let quest = instance.quest;
        self.unindex(who, id);
        Ok(quest)
    }

    /// Fails time-limited quests past their deadline. Returns (instance,
    /// character, quest) triples so the tick can strip quest items.
    pub fn expire(
        &mut self,
        content: &ContentTables,
        now_ms: u64,
    ) -> Vec<(QuestInstanceId, CharacterId, u16)> {
        let mut failed = Vec::new();
        for instance in self.instances.values_mut() {
            if instance.state.is_terminal() {
                continue;
            }
            let Ok(template) = content.quests.quest(instance.quest) else {
                continue;
            };
            if let Some(limit) = template.time_limit_ms {
                if now_ms.saturating_sub(instance.accepted_at_ms) > limit {
                    instance.state = QuestState::Failed;
                    failed.push((instance.id, instance.character, instance.quest));
                }
            }
        }
        for (id, character, _) in &failed {
            self.unindex(*character, *id);
        }
        failed
    }

    /// Drops terminal instances past their usefulness (the client has been
    /// told). Completion history stays.
    pub fn sweep_terminal(&mut self) {
        let gone: Vec<QuestInstanceId> = self
            .instances
            .values()
            .filter(|i| i.state.is_terminal())
            .map(|i| i.id)
            .collect();
        for id in gone {
            if let Some(instance) = self.instances.remove(&id) {
                if let Some(list) = self.by_character.get_mut(&instance.character) {
                    list.retain(|other| *other != id);
                }
            }
        }
    }
}

/// What one event did to a character's quest log.
#[derive(Clone, Debug, Default)]
pub struct QuestProgressReport {
    pub progressed: Vec<QuestInstanceId>,
    /// (instance, auto_complete): satisfied all required objectives.
    pub ready: Vec<(QuestInstanceId, bool)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentTables;

    const HERO: CharacterId = CharacterId(1);

    fn accept_wolf_cull(engine: &mut QuestEngine, content: &ContentTables) -> QuestInstanceId {
        engine
            .accept(content, HERO, 10, 900, 0)
            .expect("acceptance gates pass")
    }

    #[test]
    fn kill_progress_counts_only_the_indexed_mob() {
        let content = ContentTables::fixture();
        let mut engine = QuestEngine::default();
        let id = accept_wolf_cull(&mut engine, &content);

        // bears do nothing for the wolf quest
        let report = engine.on_event(&content, HERO, QuestEvent::Kill { mob: 502 });
        assert!(report.progressed.is_empty());

        for expected in 1..=4u32 {
            let report = engine.on_event(&content, HERO, QuestEvent::Kill { mob: 501 });
            assert_eq!(report.progressed, vec![id]);
            assert!(report.ready.is_empty());
            assert_eq!(engine.instance(id).expect("alive").progress[0], expected);
        }
        let report = engine.on_event(&content, HERO, QuestEvent::Kill { mob: 501 });
        assert_eq!(report.ready, vec![(id, true)]);
        assert_eq!(
            engine.instance(id).expect("alive").state,
            QuestState::ReadyToTurnIn
        );
        // overkill does not overflow
        let report = engine.on_event(&content, HERO, QuestEvent::Kill { mob: 501 });
        assert!(report.progressed.is_empty());
    }

    #[test]
    fn other_characters_are_unaffected() {
        let content = ContentTables::fixture();
        let mut engine = QuestEngine::default();
        let id = accept_wolf_cull(&mut engine, &content);
        engine.on_event(&content, CharacterId(2), QuestEvent::Kill { mob: 501 });
        assert_eq!(engine.instance(id).expect("alive").progress[0], 0);
    }

    #[test]
    fn rewards_grant_exactly_once() {
        let content = ContentTables::fixture();
        let mut engine = QuestEngine::default();
        let id = accept_wolf_cull(&mut engine, &content);
        for _ in 0..5 {
            engine.on_event(&content, HERO, QuestEvent::Kill { mob: 501 });
        }
        let grant = engine
            .complete(&content, id, None, None, true, 1000)
            .expect("first completion grants");
        assert_eq!(grant.experience, 500);
        assert_eq!(grant.gold, 200);
        assert_eq!(grant.items, vec![(100, 2)]);
        assert_eq!(
            engine.complete(&content, id, None, None, true, 1001),
            Err(WorldError::QuestNotReady)
        );
        assert_eq!(engine.completions_of(HERO), vec![(900, 1)]);
    }

    #[test]
    fn deferred_when_inventory_cannot_take_rewards() {
        let content = ContentTables::fixture();
        let mut engine = QuestEngine::default();
        let id = accept_wolf_cull(&mut engine, &content);
        for _ in 0..5 {
            engine.on_event(&content, HERO, QuestEvent::Kill { mob: 501 });
        }
        assert_eq!(
            engine.complete(&content, id, None, None, false, 1000),
            Err(WorldError::InventoryFull)
        );
        // still ready; retry succeeds
        engine
            .complete(&content, id, None, None, true, 2000)
            .expect("retry grants");
    }

    #[test]
    fn prereq_and_choice_rewards() {
        let content = ContentTables::fixture();
        let mut engine = QuestEngine::default();
        // 901 requires 900 complete
        assert_eq!(
            engine.accept(&content, HERO, 10, 901, 0),
            Err(WorldError::QuestPrereq)
        );
        let wolf = accept_wolf_cull(&mut engine, &content);
        for _ in 0..5 {
            engine.on_event(&content, HERO, QuestEvent::Kill { mob: 501 });
        }
        engine
            .complete(&content, wolf, None, None, true, 100)
            .expect("complete the prerequisite");

        let id = engine
            .accept(&content, HERO, 10, 901, 200)
            .expect("prereq now satisfied");
        engine.on_event(
            &content,
            HERO,
            QuestEvent::ItemAcquired {
                item: 500,
                total_held: 3,
            },
        );
        // turn-in quest: wrong npc refused, choice index required
        assert_eq!(
            engine.complete(&content, id, Some(999), Some(0), true, 300),
            Err(WorldError::QuestNotReady)
        );
        assert_eq!(
            engine.complete(&content, id, Some(2), None, true, 300),
            Err(WorldError::RequirementUnmet)
        );
        let grant = engine
            .complete(&content, id, Some(2), Some(1), true, 300)
            .expect("turn in at the collector");
        assert!(grant.items.contains(&(2, 1)));
    }

    #[test]
    fn time_limit_fails_the_instance() {
        let content = ContentTables::fixture();
        let mut engine = QuestEngine::default();
        let wolf = accept_wolf_cull(&mut engine, &content);
        for _ in 0..5 {
            engine.on_event(&content, HERO, QuestEvent::Kill { mob: 501 });
        }
        engine
            .complete(&content, wolf, None, None, true, 100)
            .expect("prereq");
        let id = engine
            .accept(&content, HERO, 10, 901, 1000)
            .expect("accept the timed quest");
        assert!(engine.expire(&content, 1000 + 29 * 60 * 1000).is_empty());
        let failed = engine.expire(&content, 1000 + 31 * 60 * 1000);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, id);
        assert_eq!(
            engine.instance(id).expect("alive").state,
            QuestState::Failed
        );
    }

    #[test]
    fn repeat_cooldown_applies() {
        let content = ContentTables::fixture();
        let mut engine = QuestEngine::default();
        let wolf = accept_wolf_cull(&mut engine, &content);
        for _ in 0..5 {
            engine.on_event(&content, HERO, QuestEvent::Kill { mob: 501 });
        }
        engine
            .complete(&content, wolf, None, None, true, 100)
            .expect("prereq");
        // 900 is not repeatable
        assert_eq!(
            engine.accept(&content, HERO, 10, 900, 200),
            Err(WorldError::QuestPrereq)
        );
        let timed = engine
            .accept(&content, HERO, 10, 901, 200)
            .expect("accept");
        engine.on_event(
            &content,
            HERO,
            QuestEvent::ItemAcquired {
                item: 500,
                total_held: 3,
            },
        );
        engine
            .complete(&content, timed, Some(2), Some(0), true, 500)
            .expect("complete");
        // repeatable, but only after an hour
        assert_eq!(
            engine.accept(&content, HERO, 10, 901, 600),
            Err(WorldError::Cooldown)
        );
        engine
            .accept(&content, HERO, 10, 901, 500 + 61 * 60 * 1000)
            .expect("cooldown elapsed");
    }
}
