//! Quest templates: prerequisites, objectives and rewards.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use tmsrv_primitives::MapId;

use crate::error::{WorldError, WorldResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ObjectiveKind {
    Kill { mob: u16, count: u32 },
    Collect { item: u16, count: u32 },
    Deliver { item: u16, npc: u32, count: u32 },
    Talk { npc: u32 },
    Visit { map: MapId, x: u16, y: u16, radius: u16 },
    UseSkill { skill: u16, count: u32 },
    UseItem { item: u16, count: u32 },
    ReachLevel { level: u16 },
}

impl ObjectiveKind {
    pub fn threshold(&self) -> u32 {
        match self {
            ObjectiveKind::Kill { count, .. }
            | ObjectiveKind::Collect { count, .. }
            | ObjectiveKind::Deliver { count, .. }
            | ObjectiveKind::UseSkill { count, .. }
            | ObjectiveKind::UseItem { count, .. } => *count,
            ObjectiveKind::Talk { .. } | ObjectiveKind::Visit { .. } => 1,
            ObjectiveKind::ReachLevel { level } => u32::from(*level),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ObjectiveDef {
    pub kind: ObjectiveKind,
    /// Optional objectives never gate completion.
    pub required: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RewardDef {
    pub experience: u64,
    pub gold: u32,
    /// Always granted; completion defers when these do not fit.
    pub items: Vec<(u16, u32)>,
    /// The player picks exactly one, by index.
    pub choice_items: Vec<(u16, u32)>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuestTemplate {
    pub id: u16,
    pub name: String,
    pub min_level: u16,
    pub max_level: u16,
    pub prereq_quests: Vec<u16>,
    /// Quests that may not be active at the same time.
    pub exclusive_quests: Vec<u16>,
    pub start_npc: u32,
    pub end_npc: u32,
    pub objectives: Vec<ObjectiveDef>,
    pub rewards: RewardDef,
    pub time_limit_ms: Option<u64>,
    pub repeatable: bool,
    /// Completes the moment the last required objective fills, without a
    /// turn-in visit.
    pub auto_complete: bool,
    pub repeat_cooldown_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuestTable {
    pub quests: HashMap<u16, QuestTemplate>,
}

impl QuestTable {
    pub fn quest(&self, id: u16) -> WorldResult<&QuestTemplate> {
        self.quests.get(&id).ok_or(WorldError::InvalidTarget)
    }

    /// The prerequisite graph must be acyclic, and every referenced quest
    /// must exist.
    pub fn validate(&self) -> WorldResult<()> {
        for (id, quest) in &self.quests {
            if *id != quest.id || quest.objectives.is_empty() {
                return Err(WorldError::InternalError);
            }
            if quest.objectives.iter().all(|o| !o.required) {
                return Err(WorldError::InternalError);
            }
            for other in quest.prereq_quests.iter().chain(&quest.exclusive_quests) {
                if !self.quests.contains_key(other) {
                    return Err(WorldError::InternalError);
                }
            }
        }
        // cycle check over prereq edges
        let mut visiting = HashMap::new();
        for id in self.quests.keys() {
            if self.has_cycle(*id, &mut visiting) {
                return Err(WorldError::InternalError);
            }
        }
        Ok(())
    }

    fn has_cycle(&self, id: u16, state: &mut HashMap<u16, bool>) -> bool {
        match state.get(&id) {
            Some(true) => return true,  // on the current path
            Some(false) => return false, // finished earlier
            None => (),
        }
        state.insert(id, true);
        if let Some(quest) = self.quests.get(&id) {
            for prereq in &quest.prereq_quests {
                if self.has_cycle(*prereq, state) {
                    return true;
                }
            }
        }
        state.insert(id, false);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quest(id: u16, prereqs: Vec<u16>) -> QuestTemplate {
        QuestTemplate {
            id,
            name: format!("quest-{id}"),
            min_level: 1,
            max_level: 400,
            prereq_quests: prereqs,
            exclusive_quests: vec![],
            start_npc: 1,
            end_npc: 1,
            objectives: vec![ObjectiveDef {
                kind: ObjectiveKind::Kill { mob: 1, count: 1 },
                required: true,
            }],
            rewards: RewardDef::default(),
            time_limit_ms: None,
            repeatable: false,
            auto_complete: true,
            repeat_cooldown_ms: 0,
        }
    }

    #[test]
    fn prereq_cycles_are_rejected() {
        let mut quests = HashMap::new();
        quests.insert(1, quest(1, vec![2]));
        quests.insert(2, quest(2, vec![1]));
        let table = QuestTable { quests };
        assert_eq!(table.validate(), Err(WorldError::InternalError));
    }

    #[test]
    fn prereq_dag_is_accepted() {
        let mut quests = HashMap::new();
        quests.insert(1, quest(1, vec![]));
        quests.insert(2, quest(2, vec![1]));
        quests.insert(3, quest(3, vec![1, 2]));
        let table = QuestTable { quests };
        table.validate().expect("a dag should validate");
    }
}
