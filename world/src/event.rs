//! Timed world events: a priority queue over next-fire times with
//! recurrence, plus participant scoring for competitive events.
use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
};

use tmsrv_primitives::{CharacterId, MapId};

use crate::error::{WorldError, WorldResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Recurrence {
    Once,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    /// Fixed custom period.
    EveryMs(u64),
}

impl Recurrence {
    fn period_ms(&self) -> Option<u64> {
        const DAY: u64 = 24 * 60 * 60 * 1000;
        match self {
            Recurrence::Once => None,
            Recurrence::Daily => Some(DAY),
            Recurrence::Weekly => Some(7 * DAY),
            Recurrence::Monthly => Some(30 * DAY),
            Recurrence::Yearly => Some(365 * DAY),
            Recurrence::EveryMs(period) => Some((*period).max(1)),
        }
    }
}

/// What firing an event asks the tick to do.
#[derive(Clone, Debug, PartialEq)]
pub enum EventAction {
    Announce(String),
    SpawnWave {
        map: MapId,
        template: u16,
        count: u16,
        x: u16,
        y: u16,
    },
    /// Experience rate change, permille, until the event's end.
    ExpRate(u32),
    /// Open scoring for a competitive event instance.
    OpenScoring { duration_ms: u64 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScheduledEvent {
    pub id: u32,
    pub name: String,
    pub recurrence: Recurrence,
    pub action: EventAction,
}

#[derive(Default)]
pub struct EventScheduler {
    events: HashMap<u32, ScheduledEvent>,
    /// Min-heap on next fire time.
    queue: BinaryHeap<Reverse<(u64, u32)>>,
    next_id: u32,
}

impl EventScheduler {
    pub fn schedule(
        &mut self,
        name: impl Into<String>,
        first_fire_ms: u64,
        recurrence: Recurrence,
        action: EventAction,
    ) -> u32 {
        self.next_id += 1;
        let id = self.next_id;
        self.events.insert(
            id,
            ScheduledEvent {
                id,
                name: name.into(),
                recurrence,
                action,
            },
        );
        self.queue.push(Reverse((first_fire_ms, id)));
        id
    }

    pub fn cancel(&mut self, id: u32) -> bool {
        // the heap entry stays and is skipped when popped
        self.events.remove(&id).is_some()
    }

    /// Pops every event due at `now_ms`, requeueing recurring ones.
    pub fn fire_due(&mut self, now_ms: u64) -> Vec<ScheduledEvent> {
        let mut fired = Vec::new();
        while let Some(Reverse((at, id))) = self.queue.peek().copied() {
            if at > now_ms {
                break;
            }
            self.queue.pop();
            let Some(event) = self.events.get(&id) else {
                continue; // cancelled
            };
            fired.push(event.clone());
            match event.recurrence.period_ms() {
                Some(period) => self.queue.push(Reverse((at + period, id))),
                None => {
                    self.events.remove(&id);
                }
            }
        }
        fired
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// A running competitive event: registration, scoring, and a reward split
/// under the same discipline as quest rewards (granted exactly once).
pub struct EventInstance {
    pub event: u32,
    pub ends_at_ms: u64,
    scores: HashMap<CharacterId, u64>,
    rewarded: bool,
}

impl EventInstance {
    pub fn new(event: u32, now_ms: u64, duration_ms: u64) -> Self {
        Self {
            event,
            ends_at_ms: now_ms + duration_ms,
            scores: HashMap::new(),
            rewarded: false,
        }
    }

    pub fn register(&mut self, who: CharacterId) {
        self.scores.entry(who).or_insert(0);
    }

    pub fn add_score(&mut self, who: CharacterId, points: u64) -> WorldResult<()> {
        match self.scores.get_mut(&who) {
            Some(score) => {
                *score += points;
                Ok(())
            }
            None => Err(WorldError::RequirementUnmet),
        }
    }

    pub fn is_over(&self, now_ms: u64) -> bool {
        now_ms >= self.ends_at_ms
    }

    /// Final standings, best first. Consumes the single reward grant; a
    /// second call yields nothing.
    pub fn take_standings(&mut self) -> Option<Vec<(CharacterId, u64)>> {
        if self.rewarded {
            return None;
        }
        self.rewarded = true;
        let mut standings: Vec<(CharacterId, u64)> =
            self.scores.iter().map(|(who, score)| (*who, *score)).collect();
        standings.sort_by(|a, b| b.1.cmp(&a.1).then(a.0 .0.cmp(&b.0 .0)));
        Some(standings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_time_order() {
        let mut scheduler = EventScheduler::default();
        scheduler.schedule(
            "late",
            2000,
            Recurrence::Once,
            EventAction::Announce("late".into()),
        );
        scheduler.schedule(
            "early",
            1000,
            Recurrence::Once,
            EventAction::Announce("early".into()),
        );
        assert!(scheduler.fire_due(500).is_empty());
        let fired = scheduler.fire_due(2500);
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].name, "early");
        assert_eq!(fired[1].name, "late");
        assert!(scheduler.is_empty());
    }

    #[test]
    fn recurring_events_requeue() {
        let mut scheduler = EventScheduler::default();
        scheduler.schedule(
            "harvest moon",
            1000,
            Recurrence::EveryMs(500),
            EventAction::ExpRate(1500),
        );
        assert_eq!(scheduler.fire_due(1000).len(), 1);
        assert_eq!(scheduler.fire_due(1499).len(), 0);
        assert_eq!(scheduler.fire_due(1500).len(), 1);
        assert_eq!(scheduler.fire_due(2600).len(), 2, "catches up missed periods");
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn cancelled_events_do_not_fire() {
        let mut scheduler = EventScheduler::default();
        let id = scheduler.schedule(
            "aborted",
            1000,
            Recurrence::Daily,
            EventAction::Announce("never".into()),
        );
        assert!(scheduler.cancel(id));
        assert!(scheduler.fire_due(5000).is_empty());
        assert!(!scheduler.cancel(id));
    }

    #[test]
    fn scoring_rewards_exactly_once() {
        let mut instance = EventInstance::new(1, 0, 10_000);
        instance.register(CharacterId(1));
        instance.register(CharacterId(2));
        instance.add_score(CharacterId(1), 30).expect("registered");
        instance.add_score(CharacterId(2), 70).expect("registered");
        assert_eq!(
            instance.add_score(CharacterId(3), 10),
            Err(WorldError::RequirementUnmet),
            "unregistered characters do not score"
        );
        assert!(!instance.is_over(9999));
        assert!(instance.is_over(10_000));
        let standings = instance.take_standings().expect("first call wins");
        assert_eq!(standings, vec![(CharacterId(2), 70), (CharacterId(1), 30)]);
        assert!(instance.take_standings().is_none(), "rewards never repeat");
    }
}
