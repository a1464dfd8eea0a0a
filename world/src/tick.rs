//! The world tick: the single writer of all authoritative state.
//!
//! Every phase of a step runs in a fixed order: session intake, movement
//! intents, mob AI, queued combat intents, status-effect pulses, timed
//! sweeps (quests, trades, auctions, events, autosave), and finally the
//! outbox flush. I/O workers only ever talk to the tick through channels.
use std::{collections::HashMap, sync::Arc};

use futures::{channel::mpsc as fmpsc, StreamExt};
use log::{debug, info, warn};
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use tokio::sync::mpsc;

use network_session::{
    packets::{
        AttackResult, ChatNotify, ClientPacket, DeathNotify, DespawnNotify, ErrorNotify,
        GoldUpdate, GroundItemNotify, InventorySlotUpdate, KickNotify, MoveNotify, RespawnNotify,
        ServerPacket, SpawnNotify, StatsUpdate,
    },
    SessionCommand, SessionEvent, SessionHandle, SessionId,
};
use tmsrv_primitives::{CharacterId, ItemInstance, MobId, Position, WireName};

use crate::{
    ai::{self, Mob, MobAction, MobEvent, PerceivedTarget},
    audit::{AuditEvent, AuditLog},
    character::Character,
    combat::{self, status::EffectPulse, CombatantView},
    config::WorldConfig,
    content::ContentTables,
    error::{WorldError, WorldResult},
    loot::{self, GroundItems, LootRight},
    market::{MarketManager, Payout, PayoutReason},
    persistence::{CharacterSnapshot, Record, RecordKind},
    player::{IdleVerdict, PlayerManager},
    quest::{QuestEngine, QuestEvent},
    security::{SecurityAction, SecurityManager, ViolationKind},
    social::{guild::GuildManager, party::PartyManager},
    spatial::SpatialIndex,
    trade::TradeManager,
    event::{EventAction, EventScheduler},
    LOG_TARGET,
};

/// Dead characters stand up again after this long.
const RESPAWN_DELAY_MS: u64 = 5000;
/// Largest legal move per movement packet, in cells.
const MAX_MOVE_CELLS: u16 = 3;

/// Per-session bookkeeping owned by the tick.
pub struct SessionEntry {
    pub handle: SessionHandle,
    pub character: Option<CharacterId>,
}

pub struct World {
    pub config: WorldConfig,
    pub content: Arc<ContentTables>,
    pub players: PlayerManager,
    pub spatial: SpatialIndex,
    pub ground: GroundItems,
    pub trades: TradeManager,
    pub market: MarketManager,
    pub parties: PartyManager,
    pub guilds: GuildManager,
    pub quests: QuestEngine,
    pub scheduler: EventScheduler,
    pub security: SecurityManager,
    pub audit: AuditLog,
    pub mobs: HashMap<MobId, Mob>,
    persistence: mpsc::Sender<Vec<Record>>,
    sessions: HashMap<SessionId, SessionEntry>,
    outbox: Vec<(SessionId, ServerPacket)>,
    pub now_ms: u64,
    tick_index: u64,
    last_autosave_ms: u64,
    next_mob_id: u32,
    pub exp_rate_permille: u32,
    dead_characters: HashMap<CharacterId, u64>,
    /// A running competitive event, when one is open.
    pub scoring: Option<crate::event::EventInstance>,
}

impl World {
    pub fn new(
        config: WorldConfig,
        content: Arc<ContentTables>,
        audit: AuditLog,
        persistence: mpsc::Sender<Vec<Record>>,
    ) -> Self {
        let mut world = Self {
            security: SecurityManager::new(config.violation_window),
            config,
            content,
            players: PlayerManager::default(),
            spatial: SpatialIndex::new(),
            ground: GroundItems::default(),
            trades: TradeManager::default(),
            market: MarketManager::default(),
            parties: PartyManager::default(),
            guilds: GuildManager::default(),
            quests: QuestEngine::default(),
            scheduler: EventScheduler::default(),
            audit,
            mobs: HashMap::new(),
            persistence,
            sessions: HashMap::new(),
            outbox: Vec::new(),
            now_ms: 0,
            tick_index: 0,
            last_autosave_ms: 0,
            next_mob_id: 0,
            exp_rate_permille: 1000,
            dead_characters: HashMap::new(),
            scoring: None,
        };
        world.spawn_initial_mobs();
        world
    }

    /// Deterministic per-tick RNG: replaying the same seed and tick index
    /// reproduces every combat, drop and refine roll.
    pub fn tick_rng(&self) -> Pcg64Mcg {
        Pcg64Mcg::seed_from_u64(self.config.rng_seed ^ self.tick_index)
    }

    fn spawn_initial_mobs(&mut self) {
        let content = self.content.clone();
        for spawn in &content.mobs.spawns {
            for _ in 0..spawn.count {
                if let Ok(template) = content.mobs.template(spawn.template) {
                    self.spawn_mob_at(
                        template.id,
                        Position::new(spawn.map, spawn.x, spawn.y),
                        spawn.patrol.clone(),
                    );
                }
            }
        }
    }

    pub fn spawn_mob_at(
        &mut self,
        template_id: u16,
        home: Position,
        patrol: Vec<(u16, u16)>,
    ) -> Option<MobId> {
        let template = self.content.clone().mobs.template(template_id).ok()?.clone();
        self.next_mob_id += 1;
        let id = MobId(self.next_mob_id);
        let mob = Mob::new(id, &template, home, patrol);
        self.spatial.insert_mob(id, &home);
        self.broadcast_near(
            &home,
            ServerPacket::SpawnNotify(SpawnNotify {
                unit_kind: 1,
                reserved: 0,
                template: template_id,
                unit: id.0,
                x: home.x,
                y: home.y,
                name: WireName::from_str(&template.name),
            }),
            None,
        );
        self.mobs.insert(id, mob);
        Some(id)
    }

    // --- session plumbing ----------------------------------------------

    pub fn session_opened(&mut self, handle: SessionHandle) {
        debug!(target: LOG_TARGET, "{} opened for {}.", handle.session, handle.account);
        self.sessions.insert(
            handle.session,
            SessionEntry {
                handle,
                character: None,
            },
        );
    }

    pub fn session_closed(&mut self, session: SessionId) {
        let Some(entry) = self.sessions.remove(&session) else {
            return;
        };
        if let Some(character) = entry.character {
            self.depart_world(character, true);
        }
        debug!(target: LOG_TARGET, "{} closed.", session);
    }

    pub fn session_violation(
        &mut self,
        session: SessionId,
        account: Option<tmsrv_primitives::AccountId>,
        kind: ViolationKind,
    ) {
        let Some(account) = account.or_else(|| {
            self.sessions
                .get(&session)
                .map(|entry| entry.handle.account)
        }) else {
            return;
        };
        let action = self.security.record_violation(account, kind, self.now_ms);
        self.audit.record(
            self.now_ms,
            AuditEvent::ViolationRecorded {
                account,
                kind: violation_name(kind),
                action: action_name(action),
            },
        );
        match action {
            SecurityAction::Disconnect
            | SecurityAction::TempBan { .. }
            | SecurityAction::PermBan => self.kick_session(session, 2),
            SecurityAction::Log
            | SecurityAction::Warn
            | SecurityAction::BlockPacket
            | SecurityAction::RateLimit => (),
        }
    }

    pub fn kick_session(&mut self, session: SessionId, reason: u16) {
        if let Some(entry) = self.sessions.get(&session) {
            let _ = entry.handle.sender.unbounded_send(SessionCommand::Kick(
                ServerPacket::KickNotify(KickNotify {
                    reason,
                    reserved: 0,
                }),
            ));
            entry
                .handle
                .state
                .set(network_session::session::LifecycleState::Closing);
        }
    }

    pub fn session_account(
        &self,
        session: SessionId,
    ) -> Option<tmsrv_primitives::AccountId> {
        self.sessions.get(&session).map(|entry| entry.handle.account)
    }

    pub(crate) fn set_session_state(
        &mut self,
        session: SessionId,
        state: network_session::session::LifecycleState,
    ) {
        if let Some(entry) = self.sessions.get(&session) {
            entry.handle.state.set(state);
        }
    }

    pub(crate) fn set_session_character(
        &mut self,
        session: SessionId,
        character: Option<CharacterId>,
    ) {
        if let Some(entry) = self.sessions.get_mut(&session) {
            entry.character = character;
        }
    }

    /// Voluntary exit back to character select; the connection stays.
    pub(crate) fn leave_world(&mut self, character: CharacterId) {
        self.depart_world(character, true);
    }

    // --- outbox ---------------------------------------------------------

    pub fn send_to(&mut self, session: SessionId, packet: ServerPacket) {
        self.outbox.push((session, packet));
    }

    pub fn send_to_character(&mut self, character: CharacterId, packet: ServerPacket) {
        if let Some(session) = self.players.session_of(character) {
            self.send_to(session, packet);
        }
    }

    pub fn send_error(&mut self, session: SessionId, error: WorldError) {
        self.send_to(
            session,
            ServerPacket::ErrorNotify(ErrorNotify {
                code: error.client_code(),
                reserved: 0,
            }),
        );
    }

    /// AoI multicast around a position; packets are batched in the outbox
    /// until the flush phase.
    pub fn broadcast_near(
        &mut self,
        center: &Position,
        packet: ServerPacket,
        exclude: Option<CharacterId>,
    ) {
        let radius = self.config.aoi_radius;
        let candidates = self.spatial.characters_near(center, radius);
        for candidate in candidates {
            if Some(candidate) == exclude {
                continue;
            }
            let Ok(other) = self.players.get(candidate) else {
                continue;
            };
            if other.position.distance(center) <= radius {
                self.send_to_character(candidate, packet.clone());
            }
        }
    }

    pub fn broadcast_all(&mut self, packet: ServerPacket) {
        let sessions: Vec<SessionId> = self.sessions.keys().copied().collect();
        for session in sessions {
            self.send_to(session, packet.clone());
        }
    }

    fn flush_outbox(&mut self) {
        for (session, packet) in self.outbox.drain(..) {
            if let Some(entry) = self.sessions.get(&session) {
                let _ = entry
                    .handle
                    .sender
                    .unbounded_send(SessionCommand::Send(packet));
            }
        }
    }

    // --- the step -------------------------------------------------------

    /// One simulation step at `now_ms`. Phases run in a strict order; no
    /// subsystem observes another's partial state within a phase.
    pub fn step(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
        self.tick_index += 1;

        // phase 1: drain session inboxes into intents
        let mut movement = Vec::new();
        let mut actions = Vec::new();
        let sessions: Vec<SessionId> = self.sessions.keys().copied().collect();
        for session in sessions {
            let Some(entry) = self.sessions.get_mut(&session) else {
                continue;
            };
            while let Ok(packet) = entry.handle.inbox.try_recv() {
                match packet {
                    ClientPacket::Move(m) => movement.push((session, m)),
                    other => actions.push((session, other)),
                }
            }
        }

        // phase 2: movement and collision
        for (session, m) in movement {
            if let Err(e) = self.handle_move(session, m) {
                self.send_error(session, e);
            }
        }

        // phase 3: mob AI
        self.step_mobs();

        // phase 4: combat and all other intents, in arrival order
        for (session, packet) in actions {
            self.dispatch(session, packet);
        }

        // phase 5: status-effect pulses and expiries
        self.step_status_effects();

        // phase 6: timed state
        self.step_timers();

        // phase 7: hand the outbox to the i/o workers
        self.flush_outbox();
    }

    fn step_mobs(&mut self) {
        let content = self.content.clone();
        let mob_ids: Vec<MobId> = self.mobs.keys().copied().collect();
        let mut rng = self.tick_rng();
        for id in mob_ids {
            let Some(mut mob) = self.mobs.remove(&id) else {
                continue;
            };
            let Ok(template) = content.mobs.template(mob.template) else {
                self.mobs.insert(id, mob);
                continue;
            };
            if !mob.is_alive() {
                self.mobs.insert(id, mob);
                continue;
            }
            // decay old grudges a little every tick
            mob.threat.decay(5);

            let perceived: Vec<PerceivedTarget> = self
                .spatial
                .characters_near(&mob.position, template.brain.sight_range)
                .into_iter()
                .filter_map(|character| self.players.get(character).ok())
                .filter(|c| !c.dead && c.position.distance(&mob.position) <= template.brain.sight_range)
                .map(|c| PerceivedTarget {
                    character: c.id,
                    position: c.position,
                    hp_permille: (u64::from(c.hp) * 1000
                        / u64::from(c.derived.max_hp.max(1))) as u32,
                })
                .collect();

            // forget attackers that are gone from perception and range
            let visible: Vec<CharacterId> = perceived.iter().map(|t| t.character).collect();
            let lost: Vec<CharacterId> = self
                .players
                .ids()
                .into_iter()
                .filter(|c| mob.threat.threat_of(*c) > 0 && !visible.contains(c))
                .filter(|c| {
                    !self
                        .players
                        .get(*c)
                        .map(|c| c.position.distance(&mob.position) <= template.brain.leash_radius)
                        .unwrap_or(false)
                })
                .collect();
            for who in lost {
                ai::on_event(&mut mob, template, MobEvent::TargetLost { who });
            }

            let roll = (self.tick_index as usize).wrapping_add(id.0 as usize);
            match ai::decide(&mut mob, template, &perceived, self.now_ms, roll) {
                MobAction::None => (),
                MobAction::MoveTowards(next) => self.move_mob(&mut mob, next),
                MobAction::ReturnHome => {
                    let next = ai::step_towards(
                        &mob.position,
                        &mob.home,
                        template.move_cells_per_tick.max(2),
                    );
                    self.move_mob(&mut mob, next);
                }
                MobAction::Attack(target) => {
                    mob.next_attack_ms = self.now_ms + 1000;
                    self.mob_attack(&mut mob, template, target, &mut rng);
                }
                MobAction::CastSkill { skill, target } => {
                    if let Ok(template_skill) = content.skills.skill(skill) {
                        mob.skill_cooldowns
                            .insert(skill, self.now_ms + u64::from(template_skill.cooldown_ms));
                        mob.next_attack_ms = self.now_ms + 1000;
                        self.mob_attack(&mut mob, template, target, &mut rng);
                    }
                }
            }
            self.mobs.insert(id, mob);
        }
    }

    fn move_mob(&mut self, mob: &mut Mob, next: Position) {
        let content = self.content.clone();
        let Ok(map) = content.maps.map(next.map) else {
            return;
        };
        if !map.is_walkable(next.x, next.y) {
            return;
        }
        let from = mob.position;
        self.spatial.move_mob(mob.id, &from, &next);
        mob.position = next;
        self.broadcast_near(
            &next,
            ServerPacket::MoveNotify(MoveNotify {
                unit_kind: 1,
                reserved: [0; 3],
                unit: mob.id.0,
                x: next.x,
                y: next.y,
            }),
            None,
        );
    }

    fn mob_attack(
        &mut self,
        mob: &mut Mob,
        template: &crate::content::MobTemplate,
        target: CharacterId,
        rng: &mut Pcg64Mcg,
    ) {
        let Ok(character) = self.players.get(target) else {
            return;
        };
        if character.dead || character.position.distance(&mob.position) > template.attack_range {
            return;
        }
        let zone = self
            .content
            .maps
            .map(character.position.map)
            .map(|m| m.zone_flags(character.position.x, character.position.y));
        if matches!(zone, Ok(flags) if flags.sanctuary) {
            return;
        }

        let attacker_view = CombatantView {
            level: template.level,
            attack_min: template.attack_min,
            attack_max: template.attack_max,
            defense: template.defense,
            ..CombatantView::default()
        };
        let target_view = view_of_character(character);
        let resolution = combat::resolve_attack(
            rng,
            &self.content.skills.combat,
            &attacker_view,
            &target_view,
            crate::content::DamageType::Physical,
            None,
        );
        let damage = resolution.damage;
        let position = character.position;
        let (hp_after, died, interrupted) = {
            let character = self.players.get_mut(target).expect("present above; qed");
            character.apply_damage(damage);
            let interrupted = character.casting.is_some()
                && combat::cast_interrupted_by(damage, self.config.cast_interrupt_damage);
            if interrupted {
                character.casting = None;
            }
            (character.hp, character.dead, interrupted)
        };
        if interrupted {
            debug!(target: LOG_TARGET, "{} cast interrupted by damage.", target);
        }
        self.players.mark_dirty(target);
        self.broadcast_near(
            &position,
            ServerPacket::AttackResult(AttackResult {
                attacker_kind: 1,
                target_kind: 0,
                outcome: resolution.outcome.wire_code(),
                reserved: 0,
                attacker: mob.id.0,
                target: target.0,
                damage,
                target_hp: hp_after,
            }),
            None,
        );
        if died {
            self.on_character_death(target);
        }
    }

    /// Death of a player: experience loss, alignment item drops, respawn
    /// scheduling, aggro release.
    pub(crate) fn on_character_death(&mut self, character_id: CharacterId) {
        let content = self.content.clone();
        let Ok(character) = self.players.get_mut(character_id) else {
            return;
        };
        let position = character.position;
        let lost = character.lose_experience_on_death(self.config.death_xp_loss_permille);
        // negative alignment drops a droppable item
        let mut dropped: Option<ItemInstance> = None;
        if character.alignment < 0 {
            for index in 0..tmsrv_primitives::INVENTORY_SLOTS {
                let at = crate::items::SlotRef::inventory(index as u8);
                let Ok(slot) = character.containers.slot(at) else {
                    continue;
                };
                if slot.is_empty() || character.containers.is_locked(at) {
                    continue;
                }
                if content.items.flags(slot.item_id).droppable {
                    let item = *slot;
                    let _ = character.containers.remove_count(at, item.value);
                    dropped = Some(item);
                    break;
                }
            }
        }
        self.players.mark_dirty(character_id);
        debug!(
            target: LOG_TARGET,
            "{} died, lost {} exp.", character_id, lost
        );
        if let Some(item) = dropped {
            self.drop_on_ground(item, position, LootRight::Anyone);
        }
        for mob in self.mobs.values_mut() {
            mob.threat.remove(character_id);
        }
        self.dead_characters.insert(character_id, self.now_ms + RESPAWN_DELAY_MS);
        self.broadcast_near(
            &position,
            ServerPacket::DeathNotify(DeathNotify {
                unit_kind: 0,
                reserved: [0; 3],
                unit: character_id.0,
            }),
            None,
        );
    }

    pub fn drop_on_ground(&mut self, item: ItemInstance, position: Position, right: LootRight) {
        let id = self.ground.place(
            item,
            position,
            right,
            self.now_ms + self.config.loot_right_window.as_millis() as u64,
            self.now_ms + self.config.ground_item_ttl.as_millis() as u64,
        );
        self.spatial.insert_ground_item(id, &position);
        self.broadcast_near(
            &position,
            ServerPacket::GroundItemNotify(GroundItemNotify {
                ground_id: id.0,
                item_id: item.item_id,
                x: position.x,
                y: position.y,
                gone: 0,
                reserved: 0,
            }),
            None,
        );
    }

    /// Death of a mob at a player's hands: exp split, loot, quest hooks.
    pub fn on_mob_death(&mut self, mob_id: MobId, killer: CharacterId) {
        let content = self.content.clone();
        let Some(mob) = self.mobs.get(&mob_id) else {
            return;
        };
        let Ok(template) = content.mobs.template(mob.template) else {
            return;
        };
        let template = template.clone();
        let position = mob.position;
        let contributions: Vec<(CharacterId, u64)> = self
            .players
            .ids()
            .into_iter()
            .filter_map(|id| {
                let threat = mob.threat.threat_of(id);
                (threat > 0).then_some((id, threat))
            })
            .collect();

        self.audit.record(
            self.now_ms,
            AuditEvent::MobKilled {
                mob: mob_id,
                template: template.id,
                by: killer,
            },
        );

        // experience split per party policy
        let exp = u64::from(template.experience) * u64::from(self.exp_rate_permille) / 1000;
        self.grant_kill_experience(killer, exp, &contributions);

        // loot: items under the party's loot rights, gold straight to the
        // killer
        let mut rng = self.tick_rng();
        let drops = loot::roll_drops(&mut rng, &content.mobs, &content.items, &template);
        let right = self.loot_right_for(killer);
        for item in drops {
            self.audit.record(
                self.now_ms,
                AuditEvent::ItemCreated {
                    owner: killer,
                    item_id: item.item_id,
                    count: item.value,
                    source: "drop",
                },
            );
            self.drop_on_ground(item, position, right);
        }
        let gold = loot::roll_gold(&mut rng, &template);
        if gold > 0 {
            if let Ok(character) = self.players.get_mut(killer) {
                if character.add_gold(gold).is_ok() {
                    self.audit.record(
                        self.now_ms,
                        AuditEvent::GoldDelta {
                            owner: killer,
                            delta: i64::from(gold),
                            reason: "mob gold",
                        },
                    );
                    self.push_gold_update(killer);
                }
            }
        }

        // competitive event scoring follows kill credit
        if let Some(instance) = self.scoring.as_mut() {
            let _ = instance.add_score(killer, exp.max(1));
        }

        // quest kill hooks for everyone on the threat table, killer first
        let mut hooked: Vec<CharacterId> = vec![killer];
        hooked.extend(
            contributions
                .iter()
                .map(|(id, _)| *id)
                .filter(|id| *id != killer),
        );
        for character in hooked {
            let report =
                self.quests
                    .on_event(&content, character, QuestEvent::Kill { mob: template.id });
            self.notify_quest_report(character, report);
        }

        // release the corpse and schedule the respawn
        if let Some(mob) = self.mobs.get_mut(&mob_id) {
            mob.state = ai::MobState::Dead;
            mob.hp = 0;
            mob.threat.clear();
            mob.respawn_at_ms = Some(
                self.now_ms
                    + u64::from(
                        content
                            .mobs
                            .spawns
                            .iter()
                            .find(|s| s.template == template.id)
                            .map(|s| s.respawn_secs)
                            .unwrap_or(30),
                    ) * 1000,
            );
        }
        self.spatial.remove_mob(mob_id, &position);
        self.broadcast_near(
            &position,
            ServerPacket::DespawnNotify(DespawnNotify {
                unit_kind: 1,
                reserved: [0; 3],
                unit: mob_id.0,
            }),
            None,
        );
    }

    fn loot_right_for(&mut self, killer: CharacterId) -> LootRight {
        use crate::social::party::LootPolicy;
        let Some(party_id) = self.players.get(killer).ok().and_then(|c| c.party) else {
            return LootRight::Character(killer);
        };
        let present: Vec<CharacterId> = self
            .parties
            .get(party_id)
            .map(|p| {
                p.members
                    .iter()
                    .copied()
                    .filter(|m| self.players.is_online(*m))
                    .collect()
            })
            .unwrap_or_default();
        let Ok(party) = self.parties.get_mut(party_id) else {
            return LootRight::Character(killer);
        };
        match party.loot_policy {
            LootPolicy::FreeForAll => LootRight::Character(killer),
            LootPolicy::Master => LootRight::Character(
                party.master_looter.unwrap_or(party.leader),
            ),
            LootPolicy::RoundRobin => party
                .next_round_robin(&present)
                .map(LootRight::Character)
                .unwrap_or(LootRight::Party(party_id)),
            LootPolicy::Group | LootPolicy::NeedBeforeGreed => LootRight::Party(party_id),
        }
    }

    fn grant_kill_experience(
        &mut self,
        killer: CharacterId,
        exp: u64,
        contributions: &[(CharacterId, u64)],
    ) {
        use crate::social::party::{split_experience, ExpShareInput};
        let content = self.content.clone();
        let party_id = self.players.get(killer).ok().and_then(|c| c.party);
        let shares: Vec<(CharacterId, u64)> = match party_id.and_then(|id| self.parties.get(id).ok())
        {
            Some(party) => {
                let killer_map = self
                    .players
                    .get(killer)
                    .map(|c| c.position.map)
                    .unwrap_or_default();
                let inputs: Vec<ExpShareInput> = party
                    .members
                    .iter()
                    .filter_map(|member| self.players.get(*member).ok())
                    .filter(|c| {
                        self.players.is_online(c.id)
                            && !c.dead
                            && c.position.map == killer_map
                    })
                    .map(|c| ExpShareInput {
                        character: c.id,
                        level: c.level,
                        contribution: contributions
                            .iter()
                            .find(|(id, _)| *id == c.id)
                            .map(|(_, threat)| *threat)
                            .unwrap_or(0),
                    })
                    .collect();
                split_experience(exp, party.exp_policy, &inputs)
            }
            None => vec![(killer, exp)],
        };
        for (character_id, share) in shares {
            if share == 0 {
                continue;
            }
            let leveled = match self.players.get_mut(character_id) {
                Ok(character) => {
                    let leveled = character.gain_experience(&content, share);
                    self.players.mark_dirty(character_id);
                    leveled
                }
                Err(_) => continue,
            };
            self.push_stats_update(character_id);
            if leveled {
                let level = self.players.get(character_id).map(|c| c.level).unwrap_or(0);
                let report = self.quests.on_event(
                    &content,
                    character_id,
                    QuestEvent::LevelReached { level },
                );
                self.notify_quest_report(character_id, report);
            }
        }
    }

    fn step_status_effects(&mut self) {
        let content = self.content.clone();
        // characters
        let ids = self.players.ids();
        for id in ids {
            let (pulses, expired, died) = {
                let Ok(character) = self.players.get_mut(id) else {
                    continue;
                };
                if character.dead {
                    continue;
                }
                let (pulses, expired) = character.status.advance(self.now_ms);
                if pulses.is_empty() && expired.is_empty() {
                    continue;
                }
                for pulse in &pulses {
                    match pulse {
                        EffectPulse::Damage { amount, .. } => character.apply_damage(*amount),
                        EffectPulse::Heal { amount, .. } => character.apply_heal(*amount),
                    }
                }
                if !expired.is_empty() {
                    character.recompute_with_equipment(&content);
                }
                (pulses, expired, character.dead)
            };
            if !pulses.is_empty() || !expired.is_empty() {
                self.players.mark_dirty(id);
                self.push_stats_update(id);
            }
            if died {
                self.on_character_death(id);
            }
        }
        // mobs: pulses only; a dot can kill, credited to the effect source
        let mob_ids: Vec<MobId> = self.mobs.keys().copied().collect();
        for id in mob_ids {
            let Some(mob) = self.mobs.get_mut(&id) else {
                continue;
            };
            if !mob.is_alive() {
                continue;
            }
            let (pulses, _) = mob.status.advance(self.now_ms);
            let mut killer = None;
            for pulse in pulses {
                if let EffectPulse::Damage { amount, .. } = pulse {
                    mob.hp = mob.hp.saturating_sub(amount);
                    if mob.hp == 0 {
                        killer = mob.threat.top_contributor().map(|(who, _)| who);
                        break;
                    }
                }
            }
            if mob.hp == 0 {
                if let Some(killer) = killer {
                    self.on_mob_death(id, killer);
                }
            }
        }
    }

    fn step_timers(&mut self) {
        let content = self.content.clone();

        // finished casts resolve before anything else expires
        self.complete_casts();

        // respawns: characters
        let due: Vec<CharacterId> = self
            .dead_characters
            .iter()
            .filter(|(_, at)| **at <= self.now_ms)
            .map(|(id, _)| *id)
            .collect();
        for id in due {
            self.dead_characters.remove(&id);
            self.respawn_character(id);
        }

        // respawns: mobs
        let due: Vec<MobId> = self
            .mobs
            .values()
            .filter(|m| m.respawn_at_ms.map(|at| at <= self.now_ms).unwrap_or(false))
            .map(|m| m.id)
            .collect();
        for id in due {
            if let Some(mob) = self.mobs.get_mut(&id) {
                if let Ok(template) = content.mobs.template(mob.template) {
                    mob.hp = template.max_hp;
                    mob.state = ai::MobState::Idle;
                    mob.respawn_at_ms = None;
                    mob.position = mob.home;
                    let home = mob.home;
                    let template_id = mob.template;
                    let name = template.name.clone();
                    self.spatial.insert_mob(id, &home);
                    self.broadcast_near(
                        &home,
                        ServerPacket::SpawnNotify(SpawnNotify {
                            unit_kind: 1,
                            reserved: 0,
                            template: template_id,
                            unit: id.0,
                            x: home.x,
                            y: home.y,
                            name: WireName::from_str(&name),
                        }),
                        None,
                    );
                }
            }
        }

        // ground item despawns
        for gone in self.ground.expire(self.now_ms) {
            self.spatial.remove_ground_item(gone.id, &gone.position);
            self.broadcast_near(
                &gone.position,
                ServerPacket::GroundItemNotify(GroundItemNotify {
                    ground_id: gone.id.0,
                    item_id: gone.item.item_id,
                    x: gone.position.x,
                    y: gone.position.y,
                    gone: 1,
                    reserved: 0,
                }),
                None,
            );
            self.audit.record(
                self.now_ms,
                AuditEvent::ItemDestroyed {
                    owner: CharacterId(0),
                    item_id: gone.item.item_id,
                    count: gone.item.value,
                    reason: "ground ttl",
                },
            );
        }

        // trade timeouts
        for trade in self.trades.expired(self.now_ms) {
            self.cancel_trade(trade);
        }
        self.trades.sweep_terminal();

        // party and guild invitation expiry
        self.parties.expire_invitations(self.now_ms);
        self.guilds.expire_invitations(self.now_ms);

        // market and auctions
        self.market.sweep_listings(self.now_ms);
        for auction in self.market.due_auctions(self.now_ms) {
            match self.market.finalize_auction(auction, self.now_ms, &content.economy) {
                Ok(Some(outcome)) => {
                    debug!(target: LOG_TARGET, "Auction {:?} settled: {:?}.", auction, outcome);
                }
                Ok(None) => (),
                Err(e) => warn!(target: LOG_TARGET, "Auction settle failed: {}.", e),
            }
        }
        self.deliver_payouts();

        // quest deadlines: strip quest items with the failure
        for (instance, character, quest) in self.quests.expire(&content, self.now_ms) {
            if let Ok(template) = content.quests.quest(quest) {
                for objective in &template.objectives {
                    if let crate::content::ObjectiveKind::Collect { item, .. }
                    | crate::content::ObjectiveKind::Deliver { item, .. } = objective.kind
                    {
                        if let Ok(c) = self.players.get_mut(character) {
                            let held = c.containers.count_in_inventory(item);
                            if held > 0 {
                                let _ = c.containers.consume_from_inventory(item, held);
                                self.players.mark_dirty(character);
                            }
                        }
                    }
                }
            }
            self.push_quest_state(character, instance);
        }
        self.quests.sweep_terminal();

        // scheduled world events
        for event in self.scheduler.fire_due(self.now_ms) {
            info!(target: LOG_TARGET, "Event fired: {}.", event.name);
            match event.action {
                EventAction::Announce(text) => {
                    let mut packet = ChatNotify {
                        channel: 5,
                        reserved: [0; 3],
                        from: WireName::from_str("server"),
                        text: [0; 128],
                    };
                    let bytes = text.as_bytes();
                    let len = bytes.len().min(128);
                    packet.text[..len].copy_from_slice(&bytes[..len]);
                    self.broadcast_all(ServerPacket::ChatNotify(packet));
                }
                EventAction::SpawnWave {
                    map,
                    template,
                    count,
                    x,
                    y,
                } => {
                    for _ in 0..count {
                        self.spawn_mob_at(template, Position::new(map, x, y), vec![]);
                    }
                }
                EventAction::ExpRate(permille) => {
                    self.exp_rate_permille = permille.max(1);
                }
                EventAction::OpenScoring { duration_ms } => {
                    let mut instance =
                        crate::event::EventInstance::new(event.id, self.now_ms, duration_ms);
                    for character in self.players.online().collect::<Vec<_>>() {
                        instance.register(character);
                    }
                    self.scoring = Some(instance);
                }
            }
        }

        // settle a finished competitive event exactly once
        if let Some(instance) = self.scoring.as_mut() {
            if instance.is_over(self.now_ms) {
                if let Some(standings) = instance.take_standings() {
                    for (rank, (character, score)) in standings.iter().take(3).enumerate() {
                        let prize = 10_000 >> rank;
                        if let Ok(c) = self.players.get_mut(*character) {
                            let _ = c.add_gold(prize);
                        }
                        self.players.mark_dirty(*character);
                        self.audit.record(
                            self.now_ms,
                            AuditEvent::GoldDelta {
                                owner: *character,
                                delta: i64::from(prize),
                                reason: "event prize",
                            },
                        );
                        debug!(
                            target: LOG_TARGET,
                            "event rank {} for {} with {} points.", rank + 1, character, score
                        );
                    }
                }
                self.scoring = None;
            }
        }

        // idle policy
        for (character, verdict) in self.players.scan_idle(
            self.now_ms,
            self.config.afk_threshold.as_millis() as u64,
            self.config.afk_disconnect.as_millis() as u64,
        ) {
            match verdict {
                IdleVerdict::Afk => {
                    debug!(target: LOG_TARGET, "{} is afk.", character);
                }
                IdleVerdict::ForceDisconnect => {
                    if let Some(session) = self.players.session_of(character) {
                        self.kick_session(session, 1);
                    }
                }
            }
        }

        // expired security bans
        self.security.sweep_expired(self.now_ms);

        // autosave
        let autosave_ms = self.config.autosave_interval.as_millis() as u64;
        if self.now_ms.saturating_sub(self.last_autosave_ms) >= autosave_ms {
            self.last_autosave_ms = self.now_ms;
            self.flush_dirty_characters();
        }
    }

    fn deliver_payouts(&mut self) {
        let content = self.content.clone();
        // one pass over the queue as it stood at the start of the phase;
        // undeliverable payouts go to the back and wait for the next tick
        let pending = self.market.payout_len();
        for _ in 0..pending {
            let Some(payout) = self.market.next_payout() else {
                break;
            };
            if !self.players.is_online(payout.character) {
                self.market.requeue_payout(payout);
                continue;
            }
            if self.try_deliver(&content, &payout).is_err() {
                self.market.requeue_payout(payout);
            }
        }
    }

    fn try_deliver(&mut self, content: &ContentTables, payout: &Payout) -> WorldResult<()> {
        let character = self.players.get_mut(payout.character)?;
        if let Some(item) = payout.item {
            let wanted = [(item.item_id, item.value)];
            if !character.containers.has_space_for(&content.items, &wanted) {
                return Err(WorldError::InventoryFull);
            }
        }
        if payout.gold > 0 {
            character.add_gold(payout.gold)?;
        }
        if let Some(item) = payout.item {
            character
                .containers
                .add_to_inventory(&content.items, item)
                .expect("space checked above; qed");
        }
        self.players.mark_dirty(payout.character);
        if payout.gold > 0 {
            self.audit.record(
                self.now_ms,
                AuditEvent::GoldDelta {
                    owner: payout.character,
                    delta: i64::from(payout.gold),
                    reason: payout_reason_name(payout.reason),
                },
            );
            self.push_gold_update(payout.character);
        }
        if payout.item.is_some() {
            self.push_full_inventory(payout.character);
        }
        Ok(())
    }

    fn flush_dirty_characters(&mut self) {
        let dirty = self.players.drain_dirty();
        if dirty.is_empty() {
            return;
        }
        let version = self.players.next_version();
        let mut batch = Vec::with_capacity(dirty.len() + 1);
        for id in &dirty {
            if let Ok(character) = self.players.get(*id) {
                batch.push(Record {
                    kind: RecordKind::Character,
                    id: u64::from(id.0),
                    version,
                    blob: codec::Encode::encode(&CharacterSnapshot::capture(character)),
                });
            }
        }
        batch.push(Record {
            kind: RecordKind::IdAllocators,
            id: 0,
            version,
            blob: codec::Encode::encode(&self.players.last_allocated_id()),
        });
        match self.persistence.try_send(batch) {
            Ok(()) => debug!(
                target: LOG_TARGET,
                "Autosaved {} characters at version {}.", dirty.len(), version
            ),
            Err(_) => {
                warn!(target: LOG_TARGET, "Persistence queue full; autosave deferred.");
                for id in dirty {
                    self.players.mark_dirty(id);
                }
            }
        }
    }

    fn respawn_character(&mut self, id: CharacterId) {
        let content = self.content.clone();
        let Ok(character) = self.players.get(id) else {
            return;
        };
        let old_position = character.position;
        let respawn = content
            .maps
            .map(old_position.map)
            .map(|m| m.respawn_position())
            .unwrap_or(old_position);
        {
            let character = self.players.get_mut(id).expect("present above; qed");
            character.respawn(respawn);
        }
        self.players.mark_dirty(id);
        self.spatial.move_character(id, &old_position, &respawn);
        let hp = self.players.get(id).map(|c| c.hp).unwrap_or(0);
        self.broadcast_near(
            &respawn,
            ServerPacket::RespawnNotify(RespawnNotify {
                unit: id.0,
                map: respawn.map.0,
                x: respawn.x,
                y: respawn.y,
                reserved: 0,
                hp,
            }),
            None,
        );
        self.push_stats_update(id);
    }

    // --- small notification helpers ------------------------------------

    pub fn push_stats_update(&mut self, id: CharacterId) {
        let Ok(character) = self.players.get(id) else {
            return;
        };
        let packet = ServerPacket::StatsUpdate(StatsUpdate {
            level: character.level,
            reserved: 0,
            hp: character.hp,
            max_hp: character.derived.max_hp,
            mp: character.mp,
            max_mp: character.derived.max_mp,
            experience: character.experience,
        });
        self.send_to_character(id, packet);
    }

    pub fn push_gold_update(&mut self, id: CharacterId) {
        let Ok(character) = self.players.get(id) else {
            return;
        };
        let packet = ServerPacket::GoldUpdate(GoldUpdate {
            carried: character.gold,
            banked: character.bank_gold,
        });
        self.send_to_character(id, packet);
    }

    pub fn push_slot_update(&mut self, id: CharacterId, container: u8, slot: u8) {
        let item = {
            let Ok(character) = self.players.get(id) else {
                return;
            };
            let Ok(kind) = crate::items::ContainerKind::from_u8(container) else {
                return;
            };
            match character.containers.slot(crate::items::SlotRef {
                container: kind,
                slot,
            }) {
                Ok(item) => *item,
                Err(_) => return,
            }
        };
        self.send_to_character(
            id,
            ServerPacket::InventorySlotUpdate(InventorySlotUpdate {
                container,
                slot,
                reserved: 0,
                item,
            }),
        );
    }

    /// Resends every inventory slot; used after bulk changes.
    pub fn push_full_inventory(&mut self, id: CharacterId) {
        for slot in 0..tmsrv_primitives::INVENTORY_SLOTS as u8 {
            self.push_slot_update(id, crate::items::ContainerKind::Inventory as u8, slot);
        }
    }

    pub fn push_quest_state(&mut self, character: CharacterId, instance: tmsrv_primitives::QuestInstanceId) {
        use network_session::packets::{QuestStateNotify, QUEST_OBJECTIVE_SLOTS};
        let Ok(quest_instance) = self.quests.instance(instance) else {
            return;
        };
        let mut progress = [0u16; QUEST_OBJECTIVE_SLOTS];
        for (slot, value) in progress.iter_mut().zip(quest_instance.progress.iter()) {
            *slot = (*value).min(u32::from(u16::MAX)) as u16;
        }
        let packet = ServerPacket::QuestStateNotify(QuestStateNotify {
            instance: instance.0,
            quest: quest_instance.quest,
            state: quest_instance.state.wire_code(),
            reserved: 0,
            progress,
            reserved2: 0,
        });
        self.send_to_character(character, packet);
    }

    pub fn notify_quest_report(
        &mut self,
        character: CharacterId,
        report: crate::quest::QuestProgressReport,
    ) {
        let content = self.content.clone();
        for instance in &report.progressed {
            self.push_quest_state(character, *instance);
        }
        for (instance, auto_complete) in report.ready {
            if auto_complete {
                let has_space = self.reward_space_available(instance);
                match self
                    .quests
                    .complete(&content, instance, None, None, has_space, self.now_ms)
                {
                    Ok(grant) => self.apply_reward_grant(character, instance, grant),
                    Err(WorldError::InventoryFull) => {
                        // deferred; the player is told and retries later
                        self.send_to_character(
                            character,
                            ServerPacket::ErrorNotify(ErrorNotify {
                                code: WorldError::InventoryFull.client_code(),
                                reserved: 0,
                            }),
                        );
                    }
                    Err(e) => debug!(target: LOG_TARGET, "auto-complete failed: {}", e),
                }
            } else {
                self.push_quest_state(character, instance);
            }
        }
    }

    pub fn reward_space_available(&self, instance: tmsrv_primitives::QuestInstanceId) -> bool {
        let Ok(quest_instance) = self.quests.instance(instance) else {
            return false;
        };
        let Ok(template) = self.content.quests.quest(quest_instance.quest) else {
            return false;
        };
        let Ok(character) = self.players.get(quest_instance.character) else {
            return false;
        };
        character
            .containers
            .has_space_for(&self.content.items, &template.rewards.items)
    }

    pub fn apply_reward_grant(
        &mut self,
        character_id: CharacterId,
        instance: tmsrv_primitives::QuestInstanceId,
        grant: crate::quest::RewardGrant,
    ) {
        let content = self.content.clone();
        let quest = self
            .quests
            .instance(instance)
            .map(|i| i.quest)
            .unwrap_or_default();
        let exp = grant.experience * u64::from(self.exp_rate_permille) / 1000;
        let leveled = {
            let Ok(character) = self.players.get_mut(character_id) else {
                return;
            };
            let _ = character.add_gold(grant.gold);
            for (item_id, count) in &grant.items {
                let _ = character
                    .containers
                    .add_to_inventory(&content.items, ItemInstance::new(*item_id, *count));
            }
            character.gain_experience(&content, exp)
        };
        self.players.mark_dirty(character_id);
        self.audit.record(
            self.now_ms,
            AuditEvent::QuestRewarded {
                character: character_id,
                quest,
                experience: exp,
                gold: grant.gold,
            },
        );
        self.push_stats_update(character_id);
        self.push_gold_update(character_id);
        self.push_full_inventory(character_id);
        self.push_quest_state(character_id, instance);
        if leveled {
            let level = self
                .players
                .get(character_id)
                .map(|c| c.level)
                .unwrap_or(0);
            let report =
                self.quests
                    .on_event(&content, character_id, QuestEvent::LevelReached { level });
            self.notify_quest_report(character_id, report);
        }
    }

    /// Cancels a trade and returns both sides to a clean state. Called on
    /// request, timeout and disconnect.
    pub fn cancel_trade(&mut self, trade: tmsrv_primitives::TradeId) {
        let (a, b) = match self.trades.get(trade) {
            Ok(session) => (session.a.character, session.b.character),
            Err(_) => return,
        };
        let trades = &mut self.trades;
        let paired = self
            .players
            .with_pair(a, b, |char_a, char_b| {
                trades.cancel(trade, Some(char_a), Some(char_b))
            });
        if paired.is_err() {
            // one side is gone; release whoever is still here
            for id in [a, b] {
                if let Ok(character) = self.players.get_mut(id) {
                    let _ = self.trades.cancel(trade, Some(character), None);
                }
            }
        }
        use network_session::packets::TradeStateNotify;
        for character in [a, b] {
            self.send_to_character(
                character,
                ServerPacket::TradeStateNotify(TradeStateNotify {
                    trade: trade.0,
                    phase: crate::trade::TradePhase::Cancelled.wire_code(),
                    reserved: [0; 3],
                }),
            );
        }
    }

    /// Removes a character from the live world: spatial index, open trade,
    /// party leadership, final save.
    fn depart_world(&mut self, character_id: CharacterId, save: bool) {
        if let Ok(character) = self.players.get(character_id) {
            let position = character.position;
            let trade = character.trade;
            let party = character.party;
            if let Some(trade) = trade {
                self.cancel_trade(trade);
            }
            if let Some(party_id) = party {
                // leadership passes on disconnect; membership survives
                if let Ok(party) = self.parties.get_mut(party_id) {
                    if party.leader == character_id {
                        if let Some(next) = party
                            .members
                            .iter()
                            .copied()
                            .find(|m| *m != character_id && self.players.is_online(*m))
                        {
                            party.leader = next;
                        }
                    }
                }
            }
            self.spatial.remove_character(character_id, &position);
            self.broadcast_near(
                &position,
                ServerPacket::DespawnNotify(DespawnNotify {
                    unit_kind: 0,
                    reserved: [0; 3],
                    unit: character_id.0,
                }),
                Some(character_id),
            );
        }
        if let Some(session) = self.players.session_of(character_id) {
            self.players.unbind_session(session);
        }
        self.dead_characters.remove(&character_id);
        if save {
            self.players.mark_dirty(character_id);
            self.flush_dirty_characters();
        }
        info!(target: LOG_TARGET, "{} left the world.", character_id);
    }

    // movement is in tick.rs because phase 2 calls it directly
    pub(crate) fn handle_move(
        &mut self,
        session: SessionId,
        m: network_session::packets::Move,
    ) -> WorldResult<()> {
        let character_id = self
            .players
            .character_of(session)
            .ok_or(WorldError::WrongState)?;
        self.players.note_action(character_id, self.now_ms);
        let content = self.content.clone();
        let character = self.players.get(character_id)?;
        if character.dead {
            return Err(WorldError::Dead);
        }
        let from = character.position;
        let target = Position::new(from.map, m.x, m.y);
        if !target.in_bounds() {
            return Err(WorldError::OutOfBounds);
        }
        let map = content.maps.map(from.map)?;
        if !map.is_walkable(m.x, m.y) {
            return Err(WorldError::Blocked);
        }
        let slow = self.players.get(character_id)?.status.slow_permille();
        let allowed = if slow >= 500 {
            1
        } else {
            MAX_MOVE_CELLS
        };
        if from.distance(&target) > allowed {
            self.session_violation(
                session,
                None,
                ViolationKind::SpeedHack,
            );
            return Err(WorldError::OutOfRange);
        }
        {
            let character = self.players.get_mut(character_id)?;
            character.position = target;
        }
        self.players.mark_dirty(character_id);
        self.spatial.move_character(character_id, &from, &target);
        self.broadcast_near(
            &target,
            ServerPacket::MoveNotify(MoveNotify {
                unit_kind: 0,
                reserved: [0; 3],
                unit: character_id.0,
                x: target.x,
                y: target.y,
            }),
            Some(character_id),
        );
        let report = self.quests.on_event(
            &content,
            character_id,
            QuestEvent::Visit {
                map: target.map,
                x: target.x,
                y: target.y,
            },
        );
        self.notify_quest_report(character_id, report);
        Ok(())
    }
}

pub fn view_of_character(character: &Character) -> CombatantView {
    CombatantView {
        level: character.level,
        attack_min: character.derived.attack_min,
        attack_max: character.derived.attack_max,
        defense: character.derived.armor_class.max(0) as u32,
        dodge_permille: u32::from(character.stats.dexterity) / 2,
        parry_permille: u32::from(character.stats.dexterity) / 4,
        block_permille: 0,
        critical_permille: u32::from(character.stats.dexterity) / 3,
        resistance_permille: character.derived.resistances,
        reflect_permille: 0,
        absorb_flat: 0,
        immune: false,
    }
}

fn violation_name(kind: ViolationKind) -> &'static str {
    match kind {
        ViolationKind::PacketFlood => "packet-flood",
        ViolationKind::InvalidPacket => "invalid-packet",
        ViolationKind::StaleSequence => "stale-sequence",
        ViolationKind::InvalidState => "invalid-state",
        ViolationKind::ForbiddenOperation => "forbidden-operation",
        ViolationKind::SpeedHack => "speed-hack",
        ViolationKind::DuplicationAttempt => "duplication-attempt",
    }
}

fn action_name(action: SecurityAction) -> &'static str {
    match action {
        SecurityAction::Log => "log",
        SecurityAction::Warn => "warn",
        SecurityAction::BlockPacket => "block-packet",
        SecurityAction::RateLimit => "rate-limit",
        SecurityAction::Disconnect => "disconnect",
        SecurityAction::TempBan { .. } => "temp-ban",
        SecurityAction::PermBan => "perm-ban",
    }
}

fn payout_reason_name(reason: PayoutReason) -> &'static str {
    match reason {
        PayoutReason::BidRefund => "bid refund",
        PayoutReason::SaleProceeds => "sale proceeds",
        PayoutReason::ItemWon => "item won",
        PayoutReason::ItemReturned => "item returned",
    }
}

/// The runtime loop: a fixed-cadence interval drives [World::step]; session
/// events from the network service are folded in between steps.
pub async fn run(
    mut world: World,
    mut session_events: fmpsc::UnboundedReceiver<SessionEvent>,
    mut exit: futures::channel::oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(world.config.tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);
    let started = tokio::time::Instant::now();
    info!(target: LOG_TARGET, "World tick starting at {:?} cadence.", world.config.tick_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now_ms = started.elapsed().as_millis() as u64;
                world.step(now_ms);
            },
            maybe_event = session_events.next() => match maybe_event {
                Some(SessionEvent::Opened(handle)) => world.session_opened(handle),
                Some(SessionEvent::Closed { session }) => world.session_closed(session),
                Some(SessionEvent::Violation { session, account, violation }) => {
                    world.session_violation(session, account, map_violation(violation));
                }
                None => {
                    warn!(target: LOG_TARGET, "Session service is gone; stopping the tick.");
                    break;
                }
            },
            _ = &mut exit => break,
        }
    }
    // final save on the way out
    let ids = world.players.ids();
    for id in ids {
        world.players.mark_dirty(id);
    }
    world.flush_dirty_characters();
    info!(target: LOG_TARGET, "World tick stopped.");
}

fn map_violation(violation: network_session::service::SessionViolation) -> ViolationKind {
    use network_session::service::SessionViolation::*;
    match violation {
        PacketFlood => ViolationKind::PacketFlood,
        InvalidPacket => ViolationKind::InvalidPacket,
        StaleSequence => ViolationKind::StaleSequence,
        InvalidState => ViolationKind::InvalidState,
    }
}
