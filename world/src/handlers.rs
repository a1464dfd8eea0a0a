//! Intent dispatch: every validated client packet lands here, inside the
//! tick, and is translated into subsystem operations. Errors become typed
//! client error codes; nothing unwinds.
use log::debug;

use network_session::{
    packets::{
        self, ChatNotify, ClientPacket, EnterWorld, ServerPacket, ShopEntry as WireShopEntry,
        ShopInventory, ShopResult, SpawnNotify, TradeGoldNotify, TradeSlotNotify,
        TradeStateNotify, CHAT_TEXT_LEN,
    },
    session::LifecycleState,
    SessionId,
};
use tmsrv_primitives::{
    CharacterClass, CharacterId, ItemInstance, MobId, Position, TradeId, UnitId, WireName,
};

use crate::{
    audit::AuditEvent,
    combat::{self, CombatantView},
    content::{ItemKind, NpcKind, SkillKind, TargetRule, TransactionKind},
    error::{WorldError, WorldResult},
    items::{ContainerKind, SlotRef},
    quest::QuestEvent,
    security::ViolationKind,
    social::{friends, guild::AllianceKind, guild::GuildRole, party},
    tick::{view_of_character, World},
    LOG_TARGET,
};

/// Melee reach, in cells.
const MELEE_RANGE: u16 = 2;
/// How close an interaction with an npc or ground item must be.
const INTERACT_RANGE: u16 = 4;
/// Trade partners must stand this close.
const TRADE_RANGE: u16 = 6;

impl World {
    /// Phase-4 entry point for everything that is not movement.
    pub(crate) fn dispatch(&mut self, session: SessionId, packet: ClientPacket) {
        let result = self.dispatch_inner(session, packet);
        if let Err(error) = result {
            if error == WorldError::ForbiddenOperation {
                self.session_violation(session, None, ViolationKind::ForbiddenOperation);
            }
            self.send_error(session, error);
        }
    }

    fn dispatch_inner(&mut self, session: SessionId, packet: ClientPacket) -> WorldResult<()> {
        use ClientPacket::*;
        if let Some(character) = self.players.character_of(session) {
            self.players.note_action(character, self.now_ms);
        }
        match packet {
            KeepAlive(_) => Ok(()),
            CharacterList => self.handle_character_list(session),
            CharacterCreate(p) => self.handle_character_create(session, p),
            CharacterDelete(p) => self.handle_character_delete(session, p),
            CharacterSelect(p) => self.handle_character_select(session, p),
            Logout => self.handle_logout(session),
            Attack(p) => self.handle_attack(session, p),
            SkillUse(p) => self.handle_skill_use(session, p),
            ItemUse(p) => self.handle_item_use(session, p),
            ItemDrop(p) => self.handle_item_drop(session, p),
            ItemGet(p) => self.handle_item_get(session, p),
            ItemMove(p) => self.handle_item_move(session, p),
            Refine(p) => self.handle_refine(session, p),
            Socket(p) => self.handle_socket(session, p),
            Chat(p) => self.handle_chat(session, p),
            NpcTalk(p) => self.handle_npc_talk(session, p),
            PartyInvite(p) => self.handle_party_invite(session, p.target),
            PartyRespond(p) => self.handle_party_respond(session, p),
            PartyLeave => self.handle_party_leave(session),
            PartyKick(p) => self.handle_party_kick(session, p.target),
            PartySetPolicy(p) => self.handle_party_policy(session, p),
            GuildCreate(p) => self.handle_guild_create(session, p),
            GuildInvite(p) => self.handle_guild_invite(session, p.target),
            GuildRespond(p) => self.handle_guild_respond(session, p),
            GuildLeave => self.handle_guild_leave(session),
            GuildKick(p) => self.handle_guild_kick(session, p.target),
            GuildNotice(p) => self.handle_guild_notice(session, p),
            GuildWarDeclare(p) => self.handle_guild_war_declare(session, p.target),
            GuildWarRespond(p) => self.handle_guild_war_respond(session, p),
            GuildAllianceSet(p) => self.handle_guild_alliance(session, p),
            GuildPromote(p) => self.handle_guild_promote(session, p),
            TradeStart(p) => self.handle_trade_start(session, p.target),
            TradeSetItem(p) => self.handle_trade_set_item(session, p),
            TradeClearItem(p) => self.handle_trade_clear_item(session, p),
            TradeSetGold(p) => self.handle_trade_set_gold(session, p),
            TradeLock => self.handle_trade_lock(session),
            TradeConfirm => self.handle_trade_confirm(session),
            TradeCancel => self.handle_trade_cancel(session),
            ShopOpen(p) => self.handle_shop_open(session, p),
            ShopBuy(p) => self.handle_shop_buy(session, p),
            ShopSell(p) => self.handle_shop_sell(session, p),
            ShopClose => Ok(()),
            StorageOpen => self.handle_storage_open(session),
            StoragePut(p) => self.handle_storage_put(session, p),
            StorageGet(p) => self.handle_storage_get(session, p),
            StorageGold(p) => self.handle_storage_gold(session, p),
            StorageClose => Ok(()),
            MarketList(p) => self.handle_market_list(session, p),
            MarketBuy(p) => self.handle_market_buy(session, p),
            MarketCancel(p) => self.handle_market_cancel(session, p),
            AuctionCreate(p) => self.handle_auction_create(session, p),
            AuctionBid(p) => self.handle_auction_bid(session, p),
            QuestAccept(p) => self.handle_quest_accept(session, p),
            QuestComplete(p) => self.handle_quest_complete(session, p),
            QuestAbandon(p) => self.handle_quest_abandon(session, p),
            QuestHistory => self.handle_quest_history(session),
            FriendAdd(p) => self.handle_friend_add(session, p),
            FriendRemove(p) => self.handle_friend_remove(session, p),
            BlockAdd(p) => self.handle_block_add(session, p),
            BlockRemove(p) => self.handle_block_remove(session, p),
            AdminCommand(p) => self.handle_admin(session, p),
            Handshake(_) | AccountLogin(_) | RekeyAck(_) | Move(_) => Ok(()),
        }
    }

    fn character_of(&self, session: SessionId) -> WorldResult<CharacterId> {
        self.players
            .character_of(session)
            .ok_or(WorldError::WrongState)
    }

    fn living_character_of(&self, session: SessionId) -> WorldResult<CharacterId> {
        let id = self.character_of(session)?;
        if self.players.get(id)?.dead {
            return Err(WorldError::Dead);
        }
        Ok(id)
    }

    fn account_of(&self, session: SessionId) -> WorldResult<tmsrv_primitives::AccountId> {
        self.session_account(session).ok_or(WorldError::WrongState)
    }

    // --- character selection -------------------------------------------

    fn handle_character_list(&mut self, session: SessionId) -> WorldResult<()> {
        use packets::{CharacterListResult, CharacterSummary, CHARACTER_SLOTS};
        let account = self.account_of(session)?;
        let mut entries = [CharacterSummary::default(); CHARACTER_SLOTS];
        for (slot, id) in self
            .players
            .characters_of(account)
            .into_iter()
            .take(CHARACTER_SLOTS)
            .enumerate()
        {
            if let Ok(character) = self.players.get(id) {
                entries[slot] = CharacterSummary {
                    name: WireName::from_str(&character.name),
                    class: class_code(character.class),
                    reserved: 0,
                    level: character.level,
                };
            }
        }
        self.set_session_state(session, LifecycleState::CharSelect);
        self.send_to(
            session,
            ServerPacket::CharacterListResult(CharacterListResult { entries }),
        );
        Ok(())
    }

    fn handle_character_create(
        &mut self,
        session: SessionId,
        p: packets::CharacterCreate,
    ) -> WorldResult<()> {
        let account = self.account_of(session)?;
        let class = class_from_code(p.class)?;
        let content = self.content.clone();
        let spawn = content
            .maps
            .map(tmsrv_primitives::MapId(1))
            .map(|m| m.respawn_position())?;
        self.players
            .create_character(&content, account, p.name.as_str(), class, spawn)?;
        self.handle_character_list(session)
    }

    fn handle_character_delete(
        &mut self,
        session: SessionId,
        p: packets::CharacterDelete,
    ) -> WorldResult<()> {
        let account = self.account_of(session)?;
        self.players.delete_character(account, p.name.as_str())?;
        self.handle_character_list(session)
    }

    fn handle_character_select(
        &mut self,
        session: SessionId,
        p: packets::CharacterSelect,
    ) -> WorldResult<()> {
        let account = self.account_of(session)?;
        let slots = self.players.characters_of(account);
        let id = *slots
            .get(usize::from(p.slot))
            .ok_or(WorldError::InvalidSlot)?;
        // bans on the character are checked before it enters the world
        if self.security.is_banned("", Some(account), Some(id), self.now_ms) {
            self.kick_session(session, 3);
            return Ok(());
        }
        self.players.bind_session(id, session)?;
        self.set_session_character(session, Some(id));
        self.set_session_state(session, LifecycleState::InWorld);
        self.players.note_action(id, self.now_ms);

        let (position, packet) = {
            let character = self.players.get(id)?;
            (
                character.position,
                ServerPacket::EnterWorld(EnterWorld {
                    character: id.0,
                    map: character.position.map.0,
                    x: character.position.x,
                    y: character.position.y,
                    level: character.level,
                    hp: character.hp,
                    max_hp: character.derived.max_hp,
                    mp: character.mp,
                    max_mp: character.derived.max_mp,
                    experience: character.experience,
                    gold: character.gold,
                }),
            )
        };
        self.spatial.insert_character(id, &position);
        self.send_to(session, packet);
        self.push_full_inventory(id);

        // announce to neighbors and show them to the newcomer
        let name = self.players.get(id)?.name.clone();
        self.broadcast_near(
            &position,
            ServerPacket::SpawnNotify(SpawnNotify {
                unit_kind: 0,
                reserved: 0,
                template: 0,
                unit: id.0,
                x: position.x,
                y: position.y,
                name: WireName::from_str(&name),
            }),
            Some(id),
        );
        let radius = self.config.aoi_radius;
        for mob_id in self.spatial.mobs_near(&position, radius) {
            if let Some(mob) = self.mobs.get(&mob_id) {
                if !mob.is_alive() {
                    continue;
                }
                let mob_name = self
                    .content
                    .mobs
                    .template(mob.template)
                    .map(|t| t.name.clone())
                    .unwrap_or_default();
                let packet = ServerPacket::SpawnNotify(SpawnNotify {
                    unit_kind: 1,
                    reserved: 0,
                    template: mob.template,
                    unit: mob_id.0,
                    x: mob.position.x,
                    y: mob.position.y,
                    name: WireName::from_str(&mob_name),
                });
                self.send_to(session, packet);
            }
        }
        Ok(())
    }

    fn handle_logout(&mut self, session: SessionId) -> WorldResult<()> {
        if let Some(character) = self.players.character_of(session) {
            self.leave_world(character);
            self.set_session_character(session, None);
        }
        self.set_session_state(session, LifecycleState::CharSelect);
        Ok(())
    }

    // --- combat ---------------------------------------------------------

    fn handle_attack(&mut self, session: SessionId, p: packets::Attack) -> WorldResult<()> {
        let attacker = self.living_character_of(session)?;
        if self.players.get(attacker)?.status.is_stunned() {
            return Err(WorldError::Incapacitated);
        }
        match p.target_kind {
            1 => self.player_attacks_mob(attacker, MobId(p.target_id), None),
            0 => self.player_attacks_player(attacker, CharacterId(p.target_id), None),
            _ => Err(WorldError::InvalidTarget),
        }
    }

    fn handle_skill_use(&mut self, session: SessionId, p: packets::SkillUse) -> WorldResult<()> {
        let caster_id = self.living_character_of(session)?;
        let content = self.content.clone();
        let skill = content.skills.skill(p.skill_id)?;

        {
            let caster = self.players.get(caster_id)?;
            combat::validate_skill_use(
                skill,
                &caster.learned_skills,
                caster.mp,
                caster.cooldowns.get(&skill.id).copied(),
                self.now_ms,
                caster.dead,
                caster.status.is_stunned(),
                caster.status.is_silenced(),
            )?;
            if caster.casting.is_some() {
                return Err(WorldError::WrongState);
            }
        }

        let target = match (skill.target, p.target_kind) {
            (TargetRule::SelfOnly, _) => UnitId::Character(caster_id),
            (TargetRule::Ally, 0) => UnitId::Character(CharacterId(p.target_id)),
            (TargetRule::Enemy, 1) => UnitId::Mob(MobId(p.target_id)),
            (TargetRule::Enemy, 0) => UnitId::Character(CharacterId(p.target_id)),
            _ => return Err(WorldError::InvalidTarget),
        };
        self.check_skill_range(caster_id, target, skill.range)?;

        // pay at cast start; interrupts refund nothing
        {
            let caster = self.players.get_mut(caster_id)?;
            caster.spend_mana(skill.mana_cost)?;
            caster
                .cooldowns
                .insert(skill.id, self.now_ms + u64::from(skill.cooldown_ms));
        }
        self.players.mark_dirty(caster_id);
        self.push_stats_update(caster_id);

        if skill.cast_time_ms > 0 {
            let caster = self.players.get_mut(caster_id)?;
            caster.casting = Some(crate::character::CastingState {
                skill: skill.id,
                target,
                finish_at_ms: self.now_ms + u64::from(skill.cast_time_ms),
            });
            return Ok(());
        }
        self.execute_skill(caster_id, skill.id, target)?;
        let report = self.quests.on_event(
            &content,
            caster_id,
            QuestEvent::SkillUsed { skill: skill.id },
        );
        self.notify_quest_report(caster_id, report);
        Ok(())
    }

    fn check_skill_range(
        &self,
        caster: CharacterId,
        target: UnitId,
        range: u16,
    ) -> WorldResult<()> {
        let from = self.players.get(caster)?.position;
        let to = match target {
            UnitId::Character(id) => self.players.get(id)?.position,
            UnitId::Mob(id) => {
                let mob = self.mobs.get(&id).ok_or(WorldError::InvalidTarget)?;
                if !mob.is_alive() {
                    return Err(WorldError::InvalidTarget);
                }
                mob.position
            }
        };
        if from.distance(&to) > range {
            return Err(WorldError::OutOfRange);
        }
        Ok(())
    }

    /// Finished casts resolve here; called from the timer phase too.
    pub(crate) fn complete_casts(&mut self) {
        let due: Vec<(CharacterId, u16, UnitId)> = self
            .players
            .ids()
            .into_iter()
            .filter_map(|id| {
                let character = self.players.get(id).ok()?;
                let casting = character.casting?;
                (casting.finish_at_ms <= self.now_ms)
                    .then_some((id, casting.skill, casting.target))
            })
            .collect();
        for (caster, skill, target) in due {
            if let Ok(character) = self.players.get_mut(caster) {
                character.casting = None;
            }
            if let Err(e) = self.execute_skill(caster, skill, target) {
                debug!(target: LOG_TARGET, "{}: cast fizzled: {}", caster, e);
                self.send_to_character(
                    caster,
                    ServerPacket::ErrorNotify(packets::ErrorNotify {
                        code: e.client_code(),
                        reserved: 0,
                    }),
                );
            }
        }
    }

    fn execute_skill(
        &mut self,
        caster_id: CharacterId,
        skill_id: u16,
        target: UnitId,
    ) -> WorldResult<()> {
        let content = self.content.clone();
        let skill = content.skills.skill(skill_id)?;
        // range re-checked at resolution; the target may have walked away
        self.check_skill_range(caster_id, target, skill.range + 2)?;
        match (&skill.kind, target) {
            (SkillKind::Damage { .. } | SkillKind::Channel { .. }, UnitId::Mob(mob)) => {
                self.player_attacks_mob(caster_id, mob, Some(skill_id))
            }
            (SkillKind::Damage { .. } | SkillKind::Channel { .. }, UnitId::Character(other)) => {
                self.player_attacks_player(caster_id, other, Some(skill_id))
            }
            (SkillKind::Heal { base, scale_permille }, UnitId::Character(other)) => {
                let amount = {
                    let caster = self.players.get(caster_id)?;
                    base + caster.derived.attack_max * scale_permille / 1000
                };
                let healed = self.players.get_mut(other)?;
                if healed.dead {
                    return Err(WorldError::Dead);
                }
                healed.apply_heal(amount);
                self.players.mark_dirty(other);
                self.push_stats_update(other);
                Ok(())
            }
            (SkillKind::ApplyEffect { effect }, target) => {
                let template = content.skills.effect(*effect)?;
                match target {
                    UnitId::Character(other) => {
                        let recompute = {
                            let character = self.players.get_mut(other)?;
                            character.status.apply(
                                template,
                                UnitId::Character(caster_id),
                                self.now_ms,
                            )?
                        };
                        if recompute {
                            let character = self.players.get_mut(other)?;
                            character.recompute_with_equipment(&content);
                            self.players.mark_dirty(other);
                            self.push_stats_update(other);
                        }
                    }
                    UnitId::Mob(mob_id) => {
                        let mob =
                            self.mobs.get_mut(&mob_id).ok_or(WorldError::InvalidTarget)?;
                        mob.status
                            .apply(template, UnitId::Character(caster_id), self.now_ms)?;
                        mob.threat.add(caster_id, 1);
                    }
                }
                Ok(())
            }
            (SkillKind::Heal { .. }, UnitId::Mob(_)) => Err(WorldError::InvalidTarget),
        }
    }

    fn player_attacks_mob(
        &mut self,
        attacker_id: CharacterId,
        mob_id: MobId,
        skill: Option<u16>,
    ) -> WorldResult<()> {
        let content = self.content.clone();
        let (attacker_view, attacker_position) = {
            let attacker = self.players.get(attacker_id)?;
            (view_of_character(attacker), attacker.position)
        };
        let (mob_position, template_id) = {
            let mob = self.mobs.get(&mob_id).ok_or(WorldError::InvalidTarget)?;
            if !mob.is_alive() {
                return Err(WorldError::InvalidTarget);
            }
            (mob.position, mob.template)
        };
        let template = content.mobs.template(template_id)?;
        let range = skill
            .and_then(|s| content.skills.skill(s).ok())
            .map(|s| s.range)
            .unwrap_or(MELEE_RANGE);
        if attacker_position.distance(&mob_position) > range {
            return Err(WorldError::OutOfRange);
        }
        let flags = content
            .maps
            .map(mob_position.map)?
            .zone_flags(mob_position.x, mob_position.y);
        if !flags.allow_pve || flags.sanctuary {
            return Err(WorldError::ZoneForbids);
        }

        let (skill_damage, damage_type) = match skill
            .and_then(|s| content.skills.skill(s).ok())
            .and_then(combat::skill_damage_of)
        {
            Some((damage, damage_type)) => (Some(damage), damage_type),
            None => (None, crate::content::DamageType::Physical),
        };
        let target_view = CombatantView {
            level: template.level,
            attack_min: template.attack_min,
            attack_max: template.attack_max,
            defense: template.defense,
            ..CombatantView::default()
        };
        let mut rng = self.tick_rng();
        let resolution = combat::resolve_attack(
            &mut rng,
            &content.skills.combat,
            &attacker_view,
            &target_view,
            damage_type,
            skill_damage,
        );

        let (hp_after, died) = {
            let mob = self.mobs.get_mut(&mob_id).ok_or(WorldError::InvalidTarget)?;
            mob.hp = mob.hp.saturating_sub(resolution.damage);
            crate::ai::on_event(
                mob,
                template,
                crate::ai::MobEvent::Damaged {
                    by: attacker_id,
                    amount: resolution.damage,
                },
            );
            (mob.hp, mob.hp == 0)
        };
        if resolution.reflected > 0 {
            let attacker = self.players.get_mut(attacker_id)?;
            attacker.apply_damage(resolution.reflected);
            self.players.mark_dirty(attacker_id);
        }
        {
            let attacker = self.players.get_mut(attacker_id)?;
            attacker.decay_weapon_durability(&content);
        }
        self.players.mark_dirty(attacker_id);

        self.broadcast_near(
            &mob_position,
            ServerPacket::AttackResult(packets::AttackResult {
                attacker_kind: 0,
                target_kind: 1,
                outcome: resolution.outcome.wire_code(),
                reserved: 0,
                attacker: attacker_id.0,
                target: mob_id.0,
                damage: resolution.damage,
                target_hp: hp_after,
            }),
            None,
        );
        if died {
            self.on_mob_death(mob_id, attacker_id);
        }
        Ok(())
    }

    fn player_attacks_player(
        &mut self,
        attacker_id: CharacterId,
        target_id: CharacterId,
        skill: Option<u16>,
    ) -> WorldResult<()> {
        if attacker_id == target_id {
            return Err(WorldError::InvalidTarget);
        }
        let content = self.content.clone();
        let (attacker_view, attacker_position, attacker_guild) = {
            let attacker = self.players.get(attacker_id)?;
            (
                view_of_character(attacker),
                attacker.position,
                attacker.guild,
            )
        };
        let (target_view, target_position, target_guild, target_dead) = {
            let target = self.players.get(target_id)?;
            (
                view_of_character(target),
                target.position,
                target.guild,
                target.dead,
            )
        };
        if target_dead {
            return Err(WorldError::InvalidTarget);
        }
        let range = skill
            .and_then(|s| content.skills.skill(s).ok())
            .map(|s| s.range)
            .unwrap_or(MELEE_RANGE);
        if attacker_position.distance(&target_position) > range {
            return Err(WorldError::OutOfRange);
        }

        // zone flags; an active guild war overrides everything but
        // sanctuary
        let flags = content
            .maps
            .map(target_position.map)?
            .zone_flags(target_position.x, target_position.y);
        if flags.sanctuary {
            return Err(WorldError::ZoneForbids);
        }
        let at_war = match (attacker_guild, target_guild) {
            (Some(a), Some(b)) => self.guilds.at_war(a, b),
            _ => false,
        };
        if !flags.allow_pvp && !at_war {
            return Err(WorldError::ZoneForbids);
        }

        let (skill_damage, damage_type) = match skill
            .and_then(|s| content.skills.skill(s).ok())
            .and_then(combat::skill_damage_of)
        {
            Some((damage, damage_type)) => (Some(damage), damage_type),
            None => (None, crate::content::DamageType::Physical),
        };
        let mut rng = self.tick_rng();
        let resolution = combat::resolve_attack(
            &mut rng,
            &content.skills.combat,
            &attacker_view,
            &target_view,
            damage_type,
            skill_damage,
        );

        let (hp_after, died, interrupted) = {
            let target = self.players.get_mut(target_id)?;
            target.apply_damage(resolution.damage);
            let interrupted = target.casting.is_some()
                && combat::cast_interrupted_by(
                    resolution.damage,
                    self.config.cast_interrupt_damage,
                );
            if interrupted {
                target.casting = None;
            }
            (target.hp, target.dead, interrupted)
        };
        let _ = interrupted;
        self.players.mark_dirty(target_id);
        if resolution.reflected > 0 {
            let attacker = self.players.get_mut(attacker_id)?;
            attacker.apply_damage(resolution.reflected);
            self.players.mark_dirty(attacker_id);
        }
        {
            let attacker = self.players.get_mut(attacker_id)?;
            attacker.decay_weapon_durability(&content);
            // unprovoked aggression shifts alignment down
            attacker.alignment -= 1;
        }

        self.broadcast_near(
            &target_position,
            ServerPacket::AttackResult(packets::AttackResult {
                attacker_kind: 0,
                target_kind: 0,
                outcome: resolution.outcome.wire_code(),
                reserved: 0,
                attacker: attacker_id.0,
                target: target_id.0,
                damage: resolution.damage,
                target_hp: hp_after,
            }),
            None,
        );
        if died {
            self.on_character_death(target_id);
        }
        Ok(())
    }

    // --- items ----------------------------------------------------------

    fn handle_item_use(&mut self, session: SessionId, p: packets::ItemUse) -> WorldResult<()> {
        let character_id = self.living_character_of(session)?;
        let content = self.content.clone();
        let at = SlotRef::inventory(p.slot);
        let item = {
            let character = self.players.get(character_id)?;
            let item = *character.containers.slot(at)?;
            if item.is_empty() {
                return Err(WorldError::EmptySlot);
            }
            item
        };
        let template = content.items.template(item.item_id)?;
        match template.kind {
            ItemKind::Consumable => {
                let heal_hp = template.bonuses.max_hp.max(0) as u32;
                let heal_mp = template.bonuses.max_mp.max(0) as u32;
                let character = self.players.get_mut(character_id)?;
                character.containers.remove_count(at, 1)?;
                character.apply_heal(heal_hp);
                character.mp = (character.mp + heal_mp).min(character.derived.max_mp);
                self.players.mark_dirty(character_id);
                self.push_stats_update(character_id);
                self.push_slot_update(character_id, ContainerKind::Inventory as u8, p.slot);
                self.audit.record(
                    self.now_ms,
                    AuditEvent::ItemDestroyed {
                        owner: character_id,
                        item_id: item.item_id,
                        count: 1,
                        reason: "consumed",
                    },
                );
                let report = self.quests.on_event(
                    &content,
                    character_id,
                    QuestEvent::ItemUsed { item: item.item_id },
                );
                self.notify_quest_report(character_id, report);
                Ok(())
            }
            _ => Err(WorldError::RequirementUnmet),
        }
    }

    fn handle_item_drop(&mut self, session: SessionId, p: packets::ItemDrop) -> WorldResult<()> {
        let character_id = self.living_character_of(session)?;
        let content = self.content.clone();
        let at = SlotRef::inventory(p.slot);
        let (item, position) = {
            let character = self.players.get(character_id)?;
            (*character.containers.slot(at)?, character.position)
        };
        if item.is_empty() {
            return Err(WorldError::EmptySlot);
        }
        if !content.items.flags(item.item_id).droppable {
            return Err(WorldError::ForbiddenOperation);
        }
        let count = if p.count == 0 { item.value } else { p.count };
        let taken = {
            let character = self.players.get_mut(character_id)?;
            character.containers.remove_count(at, count)?
        };
        self.players.mark_dirty(character_id);
        self.push_slot_update(character_id, ContainerKind::Inventory as u8, p.slot);
        self.audit.record(
            self.now_ms,
            AuditEvent::ItemMoved {
                owner: character_id,
                item_id: taken.item_id,
                count: taken.value,
            },
        );
        self.drop_on_ground(taken, position, crate::loot::LootRight::Anyone);
        Ok(())
    }

    fn handle_item_get(&mut self, session: SessionId, p: packets::ItemGet) -> WorldResult<()> {
        let character_id = self.living_character_of(session)?;
        let content = self.content.clone();
        let ground_id = crate::spatial::GroundItemId(p.ground_id);
        let (position, party) = {
            let character = self.players.get(character_id)?;
            (character.position, character.party)
        };
        let ground = self
            .ground
            .get(ground_id)
            .copied()
            .ok_or(WorldError::InvalidTarget)?;
        if ground.position.distance(&position) > INTERACT_RANGE {
            return Err(WorldError::OutOfRange);
        }
        let picked = self
            .ground
            .try_pick(ground_id, character_id, party, self.now_ms)?;
        let slot = {
            let character = self.players.get_mut(character_id)?;
            match character.containers.add_to_inventory(&content.items, picked.item) {
                Ok(slot) => slot,
                Err(e) => {
                    self.ground.restore(picked);
                    return Err(e);
                }
            }
        };
        self.players.mark_dirty(character_id);
        self.spatial.remove_ground_item(ground_id, &picked.position);
        self.push_slot_update(character_id, ContainerKind::Inventory as u8, slot);
        self.broadcast_near(
            &picked.position,
            ServerPacket::GroundItemNotify(packets::GroundItemNotify {
                ground_id: ground_id.0,
                item_id: picked.item.item_id,
                x: picked.position.x,
                y: picked.position.y,
                gone: 1,
                reserved: 0,
            }),
            None,
        );
        self.audit.record(
            self.now_ms,
            AuditEvent::ItemMoved {
                owner: character_id,
                item_id: picked.item.item_id,
                count: picked.item.value,
            },
        );
        let total = self
            .players
            .get(character_id)?
            .containers
            .count_in_inventory(picked.item.item_id);
        let report = self.quests.on_event(
            &content,
            character_id,
            QuestEvent::ItemAcquired {
                item: picked.item.item_id,
                total_held: total,
            },
        );
        self.notify_quest_report(character_id, report);
        Ok(())
    }

    fn handle_item_move(&mut self, session: SessionId, p: packets::ItemMove) -> WorldResult<()> {
        let character_id = self.living_character_of(session)?;
        let content = self.content.clone();
        let src_kind = ContainerKind::from_u8(p.src_container)?;
        let dst_kind = ContainerKind::from_u8(p.dst_container)?;

        // bank traffic requires a banker nearby
        if src_kind == ContainerKind::Bank || dst_kind == ContainerKind::Bank {
            self.require_nearby_npc(character_id, NpcKind::Banker)?;
            let item = {
                let character = self.players.get(character_id)?;
                *character.containers.slot(SlotRef {
                    container: src_kind,
                    slot: p.src_slot,
                })?
            };
            if !item.is_empty()
                && dst_kind == ContainerKind::Bank
                && !content.items.flags(item.item_id).storable
            {
                return Err(WorldError::ForbiddenOperation);
            }
        }

        match (src_kind, dst_kind) {
            (ContainerKind::Inventory, ContainerKind::Equipment) => {
                let character = self.players.get_mut(character_id)?;
                character.equip(&content, p.src_slot, p.dst_slot)?;
            }
            (ContainerKind::Equipment, ContainerKind::Inventory) => {
                let character = self.players.get_mut(character_id)?;
                character.unequip(&content, p.src_slot)?;
            }
            (src, dst) => {
                if src == ContainerKind::Equipment || dst == ContainerKind::Equipment {
                    return Err(WorldError::InvalidSlot);
                }
                let character = self.players.get_mut(character_id)?;
                let moved = character.containers.move_item(
                    &content.items,
                    SlotRef {
                        container: src,
                        slot: p.src_slot,
                    },
                    SlotRef {
                        container: dst,
                        slot: p.dst_slot,
                    },
                    p.count,
                )?;
                let _ = moved;
            }
        }
        self.players.mark_dirty(character_id);
        self.push_slot_update(character_id, p.src_container, p.src_slot);
        self.push_slot_update(character_id, p.dst_container, p.dst_slot);
        self.push_stats_update(character_id);
        Ok(())
    }

    fn handle_refine(&mut self, session: SessionId, p: packets::Refine) -> WorldResult<()> {
        let character_id = self.living_character_of(session)?;
        let content = self.content.clone();
        let protect = (p.protect_slot != 0xFF).then_some(p.protect_slot);
        let mut rng = self.tick_rng();
        let receipt = {
            let degrade_step = self.config.degrade_step;
            let character = self.players.get_mut(character_id)?;
            crate::forge::refine(
                &mut rng,
                &content.items,
                character,
                p.item_slot,
                p.material_slot,
                protect,
                degrade_step,
            )?
        };
        self.players.mark_dirty(character_id);
        self.audit.record(
            self.now_ms,
            AuditEvent::RefineRolled {
                owner: character_id,
                item_id: receipt.item_id,
                roll: receipt.roll,
                outcome: match receipt.outcome {
                    crate::forge::RefineOutcome::Success { .. } => "success",
                    crate::forge::RefineOutcome::Degrade { .. } => "degrade",
                    crate::forge::RefineOutcome::Break { destroyed: true } => "break",
                    crate::forge::RefineOutcome::Break { destroyed: false } => "break-protected",
                },
                protection_consumed: receipt.protection_consumed,
            },
        );
        if receipt.protection_consumed {
            self.audit.record(
                self.now_ms,
                AuditEvent::ItemDestroyed {
                    owner: character_id,
                    item_id: 0,
                    count: 1,
                    reason: "protection scroll",
                },
            );
        }
        self.push_full_inventory(character_id);
        Ok(())
    }

    fn handle_socket(&mut self, session: SessionId, p: packets::Socket) -> WorldResult<()> {
        let character_id = self.living_character_of(session)?;
        let content = self.content.clone();
        let receipt = {
            let character = self.players.get_mut(character_id)?;
            crate::forge::socket_gem(
                &content.items,
                character,
                p.item_slot,
                p.gem_slot,
                p.socket_index,
            )?
        };
        self.players.mark_dirty(character_id);
        self.audit.record(
            self.now_ms,
            AuditEvent::SocketFilled {
                owner: character_id,
                item_id: receipt.item_id,
                gem_id: receipt.gem_id,
            },
        );
        self.push_slot_update(character_id, ContainerKind::Inventory as u8, p.item_slot);
        self.push_slot_update(character_id, ContainerKind::Inventory as u8, p.gem_slot);
        Ok(())
    }

    // --- chat -----------------------------------------------------------

    fn handle_chat(&mut self, session: SessionId, p: packets::Chat) -> WorldResult<()> {
        let character_id = self.character_of(session)?;
        let (name, position, party, guild) = {
            let character = self.players.get(character_id)?;
            (
                character.name.clone(),
                character.position,
                character.party,
                character.guild,
            )
        };
        let mut notify = ChatNotify {
            channel: p.channel,
            reserved: [0; 3],
            from: WireName::from_str(&name),
            text: p.text,
        };
        match p.channel {
            // local
            0 => {
                self.broadcast_near(&position, ServerPacket::ChatNotify(notify), None);
                Ok(())
            }
            // whisper; the block list wins
            1 => {
                let target_name = p.target.as_str().to_owned();
                let target_id = self
                    .players
                    .by_name(&target_name)
                    .ok_or(WorldError::InvalidTarget)?;
                if !self.players.is_online(target_id) {
                    return Err(WorldError::InvalidTarget);
                }
                let accepts = friends::accepts_from(self.players.get(target_id)?, &name);
                if accepts {
                    self.send_to_character(target_id, ServerPacket::ChatNotify(notify));
                }
                // the sender cannot tell a block from a delivery
                Ok(())
            }
            // party
            2 => {
                let party_id = party.ok_or(WorldError::RequirementUnmet)?;
                let members = self.parties.get(party_id)?.members.clone();
                for member in members {
                    self.send_to_character(member, ServerPacket::ChatNotify(notify.clone()));
                }
                Ok(())
            }
            // guild
            3 => {
                let guild_id = guild.ok_or(WorldError::RequirementUnmet)?;
                let members: Vec<CharacterId> =
                    self.guilds.get(guild_id)?.members.keys().copied().collect();
                for member in members {
                    self.send_to_character(member, ServerPacket::ChatNotify(notify.clone()));
                }
                Ok(())
            }
            // global
            4 => {
                notify.channel = 4;
                self.broadcast_all(ServerPacket::ChatNotify(notify));
                Ok(())
            }
            _ => Err(WorldError::InvalidAmount),
        }
    }

    // --- npcs, shops, storage -------------------------------------------

    fn require_nearby_npc(&self, character: CharacterId, kind: NpcKind) -> WorldResult<()> {
        let position = self.players.get(character)?.position;
        let near = self.content.economy.npcs.values().any(|npc| {
            npc.kind == kind
                && npc.map == position.map
                && Position::new(npc.map, npc.x, npc.y).distance(&position)
                    <= npc.interact_range.max(INTERACT_RANGE)
        });
        if near {
            Ok(())
        } else {
            Err(WorldError::OutOfRange)
        }
    }

    fn handle_npc_talk(&mut self, session: SessionId, p: packets::NpcTalk) -> WorldResult<()> {
        let character_id = self.living_character_of(session)?;
        let content = self.content.clone();
        let npc = content.economy.npc(p.npc)?;
        let position = self.players.get(character_id)?.position;
        if npc.map != position.map
            || Position::new(npc.map, npc.x, npc.y).distance(&position)
                > npc.interact_range.max(INTERACT_RANGE)
        {
            return Err(WorldError::OutOfRange);
        }
        let report =
            self.quests
                .on_event(&content, character_id, QuestEvent::Talk { npc: p.npc });
        self.notify_quest_report(character_id, report);
        Ok(())
    }

    fn handle_shop_open(&mut self, session: SessionId, p: packets::ShopOpen) -> WorldResult<()> {
        let character_id = self.living_character_of(session)?;
        let content = self.content.clone();
        let shop = content.economy.shop(p.npc)?;
        self.require_nearby_npc(character_id, NpcKind::Shopkeeper)?;
        let mut inventory = ShopInventory {
            npc: p.npc,
            entries: [WireShopEntry::default(); packets::SHOP_SLOTS],
        };
        for (slot, entry) in shop.entries.iter().take(packets::SHOP_SLOTS).enumerate() {
            inventory.entries[slot] = WireShopEntry {
                item: ItemInstance::new(entry.item_id, entry.count),
                price: entry.price,
            };
        }
        self.send_to(session, ServerPacket::ShopInventory(Box::new(inventory)));
        Ok(())
    }

    fn handle_shop_buy(&mut self, session: SessionId, p: packets::ShopBuy) -> WorldResult<()> {
        let character_id = self.living_character_of(session)?;
        let content = self.content.clone();
        self.require_nearby_npc(character_id, NpcKind::Shopkeeper)?;
        // one open shop per interaction; entries come from the nearest
        // shopkeeper
        let shop = self.nearest_shop(character_id)?;
        let entry = *shop
            .entries
            .get(usize::from(p.shop_slot))
            .ok_or(WorldError::InvalidSlot)?;
        let count = u32::from(p.count.max(1));
        let total_units = entry.count * count;
        let cost = entry
            .price
            .checked_mul(count)
            .ok_or(WorldError::InvalidAmount)?;
        {
            let character = self.players.get_mut(character_id)?;
            if !character
                .containers
                .has_space_for(&content.items, &[(entry.item_id, total_units)])
            {
                return Err(WorldError::InventoryFull);
            }
            character.take_gold(cost)?;
            character
                .containers
                .add_to_inventory(&content.items, ItemInstance::new(entry.item_id, total_units))
                .expect("space checked above; qed");
        }
        self.players.mark_dirty(character_id);
        self.audit.record(
            self.now_ms,
            AuditEvent::ItemCreated {
                owner: character_id,
                item_id: entry.item_id,
                count: total_units,
                source: "shop",
            },
        );
        self.audit.record(
            self.now_ms,
            AuditEvent::GoldDelta {
                owner: character_id,
                delta: -i64::from(cost),
                reason: "shop purchase",
            },
        );
        self.push_gold_update(character_id);
        self.push_full_inventory(character_id);
        self.send_to(
            session,
            ServerPacket::ShopResult(ShopResult {
                result: 0,
                reserved: 0,
            }),
        );
        let total = self
            .players
            .get(character_id)?
            .containers
            .count_in_inventory(entry.item_id);
        let report = self.quests.on_event(
            &content,
            character_id,
            QuestEvent::ItemAcquired {
                item: entry.item_id,
                total_held: total,
            },
        );
        self.notify_quest_report(character_id, report);
        Ok(())
    }

    fn nearest_shop(&self, character: CharacterId) -> WorldResult<&crate::content::ShopDef> {
        let position = self.players.get(character)?.position;
        self.content
            .economy
            .shops
            .values()
            .filter_map(|shop| {
                let npc = self.content.economy.npcs.get(&shop.npc)?;
                (npc.map == position.map
                    && Position::new(npc.map, npc.x, npc.y).distance(&position)
                        <= npc.interact_range.max(INTERACT_RANGE))
                .then_some(shop)
            })
            .next()
            .ok_or(WorldError::OutOfRange)
    }

    fn handle_shop_sell(&mut self, session: SessionId, p: packets::ShopSell) -> WorldResult<()> {
        let character_id = self.living_character_of(session)?;
        let content = self.content.clone();
        self.require_nearby_npc(character_id, NpcKind::Shopkeeper)?;
        let sell_back_permille = self.nearest_shop(character_id)?.sell_back_permille;
        let at = SlotRef::inventory(p.inventory_slot);
        let item = {
            let character = self.players.get(character_id)?;
            *character.containers.slot(at)?
        };
        if item.is_empty() {
            return Err(WorldError::EmptySlot);
        }
        if !content.items.flags(item.item_id).sellable {
            return Err(WorldError::ForbiddenOperation);
        }
        let template = content.items.template(item.item_id)?;
        let count = if p.count == 0 { item.value } else { p.count };
        let proceeds =
            (u64::from(template.price) * u64::from(sell_back_permille) / 1000) as u32 * count;
        {
            let character = self.players.get_mut(character_id)?;
            character.containers.remove_count(at, count)?;
            character.add_gold(proceeds.min(tmsrv_primitives::GOLD_LIMIT))?;
        }
        self.players.mark_dirty(character_id);
        self.audit.record(
            self.now_ms,
            AuditEvent::ItemDestroyed {
                owner: character_id,
                item_id: item.item_id,
                count,
                reason: "vendored",
            },
        );
        self.audit.record(
            self.now_ms,
            AuditEvent::GoldDelta {
                owner: character_id,
                delta: i64::from(proceeds),
                reason: "shop sale",
            },
        );
        self.push_gold_update(character_id);
        self.push_slot_update(character_id, ContainerKind::Inventory as u8, p.inventory_slot);
        Ok(())
    }

    fn handle_storage_open(&mut self, session: SessionId) -> WorldResult<()> {
        let character_id = self.living_character_of(session)?;
        self.require_nearby_npc(character_id, NpcKind::Banker)?;
        for slot in 0..tmsrv_primitives::BANK_SLOTS as u8 {
            self.push_slot_update(character_id, ContainerKind::Bank as u8, slot);
        }
        self.push_gold_update(character_id);
        Ok(())
    }

    fn handle_storage_put(&mut self, session: SessionId, p: packets::StoragePut) -> WorldResult<()> {
        self.handle_item_move(
            session,
            packets::ItemMove {
                src_container: ContainerKind::Inventory as u8,
                src_slot: p.inventory_slot,
                dst_container: ContainerKind::Bank as u8,
                dst_slot: p.bank_slot,
                count: 0,
            },
        )
    }

    fn handle_storage_get(&mut self, session: SessionId, p: packets::StorageGet) -> WorldResult<()> {
        self.handle_item_move(
            session,
            packets::ItemMove {
                src_container: ContainerKind::Bank as u8,
                src_slot: p.bank_slot,
                dst_container: ContainerKind::Inventory as u8,
                dst_slot: p.inventory_slot,
                count: 0,
            },
        )
    }

    fn handle_storage_gold(
        &mut self,
        session: SessionId,
        p: packets::StorageGold,
    ) -> WorldResult<()> {
        let character_id = self.living_character_of(session)?;
        self.require_nearby_npc(character_id, NpcKind::Banker)?;
        if p.amount == 0 {
            return Err(WorldError::InvalidAmount);
        }
        {
            let character = self.players.get_mut(character_id)?;
            match p.direction {
                0 => {
                    character.take_gold(p.amount)?;
                    let banked = character
                        .bank_gold
                        .checked_add(p.amount)
                        .filter(|total| *total <= tmsrv_primitives::GOLD_LIMIT)
                        .ok_or(WorldError::InvalidAmount);
                    match banked {
                        Ok(total) => character.bank_gold = total,
                        Err(e) => {
                            // undo the withdrawal from the carried purse
                            character.add_gold(p.amount)?;
                            return Err(e);
                        }
                    }
                }
                1 => {
                    if character.bank_gold < p.amount {
                        return Err(WorldError::InsufficientFunds);
                    }
                    character.add_gold(p.amount)?;
                    character.bank_gold -= p.amount;
                }
                _ => return Err(WorldError::InvalidAmount),
            }
        }
        self.players.mark_dirty(character_id);
        self.audit.record(
            self.now_ms,
            AuditEvent::GoldDelta {
                owner: character_id,
                delta: 0,
                reason: "bank transfer",
            },
        );
        let character = self.players.get(character_id)?;
        let packet = ServerPacket::StorageGoldResult(packets::StorageGoldResult {
            carried: character.gold,
            banked: character.bank_gold,
        });
        self.send_to(session, packet);
        Ok(())
    }

    // --- trade ----------------------------------------------------------

    fn trade_of(&self, session: SessionId) -> WorldResult<(CharacterId, TradeId)> {
        let character = self.character_of(session)?;
        let trade = self.players.get(character)?.trade.ok_or(WorldError::NoTrade)?;
        Ok((character, trade))
    }

    fn push_trade_phase(&mut self, trade: TradeId) {
        let Ok(session) = self.trades.get(trade) else {
            return;
        };
        let (a, b, phase) = (session.a.character, session.b.character, session.phase());
        for character in [a, b] {
            self.send_to_character(
                character,
                ServerPacket::TradeStateNotify(TradeStateNotify {
                    trade: trade.0,
                    phase: phase.wire_code(),
                    reserved: [0; 3],
                }),
            );
        }
    }

    fn handle_trade_start(&mut self, session: SessionId, target: u32) -> WorldResult<()> {
        let initiator = self.living_character_of(session)?;
        let target = CharacterId(target);
        if initiator == target {
            return Err(WorldError::InvalidTarget);
        }
        if !self.players.is_online(target) {
            return Err(WorldError::InvalidTarget);
        }
        {
            let a = self.players.get(initiator)?;
            let b = self.players.get(target)?;
            if a.trade.is_some() || b.trade.is_some() {
                return Err(WorldError::AlreadyTrading);
            }
            if b.dead {
                return Err(WorldError::InvalidTarget);
            }
            if a.position.distance(&b.position) > TRADE_RANGE {
                return Err(WorldError::OutOfRange);
            }
        }
        let timeout = self.config.trade_timeout.as_millis() as u64;
        let trade = self.trades.start(initiator, target, self.now_ms, timeout);
        self.players.get_mut(initiator)?.trade = Some(trade);
        self.players.get_mut(target)?.trade = Some(trade);
        self.push_trade_phase(trade);
        Ok(())
    }

    fn handle_trade_set_item(
        &mut self,
        session: SessionId,
        p: packets::TradeSetItem,
    ) -> WorldResult<()> {
        let (character_id, trade) = self.trade_of(session)?;
        let content = self.content.clone();
        {
            let trades = &mut self.trades;
            let character = self.players.get_mut(character_id)?;
            trades.set_item(trade, character, p.inventory_slot, p.count, &content.items)?;
        }
        // mirror the offer to both parties
        let (item, counterparty) = {
            let character = self.players.get(character_id)?;
            let session_data = self.trades.get(trade)?;
            let side = session_data.side_of(character_id)?;
            (
                *character
                    .containers
                    .slot(SlotRef::inventory(p.inventory_slot))?,
                session_data.counterparty(side),
            )
        };
        let mut offered = item;
        offered.value = p.count;
        self.send_to_character(
            character_id,
            ServerPacket::TradeSlotNotify(TradeSlotNotify {
                trade: trade.0,
                side: 0,
                trade_slot: p.trade_slot,
                reserved: 0,
                item: offered,
            }),
        );
        self.send_to_character(
            counterparty,
            ServerPacket::TradeSlotNotify(TradeSlotNotify {
                trade: trade.0,
                side: 1,
                trade_slot: p.trade_slot,
                reserved: 0,
                item: offered,
            }),
        );
        Ok(())
    }

    fn handle_trade_clear_item(
        &mut self,
        session: SessionId,
        p: packets::TradeClearItem,
    ) -> WorldResult<()> {
        let (character_id, trade) = self.trade_of(session)?;
        self.trades.clear_item(trade, character_id, p.trade_slot)?;
        self.push_trade_phase(trade);
        Ok(())
    }

    fn handle_trade_set_gold(
        &mut self,
        session: SessionId,
        p: packets::TradeSetGold,
    ) -> WorldResult<()> {
        let (character_id, trade) = self.trade_of(session)?;
        {
            let character = self.players.get(character_id)?;
            self.trades.set_gold(trade, character, p.gold)?;
        }
        let counterparty = {
            let session_data = self.trades.get(trade)?;
            session_data.counterparty(session_data.side_of(character_id)?)
        };
        for (who, side) in [(character_id, 0u8), (counterparty, 1u8)] {
            self.send_to_character(
                who,
                ServerPacket::TradeGoldNotify(TradeGoldNotify {
                    trade: trade.0,
                    side,
                    reserved: [0; 3],
                    gold: p.gold,
                }),
            );
        }
        Ok(())
    }

    fn handle_trade_lock(&mut self, session: SessionId) -> WorldResult<()> {
        let (character_id, trade) = self.trade_of(session)?;
        {
            let trades = &mut self.trades;
            let character = self.players.get_mut(character_id)?;
            trades.lock(trade, character)?;
        }
        self.push_trade_phase(trade);
        Ok(())
    }

    fn handle_trade_confirm(&mut self, session: SessionId) -> WorldResult<()> {
        let (character_id, trade) = self.trade_of(session)?;
        self.trades.confirm(trade, character_id)?;
        self.push_trade_phase(trade);
        if self.trades.ready_to_commit(trade) {
            self.commit_trade(trade)?;
        }
        Ok(())
    }

    fn commit_trade(&mut self, trade: TradeId) -> WorldResult<()> {
        let content = self.content.clone();
        let (a, b) = {
            let session_data = self.trades.get(trade)?;
            (session_data.a.character, session_data.b.character)
        };
        let trades = &mut self.trades;
        let outcome = self
            .players
            .with_pair(a, b, |char_a, char_b| {
                trades.commit(trade, &content.items, char_a, char_b)
            })?;
        match outcome {
            Ok(receipt) => {
                self.audit.record(
                    self.now_ms,
                    AuditEvent::TradeCommitted {
                        trade,
                        a,
                        b,
                        items_a_to_b: receipt.items_a_to_b.iter().map(|(_, c)| c).sum(),
                        items_b_to_a: receipt.items_b_to_a.iter().map(|(_, c)| c).sum(),
                        gold_a_to_b: receipt.gold_a_to_b,
                        gold_b_to_a: receipt.gold_b_to_a,
                    },
                );
                self.push_trade_phase(trade);
                for character in [a, b] {
                    self.push_gold_update(character);
                    self.push_full_inventory(character);
                    // collect objectives may have been satisfied by the
                    // received items
                    let held: Vec<(u16, u32)> = receipt
                        .items_a_to_b
                        .iter()
                        .chain(receipt.items_b_to_a.iter())
                        .map(|(item, _)| {
                            let total = self
                                .players
                                .get(character)
                                .map(|c| c.containers.count_in_inventory(*item))
                                .unwrap_or(0);
                            (*item, total)
                        })
                        .collect();
                    for (item, total) in held {
                        let report = self.quests.on_event(
                            &content,
                            character,
                            QuestEvent::ItemAcquired {
                                item,
                                total_held: total,
                            },
                        );
                        self.notify_quest_report(character, report);
                    }
                }
                self.trades.sweep_terminal();
                Ok(())
            }
            Err(WorldError::ConcurrencyConflict) => {
                // abort the whole session and give everything back
                self.cancel_trade(trade);
                self.trades.sweep_terminal();
                Err(WorldError::ConcurrencyConflict)
            }
            Err(e) => Err(e),
        }
    }

    fn handle_trade_cancel(&mut self, session: SessionId) -> WorldResult<()> {
        let (_, trade) = self.trade_of(session)?;
        self.cancel_trade(trade);
        self.trades.sweep_terminal();
        Ok(())
    }

    // --- party ----------------------------------------------------------

    fn push_party_state(&mut self, party_id: tmsrv_primitives::PartyId) {
        use packets::{PartyMemberEntry, PartyStateNotify};
        let Ok(party) = self.parties.get(party_id) else {
            return;
        };
        let mut notify = PartyStateNotify {
            party: party_id.0,
            leader: party.leader.0,
            loot_policy: party.loot_policy as u8,
            exp_policy: party.exp_policy as u8,
            member_count: party.members.len() as u8,
            reserved: 0,
            members: [PartyMemberEntry::default(); 12],
        };
        let members = party.members.clone();
        for (slot, member) in members.iter().take(12).enumerate() {
            if let Ok(character) = self.players.get(*member) {
                notify.members[slot] = PartyMemberEntry {
                    character: member.0,
                    level: character.level,
                    reserved: 0,
                    name: WireName::from_str(&character.name),
                };
            }
        }
        for member in members {
            self.send_to_character(member, ServerPacket::PartyStateNotify(Box::new(notify)));
        }
    }

    fn handle_party_invite(&mut self, session: SessionId, target: u32) -> WorldResult<()> {
        let inviter = self.living_character_of(session)?;
        let invitee = CharacterId(target);
        if !self.players.is_online(invitee) {
            return Err(WorldError::InvalidTarget);
        }
        let inviter_party = self.players.get(inviter)?.party;
        let invitee_party = self.players.get(invitee)?.party;
        self.parties.invite(
            inviter,
            inviter_party,
            invitee,
            invitee_party,
            self.now_ms,
            self.config.invite_timeout.as_millis() as u64,
        )?;
        // surface the invitation through chat so no new packet is needed
        let name = self.players.get(inviter)?.name.clone();
        let mut text = [0u8; CHAT_TEXT_LEN];
        let line = format!("{} invites you to a party", name);
        let bytes = line.as_bytes();
        text[..bytes.len().min(CHAT_TEXT_LEN)]
            .copy_from_slice(&bytes[..bytes.len().min(CHAT_TEXT_LEN)]);
        self.send_to_character(
            invitee,
            ServerPacket::ChatNotify(ChatNotify {
                channel: 6,
                reserved: [0; 3],
                from: WireName::from_str(&name),
                text,
            }),
        );
        Ok(())
    }

    fn handle_party_respond(
        &mut self,
        session: SessionId,
        p: packets::PartyRespond,
    ) -> WorldResult<()> {
        let invitee = self.living_character_of(session)?;
        if p.accept == 0 {
            self.parties.decline(invitee)?;
            return Ok(());
        }
        let (party, _) = self.parties.accept(invitee, self.now_ms)?;
        // the founder may have just been given the party too
        let members = self.parties.get(party)?.members.clone();
        for member in members {
            if let Ok(character) = self.players.get_mut(member) {
                character.party = Some(party);
            }
        }
        self.push_party_state(party);
        Ok(())
    }

    fn handle_party_leave(&mut self, session: SessionId) -> WorldResult<()> {
        let character_id = self.character_of(session)?;
        let party = self
            .players
            .get(character_id)?
            .party
            .ok_or(WorldError::RequirementUnmet)?;
        let disbanded = self.parties.remove_member(party, character_id)?;
        self.players.get_mut(character_id)?.party = None;
        match disbanded {
            Some(rest) => {
                for member in rest {
                    if let Ok(character) = self.players.get_mut(member) {
                        character.party = None;
                    }
                }
            }
            None => self.push_party_state(party),
        }
        Ok(())
    }

    fn handle_party_kick(&mut self, session: SessionId, target: u32) -> WorldResult<()> {
        let leader = self.character_of(session)?;
        let target = CharacterId(target);
        let party = self
            .players
            .get(leader)?
            .party
            .ok_or(WorldError::RequirementUnmet)?;
        let disbanded = self.parties.kick(party, leader, target)?;
        if let Ok(character) = self.players.get_mut(target) {
            character.party = None;
        }
        match disbanded {
            Some(rest) => {
                for member in rest {
                    if let Ok(character) = self.players.get_mut(member) {
                        character.party = None;
                    }
                }
            }
            None => self.push_party_state(party),
        }
        Ok(())
    }

    fn handle_party_policy(
        &mut self,
        session: SessionId,
        p: packets::PartySetPolicy,
    ) -> WorldResult<()> {
        let leader = self.character_of(session)?;
        let party = self
            .players
            .get(leader)?
            .party
            .ok_or(WorldError::RequirementUnmet)?;
        self.parties.set_policies(
            party,
            leader,
            party::LootPolicy::from_u8(p.loot_policy)?,
            party::ExpPolicy::from_u8(p.exp_policy)?,
        )?;
        self.push_party_state(party);
        Ok(())
    }

    // --- guild ----------------------------------------------------------

    fn push_guild_state(&mut self, guild_id: tmsrv_primitives::GuildId) {
        use packets::GuildStateNotify;
        let Ok(guild) = self.guilds.get(guild_id) else {
            return;
        };
        let mut notice = [0u8; packets::NOTICE_LEN];
        let bytes = guild.notice.as_bytes();
        let len = bytes.len().min(packets::NOTICE_LEN);
        notice[..len].copy_from_slice(&bytes[..len]);
        let notify = GuildStateNotify {
            guild: guild_id.0,
            master: guild.master.0,
            member_count: guild.members.len() as u16,
            reserved: 0,
            name: WireName::from_str(&guild.name),
            notice,
        };
        let members: Vec<CharacterId> = guild.members.keys().copied().collect();
        for member in members {
            self.send_to_character(member, ServerPacket::GuildStateNotify(Box::new(notify)));
        }
    }

    fn guild_of(&self, session: SessionId) -> WorldResult<(CharacterId, tmsrv_primitives::GuildId)> {
        let character = self.character_of(session)?;
        let guild = self
            .players
            .get(character)?
            .guild
            .ok_or(WorldError::RequirementUnmet)?;
        Ok((character, guild))
    }

    fn handle_guild_create(
        &mut self,
        session: SessionId,
        p: packets::GuildCreate,
    ) -> WorldResult<()> {
        let founder = self.living_character_of(session)?;
        if self.players.get(founder)?.guild.is_some() {
            return Err(WorldError::AlreadyInGuild);
        }
        let guild = self
            .guilds
            .create(p.name.as_str(), founder, self.now_ms)?;
        self.players.get_mut(founder)?.guild = Some(guild);
        self.players.mark_dirty(founder);
        self.push_guild_state(guild);
        Ok(())
    }

    fn handle_guild_invite(&mut self, session: SessionId, target: u32) -> WorldResult<()> {
        let (inviter, guild) = self.guild_of(session)?;
        let invitee = CharacterId(target);
        if !self.players.is_online(invitee) {
            return Err(WorldError::InvalidTarget);
        }
        let invitee_guild = self.players.get(invitee)?.guild;
        self.guilds.invite(
            guild,
            inviter,
            invitee,
            invitee_guild,
            self.now_ms,
            self.config.invite_timeout.as_millis() as u64,
        )?;
        Ok(())
    }

    fn handle_guild_respond(
        &mut self,
        session: SessionId,
        p: packets::GuildRespond,
    ) -> WorldResult<()> {
        let invitee = self.living_character_of(session)?;
        if p.accept == 0 {
            return Ok(());
        }
        let guild = self.guilds.accept(invitee, self.now_ms)?;
        self.players.get_mut(invitee)?.guild = Some(guild);
        self.players.mark_dirty(invitee);
        self.push_guild_state(guild);
        Ok(())
    }

    fn handle_guild_leave(&mut self, session: SessionId) -> WorldResult<()> {
        let (character_id, guild) = self.guild_of(session)?;
        let dissolved = self.guilds.leave(guild, character_id, self.now_ms)?;
        self.players.get_mut(character_id)?.guild = None;
        self.players.mark_dirty(character_id);
        if !dissolved {
            self.push_guild_state(guild);
        }
        Ok(())
    }

    fn handle_guild_kick(&mut self, session: SessionId, target: u32) -> WorldResult<()> {
        let (by, guild) = self.guild_of(session)?;
        let target = CharacterId(target);
        self.guilds.kick(guild, by, target, self.now_ms)?;
        if let Ok(character) = self.players.get_mut(target) {
            character.guild = None;
        }
        self.push_guild_state(guild);
        Ok(())
    }

    fn handle_guild_notice(
        &mut self,
        session: SessionId,
        p: packets::GuildNotice,
    ) -> WorldResult<()> {
        let (by, guild) = self.guild_of(session)?;
        let end = p.text.iter().position(|b| *b == 0).unwrap_or(p.text.len());
        let notice = String::from_utf8_lossy(&p.text[..end]).into_owned();
        self.guilds.set_notice(guild, by, notice)?;
        self.push_guild_state(guild);
        Ok(())
    }

    fn handle_guild_war_declare(&mut self, session: SessionId, target: u32) -> WorldResult<()> {
        let (by, guild) = self.guild_of(session)?;
        self.guilds
            .declare_war(guild, by, tmsrv_primitives::GuildId(target), self.now_ms)?;
        Ok(())
    }

    fn handle_guild_war_respond(
        &mut self,
        session: SessionId,
        p: packets::GuildWarRespond,
    ) -> WorldResult<()> {
        let (by, guild) = self.guild_of(session)?;
        self.guilds.respond_war(
            guild,
            by,
            tmsrv_primitives::GuildId(p.guild),
            p.accept != 0,
            self.now_ms,
        )?;
        Ok(())
    }

    fn handle_guild_alliance(
        &mut self,
        session: SessionId,
        p: packets::GuildAllianceSet,
    ) -> WorldResult<()> {
        let (by, guild) = self.guild_of(session)?;
        self.guilds.set_alliance(
            guild,
            by,
            tmsrv_primitives::GuildId(p.guild),
            AllianceKind::from_u8(p.relation)?,
        )?;
        Ok(())
    }

    fn handle_guild_promote(
        &mut self,
        session: SessionId,
        p: packets::GuildPromote,
    ) -> WorldResult<()> {
        let (by, guild) = self.guild_of(session)?;
        self.guilds.set_role(
            guild,
            by,
            CharacterId(p.member),
            GuildRole::from_u8(p.role)?,
            self.now_ms,
        )?;
        self.push_guild_state(guild);
        Ok(())
    }

    // --- market and auctions -------------------------------------------

    fn handle_market_list(
        &mut self,
        session: SessionId,
        p: packets::MarketList,
    ) -> WorldResult<()> {
        let seller = self.living_character_of(session)?;
        let content = self.content.clone();
        let at = SlotRef::inventory(p.inventory_slot);
        let item = {
            let character = self.players.get(seller)?;
            *character.containers.slot(at)?
        };
        if item.is_empty() {
            return Err(WorldError::EmptySlot);
        }
        if !content.items.flags(item.item_id).tradable {
            return Err(WorldError::ForbiddenOperation);
        }
        let fee = content
            .economy
            .fee(TransactionKind::MarketListing)
            .fee_on(p.price);
        let escrowed = {
            let character = self.players.get_mut(seller)?;
            character.take_gold(fee)?;
            match character.containers.remove_count(at, item.value) {
                Ok(item) => item,
                Err(e) => {
                    character.add_gold(fee)?;
                    return Err(e);
                }
            }
        };
        let duration_ms = u64::from(p.duration_hours.clamp(1, 72)) * 60 * 60 * 1000;
        let listing = self.market.post_listing(
            seller,
            escrowed,
            p.price,
            fee,
            self.now_ms,
            duration_ms,
        )?;
        self.players.mark_dirty(seller);
        self.push_gold_update(seller);
        self.push_slot_update(seller, ContainerKind::Inventory as u8, p.inventory_slot);
        self.send_to(
            session,
            ServerPacket::MarketResult(packets::MarketResult {
                result: 0,
                reserved: 0,
                listing: listing.0,
            }),
        );
        Ok(())
    }

    fn handle_market_buy(&mut self, session: SessionId, p: packets::MarketBuy) -> WorldResult<()> {
        let buyer = self.living_character_of(session)?;
        let content = self.content.clone();
        let listing_id = tmsrv_primitives::ListingId(p.listing);
        let (price, seller) = {
            let listing = self.market.listing(listing_id)?;
            (listing.price, listing.seller)
        };
        {
            let character = self.players.get_mut(buyer)?;
            character.take_gold(price)?;
        }
        match self.market.buy_listing(listing_id, buyer, &content.economy) {
            Ok(paid) => {
                self.players.mark_dirty(buyer);
                self.audit.record(
                    self.now_ms,
                    AuditEvent::ListingSettled {
                        listing: listing_id,
                        seller,
                        buyer,
                        price: paid,
                    },
                );
                self.push_gold_update(buyer);
                Ok(())
            }
            Err(e) => {
                let character = self.players.get_mut(buyer)?;
                character.add_gold(price)?;
                Err(e)
            }
        }
    }

    fn handle_market_cancel(
        &mut self,
        session: SessionId,
        p: packets::MarketCancel,
    ) -> WorldResult<()> {
        let seller = self.living_character_of(session)?;
        self.market
            .cancel_listing(tmsrv_primitives::ListingId(p.listing), seller)?;
        Ok(())
    }

    fn handle_auction_create(
        &mut self,
        session: SessionId,
        p: packets::AuctionCreate,
    ) -> WorldResult<()> {
        let seller = self.living_character_of(session)?;
        let content = self.content.clone();
        let kind = crate::market::AuctionKind::from_u8(p.kind)?;
        let at = SlotRef::inventory(p.inventory_slot);
        let item = {
            let character = self.players.get(seller)?;
            *character.containers.slot(at)?
        };
        if item.is_empty() {
            return Err(WorldError::EmptySlot);
        }
        if !content.items.flags(item.item_id).tradable {
            return Err(WorldError::ForbiddenOperation);
        }
        let escrowed = {
            let character = self.players.get_mut(seller)?;
            character.containers.remove_count(at, item.value)?
        };
        let duration_ms = u64::from(p.duration_secs.clamp(60, 7 * 24 * 60 * 60)) * 1000;
        let auction = self.market.create_auction(
            seller,
            escrowed,
            kind,
            p.start_price,
            p.reserve_price,
            p.buyout_price,
            self.now_ms,
            duration_ms,
            self.config.snipe_extend_cap.as_millis() as u64,
        );
        let auction = match auction {
            Ok(auction) => auction,
            Err(e) => {
                // undo the escrow
                let character = self.players.get_mut(seller)?;
                character
                    .containers
                    .add_to_inventory(&content.items, escrowed)
                    .map_err(|_| WorldError::InternalError)?;
                return Err(e);
            }
        };
        self.players.mark_dirty(seller);
        self.push_slot_update(seller, ContainerKind::Inventory as u8, p.inventory_slot);
        self.push_auction_state(auction);
        Ok(())
    }

    fn push_auction_state(&mut self, auction_id: tmsrv_primitives::AuctionId) {
        let Ok(auction) = self.market.auction(auction_id) else {
            return;
        };
        let packet = ServerPacket::AuctionState(packets::AuctionState {
            auction: auction_id.0,
            high_bid: auction.high_bid.map(|(_, amount)| amount).unwrap_or(0),
            end_epoch_secs: auction.end_at_ms / 1000,
            state: if auction.is_open() { 0 } else { 1 },
            reserved: [0; 3],
        });
        let seller = auction.seller;
        let bidder = auction.high_bid.map(|(who, _)| who);
        self.send_to_character(seller, packet.clone());
        if let Some(bidder) = bidder {
            self.send_to_character(bidder, packet);
        }
    }

    fn handle_auction_bid(
        &mut self,
        session: SessionId,
        p: packets::AuctionBid,
    ) -> WorldResult<()> {
        let bidder = self.living_character_of(session)?;
        let content = self.content.clone();
        let auction_id = tmsrv_primitives::AuctionId(p.auction);
        let seller = self.market.auction(auction_id)?.seller;
        {
            let character = self.players.get_mut(bidder)?;
            character.take_gold(p.amount)?;
        }
        let receipt = match self.market.place_bid(
            auction_id,
            bidder,
            p.amount,
            self.now_ms,
            self.config.snipe_window.as_millis() as u64,
            self.config.snipe_extend.as_millis() as u64,
        ) {
            Ok(receipt) => receipt,
            Err(e) => {
                let character = self.players.get_mut(bidder)?;
                character.add_gold(p.amount)?;
                return Err(e);
            }
        };
        self.players.mark_dirty(bidder);
        self.push_gold_update(bidder);
        if receipt.won {
            let outcome = self
                .market
                .finalize_auction(auction_id, self.now_ms, &content.economy)?;
            if let Some(crate::market::SaleOutcome::Sold { winner, price }) = outcome {
                self.audit.record(
                    self.now_ms,
                    AuditEvent::AuctionSettled {
                        auction: auction_id,
                        seller,
                        winner: Some(winner),
                        price,
                    },
                );
            }
        } else {
            self.push_auction_state(auction_id);
        }
        Ok(())
    }

    // --- quests ---------------------------------------------------------

    fn handle_quest_accept(
        &mut self,
        session: SessionId,
        p: packets::QuestAccept,
    ) -> WorldResult<()> {
        let character_id = self.living_character_of(session)?;
        let content = self.content.clone();
        let template = content.quests.quest(p.quest)?;
        // the giver must be close enough to hand the work over
        let position = self.players.get(character_id)?.position;
        if let Ok(npc) = content.economy.npc(template.start_npc) {
            if npc.map != position.map
                || Position::new(npc.map, npc.x, npc.y).distance(&position)
                    > npc.interact_range.max(INTERACT_RANGE)
            {
                return Err(WorldError::OutOfRange);
            }
        }
        // forced rewards must fit at acceptance
        {
            let character = self.players.get(character_id)?;
            if !character
                .containers
                .has_space_for(&content.items, &template.rewards.items)
            {
                return Err(WorldError::InventoryFull);
            }
        }
        let level = self.players.get(character_id)?.level;
        let instance = self
            .quests
            .accept(&content, character_id, level, p.quest, self.now_ms)?;
        self.push_quest_state(character_id, instance);
        // collect objectives may already be satisfied by held items
        let held: Vec<(u16, u32)> = template
            .objectives
            .iter()
            .filter_map(|objective| match objective.kind {
                crate::content::ObjectiveKind::Collect { item, .. }
                | crate::content::ObjectiveKind::Deliver { item, .. } => {
                    let total = self
                        .players
                        .get(character_id)
                        .map(|c| c.containers.count_in_inventory(item))
                        .unwrap_or(0);
                    (total > 0).then_some((item, total))
                }
                _ => None,
            })
            .collect();
        for (item, total) in held {
            let report = self.quests.on_event(
                &content,
                character_id,
                QuestEvent::ItemAcquired {
                    item,
                    total_held: total,
                },
            );
            self.notify_quest_report(character_id, report);
        }
        Ok(())
    }

    fn handle_quest_complete(
        &mut self,
        session: SessionId,
        p: packets::QuestComplete,
    ) -> WorldResult<()> {
        let character_id = self.living_character_of(session)?;
        let content = self.content.clone();
        let instance = tmsrv_primitives::QuestInstanceId(p.instance);
        let quest_id = self.quests.instance(instance)?.quest;
        let template = content.quests.quest(quest_id)?;
        // turn-in requires standing at the end npc
        let at_npc = if template.auto_complete {
            None
        } else {
            let position = self.players.get(character_id)?.position;
            let npc = content.economy.npc(template.end_npc)?;
            if npc.map != position.map
                || Position::new(npc.map, npc.x, npc.y).distance(&position)
                    > npc.interact_range.max(INTERACT_RANGE)
            {
                return Err(WorldError::OutOfRange);
            }
            Some(template.end_npc)
        };
        // deliver objectives consume their items at turn-in
        let has_space = self.reward_space_available(instance);
        let choice = (!template.rewards.choice_items.is_empty()).then_some(p.reward_choice);
        let grant = self.quests.complete(
            &content,
            instance,
            at_npc,
            choice,
            has_space,
            self.now_ms,
        )?;
        for objective in &template.objectives {
            if let crate::content::ObjectiveKind::Deliver { item, count, .. } = objective.kind {
                let character = self.players.get_mut(character_id)?;
                let _ = character.containers.consume_from_inventory(item, count);
            }
        }
        self.apply_reward_grant(character_id, instance, grant);
        Ok(())
    }

    fn handle_quest_abandon(
        &mut self,
        session: SessionId,
        p: packets::QuestAbandon,
    ) -> WorldResult<()> {
        let character_id = self.character_of(session)?;
        let instance = tmsrv_primitives::QuestInstanceId(p.instance);
        self.quests.abandon(instance, character_id)?;
        self.push_quest_state(character_id, instance);
        self.quests.sweep_terminal();
        Ok(())
    }

    fn handle_quest_history(&mut self, session: SessionId) -> WorldResult<()> {
        use packets::{QuestHistoryEntry, QuestHistoryResult, QUEST_HISTORY_SLOTS};
        let character_id = self.character_of(session)?;
        let mut result = QuestHistoryResult::default();
        let completions = self.quests.completions_of(character_id);
        result.count = completions.len().min(QUEST_HISTORY_SLOTS) as u16;
        for (slot, (quest, count)) in completions.into_iter().take(QUEST_HISTORY_SLOTS).enumerate()
        {
            result.entries[slot] = QuestHistoryEntry {
                quest,
                completion_count: count as u16,
            };
        }
        self.send_to(session, ServerPacket::QuestHistoryResult(Box::new(result)));
        Ok(())
    }

    // --- friends --------------------------------------------------------

    fn handle_friend_add(&mut self, session: SessionId, p: packets::NamedTarget) -> WorldResult<()> {
        let character_id = self.character_of(session)?;
        let cap = self.config.friend_list_cap;
        let name = p.name.as_str().to_owned();
        {
            let character = self.players.get_mut(character_id)?;
            friends::add_friend(character, &name, cap)?;
        }
        self.players.mark_dirty(character_id);
        let online = self
            .players
            .by_name(&name)
            .map(|id| self.players.is_online(id))
            .unwrap_or(false);
        self.send_to_character(
            character_id,
            ServerPacket::FriendStatusNotify(packets::FriendStatusNotify {
                online: online as u8,
                reserved: [0; 3],
                name: WireName::from_str(&name),
            }),
        );
        Ok(())
    }

    fn handle_friend_remove(
        &mut self,
        session: SessionId,
        p: packets::NamedTarget,
    ) -> WorldResult<()> {
        let character_id = self.character_of(session)?;
        let character = self.players.get_mut(character_id)?;
        friends::remove_friend(character, p.name.as_str())?;
        self.players.mark_dirty(character_id);
        Ok(())
    }

    fn handle_block_add(&mut self, session: SessionId, p: packets::NamedTarget) -> WorldResult<()> {
        let character_id = self.character_of(session)?;
        let cap = self.config.friend_list_cap;
        let character = self.players.get_mut(character_id)?;
        friends::add_block(character, p.name.as_str(), cap)?;
        self.players.mark_dirty(character_id);
        Ok(())
    }

    fn handle_block_remove(
        &mut self,
        session: SessionId,
        p: packets::NamedTarget,
    ) -> WorldResult<()> {
        let character_id = self.character_of(session)?;
        let character = self.players.get_mut(character_id)?;
        friends::remove_block(character, p.name.as_str())?;
        self.players.mark_dirty(character_id);
        Ok(())
    }

    fn handle_admin(&mut self, session: SessionId, p: packets::AdminCommand) -> WorldResult<()> {
        let account = self.account_of(session)?;
        if !self.config.admin_accounts.contains(&account.0) {
            return Err(WorldError::ForbiddenOperation);
        }
        let end = p.text.iter().position(|b| *b == 0).unwrap_or(p.text.len());
        let line = String::from_utf8_lossy(&p.text[..end]).into_owned();
        let (code, message) = self.run_admin_command(session, account, &line);
        self.audit.record(
            self.now_ms,
            AuditEvent::AdminAction {
                admin: account,
                command: line,
                succeeded: code == 0,
            },
        );
        let mut text = [0u8; CHAT_TEXT_LEN];
        let bytes = message.as_bytes();
        let len = bytes.len().min(CHAT_TEXT_LEN);
        text[..len].copy_from_slice(&bytes[..len]);
        self.send_to(
            session,
            ServerPacket::AdminResult(Box::new(packets::AdminResult {
                code,
                reserved: 0,
                text,
            })),
        );
        Ok(())
    }
}

fn class_code(class: CharacterClass) -> u8 {
    match class {
        CharacterClass::TransKnight => 0,
        CharacterClass::Foema => 1,
        CharacterClass::BeastMaster => 2,
        CharacterClass::Huntress => 3,
    }
}

fn class_from_code(code: u8) -> WorldResult<CharacterClass> {
    match code {
        0 => Ok(CharacterClass::TransKnight),
        1 => Ok(CharacterClass::Foema),
        2 => Ok(CharacterClass::BeastMaster),
        3 => Ok(CharacterClass::Huntress),
        _ => Err(WorldError::InvalidAmount),
    }
}
