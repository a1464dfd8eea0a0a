//! End-to-end scenarios: a world driven through real session handles, the
//! way the session service feeds it.
use std::sync::Arc;

use futures::channel::mpsc as fmpsc;

use network_session::{
    packets::{self, ClientPacket, ServerPacket},
    session::{LifecycleState, SharedState},
    SessionCommand, SessionHandle, SessionId,
};
use tmsrv_primitives::{CharacterClass, CharacterId, ItemInstance, MobId, Position};
use world_core::{
    content::EquipSlot,
    security::BanEntry,
    social::party::ExpPolicy,
    Core, ContentTables, LogAuditSink, MemoryStore, World, WorldConfig, WorldError,
};

struct Client {
    session: SessionId,
    inbox: tokio::sync::mpsc::Sender<ClientPacket>,
    commands: fmpsc::UnboundedReceiver<SessionCommand>,
}

impl Client {
    fn send(&self, packet: ClientPacket) {
        self.inbox.try_send(packet).expect("inbox has room");
    }

    fn drain(&mut self) -> Vec<ServerPacket> {
        let mut out = Vec::new();
        while let Ok(Some(command)) = self.commands.try_next() {
            match command {
                SessionCommand::Send(packet) | SessionCommand::Kick(packet) => out.push(packet),
                _ => (),
            }
        }
        out
    }

    fn was_kicked(&mut self) -> bool {
        self.drain()
            .iter()
            .any(|p| matches!(p, ServerPacket::KickNotify(_)))
    }
}

fn fresh_world() -> World {
    let content = ContentTables::fixture();
    let core = Core::assemble(
        WorldConfig::default(),
        content,
        Arc::new(MemoryStore::default()),
        LogAuditSink,
    );
    core.world
}

fn connect(world: &mut World, session: u32, account: u32) -> Client {
    let (inbox_tx, inbox) = tokio::sync::mpsc::channel(256);
    let (commands_tx, commands) = fmpsc::unbounded();
    let session = SessionId(session);
    world.session_opened(SessionHandle {
        session,
        account: tmsrv_primitives::AccountId(account),
        address: "test".into(),
        inbox,
        sender: commands_tx,
        state: SharedState::new(LifecycleState::Authenticated),
    });
    Client {
        session,
        inbox: inbox_tx,
        commands,
    }
}

/// Creates a character for the client's account and walks it into the
/// world.
fn enter(world: &mut World, client: &Client, name: &str) -> CharacterId {
    let account = world
        .session_account(client.session)
        .expect("session is open");
    let content = world.content.clone();
    let spawn = content
        .maps
        .map(tmsrv_primitives::MapId(1))
        .expect("fixture map")
        .respawn_position();
    let id = world
        .players
        .create_character(&content, account, name, CharacterClass::TransKnight, spawn)
        .expect("character creates");
    client.send(ClientPacket::CharacterSelect(packets::CharacterSelect {
        slot: 0,
        reserved: [0; 3],
    }));
    world.step(world.now_ms + 50);
    assert_eq!(world.players.character_of(client.session), Some(id));
    id
}

fn give(world: &mut World, id: CharacterId, item: ItemInstance) -> u8 {
    let content = world.content.clone();
    let slot = world
        .players
        .get_mut(id)
        .expect("character exists")
        .containers
        .add_to_inventory(&content.items, item)
        .expect("inventory has room");
    slot
}

fn total_units(world: &World, ids: &[CharacterId]) -> u64 {
    ids.iter()
        .map(|id| world.players.get(*id).expect("exists").containers.total_units())
        .sum::<u64>()
        + world.ground.total_units()
        + world.market.escrow_totals().0
}

#[test]
fn trade_disconnect_before_commit_returns_everything() {
    let mut world = fresh_world();
    let mut a = connect(&mut world, 1, 10);
    let mut b = connect(&mut world, 2, 20);
    let char_a = enter(&mut world, &a, "aldebaran");
    let char_b = enter(&mut world, &b, "betelgeuse");
    let sword_slot = give(&mut world, char_a, ItemInstance::new(1, 100));
    give(&mut world, char_b, ItemInstance::new(100, 7));
    let before = total_units(&world, &[char_a, char_b]);

    a.send(ClientPacket::TradeStart(packets::TargetCharacter {
        target: char_b.0,
    }));
    world.step(1000);
    a.send(ClientPacket::TradeSetItem(packets::TradeSetItem {
        inventory_slot: sword_slot,
        trade_slot: 0,
        reserved: 0,
        count: 1,
    }));
    a.send(ClientPacket::TradeLock);
    b.send(ClientPacket::TradeLock);
    world.step(1100);
    b.send(ClientPacket::TradeConfirm);
    world.step(1200);

    // A vanishes before confirming; the session layer reports the close
    world.session_closed(a.session);
    world.step(1300);

    // nothing moved, nothing is locked, nobody is mid-trade
    let owner = world.players.get(char_a).expect("a still exists");
    assert_eq!(owner.containers.count_in_inventory(1), 1, "sword back home");
    assert!(owner.trade.is_none());
    let other = world.players.get(char_b).expect("b exists");
    assert!(other.trade.is_none());
    assert_eq!(other.containers.count_in_inventory(1), 0);
    assert_eq!(total_units(&world, &[char_a, char_b]), before);
    let _ = b.drain();
}

#[test]
fn equip_of_locked_offer_fails_and_trade_completes() {
    let mut world = fresh_world();
    let mut a = connect(&mut world, 1, 10);
    let mut b = connect(&mut world, 2, 20);
    let char_a = enter(&mut world, &a, "aldebaran");
    let char_b = enter(&mut world, &b, "betelgeuse");
    let sword_slot = give(&mut world, char_a, ItemInstance::new(1, 100));
    let gold_before: u64 =
        u64::from(world.players.get(char_a).expect("a").gold) + u64::from(world.players.get(char_b).expect("b").gold);

    a.send(ClientPacket::TradeStart(packets::TargetCharacter {
        target: char_b.0,
    }));
    world.step(1000);
    a.send(ClientPacket::TradeSetItem(packets::TradeSetItem {
        inventory_slot: sword_slot,
        trade_slot: 0,
        reserved: 0,
        count: 1,
    }));
    a.send(ClientPacket::TradeLock);
    world.step(1100);

    // mid-trade equip attempt on the locked sword
    let _ = a.drain();
    a.send(ClientPacket::ItemMove(packets::ItemMove {
        src_container: 0,
        src_slot: sword_slot,
        dst_container: 1,
        dst_slot: EquipSlot::Weapon as u8,
        count: 0,
    }));
    world.step(1200);
    let locked_code = WorldError::ItemLocked.client_code();
    assert!(
        a.drain().iter().any(|p| matches!(
            p,
            ServerPacket::ErrorNotify(e) if e.code == locked_code
        )),
        "equip of a locked offer must be refused"
    );

    b.send(ClientPacket::TradeLock);
    world.step(1300);
    a.send(ClientPacket::TradeConfirm);
    b.send(ClientPacket::TradeConfirm);
    world.step(1400);

    // the sword crossed over
    assert_eq!(
        world
            .players
            .get(char_b)
            .expect("b")
            .containers
            .count_in_inventory(1),
        1
    );
    assert_eq!(
        world
            .players
            .get(char_a)
            .expect("a")
            .containers
            .count_in_inventory(1),
        0
    );
    assert_eq!(
        u64::from(world.players.get(char_a).expect("a").gold)
            + u64::from(world.players.get(char_b).expect("b").gold),
        gold_before
    );
    let _ = b.drain();
}

#[test]
fn party_kill_credit_splits_level_weighted() {
    let mut world = fresh_world();
    let a = connect(&mut world, 1, 10);
    let b = connect(&mut world, 2, 20);
    let char_a = enter(&mut world, &a, "aldebaran");
    let char_b = enter(&mut world, &b, "betelgeuse");

    // a party of two at levels 10 and 20, level-weighted split
    world
        .parties
        .invite(char_a, None, char_b, None, 0, 60_000)
        .expect("invite");
    let (party, _) = world.parties.accept(char_b, 10).expect("accept");
    world
        .parties
        .set_policies(
            party,
            char_a,
            world_core::social::party::LootPolicy::FreeForAll,
            ExpPolicy::LevelWeighted,
        )
        .expect("policy");
    world.players.get_mut(char_a).expect("a").party = Some(party);
    world.players.get_mut(char_b).expect("b").party = Some(party);
    world.players.get_mut(char_a).expect("a").level = 10;
    world.players.get_mut(char_b).expect("b").level = 20;
    world.players.get_mut(char_a).expect("a").experience = 0;
    world.players.get_mut(char_b).expect("b").experience = 0;

    // the bear contributed most of the damage to B
    let mob = *world.mobs.keys().next().expect("fixture spawns wolves");
    world
        .mobs
        .get_mut(&mob)
        .expect("mob")
        .threat
        .add(char_a, 40);
    world
        .mobs
        .get_mut(&mob)
        .expect("mob")
        .threat
        .add(char_b, 400);
    world.on_mob_death(mob, char_a);

    // wolf grants 100: floor shares 33/66, remainder to the top damage
    // dealer
    assert_eq!(world.players.get(char_a).expect("a").experience, 33);
    assert_eq!(world.players.get(char_b).expect("b").experience, 67);
}

#[test]
fn quest_kill_progress_completes_on_the_fifth_wolf() {
    let mut world = fresh_world();
    let a = connect(&mut world, 1, 10);
    let char_a = enter(&mut world, &a, "aldebaran");
    let content = world.content.clone();
    let instance = world
        .quests
        .accept(&content, char_a, 10, 900, 0)
        .expect("quest accepted");
    world.players.get_mut(char_a).expect("a").experience = 0;

    // five wolves fall; a bear in between must not count
    let home = Position::new(tmsrv_primitives::MapId(1), 120, 120);
    let bear = world.spawn_mob_at(502, home, vec![]).expect("bear spawns");
    let mut wolves: Vec<MobId> = Vec::new();
    for _ in 0..5 {
        wolves.push(world.spawn_mob_at(501, home, vec![]).expect("wolf spawns"));
    }
    world
        .mobs
        .get_mut(&bear)
        .expect("bear")
        .threat
        .add(char_a, 1);
    world.on_mob_death(bear, char_a);
    assert_eq!(
        world.quests.instance(instance).expect("alive").progress[0],
        0,
        "bears do not advance a wolf objective"
    );

    for (index, wolf) in wolves.iter().enumerate() {
        world
            .mobs
            .get_mut(wolf)
            .expect("wolf")
            .threat
            .add(char_a, 1);
        world.on_mob_death(*wolf, char_a);
        if index < 4 {
            assert_eq!(
                world.quests.instance(instance).expect("alive").progress[0],
                index as u32 + 1
            );
        }
    }
    // fifth kill auto-completed the quest and granted the rewards
    assert_eq!(
        world.quests.completions_of(char_a),
        vec![(900, 1)],
        "completion fires exactly on the fifth kill"
    );
    let hero = world.players.get(char_a).expect("a");
    assert!(hero.level >= 3, "kill and quest experience leveled the hero");
    assert!(hero.gold >= 200);
    assert!(hero.containers.count_in_inventory(100) >= 2);
}

#[test]
fn banned_character_is_kicked_at_select() {
    let mut world = fresh_world();
    let mut a = connect(&mut world, 1, 10);
    let account = tmsrv_primitives::AccountId(10);
    let content = world.content.clone();
    let spawn = content
        .maps
        .map(tmsrv_primitives::MapId(1))
        .expect("fixture map")
        .respawn_position();
    let id = world
        .players
        .create_character(&content, account, "banned", CharacterClass::Foema, spawn)
        .expect("creates");
    world.security.add_ban(BanEntry {
        address: None,
        account: None,
        character: Some(id),
        reason: "test".into(),
        start_ms: 0,
        end_ms: 0,
        permanent: true,
    });

    a.send(ClientPacket::CharacterSelect(packets::CharacterSelect {
        slot: 0,
        reserved: [0; 3],
    }));
    world.step(1000);
    assert!(a.was_kicked());
    assert_eq!(world.players.character_of(a.session), None);
}

#[test]
fn shop_round_trip_conserves_gold() {
    let mut world = fresh_world();
    let mut a = connect(&mut world, 1, 10);
    let char_a = enter(&mut world, &a, "aldebaran");
    world
        .players
        .get_mut(char_a)
        .expect("a")
        .add_gold(1000)
        .expect("seed gold");

    // the fixture spawns the character next to the shopkeeper
    a.send(ClientPacket::ShopBuy(packets::ShopBuy {
        shop_slot: 0,
        reserved: 0,
        count: 4,
    }));
    world.step(1000);
    let hero = world.players.get(char_a).expect("a");
    assert_eq!(hero.gold, 1000 - 4 * 50);
    assert_eq!(hero.containers.count_in_inventory(100), 4);

    a.send(ClientPacket::ShopSell(packets::ShopSell {
        inventory_slot: {
            // wherever the potions landed
            let hero = world.players.get(char_a).expect("a");
            hero.containers
                .inventory()
                .iter()
                .position(|slot| slot.item_id == 100)
                .expect("potions present") as u8
        },
        reserved: [0; 3],
        count: 4,
    }));
    world.step(1100);
    let hero = world.players.get(char_a).expect("a");
    // 40% sell-back on the 50-gold template
    assert_eq!(hero.gold, 1000 - 200 + 4 * 20);
    assert_eq!(hero.containers.count_in_inventory(100), 0);
    let _ = a.drain();
}
