//! Packet catalogue: opcodes, fixed-layout payloads and the per-type size
//! table used by the validation pipeline.
//!
//! Payload structs only use fixed-width integers and fixed-size arrays, so
//! their SCALE encoding is the exact little-endian packed layout the client
//! speaks. Every frame carries at least four payload bytes; operations with
//! no arguments carry a reserved word.
use std::{collections::HashMap, sync::OnceLock};

use codec::{Decode, DecodeAll, Encode};
use tmsrv_primitives::{ItemInstance, WireName};

/// Maximum chat text bytes, NUL-padded on the wire.
pub const CHAT_TEXT_LEN: usize = 128;
/// Maximum guild notice bytes.
pub const NOTICE_LEN: usize = 64;
/// Character slots per account.
pub const CHARACTER_SLOTS: usize = 4;
/// Login tickets issued by the account authority.
pub const TICKET_LEN: usize = 16;

/// Client → server opcodes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u16)]
pub enum ClientOpcode {
    KeepAlive = 0x00F,
    Handshake = 0x100,
    RekeyAck = 0x112,
    AccountLogin = 0x20C,
    CharacterCreate = 0x20D,
    CharacterDelete = 0x20E,
    CharacterSelect = 0x20F,
    CharacterList = 0x210,
    Logout = 0x215,
    NpcTalk = 0x230,
    Chat = 0x310,
    ShopOpen = 0x334,
    ShopBuy = 0x335,
    ShopSell = 0x336,
    ShopClose = 0x337,
    Move = 0x27A,
    Attack = 0x368,
    SkillUse = 0x36A,
    ItemUse = 0x373,
    ItemDrop = 0x374,
    ItemGet = 0x375,
    ItemMove = 0x376,
    TradeStart = 0x37B,
    TradeCancel = 0x37D,
    TradeSetItem = 0x37E,
    TradeLock = 0x37F,
    TradeConfirm = 0x380,
    TradeClearItem = 0x381,
    TradeSetGold = 0x382,
    PartyInvite = 0x387,
    PartyRespond = 0x388,
    PartyLeave = 0x389,
    PartyKick = 0x38A,
    PartySetPolicy = 0x38B,
    StorageOpen = 0x390,
    StoragePut = 0x391,
    StorageGet = 0x392,
    StorageGold = 0x393,
    StorageClose = 0x394,
    Refine = 0x3A0,
    Socket = 0x3A1,
    MarketList = 0x3B0,
    MarketBuy = 0x3B1,
    MarketCancel = 0x3B2,
    AuctionCreate = 0x3B3,
    AuctionBid = 0x3B4,
    GuildCreate = 0x3C0,
    GuildInvite = 0x3C1,
    GuildRespond = 0x3C2,
    GuildLeave = 0x3C3,
    GuildKick = 0x3C4,
    GuildNotice = 0x3C5,
    GuildWarDeclare = 0x3C6,
    GuildWarRespond = 0x3C7,
    GuildAllianceSet = 0x3C8,
    GuildPromote = 0x3C9,
    QuestAccept = 0x3D0,
    QuestComplete = 0x3D1,
    QuestAbandon = 0x3D2,
    QuestHistory = 0x3D3,
    FriendAdd = 0x3E0,
    FriendRemove = 0x3E1,
    BlockAdd = 0x3E2,
    BlockRemove = 0x3E3,
    AdminCommand = 0x3F0,
}

/// Server → client opcodes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u16)]
pub enum ServerOpcode {
    HandshakeAck = 0x101,
    Rekey = 0x113,
    ErrorNotify = 0x118,
    LoginResult = 0x211,
    CharacterListResult = 0x212,
    EnterWorld = 0x216,
    KickNotify = 0x217,
    MoveNotify = 0x27C,
    TeleportNotify = 0x27D,
    SpawnNotify = 0x29A,
    DespawnNotify = 0x29B,
    GroundItemNotify = 0x29C,
    DeathNotify = 0x29D,
    RespawnNotify = 0x29E,
    ChatNotify = 0x311,
    ShopInventory = 0x338,
    ShopResult = 0x339,
    AttackResult = 0x369,
    StatusEffectNotify = 0x36B,
    InventorySlotUpdate = 0x377,
    GoldUpdate = 0x378,
    StatsUpdate = 0x379,
    TradeStateNotify = 0x383,
    TradeSlotNotify = 0x384,
    TradeGoldNotify = 0x385,
    PartyStateNotify = 0x38C,
    StorageGoldResult = 0x395,
    MarketResult = 0x3B5,
    AuctionState = 0x3B6,
    GuildStateNotify = 0x3CA,
    QuestStateNotify = 0x3D4,
    QuestHistoryResult = 0x3D5,
    FriendStatusNotify = 0x3E4,
    AdminResult = 0x3F1,
}

// --- client payloads ---------------------------------------------------

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct KeepAlive {
    pub client_tick: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct Handshake {
    pub protocol_version: u16,
    pub client_build: u16,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct RekeyAck {
    pub from_sequence: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct AccountLogin {
    pub account: WireName,
    pub ticket: [u8; TICKET_LEN],
    pub cipher: u8,
    pub reserved: [u8; 3],
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct CharacterCreate {
    pub slot: u8,
    pub class: u8,
    pub reserved: u16,
    pub name: WireName,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct CharacterDelete {
    pub slot: u8,
    pub reserved: [u8; 3],
    pub name: WireName,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct CharacterSelect {
    pub slot: u8,
    pub reserved: [u8; 3],
}

/// Carried by every parameterless request so the frame meets the minimum
/// size.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct Empty {
    pub reserved: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct Move {
    pub x: u16,
    pub y: u16,
    pub running: u8,
    pub reserved: [u8; 3],
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct Attack {
    pub target_kind: u8,
    pub reserved: [u8; 3],
    pub target_id: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct SkillUse {
    pub skill_id: u16,
    pub target_kind: u8,
    pub reserved: u8,
    pub target_id: u32,
    pub x: u16,
    pub y: u16,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct ItemUse {
    pub slot: u8,
    pub reserved: [u8; 3],
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct ItemDrop {
    pub slot: u8,
    pub reserved: [u8; 3],
    pub count: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct ItemGet {
    pub ground_id: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct ItemMove {
    pub src_container: u8,
    pub src_slot: u8,
    pub dst_container: u8,
    pub dst_slot: u8,
    pub count: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct Refine {
    pub item_slot: u8,
    pub material_slot: u8,
    /// 0xFF when no protection scroll is offered.
    pub protect_slot: u8,
    pub reserved: u8,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct Socket {
    pub item_slot: u8,
    pub gem_slot: u8,
    pub socket_index: u8,
    pub reserved: u8,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Encode, Decode)]
pub struct Chat {
    pub channel: u8,
    pub reserved: [u8; 3],
    /// Whisper target; all zeroes otherwise.
    pub target: WireName,
    pub text: [u8; CHAT_TEXT_LEN],
}

impl Default for Chat {
    fn default() -> Self {
        Self {
            channel: 0,
            reserved: [0; 3],
            target: WireName::default(),
            text: [0; CHAT_TEXT_LEN],
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct TargetCharacter {
    pub target: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct PartyRespond {
    pub party: u32,
    pub accept: u8,
    pub reserved: [u8; 3],
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct PartySetPolicy {
    pub loot_policy: u8,
    pub exp_policy: u8,
    pub reserved: u16,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct GuildCreate {
    pub name: WireName,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct GuildRespond {
    pub guild: u32,
    pub accept: u8,
    pub reserved: [u8; 3],
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Encode, Decode)]
pub struct GuildNotice {
    pub text: [u8; NOTICE_LEN],
}

impl Default for GuildNotice {
    fn default() -> Self {
        Self {
            text: [0; NOTICE_LEN],
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct GuildWarRespond {
    pub guild: u32,
    pub accept: u8,
    pub reserved: [u8; 3],
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct GuildAllianceSet {
    pub guild: u32,
    pub relation: u8,
    pub reserved: [u8; 3],
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct GuildPromote {
    pub member: u32,
    pub role: u8,
    pub reserved: [u8; 3],
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct TradeSetItem {
    pub inventory_slot: u8,
    pub trade_slot: u8,
    pub reserved: u16,
    pub count: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct TradeClearItem {
    pub trade_slot: u8,
    pub reserved: [u8; 3],
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct TradeSetGold {
    pub gold: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct ShopOpen {
    pub npc: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct ShopBuy {
    pub shop_slot: u8,
    pub reserved: u8,
    pub count: u16,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct ShopSell {
    pub inventory_slot: u8,
    pub reserved: [u8; 3],
    pub count: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct StoragePut {
    pub inventory_slot: u8,
    pub bank_slot: u8,
    pub reserved: u16,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct StorageGet {
    pub bank_slot: u8,
    pub inventory_slot: u8,
    pub reserved: u16,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct StorageGold {
    /// 0 = deposit, 1 = withdraw.
    pub direction: u8,
    pub reserved: [u8; 3],
    pub amount: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct MarketList {
    pub inventory_slot: u8,
    pub duration_hours: u8,
    pub reserved: u16,
    pub price: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct MarketBuy {
    pub listing: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct MarketCancel {
    pub listing: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct AuctionCreate {
    pub inventory_slot: u8,
    pub kind: u8,
    pub reserved: u16,
    pub start_price: u32,
    pub reserve_price: u32,
    pub buyout_price: u32,
    pub duration_secs: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct AuctionBid {
    pub auction: u32,
    pub amount: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct NpcTalk {
    pub npc: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct QuestAccept {
    pub quest: u16,
    pub reserved: u16,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct QuestComplete {
    pub instance: u32,
    pub reward_choice: u8,
    pub reserved: [u8; 3],
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct QuestAbandon {
    pub instance: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct NamedTarget {
    pub name: WireName,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Encode, Decode)]
pub struct AdminCommand {
    pub text: [u8; CHAT_TEXT_LEN],
}

impl Default for AdminCommand {
    fn default() -> Self {
        Self {
            text: [0; CHAT_TEXT_LEN],
        }
    }
}

/// A fully decoded inbound packet.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientPacket {
    KeepAlive(KeepAlive),
    Handshake(Handshake),
    RekeyAck(RekeyAck),
    AccountLogin(AccountLogin),
    CharacterCreate(CharacterCreate),
    CharacterDelete(CharacterDelete),
    CharacterSelect(CharacterSelect),
    CharacterList,
    Logout,
    Move(Move),
    Attack(Attack),
    SkillUse(SkillUse),
    ItemUse(ItemUse),
    ItemDrop(ItemDrop),
    ItemGet(ItemGet),
    ItemMove(ItemMove),
    Refine(Refine),
    Socket(Socket),
    Chat(Chat),
    NpcTalk(NpcTalk),
    PartyInvite(TargetCharacter),
    PartyRespond(PartyRespond),
    PartyLeave,
    PartyKick(TargetCharacter),
    PartySetPolicy(PartySetPolicy),
    GuildCreate(GuildCreate),
    GuildInvite(TargetCharacter),
    GuildRespond(GuildRespond),
    GuildLeave,
    GuildKick(TargetCharacter),
    GuildNotice(GuildNotice),
    GuildWarDeclare(TargetCharacter),
    GuildWarRespond(GuildWarRespond),
    GuildAllianceSet(GuildAllianceSet),
    GuildPromote(GuildPromote),
    TradeStart(TargetCharacter),
    TradeSetItem(TradeSetItem),
    TradeClearItem(TradeClearItem),
    TradeSetGold(TradeSetGold),
    TradeLock,
    TradeConfirm,
    TradeCancel,
    ShopOpen(ShopOpen),
    ShopBuy(ShopBuy),
    ShopSell(ShopSell),
    ShopClose,
    StorageOpen,
    StoragePut(StoragePut),
    StorageGet(StorageGet),
    StorageGold(StorageGold),
    StorageClose,
    MarketList(MarketList),
    MarketBuy(MarketBuy),
    MarketCancel(MarketCancel),
    AuctionCreate(AuctionCreate),
    AuctionBid(AuctionBid),
    QuestAccept(QuestAccept),
    QuestComplete(QuestComplete),
    QuestAbandon(QuestAbandon),
    QuestHistory,
    FriendAdd(NamedTarget),
    FriendRemove(NamedTarget),
    BlockAdd(NamedTarget),
    BlockRemove(NamedTarget),
    AdminCommand(AdminCommand),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DecodeFailure {
    UnknownType(u16),
    WrongSize { expected: usize, actual: usize },
    Malformed,
}

impl ClientOpcode {
    pub fn from_u16(raw: u16) -> Option<Self> {
        ALL_CLIENT_OPCODES.iter().copied().find(|op| *op as u16 == raw)
    }
}

const ALL_CLIENT_OPCODES: &[ClientOpcode] = &[
    ClientOpcode::KeepAlive,
    ClientOpcode::Handshake,
    ClientOpcode::RekeyAck,
    ClientOpcode::AccountLogin,
    ClientOpcode::CharacterCreate,
    ClientOpcode::CharacterDelete,
    ClientOpcode::CharacterSelect,
    ClientOpcode::CharacterList,
    ClientOpcode::Logout,
    ClientOpcode::NpcTalk,
    ClientOpcode::Chat,
    ClientOpcode::ShopOpen,
    ClientOpcode::ShopBuy,
    ClientOpcode::ShopSell,
    ClientOpcode::ShopClose,
    ClientOpcode::Move,
    ClientOpcode::Attack,
    ClientOpcode::SkillUse,
    ClientOpcode::ItemUse,
    ClientOpcode::ItemDrop,
    ClientOpcode::ItemGet,
    ClientOpcode::ItemMove,
    ClientOpcode::TradeStart,
    ClientOpcode::TradeCancel,
    ClientOpcode::TradeSetItem,
    ClientOpcode::TradeLock,
    ClientOpcode::TradeConfirm,
    ClientOpcode::TradeClearItem,
    ClientOpcode::TradeSetGold,
    ClientOpcode::PartyInvite,
    ClientOpcode::PartyRespond,
    ClientOpcode::PartyLeave,
    ClientOpcode::PartyKick,
    ClientOpcode::PartySetPolicy,
    ClientOpcode::StorageOpen,
    ClientOpcode::StoragePut,
    ClientOpcode::StorageGet,
    ClientOpcode::StorageGold,
    ClientOpcode::StorageClose,
    ClientOpcode::Refine,
    ClientOpcode::Socket,
    ClientOpcode::MarketList,
    ClientOpcode::MarketBuy,
    ClientOpcode::MarketCancel,
    ClientOpcode::AuctionCreate,
    ClientOpcode::AuctionBid,
    ClientOpcode::GuildCreate,
    ClientOpcode::GuildInvite,
    ClientOpcode::GuildRespond,
    ClientOpcode::GuildLeave,
    ClientOpcode::GuildKick,
    ClientOpcode::GuildNotice,
    ClientOpcode::GuildWarDeclare,
    ClientOpcode::GuildWarRespond,
    ClientOpcode::GuildAllianceSet,
    ClientOpcode::GuildPromote,
    ClientOpcode::QuestAccept,
    ClientOpcode::QuestComplete,
    ClientOpcode::QuestAbandon,
    ClientOpcode::QuestHistory,
    ClientOpcode::FriendAdd,
    ClientOpcode::FriendRemove,
    ClientOpcode::BlockAdd,
    ClientOpcode::BlockRemove,
    ClientOpcode::AdminCommand,
];

fn decode_as<T: Decode + Default + Encode>(payload: &[u8]) -> Result<T, DecodeFailure> {
    let expected = expected_payload_len_of::<T>();
    if payload.len() != expected {
        return Err(DecodeFailure::WrongSize {
            expected,
            actual: payload.len(),
        });
    }
    T::decode_all(&mut &payload[..]).map_err(|_| DecodeFailure::Malformed)
}

fn expected_payload_len_of<T: Default + Encode>() -> usize {
    T::default().encode().len()
}

/// The per-type expected payload size table, built once on first use.
pub fn expected_payload_len(opcode: ClientOpcode) -> usize {
    static TABLE: OnceLock<HashMap<u16, usize>> = OnceLock::new();
    let table = TABLE.get_or_init(|| {
        ALL_CLIENT_OPCODES
            .iter()
            .map(|op| (*op as u16, payload_len_for(*op)))
            .collect()
    });
    table[&(opcode as u16)]
}

fn payload_len_for(opcode: ClientOpcode) -> usize {
    use ClientOpcode::*;
    match opcode {
        KeepAlive => expected_payload_len_of::<self::KeepAlive>(),
        Handshake => expected_payload_len_of::<self::Handshake>(),
        RekeyAck => expected_payload_len_of::<self::RekeyAck>(),
        AccountLogin => expected_payload_len_of::<self::AccountLogin>(),
        CharacterCreate => expected_payload_len_of::<self::CharacterCreate>(),
        CharacterDelete => expected_payload_len_of::<self::CharacterDelete>(),
        CharacterSelect => expected_payload_len_of::<self::CharacterSelect>(),
        CharacterList | Logout | PartyLeave | GuildLeave | TradeLock | TradeConfirm
        | TradeCancel | ShopClose | StorageOpen | StorageClose | QuestHistory => {
            expected_payload_len_of::<Empty>()
        }
        NpcTalk => expected_payload_len_of::<self::NpcTalk>(),
        Chat => expected_payload_len_of::<self::Chat>(),
        ShopOpen => expected_payload_len_of::<self::ShopOpen>(),
        ShopBuy => expected_payload_len_of::<self::ShopBuy>(),
        ShopSell => expected_payload_len_of::<self::ShopSell>(),
        Move => expected_payload_len_of::<self::Move>(),
        Attack => expected_payload_len_of::<self::Attack>(),
        SkillUse => expected_payload_len_of::<self::SkillUse>(),
        ItemUse => expected_payload_len_of::<self::ItemUse>(),
        ItemDrop => expected_payload_len_of::<self::ItemDrop>(),
        ItemGet => expected_payload_len_of::<self::ItemGet>(),
        ItemMove => expected_payload_len_of::<self::ItemMove>(),
        TradeStart | PartyInvite | PartyKick | GuildInvite | GuildKick | GuildWarDeclare => {
            expected_payload_len_of::<TargetCharacter>()
        }
        TradeSetItem => expected_payload_len_of::<self::TradeSetItem>(),
        TradeClearItem => expected_payload_len_of::<self::TradeClearItem>(),
        TradeSetGold => expected_payload_len_of::<self::TradeSetGold>(),
        PartyRespond => expected_payload_len_of::<self::PartyRespond>(),
        PartySetPolicy => expected_payload_len_of::<self::PartySetPolicy>(),
        StoragePut => expected_payload_len_of::<self::StoragePut>(),
        StorageGet => expected_payload_len_of::<self::StorageGet>(),
        StorageGold => expected_payload_len_of::<self::StorageGold>(),
        Refine => expected_payload_len_of::<self::Refine>(),
        Socket => expected_payload_len_of::<self::Socket>(),
        MarketList => expected_payload_len_of::<self::MarketList>(),
        MarketBuy => expected_payload_len_of::<self::MarketBuy>(),
        MarketCancel => expected_payload_len_of::<self::MarketCancel>(),
        AuctionCreate => expected_payload_len_of::<self::AuctionCreate>(),
        AuctionBid => expected_payload_len_of::<self::AuctionBid>(),
        GuildCreate => expected_payload_len_of::<self::GuildCreate>(),
        GuildRespond => expected_payload_len_of::<self::GuildRespond>(),
        GuildNotice => expected_payload_len_of::<self::GuildNotice>(),
        GuildWarRespond => expected_payload_len_of::<self::GuildWarRespond>(),
        GuildAllianceSet => expected_payload_len_of::<self::GuildAllianceSet>(),
        GuildPromote => expected_payload_len_of::<self::GuildPromote>(),
        QuestAccept => expected_payload_len_of::<self::QuestAccept>(),
        QuestComplete => expected_payload_len_of::<self::QuestComplete>(),
        QuestAbandon => expected_payload_len_of::<self::QuestAbandon>(),
        FriendAdd | FriendRemove | BlockAdd | BlockRemove => {
            expected_payload_len_of::<NamedTarget>()
        }
        AdminCommand => expected_payload_len_of::<self::AdminCommand>(),
    }
}

impl ClientPacket {
    /// Decodes the payload of a validated frame. The caller has already
    /// stripped compression and crypto.
    pub fn decode(packet_type: u16, payload: &[u8]) -> Result<Self, DecodeFailure> {
        use ClientOpcode as Op;
        let opcode = Op::from_u16(packet_type).ok_or(DecodeFailure::UnknownType(packet_type))?;
        let packet = match opcode {
            Op::KeepAlive => ClientPacket::KeepAlive(decode_as(payload)?),
            Op::Handshake => ClientPacket::Handshake(decode_as(payload)?),
            Op::RekeyAck => ClientPacket::RekeyAck(decode_as(payload)?),
            Op::AccountLogin => ClientPacket::AccountLogin(decode_as(payload)?),
            Op::CharacterCreate => ClientPacket::CharacterCreate(decode_as(payload)?),
            Op::CharacterDelete => ClientPacket::CharacterDelete(decode_as(payload)?),
            Op::CharacterSelect => ClientPacket::CharacterSelect(decode_as(payload)?),
            Op::CharacterList => {
                decode_as::<Empty>(payload)?;
                ClientPacket::CharacterList
            }
            Op::Logout => {
                decode_as::<Empty>(payload)?;
                ClientPacket::Logout
            }
            Op::NpcTalk => ClientPacket::NpcTalk(decode_as(payload)?),
            Op::Chat => ClientPacket::Chat(decode_as(payload)?),
            Op::ShopOpen => ClientPacket::ShopOpen(decode_as(payload)?),
            Op::ShopBuy => ClientPacket::ShopBuy(decode_as(payload)?),
            Op::ShopSell => ClientPacket::ShopSell(decode_as(payload)?),
            Op::ShopClose => {
                decode_as::<Empty>(payload)?;
                ClientPacket::ShopClose
            }
            Op::Move => ClientPacket::Move(decode_as(payload)?),
            Op::Attack => ClientPacket::Attack(decode_as(payload)?),
            Op::SkillUse => ClientPacket::SkillUse(decode_as(payload)?),
            Op::ItemUse => ClientPacket::ItemUse(decode_as(payload)?),
            Op::ItemDrop => ClientPacket::ItemDrop(decode_as(payload)?),
            Op::ItemGet => ClientPacket::ItemGet(decode_as(payload)?),
            Op::ItemMove => ClientPacket::ItemMove(decode_as(payload)?),
            Op::TradeStart => ClientPacket::TradeStart(decode_as(payload)?),
            Op::TradeCancel => {
                decode_as::<Empty>(payload)?;
                ClientPacket::TradeCancel
            }
            Op::TradeSetItem => ClientPacket::TradeSetItem(decode_as(payload)?),
            Op::TradeLock => {
                decode_as::<Empty>(payload)?;
                ClientPacket::TradeLock
            }
            Op::TradeConfirm => {
                decode_as::<Empty>(payload)?;
                ClientPacket::TradeConfirm
            }
            Op::TradeClearItem => ClientPacket::TradeClearItem(decode_as(payload)?),
            Op::TradeSetGold => ClientPacket::TradeSetGold(decode_as(payload)?),
            Op::PartyInvite => ClientPacket::PartyInvite(decode_as(payload)?),
            Op::PartyRespond => ClientPacket::PartyRespond(decode_as(payload)?),
            Op::PartyLeave => {
                decode_as::<Empty>(payload)?;
                ClientPacket::PartyLeave
            }
            Op::PartyKick => ClientPacket::PartyKick(decode_as(payload)?),
            Op::PartySetPolicy => ClientPacket::PartySetPolicy(decode_as(payload)?),
            Op::StorageOpen => {
                decode_as::<Empty>(payload)?;
                ClientPacket::StorageOpen
            }
            Op::StoragePut => ClientPacket::StoragePut(decode_as(payload)?),
            Op::StorageGet => ClientPacket::StorageGet(decode_as(payload)?),
            Op::StorageGold => ClientPacket::StorageGold(decode_as(payload)?),
            Op::StorageClose => {
                decode_as::<Empty>(payload)?;
                ClientPacket::StorageClose
            }
            Op::Refine => ClientPacket::Refine(decode_as(payload)?),
            Op::Socket => ClientPacket::Socket(decode_as(payload)?),
            Op::MarketList => ClientPacket::MarketList(decode_as(payload)?),
            Op::MarketBuy => ClientPacket::MarketBuy(decode_as(payload)?),
            Op::MarketCancel => ClientPacket::MarketCancel(decode_as(payload)?),
            Op::AuctionCreate => ClientPacket::AuctionCreate(decode_as(payload)?),
            Op::AuctionBid => ClientPacket::AuctionBid(decode_as(payload)?),
            Op::GuildCreate => ClientPacket::GuildCreate(decode_as(payload)?),
            Op::GuildInvite => ClientPacket::GuildInvite(decode_as(payload)?),
            Op::GuildRespond => ClientPacket::GuildRespond(decode_as(payload)?),
            Op::GuildLeave => {
                decode_as::<Empty>(payload)?;
                ClientPacket::GuildLeave
            }
            Op::GuildKick => ClientPacket::GuildKick(decode_as(payload)?),
            Op::GuildNotice => ClientPacket::GuildNotice(decode_as(payload)?),
            Op::GuildWarDeclare => ClientPacket::GuildWarDeclare(decode_as(payload)?),
            Op::GuildWarRespond => ClientPacket::GuildWarRespond(decode_as(payload)?),
            Op::GuildAllianceSet => ClientPacket::GuildAllianceSet(decode_as(payload)?),
            Op::GuildPromote => ClientPacket::GuildPromote(decode_as(payload)?),
            Op::QuestAccept => ClientPacket::QuestAccept(decode_as(payload)?),
            Op::QuestComplete => ClientPacket::QuestComplete(decode_as(payload)?),
            Op::QuestAbandon => ClientPacket::QuestAbandon(decode_as(payload)?),
            Op::QuestHistory => {
                decode_as::<Empty>(payload)?;
                ClientPacket::QuestHistory
            }
            Op::FriendAdd => ClientPacket::FriendAdd(decode_as(payload)?),
            Op::FriendRemove => ClientPacket::FriendRemove(decode_as(payload)?),
            Op::BlockAdd => ClientPacket::BlockAdd(decode_as(payload)?),
            Op::BlockRemove => ClientPacket::BlockRemove(decode_as(payload)?),
            Op::AdminCommand => ClientPacket::AdminCommand(decode_as(payload)?),
        };
        Ok(packet)
    }

    pub fn opcode(&self) -> ClientOpcode {
        use ClientPacket::*;
        match self {
            KeepAlive(_) => ClientOpcode::KeepAlive,
            Handshake(_) => ClientOpcode::Handshake,
            RekeyAck(_) => ClientOpcode::RekeyAck,
            AccountLogin(_) => ClientOpcode::AccountLogin,
            CharacterCreate(_) => ClientOpcode::CharacterCreate,
            CharacterDelete(_) => ClientOpcode::CharacterDelete,
            CharacterSelect(_) => ClientOpcode::CharacterSelect,
            CharacterList => ClientOpcode::CharacterList,
            Logout => ClientOpcode::Logout,
            Move(_) => ClientOpcode::Move,
            Attack(_) => ClientOpcode::Attack,
            SkillUse(_) => ClientOpcode::SkillUse,
            ItemUse(_) => ClientOpcode::ItemUse,
            ItemDrop(_) => ClientOpcode::ItemDrop,
            ItemGet(_) => ClientOpcode::ItemGet,
            ItemMove(_) => ClientOpcode::ItemMove,
            Refine(_) => ClientOpcode::Refine,
            Socket(_) => ClientOpcode::Socket,
            Chat(_) => ClientOpcode::Chat,
            NpcTalk(_) => ClientOpcode::NpcTalk,
            PartyInvite(_) => ClientOpcode::PartyInvite,
            PartyRespond(_) => ClientOpcode::PartyRespond,
            PartyLeave => ClientOpcode::PartyLeave,
            PartyKick(_) => ClientOpcode::PartyKick,
            PartySetPolicy(_) => ClientOpcode::PartySetPolicy,
            GuildCreate(_) => ClientOpcode::GuildCreate,
            GuildInvite(_) => ClientOpcode::GuildInvite,
            GuildRespond(_) => ClientOpcode::GuildRespond,
            GuildLeave => ClientOpcode::GuildLeave,
            GuildKick(_) => ClientOpcode::GuildKick,
            GuildNotice(_) => ClientOpcode::GuildNotice,
            GuildWarDeclare(_) => ClientOpcode::GuildWarDeclare,
            GuildWarRespond(_) => ClientOpcode::GuildWarRespond,
            GuildAllianceSet(_) => ClientOpcode::GuildAllianceSet,
            GuildPromote(_) => ClientOpcode::GuildPromote,
            TradeStart(_) => ClientOpcode::TradeStart,
            TradeSetItem(_) => ClientOpcode::TradeSetItem,
            TradeClearItem(_) => ClientOpcode::TradeClearItem,
            TradeSetGold(_) => ClientOpcode::TradeSetGold,
            TradeLock => ClientOpcode::TradeLock,
            TradeConfirm => ClientOpcode::TradeConfirm,
            TradeCancel => ClientOpcode::TradeCancel,
            ShopOpen(_) => ClientOpcode::ShopOpen,
            ShopBuy(_) => ClientOpcode::ShopBuy,
            ShopSell(_) => ClientOpcode::ShopSell,
            ShopClose => ClientOpcode::ShopClose,
            StorageOpen => ClientOpcode::StorageOpen,
            StoragePut(_) => ClientOpcode::StoragePut,
            StorageGet(_) => ClientOpcode::StorageGet,
            StorageGold(_) => ClientOpcode::StorageGold,
            StorageClose => ClientOpcode::StorageClose,
            MarketList(_) => ClientOpcode::MarketList,
            MarketBuy(_) => ClientOpcode::MarketBuy,
            MarketCancel(_) => ClientOpcode::MarketCancel,
            AuctionCreate(_) => ClientOpcode::AuctionCreate,
            AuctionBid(_) => ClientOpcode::AuctionBid,
            QuestAccept(_) => ClientOpcode::QuestAccept,
            QuestComplete(_) => ClientOpcode::QuestComplete,
            QuestAbandon(_) => ClientOpcode::QuestAbandon,
            QuestHistory => ClientOpcode::QuestHistory,
            FriendAdd(_) => ClientOpcode::FriendAdd,
            FriendRemove(_) => ClientOpcode::FriendRemove,
            BlockAdd(_) => ClientOpcode::BlockAdd,
            BlockRemove(_) => ClientOpcode::BlockRemove,
            AdminCommand(_) => ClientOpcode::AdminCommand,
        }
    }
}

// --- server payloads ---------------------------------------------------

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct HandshakeAck {
    pub server_version: u16,
    pub cipher: u8,
    pub reserved: u8,
    pub key: [u8; 16],
    pub iv: [u8; 16],
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct Rekey {
    pub key: [u8; 16],
    pub iv: [u8; 16],
    pub from_sequence: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct ErrorNotify {
    pub code: u16,
    pub reserved: u16,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct LoginResult {
    pub result: u16,
    pub reserved: u16,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct CharacterSummary {
    pub name: WireName,
    pub class: u8,
    pub reserved: u8,
    pub level: u16,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct CharacterListResult {
    pub entries: [CharacterSummary; CHARACTER_SLOTS],
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct EnterWorld {
    pub character: u32,
    pub map: u16,
    pub x: u16,
    pub y: u16,
    pub level: u16,
    pub hp: u32,
    pub max_hp: u32,
    pub mp: u32,
    pub max_mp: u32,
    pub experience: u64,
    pub gold: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct KickNotify {
    pub reason: u16,
    pub reserved: u16,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct MoveNotify {
    pub unit_kind: u8,
    pub reserved: [u8; 3],
    pub unit: u32,
    pub x: u16,
    pub y: u16,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct TeleportNotify {
    pub map: u16,
    pub x: u16,
    pub y: u16,
    pub reserved: u16,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct SpawnNotify {
    pub unit_kind: u8,
    pub reserved: u8,
    pub template: u16,
    pub unit: u32,
    pub x: u16,
    pub y: u16,
    pub name: WireName,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct DespawnNotify {
    pub unit_kind: u8,
    pub reserved: [u8; 3],
    pub unit: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct GroundItemNotify {
    pub ground_id: u32,
    pub item_id: u16,
    pub x: u16,
    pub y: u16,
    /// 1 when the item disappeared rather than appeared.
    pub gone: u8,
    pub reserved: u8,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct DeathNotify {
    pub unit_kind: u8,
    pub reserved: [u8; 3],
    pub unit: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct RespawnNotify {
    pub unit: u32,
    pub map: u16,
    pub x: u16,
    pub y: u16,
    pub reserved: u16,
    pub hp: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Encode, Decode)]
pub struct ChatNotify {
    pub channel: u8,
    pub reserved: [u8; 3],
    pub from: WireName,
    pub text: [u8; CHAT_TEXT_LEN],
}

impl Default for ChatNotify {
    fn default() -> Self {
        Self {
            channel: 0,
            reserved: [0; 3],
            from: WireName::default(),
            text: [0; CHAT_TEXT_LEN],
        }
    }
}

/// One shop page: sixteen fixed slots.
pub const SHOP_SLOTS: usize = 16;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct ShopEntry {
    pub item: ItemInstance,
    pub price: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct ShopInventory {
    pub npc: u32,
    pub entries: [ShopEntry; SHOP_SLOTS],
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct ShopResult {
    pub result: u16,
    pub reserved: u16,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct AttackResult {
    pub attacker_kind: u8,
    pub target_kind: u8,
    /// 0 miss, 1 hit, 2 parry, 3 block, 4 critical, 5 immune.
    pub outcome: u8,
    pub reserved: u8,
    pub attacker: u32,
    pub target: u32,
    pub damage: u32,
    pub target_hp: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct StatusEffectNotify {
    pub unit_kind: u8,
    pub applied: u8,
    pub effect: u16,
    pub unit: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct InventorySlotUpdate {
    pub container: u8,
    pub slot: u8,
    pub reserved: u16,
    pub item: ItemInstance,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct GoldUpdate {
    pub carried: u32,
    pub banked: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct StatsUpdate {
    pub level: u16,
    pub reserved: u16,
    pub hp: u32,
    pub max_hp: u32,
    pub mp: u32,
    pub max_mp: u32,
    pub experience: u64,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct TradeStateNotify {
    pub trade: u32,
    pub phase: u8,
    pub reserved: [u8; 3],
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct TradeSlotNotify {
    pub trade: u32,
    /// 0 = own side, 1 = counterparty.
    pub side: u8,
    pub trade_slot: u8,
    pub reserved: u16,
    pub item: ItemInstance,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct TradeGoldNotify {
    pub trade: u32,
    pub side: u8,
    pub reserved: [u8; 3],
    pub gold: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct PartyMemberEntry {
    pub character: u32,
    pub level: u16,
    pub reserved: u16,
    pub name: WireName,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct PartyStateNotify {
    pub party: u32,
    pub leader: u32,
    pub loot_policy: u8,
    pub exp_policy: u8,
    pub member_count: u8,
    pub reserved: u8,
    pub members: [PartyMemberEntry; 12],
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct StorageGoldResult {
    pub carried: u32,
    pub banked: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct MarketResult {
    pub result: u16,
    pub reserved: u16,
    pub listing: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct AuctionState {
    pub auction: u32,
    pub high_bid: u32,
    pub end_epoch_secs: u64,
    /// 0 open, 1 sold, 2 expired-unsold, 3 cancelled.
    pub state: u8,
    pub reserved: [u8; 3],
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Encode, Decode)]
pub struct GuildStateNotify {
    pub guild: u32,
    pub master: u32,
    pub member_count: u16,
    pub reserved: u16,
    pub name: WireName,
    pub notice: [u8; NOTICE_LEN],
}

impl Default for GuildStateNotify {
    fn default() -> Self {
        Self {
            guild: 0,
            master: 0,
            member_count: 0,
            reserved: 0,
            name: WireName::default(),
            notice: [0; NOTICE_LEN],
        }
    }
}

/// At most this many objectives are reported per quest.
pub const QUEST_OBJECTIVE_SLOTS: usize = 5;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct QuestStateNotify {
    pub instance: u32,
    pub quest: u16,
    /// 0 active, 1 ready to turn in, 2 complete, 3 failed, 4 abandoned.
    pub state: u8,
    pub reserved: u8,
    pub progress: [u16; QUEST_OBJECTIVE_SLOTS],
    pub reserved2: u16,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct QuestHistoryEntry {
    pub quest: u16,
    pub completion_count: u16,
}

pub const QUEST_HISTORY_SLOTS: usize = 32;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Encode, Decode)]
pub struct QuestHistoryResult {
    pub count: u16,
    pub reserved: u16,
    pub entries: [QuestHistoryEntry; QUEST_HISTORY_SLOTS],
}

impl Default for QuestHistoryResult {
    fn default() -> Self {
        Self {
            count: 0,
            reserved: 0,
            entries: [QuestHistoryEntry::default(); QUEST_HISTORY_SLOTS],
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Encode, Decode)]
pub struct FriendStatusNotify {
    pub online: u8,
    pub reserved: [u8; 3],
    pub name: WireName,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Encode, Decode)]
pub struct AdminResult {
    pub code: u16,
    pub reserved: u16,
    pub text: [u8; CHAT_TEXT_LEN],
}

impl Default for AdminResult {
    fn default() -> Self {
        Self {
            code: 0,
            reserved: 0,
            text: [0; CHAT_TEXT_LEN],
        }
    }
}

/// A fully typed outbound packet; the writer task turns it into payload
/// bytes plus opcode.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerPacket {
    HandshakeAck(HandshakeAck),
    Rekey(Rekey),
    ErrorNotify(ErrorNotify),
    LoginResult(LoginResult),
    CharacterListResult(CharacterListResult),
    EnterWorld(EnterWorld),
    KickNotify(KickNotify),
    MoveNotify(MoveNotify),
    TeleportNotify(TeleportNotify),
    SpawnNotify(SpawnNotify),
    DespawnNotify(DespawnNotify),
    GroundItemNotify(GroundItemNotify),
    DeathNotify(DeathNotify),
    RespawnNotify(RespawnNotify),
    ChatNotify(ChatNotify),
    ShopInventory(Box<ShopInventory>),
    ShopResult(ShopResult),
    AttackResult(AttackResult),
    StatusEffectNotify(StatusEffectNotify),
    InventorySlotUpdate(InventorySlotUpdate),
    GoldUpdate(GoldUpdate),
    StatsUpdate(StatsUpdate),
    TradeStateNotify(TradeStateNotify),
    TradeSlotNotify(TradeSlotNotify),
    TradeGoldNotify(TradeGoldNotify),
    PartyStateNotify(Box<PartyStateNotify>),
    StorageGoldResult(StorageGoldResult),
    MarketResult(MarketResult),
    AuctionState(AuctionState),
    GuildStateNotify(Box<GuildStateNotify>),
    QuestStateNotify(QuestStateNotify),
    QuestHistoryResult(Box<QuestHistoryResult>),
    FriendStatusNotify(FriendStatusNotify),
    AdminResult(Box<AdminResult>),
}

impl ServerPacket {
    pub fn opcode(&self) -> ServerOpcode {
        use ServerPacket::*;
        match self {
            HandshakeAck(_) => ServerOpcode::HandshakeAck,
            Rekey(_) => ServerOpcode::Rekey,
            ErrorNotify(_) => ServerOpcode::ErrorNotify,
            LoginResult(_) => ServerOpcode::LoginResult,
            CharacterListResult(_) => ServerOpcode::CharacterListResult,
            EnterWorld(_) => ServerOpcode::EnterWorld,
            KickNotify(_) => ServerOpcode::KickNotify,
            MoveNotify(_) => ServerOpcode::MoveNotify,
            TeleportNotify(_) => ServerOpcode::TeleportNotify,
            SpawnNotify(_) => ServerOpcode::SpawnNotify,
            DespawnNotify(_) => ServerOpcode::DespawnNotify,
            GroundItemNotify(_) => ServerOpcode::GroundItemNotify,
            DeathNotify(_) => ServerOpcode::DeathNotify,
            RespawnNotify(_) => ServerOpcode::RespawnNotify,
            ChatNotify(_) => ServerOpcode::ChatNotify,
            ShopInventory(_) => ServerOpcode::ShopInventory,
            ShopResult(_) => ServerOpcode::ShopResult,
            AttackResult(_) => ServerOpcode::AttackResult,
            StatusEffectNotify(_) => ServerOpcode::StatusEffectNotify,
            InventorySlotUpdate(_) => ServerOpcode::InventorySlotUpdate,
            GoldUpdate(_) => ServerOpcode::GoldUpdate,
            StatsUpdate(_) => ServerOpcode::StatsUpdate,
            TradeStateNotify(_) => ServerOpcode::TradeStateNotify,
            TradeSlotNotify(_) => ServerOpcode::TradeSlotNotify,
            TradeGoldNotify(_) => ServerOpcode::TradeGoldNotify,
            PartyStateNotify(_) => ServerOpcode::PartyStateNotify,
            StorageGoldResult(_) => ServerOpcode::StorageGoldResult,
            MarketResult(_) => ServerOpcode::MarketResult,
            AuctionState(_) => ServerOpcode::AuctionState,
            GuildStateNotify(_) => ServerOpcode::GuildStateNotify,
            QuestStateNotify(_) => ServerOpcode::QuestStateNotify,
            QuestHistoryResult(_) => ServerOpcode::QuestHistoryResult,
            FriendStatusNotify(_) => ServerOpcode::FriendStatusNotify,
            AdminResult(_) => ServerOpcode::AdminResult,
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        use ServerPacket::*;
        match self {
            HandshakeAck(p) => p.encode(),
            Rekey(p) => p.encode(),
            ErrorNotify(p) => p.encode(),
            LoginResult(p) => p.encode(),
            CharacterListResult(p) => p.encode(),
            EnterWorld(p) => p.encode(),
            KickNotify(p) => p.encode(),
            MoveNotify(p) => p.encode(),
            TeleportNotify(p) => p.encode(),
            SpawnNotify(p) => p.encode(),
            DespawnNotify(p) => p.encode(),
            GroundItemNotify(p) => p.encode(),
            DeathNotify(p) => p.encode(),
            RespawnNotify(p) => p.encode(),
            ChatNotify(p) => p.encode(),
            ShopInventory(p) => p.encode(),
            ShopResult(p) => p.encode(),
            AttackResult(p) => p.encode(),
            StatusEffectNotify(p) => p.encode(),
            InventorySlotUpdate(p) => p.encode(),
            GoldUpdate(p) => p.encode(),
            StatsUpdate(p) => p.encode(),
            TradeStateNotify(p) => p.encode(),
            TradeSlotNotify(p) => p.encode(),
            TradeGoldNotify(p) => p.encode(),
            PartyStateNotify(p) => p.encode(),
            StorageGoldResult(p) => p.encode(),
            MarketResult(p) => p.encode(),
            AuctionState(p) => p.encode(),
            GuildStateNotify(p) => p.encode(),
            QuestStateNotify(p) => p.encode(),
            QuestHistoryResult(p) => p.encode(),
            FriendStatusNotify(p) => p.encode(),
            AdminResult(p) => p.encode(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_client_opcode_resolves_and_sizes() {
        for opcode in ALL_CLIENT_OPCODES {
            assert_eq!(ClientOpcode::from_u16(*opcode as u16), Some(*opcode));
            let len = expected_payload_len(*opcode);
            assert!(len >= 4, "{:?} payload under the frame minimum", opcode);
            assert!(
                crate::frame::HEADER_SIZE + len <= crate::frame::MAX_PACKET_SIZE,
                "{:?} payload over the frame maximum",
                opcode
            );
        }
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        assert_eq!(
            ClientPacket::decode(0x7777, &[0u8; 8]),
            Err(DecodeFailure::UnknownType(0x7777))
        );
    }

    #[test]
    fn wrong_size_is_rejected_before_decode() {
        let expected = expected_payload_len(ClientOpcode::Move);
        let result = ClientPacket::decode(ClientOpcode::Move as u16, &vec![0u8; expected + 1]);
        assert_eq!(
            result,
            Err(DecodeFailure::WrongSize {
                expected,
                actual: expected + 1,
            })
        );
    }

    #[test]
    fn move_round_trips() {
        let packet = Move {
            x: 123,
            y: 456,
            running: 1,
            reserved: [0; 3],
        };
        let decoded = ClientPacket::decode(ClientOpcode::Move as u16, &packet.encode())
            .expect("should decode");
        assert_eq!(decoded, ClientPacket::Move(packet));
    }

    #[test]
    fn item_move_layout_is_stable() {
        let packet = ItemMove {
            src_container: 1,
            src_slot: 2,
            dst_container: 3,
            dst_slot: 4,
            count: 0x0506_0708,
        };
        assert_eq!(packet.encode(), vec![1, 2, 3, 4, 8, 7, 6, 5]);
    }

    #[test]
    fn server_packets_encode_with_matching_opcode() {
        let packet = ServerPacket::AttackResult(AttackResult {
            attacker_kind: 0,
            target_kind: 1,
            outcome: 4,
            reserved: 0,
            attacker: 10,
            target: 20,
            damage: 300,
            target_hp: 700,
        });
        assert_eq!(packet.opcode(), ServerOpcode::AttackResult);
        let payload = packet.encode_payload();
        assert_eq!(payload.len(), 20);
    }
}
