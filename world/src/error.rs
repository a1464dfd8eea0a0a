//! Typed results for every world operation. The tick never unwinds through a
//! subsystem boundary; callers match on these and decide recovery.
use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum WorldError {
    // validation
    #[error("no such character")]
    UnknownCharacter,
    #[error("no such target")]
    InvalidTarget,
    #[error("invalid container or slot")]
    InvalidSlot,
    #[error("slot is empty")]
    EmptySlot,
    #[error("destination slot occupied or incompatible")]
    SlotOccupied,
    #[error("stack limit would be exceeded")]
    StackOverflow,
    #[error("not enough gold")]
    InsufficientFunds,
    #[error("no room in inventory")]
    InventoryFull,
    #[error("requirement not met")]
    RequirementUnmet,
    #[error("target out of range")]
    OutOfRange,
    #[error("position outside map bounds")]
    OutOfBounds,
    #[error("blocked by terrain")]
    Blocked,
    #[error("amount is zero or over the limit")]
    InvalidAmount,
    #[error("name is empty, too long or taken")]
    InvalidName,
    #[error("wrong lifecycle state for that")]
    WrongState,
    #[error("skill on cooldown")]
    Cooldown,
    #[error("not enough mana or stamina")]
    InsufficientResource,
    #[error("actor is dead")]
    Dead,
    #[error("actor is stunned or silenced")]
    Incapacitated,
    #[error("hostile action forbidden in this zone")]
    ZoneForbids,
    #[error("quest prerequisites not satisfied")]
    QuestPrereq,
    #[error("quest is not in a completable state")]
    QuestNotReady,
    #[error("already in a party")]
    AlreadyInParty,
    #[error("already in a guild")]
    AlreadyInGuild,
    #[error("party is full")]
    PartyFull,
    #[error("not the leader")]
    NotLeader,
    #[error("insufficient guild rank")]
    InsufficientRank,
    #[error("no such invitation or it expired")]
    NoInvitation,
    #[error("already trading")]
    AlreadyTrading,
    #[error("no active trade")]
    NoTrade,
    #[error("trade side already locked")]
    TradeLocked,
    #[error("item is escrowed by a pending transaction")]
    ItemLocked,
    #[error("bid below current price plus increment")]
    BidTooLow,
    #[error("auction or listing already closed")]
    SaleClosed,
    #[error("seller cannot bid on their own sale")]
    SelfBid,

    // flags
    #[error("item flags forbid that operation")]
    ForbiddenOperation,

    // commit-time conflicts
    #[error("preconditions changed before commit")]
    ConcurrencyConflict,

    // capacity
    #[error("subsystem at capacity")]
    ResourceExhaustion,

    // invariant breaks
    #[error("internal invariant violated")]
    InternalError,
}

impl WorldError {
    /// Stable code rendered by the client, directly or via localization.
    pub fn client_code(&self) -> u16 {
        use WorldError::*;
        match self {
            UnknownCharacter => 0x0201,
            InvalidTarget => 0x0202,
            InvalidSlot => 0x0203,
            EmptySlot => 0x0204,
            SlotOccupied => 0x0205,
            StackOverflow => 0x0206,
            InsufficientFunds => 0x0207,
            InventoryFull => 0x0208,
            RequirementUnmet => 0x0209,
            OutOfRange => 0x020A,
            OutOfBounds => 0x020B,
            Blocked => 0x020C,
            InvalidAmount => 0x020D,
            InvalidName => 0x020E,
            WrongState => 0x020F,
            Cooldown => 0x0210,
            InsufficientResource => 0x0211,
            Dead => 0x0212,
            Incapacitated => 0x0213,
            ZoneForbids => 0x0214,
            QuestPrereq => 0x0215,
            QuestNotReady => 0x0216,
            AlreadyInParty => 0x0217,
            AlreadyInGuild => 0x0218,
            PartyFull => 0x0219,
            NotLeader => 0x021A,
            InsufficientRank => 0x021B,
            NoInvitation => 0x021C,
            AlreadyTrading => 0x021D,
            NoTrade => 0x021E,
            TradeLocked => 0x021F,
            ItemLocked => 0x0220,
            BidTooLow => 0x0221,
            SaleClosed => 0x0222,
            SelfBid => 0x0223,
            ForbiddenOperation => 0x0300,
            ConcurrencyConflict => 0x0301,
            ResourceExhaustion => 0x0302,
            InternalError => 0x03FF,
        }
    }
}

pub type WorldResult<T> = Result<T, WorldError>;
