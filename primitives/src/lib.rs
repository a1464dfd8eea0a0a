//! Shared primitives for the TMSrv world server: stable identifiers,
//! wire-compatible item instances and the handful of constants every
//! subsystem agrees on.
use std::fmt::{Display, Formatter, Result as FmtResult};

use codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

mod item;

pub use item::{ItemInstance, MAX_REFINE_LEVEL, MAX_SOCKETS};

/// Hard cap on simultaneously connected clients.
pub const MAX_CLIENTS: usize = 1000;
/// Character and account names are at most this many bytes.
pub const NAME_LENGTH: usize = 16;
/// Carried inventory slot count.
pub const INVENTORY_SLOTS: usize = 64;
/// Equipment slot count.
pub const EQUIPMENT_SLOTS: usize = 16;
/// Bank storage slot count.
pub const BANK_SLOTS: usize = 128;
/// Guild storage slot count.
pub const GUILD_STORE_SLOTS: usize = 128;
/// Maximum members in one party.
pub const MAX_PARTY_MEMBERS: usize = 12;
/// Maximum simultaneous status effects on one unit.
pub const MAX_AFFECTS: usize = 32;
/// Maximum learned skills per character.
pub const MAX_SKILLS: usize = 24;
/// Gold is capped at two billion, both carried and banked.
pub const GOLD_LIMIT: u32 = 2_000_000_000;
/// Character levels run 1..=400.
pub const MAX_LEVEL: u16 = 400;
/// Both map axes have this many cells.
pub const GRID_SIZE: u16 = 4096;
/// Side length, in cells, of one spatial index bucket.
pub const WARD_RANGE: u16 = 12;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd,
            Encode, Decode, Serialize, Deserialize,
        )]
        pub struct $name(pub u32);

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                Self(raw)
            }
        }
    };
}

id_type!(
    /// Account handle issued by the account authority.
    AccountId
);
id_type!(
    /// A character, unique within a server uptime.
    CharacterId
);
id_type!(
    /// A spawned mob instance.
    MobId
);
id_type!(PartyId);
id_type!(GuildId);
id_type!(TradeId);
id_type!(AuctionId);
id_type!(ListingId);
id_type!(QuestInstanceId);

/// Either side of a combat interaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Encode, Decode)]
pub enum UnitId {
    Character(CharacterId),
    Mob(MobId),
}

impl Display for UnitId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            UnitId::Character(id) => write!(f, "{}", id),
            UnitId::Mob(id) => write!(f, "{}", id),
        }
    }
}

impl From<CharacterId> for UnitId {
    fn from(id: CharacterId) -> Self {
        UnitId::Character(id)
    }
}

impl From<MobId> for UnitId {
    fn from(id: MobId) -> Self {
        UnitId::Mob(id)
    }
}

/// Map handle. Maps are static content; ids come from the map table.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Encode, Decode, Serialize,
    Deserialize,
)]
pub struct MapId(pub u16);

impl Display for MapId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "map#{}", self.0)
    }
}

/// The four playable classes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Encode, Decode, Serialize, Deserialize)]
pub enum CharacterClass {
    TransKnight,
    Foema,
    BeastMaster,
    Huntress,
}

impl CharacterClass {
    /// Bit used in item requirement masks. Zero in a mask means "all classes".
    pub fn requirement_bit(&self) -> u8 {
        match self {
            CharacterClass::TransKnight => 1,
            CharacterClass::Foema => 2,
            CharacterClass::BeastMaster => 4,
            CharacterClass::Huntress => 8,
        }
    }

    pub fn satisfies_mask(&self, mask: u8) -> bool {
        mask == 0 || mask & self.requirement_bit() != 0
    }
}

impl Display for CharacterClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            CharacterClass::TransKnight => "TK",
            CharacterClass::Foema => "FM",
            CharacterClass::BeastMaster => "BM",
            CharacterClass::Huntress => "HT",
        };
        write!(f, "{}", name)
    }
}

/// A cell position on one map. Facing is one of eight compass directions.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Encode, Decode, Serialize, Deserialize,
)]
pub struct Position {
    pub map: MapId,
    pub x: u16,
    pub y: u16,
    pub facing: u8,
}

impl Position {
    pub fn new(map: MapId, x: u16, y: u16) -> Self {
        Self {
            map,
            x,
            y,
            facing: 0,
        }
    }

    pub fn in_bounds(&self) -> bool {
        self.x < GRID_SIZE && self.y < GRID_SIZE
    }

    /// Chebyshev distance; the metric for attack range and AoI queries.
    /// Positions on different maps are infinitely far apart.
    pub fn distance(&self, other: &Position) -> u16 {
        if self.map != other.map {
            return u16::MAX;
        }
        let dx = self.x.abs_diff(other.x);
        let dy = self.y.abs_diff(other.y);
        dx.max(dy)
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}:({}, {})", self.map, self.x, self.y)
    }
}

/// Fixed-size, NUL-padded name as it travels on the wire.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Encode, Decode)]
pub struct WireName(pub [u8; NAME_LENGTH]);

impl WireName {
    /// Truncates to [NAME_LENGTH] bytes; longer names are rejected earlier,
    /// at character creation.
    pub fn from_str(name: &str) -> Self {
        let mut raw = [0u8; NAME_LENGTH];
        let bytes = name.as_bytes();
        let len = bytes.len().min(NAME_LENGTH);
        raw[..len].copy_from_slice(&bytes[..len]);
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        let end = self.0.iter().position(|b| *b == 0).unwrap_or(NAME_LENGTH);
        std::str::from_utf8(&self.0[..end]).unwrap_or("<invalid>")
    }
}

impl Default for WireName {
    fn default() -> Self {
        Self([0u8; NAME_LENGTH])
    }
}

impl Display for WireName {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_mask_zero_matches_everyone() {
        for class in [
            CharacterClass::TransKnight,
            CharacterClass::Foema,
            CharacterClass::BeastMaster,
            CharacterClass::Huntress,
        ] {
            assert!(class.satisfies_mask(0));
        }
        assert!(CharacterClass::Foema.satisfies_mask(2));
        assert!(!CharacterClass::Foema.satisfies_mask(1 | 4 | 8));
    }

    #[test]
    fn chebyshev_distance() {
        let map = MapId(1);
        let a = Position::new(map, 100, 100);
        let b = Position::new(map, 103, 98);
        assert_eq!(a.distance(&b), 3);
        let elsewhere = Position::new(MapId(2), 100, 100);
        assert_eq!(a.distance(&elsewhere), u16::MAX);
    }

    #[test]
    fn wire_name_round_trip() {
        let name = WireName::from_str("Ragnar");
        assert_eq!(name.as_str(), "Ragnar");
        assert_eq!(name.0.len(), NAME_LENGTH);
    }
}
