use codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Refine levels run 0..=9; the level is stored in effect slot 0.
pub const MAX_REFINE_LEVEL: u8 = 9;
/// Equipment can carry at most this many gem sockets.
pub const MAX_SOCKETS: usize = 2;

const REFINE_SLOT: usize = 0;
const SOCKET_SLOTS: [usize; MAX_SOCKETS] = [1, 2];

/// One item instance, wire-compatible with the classic 12-byte layout:
/// a `u16` template id, three 2-byte effect slots and a `u32` value that
/// means quantity for stackables and durability for equipment.
///
/// Effect slot 0 holds the refine level; slots 1 and 2 hold either a socketed
/// gem id or a random option `(kind, magnitude)` pair. `item_id == 0` is the
/// empty slot.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Encode, Decode, Serialize, Deserialize,
)]
pub struct ItemInstance {
    pub item_id: u16,
    pub effects: [[u8; 2]; 3],
    pub value: u32,
}

/// SCALE with fixed-width fields is exactly the little-endian packed layout
/// the client expects.
pub const ITEM_WIRE_SIZE: usize = 12;

impl ItemInstance {
    pub const EMPTY: ItemInstance = ItemInstance {
        item_id: 0,
        effects: [[0; 2]; 3],
        value: 0,
    };

    pub fn new(item_id: u16, value: u32) -> Self {
        Self {
            item_id,
            effects: [[0; 2]; 3],
            value,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.item_id == 0
    }

    pub fn clear(&mut self) {
        *self = Self::EMPTY;
    }

    pub fn refine_level(&self) -> u8 {
        self.effects[REFINE_SLOT][0].min(MAX_REFINE_LEVEL)
    }

    pub fn set_refine_level(&mut self, level: u8) {
        self.effects[REFINE_SLOT][0] = level.min(MAX_REFINE_LEVEL);
        self.effects[REFINE_SLOT][1] = 0;
    }

    /// Gem id in the given socket, if one is set. Socket indices are
    /// 0..[MAX_SOCKETS].
    pub fn socket(&self, index: usize) -> Option<u8> {
        let slot = *SOCKET_SLOTS.get(index)?;
        let [kind, gem] = self.effects[slot];
        (kind == effect_kind::SOCKET && gem != 0).then_some(gem)
    }

    /// Whether the socket exists (opened) regardless of gem content.
    pub fn has_socket(&self, index: usize) -> bool {
        SOCKET_SLOTS
            .get(index)
            .map(|slot| self.effects[*slot][0] == effect_kind::SOCKET)
            .unwrap_or(false)
    }

    pub fn open_socket(&mut self, index: usize) -> bool {
        let Some(slot) = SOCKET_SLOTS.get(index) else {
            return false;
        };
        if self.effects[*slot][0] != 0 {
            return false;
        }
        self.effects[*slot] = [effect_kind::SOCKET, 0];
        true
    }

    pub fn set_socket_gem(&mut self, index: usize, gem: u8) -> bool {
        let Some(slot) = SOCKET_SLOTS.get(index) else {
            return false;
        };
        if self.effects[*slot][0] != effect_kind::SOCKET || self.effects[*slot][1] != 0 {
            return false;
        }
        self.effects[*slot][1] = gem;
        true
    }

    /// Random option in a non-socket effect slot, as `(kind, magnitude)`.
    pub fn option(&self, index: usize) -> Option<(u8, u8)> {
        let slot = *SOCKET_SLOTS.get(index)?;
        let [kind, magnitude] = self.effects[slot];
        (kind != 0 && kind != effect_kind::SOCKET).then_some((kind, magnitude))
    }

    pub fn set_option(&mut self, index: usize, kind: u8, magnitude: u8) -> bool {
        let Some(slot) = SOCKET_SLOTS.get(index) else {
            return false;
        };
        if kind == 0 || kind == effect_kind::SOCKET {
            return false;
        }
        self.effects[*slot] = [kind, magnitude];
        true
    }

    /// Two instances stack together only when the whole effect lineage
    /// matches; a refined or optioned stackable never merges with a plain
    /// one.
    pub fn stackable_with(&self, other: &ItemInstance) -> bool {
        self.item_id == other.item_id && self.effects == other.effects
    }
}

/// Effect slot kind bytes.
pub mod effect_kind {
    /// Marks a slot as an opened gem socket.
    pub const SOCKET: u8 = 0x40;
    /// Random option kinds start here; content tables define the meaning.
    pub const OPTION_BASE: u8 = 0x01;
}

#[cfg(test)]
mod tests {
    use codec::{Decode, Encode};

    use super::*;

    #[test]
    fn wire_encoding_is_twelve_bytes_and_byte_equal() {
        let mut item = ItemInstance::new(1234, 56);
        item.set_refine_level(7);
        item.open_socket(0);
        item.set_socket_gem(0, 3);
        let encoded = item.encode();
        assert_eq!(encoded.len(), ITEM_WIRE_SIZE);
        let decoded = ItemInstance::decode(&mut &encoded[..]).expect("should decode");
        assert_eq!(decoded, item);
        assert_eq!(decoded.encode(), encoded);
    }

    #[test]
    fn layout_is_little_endian_packed() {
        let item = ItemInstance {
            item_id: 0x0102,
            effects: [[3, 4], [5, 6], [7, 8]],
            value: 0x0910_1112,
        };
        assert_eq!(
            item.encode(),
            vec![0x02, 0x01, 3, 4, 5, 6, 7, 8, 0x12, 0x11, 0x10, 0x09]
        );
    }

    #[test]
    fn refine_level_is_capped() {
        let mut item = ItemInstance::new(1, 1);
        item.set_refine_level(200);
        assert_eq!(item.refine_level(), MAX_REFINE_LEVEL);
    }

    #[test]
    fn sockets_open_then_fill_once() {
        let mut item = ItemInstance::new(800, 100);
        assert!(!item.has_socket(0));
        assert!(item.open_socket(0));
        assert!(item.has_socket(0));
        assert_eq!(item.socket(0), None);
        assert!(item.set_socket_gem(0, 9));
        assert_eq!(item.socket(0), Some(9));
        // occupied socket rejects another gem
        assert!(!item.set_socket_gem(0, 4));
        // out of range
        assert!(!item.open_socket(MAX_SOCKETS));
    }

    #[test]
    fn stacking_requires_matching_lineage() {
        let plain = ItemInstance::new(400, 10);
        let mut refined = ItemInstance::new(400, 10);
        refined.set_refine_level(1);
        assert!(plain.stackable_with(&ItemInstance::new(400, 3)));
        assert!(!plain.stackable_with(&refined));
        assert!(!plain.stackable_with(&ItemInstance::new(401, 10)));
    }
}
