//! Synchronous two-phase player trade.
//!
//! Offers never leave the owner's inventory: offered slots are locked in
//! place, and the commit moves everything in one critical section after
//! re-verifying every precondition. Any failure aborts with no effect.
use std::collections::HashMap;

use tmsrv_primitives::{CharacterId, TradeId, GOLD_LIMIT};

use crate::{
    character::Character,
    content::ItemTable,
    error::{WorldError, WorldResult},
    items::SlotRef,
};

/// Offer capacity per side.
pub const TRADE_SLOTS: usize = 15;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TradePhase {
    Compose,
    LockedA,
    LockedB,
    BothLocked,
    ConfirmedA,
    ConfirmedB,
    Committed,
    Cancelled,
}

impl TradePhase {
    pub fn wire_code(&self) -> u8 {
        match self {
            TradePhase::Compose => 0,
            TradePhase::LockedA => 1,
            TradePhase::LockedB => 2,
            TradePhase::BothLocked => 3,
            TradePhase::ConfirmedA => 4,
            TradePhase::ConfirmedB => 5,
            TradePhase::Committed => 6,
            TradePhase::Cancelled => 7,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OfferedItem {
    pub inventory_slot: u8,
    pub count: u32,
    /// Snapshot for commit-time verification.
    pub item_id: u16,
}

#[derive(Clone, Debug)]
pub struct TradeSide {
    pub character: CharacterId,
    pub offer: Vec<OfferedItem>,
    pub gold: u32,
    pub locked: bool,
    pub confirmed: bool,
}

impl TradeSide {
    fn new(character: CharacterId) -> Self {
        Self {
            character,
            offer: Vec::new(),
            gold: 0,
            locked: false,
            confirmed: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Side {
    A,
    B,
}

#[derive(Clone, Debug)]
pub struct TradeSession {
    pub id: TradeId,
    pub a: TradeSide,
    pub b: TradeSide,
    pub terminal: Option<TradePhase>,
    pub expires_at_ms: u64,
}

impl TradeSession {
    pub fn phase(&self) -> TradePhase {
        if let Some(terminal) = self.terminal {
            return terminal;
        }
        match (self.a.locked, self.b.locked, self.a.confirmed, self.b.confirmed) {
            (_, _, true, true) => TradePhase::BothLocked, // transient; commit follows
            (true, true, true, false) => TradePhase::ConfirmedA,
            (true, true, false, true) => TradePhase::ConfirmedB,
            (true, true, false, false) => TradePhase::BothLocked,
            (true, false, ..) => TradePhase::LockedA,
            (false, true, ..) => TradePhase::LockedB,
            (false, false, ..) => TradePhase::Compose,
        }
    }

    pub fn side_of(&self, character: CharacterId) -> WorldResult<Side> {
        if self.a.character == character {
            Ok(Side::A)
        } else if self.b.character == character {
            Ok(Side::B)
        } else {
            Err(WorldError::NoTrade)
        }
    }

    pub fn side(&self, side: Side) -> &TradeSide {
        match side {
            Side::A => &self.a,
            Side::B => &self.b,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut TradeSide {
        match side {
            Side::A => &mut self.a,
            Side::B => &mut self.b,
        }
    }

    pub fn counterparty(&self, side: Side) -> CharacterId {
        match side {
            Side::A => self.b.character,
            Side::B => self.a.character,
        }
    }

    pub fn is_open(&self) -> bool {
        self.terminal.is_none()
    }
}

#[derive(Default)]
pub struct TradeManager {
    sessions: HashMap<TradeId, TradeSession>,
    next_id: u32,
}

impl TradeManager {
    pub fn start(
        &mut self,
        a: CharacterId,
        b: CharacterId,
        now_ms: u64,
        timeout_ms: u64,
    ) -> TradeId {
        self.next_id += 1;
        let id = TradeId(self.next_id);
        self.sessions.insert(
            id,
            TradeSession {
                id,
                a: TradeSide::new(a),
                b: TradeSide::new(b),
                terminal: None,
                expires_at_ms: now_ms + timeout_ms,
            },
        );
        id
    }

    pub fn get(&self, id: TradeId) -> WorldResult<&TradeSession> {
        self.sessions.get(&id).ok_or(WorldError::NoTrade)
    }

    pub fn get_mut(&mut self, id: TradeId) -> WorldResult<&mut TradeSession> {
        self.sessions.get_mut(&id).ok_or(WorldError::NoTrade)
    }

    /// Adds or replaces an offered slot. Legal only while the side is
    /// unlocked; the slot must hold a tradable item with enough units.
    pub fn set_item(
        &mut self,
        id: TradeId,
        owner: &mut Character,
        inventory_slot: u8,
        count: u32,
        items: &ItemTable,
    ) -> WorldResult<()> {
        let session = self.sessions.get_mut(&id).ok_or(WorldError::NoTrade)?;
        if !session.is_open() {
            return Err(WorldError::SaleClosed);
        }
        let side = session.side_of(owner.id)?;
        if session.side(side).locked {
            return Err(WorldError::TradeLocked);
        }
        if session.side(side).offer.len() >= TRADE_SLOTS {
            return Err(WorldError::ResourceExhaustion);
        }
        let at = SlotRef::inventory(inventory_slot);
        let item = *owner.containers.slot(at)?;
        if item.is_empty() {
            return Err(WorldError::EmptySlot);
        }
        if count == 0 || count > item.value {
            return Err(WorldError::InvalidAmount);
        }
        if !items.flags(item.item_id).tradable {
            return Err(WorldError::ForbiddenOperation);
        }
        let offer = &mut session.side_mut(side).offer;
        if let Some(existing) = offer.iter_mut().find(|o| o.inventory_slot == inventory_slot) {
            existing.count = count;
            existing.item_id = item.item_id;
        } else {
            offer.push(OfferedItem {
                inventory_slot,
                count,
                item_id: item.item_id,
            });
        }
        Ok(())
    }

    pub fn clear_item(
        &mut self,
        id: TradeId,
        who: CharacterId,
        inventory_slot: u8,
    ) -> WorldResult<()> {
        let session = self.sessions.get_mut(&id).ok_or(WorldError::NoTrade)?;
        if !session.is_open() {
            return Err(WorldError::SaleClosed);
        }
        let side = session.side_of(who)?;
        if session.side(side).locked {
            return Err(WorldError::TradeLocked);
        }
        session
            .side_mut(side)
            .offer
            .retain(|o| o.inventory_slot != inventory_slot);
        Ok(())
    }

    pub fn set_gold(&mut self, id: TradeId, who: &Character, gold: u32) -> WorldResult<()> {
        let session = self.sessions.get_mut(&id).ok_or(WorldError::NoTrade)?;
        if !session.is_open() {
            return Err(WorldError::SaleClosed);
        }
        let side = session.side_of(who.id)?;
        if session.side(side).locked {
            return Err(WorldError::TradeLocked);
        }
        if gold > who.gold {
            return Err(WorldError::InsufficientFunds);
        }
        session.side_mut(side).gold = gold;
        Ok(())
    }

    /// Locks a side, freezing its offer and pinning the offered slots.
    pub fn lock(&mut self, id: TradeId, owner: &mut Character) -> WorldResult<TradePhase> {
        let session = self.sessions.get_mut(&id).ok_or(WorldError::NoTrade)?;
        if !session.is_open() {
            return Err(WorldError::SaleClosed);
        }
        let side = session.side_of(owner.id)?;
        if session.side(side).locked {
            return Err(WorldError::TradeLocked);
        }
        for offered in &session.side(side).offer {
            owner
                .containers
                .lock_slot(SlotRef::inventory(offered.inventory_slot));
        }
        session.side_mut(side).locked = true;
        Ok(session.phase())
    }

    /// Confirms a side; legal only once both are locked.
    pub fn confirm(&mut self, id: TradeId, who: CharacterId) -> WorldResult<TradePhase> {
        let session = self.sessions.get_mut(&id).ok_or(WorldError::NoTrade)?;
        if !session.is_open() {
            return Err(WorldError::SaleClosed);
        }
        let side = session.side_of(who)?;
        if !(session.a.locked && session.b.locked) {
            return Err(WorldError::WrongState);
        }
        session.side_mut(side).confirmed = true;
        Ok(session.phase())
    }

    pub fn ready_to_commit(&self, id: TradeId) -> bool {
        self.sessions
            .get(&id)
            .map(|s| s.is_open() && s.a.confirmed && s.b.confirmed)
            .unwrap_or(false)
    }

    /// Cancels the session and releases both characters' locks. Idempotent
    /// on already-terminal sessions.
    pub fn cancel(
        &mut self,
        id: TradeId,
        a: Option<&mut Character>,
        b: Option<&mut Character>,
    ) -> WorldResult<()> {
        let session = self.sessions.get_mut(&id).ok_or(WorldError::NoTrade)?;
        if session.terminal.is_none() {
            session.terminal = Some(TradePhase::Cancelled);
        }
        for character in [a, b].into_iter().flatten() {
            let side = session.side_of(character.id)?;
            for offered in &session.side(side).offer {
                character
                    .containers
                    .unlock_slot(SlotRef::inventory(offered.inventory_slot));
            }
            character.trade = None;
        }
        Ok(())
    }

    /// Removes terminal sessions; returns expired open sessions for the
    /// caller to cancel first.
    pub fn expired(&self, now_ms: u64) -> Vec<TradeId> {
        self.sessions
            .values()
            .filter(|s| s.is_open() && s.expires_at_ms <= now_ms)
            .map(|s| s.id)
            .collect()
    }

    pub fn sweep_terminal(&mut self) {
        self.sessions.retain(|_, s| s.terminal.is_none());
    }

    /// The commit: re-verifies every precondition under the tick's
    /// exclusive ownership, then moves items and gold both ways. Returns
    /// what moved for auditing. On any error nothing has changed.
    pub fn commit(
        &mut self,
        id: TradeId,
        items: &ItemTable,
        a: &mut Character,
        b: &mut Character,
    ) -> WorldResult<TradeReceipt> {
        let session = self.sessions.get_mut(&id).ok_or(WorldError::NoTrade)?;
        if !session.is_open() || !(session.a.confirmed && session.b.confirmed) {
            return Err(WorldError::WrongState);
        }
        if session.a.character != a.id || session.b.character != b.id {
            return Err(WorldError::InternalError);
        }

        // re-verify both sides before touching anything
        verify_side(&session.a, a, b, items)?;
        verify_side(&session.b, b, a, items)?;

        // items: remove from both sources first, then insert, so a failure
        // in the verify phase above is the only abort path
        let mut receipt = TradeReceipt::default();
        let mut to_b = Vec::new();
        for offered in &session.a.offer {
            let at = SlotRef::inventory(offered.inventory_slot);
            a.containers.unlock_slot(at);
            let taken = a.containers.remove_count(at, offered.count)?;
            receipt.items_a_to_b.push((taken.item_id, offered.count));
            to_b.push(taken);
        }
        let mut to_a = Vec::new();
        for offered in &session.b.offer {
            let at = SlotRef::inventory(offered.inventory_slot);
            b.containers.unlock_slot(at);
            let taken = b.containers.remove_count(at, offered.count)?;
            receipt.items_b_to_a.push((taken.item_id, offered.count));
            to_a.push(taken);
        }
        for item in to_b {
            b.containers
                .add_to_inventory(items, item)
                .expect("space verified above; qed");
        }
        for item in to_a {
            a.containers
                .add_to_inventory(items, item)
                .expect("space verified above; qed");
        }

        // gold both ways in the same critical section
        a.take_gold(session.a.gold)?;
        b.take_gold(session.b.gold)?;
        a.add_gold(session.b.gold)?;
        b.add_gold(session.a.gold)?;
        receipt.gold_a_to_b = session.a.gold;
        receipt.gold_b_to_a = session.b.gold;

        a.containers.unlock_all();
        b.containers.unlock_all();
        a.trade = None;
        b.trade = None;
        session.terminal = Some(TradePhase::Committed);
        Ok(receipt)
    }
}

fn verify_side(
    side: &TradeSide,
    owner: &Character,
    receiver: &Character,
    items: &ItemTable,
) -> WorldResult<()> {
    for offered in &side.offer {
        let slot = owner
            .containers
            .slot(SlotRef::inventory(offered.inventory_slot))
            .map_err(|_| WorldError::ConcurrencyConflict)?;
        if slot.item_id != offered.item_id || slot.value < offered.count {
            return Err(WorldError::ConcurrencyConflict);
        }
    }
    if owner.gold < side.gold {
        return Err(WorldError::ConcurrencyConflict);
    }
    // the receiver must absorb the items and the gold
    let wanted: Vec<(u16, u32)> = side.offer.iter().map(|o| (o.item_id, o.count)).collect();
    if !receiver.containers.has_space_for(items, &wanted) {
        return Err(WorldError::ConcurrencyConflict);
    }
    if u64::from(receiver.gold) + u64::from(side.gold) > u64::from(GOLD_LIMIT) {
        return Err(WorldError::ConcurrencyConflict);
    }
    Ok(())
}

/// What a committed trade moved, for the audit log.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TradeReceipt {
    pub items_a_to_b: Vec<(u16, u32)>,
    pub items_b_to_a: Vec<(u16, u32)>,
    pub gold_a_to_b: u32,
    pub gold_b_to_a: u32,
}

#[cfg(test)]
mod tests {
    use tmsrv_primitives::{AccountId, CharacterClass, ItemInstance, MapId, Position};

    use super::*;
    use crate::content::ContentTables;

    fn character(content: &ContentTables, id: u32) -> Character {
        let mut c = Character::new(
            content,
            CharacterId(id),
            AccountId(id),
            format!("char{id}"),
            CharacterClass::TransKnight,
            Position::new(MapId(1), 100, 100),
        );
        c.add_gold(10_000).expect("seed gold");
        c
    }

    fn setup() -> (std::sync::Arc<ContentTables>, Character, Character) {
        let content = ContentTables::fixture();
        let a = character(&content, 1);
        let b = character(&content, 2);
        (content, a, b)
    }

    fn begin(manager: &mut TradeManager, a: &mut Character, b: &mut Character) -> TradeId {
        let id = manager.start(a.id, b.id, 0, 120_000);
        a.trade = Some(id);
        b.trade = Some(id);
        id
    }

    #[test]
    fn full_flow_commits_and_conserves() {
        let (content, mut a, mut b) = setup();
        let mut manager = TradeManager::default();
        a.containers
            .add_to_inventory(&content.items, ItemInstance::new(1, 100))
            .expect("sword fits");
        b.containers
            .add_to_inventory(&content.items, ItemInstance::new(100, 20))
            .expect("potions fit");
        let units_before = a.containers.total_units() + b.containers.total_units();
        let gold_before = u64::from(a.gold) + u64::from(b.gold);

        let id = begin(&mut manager, &mut a, &mut b);
        manager
            .set_item(id, &mut a, 0, 1, &content.items)
            .expect("offer sword");
        manager
            .set_item(id, &mut b, 0, 5, &content.items)
            .expect("offer potions");
        manager.set_gold(id, &a, 1000).expect("offer gold");
        manager.lock(id, &mut a).expect("lock a");
        manager.lock(id, &mut b).expect("lock b");
        manager.confirm(id, a.id).expect("confirm a");
        manager.confirm(id, b.id).expect("confirm b");
        assert!(manager.ready_to_commit(id));

        let receipt = manager
            .commit(id, &content.items, &mut a, &mut b)
            .expect("commit");
        assert_eq!(receipt.items_a_to_b, vec![(1, 1)]);
        assert_eq!(receipt.items_b_to_a, vec![(100, 5)]);
        assert_eq!(receipt.gold_a_to_b, 1000);
        assert_eq!(a.gold, 9000);
        assert_eq!(b.gold, 11_000);
        assert_eq!(a.containers.count_in_inventory(100), 5);
        assert_eq!(b.containers.count_in_inventory(1), 1);
        assert_eq!(
            a.containers.total_units() + b.containers.total_units(),
            units_before
        );
        assert_eq!(u64::from(a.gold) + u64::from(b.gold), gold_before);
        assert!(a.trade.is_none());
        assert!(b.trade.is_none());
    }

    #[test]
    fn mutation_after_lock_is_rejected() {
        let (content, mut a, mut b) = setup();
        let mut manager = TradeManager::default();
        a.containers
            .add_to_inventory(&content.items, ItemInstance::new(100, 10))
            .expect("potions fit");
        let id = begin(&mut manager, &mut a, &mut b);
        manager
            .set_item(id, &mut a, 0, 5, &content.items)
            .expect("offer");
        manager.lock(id, &mut a).expect("lock");
        assert_eq!(
            manager.set_item(id, &mut a, 0, 6, &content.items),
            Err(WorldError::TradeLocked)
        );
        assert_eq!(manager.set_gold(id, &a, 5), Err(WorldError::TradeLocked));
        // the other side still composes freely
        manager.set_gold(id, &b, 100).expect("b still composing");
    }

    #[test]
    fn locked_offer_pins_inventory_slots() {
        let (content, mut a, mut b) = setup();
        let mut manager = TradeManager::default();
        a.containers
            .add_to_inventory(&content.items, ItemInstance::new(1, 100))
            .expect("sword fits");
        let id = begin(&mut manager, &mut a, &mut b);
        manager
            .set_item(id, &mut a, 0, 1, &content.items)
            .expect("offer sword");
        manager.lock(id, &mut a).expect("lock");
        // the equip attempt mid-trade fails
        assert_eq!(
            a.equip(&content, 0, crate::content::EquipSlot::Weapon as u8),
            Err(WorldError::ItemLocked)
        );
    }

    #[test]
    fn confirm_requires_both_locks() {
        let (content, mut a, mut b) = setup();
        let mut manager = TradeManager::default();
        let id = begin(&mut manager, &mut a, &mut b);
        let _ = content;
        manager.lock(id, &mut a).expect("lock a");
        assert_eq!(manager.confirm(id, a.id), Err(WorldError::WrongState));
        manager.lock(id, &mut b).expect("lock b");
        manager.confirm(id, a.id).expect("now legal");
    }

    #[test]
    fn cancel_restores_locks_and_references() {
        let (content, mut a, mut b) = setup();
        let mut manager = TradeManager::default();
        a.containers
            .add_to_inventory(&content.items, ItemInstance::new(1, 100))
            .expect("sword fits");
        let id = begin(&mut manager, &mut a, &mut b);
        manager
            .set_item(id, &mut a, 0, 1, &content.items)
            .expect("offer");
        manager.lock(id, &mut a).expect("lock");
        manager
            .cancel(id, Some(&mut a), Some(&mut b))
            .expect("cancel");
        assert!(a.trade.is_none());
        assert!(!a.containers.is_locked(SlotRef::inventory(0)));
        // commit after cancel is impossible
        assert_eq!(
            manager.commit(id, &content.items, &mut a, &mut b),
            Err(WorldError::WrongState)
        );
    }

    #[test]
    fn commit_detects_midway_mutation() {
        let (content, mut a, mut b) = setup();
        let mut manager = TradeManager::default();
        a.containers
            .add_to_inventory(&content.items, ItemInstance::new(100, 10))
            .expect("potions fit");
        let id = begin(&mut manager, &mut a, &mut b);
        manager
            .set_item(id, &mut a, 0, 10, &content.items)
            .expect("offer all ten");
        manager.lock(id, &mut a).expect("lock a");
        manager.lock(id, &mut b).expect("lock b");
        manager.confirm(id, a.id).expect("confirm a");
        manager.confirm(id, b.id).expect("confirm b");
        // sabotage: the offered stack shrinks behind the session's back
        a.containers.unlock_all();
        a.containers
            .remove_count(SlotRef::inventory(0), 5)
            .expect("shrink the stack");
        assert_eq!(
            manager.commit(id, &content.items, &mut a, &mut b),
            Err(WorldError::ConcurrencyConflict)
        );
        // nothing moved
        assert_eq!(a.containers.count_in_inventory(100), 5);
        assert_eq!(b.containers.count_in_inventory(100), 0);
    }

    #[test]
    fn untradable_items_are_refused() {
        let (content, mut a, mut b) = setup();
        let mut manager = TradeManager::default();
        a.containers
            .add_to_inventory(&content.items, ItemInstance::new(500, 3))
            .expect("fangs fit");
        let id = begin(&mut manager, &mut a, &mut b);
        assert_eq!(
            manager.set_item(id, &mut a, 0, 1, &content.items),
            Err(WorldError::ForbiddenOperation)
        );
        let _ = &mut b;
    }
}
