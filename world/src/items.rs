//! Containers and the atomic slot-move primitive.
//!
//! A valid, non-empty item instance lives in exactly one container slot at
//! any instant. All mutation goes through the operations here, inside the
//! world tick; there is no other path that writes a slot.
use std::collections::BTreeSet;

use tmsrv_primitives::{ItemInstance, BANK_SLOTS, EQUIPMENT_SLOTS, INVENTORY_SLOTS};

use crate::{
    content::ItemTable,
    error::{WorldError, WorldResult},
};

/// Wire-visible container discriminants.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[repr(u8)]
pub enum ContainerKind {
    Inventory = 0,
    Equipment = 1,
    Bank = 2,
}

impl ContainerKind {
    pub fn from_u8(raw: u8) -> WorldResult<Self> {
        match raw {
            0 => Ok(ContainerKind::Inventory),
            1 => Ok(ContainerKind::Equipment),
            2 => Ok(ContainerKind::Bank),
            _ => Err(WorldError::InvalidSlot),
        }
    }

    pub fn capacity(&self) -> usize {
        match self {
            ContainerKind::Inventory => INVENTORY_SLOTS,
            ContainerKind::Equipment => EQUIPMENT_SLOTS,
            ContainerKind::Bank => BANK_SLOTS,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct SlotRef {
    pub container: ContainerKind,
    pub slot: u8,
}

impl SlotRef {
    pub fn inventory(slot: u8) -> Self {
        Self {
            container: ContainerKind::Inventory,
            slot,
        }
    }

    pub fn equipment(slot: u8) -> Self {
        Self {
            container: ContainerKind::Equipment,
            slot,
        }
    }

    pub fn bank(slot: u8) -> Self {
        Self {
            container: ContainerKind::Bank,
            slot,
        }
    }
}

/// What a successful move did, for auditing.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MoveOutcome {
    /// The whole instance changed slots.
    Moved,
    /// `count` units merged into an existing stack.
    Merged { count: u32 },
    /// `count` units split off into the destination.
    Split { count: u32 },
}

/// One character's owned containers. Trade offers do not move items; the
/// offered slots are locked in place until the trade resolves.
pub struct Containers {
    inventory: [ItemInstance; INVENTORY_SLOTS],
    equipment: [ItemInstance; EQUIPMENT_SLOTS],
    bank: [ItemInstance; BANK_SLOTS],
    locked: BTreeSet<SlotRef>,
}

impl Default for Containers {
    fn default() -> Self {
        Self {
            inventory: [ItemInstance::EMPTY; INVENTORY_SLOTS],
            equipment: [ItemInstance::EMPTY; EQUIPMENT_SLOTS],
            bank: [ItemInstance::EMPTY; BANK_SLOTS],
            locked: BTreeSet::new(),
        }
    }
}

impl Containers {
    fn slots(&self, container: ContainerKind) -> &[ItemInstance] {
        match container {
            ContainerKind::Inventory => &self.inventory,
            ContainerKind::Equipment => &self.equipment,
            ContainerKind::Bank => &self.bank,
        }
    }

    fn slots_mut(&mut self, container: ContainerKind) -> &mut [ItemInstance] {
        match container {
            ContainerKind::Inventory => &mut self.inventory,
            ContainerKind::Equipment => &mut self.equipment,
            ContainerKind::Bank => &mut self.bank,
        }
    }

    pub fn slot(&self, at: SlotRef) -> WorldResult<&ItemInstance> {
        self.slots(at.container)
            .get(at.slot as usize)
            .ok_or(WorldError::InvalidSlot)
    }

    pub fn slot_mut(&mut self, at: SlotRef) -> WorldResult<&mut ItemInstance> {
        self.slots_mut(at.container)
            .get_mut(at.slot as usize)
            .ok_or(WorldError::InvalidSlot)
    }

    pub fn equipment(&self) -> &[ItemInstance] {
        &self.equipment
    }

    pub fn inventory(&self) -> &[ItemInstance] {
        &self.inventory
    }

    // --- trade locks ---------------------------------------------------

    pub fn lock_slot(&mut self, at: SlotRef) {
        self.locked.insert(at);
    }

    pub fn unlock_slot(&mut self, at: SlotRef) {
        self.locked.remove(&at);
    }

    pub fn unlock_all(&mut self) {
        self.locked.clear();
    }

    pub fn is_locked(&self, at: SlotRef) -> bool {
        self.locked.contains(&at)
    }

    fn ensure_unlocked(&self, at: SlotRef) -> WorldResult<()> {
        if self.is_locked(at) {
            return Err(WorldError::ItemLocked);
        }
        Ok(())
    }

    // --- the move primitive --------------------------------------------

    /// Moves `count` units from `src` to `dst`. Preconditions: src
    /// non-empty and unlocked; dst unlocked and empty or stack-compatible
    /// with room. Partial counts split stackables; equipment always moves
    /// whole. Clearing and writing both slots happens in this one call, so
    /// no observer ever sees the item in two places.
    pub fn move_item(
        &mut self,
        table: &ItemTable,
        src: SlotRef,
        dst: SlotRef,
        count: u32,
    ) -> WorldResult<MoveOutcome> {
        if src == dst {
            return Err(WorldError::InvalidSlot);
        }
        self.ensure_unlocked(src)?;
        self.ensure_unlocked(dst)?;
        let source = *self.slot(src)?;
        if source.is_empty() {
            return Err(WorldError::EmptySlot);
        }
        let template = table.template(source.item_id)?;
        let destination = *self.slot(dst)?;

        if template.is_equipment() || template.stack_cap == 1 {
            if !destination.is_empty() {
                return Err(WorldError::SlotOccupied);
            }
            *self.slot_mut(dst)? = source;
            self.slot_mut(src)?.clear();
            return Ok(MoveOutcome::Moved);
        }

        let count = if count == 0 { source.value } else { count };
        if count > source.value {
            return Err(WorldError::InvalidAmount);
        }

        if destination.is_empty() {
            if count == source.value {
                *self.slot_mut(dst)? = source;
                self.slot_mut(src)?.clear();
                Ok(MoveOutcome::Moved)
            } else {
                let mut moved = source;
                moved.value = count;
                *self.slot_mut(dst)? = moved;
                self.slot_mut(src)?.value -= count;
                Ok(MoveOutcome::Split { count })
            }
        } else {
            if !destination.stackable_with(&source) {
                return Err(WorldError::SlotOccupied);
            }
            if destination.value + count > template.stack_cap {
                return Err(WorldError::StackOverflow);
            }
            self.slot_mut(dst)?.value += count;
            if count == source.value {
                self.slot_mut(src)?.clear();
            } else {
                self.slot_mut(src)?.value -= count;
            }
            Ok(MoveOutcome::Merged { count })
        }
    }

    /// Places an item into the inventory: merges into compatible stacks
    /// first, then takes the first empty slot.
    pub fn add_to_inventory(
        &mut self,
        table: &ItemTable,
        item: ItemInstance,
    ) -> WorldResult<u8> {
        if item.is_empty() {
            return Err(WorldError::EmptySlot);
        }
        let template = table.template(item.item_id)?;
        if template.stack_cap > 1 {
            for (index, slot) in self.inventory.iter_mut().enumerate() {
                if slot.stackable_with(&item) && slot.value + item.value <= template.stack_cap {
                    slot.value += item.value;
                    return Ok(index as u8);
                }
            }
        }
        for (index, slot) in self.inventory.iter_mut().enumerate() {
            let at = SlotRef::inventory(index as u8);
            if slot.is_empty() && !self.locked.contains(&at) {
                *slot = item;
                return Ok(index as u8);
            }
        }
        Err(WorldError::InventoryFull)
    }

    /// Removes `count` units from a slot, clearing it when it empties.
    pub fn remove_count(&mut self, at: SlotRef, count: u32) -> WorldResult<ItemInstance> {
        self.ensure_unlocked(at)?;
        let slot = self.slot_mut(at)?;
        if slot.is_empty() {
            return Err(WorldError::EmptySlot);
        }
        if count == 0 || count > slot.value {
            return Err(WorldError::InvalidAmount);
        }
        let mut taken = *slot;
        taken.value = count;
        if count == slot.value {
            slot.clear();
        } else {
            slot.value -= count;
        }
        Ok(taken)
    }

    /// Whether `wanted` (item id, count) pairs all fit, considering stack
    /// merges and free slots. Used to gate quest rewards.
    pub fn has_space_for(&self, table: &ItemTable, wanted: &[(u16, u32)]) -> bool {
        let mut free_slots = self
            .inventory
            .iter()
            .enumerate()
            .filter(|(index, slot)| {
                slot.is_empty() && !self.locked.contains(&SlotRef::inventory(*index as u8))
            })
            .count();
        for (item_id, mut count) in wanted.iter().copied() {
            let Ok(template) = table.template(item_id) else {
                return false;
            };
            if template.stack_cap > 1 {
                for slot in self.inventory.iter() {
                    if slot.item_id == item_id && slot.effects == [[0; 2]; 3] {
                        count = count.saturating_sub(template.stack_cap.saturating_sub(slot.value));
                    }
                }
            }
            while count > 0 {
                if free_slots == 0 {
                    return false;
                }
                free_slots -= 1;
                count = count.saturating_sub(template.stack_cap);
            }
        }
        true
    }

    /// Total units of an item id across the inventory.
    pub fn count_in_inventory(&self, item_id: u16) -> u32 {
        self.inventory
            .iter()
            .filter(|slot| slot.item_id == item_id)
            .map(|slot| slot.value)
            .sum()
    }

    /// Consumes `count` units of `item_id` from wherever they sit in the
    /// inventory. Fails without change when there are not enough.
    pub fn consume_from_inventory(&mut self, item_id: u16, count: u32) -> WorldResult<()> {
        if self.count_in_inventory(item_id) < count {
            return Err(WorldError::RequirementUnmet);
        }
        let mut remaining = count;
        for (index, _) in self
            .inventory
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.item_id == item_id)
            .map(|(index, slot)| (index, *slot))
            .collect::<Vec<_>>()
        {
            if remaining == 0 {
                break;
            }
            let at = SlotRef::inventory(index as u8);
            if self.is_locked(at) {
                continue;
            }
            let available = self.inventory[index].value;
            let take = available.min(remaining);
            self.remove_count(at, take)?;
            remaining -= take;
        }
        if remaining > 0 {
            // everything left was trade-locked
            return Err(WorldError::ItemLocked);
        }
        Ok(())
    }

    /// Carried weight, derived from inventory plus equipment.
    pub fn carried_weight(&self, table: &ItemTable) -> u32 {
        self.inventory
            .iter()
            .chain(self.equipment.iter())
            .filter(|slot| !slot.is_empty())
            .map(|slot| {
                let per_unit = table
                    .template(slot.item_id)
                    .map(|t| u32::from(t.weight))
                    .unwrap_or(0);
                let units = table
                    .template(slot.item_id)
                    .map(|t| if t.stack_cap > 1 { slot.value } else { 1 })
                    .unwrap_or(1);
                per_unit * units
            })
            .sum()
    }

    /// Item-count sum across every container, for conservation checks.
    pub fn total_units(&self) -> u64 {
        self.inventory
            .iter()
            .chain(self.equipment.iter())
            .chain(self.bank.iter())
            .filter(|slot| !slot.is_empty())
            .map(|slot| u64::from(slot.value))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentTables;

    fn containers_with(items: &[(u8, ItemInstance)]) -> Containers {
        let mut containers = Containers::default();
        for (slot, item) in items {
            containers.inventory[*slot as usize] = *item;
        }
        containers
    }

    #[test]
    fn whole_move_to_empty_slot() {
        let content = ContentTables::fixture();
        let mut c = containers_with(&[(0, ItemInstance::new(1, 100))]);
        let outcome = c
            .move_item(
                &content.items,
                SlotRef::inventory(0),
                SlotRef::inventory(5),
                0,
            )
            .expect("move should succeed");
        assert_eq!(outcome, MoveOutcome::Moved);
        assert!(c.inventory[0].is_empty());
        assert_eq!(c.inventory[5].item_id, 1);
    }

    #[test]
    fn partial_move_splits_the_stack() {
        let content = ContentTables::fixture();
        let mut c = containers_with(&[(0, ItemInstance::new(100, 10))]);
        let outcome = c
            .move_item(
                &content.items,
                SlotRef::inventory(0),
                SlotRef::inventory(1),
                4,
            )
            .expect("split should succeed");
        assert_eq!(outcome, MoveOutcome::Split { count: 4 });
        assert_eq!(c.inventory[0].value, 6);
        assert_eq!(c.inventory[1].value, 4);
        assert_eq!(c.total_units(), 10);
    }

    #[test]
    fn merge_respects_stack_cap() {
        let content = ContentTables::fixture();
        let mut c = containers_with(&[
            (0, ItemInstance::new(100, 60)),
            (1, ItemInstance::new(100, 50)),
        ]);
        assert_eq!(
            c.move_item(
                &content.items,
                SlotRef::inventory(0),
                SlotRef::inventory(1),
                0,
            ),
            Err(WorldError::StackOverflow)
        );
        let outcome = c
            .move_item(
                &content.items,
                SlotRef::inventory(0),
                SlotRef::inventory(1),
                49,
            )
            .expect("partial merge should fit");
        assert_eq!(outcome, MoveOutcome::Merged { count: 49 });
        assert_eq!(c.inventory[1].value, 99);
        assert_eq!(c.inventory[0].value, 11);
    }

    #[test]
    fn refined_stack_does_not_merge_into_plain() {
        let content = ContentTables::fixture();
        let mut refined = ItemInstance::new(100, 5);
        refined.set_refine_level(1);
        let mut c = containers_with(&[(0, refined), (1, ItemInstance::new(100, 5))]);
        assert_eq!(
            c.move_item(
                &content.items,
                SlotRef::inventory(0),
                SlotRef::inventory(1),
                0,
            ),
            Err(WorldError::SlotOccupied)
        );
    }

    #[test]
    fn locked_slots_refuse_everything() {
        let content = ContentTables::fixture();
        let mut c = containers_with(&[(0, ItemInstance::new(1, 100))]);
        c.lock_slot(SlotRef::inventory(0));
        assert_eq!(
            c.move_item(
                &content.items,
                SlotRef::inventory(0),
                SlotRef::inventory(1),
                0,
            ),
            Err(WorldError::ItemLocked)
        );
        assert_eq!(
            c.remove_count(SlotRef::inventory(0), 1),
            Err(WorldError::ItemLocked)
        );
        c.unlock_slot(SlotRef::inventory(0));
        assert!(c
            .move_item(
                &content.items,
                SlotRef::inventory(0),
                SlotRef::inventory(1),
                0,
            )
            .is_ok());
    }

    #[test]
    fn boundary_slots_behave_like_middle_ones() {
        let content = ContentTables::fixture();
        let last = (INVENTORY_SLOTS - 1) as u8;
        let mut c = containers_with(&[(0, ItemInstance::new(100, 7))]);
        c.move_item(
            &content.items,
            SlotRef::inventory(0),
            SlotRef::inventory(last),
            0,
        )
        .expect("move to the last slot should succeed");
        assert_eq!(c.inventory[last as usize].value, 7);
        assert!(matches!(
            c.slot(SlotRef::inventory(last + 1)),
            Err(WorldError::InvalidSlot)
        ));
    }

    #[test]
    fn add_to_inventory_prefers_merging() {
        let content = ContentTables::fixture();
        let mut c = containers_with(&[(3, ItemInstance::new(100, 10))]);
        let slot = c
            .add_to_inventory(&content.items, ItemInstance::new(100, 5))
            .expect("add should succeed");
        assert_eq!(slot, 3);
        assert_eq!(c.inventory[3].value, 15);
    }

    #[test]
    fn space_check_accounts_for_partial_stacks() {
        let content = ContentTables::fixture();
        let mut c = Containers::default();
        for index in 0..INVENTORY_SLOTS - 1 {
            c.inventory[index] = ItemInstance::new(1, 100);
        }
        c.inventory[INVENTORY_SLOTS - 1] = ItemInstance::new(100, 95);
        // 4 units merge into the 95-stack, nothing else fits
        assert!(c.has_space_for(&content.items, &[(100, 4)]));
        assert!(!c.has_space_for(&content.items, &[(100, 5)]));
    }

    #[test]
    fn consume_skips_locked_stacks() {
        let content = ContentTables::fixture();
        let mut c = containers_with(&[
            (0, ItemInstance::new(100, 5)),
            (1, ItemInstance::new(100, 5)),
        ]);
        c.lock_slot(SlotRef::inventory(0));
        c.consume_from_inventory(100, 5).expect("unlocked stack suffices");
        assert_eq!(c.inventory[0].value, 5);
        assert!(c.inventory[1].is_empty());
        assert_eq!(c.consume_from_inventory(100, 5), Err(WorldError::ItemLocked));
        let _ = content;
    }
}
