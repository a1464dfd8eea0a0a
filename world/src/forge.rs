//! Refining and socketing. Every roll consumes its material atomically
//! with the item mutation and is reported for the audit log.
use rand::Rng;

use tmsrv_primitives::{ItemInstance, MAX_REFINE_LEVEL, MAX_SOCKETS};

use crate::{
    character::Character,
    content::{ItemKind, ItemTable},
    error::{WorldError, WorldResult},
    items::SlotRef,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RefineOutcome {
    Success { new_level: u8 },
    Degrade { new_level: u8 },
    /// The item survived a break only when a protection scroll absorbed it.
    Break { destroyed: bool },
}

/// Everything the audit log wants to know about one refine attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RefineReceipt {
    pub item_id: u16,
    pub previous_level: u8,
    pub roll: u32,
    pub outcome: RefineOutcome,
    pub protection_consumed: bool,
}

/// Attempts a refine. The material is always consumed; the protection
/// scroll is consumed only when it absorbs a break, leaving the item at
/// its previous level.
pub fn refine(
    rng: &mut impl Rng,
    items: &ItemTable,
    owner: &mut Character,
    item_slot: u8,
    material_slot: u8,
    protect_slot: Option<u8>,
    degrade_step: u8,
) -> WorldResult<RefineReceipt> {
    let at = SlotRef::inventory(item_slot);
    if owner.containers.is_locked(at) {
        return Err(WorldError::ItemLocked);
    }
    let item = *owner.containers.slot(at)?;
    if item.is_empty() {
        return Err(WorldError::EmptySlot);
    }
    let template = items.template(item.item_id)?;
    if !template.is_equipment() {
        return Err(WorldError::RequirementUnmet);
    }
    let level = item.refine_level();
    if level >= MAX_REFINE_LEVEL {
        return Err(WorldError::RequirementUnmet);
    }

    let material = *owner.containers.slot(SlotRef::inventory(material_slot))?;
    if items.template(material.item_id)?.kind != ItemKind::RefineMaterial {
        return Err(WorldError::RequirementUnmet);
    }
    if let Some(protect_slot) = protect_slot {
        let scroll = *owner.containers.slot(SlotRef::inventory(protect_slot))?;
        if items.template(scroll.item_id)?.kind != ItemKind::ProtectionScroll {
            return Err(WorldError::RequirementUnmet);
        }
    }

    let row = items.refine.row(level)?;
    let roll = rng.gen_range(0..1000u32);

    // all preconditions hold; consume the material and mutate in one pass
    owner
        .containers
        .remove_count(SlotRef::inventory(material_slot), 1)?;

    let (outcome, protection_consumed) = if roll < row.success {
        let new_level = level + 1;
        owner.containers.slot_mut(at)?.set_refine_level(new_level);
        (RefineOutcome::Success { new_level }, false)
    } else if roll < row.success + row.degrade {
        let new_level = level.saturating_sub(degrade_step);
        owner.containers.slot_mut(at)?.set_refine_level(new_level);
        (RefineOutcome::Degrade { new_level }, false)
    } else {
        match protect_slot {
            Some(protect_slot) => {
                owner
                    .containers
                    .remove_count(SlotRef::inventory(protect_slot), 1)?;
                (RefineOutcome::Break { destroyed: false }, true)
            }
            None => {
                owner.containers.slot_mut(at)?.clear();
                (RefineOutcome::Break { destroyed: true }, false)
            }
        }
    };
    Ok(RefineReceipt {
        item_id: item.item_id,
        previous_level: level,
        roll,
        outcome,
        protection_consumed,
    })
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SocketReceipt {
    pub item_id: u16,
    pub socket_index: u8,
    pub gem_id: u16,
}

/// Inserts a gem into an opened socket, consuming it. Opening happens
/// implicitly on the first gem when the socket count allows it.
pub fn socket_gem(
    items: &ItemTable,
    owner: &mut Character,
    item_slot: u8,
    gem_slot: u8,
    socket_index: u8,
) -> WorldResult<SocketReceipt> {
    if usize::from(socket_index) >= MAX_SOCKETS {
        return Err(WorldError::InvalidSlot);
    }
    let at = SlotRef::inventory(item_slot);
    if owner.containers.is_locked(at) {
        return Err(WorldError::ItemLocked);
    }
    let item = *owner.containers.slot(at)?;
    if item.is_empty() {
        return Err(WorldError::EmptySlot);
    }
    if !items.template(item.item_id)?.is_equipment() {
        return Err(WorldError::RequirementUnmet);
    }
    let gem = *owner.containers.slot(SlotRef::inventory(gem_slot))?;
    if items.template(gem.item_id)?.kind != ItemKind::Gem {
        return Err(WorldError::RequirementUnmet);
    }

    let mut updated = item;
    if !updated.has_socket(usize::from(socket_index)) {
        if !updated.open_socket(usize::from(socket_index)) {
            return Err(WorldError::SlotOccupied);
        }
    }
    // gem ids fit a byte on the wire effect
    if !updated.set_socket_gem(usize::from(socket_index), (gem.item_id & 0xFF) as u8) {
        return Err(WorldError::SlotOccupied);
    }

    // consume the gem atomically with the item write
    owner.containers.remove_count(SlotRef::inventory(gem_slot), 1)?;
    *owner.containers.slot_mut(at)? = updated;
    Ok(SocketReceipt {
        item_id: item.item_id,
        socket_index,
        gem_id: gem.item_id,
    })
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;
    use tmsrv_primitives::{AccountId, CharacterClass, CharacterId, MapId, Position};

    use super::*;
    use crate::content::{ContentTables, RefineRow, RefineTable};

    fn smith(content: &ContentTables) -> Character {
        let mut c = Character::new(
            content,
            CharacterId(1),
            AccountId(1),
            "smith".into(),
            CharacterClass::BeastMaster,
            Position::new(MapId(1), 100, 100),
        );
        c.containers
            .add_to_inventory(&content.items, ItemInstance::new(1, 100))
            .expect("sword");
        c.containers
            .add_to_inventory(&content.items, ItemInstance::new(300, 10))
            .expect("stones");
        c.containers
            .add_to_inventory(&content.items, ItemInstance::new(301, 10))
            .expect("scrolls");
        c
    }

    fn forced_table(success: u32, degrade: u32, break_: u32) -> RefineTable {
        RefineTable {
            rows: vec![RefineRow { success, degrade, break_ }; MAX_REFINE_LEVEL as usize],
        }
    }

    #[test]
    fn success_raises_the_level_and_eats_a_stone() {
        let content = ContentTables::fixture();
        let mut items = content.items.clone();
        items.refine = forced_table(1000, 0, 0);
        let mut owner = smith(&content);
        let mut rng = Pcg64Mcg::seed_from_u64(1);
        let receipt = refine(&mut rng, &items, &mut owner, 0, 1, None, 1).expect("refines");
        assert_eq!(receipt.outcome, RefineOutcome::Success { new_level: 1 });
        assert_eq!(
            owner
                .containers
                .slot(SlotRef::inventory(0))
                .expect("sword")
                .refine_level(),
            1
        );
        assert_eq!(owner.containers.count_in_inventory(300), 9);
        assert_eq!(owner.containers.count_in_inventory(301), 10);
    }

    #[test]
    fn break_without_protection_destroys() {
        let content = ContentTables::fixture();
        let mut items = content.items.clone();
        items.refine = forced_table(0, 0, 1000);
        let mut owner = smith(&content);
        let mut rng = Pcg64Mcg::seed_from_u64(2);
        let receipt = refine(&mut rng, &items, &mut owner, 0, 1, None, 1).expect("rolls");
        assert_eq!(receipt.outcome, RefineOutcome::Break { destroyed: true });
        assert!(owner
            .containers
            .slot(SlotRef::inventory(0))
            .expect("slot")
            .is_empty());
    }

    #[test]
    fn protection_scroll_absorbs_the_break() {
        let content = ContentTables::fixture();
        let mut items = content.items.clone();
        items.refine = forced_table(0, 0, 1000);
        let mut owner = smith(&content);
        owner
            .containers
            .slot_mut(SlotRef::inventory(0))
            .expect("sword")
            .set_refine_level(6);
        let mut rng = Pcg64Mcg::seed_from_u64(3);
        let receipt = refine(&mut rng, &items, &mut owner, 0, 1, Some(2), 1).expect("rolls");
        assert_eq!(receipt.outcome, RefineOutcome::Break { destroyed: false });
        assert!(receipt.protection_consumed);
        let sword = owner.containers.slot(SlotRef::inventory(0)).expect("slot");
        assert_eq!(sword.refine_level(), 6, "level kept");
        assert!(!sword.is_empty());
        assert_eq!(owner.containers.count_in_inventory(301), 9);
        assert_eq!(owner.containers.count_in_inventory(300), 9);
    }

    #[test]
    fn degrade_steps_down_by_the_configured_amount() {
        let content = ContentTables::fixture();
        let mut items = content.items.clone();
        items.refine = forced_table(0, 1000, 0);
        let mut owner = smith(&content);
        owner
            .containers
            .slot_mut(SlotRef::inventory(0))
            .expect("sword")
            .set_refine_level(5);
        let mut rng = Pcg64Mcg::seed_from_u64(4);
        let receipt = refine(&mut rng, &items, &mut owner, 0, 1, None, 2).expect("rolls");
        assert_eq!(receipt.outcome, RefineOutcome::Degrade { new_level: 3 });
    }

    #[test]
    fn distribution_tracks_the_table() {
        let content = ContentTables::fixture();
        let mut items = content.items.clone();
        items.refine = forced_table(400, 300, 300);
        let mut rng = Pcg64Mcg::seed_from_u64(99);
        let mut counts = [0u32; 3];
        for _ in 0..2000 {
            let mut owner = smith(&content);
            let receipt =
                refine(&mut rng, &items, &mut owner, 0, 1, None, 1).expect("rolls");
            match receipt.outcome {
                RefineOutcome::Success { .. } => counts[0] += 1,
                RefineOutcome::Degrade { .. } => counts[1] += 1,
                RefineOutcome::Break { .. } => counts[2] += 1,
            }
        }
        // 2000 trials, expectation (800, 600, 600); allow a wide band
        assert!((700..900).contains(&counts[0]), "successes: {}", counts[0]);
        assert!((500..700).contains(&counts[1]), "degrades: {}", counts[1]);
        assert!((500..700).contains(&counts[2]), "breaks: {}", counts[2]);
    }

    #[test]
    fn stackables_refuse_the_forge() {
        let content = ContentTables::fixture();
        let mut owner = smith(&content);
        assert_eq!(
            refine(
                &mut Pcg64Mcg::seed_from_u64(5),
                &content.items,
                &mut owner,
                1, // the stone stack itself
                1,
                None,
                1
            ),
            Err(WorldError::RequirementUnmet)
        );
    }

    #[test]
    fn gem_socketing_consumes_the_gem() {
        let content = ContentTables::fixture();
        let mut owner = smith(&content);
        owner
            .containers
            .add_to_inventory(&content.items, ItemInstance::new(400, 3))
            .expect("rubies");
        let receipt =
            socket_gem(&content.items, &mut owner, 0, 3, 0).expect("socket");
        assert_eq!(receipt.gem_id, 400);
        let sword = owner.containers.slot(SlotRef::inventory(0)).expect("slot");
        assert_eq!(sword.socket(0), Some((400 & 0xFF) as u8));
        assert_eq!(owner.containers.count_in_inventory(400), 2);
        // occupied socket refuses a second gem
        assert_eq!(
            socket_gem(&content.items, &mut owner, 0, 3, 0),
            Err(WorldError::SlotOccupied)
        );
    }
}
