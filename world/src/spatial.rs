//! Spatial index: per-map grids bucketed by [WARD_RANGE] cells.
//!
//! Buckets hold sorted id lists; entity moves are O(1) bucket deltas. The
//! index stores handles only, never owning pointers, and is read and written
//! exclusively inside the world tick. Queries return the bucket-granular
//! superset of a Chebyshev radius; callers filter by exact position.
use std::collections::HashMap;

use tmsrv_primitives::{CharacterId, MapId, MobId, Position, GRID_SIZE, WARD_RANGE};

/// A ground item pile, identified within a server uptime.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct GroundItemId(pub u32);

#[derive(Default)]
struct Bucket {
    characters: Vec<CharacterId>,
    mobs: Vec<MobId>,
    ground_items: Vec<GroundItemId>,
}

fn insert_sorted<T: Ord + Copy>(list: &mut Vec<T>, value: T) {
    if let Err(index) = list.binary_search(&value) {
        list.insert(index, value);
    }
}

fn remove_sorted<T: Ord + Copy>(list: &mut Vec<T>, value: T) -> bool {
    match list.binary_search(&value) {
        Ok(index) => {
            list.remove(index);
            true
        }
        Err(_) => false,
    }
}

fn bucket_of(x: u16, y: u16) -> (u16, u16) {
    (x / WARD_RANGE, y / WARD_RANGE)
}

#[derive(Default)]
struct MapGrid {
    buckets: HashMap<(u16, u16), Bucket>,
}

impl MapGrid {
    fn bucket_mut(&mut self, x: u16, y: u16) -> &mut Bucket {
        self.buckets.entry(bucket_of(x, y)).or_default()
    }

    fn buckets_in_radius(&self, center: &Position, radius: u16) -> impl Iterator<Item = &Bucket> {
        let min_x = center.x.saturating_sub(radius) / WARD_RANGE;
        let min_y = center.y.saturating_sub(radius) / WARD_RANGE;
        let max_x = center.x.saturating_add(radius).min(GRID_SIZE - 1) / WARD_RANGE;
        let max_y = center.y.saturating_add(radius).min(GRID_SIZE - 1) / WARD_RANGE;
        (min_x..=max_x)
            .flat_map(move |bx| (min_y..=max_y).map(move |by| (bx, by)))
            .filter_map(|key| self.buckets.get(&key))
    }
}

#[derive(Default)]
pub struct SpatialIndex {
    grids: HashMap<MapId, MapGrid>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn grid_mut(&mut self, map: MapId) -> &mut MapGrid {
        self.grids.entry(map).or_default()
    }

    pub fn insert_character(&mut self, id: CharacterId, pos: &Position) {
        insert_sorted(
            &mut self.grid_mut(pos.map).bucket_mut(pos.x, pos.y).characters,
            id,
        );
    }

    pub fn remove_character(&mut self, id: CharacterId, pos: &Position) -> bool {
        remove_sorted(
            &mut self.grid_mut(pos.map).bucket_mut(pos.x, pos.y).characters,
            id,
        )
    }

    /// O(1): touches at most two buckets, none when the move stays inside
    /// one.
    pub fn move_character(&mut self, id: CharacterId, from: &Position, to: &Position) {
        if from.map == to.map && bucket_of(from.x, from.y) == bucket_of(to.x, to.y) {
            return;
        }
        self.remove_character(id, from);
        self.insert_character(id, to);
    }

    pub fn insert_mob(&mut self, id: MobId, pos: &Position) {
        insert_sorted(&mut self.grid_mut(pos.map).bucket_mut(pos.x, pos.y).mobs, id);
    }

    pub fn remove_mob(&mut self, id: MobId, pos: &Position) -> bool {
        remove_sorted(&mut self.grid_mut(pos.map).bucket_mut(pos.x, pos.y).mobs, id)
    }

    pub fn move_mob(&mut self, id: MobId, from: &Position, to: &Position) {
        if from.map == to.map && bucket_of(from.x, from.y) == bucket_of(to.x, to.y) {
            return;
        }
        self.remove_mob(id, from);
        self.insert_mob(id, to);
    }

    pub fn insert_ground_item(&mut self, id: GroundItemId, pos: &Position) {
        insert_sorted(
            &mut self.grid_mut(pos.map).bucket_mut(pos.x, pos.y).ground_items,
            id,
        );
    }

    pub fn remove_ground_item(&mut self, id: GroundItemId, pos: &Position) -> bool {
        remove_sorted(
            &mut self.grid_mut(pos.map).bucket_mut(pos.x, pos.y).ground_items,
            id,
        )
    }

    pub fn characters_near(&self, center: &Position, radius: u16) -> Vec<CharacterId> {
        match self.grids.get(&center.map) {
            Some(grid) => grid
                .buckets_in_radius(center, radius)
                .flat_map(|bucket| bucket.characters.iter().copied())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn mobs_near(&self, center: &Position, radius: u16) -> Vec<MobId> {
        match self.grids.get(&center.map) {
            Some(grid) => grid
                .buckets_in_radius(center, radius)
                .flat_map(|bucket| bucket.mobs.iter().copied())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn ground_items_near(&self, center: &Position, radius: u16) -> Vec<GroundItemId> {
        match self.grids.get(&center.map) {
            Some(grid) => grid
                .buckets_in_radius(center, radius)
                .flat_map(|bucket| bucket.ground_items.iter().copied())
                .collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(x: u16, y: u16) -> Position {
        Position::new(MapId(1), x, y)
    }

    #[test]
    fn insert_query_remove() {
        let mut index = SpatialIndex::new();
        let here = pos(100, 100);
        index.insert_character(CharacterId(1), &here);
        index.insert_character(CharacterId(2), &pos(105, 95));
        index.insert_character(CharacterId(3), &pos(500, 500));

        let near = index.characters_near(&here, 24);
        assert!(near.contains(&CharacterId(1)));
        assert!(near.contains(&CharacterId(2)));
        assert!(!near.contains(&CharacterId(3)));

        assert!(index.remove_character(CharacterId(1), &here));
        assert!(!index.remove_character(CharacterId(1), &here));
        assert!(!index.characters_near(&here, 24).contains(&CharacterId(1)));
    }

    #[test]
    fn moves_across_buckets_update_membership() {
        let mut index = SpatialIndex::new();
        let from = pos(10, 10);
        let to = pos(200, 200);
        index.insert_character(CharacterId(7), &from);
        index.move_character(CharacterId(7), &from, &to);
        assert!(!index.characters_near(&from, 12).contains(&CharacterId(7)));
        assert!(index.characters_near(&to, 12).contains(&CharacterId(7)));
    }

    #[test]
    fn move_within_one_bucket_is_a_noop() {
        let mut index = SpatialIndex::new();
        let from = pos(0, 0);
        let to = pos(WARD_RANGE - 1, WARD_RANGE - 1);
        index.insert_character(CharacterId(9), &from);
        index.move_character(CharacterId(9), &from, &to);
        assert!(index.characters_near(&to, 1).contains(&CharacterId(9)));
    }

    #[test]
    fn different_maps_are_disjoint() {
        let mut index = SpatialIndex::new();
        index.insert_mob(MobId(1), &Position::new(MapId(1), 50, 50));
        let elsewhere = Position::new(MapId(2), 50, 50);
        assert!(index.mobs_near(&elsewhere, 24).is_empty());
    }

    #[test]
    fn ground_items_tracked() {
        let mut index = SpatialIndex::new();
        let here = pos(60, 60);
        index.insert_ground_item(GroundItemId(4), &here);
        assert_eq!(index.ground_items_near(&here, 4), vec![GroundItemId(4)]);
        assert!(index.remove_ground_item(GroundItemId(4), &here));
        assert!(index.ground_items_near(&here, 4).is_empty());
    }
}
