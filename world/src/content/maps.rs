//! Static map definitions: zone flags, blocked cells and respawn points.
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use tmsrv_primitives::{MapId, Position, GRID_SIZE};

use crate::error::{WorldError, WorldResult};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ZoneFlags {
    pub allow_pvp: bool,
    pub allow_pve: bool,
    pub sanctuary: bool,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Zone {
    pub x1: u16,
    pub y1: u16,
    pub x2: u16,
    pub y2: u16,
    pub flags: ZoneFlags,
}

impl Zone {
    fn contains(&self, x: u16, y: u16) -> bool {
        (self.x1..=self.x2).contains(&x) && (self.y1..=self.y2).contains(&y)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MapDef {
    pub id: MapId,
    pub name: String,
    /// Later zones override earlier ones where they overlap.
    pub zones: Vec<Zone>,
    pub blocked: HashSet<(u16, u16)>,
    pub respawn_x: u16,
    pub respawn_y: u16,
    /// Flags that apply outside every declared zone.
    pub default_flags: ZoneFlags,
}

impl MapDef {
    pub fn zone_flags(&self, x: u16, y: u16) -> ZoneFlags {
        self.zones
            .iter()
            .rev()
            .find(|zone| zone.contains(x, y))
            .map(|zone| zone.flags)
            .unwrap_or(self.default_flags)
    }

    pub fn is_walkable(&self, x: u16, y: u16) -> bool {
        x < GRID_SIZE && y < GRID_SIZE && !self.blocked.contains(&(x, y))
    }

    pub fn respawn_position(&self) -> Position {
        Position::new(self.id, self.respawn_x, self.respawn_y)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MapTable {
    pub maps: HashMap<MapId, MapDef>,
}

impl MapTable {
    pub fn map(&self, id: MapId) -> WorldResult<&MapDef> {
        self.maps.get(&id).ok_or(WorldError::OutOfBounds)
    }

    pub fn validate(&self) -> WorldResult<()> {
        for (id, def) in &self.maps {
            if *id != def.id || !def.is_walkable(def.respawn_x, def.respawn_y) {
                return Err(WorldError::InternalError);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena() -> MapDef {
        MapDef {
            id: MapId(1),
            name: "arena".into(),
            zones: vec![
                Zone {
                    x1: 0,
                    y1: 0,
                    x2: 100,
                    y2: 100,
                    flags: ZoneFlags {
                        allow_pvp: true,
                        allow_pve: true,
                        sanctuary: false,
                    },
                },
                Zone {
                    x1: 40,
                    y1: 40,
                    x2: 60,
                    y2: 60,
                    flags: ZoneFlags {
                        allow_pvp: false,
                        allow_pve: false,
                        sanctuary: true,
                    },
                },
            ],
            blocked: [(5u16, 5u16)].into_iter().collect(),
            respawn_x: 10,
            respawn_y: 10,
            default_flags: ZoneFlags {
                allow_pvp: false,
                allow_pve: true,
                sanctuary: false,
            },
        }
    }

    #[test]
    fn later_zones_override() {
        let map = arena();
        assert!(map.zone_flags(20, 20).allow_pvp);
        assert!(map.zone_flags(50, 50).sanctuary);
        assert!(!map.zone_flags(50, 50).allow_pvp);
        // outside every zone the default applies
        assert!(!map.zone_flags(200, 200).allow_pvp);
    }

    #[test]
    fn blocked_cells_and_bounds() {
        let map = arena();
        assert!(!map.is_walkable(5, 5));
        assert!(map.is_walkable(6, 5));
        assert!(!map.is_walkable(GRID_SIZE, 0));
    }
}
