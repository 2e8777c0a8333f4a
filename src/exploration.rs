use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};
use twox_hash::XxHash64;

use crate::env::LocationId;
use crate::error::CoreError;
use crate::persist::atomic_write;

pub const MAP_WIDTH: usize = 384;
pub const MAP_HEIGHT: usize = 384;
const HASH_SEED: u64 = 0x5EED_0F_3A90;

/// Unlisted locations get a square slot in a band along the bottom edge.
const SLOT_SIZE: usize = 12;
const SLOT_COLS: usize = MAP_WIDTH / SLOT_SIZE;
const SLOT_ROWS: usize = 6;
const SLOT_BAND_Y: usize = MAP_HEIGHT - SLOT_ROWS * SLOT_SIZE;

/// A location's private rectangle on the global grid, in tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region {
    x: usize,
    y: usize,
    w: usize,
    h: usize,
}

/// Known locations, sized to their walkable extent and packed so that no
/// two rectangles share a cell. All of them sit above `SLOT_BAND_Y`.
const REGIONS: &[(LocationId, Region)] = &[
    // towns
    (0x00, Region { x: 130, y: 234, w: 20, h: 18 }),
    (0x01, Region { x: 244, y: 0, w: 40, h: 36 }),
    (0x02, Region { x: 284, y: 0, w: 40, h: 36 }),
    (0x03, Region { x: 324, y: 0, w: 40, h: 36 }),
    (0x04, Region { x: 150, y: 234, w: 20, h: 18 }),
    (0x05, Region { x: 0, y: 144, w: 40, h: 36 }),
    (0x06, Region { x: 194, y: 0, w: 50, h: 36 }),
    (0x07, Region { x: 40, y: 144, w: 40, h: 36 }),
    (0x08, Region { x: 170, y: 234, w: 20, h: 18 }),
    (0x09, Region { x: 190, y: 234, w: 20, h: 18 }),
    (0x0A, Region { x: 80, y: 144, w: 40, h: 36 }),
    // routes
    (0x0B, Region { x: 360, y: 144, w: 20, h: 36 }),
    (0x0C, Region { x: 80, y: 0, w: 20, h: 72 }),
    (0x0D, Region { x: 278, y: 180, w: 70, h: 18 }),
    (0x0E, Region { x: 188, y: 180, w: 90, h: 18 }),
    (0x0F, Region { x: 0, y: 180, w: 20, h: 36 }),
    (0x10, Region { x: 20, y: 180, w: 20, h: 36 }),
    (0x11, Region { x: 210, y: 234, w: 20, h: 18 }),
    (0x12, Region { x: 0, y: 216, w: 60, h: 18 }),
    (0x13, Region { x: 60, y: 216, w: 60, h: 18 }),
    (0x14, Region { x: 100, y: 0, w: 20, h: 72 }),
    (0x15, Region { x: 120, y: 216, w: 60, h: 18 }),
    (0x16, Region { x: 40, y: 0, w: 20, h: 108 }),
    (0x17, Region { x: 180, y: 216, w: 60, h: 18 }),
    (0x18, Region { x: 120, y: 0, w: 20, h: 54 }),
    (0x19, Region { x: 240, y: 216, w: 60, h: 18 }),
    (0x1A, Region { x: 50, y: 234, w: 40, h: 18 }),
    (0x1B, Region { x: 0, y: 0, w: 20, h: 144 }),
    (0x1C, Region { x: 0, y: 234, w: 50, h: 18 }),
    (0x1D, Region { x: 140, y: 0, w: 20, h: 54 }),
    (0x1E, Region { x: 88, y: 180, w: 100, h: 18 }),
    (0x1F, Region { x: 60, y: 0, w: 20, h: 90 }),
    (0x25, Region { x: 90, y: 234, w: 40, h: 18 }),
    (0x26, Region { x: 20, y: 0, w: 20, h: 144 }),
    (0x27, Region { x: 40, y: 180, w: 20, h: 36 }),
    (0x28, Region { x: 300, y: 216, w: 60, h: 18 }),
    // buildings
    (0x33, Region { x: 80, y: 252, w: 16, h: 16 }),
    (0x34, Region { x: 96, y: 252, w: 16, h: 16 }),
    (0x35, Region { x: 112, y: 252, w: 16, h: 16 }),
    (0x36, Region { x: 128, y: 252, w: 16, h: 16 }),
    (0x37, Region { x: 144, y: 252, w: 16, h: 16 }),
    (0x38, Region { x: 160, y: 252, w: 16, h: 16 }),
    (0x39, Region { x: 176, y: 252, w: 16, h: 16 }),
    (0x3A, Region { x: 192, y: 252, w: 16, h: 16 }),
    (0x40, Region { x: 230, y: 234, w: 20, h: 18 }),
    (0x41, Region { x: 250, y: 234, w: 20, h: 18 }),
    (0x42, Region { x: 208, y: 252, w: 16, h: 16 }),
    (0x43, Region { x: 224, y: 252, w: 16, h: 16 }),
    (0x44, Region { x: 240, y: 252, w: 16, h: 16 }),
    (0x45, Region { x: 256, y: 252, w: 16, h: 16 }),
    (0x46, Region { x: 270, y: 234, w: 20, h: 18 }),
    (0x47, Region { x: 272, y: 252, w: 16, h: 16 }),
    (0x48, Region { x: 290, y: 234, w: 20, h: 18 }),
    (0x49, Region { x: 288, y: 252, w: 16, h: 16 }),
    (0x4A, Region { x: 304, y: 252, w: 16, h: 16 }),
    (0x4B, Region { x: 320, y: 252, w: 16, h: 16 }),
    (0x4C, Region { x: 336, y: 252, w: 16, h: 16 }),
    (0x4D, Region { x: 352, y: 252, w: 16, h: 16 }),
    (0x4E, Region { x: 368, y: 252, w: 16, h: 16 }),
    (0x4F, Region { x: 0, y: 270, w: 16, h: 16 }),
    // dungeons
    (0x59, Region { x: 160, y: 0, w: 34, h: 48 }),
    (0x6C, Region { x: 120, y: 144, w: 40, h: 36 }),
    (0x6D, Region { x: 60, y: 180, w: 28, h: 28 }),
    (0x6E, Region { x: 160, y: 144, w: 40, h: 36 }),
    (0xA4, Region { x: 200, y: 144, w: 40, h: 36 }),
    (0xA5, Region { x: 240, y: 144, w: 40, h: 36 }),
    (0xAB, Region { x: 280, y: 144, w: 40, h: 36 }),
    (0xAC, Region { x: 320, y: 144, w: 40, h: 36 }),
    (0xE7, Region { x: 310, y: 234, w: 20, h: 18 }),
    (0xE8, Region { x: 330, y: 234, w: 20, h: 18 }),
    (0xE9, Region { x: 350, y: 234, w: 20, h: 18 }),
    (0xEA, Region { x: 0, y: 252, w: 20, h: 18 }),
    (0xEB, Region { x: 20, y: 252, w: 20, h: 18 }),
    (0xEC, Region { x: 40, y: 252, w: 20, h: 18 }),
    (0xED, Region { x: 60, y: 252, w: 20, h: 18 }),
];

const _: () = assert!(256 - REGIONS.len() <= SLOT_COLS * SLOT_ROWS);

fn known_region(location: LocationId) -> Option<Region> {
    REGIONS
        .iter()
        .find(|(id, _)| *id == location)
        .map(|(_, r)| *r)
}

/// Slot index per unlisted id: hashed, then stepped forward past taken slots.
static OVERFLOW_SLOTS: LazyLock<[usize; 256]> = LazyLock::new(|| {
    let mut taken = [false; SLOT_COLS * SLOT_ROWS];
    let mut slots = [0usize; 256];
    for id in 0..=u8::MAX {
        if known_region(id).is_some() {
            continue;
        }
        let mut slot = (XxHash64::oneshot(HASH_SEED, &[id]) % taken.len() as u64) as usize;
        while taken[slot] {
            slot = (slot + 1) % taken.len();
        }
        taken[slot] = true;
        slots[id as usize] = slot;
    }
    slots
});

fn region(location: LocationId) -> Region {
    if let Some(r) = known_region(location) {
        return r;
    }
    let slot = OVERFLOW_SLOTS[location as usize];
    Region {
        x: (slot % SLOT_COLS) * SLOT_SIZE,
        y: SLOT_BAND_Y + (slot / SLOT_COLS) * SLOT_SIZE,
        w: SLOT_SIZE,
        h: SLOT_SIZE,
    }
}

/// Map a local tile to the shared grid. Total, and injective within each
/// location's extent; tiles past the extent wrap inside the same rectangle.
pub fn local_to_global(x: u8, y: u8, location: LocationId) -> (usize, usize) {
    let r = region(location);
    (r.x + x as usize % r.w, r.y + y as usize % r.h)
}

#[derive(Serialize, Deserialize)]
struct StoredMap {
    width: u32,
    height: u32,
    cells: Vec<(u16, u16, LocationId)>,
}

/// Global record of visited tiles. Grows monotonically; episode resets only
/// clear the per-episode counter.
#[derive(Clone)]
pub struct ExplorationMap {
    claims: Vec<Option<LocationId>>,
    explored: usize,
    episode_new: usize,
}

impl Default for ExplorationMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ExplorationMap {
    pub fn new() -> Self {
        Self {
            claims: vec![None; MAP_WIDTH * MAP_HEIGHT],
            explored: 0,
            episode_new: 0,
        }
    }

    fn index(gx: usize, gy: usize) -> usize {
        gy * MAP_WIDTH + gx
    }

    /// Mark the tile visited. Returns true only the first time a cell is seen.
    pub fn update(&mut self, x: u8, y: u8, location: LocationId) -> bool {
        let (gx, gy) = local_to_global(x, y, location);
        let cell = &mut self.claims[Self::index(gx, gy)];
        if cell.is_some() {
            return false;
        }
        *cell = Some(location);
        self.explored += 1;
        self.episode_new += 1;
        true
    }

    pub fn is_visited(&self, x: u8, y: u8, location: LocationId) -> bool {
        let (gx, gy) = local_to_global(x, y, location);
        self.claims[Self::index(gx, gy)].is_some()
    }

    /// Location that first claimed the cell, if any.
    pub fn first_claimant(&self, gx: usize, gy: usize) -> Option<LocationId> {
        if gx >= MAP_WIDTH || gy >= MAP_HEIGHT {
            return None;
        }
        self.claims[Self::index(gx, gy)]
    }

    /// Visited flags in a (2r+1)x(2r+1) window, rows top to bottom.
    /// Cells off the grid read as unvisited.
    pub fn get_local_view(
        &self,
        x: u8,
        y: u8,
        location: LocationId,
        radius: usize,
    ) -> Vec<Vec<bool>> {
        let (cx, cy) = local_to_global(x, y, location);
        let r = radius as i64;
        (-r..=r)
            .map(|dy| {
                (-r..=r)
                    .map(|dx| {
                        let gx = cx as i64 + dx;
                        let gy = cy as i64 + dy;
                        if gx < 0 || gy < 0 {
                            return false;
                        }
                        self.first_claimant(gx as usize, gy as usize).is_some()
                    })
                    .collect()
            })
            .collect()
    }

    pub fn get_explored_count(&self) -> usize {
        self.explored
    }

    pub fn episode_new_cells(&self) -> usize {
        self.episode_new
    }

    pub fn reset_episode(&mut self) {
        self.episode_new = 0;
    }

    /// Visited cell count grouped by the location that claimed them.
    pub fn location_counts(&self) -> BTreeMap<LocationId, usize> {
        let mut counts = BTreeMap::new();
        for loc in self.claims.iter().flatten() {
            *counts.entry(*loc).or_insert(0) += 1;
        }
        counts
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let cells = self
            .claims
            .iter()
            .enumerate()
            .filter_map(|(i, c)| {
                c.map(|loc| ((i % MAP_WIDTH) as u16, (i / MAP_WIDTH) as u16, loc))
            })
            .collect();
        let stored = StoredMap {
            width: MAP_WIDTH as u32,
            height: MAP_HEIGHT as u32,
            cells,
        };
        let data = bincode::serialize(&stored).context("Failed to encode exploration map")?;
        atomic_write(path, &data)?;
        debug!(path = %path.display(), explored = self.explored, "saved exploration map");
        Ok(())
    }

    pub fn try_load(path: &Path) -> Result<Self, CoreError> {
        let corrupt = |reason: String| CoreError::CorruptPersistedState {
            path: path.to_path_buf(),
            reason,
        };
        let bytes = std::fs::read(path).map_err(|e| corrupt(e.to_string()))?;
        let stored: StoredMap = bincode::deserialize(&bytes).map_err(|e| corrupt(e.to_string()))?;
        if stored.width as usize != MAP_WIDTH || stored.height as usize != MAP_HEIGHT {
            return Err(corrupt(format!(
                "grid is {}x{}, expected {MAP_WIDTH}x{MAP_HEIGHT}",
                stored.width, stored.height
            )));
        }
        let mut map = Self::new();
        for (gx, gy, loc) in stored.cells {
            let (gx, gy) = (gx as usize, gy as usize);
            if gx >= MAP_WIDTH || gy >= MAP_HEIGHT {
                return Err(corrupt(format!("cell ({gx}, {gy}) is off the grid")));
            }
            let cell = &mut map.claims[Self::index(gx, gy)];
            if cell.is_none() {
                *cell = Some(loc);
                map.explored += 1;
            }
        }
        Ok(map)
    }

    /// Missing or unreadable stores start an empty map.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "no exploration map on disk, starting empty");
            return Self::new();
        }
        match Self::try_load(path) {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "discarding exploration map");
                Self::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn update_is_true_once_per_cell() {
        let mut map = ExplorationMap::new();
        assert!(map.update(3, 4, 0x00));
        assert!(!map.update(3, 4, 0x00));
        assert_eq!(map.get_explored_count(), 1);
        assert_eq!(map.episode_new_cells(), 1);
    }

    #[test]
    fn episode_reset_keeps_visited_cells() {
        let mut map = ExplorationMap::new();
        map.update(1, 1, 0x01);
        map.reset_episode();
        assert_eq!(map.episode_new_cells(), 0);
        assert!(!map.update(1, 1, 0x01));
        assert_eq!(map.get_explored_count(), 1);
    }

    #[test]
    fn buildings_do_not_share_cells_with_towns() {
        let mut map = ExplorationMap::new();
        assert!(map.update(2, 2, 0x00));
        assert!(map.update(2, 2, 0x33));
        let (gx, gy) = local_to_global(2, 2, 0x33);
        assert_eq!(map.first_claimant(gx, gy), Some(0x33));
        let (gx, gy) = local_to_global(2, 2, 0x00);
        assert_eq!(map.first_claimant(gx, gy), Some(0x00));
    }

    #[test]
    fn every_location_tile_has_its_own_cell() {
        let mut owner = std::collections::HashMap::new();
        for location in 0..=u8::MAX {
            let r = region(location);
            assert!(r.x + r.w <= MAP_WIDTH && r.y + r.h <= MAP_HEIGHT);
            if known_region(location).is_some() {
                assert!(r.y + r.h <= SLOT_BAND_Y);
            }
            for x in 0..r.w as u8 {
                for y in 0..r.h as u8 {
                    let cell = local_to_global(x, y, location);
                    if let Some(prev) = owner.insert(cell, (location, x, y)) {
                        panic!("{prev:?} and {:?} share {cell:?}", (location, x, y));
                    }
                }
            }
        }
    }

    #[test]
    fn far_tiles_stay_distinct_and_on_grid() {
        assert_eq!(local_to_global(4, 4, 0xC7), local_to_global(4, 4, 0xC7));
        let a = local_to_global(250, 250, 0x14);
        let b = local_to_global(240, 240, 0x14);
        assert_ne!(a, b);
        for cell in [a, b, local_to_global(255, 255, 0xC7)] {
            assert!(cell.0 < MAP_WIDTH && cell.1 < MAP_HEIGHT);
        }
    }

    #[test]
    fn local_view_is_square_and_read_only() {
        let mut map = ExplorationMap::new();
        map.update(5, 5, 0x00);
        map.update(6, 5, 0x00);
        let view = map.get_local_view(5, 5, 0x00, 2);
        assert_eq!(view.len(), 5);
        assert!(view.iter().all(|row| row.len() == 5));
        assert!(view[2][2]);
        assert!(view[2][3]);
        assert!(!view[0][0]);
        assert_eq!(map.get_explored_count(), 2);
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.bin");
        let mut map = ExplorationMap::new();
        for x in 0..10 {
            map.update(x, 3, 0x0B);
        }
        map.update(7, 7, 0x36);
        map.update(3, 9, 0xC7);
        map.save(&path).unwrap();

        let back = ExplorationMap::load(&path);
        assert_eq!(back.get_explored_count(), map.get_explored_count());
        for gy in 0..MAP_HEIGHT {
            for gx in 0..MAP_WIDTH {
                assert_eq!(back.first_claimant(gx, gy), map.first_claimant(gx, gy));
            }
        }
    }

    #[test]
    fn corrupt_store_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.bin");
        std::fs::write(&path, b"not a map").unwrap();
        assert!(matches!(
            ExplorationMap::try_load(&path),
            Err(CoreError::CorruptPersistedState { .. })
        ));
        assert_eq!(ExplorationMap::load(&path).get_explored_count(), 0);
        assert_eq!(
            ExplorationMap::load(&dir.path().join("missing.bin")).get_explored_count(),
            0
        );
    }

    proptest! {
        #[test]
        fn explored_count_never_decreases(
            visits in proptest::collection::vec((any::<u8>(), any::<u8>(), any::<u8>()), 1..200)
        ) {
            let mut map = ExplorationMap::new();
            let mut seen = std::collections::HashSet::new();
            let mut last = 0;
            for (x, y, loc) in visits {
                let fresh = map.update(x, y, loc);
                prop_assert_eq!(fresh, seen.insert(local_to_global(x, y, loc)));
                prop_assert!(map.get_explored_count() >= last);
                last = map.get_explored_count();
            }
            prop_assert_eq!(last, seen.len());
        }
    }
}
