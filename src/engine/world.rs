use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::config::*;
use super::player::PlayerId;

/// What a tile is underneath its cover.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileKind {
    Empty,
    /// Adjacent-mine count, always 1..=8.
    Numbered(u8),
    Mine,
    FlagToken,
    /// Blast residue left by an explosion on non-origin cells.
    Explosion,
}

impl TileKind {
    /// Wire name for viewport payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            TileKind::Empty => "empty",
            TileKind::Numbered(_) => "numbered",
            TileKind::Mine => "mine",
            TileKind::FlagToken => "flag_token",
            TileKind::Explosion => "explosion",
        }
    }
}

/// A single cell of the grid. Flagged iff `flagged_by` is set, so a tile can
/// never carry a flag without an owner.
#[derive(Clone, Copy, Debug)]
pub struct Tile {
    pub kind: TileKind,
    pub revealed: bool,
    pub exploded: bool,
    pub flagged_by: Option<PlayerId>,
}

impl Default for Tile {
    fn default() -> Self {
        Tile {
            kind: TileKind::Empty,
            revealed: false,
            exploded: false,
            flagged_by: None,
        }
    }
}

impl Tile {
    pub fn is_flagged(&self) -> bool {
        self.flagged_by.is_some()
    }

    /// Covered means the underlying kind has not been revealed.
    pub fn is_covered(&self) -> bool {
        !self.revealed
    }

    /// Walkable: a revealed non-mine tile, or any flagged tile.
    pub fn is_walkable(&self) -> bool {
        (self.revealed && self.kind != TileKind::Mine) || self.is_flagged()
    }
}

/// Parameters for world generation.
pub struct WorldParams {
    pub size: usize,
    pub mine_density: f64,
    pub flag_token_density: f64,
    pub spawn_point_count: usize,
    pub spawn_margin: usize,
    pub seed: u64,
}

impl Default for WorldParams {
    fn default() -> Self {
        WorldParams {
            size: WORLD_SIZE,
            mine_density: MINE_DENSITY,
            flag_token_density: FLAG_TOKEN_DENSITY,
            spawn_point_count: SPAWN_POINT_COUNT,
            spawn_margin: SPAWN_MARGIN,
            seed: 0,
        }
    }
}

/// The game world: a square tile grid with reserved spawn points and the
/// mine accounting used for end-of-game detection.
pub struct World {
    pub size: usize,
    tiles: Vec<Tile>,
    spawn_points: Vec<(usize, usize)>,
    spawn_clearance: HashSet<(usize, usize)>,
    pub total_mines: usize,
    pub flagged_mines: usize,
}

impl World {
    /// Create an empty world: every tile covered, no mines, no spawns.
    pub fn new(size: usize) -> Self {
        World {
            size,
            tiles: vec![Tile::default(); size * size],
            spawn_points: Vec::new(),
            spawn_clearance: HashSet::new(),
            total_mines: 0,
            flagged_mines: 0,
        }
    }

    /// Generate a full world. Deterministic for a given seed.
    ///
    /// Order matters: spawn points first (revealed empty), then mines, then
    /// flag tokens (both rejection-sampled away from spawns), then neighbor
    /// numbers for everything left untouched.
    pub fn generate(params: &WorldParams) -> Self {
        let size = params.size;
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut world = World::new(size);

        // Spawn points on a ceil(sqrt(n)) grid, cell-centered inside the margin.
        let side = (params.spawn_point_count as f64).sqrt().ceil().max(1.0) as usize;
        let margin = params.spawn_margin.min(size.saturating_sub(1) / 2);
        let span = size - 2 * margin;
        let spacing = (span / side).max(1);
        for i in 0..params.spawn_point_count {
            let col = i % side;
            let row = i / side;
            let x = (margin + col * spacing + spacing / 2).clamp(margin, size - margin - 1);
            let y = (margin + row * spacing + spacing / 2).clamp(margin, size - margin - 1);
            world.add_spawn_point(x, y);
        }

        // Mines: uniform rejection sampling outside spawn clearance.
        let mine_target = ((size * size) as f64 * params.mine_density).floor() as usize;
        while world.total_mines < mine_target {
            let x = rng.gen_range(0..size);
            let y = rng.gen_range(0..size);
            if world.spawn_clearance.contains(&(x, y)) {
                continue;
            }
            if world.tiles[world.index(x, y)].kind == TileKind::Mine {
                continue;
            }
            world.place_mine(x, y);
        }

        // Flag tokens: same sampling, additionally rejecting mines.
        let token_target = ((size * size) as f64 * params.flag_token_density).floor() as usize;
        let mut tokens = 0usize;
        while tokens < token_target {
            let x = rng.gen_range(0..size);
            let y = rng.gen_range(0..size);
            if world.spawn_clearance.contains(&(x, y)) {
                continue;
            }
            let idx = world.index(x, y);
            if world.tiles[idx].kind != TileKind::Empty {
                continue;
            }
            world.tiles[idx].kind = TileKind::FlagToken;
            tokens += 1;
        }

        // Neighbor numbers for every untouched cell. Flag tokens are not
        // mine-equivalents and out-of-bounds neighbors count as non-mine.
        for y in 0..size {
            for x in 0..size {
                let idx = world.index(x, y);
                if world.tiles[idx].kind != TileKind::Empty || world.tiles[idx].revealed {
                    continue;
                }
                let n = world.adjacent_mines(x, y);
                if n >= 1 {
                    world.tiles[idx].kind = TileKind::Numbered(n);
                }
            }
        }

        world
    }

    #[inline]
    fn index(&self, x: usize, y: usize) -> usize {
        y * self.size + x
    }

    /// Returns true if (x, y) is within the grid.
    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.size && (y as usize) < self.size
    }

    pub fn tile(&self, x: usize, y: usize) -> Option<&Tile> {
        if x < self.size && y < self.size {
            Some(&self.tiles[self.index(x, y)])
        } else {
            None
        }
    }

    pub fn tile_mut(&mut self, x: usize, y: usize) -> Option<&mut Tile> {
        if x < self.size && y < self.size {
            let idx = self.index(x, y);
            Some(&mut self.tiles[idx])
        } else {
            None
        }
    }

    /// Walkability check with out-of-bounds treated as not walkable.
    pub fn is_walkable(&self, x: usize, y: usize) -> bool {
        self.tile(x, y).map(|t| t.is_walkable()).unwrap_or(false)
    }

    /// Count mines in the 8-neighborhood of (x, y).
    pub fn adjacent_mines(&self, x: usize, y: usize) -> u8 {
        let mut count = 0u8;
        for dy in -1i32..=1 {
            for dx in -1i32..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let nx = x as i32 + dx;
                let ny = y as i32 + dy;
                if !self.in_bounds(nx, ny) {
                    continue;
                }
                if self.tiles[self.index(nx as usize, ny as usize)].kind == TileKind::Mine {
                    count += 1;
                }
            }
        }
        count
    }

    /// Register a spawn point: a revealed empty tile whose Manhattan
    /// neighborhood is reserved against mines and tokens.
    pub fn add_spawn_point(&mut self, x: usize, y: usize) {
        if x >= self.size || y >= self.size {
            return;
        }
        let idx = self.index(x, y);
        self.tiles[idx].kind = TileKind::Empty;
        self.tiles[idx].revealed = true;
        self.spawn_points.push((x, y));
        for dy in -SPAWN_CLEARANCE..=SPAWN_CLEARANCE {
            for dx in -SPAWN_CLEARANCE..=SPAWN_CLEARANCE {
                if dx.abs() + dy.abs() > SPAWN_CLEARANCE {
                    continue;
                }
                let nx = x as i32 + dx;
                let ny = y as i32 + dy;
                if self.in_bounds(nx, ny) {
                    self.spawn_clearance.insert((nx as usize, ny as usize));
                }
            }
        }
    }

    /// Place a mine on a covered tile. Used by generation and tests.
    pub fn place_mine(&mut self, x: usize, y: usize) -> bool {
        match self.tile_mut(x, y) {
            Some(t) if !t.revealed && t.kind != TileKind::Mine => {
                t.kind = TileKind::Mine;
                self.total_mines += 1;
                true
            }
            _ => false,
        }
    }

    /// Place a flag token on a covered empty tile. Used by generation and tests.
    pub fn place_flag_token(&mut self, x: usize, y: usize) -> bool {
        match self.tile_mut(x, y) {
            Some(t) if !t.revealed && t.kind == TileKind::Empty => {
                t.kind = TileKind::FlagToken;
                true
            }
            _ => false,
        }
    }

    pub fn spawn_points(&self) -> &[(usize, usize)] {
        &self.spawn_points
    }

    pub fn is_spawn_point(&self, x: usize, y: usize) -> bool {
        self.spawn_points.contains(&(x, y))
    }

    /// Tiles reserved around spawn points (spawns included).
    pub fn in_spawn_clearance(&self, x: usize, y: usize) -> bool {
        self.spawn_clearance.contains(&(x, y))
    }

    /// Pick a random spawn point.
    pub fn random_spawn_point<R: Rng>(&self, rng: &mut R) -> Option<(usize, usize)> {
        if self.spawn_points.is_empty() {
            return None;
        }
        let idx = rng.gen_range(0..self.spawn_points.len());
        Some(self.spawn_points[idx])
    }

    /// Mines not yet neutralized by a flag.
    pub fn mines_remaining(&self) -> usize {
        self.total_mines.saturating_sub(self.flagged_mines)
    }

    /// Completion percentage exposed to clients instead of the raw count.
    pub fn progress_percent(&self) -> u32 {
        if self.total_mines == 0 {
            return 100;
        }
        (self.flagged_mines * 100 / self.total_mines) as u32
    }
}
