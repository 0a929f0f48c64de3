use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::*;
use super::player::{PlayerId, PlayerRegistry};
use super::world::{TileKind, World};

/// The four client actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Move,
    Flip,
    Flag,
    Unflag,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Move => "move",
            ActionKind::Flip => "flip",
            ActionKind::Flag => "flag",
            ActionKind::Unflag => "unflag",
        }
    }
}

/// Rule-level rejections. Expected during normal play; never logged above
/// debug level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleError {
    PlayerUnknown,
    PlayerDead,
    OutOfBounds,
    NotWalkable,
    AlreadyRevealed,
    AlreadyFlagged,
    NoFlags,
    UnflagNotAllowed,
    /// A covered tile carried an impossible kind. The world is left as-is.
    InvalidTileState,
}

impl RuleError {
    pub fn reason(&self) -> &'static str {
        match self {
            RuleError::PlayerUnknown => "unknown player",
            RuleError::PlayerDead => "player is dead",
            RuleError::OutOfBounds => "target out of bounds",
            RuleError::NotWalkable => "target not walkable",
            RuleError::AlreadyRevealed => "tile already revealed",
            RuleError::AlreadyFlagged => "tile already flagged",
            RuleError::NoFlags => "no flags in inventory",
            RuleError::UnflagNotAllowed => "flags cannot be removed",
            RuleError::InvalidTileState => "invalid tile state",
        }
    }
}

pub struct MoveOutcome {
    pub from: (usize, usize),
    pub to: (usize, usize),
}

pub enum FlipOutcome {
    /// An empty or numbered tile was revealed. Only the clicked tile; there
    /// is no classic zero-cascade flood in this game.
    Revealed { number: Option<u8> },
    TokenCollected { flags_granted: u32 },
    Exploded(ExplosionOutcome),
}

pub struct FlagOutcome {
    pub mine_flagged: bool,
    /// True exactly once, on the flag that neutralized the last mine.
    pub game_ended: bool,
}

/// Result of detonating one origin. Chained mines have been queued for the
/// next wave but not yet detonated.
pub struct ExplosionOutcome {
    pub origin: (usize, usize),
    pub affected: Vec<(usize, usize)>,
    pub killed: Vec<PlayerId>,
    pub chained: Vec<(usize, usize)>,
}

struct PendingDetonation {
    x: usize,
    y: usize,
    due: Instant,
}

/// Snapshot of global game facts for welcome payloads. The raw remaining
/// mine count stays server-side; clients only see a percentage.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInfo {
    pub start_time: i64,
    pub ended: bool,
    pub mines_remaining: u32,
}

/// The authoritative game state: world grid, player registry, mine
/// accounting, and the chained-detonation work list. Mutated only through
/// the action pipeline under the server's writer lock.
pub struct GameState {
    pub world: World,
    pub players: PlayerRegistry,
    pub started_at: DateTime<Utc>,
    pub ended: bool,
    pending: Vec<PendingDetonation>,
    scheduled: HashSet<(usize, usize)>,
}

impl GameState {
    pub fn new(world: World) -> Self {
        GameState {
            world,
            players: PlayerRegistry::new(),
            started_at: Utc::now(),
            ended: false,
            pending: Vec::new(),
            scheduled: HashSet::new(),
        }
    }

    pub fn game_info(&self) -> GameInfo {
        GameInfo {
            start_time: self.started_at.timestamp_millis(),
            ended: self.ended,
            mines_remaining: self.world.progress_percent(),
        }
    }

    /// Move one tile. Geometry (cardinal step, adjacency) is checked by the
    /// pipeline; walkability is re-verified here, at commit time.
    pub fn handle_move(&mut self, player_id: PlayerId, x: usize, y: usize) -> Result<MoveOutcome, RuleError> {
        let player = self.players.get(player_id).ok_or(RuleError::PlayerUnknown)?;
        let from = (player.x, player.y);
        if !self.world.in_bounds(x as i32, y as i32) {
            return Err(RuleError::OutOfBounds);
        }
        if !self.world.is_walkable(x, y) {
            return Err(RuleError::NotWalkable);
        }
        self.players.set_position(player_id, x, y);
        Ok(MoveOutcome { from, to: (x, y) })
    }

    /// Reveal a covered tile.
    pub fn handle_flip(&mut self, player_id: PlayerId, x: usize, y: usize, now: Instant) -> Result<FlipOutcome, RuleError> {
        if !self.players.contains(player_id) {
            return Err(RuleError::PlayerUnknown);
        }
        let tile = *self.world.tile(x, y).ok_or(RuleError::OutOfBounds)?;
        if tile.revealed {
            return Err(RuleError::AlreadyRevealed);
        }
        if tile.is_flagged() {
            return Err(RuleError::AlreadyFlagged);
        }

        match tile.kind {
            TileKind::Mine => {
                let outcome = self.explode_at(x, y, now);
                Ok(FlipOutcome::Exploded(outcome))
            }
            TileKind::FlagToken => {
                let number = self.world.adjacent_mines(x, y);
                let t = self.world.tile_mut(x, y).ok_or(RuleError::OutOfBounds)?;
                t.revealed = true;
                t.kind = if number >= 1 {
                    TileKind::Numbered(number)
                } else {
                    TileKind::Empty
                };
                self.players.add_flags(player_id, FLAG_TOKEN_GRANT);
                self.players.add_score(player_id, SCORE_TOKEN);
                Ok(FlipOutcome::TokenCollected {
                    flags_granted: FLAG_TOKEN_GRANT,
                })
            }
            TileKind::Empty | TileKind::Numbered(_) => {
                let t = self.world.tile_mut(x, y).ok_or(RuleError::OutOfBounds)?;
                t.revealed = true;
                let number = match t.kind {
                    TileKind::Numbered(n) => Some(n),
                    _ => None,
                };
                self.players.add_score(player_id, SCORE_REVEAL);
                Ok(FlipOutcome::Revealed { number })
            }
            // Blast residue only ever exists on revealed tiles.
            TileKind::Explosion => Err(RuleError::InvalidTileState),
        }
    }

    /// Plant a flag. Flags are permanent and neutralize mines underneath.
    pub fn handle_flag(&mut self, player_id: PlayerId, x: usize, y: usize) -> Result<FlagOutcome, RuleError> {
        if !self.players.contains(player_id) {
            return Err(RuleError::PlayerUnknown);
        }
        let tile = *self.world.tile(x, y).ok_or(RuleError::OutOfBounds)?;
        if tile.revealed {
            return Err(RuleError::AlreadyRevealed);
        }
        if tile.is_flagged() {
            return Err(RuleError::AlreadyFlagged);
        }
        if !self.players.take_flag(player_id) {
            return Err(RuleError::NoFlags);
        }

        let mine_flagged = tile.kind == TileKind::Mine;
        if let Some(t) = self.world.tile_mut(x, y) {
            t.flagged_by = Some(player_id);
        }
        let mut game_ended = false;
        if mine_flagged {
            self.players.add_score(player_id, SCORE_MINE_FLAGGED);
            self.world.flagged_mines += 1;
            if self.world.mines_remaining() == 0 && !self.ended {
                self.ended = true;
                game_ended = true;
            }
        }
        Ok(FlagOutcome {
            mine_flagged,
            game_ended,
        })
    }

    /// Removing a placed flag is refused by the authoritative rules.
    pub fn handle_unflag(&mut self, _player_id: PlayerId, _x: usize, _y: usize) -> Result<(), RuleError> {
        Err(RuleError::UnflagNotAllowed)
    }

    /// Detonate the mine at (x, y).
    ///
    /// Every cell with dx^2 + dy^2 <= R^2 is revealed and marked exploded;
    /// non-origin cells become blast residue. Flagged tiles are neutralized
    /// ground: the blast neither reveals them nor detonates mines under
    /// them. Unflagged mines in the radius are revealed immediately and
    /// queued to detonate one chain delay later. Alive players within
    /// Euclidean distance R of the origin die.
    pub fn explode_at(&mut self, x: usize, y: usize, now: Instant) -> ExplosionOutcome {
        let r = EXPLOSION_RADIUS;
        let mut affected = Vec::new();
        let mut chained = Vec::new();

        self.scheduled.remove(&(x, y));

        for dy in -r..=r {
            for dx in -r..=r {
                if dx * dx + dy * dy > r * r {
                    continue;
                }
                let nx = x as i32 + dx;
                let ny = y as i32 + dy;
                if !self.world.in_bounds(nx, ny) {
                    continue;
                }
                let (nx, ny) = (nx as usize, ny as usize);
                let is_origin = nx == x && ny == y;
                let Some(tile) = self.world.tile_mut(nx, ny) else {
                    continue;
                };
                if tile.is_flagged() || tile.exploded {
                    continue;
                }
                if is_origin {
                    tile.revealed = true;
                    tile.exploded = true;
                    affected.push((nx, ny));
                } else if tile.kind == TileKind::Mine {
                    tile.revealed = true;
                    affected.push((nx, ny));
                    if self.scheduled.insert((nx, ny)) {
                        self.pending.push(PendingDetonation {
                            x: nx,
                            y: ny,
                            due: now + Duration::from_millis(CHAIN_DELAY_MS),
                        });
                        chained.push((nx, ny));
                    }
                } else {
                    tile.revealed = true;
                    tile.exploded = true;
                    tile.kind = TileKind::Explosion;
                    affected.push((nx, ny));
                }
            }
        }

        let killed: Vec<PlayerId> = self
            .players
            .iter()
            .filter(|p| {
                let dx = p.x as i64 - x as i64;
                let dy = p.y as i64 - y as i64;
                p.alive && dx * dx + dy * dy <= (r as i64) * (r as i64)
            })
            .map(|p| p.id)
            .collect();
        for &id in &killed {
            self.players.kill(id);
        }

        ExplosionOutcome {
            origin: (x, y),
            affected,
            killed,
            chained,
        }
    }

    /// Detonate every queued mine whose delay has elapsed. New chains land
    /// back in the queue with a fresh delay, so one call never recurses.
    pub fn detonate_due(&mut self, now: Instant) -> Vec<ExplosionOutcome> {
        let mut due = Vec::new();
        self.pending.retain(|p| {
            if p.due <= now {
                due.push((p.x, p.y));
                false
            } else {
                true
            }
        });

        let mut outcomes = Vec::new();
        for (x, y) in due {
            let still_live = self
                .world
                .tile(x, y)
                .map(|t| t.kind == TileKind::Mine && !t.exploded && !t.is_flagged())
                .unwrap_or(false);
            if still_live {
                outcomes.push(self.explode_at(x, y, now));
            } else {
                self.scheduled.remove(&(x, y));
            }
        }
        outcomes
    }

    pub fn has_pending_detonations(&self) -> bool {
        !self.pending.is_empty()
    }
}
