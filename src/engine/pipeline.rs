// The authoritative action pipeline: security gates, game rules, and
// broadcast planning behind a single entry point.

use std::time::Instant;

use crate::rate_limit::RateLimiter;
use crate::security::{SecurityGuard, SecurityViolation};
use crate::session::SessionManager;

use super::config::*;
use super::game::{ActionKind, FlipOutcome, GameState, RuleError};
use super::player::PlayerId;
use super::server::ServerMessage;
use super::viewport::{self, TileView};

/// One parsed client action, as claimed by the connection.
#[derive(Clone, Debug)]
pub struct ActionRequest {
    pub player_id: PlayerId,
    pub session_id: Option<String>,
    pub session_token: Option<String>,
    pub kind: ActionKind,
    pub x: i32,
    pub y: i32,
    /// Requested viewport half-extents in tiles.
    pub tiles_x: usize,
    pub tiles_y: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// A structured rejection. Nothing in the pipeline escapes as a fault;
/// every failure becomes one of these.
#[derive(Clone, Debug)]
pub struct Rejection {
    pub reason: String,
    pub severity: Severity,
    pub disconnect: bool,
}

impl Rejection {
    fn rule(reason: &str) -> Self {
        Rejection {
            reason: reason.to_string(),
            severity: Severity::Low,
            disconnect: false,
        }
    }

    fn security(reason: &str, severity: Severity) -> Self {
        Rejection {
            reason: reason.to_string(),
            severity,
            disconnect: false,
        }
    }

    fn auth(reason: &str) -> Self {
        Rejection {
            reason: reason.to_string(),
            severity: Severity::High,
            disconnect: false,
        }
    }

    /// Only a session bound to a different player marks the connection for
    /// disconnect; other authorization failures are plain rejections.
    fn mismatch(reason: &str) -> Self {
        Rejection {
            reason: reason.to_string(),
            severity: Severity::High,
            disconnect: true,
        }
    }
}

/// The messages an accepted action produces: unicasts for the actor first,
/// then the broadcast set in commit order.
#[derive(Debug)]
pub struct ActionPlan {
    pub unicast: Vec<ServerMessage>,
    pub broadcast: Vec<ServerMessage>,
}

/// Handle one action. Checks short-circuit in a fixed order: ban, aliveness,
/// session, rate limit, replay/sequence, geometry, rules. Must be called
/// under the world lock.
pub fn handle(
    state: &mut GameState,
    sessions: &SessionManager,
    limiter: &RateLimiter,
    guard: &SecurityGuard,
    req: &ActionRequest,
    now: Instant,
) -> Result<ActionPlan, Rejection> {
    // 1. Ban set
    if guard.is_banned(req.player_id) {
        return Err(Rejection::auth("player is banned"));
    }

    // 2. Aliveness (dead players may still move around and spectate)
    let player = state
        .players
        .get(req.player_id)
        .ok_or_else(|| Rejection::auth("unknown player"))?;
    if req.kind != ActionKind::Move && !player.alive {
        return Err(Rejection::rule(RuleError::PlayerDead.reason()));
    }
    let (px, py) = (player.x, player.y);

    // 3. Session must validate and bind the claimed player id
    let (session_id, token) = match (&req.session_id, &req.session_token) {
        (Some(s), Some(t)) => (s.as_str(), t.as_str()),
        _ => return Err(Rejection::auth("missing session")),
    };
    match sessions.validate(session_id, token) {
        Some(bound) if bound == req.player_id => {}
        Some(_) => return Err(Rejection::mismatch("session player mismatch")),
        None => return Err(Rejection::auth("invalid session")),
    }

    // 4. Rate limits
    if let Err(e) = limiter.check_limit(req.player_id, req.kind) {
        return Err(Rejection::security(&e.to_string(), Severity::Medium));
    }

    // 5. Replay, duplicate, and sequence rules
    if let Err(v) = guard.check(req.player_id, req.kind, req.x, req.y) {
        let severity = match v {
            SecurityViolation::Replay => Severity::High,
            SecurityViolation::Duplicate => Severity::Medium,
            SecurityViolation::BadSequence => Severity::High,
        };
        return Err(Rejection::security(v.reason(), severity));
    }

    // 6. Basic geometry
    if !state.world.in_bounds(req.x, req.y) {
        return Err(Rejection::rule(RuleError::OutOfBounds.reason()));
    }
    let dx = req.x - px as i32;
    let dy = req.y - py as i32;
    match req.kind {
        ActionKind::Move => {
            if dx.abs() + dy.abs() != 1 {
                return Err(Rejection::rule("move must be one cardinal step"));
            }
        }
        _ => {
            if dx.abs().max(dy.abs()) > 1 {
                return Err(Rejection::rule("target not adjacent"));
            }
            if dx == 0 && dy == 0 {
                return Err(Rejection::rule("cannot target own tile"));
            }
        }
    }

    // 7. Rules dispatch and broadcast planning
    let (x, y) = (req.x as usize, req.y as usize);
    let mut broadcast = Vec::new();
    let timestamp = chrono::Utc::now().timestamp_millis();

    match req.kind {
        ActionKind::Move => {
            state
                .handle_move(req.player_id, x, y)
                .map_err(rejection_for_rule)?;
            broadcast.push(player_update(state, req.player_id));
        }
        ActionKind::Flip => {
            let outcome = state
                .handle_flip(req.player_id, x, y, now)
                .map_err(rejection_for_rule)?;
            broadcast.push(ServerMessage::tile_update(x, y, "flip", req.player_id, timestamp));
            match outcome {
                FlipOutcome::Revealed { .. } | FlipOutcome::TokenCollected { .. } => {
                    broadcast.push(player_update(state, req.player_id));
                    broadcast.push(ServerMessage::leaderboard(state));
                }
                FlipOutcome::Exploded(explosion) => {
                    broadcast.extend(explosion_messages(state, &explosion));
                }
            }
        }
        ActionKind::Flag => {
            let outcome = state
                .handle_flag(req.player_id, x, y)
                .map_err(rejection_for_rule)?;
            broadcast.push(ServerMessage::tile_update(x, y, "flag", req.player_id, timestamp));
            broadcast.push(player_update(state, req.player_id));
            if outcome.mine_flagged {
                broadcast.push(ServerMessage::leaderboard(state));
            }
            if outcome.game_ended {
                broadcast.push(ServerMessage::game_end(state, "all mines flagged", timestamp));
            }
        }
        ActionKind::Unflag => {
            state
                .handle_unflag(req.player_id, x, y)
                .map_err(rejection_for_rule)?;
        }
    }

    // The actor's own viewport always reflects the committed state and is
    // sent before any broadcast derived from the action.
    let frame = viewport::materialize(state, req.player_id, req.tiles_x, req.tiles_y)
        .ok_or_else(|| Rejection::auth("unknown player"))?;
    let unicast = vec![ServerMessage::ViewportUpdate {
        target_player_id: req.player_id,
        tiles: frame.tiles,
        players: frame.players,
    }];

    Ok(ActionPlan { unicast, broadcast })
}

fn rejection_for_rule(err: RuleError) -> Rejection {
    if err == RuleError::InvalidTileState {
        // An impossible tile kind is an internal invariant failure, not
        // client misbehavior. The world was left unmodified.
        tracing::error!("invalid tile state encountered during action handling");
        return Rejection {
            reason: err.reason().to_string(),
            severity: Severity::High,
            disconnect: false,
        };
    }
    Rejection::rule(err.reason())
}

fn player_update(state: &GameState, player_id: PlayerId) -> ServerMessage {
    let player = state
        .players
        .get(player_id)
        .map(viewport::PlayerView::from_player)
        .expect("player checked at pipeline entry");
    ServerMessage::PlayerUpdate { player }
}

/// Explosion, killed-player updates, and death notices, in commit order.
pub fn explosion_messages(
    state: &GameState,
    explosion: &super::game::ExplosionOutcome,
) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    let affected_tiles: Vec<TileView> = explosion
        .affected
        .iter()
        .filter_map(|&(x, y)| state.world.tile(x, y).map(|t| TileView::sanitized(x, y, t)))
        .collect();
    messages.push(ServerMessage::Explosion {
        x: explosion.origin.0,
        y: explosion.origin.1,
        affected_tiles,
        killed_players: explosion.killed.clone(),
    });
    for &id in &explosion.killed {
        messages.push(player_update(state, id));
    }
    for &id in &explosion.killed {
        messages.push(ServerMessage::PlayerDeath {
            player_id: id,
            reason: "caught in an explosion".to_string(),
            delay: DEATH_NOTICE_DELAY_MS,
        });
    }
    messages
}
