// Game server: owns the world behind the writer lock and fans game frames
// out to WebSocket clients.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::metrics;
use crate::rate_limit::RateLimiter;
use crate::security::{SecurityGuard, SecurityReport};
use crate::session::SessionManager;

use super::config::*;
use super::game::{ActionKind, GameInfo, GameState};
use super::pipeline::{self, ActionRequest, Severity};
use super::player::{ConnectionId, PlayerId};
use super::viewport::{self, PlayerView, TileView};

/// A leaderboard row: public scoring fields only.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub id: PlayerId,
    pub username: String,
    pub score: u32,
    pub flags: u32,
    pub alive: bool,
    pub color: u16,
}

/// Messages sent to clients. Broadcast topics fan out to every connection;
/// the rest are unicast.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "session-assigned", rename_all = "camelCase")]
    SessionAssigned {
        session_id: String,
        session_token: String,
        is_reconnection: bool,
    },
    #[serde(rename = "welcome", rename_all = "camelCase")]
    Welcome {
        player_id: PlayerId,
        player: PlayerView,
        game_state: GameInfo,
        viewport: viewport::ViewportFrame,
    },
    #[serde(rename = "viewport-update", rename_all = "camelCase")]
    ViewportUpdate {
        target_player_id: PlayerId,
        tiles: Vec<TileView>,
        players: Vec<PlayerView>,
    },
    #[serde(rename = "player-update", rename_all = "camelCase")]
    PlayerUpdate { player: PlayerView },
    #[serde(rename = "tile-update", rename_all = "camelCase")]
    TileUpdate {
        x: usize,
        y: usize,
        action: String,
        player_id: PlayerId,
        timestamp: i64,
    },
    #[serde(rename = "leaderboard-update", rename_all = "camelCase")]
    LeaderboardUpdate { players: Vec<LeaderboardEntry> },
    #[serde(rename = "explosion", rename_all = "camelCase")]
    Explosion {
        x: usize,
        y: usize,
        affected_tiles: Vec<TileView>,
        killed_players: Vec<PlayerId>,
    },
    #[serde(rename = "player-death", rename_all = "camelCase")]
    PlayerDeath {
        player_id: PlayerId,
        reason: String,
        delay: u64,
    },
    #[serde(rename = "game-end", rename_all = "camelCase")]
    GameEnd {
        reason: String,
        timestamp: i64,
        leaderboard: Vec<LeaderboardEntry>,
    },
    #[serde(rename = "security-dashboard", rename_all = "camelCase")]
    SecurityDashboard {
        reports: Vec<SecurityReport>,
        banned: Vec<PlayerId>,
    },
}

impl ServerMessage {
    pub fn tile_update(x: usize, y: usize, action: &str, player_id: PlayerId, timestamp: i64) -> Self {
        ServerMessage::TileUpdate {
            x,
            y,
            action: action.to_string(),
            player_id,
            timestamp,
        }
    }

    /// Leaderboard broadcast: players with a positive score, best first.
    pub fn leaderboard(state: &GameState) -> Self {
        let mut players: Vec<LeaderboardEntry> = state
            .players
            .iter()
            .filter(|p| p.score > 0)
            .map(|p| LeaderboardEntry {
                id: p.id,
                username: p.username.clone(),
                score: p.score,
                flags: p.flags,
                alive: p.alive,
                color: p.color,
            })
            .collect();
        players.sort_by(|a, b| b.score.cmp(&a.score).then(a.id.cmp(&b.id)));
        ServerMessage::LeaderboardUpdate { players }
    }

    pub fn game_end(state: &GameState, reason: &str, timestamp: i64) -> Self {
        let leaderboard = match Self::leaderboard(state) {
            ServerMessage::LeaderboardUpdate { players } => players,
            _ => unreachable!(),
        };
        ServerMessage::GameEnd {
            reason: reason.to_string(),
            timestamp,
            leaderboard,
        }
    }
}

/// What the connection task should do with an inbound frame's results.
pub struct FrameOutput {
    pub unicast: Vec<ServerMessage>,
    pub disconnect: bool,
}

impl FrameOutput {
    fn send(unicast: Vec<ServerMessage>) -> Self {
        FrameOutput {
            unicast,
            disconnect: false,
        }
    }

    fn none() -> Self {
        FrameOutput {
            unicast: Vec::new(),
            disconnect: false,
        }
    }
}

/// The single writer over world and registry. Connection tasks call in;
/// broadcasts leave through the channel; sweepers and the detonation tick
/// run as background tasks owned by `main`.
pub struct GameServer {
    state: Mutex<GameState>,
    sessions: SessionManager,
    limiter: RateLimiter,
    guard: SecurityGuard,
    broadcast_tx: broadcast::Sender<String>,
    admin_key: Option<String>,
    next_connection_id: AtomicU64,
}

impl GameServer {
    pub fn new(state: GameState, session_secret: Vec<u8>, admin_key: Option<String>) -> Self {
        let (tx, _) = broadcast::channel(1024);
        GameServer {
            state: Mutex::new(state),
            sessions: SessionManager::new(session_secret),
            limiter: RateLimiter::new(),
            guard: SecurityGuard::new(),
            broadcast_tx: tx,
            admin_key,
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to broadcast frames. Returns a receiver of JSON strings.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.broadcast_tx.subscribe()
    }

    pub fn register_connection(&self) -> ConnectionId {
        metrics::CONNECTED_WEBSOCKETS.inc();
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    fn broadcast(&self, message: &ServerMessage) {
        if let Ok(json) = serde_json::to_string(message) {
            metrics::BROADCASTS_TOTAL.inc();
            let _ = self.broadcast_tx.send(json);
        }
    }

    fn broadcast_all(&self, messages: &[ServerMessage]) {
        for m in messages {
            self.broadcast(m);
        }
    }

    /// Welcome or reconnect a client. Returns the unicast frames for this
    /// connection; join broadcasts go out through the channel.
    pub fn handle_welcome(
        &self,
        conn: ConnectionId,
        name: &str,
        color: u16,
        session_id: Option<&str>,
        session_token: Option<&str>,
    ) -> FrameOutput {
        let mut state = self.state.lock().unwrap();

        // Reconnect path: a valid presented session re-binds the existing
        // player without touching position or inventory.
        if let (Some(sid), Some(token)) = (session_id, session_token) {
            if let Some(player_id) = self.sessions.validate(sid, token) {
                if state.players.contains(player_id) {
                    state.players.bind_connection(player_id, conn);
                    let player = state.players.get(player_id).expect("checked above");
                    let player_view = PlayerView::from_player(player);
                    tracing::info!(player_id, "Player reconnected");
                    metrics::SESSIONS_CREATED_TOTAL
                        .with_label_values(&["true"])
                        .inc();

                    let game_state = state.game_info();
                    let viewport = viewport::materialize(
                        &state,
                        player_id,
                        VIEWPORT_DEFAULT_EXTENT,
                        VIEWPORT_DEFAULT_EXTENT,
                    )
                    .expect("player exists");
                    self.broadcast(&ServerMessage::PlayerUpdate {
                        player: player_view.clone(),
                    });
                    return FrameOutput::send(vec![
                        ServerMessage::SessionAssigned {
                            session_id: sid.to_string(),
                            session_token: token.to_string(),
                            is_reconnection: true,
                        },
                        ServerMessage::Welcome {
                            player_id,
                            player: player_view,
                            game_state,
                            viewport,
                        },
                    ]);
                }
            }
            tracing::debug!("Presented session did not validate; creating a fresh player");
        }

        // Fresh join: new player at a random spawn point plus a new session.
        let Some((sx, sy)) = state.world.random_spawn_point(&mut rand::thread_rng()) else {
            tracing::error!("World has no spawn points; dropping welcome");
            return FrameOutput::none();
        };
        let player_id = state.players.create(name, color, sx, sy);
        // The token signs the canonical username, which may differ from the
        // presented name after sanitization.
        let username = state
            .players
            .get(player_id)
            .map(|p| p.username.clone())
            .expect("just created");
        let handle = self.sessions.create(player_id, &username);
        state.players.bind_session(player_id, &handle.session_id);
        state.players.bind_connection(player_id, conn);
        metrics::REGISTERED_PLAYERS.set(state.players.len() as i64);
        metrics::SESSIONS_CREATED_TOTAL
            .with_label_values(&["false"])
            .inc();
        tracing::info!(player_id, username = %username, "Player joined");

        let player_view = state
            .players
            .get(player_id)
            .map(PlayerView::from_player)
            .expect("just created");
        let game_state = state.game_info();
        let viewport = viewport::materialize(
            &state,
            player_id,
            VIEWPORT_DEFAULT_EXTENT,
            VIEWPORT_DEFAULT_EXTENT,
        )
        .expect("just created");

        self.broadcast(&ServerMessage::PlayerUpdate {
            player: player_view.clone(),
        });

        FrameOutput::send(vec![
            ServerMessage::SessionAssigned {
                session_id: handle.session_id,
                session_token: handle.token,
                is_reconnection: false,
            },
            ServerMessage::Welcome {
                player_id,
                player: player_view,
                game_state,
                viewport,
            },
        ])
    }

    /// Run one action through the pipeline. The world lock is held across
    /// validation, mutation, and broadcast planning, making the action
    /// atomic with respect to every other action.
    pub fn handle_action(
        &self,
        conn: ConnectionId,
        kind: ActionKind,
        x: i32,
        y: i32,
        session_id: Option<String>,
        session_token: Option<String>,
        tiles_x: usize,
        tiles_y: usize,
    ) -> FrameOutput {
        let timer = Instant::now();
        let mut state = self.state.lock().unwrap();

        let Some(player_id) = state.players.by_connection(conn).map(|p| p.id) else {
            tracing::warn!(conn, "Action from a connection with no player; ignoring");
            return FrameOutput::none();
        };

        let req = ActionRequest {
            player_id,
            session_id,
            session_token,
            kind,
            x,
            y,
            tiles_x: tiles_x.min(VIEWPORT_MAX_EXTENT),
            tiles_y: tiles_y.min(VIEWPORT_MAX_EXTENT),
        };

        let result = pipeline::handle(
            &mut state,
            &self.sessions,
            &self.limiter,
            &self.guard,
            &req,
            Instant::now(),
        );
        metrics::ACTION_DURATION_MS.observe(timer.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(plan) => {
                metrics::ACTIONS_TOTAL
                    .with_label_values(&[kind.as_str(), "accepted"])
                    .inc();
                metrics::FLAGGED_MINES.set(state.world.flagged_mines as i64);
                // Formulated under the lock, flushed to the channel in commit
                // order; per-client sends drain asynchronously.
                self.broadcast_all(&plan.broadcast);
                FrameOutput::send(plan.unicast)
            }
            Err(rejection) => {
                metrics::ACTIONS_TOTAL
                    .with_label_values(&[kind.as_str(), "rejected"])
                    .inc();
                metrics::REJECTIONS_TOTAL
                    .with_label_values(&[rejection.severity.as_str()])
                    .inc();
                match rejection.severity {
                    // Expected during normal play
                    Severity::Low => tracing::debug!(
                        player_id,
                        reason = %rejection.reason,
                        "Action rejected"
                    ),
                    Severity::Medium => tracing::info!(
                        player_id,
                        reason = %rejection.reason,
                        "Action rejected"
                    ),
                    Severity::High => {
                        self.guard.raise_risk(player_id, 1);
                        tracing::warn!(
                            player_id,
                            reason = %rejection.reason,
                            "High-severity action rejection"
                        );
                    }
                }
                FrameOutput {
                    unicast: Vec::new(),
                    disconnect: rejection.disconnect,
                }
            }
        }
    }

    /// Mark the connection's player disconnected. The record stays until the
    /// idle sweeper evicts it.
    pub fn handle_disconnect(&self, conn: ConnectionId) {
        metrics::CONNECTED_WEBSOCKETS.dec();
        let mut state = self.state.lock().unwrap();
        if let Some(player_id) = state.players.drop_connection(conn) {
            tracing::info!(player_id, "Player disconnected");
            if let Some(player) = state.players.get(player_id) {
                self.broadcast(&ServerMessage::PlayerUpdate {
                    player: PlayerView::from_player(player),
                });
            }
        }
    }

    /// Operator dashboard, gated by the admin key from the environment.
    pub fn handle_dashboard(&self, presented_key: &str) -> FrameOutput {
        match &self.admin_key {
            Some(key) if key == presented_key => {
                let (reports, banned) = self.guard.dashboard();
                FrameOutput::send(vec![ServerMessage::SecurityDashboard { reports, banned }])
            }
            _ => {
                tracing::warn!("Security dashboard request with a bad admin key");
                FrameOutput::none()
            }
        }
    }

    /// Ban a player: gate the pipeline and drop every session they hold.
    pub fn ban_player(&self, player_id: PlayerId) {
        self.guard.ban(player_id);
        self.sessions.invalidate_player(player_id);
        tracing::warn!(player_id, "Player banned");
    }

    /// Drain due chained detonations. Called by the tick task; each wave
    /// resolves inside one critical section and re-queues its own chains.
    pub fn tick(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.has_pending_detonations() {
            return;
        }
        let outcomes = state.detonate_due(Instant::now());
        for outcome in &outcomes {
            metrics::EXPLOSIONS_TOTAL.inc();
            metrics::CHAINED_DETONATIONS_TOTAL.inc_by(outcome.chained.len() as u64);
            metrics::PLAYERS_KILLED_TOTAL.inc_by(outcome.killed.len() as u64);
            self.broadcast_all(&pipeline::explosion_messages(&state, outcome));
        }
    }

    /// Evict players whose sessions idled out. Called every sweep interval.
    pub fn sweep_sessions(&self) {
        let evicted = self.sessions.sweep_expired();
        if evicted.is_empty() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        for player_id in evicted {
            if let Some(mut player) = state.players.remove(player_id) {
                tracing::info!(player_id, "Evicting idle player");
                metrics::SESSIONS_EVICTED_TOTAL.inc();
                self.limiter.forget(player_id);
                self.guard.forget(player_id);
                player.connected = false;
                self.broadcast(&ServerMessage::PlayerUpdate {
                    player: PlayerView::from_player(&player),
                });
            }
        }
        metrics::REGISTERED_PLAYERS.set(state.players.len() as i64);
        self.broadcast(&ServerMessage::leaderboard(&state));
    }

    /// Purge stale security and rate-limit records.
    pub fn security_gc(&self) {
        self.guard.gc();
        self.limiter.gc();
    }

    /// Read-only access for integration assertions and the HTTP layer.
    pub fn with_state<T>(&self, f: impl FnOnce(&GameState) -> T) -> T {
        let state = self.state.lock().unwrap();
        f(&state)
    }
}
