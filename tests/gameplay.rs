// End-to-end gameplay scenarios driven through the action pipeline, without
// any network in the way.

use std::time::{Duration, Instant};

use minefield_backend::engine::config::*;
use minefield_backend::engine::game::{ActionKind, GameState};
use minefield_backend::engine::pipeline::{self, ActionPlan, ActionRequest, Rejection, Severity};
use minefield_backend::engine::player::PlayerId;
use minefield_backend::engine::server::{GameServer, ServerMessage};
use minefield_backend::engine::world::{TileKind, World};
use minefield_backend::rate_limit::RateLimiter;
use minefield_backend::security::SecurityGuard;
use minefield_backend::session::SessionManager;

struct Harness {
    state: GameState,
    sessions: SessionManager,
    limiter: RateLimiter,
    guard: SecurityGuard,
}

impl Harness {
    fn new(world: World) -> Self {
        Harness {
            state: GameState::new(world),
            sessions: SessionManager::new(b"integration-test-secret-material".to_vec()),
            limiter: RateLimiter::new(),
            guard: SecurityGuard::new(),
        }
    }

    fn join(&mut self, name: &str, x: usize, y: usize) -> (PlayerId, String, String) {
        let id = self.state.players.create(name, 0, x, y);
        let handle = self.sessions.create(id, name);
        self.state.players.bind_session(id, &handle.session_id);
        (id, handle.session_id, handle.token)
    }

    fn act(
        &mut self,
        player: &(PlayerId, String, String),
        kind: ActionKind,
        x: i32,
        y: i32,
    ) -> Result<ActionPlan, Rejection> {
        let req = ActionRequest {
            player_id: player.0,
            session_id: Some(player.1.clone()),
            session_token: Some(player.2.clone()),
            kind,
            x,
            y,
            tiles_x: 10,
            tiles_y: 10,
        };
        pipeline::handle(
            &mut self.state,
            &self.sessions,
            &self.limiter,
            &self.guard,
            &req,
            Instant::now(),
        )
    }
}

fn open_world(size: usize) -> World {
    World::new(size)
}

// ── Scenario 1: adjacency and walkability ────────────────────────────

#[test]
fn test_adjacency_and_walkability() {
    let mut world = open_world(64);
    world.add_spawn_point(50, 50);
    let mut h = Harness::new(world);
    let alice = h.join("alice", 50, 50);

    // Two tiles away: rejected as non-adjacent
    let err = h.act(&alice, ActionKind::Move, 52, 50).unwrap_err();
    assert_eq!(err.severity, Severity::Low);
    assert!(!err.disconnect);

    // Adjacent but covered: rejected as non-walkable
    let err = h.act(&alice, ActionKind::Move, 51, 50).unwrap_err();
    assert_eq!(err.severity, Severity::Low);

    // Reveal the tile with an adjacent flip, then walk onto it
    h.act(&alice, ActionKind::Flip, 51, 50).unwrap();
    h.act(&alice, ActionKind::Move, 51, 50).unwrap();
    let p = h.state.players.get(alice.0).unwrap();
    assert_eq!((p.x, p.y), (51, 50));
}

// ── Scenario 2: flag accounting ──────────────────────────────────────

#[test]
fn test_flag_accounting_and_unflag_refusal() {
    let mut world = open_world(64);
    world.add_spawn_point(50, 50);
    world.place_mine(51, 50);
    let mut h = Harness::new(world);
    let alice = h.join("alice", 50, 50);
    assert_eq!(h.state.players.get(alice.0).unwrap().flags, STARTING_FLAGS);

    h.act(&alice, ActionKind::Flag, 51, 50).unwrap();
    let p = h.state.players.get(alice.0).unwrap();
    assert_eq!(p.flags, STARTING_FLAGS - 1);
    assert_eq!(p.score, SCORE_MINE_FLAGGED);
    assert_eq!(h.state.world.flagged_mines, 1);

    let err = h.act(&alice, ActionKind::Unflag, 51, 50).unwrap_err();
    assert_eq!(err.severity, Severity::Low);
    assert!(h.state.world.tile(51, 50).unwrap().is_flagged());
}

// ── Scenario 3: explosion chain ──────────────────────────────────────

#[test]
fn test_explosion_chain_kills_and_cascades() {
    let mut world = open_world(64);
    world.add_spawn_point(9, 10);
    world.place_mine(10, 10);
    world.place_mine(12, 10);
    let mut h = Harness::new(world);
    let alice = h.join("alice", 9, 10);
    // Bob stands outside the first blast but inside the second
    let bob = h.join("bob", 14, 10);

    let t0 = Instant::now();
    let plan = h.act(&alice, ActionKind::Flip, 10, 10).unwrap();

    let explosion = plan
        .broadcast
        .iter()
        .find_map(|m| match m {
            ServerMessage::Explosion {
                x,
                y,
                affected_tiles,
                killed_players,
            } => Some((*x, *y, affected_tiles.clone(), killed_players.clone())),
            _ => None,
        })
        .expect("flip of a mine must broadcast an explosion");
    assert_eq!((explosion.0, explosion.1), (10, 10));
    assert!(explosion.3.contains(&alice.0));
    assert!(!explosion.3.contains(&bob.0));

    // The second mine is revealed immediately and queued, not yet detonated
    let t = h.state.world.tile(12, 10).unwrap();
    assert!(t.revealed && !t.exploded);
    assert_eq!(t.kind, TileKind::Mine);
    assert!(h.state.has_pending_detonations());

    // One chain delay later the second mine goes off and catches Bob
    let waves = h.state.detonate_due(t0 + Duration::from_millis(CHAIN_DELAY_MS + 50));
    assert_eq!(waves.len(), 1);
    assert_eq!(waves[0].origin, (12, 10));
    assert!(waves[0].killed.contains(&bob.0));
    assert!(h.state.world.tile(12, 10).unwrap().exploded);
    assert!(!h.state.players.get(bob.0).unwrap().alive);
}

// ── Scenario 4: game end ─────────────────────────────────────────────

#[test]
fn test_game_end_emitted_exactly_once() {
    let mut world = open_world(64);
    world.add_spawn_point(50, 50);
    world.place_mine(51, 50);
    world.place_mine(51, 51);
    world.place_mine(50, 51);
    let mut h = Harness::new(world);
    let alice = h.join("alice", 50, 50);

    let mut game_end_broadcasts = 0;
    for (x, y) in [(51, 50), (51, 51), (50, 51)] {
        let plan = h.act(&alice, ActionKind::Flag, x, y).unwrap();
        game_end_broadcasts += plan
            .broadcast
            .iter()
            .filter(|m| matches!(m, ServerMessage::GameEnd { .. }))
            .count();
    }
    assert_eq!(game_end_broadcasts, 1);
    assert!(h.state.ended);
    assert_eq!(h.state.world.mines_remaining(), 0);
    assert_eq!(h.state.world.progress_percent(), 100);
}

// ── Scenario 5: reconnect ────────────────────────────────────────────

#[test]
fn test_reconnect_restores_player() {
    let mut world = open_world(64);
    world.add_spawn_point(20, 20);
    let server = GameServer::new(
        GameState::new(world),
        b"integration-test-secret-material".to_vec(),
        None,
    );

    let conn = server.register_connection();
    let out = server.handle_welcome(conn, "alice", 90, None, None);
    let (mut player_id, mut sid, mut token) = (0, String::new(), String::new());
    for msg in out.unicast {
        match msg {
            ServerMessage::SessionAssigned {
                session_id,
                session_token,
                ..
            } => {
                sid = session_id;
                token = session_token;
            }
            ServerMessage::Welcome { player_id: id, .. } => player_id = id,
            _ => {}
        }
    }

    // Flip a tile so the reconnected player has state worth keeping
    let out = server.handle_action(
        conn,
        ActionKind::Flip,
        21,
        20,
        Some(sid.clone()),
        Some(token.clone()),
        10,
        10,
    );
    assert!(!out.unicast.is_empty());
    server.handle_disconnect(conn);

    let conn2 = server.register_connection();
    let out = server.handle_welcome(conn2, "alice", 90, Some(&sid), Some(&token));
    let mut saw_reconnection = false;
    for msg in out.unicast {
        match msg {
            ServerMessage::SessionAssigned {
                session_id,
                is_reconnection,
                ..
            } => {
                assert!(is_reconnection);
                assert_eq!(session_id, sid);
                saw_reconnection = true;
            }
            ServerMessage::Welcome {
                player_id: id,
                player,
                ..
            } => {
                assert_eq!(id, player_id);
                assert_eq!((player.x, player.y), (20, 20));
                assert_eq!(player.score, SCORE_REVEAL);
            }
            _ => {}
        }
    }
    assert!(saw_reconnection);
    server.with_state(|s| assert_eq!(s.players.len(), 1));
}

// ── Scenario 6: rate limiting ────────────────────────────────────────

#[test]
fn test_sixth_flip_in_a_second_is_rejected() {
    let mut world = open_world(64);
    world.add_spawn_point(50, 50);
    let mut h = Harness::new(world);
    let alice = h.join("alice", 50, 50);

    let targets = [(49, 49), (50, 49), (51, 49), (49, 50), (49, 51)];
    for (x, y) in targets {
        h.act(&alice, ActionKind::Flip, x, y).unwrap();
    }
    let err = h.act(&alice, ActionKind::Flip, 50, 51).unwrap_err();
    assert_eq!(err.severity, Severity::Medium);
    assert!(!err.disconnect);
    // The rejected flip is not observed in the world
    assert!(!h.state.world.tile(50, 51).unwrap().revealed);
}

// ── Security laws ────────────────────────────────────────────────────

#[test]
fn test_replayed_action_rejected() {
    let mut world = open_world(64);
    world.add_spawn_point(50, 50);
    let mut h = Harness::new(world);
    let alice = h.join("alice", 50, 50);

    // Replay hashes carry a second-granularity timestamp; keep both
    // submissions inside the same second.
    let sub = chrono::Utc::now().timestamp_subsec_millis() as u64;
    if sub > 800 {
        std::thread::sleep(Duration::from_millis(1050 - sub));
    }

    h.act(&alice, ActionKind::Flip, 51, 50).unwrap();
    let err = h.act(&alice, ActionKind::Flip, 51, 50).unwrap_err();
    assert_eq!(err.severity, Severity::High);
    assert_eq!(err.reason, "replayed action");
}

#[test]
fn test_session_player_mismatch_disconnects() {
    let mut world = open_world(64);
    world.add_spawn_point(50, 50);
    world.add_spawn_point(20, 20);
    let mut h = Harness::new(world);
    let alice = h.join("alice", 50, 50);
    let bob = h.join("bob", 20, 20);

    // Alice's id with Bob's credentials
    let forged = (alice.0, bob.1.clone(), bob.2.clone());
    let err = h.act(&forged, ActionKind::Flip, 51, 50).unwrap_err();
    assert_eq!(err.severity, Severity::High);
    assert!(err.disconnect);
}

#[test]
fn test_dead_player_can_move_but_not_act() {
    let mut world = open_world(64);
    world.add_spawn_point(9, 10);
    world.place_mine(10, 10);
    let mut h = Harness::new(world);
    let alice = h.join("alice", 9, 10);

    h.act(&alice, ActionKind::Flip, 10, 10).unwrap();
    assert!(!h.state.players.get(alice.0).unwrap().alive);

    // Tile actions are refused for the dead
    let err = h.act(&alice, ActionKind::Flag, 9, 11).unwrap_err();
    assert_eq!(err.severity, Severity::Low);

    // Spectator movement on blast-cleared ground still works
    let err_or_ok = h.act(&alice, ActionKind::Move, 9, 11);
    assert!(err_or_ok.is_ok(), "blast residue is revealed and walkable");
}

// ── Broadcast ordering ───────────────────────────────────────────────

#[test]
fn test_tile_update_precedes_leaderboard() {
    let mut world = open_world(64);
    world.add_spawn_point(50, 50);
    let mut h = Harness::new(world);
    let alice = h.join("alice", 50, 50);

    let plan = h.act(&alice, ActionKind::Flip, 51, 50).unwrap();
    let tile_idx = plan
        .broadcast
        .iter()
        .position(|m| matches!(m, ServerMessage::TileUpdate { .. }))
        .expect("flip broadcasts a tile update");
    let leaderboard_idx = plan
        .broadcast
        .iter()
        .position(|m| matches!(m, ServerMessage::LeaderboardUpdate { .. }))
        .expect("scoring flip broadcasts a leaderboard");
    assert!(tile_idx < leaderboard_idx);

    // The actor's viewport update rides in the unicast list, ahead of any
    // broadcast the connection task flushes afterwards.
    assert!(matches!(
        plan.unicast.as_slice(),
        [ServerMessage::ViewportUpdate { .. }]
    ));
}
