use std::collections::HashMap;

use super::config::*;

pub type PlayerId = u32;
pub type ConnectionId = u64;

/// A registered player. Created at first welcome, removed only by idle
/// eviction; `connected` toggles independently of `alive`.
#[derive(Clone, Debug)]
pub struct Player {
    pub id: PlayerId,
    pub username: String,
    /// Display color as an HSL hue, 0..360.
    pub color: u16,
    pub x: usize,
    pub y: usize,
    pub score: u32,
    pub flags: u32,
    pub alive: bool,
    pub connected: bool,
    pub session_id: String,
}

/// Single owner of all player records, reachable through four indices:
/// player-id, session-id, connection-id, and position. Mutations go through
/// the registry so the indices can never go stale.
#[derive(Default)]
pub struct PlayerRegistry {
    players: HashMap<PlayerId, Player>,
    by_session: HashMap<String, PlayerId>,
    by_connection: HashMap<ConnectionId, PlayerId>,
    by_position: HashMap<(usize, usize), Vec<PlayerId>>,
    next_player_id: PlayerId,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        PlayerRegistry {
            next_player_id: 1,
            ..Default::default()
        }
    }

    /// Create a player at the given spawn position. Username is truncated to
    /// the limit and stripped of control characters.
    pub fn create(&mut self, username: &str, color: u16, x: usize, y: usize) -> PlayerId {
        let id = self.next_player_id;
        self.next_player_id += 1;

        let username: String = username
            .chars()
            .filter(|c| !c.is_control())
            .take(MAX_USERNAME_LEN)
            .collect();
        let username = if username.is_empty() {
            format!("player{id}")
        } else {
            username
        };

        let player = Player {
            id,
            username,
            color: color % 360,
            x,
            y,
            score: 0,
            flags: STARTING_FLAGS,
            alive: true,
            connected: true,
            session_id: String::new(),
        };
        self.by_position.entry((x, y)).or_default().push(id);
        self.players.insert(id, player);
        id
    }

    pub fn get(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn by_session(&self, session_id: &str) -> Option<&Player> {
        self.by_session
            .get(session_id)
            .and_then(|id| self.players.get(id))
    }

    pub fn by_connection(&self, conn: ConnectionId) -> Option<&Player> {
        self.by_connection
            .get(&conn)
            .and_then(|id| self.players.get(id))
    }

    /// Player ids standing on (x, y).
    pub fn at(&self, x: usize, y: usize) -> &[PlayerId] {
        self.by_position
            .get(&(x, y))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn bind_session(&mut self, id: PlayerId, session_id: &str) {
        if let Some(p) = self.players.get_mut(&id) {
            if !p.session_id.is_empty() {
                self.by_session.remove(&p.session_id);
            }
            p.session_id = session_id.to_string();
            self.by_session.insert(session_id.to_string(), id);
        }
    }

    pub fn bind_connection(&mut self, id: PlayerId, conn: ConnectionId) {
        if let Some(p) = self.players.get_mut(&id) {
            p.connected = true;
            self.by_connection.retain(|_, pid| *pid != id);
            self.by_connection.insert(conn, id);
        }
    }

    /// Mark a connection gone. The player record stays; the idle sweeper
    /// handles eventual removal.
    pub fn drop_connection(&mut self, conn: ConnectionId) -> Option<PlayerId> {
        let id = self.by_connection.remove(&conn)?;
        if let Some(p) = self.players.get_mut(&id) {
            p.connected = false;
        }
        Some(id)
    }

    pub fn set_position(&mut self, id: PlayerId, x: usize, y: usize) {
        if let Some(p) = self.players.get_mut(&id) {
            if let Some(v) = self.by_position.get_mut(&(p.x, p.y)) {
                v.retain(|pid| *pid != id);
                if v.is_empty() {
                    self.by_position.remove(&(p.x, p.y));
                }
            }
            p.x = x;
            p.y = y;
            self.by_position.entry((x, y)).or_default().push(id);
        }
    }

    pub fn add_score(&mut self, id: PlayerId, points: u32) {
        if let Some(p) = self.players.get_mut(&id) {
            p.score += points;
        }
    }

    pub fn add_flags(&mut self, id: PlayerId, flags: u32) {
        if let Some(p) = self.players.get_mut(&id) {
            p.flags += flags;
        }
    }

    /// Consume one flag. Returns false if the inventory is empty.
    pub fn take_flag(&mut self, id: PlayerId) -> bool {
        match self.players.get_mut(&id) {
            Some(p) if p.flags > 0 => {
                p.flags -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn kill(&mut self, id: PlayerId) {
        if let Some(p) = self.players.get_mut(&id) {
            p.alive = false;
        }
    }

    /// Remove a player entirely (idle eviction or ban).
    pub fn remove(&mut self, id: PlayerId) -> Option<Player> {
        let player = self.players.remove(&id)?;
        self.by_session.remove(&player.session_id);
        self.by_connection.retain(|_, pid| *pid != id);
        if let Some(v) = self.by_position.get_mut(&(player.x, player.y)) {
            v.retain(|pid| *pid != id);
            if v.is_empty() {
                self.by_position.remove(&(player.x, player.y));
            }
        }
        Some(player)
    }
}
