// In-memory sliding-window rate limiter for player actions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::engine::game::ActionKind;
use crate::engine::player::PlayerId;

/// Window shared by every per-kind and global cap.
const WINDOW: Duration = Duration::from_secs(1);
/// Total actions per window per player, regardless of kind.
const GLOBAL_MAX: usize = 20;
/// Records older than this are garbage-collected.
const RETENTION: Duration = Duration::from_secs(300);

/// Maximum number of actions of one kind per window.
fn kind_max(kind: ActionKind) -> usize {
    match kind {
        ActionKind::Move => 10,
        ActionKind::Flip => 5,
        ActionKind::Flag => 5,
        ActionKind::Unflag => 5,
    }
}

/// Error returned when a rate limit is exceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitError {
    pub kind: ActionKind,
    pub max: usize,
    pub global: bool,
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.global {
            write!(f, "Rate limit exceeded: max {} actions per second", self.max)
        } else {
            write!(
                f,
                "Rate limit exceeded: max {} {} actions per second",
                self.max,
                self.kind.as_str()
            )
        }
    }
}

#[derive(Default)]
struct PlayerWindows {
    per_kind: HashMap<ActionKind, Vec<Instant>>,
    all: Vec<Instant>,
}

/// Thread-safe per-player rate limiter. Locked independently of the world
/// lock; never taken during grid mutation.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<HashMap<PlayerId, PlayerWindows>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Admit iff both the per-kind and the global window have room. On
    /// admission the action is recorded in both windows.
    pub fn check_limit(&self, player_id: PlayerId, kind: ActionKind) -> Result<(), RateLimitError> {
        let mut map = self.inner.lock().unwrap();
        let windows = map.entry(player_id).or_default();
        let now = Instant::now();

        let entries = windows.per_kind.entry(kind).or_default();
        entries.retain(|t| now.duration_since(*t) < WINDOW);
        windows.all.retain(|t| now.duration_since(*t) < WINDOW);

        let max = kind_max(kind);
        if entries.len() >= max {
            return Err(RateLimitError {
                kind,
                max,
                global: false,
            });
        }
        if windows.all.len() >= GLOBAL_MAX {
            return Err(RateLimitError {
                kind,
                max: GLOBAL_MAX,
                global: true,
            });
        }

        entries.push(now);
        windows.all.push(now);
        Ok(())
    }

    /// Current per-kind count for diagnostics and the security dashboard.
    pub fn current_count(&self, player_id: PlayerId, kind: ActionKind) -> usize {
        let mut map = self.inner.lock().unwrap();
        let now = Instant::now();
        match map.get_mut(&player_id) {
            Some(windows) => match windows.per_kind.get_mut(&kind) {
                Some(entries) => {
                    entries.retain(|t| now.duration_since(*t) < WINDOW);
                    entries.len()
                }
                None => 0,
            },
            None => 0,
        }
    }

    /// Drop records beyond the retention horizon and empty player shards.
    pub fn gc(&self) {
        let mut map = self.inner.lock().unwrap();
        let now = Instant::now();
        map.retain(|_, windows| {
            windows
                .per_kind
                .retain(|_, entries| {
                    entries.retain(|t| now.duration_since(*t) < RETENTION);
                    !entries.is_empty()
                });
            windows.all.retain(|t| now.duration_since(*t) < RETENTION);
            !windows.all.is_empty() || !windows.per_kind.is_empty()
        });
    }

    /// Forget a player entirely (eviction or ban).
    pub fn forget(&self, player_id: PlayerId) {
        self.inner.lock().unwrap().remove(&player_id);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
