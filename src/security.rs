// Replay, duplicate, and sequence detection in front of the game rules.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::engine::config::*;
use crate::engine::game::ActionKind;
use crate::engine::player::PlayerId;

/// Why the guard refused an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecurityViolation {
    /// Identical content hash seen within the replay window.
    Replay,
    /// Identical (kind, payload) from the same player within the duplicate
    /// window.
    Duplicate,
    /// Action burst or flag/unflag thrashing.
    BadSequence,
}

impl SecurityViolation {
    pub fn reason(&self) -> &'static str {
        match self {
            SecurityViolation::Replay => "replayed action",
            SecurityViolation::Duplicate => "duplicate action",
            SecurityViolation::BadSequence => "suspicious action sequence",
        }
    }
}

struct ActionStamp {
    at: Instant,
    kind: ActionKind,
}

#[derive(Default)]
struct PlayerRecord {
    /// Accepted-action history, newest last. Pruned past the retention
    /// horizon.
    stamps: VecDeque<ActionStamp>,
    replay_strikes: u32,
    risk_score: u32,
}

/// One row of the operator dashboard.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityReport {
    pub player_id: PlayerId,
    pub replay_strikes: u32,
    pub risk_score: u32,
    pub flagged_for_review: bool,
}

/// Content-hash replay guard plus per-player sequence bookkeeping and the
/// ban set. Sharded away from the world lock.
#[derive(Clone)]
pub struct SecurityGuard {
    inner: Arc<Mutex<GuardState>>,
}

#[derive(Default)]
struct GuardState {
    /// Content hash -> last time it was admitted.
    recent_hashes: HashMap<String, Instant>,
    /// (player, kind, x, y) -> last time it was admitted.
    recent_payloads: HashMap<(PlayerId, ActionKind, i32, i32), Instant>,
    players: HashMap<PlayerId, PlayerRecord>,
    banned: HashSet<PlayerId>,
}

/// SHA-256 over player-id, kind, payload, and a second-granularity
/// timestamp.
pub fn action_hash(player_id: PlayerId, kind: ActionKind, x: i32, y: i32, epoch_secs: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(player_id.to_be_bytes());
    hasher.update(kind.as_str().as_bytes());
    hasher.update(x.to_be_bytes());
    hasher.update(y.to_be_bytes());
    hasher.update(epoch_secs.to_be_bytes());
    hex::encode(hasher.finalize())
}

impl SecurityGuard {
    pub fn new() -> Self {
        SecurityGuard {
            inner: Arc::new(Mutex::new(GuardState::default())),
        }
    }

    pub fn ban(&self, player_id: PlayerId) {
        self.inner.lock().unwrap().banned.insert(player_id);
    }

    pub fn is_banned(&self, player_id: PlayerId) -> bool {
        self.inner.lock().unwrap().banned.contains(&player_id)
    }

    /// Check one action against the replay, duplicate, and sequence rules.
    /// Admitted actions are recorded; refused ones are not.
    pub fn check(
        &self,
        player_id: PlayerId,
        kind: ActionKind,
        x: i32,
        y: i32,
    ) -> Result<(), SecurityViolation> {
        let now = Instant::now();
        let epoch_secs = chrono::Utc::now().timestamp();
        let hash = action_hash(player_id, kind, x, y, epoch_secs);

        let mut state = self.inner.lock().unwrap();
        let state = &mut *state;

        if let Some(&seen) = state.recent_hashes.get(&hash) {
            if now.duration_since(seen) <= Duration::from_millis(REPLAY_WINDOW_MS) {
                let record = state.players.entry(player_id).or_default();
                record.replay_strikes += 1;
                record.risk_score += 2;
                return Err(SecurityViolation::Replay);
            }
        }

        if let Some(&seen) = state.recent_payloads.get(&(player_id, kind, x, y)) {
            if now.duration_since(seen) <= Duration::from_millis(DUPLICATE_WINDOW_MS) {
                state.players.entry(player_id).or_default().risk_score += 1;
                return Err(SecurityViolation::Duplicate);
            }
        }

        let record = state.players.entry(player_id).or_default();
        record
            .stamps
            .retain(|s| now.duration_since(s.at) < Duration::from_secs(SECURITY_RETENTION_SECS));

        if Self::burst_detected(&record.stamps, now) || Self::thrash_detected(&record.stamps, kind) {
            record.risk_score += 2;
            return Err(SecurityViolation::BadSequence);
        }

        record.stamps.push_back(ActionStamp { at: now, kind });
        state.recent_hashes.insert(hash, now);
        state.recent_payloads.insert((player_id, kind, x, y), now);
        Ok(())
    }

    /// True when admitting one more action would put >= SEQUENCE_BURST_LIMIT
    /// actions inside some 1 s span of the lookback window.
    fn burst_detected(stamps: &VecDeque<ActionStamp>, now: Instant) -> bool {
        let lookback = Duration::from_secs(SEQUENCE_LOOKBACK_SECS);
        let mut recent: Vec<Instant> = stamps
            .iter()
            .filter(|s| now.duration_since(s.at) < lookback)
            .map(|s| s.at)
            .collect();
        recent.push(now);
        if recent.len() < SEQUENCE_BURST_LIMIT {
            return false;
        }
        // Timestamps are in insertion order, which is chronological. Any
        // LIMIT consecutive ones squeezed into one second trip the rule.
        recent
            .windows(SEQUENCE_BURST_LIMIT)
            .any(|w| w[SEQUENCE_BURST_LIMIT - 1].duration_since(w[0]) < Duration::from_secs(1))
    }

    /// True when the candidate extends a strictly alternating flag/unflag
    /// tail to the alternation limit.
    fn thrash_detected(stamps: &VecDeque<ActionStamp>, kind: ActionKind) -> bool {
        if kind != ActionKind::Flag && kind != ActionKind::Unflag {
            return false;
        }
        let mut run = 1usize;
        let mut expected = match kind {
            ActionKind::Flag => ActionKind::Unflag,
            _ => ActionKind::Flag,
        };
        for stamp in stamps.iter().rev() {
            if stamp.kind != expected {
                break;
            }
            run += 1;
            expected = match expected {
                ActionKind::Flag => ActionKind::Unflag,
                _ => ActionKind::Flag,
            };
        }
        run >= SEQUENCE_ALTERNATION_LIMIT
    }

    /// Raise a player's risk score (repeated high-severity rejections).
    pub fn raise_risk(&self, player_id: PlayerId, by: u32) {
        self.inner
            .lock()
            .unwrap()
            .players
            .entry(player_id)
            .or_default()
            .risk_score += by;
    }

    /// Dashboard rows for every player with any recorded state, plus the
    /// ban list.
    pub fn dashboard(&self) -> (Vec<SecurityReport>, Vec<PlayerId>) {
        let state = self.inner.lock().unwrap();
        let mut reports: Vec<SecurityReport> = state
            .players
            .iter()
            .map(|(&player_id, record)| SecurityReport {
                player_id,
                replay_strikes: record.replay_strikes,
                risk_score: record.risk_score,
                flagged_for_review: record.replay_strikes >= REVIEW_STRIKE_LIMIT,
            })
            .collect();
        reports.sort_by(|a, b| b.risk_score.cmp(&a.risk_score));
        let mut banned: Vec<PlayerId> = state.banned.iter().copied().collect();
        banned.sort_unstable();
        (reports, banned)
    }

    /// Purge entries past the retention horizon.
    pub fn gc(&self) {
        let retention = Duration::from_secs(SECURITY_RETENTION_SECS);
        let now = Instant::now();
        let mut state = self.inner.lock().unwrap();
        state
            .recent_hashes
            .retain(|_, &mut seen| now.duration_since(seen) < retention);
        state
            .recent_payloads
            .retain(|_, &mut seen| now.duration_since(seen) < retention);
        for record in state.players.values_mut() {
            record
                .stamps
                .retain(|s| now.duration_since(s.at) < retention);
        }
    }

    /// Forget a player's history (eviction). The ban set is not touched.
    pub fn forget(&self, player_id: PlayerId) {
        let mut state = self.inner.lock().unwrap();
        state.players.remove(&player_id);
        state
            .recent_payloads
            .retain(|&(pid, _, _, _), _| pid != player_id);
    }
}

impl Default for SecurityGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_detected_for_identical_action() {
        let guard = SecurityGuard::new();
        assert!(guard.check(1, ActionKind::Flip, 5, 5).is_ok());
        assert_eq!(
            guard.check(1, ActionKind::Flip, 5, 5),
            Err(SecurityViolation::Replay)
        );
    }

    #[test]
    fn test_different_payloads_are_not_replays() {
        let guard = SecurityGuard::new();
        assert!(guard.check(1, ActionKind::Flip, 5, 5).is_ok());
        // Different coordinates change the hash; guard falls through to the
        // duplicate rule, which also sees a different payload.
        assert!(guard.check(1, ActionKind::Flip, 6, 5).is_ok());
        // Same payload from another player is fine too
        assert!(guard.check(2, ActionKind::Flip, 5, 5).is_ok());
    }

    #[test]
    fn test_duplicate_window_outlives_replay_window() {
        let guard = SecurityGuard::new();
        assert!(guard.check(1, ActionKind::Move, 5, 5).is_ok());
        std::thread::sleep(Duration::from_millis(REPLAY_WINDOW_MS + 30));
        // Past the replay window but inside the duplicate window
        assert_eq!(
            guard.check(1, ActionKind::Move, 5, 5),
            Err(SecurityViolation::Duplicate)
        );
    }

    #[test]
    fn test_burst_sequence_detected() {
        let guard = SecurityGuard::new();
        for i in 0..SEQUENCE_BURST_LIMIT as i32 - 1 {
            assert!(guard.check(1, ActionKind::Move, i, 0).is_ok(), "action {i}");
        }
        assert_eq!(
            guard.check(1, ActionKind::Move, 100, 0),
            Err(SecurityViolation::BadSequence)
        );
    }

    #[test]
    fn test_flag_unflag_thrash_detected() {
        let guard = SecurityGuard::new();
        let kinds = [ActionKind::Flag, ActionKind::Unflag];
        for i in 0..SEQUENCE_ALTERNATION_LIMIT - 1 {
            assert!(guard.check(1, kinds[i % 2], i as i32, i as i32 + 50).is_ok());
        }
        let next = kinds[(SEQUENCE_ALTERNATION_LIMIT - 1) % 2];
        assert_eq!(
            guard.check(1, next, 90, 90),
            Err(SecurityViolation::BadSequence)
        );
    }

    #[test]
    fn test_replay_strikes_flag_for_review() {
        let guard = SecurityGuard::new();
        guard.check(1, ActionKind::Flip, 5, 5).unwrap();
        for _ in 0..REVIEW_STRIKE_LIMIT {
            let _ = guard.check(1, ActionKind::Flip, 5, 5);
        }
        let (reports, banned) = guard.dashboard();
        let report = reports.iter().find(|r| r.player_id == 1).unwrap();
        assert!(report.replay_strikes >= REVIEW_STRIKE_LIMIT);
        assert!(report.flagged_for_review);
        // Review flag is not a ban
        assert!(banned.is_empty());
        assert!(!guard.is_banned(1));
    }

    #[test]
    fn test_ban_set() {
        let guard = SecurityGuard::new();
        assert!(!guard.is_banned(3));
        guard.ban(3);
        assert!(guard.is_banned(3));
        let (_, banned) = guard.dashboard();
        assert_eq!(banned, vec![3]);
    }

    #[test]
    fn test_forget_keeps_ban() {
        let guard = SecurityGuard::new();
        guard.ban(1);
        guard.check(1, ActionKind::Flip, 5, 5).unwrap();
        guard.forget(1);
        assert!(guard.is_banned(1));
        let (reports, _) = guard.dashboard();
        assert!(reports.iter().all(|r| r.player_id != 1));
    }
}
