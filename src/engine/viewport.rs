// Per-player viewport materialization with hidden-information sanitization.

use serde::Serialize;

use super::config::*;
use super::game::GameState;
use super::player::{Player, PlayerId};
use super::world::Tile;

/// A sanitized tile as it leaves the server. Hidden fields are omitted, not
/// nulled, so covered tiles leak nothing about what is underneath.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TileView {
    pub x: usize,
    pub y: usize,
    pub revealed: bool,
    pub flagged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flagged_by: Option<PlayerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exploded: Option<bool>,
}

impl TileView {
    /// Project a tile to its public form. Kind, number, and blast state are
    /// only present once the tile is revealed.
    pub fn sanitized(x: usize, y: usize, tile: &Tile) -> Self {
        if tile.revealed {
            TileView {
                x,
                y,
                revealed: true,
                flagged: false,
                flagged_by: None,
                kind: Some(tile.kind.as_str()),
                number: match tile.kind {
                    super::world::TileKind::Numbered(n) => Some(n),
                    _ => None,
                },
                exploded: Some(tile.exploded),
            }
        } else {
            TileView {
                x,
                y,
                revealed: false,
                flagged: tile.is_flagged(),
                flagged_by: tile.flagged_by,
                kind: None,
                number: None,
                exploded: None,
            }
        }
    }
}

/// Public projection of a player for viewport and broadcast payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub id: PlayerId,
    pub username: String,
    pub x: usize,
    pub y: usize,
    pub score: u32,
    pub flags: u32,
    pub alive: bool,
    pub connected: bool,
    pub color: u16,
}

impl PlayerView {
    pub fn from_player(p: &Player) -> Self {
        PlayerView {
            id: p.id,
            username: p.username.clone(),
            x: p.x,
            y: p.y,
            score: p.score,
            flags: p.flags,
            alive: p.alive,
            connected: p.connected,
            color: p.color,
        }
    }
}

/// The rectangular world slice sent to one client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportFrame {
    pub tiles: Vec<TileView>,
    pub players: Vec<PlayerView>,
}

/// Materialize the viewport around a player.
///
/// Row-major iteration keeps repeated materializations byte-identical when
/// nothing changed. Revealed and flagged tiles are emitted in full
/// (sanitized); covered tiles adjacent to the viewer become stubs; all other
/// covered tiles are omitted. Spawn points are not part of the payload.
pub fn materialize(state: &GameState, viewer_id: PlayerId, tiles_x: usize, tiles_y: usize) -> Option<ViewportFrame> {
    let viewer = state.players.get(viewer_id)?;
    let tiles_x = tiles_x.min(VIEWPORT_MAX_EXTENT);
    let tiles_y = tiles_y.min(VIEWPORT_MAX_EXTENT);

    let x0 = viewer.x.saturating_sub(tiles_x);
    let y0 = viewer.y.saturating_sub(tiles_y);
    let x1 = (viewer.x + tiles_x).min(state.world.size - 1);
    let y1 = (viewer.y + tiles_y).min(state.world.size - 1);

    let mut tiles = Vec::new();
    for y in y0..=y1 {
        for x in x0..=x1 {
            let Some(tile) = state.world.tile(x, y) else {
                continue;
            };
            let near_viewer = x.abs_diff(viewer.x) <= 1 && y.abs_diff(viewer.y) <= 1;
            if tile.revealed || tile.is_flagged() || near_viewer {
                tiles.push(TileView::sanitized(x, y, tile));
            }
        }
    }

    let mut players: Vec<PlayerView> = state
        .players
        .iter()
        .filter(|p| {
            p.connected
                && p.x.abs_diff(viewer.x) <= tiles_x
                && p.y.abs_diff(viewer.y) <= tiles_y
        })
        .map(PlayerView::from_player)
        .collect();
    players.sort_by_key(|p| p.id);

    Some(ViewportFrame { tiles, players })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::world::{TileKind, World};

    fn state_with_player() -> (GameState, PlayerId) {
        let mut world = World::new(32);
        world.tile_mut(10, 10).unwrap().revealed = true;
        let mut state = GameState::new(world);
        let id = state.players.create("alice", 0, 10, 10);
        (state, id)
    }

    #[test]
    fn test_covered_tiles_leak_nothing() {
        let (mut state, id) = state_with_player();
        state.world.place_mine(11, 10);
        let frame = materialize(&state, id, 5, 5).unwrap();
        let mine_tile = frame
            .tiles
            .iter()
            .find(|t| t.x == 11 && t.y == 10)
            .expect("adjacent covered tile should be stubbed");
        assert!(!mine_tile.revealed);
        assert_eq!(mine_tile.kind, None);
        assert_eq!(mine_tile.number, None);
        assert_eq!(mine_tile.exploded, None);
    }

    #[test]
    fn test_distant_covered_tiles_omitted() {
        let (state, id) = state_with_player();
        let frame = materialize(&state, id, 5, 5).unwrap();
        // Only the revealed viewer tile and the 8 adjacent stubs appear
        assert_eq!(frame.tiles.len(), 9);
        assert!(frame.tiles.iter().all(|t| {
            t.x.abs_diff(10) <= 1 && t.y.abs_diff(10) <= 1
        }));
    }

    #[test]
    fn test_revealed_and_flagged_tiles_emitted() {
        let (mut state, id) = state_with_player();
        state.world.tile_mut(14, 10).unwrap().revealed = true;
        state.world.tile_mut(14, 10).unwrap().kind = TileKind::Numbered(3);
        state.world.tile_mut(10, 14).unwrap().flagged_by = Some(id);
        let frame = materialize(&state, id, 5, 5).unwrap();

        let revealed = frame.tiles.iter().find(|t| t.x == 14 && t.y == 10).unwrap();
        assert_eq!(revealed.kind, Some("numbered"));
        assert_eq!(revealed.number, Some(3));

        let flagged = frame.tiles.iter().find(|t| t.x == 10 && t.y == 14).unwrap();
        assert!(flagged.flagged);
        assert_eq!(flagged.flagged_by, Some(id));
        assert_eq!(flagged.kind, None, "flag must not reveal what is underneath");
    }

    #[test]
    fn test_players_filtered_by_extent_and_connection() {
        let (mut state, id) = state_with_player();
        let near = state.players.create("near", 0, 12, 12);
        let far = state.players.create("far", 0, 30, 30);
        let gone = state.players.create("gone", 0, 11, 10);
        state.players.bind_connection(gone, 9);
        state.players.drop_connection(9);

        let frame = materialize(&state, id, 5, 5).unwrap();
        let ids: Vec<PlayerId> = frame.players.iter().map(|p| p.id).collect();
        assert!(ids.contains(&id));
        assert!(ids.contains(&near));
        assert!(!ids.contains(&far));
        assert!(!ids.contains(&gone));
    }

    #[test]
    fn test_materialize_is_idempotent() {
        let (mut state, id) = state_with_player();
        state.world.place_mine(12, 12);
        state.world.tile_mut(13, 10).unwrap().revealed = true;
        state.players.create("bob", 40, 12, 10);
        let a = materialize(&state, id, 8, 8).unwrap();
        let b = materialize(&state, id, 8, 8).unwrap();
        assert_eq!(a, b);
        let ja = serde_json::to_string(&a).unwrap();
        let jb = serde_json::to_string(&b).unwrap();
        assert_eq!(ja, jb);
    }

    #[test]
    fn test_extent_capped() {
        let (state, id) = state_with_player();
        let capped = materialize(&state, id, 5000, 5000).unwrap();
        let max = materialize(&state, id, VIEWPORT_MAX_EXTENT, VIEWPORT_MAX_EXTENT).unwrap();
        assert_eq!(capped, max);
    }

    #[test]
    fn test_viewport_clipped_at_world_edge() {
        let mut world = World::new(16);
        world.tile_mut(0, 0).unwrap().revealed = true;
        let mut state = GameState::new(world);
        let id = state.players.create("edge", 0, 0, 0);
        let frame = materialize(&state, id, 5, 5).unwrap();
        assert!(frame.tiles.iter().all(|t| t.x < 16 && t.y < 16));
    }

    #[test]
    fn test_unknown_viewer() {
        let (state, _) = state_with_player();
        assert!(materialize(&state, 999, 5, 5).is_none());
    }
}
