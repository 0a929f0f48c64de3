// World dimensions and generation densities
pub const WORLD_SIZE: usize = 1000;
pub const MINE_DENSITY: f64 = 0.075;
pub const FLAG_TOKEN_DENSITY: f64 = 0.02;

// Spawn layout
pub const SPAWN_POINT_COUNT: usize = 10;
pub const SPAWN_MARGIN: usize = 50;
// Manhattan distance around a spawn point kept free of mines and tokens
pub const SPAWN_CLEARANCE: i32 = 2;

// Explosions
pub const EXPLOSION_RADIUS: i32 = 3;
pub const CHAIN_DELAY_MS: u64 = 100;
// UI hint attached to player-death broadcasts
pub const DEATH_NOTICE_DELAY_MS: u64 = 1500;

// Scoring and inventory
pub const STARTING_FLAGS: u32 = 3;
pub const FLAG_TOKEN_GRANT: u32 = 2;
pub const SCORE_REVEAL: u32 = 1;
pub const SCORE_TOKEN: u32 = 1;
pub const SCORE_MINE_FLAGGED: u32 = 3;

// Players
pub const MAX_USERNAME_LEN: usize = 12;
pub const DEFAULT_HUE: u16 = 200;

// Viewports (half-extents in tiles)
pub const VIEWPORT_MAX_EXTENT: usize = 100;
pub const VIEWPORT_DEFAULT_EXTENT: usize = 20;

// Session lifetimes
pub const SESSION_ABSOLUTE_SECS: i64 = 24 * 3600;
pub const SESSION_IDLE_SECS: u64 = 30;
pub const SESSION_SWEEP_SECS: u64 = 10;

// Security bookkeeping
pub const REPLAY_WINDOW_MS: u64 = 100;
pub const DUPLICATE_WINDOW_MS: u64 = 1000;
pub const SECURITY_RETENTION_SECS: u64 = 300;
pub const SECURITY_GC_SECS: u64 = 60;
pub const SEQUENCE_BURST_LIMIT: usize = 10;
pub const SEQUENCE_LOOKBACK_SECS: u64 = 5;
pub const SEQUENCE_ALTERNATION_LIMIT: usize = 6;
pub const REVIEW_STRIKE_LIMIT: u32 = 3;
