// Structured logging field definitions
// This module centralizes all field names used in tracing logs

#![allow(dead_code)]

// Connection & network fields
pub const ADDR: &str = "addr";
pub const PORT: &str = "port";

// User / session fields
pub const USERNAME: &str = "username";
pub const SESSION_ID: &str = "session_id";

// Matchmaking fields
pub const QUEUE: &str = "queue";
pub const ROOM_CODE: &str = "room_code";
pub const GAME_MODE: &str = "game_mode";
pub const PLAYER_COUNT: &str = "player_count";

// Game session fields
pub const SEAT: &str = "seat";
pub const TICK: &str = "tick";
pub const MAP_ID: &str = "map_id";

// Operation / outcome fields
pub const OPERATION: &str = "operation";
pub const STATUS: &str = "status";
pub const ERROR: &str = "error";
pub const REASON: &str = "reason";

// Rating fields
pub const SCORE_DELTA: &str = "score_delta";
pub const WINNER_SEAT: &str = "winner_seat";

// Performance fields
pub const ELAPSED_MS: &str = "elapsed_ms";
pub const QUEUE_SIZE: &str = "queue_size";

// Server fields
pub const SERVER_VERSION: &str = "server_version";
pub const CONFIG_SOURCE: &str = "config_source";
