// Centralized process-wide state (§5 "Global mutable state"): every
// long-lived registry the server needs, each guarded by its own lock so
// unrelated operations never contend with each other.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::config::Config;
use crate::email::EmailSender;
use crate::player::Player;
use crate::protocol::Mode;
use crate::store::SqliteUserStore;

/// A 4-char one-time verification code mailed for `register1`/`login1`,
/// expiring 30 minutes after it was issued (§3, §4.4).
#[derive(Debug, Clone)]
pub struct PendingCode {
    pub code: String,
    pub issued_at: std::time::Instant,
}

impl PendingCode {
    pub fn is_expired(&self) -> bool {
        self.issued_at.elapsed() >= std::time::Duration::from_secs(30 * 60)
    }
}

/// A private room keyed by a client-chosen code (§3, §4.6). Index 0 of
/// `players` is always the host.
pub struct GameRoom {
    pub code: String,
    pub mode: Mode,
    pub target_player_count: usize,
    pub players: Vec<Player>,
    pub custom_map: Option<Value>,
}

impl GameRoom {
    pub fn is_ready(&self) -> bool {
        self.players.len() >= self.target_player_count
    }
}

/// What a player entering the mixed queue is willing to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePreference {
    Only(Mode),
    Either,
}

pub struct AppState {
    /// Every username currently queued, seated in a room, or playing.
    /// Invariant: a username appears here iff it is in exactly one of
    /// those three places (§3 invariant 2).
    pub online_users: RwLock<HashSet<String>>,
    pub rooms: RwLock<HashMap<String, GameRoom>>,
    pub pending_codes: RwLock<HashMap<String, PendingCode>>,

    /// Score-sorted 1v1 queue (§4.6), drained by the 1v1 matcher.
    pub queue_1v1: Mutex<Vec<Player>>,
    /// Mixed v3/v4/v34 queue (§4.7), drained by the mixed matcher.
    pub queue_mixed: Mutex<Vec<(Player, QueuePreference)>>,

    pub store: SqliteUserStore,
    pub email: Arc<dyn EmailSender>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: SqliteUserStore, email: Arc<dyn EmailSender>, config: Arc<Config>) -> Arc<Self> {
        Arc::new(AppState {
            online_users: RwLock::new(HashSet::new()),
            rooms: RwLock::new(HashMap::new()),
            pending_codes: RwLock::new(HashMap::new()),
            queue_1v1: Mutex::new(Vec::new()),
            queue_mixed: Mutex::new(Vec::new()),
            store,
            email,
            config,
        })
    }

    pub async fn mark_online(&self, username: &str) -> bool {
        self.online_users.write().await.insert(username.to_owned())
    }

    pub async fn mark_offline(&self, username: &str) {
        self.online_users.write().await.remove(username);
    }

    pub async fn is_online(&self, username: &str) -> bool {
        self.online_users.read().await.contains(username)
    }

    pub async fn put_pending_code(&self, username: &str, code: String) {
        self.pending_codes.write().await.insert(
            username.to_owned(),
            PendingCode {
                code,
                issued_at: std::time::Instant::now(),
            },
        );
    }

    pub async fn take_pending_code(&self, username: &str) -> Option<PendingCode> {
        self.pending_codes.read().await.get(username).cloned()
    }

    pub async fn clear_pending_code(&self, username: &str) {
        self.pending_codes.write().await.remove(username);
    }
}
