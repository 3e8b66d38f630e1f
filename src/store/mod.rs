// User-store adapter (§4.3): every operation the game exposes,
// dispatched to a worker thread so the event loop never blocks on it.
// Backed by SQLite (the original Python prototype's own choice — see
// `original_source/database_manager.py`), one connection behind a
// `std::sync::Mutex`, accessed only from inside `spawn_blocking`.
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::ServerError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatsBundle {
    pub units_destroyed: i64,
    pub shortest_game: i64,
    pub minimal_casualties: i64,
    pub dev_defeated: bool,
    pub campaign_completed: bool,
    pub campaign_progress: BTreeSet<i64>,
}

impl Default for StatsBundle {
    fn default() -> Self {
        StatsBundle {
            units_destroyed: 0,
            shortest_game: 3600,
            minimal_casualties: 100,
            dev_defeated: false,
            campaign_completed: false,
            campaign_progress: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
    pub steam_id: Option<String>,
    pub email: Option<String>,
    pub score: i64,
    pub number_of_wins: i64,
    pub number_of_games: i64,
    pub last_active: i64,
    pub title: Option<String>,
    pub money: i64,
    pub items: Vec<String>,
    pub stats: StatsBundle,
}

/// One participant's row in a finished match's rating/stats application
/// (§4.9). `score_delta` may be negative; all rows of a match are
/// applied in a single store transaction.
#[derive(Debug, Clone, Default)]
pub struct MatchResultRow {
    pub username: String,
    pub increment_games: bool,
    pub won: bool,
    pub score_delta: i64,
    pub money_delta: i64,
    pub units_destroyed_add: i64,
    /// Only set for the winner, and only under the no-cheating guard
    /// (any reported casualty count is positive).
    pub shortest_game_candidate: Option<i64>,
    pub minimal_casualties_candidate: Option<i64>,
    pub set_dev_defeated: bool,
}

#[derive(Clone)]
pub struct SqliteUserStore {
    conn: Arc<Mutex<Connection>>,
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<UserRecord> {
    let items_json: String = row.get("items")?;
    let stats_json: String = row.get("stats")?;
    Ok(UserRecord {
        username: row.get("username")?,
        password_hash: row.get("password_hash")?,
        steam_id: row.get("steam_id")?,
        email: row.get("email")?,
        score: row.get("score")?,
        number_of_wins: row.get("number_of_wins")?,
        number_of_games: row.get("number_of_games")?,
        last_active: row.get("last_active")?,
        title: row.get("title")?,
        money: row.get("money")?,
        items: serde_json::from_str(&items_json).unwrap_or_default(),
        stats: serde_json::from_str(&stats_json).unwrap_or_default(),
    })
}

fn get_user(conn: &Connection, username: &str) -> rusqlite::Result<Option<UserRecord>> {
    conn.query_row(
        "SELECT * FROM users WHERE username = ?1",
        params![username],
        row_to_record,
    )
    .optional()
}

macro_rules! blocking {
    ($conn:expr, $body:expr) => {{
        let conn = $conn;
        tokio::task::spawn_blocking(move || $body(conn))
            .await
            .expect("store worker panicked")
    }};
}

impl SqliteUserStore {
    pub fn open(path: &str) -> Result<Self, ServerError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL,
                steam_id TEXT UNIQUE,
                email TEXT,
                score INTEGER NOT NULL DEFAULT 1000,
                number_of_wins INTEGER NOT NULL DEFAULT 0,
                number_of_games INTEGER NOT NULL DEFAULT 0,
                last_active INTEGER NOT NULL DEFAULT 0,
                title TEXT,
                money INTEGER NOT NULL DEFAULT 0,
                items TEXT NOT NULL DEFAULT '[]',
                stats TEXT NOT NULL DEFAULT '{}'
            );",
        )?;
        Ok(SqliteUserStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn exists_by_username(&self, username: String) -> Result<bool, ServerError> {
        blocking!(self.conn.clone(), |conn: Arc<Mutex<Connection>>| -> Result<bool, ServerError> {
            let conn = conn.lock().unwrap();
            Ok(get_user(&conn, &username)?.is_some())
        })
    }

    pub async fn exists_by_email(&self, email: String) -> Result<bool, ServerError> {
        blocking!(self.conn.clone(), |conn: Arc<Mutex<Connection>>| -> Result<bool, ServerError> {
            let conn = conn.lock().unwrap();
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE email = ?1",
                params![email],
                |r| r.get(0),
            )?;
            Ok(count > 0)
        })
    }

    pub async fn exists_by_steam_id(&self, steam_id: String) -> Result<bool, ServerError> {
        blocking!(self.conn.clone(), |conn: Arc<Mutex<Connection>>| -> Result<bool, ServerError> {
            let conn = conn.lock().unwrap();
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE steam_id = ?1",
                params![steam_id],
                |r| r.get(0),
            )?;
            Ok(count > 0)
        })
    }

    pub async fn get_email(&self, username: String) -> Result<Option<String>, ServerError> {
        blocking!(self.conn.clone(), |conn: Arc<Mutex<Connection>>| -> Result<Option<String>, ServerError> {
            let conn = conn.lock().unwrap();
            Ok(get_user(&conn, &username)?.and_then(|u| u.email))
        })
    }

    pub async fn get_score(&self, username: String) -> Result<Option<i64>, ServerError> {
        blocking!(self.conn.clone(), |conn: Arc<Mutex<Connection>>| -> Result<Option<i64>, ServerError> {
            let conn = conn.lock().unwrap();
            Ok(get_user(&conn, &username)?.map(|u| u.score))
        })
    }

    pub async fn get_titles(&self, usernames: Vec<String>) -> Result<Vec<Option<String>>, ServerError> {
        blocking!(self.conn.clone(), |conn: Arc<Mutex<Connection>>| -> Result<Vec<Option<String>>, ServerError> {
            let conn = conn.lock().unwrap();
            let mut out = Vec::with_capacity(usernames.len());
            for u in &usernames {
                out.push(get_user(&conn, u)?.and_then(|rec| rec.title));
            }
            Ok(out)
        })
    }

    pub async fn get_stats_bundle(&self, username: String) -> Result<Option<StatsBundle>, ServerError> {
        blocking!(self.conn.clone(), |conn: Arc<Mutex<Connection>>| -> Result<Option<StatsBundle>, ServerError> {
            let conn = conn.lock().unwrap();
            Ok(get_user(&conn, &username)?.map(|u| u.stats))
        })
    }

    /// 1-based leaderboard position by score, needed for the `get-stats`
    /// reply (§6) though not one of §4.3's enumerated store operations.
    pub async fn get_rank(&self, username: String) -> Result<Option<i64>, ServerError> {
        blocking!(self.conn.clone(), |conn: Arc<Mutex<Connection>>| -> Result<Option<i64>, ServerError> {
            let conn = conn.lock().unwrap();
            let Some(user) = get_user(&conn, &username)? else { return Ok(None) };
            let higher: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE score > ?1",
                params![user.score],
                |r| r.get(0),
            )?;
            Ok(Some(higher + 1))
        })
    }

    pub async fn get_username_by_steam_id(&self, steam_id: String) -> Result<Option<String>, ServerError> {
        blocking!(self.conn.clone(), |conn: Arc<Mutex<Connection>>| -> Result<Option<String>, ServerError> {
            let conn = conn.lock().unwrap();
            let username: Option<String> = conn
                .query_row(
                    "SELECT username FROM users WHERE steam_id = ?1",
                    params![steam_id],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(username)
        })
    }

    pub async fn get_password_hash(&self, username: String) -> Result<Option<String>, ServerError> {
        blocking!(self.conn.clone(), |conn: Arc<Mutex<Connection>>| -> Result<Option<String>, ServerError> {
            let conn = conn.lock().unwrap();
            Ok(get_user(&conn, &username)?.map(|u| u.password_hash))
        })
    }

    pub async fn insert_user(
        &self,
        username: String,
        password_hash: String,
        email: Option<String>,
        steam_id: Option<String>,
        last_active: i64,
    ) -> Result<(), ServerError> {
        blocking!(self.conn.clone(), |conn: Arc<Mutex<Connection>>| -> Result<(), ServerError> {
            let conn = conn.lock().unwrap();
            let default_stats = serde_json::to_string(&StatsBundle::default()).unwrap();
            conn.execute(
                "INSERT INTO users
                 (username, password_hash, steam_id, email, score, number_of_wins,
                  number_of_games, last_active, title, money, items, stats)
                 VALUES (?1, ?2, ?3, ?4, 1000, 0, 0, ?5, NULL, 0, '[]', ?6)",
                params![username, password_hash, steam_id, email, last_active, default_stats],
            )?;
            Ok(())
        })
    }

    pub async fn delete_user(&self, username: String) -> Result<(), ServerError> {
        blocking!(self.conn.clone(), |conn: Arc<Mutex<Connection>>| -> Result<(), ServerError> {
            let conn = conn.lock().unwrap();
            conn.execute("DELETE FROM users WHERE username = ?1", params![username])?;
            Ok(())
        })
    }

    pub async fn set_password_hash(&self, username: String, hash: String) -> Result<(), ServerError> {
        blocking!(self.conn.clone(), |conn: Arc<Mutex<Connection>>| -> Result<(), ServerError> {
            let conn = conn.lock().unwrap();
            conn.execute(
                "UPDATE users SET password_hash = ?1 WHERE username = ?2",
                params![hash, username],
            )?;
            Ok(())
        })
    }

    pub async fn set_steam_id(&self, username: String, steam_id: String) -> Result<(), ServerError> {
        blocking!(self.conn.clone(), |conn: Arc<Mutex<Connection>>| -> Result<(), ServerError> {
            let conn = conn.lock().unwrap();
            conn.execute(
                "UPDATE users SET steam_id = ?1 WHERE username = ?2",
                params![steam_id, username],
            )?;
            Ok(())
        })
    }

    pub async fn set_title(&self, username: String, title: Option<String>) -> Result<(), ServerError> {
        blocking!(self.conn.clone(), |conn: Arc<Mutex<Connection>>| -> Result<(), ServerError> {
            let conn = conn.lock().unwrap();
            conn.execute(
                "UPDATE users SET title = ?1 WHERE username = ?2",
                params![title, username],
            )?;
            Ok(())
        })
    }

    pub async fn set_last_active(&self, username: String, now: i64) -> Result<(), ServerError> {
        blocking!(self.conn.clone(), |conn: Arc<Mutex<Connection>>| -> Result<(), ServerError> {
            let conn = conn.lock().unwrap();
            conn.execute(
                "UPDATE users SET last_active = ?1 WHERE username = ?2",
                params![now, username],
            )?;
            Ok(())
        })
    }

    /// Applies every participant's rating/stats update for a finished
    /// match in a single transaction, so partial updates cannot persist
    /// (§4.9's closing requirement).
    pub async fn apply_match_result(&self, rows: Vec<MatchResultRow>) -> Result<(), ServerError> {
        blocking!(self.conn.clone(), |conn: Arc<Mutex<Connection>>| -> Result<(), ServerError> {
            let mut conn = conn.lock().unwrap();
            let tx = conn.transaction()?;
            for row in &rows {
                let current = get_user(&tx, &row.username)?;
                let Some(current) = current else { continue };

                let mut stats = current.stats.clone();
                stats.units_destroyed += row.units_destroyed_add;
                if let Some(candidate) = row.shortest_game_candidate {
                    stats.shortest_game = stats.shortest_game.min(candidate);
                }
                if let Some(candidate) = row.minimal_casualties_candidate {
                    stats.minimal_casualties = stats.minimal_casualties.min(candidate);
                }
                if row.set_dev_defeated {
                    stats.dev_defeated = true;
                }
                let stats_json = serde_json::to_string(&stats).unwrap();

                let games_inc = if row.increment_games { 1 } else { 0 };
                let wins_inc = if row.won { 1 } else { 0 };

                tx.execute(
                    "UPDATE users SET
                        score = score + ?1,
                        number_of_games = number_of_games + ?2,
                        number_of_wins = number_of_wins + ?3,
                        money = money + ?4,
                        stats = ?5
                     WHERE username = ?6",
                    params![
                        row.score_delta,
                        games_inc,
                        wins_inc,
                        row.money_delta,
                        stats_json,
                        row.username
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub async fn deduct_and_append_item(
        &self,
        username: String,
        price: i64,
        item_id: String,
    ) -> Result<bool, ServerError> {
        blocking!(self.conn.clone(), |conn: Arc<Mutex<Connection>>| -> Result<bool, ServerError> {
            let mut conn = conn.lock().unwrap();
            let tx = conn.transaction()?;
            let current = get_user(&tx, &username)?;
            let Some(current) = current else { return Ok(false) };
            if price < 0 || current.money < price {
                return Ok(false);
            }
            let mut items = current.items.clone();
            items.push(item_id);
            let items_json = serde_json::to_string(&items).unwrap();
            tx.execute(
                "UPDATE users SET money = money - ?1, items = ?2 WHERE username = ?3",
                params![price, items_json, username],
            )?;
            tx.commit()?;
            Ok(true)
        })
    }

    pub async fn merge_campaign_progress(
        &self,
        username: String,
        new_ids: Vec<i64>,
    ) -> Result<StatsBundle, ServerError> {
        blocking!(self.conn.clone(), |conn: Arc<Mutex<Connection>>| -> Result<StatsBundle, ServerError> {
            let mut conn = conn.lock().unwrap();
            let tx = conn.transaction()?;
            let current = get_user(&tx, &username)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            let mut stats = current.stats;
            stats.campaign_progress.extend(new_ids);
            if stats.campaign_progress.len() > 29 {
                stats.campaign_completed = true;
            }
            let stats_json = serde_json::to_string(&stats).unwrap();
            tx.execute(
                "UPDATE users SET stats = ?1 WHERE username = ?2",
                params![stats_json, username],
            )?;
            tx.commit()?;
            Ok(stats)
        })
    }

    pub async fn get_user_record(&self, username: String) -> Result<Option<UserRecord>, ServerError> {
        blocking!(self.conn.clone(), |conn: Arc<Mutex<Connection>>| -> Result<Option<UserRecord>, ServerError> {
            let conn = conn.lock().unwrap();
            get_user(&conn, &username).map_err(ServerError::from)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_memory_store() -> SqliteUserStore {
        SqliteUserStore::open(":memory:").unwrap()
    }

    #[tokio::test]
    async fn insert_and_fetch_roundtrip() {
        let store = in_memory_store();
        store
            .insert_user("alice".into(), "hash".into(), Some("a@x".into()), None, 100)
            .await
            .unwrap();
        assert!(store.exists_by_username("alice".into()).await.unwrap());
        assert_eq!(store.get_score("alice".into()).await.unwrap(), Some(1000));
        let stats = store.get_stats_bundle("alice".into()).await.unwrap().unwrap();
        assert_eq!(stats, StatsBundle::default());
    }

    #[tokio::test]
    async fn apply_match_result_is_transactional() {
        let store = in_memory_store();
        store.insert_user("w".into(), "h".into(), None, None, 0).await.unwrap();
        store.insert_user("l".into(), "h".into(), None, None, 0).await.unwrap();

        store
            .apply_match_result(vec![
                MatchResultRow {
                    username: "w".into(),
                    increment_games: true,
                    won: true,
                    score_delta: 25,
                    money_delta: 1,
                    units_destroyed_add: 5,
                    shortest_game_candidate: Some(120),
                    minimal_casualties_candidate: Some(5),
                    set_dev_defeated: false,
                },
                MatchResultRow {
                    username: "l".into(),
                    increment_games: true,
                    won: false,
                    score_delta: -25,
                    money_delta: 0,
                    units_destroyed_add: 0,
                    shortest_game_candidate: None,
                    minimal_casualties_candidate: None,
                    set_dev_defeated: false,
                },
            ])
            .await
            .unwrap();

        assert_eq!(store.get_score("w".into()).await.unwrap(), Some(1025));
        assert_eq!(store.get_score("l".into()).await.unwrap(), Some(975));
    }

    #[tokio::test]
    async fn campaign_progress_merges_and_completes() {
        let store = in_memory_store();
        store.insert_user("c".into(), "h".into(), None, None, 0).await.unwrap();
        let ids: Vec<i64> = (0..30).collect();
        let stats = store.merge_campaign_progress("c".into(), ids).await.unwrap();
        assert!(stats.campaign_completed);
    }
}
