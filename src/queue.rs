// Matchmaking engines (§4.6): the 1v1 matcher and the mixed 3/4-player
// matcher. Both are long-running supervisors spawned once at startup
// and run until the process exits.
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::info;

use crate::player::Player;
use crate::protocol::Mode;
use crate::session::{self, SessionParams};
use crate::state::{AppState, QueuePreference};
use crate::transport;

const ONE_V_ONE_SLEEP: Duration = Duration::from_secs(20);
const MIXED_SLEEP: Duration = Duration::from_secs(1);

/// One-shot liveness probe (§4.7): send `"check"`, expect the exact
/// echo back within a second. Anything else means dead.
pub async fn is_connected(player: &mut Player) -> bool {
    let probe = json!("check");
    if !transport::write_framed(&mut player.writer, &probe).await {
        return false;
    }
    matches!(transport::read_probe(&mut player.reader).await, Some(v) if v == probe)
}

/// Drains dead players from a queue in place, probing each survivor.
async fn evict_dead(queue: &mut Vec<Player>) {
    let mut alive = Vec::with_capacity(queue.len());
    for mut player in queue.drain(..) {
        if is_connected(&mut player).await {
            alive.push(player);
        }
    }
    *queue = alive;
}

/// Runs forever, pairing the closest-rated queued players (§4.6).
pub async fn run_one_v_one_matcher(state: Arc<AppState>) {
    loop {
        {
            let mut queue = state.queue_1v1.lock().await;
            evict_dead(&mut queue).await;
        }

        let batch = {
            let mut queue = state.queue_1v1.lock().await;
            if queue.len() < 2 {
                None
            } else {
                Some(std::mem::take(&mut *queue))
            }
        };

        match batch {
            Some(mut players) => {
                players.sort_by_key(|p| p.score);
                let mut pairs = Vec::new();
                let mut leftover = Vec::new();
                let mut iter = players.into_iter();
                loop {
                    let Some(a) = iter.next() else { break };
                    match iter.next() {
                        Some(b) => pairs.push((a, b)),
                        None => {
                            leftover.push(a);
                            break;
                        }
                    }
                }
                if !leftover.is_empty() {
                    let mut queue = state.queue_1v1.lock().await;
                    queue.extend(leftover);
                }
                for (a, b) in pairs {
                    let state = state.clone();
                    info!(p1 = %a.username, p2 = %b.username, "1v1 match formed");
                    tokio::spawn(async move {
                        session::run(
                            state,
                            SessionParams {
                                mode: Mode::OneVOne,
                                players: vec![a, b],
                                custom_map: None,
                                score_flag: true,
                                spectators: Vec::new(),
                            },
                        )
                        .await;
                    });
                }
            }
            None => tokio::time::sleep(ONE_V_ONE_SLEEP).await,
        }
    }
}

/// Runs forever, draining the `v3`/`v4`/`v34` queues per the priority
/// rules in §4.6.
pub async fn run_mixed_matcher(state: Arc<AppState>) {
    loop {
        let mut strict_v4 = Vec::new();
        let mut strict_v3 = Vec::new();
        let mut flexible = Vec::new();
        {
            let mut queue = state.queue_mixed.lock().await;
            let mut alive = Vec::with_capacity(queue.len());
            for (mut player, pref) in queue.drain(..) {
                if is_connected(&mut player).await {
                    alive.push((player, pref));
                }
            }
            *queue = alive;
            for (player, pref) in queue.drain(..) {
                match pref {
                    QueuePreference::Only(Mode::V4) => strict_v4.push(player),
                    QueuePreference::Only(Mode::V3) => strict_v3.push(player),
                    _ => flexible.push(player),
                }
            }
        }

        if strict_v4.len() + flexible.len() >= 4 {
            let mut group = Vec::new();
            group.append(&mut strict_v4);
            while group.len() < 4 {
                if let Some(p) = flexible.pop() {
                    group.push(p);
                } else {
                    break;
                }
            }
            spawn_mixed_session(&state, Mode::V4, group);
        } else if strict_v3.len() + flexible.len() >= 3 {
            let mut group = Vec::new();
            group.append(&mut strict_v3);
            while group.len() < 3 {
                if let Some(p) = flexible.pop() {
                    group.push(p);
                } else {
                    break;
                }
            }
            spawn_mixed_session(&state, Mode::V3, group);
        }

        let mut queue = state.queue_mixed.lock().await;
        queue.extend(strict_v4.into_iter().map(|p| (p, QueuePreference::Only(Mode::V4))));
        queue.extend(strict_v3.into_iter().map(|p| (p, QueuePreference::Only(Mode::V3))));
        queue.extend(flexible.into_iter().map(|p| (p, QueuePreference::Either)));
        drop(queue);

        tokio::time::sleep(MIXED_SLEEP).await;
    }
}

fn spawn_mixed_session(state: &Arc<AppState>, mode: Mode, players: Vec<Player>) {
    let state = state.clone();
    info!(?mode, count = players.len(), "mixed match formed");
    tokio::spawn(async move {
        session::run(
            state,
            SessionParams {
                mode,
                players,
                custom_map: None,
                score_flag: true,
                spectators: Vec::new(),
            },
        )
        .await;
    });
}
