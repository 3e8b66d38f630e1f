// Private rooms (§4.6 "Private rooms", §4.7 host-control sweep). A
// room is kept in the registry only while it has seated players; the
// sweeper both detects dead seats and carries the host's start signal.
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::info;

use crate::codec;
use crate::player::Player;
use crate::protocol::Mode;
use crate::session::{self, SessionParams};
use crate::state::{AppState, GameRoom};
use crate::transport::{self, ControlRead};

const SWEEP_PERIOD: Duration = Duration::from_secs(4);

/// Joins `player` to the room named `code`, creating it (as host) if
/// absent. Performs the one extra custom-map round-trip for a new host
/// when `wants_custom_map` is set, and hands the player's ownership
/// into the room registry — the caller's connection task ends here.
pub async fn enter_room(state: &Arc<AppState>, mode: Mode, code: String, mut player: Player, wants_custom_map: bool) {
    {
        let mut rooms = state.rooms.write().await;
        if let Some(room) = rooms.get_mut(&code) {
            let snapshot = json!({
                "mode": room.mode.queue_type_str(),
                "map": room.custom_map,
                "players": room.players.iter().map(|p| p.username.clone()).collect::<Vec<_>>(),
            });
            transport::write_framed(&mut player.writer, &snapshot).await;
            room.players.push(player);
            return;
        }
    }

    let custom_map = if wants_custom_map {
        match transport::read_control(&mut player.reader).await {
            ControlRead::Message(v) => Some(v),
            ControlRead::Closed => None,
        }
    } else {
        None
    };

    transport::write_framed(&mut player.writer, &codec::ok()).await;

    let mut rooms = state.rooms.write().await;
    let room = rooms.entry(code.clone()).or_insert_with(|| GameRoom {
        code: code.clone(),
        mode,
        target_player_count: mode.target_player_count(),
        players: Vec::new(),
        custom_map,
    });
    room.players.push(player);
}

/// Runs forever: every `SWEEP_PERIOD`, probes every seated player in
/// every room, evicts the dead, and starts any room whose host asked to.
pub async fn run_sweeper(state: Arc<AppState>) {
    loop {
        tokio::time::sleep(SWEEP_PERIOD).await;
        let codes: Vec<String> = state.rooms.read().await.keys().cloned().collect();
        for code in codes {
            sweep_room(&state, &code).await;
        }
    }
}

async fn sweep_room(state: &Arc<AppState>, code: &str) {
    let mut room = match state.rooms.write().await.remove(code) {
        Some(r) => r,
        None => return,
    };
    if room.players.is_empty() {
        return;
    }

    let usernames: Vec<String> = room.players.iter().map(|p| p.username.clone()).collect();
    let ready = room.is_ready();

    let mut start_requested = false;
    let mut alive = Vec::new();
    for (i, mut player) in room.players.drain(..).enumerate() {
        let is_host = i == 0;
        let mut payload = json!({ "players": usernames });
        if is_host {
            payload["ready"] = json!(ready);
        }
        if !transport::write_framed(&mut player.writer, &payload).await {
            state.mark_offline(&player.username).await;
            continue;
        }
        match transport::read_probe(&mut player.reader).await {
            Some(v) => {
                if is_host && v.get("action").and_then(Value::as_str) == Some("start") {
                    start_requested = true;
                }
                alive.push(player);
            }
            None => {
                state.mark_offline(&player.username).await;
            }
        }
    }
    room.players = alive;

    if start_requested && room.is_ready() {
        let target = room.target_player_count.min(room.players.len());
        let seats: Vec<Player> = room.players.drain(..target).collect();
        let spectators: Vec<Player> = room.players.drain(..).collect();
        let custom_map = room.custom_map.clone();
        let mode = room.mode;
        info!(code, seats = seats.len(), spectators = spectators.len(), "room started");
        let state = state.clone();
        tokio::spawn(async move {
            session::run(
                state,
                SessionParams {
                    mode,
                    players: seats,
                    custom_map,
                    score_flag: false,
                    spectators,
                },
            )
            .await;
        });
        return;
    }

    if room.players.is_empty() {
        return;
    }

    state.rooms.write().await.insert(code.to_owned(), room);
}
