// Per-connection dispatcher (§2, §6): reads the first message, checks
// the protocol version, and routes to either a short-lived
// request/response flow or a long-lived queue/room flow.
use std::sync::Arc;

use serde_json::Value;
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::auth;
use crate::codec;
use crate::error::ErrorKind;
use crate::fields;
use crate::player::Player;
use crate::protocol::{self, Mode};
use crate::requests;
use crate::room;
use crate::state::{AppState, QueuePreference};
use crate::transport::{self, ControlRead};

pub async fn handle_connection(stream: TcpStream, state: Arc<AppState>) {
    transport::set_nodelay(&stream);
    let (mut reader, mut writer) = stream.into_split();

    let body = match transport::read_control(&mut reader).await {
        ControlRead::Message(v) => v,
        ControlRead::Closed => return,
    };

    let version = body.get("version").and_then(Value::as_str).unwrap_or("");
    if version != state.config.protocol_version {
        transport::write_framed(&mut writer, &codec::err(ErrorKind::VersionFail)).await;
        return;
    }

    let msg_type = body.get("type").and_then(Value::as_str).unwrap_or("").to_owned();

    let reply = match msg_type.as_str() {
        protocol::REGISTER1 => Some(auth::register1(&state, &body).await),
        protocol::LOGIN1 => Some(auth::login1(&state, &body).await),
        protocol::LOGIN2 => Some(auth::login2(&state, &body).await),
        protocol::STEAM_REGISTER => Some(auth::steam_register(&state, &body).await),
        protocol::STEAM_LOGIN => Some(auth::steam_login(&state, &body).await),
        _ => None,
    };

    if let Some(reply) = reply {
        transport::write_framed(&mut writer, &reply).await;
        return;
    }

    // Every remaining first-message type is an already-credentialed
    // action: username/password are verified before anything else.
    let Some(username) = body.get("username").and_then(Value::as_str).map(str::to_owned) else {
        transport::write_framed(&mut writer, &codec::err(ErrorKind::Generic)).await;
        return;
    };
    let password = body.get("password").and_then(Value::as_str).unwrap_or("");

    let score = match auth::authorize(&state, &username, password).await {
        Ok(score) => score,
        Err(kind) => {
            transport::write_framed(&mut writer, &codec::err(kind)).await;
            return;
        }
    };

    match msg_type.as_str() {
        protocol::GET_STATS => {
            let reply = requests::get_stats(&state, &username).await;
            transport::write_framed(&mut writer, &reply).await;
        }
        protocol::BUY_ITEM => {
            let reply = requests::buy_item(&state, &username, &body).await;
            transport::write_framed(&mut writer, &reply).await;
        }
        protocol::SET_TITLE => {
            let reply = requests::set_title(&state, &username, &body).await;
            transport::write_framed(&mut writer, &reply).await;
        }
        protocol::SYNC_CAMPAIGN => {
            let reply = requests::sync_campaign(&state, &username, &body).await;
            transport::write_framed(&mut writer, &reply).await;
        }
        t @ (protocol::QUEUE_1V1 | protocol::QUEUE_V3 | protocol::QUEUE_V4 | protocol::QUEUE_V34) => {
            // At-most-one-session invariant: the online-set add happens
            // under the same guarded section as the queue/room add (§5).
            if !state.mark_online(&username).await {
                transport::write_framed(&mut writer, &codec::err(ErrorKind::UserOnlineFail)).await;
                return;
            }

            let player = Player::new(username.clone(), score, reader, writer);
            let code = body.get("code").and_then(Value::as_str).unwrap_or("").to_owned();
            let wants_custom_map = body.get("custom_map").and_then(Value::as_bool).unwrap_or(false);

            info!(username, %t, room_code = %code, "player entering matchmaking");

            if !code.is_empty() {
                let mode = Mode::from_type_str(t).unwrap_or(Mode::OneVOne);
                room::enter_room(&state, mode, code, player, wants_custom_map).await;
            } else {
                match t {
                    protocol::QUEUE_1V1 => {
                        state.queue_1v1.lock().await.push(player);
                    }
                    protocol::QUEUE_V3 => {
                        state.queue_mixed.lock().await.push((player, QueuePreference::Only(Mode::V3)));
                    }
                    protocol::QUEUE_V4 => {
                        state.queue_mixed.lock().await.push((player, QueuePreference::Only(Mode::V4)));
                    }
                    _ => {
                        state.queue_mixed.lock().await.push((player, QueuePreference::Either));
                    }
                }
            }
        }
        other => {
            warn!(%other, "unrecognized first-message type");
            transport::write_framed(&mut writer, &codec::err(ErrorKind::Generic)).await;
        }
    }
}
