// Short-lived authenticated requests (§6): get-stats, buy-item,
// set-title, sync-campaign. Each is a single reply then close.
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::warn;

use crate::codec;
use crate::error::ErrorKind;
use crate::fields;
use crate::state::AppState;

pub async fn get_stats(state: &Arc<AppState>, username: &str) -> Value {
    let record = match state.store.get_user_record(username.to_owned()).await {
        Ok(Some(r)) => r,
        Ok(None) => return codec::err(ErrorKind::UserDoesNotExist),
        Err(e) => {
            warn!({ fields::ERROR } = %e, "store lookup failed during get-stats");
            return codec::err(ErrorKind::GetStatsFail);
        }
    };
    let rank = state.store.get_rank(username.to_owned()).await.ok().flatten();

    codec::ok_with(json!({
        "username": record.username,
        "title": record.title,
        "score": record.score,
        "rank": rank,
        "number_of_games": record.number_of_games,
        "number_of_wins": record.number_of_wins,
        "units_destroyed": record.stats.units_destroyed,
        "shortest_game": record.stats.shortest_game,
        "minimal_casualties": record.stats.minimal_casualties,
        "dev_defeated": record.stats.dev_defeated,
        "campaign_completed": record.stats.campaign_completed,
        "money": record.money,
        "items": record.items,
    }))
}

pub async fn buy_item(state: &Arc<AppState>, username: &str, body: &Value) -> Value {
    let Some(price) = body.get("price").and_then(Value::as_i64) else {
        return codec::err(ErrorKind::InvalidPrice);
    };
    let Some(item_id) = body.get("item_id").and_then(Value::as_str) else {
        return codec::err(ErrorKind::Generic);
    };
    if price < 0 {
        return codec::err(ErrorKind::InvalidPrice);
    }

    match state.store.deduct_and_append_item(username.to_owned(), price, item_id.to_owned()).await {
        Ok(true) => codec::ok(),
        Ok(false) => codec::err(ErrorKind::InvalidPrice),
        Err(e) => {
            warn!({ fields::ERROR } = %e, "store update failed during buy-item");
            codec::err(ErrorKind::Generic)
        }
    }
}

pub async fn set_title(state: &Arc<AppState>, username: &str, body: &Value) -> Value {
    let title = body.get("title").and_then(Value::as_str).map(str::to_owned);
    match state.store.set_title(username.to_owned(), title).await {
        Ok(()) => codec::ok(),
        Err(e) => {
            warn!({ fields::ERROR } = %e, "store update failed during set-title");
            codec::err(ErrorKind::Generic)
        }
    }
}

pub async fn sync_campaign(state: &Arc<AppState>, username: &str, body: &Value) -> Value {
    let Some(progress) = body.get("progress").and_then(Value::as_array) else {
        return codec::err(ErrorKind::Generic);
    };
    let new_ids: Vec<i64> = progress.iter().filter_map(Value::as_i64).collect();

    match state.store.merge_campaign_progress(username.to_owned(), new_ids).await {
        Ok(stats) => codec::ok_with(json!({
            "progress": stats.campaign_progress.into_iter().collect::<Vec<_>>(),
            "completed": stats.campaign_completed,
        })),
        Err(e) => {
            warn!({ fields::ERROR } = %e, "store update failed during sync-campaign");
            codec::err(ErrorKind::Generic)
        }
    }
}
