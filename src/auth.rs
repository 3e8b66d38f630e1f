// Registration/login state machine (§4.4). Each entry point takes the
// first-message payload, does its store/email work, and returns the
// reply envelope the dispatcher writes back before closing the
// connection — these are all short-lived request/response flows.
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::codec;
use crate::error::ErrorKind;
use crate::fields;
use crate::state::AppState;

const PASSWORD_ALPHABET: &[u8] = b"acdefghjkmnpqrtuvwxyzACDEFGHJKMNPQRTUVWXYZ234679";
const PASSWORD_LEN: usize = 12;
const CODE_LEN: usize = 4;
const PENDING_WINDOW: Duration = Duration::from_secs(30 * 60);
const INACTIVITY_THRESHOLD_SECS: i64 = 1798;

fn random_token(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..PASSWORD_ALPHABET.len());
            PASSWORD_ALPHABET[idx] as char
        })
        .collect()
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn hash_password(password: &str) -> color_eyre::Result<String> {
    Ok(bcrypt::hash(password, bcrypt::DEFAULT_COST)?)
}

pub async fn register1(state: &Arc<AppState>, body: &Value) -> Value {
    let Some(username) = body.get("username").and_then(Value::as_str) else {
        return codec::err(ErrorKind::Generic);
    };
    let Some(email) = body.get("email").and_then(Value::as_str) else {
        return codec::err(ErrorKind::Generic);
    };
    let steam_id = body.get("steam_id").and_then(Value::as_str).map(str::to_owned);

    match state.store.exists_by_username(username.to_owned()).await {
        Ok(true) => return codec::err(ErrorKind::UsernameTaken),
        Ok(false) => {}
        Err(e) => {
            warn!({ fields::ERROR } = %e, "store lookup failed during register1");
            return codec::err(ErrorKind::Generic);
        }
    }
    match state.store.exists_by_email(email.to_owned()).await {
        Ok(true) => return codec::err(ErrorKind::EmailTaken),
        Ok(false) => {}
        Err(e) => {
            warn!({ fields::ERROR } = %e, "store lookup failed during register1");
            return codec::err(ErrorKind::Generic);
        }
    }

    let password = random_token(PASSWORD_LEN);
    let hash = match hash_password(&password) {
        Ok(h) => h,
        Err(e) => {
            warn!({ fields::ERROR } = %e, "password hash failed");
            return codec::err(ErrorKind::Generic);
        }
    };

    if let Err(e) = state
        .store
        .insert_user(username.to_owned(), hash, Some(email.to_owned()), steam_id, now())
        .await
    {
        warn!({ fields::ERROR } = %e, "insert_user failed during register1");
        return codec::err(ErrorKind::Generic);
    }

    let code = random_token(CODE_LEN);
    state.put_pending_code(username, code.clone()).await;

    if !state.email.send_code(email, &code).await {
        state.clear_pending_code(username).await;
        if let Err(e) = state.store.delete_user(username.to_owned()).await {
            warn!({ fields::ERROR } = %e, "failed to roll back insert_user after email failure");
        }
        return codec::err(ErrorKind::EmailInvalid);
    }

    spawn_register_cleanup(state.clone(), username.to_owned());
    info!(username, "register1 accepted, verification code mailed");
    codec::ok()
}

fn spawn_register_cleanup(state: Arc<AppState>, username: String) {
    tokio::spawn(async move {
        tokio::time::sleep(PENDING_WINDOW).await;
        let last_active = match state.store.get_user_record(username.clone()).await {
            Ok(Some(record)) => record.last_active,
            _ => return,
        };
        if now() - last_active >= INACTIVITY_THRESHOLD_SECS {
            state.clear_pending_code(&username).await;
            if let Err(e) = state.store.delete_user(username.clone()).await {
                warn!({ fields::ERROR } = %e, %username, "failed to delete never-activated account");
            }
        }
    });
}

pub async fn login1(state: &Arc<AppState>, body: &Value) -> Value {
    let Some(username) = body.get("username").and_then(Value::as_str) else {
        return codec::err(ErrorKind::Generic);
    };
    let Some(email) = body.get("email").and_then(Value::as_str) else {
        return codec::err(ErrorKind::Generic);
    };

    let stored_email = match state.store.get_email(username.to_owned()).await {
        Ok(Some(e)) => e,
        Ok(None) => return codec::err(ErrorKind::UserDoesNotExist),
        Err(e) => {
            warn!({ fields::ERROR } = %e, "store lookup failed during login1");
            return codec::err(ErrorKind::Generic);
        }
    };
    if stored_email != email {
        return codec::err(ErrorKind::EmailDoesNotMatch);
    }

    let code = random_token(CODE_LEN);
    state.put_pending_code(username, code.clone()).await;

    if !state.email.send_code(email, &code).await {
        state.clear_pending_code(username).await;
        return codec::err(ErrorKind::EmailInvalid);
    }

    spawn_login_cleanup(state.clone(), username.to_owned());
    codec::ok()
}

fn spawn_login_cleanup(state: Arc<AppState>, username: String) {
    tokio::spawn(async move {
        tokio::time::sleep(PENDING_WINDOW).await;
        state.clear_pending_code(&username).await;
    });
}

pub async fn login2(state: &Arc<AppState>, body: &Value) -> Value {
    let Some(username) = body.get("username").and_then(Value::as_str) else {
        return codec::err(ErrorKind::Generic);
    };
    let Some(code) = body.get("code").and_then(Value::as_str) else {
        return codec::err(ErrorKind::Generic);
    };
    let steam_id = body.get("steam_id").and_then(Value::as_str).map(str::to_owned);

    let Some(pending) = state.take_pending_code(username).await else {
        return codec::err(ErrorKind::ExpiredCode);
    };
    if pending.is_expired() {
        state.clear_pending_code(username).await;
        return codec::err(ErrorKind::ExpiredCode);
    }
    if pending.code != code {
        return codec::err(ErrorKind::WrongCode);
    }

    let new_password = random_token(PASSWORD_LEN);
    let hash = match hash_password(&new_password) {
        Ok(h) => h,
        Err(e) => {
            warn!({ fields::ERROR } = %e, "password hash failed during login2");
            return codec::err(ErrorKind::Generic);
        }
    };

    if let Err(e) = state.store.set_password_hash(username.to_owned(), hash).await {
        warn!({ fields::ERROR } = %e, "set_password_hash failed");
        return codec::err(ErrorKind::Generic);
    }
    if let Err(e) = state.store.set_last_active(username.to_owned(), now()).await {
        warn!({ fields::ERROR } = %e, "set_last_active failed");
    }
    if let Some(steam_id) = steam_id {
        if let Err(e) = state.store.set_steam_id(username.to_owned(), steam_id).await {
            warn!({ fields::ERROR } = %e, "set_steam_id failed during login2");
        }
    }
    state.clear_pending_code(username).await;

    codec::ok_with(json!({ "password": new_password }))
}

pub async fn steam_register(state: &Arc<AppState>, body: &Value) -> Value {
    let Some(username) = body.get("username").and_then(Value::as_str) else {
        return codec::err(ErrorKind::Generic);
    };
    let Some(steam_id) = body.get("steam_id").and_then(Value::as_str) else {
        return codec::err(ErrorKind::Generic);
    };

    match state.store.exists_by_username(username.to_owned()).await {
        Ok(true) => return codec::err(ErrorKind::UsernameTaken),
        Ok(false) => {}
        Err(_) => return codec::err(ErrorKind::Generic),
    }
    match state.store.exists_by_steam_id(steam_id.to_owned()).await {
        Ok(true) => return codec::err(ErrorKind::SteamIdTaken),
        Ok(false) => {}
        Err(_) => return codec::err(ErrorKind::Generic),
    }

    let password = random_token(PASSWORD_LEN);
    let hash = match hash_password(&password) {
        Ok(h) => h,
        Err(_) => return codec::err(ErrorKind::Generic),
    };
    if let Err(e) = state
        .store
        .insert_user(username.to_owned(), hash, None, Some(steam_id.to_owned()), now())
        .await
    {
        warn!({ fields::ERROR } = %e, "insert_user failed during steam_register");
        return codec::err(ErrorKind::Generic);
    }

    codec::ok_with(json!({ "username": username, "password": password }))
}

pub async fn steam_login(state: &Arc<AppState>, body: &Value) -> Value {
    let Some(steam_id) = body.get("steam_id").and_then(Value::as_str) else {
        return codec::err(ErrorKind::Generic);
    };

    let username = match state.store.get_username_by_steam_id(steam_id.to_owned()).await {
        Ok(Some(u)) => u,
        Ok(None) => return codec::err(ErrorKind::UserNotFound),
        Err(_) => return codec::err(ErrorKind::Generic),
    };

    let password = random_token(PASSWORD_LEN);
    let hash = match hash_password(&password) {
        Ok(h) => h,
        Err(_) => return codec::err(ErrorKind::Generic),
    };
    if let Err(e) = state.store.set_password_hash(username.clone(), hash).await {
        warn!({ fields::ERROR } = %e, "set_password_hash failed during steam_login");
        return codec::err(ErrorKind::Generic);
    }

    codec::ok_with(json!({ "username": username, "password": password }))
}

/// Verifies `{username, password}` against the bcrypt hash on file and,
/// on success, bumps `last_active`. The online-set check (one session
/// per username) happens in the caller under the registry's own lock
/// (§4.5, §5's at-most-one-session invariant).
pub async fn authorize(state: &Arc<AppState>, username: &str, password: &str) -> Result<i64, ErrorKind> {
    let hash = state
        .store
        .get_password_hash(username.to_owned())
        .await
        .map_err(|_| ErrorKind::AuthorizeFail)?
        .ok_or(ErrorKind::AuthorizeFail)?;

    let valid = bcrypt::verify(password, &hash).unwrap_or(false);
    if !valid {
        return Err(ErrorKind::AuthorizeFail);
    }

    let score = state
        .store
        .get_score(username.to_owned())
        .await
        .map_err(|_| ErrorKind::AuthorizeFail)?
        .unwrap_or(1000);

    if let Err(e) = state.store.set_last_active(username.to_owned(), now()).await {
        warn!({ fields::ERROR } = %e, "set_last_active failed during authorize");
    }

    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_token_uses_expected_alphabet_and_length() {
        let token = random_token(PASSWORD_LEN);
        assert_eq!(token.len(), PASSWORD_LEN);
        assert!(token.bytes().all(|b| PASSWORD_ALPHABET.contains(&b)));

        let code = random_token(CODE_LEN);
        assert_eq!(code.len(), CODE_LEN);
    }
}
