// Error kinds surfaced to clients (§7), plus the internal faults that
// never cross the wire and only drive teardown paths.
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("version-fail")]
    VersionFail,
    #[error("username_taken")]
    UsernameTaken,
    #[error("email_taken")]
    EmailTaken,
    #[error("steam-id-taken")]
    SteamIdTaken,
    #[error("email_invalid")]
    EmailInvalid,
    #[error("user_does_not_exist")]
    UserDoesNotExist,
    #[error("email_does_not_match")]
    EmailDoesNotMatch,
    #[error("expired_code")]
    ExpiredCode,
    #[error("wrong_code")]
    WrongCode,
    #[error("user-not-found")]
    UserNotFound,
    #[error("authorize-fail")]
    AuthorizeFail,
    #[error("user-online-fail")]
    UserOnlineFail,
    #[error("connection-fail")]
    ConnectionFail,
    #[error("get-stats-fail")]
    GetStatsFail,
    #[error("invalid-price")]
    InvalidPrice,
    #[error("error")]
    Generic,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::VersionFail => "version-fail",
            ErrorKind::UsernameTaken => "username_taken",
            ErrorKind::EmailTaken => "email_taken",
            ErrorKind::SteamIdTaken => "steam-id-taken",
            ErrorKind::EmailInvalid => "email_invalid",
            ErrorKind::UserDoesNotExist => "user_does_not_exist",
            ErrorKind::EmailDoesNotMatch => "email_does_not_match",
            ErrorKind::ExpiredCode => "expired_code",
            ErrorKind::WrongCode => "wrong_code",
            ErrorKind::UserNotFound => "user-not-found",
            ErrorKind::AuthorizeFail => "authorize-fail",
            ErrorKind::UserOnlineFail => "user-online-fail",
            ErrorKind::ConnectionFail => "connection-fail",
            ErrorKind::GetStatsFail => "get-stats-fail",
            ErrorKind::InvalidPrice => "invalid-price",
            ErrorKind::Generic => "error",
        }
    }
}

/// Internal-only faults. These never reach a client as an error
/// envelope; every call site that sees one tears the connection down
/// instead (§7: "transport-level faults are never re-raised to callers").
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("client-facing error: {0}")]
    Client(ErrorKind),
    #[error("connection closed")]
    Closed,
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] color_eyre::eyre::Error),
}

impl From<ErrorKind> for ServerError {
    fn from(kind: ErrorKind) -> Self {
        ServerError::Client(kind)
    }
}
