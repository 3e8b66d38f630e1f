// Server configuration: a `Settings.toml` file layered with `APP_*`
// environment overrides, the same layering the reference server used
// for its (much smaller) config object.
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,

    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,

    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,

    #[serde(default)]
    pub email_user: Option<String>,
    #[serde(default)]
    pub email_pass: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:9056".to_string()
}
fn default_protocol_version() -> String {
    "0.13.3".to_string()
}
fn default_welcome_message() -> String {
    "Welcome to War of Dots".to_string()
}
fn default_db_path() -> String {
    "./war_of_dots.db".to_string()
}
fn default_tick_period_ms() -> u64 {
    1030
}

impl Config {
    /// Load layered config: `./Settings.toml` (optional) overridden by
    /// `APP_*` environment variables, then fall back to `EMAIL_USER`/
    /// `EMAIL_PASS` directly per §6 of the spec if the `APP_` prefixed
    /// forms were not set.
    pub fn load() -> color_eyre::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("Settings").required(false))
            .add_source(config::Environment::with_prefix("APP"))
            .build()?;

        let mut cfg: Config = settings.try_deserialize().unwrap_or_else(|_| Config {
            bind_addr: default_bind_addr(),
            protocol_version: default_protocol_version(),
            welcome_message: default_welcome_message(),
            db_path: default_db_path(),
            tick_period_ms: default_tick_period_ms(),
            email_user: None,
            email_pass: None,
        });

        if cfg.email_user.is_none() {
            cfg.email_user = std::env::var("EMAIL_USER").ok();
        }
        if cfg.email_pass.is_none() {
            cfg.email_pass = std::env::var("EMAIL_PASS").ok();
        }

        Ok(cfg)
    }

    pub fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_period_ms)
    }
}
