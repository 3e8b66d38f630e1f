use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use war_of_dots_server::config::Config;
use war_of_dots_server::email::{EmailSender, LettreEmailSender, NullEmailSender};
use war_of_dots_server::logger::{self, LogFormat, LogLevel};
use war_of_dots_server::state::AppState;
use war_of_dots_server::store::SqliteUserStore;
use war_of_dots_server::{dispatcher, queue, room};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    logger::init_logger(LogFormat::Compact, LogLevel::Info);

    let config = Arc::new(Config::load()?);
    info!(bind_addr = %config.bind_addr, protocol_version = %config.protocol_version, "loaded configuration");

    let store = SqliteUserStore::open(&config.db_path)?;

    let email: Arc<dyn EmailSender> = match (&config.email_user, &config.email_pass) {
        (Some(user), Some(pass)) => match LettreEmailSender::new(user, pass) {
            Ok(sender) => Arc::new(sender),
            Err(e) => {
                warn!(error = %e, "failed to build SMTP transport, verification email disabled");
                Arc::new(NullEmailSender)
            }
        },
        _ => {
            warn!("EMAIL_USER/EMAIL_PASS not set, verification email disabled");
            Arc::new(NullEmailSender)
        }
    };

    let state = AppState::new(store, email, config.clone());

    tokio::spawn(queue::run_one_v_one_matcher(state.clone()));
    tokio::spawn(queue::run_mixed_matcher(state.clone()));
    tokio::spawn(room::run_sweeper(state.clone()));

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(bind_addr = %config.bind_addr, "listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "accept failed");
                continue;
            }
        };
        let state = state.clone();
        tokio::spawn(async move {
            info!(%peer, "connection accepted");
            dispatcher::handle_connection(stream, state).await;
        });
    }
}
