// Outbound verification email (§4.4, §6). `EMAIL_USER`/`EMAIL_PASS`
// select the SMTP credentials; their absence disables email and fails
// the affected auth flows cleanly rather than panicking at startup.
use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::warn;

use crate::fields;

const SMTP_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait::async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_code(&self, to: &str, code: &str) -> bool;
}

pub struct LettreEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl LettreEmailSender {
    pub fn new(user: &str, pass: &str) -> Result<Self, lettre::transport::smtp::Error> {
        let creds = Credentials::new(user.to_owned(), pass.to_owned());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay("smtp.gmail.com")?
            .credentials(creds)
            .timeout(Some(SMTP_TIMEOUT))
            .build();
        Ok(LettreEmailSender {
            transport,
            from: user.to_owned(),
        })
    }
}

#[async_trait::async_trait]
impl EmailSender for LettreEmailSender {
    async fn send_code(&self, to: &str, code: &str) -> bool {
        let message = Message::builder()
            .from(match self.from.parse() {
                Ok(addr) => addr,
                Err(e) => {
                    warn!({ fields::ERROR } = %e, "invalid sender address");
                    return false;
                }
            })
            .to(match to.parse() {
                Ok(addr) => addr,
                Err(e) => {
                    warn!({ fields::ERROR } = %e, %to, "invalid recipient address");
                    return false;
                }
            })
            .subject("Your verification code")
            .header(ContentType::TEXT_PLAIN)
            .body(format!("Your verification code is: {code}"));

        let message = match message {
            Ok(m) => m,
            Err(e) => {
                warn!({ fields::ERROR } = %e, "failed to build verification message");
                return false;
            }
        };

        match self.transport.send(message).await {
            Ok(_) => true,
            Err(e) => {
                warn!({ fields::ERROR } = %e, "smtp send failed");
                false
            }
        }
    }
}

/// Used when `EMAIL_USER`/`EMAIL_PASS` are absent. Every send fails, so
/// flows that depend on it (register1, login1) fail cleanly instead of
/// the server silently pretending mail went out.
pub struct NullEmailSender;

#[async_trait::async_trait]
impl EmailSender for NullEmailSender {
    async fn send_code(&self, _to: &str, _code: &str) -> bool {
        false
    }
}
