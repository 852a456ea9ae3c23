// Outbound mail boundary: a Mailer trait with an async SMTP implementation

pub mod templates;

use crate::config::SmtpConfig;
use crate::errors::MailError;
use crate::retry::RetryStrategy;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, instrument, warn};

/// One outbound email. The body is HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body_html: String,
}

/// Mail-sending seam. The notification flow only ever talks to this trait;
/// tests substitute a recording implementation.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError>;
}

/// SMTP mailer backed by lettre's async transport with STARTTLS
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Build the transport once at startup; the connection pool inside
    /// lettre is reused across sends
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let from: Mailbox = format!("{} <{}>", config.from_name, config.from_address)
            .parse()
            .map_err(|e| MailError::InvalidAddress {
                address: config.from_address.clone(),
                reason: format!("{}", e),
            })?;

        let credentials = Credentials::new(config.username.clone(), config.password.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| MailError::TransportSetup(e.to_string()))?
            .port(config.port)
            .credentials(credentials)
            .build();

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    #[instrument(skip(self, message), fields(to = %message.to, subject = %message.subject))]
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e| MailError::InvalidAddress {
                address: message.to.clone(),
                reason: format!("{}", e),
            })?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&message.subject)
            .header(ContentType::TEXT_HTML)
            .body(message.body_html.clone())
            .map_err(|e| MailError::BuildFailed(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| MailError::DeliveryFailed(e.to_string()))?;

        info!(to = %message.to, "Email sent");
        Ok(())
    }
}

/// Send an email with bounded retries.
///
/// Total sends = 1 + the strategy's retry budget. The final error is
/// returned to the caller, who decides whether it is fatal; for the
/// notification flow it never is.
#[instrument(skip_all, fields(to = %message.to))]
pub async fn send_with_retry(
    mailer: &dyn Mailer,
    message: &EmailMessage,
    strategy: &dyn RetryStrategy,
) -> Result<(), MailError> {
    let mut attempt = 0;

    loop {
        match mailer.send(message).await {
            Ok(()) => return Ok(()),
            Err(e) => match strategy.next_delay(attempt) {
                Some(delay) => {
                    attempt += 1;
                    warn!(
                        error = %e,
                        attempt = attempt,
                        delay_ms = delay.as_millis(),
                        "Email delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::FixedDelay;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Mailer that fails a configured number of times before succeeding
    struct FlakyMailer {
        failures: AtomicU32,
        sends: AtomicU32,
    }

    impl FlakyMailer {
        fn failing(times: u32) -> Self {
            Self {
                failures: AtomicU32::new(times),
                sends: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Mailer for FlakyMailer {
        async fn send(&self, _message: &EmailMessage) -> Result<(), MailError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(MailError::DeliveryFailed("connection refused".to_string()));
            }
            Ok(())
        }
    }

    fn message() -> EmailMessage {
        EmailMessage {
            to: "a@x.com".to_string(),
            subject: "Test".to_string(),
            body_html: "<p>hi</p>".to_string(),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let mailer = FlakyMailer::failing(2);
        let strategy = FixedDelay::new(Duration::from_millis(1), 3);

        let result = send_with_retry(&mailer, &message(), &strategy).await;
        assert!(result.is_ok());
        assert_eq!(mailer.sends.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let mailer = FlakyMailer::failing(10);
        let strategy = FixedDelay::new(Duration::from_millis(1), 2);

        let result = send_with_retry(&mailer, &message(), &strategy).await;
        assert!(result.is_err());
        // One initial send plus two retries
        assert_eq!(mailer.sends.load(Ordering::SeqCst), 3);
    }
}
