// Outbound email collaborator for verification and reset links

use async_trait::async_trait;
use tracing::info;

use crate::auth::error::AuthError;

/// Delivers verification and password reset messages
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_verification_email(&self, to: &str, token: &str) -> Result<(), AuthError>;

    async fn send_password_reset_email(&self, to: &str, token: &str) -> Result<(), AuthError>;
}

/// Sender that renders the link and writes a log line instead of mailing it
pub struct LogEmailSender {
    base_url: String,
}

impl LogEmailSender {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Link the user follows to finish verification
    pub fn verification_link(&self, token: &str) -> String {
        format!("{}/verify-email?token={}", self.base_url, token)
    }

    /// Link the user follows to choose a new password
    pub fn reset_link(&self, token: &str) -> String {
        format!("{}/reset-password?token={}", self.base_url, token)
    }
}

fn deliver(to: &str, subject: &str, link: &str) {
    // Query string carries the token
    let target = link.split('?').next().unwrap_or_default();
    info!(to = %to, subject = %subject, link = %target, "Email queued");
}

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send_verification_email(&self, to: &str, token: &str) -> Result<(), AuthError> {
        deliver(to, "Verify your email", &self.verification_link(token));
        Ok(())
    }

    async fn send_password_reset_email(&self, to: &str, token: &str) -> Result<(), AuthError> {
        deliver(to, "Reset your password", &self.reset_link(token));
        Ok(())
    }
}
