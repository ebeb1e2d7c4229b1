//! Mail delivery seam.
//!
//! The scheduler talks to mail exclusively through the [`Mailer`] trait. On
//! failure it receives a [`MailError`] whose `retriable` flag is the sole
//! input to the retry-or-dead-letter decision; everything else on the error
//! is for the logs.

pub mod error;
pub mod smtp;
pub mod template;

use std::collections::HashMap;

use async_trait::async_trait;

pub use error::{MailError, MailErrorCode};
pub use smtp::{SmtpConfig, SmtpMailer};
pub use template::{RenderedMail, Template};

/// Renders a template and delivers it to a recipient.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        template: Template,
        vars: &HashMap<&'static str, String>,
    ) -> Result<(), MailError>;
}
