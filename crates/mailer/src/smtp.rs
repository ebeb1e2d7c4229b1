//! SMTP transport adapter.
//!
//! Maps transport failures onto the [`MailError`] taxonomy; the scheduler
//! keys its retry decision on nothing else.

use std::collections::HashMap;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::error::MailError;
use crate::template::Template;
use crate::Mailer;

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub sender: String,
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> Result<Self, MailError> {
        let sender = cfg
            .sender
            .parse::<Mailbox>()
            .map_err(|e| MailError::invalid_recipient(&cfg.sender).with_source(e))?;

        // Plain connection; the sandbox relay on port 25 does not speak TLS.
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.host).port(cfg.port);
        if !cfg.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                cfg.username.clone(),
                cfg.password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            sender,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(
        &self,
        recipient: &str,
        template: Template,
        vars: &HashMap<&'static str, String>,
    ) -> Result<(), MailError> {
        let rendered = template.render(vars)?;

        let to = recipient
            .parse::<Mailbox>()
            .map_err(|e| MailError::invalid_recipient(recipient).with_source(e))?;

        let message = Message::builder()
            .from(self.sender.clone())
            .to(to)
            .subject(rendered.subject)
            .body(rendered.body)
            .map_err(|e| {
                MailError::template_execution(template.name(), "failed to assemble message")
                    .with_source(e)
            })?;

        match self.transport.send(message).await {
            Ok(_) => Ok(()),
            Err(err) => Err(classify_smtp_error(recipient, err)),
        }
    }
}

fn classify_smtp_error(
    recipient: &str,
    err: lettre::transport::smtp::Error,
) -> MailError {
    let status = err.status().map(|code| code.to_string());

    let classified = if err.is_permanent() {
        match status.as_deref() {
            Some(s) if s.starts_with("530") || s.starts_with("535") => {
                MailError::auth_failure("smtp authentication rejected")
            }
            Some(s) if s.starts_with("550") || s.starts_with("551") || s.starts_with("553") => {
                MailError::invalid_recipient(recipient)
            }
            _ => MailError::auth_failure("permanently rejected by smtp server"),
        }
    } else if err.is_transient() {
        match status.as_deref() {
            Some(s) if s.starts_with("421") || s.starts_with("450") || s.starts_with("452") => {
                MailError::rate_limited("smtp server throttling")
            }
            _ => MailError::network("smtp delivery"),
        }
    } else {
        MailError::network("smtp connection")
    };

    match status {
        Some(status) => classified.with_metadata("status", status).with_source(err),
        None => classified.with_source(err),
    }
}
