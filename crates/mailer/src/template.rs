//! Embedded transactional mail templates.
//!
//! Three mails, each a subject line and a plain-text body with `{{var}}`
//! placeholders. Rendering substitutes every supplied variable and fails
//! with `TEMPLATE_EXECUTION` if a placeholder is left over.

use std::collections::HashMap;

use crate::error::MailError;

const USER_WELCOME_SUBJECT: &str = "Welcome to Versenotes!";
const USER_WELCOME_BODY: &str = "\
Hi {{username}},

Thanks for signing up for Versenotes. We're excited to have you on board!

Please click the link below to activate your account:

{{activation_url}}

The link expires in 3 days. If you didn't sign up, you can safely ignore
this email.

The Versenotes team
";

const TOKEN_ACTIVATION_SUBJECT: &str = "Activate your Versenotes account";
const TOKEN_ACTIVATION_BODY: &str = "\
Hi,

Here is a fresh activation link for your Versenotes account:

{{activation_url}}

The link expires in 3 days.

The Versenotes team
";

const TOKEN_PASSWORD_RESET_SUBJECT: &str = "Reset your Versenotes password";
const TOKEN_PASSWORD_RESET_BODY: &str = "\
Hi,

Click the link below to choose a new password:

{{password_reset_url}}

The link expires in 45 minutes. If you didn't request a password reset,
you can safely ignore this email.

The Versenotes team
";

/// The transactional mails the service sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Template {
    UserWelcome,
    TokenActivation,
    TokenPasswordReset,
}

impl Template {
    pub fn name(&self) -> &'static str {
        match self {
            Template::UserWelcome => "user_welcome",
            Template::TokenActivation => "token_activation",
            Template::TokenPasswordReset => "token_password_reset",
        }
    }

    fn subject(&self) -> &'static str {
        match self {
            Template::UserWelcome => USER_WELCOME_SUBJECT,
            Template::TokenActivation => TOKEN_ACTIVATION_SUBJECT,
            Template::TokenPasswordReset => TOKEN_PASSWORD_RESET_SUBJECT,
        }
    }

    fn body(&self) -> &'static str {
        match self {
            Template::UserWelcome => USER_WELCOME_BODY,
            Template::TokenActivation => TOKEN_ACTIVATION_BODY,
            Template::TokenPasswordReset => TOKEN_PASSWORD_RESET_BODY,
        }
    }

    /// Render subject and body with the given variables.
    pub fn render(
        &self,
        vars: &HashMap<&'static str, String>,
    ) -> Result<RenderedMail, MailError> {
        Ok(RenderedMail {
            subject: substitute(self.subject(), vars, self.name())?,
            body: substitute(self.body(), vars, self.name())?,
        })
    }
}

/// A template with all placeholders filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMail {
    pub subject: String,
    pub body: String,
}

fn substitute(
    text: &str,
    vars: &HashMap<&'static str, String>,
    template: &str,
) -> Result<String, MailError> {
    let mut out = text.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }

    if let Some(start) = out.find("{{") {
        let rest = &out[start + 2..];
        let placeholder = rest.split("}}").next().unwrap_or(rest);
        return Err(MailError::template_execution(
            template,
            format!("unbound variable: {placeholder}"),
        ));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MailErrorCode;

    fn vars(pairs: &[(&'static str, &str)]) -> HashMap<&'static str, String> {
        pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    #[test]
    fn welcome_renders_with_all_variables() {
        let rendered = Template::UserWelcome
            .render(&vars(&[
                ("username", "alice"),
                ("activation_url", "https://example.test/v1/users/activated/T1"),
            ]))
            .unwrap();

        assert_eq!(rendered.subject, "Welcome to Versenotes!");
        assert!(rendered.body.contains("Hi alice,"));
        assert!(rendered
            .body
            .contains("https://example.test/v1/users/activated/T1"));
        assert!(!rendered.body.contains("{{"));
    }

    #[test]
    fn missing_variable_is_a_template_execution_error() {
        let err = Template::UserWelcome
            .render(&vars(&[("username", "alice")]))
            .unwrap_err();

        assert_eq!(err.code, MailErrorCode::TemplateExecution);
        assert!(!err.retriable);
        assert_eq!(err.metadata["template"], "user_welcome");
        assert_eq!(err.metadata["detail"], "unbound variable: activation_url");
    }

    #[test]
    fn password_reset_renders() {
        let rendered = Template::TokenPasswordReset
            .render(&vars(&[(
                "password_reset_url",
                "https://example.test/reset/T2",
            )]))
            .unwrap();

        assert!(rendered.body.contains("https://example.test/reset/T2"));
        assert!(rendered.body.contains("45 minutes"));
    }

    #[test]
    fn extra_variables_are_ignored() {
        let rendered = Template::TokenActivation
            .render(&vars(&[
                ("activation_url", "https://example.test/a/T3"),
                ("unused", "whatever"),
            ]))
            .unwrap();

        assert!(rendered.body.contains("https://example.test/a/T3"));
    }
}
