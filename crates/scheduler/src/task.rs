//! Task model for deferred side-effects.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Uses UUIDv7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a task does, together with its kind-specific payload.
///
/// The payload travels on the variant itself, so a task can never carry data
/// of the wrong shape for its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    ActivationMail(ActivationMail),
    PasswordResetMail(PasswordResetMail),
    TokenActivationMail(TokenActivationMail),
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::ActivationMail(_) => "activation-mail",
            TaskKind::PasswordResetMail(_) => "password-reset-mail",
            TaskKind::TokenActivationMail(_) => "token-activation-mail",
        }
    }

    pub fn recipient(&self) -> &str {
        match self {
            TaskKind::ActivationMail(p) => &p.email,
            TaskKind::PasswordResetMail(p) => &p.email,
            TaskKind::TokenActivationMail(p) => &p.email,
        }
    }
}

/// Welcome mail sent right after registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationMail {
    pub username: String,
    pub email: String,
    pub activation_url: String,
}

/// Password-reset link mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordResetMail {
    pub email: String,
    pub password_reset_url: String,
}

/// Fresh activation link for an account that asked again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenActivationMail {
    pub email: String,
    pub activation_url: String,
}

/// A unit of deferrable work.
///
/// Owned by the scheduler from submission until it completes, dead-letters,
/// or the process exits. `execute_at` starts at `created_at` and only moves
/// forward when a retry is scheduled.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub retries: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub execute_at: DateTime<Utc>,
}

impl Task {
    pub fn new(kind: TaskKind, max_retries: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::new(),
            kind,
            retries: 0,
            max_retries,
            created_at: now,
            execute_at: now,
        }
    }
}

/// A task the scheduler will not run again, with its final classification.
#[derive(Debug, Clone)]
pub struct DeadTask {
    pub task: Task,
    pub reason: String,
    pub dead_at: DateTime<Utc>,
}
