//! Shared application state.

use std::sync::Arc;

use sqlx::PgPool;

use versenotes_auth::{TokenResolver, TokenStore, UserStore};
use versenotes_core::Clock;
use versenotes_ratelimit::Limiters;
use versenotes_scheduler::Scheduler;

use crate::config::Config;

pub struct AppState {
    pub config: Config,
    pub db: PgPool,
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub resolver: Arc<TokenResolver>,
    pub limiters: Arc<Limiters>,
    pub scheduler: Scheduler,
    pub clock: Arc<dyn Clock>,
}
