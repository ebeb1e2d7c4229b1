use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Notify;
use tracing::info;

use versenotes_api::app::build_router;
use versenotes_api::background::spawn_token_cleanup;
use versenotes_api::config::Config;
use versenotes_api::state::AppState;
use versenotes_auth::{
    PgTokenStore, PgUserStore, RedisTokenCache, TokenCache, TokenResolver, TokenStore, UserStore,
};
use versenotes_core::{Clock, SystemClock};
use versenotes_mailer::{Mailer, SmtpMailer};
use versenotes_ratelimit::{Action, Limiters, SlidingWindowLimiter};
use versenotes_scheduler::Scheduler;

const SCHEDULER_DRAIN_DEADLINE: Duration = Duration::from_secs(20);

#[tokio::main]
async fn main() {
    versenotes_observability::init();

    let config = Config::from_env();

    let db = PgPoolOptions::new()
        .max_connections(config.database_max_conns)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to Postgres");
    info!("connected to database");

    let redis_client =
        redis::Client::open(config.redis_url.as_str()).expect("invalid REDIS_URL");
    let redis_conn = redis_client
        .get_connection_manager()
        .await
        .expect("failed to connect to Redis");
    info!("connected to redis");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mailer: Arc<dyn Mailer> =
        Arc::new(SmtpMailer::new(&config.smtp).expect("failed to build SMTP mailer"));

    let scheduler = Scheduler::new(config.scheduler.clone(), mailer, clock.clone());
    scheduler.start();

    let limiters = Arc::new(Limiters::new(
        config.limiter.enabled,
        Arc::new(SlidingWindowLimiter::new(
            redis_conn.clone(),
            Action::Ip,
            config.limiter.ip_limit,
            config.limiter.window,
        )),
        Arc::new(SlidingWindowLimiter::new(
            redis_conn.clone(),
            Action::Note,
            config.limiter.note_limit,
            config.limiter.window,
        )),
        Arc::new(SlidingWindowLimiter::new(
            redis_conn.clone(),
            Action::Auth,
            config.limiter.auth_limit,
            config.limiter.window,
        )),
    ));

    let users: Arc<dyn UserStore> = Arc::new(PgUserStore::new(db.clone()));
    let tokens: Arc<dyn TokenStore> = Arc::new(PgTokenStore::new(db.clone()));
    let cache: Arc<dyn TokenCache> = Arc::new(RedisTokenCache::new(redis_conn));
    let resolver = Arc::new(TokenResolver::new(
        cache,
        tokens.clone(),
        clock.clone(),
        config.token_cache_ttl,
    ));

    let cleanup_stop = Arc::new(Notify::new());
    let cleanup = spawn_token_cleanup(tokens.clone(), clock.clone(), cleanup_stop.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    let state = Arc::new(AppState {
        config,
        db,
        users,
        tokens,
        resolver,
        limiters,
        scheduler: scheduler.clone(),
        clock,
    });

    let app = build_router(state);

    let listener = TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {addr}: {e}"));
    info!(%addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");

    cleanup_stop.notify_one();
    let _ = cleanup.await;

    let report = scheduler.shutdown(SCHEDULER_DRAIN_DEADLINE).await;
    info!(
        drained = report.drained,
        in_flight_at_deadline = report.in_flight_at_deadline,
        delayed_lost = report.delayed_lost,
        "shutdown complete"
    );
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
        info!("received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
        info!("received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
