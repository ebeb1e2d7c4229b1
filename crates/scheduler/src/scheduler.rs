//! Worker-pool scheduler with delayed retries and a dead list.
//!
//! Submitters feed a bounded ingress channel; workers pull one task at a
//! time and execute it to completion. Retriable failures are re-admitted
//! through the delayed queue on a backoff schedule anchored to the task's
//! creation time, so worker latency cannot stretch a task's total
//! time-in-system. Everything else lands on the dead list.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify, RwLock};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use versenotes_core::Clock;
use versenotes_mailer::{MailError, Mailer, Template};

use crate::delay_queue::DelayQueue;
use crate::task::{DeadTask, Task, TaskKind};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub num_workers: usize,
    pub ingress_capacity: usize,
    pub poll_interval: Duration,
    /// Retry offsets from `created_at`, indexed by retry number.
    pub backoff_schedule: Vec<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_workers: 10,
            ingress_capacity: 100,
            poll_interval: Duration::from_secs(1),
            backoff_schedule: vec![
                Duration::from_secs(2 * 60),
                Duration::from_secs(4 * 60),
                Duration::from_secs(8 * 60),
            ],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The scheduler no longer accepts tasks.
    #[error("scheduler is shut down")]
    ShutDown,
}

/// Counts reported by [`Scheduler::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks workers finished after shutdown began.
    pub drained: u64,
    /// Executions still running when the deadline expired.
    pub in_flight_at_deadline: usize,
    /// Delayed tasks abandoned in the queue.
    pub delayed_lost: usize,
}

/// Point-in-time scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub delayed: usize,
    pub dead: usize,
    pub in_flight: usize,
}

/// Handle to the scheduler. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    cfg: SchedulerConfig,
    mailer: Arc<dyn Mailer>,
    clock: Arc<dyn Clock>,
    ingress_tx: RwLock<Option<mpsc::Sender<Task>>>,
    ingress_rx: std::sync::Mutex<Option<mpsc::Receiver<Task>>>,
    workers: std::sync::Mutex<Option<JoinSet<()>>>,
    delayed: std::sync::Mutex<DelayQueue>,
    dead: std::sync::Mutex<Vec<DeadTask>>,
    in_flight: AtomicUsize,
    drained_after_shutdown: AtomicU64,
    shutting_down: AtomicBool,
    started: AtomicBool,
    stop: Notify,
}

impl Scheduler {
    /// A scheduler is fully wired at construction; there is no window where
    /// a task could run without a mailer.
    pub fn new(cfg: SchedulerConfig, mailer: Arc<dyn Mailer>, clock: Arc<dyn Clock>) -> Self {
        let (tx, rx) = mpsc::channel(cfg.ingress_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                cfg,
                mailer,
                clock,
                ingress_tx: RwLock::new(Some(tx)),
                ingress_rx: std::sync::Mutex::new(Some(rx)),
                workers: std::sync::Mutex::new(None),
                delayed: std::sync::Mutex::new(DelayQueue::new()),
                dead: std::sync::Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                drained_after_shutdown: AtomicU64::new(0),
                shutting_down: AtomicBool::new(false),
                started: AtomicBool::new(false),
                stop: Notify::new(),
            }),
        }
    }

    /// Spawn the worker pool and the delay poller. Idempotent.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let Some(rx) = self.inner.ingress_rx.lock().unwrap().take() else {
            return;
        };
        let rx = Arc::new(AsyncMutex::new(rx));

        let mut workers = JoinSet::new();
        for worker_id in 0..self.inner.cfg.num_workers.max(1) {
            let inner = Arc::clone(&self.inner);
            let rx = Arc::clone(&rx);
            workers.spawn(worker_loop(inner, rx, worker_id));
        }
        workers.spawn(poller_loop(Arc::clone(&self.inner)));

        *self.inner.workers.lock().unwrap() = Some(workers);
        info!(
            workers = self.inner.cfg.num_workers,
            poll_interval_ms = self.inner.cfg.poll_interval.as_millis() as u64,
            "scheduler started"
        );
    }

    /// Enqueue a task for immediate eligibility.
    ///
    /// Blocks while the ingress channel is full; submit from a background
    /// context rather than a request path carrying a client deadline.
    pub async fn submit(&self, task: Task) -> Result<(), SubmitError> {
        let tx = { self.inner.ingress_tx.read().await.clone() };
        let Some(tx) = tx else {
            return Err(SubmitError::ShutDown);
        };
        tx.send(task).await.map_err(|_| SubmitError::ShutDown)
    }

    /// Stop accepting submissions, drain in-flight work up to `deadline`,
    /// and report what happened.
    pub async fn shutdown(&self, deadline: Duration) -> ShutdownReport {
        info!("scheduler shutting down");
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        self.inner.stop.notify_one();

        // Dropping the last sender closes the ingress; workers exit once the
        // buffered tasks are drained.
        {
            *self.inner.ingress_tx.write().await = None;
        }

        let workers = { self.inner.workers.lock().unwrap().take() };
        let mut in_flight_at_deadline = 0;
        if let Some(mut workers) = workers {
            let drain = async {
                while workers.join_next().await.is_some() {}
            };
            if tokio::time::timeout(deadline, drain).await.is_err() {
                in_flight_at_deadline = self.inner.in_flight.load(Ordering::SeqCst);
                workers.abort_all();
            }
        }

        let report = ShutdownReport {
            drained: self.inner.drained_after_shutdown.load(Ordering::SeqCst),
            in_flight_at_deadline,
            delayed_lost: self.inner.delayed.lock().unwrap().len(),
        };
        info!(
            drained = report.drained,
            in_flight_at_deadline = report.in_flight_at_deadline,
            delayed_lost = report.delayed_lost,
            "scheduler stopped"
        );
        report
    }

    /// Snapshot of the dead list.
    pub fn dead_letters(&self) -> Vec<DeadTask> {
        self.inner.dead.lock().unwrap().clone()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            delayed: self.inner.delayed.lock().unwrap().len(),
            dead: self.inner.dead.lock().unwrap().len(),
            in_flight: self.inner.in_flight.load(Ordering::SeqCst),
        }
    }
}

async fn worker_loop(
    inner: Arc<Inner>,
    rx: Arc<AsyncMutex<mpsc::Receiver<Task>>>,
    worker_id: usize,
) {
    loop {
        let task = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(task) = task else {
            break;
        };

        let task_id = task.id;
        let kind = task.kind.name();

        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let outcome = AssertUnwindSafe(inner.process(task)).catch_unwind().await;
        inner.in_flight.fetch_sub(1, Ordering::SeqCst);

        if inner.shutting_down.load(Ordering::SeqCst) {
            inner.drained_after_shutdown.fetch_add(1, Ordering::SeqCst);
        }

        if outcome.is_err() {
            // At-most-once per attempt: a panicked execution is not re-queued.
            error!(
                worker = worker_id,
                task = %task_id,
                kind,
                "task execution panicked; task lost"
            );
        }
    }
    debug!(worker = worker_id, "worker stopped");
}

async fn poller_loop(inner: Arc<Inner>) {
    let mut tick = tokio::time::interval(inner.cfg.poll_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = inner.stop.notified() => break,
            _ = tick.tick() => inner.promote_due().await,
        }
    }
    debug!("delay poller stopped");
}

impl Inner {
    async fn process(&self, task: Task) {
        let (template, vars) = render_plan(&task.kind);
        let recipient = task.kind.recipient().to_string();

        match self.mailer.send(&recipient, template, &vars).await {
            Ok(()) => {
                debug!(task = %task.id, kind = task.kind.name(), "task completed");
            }
            Err(err) => {
                error!(
                    task = %task.id,
                    kind = task.kind.name(),
                    code = %err.code,
                    retriable = err.retriable,
                    metadata = ?err.metadata,
                    "mail send failed"
                );
                if err.retriable && task.retries < task.max_retries {
                    self.schedule_retry(task);
                } else {
                    self.dead_letter(task, &err);
                }
            }
        }
    }

    fn schedule_retry(&self, mut task: Task) {
        task.retries += 1;
        task.execute_at = task.created_at + backoff_offset(&self.cfg.backoff_schedule, task.retries);
        debug!(
            task = %task.id,
            retries = task.retries,
            execute_at = %task.execute_at,
            "retry scheduled"
        );
        self.delayed.lock().unwrap().push(task);
    }

    fn dead_letter(&self, task: Task, err: &MailError) {
        warn!(
            task = %task.id,
            kind = task.kind.name(),
            code = %err.code,
            retries = task.retries,
            "task dead-lettered"
        );
        let dead = DeadTask {
            reason: err.to_string(),
            dead_at: self.clock.now(),
            task,
        };
        self.dead.lock().unwrap().push(dead);
    }

    /// Drain every due task in one critical section over the queue, then
    /// feed them to the ingress outside the lock; workers scheduling retries
    /// must never wait behind a full channel.
    async fn promote_due(&self) {
        let now = self.clock.now();
        let due = {
            let mut delayed = self.delayed.lock().unwrap();
            let mut due = Vec::new();
            while delayed.peek().map_or(false, |t| t.execute_at <= now) {
                match delayed.pop() {
                    Some(task) => due.push(task),
                    None => break,
                }
            }
            due
        };

        for task in due {
            let tx = { self.ingress_tx.read().await.clone() };
            let Some(tx) = tx else {
                warn!(task = %task.id, "ingress closed; dropping due task");
                continue;
            };
            if let Err(send_err) = tx.send(task).await {
                warn!(task = %send_err.0.id, "ingress closed; dropping due task");
            }
        }
    }
}

fn backoff_offset(schedule: &[Duration], retries: u32) -> chrono::Duration {
    let index = (retries.max(1) as usize - 1).min(schedule.len().saturating_sub(1));
    let offset = schedule
        .get(index)
        .copied()
        .unwrap_or(Duration::from_secs(2 * 60));
    chrono::Duration::from_std(offset).unwrap_or_else(|_| chrono::Duration::minutes(2))
}

fn render_plan(kind: &TaskKind) -> (Template, HashMap<&'static str, String>) {
    match kind {
        TaskKind::ActivationMail(p) => (
            Template::UserWelcome,
            HashMap::from([
                ("username", p.username.clone()),
                ("activation_url", p.activation_url.clone()),
            ]),
        ),
        TaskKind::PasswordResetMail(p) => (
            Template::TokenPasswordReset,
            HashMap::from([("password_reset_url", p.password_reset_url.clone())]),
        ),
        TaskKind::TokenActivationMail(p) => (
            Template::TokenActivation,
            HashMap::from([("activation_url", p.activation_url.clone())]),
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use chrono::Utc;

    use versenotes_core::ManualClock;
    use versenotes_mailer::MailErrorCode;

    use super::*;
    use crate::task::ActivationMail;

    /// Mailer that replays a script of outcomes, then succeeds.
    struct ScriptedMailer {
        script: std::sync::Mutex<VecDeque<Option<MailErrorCode>>>,
        calls: AtomicUsize,
        recipients: std::sync::Mutex<Vec<String>>,
    }

    impl ScriptedMailer {
        fn new(script: Vec<Option<MailErrorCode>>) -> Arc<Self> {
            Arc::new(Self {
                script: std::sync::Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                recipients: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Mailer for ScriptedMailer {
        async fn send(
            &self,
            recipient: &str,
            _template: Template,
            _vars: &HashMap<&'static str, String>,
        ) -> Result<(), MailError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.recipients.lock().unwrap().push(recipient.to_string());
            match self.script.lock().unwrap().pop_front() {
                Some(Some(code)) => Err(MailError::new(code, "scripted failure")),
                _ => Ok(()),
            }
        }
    }

    fn test_config() -> SchedulerConfig {
        SchedulerConfig {
            num_workers: 2,
            ingress_capacity: 16,
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    fn activation_task(now: chrono::DateTime<Utc>, max_retries: u32) -> Task {
        Task::new(
            TaskKind::ActivationMail(ActivationMail {
                username: "alice".into(),
                email: "a@example.test".into(),
                activation_url: "https://example.test/v1/users/activated/T1".into(),
            }),
            max_retries,
            now,
        )
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cond()
    }


    #[tokio::test]
    async fn single_task_success_leaves_no_residue() {
        let mailer = ScriptedMailer::new(vec![]);
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let scheduler = Scheduler::new(test_config(), mailer.clone(), clock.clone());
        scheduler.start();

        scheduler
            .submit(activation_task(clock.now(), 3))
            .await
            .unwrap();

        assert!(wait_until(|| mailer.calls() == 1).await);
        let stats = scheduler.stats();
        assert_eq!(stats.delayed, 0);
        assert_eq!(stats.dead, 0);
        assert_eq!(
            mailer.recipients.lock().unwrap().clone(),
            vec!["a@example.test".to_string()]
        );

        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn retriable_failure_retries_at_created_at_plus_two_minutes() {
        let mailer = ScriptedMailer::new(vec![Some(MailErrorCode::NetworkFailure)]);
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let scheduler = Scheduler::new(test_config(), mailer.clone(), clock.clone());
        scheduler.start();

        scheduler.submit(activation_task(start, 3)).await.unwrap();

        assert!(wait_until(|| mailer.calls() == 1).await);

        // Between attempts the task sits in the delayed queue.
        assert!(wait_until(|| scheduler.stats().delayed == 1).await);

        // Just shy of the first backoff step nothing runs.
        clock.advance(chrono::Duration::seconds(2 * 60 - 1));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mailer.calls(), 1);

        // Crossing created_at + 2m promotes the retry.
        clock.advance(chrono::Duration::seconds(1));
        assert!(wait_until(|| mailer.calls() == 2).await);

        let stats = scheduler.stats();
        assert_eq!(stats.delayed, 0);
        assert_eq!(stats.dead, 0);

        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn exhausted_retries_dead_letter_after_four_attempts() {
        let mailer = ScriptedMailer::new(vec![
            Some(MailErrorCode::NetworkFailure),
            Some(MailErrorCode::NetworkFailure),
            Some(MailErrorCode::NetworkFailure),
            Some(MailErrorCode::NetworkFailure),
        ]);
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let scheduler = Scheduler::new(test_config(), mailer.clone(), clock.clone());
        scheduler.start();

        scheduler.submit(activation_task(start, 3)).await.unwrap();
        assert!(wait_until(|| mailer.calls() == 1).await);

        // Attempts land at t0+2m, t0+4m and t0+8m from the original creation.
        for (attempt, offset_secs) in [(2usize, 2 * 60i64), (3, 4 * 60), (4, 8 * 60)] {
            clock.set(start + chrono::Duration::seconds(offset_secs));
            assert!(wait_until(|| mailer.calls() == attempt).await);
        }

        assert!(wait_until(|| scheduler.dead_letters().len() == 1).await);

        let dead = scheduler.dead_letters();
        assert_eq!(dead[0].task.retries, 3);
        assert!(dead[0].reason.contains("NETWORK_FAILURE"));
        assert_eq!(scheduler.stats().delayed, 0);

        // The retry budget is spent; more time changes nothing.
        clock.advance(chrono::Duration::minutes(30));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mailer.calls(), 4);

        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn non_retriable_failure_dead_letters_immediately() {
        let mailer = ScriptedMailer::new(vec![Some(MailErrorCode::InvalidRecipient)]);
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let scheduler = Scheduler::new(test_config(), mailer.clone(), clock.clone());
        scheduler.start();

        scheduler
            .submit(activation_task(clock.now(), 3))
            .await
            .unwrap();

        assert!(wait_until(|| mailer.calls() == 1).await);
        assert!(wait_until(|| scheduler.dead_letters().len() == 1).await);

        let stats = scheduler.stats();
        assert_eq!(stats.delayed, 0);
        assert!(scheduler.dead_letters()[0]
            .reason
            .contains("INVALID_RECIPIENT"));

        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn shutdown_reports_abandoned_delayed_tasks() {
        let mailer = ScriptedMailer::new(vec![Some(MailErrorCode::NetworkFailure)]);
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let scheduler = Scheduler::new(test_config(), mailer.clone(), clock.clone());
        scheduler.start();

        scheduler
            .submit(activation_task(clock.now(), 3))
            .await
            .unwrap();
        assert!(wait_until(|| mailer.calls() == 1).await);
        assert!(wait_until(|| scheduler.stats().delayed == 1).await);

        let report = scheduler.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report.delayed_lost, 1);
        assert_eq!(report.in_flight_at_deadline, 0);

        let err = scheduler
            .submit(activation_task(clock.now(), 3))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::ShutDown));
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let mailer = ScriptedMailer::new(vec![]);
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let scheduler = Scheduler::new(test_config(), mailer.clone(), clock.clone());
        scheduler.start();
        scheduler.start();

        scheduler
            .submit(activation_task(clock.now(), 3))
            .await
            .unwrap();
        assert!(wait_until(|| mailer.calls() == 1).await);
        assert_eq!(mailer.calls(), 1);

        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[test]
    fn backoff_doubles_from_creation() {
        let schedule = SchedulerConfig::default().backoff_schedule;
        assert_eq!(backoff_offset(&schedule, 1), chrono::Duration::minutes(2));
        assert_eq!(backoff_offset(&schedule, 2), chrono::Duration::minutes(4));
        assert_eq!(backoff_offset(&schedule, 3), chrono::Duration::minutes(8));
        // Beyond the schedule the last step is reused.
        assert_eq!(backoff_offset(&schedule, 4), chrono::Duration::minutes(8));
    }
}
