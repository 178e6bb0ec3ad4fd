//! Capture scheduling
//!
//! Page mutations are coalesced by a debounce timer into one capture pass.
//! An unconditional one-shot capture also runs shortly after start, for pages
//! that finished rendering before anything was watching them. Timers sit
//! behind [`Timer`] so tests can fire them by hand.

use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};

use crate::capture::{CaptureOutcome, CapturePipeline};

pub type TimerJob = BoxFuture<'static, ()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

pub trait Timer: Send + Sync {
    fn schedule(&self, delay: Duration, job: TimerJob) -> TimerId;
    /// Cancel a pending job. Jobs that already started run to completion.
    fn cancel(&self, id: TimerId);
}

/// Timer backed by tokio tasks
#[derive(Default)]
pub struct TokioTimer {
    next_id: AtomicU64,
    tasks: Arc<Mutex<HashMap<TimerId, AbortHandle>>>,
}

impl TokioTimer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Timer for TokioTimer {
    fn schedule(&self, delay: Duration, job: TimerJob) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let tasks = self.tasks.clone();

        // Hold the map while spawning so a zero-delay job cannot unregister
        // itself before it is registered
        let mut registered = match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Ok(mut tasks) = tasks.lock() {
                tasks.remove(&id);
            }
            job.await;
        });
        registered.insert(id, handle.abort_handle());
        id
    }

    fn cancel(&self, id: TimerId) {
        if let Ok(mut tasks) = self.tasks.lock() {
            if let Some(handle) = tasks.remove(&id) {
                handle.abort();
            }
        }
    }
}

/// Timer that only fires when told to
#[derive(Default)]
pub struct ManualTimer {
    next_id: AtomicU64,
    pending: Mutex<BTreeMap<TimerId, (Duration, TimerJob)>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn pending_delays(&self) -> Vec<Duration> {
        self.pending
            .lock()
            .map(|p| p.values().map(|(delay, _)| *delay).collect())
            .unwrap_or_default()
    }

    /// Run every pending job in scheduling order, returning how many ran
    pub async fn fire_all(&self) -> usize {
        let jobs = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => return 0,
        };
        let count = jobs.len();
        for (_, (_, job)) in jobs {
            job.await;
        }
        count
    }
}

impl Timer for ManualTimer {
    fn schedule(&self, delay: Duration, job: TimerJob) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, (delay, job));
        }
        id
    }

    fn cancel(&self, id: TimerId) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
    }
}

/// Kind of DOM change reported in a mutation batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    ChildList,
    Subtree,
    CharacterData,
    Attributes,
}

impl Mutation {
    fn triggers_capture(&self) -> bool {
        !matches!(self, Mutation::Attributes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Debouncing,
}

struct PendingCapture {
    generation: u64,
    timer: TimerId,
}

pub struct MutationScheduler {
    pipeline: Arc<CapturePipeline>,
    timer: Arc<dyn Timer>,
    debounce: Duration,
    initial_delay: Duration,
    generation: AtomicU64,
    pending: Mutex<Option<PendingCapture>>,
}

impl MutationScheduler {
    pub fn new(
        pipeline: Arc<CapturePipeline>,
        timer: Arc<dyn Timer>,
        debounce: Duration,
        initial_delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            pipeline,
            timer,
            debounce,
            initial_delay,
            generation: AtomicU64::new(0),
            pending: Mutex::new(None),
        })
    }

    pub fn state(&self) -> SchedulerState {
        match self.pending.lock() {
            Ok(pending) if pending.is_some() => SchedulerState::Debouncing,
            _ => SchedulerState::Idle,
        }
    }

    /// Arm the one-shot initial capture
    pub fn start(self: &Arc<Self>) {
        let pipeline = self.pipeline.clone();
        info!("⏳ Initial capture in {:?}", self.initial_delay);
        self.timer.schedule(
            self.initial_delay,
            Box::pin(async move {
                let outcome = pipeline.capture_once().await;
                log_outcome("initial", &outcome);
            }),
        );
    }

    /// (Re)start the debounce window; bursts collapse into one capture
    pub fn on_mutation_batch(self: &Arc<Self>, mutations: &[Mutation]) {
        if !mutations.iter().any(Mutation::triggers_capture) {
            return;
        }

        let Ok(mut pending) = self.pending.lock() else {
            return;
        };
        if let Some(previous) = pending.take() {
            self.timer.cancel(previous.timer);
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let scheduler = Arc::downgrade(self);
        let timer = self.timer.schedule(
            self.debounce,
            Box::pin(async move {
                let Some(scheduler) = scheduler.upgrade() else {
                    return;
                };
                scheduler.finish_debounce(generation);
                let outcome = scheduler.pipeline.capture_once().await;
                log_outcome("mutation", &outcome);
            }),
        );
        *pending = Some(PendingCapture { generation, timer });
        debug!("⏱️  Debouncing capture #{}", generation);
    }

    fn finish_debounce(&self, generation: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            if pending.as_ref().map(|p| p.generation) == Some(generation) {
                *pending = None;
            }
        }
    }
}

fn log_outcome(trigger: &str, outcome: &CaptureOutcome) {
    match outcome {
        CaptureOutcome::Dispatched { count, delivered: true } => {
            info!("✅ {} capture saved {} turns", trigger, count)
        }
        CaptureOutcome::Dispatched { count, delivered: false } => {
            error!("❌ {} capture could not deliver {} turns", trigger, count)
        }
        other => debug!("{} capture: {:?}", trigger, other),
    }
}

pub struct CronCaptureConfig {
    pub cron_expression: String,
}

impl CronCaptureConfig {
    pub fn new(cron: String) -> Self {
        Self {
            cron_expression: cron,
        }
    }
}

/// Run capture passes on a cron schedule until Ctrl+C
pub async fn start_periodic_capture(config: CronCaptureConfig, pipeline: Arc<CapturePipeline>) -> Result<()> {
    let mut scheduler = JobScheduler::new().await?;

    info!("⏰ Scheduler initialized with cron: {}", config.cron_expression);

    let job = Job::new_async(config.cron_expression.as_str(), move |_uuid, _l| {
        let pipeline = pipeline.clone();
        Box::pin(async move {
            info!("🔄 Scheduled capture triggered");
            let outcome = pipeline.capture_once().await;
            log_outcome("scheduled", &outcome);
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    info!("🔄 Running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("🛑 Shutting down scheduler...");

    scheduler.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::test_support::RecordingTransport;
    use crate::page::StaticPageSource;

    const PAGE: &str = r#"<main>
        <div data-message-author-role="user">ping</div>
        <div data-message-author-role="assistant">pong</div>
    </main>"#;

    fn setup(html: &str) -> (Arc<MutationScheduler>, Arc<ManualTimer>, StaticPageSource, Arc<RecordingTransport>) {
        let source = StaticPageSource::new("https://chatgpt.com/c/1", html);
        let transport = Arc::new(RecordingTransport::default());
        let pipeline = Arc::new(CapturePipeline::new(Box::new(source.clone()), transport.clone(), 50));
        let timer = Arc::new(ManualTimer::new());
        let scheduler = MutationScheduler::new(
            pipeline,
            timer.clone(),
            Duration::from_millis(1000),
            Duration::from_millis(2000),
        );
        (scheduler, timer, source, transport)
    }

    #[tokio::test]
    async fn test_burst_coalesces_into_one_capture() {
        let (scheduler, timer, _, transport) = setup(PAGE);
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        scheduler.on_mutation_batch(&[Mutation::ChildList]);
        scheduler.on_mutation_batch(&[Mutation::CharacterData]);
        scheduler.on_mutation_batch(&[Mutation::Subtree, Mutation::Attributes]);
        assert_eq!(scheduler.state(), SchedulerState::Debouncing);
        assert_eq!(timer.pending(), 1);
        assert_eq!(timer.pending_delays(), vec![Duration::from_millis(1000)]);

        assert_eq!(timer.fire_all().await, 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_attribute_only_batch_is_ignored() {
        let (scheduler, timer, _, _) = setup(PAGE);
        scheduler.on_mutation_batch(&[Mutation::Attributes]);
        assert_eq!(timer.pending(), 0);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_initial_capture_is_independent_of_debounce() {
        let (scheduler, timer, _, transport) = setup(PAGE);
        scheduler.start();
        scheduler.on_mutation_batch(&[Mutation::ChildList]);
        assert_eq!(timer.pending(), 2);
        assert_eq!(
            timer.pending_delays(),
            vec![Duration::from_millis(2000), Duration::from_millis(1000)]
        );

        timer.fire_all().await;
        // Second pass finds nothing new
        assert_eq!(transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_new_turns_after_idle() {
        let (scheduler, timer, source, transport) = setup(PAGE);
        scheduler.on_mutation_batch(&[Mutation::ChildList]);
        timer.fire_all().await;

        source.set_html(&PAGE.replace("</main>", "<div data-message-author-role=\"user\">again</div></main>"));
        scheduler.on_mutation_batch(&[Mutation::ChildList]);
        timer.fire_all().await;
        assert_eq!(transport.sent_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_timer_debounces() {
        let timer = TokioTimer::new();
        let fired = Arc::new(AtomicU64::new(0));

        let counter = fired.clone();
        let first = timer.schedule(
            Duration::from_millis(1000),
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
        timer.cancel(first);

        let counter = fired.clone();
        timer.schedule(
            Duration::from_millis(1000),
            Box::pin(async move {
                counter.fetch_add(10, Ordering::SeqCst);
            }),
        );
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }
}
