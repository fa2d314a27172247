//! Fixed-interval poll scheduler.
//!
//! Two states, `Stopped` and `Running`. While running, a background task
//! repeats one cycle:
//!
//! 1. window = `[now - interval, now)`
//! 2. collect document paths for the window
//! 3. extract + upsert each path, in order
//! 4. sleep for `interval`
//!
//! Stop is observed before and after every cycle and wakes the sleep early;
//! a cycle already in progress is allowed to finish. A failing document, a
//! failing upsert or a failing mailbox listing is logged and recorded in the
//! status; the loop keeps going.
//!
//! Each start bumps a generation number and the spawned loop only runs while
//! its generation is current. Every cycle, whether from the loop or
//! [`PollScheduler::run_once`], holds one shared cycle lock, so a stop
//! followed by a quick start makes the new loop wait for the old loop's
//! cycle to finish before it runs its own.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use po_intake_core::classify::OrderClassifier;
use po_intake_core::models::TimeWindow;
use po_intake_core::store::OrderRepository;

use crate::config::Config;
use crate::extractor::{build_extractor, DocumentExtractor};
use crate::fetch::FileFetcher;
use crate::ingest::{DocumentSource, IngestionOrchestrator};
use crate::mailbox::{build_mailbox, MailboxProvider};
use crate::process::process_document;
use crate::repository::SqliteOrderRepository;
use crate::{db, migrate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Started,
    AlreadyRunning,
    Stopped,
    AlreadyStopped,
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub window: TimeWindow,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub documents_found: usize,
    pub orders_created: usize,
    pub orders_updated: usize,
    /// One entry per document or listing that failed.
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval_secs: u64,
    pub cycles_completed: u64,
    pub last_cycle: Option<CycleReport>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
struct RunState {
    running: bool,
    generation: u64,
}

#[derive(Default)]
struct Stats {
    cycles_completed: u64,
    last_cycle: Option<CycleReport>,
    last_error: Option<String>,
}

struct Inner {
    source: Arc<dyn DocumentSource>,
    extractor: Arc<dyn DocumentExtractor>,
    repository: Arc<dyn OrderRepository>,
    interval: Duration,
    state: watch::Sender<RunState>,
    stats: Mutex<Stats>,
    /// Held for the whole of a cycle; at most one cycle runs at a time.
    cycle_lock: tokio::sync::Mutex<()>,
}

/// Cheap to clone; clones share the same loop and status.
#[derive(Clone)]
pub struct PollScheduler {
    inner: Arc<Inner>,
}

impl PollScheduler {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        extractor: Arc<dyn DocumentExtractor>,
        repository: Arc<dyn OrderRepository>,
        interval: Duration,
    ) -> Self {
        let (state, _) = watch::channel(RunState::default());
        Self {
            inner: Arc::new(Inner {
                source,
                extractor,
                repository,
                interval,
                state,
                stats: Mutex::new(Stats::default()),
                cycle_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.borrow().running
    }

    /// Spawns the polling loop. Must be called inside a tokio runtime.
    pub fn start(&self) -> Transition {
        let mut generation = 0;
        let started = self.inner.state.send_if_modified(|state| {
            if state.running {
                return false;
            }
            state.running = true;
            state.generation += 1;
            generation = state.generation;
            true
        });
        if !started {
            return Transition::AlreadyRunning;
        }

        info!(interval_secs = self.inner.interval.as_secs(), "scheduler started");
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run_loop(generation).await });
        Transition::Started
    }

    pub fn stop(&self) -> Transition {
        let stopped = self.inner.state.send_if_modified(|state| {
            if !state.running {
                return false;
            }
            state.running = false;
            true
        });
        if stopped {
            info!("scheduler stopped");
            Transition::Stopped
        } else {
            Transition::AlreadyStopped
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let running = self.is_running();
        let (cycles_completed, last_cycle, last_error) = match self.inner.stats.lock() {
            Ok(stats) => (
                stats.cycles_completed,
                stats.last_cycle.clone(),
                stats.last_error.clone(),
            ),
            Err(_) => (0, None, Some("scheduler status unavailable".to_string())),
        };
        SchedulerStatus {
            running,
            interval_secs: self.inner.interval.as_secs(),
            cycles_completed,
            last_cycle,
            last_error,
        }
    }

    /// Runs a single cycle over the window ending now, outside the loop.
    /// Waits for a cycle already in progress to finish first.
    pub async fn run_once(&self) -> CycleReport {
        let _cycle = self.inner.cycle_lock.lock().await;
        self.inner.cycle().await
    }

    /// Resolves once the scheduler is stopped.
    pub async fn wait_stopped(&self) {
        let mut rx = self.inner.state.subscribe();
        loop {
            if !rx.borrow_and_update().running {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        let state = self.state.borrow();
        state.running && state.generation == generation
    }

    async fn run_loop(self: Arc<Self>, generation: u64) {
        let mut rx = self.state.subscribe();
        loop {
            {
                let _cycle = self.cycle_lock.lock().await;
                // Checked under the lock: a stop may land while waiting.
                if !self.is_current(generation) {
                    break;
                }
                self.cycle().await;
            }
            if !self.is_current(generation) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = superseded(&mut rx, generation) => break,
            }
        }
    }

    /// Callers hold `cycle_lock`.
    async fn cycle(&self) -> CycleReport {
        let started_at = Utc::now();
        // Intervals beyond chrono's range reach back as far as possible.
        let length = chrono::Duration::from_std(self.interval).unwrap_or(chrono::Duration::MAX);
        let window = TimeWindow::trailing(started_at, length);

        let mut report = CycleReport {
            window,
            started_at,
            finished_at: started_at,
            documents_found: 0,
            orders_created: 0,
            orders_updated: 0,
            failures: Vec::new(),
        };

        match self.source.collect(window).await {
            Ok(paths) => {
                report.documents_found = paths.len();
                for path in &paths {
                    match process_document(self.extractor.as_ref(), self.repository.as_ref(), path)
                        .await
                    {
                        Ok(outcome) if outcome.is_duplicate => report.orders_updated += 1,
                        Ok(_) => report.orders_created += 1,
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "document failed");
                            report.failures.push(format!("{}: {}", path.display(), e));
                        }
                    }
                }
            }
            Err(e) => {
                error!(window = %window, error = %format!("{:#}", e), "ingestion failed");
                report.failures.push(format!("{:#}", e));
            }
        }

        report.finished_at = Utc::now();
        info!(
            window = %window,
            documents = report.documents_found,
            created = report.orders_created,
            updated = report.orders_updated,
            failures = report.failures.len(),
            "poll cycle complete"
        );

        if let Ok(mut stats) = self.stats.lock() {
            stats.cycles_completed += 1;
            stats.last_error = report.failures.last().cloned().or(stats.last_error.take());
            stats.last_cycle = Some(report.clone());
        }
        report
    }
}

/// Everything a running scheduler needs, wired from configuration.
pub struct Pipeline {
    pub mailbox: Arc<dyn MailboxProvider>,
    pub repository: Arc<dyn OrderRepository>,
    pub extractor: Arc<dyn DocumentExtractor>,
    pub scheduler: PollScheduler,
}

impl Pipeline {
    /// Connects the database, opens the mailbox and builds the extractor.
    /// Credential or connection failures surface here, before any cycle.
    pub async fn build(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        let repository: Arc<dyn OrderRepository> = Arc::new(SqliteOrderRepository::new(pool));
        let extractor = build_extractor(config)?;

        let mailbox = build_mailbox(config)?;
        mailbox.open().await?;
        let orchestrator = IngestionOrchestrator::new(
            mailbox.clone(),
            OrderClassifier::new(config.classifier.keyword_set()),
            FileFetcher::new(&config.fetch)?,
            config.mailbox.label.clone(),
        );
        let scheduler = PollScheduler::new(
            Arc::new(orchestrator),
            extractor.clone(),
            repository.clone(),
            Duration::from_secs(config.scheduler.interval_secs),
        );

        Ok(Self {
            mailbox,
            repository,
            extractor,
            scheduler,
        })
    }

    /// Stops polling and releases the mailbox.
    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.stop();
        self.mailbox.close().await
    }
}

/// `poll` command: runs the scheduler in the foreground until Ctrl-C.
pub async fn run_poll(config: &Config) -> Result<()> {
    let pipeline = Pipeline::build(config).await?;
    pipeline.scheduler.start();
    println!(
        "polling {} every {}s (Ctrl-C to stop)",
        pipeline.mailbox.name(),
        config.scheduler.interval_secs
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = pipeline.scheduler.wait_stopped() => {}
    }
    pipeline.shutdown().await?;

    let status = pipeline.scheduler.status();
    println!("cycles: {}", status.cycles_completed);
    if let Some(err) = status.last_error {
        println!("last_error: {}", err);
    }
    println!("ok");
    Ok(())
}

/// Resolves when the loop of `generation` should exit.
async fn superseded(rx: &mut watch::Receiver<RunState>, generation: u64) {
    loop {
        let current = {
            let state = rx.borrow_and_update();
            state.running && state.generation == generation
        };
        if !current {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
