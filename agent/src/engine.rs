//! Timer-driven polling of a [`CounterSource`].
//!
//! [`MetricsEngine`] owns one background task per running session. Each tick
//! collects every metric category on a blocking thread, isolates per-category
//! failures, and hands the finished [`Sample`] to the caller's callback.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::{self, JoinError, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tracing::instrument::WithSubscriber;
use tracing::{debug, dispatcher, error, info, Dispatch};

use crate::collectors::{CounterSource, DiskDelta, NetDelta};
use crate::error::{ConfigError, EngineError, SampleError};
use crate::record::{MetricRecord, Sample, Tags};

/// Default interval between ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// How long an identical failure stays suppressed after being logged.
const SUPPRESS_REPEATS_FOR: Duration = Duration::from_secs(60 * 60);

const BYTES_PER_MB: u64 = 1024 * 1024;
const KB_PER_MB: f64 = 1024.0;

/// Counter source handle shared between a configuration and its pollers.
pub type SharedSource = Arc<Mutex<dyn CounterSource>>;

/// Settings for one polling session.
#[derive(Clone)]
pub struct Configuration {
    poll_interval: Duration,
    computer: Option<String>,
    source: SharedSource,
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("poll_interval", &self.poll_interval)
            .field("computer", &self.computer)
            .finish_non_exhaustive()
    }
}

impl Configuration {
    pub fn new(source: SharedSource) -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            computer: None,
            source,
        }
    }

    /// Wrap an owned source.
    pub fn for_source(source: impl CounterSource + 'static) -> Self {
        Self::new(Arc::new(Mutex::new(source)))
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Set the tick interval; it must be a whole number of seconds, at least one.
    pub fn set_poll_interval(&mut self, interval: Duration) -> Result<(), ConfigError> {
        if interval.as_secs() == 0 || interval.subsec_nanos() != 0 {
            return Err(ConfigError::InvalidPollInterval(interval));
        }
        self.poll_interval = interval;
        Ok(())
    }

    pub fn computer(&self) -> Option<&str> {
        self.computer.as_deref()
    }

    pub fn set_computer(&mut self, computer: Option<String>) {
        self.computer = computer;
    }
}

/// Something that can run a polling session, such as [`MetricsEngine`].
pub trait Poller: Send {
    /// Begin polling; `callback` receives one sample per tick.
    fn start<F>(&mut self, config: &Configuration, callback: F) -> Result<(), EngineError>
    where
        F: FnMut(Sample) -> anyhow::Result<()> + Send + 'static;

    /// Stop polling and wait for an in-flight tick. A no-op when idle.
    fn stop(&mut self) -> impl Future<Output = ()> + Send;

    fn is_running(&self) -> bool;
}

struct Session {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Polls a [`CounterSource`] on a fixed interval from a tokio task.
#[derive(Default)]
pub struct MetricsEngine {
    session: Option<Session>,
}

impl MetricsEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Poller for MetricsEngine {
    fn start<F>(&mut self, config: &Configuration, callback: F) -> Result<(), EngineError>
    where
        F: FnMut(Sample) -> anyhow::Result<()> + Send + 'static,
    {
        if self.is_running() {
            return Err(EngineError::AlreadyRunning);
        }
        let runtime = tokio::runtime::Handle::try_current()?;

        let period = config.poll_interval();
        info!(
            interval_secs = period.as_secs(),
            "Starting polling at interval {}",
            period.as_secs()
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let dispatch = dispatcher::get_default(Dispatch::clone);
        let worker = PollingWorker::new(config, callback);
        let handle = runtime.spawn(
            worker
                .run(period, shutdown_rx, dispatch.clone())
                .with_subscriber(dispatch),
        );

        self.session = Some(Session { shutdown, handle });
        Ok(())
    }

    async fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        // The task may already have exited on its own.
        let _ = session.shutdown.send(true);
        if let Err(e) = session.handle.await {
            error!(error = %e, "polling task failed");
        }
    }

    fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| !session.handle.is_finished())
    }
}

/// Baseline the source, wait `settle`, and collect a single sample.
pub async fn sample_once(config: &Configuration, settle: Duration) -> anyhow::Result<Sample> {
    let dispatch = dispatcher::get_default(Dispatch::clone);
    let worker = PollingWorker::new(config, |_: Sample| -> anyhow::Result<()> { Ok(()) });
    let (worker, ()) = worker.blocking(&dispatch, |w| w.baseline()).await?;
    time::sleep(settle).await;
    let (_, sample) = worker.blocking(&dispatch, |w| w.collect()).await?;
    Ok(sample?)
}

struct SavedFailure {
    message: String,
    expires: Instant,
}

/// State owned by one polling session's background task.
struct PollingWorker<F> {
    source: SharedSource,
    computer: Option<String>,
    callback: F,
    failures: HashMap<&'static str, SavedFailure>,
}

fn lock(source: &SharedSource) -> MutexGuard<'_, dyn CounterSource + 'static> {
    source.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<F> PollingWorker<F>
where
    F: FnMut(Sample) -> anyhow::Result<()> + Send + 'static,
{
    fn new(config: &Configuration, callback: F) -> Self {
        Self {
            source: Arc::clone(&config.source),
            computer: config.computer.clone(),
            callback,
            failures: HashMap::new(),
        }
    }

    async fn run(self, period: Duration, shutdown: watch::Receiver<bool>, dispatch: Dispatch) {
        if let Err(e) = self.poll(period, shutdown, &dispatch).await {
            error!(error = %e, "polling aborted");
        }
        info!("Stopping polling");
    }

    async fn poll(
        mut self,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
        dispatch: &Dispatch,
    ) -> anyhow::Result<()> {
        let (worker, ()) = self.blocking(dispatch, Self::baseline).await?;
        self = worker;

        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return Ok(()),
                _ = ticker.tick() => {}
            }
            let (worker, result) = self.blocking(dispatch, Self::tick).await?;
            result?;
            self = worker;
        }
    }

    /// Run `work` on the blocking pool with the session's subscriber installed.
    async fn blocking<T, W>(self, dispatch: &Dispatch, work: W) -> Result<(Self, T), JoinError>
    where
        T: Send + 'static,
        W: FnOnce(&mut Self) -> T + Send + 'static,
    {
        let dispatch = dispatch.clone();
        let mut worker = self;
        task::spawn_blocking(move || {
            let out = dispatcher::with_default(&dispatch, || work(&mut worker));
            (worker, out)
        })
        .await
    }

    fn baseline(&mut self) {
        let source = Arc::clone(&self.source);
        let result = lock(&source).baseline();
        match result {
            Ok(times) => debug!(
                uptime_secs = times.uptime_secs,
                idle_secs = times.idle_secs,
                "baseline captured"
            ),
            Err(e) => self.report("baseline", &e),
        }
    }

    fn tick(&mut self) -> Result<(), SampleError> {
        let sample = self.collect()?;
        debug!(records = sample.len(), "sample collected");
        if let Err(e) = (self.callback)(sample) {
            error!(error = %format!("{e:#}"), "sample callback failed");
        }
        Ok(())
    }

    /// Collect every category into one sample.
    ///
    /// Only `BaselineMissing` escapes; other failures omit their category.
    fn collect(&mut self) -> Result<Sample, SampleError> {
        let source = Arc::clone(&self.source);
        let mut source = lock(&source);
        let mut sample = Sample::new();

        source.start_sample();
        let results = [
            ("liveness", self.liveness(&mut sample)),
            ("memory", self.memory(&mut *source, &mut sample)),
            ("processor", self.processor(&mut *source, &mut sample)),
            ("logical_disks", self.logical_disks(&mut *source, &mut sample)),
            ("network", self.network(&mut *source, &mut sample)),
        ];
        source.end_sample();
        drop(source);

        for (category, result) in results {
            match result {
                Ok(()) => {}
                Err(SampleError::BaselineMissing) => return Err(SampleError::BaselineMissing),
                Err(e) => self.report(category, &e),
            }
        }
        Ok(sample)
    }

    /// Log a category failure unless the same one was logged within the hour.
    fn report(&mut self, category: &'static str, err: &SampleError) {
        let message = err.to_string();
        let now = Instant::now();
        if let Some(saved) = self.failures.get(category) {
            if saved.message == message && now < saved.expires {
                return;
            }
        }
        error!(category, error = %message, "{category}: {message}");
        self.failures.insert(
            category,
            SavedFailure {
                message,
                expires: now + SUPPRESS_REPEATS_FOR,
            },
        );
    }

    fn record(&self, namespace: &str, name: &str, value: f64, tags: &Tags) -> MetricRecord {
        MetricRecord::new(
            namespace,
            name,
            value,
            tags,
            self.computer.as_deref(),
            Utc::now(),
        )
    }

    fn liveness(&self, sample: &mut Sample) -> Result<(), SampleError> {
        sample.push(self.record("Computer", "Heartbeat", 1.0, &Tags::new()));
        Ok(())
    }

    fn memory(
        &self,
        source: &mut dyn CounterSource,
        sample: &mut Sample,
    ) -> Result<(), SampleError> {
        let info = source.available_memory_kb()?;
        let total_mb = info.total_kb as f64 / KB_PER_MB;
        let tags = Tags::new().with("memorySizeMB", total_mb);
        sample.push(self.record(
            "Memory",
            "AvailableMB",
            info.available_kb as f64 / KB_PER_MB,
            &tags,
        ));
        Ok(())
    }

    fn processor(
        &self,
        source: &mut dyn CounterSource,
        sample: &mut Sample,
    ) -> Result<(), SampleError> {
        let times = source.cpu_idle_delta()?;
        if times.uptime_secs <= 0.0 {
            debug!(category = "processor", "uptime delta is zero");
            return Ok(());
        }
        let cpus = source.cpu_count()?;
        let utilization = 100.0 - 100.0 * times.idle_secs / (times.uptime_secs * cpus as f64);
        let tags = Tags::new().with("totalCpus", cpus);
        sample.push(self.record("Processor", "UtilizationPercentage", utilization, &tags));
        Ok(())
    }

    fn logical_disks(
        &self,
        source: &mut dyn CounterSource,
        sample: &mut Sample,
    ) -> Result<(), SampleError> {
        for fs in source.filesystems()? {
            let tags = Tags::new().with("mountId", fs.mount_point.as_str());
            sample.push(self.record("LogicalDisk", "Status", 1.0, &tags));
            sample.push(self.record(
                "LogicalDisk",
                "FreeSpacePercentage",
                100.0 * fs.free_bytes as f64 / fs.size_bytes as f64,
                &tags,
            ));
            sample.push(self.record(
                "LogicalDisk",
                "FreeSpaceMB",
                (fs.free_bytes / BYTES_PER_MB) as f64,
                &tags.clone().with("diskSizeMB", fs.size_bytes / BYTES_PER_MB),
            ));

            match source.disk_stats(&fs.device_name) {
                Ok(perf) => self.disk_performance(&perf, &tags, sample),
                Err(SampleError::BaselineMissing) => return Err(SampleError::BaselineMissing),
                Err(e) => debug!(
                    category = "logical_disks",
                    device = %fs.device_name,
                    error = %e,
                    "no disk performance counters"
                ),
            }
        }
        Ok(())
    }

    fn disk_performance(&self, perf: &DiskDelta, tags: &Tags, sample: &mut Sample) {
        let secs = perf.delta_time_secs;
        if secs <= 0.0 {
            return;
        }
        let mut push = |name: &str, count: u64| {
            sample.push(self.record("LogicalDisk", name, count as f64 / secs, tags));
        };
        push("ReadsPerSecond", perf.reads);
        push("WritesPerSecond", perf.writes);
        push("TransfersPerSecond", perf.reads.saturating_add(perf.writes));
        if let Some(read) = perf.bytes_read {
            push("ReadBytesPerSecond", read);
        }
        if let Some(written) = perf.bytes_written {
            push("WriteBytesPerSecond", written);
        }
        if let (Some(read), Some(written)) = (perf.bytes_read, perf.bytes_written) {
            push("BytesPerSecond", read.saturating_add(written));
        }
    }

    fn network(
        &self,
        source: &mut dyn CounterSource,
        sample: &mut Sample,
    ) -> Result<(), SampleError> {
        for delta in source.net_stats()? {
            if delta.delta_time_secs <= 0.0 {
                continue;
            }
            sample.push(self.network_record(&delta, "ReadBytesPerSecond", delta.bytes_received));
            sample.push(self.network_record(&delta, "WriteBytesPerSecond", delta.bytes_sent));
        }
        Ok(())
    }

    fn network_record(&self, delta: &NetDelta, name: &str, bytes: u64) -> MetricRecord {
        let tags = Tags::new()
            .with("networkDeviceId", delta.device.as_str())
            .with("bytes", bytes);
        self.record(
            "Network",
            name,
            bytes as f64 / delta.delta_time_secs,
            &tags,
        )
    }
}
