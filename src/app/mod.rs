use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use crossbeam::channel::{Receiver, Sender, unbounded};
use serde::Serialize;

use crate::config::Config;
use crate::core::lock::lock_mutex_with_timeout;
use crate::core::timestamp::NS_PER_SEC;
use crate::core::{CaptureSource, ReplayError, ReplayResult, StorageSink};
use crate::flush::{FlushCoordinator, FlushResult, FlushStats, TriggerHandle, TriggerLoop};
use crate::producers;
use crate::recorder::{Catalog, FsRetention, FsSink, RecordingEntry, RetentionPolicy};
use crate::ring::RingWindow;
use crate::session::{CaptureSession, SessionEvent, SessionStats};

/// User-facing outcome of a save, as the status line shows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Saved { location: String },
    Failed { message: String },
}

impl Notice {
    fn from_result(result: &FlushResult) -> Self {
        match result {
            Ok(artifact) => Notice::Saved {
                location: artifact.location.display().to_string(),
            },
            Err(err) => Notice::Failed {
                message: err.to_string(),
            },
        }
    }

    pub fn status_line(&self) -> String {
        match self {
            Notice::Saved { location } => format!("Saved ✔ {}", location),
            Notice::Failed { message } => format!("Error: {}", message),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppStatus {
    pub session: SessionStats,
    pub window_seconds: f64,
    pub buffered_segments: usize,
    pub buffered_bytes: u64,
    pub buffered_seconds: f64,
    pub saves_completed: u64,
    pub saves_failed: u64,
    pub saves_rejected: u64,
    pub save_in_flight: bool,
}

/// Wires one ring window, capture session, flush coordinator, trigger loop
/// and recordings catalog together.
pub struct ReplayApp {
    config: Config,
    ring: Arc<RingWindow>,
    session: CaptureSession,
    coordinator: FlushCoordinator,
    trigger: TriggerHandle,
    trigger_loop: Option<TriggerLoop>,
    catalog: Catalog,
    notices: Receiver<Notice>,
}

impl ReplayApp {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let sink = FsSink::new(
            &config.storage.dir,
            &config.storage.prefix,
            &config.storage.extension,
        );
        Self::with_sink(config, Box::new(sink))
    }

    pub fn with_sink(config: Config, sink: Box<dyn StorageSink>) -> anyhow::Result<Self> {
        config.validate()?;

        let ring = Arc::new(RingWindow::with_name("replay", config.window())?);
        let coordinator = FlushCoordinator::new(sink);
        let catalog = Catalog::new(&config.storage.dir, &config.storage.extension);

        let retention: Option<Mutex<FsRetention>> =
            if config.retention.keep_last.is_some() || config.retention.max_age_days.is_some() {
                Some(Mutex::new(FsRetention::new(
                    Catalog::new(&config.storage.dir, &config.storage.extension),
                    config.retention.keep_last,
                    config.retention.max_age_days,
                )))
            } else {
                None
            };

        let (notice_tx, notices) = unbounded();
        let (trigger, trigger_loop) = crate::flush::spawn_trigger_loop(
            coordinator.clone(),
            ring.clone(),
            move |result| report(&notice_tx, retention.as_ref(), result),
        )?;

        Ok(Self {
            config,
            ring,
            session: CaptureSession::new(),
            coordinator,
            trigger,
            trigger_loop: Some(trigger_loop),
            catalog,
            notices,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ring(&self) -> &Arc<RingWindow> {
        &self.ring
    }

    pub fn start_capture(&mut self) -> anyhow::Result<()> {
        let source = producers::build_source(&self.config.source)?;
        self.start_with_source(source)?;
        Ok(())
    }

    pub fn start_with_source(&mut self, source: Box<dyn CaptureSource>) -> ReplayResult<()> {
        self.session.start(source, self.ring.clone())
    }

    pub fn stop_capture(&mut self) {
        self.session.stop();
    }

    /// Fires a save through the trigger loop; the outcome arrives as a
    /// [`Notice`]. Returns `false` only after shutdown.
    pub fn request_save(&self) -> bool {
        self.trigger.fire()
    }

    /// Saves synchronously, bypassing the trigger loop.
    pub fn save_now(&self) -> FlushResult {
        self.coordinator.flush(&self.ring)
    }

    pub fn trigger(&self) -> TriggerHandle {
        self.trigger.clone()
    }

    pub fn notices(&self) -> &Receiver<Notice> {
        &self.notices
    }

    pub fn session_events(&self) -> Receiver<SessionEvent> {
        self.session.subscribe()
    }

    pub fn take_source_failure(&self) -> Option<ReplayError> {
        self.session.take_failure()
    }

    pub fn set_window_seconds(&mut self, secs: u64) -> ReplayResult<()> {
        self.ring.set_window(Duration::from_secs(secs))?;
        self.config.replay.window_seconds = secs;
        Ok(())
    }

    pub fn list_recordings(&self) -> anyhow::Result<Vec<RecordingEntry>> {
        self.catalog.list()
    }

    pub fn status(&self) -> AppStatus {
        let window = self.ring.stats();
        let FlushStats {
            completed,
            failed,
            rejected,
        } = self.coordinator.stats();

        AppStatus {
            session: self.session.stats(),
            window_seconds: window.window_ns as f64 / NS_PER_SEC as f64,
            buffered_segments: window.segments,
            buffered_bytes: window.bytes,
            buffered_seconds: window.span_ns as f64 / NS_PER_SEC as f64,
            saves_completed: completed,
            saves_failed: failed,
            saves_rejected: rejected,
            save_in_flight: self.coordinator.is_in_flight(),
        }
    }

    /// Stops capture, then lets any in-flight save finish.
    pub fn shutdown(&mut self) {
        self.session.stop();
        if let Some(trigger_loop) = self.trigger_loop.take() {
            trigger_loop.shutdown();
        }
    }
}

impl Drop for ReplayApp {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn report(notice_tx: &Sender<Notice>, retention: Option<&Mutex<FsRetention>>, result: FlushResult) {
    let notice = Notice::from_result(&result);
    match &result {
        Ok(_) => log::info!("[app] {}", notice.status_line()),
        Err(err) if err.is_transient() => log::warn!("[app] {}", notice.status_line()),
        Err(_) => log::error!("[app] {}", notice.status_line()),
    }

    if result.is_ok() {
        // Skipped while an earlier pass holds it; the next save catches up.
        let guard = retention.and_then(|r| {
            lock_mutex_with_timeout(r, "app.retention", Duration::from_millis(50))
        });
        if let Some(mut retention) = guard {
            match retention.run(SystemTime::now()) {
                Ok(0) => {}
                Ok(removed) => log::info!("[app] retention removed {} old replays", removed),
                Err(e) => log::warn!("[app] retention failed: {:#}", e),
            }
        }
    }

    let _ = notice_tx.send(notice);
}
