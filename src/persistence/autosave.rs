//! Periodic background saves.
//!
//! A tick that finds the model locked (a load is replacing it, or the UI is
//! mid-edit) is skipped, never queued behind the lock. Saves run one after
//! another inside a single task, so two autosaves never overlap.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::error::Result;
use super::persist::{AUTOSAVE_FILE_NAME, ByteSink, PersistenceService, versioned_file_name_now};
use crate::graph_utils::graph::GraphModel;

pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct AutosaveConfig {
    pub interval: Duration,
    pub passphrase: Option<String>,
    /// Also keep a timestamped copy per save.
    pub versioned: bool,
    pub file_name: String,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_AUTOSAVE_INTERVAL,
            passphrase: None,
            versioned: false,
            file_name: AUTOSAVE_FILE_NAME.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct AutosaveStats {
    saved: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl AutosaveStats {
    pub fn saved(&self) -> u64 {
        self.saved.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Save `model` once unless someone else holds it.
///
/// Returns `Ok(None)` for a skipped tick, otherwise the path of the active
/// autosave file.
pub async fn autosave_once(
    model: &Mutex<GraphModel>,
    service: &PersistenceService,
    sink: &dyn ByteSink,
    config: &AutosaveConfig,
) -> Result<Option<PathBuf>> {
    // Only the snapshot happens under the lock; encoding and encryption
    // run after it is released.
    let doc = {
        let Ok(guard) = model.try_lock() else {
            return Ok(None);
        };
        guard.snapshot()
    };
    let bytes = service.save_document(doc, config.passphrase.as_deref()).await?;
    let path = sink.write_named(&config.file_name, &bytes)?;
    if config.versioned {
        sink.write_named(&versioned_file_name_now(), &bytes)?;
    }
    Ok(Some(path))
}

/// Running autosave task; stops when dropped.
pub struct AutosaveHandle {
    task: JoinHandle<()>,
    stats: Arc<AutosaveStats>,
}

impl AutosaveHandle {
    pub fn stats(&self) -> &AutosaveStats {
        &self.stats
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for AutosaveHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct Autosaver;

impl Autosaver {
    pub fn spawn(
        model: Arc<Mutex<GraphModel>>,
        service: PersistenceService,
        sink: Arc<dyn ByteSink>,
        config: AutosaveConfig,
    ) -> AutosaveHandle {
        let stats = Arc::new(AutosaveStats::default());
        let task_stats = Arc::clone(&stats);
        info!("autosave every {:?} to {}", config.interval, config.file_name);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match autosave_once(&model, &service, sink.as_ref(), &config).await {
                    Ok(Some(path)) => {
                        task_stats.saved.fetch_add(1, Ordering::Relaxed);
                        debug!("autosaved to {}", path.display());
                    }
                    Ok(None) => {
                        task_stats.skipped.fetch_add(1, Ordering::Relaxed);
                        debug!("autosave skipped: model busy");
                    }
                    Err(e) => {
                        task_stats.failed.fetch_add(1, Ordering::Relaxed);
                        warn!("autosave failed: {}", e);
                    }
                }
            }
        });
        AutosaveHandle { task, stats }
    }
}
