//! Flip Loader - background loading into the store
//!
//! Sources are read outside the store lock. The store epoch is captured
//! before a load starts and compared again when the batch is applied, so a
//! load that straddles a `reset()` is dropped instead of resurrecting stale
//! flips.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

use crate::persistence::CsvFlipFiles;
use crate::store::FlipStore;
use crate::types::FlipRecord;

/// Anything that can produce a batch of flips for one display name
#[async_trait]
pub trait RecordSource: Send + Sync {
    fn display_name(&self) -> Option<&str>;

    async fn fetch(&self) -> Result<Vec<FlipRecord>>;
}

/// Flips stored in a display name's CSV file
#[derive(Debug, Clone)]
pub struct CsvRecordSource {
    files: CsvFlipFiles,
    display_name: String,
}

impl CsvRecordSource {
    pub fn new(files: CsvFlipFiles, display_name: impl Into<String>) -> Self {
        Self {
            files,
            display_name: display_name.into(),
        }
    }

    /// One source per flip file in the data directory
    pub fn discover(files: &CsvFlipFiles) -> Result<Vec<Self>> {
        Ok(files
            .display_names()?
            .into_iter()
            .map(|name| Self::new(files.clone(), name))
            .collect())
    }
}

#[async_trait]
impl RecordSource for CsvRecordSource {
    fn display_name(&self) -> Option<&str> {
        Some(&self.display_name)
    }

    async fn fetch(&self) -> Result<Vec<FlipRecord>> {
        let files = self.files.clone();
        let name = self.display_name.clone();
        tokio::task::spawn_blocking(move || files.load(&name))
            .await
            .context("Flip file reader panicked")?
    }
}

/// What happened to a load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Batch merged into the store
    Applied { records: usize },
    /// A reset happened while loading; batch discarded
    Stale { captured: u64, current: u64 },
}

pub struct FlipLoader {
    store: Arc<FlipStore>,
}

impl FlipLoader {
    pub fn new(store: Arc<FlipStore>) -> Self {
        Self { store }
    }

    /// Fetch one source and merge it unless the store was reset meanwhile
    pub async fn load(&self, source: &dyn RecordSource) -> Result<LoadOutcome> {
        let captured = self.store.epoch();
        let records = source.fetch().await?;
        let count = records.len();

        if self
            .store
            .merge_if_current(captured, records, source.display_name())
        {
            info!(
                display_name = source.display_name().unwrap_or("-"),
                records = count,
                "[LOADER] Flips loaded"
            );
            Ok(LoadOutcome::Applied { records: count })
        } else {
            let current = self.store.epoch();
            warn!(
                display_name = source.display_name().unwrap_or("-"),
                captured,
                current,
                "[LOADER] Discarding stale flip load"
            );
            Ok(LoadOutcome::Stale { captured, current })
        }
    }

    /// Load several sources concurrently; one failing source does not stop
    /// the others
    pub async fn load_all<S: RecordSource>(&self, sources: &[S]) -> Vec<Result<LoadOutcome>> {
        join_all(sources.iter().map(|s| self.load(s))).await
    }
}
