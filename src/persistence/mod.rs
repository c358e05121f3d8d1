//! CSV Persistence Module
//!
//! One CSV file of flips per display name, under a data directory:
//! `<data_dir>/<display name>.csv`. Rows carry the raw flip fields and are
//! validated into [`FlipRecord`]s on load.

use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::types::{FlipRecord, RawFlip};

const EXTENSION: &str = "csv";

/// Per-display-name flip files
#[derive(Debug, Clone)]
pub struct CsvFlipFiles {
    data_dir: PathBuf,
}

impl CsvFlipFiles {
    /// Open (and create if needed) the data directory
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// File holding a display name's flips. Characters outside
    /// `[A-Za-z0-9 _-]` are replaced with `_`.
    pub fn path_for(&self, display_name: &str) -> PathBuf {
        let stem: String = display_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == ' ' || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.data_dir.join(format!("{}.{}", stem, EXTENSION))
    }

    /// Display names with a flip file, sorted
    pub fn display_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = fs::read_dir(&self.data_dir)
            .with_context(|| format!("Failed to read {}", self.data_dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Load a display name's flips. A missing file is an empty history; rows
    /// that fail validation are skipped.
    pub fn load(&self, display_name: &str) -> Result<Vec<FlipRecord>> {
        let path = self.path_for(display_name);
        if !path.exists() {
            debug!(path = %path.display(), "No flip file, starting empty");
            return Ok(Vec::new());
        }

        let file = fs::File::open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for (line, result) in reader.deserialize::<RawFlip>().enumerate() {
            let raw = result
                .with_context(|| format!("Failed to deserialize flip row {}", line + 1))?;
            match FlipRecord::try_from(raw) {
                Ok(record) => records.push(record),
                Err(e) => {
                    skipped += 1;
                    warn!(error = %e, row = line + 1, path = %path.display(), "Skipping invalid flip row");
                }
            }
        }

        info!(
            display_name,
            loaded = records.len(),
            skipped,
            "Loaded flips from CSV"
        );
        Ok(records)
    }

    /// Rewrite a display name's file with exactly these flips
    pub fn save(&self, display_name: &str, records: &[FlipRecord]) -> Result<()> {
        let path = self.path_for(display_name);
        let tmp = path.with_extension("csv.tmp");
        {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)
                .context("Failed to create temporary flip file")?;
            let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);
            for record in records {
                writer
                    .serialize(RawFlip::from(record))
                    .context("Failed to write flip record")?;
            }
            writer.flush().context("Failed to flush flip writer")?;
        }
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        debug!(display_name, count = records.len(), "Saved flips");
        Ok(())
    }

    /// Append flips, writing the header only for a new or empty file
    pub fn append(&self, display_name: &str, records: &[FlipRecord]) -> Result<()> {
        let path = self.path_for(display_name);
        let file_has_data =
            path.exists() && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context("Failed to open flip file")?;
        let mut writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);

        for record in records {
            writer
                .serialize(RawFlip::from(record))
                .context("Failed to write flip record")?;
        }
        writer.flush().context("Failed to flush flip writer")?;
        Ok(())
    }
}
