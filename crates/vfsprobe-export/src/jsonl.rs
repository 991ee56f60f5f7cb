//! JSONL file exporter

use crate::{CollectedEvent, EventExporter, ExportError, ExportResult};
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::info;
use vfsprobe_core::config::JsonlExportConfig;

/// JSONL exporter configuration
#[derive(Debug, Clone)]
pub struct JsonlExporterConfig {
    /// Output file path
    pub path: PathBuf,

    /// Whether to append to existing file
    pub append: bool,

    /// Flush after each write
    pub flush_each: bool,
}

impl Default for JsonlExporterConfig {
    fn default() -> Self {
        Self::from(&JsonlExportConfig::default())
    }
}

impl From<&JsonlExportConfig> for JsonlExporterConfig {
    fn from(config: &JsonlExportConfig) -> Self {
        Self {
            path: PathBuf::from(&config.path),
            append: config.append,
            flush_each: config.flush_each,
        }
    }
}

/// Writes one JSON row per line
pub struct JsonlExporter {
    config: JsonlExporterConfig,
    writer: Mutex<BufWriter<File>>,
    events_written: AtomicU64,
}

impl JsonlExporter {
    /// Open (or create) the output file
    pub fn open(config: JsonlExporterConfig) -> ExportResult<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = if config.append {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&config.path)?
        } else {
            File::create(&config.path)?
        };
        info!("JSONL exporter writing to: {:?}", config.path);

        Ok(Self {
            config,
            writer: Mutex::new(BufWriter::new(file)),
            events_written: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn events_written(&self) -> u64 {
        self.events_written.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventExporter for JsonlExporter {
    fn name(&self) -> &str {
        "jsonl-exporter"
    }

    async fn export(&self, event: &CollectedEvent) -> ExportResult<()> {
        // Compact only: a row must never span lines
        let json = serde_json::to_string(event)?;

        let mut w = self
            .writer
            .lock()
            .map_err(|e| ExportError::OperationFailed(format!("Lock poisoned: {}", e)))?;

        writeln!(w, "{}", json)?;

        if self.config.flush_each {
            w.flush()?;
        }

        self.events_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn flush(&self) -> ExportResult<()> {
        let mut w = self
            .writer
            .lock()
            .map_err(|e| ExportError::OperationFailed(format!("Lock poisoned: {}", e)))?;
        w.flush()?;
        Ok(())
    }
}
