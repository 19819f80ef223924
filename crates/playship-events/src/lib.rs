//! Event logging for playship publish operations.
//!
//! An append-only JSONL log of what happened during each publish: edits opened
//! and closed, artifacts uploaded, tracks assigned.
//!
//! # Example
//!
//! ```
//! use playship_events::EventLog;
//! use playship_types::{EventType, PublishEvent};
//! use chrono::Utc;
//!
//! let mut log = EventLog::new();
//! log.record(PublishEvent {
//!     timestamp: Utc::now(),
//!     event_type: EventType::EditOpened { edit_id: "edit-1".to_string() },
//!     variant: "release".to_string(),
//! });
//! assert_eq!(log.len(), 1);
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use playship_types::{EventType, PublishEvent};

/// Default events file name
pub const EVENTS_FILE: &str = "events.jsonl";

/// Get the events file path for a state directory
pub fn events_path(state_dir: &Path) -> PathBuf {
    state_dir.join(EVENTS_FILE)
}

/// Append-only event log for publish operations.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<PublishEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn record(&mut self, event: PublishEvent) {
        self.events.push(event);
    }

    /// Record an event stamped with the current time.
    pub fn record_now(&mut self, variant: &str, event_type: EventType) {
        self.record(PublishEvent {
            timestamp: Utc::now(),
            event_type,
            variant: variant.to_string(),
        });
    }

    /// Write all recorded events to a file in JSONL format.
    ///
    /// Events are appended to the file if it already exists.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create events dir {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;

        let mut writer = std::io::BufWriter::new(file);

        for event in &self.events {
            let line = serde_json::to_string(event).context("failed to serialize event to JSON")?;
            writeln!(writer, "{}", line).context("failed to write event line")?;
        }

        writer.flush().context("failed to flush events file")?;

        Ok(())
    }

    /// Read all events from a JSONL file.
    pub fn read_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let file = File::open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;

        let reader = BufReader::new(file);
        let mut events = Vec::new();

        for line in reader.lines() {
            let line = line.with_context(|| {
                format!("failed to read line from events file {}", path.display())
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let event: PublishEvent = serde_json::from_str(&line)
                .with_context(|| format!("failed to parse event JSON from line: {}", line))?;
            events.push(event);
        }

        Ok(Self { events })
    }

    /// Get all events for a specific build variant.
    pub fn events_for_variant(&self, variant: &str) -> Vec<&PublishEvent> {
        self.events.iter().filter(|e| e.variant == variant).collect()
    }

    pub fn all_events(&self) -> &[PublishEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
