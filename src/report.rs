//! Dispatch reports
//!
//! A [`DispatchReport`] collects the [`DispatchRecord`]s of a session so a run
//! can be inspected afterwards: which operations were patched and which path
//! served every call.

use crate::core::{Error, Result};
use crate::dispatch::{DispatchPath, DispatchRecord};
use crate::registry::PatchRegistry;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Serializable summary of dispatched calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    /// Library version that produced the report
    pub library_version: String,
    /// Creation timestamp (RFC 3339)
    pub created_at: String,
    /// Operations applied when the report was created
    pub applied: Vec<String>,
    pub records: Vec<DispatchRecord>,
}

/// Number of calls served by each path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PathCounts {
    pub accelerated: usize,
    pub reference: usize,
    pub fallback: usize,
    pub unpatched: usize,
}

impl DispatchReport {
    pub fn new(registry: &PatchRegistry) -> Self {
        Self {
            library_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            applied: registry
                .applied_operations()
                .iter()
                .map(ToString::to_string)
                .collect(),
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: DispatchRecord) {
        self.records.push(record);
    }

    /// Add the latest record of an estimator, if it has one
    pub fn record_from(&mut self, record: Option<&DispatchRecord>) {
        if let Some(record) = record {
            self.records.push(record.clone());
        }
    }

    pub fn path_counts(&self) -> PathCounts {
        let mut counts = PathCounts::default();
        for record in &self.records {
            match record.path {
                DispatchPath::Accelerated => counts.accelerated += 1,
                DispatchPath::Reference => counts.reference += 1,
                DispatchPath::Fallback => counts.fallback += 1,
                DispatchPath::Unpatched => counts.unpatched += 1,
            }
        }
        counts
    }

    /// Save report to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)
            .map_err(|e| Error::SerializationError(e.to_string()))?;
        Ok(())
    }

    /// Load report from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| Error::SerializationError(e.to_string()))
    }

    /// Print report summary
    pub fn print_summary(&self) {
        let counts = self.path_counts();
        println!("=== Dispatch Report ===");
        println!("Library Version: {}", self.library_version);
        println!("Created: {}", self.created_at);
        println!("Applied Operations: {}", self.applied.len());
        println!("Calls: {}", self.records.len());
        println!("  Accelerated: {}", counts.accelerated);
        println!("  Reference: {}", counts.reference);
        println!("  Fallback: {}", counts.fallback);
        println!("  Unpatched: {}", counts.unpatched);
        for record in &self.records {
            match &record.reason {
                Some(reason) => println!(
                    "  {} on {}: {:?} ({})",
                    record.operation, record.target, record.path, reason
                ),
                None => println!(
                    "  {} on {}: {:?}",
                    record.operation, record.target, record.path
                ),
            }
        }
    }
}
