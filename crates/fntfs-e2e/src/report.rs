//! Serializable results of crash sweeps.

use fntfs::RecoverySummary;
use serde::Serialize;

use crate::E2eResult;

pub const CRASH_REPORT_SCHEMA_V1: &str = "fntfs-e2e.crash-report.v1";

/// Which side of the operation a recovered volume landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Before,
    After,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrashPoint {
    /// Device writes that succeeded before power was cut.
    pub writes_allowed: u64,
    pub operation_failed: bool,
    pub outcome: Outcome,
    pub recovery: RecoverySummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrashReport {
    pub schema_version: String,
    pub operation: String,
    pub points: Vec<CrashPoint>,
}

impl CrashReport {
    #[must_use]
    pub fn new(operation: &str) -> Self {
        Self {
            schema_version: CRASH_REPORT_SCHEMA_V1.to_owned(),
            operation: operation.to_owned(),
            points: Vec::new(),
        }
    }

    #[must_use]
    pub fn count(&self, outcome: Outcome) -> usize {
        self.points.iter().filter(|point| point.outcome == outcome).count()
    }

    /// Crashes the operation did not survive but recovery completed from
    /// the log.
    #[must_use]
    pub fn redone_points(&self) -> Vec<&CrashPoint> {
        self.points
            .iter()
            .filter(|point| point.operation_failed && point.outcome == Outcome::After)
            .collect()
    }

    pub fn to_json(&self) -> E2eResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
