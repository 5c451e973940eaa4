//! Crash-point sweeps.
//!
//! A sweep replays one operation against copies of a prepared device,
//! letting `0, 1, 2, ...` writes through before every further write fails.
//! After each simulated crash the copy is remounted, which runs recovery,
//! and a checker classifies the result as the state before or after the
//! operation. Anything else is an error. The sweep ends at the first
//! crash point the operation survives.

use fntfs::{MemoryDevice, Volume};
use tracing::debug;

use crate::report::{CrashPoint, CrashReport, Outcome};
use crate::{E2eError, E2eResult, mount};

const DEFAULT_MAX_POINTS: u64 = 4096;

#[derive(Debug)]
pub struct CrashSweep<'a> {
    base: &'a MemoryDevice,
    max_points: u64,
}

impl<'a> CrashSweep<'a> {
    /// `base` must hold a cleanly closed volume.
    #[must_use]
    pub const fn new(base: &'a MemoryDevice) -> Self {
        Self {
            base,
            max_points: DEFAULT_MAX_POINTS,
        }
    }

    #[must_use]
    pub const fn with_max_points(mut self, max_points: u64) -> Self {
        self.max_points = max_points;
        self
    }

    pub fn run<Op, Check>(&self, name: &str, operation: Op, check: Check) -> E2eResult<CrashReport>
    where
        Op: Fn(&mut Volume<MemoryDevice>) -> fntfs::Result<()>,
        Check: Fn(&Volume<MemoryDevice>) -> E2eResult<Outcome>,
    {
        let mut report = CrashReport::new(name);
        for writes_allowed in 0..=self.max_points {
            let device = self.base.snapshot();
            let mut volume = mount(&device)?;
            device.fail_writes_after(writes_allowed);
            let result = operation(&mut volume);
            device.clear_faults();
            drop(volume);

            let recovered = mount(&device)?;
            let outcome = check(&recovered).map_err(|err| match err {
                E2eError::Inconsistent { detail, .. } => E2eError::Inconsistent {
                    writes_allowed,
                    detail,
                },
                other => other,
            })?;
            debug!(
                target: "fntfs::e2e",
                operation = name,
                writes_allowed,
                failed = result.is_err(),
                ?outcome,
                "crash point"
            );
            report.points.push(CrashPoint {
                writes_allowed,
                operation_failed: result.is_err(),
                outcome,
                recovery: recovered.recovery(),
            });
            if result.is_ok() {
                if outcome != Outcome::After {
                    return Err(E2eError::Inconsistent {
                        writes_allowed,
                        detail: "completed operation is not visible after remount".to_owned(),
                    });
                }
                return Ok(report);
            }
        }
        Err(E2eError::Inconsistent {
            writes_allowed: self.max_points,
            detail: format!("{name} never completed"),
        })
    }
}

/// Map "old state present" and "new state present" onto an outcome.
/// `context` names the operation in the error when neither or both hold.
pub fn classify(context: &str, before: bool, after: bool) -> E2eResult<Outcome> {
    match (before, after) {
        (true, false) => Ok(Outcome::Before),
        (false, true) => Ok(Outcome::After),
        _ => Err(E2eError::Inconsistent {
            writes_allowed: 0,
            detail: format!("{context}: before={before} after={after}"),
        }),
    }
}
