//! Wrap-safe reconciliation of correlator timestamps.
//!
//! Correlator dumps are stamped from an ADC sample counter of finite
//! width, so the derived timestamps can wrap during an observation, and
//! the recorded sync origin can predate the observation by several wrap
//! periods. Reconciliation re-synthesises the timestamps through the
//! counter formula, repairs any wraps, and reports everything it fixed
//! as a value the caller can inspect or surface, instead of logging
//! behind their back.

use std::fmt;

use hifitime::Epoch;

use crate::error::TimeError;

/// Sample-counter time base: `timestamp = counter / scale + origin`.
#[derive(Debug, Clone, Copy)]
pub struct CounterTimeBase {
    /// Counter ticks per second.
    pub scale: f64,

    /// Sync epoch, UTC seconds.
    pub origin: f64,

    /// Counter width in bits; the counter wraps every
    /// `2^bits / scale` seconds.
    pub bits: u32,
}

impl CounterTimeBase {
    pub fn wrap_period(&self) -> f64 {
        2f64.powi(self.bits as i32) / self.scale
    }
}

/// Dump count disagreeing with the span implied by the dump period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IrregularDumps {
    /// Dumps implied by `(last - first) / dump_period + 1`.
    pub expected: f64,
    pub actual: usize,
}

/// Everything [`reconcile`] had to fix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeDiagnostics {
    /// Sync origin was overridden or moved forward in whole wrap
    /// periods, from `.0` to `.1` UTC seconds. Downstream delay
    /// tracking may be affected; callers should surface this.
    pub origin_adjusted: Option<(f64, f64)>,

    /// First dump index after each repaired counter wrap.
    pub wraps: Vec<usize>,

    /// A duplicated final timestamp was dropped.
    pub duplicate_final_dump: bool,

    pub irregular: Option<IrregularDumps>,
}

impl TimeDiagnostics {
    pub fn is_clean(&self) -> bool {
        self.origin_adjusted.is_none()
            && self.wraps.is_empty()
            && !self.duplicate_final_dump
            && self.irregular.is_none()
    }
}

impl fmt::Display for TimeDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return write!(f, "timestamps reconciled cleanly");
        }
        let mut reports = vec![];
        if let Some((old, new)) = self.origin_adjusted {
            reports.push(format!(
                "sync time moved from {} to {} (UTC)",
                Epoch::from_unix_seconds(old),
                Epoch::from_unix_seconds(new)
            ));
        }
        for &dump in &self.wraps {
            reports.push(format!("counter wrap repaired at dump {dump}"));
        }
        if self.duplicate_final_dump {
            reports.push("duplicate final dump dropped".to_string());
        }
        if let Some(IrregularDumps { expected, actual }) = self.irregular {
            reports.push(format!(
                "irregular timestamps: expected {expected:.3} dumps, got {actual}"
            ));
        }
        write!(f, "{}", reports.join("; "))
    }
}

/// Re-synthesise raw correlator timestamps against a (possibly
/// corrected) counter time base.
///
/// `recorded` is the time base the archive was written with; `scale` and
/// `origin` override it when provided. When a trusted start time from an
/// independent periodic sensor is available, the origin is stepped
/// forward in whole wrap periods until it sits within one wrap of it.
/// Any decrease between consecutive timestamps is taken as a counter
/// wrap and repaired, and one duplicated final timestamp (a stop packet
/// artefact) is dropped.
///
/// Returns start-of-dump timestamps plus the diagnostics of what was
/// fixed.
pub fn reconcile(
    raw: &[f64],
    recorded: CounterTimeBase,
    scale: Option<f64>,
    origin: Option<f64>,
    dump_period: f64,
    sensor_start_time: Option<f64>,
) -> Result<(Vec<f64>, TimeDiagnostics), TimeError> {
    if raw.is_empty() {
        return Err(TimeError::EmptyTimestamps);
    }
    if dump_period <= 0.0 {
        return Err(TimeError::BadDumpPeriod(dump_period));
    }
    let scale = scale.unwrap_or(recorded.scale);
    let mut origin = origin.unwrap_or(recorded.origin);
    let wrap_period = CounterTimeBase {
        scale,
        origin,
        bits: recorded.bits,
    }
    .wrap_period();

    let mut diagnostics = TimeDiagnostics::default();
    if let Some(start) = sensor_start_time {
        while start - origin > wrap_period {
            origin += wrap_period;
        }
    }
    if origin != recorded.origin {
        diagnostics.origin_adjusted = Some((recorded.origin, origin));
    }

    // Re-synthesise through the counter.
    let mut timestamps: Vec<f64> = raw
        .iter()
        .map(|&t| {
            let counter = recorded.scale * (t - recorded.origin);
            counter / scale + origin
        })
        .collect();

    // Any decrease in timestamp is a wrap of the sample counter.
    if timestamps.windows(2).any(|pair| pair[1] < pair[0]) {
        let mut repaired = Vec::with_capacity(timestamps.len());
        repaired.push(timestamps[0]);
        for (i, pair) in timestamps.windows(2).enumerate() {
            let mut delta = pair[1] - pair[0];
            if delta < 0.0 {
                delta += wrap_period;
                diagnostics.wraps.push(i + 1);
            }
            repaired.push(repaired[i] + delta);
        }
        timestamps = repaired;
    }

    // A stop packet can duplicate the final timestamp.
    let num_dumps = timestamps.len();
    if num_dumps > 1 && timestamps[num_dumps - 1] == timestamps[num_dumps - 2] {
        timestamps.pop();
        diagnostics.duplicate_final_dump = true;
    }

    // The expected dump count should come out an integer unless the
    // timestamps or the dump period are messed up.
    if timestamps.len() > 1 {
        let first = timestamps[0];
        let last = timestamps[timestamps.len() - 1];
        let expected = (last - first) / dump_period + 1.0;
        if (expected - timestamps.len() as f64).abs() >= 0.01 {
            diagnostics.irregular = Some(IrregularDumps {
                expected,
                actual: timestamps.len(),
            });
        }
    }

    Ok((timestamps, diagnostics))
}
