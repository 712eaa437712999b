//! Run-length compressed categorical timelines.
//!
//! Discrete-valued telemetry (antenna activity, targets, indexer
//! positions) arrives as irregularly-timed samples, while the rest of the
//! system works in correlator dump indices. [`CategoricalData`]
//! re-expresses such a stream as a value-per-dump function over `[0, N)`
//! without materialising a dense array: a maximal run of consecutive
//! dumps sharing one value is stored as a single segment.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::error::CategoricalError;

/// How raw samples of one sensor become a per-dump timeline.
pub struct CategoricalPolicy<T> {
    /// Transitional values that claim the dump containing their event
    /// (rather than waiting for the next dump midpoint), but lose the
    /// dump to any later differing value landing in the same dump.
    pub greedy_values: Vec<T>,

    /// Value covering the dumps before the first sample. Without it the
    /// first sample is pulled back to dump 0.
    pub initial_value: Option<T>,

    /// Applied to every raw value before comparison and insertion, e.g.
    /// mapping a fine-grained activity label to a coarse antenna state.
    pub transform: Option<Arc<dyn Fn(T) -> T + Send + Sync>>,

    /// Custom equality, e.g. float comparison within a tolerance.
    /// Plain `PartialEq` when unset.
    pub same: Option<Arc<dyn Fn(&T, &T) -> bool + Send + Sync>>,
}

impl<T> Default for CategoricalPolicy<T> {
    fn default() -> Self {
        Self {
            greedy_values: vec![],
            initial_value: None,
            transform: None,
            same: None,
        }
    }
}

impl<T: Clone> Clone for CategoricalPolicy<T> {
    fn clone(&self) -> Self {
        Self {
            greedy_values: self.greedy_values.clone(),
            initial_value: self.initial_value.clone(),
            transform: self.transform.clone(),
            same: self.same.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for CategoricalPolicy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CategoricalPolicy")
            .field("greedy_values", &self.greedy_values)
            .field("initial_value", &self.initial_value)
            .field("transform", &self.transform.as_ref().map(|_| ".."))
            .field("same", &self.same.as_ref().map(|_| ".."))
            .finish()
    }
}

/// A compressed, mutable, value-per-dump timeline.
///
/// `events[i]` is the dump index at which segment `i` begins and
/// `unique_values[indices[i]]` is its value; the last segment extends to
/// `num_dumps`. The segments partition `[0, num_dumps)` with no gap or
/// overlap, `events` is strictly increasing starting at 0, and every
/// entry of `unique_values` is referenced by some segment.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalData<T> {
    unique_values: Vec<T>,
    events: Vec<usize>,
    indices: Vec<usize>,
    num_dumps: usize,
}

impl<T> CategoricalData<T> {
    /// Distinct values in order of first appearance (or of an explicit
    /// reorder by a mutation).
    pub fn unique_values(&self) -> &[T] {
        &self.unique_values
    }

    /// Dump indices at which a new segment begins; always starts at 0.
    pub fn events(&self) -> &[usize] {
        &self.events
    }

    /// Per-segment positions into [`Self::unique_values`].
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Total number of dumps `N` covered by the timeline.
    pub fn num_dumps(&self) -> usize {
        self.num_dumps
    }

    /// Number of segments.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// The value active at `dump`, or `None` past the end of the grid.
    pub fn value(&self, dump: usize) -> Option<&T> {
        if dump >= self.num_dumps {
            return None;
        }
        let segment = self.events.partition_point(|&e| e <= dump) - 1;
        Some(&self.unique_values[self.indices[segment]])
    }

    /// Iterate over `(dump range, value)` per segment.
    pub fn segments(&self) -> impl Iterator<Item = (Range<usize>, &T)> + '_ {
        self.events.iter().enumerate().map(move |(i, &start)| {
            let end = self.events.get(i + 1).copied().unwrap_or(self.num_dumps);
            (start..end, &self.unique_values[self.indices[i]])
        })
    }

    /// Iterate over per-segment values (may repeat across adjacent
    /// segments after [`Self::add_unmatched`]).
    pub fn segment_values(&self) -> impl Iterator<Item = &T> + '_ {
        self.indices.iter().map(move |&i| &self.unique_values[i])
    }

    fn check(&self, op: &'static str) -> Result<(), CategoricalError> {
        let broken = |reason: String| CategoricalError::InvariantViolation { op, reason };
        if self.num_dumps == 0 {
            return Err(CategoricalError::EmptyDumpGrid);
        }
        if self.events.len() != self.indices.len() {
            return Err(broken(format!(
                "{} events vs {} indices",
                self.events.len(),
                self.indices.len()
            )));
        }
        match self.events.first() {
            Some(0) => {}
            Some(&e) => return Err(broken(format!("first event at dump {e}, not 0"))),
            None => return Err(broken("no segments".to_string())),
        }
        for (i, w) in self.events.windows(2).enumerate() {
            if w[1] <= w[0] {
                return Err(broken(format!("event {} not after event {}", i + 1, i)));
            }
        }
        if let Some(&last) = self.events.last() {
            if last >= self.num_dumps {
                return Err(broken(format!(
                    "event at dump {last} outside grid of {} dumps",
                    self.num_dumps
                )));
            }
        }
        if let Some(&bad) = self.indices.iter().find(|&&i| i >= self.unique_values.len()) {
            return Err(broken(format!(
                "index {bad} out of range for {} unique values",
                self.unique_values.len()
            )));
        }
        Ok(())
    }

    /// Merge adjacent segments referencing the same value and drop
    /// unreferenced values. The deterministic read-time collapse step;
    /// adjacent repeats introduced by [`Self::add_unmatched`] survive
    /// until this is called.
    pub fn collapse(&mut self) {
        self.merge_equal_adjacent();
        self.prune_unique();
    }

    fn merge_equal_adjacent(&mut self) {
        let mut events = Vec::with_capacity(self.events.len());
        let mut indices: Vec<usize> = Vec::with_capacity(self.indices.len());
        for (&event, &index) in self.events.iter().zip(&self.indices) {
            match indices.last() {
                Some(&previous) if previous == index => {}
                _ => {
                    events.push(event);
                    indices.push(index);
                }
            }
        }
        self.events = events;
        self.indices = indices;
    }

    fn prune_unique(&mut self) {
        let mut used = vec![false; self.unique_values.len()];
        for &i in &self.indices {
            used[i] = true;
        }
        if used.iter().all(|&u| u) {
            return;
        }
        let mut remap = vec![usize::MAX; used.len()];
        let old = std::mem::take(&mut self.unique_values);
        for (i, value) in old.into_iter().enumerate() {
            if used[i] {
                remap[i] = self.unique_values.len();
                self.unique_values.push(value);
            }
        }
        for index in &mut self.indices {
            *index = remap[*index];
        }
    }
}

impl<T: Clone + PartialEq> CategoricalData<T> {
    /// Build a timeline from explicit per-segment values. Used by format
    /// drivers to pin externally computed timelines (subarray, spectral
    /// window, per-antenna objects) that have no raw sensor behind them.
    pub fn from_segments(
        values: Vec<T>,
        events: Vec<usize>,
        num_dumps: usize,
    ) -> Result<Self, CategoricalError> {
        if values.len() != events.len() {
            return Err(CategoricalError::InvariantViolation {
                op: "from_segments",
                reason: format!("{} values vs {} events", values.len(), events.len()),
            });
        }
        Self::assemble(values, events, num_dumps, &|a, b| a == b)
    }

    /// Build a timeline from an irregular raw sample stream.
    ///
    /// The value active at dump `i` is the value of the latest sample
    /// with `timestamp <= dump_times[i] + dump_period / 2` (midpoint
    /// alignment). Greedy values instead claim the dump containing their
    /// timestamp, but lose it to any later value landing in the same
    /// dump. Dumps before the first sample take
    /// `policy.initial_value`; without one the first sample is pulled
    /// back to dump 0. Equal adjacent dumps are merged into segments.
    pub fn from_samples(
        samples: &[(f64, T)],
        dump_times: &[f64],
        dump_period: f64,
        policy: &CategoricalPolicy<T>,
    ) -> Result<Self, CategoricalError> {
        if dump_times.is_empty() {
            return Err(CategoricalError::EmptyDumpGrid);
        }
        let num_dumps = dump_times.len();
        let same = |a: &T, b: &T| match &policy.same {
            Some(f) => f(a, b),
            None => a == b,
        };

        // Activation dump per sample, kept monotonic in sample order.
        // Multiple samples activating in one dump: the last one wins.
        let mut pending: Vec<(usize, T)> = Vec::with_capacity(samples.len());
        let mut previous_time = f64::NEG_INFINITY;
        let mut floor = 0usize;
        for (i, (time, raw)) in samples.iter().enumerate() {
            if *time < previous_time {
                return Err(CategoricalError::NonMonotonicSamples { index: i });
            }
            previous_time = *time;
            let value = match &policy.transform {
                Some(f) => f(raw.clone()),
                None => raw.clone(),
            };
            let greedy = policy.greedy_values.iter().any(|g| same(g, &value));
            let dump = if greedy {
                dump_containing(dump_times, dump_period, *time)
            } else {
                dump_times
                    .partition_point(|&start| start + 0.5 * dump_period < *time)
            };
            if dump >= num_dumps {
                // Takes effect after the end of the grid.
                continue;
            }
            let dump = dump.max(floor);
            floor = dump;
            match pending.last_mut() {
                Some((d, v)) if *d == dump => *v = value,
                _ => pending.push((dump, value)),
            }
        }

        // Make sure something covers dump 0.
        let mut segments: Vec<(usize, T)> = Vec::with_capacity(pending.len() + 1);
        if !matches!(pending.first(), Some((0, _))) {
            match &policy.initial_value {
                Some(initial) => segments.push((0, initial.clone())),
                None if !pending.is_empty() => pending[0].0 = 0,
                None => return Err(CategoricalError::InvalidSample),
            }
        }
        segments.extend(pending);

        // Merge runs of equal adjacent values into segments.
        let mut values = Vec::new();
        let mut events = Vec::new();
        for (dump, value) in segments {
            match values.last() {
                Some(previous) if same(previous, &value) => {}
                _ => {
                    events.push(dump);
                    values.push(value);
                }
            }
        }
        Self::assemble(values, events, num_dumps, &same)
    }

    fn assemble(
        values: Vec<T>,
        events: Vec<usize>,
        num_dumps: usize,
        same: &dyn Fn(&T, &T) -> bool,
    ) -> Result<Self, CategoricalError> {
        let mut unique_values: Vec<T> = Vec::new();
        let mut indices = Vec::with_capacity(values.len());
        for value in values {
            let index = match unique_values.iter().position(|u| same(u, &value)) {
                Some(i) => i,
                None => {
                    unique_values.push(value);
                    unique_values.len() - 1
                }
            };
            indices.push(index);
        }
        let data = Self {
            unique_values,
            events,
            indices,
            num_dumps,
        };
        data.check("construction")?;
        Ok(data)
    }

    /// Expand to one value per dump.
    pub fn dense(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.num_dumps);
        for (range, value) in self.segments() {
            out.extend(range.map(|_| value.clone()));
        }
        out
    }

    /// Snap every event to the nearest of `boundaries` (e.g. scan
    /// starts), provided the distance is within `tolerance` dumps; other
    /// events are dropped and their value merges into the preceding
    /// segment. The leading event pins dump 0 and is never dropped.
    ///
    /// ASSUMPTION: at most one event falls within one boundary interval.
    /// When several events snap to the same boundary the latest wins and
    /// the earlier ones are discarded.
    pub fn align(&mut self, boundaries: &[usize], tolerance: usize) {
        let mut events = vec![0];
        let mut indices = vec![self.indices[0]];
        for (&event, &index) in self.events.iter().zip(&self.indices).skip(1) {
            let snapped = match nearest_boundary(boundaries, event) {
                Some(b) if b.abs_diff(event) <= tolerance && b < self.num_dumps => b,
                _ => continue,
            };
            match events.last() {
                Some(&previous) if previous == snapped => {
                    if let Some(last) = indices.last_mut() {
                        *last = index;
                    }
                }
                _ => {
                    events.push(snapped);
                    indices.push(index);
                }
            }
        }
        self.events = events;
        self.indices = indices;
        self.merge_equal_adjacent();
        self.prune_unique();
    }

    /// Insert a segment boundary at `dump` carrying `value`, splitting
    /// whatever segment currently covers it. No-op if a boundary already
    /// exists there.
    pub fn add(&mut self, dump: usize, value: T) -> Result<(), CategoricalError> {
        if dump >= self.num_dumps {
            return Err(CategoricalError::InvariantViolation {
                op: "add",
                reason: format!("dump {dump} outside grid of {} dumps", self.num_dumps),
            });
        }
        if let Err(position) = self.events.binary_search(&dump) {
            let index = self.intern(value);
            self.events.insert(position, dump);
            self.indices.insert(position, index);
        }
        Ok(())
    }

    /// For every event in `other_events` that does not coincide with one
    /// of ours, insert a duplicate boundary carrying the covering
    /// segment's value. Forces a segment split without changing values,
    /// so a label change always starts a new host segment. The adjacent
    /// repeats persist until [`Self::collapse`].
    pub fn add_unmatched(&mut self, other_events: &[usize]) {
        for &event in other_events {
            if event >= self.num_dumps {
                continue;
            }
            if let Err(position) = self.events.binary_search(&event) {
                let index = self.indices[position - 1];
                self.events.insert(position, event);
                self.indices.insert(position, index);
            }
        }
    }

    /// Delete every segment whose value equals `value`; each deleted
    /// segment's dump range is absorbed into the preceding segment, or
    /// into the following one for a leading run. The value is pruned
    /// from the unique list. No-op if the value is not present.
    pub fn remove(&mut self, value: &T) -> Result<(), CategoricalError> {
        let target = match self.unique_values.iter().position(|u| u == value) {
            Some(i) => i,
            None => return Ok(()),
        };
        if self.indices.iter().all(|&i| i == target) {
            return Err(CategoricalError::InvariantViolation {
                op: "remove",
                reason: "every segment carries the removed value".to_string(),
            });
        }
        let mut events = Vec::with_capacity(self.events.len());
        let mut indices: Vec<usize> = Vec::with_capacity(self.indices.len());
        let mut pending_start: Option<usize> = None;
        for (&event, &index) in self.events.iter().zip(&self.indices) {
            if index == target {
                if events.is_empty() {
                    // A leading run is absorbed by the first survivor.
                    pending_start.get_or_insert(event);
                }
                continue;
            }
            let event = pending_start.take().unwrap_or(event);
            match indices.last() {
                Some(&previous) if previous == index => {}
                _ => {
                    events.push(event);
                    indices.push(index);
                }
            }
        }
        self.events = events;
        self.indices = indices;
        self.prune_unique();
        Ok(())
    }

    fn intern(&mut self, value: T) -> usize {
        match self.unique_values.iter().position(|u| *u == value) {
            Some(i) => i,
            None => {
                self.unique_values.push(value);
                self.unique_values.len() - 1
            }
        }
    }
}

/// Index of the dump whose interval contains `time`, clamped to the grid
/// start; `dump_times.len()` when `time` falls past the grid end.
fn dump_containing(dump_times: &[f64], dump_period: f64, time: f64) -> usize {
    let n = dump_times.len();
    if time < dump_times[0] {
        return 0;
    }
    if time >= dump_times[n - 1] + dump_period {
        return n;
    }
    dump_times.partition_point(|&start| start <= time) - 1
}

/// Nearest of the sorted `boundaries` to `event`; ties break towards the
/// earlier boundary.
fn nearest_boundary(boundaries: &[usize], event: usize) -> Option<usize> {
    let position = boundaries.partition_point(|&b| b <= event);
    let below = position.checked_sub(1).map(|i| boundaries[i]);
    let above = boundaries.get(position).copied();
    match (below, above) {
        (Some(b), Some(a)) => Some(if event - b <= a - event { b } else { a }),
        (Some(b), None) => Some(b),
        (None, Some(a)) => Some(a),
        (None, None) => None,
    }
}
