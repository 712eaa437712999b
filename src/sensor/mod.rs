//! Lazy resolution of raw telemetry streams into per-dump values.
//!
//! A [`SensorCache`] owns the raw sample streams of an observation plus
//! the dump-time grid, and turns a sensor name into a categorical
//! timeline or a continuous array on first access, memoizing the result.
//! Aliases, per-name-pattern properties and virtual sensors (computed
//! from other cache entries) all resolve through the same `get` path.

pub mod value;

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use log::debug;
use ndarray::Array1;
use vec1::Vec1;

use crate::categorical::{CategoricalData, CategoricalPolicy};
use crate::error::SensorError;
use self::value::{SensorData, SensorValue};

/// A sensor name matcher: an exact name, or a name with one wildcard
/// spanning the unspecified part (e.g. `*activity`, `Antennas/*/az`).
/// Matchers are evaluated in registration order and the first match
/// wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamePattern {
    Exact(String),
    SinglePlaceholder { prefix: String, suffix: String },
}

impl NamePattern {
    /// Parse a pattern string containing at most one `*`.
    pub fn parse(pattern: &str) -> Result<Self, SensorError> {
        let mut parts = pattern.split('*');
        let prefix = parts.next().unwrap_or("");
        match (parts.next(), parts.next()) {
            (None, _) => Ok(NamePattern::Exact(pattern.to_string())),
            (Some(suffix), None) => Ok(NamePattern::SinglePlaceholder {
                prefix: prefix.to_string(),
                suffix: suffix.to_string(),
            }),
            (Some(_), Some(_)) => Err(SensorError::BadPattern(pattern.to_string())),
        }
    }

    /// The part of `name` bound to the placeholder on a match (an empty
    /// string for exact matches), `None` otherwise.
    pub fn matches<'a>(&self, name: &'a str) -> Option<&'a str> {
        match self {
            NamePattern::Exact(exact) => (exact.as_str() == name).then(|| ""),
            NamePattern::SinglePlaceholder { prefix, suffix } => name
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_suffix(suffix.as_str())),
        }
    }
}

/// Per-name-pattern resolution properties.
#[derive(Clone, Default)]
pub struct SensorProps {
    /// Force categorical (`true`) or continuous (`false`); guessed from
    /// the data when unset.
    pub categorical: Option<bool>,

    /// Transitional values handed to [`CategoricalPolicy`].
    pub greedy_values: Vec<SensorValue>,

    /// Value covering the dumps before the first sample.
    pub initial_value: Option<SensorValue>,

    /// Numeric values within this distance count as the same categorical
    /// value.
    pub comparison_tolerance: Option<f64>,

    /// Applied to every raw value before comparison and insertion.
    pub transform: Option<Arc<dyn Fn(SensorValue) -> SensorValue + Send + Sync>>,
}

/// Compute function behind a virtual sensor pattern: receives the cache,
/// the resolved name and the part bound to the placeholder (e.g. an
/// antenna identifier), and returns the value cached under that name.
/// It may `get` other sensors, but requesting its own unresolved name is
/// a fatal configuration error.
pub type VirtualSensor = Arc<
    dyn Fn(&mut SensorCache, &str, &str) -> Result<SensorRecord, SensorError> + Send + Sync,
>;

/// A resolved cache entry: a categorical timeline or a continuous
/// per-dump array.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorRecord {
    Categorical(CategoricalData<SensorValue>),
    Continuous(Array1<f64>),
}

impl SensorRecord {
    pub fn as_categorical(&self) -> Option<&CategoricalData<SensorValue>> {
        match self {
            SensorRecord::Categorical(data) => Some(data),
            SensorRecord::Continuous(_) => None,
        }
    }

    pub fn into_categorical(self) -> Option<CategoricalData<SensorValue>> {
        match self {
            SensorRecord::Categorical(data) => Some(data),
            SensorRecord::Continuous(_) => None,
        }
    }

    pub fn as_continuous(&self) -> Option<&Array1<f64>> {
        match self {
            SensorRecord::Continuous(values) => Some(values),
            SensorRecord::Categorical(_) => None,
        }
    }
}

impl From<CategoricalData<SensorValue>> for SensorRecord {
    fn from(data: CategoricalData<SensorValue>) -> Self {
        SensorRecord::Categorical(data)
    }
}

impl From<Array1<f64>> for SensorRecord {
    fn from(values: Array1<f64>) -> Self {
        SensorRecord::Continuous(values)
    }
}

#[derive(Default)]
struct CacheSlot {
    raw: Option<SensorData>,
    resolved: Option<SensorRecord>,
}

/// Lazily resolves sensor names to per-dump values.
///
/// Entries are created at construction (names only) and resolved on
/// first access; a resolved entry persists for the cache's lifetime
/// unless overwritten via [`Self::set`]. The cache assumes a single
/// logical consumer; `get` hands out owned copies so callers can mutate
/// their timeline without aliasing the cached one.
pub struct SensorCache {
    slots: HashMap<String, CacheSlot>,

    /// Dump start times, UTC seconds, one per dump.
    dump_times: Vec1<f64>,

    dump_period: f64,

    /// Per-dump selection shared with the bulk-data indexers; applied to
    /// continuous output.
    keep: Vec<bool>,

    props: Vec<(NamePattern, SensorProps)>,
    virtuals: Vec<(NamePattern, VirtualSensor)>,
    aliases: HashMap<String, String>,

    /// Names currently being computed by virtual sensors, for cycle
    /// detection.
    resolving: Vec<String>,
}

impl SensorCache {
    pub fn new(
        raw: Vec<SensorData>,
        dump_times: Vec1<f64>,
        dump_period: f64,
        keep: Option<Vec<bool>>,
        props: Vec<(NamePattern, SensorProps)>,
        virtuals: Vec<(NamePattern, VirtualSensor)>,
        aliases: HashMap<String, String>,
    ) -> Self {
        let keep = keep.unwrap_or_else(|| vec![true; dump_times.len()]);
        let mut slots = HashMap::with_capacity(raw.len());
        for data in raw {
            let name = data.name().to_string();
            slots.insert(
                name,
                CacheSlot {
                    raw: Some(data),
                    resolved: None,
                },
            );
        }
        Self {
            slots,
            dump_times,
            dump_period,
            keep,
            props,
            virtuals,
            aliases,
            resolving: Vec::new(),
        }
    }

    pub fn dump_times(&self) -> &[f64] {
        self.dump_times.as_slice()
    }

    pub fn dump_period(&self) -> f64 {
        self.dump_period
    }

    pub fn keep(&self) -> &[bool] {
        &self.keep
    }

    /// Replace the per-dump selection. Must match the dump grid length.
    pub fn set_keep(&mut self, keep: Vec<bool>) {
        self.keep = keep;
    }

    /// All names with an entry (raw-backed, resolved or pinned).
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.slots.keys().map(String::as_str)
    }

    /// Whether `name` could resolve, without forcing resolution.
    pub fn contains(&self, name: &str) -> bool {
        let canonical = self.canonical(name);
        self.slots.contains_key(canonical)
            || self
                .virtuals
                .iter()
                .any(|(pattern, _)| pattern.matches(canonical).is_some())
    }

    /// Resolve `name` to its categorical or continuous value, building
    /// and memoizing it on first access. The per-dump selection is
    /// applied to continuous output; categorical timelines are returned
    /// on the full dump grid.
    pub fn get(&mut self, name: &str) -> Result<SensorRecord, SensorError> {
        let canonical = self.canonical(name).to_string();
        if let Some(record) = self
            .slots
            .get(&canonical)
            .and_then(|slot| slot.resolved.clone())
        {
            return Ok(self.apply_keep(record));
        }
        let raw = self.slots.get(&canonical).and_then(|slot| slot.raw.clone());
        if let Some(raw) = raw {
            let record = self.extract(&canonical, &raw)?;
            if let Some(slot) = self.slots.get_mut(&canonical) {
                slot.resolved = Some(record.clone());
            }
            return Ok(self.apply_keep(record));
        }
        let matched = self.virtuals.iter().find_map(|(pattern, handler)| {
            pattern
                .matches(&canonical)
                .map(|bound| (handler.clone(), bound.to_string()))
        });
        if let Some((handler, bound)) = matched {
            if self.resolving.contains(&canonical) {
                return Err(SensorError::VirtualSensorCycle {
                    chain: format!("{} -> {}", self.resolving.join(" -> "), canonical),
                    name: canonical,
                });
            }
            debug!("Computing virtual sensor '{canonical}'");
            self.resolving.push(canonical.clone());
            let result = handler(self, &canonical, &bound);
            self.resolving.pop();
            let record = result?;
            self.slots.entry(canonical).or_default().resolved = Some(record.clone());
            return Ok(self.apply_keep(record));
        }
        Err(SensorError::NotFound(canonical))
    }

    /// The raw `(timestamp, value, status)` stream behind `name`,
    /// without resolving or caching a per-dump view. One-shot
    /// configuration replays read this directly.
    pub fn get_raw(&self, name: &str) -> Result<SensorData, SensorError> {
        let canonical = self.canonical(name);
        self.slots
            .get(canonical)
            .and_then(|slot| slot.raw.clone())
            .ok_or_else(|| SensorError::NotFound(canonical.to_string()))
    }

    /// Pin a value under `name` unconditionally, bypassing resolution.
    /// Format drivers use this to inject externally computed timelines
    /// (subarray, spectral window, scan state).
    pub fn set(&mut self, name: &str, record: impl Into<SensorRecord>) {
        let canonical = self.canonical(name).to_string();
        self.slots.entry(canonical).or_default().resolved = Some(record.into());
    }

    fn canonical<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    fn match_props(&self, name: &str) -> Option<&SensorProps> {
        self.props
            .iter()
            .find(|(pattern, _)| pattern.matches(name).is_some())
            .map(|(_, props)| props)
    }

    fn apply_keep(&self, record: SensorRecord) -> SensorRecord {
        match record {
            SensorRecord::Continuous(values) if values.len() == self.keep.len() => {
                let kept: Vec<f64> = values
                    .iter()
                    .zip(&self.keep)
                    .filter_map(|(&value, &keep)| keep.then(|| value))
                    .collect();
                SensorRecord::Continuous(Array1::from_vec(kept))
            }
            other => other,
        }
    }

    fn extract(&self, name: &str, raw: &SensorData) -> Result<SensorRecord, SensorError> {
        let props = self.match_props(name).cloned().unwrap_or_default();
        debug!("Resolving sensor '{}' ({} samples)", name, raw.len());
        let samples: Vec<(f64, SensorValue)> = raw
            .samples()
            .iter()
            .map(|sample| {
                let value = match &props.transform {
                    Some(f) => f(sample.value.clone()),
                    None => sample.value.clone(),
                };
                (sample.timestamp, value)
            })
            .collect();
        let categorical = props
            .categorical
            .unwrap_or_else(|| guess_categorical(&samples));
        if categorical {
            let policy = CategoricalPolicy {
                greedy_values: props.greedy_values.clone(),
                initial_value: props.initial_value.clone(),
                transform: None,
                same: props.comparison_tolerance.map(|tolerance| {
                    Arc::new(move |a: &SensorValue, b: &SensorValue| a.same_within(b, tolerance))
                        as Arc<dyn Fn(&SensorValue, &SensorValue) -> bool + Send + Sync>
                }),
            };
            let data = CategoricalData::from_samples(
                &samples,
                self.dump_times.as_slice(),
                self.dump_period,
                &policy,
            )
            .map_err(|source| SensorError::Categorical {
                name: name.to_string(),
                source,
            })?;
            Ok(SensorRecord::Categorical(data))
        } else {
            if samples.is_empty() {
                return Err(SensorError::InvalidSample {
                    name: name.to_string(),
                });
            }
            // Decimate onto the dump grid by nearest-sample lookup. The
            // full grid is cached; the keep selection applies on `get`.
            let mut values = Vec::with_capacity(self.dump_times.len());
            for &start in self.dump_times.iter() {
                let midpoint = start + 0.5 * self.dump_period;
                let value = nearest_sample(&samples, midpoint);
                values.push(value.as_f64().ok_or_else(|| SensorError::NotNumeric {
                    name: name.to_string(),
                })?);
            }
            Ok(SensorRecord::Continuous(Array1::from_vec(values)))
        }
    }
}

/// Non-numeric streams are categorical; numeric streams are categorical
/// when a majority of consecutive samples repeat exactly.
fn guess_categorical(samples: &[(f64, SensorValue)]) -> bool {
    if samples.iter().any(|(_, value)| value.as_f64().is_none()) {
        return true;
    }
    if samples.len() < 2 {
        return false;
    }
    let repeats = samples
        .windows(2)
        .filter(|pair| pair[0].1 == pair[1].1)
        .count();
    2 * repeats > samples.len() - 1
}

/// The sample nearest in time, assuming a timestamp-sorted stream.
fn nearest_sample(samples: &[(f64, SensorValue)], time: f64) -> &SensorValue {
    let position = samples.partition_point(|(t, _)| *t <= time);
    if position == 0 {
        return &samples[0].1;
    }
    if position == samples.len() {
        return &samples[position - 1].1;
    }
    let before = &samples[position - 1];
    let after = &samples[position];
    if time - before.0 <= after.0 - time {
        &before.1
    } else {
        &after.1
    }
}

lazy_static! {
    /// Collapse fine-grained pointing activities onto the basic antenna
    /// state (slewing, scanning, tracking, stopped).
    static ref SIMPLIFIED_ACTIVITY: HashMap<&'static str, &'static str> = [
        ("scan_ready", "slew"),
        ("scan", "scan"),
        ("scan_complete", "scan"),
        ("track", "track"),
        ("slew", "slew"),
    ]
    .into_iter()
    .collect();
}

/// Properties for the standard antenna sensors: activities simplify to
/// the basic antenna state and treat transitional states as greedy,
/// targets and band indexer positions start blank, receiver serial
/// numbers start at 0.
pub fn default_antenna_props() -> Vec<(NamePattern, SensorProps)> {
    let simplify: Arc<dyn Fn(SensorValue) -> SensorValue + Send + Sync> =
        Arc::new(|value| match value {
            SensorValue::Str(activity) => SensorValue::Str(
                SIMPLIFIED_ACTIVITY
                    .get(activity.as_str())
                    .copied()
                    .unwrap_or("stop")
                    .to_string(),
            ),
            other => other,
        });
    vec![
        (
            NamePattern::SinglePlaceholder {
                prefix: String::new(),
                suffix: "activity".to_string(),
            },
            SensorProps {
                greedy_values: vec![SensorValue::from("slew"), SensorValue::from("stop")],
                initial_value: Some(SensorValue::from("slew")),
                transform: Some(simplify),
                ..Default::default()
            },
        ),
        (
            NamePattern::SinglePlaceholder {
                prefix: String::new(),
                suffix: "target".to_string(),
            },
            SensorProps {
                initial_value: Some(SensorValue::from("")),
                ..Default::default()
            },
        ),
        (
            NamePattern::SinglePlaceholder {
                prefix: String::new(),
                suffix: "ap_indexer_position".to_string(),
            },
            SensorProps {
                initial_value: Some(SensorValue::from("")),
                ..Default::default()
            },
        ),
        (
            NamePattern::SinglePlaceholder {
                prefix: String::new(),
                suffix: "_serial_number".to_string(),
            },
            SensorProps {
                categorical: Some(true),
                initial_value: Some(SensorValue::Int(0)),
                ..Default::default()
            },
        ),
    ]
}

/// Alternate names for sensors that were renamed upstream.
pub fn default_aliases() -> HashMap<String, String> {
    [("nd_coupler".to_string(), "dig_noise_diode".to_string())]
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use vec1::vec1;

    use super::value::{SampleStatus, SensorSample};
    use super::*;

    fn activity_stream(name: &str) -> SensorData {
        SensorData::new(
            name,
            vec![
                SensorSample::nominal(0.0, "scan_ready"),
                SensorSample::nominal(1.0, "scan"),
                SensorSample::nominal(1.5, "scan_complete"),
                SensorSample::nominal(4.0, "track"),
            ],
        )
    }

    fn make_cache(virtuals: Vec<(NamePattern, VirtualSensor)>) -> SensorCache {
        let azim = SensorData::new(
            "Antennas/m000/pos_actual_scan_azim",
            vec![
                SensorSample::nominal(0.2, 10.0),
                SensorSample::nominal(1.2, 20.0),
                SensorSample::nominal(2.2, 30.0),
                SensorSample::nominal(3.2, 40.0),
                SensorSample::nominal(4.2, 50.0),
                SensorSample::nominal(5.2, 60.0),
            ],
        );
        SensorCache::new(
            vec![
                activity_stream("Antennas/m000/activity"),
                azim,
                SensorData::new(
                    "dig_noise_diode",
                    vec![
                        SensorSample::nominal(0.0, false),
                        SensorSample::nominal(3.0, true),
                    ],
                ),
            ],
            vec1![0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
            1.0,
            None,
            default_antenna_props(),
            virtuals,
            default_aliases(),
        )
    }

    #[test]
    fn activity_resolves_to_simplified_states() {
        let mut cache = make_cache(vec![]);
        let record = cache.get("Antennas/m000/activity").unwrap();
        let timeline = record.as_categorical().unwrap();
        assert_eq!(timeline.events(), &[0, 1, 4]);
        let values: Vec<_> = timeline
            .segment_values()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert_eq!(values, ["slew", "scan", "track"]);
    }

    #[test]
    fn resolution_is_memoized() {
        let mut cache = make_cache(vec![]);
        let first = cache.get("Antennas/m000/activity").unwrap();
        let second = cache.get("Antennas/m000/activity").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn continuous_sensor_decimates_to_the_dump_grid() {
        let mut cache = make_cache(vec![]);
        let record = cache.get("Antennas/m000/pos_actual_scan_azim").unwrap();
        let values = record.as_continuous().unwrap();
        assert_eq!(values.len(), 6);
        assert_eq!(values[0], 10.0);
        assert_eq!(values[5], 60.0);
    }

    #[test]
    fn keep_mask_filters_continuous_output() {
        let mut cache = make_cache(vec![]);
        cache.set_keep(vec![true, false, true, false, true, false]);
        let record = cache.get("Antennas/m000/pos_actual_scan_azim").unwrap();
        let values = record.as_continuous().unwrap();
        assert_eq!(values.as_slice().unwrap(), &[10.0, 30.0, 50.0]);
    }

    #[test]
    fn aliases_resolve_before_lookup() {
        let mut cache = make_cache(vec![]);
        assert!(cache.contains("nd_coupler"));
        let record = cache.get("nd_coupler").unwrap();
        let timeline = record.as_categorical().unwrap();
        assert_eq!(timeline.events(), &[0, 3]);
    }

    #[test]
    fn unknown_sensor_is_reported_by_name() {
        let mut cache = make_cache(vec![]);
        match cache.get("Antennas/m000/bogus") {
            Err(SensorError::NotFound(name)) => {
                assert_eq!(name, "Antennas/m000/bogus");
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn set_pins_a_timeline_without_raw_backing() {
        let mut cache = make_cache(vec![]);
        let pinned = CategoricalData::from_segments(
            vec![SensorValue::Int(0)],
            vec![0],
            6,
        )
        .unwrap();
        cache.set("Observation/subarray_index", pinned.clone());
        let record = cache.get("Observation/subarray_index").unwrap();
        assert_eq!(record.as_categorical(), Some(&pinned));
    }

    #[test]
    fn virtual_sensor_computes_from_other_entries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let to_radians: VirtualSensor = Arc::new(move |cache, _name, ant| {
            counted.fetch_add(1, Ordering::SeqCst);
            let real = format!("Antennas/{ant}/pos_actual_scan_azim");
            let record = cache.get(&real)?;
            let degrees = record.as_continuous().expect("azim is continuous");
            Ok(SensorRecord::Continuous(
                degrees.mapv(f64::to_radians),
            ))
        });
        let mut cache = make_cache(vec![(
            NamePattern::parse("Antennas/*/az").unwrap(),
            to_radians,
        )]);
        assert!(cache.contains("Antennas/m000/az"));
        let record = cache.get("Antennas/m000/az").unwrap();
        let values = record.as_continuous().unwrap();
        assert!((values[0] - 10f64.to_radians()).abs() < 1e-12);
        // Second access hits the cache, not the compute function.
        cache.get("Antennas/m000/az").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn virtual_sensor_cycles_are_fatal() {
        let selfish: VirtualSensor =
            Arc::new(|cache, name, _bound| cache.get(name));
        let mut cache = make_cache(vec![(
            NamePattern::parse("loop/*").unwrap(),
            selfish,
        )]);
        match cache.get("loop/x") {
            Err(SensorError::VirtualSensorCycle { name, .. }) => {
                assert_eq!(name, "loop/x");
            }
            other => panic!("expected VirtualSensorCycle, got {other:?}"),
        }
    }

    #[test]
    fn get_raw_skips_extraction() {
        let cache = make_cache(vec![]);
        let raw = cache.get_raw("Antennas/m000/activity").unwrap();
        assert_eq!(raw.len(), 4);
        assert_eq!(raw.samples()[0].status, SampleStatus::Nominal);
        // The raw view carries the unsimplified activity labels.
        assert_eq!(raw.samples()[0].value, SensorValue::from("scan_ready"));
    }

    #[test]
    fn categorical_guess_follows_value_repetition() {
        assert!(guess_categorical(&[
            (0.0, SensorValue::from("a")),
            (1.0, SensorValue::from("b")),
        ]));
        // Strictly varying numbers: continuous.
        assert!(!guess_categorical(&[
            (0.0, SensorValue::Float(1.0)),
            (1.0, SensorValue::Float(1.1)),
            (2.0, SensorValue::Float(1.2)),
        ]));
        // Mostly-repeating numbers: categorical.
        assert!(guess_categorical(&[
            (0.0, SensorValue::Float(1.0)),
            (1.0, SensorValue::Float(1.0)),
            (2.0, SensorValue::Float(1.0)),
            (3.0, SensorValue::Float(2.0)),
        ]));
    }

    #[test]
    fn pattern_parsing_rejects_double_wildcards() {
        assert!(NamePattern::parse("a*b*c").is_err());
        assert_eq!(
            NamePattern::parse("plain").unwrap(),
            NamePattern::Exact("plain".to_string())
        );
        let pattern = NamePattern::parse("Antennas/*/az").unwrap();
        assert_eq!(pattern.matches("Antennas/m001/az"), Some("m001"));
        assert_eq!(pattern.matches("Antennas/m001/el"), None);
    }
}
