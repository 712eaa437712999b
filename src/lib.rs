//! Uniform, lazily-evaluated access to radio-telescope observation
//! archives.
//!
//! Three pieces do the heavy lifting: [`CategoricalData`] compresses
//! irregularly-sampled discrete telemetry into a value-per-dump
//! timeline, [`SensorCache`] resolves sensor names to categorical or
//! continuous values on demand (with aliasing, per-sensor policy and
//! virtual sensors), and [`LazyIndexer`] defers bulk visibility /
//! weight / flag reads until a caller asks for concrete values,
//! composing a frozen structural selection with a runtime one. Format
//! drivers own the storage handles and raw streams; everything here
//! holds non-owning views and performs no I/O of its own.

pub mod categorical;
pub mod error;
pub mod lazy;
pub mod sensor;
pub mod time;
pub mod vislike;

pub use categorical::{CategoricalData, CategoricalPolicy};
pub use error::{CategoricalError, IndexingError, SensorError, TimeError};
pub use lazy::array::{
    c32, ArraySource, AxisSelector, ConstantSource, DType, DynArray, InMemorySource, Scalar,
};
pub use lazy::{Keep, LazyIndexer, LazyTransform};
pub use sensor::value::{SampleStatus, SensorData, SensorSample, SensorValue};
pub use sensor::{NamePattern, SensorCache, SensorProps, SensorRecord, VirtualSensor};
pub use time::{reconcile, CounterTimeBase, TimeDiagnostics};
