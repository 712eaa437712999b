//! Element types and the storage seam for bulk archive arrays.

use itertools::Itertools;
use ndarray::{ArrayD, Axis, IxDyn};
use num_complex::Complex;

use crate::error::IndexingError;

/// Complex visibility element.
#[allow(non_camel_case_types)]
pub type c32 = Complex<f32>;

/// Element types moved by archive drivers: packed flags (`U8`),
/// weights and raw visibility pairs (`F32`), extracted visibilities
/// (`C32`), telemetry (`F64`) and unpacked flags (`Bool`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    Bool,
    U8,
    F32,
    F64,
    C32,
}

/// A dynamically-typed slab of data read from storage or produced by a
/// transform.
#[derive(Debug, Clone, PartialEq)]
pub enum DynArray {
    Bool(ArrayD<bool>),
    U8(ArrayD<u8>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    C32(ArrayD<c32>),
}

macro_rules! each_variant {
    ($value:expr, $arr:ident => $body:expr) => {
        match $value {
            DynArray::Bool($arr) => DynArray::Bool($body),
            DynArray::U8($arr) => DynArray::U8($body),
            DynArray::F32($arr) => DynArray::F32($body),
            DynArray::F64($arr) => DynArray::F64($body),
            DynArray::C32($arr) => DynArray::C32($body),
        }
    };
}

impl DynArray {
    pub fn dtype(&self) -> DType {
        match self {
            DynArray::Bool(_) => DType::Bool,
            DynArray::U8(_) => DType::U8,
            DynArray::F32(_) => DType::F32,
            DynArray::F64(_) => DType::F64,
            DynArray::C32(_) => DType::C32,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            DynArray::Bool(a) => a.shape(),
            DynArray::U8(a) => a.shape(),
            DynArray::F32(a) => a.shape(),
            DynArray::F64(a) => a.shape(),
            DynArray::C32(a) => a.shape(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Copy out `indices` along `axis`.
    pub(crate) fn select(&self, axis: usize, indices: &[usize]) -> DynArray {
        each_variant!(self, arr => arr.select(Axis(axis), indices))
    }

    /// Drop a length-1 axis.
    pub(crate) fn collapse_axis(self, axis: usize) -> DynArray {
        each_variant!(&self, arr => arr.index_axis(Axis(axis), 0).to_owned())
    }
}

/// A single element of any supported type, for constant-fill sources.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    U8(u8),
    F32(f32),
    F64(f64),
    C32(c32),
}

impl Scalar {
    pub fn dtype(&self) -> DType {
        match self {
            Scalar::Bool(_) => DType::Bool,
            Scalar::U8(_) => DType::U8,
            Scalar::F32(_) => DType::F32,
            Scalar::F64(_) => DType::F64,
            Scalar::C32(_) => DType::C32,
        }
    }

    fn broadcast(&self, shape: &[usize]) -> DynArray {
        match self {
            Scalar::Bool(v) => DynArray::Bool(ArrayD::from_elem(IxDyn(shape), *v)),
            Scalar::U8(v) => DynArray::U8(ArrayD::from_elem(IxDyn(shape), *v)),
            Scalar::F32(v) => DynArray::F32(ArrayD::from_elem(IxDyn(shape), *v)),
            Scalar::F64(v) => DynArray::F64(ArrayD::from_elem(IxDyn(shape), *v)),
            Scalar::C32(v) => DynArray::C32(ArrayD::from_elem(IxDyn(shape), *v)),
        }
    }
}

/// Per-axis storage selection: a boolean mask of the axis's length or an
/// ascending list of positions.
#[derive(Debug, Clone, PartialEq)]
pub enum AxisSelector {
    Mask(Vec<bool>),
    Indices(Vec<usize>),
}

impl AxisSelector {
    /// Every position on an axis of length `len`.
    pub fn full(len: usize) -> Self {
        AxisSelector::Indices((0..len).collect())
    }

    /// Resolve to explicit positions, validating against the axis.
    pub fn to_indices(&self, axis: usize, len: usize) -> Result<Vec<usize>, IndexingError> {
        match self {
            AxisSelector::Mask(mask) => {
                if mask.len() != len {
                    return Err(IndexingError::MaskLengthMismatch {
                        axis,
                        got: mask.len(),
                        len,
                    });
                }
                Ok(mask.iter().positions(|&keep| keep).collect())
            }
            AxisSelector::Indices(indices) => {
                for pair in indices.windows(2) {
                    if pair[1] <= pair[0] {
                        return Err(IndexingError::UnorderedSelection { axis });
                    }
                }
                if let Some(&last) = indices.last() {
                    if last >= len {
                        return Err(IndexingError::SelectionOutOfBounds {
                            axis,
                            index: last,
                            len,
                        });
                    }
                }
                Ok(indices.clone())
            }
        }
    }
}

/// Contract the underlying storage must satisfy: a shape, an element
/// type and multi-axis indexing. The handle is owned by the format
/// driver for the dataset's lifetime; indexers hold non-owning
/// references to it.
pub trait ArraySource: Send + Sync {
    fn shape(&self) -> &[usize];

    fn dtype(&self) -> DType;

    /// Read exactly the selected slab, one selector per axis. This is
    /// the only storage access an indexer performs.
    fn read(&self, selection: &[AxisSelector]) -> Result<DynArray, IndexingError>;
}

/// An [`ArraySource`] over an array already in memory.
#[derive(Debug, Clone)]
pub struct InMemorySource {
    data: DynArray,
}

impl InMemorySource {
    pub fn new(data: DynArray) -> Self {
        Self { data }
    }
}

impl ArraySource for InMemorySource {
    fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    fn dtype(&self) -> DType {
        self.data.dtype()
    }

    fn read(&self, selection: &[AxisSelector]) -> Result<DynArray, IndexingError> {
        let shape = self.data.shape().to_vec();
        if selection.len() != shape.len() {
            return Err(IndexingError::SelectionShapeMismatch {
                got: selection.len(),
                ndim: shape.len(),
            });
        }
        let mut slab = self.data.clone();
        for (axis, selector) in selection.iter().enumerate() {
            let indices = selector.to_indices(axis, shape[axis])?;
            slab = slab.select(axis, &indices);
        }
        Ok(slab)
    }
}

/// A virtually unlimited constant-fill array. Stands in for flag or
/// weight datasets missing from an archive; only the requested slab is
/// ever materialised.
#[derive(Debug, Clone)]
pub struct ConstantSource {
    shape: Vec<usize>,
    fill: Scalar,
}

impl ConstantSource {
    pub fn new(shape: Vec<usize>, fill: Scalar) -> Self {
        Self { shape, fill }
    }
}

impl ArraySource for ConstantSource {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn dtype(&self) -> DType {
        self.fill.dtype()
    }

    fn read(&self, selection: &[AxisSelector]) -> Result<DynArray, IndexingError> {
        if selection.len() != self.shape.len() {
            return Err(IndexingError::SelectionShapeMismatch {
                got: selection.len(),
                ndim: self.shape.len(),
            });
        }
        let mut out_shape = Vec::with_capacity(self.shape.len());
        for (axis, selector) in selection.iter().enumerate() {
            out_shape.push(selector.to_indices(axis, self.shape[axis])?.len());
        }
        Ok(self.fill.broadcast(&out_shape))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array3;

    use super::*;

    fn counting_source() -> InMemorySource {
        let data = Array3::from_shape_fn((5, 4, 3), |(t, f, b)| (100 * t + 10 * f + b) as f64);
        InMemorySource::new(DynArray::F64(data.into_dyn()))
    }

    #[test]
    fn masks_and_index_lists_select_the_same_slab() {
        let source = counting_source();
        let by_mask = source
            .read(&[
                AxisSelector::Mask(vec![true, false, true, false, true]),
                AxisSelector::full(4),
                AxisSelector::full(3),
            ])
            .unwrap();
        let by_indices = source
            .read(&[
                AxisSelector::Indices(vec![0, 2, 4]),
                AxisSelector::full(4),
                AxisSelector::full(3),
            ])
            .unwrap();
        assert_eq!(by_mask, by_indices);
        assert_eq!(by_mask.shape(), &[3, 4, 3]);
    }

    #[test]
    fn selector_validation_catches_bad_input() {
        let source = counting_source();
        assert!(matches!(
            source.read(&[
                AxisSelector::Mask(vec![true; 4]),
                AxisSelector::full(4),
                AxisSelector::full(3),
            ]),
            Err(IndexingError::MaskLengthMismatch { axis: 0, .. })
        ));
        assert!(matches!(
            source.read(&[
                AxisSelector::Indices(vec![2, 1]),
                AxisSelector::full(4),
                AxisSelector::full(3),
            ]),
            Err(IndexingError::UnorderedSelection { axis: 0 })
        ));
        assert!(matches!(
            source.read(&[
                AxisSelector::Indices(vec![5]),
                AxisSelector::full(4),
                AxisSelector::full(3),
            ]),
            Err(IndexingError::SelectionOutOfBounds { axis: 0, index: 5, len: 5 })
        ));
    }

    #[test]
    fn constant_source_materialises_only_the_slab() {
        let flags = ConstantSource::new(vec![1000, 4096, 40], Scalar::U8(0));
        let slab = flags
            .read(&[
                AxisSelector::Indices(vec![0, 999]),
                AxisSelector::Indices(vec![7]),
                AxisSelector::full(40),
            ])
            .unwrap();
        assert_eq!(slab.shape(), &[2, 1, 40]);
        assert_eq!(slab.dtype(), DType::U8);
    }
}
