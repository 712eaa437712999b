//! Two-stage lazy indexing of bulk archive arrays.
//!
//! A [`LazyIndexer`] wraps an on-disk-like array with a fixed structural
//! ("stage 1") selection and an ordered chain of named transforms, and
//! defers all storage access until [`LazyIndexer::materialize`] is
//! called with an ad-hoc runtime ("stage 2") selection. Stage 2 indexes
//! into the already-reduced stage-1 view, never into the full extent, so
//! the caller sees ordinary slicing semantics over the selected data.

pub mod array;

use std::ops::Range;
use std::sync::Arc;

use crate::error::IndexingError;
use self::array::{ArraySource, AxisSelector, DType, DynArray};

/// One axis of a stage-2 selection.
#[derive(Debug, Clone, PartialEq)]
pub enum Keep {
    /// The whole (already-reduced) axis.
    All,
    /// A single position. The axis is retained as a singleton in the
    /// result unless a transform explicitly collapses it.
    Scalar(usize),
    Range(Range<usize>),
    Indices(Vec<usize>),
    Mask(Vec<bool>),
}

impl Keep {
    /// Positions picked out of an already-reduced axis of length `len`.
    fn resolve(&self, axis: usize, len: usize) -> Result<Vec<usize>, IndexingError> {
        match self {
            Keep::All => Ok((0..len).collect()),
            Keep::Scalar(index) => {
                if *index >= len {
                    return Err(IndexingError::SelectionOutOfBounds {
                        axis,
                        index: *index,
                        len,
                    });
                }
                Ok(vec![*index])
            }
            Keep::Range(range) => {
                if range.end > len {
                    return Err(IndexingError::SelectionOutOfBounds {
                        axis,
                        index: range.end.saturating_sub(1),
                        len,
                    });
                }
                Ok(range.clone().collect())
            }
            Keep::Indices(indices) => {
                AxisSelector::Indices(indices.clone()).to_indices(axis, len)
            }
            Keep::Mask(mask) => AxisSelector::Mask(mask.clone()).to_indices(axis, len),
        }
    }
}

type TransformFn =
    Arc<dyn Fn(DynArray, &[Keep]) -> Result<DynArray, IndexingError> + Send + Sync>;
type ShapeFn = Arc<dyn Fn(&[usize]) -> Vec<usize> + Send + Sync>;

/// A named, stateless step in an indexer's transform chain.
///
/// The element function receives the current slab and the original
/// stage-2 selection (so it can tell which axes the caller picked with a
/// scalar). A transform that changes the result's shape or element type
/// declares so up front, letting [`LazyIndexer::shape`] and
/// [`LazyIndexer::dtype`] answer without touching storage.
#[derive(Clone)]
pub struct LazyTransform {
    pub name: &'static str,
    transform: TransformFn,
    shape_fn: Option<ShapeFn>,
    dtype: Option<DType>,
}

impl LazyTransform {
    pub fn new(
        name: &'static str,
        transform: impl Fn(DynArray, &[Keep]) -> Result<DynArray, IndexingError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            name,
            transform: Arc::new(transform),
            shape_fn: None,
            dtype: None,
        }
    }

    /// Declare how this transform changes the result shape.
    pub fn with_shape(
        mut self,
        shape_fn: impl Fn(&[usize]) -> Vec<usize> + Send + Sync + 'static,
    ) -> Self {
        self.shape_fn = Some(Arc::new(shape_fn));
        self
    }

    /// Declare the element type this transform produces.
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    fn apply(&self, data: DynArray, keep: &[Keep]) -> Result<DynArray, IndexingError> {
        (self.transform)(data, keep)
    }
}

impl std::fmt::Debug for LazyTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyTransform")
            .field("name", &self.name)
            .field("dtype", &self.dtype)
            .finish()
    }
}

/// A lazily-indexed view of an underlying array.
///
/// The stage-1 selection and the transform chain are frozen at
/// construction; materialisation reads exactly one slab from storage and
/// pipes it through the chain. Results are never cached: materialising
/// twice performs two storage reads.
pub struct LazyIndexer {
    source: Arc<dyn ArraySource>,
    stage1: Vec<Vec<usize>>,
    transforms: Vec<LazyTransform>,
}

impl LazyIndexer {
    /// Freeze `stage1` (one selector per leading axis; trailing axes
    /// default to full range) over `source` and attach the transform
    /// chain.
    pub fn new(
        source: Arc<dyn ArraySource>,
        stage1: Vec<AxisSelector>,
        transforms: Vec<LazyTransform>,
    ) -> Result<Self, IndexingError> {
        let shape = source.shape().to_vec();
        if stage1.len() > shape.len() {
            return Err(IndexingError::SelectionShapeMismatch {
                got: stage1.len(),
                ndim: shape.len(),
            });
        }
        let mut resolved = Vec::with_capacity(shape.len());
        for (axis, &len) in shape.iter().enumerate() {
            match stage1.get(axis) {
                Some(selector) => resolved.push(selector.to_indices(axis, len)?),
                None => resolved.push((0..len).collect()),
            }
        }
        Ok(Self {
            source,
            stage1: resolved,
            transforms,
        })
    }

    /// Result shape, computed from the stage-1 selection sizes and the
    /// declared shape functions, without touching storage.
    pub fn shape(&self) -> Vec<usize> {
        let mut shape: Vec<usize> = self.stage1.iter().map(Vec::len).collect();
        for transform in &self.transforms {
            if let Some(shape_fn) = &transform.shape_fn {
                shape = shape_fn(&shape);
            }
        }
        shape
    }

    /// Result element type, from the last transform that declares one.
    pub fn dtype(&self) -> DType {
        self.transforms
            .iter()
            .rev()
            .find_map(|t| t.dtype)
            .unwrap_or_else(|| self.source.dtype())
    }

    /// Read the stage-2 selected data.
    ///
    /// `keep` is padded on the right with full-range selectors; entries
    /// beyond the axes the transform chain declares are tolerated only
    /// when they are full-range. A scalar selector keeps its axis as a
    /// singleton. Stage 2 indexes into the stage-1 reduced view, and the
    /// composed selection is read from storage in one access.
    pub fn materialize(&self, keep: &[Keep]) -> Result<DynArray, IndexingError> {
        let out_ndim = self.shape().len();
        if keep.len() > out_ndim {
            for selector in &keep[out_ndim..] {
                if !matches!(selector, Keep::All) {
                    return Err(IndexingError::SelectionShapeMismatch {
                        got: keep.len(),
                        ndim: out_ndim,
                    });
                }
            }
        }
        let significant = keep.len().min(out_ndim);
        let mut composed = Vec::with_capacity(self.stage1.len());
        for (axis, reduced) in self.stage1.iter().enumerate() {
            let selector = match keep.get(axis) {
                Some(selector) if axis < significant => selector,
                _ => &Keep::All,
            };
            let within = selector.resolve(axis, reduced.len())?;
            composed.push(AxisSelector::Indices(
                within.into_iter().map(|i| reduced[i]).collect(),
            ));
        }
        let mut data = self.source.read(&composed)?;
        for transform in &self.transforms {
            data = transform.apply(data, keep)?;
        }
        Ok(data)
    }
}

impl std::fmt::Debug for LazyIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyIndexer")
            .field("shape", &self.shape())
            .field("dtype", &self.dtype())
            .field("transforms", &self.transforms)
            .finish()
    }
}
