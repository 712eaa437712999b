//! Standard transforms for visibility-like datasets.
//!
//! Archive visibilities arrive as real/imaginary `f32` pairs, weights as
//! stacked per-type columns and flags as bit-packed `u8`; these
//! transforms unpack each of them behind a [`LazyIndexer`] so the
//! accessors always hand out 3-axis (time, frequency, correlation
//! product) results.

use std::sync::Arc;

use log::warn;
use ndarray::{ArrayD, Axis, IxDyn};

use crate::error::IndexingError;
use crate::lazy::array::{c32, ArraySource, AxisSelector, DType, DynArray};
use crate::lazy::{Keep, LazyIndexer, LazyTransform};

pub const FLAG_NAMES: [&str; 8] = [
    "reserved0",
    "static",
    "cam",
    "reserved3",
    "detected_rfi",
    "predicted_rfi",
    "reserved6",
    "reserved7",
];

pub const FLAG_DESCRIPTIONS: [&str; 8] = [
    "reserved - bit 0",
    "predefined static flag list",
    "flag based on live CAM information",
    "reserved - bit 3",
    "RFI detected in the online system",
    "RFI predicted from space based pollutants",
    "reserved - bit 6",
    "reserved - bit 7",
];

pub const WEIGHT_NAMES: [&str; 1] = ["precision"];

pub const WEIGHT_DESCRIPTIONS: [&str; 1] =
    ["visibility precision (inverse variance, i.e. 1 / sigma^2)"];

/// View real/imaginary `f32` pairs as complex visibilities, dropping the
/// trailing pair axis.
pub fn extract_vis() -> LazyTransform {
    LazyTransform::new("extract_vis", |data, _keep| {
        let dtype = data.dtype();
        let DynArray::F32(values) = data else {
            return Err(IndexingError::TransformFailed {
                name: "extract_vis",
                dtype,
                reason: "expected f32 real/imaginary pairs".to_string(),
            });
        };
        if values.ndim() == 0 || values.shape()[values.ndim() - 1] != 2 {
            return Err(IndexingError::TransformFailed {
                name: "extract_vis",
                dtype,
                reason: format!("trailing axis of {:?} is not a pair", values.shape()),
            });
        }
        let last = Axis(values.ndim() - 1);
        let out_shape = values.shape()[..values.ndim() - 1].to_vec();
        let mut out = ArrayD::<c32>::zeros(IxDyn(&out_shape));
        for (element, pair) in out.iter_mut().zip(values.lanes(last)) {
            *element = c32::new(pair[0], pair[1]);
        }
        Ok(DynArray::C32(out))
    })
    .with_shape(|shape| shape[..shape.len().saturating_sub(1)].to_vec())
    .with_dtype(DType::C32)
}

/// Multiply the named weight columns together, dropping the trailing
/// weight-type axis. Unknown names are skipped with a warning; an empty
/// selection falls back to unit weights.
pub fn extract_weights(names: &[&str]) -> LazyTransform {
    let mut selection = Vec::with_capacity(names.len());
    for name in names {
        match WEIGHT_NAMES.iter().position(|known| known == name) {
            Some(index) => selection.push(index),
            None => warn!("'{name}' is not a legitimate weight type for this dataset"),
        }
    }
    if selection.is_empty() {
        warn!("No valid weights were selected - all weights default to 1.0");
    }
    LazyTransform::new("extract_weights", move |data, _keep| {
        let dtype = data.dtype();
        let DynArray::F32(values) = data else {
            return Err(IndexingError::TransformFailed {
                name: "extract_weights",
                dtype,
                reason: "expected f32 weight columns".to_string(),
            });
        };
        if values.ndim() == 0 {
            return Err(IndexingError::TransformFailed {
                name: "extract_weights",
                dtype,
                reason: "expected at least one axis".to_string(),
            });
        }
        let last = Axis(values.ndim() - 1);
        if selection.iter().any(|&index| index >= values.len_of(last)) {
            return Err(IndexingError::TransformFailed {
                name: "extract_weights",
                dtype,
                reason: format!(
                    "weight column out of range for {} columns",
                    values.len_of(last)
                ),
            });
        }
        let out = match selection.as_slice() {
            [] => ArrayD::<f32>::ones(IxDyn(&values.shape()[..values.ndim() - 1])),
            [only] => values.index_axis(last, *only).to_owned(),
            many => values
                .select(last, many)
                .map_axis(last, |column| column.product()),
        };
        Ok(DynArray::F32(out))
    })
    .with_shape(|shape| shape[..shape.len().saturating_sub(1)].to_vec())
    .with_dtype(DType::F32)
}

/// OR the named flag types into one boolean per element. Flag bits are
/// packed most-significant-first, so description index `i` lives at bit
/// `7 - i`. Unknown names are skipped with a warning; an empty selection
/// yields all-false flags.
pub fn extract_flags(names: &[&str]) -> LazyTransform {
    let mut flagmask = 0u8;
    for name in names {
        match FLAG_NAMES.iter().position(|known| known == name) {
            Some(index) => flagmask |= 0x80 >> index,
            None => warn!("'{name}' is not a legitimate flag type for this dataset"),
        }
    }
    if flagmask == 0 {
        warn!("No valid flags were selected - all flags default to False");
    }
    LazyTransform::new("extract_flags", move |data, _keep| {
        let dtype = data.dtype();
        let DynArray::U8(values) = data else {
            return Err(IndexingError::TransformFailed {
                name: "extract_flags",
                dtype,
                reason: "expected bit-packed u8 flags".to_string(),
            });
        };
        Ok(DynArray::Bool(values.mapv(|packed| packed & flagmask != 0)))
    })
    .with_dtype(DType::Bool)
}

/// Collapse axes the caller picked with a scalar, opting out of the
/// singleton preservation the indexer applies by default.
pub fn squeeze() -> LazyTransform {
    LazyTransform::new("squeeze", |mut data, keep| {
        for axis in (0..keep.len().min(data.ndim())).rev() {
            if matches!(keep[axis], Keep::Scalar(_)) && data.shape()[axis] == 1 {
                data = data.collapse_axis(axis);
            }
        }
        Ok(data)
    })
}

/// Build the standard (time, frequency, correlation product) indexer
/// over a vis-like dataset.
///
/// The three keep masks form the stage-1 selection, shared with the
/// sensor cache so telemetry and bulk data stay consistent. A file with
/// one extra leading row carries a duplicated final dump, which is
/// masked out. With `squeeze_singletons` unset the result always has
/// all three axes, even for scalar selections.
pub fn vis_like_indexer(
    source: Arc<dyn ArraySource>,
    time_keep: &[bool],
    freq_keep: &[bool],
    corrprod_keep: &[bool],
    extractor: LazyTransform,
    squeeze_singletons: bool,
) -> Result<LazyIndexer, IndexingError> {
    let num_dumps = source.shape().first().copied().unwrap_or(0);
    let mut time_keep = time_keep.to_vec();
    if num_dumps == time_keep.len() + 1 {
        time_keep.push(false);
    }
    let stage1 = vec![
        AxisSelector::Mask(time_keep),
        AxisSelector::Mask(freq_keep.to_vec()),
        AxisSelector::Mask(corrprod_keep.to_vec()),
    ];
    let mut transforms = vec![extractor];
    if squeeze_singletons {
        transforms.push(squeeze());
    }
    LazyIndexer::new(source, stage1, transforms)
}

#[cfg(test)]
mod tests {
    use ndarray::{Array3, Array4};

    use super::*;
    use crate::lazy::array::{ConstantSource, InMemorySource, Scalar};

    /// (T, F, B, 2) pairs with re = dump index, im = product index.
    fn vis_source(num_dumps: usize) -> Arc<InMemorySource> {
        let data = Array4::from_shape_fn((num_dumps, 4, 3, 2), |(t, _f, b, pair)| {
            if pair == 0 {
                t as f32
            } else {
                b as f32
            }
        });
        Arc::new(InMemorySource::new(DynArray::F32(data.into_dyn())))
    }

    #[test]
    fn vis_extraction_produces_three_axis_complex_data() {
        let indexer = vis_like_indexer(
            vis_source(5),
            &[true; 5],
            &[true; 4],
            &[true; 3],
            extract_vis(),
            false,
        )
        .unwrap();
        assert_eq!(indexer.shape(), vec![5, 4, 3]);
        assert_eq!(indexer.dtype(), DType::C32);
        let slab = indexer
            .materialize(&[Keep::Scalar(2), Keep::All, Keep::Scalar(1)])
            .unwrap();
        assert_eq!(slab.shape(), &[1, 4, 1]);
        let DynArray::C32(values) = slab else {
            panic!("expected complex data");
        };
        assert_eq!(values[[0, 0, 0]], c32::new(2.0, 1.0));
    }

    #[test]
    fn squeeze_collapses_scalar_selected_axes() {
        let indexer = vis_like_indexer(
            vis_source(5),
            &[true; 5],
            &[true; 4],
            &[true; 3],
            extract_vis(),
            true,
        )
        .unwrap();
        let slab = indexer
            .materialize(&[Keep::Scalar(2), Keep::All, Keep::Scalar(1)])
            .unwrap();
        assert_eq!(slab.shape(), &[4]);
    }

    #[test]
    fn duplicate_final_dump_is_masked_out() {
        // The file carries 6 rows but the observation has 5 dumps.
        let indexer = vis_like_indexer(
            vis_source(6),
            &[true; 5],
            &[true; 4],
            &[true; 3],
            extract_vis(),
            false,
        )
        .unwrap();
        assert_eq!(indexer.shape(), vec![5, 4, 3]);
        let slab = indexer.materialize(&[]).unwrap();
        assert_eq!(slab.shape(), &[5, 4, 3]);
    }

    #[test]
    fn weights_multiply_selected_columns() {
        let data = Array4::from_shape_fn((2, 2, 2, 1), |(t, _, _, _)| (t + 1) as f32);
        let source = Arc::new(InMemorySource::new(DynArray::F32(data.into_dyn())));
        let indexer = vis_like_indexer(
            source,
            &[true; 2],
            &[true; 2],
            &[true; 2],
            extract_weights(&["precision", "bogus"]),
            false,
        )
        .unwrap();
        assert_eq!(indexer.shape(), vec![2, 2, 2]);
        let DynArray::F32(values) = indexer.materialize(&[]).unwrap() else {
            panic!("expected f32 data");
        };
        assert_eq!(values[[0, 0, 0]], 1.0);
        assert_eq!(values[[1, 1, 1]], 2.0);
    }

    #[test]
    fn empty_weight_selection_falls_back_to_unit_weights() {
        let data = Array4::from_shape_fn((2, 2, 2, 1), |_| 7.0f32);
        let source = Arc::new(InMemorySource::new(DynArray::F32(data.into_dyn())));
        let indexer =
            vis_like_indexer(source, &[true; 2], &[true; 2], &[true; 2], extract_weights(&[]), false)
                .unwrap();
        let DynArray::F32(values) = indexer.materialize(&[]).unwrap() else {
            panic!("expected f32 data");
        };
        assert!(values.iter().all(|&w| w == 1.0));
    }

    #[test]
    fn flags_unpack_through_the_bitmask() {
        // "cam" is description index 2, so bit 5 of the packed byte.
        let cam_bit = 0x80u8 >> 2;
        let data = Array3::from_shape_fn((2, 2, 2), |(t, _, _)| {
            if t == 0 {
                cam_bit
            } else {
                0x80 >> 4
            }
        });
        let source = Arc::new(InMemorySource::new(DynArray::U8(data.into_dyn())));
        let indexer = vis_like_indexer(
            source,
            &[true; 2],
            &[true; 2],
            &[true; 2],
            extract_flags(&["cam"]),
            false,
        )
        .unwrap();
        assert_eq!(indexer.dtype(), DType::Bool);
        let DynArray::Bool(flags) = indexer.materialize(&[]).unwrap() else {
            panic!("expected bool data");
        };
        assert!(flags[[0, 0, 0]]);
        // The detected_rfi bit does not light up a cam-only mask.
        assert!(!flags[[1, 0, 0]]);
    }

    #[test]
    fn missing_flag_datasets_read_as_unflagged() {
        // An archive without a flag dataset substitutes a constant-fill
        // stand-in; only the requested slab is ever materialised.
        let source = Arc::new(ConstantSource::new(vec![1000, 4096, 40], Scalar::U8(0)));
        let indexer = vis_like_indexer(
            source,
            &[true; 1000],
            &[true; 4096],
            &[true; 40],
            extract_flags(&FLAG_NAMES),
            false,
        )
        .unwrap();
        assert_eq!(indexer.shape(), vec![1000, 4096, 40]);
        let slab = indexer
            .materialize(&[Keep::Range(0..2), Keep::Scalar(7), Keep::All])
            .unwrap();
        assert_eq!(slab.shape(), &[2, 1, 40]);
        let DynArray::Bool(flags) = slab else {
            panic!("expected bool data");
        };
        assert!(flags.iter().all(|&f| !f));
    }

    #[test]
    fn unknown_flag_names_yield_all_false() {
        let data = Array3::from_elem((2, 2, 2), 0xffu8);
        let source = Arc::new(InMemorySource::new(DynArray::U8(data.into_dyn())));
        let indexer = vis_like_indexer(
            source,
            &[true; 2],
            &[true; 2],
            &[true; 2],
            extract_flags(&["bogus"]),
            false,
        )
        .unwrap();
        let DynArray::Bool(flags) = indexer.materialize(&[]).unwrap() else {
            panic!("expected bool data");
        };
        assert!(flags.iter().all(|&f| !f));
    }
}
