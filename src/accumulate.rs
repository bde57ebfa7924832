//! Accumulate engine
//!
//! Reduces a wide input into a narrower, pre-sized output by applying an
//! operator once per matching input element. This is the in-place
//! transform with the inclusion check reversed: the output dims must be a
//! subset of the input dims.
//!
//! Two parallel strategies are used, chosen from the layout:
//!
//! - when reducing along the input's outermost dim, each of up to
//!   `max_chunks` slices of that dim is reduced into a private replica of
//!   the output, and the replicas are merged serially afterwards;
//! - otherwise the output is partitioned along its outermost dim and each
//!   partition reduces the matching slice of the input.

use crate::dimensions::{merge, Dim, Dimensions};
use crate::dtype::Element;
use crate::errors::{Result, RuLaVarError};
use crate::parallel::{chunk_ranges, max_chunks, small_output_volume};
use crate::transform::{no_variance_rule, unsupported, BinaryOp, Kernel2, Operand};
use crate::variable::{Slice, StridedOffsets, Variable, VariableView};
use rayon::prelude::*;

/// Output extents at or above this use output partitioning even when
/// reducing along the input's outer dim.
const REPLICATE_MAX_OUTPUT_EXTENT: usize = 65536;
/// Lower bound on the partition length along the output's outer dim.
const MIN_OUTER_GRAIN: usize = 32;

/// Reduce `other` into `out` with `op`.
///
/// The unit of `out` is not changed.
///
/// # Errors
///
/// Returns `DimensionError` if `out` has dims or extents not in `other`,
/// `TypeError` for an unsupported dtype pair and `VariancesError` if
/// `other` has variances but `out` does not.
pub fn accumulate_in_place<Op: BinaryOp>(
    op: &Op,
    out: &mut Variable,
    other: &VariableView<'_>,
) -> Result<()> {
    check_subset(out.dims(), other.dims())?;
    op.dispatch_accumulate(out, other)
}

fn check_subset(out: &Dimensions, input: &Dimensions) -> Result<()> {
    if input.includes(out) {
        Ok(())
    } else {
        Err(RuLaVarError::DimensionError(format!(
            "Cannot accumulate {input} into {out}: output dims must be a subset of the input dims"
        )))
    }
}

/// Typed accumulate kernel selected by [`BinaryOp::dispatch_accumulate`]
pub fn accumulate<A, B, K>(op: &K, out: &mut Variable, other: &VariableView<'_>) -> Result<()>
where
    A: Element,
    B: Element,
    K: Kernel2<A, B, Out = A> + Kernel2<A, A, Out = A> + BinaryOp,
{
    if other.has_variances() && !out.has_variances() {
        return Err(RuLaVarError::VariancesError(format!(
            "Cannot accumulate '{}': the output has no variances but the input does",
            op.name()
        )));
    }
    if out.has_variances() && !<K as Kernel2<A, B>>::VARIANCES {
        return Err(no_variance_rule(op.name()));
    }
    let out_dims = out.dims().clone();
    check_subset(&out_dims, other.dims())?;
    let dtype = out.dtype();
    let (values, variances) = out.arrays_mut();
    let values = A::slice_mut(values).ok_or_else(|| unsupported(op.name(), &[dtype]))?;
    let variances = match variances {
        Some(v) => Some(A::slice_mut(v).ok_or_else(|| unsupported(op.name(), &[dtype]))?),
        None => None,
    };

    if out_dims.is_scalar() {
        tracing::debug!(op = op.name(), "serial accumulate");
        return reduce_into::<A, B, K>(op, values, variances, &out_dims, other);
    }

    let dim = out_dims.label(0).clone();
    let size = out_dims.extent_at(0);
    if size == 0 {
        return Ok(());
    }
    let reduce_outer = other.dims().outer() != Some(&dim);
    if reduce_outer && size < REPLICATE_MAX_OUTPUT_EXTENT {
        replicate_and_merge::<A, B, K>(op, values, variances, &out_dims, other)
    } else {
        let chunk_len = if reduce_outer {
            MIN_OUTER_GRAIN.max(size / max_chunks())
        } else {
            size.div_ceil(rayon::current_num_threads()).max(1)
        };
        partition_output::<A, B, K>(op, values, variances, &out_dims, &dim, chunk_len, other)
    }
}

/// Serial reduction of `input` into a contiguous output with `out_dims`.
fn reduce_into<A, B, K>(
    op: &K,
    values: &mut [A],
    variances: Option<&mut [A]>,
    out_dims: &Dimensions,
    input: &VariableView<'_>,
) -> Result<()>
where
    A: Element,
    B: Element,
    K: Kernel2<A, B, Out = A>,
{
    let iter_dims = merge(input.dims(), out_dims)?;
    let shape = iter_dims.shape();
    let src = Operand::<B>::new(input, &iter_dims)?;
    let dest = StridedOffsets::new(&shape, &out_dims.broadcast_strides(&iter_dims), 0);
    let pairs = dest.zip(src.offsets(&shape, 0));
    match variances {
        None => {
            for (o, i) in pairs {
                values[o] = op.value(&values[o], &src.values[i]);
            }
        }
        Some(out_variances) => {
            let zero = B::default();
            for (o, i) in pairs {
                let vb = src.variances.map_or(&zero, |v| &v[i]);
                let (value, variance) =
                    op.value_and_variance(&values[o], &out_variances[o], &src.values[i], vb);
                values[o] = value;
                out_variances[o] = variance;
            }
        }
    }
    Ok(())
}

fn replicate_and_merge<A, B, K>(
    op: &K,
    values: &mut [A],
    mut variances: Option<&mut [A]>,
    out_dims: &Dimensions,
    other: &VariableView<'_>,
) -> Result<()>
where
    A: Element,
    B: Element,
    K: Kernel2<A, B, Out = A> + Kernel2<A, A, Out = A> + BinaryOp,
{
    let outer_dim = other.dims().label(0).clone();
    let outer_size = other.dims().extent_at(0);
    let ranges = chunk_ranges(outer_size, max_chunks().min(outer_size));
    let idempotent = op.idempotent();
    tracing::debug!(
        op = op.name(),
        nchunk = ranges.len(),
        idempotent,
        "accumulate into per-chunk replicas"
    );

    // Non-idempotent replicas start from the identity, `Default::default()`.
    let initial_values: &[A] = values;
    let initial_variances: Option<&[A]> = variances.as_deref();
    let replicas = ranges
        .par_iter()
        .map(|range| -> Result<(Vec<A>, Option<Vec<A>>)> {
            let mut vals = if idempotent {
                initial_values.to_vec()
            } else {
                vec![A::default(); initial_values.len()]
            };
            let mut vars = initial_variances.map(|v| {
                if idempotent {
                    v.to_vec()
                } else {
                    vec![A::default(); v.len()]
                }
            });
            let input = other.slice(Slice::range(outer_dim.clone(), range.start, range.end))?;
            reduce_into::<A, B, K>(op, &mut vals, vars.as_deref_mut(), out_dims, &input)?;
            Ok((vals, vars))
        })
        .collect::<Result<Vec<_>>>()?;

    for (replica, replica_variances) in replicas {
        match (variances.as_deref_mut(), replica_variances) {
            (Some(out_variances), Some(replica_variances)) => {
                for j in 0..values.len() {
                    let (value, variance) = <K as Kernel2<A, A>>::value_and_variance(
                        op,
                        &values[j],
                        &out_variances[j],
                        &replica[j],
                        &replica_variances[j],
                    );
                    values[j] = value;
                    out_variances[j] = variance;
                }
            }
            _ => {
                for (v, r) in values.iter_mut().zip(&replica) {
                    let value = <K as Kernel2<A, A>>::value(op, v, r);
                    *v = value;
                }
            }
        }
    }
    Ok(())
}

fn partition_output<A, B, K>(
    op: &K,
    values: &mut [A],
    variances: Option<&mut [A]>,
    out_dims: &Dimensions,
    dim: &Dim,
    chunk_len: usize,
    other: &VariableView<'_>,
) -> Result<()>
where
    A: Element,
    B: Element,
    K: Kernel2<A, B, Out = A> + BinaryOp,
{
    let size = out_dims.extent_at(0);
    let chunk_volume = chunk_len * (out_dims.volume() / size);
    let small = small_output_volume();
    tracing::debug!(
        op = op.name(),
        chunk_len,
        nchunk = size.div_ceil(chunk_len),
        "accumulate by output partition"
    );

    let value_chunks = values.chunks_mut(chunk_volume.max(1));
    let tasks: Vec<(usize, &mut [A], Option<&mut [A]>)> = match variances {
        Some(vars) => value_chunks
            .zip(vars.chunks_mut(chunk_volume.max(1)))
            .enumerate()
            .map(|(c, (v, w))| (c, v, Some(w)))
            .collect(),
        None => value_chunks.enumerate().map(|(c, v)| (c, v, None)).collect(),
    };

    tasks
        .into_par_iter()
        .try_for_each(|(c, vals, vars)| -> Result<()> {
            let begin = c * chunk_len;
            let end = (begin + chunk_len).min(size);
            let input = other.slice(Slice::range(dim.clone(), begin, end))?;
            let mut chunk_dims = out_dims.clone();
            chunk_dims.resize(dim, end - begin)?;
            if vals.len() < small {
                let mut local = vals.to_vec();
                let mut local_variances = vars.as_deref().map(<[A]>::to_vec);
                reduce_into::<A, B, K>(op, &mut local, local_variances.as_deref_mut(), &chunk_dims, &input)?;
                vals.clone_from_slice(&local);
                if let (Some(vars), Some(local_variances)) = (vars, local_variances) {
                    vars.clone_from_slice(&local_variances);
                }
                Ok(())
            } else {
                reduce_into::<A, B, K>(op, vals, vars, &chunk_dims, &input)
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{Max, Sum};
    use crate::parallel::ParallelConfig;
    use crate::units::Unit;
    use crate::variable::make_variable;

    fn dims(entries: &[(&str, usize)]) -> Dimensions {
        Dimensions::new(entries.iter().map(|(d, e)| (*d, *e))).unwrap()
    }

    fn reference_sum(data: &[f64], ny: usize, nx: usize) -> Vec<f64> {
        (0..nx).map(|x| (0..ny).map(|y| data[y * nx + x]).sum()).collect()
    }

    #[test]
    fn test_sum_along_outer_dim_uses_replicas() {
        let (ny, nx) = (100, 7);
        let data: Vec<f64> = (0..ny * nx).map(|i| i as f64).collect();
        let input = make_variable(dims(&[("y", ny), ("x", nx)]), Unit::M, data.clone(), None).unwrap();
        let mut out = Variable::zeros(dims(&[("x", nx)]), Unit::M, crate::DType::Float64, false).unwrap();
        accumulate_in_place(&Sum, &mut out, &input.view()).unwrap();
        assert_eq!(out.values::<f64>().unwrap(), reference_sum(&data, ny, nx).as_slice());
    }

    #[test]
    fn test_sum_along_inner_dim_partitions_output() {
        let (nx, ny) = (300, 5);
        let data: Vec<i64> = (0..(nx * ny) as i64).collect();
        let input = make_variable(dims(&[("x", nx), ("y", ny)]), Unit::ONE, data, None).unwrap();
        let mut out = Variable::zeros(dims(&[("x", nx)]), Unit::ONE, crate::DType::Int64, false).unwrap();
        accumulate_in_place(&Sum, &mut out, &input.view()).unwrap();
        let expected: Vec<i64> = (0..nx as i64).map(|x| (0..ny as i64).map(|y| x * ny as i64 + y).sum()).collect();
        assert_eq!(out.values::<i64>().unwrap(), expected.as_slice());
    }

    #[test]
    fn test_sum_with_variances_and_nonzero_start() {
        let input = make_variable(dims(&[("y", 4), ("x", 2)]), Unit::ONE, vec![1.0; 8], Some(vec![0.5; 8])).unwrap();
        let mut out = make_variable(dims(&[("x", 2)]), Unit::ONE, vec![10.0, 20.0], Some(vec![1.0, 1.0])).unwrap();
        accumulate_in_place(&Sum, &mut out, &input.view()).unwrap();
        assert_eq!(out.values::<f64>().unwrap(), &[14.0, 24.0]);
        assert_eq!(out.variances::<f64>().unwrap(), &[3.0, 3.0]);
    }

    #[test]
    fn test_max_is_chunk_count_independent() {
        ParallelConfig::new_default().max_chunks(3).apply_tuning();
        let data: Vec<f64> = (0..60).map(|i| ((i * 37) % 61) as f64).collect();
        let input = make_variable(dims(&[("y", 20), ("x", 3)]), Unit::ONE, data.clone(), None).unwrap();
        let mut out = Variable::filled(dims(&[("x", 3)]), Unit::ONE, f64::NEG_INFINITY);
        accumulate_in_place(&Max, &mut out, &input.view()).unwrap();
        ParallelConfig::new_default().apply_tuning();
        for x in 0..3 {
            let expected = (0..20).map(|y| data[y * 3 + x]).fold(f64::NEG_INFINITY, f64::max);
            assert_eq!(out.values::<f64>().unwrap()[x], expected);
        }
    }

    #[test]
    fn test_output_dims_must_be_subset() {
        let input = make_variable(dims(&[("x", 3)]), Unit::ONE, vec![1.0; 3], None).unwrap();
        let mut out = Variable::zeros(dims(&[("x", 4)]), Unit::ONE, crate::DType::Float64, false).unwrap();
        assert!(matches!(
            accumulate_in_place(&Sum, &mut out, &input.view()),
            Err(RuLaVarError::DimensionError(_))
        ));

        let mut wider = Variable::zeros(dims(&[("y", 2)]), Unit::ONE, crate::DType::Float64, false).unwrap();
        assert!(matches!(
            accumulate_in_place(&Sum, &mut wider, &input.view()),
            Err(RuLaVarError::DimensionError(_))
        ));
        assert_eq!(wider.values::<f64>().unwrap(), &[0.0, 0.0]);
    }

    #[test]
    fn test_variances_require_output_variances() {
        let input = make_variable(dims(&[("x", 3)]), Unit::ONE, vec![1.0; 3], Some(vec![1.0; 3])).unwrap();
        let mut out = Variable::scalar(0.0, Unit::ONE);
        assert!(matches!(
            accumulate_in_place(&Sum, &mut out, &input.view()),
            Err(RuLaVarError::VariancesError(_))
        ));
    }
}
