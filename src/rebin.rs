//! Histogram rebinning
//!
//! Redistributes counts from one set of bin edges to another, assuming the
//! counts are uniformly distributed within each input bin. Each output bin
//! receives the fraction of every input bin it overlaps. Boolean data is
//! combined with a logical or instead.
//!
//! The overlap plan is computed by a two-pointer sweep over both edge lists
//! and then applied to every lane. When `dim` is the inner dimension lanes
//! are contiguous and handled with `par_chunks_mut`; otherwise the data is
//! converted to an `ndarray` and lanes are zipped along the rebinned axis.

use crate::dimensions::{is_bin_edge, Dim, Dimensions};
use crate::dtype::{DType, Element};
use crate::errors::{Result, RuLaVarError};
use crate::variable::{Variable, VariableView};
use ndarray::{ArrayD, Axis, IxDyn, Zip};
use rayon::prelude::*;
use tracing::debug;

/// Elements that can be redistributed between bins
pub trait Rebinnable: Element + Copy {
    /// Add `fraction` of `value` to `acc`.
    fn add_fraction(acc: &mut Self, value: Self, fraction: f64);
}

impl Rebinnable for f64 {
    fn add_fraction(acc: &mut Self, value: Self, fraction: f64) {
        *acc += value * fraction;
    }
}

impl Rebinnable for f32 {
    #[allow(clippy::cast_possible_truncation)]
    fn add_fraction(acc: &mut Self, value: Self, fraction: f64) {
        *acc += (f64::from(value) * fraction) as f32;
    }
}

impl Rebinnable for bool {
    fn add_fraction(acc: &mut Self, value: Self, _fraction: f64) {
        *acc = *acc || value;
    }
}

/// Overlap of input bin `old` with output bin `new`
#[derive(Debug, Clone, Copy, PartialEq)]
struct Overlap {
    old: usize,
    new: usize,
    fraction: f64,
}

/// Two-pointer sweep over edge lists sorted in the same direction.
fn overlaps(old: &[f64], new: &[f64], descending: bool) -> Vec<Overlap> {
    let less = |a: f64, b: f64| if descending { a > b } else { a < b };
    let n_old = old.len().saturating_sub(1);
    let n_new = new.len().saturating_sub(1);
    let mut plan = Vec::with_capacity(n_old + n_new);
    let (mut i_old, mut i_new) = (0, 0);
    while i_old < n_old && i_new < n_new {
        let (old_low, old_high) = (old[i_old], old[i_old + 1]);
        let (new_low, new_high) = (new[i_new], new[i_new + 1]);
        if !less(old_low, new_high) {
            i_new += 1;
        } else if !less(new_low, old_high) {
            i_old += 1;
        } else {
            let high = if less(new_high, old_high) { new_high } else { old_high };
            let low = if less(new_low, old_low) { old_low } else { new_low };
            let width = (old_high - old_low).abs();
            if width > 0.0 {
                plan.push(Overlap {
                    old: i_old,
                    new: i_new,
                    fraction: (high - low).abs() / width,
                });
            }
            if less(old_high, new_high) {
                i_old += 1;
            } else {
                i_new += 1;
            }
        }
    }
    plan
}

/// Edge values per lane; 1-D edges are shared by all lanes
struct EdgeLanes {
    values: Vec<f64>,
    len: usize,
    per_lane: bool,
}

impl EdgeLanes {
    fn new(edges: &VariableView<'_>, dim: &Dim, outer: &Dimensions) -> Result<Self> {
        let len = edges.dims().extent(dim)?;
        if edges.dims().ndim() == 1 {
            let values = edges.to_variable().values_array().to_f64()?;
            return Ok(Self { values, len, per_lane: false });
        }
        let mut target = outer.clone();
        target.add_inner(dim.clone(), len)?;
        let values = edges.broadcast(&target)?.to_variable().values_array().to_f64()?;
        Ok(Self { values, len, per_lane: true })
    }

    fn lane(&self, index: usize) -> &[f64] {
        if self.per_lane {
            &self.values[index * self.len..(index + 1) * self.len]
        } else {
            &self.values
        }
    }

    fn lanes(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.values.chunks(self.len.max(1))
    }

    fn is_sorted_by(&self, ordered: fn(f64, f64) -> bool) -> bool {
        self.lanes().all(|lane| lane.windows(2).all(|w| ordered(w[0], w[1])))
    }
}

/// Common direction of both edge sets; `true` for descending
fn orientation(old: &EdgeLanes, new: &EdgeLanes) -> Result<bool> {
    let ascending = |a: f64, b: f64| a <= b;
    let descending = |a: f64, b: f64| a >= b;
    if old.is_sorted_by(ascending) && new.is_sorted_by(ascending) {
        Ok(false)
    } else if old.is_sorted_by(descending) && new.is_sorted_by(descending) {
        Ok(true)
    } else {
        Err(RuLaVarError::BinEdgeError(
            "Bin edges must be sorted, in the same direction for old and new edges".to_string(),
        ))
    }
}

fn check_edges(edges: &VariableView<'_>, what: &str) -> Result<()> {
    if !edges.dtype().is_float() {
        return Err(RuLaVarError::TypeError(format!(
            "{what} bin edges must be floating point, got {}",
            edges.dtype()
        )));
    }
    if edges.has_variances() {
        return Err(RuLaVarError::VariancesError(format!(
            "{what} bin edges cannot have variances"
        )));
    }
    Ok(())
}

/// Rebin `var` along `dim` from `old_edges` to `new_edges`.
///
/// # Errors
///
/// Returns an error if:
/// - the unit of `var` is neither counts nor dimensionless (`UnitError`)
/// - `old_edges` are not bin edges of `var` along `dim`, or the edges are
///   not sorted in a common direction (`BinEdgeError`)
/// - the data is not float or bool, or the edges are not float (`TypeError`)
/// - `dim` is not the inner dimension and the edges are multi-dimensional
///   (`NotImplemented`)
pub fn rebin(
    var: &VariableView<'_>,
    dim: &Dim,
    old_edges: &VariableView<'_>,
    new_edges: &VariableView<'_>,
) -> Result<Variable> {
    let unit = var.unit();
    if !(unit.is_counts() || unit.is_dimensionless()) {
        return Err(RuLaVarError::UnitError(format!(
            "Only data in counts or dimensionless can be rebinned, got {unit}"
        )));
    }
    if !is_bin_edge(dim, old_edges.dims(), var.dims()) {
        return Err(RuLaVarError::BinEdgeError(format!(
            "{} are not bin edges of {} along '{dim}'",
            old_edges.dims(),
            var.dims()
        )));
    }
    let new_len = new_edges.dims().extent(dim)?;
    if new_len == 0 {
        return Err(RuLaVarError::BinEdgeError(format!(
            "New edges along '{dim}' are empty"
        )));
    }
    check_edges(old_edges, "Old")?;
    check_edges(new_edges, "New")?;
    if !matches!(var.dtype(), DType::Float64 | DType::Float32 | DType::Bool) {
        return Err(RuLaVarError::TypeError(format!(
            "Cannot rebin data of dtype {}",
            var.dtype()
        )));
    }
    let inner = var.dims().inner() == Some(dim);
    if !inner && (old_edges.dims().ndim() > 1 || new_edges.dims().ndim() > 1) {
        return Err(RuLaVarError::NotImplemented(
            "Rebinning a non-inner dimension with multi-dimensional edges".to_string(),
        ));
    }

    let mut outer = var.dims().clone();
    outer.erase(dim)?;
    let old = EdgeLanes::new(old_edges, dim, &outer)?;
    let new = EdgeLanes::new(new_edges, dim, &outer)?;
    let descending = orientation(&old, &new)?;
    let mut out_dims = var.dims().clone();
    out_dims.resize(dim, new_len - 1)?;
    debug!(dim = %dim, from = %var.dims(), to = %out_dims, inner, descending, "rebinning");

    let data = var.to_variable();
    match data.dtype() {
        DType::Float64 => rebin_typed::<f64>(&data, dim, inner, &old, &new, descending, out_dims),
        DType::Float32 => rebin_typed::<f32>(&data, dim, inner, &old, &new, descending, out_dims),
        _ => rebin_typed::<bool>(&data, dim, inner, &old, &new, descending, out_dims),
    }
}

fn rebin_typed<T: Rebinnable>(
    data: &Variable,
    dim: &Dim,
    inner: bool,
    old: &EdgeLanes,
    new: &EdgeLanes,
    descending: bool,
    out_dims: Dimensions,
) -> Result<Variable> {
    let volume = out_dims.volume();
    if volume == 0 || data.dims().volume() == 0 {
        let values = T::into_array(vec![T::default(); volume]);
        let variances = data.has_variances().then(|| T::into_array(vec![T::default(); volume]));
        return Variable::new(out_dims, data.unit(), values, variances);
    }
    let (values, variances) = if inner {
        let old_bins = data.dims().extent(dim)?;
        let new_bins = out_dims.extent(dim)?;
        let shared = (!old.per_lane && !new.per_lane).then(|| overlaps(old.lane(0), new.lane(0), descending));
        let plan_for = |lane: usize| -> Vec<Overlap> {
            match &shared {
                Some(plan) => plan.clone(),
                None => overlaps(old.lane(lane), new.lane(lane), descending),
            }
        };
        let values = rebin_inner(data.values::<T>()?, old_bins, new_bins, &plan_for);
        let variances = data
            .variances_array()
            .map(|_| data.variances::<T>().map(|v| rebin_inner(v, old_bins, new_bins, &plan_for)))
            .transpose()?;
        (values, variances)
    } else {
        let axis = Axis(data.dims().expect_index(dim)?);
        let plan = overlaps(old.lane(0), new.lane(0), descending);
        let shape = out_dims.shape();
        let values = rebin_outer(&data.to_ndarray::<T>()?, axis, &plan, &shape);
        let variances = match data.variances_array() {
            Some(_) => {
                let array = ArrayD::from_shape_vec(IxDyn(&data.dims().shape()), data.variances::<T>()?.to_vec())?;
                Some(rebin_outer(&array, axis, &plan, &shape))
            }
            None => None,
        };
        (values, variances)
    };
    Variable::new(out_dims, data.unit(), T::into_array(values), variances.map(T::into_array))
}

fn rebin_inner<T, F>(data: &[T], old_bins: usize, new_bins: usize, plan_for: &F) -> Vec<T>
where
    T: Rebinnable,
    F: Fn(usize) -> Vec<Overlap> + Sync,
{
    let mut out = vec![T::default(); data.len() / old_bins.max(1) * new_bins];
    out.par_chunks_mut(new_bins)
        .zip(data.par_chunks(old_bins.max(1)))
        .enumerate()
        .for_each(|(lane, (out, data))| {
            for overlap in plan_for(lane) {
                T::add_fraction(&mut out[overlap.new], data[overlap.old], overlap.fraction);
            }
        });
    out
}

fn rebin_outer<T: Rebinnable>(data: &ArrayD<T>, axis: Axis, plan: &[Overlap], shape: &[usize]) -> Vec<T> {
    let mut out = ArrayD::<T>::default(IxDyn(shape));
    Zip::from(out.lanes_mut(axis))
        .and(data.lanes(axis))
        .par_for_each(|mut out, data| {
            for overlap in plan {
                T::add_fraction(&mut out[overlap.new], data[overlap.old], overlap.fraction);
            }
        });
    out.into_raw_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Unit;
    use crate::variable::make_variable;
    use approx::assert_relative_eq;

    fn edges(dim: &str, values: Vec<f64>) -> Variable {
        make_variable(Dimensions::one(dim, values.len()), Unit::M, values, None).unwrap()
    }

    #[test]
    fn test_overlap_sweep() {
        let plan = overlaps(&[0.0, 1.0, 2.0], &[0.0, 0.5, 2.0], false);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0], Overlap { old: 0, new: 0, fraction: 0.5 });
        assert_eq!(plan[1], Overlap { old: 0, new: 1, fraction: 0.5 });
        assert_eq!(plan[2], Overlap { old: 1, new: 1, fraction: 1.0 });
    }

    #[test]
    fn test_rebin_inner_conserves_counts() {
        let data = make_variable(
            Dimensions::new([("y", 2), ("x", 4)]).unwrap(),
            Unit::COUNTS,
            vec![1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0],
            None,
        )
        .unwrap();
        let old = edges("x", vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        let new = edges("x", vec![0.0, 2.0, 4.0]);
        let x = Dim::from("x");
        let out = rebin(&data.view(), &x, &old.view(), &new.view()).unwrap();
        assert_eq!(out.values::<f64>().unwrap(), &[3.0, 7.0, 30.0, 70.0]);

        let fine = edges("x", vec![0.0, 0.5, 1.0, 4.0]);
        let out = rebin(&data.view(), &x, &old.view(), &fine.view()).unwrap();
        let values = out.values::<f64>().unwrap();
        assert_relative_eq!(values[0], 0.5);
        assert_relative_eq!(values[1], 0.5);
        assert_relative_eq!(values[2], 9.0);
    }

    #[test]
    fn test_rebin_outer_dim() {
        let data = make_variable(
            Dimensions::new([("x", 2), ("y", 2)]).unwrap(),
            Unit::COUNTS,
            vec![1.0, 2.0, 3.0, 4.0],
            Some(vec![1.0, 1.0, 1.0, 1.0]),
        )
        .unwrap();
        let old = edges("x", vec![0.0, 1.0, 2.0]);
        let new = edges("x", vec![0.0, 2.0]);
        let out = rebin(&data.view(), &Dim::from("x"), &old.view(), &new.view()).unwrap();
        assert_eq!(out.dims(), &Dimensions::new([("x", 1), ("y", 2)]).unwrap());
        assert_eq!(out.values::<f64>().unwrap(), &[4.0, 6.0]);
        assert_eq!(out.variances::<f64>().unwrap(), &[2.0, 2.0]);
    }

    #[test]
    fn test_rebin_descending_and_bool() {
        let data = make_variable(Dimensions::one("x", 2), Unit::ONE, vec![false, true], None).unwrap();
        let old = edges("x", vec![2.0, 1.0, 0.0]);
        let new = edges("x", vec![2.0, 0.5, 0.0]);
        let out = rebin(&data.view(), &Dim::from("x"), &old.view(), &new.view()).unwrap();
        assert_eq!(out.values::<bool>().unwrap(), &[true, true]);
    }

    #[test]
    fn test_rebin_preconditions() {
        let x = Dim::from("x");
        let data = make_variable(Dimensions::one("x", 2), Unit::M, vec![1.0, 2.0], None).unwrap();
        let old = edges("x", vec![0.0, 1.0, 2.0]);
        let new = edges("x", vec![0.0, 2.0]);
        assert!(matches!(rebin(&data.view(), &x, &old.view(), &new.view()), Err(RuLaVarError::UnitError(_))));

        let counts = make_variable(Dimensions::one("x", 2), Unit::COUNTS, vec![1.0, 2.0], None).unwrap();
        let unsorted = edges("x", vec![0.0, 2.0, 1.0]);
        assert!(matches!(
            rebin(&counts.view(), &x, &unsorted.view(), &new.view()),
            Err(RuLaVarError::BinEdgeError(_))
        ));
        assert!(matches!(
            rebin(&counts.view(), &x, &new.view(), &new.view()),
            Err(RuLaVarError::BinEdgeError(_))
        ));
        let reversed = edges("x", vec![2.0, 0.0]);
        assert!(matches!(
            rebin(&counts.view(), &x, &old.view(), &reversed.view()),
            Err(RuLaVarError::BinEdgeError(_))
        ));
    }
}
