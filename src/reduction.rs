//! Reductions along a dimension
//!
//! Every reduction pre-sizes an output without the reduced dimension,
//! initialises it with the operator's identity and hands it to the
//! accumulate engine.
//!
//! ## Organization
//!
//! - [`StatOperation`]: named reductions for [`reduce`]
//! - sums: [`sum`], [`sum_masked`], [`sum_into`], [`sum_masked_into`]
//! - means: [`mean`], [`mean_masked`], [`mean_into`]
//! - selections: [`min`], [`max`], [`all`], [`any`]

use crate::accumulate::accumulate_in_place;
use crate::arithmetic::{astype, dimensionless_like, divide, multiply};
use crate::dimensions::{Dim, Dimensions};
use crate::dtype::{DType, Numeric};
use crate::errors::{Result, RuLaVarError};
use crate::ops::{And, ApplyMask, Max, Min, Or, Sum};
use crate::transform::transform_binary;
use crate::units::Unit;
use crate::variable::{Variable, VariableView};
use tracing::debug;

/// Supported reductions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatOperation {
    /// Arithmetic mean
    Mean,
    /// Sum of values
    Sum,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// Logical and
    All,
    /// Logical or
    Any,
}

impl StatOperation {
    /// Get the string representation of the operation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Sum => "sum",
            Self::Min => "minimum",
            Self::Max => "maximum",
            Self::All => "all",
            Self::Any => "any",
        }
    }
}

/// Types that can be reduced along a named dimension
pub trait StatisticalReduction {
    /// Perform a reduction along `dim`
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the dimension is missing
    /// - the operation is not defined for the dtype
    fn reduce_along(&self, dim: &Dim, operation: StatOperation) -> Result<Variable>;
}

impl StatisticalReduction for VariableView<'_> {
    fn reduce_along(&self, dim: &Dim, operation: StatOperation) -> Result<Variable> {
        reduce(self, dim, operation)
    }
}

impl StatisticalReduction for Variable {
    fn reduce_along(&self, dim: &Dim, operation: StatOperation) -> Result<Variable> {
        reduce(&self.view(), dim, operation)
    }
}

/// Run `operation` along `dim`.
///
/// # Errors
///
/// See the individual reductions.
pub fn reduce(var: &VariableView<'_>, dim: &Dim, operation: StatOperation) -> Result<Variable> {
    debug!(operation = operation.as_str(), dim = %dim, dims = %var.dims(), "reducing");
    match operation {
        StatOperation::Mean => mean(var, dim),
        StatOperation::Sum => sum(var, dim),
        StatOperation::Min => min(var, dim),
        StatOperation::Max => max(var, dim),
        StatOperation::All => all(var, dim),
        StatOperation::Any => any(var, dim),
    }
}

fn reduced_dims(dims: &Dimensions, dim: &Dim) -> Result<Dimensions> {
    let mut out = dims.clone();
    out.erase(dim)?;
    Ok(out)
}

/// Bool sums count into int64
fn sum_dtype(dtype: DType) -> DType {
    if dtype == DType::Bool {
        DType::Int64
    } else {
        dtype
    }
}

/// Sum along `dim`. Bool input counts into int64.
///
/// # Errors
///
/// Returns `DimensionNotFound` if `var` does not depend on `dim` and
/// `TypeError` for non-summable dtypes.
pub fn sum(var: &VariableView<'_>, dim: &Dim) -> Result<Variable> {
    let dims = reduced_dims(var.dims(), dim)?;
    let mut out = Variable::zeros(dims, var.unit(), sum_dtype(var.dtype()), var.has_variances())?;
    accumulate_in_place(&Sum, &mut out, var)?;
    Ok(out)
}

fn check_output(var: &VariableView<'_>, dim: &Dim, out: &Variable, dtype: DType) -> Result<()> {
    let expected = reduced_dims(var.dims(), dim)?;
    if out.dims() != &expected {
        return Err(RuLaVarError::DimensionError(format!(
            "Output dimensions {} do not match the reduced dimensions {expected}",
            out.dims()
        )));
    }
    if out.dtype() != dtype {
        return Err(RuLaVarError::TypeError(format!(
            "Output dtype {} does not match the expected dtype {dtype}",
            out.dtype()
        )));
    }
    if var.has_variances() && !out.has_variances() {
        return Err(RuLaVarError::VariancesError(
            "Output has no variances but the input does".to_string(),
        ));
    }
    Ok(())
}

/// Sum along `dim` into a pre-sized `out`, overwriting its content.
///
/// # Errors
///
/// Returns `DimensionError`, `TypeError` or `VariancesError` if `out` does
/// not have the dims, dtype or variances of the sum. `out` is untouched on
/// error.
pub fn sum_into(var: &VariableView<'_>, dim: &Dim, out: &mut Variable) -> Result<()> {
    check_output(var, dim, out, sum_dtype(var.dtype()))?;
    let mut total = Variable::zeros(out.dims().clone(), var.unit(), out.dtype(), out.has_variances())?;
    accumulate_in_place(&Sum, &mut total, var)?;
    out.view_mut().assign(&total.view())
}

/// Logical and of the masks depending on `dim`, true where selected.
///
/// Returns `None` if no mask depends on `dim`.
fn selection(masks: &[Variable], dim: &Dim) -> Result<Option<Variable>> {
    let mut combined: Option<Variable> = None;
    for mask in masks.iter().filter(|m| m.dims().contains(dim)) {
        if mask.dtype() != DType::Bool {
            return Err(RuLaVarError::TypeError(format!(
                "Masks must be bool, got {}",
                mask.dtype()
            )));
        }
        let mut mask = mask.clone();
        mask.set_unit(Unit::NONE);
        combined = Some(match combined {
            None => mask,
            Some(acc) => transform_binary(&And, &acc.view(), &mask.view())?,
        });
    }
    Ok(combined)
}

/// Zero the unselected elements of `var`
fn apply_selection(var: &VariableView<'_>, selected: &Variable) -> Result<Variable> {
    if var.dtype() == DType::Bool {
        let mut selected = selected.clone();
        selected.set_unit(var.unit());
        return transform_binary(&And, var, &selected.view());
    }
    transform_binary(&ApplyMask, var, &selected.view())
}

/// Sum along `dim` of the elements selected by all masks depending on `dim`.
///
/// A mask value of `true` selects an element. Masks not depending on `dim`
/// are ignored.
///
/// # Errors
///
/// See [`sum`]; masks must be bool.
pub fn sum_masked(var: &VariableView<'_>, dim: &Dim, masks: &[Variable]) -> Result<Variable> {
    match selection(masks, dim)? {
        None => sum(var, dim),
        Some(selected) => sum(&apply_selection(var, &selected)?.view(), dim),
    }
}

/// [`sum_masked`] into a pre-sized `out`.
///
/// # Errors
///
/// See [`sum_into`].
pub fn sum_masked_into(
    var: &VariableView<'_>,
    dim: &Dim,
    masks: &[Variable],
    out: &mut Variable,
) -> Result<()> {
    match selection(masks, dim)? {
        None => sum_into(var, dim, out),
        Some(selected) => sum_into(&apply_selection(var, &selected)?.view(), dim, out),
    }
}

/// Float32 sums keep float32; everything else is averaged in float64.
fn mean_dtype(dtype: DType) -> DType {
    if dtype == DType::Float32 {
        DType::Float32
    } else {
        DType::Float64
    }
}

fn scale_by_count(sum: Variable, count: usize) -> Result<Variable> {
    let unit = dimensionless_like(sum.unit());
    let factor = match sum.dtype() {
        DType::Float32 => Variable::scalar(1.0 / count as f32, unit),
        DType::Int64 | DType::Int32 => {
            let sum = astype(&sum.view(), DType::Float64)?;
            return scale_by_count(sum, count);
        }
        _ => Variable::scalar(1.0 / count as f64, unit),
    };
    multiply(&sum.view(), &factor.view())
}

/// Mean along `dim`; integer input gives float64.
///
/// An empty `dim` gives NaN.
///
/// # Errors
///
/// See [`sum`].
pub fn mean(var: &VariableView<'_>, dim: &Dim) -> Result<Variable> {
    let count = var.dims().extent(dim)?;
    let total = sum(var, dim)?;
    scale_by_count(total, count)
}

/// Mean along `dim` of the selected elements, divided by the number of
/// selected elements.
///
/// # Errors
///
/// See [`sum_masked`].
pub fn mean_masked(var: &VariableView<'_>, dim: &Dim, masks: &[Variable]) -> Result<Variable> {
    let Some(selected) = selection(masks, dim)? else {
        return mean(var, dim);
    };
    let mut total = sum(&apply_selection(var, &selected)?.view(), dim)?;
    if total.dtype().is_int() {
        total = astype(&total.view(), DType::Float64)?;
    }
    let count = sum(&selected.view(), dim)?;
    let mut count = astype(&count.view(), mean_dtype(total.dtype()))?;
    count.set_unit(dimensionless_like(total.unit()));
    divide(&total.view(), &count.view())
}

/// Mean along `dim` into a pre-sized float `out`.
///
/// # Errors
///
/// Returns `TypeError` if `out` is not of the mean's dtype (integer outputs
/// are always rejected), `VariancesError` unless `out` and the input agree
/// on variances, plus the errors of [`sum_into`]. `out` is untouched on
/// error.
pub fn mean_into(var: &VariableView<'_>, dim: &Dim, out: &mut Variable) -> Result<()> {
    if !out.dtype().is_float() {
        return Err(RuLaVarError::TypeError(format!(
            "Cannot store a mean in an output of dtype {}",
            out.dtype()
        )));
    }
    check_output(var, dim, out, mean_dtype(var.dtype()))?;
    if out.has_variances() != var.has_variances() {
        return Err(RuLaVarError::VariancesError(
            "Output and input must both have variances or neither".to_string(),
        ));
    }
    let result = mean(var, dim)?;
    out.view_mut().assign(&result.view())
}

fn filled_with_identity(var: &VariableView<'_>, dims: Dimensions, highest: bool) -> Result<Variable> {
    fn pick<T: Numeric>(highest: bool) -> T {
        if highest {
            T::HIGHEST
        } else {
            T::LOWEST
        }
    }
    let unit = var.unit();
    Ok(match var.dtype() {
        DType::Float64 => Variable::filled(dims, unit, pick::<f64>(highest)),
        DType::Float32 => Variable::filled(dims, unit, pick::<f32>(highest)),
        DType::Int64 => Variable::filled(dims, unit, pick::<i64>(highest)),
        DType::Int32 => Variable::filled(dims, unit, pick::<i32>(highest)),
        other => {
            return Err(RuLaVarError::TypeError(format!(
                "Cannot take the extremum of dtype {other}"
            )))
        }
    })
}

/// Minimum along `dim`; NaN elements are skipped.
///
/// # Errors
///
/// Returns `TypeError` for non-numeric dtypes and `VariancesError` for
/// input with variances.
pub fn min(var: &VariableView<'_>, dim: &Dim) -> Result<Variable> {
    let mut out = filled_with_identity(var, reduced_dims(var.dims(), dim)?, true)?;
    accumulate_in_place(&Min, &mut out, var)?;
    Ok(out)
}

/// Maximum along `dim`; NaN elements are skipped.
///
/// # Errors
///
/// See [`min`].
pub fn max(var: &VariableView<'_>, dim: &Dim) -> Result<Variable> {
    let mut out = filled_with_identity(var, reduced_dims(var.dims(), dim)?, false)?;
    accumulate_in_place(&Max, &mut out, var)?;
    Ok(out)
}

/// Logical and along `dim`
///
/// # Errors
///
/// Returns `TypeError` unless the dtype is bool.
pub fn all(var: &VariableView<'_>, dim: &Dim) -> Result<Variable> {
    let mut out = Variable::filled(reduced_dims(var.dims(), dim)?, var.unit(), true);
    accumulate_in_place(&And, &mut out, var)?;
    Ok(out)
}

/// Logical or along `dim`
///
/// # Errors
///
/// Returns `TypeError` unless the dtype is bool.
pub fn any(var: &VariableView<'_>, dim: &Dim) -> Result<Variable> {
    let mut out = Variable::filled(reduced_dims(var.dims(), dim)?, var.unit(), false);
    accumulate_in_place(&Or, &mut out, var)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::ElementArray;
    use crate::variable::make_variable;
    use approx::assert_relative_eq;

    fn grid() -> Variable {
        make_variable(
            Dimensions::new([("y", 2), ("x", 3)]).unwrap(),
            Unit::COUNTS,
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            Some(vec![1.0; 6]),
        )
        .unwrap()
    }

    #[test]
    fn test_stat_operation_names() {
        assert_eq!(StatOperation::Mean.as_str(), "mean");
        assert_eq!(StatOperation::Min.as_str(), "minimum");
        assert_eq!(StatOperation::Any.as_str(), "any");
    }

    #[test]
    fn test_sum_and_mean() {
        let a = grid();
        let x = Dim::from("x");
        let total = sum(&a.view(), &x).unwrap();
        assert_eq!(total.dims(), &Dimensions::one("y", 2));
        assert_eq!(total.values::<f64>().unwrap(), &[6.0, 15.0]);
        assert_eq!(total.variances::<f64>().unwrap(), &[3.0, 3.0]);

        let avg = a.reduce_along(&Dim::from("y"), StatOperation::Mean).unwrap();
        assert_eq!(avg.values::<f64>().unwrap(), &[2.5, 3.5, 4.5]);
        assert_relative_eq!(avg.variances::<f64>().unwrap()[0], 0.5);
        assert_eq!(avg.unit(), Unit::COUNTS);
    }

    #[test]
    fn test_int_mean_is_float_and_bool_sum_counts() {
        let ints = make_variable(Dimensions::one("x", 4), Unit::ONE, vec![1_i64, 2, 3, 4], None).unwrap();
        let avg = mean(&ints.view(), &Dim::from("x")).unwrap();
        assert_eq!(avg.dtype(), DType::Float64);
        assert_eq!(avg.value::<f64>().unwrap(), 2.5);

        let flags = make_variable(Dimensions::one("x", 3), Unit::NONE, vec![true, true, false], None).unwrap();
        let count = sum(&flags.view(), &Dim::from("x")).unwrap();
        assert_eq!(count.value::<i64>().unwrap(), 2);
    }

    #[test]
    fn test_masked_reductions() {
        let a = grid();
        let x = Dim::from("x");
        let keep = make_variable(Dimensions::one("x", 3), Unit::NONE, vec![true, false, true], None).unwrap();
        let unrelated = make_variable(Dimensions::one("y", 2), Unit::NONE, vec![false, false], None).unwrap();
        let masks = vec![keep, unrelated];
        let total = sum_masked(&a.view(), &x, &masks).unwrap();
        assert_eq!(total.values::<f64>().unwrap(), &[4.0, 10.0]);
        let avg = mean_masked(&a.view(), &x, &masks).unwrap();
        assert_eq!(avg.values::<f64>().unwrap(), &[2.0, 5.0]);
        assert_eq!(avg.variances::<f64>().unwrap(), &[0.5, 0.5]);
    }

    #[test]
    fn test_into_variants() {
        let a = grid();
        let x = Dim::from("x");
        let mut out = Variable::filled(Dimensions::one("y", 2), Unit::M, 100.0);
        assert!(matches!(sum_into(&a.view(), &x, &mut out), Err(RuLaVarError::VariancesError(_))));
        assert_eq!(out.values::<f64>().unwrap(), &[100.0, 100.0]);

        out.set_variances(Some(ElementArray::Float64(vec![0.0, 0.0]))).unwrap();
        sum_into(&a.view(), &x, &mut out).unwrap();
        assert_eq!(out.values::<f64>().unwrap(), &[6.0, 15.0]);
        assert_eq!(out.unit(), Unit::COUNTS);

        mean_into(&a.view(), &x, &mut out).unwrap();
        assert_eq!(out.values::<f64>().unwrap(), &[2.0, 5.0]);

        let mut ints = Variable::filled(Dimensions::one("y", 2), Unit::COUNTS, 0_i64);
        assert!(matches!(mean_into(&a.view(), &x, &mut ints), Err(RuLaVarError::TypeError(_))));
    }

    #[test]
    fn test_failed_into_leaves_output_untouched() {
        let x = Dim::from("x");
        let names = make_variable(
            Dimensions::one("x", 2),
            Unit::NONE,
            vec!["a".to_string(), "b".to_string()],
            None,
        )
        .unwrap();
        let mut out = Variable::scalar("keep".to_string(), Unit::M);
        assert!(matches!(sum_into(&names.view(), &x, &mut out), Err(RuLaVarError::TypeError(_))));
        assert_eq!(out.value::<String>().unwrap(), "keep");
        assert_eq!(out.unit(), Unit::M);

        let mask = make_variable(Dimensions::one("x", 2), Unit::NONE, vec![true, false], None).unwrap();
        let result = sum_masked_into(&names.view(), &x, &[mask], &mut out);
        assert!(result.is_err());
        assert_eq!(out.value::<String>().unwrap(), "keep");

        let a = grid();
        let mut plain = Variable::filled(Dimensions::one("y", 2), Unit::M, 100.0);
        assert!(matches!(mean_into(&a.view(), &x, &mut plain), Err(RuLaVarError::VariancesError(_))));
        assert_eq!(plain.values::<f64>().unwrap(), &[100.0, 100.0]);
        assert_eq!(plain.unit(), Unit::M);
    }

    #[test]
    fn test_min_max_skip_nan() {
        let a = make_variable(Dimensions::one("x", 3), Unit::M, vec![2.0, f64::NAN, -1.0], None).unwrap();
        let x = Dim::from("x");
        assert_eq!(min(&a.view(), &x).unwrap().value::<f64>().unwrap(), -1.0);
        assert_eq!(max(&a.view(), &x).unwrap().value::<f64>().unwrap(), 2.0);
        assert!(matches!(min(&grid().view(), &x), Err(RuLaVarError::VariancesError(_))));
    }

    #[test]
    fn test_all_any() {
        let flags = make_variable(
            Dimensions::new([("y", 2), ("x", 2)]).unwrap(),
            Unit::NONE,
            vec![true, true, false, true],
            None,
        )
        .unwrap();
        let x = Dim::from("x");
        assert_eq!(all(&flags.view(), &x).unwrap().values::<bool>().unwrap(), &[true, false]);
        assert_eq!(any(&flags.view(), &x).unwrap().values::<bool>().unwrap(), &[true, true]);
    }
}
