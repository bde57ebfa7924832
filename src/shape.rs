//! Shape operations
//!
//! Every function returns a new contiguous variable; inputs are never
//! modified. Binned variables are handled by gathering their bucket ranges,
//! which keeps the underlying buffer shared.

use crate::bins::concatenate_buckets;
use crate::dimensions::{Dim, Dimensions};
use crate::dtype::DType;
use crate::errors::{Result, RuLaVarError};
use crate::variable::{Slice, StridedOffsets, Variable, VariableView};
use tracing::debug;

fn gathered(view: &VariableView<'_>, dims: Dimensions, offsets: &[usize]) -> Variable {
    Variable::from_parts(
        dims,
        view.unit(),
        view.values_array().gather(offsets),
        view.variances_array().map(|v| v.gather(offsets)),
    )
}

/// Copy holding the entries `indices` along `dim`, in that order.
/// Indices must be in range.
pub(crate) fn take(var: &VariableView<'_>, dim: &Dim, indices: &[usize]) -> Result<Variable> {
    let axis = var.dims().expect_index(dim)?;
    let shape = var.dims().shape();
    let strides = var.strides();
    let inner: Vec<usize> = StridedOffsets::new(&shape[axis + 1..], &strides[axis + 1..], 0).collect();
    let outer = StridedOffsets::new(&shape[..axis], &strides[..axis], var.offset());
    let mut offsets = Vec::with_capacity(outer.len() * indices.len() * inner.len());
    for base in outer {
        for &i in indices {
            let start = base + i * strides[axis];
            offsets.extend(inner.iter().map(|o| start + o));
        }
    }
    let mut dims = var.dims().clone();
    dims.resize(dim, indices.len())?;
    Ok(gathered(var, dims, &offsets))
}

/// Reorder the entries along `dim` by `indices`; entries may repeat.
///
/// # Errors
///
/// Returns `DimensionError` for out-of-range indices.
pub fn permute(var: &VariableView<'_>, dim: &Dim, indices: &[usize]) -> Result<Variable> {
    let extent = var.dims().extent(dim)?;
    if let Some(&bad) = indices.iter().find(|&&i| i >= extent) {
        return Err(RuLaVarError::DimensionError(format!(
            "Index {bad} out of range for '{dim}' of extent {extent}"
        )));
    }
    take(var, dim, indices)
}

/// Reverse the order of the entries along `dim`.
///
/// # Errors
///
/// Returns `DimensionNotFound` if `var` does not depend on `dim`.
pub fn reverse(var: &VariableView<'_>, dim: &Dim) -> Result<Variable> {
    let extent = var.dims().extent(dim)?;
    let indices: Vec<usize> = (0..extent).rev().collect();
    take(var, dim, &indices)
}

/// Copy with dims in the given order.
///
/// # Errors
///
/// Returns `DimensionError` unless `order` is a permutation of the dims.
pub fn transpose(var: &VariableView<'_>, order: &[Dim]) -> Result<Variable> {
    Ok(var.transpose(order)?.to_variable())
}

/// Copy broadcast to `dims`.
///
/// # Errors
///
/// Returns `DimensionError` if `dims` does not include the dims of `var`.
pub fn broadcast(var: &VariableView<'_>, dims: &Dimensions) -> Result<Variable> {
    Ok(var.broadcast(dims)?.to_variable())
}

/// Change the extent of `dim`. All elements of the result are default
/// initialised (zero, false, empty).
///
/// # Errors
///
/// Returns `TypeError` for binned variables.
pub fn resize(var: &VariableView<'_>, dim: &Dim, size: usize) -> Result<Variable> {
    let mut dims = var.dims().clone();
    dims.resize(dim, size)?;
    Variable::zeros(dims, var.unit(), var.dtype(), var.has_variances())
}

/// Keep the entries along the dim of `mask` where the mask is true.
///
/// # Errors
///
/// Returns `DimensionError` unless `mask` is 1-D and matches the extent of
/// `var` along its dim, and `TypeError` unless it is bool.
pub fn filter(var: &VariableView<'_>, mask: &VariableView<'_>) -> Result<Variable> {
    if mask.dims().ndim() != 1 {
        return Err(RuLaVarError::DimensionError(format!(
            "Filter mask must be one-dimensional, got {}",
            mask.dims()
        )));
    }
    if mask.dtype() != DType::Bool {
        return Err(RuLaVarError::TypeError(format!(
            "Filter mask must be bool, got {}",
            mask.dtype()
        )));
    }
    let dim = mask.dims().label(0).clone();
    if var.dims().extent(&dim)? != mask.dims().extent_at(0) {
        return Err(RuLaVarError::DimensionError(format!(
            "Filter mask {} does not match {}",
            mask.dims(),
            var.dims()
        )));
    }
    let indices: Vec<usize> = mask
        .to_vec::<bool>()?
        .into_iter()
        .enumerate()
        .filter_map(|(i, keep)| keep.then_some(i))
        .collect();
    take(var, &dim, &indices)
}

/// Concatenate along `dim`.
///
/// Operands lacking `dim` count as a single slice along it. Binned operands
/// whose bucket dim is `dim` are concatenated bucket by bucket instead.
///
/// # Errors
///
/// Returns `TypeError`, `UnitError` or `VariancesError` if the operands
/// differ in dtype, unit or presence of variances, and `DimensionError` if
/// their other dims differ.
pub fn concatenate(a: &VariableView<'_>, b: &VariableView<'_>, dim: &Dim) -> Result<Variable> {
    if a.dtype() != b.dtype() {
        return Err(RuLaVarError::TypeError(format!(
            "Cannot concatenate dtypes {} and {}",
            a.dtype(),
            b.dtype()
        )));
    }
    a.unit().expect_equal(&b.unit(), "concatenate")?;
    if a.has_variances() != b.has_variances() {
        return Err(RuLaVarError::VariancesError(
            "Cannot concatenate a variable with variances and one without".to_string(),
        ));
    }
    if a.dtype() == DType::Bins
        && a.variable().bins()?.dim() == dim
        && b.variable().bins()?.dim() == dim
    {
        debug!(dim = %dim, "concatenating bucket contents");
        return concatenate_buckets(a, b);
    }

    let mut rest = a.dims().clone();
    if rest.contains(dim) {
        rest.erase(dim)?;
    }
    let mut rest_b = b.dims().clone();
    if rest_b.contains(dim) {
        rest_b.erase(dim)?;
    }
    if !(rest.includes(&rest_b) && rest_b.includes(&rest)) {
        return Err(RuLaVarError::DimensionError(format!(
            "Cannot concatenate {} and {} along '{dim}'",
            a.dims(),
            b.dims()
        )));
    }

    let extent = |v: &VariableView<'_>| v.dims().extent(dim).unwrap_or(1);
    let outer_first = |v: &VariableView<'_>| -> Result<Vec<usize>> {
        let mut major = rest.clone();
        major.add_outer(dim.clone(), extent(v))?;
        let view = if v.dims().contains(dim) {
            let order: Vec<Dim> = major.labels().cloned().collect();
            v.transpose(&order)?
        } else {
            v.broadcast(&major)?
        };
        Ok(view.offsets().collect())
    };
    let offsets_a = outer_first(a)?;
    let offsets_b = outer_first(b)?;
    let values = a
        .values_array()
        .gather(&offsets_a)
        .append(&b.values_array().gather(&offsets_b))?;
    let variances = match (a.variances_array(), b.variances_array()) {
        (Some(va), Some(vb)) => Some(va.gather(&offsets_a).append(&vb.gather(&offsets_b))?),
        _ => None,
    };
    let mut major = rest.clone();
    major.add_outer(dim.clone(), extent(a) + extent(b))?;
    let joined = Variable::from_parts(major, a.unit(), values, variances);

    if !a.dims().contains(dim) || a.dims().index_of(dim) == Some(0) {
        return Ok(joined);
    }
    let mut out_dims = a.dims().clone();
    out_dims.resize(dim, extent(a) + extent(b))?;
    let order: Vec<Dim> = out_dims.labels().cloned().collect();
    transpose(&joined.view(), &order)
}

/// Split along `dim` at the given boundaries.
///
/// `boundaries` must be non-decreasing and within `0..=extent`; piece `i`
/// spans `boundaries[i]..boundaries[i + 1]`.
///
/// # Errors
///
/// Returns `DimensionError` for invalid boundaries.
pub fn split(var: &VariableView<'_>, dim: &Dim, boundaries: &[usize]) -> Result<Vec<Variable>> {
    let extent = var.dims().extent(dim)?;
    let valid = boundaries.windows(2).all(|w| w[0] <= w[1])
        && boundaries.last().map_or(true, |&last| last <= extent);
    if !valid {
        return Err(RuLaVarError::DimensionError(format!(
            "Invalid split boundaries {boundaries:?} for '{dim}' of extent {extent}"
        )));
    }
    boundaries
        .windows(2)
        .map(|w| Ok(var.slice(Slice::range(dim.clone(), w[0], w[1]))?.to_variable()))
        .collect()
}

/// Split `dim` into the dims of `into`, in place of `dim`.
///
/// # Errors
///
/// Returns `DimensionError` if the volume of `into` differs from the extent
/// of `dim` or a new label collides with an existing one.
pub fn fold(var: &VariableView<'_>, dim: &Dim, into: &Dimensions) -> Result<Variable> {
    let index = var.dims().expect_index(dim)?;
    let extent = var.dims().extent_at(index);
    if into.volume() != extent {
        return Err(RuLaVarError::DimensionError(format!(
            "Cannot fold '{dim}' of extent {extent} into {into}"
        )));
    }
    let mut entries: Vec<(Dim, usize)> = var.dims().iter().map(|(d, e)| (d.clone(), e)).collect();
    entries.splice(index..=index, into.iter().map(|(d, e)| (d.clone(), e)));
    let dims = Dimensions::new(entries)?;
    var.to_variable().reshape(dims)
}

/// Merge the adjacent dims `dims` (in order) into a single dim `to`.
///
/// # Errors
///
/// Returns `DimensionError` if `dims` is empty, not adjacent and in order
/// in `var`, or `to` collides with a remaining label.
pub fn flatten(var: &VariableView<'_>, dims: &[Dim], to: impl Into<Dim>) -> Result<Variable> {
    let to = to.into();
    let first = match dims.first() {
        Some(d) => var.dims().expect_index(d)?,
        None => {
            return Err(RuLaVarError::DimensionError(
                "Cannot flatten an empty list of dims".to_string(),
            ))
        }
    };
    for (k, d) in dims.iter().enumerate() {
        if var.dims().index_of(d) != Some(first + k) {
            return Err(RuLaVarError::DimensionError(format!(
                "Dims to flatten must be adjacent and in order in {}",
                var.dims()
            )));
        }
    }
    let volume: usize = (first..first + dims.len()).map(|i| var.dims().extent_at(i)).product();
    let mut entries: Vec<(Dim, usize)> = var.dims().iter().map(|(d, e)| (d.clone(), e)).collect();
    entries.splice(first..first + dims.len(), std::iter::once((to, volume)));
    let out = Dimensions::new(entries)?;
    var.to_variable().reshape(out)
}
