//! Labeled, unit-aware arrays
//!
//! A [`Variable`] couples [`Dimensions`], a [`Unit`] and a shared buffer of
//! values with optional variances. Buffers are reference counted and copied
//! on the first mutation while shared, so a `Variable` behaves like a value.
//!
//! Views ([`VariableView`], [`VariableViewMut`]) address a strided subset of
//! a variable without copying.

mod view;

pub use view::{Slice, StridedOffsets, VariableView, VariableViewMut};

use crate::bins::BinArray;
use crate::dimensions::{Dim, Dimensions};
use crate::dtype::{DType, Element, ElementArray, Numeric};
use crate::errors::{Result, RuLaVarError};
use crate::units::Unit;
use ndarray::{ArrayD, IxDyn};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a buffer allocation, used to detect self-aliasing operands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        Self(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug)]
struct Buffer {
    id: BufferId,
    values: ElementArray,
    variances: Option<ElementArray>,
}

impl Buffer {
    fn new(values: ElementArray, variances: Option<ElementArray>) -> Self {
        Self {
            id: BufferId::next(),
            values,
            variances,
        }
    }
}

// A copied buffer is a new allocation and gets a fresh id.
impl Clone for Buffer {
    fn clone(&self) -> Self {
        Self::new(self.values.clone(), self.variances.clone())
    }
}

/// Typed, unit-aware N-dimensional array with named dimensions
#[derive(Debug, Clone)]
pub struct Variable {
    dims: Dimensions,
    unit: Unit,
    buffer: Arc<Buffer>,
}

/// Create a variable from typed values and optional variances.
///
/// # Errors
///
/// Returns an error if:
/// - the number of values does not match the volume of `dims`
/// - variances are given for a non-floating-point dtype
/// - the number of variances differs from the number of values
pub fn make_variable<T: Element>(
    dims: Dimensions,
    unit: Unit,
    values: Vec<T>,
    variances: Option<Vec<T>>,
) -> Result<Variable> {
    Variable::new(dims, unit, T::into_array(values), variances.map(T::into_array))
}

/// Values `start, start + step, ...` below `stop` along `dim`.
///
/// # Errors
///
/// Returns `Generic` if `step` is zero or not finite.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn arange<T: Numeric>(dim: impl Into<Dim>, start: T, stop: T, step: T, unit: Unit) -> Result<Variable> {
    let (first, last, step) = (start.as_f64(), stop.as_f64(), step.as_f64());
    if step == 0.0 || !step.is_finite() {
        return Err(RuLaVarError::Generic(format!("Invalid arange step {step}")));
    }
    let n = ((last - first) / step).ceil().max(0.0) as usize;
    let values = (0..n).map(|i| T::cast_from_f64(first + i as f64 * step)).collect();
    make_variable(Dimensions::one(dim, n), unit, values, None)
}

/// `num` equally spaced float64 values from `start` to `stop` inclusive.
#[allow(clippy::cast_precision_loss)]
pub fn linspace(dim: impl Into<Dim>, start: f64, stop: f64, num: usize, unit: Unit) -> Variable {
    let step = if num > 1 { (stop - start) / (num - 1) as f64 } else { 0.0 };
    let values: Vec<f64> = (0..num)
        .map(|i| if i + 1 == num && num > 1 { stop } else { start + i as f64 * step })
        .collect();
    Variable::from_parts(Dimensions::one(dim, num), unit, ElementArray::Float64(values), None)
}

impl Variable {
    /// Create a variable from untyped buffers, validating their shape and dtype.
    ///
    /// # Errors
    ///
    /// See [`make_variable`].
    pub fn new(
        dims: Dimensions,
        unit: Unit,
        values: ElementArray,
        variances: Option<ElementArray>,
    ) -> Result<Self> {
        if values.len() != dims.volume() {
            return Err(RuLaVarError::DimensionError(format!(
                "Got {} values for dimensions {dims} of volume {}",
                values.len(),
                dims.volume()
            )));
        }
        if let Some(variances) = &variances {
            check_variances(&values, variances)?;
        }
        Ok(Self::from_parts(dims, unit, values, variances))
    }

    pub(crate) fn from_parts(
        dims: Dimensions,
        unit: Unit,
        values: ElementArray,
        variances: Option<ElementArray>,
    ) -> Self {
        Self {
            dims,
            unit,
            buffer: Arc::new(Buffer::new(values, variances)),
        }
    }

    /// 0-d variable holding `value`
    pub fn scalar<T: Element>(value: T, unit: Unit) -> Self {
        Self::from_parts(Dimensions::scalar(), unit, T::into_array(vec![value]), None)
    }

    /// 0-d variable holding `value` with a variance
    ///
    /// # Errors
    ///
    /// Returns `VariancesError` for non-floating-point `T`.
    pub fn scalar_with_variance<T: Element>(value: T, variance: T, unit: Unit) -> Result<Self> {
        make_variable(Dimensions::scalar(), unit, vec![value], Some(vec![variance]))
    }

    /// Variable with every element set to `value`
    pub fn filled<T: Element>(dims: Dimensions, unit: Unit, value: T) -> Self {
        let values = vec![value; dims.volume()];
        Self::from_parts(dims, unit, T::into_array(values), None)
    }

    /// Default-initialised variable (zero, false or empty string).
    ///
    /// # Errors
    ///
    /// Returns an error for `DType::Bins` or for variances on non-float dtypes.
    pub fn zeros(dims: Dimensions, unit: Unit, dtype: DType, with_variances: bool) -> Result<Self> {
        let values = ElementArray::default_filled(dtype, dims.volume())?;
        let variances = if with_variances {
            Some(ElementArray::default_filled(dtype, dims.volume())?)
        } else {
            None
        };
        Self::new(dims, unit, values, variances)
    }

    /// Numeric variable of ones, with zero variances if requested.
    ///
    /// # Errors
    ///
    /// Returns `TypeError` for non-numeric dtypes.
    pub fn ones(dims: Dimensions, unit: Unit, dtype: DType, with_variances: bool) -> Result<Self> {
        let n = dims.volume();
        let values = match dtype {
            DType::Float64 => ElementArray::Float64(vec![1.0; n]),
            DType::Float32 => ElementArray::Float32(vec![1.0; n]),
            DType::Int64 => ElementArray::Int64(vec![1; n]),
            DType::Int32 => ElementArray::Int32(vec![1; n]),
            other => {
                return Err(RuLaVarError::TypeError(format!(
                    "Cannot create ones of dtype {other}"
                )))
            }
        };
        let variances = if with_variances {
            Some(ElementArray::default_filled(dtype, n)?)
        } else {
            None
        };
        Self::new(dims, unit, values, variances)
    }

    /// Build a variable from an ndarray, labelling its axes in order.
    ///
    /// # Errors
    ///
    /// Returns `DimensionError` if the number of labels differs from the
    /// array's dimensionality or labels repeat.
    pub fn from_ndarray<T: Element, D: Into<Dim>>(
        labels: impl IntoIterator<Item = D>,
        array: &ArrayD<T>,
        unit: Unit,
    ) -> Result<Self> {
        let labels: Vec<Dim> = labels.into_iter().map(Into::into).collect();
        if labels.len() != array.ndim() {
            return Err(RuLaVarError::DimensionError(format!(
                "Got {} labels for an array with {} axes",
                labels.len(),
                array.ndim()
            )));
        }
        let dims = Dimensions::new(labels.into_iter().zip(array.shape().iter().copied()))?;
        let values: Vec<T> = array.iter().cloned().collect();
        make_variable(dims, unit, values, None)
    }

    /// Copy the values into an ndarray with axes in dimension order.
    ///
    /// # Errors
    ///
    /// Returns `TypeError` if `T` is not the variable's dtype.
    pub fn to_ndarray<T: Element>(&self) -> Result<ArrayD<T>> {
        let values = self.values::<T>()?.to_vec();
        Ok(ArrayD::from_shape_vec(IxDyn(&self.dims.shape()), values)?)
    }

    pub fn dims(&self) -> &Dimensions {
        &self.dims
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn set_unit(&mut self, unit: Unit) {
        self.unit = unit;
    }

    pub fn dtype(&self) -> DType {
        self.buffer.values.dtype()
    }

    pub fn has_variances(&self) -> bool {
        self.buffer.variances.is_some()
    }

    pub fn buffer_id(&self) -> BufferId {
        self.buffer.id
    }

    /// True if both refer to the same buffer with the same dims.
    pub fn is_same(&self, other: &Variable) -> bool {
        self.buffer.id == other.buffer.id && self.dims == other.dims
    }

    /// Typed values in row-major order.
    ///
    /// # Errors
    ///
    /// Returns `TypeError` if `T` does not match the dtype.
    pub fn values<T: Element>(&self) -> Result<&[T]> {
        T::slice(&self.buffer.values).ok_or_else(|| type_mismatch::<T>(self.dtype()))
    }

    /// Mutable typed values, copying the buffer first if it is shared.
    ///
    /// # Errors
    ///
    /// Returns `TypeError` if `T` does not match the dtype.
    pub fn values_mut<T: Element>(&mut self) -> Result<&mut [T]> {
        let dtype = self.dtype();
        if dtype != T::DTYPE {
            return Err(type_mismatch::<T>(dtype));
        }
        let (values, _) = self.arrays_mut();
        T::slice_mut(values).ok_or_else(|| type_mismatch::<T>(dtype))
    }

    /// Typed variances.
    ///
    /// # Errors
    ///
    /// Returns `VariancesError` if there are none, `TypeError` on dtype mismatch.
    pub fn variances<T: Element>(&self) -> Result<&[T]> {
        let variances = self.buffer.variances.as_ref().ok_or_else(|| no_variances(&self.dims))?;
        T::slice(variances).ok_or_else(|| type_mismatch::<T>(self.dtype()))
    }

    /// Mutable typed variances, copying the buffer first if it is shared.
    ///
    /// # Errors
    ///
    /// Returns `VariancesError` if there are none, `TypeError` on dtype mismatch.
    pub fn variances_mut<T: Element>(&mut self) -> Result<&mut [T]> {
        let dtype = self.dtype();
        if dtype != T::DTYPE {
            return Err(type_mismatch::<T>(dtype));
        }
        let dims = self.dims.clone();
        match self.arrays_mut() {
            (_, Some(variances)) => T::slice_mut(variances).ok_or_else(|| type_mismatch::<T>(dtype)),
            (_, None) => Err(no_variances(&dims)),
        }
    }

    /// Replace or remove the variances.
    ///
    /// # Errors
    ///
    /// Returns `VariancesError` for non-float dtypes and `DimensionError` or
    /// `TypeError` if the variances do not match the values.
    pub fn set_variances(&mut self, variances: Option<ElementArray>) -> Result<()> {
        if let Some(variances) = &variances {
            check_variances(&self.buffer.values, variances)?;
        }
        let buffer = Arc::make_mut(&mut self.buffer);
        buffer.variances = variances;
        Ok(())
    }

    /// The single value of a 0-d variable.
    ///
    /// # Errors
    ///
    /// Returns `DimensionError` if the variable is not 0-d.
    pub fn value<T: Element>(&self) -> Result<T> {
        self.expect_scalar()?;
        Ok(self.values::<T>()?[0].clone())
    }

    /// The single variance of a 0-d variable.
    ///
    /// # Errors
    ///
    /// Returns `DimensionError` if the variable is not 0-d.
    pub fn variance<T: Element>(&self) -> Result<T> {
        self.expect_scalar()?;
        Ok(self.variances::<T>()?[0].clone())
    }

    /// Bucket ranges and buffer of a binned variable.
    ///
    /// # Errors
    ///
    /// Returns `TypeError` unless the dtype is `Bins`.
    pub fn bins(&self) -> Result<&BinArray> {
        match &self.buffer.values {
            ElementArray::Bins(bins) => Ok(bins),
            other => Err(RuLaVarError::TypeError(format!(
                "Expected binned data, got dtype {}",
                other.dtype()
            ))),
        }
    }

    pub fn view(&self) -> VariableView<'_> {
        VariableView::new(self)
    }

    pub fn view_mut(&mut self) -> VariableViewMut<'_> {
        VariableViewMut::new(self)
    }

    /// View of a slice of this variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the dimension is missing or the index out of range.
    pub fn slice(&self, slice: Slice) -> Result<VariableView<'_>> {
        self.view().slice(slice)
    }

    /// Mutable view of a slice of this variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the dimension is missing or the index out of range.
    pub fn slice_mut(&mut self, slice: Slice) -> Result<VariableViewMut<'_>> {
        self.view_mut().slice(slice)
    }

    /// Deep copy into a new buffer
    #[must_use]
    pub fn copy(&self) -> Variable {
        Self {
            dims: self.dims.clone(),
            unit: self.unit,
            buffer: Arc::new((*self.buffer).clone()),
        }
    }

    /// Relabel the buffer with new dims of the same volume. Shares the buffer.
    ///
    /// # Errors
    ///
    /// Returns `DimensionError` if the volume changes.
    pub fn reshape(&self, dims: Dimensions) -> Result<Variable> {
        if dims.volume() != self.dims.volume() {
            return Err(RuLaVarError::DimensionError(format!(
                "Cannot reshape {} into {dims}: volume differs",
                self.dims
            )));
        }
        Ok(Self {
            dims,
            unit: self.unit,
            buffer: Arc::clone(&self.buffer),
        })
    }

    /// Rename a dimension in place.
    ///
    /// # Errors
    ///
    /// Returns an error if `from` is missing or `to` already exists.
    pub fn rename_dim(&mut self, from: &Dim, to: impl Into<Dim>) -> Result<()> {
        self.dims.relabel(from, to)
    }

    pub(crate) fn values_array(&self) -> &ElementArray {
        &self.buffer.values
    }

    pub(crate) fn variances_array(&self) -> Option<&ElementArray> {
        self.buffer.variances.as_ref()
    }

    pub(crate) fn arrays_mut(&mut self) -> (&mut ElementArray, Option<&mut ElementArray>) {
        let buffer = Arc::make_mut(&mut self.buffer);
        (&mut buffer.values, buffer.variances.as_mut())
    }

    fn expect_scalar(&self) -> Result<()> {
        if self.dims.is_scalar() {
            Ok(())
        } else {
            Err(RuLaVarError::DimensionError(format!(
                "Expected a 0-d variable, got dimensions {}",
                self.dims
            )))
        }
    }
}

fn check_variances(values: &ElementArray, variances: &ElementArray) -> Result<()> {
    if !values.dtype().is_float() {
        return Err(RuLaVarError::VariancesError(format!(
            "Variances are not supported for dtype {}",
            values.dtype()
        )));
    }
    if variances.dtype() != values.dtype() {
        return Err(RuLaVarError::TypeError(format!(
            "Variances of dtype {} do not match values of dtype {}",
            variances.dtype(),
            values.dtype()
        )));
    }
    if variances.len() != values.len() {
        return Err(RuLaVarError::DimensionError(format!(
            "Got {} variances for {} values",
            variances.len(),
            values.len()
        )));
    }
    Ok(())
}

fn type_mismatch<T: Element>(actual: DType) -> RuLaVarError {
    RuLaVarError::TypeError(format!("Requested dtype {} but variable has dtype {actual}", T::DTYPE))
}

fn no_variances(dims: &Dimensions) -> RuLaVarError {
    RuLaVarError::VariancesError(format!("Variable with dimensions {dims} has no variances"))
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.dims == other.dims
            && self.unit == other.unit
            && self.buffer.values == other.buffer.values
            && self.buffer.variances == other.buffer.variances
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Variable dims={} dtype={} unit={}",
            self.dims,
            self.dtype(),
            self.unit
        )?;
        if self.has_variances() {
            f.write_str(" (with variances)")?;
        }
        f.write_str(">")
    }
}
