//! Elementwise arithmetic and math functions
//!
//! Thin façade over the transform engine. Binary operations on an operand
//! and itself (same buffer, same dims) are rewritten before dispatch:
//! `a + a` is `a * 2`, `a - a` is `a * 0`, `a * a` is `a^2` and `a / a`
//! is `a^0` in the dtype division would produce.

use crate::dtype::{DType, ElementArray};
use crate::errors::{Result, RuLaVarError};
use crate::ops::{
    convert, Abs, Add, And, Divide, Multiply, Norm, Not, Or, Pow, Reciprocal, Sqrt, Subtract,
    Trig, TrigFunction,
};
use crate::transform::{transform_binary, transform_in_place, transform_unary, transform_unary_in_place};
use crate::units::Unit;
use crate::variable::{Variable, VariableView, VariableViewMut};

/// `1` in the unit system of `unit`: dimensionless, or `None` for `None`.
pub(crate) fn dimensionless_like(unit: Unit) -> Unit {
    if unit.is_none() {
        Unit::NONE
    } else {
        Unit::ONE
    }
}

/// Scalar factor matching the dtype of `var` (float64 for vectors).
fn make_factor(var: &VariableView<'_>, value: i32) -> Variable {
    let unit = dimensionless_like(var.unit());
    match var.dtype() {
        DType::Float32 => Variable::scalar(value as f32, unit),
        DType::Int64 => Variable::scalar(i64::from(value), unit),
        DType::Int32 => Variable::scalar(value, unit),
        _ => Variable::scalar(f64::from(value), unit),
    }
}

/// `a + b`
///
/// # Errors
///
/// Returns `UnitError` unless the units are equal, `DimensionError` for
/// mismatched extents and `TypeError` for unsupported dtypes.
pub fn add(a: &VariableView<'_>, b: &VariableView<'_>) -> Result<Variable> {
    if a.is_same(b) {
        return multiply(a, &make_factor(a, 2).view());
    }
    transform_binary(&Add, a, b)
}

/// `a - b`
///
/// # Errors
///
/// See [`add`].
pub fn subtract(a: &VariableView<'_>, b: &VariableView<'_>) -> Result<Variable> {
    if a.is_same(b) {
        return multiply(a, &make_factor(a, 0).view());
    }
    transform_binary(&Subtract, a, b)
}

/// `a * b`
///
/// # Errors
///
/// Returns `DimensionError` for mismatched extents and `TypeError` for
/// unsupported dtypes.
pub fn multiply(a: &VariableView<'_>, b: &VariableView<'_>) -> Result<Variable> {
    if a.is_same(b) {
        return pow(a, 2);
    }
    transform_binary(&Multiply, a, b)
}

/// `a / b`; integer operands give float64
///
/// # Errors
///
/// See [`multiply`].
pub fn divide(a: &VariableView<'_>, b: &VariableView<'_>) -> Result<Variable> {
    if a.is_same(b) {
        let ones = pow(a, 0)?;
        return if ones.dtype().is_int() {
            astype(&ones.view(), DType::Float64)
        } else {
            Ok(ones)
        };
    }
    transform_binary(&Divide, a, b)
}

/// `-a`
///
/// # Errors
///
/// Returns `TypeError` for non-numeric dtypes.
pub fn negative(a: &VariableView<'_>) -> Result<Variable> {
    transform_binary(&Multiply, a, &make_factor(a, -1).view())
}

/// `a^exponent`
///
/// # Errors
///
/// Returns `TypeError` for negative exponents of integer dtypes and
/// `UnitError` if the unit exponents overflow.
pub fn pow(a: &VariableView<'_>, exponent: i32) -> Result<Variable> {
    if a.dtype().is_int() && exponent < 0 {
        return Err(RuLaVarError::TypeError(format!(
            "Integers cannot be raised to the negative power {exponent}"
        )));
    }
    transform_unary(&Pow { exponent }, a)
}

/// Square root
///
/// # Errors
///
/// Returns `UnitError` for units with odd exponents.
pub fn sqrt(a: &VariableView<'_>) -> Result<Variable> {
    transform_unary(&Sqrt, a)
}

/// Absolute value
///
/// # Errors
///
/// Returns `TypeError` for non-numeric dtypes.
pub fn abs(a: &VariableView<'_>) -> Result<Variable> {
    transform_unary(&Abs, a)
}

/// `1 / a`
///
/// # Errors
///
/// Returns `TypeError` for non-float dtypes.
pub fn reciprocal(a: &VariableView<'_>) -> Result<Variable> {
    transform_unary(&Reciprocal, a)
}

/// Length of each vector
///
/// # Errors
///
/// Returns `TypeError` unless the dtype is `Vector3`.
pub fn norm(a: &VariableView<'_>) -> Result<Variable> {
    transform_unary(&Norm, a)
}

fn trig(function: TrigFunction, a: &VariableView<'_>) -> Result<Variable> {
    transform_unary(&Trig::for_unit(function, a.unit()), a)
}

/// Sine of an angle in `rad` or `deg`
///
/// # Errors
///
/// Returns `UnitError` if the unit is not an angle and `VariancesError` if
/// the input has variances.
pub fn sin(a: &VariableView<'_>) -> Result<Variable> {
    trig(TrigFunction::Sin, a)
}

/// Cosine of an angle in `rad` or `deg`
///
/// # Errors
///
/// See [`sin`].
pub fn cos(a: &VariableView<'_>) -> Result<Variable> {
    trig(TrigFunction::Cos, a)
}

/// Tangent of an angle in `rad` or `deg`
///
/// # Errors
///
/// See [`sin`].
pub fn tan(a: &VariableView<'_>) -> Result<Variable> {
    trig(TrigFunction::Tan, a)
}

/// Elementwise logical not
///
/// # Errors
///
/// Returns `TypeError` unless the dtype is bool.
pub fn logical_not(a: &VariableView<'_>) -> Result<Variable> {
    transform_unary(&Not, a)
}

/// Elementwise logical and
///
/// # Errors
///
/// Returns `TypeError` unless both dtypes are bool.
pub fn logical_and(a: &VariableView<'_>, b: &VariableView<'_>) -> Result<Variable> {
    transform_binary(&And, a, b)
}

/// Elementwise logical or
///
/// # Errors
///
/// Returns `TypeError` unless both dtypes are bool.
pub fn logical_or(a: &VariableView<'_>, b: &VariableView<'_>) -> Result<Variable> {
    transform_binary(&Or, a, b)
}

/// Copy with values converted to `dtype`
///
/// # Errors
///
/// Returns `TypeError` for unsupported conversions and `VariancesError` when
/// converting a variable with variances to a non-float dtype.
pub fn astype(a: &VariableView<'_>, dtype: DType) -> Result<Variable> {
    if a.has_variances() && !dtype.is_float() {
        return Err(RuLaVarError::VariancesError(format!(
            "Cannot convert a variable with variances to {dtype}"
        )));
    }
    let copy = a.to_variable();
    let values = convert(copy.values_array(), dtype)?;
    let variances = copy
        .variances_array()
        .map(|v| convert(v, dtype))
        .transpose()?;
    Variable::new(copy.dims().clone(), copy.unit(), values, variances)
}

impl VariableViewMut<'_> {
    /// `self += other`
    ///
    /// # Errors
    ///
    /// Returns `DimensionError` if `other` has dims not in `self`, `UnitError`
    /// for unequal units and `TypeError` if the result dtype is not the dtype
    /// of `self`.
    pub fn add_equals(&mut self, other: &VariableView<'_>) -> Result<()> {
        if self.as_view().is_same(other) {
            let factor = make_factor(other, 2);
            return transform_in_place(&Multiply, self, &factor.view());
        }
        transform_in_place(&Add, self, other)
    }

    /// `self -= other`
    ///
    /// # Errors
    ///
    /// See [`VariableViewMut::add_equals`].
    pub fn subtract_equals(&mut self, other: &VariableView<'_>) -> Result<()> {
        if self.as_view().is_same(other) {
            let factor = make_factor(other, 0);
            return transform_in_place(&Multiply, self, &factor.view());
        }
        transform_in_place(&Subtract, self, other)
    }

    /// `self *= other`
    ///
    /// # Errors
    ///
    /// See [`VariableViewMut::add_equals`]; units multiply instead.
    pub fn multiply_equals(&mut self, other: &VariableView<'_>) -> Result<()> {
        if self.as_view().is_same(other) {
            return transform_unary_in_place(&Pow { exponent: 2 }, self);
        }
        transform_in_place(&Multiply, self, other)
    }

    /// `self /= other`
    ///
    /// # Errors
    ///
    /// See [`VariableViewMut::add_equals`]; integer outputs are a `TypeError`.
    pub fn divide_equals(&mut self, other: &VariableView<'_>) -> Result<()> {
        if self.as_view().is_same(other) && self.dtype().is_float() {
            return transform_unary_in_place(&Pow { exponent: 0 }, self);
        }
        transform_in_place(&Divide, self, other)
    }
}

impl Variable {
    /// `self += other`, see [`VariableViewMut::add_equals`].
    ///
    /// # Errors
    ///
    /// See [`VariableViewMut::add_equals`].
    pub fn add_equals(&mut self, other: &VariableView<'_>) -> Result<()> {
        self.view_mut().add_equals(other)
    }

    /// `self -= other`
    ///
    /// # Errors
    ///
    /// See [`VariableViewMut::subtract_equals`].
    pub fn subtract_equals(&mut self, other: &VariableView<'_>) -> Result<()> {
        self.view_mut().subtract_equals(other)
    }

    /// `self *= other`
    ///
    /// # Errors
    ///
    /// See [`VariableViewMut::multiply_equals`].
    pub fn multiply_equals(&mut self, other: &VariableView<'_>) -> Result<()> {
        self.view_mut().multiply_equals(other)
    }

    /// `self /= other`
    ///
    /// # Errors
    ///
    /// See [`VariableViewMut::divide_equals`].
    pub fn divide_equals(&mut self, other: &VariableView<'_>) -> Result<()> {
        self.view_mut().divide_equals(other)
    }
}

macro_rules! binary_operator {
    ($trait:ident, $method:ident, $func:ident) => {
        impl std::ops::$trait<&Variable> for &Variable {
            type Output = Result<Variable>;
            fn $method(self, rhs: &Variable) -> Result<Variable> {
                $func(&self.view(), &rhs.view())
            }
        }

        impl<'a> std::ops::$trait<&VariableView<'a>> for &Variable {
            type Output = Result<Variable>;
            fn $method(self, rhs: &VariableView<'a>) -> Result<Variable> {
                $func(&self.view(), rhs)
            }
        }

        impl<'a> std::ops::$trait<&Variable> for &VariableView<'a> {
            type Output = Result<Variable>;
            fn $method(self, rhs: &Variable) -> Result<Variable> {
                $func(self, &rhs.view())
            }
        }

        impl<'a, 'b> std::ops::$trait<&VariableView<'b>> for &VariableView<'a> {
            type Output = Result<Variable>;
            fn $method(self, rhs: &VariableView<'b>) -> Result<Variable> {
                $func(self, rhs)
            }
        }
    };
}

binary_operator!(Add, add, add);
binary_operator!(Sub, sub, subtract);
binary_operator!(Mul, mul, multiply);
binary_operator!(Div, div, divide);

impl std::ops::Neg for &Variable {
    type Output = Result<Variable>;
    fn neg(self) -> Result<Variable> {
        negative(&self.view())
    }
}

/// Ones with the dtype and dims of `a`, used by tests of the aliasing rules.
#[cfg(test)]
fn ones_like(a: &Variable, dtype: DType) -> Variable {
    let n = a.dims().volume();
    let values = match dtype {
        DType::Float32 => ElementArray::Float32(vec![1.0; n]),
        _ => ElementArray::Float64(vec![1.0; n]),
    };
    Variable::from_parts(a.dims().clone(), Unit::ONE, values, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::Dimensions;
    use crate::variable::{make_variable, Slice};

    fn x(n: usize) -> Dimensions {
        Dimensions::one("x", n)
    }

    #[test]
    fn test_add_broadcasts() {
        let a = make_variable(x(2), Unit::M, vec![1.0, 2.0], None).unwrap();
        let b = make_variable(Dimensions::one("y", 3), Unit::M, vec![10.0, 20.0, 30.0], None).unwrap();
        let c = (&a + &b).unwrap();
        assert_eq!(c.dims(), &Dimensions::new([("x", 2), ("y", 3)]).unwrap());
        assert_eq!(c.values::<f64>().unwrap(), &[11.0, 21.0, 31.0, 12.0, 22.0, 32.0]);
    }

    #[test]
    fn test_unit_mismatch_is_error() {
        let a = make_variable(x(2), Unit::M, vec![1.0, 2.0], None).unwrap();
        let b = make_variable(x(2), Unit::S, vec![1.0, 2.0], None).unwrap();
        assert!(matches!(&a + &b, Err(RuLaVarError::UnitError(_))));
        let speed = (&a / &b).unwrap();
        assert_eq!(speed.unit(), Unit::M.divide(&Unit::S).unwrap());
    }

    #[test]
    fn test_self_aliasing() {
        let a = make_variable(x(3), Unit::M, vec![1_i64, 2, 3], None).unwrap();
        let doubled = (&a + &a).unwrap();
        let times_two = (&a * &Variable::scalar(2_i64, Unit::ONE)).unwrap();
        assert_eq!(doubled, times_two);

        let zero = (&a - &a).unwrap();
        assert_eq!(zero.values::<i64>().unwrap(), &[0, 0, 0]);
        let squared = (&a * &a).unwrap();
        assert_eq!(squared.unit(), Unit::M.powi(2).unwrap());
        assert_eq!(squared.values::<i64>().unwrap(), &[1, 4, 9]);
        let ones = (&a / &a).unwrap();
        assert_eq!(ones, ones_like(&a, DType::Float64));
    }

    #[test]
    fn test_variance_propagation() {
        let a = make_variable(x(1), Unit::ONE, vec![2.0], Some(vec![0.5])).unwrap();
        let b = make_variable(x(1), Unit::ONE, vec![4.0], None).unwrap();
        let sum = (&a + &b).unwrap();
        assert_eq!(sum.variances::<f64>().unwrap(), &[0.5]);
        let product = (&a * &b).unwrap();
        assert_eq!(product.variances::<f64>().unwrap(), &[0.5 * 16.0]);

        let flags = make_variable(x(1), Unit::ONE, vec![true], None).unwrap();
        assert!(matches!(&flags + &flags, Err(RuLaVarError::TypeError(_))));
    }

    #[test]
    fn test_in_place() {
        let mut a = make_variable(x(2), Unit::M, vec![1.0, 2.0], None).unwrap();
        let b = Variable::scalar(3.0, Unit::M);
        a.add_equals(&b.view()).unwrap();
        assert_eq!(a.values::<f64>().unwrap(), &[4.0, 5.0]);

        let with_variance = Variable::scalar_with_variance(1.0, 1.0, Unit::M).unwrap();
        assert!(matches!(
            a.add_equals(&with_variance.view()),
            Err(RuLaVarError::VariancesError(_))
        ));

        let wide = make_variable(Dimensions::new([("x", 2), ("y", 2)]).unwrap(), Unit::M, vec![1.0; 4], None).unwrap();
        assert!(matches!(a.add_equals(&wide.view()), Err(RuLaVarError::DimensionError(_))));

        let mut ints = make_variable(x(2), Unit::ONE, vec![4_i64, 6], None).unwrap();
        let two = Variable::scalar(2_i64, Unit::ONE);
        assert!(matches!(ints.divide_equals(&two.view()), Err(RuLaVarError::TypeError(_))));
        assert_eq!(ints.values::<i64>().unwrap(), &[4, 6]);
    }

    #[test]
    fn test_in_place_on_slice() {
        let mut a = make_variable(x(3), Unit::M, vec![1.0, 2.0, 3.0], None).unwrap();
        let one = Variable::scalar(1.0, Unit::M);
        a.slice_mut(Slice::range("x", 1, 3)).unwrap().add_equals(&one.view()).unwrap();
        assert_eq!(a.values::<f64>().unwrap(), &[1.0, 3.0, 4.0]);

        let metre = Variable::scalar(1.0, Unit::M);
        let mut slice = a.slice_mut(Slice::point("x", 0)).unwrap();
        assert!(matches!(slice.multiply_equals(&metre.view()), Err(RuLaVarError::UnitError(_))));
    }

    #[test]
    fn test_trig() {
        let angles = make_variable(x(2), Unit::RAD, vec![0.0, std::f64::consts::FRAC_PI_2], None).unwrap();
        let s = sin(&angles.view()).unwrap();
        assert_eq!(s.unit(), Unit::ONE);
        assert_eq!(s.values::<f64>().unwrap(), &[0.0_f64.sin(), std::f64::consts::FRAC_PI_2.sin()]);

        let degrees = make_variable(x(1), Unit::DEG, vec![180.0], None).unwrap();
        approx::assert_abs_diff_eq!(cos(&degrees.view()).unwrap().values::<f64>().unwrap()[0], -1.0, epsilon = 1e-12);

        let plain = make_variable(x(1), Unit::ONE, vec![1.0], None).unwrap();
        assert!(matches!(sin(&plain.view()), Err(RuLaVarError::UnitError(_))));
    }

    #[test]
    fn test_astype_and_pow() {
        let ints = make_variable(x(2), Unit::M, vec![2_i32, 3], None).unwrap();
        let floats = astype(&ints.view(), DType::Float32).unwrap();
        assert_eq!(floats.values::<f32>().unwrap(), &[2.0, 3.0]);
        assert!(matches!(pow(&ints.view(), -1), Err(RuLaVarError::TypeError(_))));
        assert_eq!(pow(&ints.view(), 3).unwrap().values::<i32>().unwrap(), &[8, 27]);
    }
}
