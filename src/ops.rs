//! Operator strategies
//!
//! Each operator is a zero-sized (or small) struct implementing the typed
//! kernels for the dtype combinations it supports, a unit rule, and the
//! ordered dispatch tables consumed by the transform and accumulate engines.

use crate::dtype::{DType, ElementArray, Numeric, Vector3};
use crate::errors::{Result, RuLaVarError};
use crate::transform::{binary_dispatch, unary_dispatch, BinaryOp, Kernel1, Kernel2, UnaryOp};
use crate::units::Unit;
use num_traits::{Float, NumCast};

// Integer results wrap on overflow.
fn add<T: Numeric>(a: T, b: T) -> T {
    a.wrapping_add(b)
}

fn add_variance<T: Numeric>(a: T, va: T, b: T, vb: T) -> (T, T) {
    (a.wrapping_add(b), va.wrapping_add(vb))
}

fn subtract<T: Numeric>(a: T, b: T) -> T {
    a.wrapping_sub(b)
}

fn subtract_variance<T: Numeric>(a: T, va: T, b: T, vb: T) -> (T, T) {
    (a.wrapping_sub(b), va.wrapping_add(vb))
}

fn multiply<T: Numeric>(a: T, b: T) -> T {
    a.wrapping_mul(b)
}

fn multiply_variance<T: Numeric>(a: T, va: T, b: T, vb: T) -> (T, T) {
    (a.wrapping_mul(b), va * b * b + vb * a * a)
}

fn divide<T: Numeric>(a: T, b: T) -> T {
    a / b
}

fn divide_variance<T: Numeric>(a: T, va: T, b: T, vb: T) -> (T, T) {
    let q = a / b;
    (q, (va + vb * q * q) / (b * b))
}

/// Kernels converting both operands to the output type before applying the
/// scalar function. Variances are supported when the output is floating point.
macro_rules! numeric_kernels {
    ($op:ty, $value:ident, $variance:ident, [$(($a:ty, $b:ty) -> $out:ty),* $(,)?]) => {
        $(
            #[allow(clippy::unnecessary_cast, clippy::cast_precision_loss)]
            impl Kernel2<$a, $b> for $op {
                type Out = $out;
                const VARIANCES: bool = <$out as Numeric>::FLOAT;

                fn value(&self, a: &$a, b: &$b) -> $out {
                    $value(*a as $out, *b as $out)
                }

                fn value_and_variance(&self, a: &$a, va: &$a, b: &$b, vb: &$b) -> ($out, $out) {
                    $variance(*a as $out, *va as $out, *b as $out, *vb as $out)
                }
            }
        )*
    };
}

/// Addition; units must be equal
#[derive(Debug, Clone, Copy, Default)]
pub struct Add;

numeric_kernels!(Add, add, add_variance, [
    (f64, f64) -> f64, (f32, f32) -> f32, (i64, i64) -> i64, (i32, i32) -> i32,
    (f64, f32) -> f64, (f32, f64) -> f64, (f64, i64) -> f64, (i64, f64) -> f64,
    (f64, i32) -> f64, (i32, f64) -> f64, (i64, i32) -> i64, (i32, i64) -> i64,
]);

impl Kernel2<Vector3, Vector3> for Add {
    type Out = Vector3;
    fn value(&self, a: &Vector3, b: &Vector3) -> Vector3 {
        *a + *b
    }
}

impl BinaryOp for Add {
    fn name(&self) -> &'static str {
        "add"
    }

    fn unit(&self, a: Unit, b: Unit) -> Result<Unit> {
        a.expect_equal(&b, self.name())?;
        Ok(a)
    }

    binary_dispatch! {
        transform: [
            (f64, f64), (f32, f32), (i64, i64), (i32, i32),
            (f64, f32), (f32, f64), (f64, i64), (i64, f64),
            (f64, i32), (i32, f64), (i64, i32), (i32, i64),
            (Vector3, Vector3),
        ],
        in_place: [
            (f64, f64), (f32, f32), (i64, i64), (i32, i32),
            (f64, f32), (f64, i64), (f64, i32), (i64, i32),
            (Vector3, Vector3),
        ],
        accumulate: [],
    }
}

/// Subtraction; units must be equal
#[derive(Debug, Clone, Copy, Default)]
pub struct Subtract;

numeric_kernels!(Subtract, subtract, subtract_variance, [
    (f64, f64) -> f64, (f32, f32) -> f32, (i64, i64) -> i64, (i32, i32) -> i32,
    (f64, f32) -> f64, (f32, f64) -> f64, (f64, i64) -> f64, (i64, f64) -> f64,
    (f64, i32) -> f64, (i32, f64) -> f64, (i64, i32) -> i64, (i32, i64) -> i64,
]);

impl Kernel2<Vector3, Vector3> for Subtract {
    type Out = Vector3;
    fn value(&self, a: &Vector3, b: &Vector3) -> Vector3 {
        *a - *b
    }
}

impl BinaryOp for Subtract {
    fn name(&self) -> &'static str {
        "subtract"
    }

    fn unit(&self, a: Unit, b: Unit) -> Result<Unit> {
        a.expect_equal(&b, self.name())?;
        Ok(a)
    }

    binary_dispatch! {
        transform: [
            (f64, f64), (f32, f32), (i64, i64), (i32, i32),
            (f64, f32), (f32, f64), (f64, i64), (i64, f64),
            (f64, i32), (i32, f64), (i64, i32), (i32, i64),
            (Vector3, Vector3),
        ],
        in_place: [
            (f64, f64), (f32, f32), (i64, i64), (i32, i32),
            (f64, f32), (f64, i64), (f64, i32), (i64, i32),
            (Vector3, Vector3),
        ],
        accumulate: [],
    }
}

/// Multiplication; units multiply
#[derive(Debug, Clone, Copy, Default)]
pub struct Multiply;

numeric_kernels!(Multiply, multiply, multiply_variance, [
    (f64, f64) -> f64, (f32, f32) -> f32, (i64, i64) -> i64, (i32, i32) -> i32,
    (f64, f32) -> f64, (f32, f64) -> f64, (f64, i64) -> f64, (i64, f64) -> f64,
    (f64, i32) -> f64, (i32, f64) -> f64, (i64, i32) -> i64, (i32, i64) -> i64,
]);

impl Kernel2<f64, Vector3> for Multiply {
    type Out = Vector3;
    fn value(&self, a: &f64, b: &Vector3) -> Vector3 {
        *b * *a
    }
}

impl Kernel2<Vector3, f64> for Multiply {
    type Out = Vector3;
    fn value(&self, a: &Vector3, b: &f64) -> Vector3 {
        *a * *b
    }
}

impl BinaryOp for Multiply {
    fn name(&self) -> &'static str {
        "multiply"
    }

    fn unit(&self, a: Unit, b: Unit) -> Result<Unit> {
        a.multiply(&b)
    }

    binary_dispatch! {
        transform: [
            (f64, f64), (f32, f32), (i64, i64), (i32, i32),
            (f64, f32), (f32, f64), (f64, i64), (i64, f64),
            (f64, i32), (i32, f64), (i64, i32), (i32, i64),
            (f64, Vector3), (Vector3, f64),
        ],
        in_place: [
            (f64, f64), (f32, f32), (i64, i64), (i32, i32),
            (f64, f32), (f64, i64), (f64, i32), (i64, i32),
            (Vector3, f64),
        ],
        accumulate: [],
    }
}

/// Division; units divide. Integer division produces float64.
#[derive(Debug, Clone, Copy, Default)]
pub struct Divide;

numeric_kernels!(Divide, divide, divide_variance, [
    (f64, f64) -> f64, (f32, f32) -> f32, (f64, f32) -> f64, (f32, f64) -> f64,
    (f64, i64) -> f64, (i64, f64) -> f64, (f64, i32) -> f64, (i32, f64) -> f64,
    (i64, i64) -> f64, (i32, i32) -> f64, (i64, i32) -> f64, (i32, i64) -> f64,
]);

impl Kernel2<Vector3, f64> for Divide {
    type Out = Vector3;
    fn value(&self, a: &Vector3, b: &f64) -> Vector3 {
        *a / *b
    }
}

impl BinaryOp for Divide {
    fn name(&self) -> &'static str {
        "divide"
    }

    fn unit(&self, a: Unit, b: Unit) -> Result<Unit> {
        a.divide(&b)
    }

    binary_dispatch! {
        transform: [
            (f64, f64), (f32, f32), (f64, f32), (f32, f64),
            (f64, i64), (i64, f64), (f64, i32), (i32, f64),
            (i64, i64), (i32, i32), (i64, i32), (i32, i64),
            (Vector3, f64),
        ],
        in_place: [
            (f64, f64), (f32, f32), (f64, f32), (f64, i64), (f64, i32),
            (Vector3, f64),
        ],
        accumulate: [],
    }
}

/// Zero every element not selected by a boolean mask
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyMask;

macro_rules! mask_kernels {
    ($($t:ty => $variances:expr),* $(,)?) => {
        $(
            impl Kernel2<$t, bool> for ApplyMask {
                type Out = $t;
                const VARIANCES: bool = $variances;

                fn value(&self, a: &$t, selected: &bool) -> $t {
                    if *selected {
                        *a
                    } else {
                        <$t>::default()
                    }
                }

                fn value_and_variance(&self, a: &$t, va: &$t, selected: &bool, _: &bool) -> ($t, $t) {
                    if *selected {
                        (*a, *va)
                    } else {
                        (<$t>::default(), <$t>::default())
                    }
                }
            }
        )*
    };
}

mask_kernels!(f64 => true, f32 => true, i64 => false, i32 => false, Vector3 => false);

impl BinaryOp for ApplyMask {
    fn name(&self) -> &'static str {
        "mask"
    }

    fn unit(&self, a: Unit, _mask: Unit) -> Result<Unit> {
        Ok(a)
    }

    binary_dispatch! {
        transform: [(f64, bool), (f32, bool), (i64, bool), (i32, bool), (Vector3, bool)],
        in_place: [(f64, bool), (f32, bool), (i64, bool), (i32, bool), (Vector3, bool)],
        accumulate: [],
    }
}

/// Logical and; also the reduction of `all`
#[derive(Debug, Clone, Copy, Default)]
pub struct And;

impl Kernel2<bool, bool> for And {
    type Out = bool;
    fn value(&self, a: &bool, b: &bool) -> bool {
        *a && *b
    }
}

impl BinaryOp for And {
    fn name(&self) -> &'static str {
        "and"
    }

    fn unit(&self, a: Unit, b: Unit) -> Result<Unit> {
        a.expect_equal(&b, self.name())?;
        Ok(a)
    }

    fn idempotent(&self) -> bool {
        true
    }

    binary_dispatch! {
        transform: [(bool, bool)],
        in_place: [(bool, bool)],
        accumulate: [(bool, bool)],
    }
}

/// Logical or; also the reduction of `any`
#[derive(Debug, Clone, Copy, Default)]
pub struct Or;

impl Kernel2<bool, bool> for Or {
    type Out = bool;
    fn value(&self, a: &bool, b: &bool) -> bool {
        *a || *b
    }
}

impl BinaryOp for Or {
    fn name(&self) -> &'static str {
        "or"
    }

    fn unit(&self, a: Unit, b: Unit) -> Result<Unit> {
        a.expect_equal(&b, self.name())?;
        Ok(a)
    }

    fn idempotent(&self) -> bool {
        true
    }

    binary_dispatch! {
        transform: [(bool, bool)],
        in_place: [(bool, bool)],
        accumulate: [(bool, bool)],
    }
}

/// Summing reduction. Bool input counts into int64.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sum;

numeric_kernels!(Sum, add, add_variance, [
    (f64, f64) -> f64, (f32, f32) -> f32, (i64, i64) -> i64, (i32, i32) -> i32,
]);

impl Kernel2<i64, bool> for Sum {
    type Out = i64;
    fn value(&self, a: &i64, b: &bool) -> i64 {
        a.wrapping_add(<i64 as From<bool>>::from(*b))
    }
}

impl Kernel2<Vector3, Vector3> for Sum {
    type Out = Vector3;
    fn value(&self, a: &Vector3, b: &Vector3) -> Vector3 {
        *a + *b
    }
}

impl BinaryOp for Sum {
    fn name(&self) -> &'static str {
        "sum"
    }

    fn unit(&self, a: Unit, _b: Unit) -> Result<Unit> {
        Ok(a)
    }

    binary_dispatch! {
        transform: [],
        in_place: [],
        accumulate: [
            (f64, f64), (f32, f32), (i64, i64), (i32, i32),
            (i64, bool), (Vector3, Vector3),
        ],
    }
}

fn pick_less<T: PartialOrd>(candidate: &T, current: &T) -> bool {
    candidate < current
}

fn pick_greater<T: PartialOrd>(candidate: &T, current: &T) -> bool {
    candidate > current
}

/// Selecting kernels; NaN candidates never replace the current value.
macro_rules! select_kernels {
    ($op:ty, $pick:ident, [$($t:ty),*]) => {
        $(
            impl Kernel2<$t, $t> for $op {
                type Out = $t;
                fn value(&self, a: &$t, b: &$t) -> $t {
                    if $pick(b, a) {
                        *b
                    } else {
                        *a
                    }
                }
            }
        )*
    };
}

/// Minimum reduction
#[derive(Debug, Clone, Copy, Default)]
pub struct Min;

select_kernels!(Min, pick_less, [f64, f32, i64, i32]);

impl BinaryOp for Min {
    fn name(&self) -> &'static str {
        "min"
    }

    fn unit(&self, a: Unit, _b: Unit) -> Result<Unit> {
        Ok(a)
    }

    fn idempotent(&self) -> bool {
        true
    }

    binary_dispatch! {
        transform: [],
        in_place: [],
        accumulate: [(f64, f64), (f32, f32), (i64, i64), (i32, i32)],
    }
}

/// Maximum reduction
#[derive(Debug, Clone, Copy, Default)]
pub struct Max;

select_kernels!(Max, pick_greater, [f64, f32, i64, i32]);

impl BinaryOp for Max {
    fn name(&self) -> &'static str {
        "max"
    }

    fn unit(&self, a: Unit, _b: Unit) -> Result<Unit> {
        Ok(a)
    }

    fn idempotent(&self) -> bool {
        true
    }

    binary_dispatch! {
        transform: [],
        in_place: [],
        accumulate: [(f64, f64), (f32, f32), (i64, i64), (i32, i32)],
    }
}

/// Float kernels forwarding to generic helpers taking the operator.
macro_rules! float_unary {
    ($op:ty, $value:ident, $variance:ident) => {
        float_unary!(@impl $op, $value, $variance, f64);
        float_unary!(@impl $op, $value, $variance, f32);
    };
    (@impl $op:ty, $value:ident, $variance:ident, $t:ty) => {
        impl Kernel1<$t> for $op {
            type Out = $t;
            const VARIANCES: bool = true;

            fn value(&self, a: &$t) -> $t {
                $value(self, *a)
            }

            fn value_and_variance(&self, a: &$t, va: &$t) -> ($t, $t) {
                $variance(self, *a, *va)
            }
        }
    };
}

/// Square root; variance `va / (4x)`
#[derive(Debug, Clone, Copy, Default)]
pub struct Sqrt;

fn sqrt_value<T: Float>(_: &Sqrt, x: T) -> T {
    x.sqrt()
}

fn sqrt_variance<T: Float>(_: &Sqrt, x: T, vx: T) -> (T, T) {
    (x.sqrt(), vx / (x + x + x + x))
}

float_unary!(Sqrt, sqrt_value, sqrt_variance);

impl UnaryOp for Sqrt {
    fn name(&self) -> &'static str {
        "sqrt"
    }

    fn unit(&self, a: Unit) -> Result<Unit> {
        a.sqrt()
    }

    unary_dispatch! {
        transform: [f64, f32],
        in_place: [f64, f32],
    }
}

/// Absolute value; variance unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Abs;

fn abs_value<T: Float>(_: &Abs, x: T) -> T {
    x.abs()
}

fn abs_variance<T: Float>(_: &Abs, x: T, vx: T) -> (T, T) {
    (x.abs(), vx)
}

float_unary!(Abs, abs_value, abs_variance);

impl Kernel1<i64> for Abs {
    type Out = i64;
    fn value(&self, a: &i64) -> i64 {
        a.wrapping_abs()
    }
}

impl Kernel1<i32> for Abs {
    type Out = i32;
    fn value(&self, a: &i32) -> i32 {
        a.wrapping_abs()
    }
}

impl UnaryOp for Abs {
    fn name(&self) -> &'static str {
        "abs"
    }

    fn unit(&self, a: Unit) -> Result<Unit> {
        Ok(a)
    }

    unary_dispatch! {
        transform: [f64, f32, i64, i32],
        in_place: [f64, f32, i64, i32],
    }
}

/// `1/x`; variance `va / x^4`
#[derive(Debug, Clone, Copy, Default)]
pub struct Reciprocal;

fn reciprocal_value<T: Float>(_: &Reciprocal, x: T) -> T {
    x.recip()
}

fn reciprocal_variance<T: Float>(_: &Reciprocal, x: T, vx: T) -> (T, T) {
    let r = x.recip();
    (r, vx * r * r * r * r)
}

float_unary!(Reciprocal, reciprocal_value, reciprocal_variance);

impl UnaryOp for Reciprocal {
    fn name(&self) -> &'static str {
        "reciprocal"
    }

    fn unit(&self, a: Unit) -> Result<Unit> {
        a.reciprocal()
    }

    unary_dispatch! {
        transform: [f64, f32],
        in_place: [f64, f32],
    }
}

/// Integer power; variance `va * (n x^(n-1))^2`
#[derive(Debug, Clone, Copy)]
pub struct Pow {
    pub exponent: i32,
}

fn pow_value<T: Float>(op: &Pow, x: T) -> T {
    x.powi(op.exponent)
}

fn pow_variance<T: Float>(op: &Pow, x: T, vx: T) -> (T, T) {
    let value = x.powi(op.exponent);
    if op.exponent == 0 {
        return (value, T::zero());
    }
    let n = <T as NumCast>::from(op.exponent).unwrap_or_else(T::nan);
    let derivative = n * x.powi(op.exponent - 1);
    (value, vx * derivative * derivative)
}

float_unary!(Pow, pow_value, pow_variance);

// Negative exponents are rejected for integers before dispatch.
impl Kernel1<i64> for Pow {
    type Out = i64;
    fn value(&self, a: &i64) -> i64 {
        a.wrapping_pow(self.exponent.unsigned_abs())
    }
}

impl Kernel1<i32> for Pow {
    type Out = i32;
    fn value(&self, a: &i32) -> i32 {
        a.wrapping_pow(self.exponent.unsigned_abs())
    }
}

impl UnaryOp for Pow {
    fn name(&self) -> &'static str {
        "pow"
    }

    fn unit(&self, a: Unit) -> Result<Unit> {
        a.powi(self.exponent)
    }

    unary_dispatch! {
        transform: [f64, f32, i64, i32],
        in_place: [f64, f32, i64, i32],
    }
}

/// Euclidean norm of a vector
#[derive(Debug, Clone, Copy, Default)]
pub struct Norm;

impl Kernel1<Vector3> for Norm {
    type Out = f64;
    fn value(&self, a: &Vector3) -> f64 {
        a.norm()
    }
}

impl UnaryOp for Norm {
    fn name(&self) -> &'static str {
        "norm"
    }

    fn unit(&self, a: Unit) -> Result<Unit> {
        Ok(a)
    }

    unary_dispatch! {
        transform: [Vector3],
        in_place: [],
    }
}

/// Trigonometric function selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrigFunction {
    Sin,
    Cos,
    Tan,
}

impl TrigFunction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
        }
    }

    fn apply(self, radians: f64) -> f64 {
        match self {
            Self::Sin => radians.sin(),
            Self::Cos => radians.cos(),
            Self::Tan => radians.tan(),
        }
    }
}

/// Trigonometric function of an angle.
///
/// `scale` converts the input unit to radians, e.g. `Unit::DEG.scale()`.
#[derive(Debug, Clone, Copy)]
pub struct Trig {
    pub function: TrigFunction,
    pub scale: f64,
}

impl Trig {
    /// Operator for angles given in `unit`
    pub fn for_unit(function: TrigFunction, unit: Unit) -> Self {
        Self {
            function,
            scale: unit.scale(),
        }
    }
}

macro_rules! trig_kernels {
    ($($t:ty),*) => {
        $(
            impl Kernel1<$t> for Trig {
                type Out = $t;
                fn value(&self, a: &$t) -> $t {
                    <$t>::cast_from_f64(self.function.apply(a.as_f64() * self.scale))
                }
            }
        )*
    };
}

trig_kernels!(f64, f32);

impl UnaryOp for Trig {
    fn name(&self) -> &'static str {
        self.function.as_str()
    }

    fn unit(&self, a: Unit) -> Result<Unit> {
        if a.is_angle() {
            Ok(Unit::ONE)
        } else {
            Err(RuLaVarError::UnitError(format!(
                "Expected an angle (rad or deg) in '{}', got {a}",
                self.name()
            )))
        }
    }

    unary_dispatch! {
        transform: [f64, f32],
        in_place: [f64, f32],
    }
}

/// Logical not
#[derive(Debug, Clone, Copy, Default)]
pub struct Not;

impl Kernel1<bool> for Not {
    type Out = bool;
    fn value(&self, a: &bool) -> bool {
        !*a
    }
}

impl UnaryOp for Not {
    fn name(&self) -> &'static str {
        "not"
    }

    fn unit(&self, a: Unit) -> Result<Unit> {
        Ok(a)
    }

    unary_dispatch! {
        transform: [bool],
        in_place: [bool],
    }
}

macro_rules! numeric_casts {
    ($array:expr, $to:expr, [$(($from:ident => $target:ident as $t:ty)),* $(,)?]) => {
        match ($array, $to) {
            $(
                (ElementArray::$from(v), DType::$target) => {
                    Some(ElementArray::$target(v.iter().map(|&x| x as $t).collect()))
                }
            )*
            _ => None,
        }
    };
}

/// Convert a buffer to another dtype (the `astype` kernel).
///
/// # Errors
///
/// Returns `TypeError` unless both dtypes are numeric, or the source is bool
/// and the target numeric.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn convert(array: &ElementArray, to: DType) -> Result<ElementArray> {
    if array.dtype() == to {
        return Ok(array.clone());
    }
    let converted = numeric_casts!(array, to, [
        (Float64 => Float32 as f32), (Float64 => Int64 as i64), (Float64 => Int32 as i32),
        (Float32 => Float64 as f64), (Float32 => Int64 as i64), (Float32 => Int32 as i32),
        (Int64 => Float64 as f64), (Int64 => Float32 as f32), (Int64 => Int32 as i32),
        (Int32 => Float64 as f64), (Int32 => Float32 as f32), (Int32 => Int64 as i64),
        (Bool => Int64 as i64), (Bool => Int32 as i32),
    ]);
    if let Some(converted) = converted {
        return Ok(converted);
    }
    match (array, to) {
        (ElementArray::Bool(v), DType::Float64) => {
            Ok(ElementArray::Float64(v.iter().map(|&b| <f64 as From<u8>>::from(<u8 as From<bool>>::from(b))).collect()))
        }
        (ElementArray::Bool(v), DType::Float32) => {
            Ok(ElementArray::Float32(v.iter().map(|&b| <f32 as From<u8>>::from(<u8 as From<bool>>::from(b))).collect()))
        }
        _ => Err(RuLaVarError::TypeError(format!(
            "Cannot convert dtype {} to {to}",
            array.dtype()
        ))),
    }
}
