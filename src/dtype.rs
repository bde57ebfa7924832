//! Runtime element types
//!
//! Buffers hold one of a closed set of element types. [`ElementArray`] is the
//! tagged union over the concrete `Vec`s and [`Element`] links each Rust type
//! to its [`DType`] tag, which is what the transform engine dispatches on.

use crate::bins::BinArray;
use crate::errors::{Result, RuLaVarError};
use rayon::prelude::*;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Element type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Float64,
    Float32,
    Int64,
    Int32,
    Bool,
    Vector3,
    String,
    Bins,
}

impl DType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Float64 => "float64",
            Self::Float32 => "float32",
            Self::Int64 => "int64",
            Self::Int32 => "int32",
            Self::Bool => "bool",
            Self::Vector3 => "vector3",
            Self::String => "string",
            Self::Bins => "bins",
        }
    }

    /// Only floating-point buffers may carry variances.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float64 | Self::Float32)
    }

    #[must_use]
    pub const fn is_int(self) -> bool {
        matches!(self, Self::Int64 | Self::Int32)
    }

    #[must_use]
    pub const fn is_numeric(self) -> bool {
        self.is_float() || self.is_int()
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A 3-vector of f64, e.g. a position
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3(pub [f64; 3]);

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self([x, y, z])
    }

    pub fn norm(&self) -> f64 {
        self.0.iter().map(|c| c * c).sum::<f64>().sqrt()
    }
}

impl Add for Vector3 {
    type Output = Vector3;
    fn add(self, rhs: Vector3) -> Vector3 {
        Vector3([self.0[0] + rhs.0[0], self.0[1] + rhs.0[1], self.0[2] + rhs.0[2]])
    }
}

impl Sub for Vector3 {
    type Output = Vector3;
    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3([self.0[0] - rhs.0[0], self.0[1] - rhs.0[1], self.0[2] - rhs.0[2]])
    }
}

impl Neg for Vector3 {
    type Output = Vector3;
    fn neg(self) -> Vector3 {
        Vector3([-self.0[0], -self.0[1], -self.0[2]])
    }
}

impl Mul<f64> for Vector3 {
    type Output = Vector3;
    fn mul(self, rhs: f64) -> Vector3 {
        Vector3([self.0[0] * rhs, self.0[1] * rhs, self.0[2] * rhs])
    }
}

impl Div<f64> for Vector3 {
    type Output = Vector3;
    fn div(self, rhs: f64) -> Vector3 {
        Vector3([self.0[0] / rhs, self.0[1] / rhs, self.0[2] / rhs])
    }
}

/// Tagged union of typed element buffers
#[derive(Debug, Clone, PartialEq)]
pub enum ElementArray {
    Float64(Vec<f64>),
    Float32(Vec<f32>),
    Int64(Vec<i64>),
    Int32(Vec<i32>),
    Bool(Vec<bool>),
    Vector3(Vec<Vector3>),
    String(Vec<String>),
    Bins(BinArray),
}

/// Apply an expression generic over the element vector of every dense
/// variant, rebuilding the same variant. `Bins` is handled by `$bins`.
macro_rules! map_dense {
    ($array:expr, $v:ident => $body:expr, $b:ident => $bins:expr) => {
        match $array {
            ElementArray::Float64($v) => ElementArray::Float64($body),
            ElementArray::Float32($v) => ElementArray::Float32($body),
            ElementArray::Int64($v) => ElementArray::Int64($body),
            ElementArray::Int32($v) => ElementArray::Int32($body),
            ElementArray::Bool($v) => ElementArray::Bool($body),
            ElementArray::Vector3($v) => ElementArray::Vector3($body),
            ElementArray::String($v) => ElementArray::String($body),
            ElementArray::Bins($b) => ElementArray::Bins($bins),
        }
    };
}

fn gather_vec<T: Clone>(values: &[T], offsets: &[usize]) -> Vec<T> {
    offsets.iter().map(|&i| values[i].clone()).collect()
}

impl ElementArray {
    pub fn dtype(&self) -> DType {
        match self {
            Self::Float64(_) => DType::Float64,
            Self::Float32(_) => DType::Float32,
            Self::Int64(_) => DType::Int64,
            Self::Int32(_) => DType::Int32,
            Self::Bool(_) => DType::Bool,
            Self::Vector3(_) => DType::Vector3,
            Self::String(_) => DType::String,
            Self::Bins(_) => DType::Bins,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Float64(v) => v.len(),
            Self::Float32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Bool(v) => v.len(),
            Self::Vector3(v) => v.len(),
            Self::String(v) => v.len(),
            Self::Bins(b) => b.ranges().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Default-initialised (zero, false, empty) buffer of `len` elements
    pub fn default_filled(dtype: DType, len: usize) -> Result<Self> {
        Ok(match dtype {
            DType::Float64 => Self::Float64(vec![0.0; len]),
            DType::Float32 => Self::Float32(vec![0.0; len]),
            DType::Int64 => Self::Int64(vec![0; len]),
            DType::Int32 => Self::Int32(vec![0; len]),
            DType::Bool => Self::Bool(vec![false; len]),
            DType::Vector3 => Self::Vector3(vec![Vector3::default(); len]),
            DType::String => Self::String(vec![String::new(); len]),
            DType::Bins => {
                return Err(RuLaVarError::TypeError(
                    "Cannot default-initialise a buffer of bins".to_string(),
                ))
            }
        })
    }

    /// Copy the elements at `offsets`, in order.
    ///
    /// Gathering bins copies the `(begin, end)` ranges and shares the buffer.
    pub fn gather(&self, offsets: &[usize]) -> Self {
        map_dense!(self, v => gather_vec(v, offsets), b => b.gather(offsets))
    }

    /// [`ElementArray::gather`] with the copy split across the thread pool
    pub fn par_gather(&self, offsets: &[usize]) -> Self {
        map_dense!(
            self,
            v => offsets.par_iter().map(|&i| v[i].clone()).collect(),
            b => b.gather(offsets)
        )
    }

    /// Concatenate two buffers of the same dtype
    pub fn append(&self, other: &ElementArray) -> Result<Self> {
        let mismatch = || {
            RuLaVarError::TypeError(format!(
                "Cannot append buffer of dtype {} to {}",
                other.dtype(),
                self.dtype()
            ))
        };
        Ok(match (self, other) {
            (Self::Float64(a), Self::Float64(b)) => Self::Float64([a.as_slice(), b.as_slice()].concat()),
            (Self::Float32(a), Self::Float32(b)) => Self::Float32([a.as_slice(), b.as_slice()].concat()),
            (Self::Int64(a), Self::Int64(b)) => Self::Int64([a.as_slice(), b.as_slice()].concat()),
            (Self::Int32(a), Self::Int32(b)) => Self::Int32([a.as_slice(), b.as_slice()].concat()),
            (Self::Bool(a), Self::Bool(b)) => Self::Bool([a.as_slice(), b.as_slice()].concat()),
            (Self::Vector3(a), Self::Vector3(b)) => Self::Vector3([a.as_slice(), b.as_slice()].concat()),
            (Self::String(a), Self::String(b)) => Self::String([a.as_slice(), b.as_slice()].concat()),
            (Self::Bins(a), Self::Bins(b)) => Self::Bins(a.append(b)?),
            _ => return Err(mismatch()),
        })
    }

    /// Overwrite the elements at `dest` with the elements of `src` at `source`.
    pub fn assign_from(
        &mut self,
        dest: impl Iterator<Item = usize>,
        src: &ElementArray,
        source: impl Iterator<Item = usize>,
    ) -> Result<()> {
        macro_rules! assign {
            ($($variant:ident),*) => {
                match (self, src) {
                    $(
                        (Self::$variant(out), Self::$variant(input)) => {
                            for (o, i) in dest.zip(source) {
                                out[o] = input[i].clone();
                            }
                        }
                    )*
                    (out, input) => {
                        return Err(RuLaVarError::TypeError(format!(
                            "Cannot assign elements of dtype {} to {}",
                            input.dtype(),
                            out.dtype()
                        )))
                    }
                }
            };
        }
        assign!(Float64, Float32, Int64, Int32, Bool, Vector3, String);
        Ok(())
    }

    /// Numeric content converted to f64
    pub fn to_f64(&self) -> Result<Vec<f64>> {
        Ok(match self {
            Self::Float64(v) => v.clone(),
            Self::Float32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Self::Int64(v) => v.iter().map(|&x| x as f64).collect(),
            Self::Int32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            other => {
                return Err(RuLaVarError::TypeError(format!(
                    "Expected a numeric dtype, got {}",
                    other.dtype()
                )))
            }
        })
    }
}

/// Rust types that can be stored in a buffer
pub trait Element: Clone + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    const DTYPE: DType;

    fn slice(array: &ElementArray) -> Option<&[Self]>;

    fn slice_mut(array: &mut ElementArray) -> Option<&mut [Self]>;

    fn into_array(values: Vec<Self>) -> ElementArray;
}

macro_rules! impl_element {
    ($t:ty, $variant:ident) => {
        impl Element for $t {
            const DTYPE: DType = DType::$variant;

            fn slice(array: &ElementArray) -> Option<&[Self]> {
                match array {
                    ElementArray::$variant(v) => Some(v.as_slice()),
                    _ => None,
                }
            }

            fn slice_mut(array: &mut ElementArray) -> Option<&mut [Self]> {
                match array {
                    ElementArray::$variant(v) => Some(v.as_mut_slice()),
                    _ => None,
                }
            }

            fn into_array(values: Vec<Self>) -> ElementArray {
                ElementArray::$variant(values)
            }
        }
    };
}

impl_element!(f64, Float64);
impl_element!(f32, Float32);
impl_element!(i64, Int64);
impl_element!(i32, Int32);
impl_element!(bool, Bool);
impl_element!(Vector3, Vector3);
impl_element!(String, String);

/// Numeric element types: the integer and floating dtypes
pub trait Numeric: Element + Copy + PartialOrd + num_traits::Num {
    /// Whether buffers of this type may carry variances
    const FLOAT: bool;
    /// Identity of `max`
    const LOWEST: Self;
    /// Identity of `min`
    const HIGHEST: Self;

    fn as_f64(self) -> f64;

    fn cast_from_f64(value: f64) -> Self;

    /// Sum that wraps around on integer overflow
    fn wrapping_add(self, other: Self) -> Self;

    fn wrapping_sub(self, other: Self) -> Self;

    fn wrapping_mul(self, other: Self) -> Self;
}

macro_rules! impl_numeric {
    ($t:ty, $float:expr, $lowest:expr, $highest:expr, |$a:ident, $b:ident| {
        add: $add:expr, sub: $sub:expr, mul: $mul:expr $(,)?
    }) => {
        impl Numeric for $t {
            const FLOAT: bool = $float;
            const LOWEST: Self = $lowest;
            const HIGHEST: Self = $highest;

            fn as_f64(self) -> f64 {
                self as f64
            }

            fn cast_from_f64(value: f64) -> Self {
                value as $t
            }

            fn wrapping_add(self, other: Self) -> Self {
                let ($a, $b) = (self, other);
                $add
            }

            fn wrapping_sub(self, other: Self) -> Self {
                let ($a, $b) = (self, other);
                $sub
            }

            fn wrapping_mul(self, other: Self) -> Self {
                let ($a, $b) = (self, other);
                $mul
            }
        }
    };
}

impl_numeric!(f64, true, f64::NEG_INFINITY, f64::INFINITY, |a, b| {
    add: a + b, sub: a - b, mul: a * b,
});
impl_numeric!(f32, true, f32::NEG_INFINITY, f32::INFINITY, |a, b| {
    add: a + b, sub: a - b, mul: a * b,
});
impl_numeric!(i64, false, i64::MIN, i64::MAX, |a, b| {
    add: i64::wrapping_add(a, b), sub: i64::wrapping_sub(a, b), mul: i64::wrapping_mul(a, b),
});
impl_numeric!(i32, false, i32::MIN, i32::MAX, |a, b| {
    add: i32::wrapping_add(a, b), sub: i32::wrapping_sub(a, b), mul: i32::wrapping_mul(a, b),
});
