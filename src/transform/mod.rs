//! Transform engine
//!
//! Elementwise application of operators across dtypes, units, variances and
//! dimension layouts. An operator is a strategy object implementing
//! [`UnaryOp`] or [`BinaryOp`] together with one typed kernel
//! ([`Kernel1`]/[`Kernel2`]) per supported dtype combination. The
//! `unary_dispatch!`/`binary_dispatch!` macros generate the runtime dispatch
//! from an ordered list of type tuples: the first tuple matching the runtime
//! dtypes wins, and no match is a `TypeError`.
//!
//! Out-of-place results take the broadcast union of the input dims. Work is
//! split into grain-sized chunks and run on the rayon pool; each chunk walks
//! its inputs with strided offset iterators.

use crate::dimensions::{merge, Dimensions};
use crate::dtype::{DType, Element, ElementArray};
use crate::errors::{Result, RuLaVarError};
use crate::parallel::grain_size;
use crate::units::Unit;
use crate::variable::{StridedOffsets, Variable, VariableView, VariableViewMut};
use rayon::prelude::*;

/// Values and optional variances produced by a kernel
pub type Computed = (ElementArray, Option<ElementArray>);

/// Typed kernel of a unary operator
pub trait Kernel1<A: Element> {
    type Out: Element;

    /// Whether the kernel propagates variances
    const VARIANCES: bool = false;

    fn value(&self, a: &A) -> Self::Out;

    fn value_and_variance(&self, a: &A, _va: &A) -> (Self::Out, Self::Out) {
        (self.value(a), Self::Out::default())
    }
}

/// Typed kernel of a binary operator
pub trait Kernel2<A: Element, B: Element> {
    type Out: Element;

    /// Whether the kernel propagates variances
    const VARIANCES: bool = false;

    fn value(&self, a: &A, b: &B) -> Self::Out;

    fn value_and_variance(&self, a: &A, _va: &A, b: &B, _vb: &B) -> (Self::Out, Self::Out) {
        (self.value(a, b), Self::Out::default())
    }
}

/// Runtime face of a unary operator
pub trait UnaryOp: Sync {
    fn name(&self) -> &'static str;

    /// Unit of the result, or a `UnitError`
    fn unit(&self, a: Unit) -> Result<Unit>;

    fn dispatch(&self, a: &VariableView<'_>) -> Result<Computed>;

    fn dispatch_in_place(&self, out: &mut VariableViewMut<'_>) -> Result<()>;
}

/// Runtime face of a binary operator
pub trait BinaryOp: Sync {
    fn name(&self) -> &'static str;

    /// Unit of the result, or a `UnitError`
    fn unit(&self, a: Unit, b: Unit) -> Result<Unit>;

    /// `op(op(x, y), y) == op(x, y)`, e.g. min, max, and, or.
    fn idempotent(&self) -> bool {
        false
    }

    fn dispatch(
        &self,
        a: &VariableView<'_>,
        b: &VariableView<'_>,
        dims: &Dimensions,
    ) -> Result<Computed>;

    fn dispatch_in_place(&self, out: &mut VariableViewMut<'_>, b: &VariableView<'_>) -> Result<()>;

    fn dispatch_accumulate(&self, out: &mut Variable, b: &VariableView<'_>) -> Result<()>;
}

/// Implement the dispatch methods of [`UnaryOp`] from type lists.
macro_rules! unary_dispatch {
    (transform: [$($ta:ty),* $(,)?], in_place: [$($ia:ty),* $(,)?] $(,)?) => {
        fn dispatch(
            &self,
            a: &$crate::variable::VariableView<'_>,
        ) -> $crate::errors::Result<$crate::transform::Computed> {
            $(
                if a.dtype() == <$ta as $crate::dtype::Element>::DTYPE {
                    return $crate::transform::unary::<$ta, Self>(self, a);
                }
            )*
            Err($crate::transform::unsupported(self.name(), &[a.dtype()]))
        }

        fn dispatch_in_place(
            &self,
            out: &mut $crate::variable::VariableViewMut<'_>,
        ) -> $crate::errors::Result<()> {
            $(
                if out.dtype() == <$ia as $crate::dtype::Element>::DTYPE {
                    return $crate::transform::unary_in_place::<$ia, Self>(self, out);
                }
            )*
            Err($crate::transform::unsupported(self.name(), &[out.dtype()]))
        }
    };
}

/// Implement the dispatch methods of [`BinaryOp`] from type lists.
macro_rules! binary_dispatch {
    (
        transform: [$(($ta:ty, $tb:ty)),* $(,)?],
        in_place: [$(($ia:ty, $ib:ty)),* $(,)?],
        accumulate: [$(($ra:ty, $rb:ty)),* $(,)?] $(,)?
    ) => {
        fn dispatch(
            &self,
            a: &$crate::variable::VariableView<'_>,
            b: &$crate::variable::VariableView<'_>,
            dims: &$crate::dimensions::Dimensions,
        ) -> $crate::errors::Result<$crate::transform::Computed> {
            $(
                if a.dtype() == <$ta as $crate::dtype::Element>::DTYPE
                    && b.dtype() == <$tb as $crate::dtype::Element>::DTYPE
                {
                    return $crate::transform::binary::<$ta, $tb, Self>(self, a, b, dims);
                }
            )*
            let _ = dims;
            Err($crate::transform::unsupported(self.name(), &[a.dtype(), b.dtype()]))
        }

        fn dispatch_in_place(
            &self,
            out: &mut $crate::variable::VariableViewMut<'_>,
            b: &$crate::variable::VariableView<'_>,
        ) -> $crate::errors::Result<()> {
            $(
                if out.dtype() == <$ia as $crate::dtype::Element>::DTYPE
                    && b.dtype() == <$ib as $crate::dtype::Element>::DTYPE
                {
                    return $crate::transform::binary_in_place::<$ia, $ib, Self>(self, out, b);
                }
            )*
            Err($crate::transform::unsupported(self.name(), &[out.dtype(), b.dtype()]))
        }

        fn dispatch_accumulate(
            &self,
            out: &mut $crate::variable::Variable,
            b: &$crate::variable::VariableView<'_>,
        ) -> $crate::errors::Result<()> {
            $(
                if out.dtype() == <$ra as $crate::dtype::Element>::DTYPE
                    && b.dtype() == <$rb as $crate::dtype::Element>::DTYPE
                {
                    return $crate::accumulate::accumulate::<$ra, $rb, Self>(self, out, b);
                }
            )*
            Err($crate::transform::unsupported(self.name(), &[out.dtype(), b.dtype()]))
        }
    };
}

pub(crate) use binary_dispatch;
pub(crate) use unary_dispatch;

/// `TypeError` for a dtype combination missing from an operator's table
pub fn unsupported(name: &str, dtypes: &[DType]) -> RuLaVarError {
    let dtypes: Vec<&str> = dtypes.iter().map(|d| d.as_str()).collect();
    RuLaVarError::TypeError(format!(
        "Unsupported dtype combination in '{name}': ({})",
        dtypes.join(", ")
    ))
}

pub(crate) fn no_variance_rule(name: &str) -> RuLaVarError {
    RuLaVarError::VariancesError(format!("Variances are not supported by '{name}'"))
}

/// Typed, strided read access to one operand
pub(crate) struct Operand<'a, T> {
    pub(crate) values: &'a [T],
    pub(crate) variances: Option<&'a [T]>,
    strides: Vec<usize>,
    offset: usize,
}

impl<'a, T: Element> Operand<'a, T> {
    /// Access to `view` as seen when iterating over `target`
    pub(crate) fn new(view: &VariableView<'a>, target: &Dimensions) -> Result<Self> {
        let mismatch = || unsupported("operand", &[view.dtype(), T::DTYPE]);
        let values = T::slice(view.values_array()).ok_or_else(mismatch)?;
        let variances = match view.variances_array() {
            Some(variances) => Some(T::slice(variances).ok_or_else(mismatch)?),
            None => None,
        };
        Ok(Self {
            values,
            variances,
            strides: view.strides_for(target),
            offset: view.offset(),
        })
    }

    pub(crate) fn offsets(&self, shape: &[usize], start: usize) -> StridedOffsets {
        StridedOffsets::starting_at(shape, &self.strides, self.offset, start)
    }
}

fn fill_parallel<T, F>(volume: usize, f: F) -> Vec<T>
where
    T: Element,
    F: Fn(usize, &mut [T]) + Sync + Send,
{
    let grain = grain_size();
    let mut out = vec![T::default(); volume];
    out.par_chunks_mut(grain)
        .enumerate()
        .for_each(|(chunk, values)| f(chunk * grain, values));
    out
}

fn fill_parallel_pair<T, F>(volume: usize, f: F) -> (Vec<T>, Vec<T>)
where
    T: Element,
    F: Fn(usize, &mut [T], &mut [T]) + Sync + Send,
{
    let grain = grain_size();
    let mut values = vec![T::default(); volume];
    let mut variances = vec![T::default(); volume];
    values
        .par_chunks_mut(grain)
        .zip(variances.par_chunks_mut(grain))
        .enumerate()
        .for_each(|(chunk, (v, var))| f(chunk * grain, v, var));
    (values, variances)
}

/// Typed out-of-place unary transform
pub fn unary<A, K>(op: &K, a: &VariableView<'_>) -> Result<Computed>
where
    A: Element,
    K: Kernel1<A> + UnaryOp,
{
    if a.has_variances() && !K::VARIANCES {
        return Err(no_variance_rule(op.name()));
    }
    let dims = a.dims();
    let input = Operand::<A>::new(a, dims)?;
    let shape = dims.shape();
    let volume = dims.volume();
    tracing::trace!(op = op.name(), volume, "unary transform");

    match input.variances {
        None => {
            let out = fill_parallel(volume, |start, chunk: &mut [K::Out]| {
                for (o, i) in chunk.iter_mut().zip(input.offsets(&shape, start)) {
                    *o = op.value(&input.values[i]);
                }
            });
            Ok((K::Out::into_array(out), None))
        }
        Some(variances) => {
            let (values, out_variances) = fill_parallel_pair(volume, |start, vals, vars| {
                for ((v, var), i) in vals.iter_mut().zip(vars.iter_mut()).zip(input.offsets(&shape, start)) {
                    let (value, variance) = op.value_and_variance(&input.values[i], &variances[i]);
                    *v = value;
                    *var = variance;
                }
            });
            Ok((K::Out::into_array(values), Some(K::Out::into_array(out_variances))))
        }
    }
}

/// Typed unary transform overwriting its input
pub fn unary_in_place<A, K>(op: &K, out: &mut VariableViewMut<'_>) -> Result<()>
where
    A: Element,
    K: Kernel1<A, Out = A> + UnaryOp,
{
    if out.has_variances() && !K::VARIANCES {
        return Err(no_variance_rule(op.name()));
    }
    let whole = out.is_whole();
    let dest = out.offsets();
    let dtype = out.dtype();
    let (values, variances) = out.arrays_mut();
    let values = A::slice_mut(values).ok_or_else(|| unsupported(op.name(), &[dtype]))?;
    let grain = grain_size();
    match variances {
        None if whole => values.par_chunks_mut(grain).for_each(|chunk| {
            for v in chunk {
                let value = op.value(v);
                *v = value;
            }
        }),
        None => {
            for i in dest {
                values[i] = op.value(&values[i]);
            }
        }
        Some(variances) => {
            let variances = A::slice_mut(variances).ok_or_else(|| unsupported(op.name(), &[dtype]))?;
            if whole {
                values
                    .par_chunks_mut(grain)
                    .zip(variances.par_chunks_mut(grain))
                    .for_each(|(vals, vars)| {
                        for (v, var) in vals.iter_mut().zip(vars.iter_mut()) {
                            let (value, variance) = op.value_and_variance(v, var);
                            *v = value;
                            *var = variance;
                        }
                    });
            } else {
                for i in dest {
                    let (value, variance) = op.value_and_variance(&values[i], &variances[i]);
                    values[i] = value;
                    variances[i] = variance;
                }
            }
        }
    }
    Ok(())
}

/// Typed out-of-place binary transform over the broadcast `dims`
pub fn binary<A, B, K>(
    op: &K,
    a: &VariableView<'_>,
    b: &VariableView<'_>,
    dims: &Dimensions,
) -> Result<Computed>
where
    A: Element,
    B: Element,
    K: Kernel2<A, B> + BinaryOp,
{
    let with_variances = a.has_variances() || b.has_variances();
    if with_variances && !K::VARIANCES {
        return Err(no_variance_rule(op.name()));
    }
    let lhs = Operand::<A>::new(a, dims)?;
    let rhs = Operand::<B>::new(b, dims)?;
    let shape = dims.shape();
    let volume = dims.volume();
    tracing::trace!(op = op.name(), volume, with_variances, "binary transform");

    if !with_variances {
        let out = fill_parallel(volume, |start, chunk: &mut [K::Out]| {
            let offsets = lhs.offsets(&shape, start).zip(rhs.offsets(&shape, start));
            for (o, (i, j)) in chunk.iter_mut().zip(offsets) {
                *o = op.value(&lhs.values[i], &rhs.values[j]);
            }
        });
        return Ok((K::Out::into_array(out), None));
    }

    let zero_a = A::default();
    let zero_b = B::default();
    let (values, variances) = fill_parallel_pair(volume, |start, vals, vars| {
        let offsets = lhs.offsets(&shape, start).zip(rhs.offsets(&shape, start));
        for ((v, var), (i, j)) in vals.iter_mut().zip(vars.iter_mut()).zip(offsets) {
            let va = lhs.variances.map_or(&zero_a, |x| &x[i]);
            let vb = rhs.variances.map_or(&zero_b, |x| &x[j]);
            let (value, variance) = op.value_and_variance(&lhs.values[i], va, &rhs.values[j], vb);
            *v = value;
            *var = variance;
        }
    });
    Ok((K::Out::into_array(values), Some(K::Out::into_array(variances))))
}

/// Typed binary transform writing into its first operand
pub fn binary_in_place<A, B, K>(
    op: &K,
    out: &mut VariableViewMut<'_>,
    b: &VariableView<'_>,
) -> Result<()>
where
    A: Element,
    B: Element,
    K: Kernel2<A, B, Out = A> + BinaryOp,
{
    if b.has_variances() && !out.has_variances() {
        return Err(RuLaVarError::VariancesError(format!(
            "Cannot apply '{}' in place: the output has no variances but the input does",
            op.name()
        )));
    }
    if out.has_variances() && !K::VARIANCES {
        return Err(no_variance_rule(op.name()));
    }
    let dims = out.dims().clone();
    let rhs = Operand::<B>::new(b, &dims)?;
    let shape = dims.shape();
    let whole = out.is_whole();
    let dest = out.offsets();
    let dtype = out.dtype();
    tracing::trace!(op = op.name(), volume = dims.volume(), whole, "in-place transform");

    let (values, variances) = out.arrays_mut();
    let values = A::slice_mut(values).ok_or_else(|| unsupported(op.name(), &[dtype]))?;
    let grain = grain_size();
    let zero_b = B::default();
    match variances {
        None if whole => values.par_chunks_mut(grain).enumerate().for_each(|(c, chunk)| {
            for (v, j) in chunk.iter_mut().zip(rhs.offsets(&shape, c * grain)) {
                let value = op.value(v, &rhs.values[j]);
                *v = value;
            }
        }),
        None => {
            for (i, j) in dest.zip(rhs.offsets(&shape, 0)) {
                values[i] = op.value(&values[i], &rhs.values[j]);
            }
        }
        Some(variances) => {
            let variances = A::slice_mut(variances).ok_or_else(|| unsupported(op.name(), &[dtype]))?;
            if whole {
                values
                    .par_chunks_mut(grain)
                    .zip(variances.par_chunks_mut(grain))
                    .enumerate()
                    .for_each(|(c, (vals, vars))| {
                        let offsets = rhs.offsets(&shape, c * grain);
                        for ((v, var), j) in vals.iter_mut().zip(vars.iter_mut()).zip(offsets) {
                            let vb = rhs.variances.map_or(&zero_b, |x| &x[j]);
                            let (value, variance) = op.value_and_variance(v, var, &rhs.values[j], vb);
                            *v = value;
                            *var = variance;
                        }
                    });
            } else {
                for (i, j) in dest.zip(rhs.offsets(&shape, 0)) {
                    let vb = rhs.variances.map_or(&zero_b, |x| &x[j]);
                    let (value, variance) =
                        op.value_and_variance(&values[i], &variances[i], &rhs.values[j], vb);
                    values[i] = value;
                    variances[i] = variance;
                }
            }
        }
    }
    Ok(())
}

/// Apply a unary operator, producing a new variable.
///
/// # Errors
///
/// Returns an error if the unit rule, dtype table or variance rule of the
/// operator rejects the input.
pub fn transform_unary<Op: UnaryOp>(op: &Op, a: &VariableView<'_>) -> Result<Variable> {
    let unit = op.unit(a.unit())?;
    let (values, variances) = op.dispatch(a)?;
    Ok(Variable::from_parts(a.dims().clone(), unit, values, variances))
}

/// Apply a unary operator to the elements of `out`.
///
/// # Errors
///
/// As [`transform_unary`]; additionally a `UnitError` if `out` is a slice
/// and the unit would change.
pub fn transform_unary_in_place<Op: UnaryOp>(op: &Op, out: &mut VariableViewMut<'_>) -> Result<()> {
    let unit = op.unit(out.unit())?;
    check_unit_change(out, unit)?;
    op.dispatch_in_place(out)?;
    out.set_unit(unit)
}

/// Apply a binary operator, producing a new variable over the broadcast
/// union of the input dims.
///
/// # Errors
///
/// Returns `DimensionError` for mismatched extents, and an error if the unit
/// rule, dtype table or variance rule of the operator rejects the inputs.
pub fn transform_binary<Op: BinaryOp>(
    op: &Op,
    a: &VariableView<'_>,
    b: &VariableView<'_>,
) -> Result<Variable> {
    let dims = merge(a.dims(), b.dims())?;
    let unit = op.unit(a.unit(), b.unit())?;
    let (values, variances) = op.dispatch(a, b, &dims)?;
    Ok(Variable::from_parts(dims, unit, values, variances))
}

/// Apply a binary operator with `out` as first operand and destination.
///
/// # Errors
///
/// Returns `DimensionError` if `b` has dims not in `out`, `TypeError` if
/// the kernel's output dtype is not the dtype of `out`, `VariancesError` if
/// `b` has variances and `out` does not, and `UnitError` from the unit rule.
pub fn transform_in_place<Op: BinaryOp>(
    op: &Op,
    out: &mut VariableViewMut<'_>,
    b: &VariableView<'_>,
) -> Result<()> {
    if !out.dims().includes(b.dims()) {
        return Err(RuLaVarError::DimensionError(format!(
            "Cannot apply '{}' in place: {} does not include {}",
            op.name(),
            out.dims(),
            b.dims()
        )));
    }
    let unit = op.unit(out.unit(), b.unit())?;
    check_unit_change(out, unit)?;
    op.dispatch_in_place(out, b)?;
    out.set_unit(unit)
}

fn check_unit_change(out: &VariableViewMut<'_>, unit: Unit) -> Result<()> {
    if unit != out.unit() && !out.is_whole() {
        return Err(RuLaVarError::UnitError(format!(
            "Cannot change unit of a slice from {} to {unit}",
            out.unit()
        )));
    }
    Ok(())
}
