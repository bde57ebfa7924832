//! Binned variables
//!
//! A variable of dtype `Bins` stores one `(begin, end)` range per element.
//! Each range selects the slice of a shared buffer variable along the bucket
//! dimension that holds that element's events.
//!
//! ## Organization
//!
//! - [`BinArray`]: ranges, bucket dimension and buffer
//! - constructors: [`make_bins`], [`make_bins_from_sizes`]
//! - per-bucket reductions: [`bins_size`], [`bins_sum`], [`bins_mean`]
//! - restructuring: [`bins_flatten`], [`bins_concat`]

use crate::arithmetic::{astype, dimensionless_like, divide};
use crate::dimensions::{Dim, Dimensions};
use crate::dtype::{DType, ElementArray, Vector3};
use crate::errors::{Result, RuLaVarError};
use crate::shape::{concatenate, take};
use crate::variable::{Slice, Variable, VariableView};
use rayon::prelude::*;
use tracing::debug;

/// Bucket ranges into a buffer variable
#[derive(Debug, Clone)]
pub struct BinArray {
    ranges: Vec<(usize, usize)>,
    dim: Dim,
    buffer: Variable,
}

impl BinArray {
    /// # Errors
    ///
    /// Returns `DimensionError` if a range is reversed or exceeds the extent
    /// of `dim` in `buffer`, and `TypeError` if `buffer` is itself binned.
    pub fn new(ranges: Vec<(usize, usize)>, dim: impl Into<Dim>, buffer: Variable) -> Result<Self> {
        let dim = dim.into();
        if buffer.dtype() == DType::Bins {
            return Err(RuLaVarError::TypeError(
                "Bucket buffers cannot hold binned data".to_string(),
            ));
        }
        let extent = buffer.dims().extent(&dim)?;
        if let Some(&(begin, end)) = ranges.iter().find(|&&(b, e)| b > e || e > extent) {
            return Err(RuLaVarError::DimensionError(format!(
                "Bucket range [{begin}, {end}) is invalid for buffer extent {extent} along '{dim}'"
            )));
        }
        Ok(Self { ranges, dim, buffer })
    }

    pub fn ranges(&self) -> &[(usize, usize)] {
        &self.ranges
    }

    pub fn dim(&self) -> &Dim {
        &self.dim
    }

    pub fn buffer(&self) -> &Variable {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of events in each bucket
    pub fn sizes(&self) -> Vec<usize> {
        self.ranges.iter().map(|&(b, e)| e - b).collect()
    }

    /// View of the events of bucket `index`.
    ///
    /// # Errors
    ///
    /// Returns `DimensionError` if `index` is out of range.
    pub fn bucket(&self, index: usize) -> Result<VariableView<'_>> {
        let &(begin, end) = self.ranges.get(index).ok_or_else(|| {
            RuLaVarError::DimensionError(format!(
                "Bucket index {index} out of range for {} buckets",
                self.ranges.len()
            ))
        })?;
        self.buffer.slice(Slice::range(self.dim.clone(), begin, end))
    }

    /// Buffer positions of all events, bucket after bucket
    pub(crate) fn event_indices(&self) -> Vec<usize> {
        self.ranges.iter().flat_map(|&(b, e)| b..e).collect()
    }

    pub(crate) fn gather(&self, offsets: &[usize]) -> Self {
        Self {
            ranges: offsets.iter().map(|&i| self.ranges[i]).collect(),
            dim: self.dim.clone(),
            buffer: self.buffer.clone(),
        }
    }

    /// Buckets of `self` followed by the buckets of `other`.
    ///
    /// Buffers are concatenated along the bucket dim unless they are shared.
    pub(crate) fn append(&self, other: &BinArray) -> Result<Self> {
        if self.dim != other.dim {
            return Err(RuLaVarError::DimensionError(format!(
                "Cannot append buckets along '{}' to buckets along '{}'",
                other.dim, self.dim
            )));
        }
        if self.buffer.is_same(&other.buffer) {
            let ranges = [self.ranges.as_slice(), other.ranges.as_slice()].concat();
            return Ok(Self { ranges, dim: self.dim.clone(), buffer: self.buffer.clone() });
        }
        let shift = self.buffer.dims().extent(&self.dim)?;
        let buffer = concatenate(&self.buffer.view(), &other.buffer.view(), &self.dim)?;
        let ranges = self
            .ranges
            .iter()
            .copied()
            .chain(other.ranges.iter().map(|&(b, e)| (b + shift, e + shift)))
            .collect();
        Self::new(ranges, self.dim.clone(), buffer)
    }
}

impl PartialEq for BinArray {
    fn eq(&self, other: &Self) -> bool {
        self.dim == other.dim
            && self.sizes() == other.sizes()
            && (0..self.len()).all(|i| match (self.bucket(i), other.bucket(i)) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            })
    }
}

/// Contiguous ranges holding `sizes[i]` events each, in order
pub(crate) fn ranges_from_sizes(sizes: &[usize]) -> Vec<(usize, usize)> {
    let mut begin = 0;
    sizes
        .iter()
        .map(|&size| {
            let range = (begin, begin + size);
            begin += size;
            range
        })
        .collect()
}

/// Create a binned variable. Its unit is the unit of `buffer`.
///
/// # Errors
///
/// Returns `DimensionError` if the number of ranges differs from the volume
/// of `dims` or a range does not fit into `buffer`.
pub fn make_bins(
    dims: Dimensions,
    ranges: Vec<(usize, usize)>,
    dim: impl Into<Dim>,
    buffer: Variable,
) -> Result<Variable> {
    if ranges.len() != dims.volume() {
        return Err(RuLaVarError::DimensionError(format!(
            "Got {} bucket ranges for dimensions {dims}",
            ranges.len()
        )));
    }
    let unit = buffer.unit();
    let bins = BinArray::new(ranges, dim, buffer)?;
    Variable::new(dims, unit, ElementArray::Bins(bins), None)
}

/// Create a binned variable whose buckets tile `buffer` in order.
///
/// # Errors
///
/// See [`make_bins`].
pub fn make_bins_from_sizes(
    dims: Dimensions,
    sizes: &[usize],
    dim: impl Into<Dim>,
    buffer: Variable,
) -> Result<Variable> {
    make_bins(dims, ranges_from_sizes(sizes), dim, buffer)
}

fn bins_of<'a>(var: &VariableView<'a>) -> Result<&'a BinArray> {
    match var.values_array() {
        ElementArray::Bins(bins) => Ok(bins),
        other => Err(RuLaVarError::TypeError(format!(
            "Expected binned data, got dtype {}",
            other.dtype()
        ))),
    }
}

/// Ranges of the elements of a (possibly strided) view, in row-major order
fn view_ranges<'a>(var: &VariableView<'a>) -> Result<(&'a BinArray, Vec<(usize, usize)>)> {
    let bins = bins_of(var)?;
    let ranges = var.offsets().map(|i| bins.ranges()[i]).collect();
    Ok((bins, ranges))
}

/// Number of events per bucket, as int64 with unit one
///
/// # Errors
///
/// Returns `TypeError` unless `var` is binned.
pub fn bins_size(var: &VariableView<'_>) -> Result<Variable> {
    let (_, ranges) = view_ranges(var)?;
    let sizes = ranges.iter().map(|&(b, e)| (e - b) as i64).collect();
    Variable::new(var.dims().clone(), crate::units::Unit::ONE, ElementArray::Int64(sizes), None)
}

fn sum_ranges<T, S, F>(values: &[T], ranges: &[(usize, usize)], sum: F) -> Vec<S>
where
    T: Sync,
    S: Send,
    F: Fn(&[T]) -> S + Sync,
{
    ranges.par_iter().map(|&(b, e)| sum(&values[b..e])).collect()
}

fn sum_buffer(array: &ElementArray, ranges: &[(usize, usize)]) -> Result<ElementArray> {
    Ok(match array {
        ElementArray::Float64(v) => ElementArray::Float64(sum_ranges(v, ranges, |s| s.iter().sum())),
        ElementArray::Float32(v) => ElementArray::Float32(sum_ranges(v, ranges, |s| s.iter().sum())),
        ElementArray::Int64(v) => ElementArray::Int64(sum_ranges(v, ranges, |s| {
            s.iter().fold(0, |acc: i64, &x| acc.wrapping_add(x))
        })),
        ElementArray::Int32(v) => ElementArray::Int32(sum_ranges(v, ranges, |s| {
            s.iter().fold(0, |acc: i32, &x| acc.wrapping_add(x))
        })),
        ElementArray::Bool(v) => ElementArray::Int64(sum_ranges(v, ranges, |s| {
            s.iter().filter(|&&b| b).count() as i64
        })),
        ElementArray::Vector3(v) => ElementArray::Vector3(sum_ranges(v, ranges, |s| {
            s.iter().fold(Vector3::default(), |acc, &x| acc + x)
        })),
        other => {
            return Err(RuLaVarError::TypeError(format!(
                "Cannot sum buckets of dtype {}",
                other.dtype()
            )))
        }
    })
}

/// Sum of the events of each bucket. Bool events count into int64.
///
/// # Errors
///
/// Returns `TypeError` for non-summable buffer dtypes and `NotImplemented`
/// for buffers with more than one dimension.
pub fn bins_sum(var: &VariableView<'_>) -> Result<Variable> {
    let (bins, ranges) = view_ranges(var)?;
    let buffer = bins.buffer();
    if buffer.dims().ndim() != 1 {
        return Err(RuLaVarError::NotImplemented(format!(
            "bins_sum of buckets with buffer dimensions {}",
            buffer.dims()
        )));
    }
    let values = sum_buffer(buffer.values_array(), &ranges)?;
    let variances = buffer
        .variances_array()
        .map(|v| sum_buffer(v, &ranges))
        .transpose()?;
    Variable::new(var.dims().clone(), buffer.unit(), values, variances)
}

/// Mean of the events of each bucket; empty buckets give NaN.
///
/// Float32 buffers give float32, everything else float64.
///
/// # Errors
///
/// See [`bins_sum`].
pub fn bins_mean(var: &VariableView<'_>) -> Result<Variable> {
    let mut sum = bins_sum(var)?;
    if sum.dtype().is_int() {
        sum = astype(&sum.view(), DType::Float64)?;
    }
    let count_dtype = if sum.dtype() == DType::Float32 {
        DType::Float32
    } else {
        DType::Float64
    };
    let mut count = astype(&bins_size(var)?.view(), count_dtype)?;
    count.set_unit(dimensionless_like(sum.unit()));
    divide(&sum.view(), &count.view())
}

/// Dense concatenation of all events, bucket after bucket in row-major order.
///
/// # Errors
///
/// Returns `TypeError` unless `var` is binned.
pub fn bins_flatten(var: &VariableView<'_>) -> Result<Variable> {
    let (bins, ranges) = view_ranges(var)?;
    let indices: Vec<usize> = ranges.iter().flat_map(|&(b, e)| b..e).collect();
    take(&bins.buffer().view(), bins.dim(), &indices)
}

/// Merge the buckets along `dim`; each output bucket holds the events of
/// all input buckets it replaces, in order.
///
/// # Errors
///
/// Returns `TypeError` unless `var` is binned and `DimensionNotFound` if it
/// does not depend on `dim`.
pub fn bins_concat(var: &VariableView<'_>, dim: &Dim) -> Result<Variable> {
    let bins = bins_of(var)?;
    let mut order: Vec<Dim> = var.dims().labels().filter(|d| *d != dim).cloned().collect();
    order.push(dim.clone());
    let extent = var.dims().extent(dim)?;
    let mut out_dims = var.dims().clone();
    out_dims.erase(dim)?;

    let inner_last = var.transpose(&order)?;
    let ranges: Vec<(usize, usize)> = inner_last.offsets().map(|i| bins.ranges()[i]).collect();
    let mut indices = Vec::new();
    let mut sizes = Vec::with_capacity(out_dims.volume());
    if extent == 0 {
        sizes.resize(out_dims.volume(), 0);
    } else {
        for group in ranges.chunks(extent) {
            let before = indices.len();
            indices.extend(group.iter().flat_map(|&(b, e)| b..e));
            sizes.push(indices.len() - before);
        }
    }
    debug!(dim = %dim, buckets = sizes.len(), events = indices.len(), "concatenating buckets");
    let buffer = take(&bins.buffer().view(), bins.dim(), &indices)?;
    make_bins_from_sizes(out_dims, &sizes, bins.dim().clone(), buffer)
}

/// Concatenate two binned variables along their bucket dim: each output
/// bucket holds the events of `a` followed by the events of `b`.
pub(crate) fn concatenate_buckets(a: &VariableView<'_>, b: &VariableView<'_>) -> Result<Variable> {
    if a.dims() != b.dims() {
        return Err(RuLaVarError::DimensionError(format!(
            "Cannot concatenate buckets of {} and {}",
            a.dims(),
            b.dims()
        )));
    }
    let (bins_a, ranges_a) = view_ranges(a)?;
    let (bins_b, ranges_b) = view_ranges(b)?;
    let dim = bins_a.dim();
    let shift = bins_a.buffer().dims().extent(dim)?;
    let combined = concatenate(&bins_a.buffer().view(), &bins_b.buffer().view(), dim)?;

    let mut indices = Vec::new();
    let mut sizes = Vec::with_capacity(ranges_a.len());
    for (&(ab, ae), &(bb, be)) in ranges_a.iter().zip(&ranges_b) {
        indices.extend(ab..ae);
        indices.extend(bb + shift..be + shift);
        sizes.push(ae - ab + be - bb);
    }
    let buffer = take(&combined.view(), dim, &indices)?;
    make_bins_from_sizes(a.dims().clone(), &sizes, dim.clone(), buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Unit;
    use crate::variable::make_variable;

    fn events() -> Variable {
        make_variable(
            Dimensions::one("event", 5),
            Unit::COUNTS,
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            Some(vec![1.0, 1.0, 1.0, 1.0, 1.0]),
        )
        .unwrap()
    }

    fn binned() -> Variable {
        make_bins(
            Dimensions::one("x", 3),
            vec![(0, 2), (2, 2), (2, 5)],
            "event",
            events(),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_ranges() {
        let err = make_bins(Dimensions::one("x", 1), vec![(3, 6)], "event", events());
        assert!(matches!(err, Err(RuLaVarError::DimensionError(_))));
        let err = make_bins(Dimensions::one("x", 2), vec![(0, 1)], "event", events());
        assert!(matches!(err, Err(RuLaVarError::DimensionError(_))));
    }

    #[test]
    fn test_size_sum_mean() {
        let var = binned();
        assert_eq!(var.unit(), Unit::COUNTS);
        assert_eq!(bins_size(&var.view()).unwrap().values::<i64>().unwrap(), &[2, 0, 3]);

        let sum = bins_sum(&var.view()).unwrap();
        assert_eq!(sum.values::<f64>().unwrap(), &[3.0, 0.0, 12.0]);
        assert_eq!(sum.variances::<f64>().unwrap(), &[2.0, 0.0, 3.0]);

        let mean = bins_mean(&var.view()).unwrap();
        let values = mean.values::<f64>().unwrap();
        assert_eq!(values[0], 1.5);
        assert!(values[1].is_nan());
        assert_eq!(values[2], 4.0);
    }

    #[test]
    fn test_bool_sum_counts() {
        let flags = make_variable(Dimensions::one("event", 3), Unit::NONE, vec![true, false, true], None).unwrap();
        let var = make_bins(Dimensions::one("x", 2), vec![(0, 2), (2, 3)], "event", flags).unwrap();
        let sum = bins_sum(&var.view()).unwrap();
        assert_eq!(sum.values::<i64>().unwrap(), &[1, 1]);
    }

    #[test]
    fn test_integer_sum_wraps() {
        let counts = make_variable(Dimensions::one("event", 3), Unit::COUNTS, vec![i64::MAX, 1, 7], None).unwrap();
        let var = make_bins(Dimensions::one("x", 2), vec![(0, 2), (2, 3)], "event", counts).unwrap();
        let sum = bins_sum(&var.view()).unwrap();
        assert_eq!(sum.values::<i64>().unwrap(), &[i64::MIN, 7]);
    }

    #[test]
    fn test_flatten_and_concat() {
        let var = binned();
        let flat = bins_flatten(&var.view()).unwrap();
        assert_eq!(flat.values::<f64>().unwrap(), &[1.0, 2.0, 3.0, 4.0, 5.0]);

        let merged = bins_concat(&var.view(), &Dim::from("x")).unwrap();
        assert!(merged.dims().is_scalar());
        assert_eq!(bins_size(&merged.view()).unwrap().values::<i64>().unwrap(), &[5]);
    }

    #[test]
    fn test_concatenate_buckets() {
        let var = binned();
        let doubled = concatenate_buckets(&var.view(), &var.view()).unwrap();
        assert_eq!(bins_size(&doubled.view()).unwrap().values::<i64>().unwrap(), &[4, 0, 6]);
        let first = doubled.bins().unwrap().bucket(0).unwrap().to_vec::<f64>().unwrap();
        assert_eq!(first, vec![1.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn test_equality_compares_contents() {
        let a = binned();
        let compact = make_bins(
            Dimensions::one("x", 3),
            vec![(0, 2), (2, 2), (2, 5)],
            "event",
            events().copy(),
        )
        .unwrap();
        assert_eq!(a, compact);
    }
}
