//! Strided views and slicing

use super::Variable;
use crate::dimensions::{Dim, Dimensions};
use crate::dtype::{DType, Element, ElementArray};
use crate::errors::{Result, RuLaVarError};
use crate::units::Unit;

/// Selection along one dimension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    dim: Dim,
    begin: usize,
    end: Option<usize>,
}

impl Slice {
    /// Select a single index, dropping the dimension
    pub fn point(dim: impl Into<Dim>, index: usize) -> Self {
        Self {
            dim: dim.into(),
            begin: index,
            end: None,
        }
    }

    /// Select `begin..end`, keeping the dimension
    pub fn range(dim: impl Into<Dim>, begin: usize, end: usize) -> Self {
        Self {
            dim: dim.into(),
            begin,
            end: Some(end),
        }
    }

    pub fn dim(&self) -> &Dim {
        &self.dim
    }

    pub fn begin(&self) -> usize {
        self.begin
    }

    pub fn end(&self) -> Option<usize> {
        self.end
    }
}

fn apply_slice(
    dims: &mut Dimensions,
    strides: &mut Vec<usize>,
    offset: &mut usize,
    slice: &Slice,
) -> Result<()> {
    let i = dims.expect_index(&slice.dim)?;
    let extent = dims.extent_at(i);
    match slice.end {
        None => {
            if slice.begin >= extent {
                return Err(RuLaVarError::DimensionError(format!(
                    "Index {} out of range for '{}' in {dims}",
                    slice.begin, slice.dim
                )));
            }
            *offset += slice.begin * strides[i];
            dims.erase(&slice.dim)?;
            strides.remove(i);
        }
        Some(end) => {
            if slice.begin > end || end > extent {
                return Err(RuLaVarError::DimensionError(format!(
                    "Range {}..{end} out of range for '{}' in {dims}",
                    slice.begin, slice.dim
                )));
            }
            *offset += slice.begin * strides[i];
            dims.resize(&slice.dim, end - slice.begin)?;
        }
    }
    Ok(())
}

/// Row-major iterator over the buffer offsets of a strided layout
#[derive(Debug, Clone)]
pub struct StridedOffsets {
    shape: Vec<usize>,
    strides: Vec<usize>,
    index: Vec<usize>,
    offset: usize,
    remaining: usize,
}

impl StridedOffsets {
    pub fn new(shape: &[usize], strides: &[usize], base: usize) -> Self {
        Self::starting_at(shape, strides, base, 0)
    }

    /// Iterator positioned at row-major element `start`
    pub fn starting_at(shape: &[usize], strides: &[usize], base: usize, start: usize) -> Self {
        let volume: usize = shape.iter().product();
        let start = start.min(volume);
        let mut index = vec![0; shape.len()];
        let mut rest = start;
        for d in (0..shape.len()).rev() {
            if shape[d] > 0 {
                index[d] = rest % shape[d];
                rest /= shape[d];
            }
        }
        let offset = base + index.iter().zip(strides).map(|(i, s)| i * s).sum::<usize>();
        Self {
            shape: shape.to_vec(),
            strides: strides.to_vec(),
            index,
            offset,
            remaining: volume - start,
        }
    }
}

impl Iterator for StridedOffsets {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.offset;
        self.remaining -= 1;
        if self.remaining > 0 {
            for d in (0..self.shape.len()).rev() {
                self.index[d] += 1;
                self.offset += self.strides[d];
                if self.index[d] < self.shape[d] {
                    break;
                }
                self.offset -= self.strides[d] * self.shape[d];
                self.index[d] = 0;
            }
        }
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for StridedOffsets {}

/// Read-only strided view of a [`Variable`]
#[derive(Debug, Clone)]
pub struct VariableView<'a> {
    var: &'a Variable,
    dims: Dimensions,
    strides: Vec<usize>,
    offset: usize,
}

impl<'a> VariableView<'a> {
    pub(crate) fn new(var: &'a Variable) -> Self {
        Self {
            var,
            dims: var.dims.clone(),
            strides: var.dims.strides(),
            offset: 0,
        }
    }

    pub fn dims(&self) -> &Dimensions {
        &self.dims
    }

    pub fn unit(&self) -> Unit {
        self.var.unit
    }

    pub fn dtype(&self) -> DType {
        self.var.dtype()
    }

    pub fn has_variances(&self) -> bool {
        self.var.has_variances()
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The variable this view refers to
    pub fn variable(&self) -> &'a Variable {
        self.var
    }

    /// Narrow the view along one dimension.
    ///
    /// # Errors
    ///
    /// Returns an error if the dimension is missing or the index out of range.
    pub fn slice(&self, slice: Slice) -> Result<VariableView<'a>> {
        let mut out = self.clone();
        apply_slice(&mut out.dims, &mut out.strides, &mut out.offset, &slice)?;
        Ok(out)
    }

    /// Reorder the dimensions without copying.
    ///
    /// # Errors
    ///
    /// Returns `DimensionError` unless `order` is a permutation of the dims.
    pub fn transpose(&self, order: &[Dim]) -> Result<VariableView<'a>> {
        let dims = self.dims.transpose(order)?;
        let strides = order
            .iter()
            .map(|d| self.dims.expect_index(d).map(|i| self.strides[i]))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            var: self.var,
            dims,
            strides,
            offset: self.offset,
        })
    }

    /// Broadcast to `target` without copying; new dims get stride 0.
    ///
    /// # Errors
    ///
    /// Returns `DimensionError` if `target` does not include these dims.
    pub fn broadcast(&self, target: &Dimensions) -> Result<VariableView<'a>> {
        if !target.includes(&self.dims) {
            return Err(RuLaVarError::DimensionError(format!(
                "Cannot broadcast {} to {target}",
                self.dims
            )));
        }
        Ok(Self {
            var: self.var,
            dims: target.clone(),
            strides: self.strides_for(target),
            offset: self.offset,
        })
    }

    /// Strides of this view when iterating over `target`, 0 for missing dims.
    pub(crate) fn strides_for(&self, target: &Dimensions) -> Vec<usize> {
        target
            .labels()
            .map(|dim| self.dims.index_of(dim).map_or(0, |i| self.strides[i]))
            .collect()
    }

    /// True if the view addresses the whole buffer in row-major order.
    pub fn is_whole(&self) -> bool {
        self.offset == 0 && self.dims == self.var.dims
    }

    /// True if both views address the same elements of the same buffer.
    pub fn is_same(&self, other: &VariableView<'_>) -> bool {
        self.var.buffer_id() == other.var.buffer_id()
            && self.dims == other.dims
            && self.strides == other.strides
            && self.offset == other.offset
    }

    /// Buffer offsets of the view's elements in row-major order
    pub fn offsets(&self) -> StridedOffsets {
        StridedOffsets::new(&self.dims.shape(), &self.strides, self.offset)
    }

    /// Copy the viewed elements into a new typed `Vec`.
    ///
    /// # Errors
    ///
    /// Returns `TypeError` if `T` does not match the dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        let values = self.var.values::<T>()?;
        Ok(self.offsets().map(|i| values[i].clone()).collect())
    }

    /// Copy of the viewed elements as a contiguous variable
    pub fn to_variable(&self) -> Variable {
        if self.is_whole() {
            return self.var.clone();
        }
        let offsets: Vec<usize> = self.offsets().collect();
        Variable::from_parts(
            self.dims.clone(),
            self.var.unit,
            self.var.values_array().gather(&offsets),
            self.var.variances_array().map(|v| v.gather(&offsets)),
        )
    }

    pub(crate) fn values_array(&self) -> &'a ElementArray {
        self.var.values_array()
    }

    pub(crate) fn variances_array(&self) -> Option<&'a ElementArray> {
        self.var.variances_array()
    }
}

impl<'a> From<&'a Variable> for VariableView<'a> {
    fn from(var: &'a Variable) -> Self {
        var.view()
    }
}

impl PartialEq for VariableView<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.to_variable() == other.to_variable()
    }
}

/// Mutable strided view of a [`Variable`]
#[derive(Debug)]
pub struct VariableViewMut<'a> {
    var: &'a mut Variable,
    dims: Dimensions,
    strides: Vec<usize>,
    offset: usize,
}

impl<'a> VariableViewMut<'a> {
    pub(crate) fn new(var: &'a mut Variable) -> Self {
        let dims = var.dims.clone();
        let strides = dims.strides();
        Self {
            var,
            dims,
            strides,
            offset: 0,
        }
    }

    pub fn dims(&self) -> &Dimensions {
        &self.dims
    }

    pub fn unit(&self) -> Unit {
        self.var.unit
    }

    pub fn dtype(&self) -> DType {
        self.var.dtype()
    }

    pub fn has_variances(&self) -> bool {
        self.var.has_variances()
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Narrow the view along one dimension.
    ///
    /// # Errors
    ///
    /// Returns an error if the dimension is missing or the index out of range.
    pub fn slice(mut self, slice: Slice) -> Result<VariableViewMut<'a>> {
        apply_slice(&mut self.dims, &mut self.strides, &mut self.offset, &slice)?;
        Ok(self)
    }

    /// Read-only view of the same elements
    pub fn as_view(&self) -> VariableView<'_> {
        VariableView {
            var: &*self.var,
            dims: self.dims.clone(),
            strides: self.strides.clone(),
            offset: self.offset,
        }
    }

    /// True if the view addresses the whole buffer in row-major order.
    pub fn is_whole(&self) -> bool {
        self.offset == 0 && self.dims == self.var.dims
    }

    /// Set the unit of the underlying variable.
    ///
    /// # Errors
    ///
    /// Returns `UnitError` when the view is a proper slice and the unit
    /// would change, since the unit belongs to the whole buffer.
    pub fn set_unit(&mut self, unit: Unit) -> Result<()> {
        if unit == self.var.unit {
            return Ok(());
        }
        if !self.is_whole() {
            return Err(RuLaVarError::UnitError(format!(
                "Cannot change unit of a slice from {} to {unit}",
                self.var.unit
            )));
        }
        self.var.unit = unit;
        Ok(())
    }

    /// Buffer offsets of the view's elements in row-major order
    pub fn offsets(&self) -> StridedOffsets {
        StridedOffsets::new(&self.dims.shape(), &self.strides, self.offset)
    }

    /// Copy `other` into the viewed elements, broadcasting it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error on dtype, unit, variance or dimension mismatch.
    pub fn assign(&mut self, other: &VariableView<'_>) -> Result<()> {
        if !self.dims.includes(other.dims()) {
            return Err(RuLaVarError::DimensionError(format!(
                "Cannot assign {} to {}",
                other.dims(),
                self.dims
            )));
        }
        if other.has_variances() != self.has_variances() {
            return Err(RuLaVarError::VariancesError(
                "Either both or neither of the operands must have variances".to_string(),
            ));
        }
        if other.dtype() != self.dtype() {
            return Err(RuLaVarError::TypeError(format!(
                "Cannot assign dtype {} to {}",
                other.dtype(),
                self.dtype()
            )));
        }
        self.set_unit(other.unit())?;
        let source = other.broadcast(&self.dims)?;
        let dest = self.offsets();
        let (values, variances) = self.var.arrays_mut();
        values.assign_from(dest.clone(), source.values_array(), source.offsets())?;
        if let (Some(out), Some(input)) = (variances, source.variances_array()) {
            out.assign_from(dest, input, source.offsets())?;
        }
        Ok(())
    }

    pub(crate) fn arrays_mut(&mut self) -> (&mut ElementArray, Option<&mut ElementArray>) {
        self.var.arrays_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::make_variable;

    fn xy() -> Variable {
        let dims = Dimensions::new([("x", 2), ("y", 3)]).unwrap();
        make_variable(dims, Unit::M, (0..6).map(f64::from).collect(), None).unwrap()
    }

    #[test]
    fn test_strided_offsets() {
        let offsets: Vec<usize> = StridedOffsets::new(&[2, 3], &[1, 2], 0).collect();
        assert_eq!(offsets, vec![0, 2, 4, 1, 3, 5]);
        let tail: Vec<usize> = StridedOffsets::starting_at(&[2, 3], &[3, 1], 10, 4).collect();
        assert_eq!(tail, vec![14, 15]);
        assert_eq!(StridedOffsets::new(&[], &[], 7).collect::<Vec<_>>(), vec![7]);
        assert_eq!(StridedOffsets::new(&[0, 3], &[3, 1], 0).count(), 0);
    }

    #[test]
    fn test_slicing() {
        let var = xy();
        let row = var.slice(Slice::point("x", 1)).unwrap();
        assert_eq!(row.dims(), &Dimensions::one("y", 3));
        assert_eq!(row.to_vec::<f64>().unwrap(), vec![3.0, 4.0, 5.0]);

        let col = var.slice(Slice::range("y", 1, 2)).unwrap();
        assert_eq!(col.to_vec::<f64>().unwrap(), vec![1.0, 4.0]);

        assert!(var.slice(Slice::point("x", 2)).is_err());
        assert!(var.slice(Slice::range("y", 2, 4)).is_err());
        assert!(matches!(
            var.slice(Slice::point("z", 0)),
            Err(RuLaVarError::DimensionNotFound { .. })
        ));
    }

    #[test]
    fn test_transpose_and_broadcast_views() {
        let var = xy();
        let t = var.view().transpose(&[Dim::from("y"), Dim::from("x")]).unwrap();
        assert_eq!(t.to_vec::<f64>().unwrap(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);

        let row = var.slice(Slice::point("x", 0)).unwrap();
        let b = row.broadcast(var.dims()).unwrap();
        assert_eq!(b.to_vec::<f64>().unwrap(), vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_assign_into_slice() {
        let mut var = xy();
        let other = make_variable(Dimensions::one("x", 2), Unit::M, vec![-1.0, -2.0], None).unwrap();
        var.slice_mut(Slice::point("y", 2)).unwrap().assign(&other.view()).unwrap();
        assert_eq!(var.values::<f64>().unwrap(), &[0.0, 1.0, -1.0, 3.0, 4.0, -2.0]);

        let wrong_unit = Variable::scalar(1.0, Unit::S);
        let mut slice = var.slice_mut(Slice::point("x", 0)).unwrap();
        assert!(matches!(slice.assign(&wrong_unit.view()), Err(RuLaVarError::UnitError(_))));
    }
}
