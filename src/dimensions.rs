//! Dimension labels and ordered dimension metadata
//!
//! [`Dimensions`] is an ordered list of `(label, extent)` pairs. The last
//! entry is the inner (fastest varying) dimension of a contiguous buffer.

use crate::errors::{Result, RuLaVarError};
use std::fmt;

/// A dimension label
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dim(String);

impl Dim {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Dim {
    fn from(label: &str) -> Self {
        Self(label.to_string())
    }
}

impl From<String> for Dim {
    fn from(label: String) -> Self {
        Self(label)
    }
}

impl From<&Dim> for Dim {
    fn from(dim: &Dim) -> Self {
        dim.clone()
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered `(label, extent)` pairs with unique labels
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct Dimensions {
    entries: Vec<(Dim, usize)>,
}

impl Dimensions {
    /// Dimensions of a scalar (no dims, volume 1)
    pub fn scalar() -> Self {
        Self::default()
    }

    /// Build from labels and extents, rejecting duplicate labels
    pub fn new<D: Into<Dim>>(dims: impl IntoIterator<Item = (D, usize)>) -> Result<Self> {
        let mut out = Self::default();
        for (dim, extent) in dims {
            out.add_inner(dim, extent)?;
        }
        Ok(out)
    }

    /// Single-dimension shortcut
    pub fn one(dim: impl Into<Dim>, extent: usize) -> Self {
        Self {
            entries: vec![(dim.into(), extent)],
        }
    }

    pub fn ndim(&self) -> usize {
        self.entries.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn volume(&self) -> usize {
        self.entries.iter().map(|(_, extent)| extent).product()
    }

    pub fn labels(&self) -> impl Iterator<Item = &Dim> + '_ {
        self.entries.iter().map(|(dim, _)| dim)
    }

    pub fn shape(&self) -> Vec<usize> {
        self.entries.iter().map(|(_, extent)| *extent).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Dim, usize)> + '_ {
        self.entries.iter().map(|(dim, extent)| (dim, *extent))
    }

    pub fn contains(&self, dim: &Dim) -> bool {
        self.entries.iter().any(|(d, _)| d == dim)
    }

    pub fn index_of(&self, dim: &Dim) -> Option<usize> {
        self.entries.iter().position(|(d, _)| d == dim)
    }

    /// Position of `dim`, or a `DimensionNotFound` error
    pub fn expect_index(&self, dim: &Dim) -> Result<usize> {
        self.index_of(dim).ok_or_else(|| RuLaVarError::DimensionNotFound {
            dim: dim.to_string(),
            dims: self.to_string(),
        })
    }

    /// Extent of `dim`, or a `DimensionNotFound` error
    pub fn extent(&self, dim: &Dim) -> Result<usize> {
        Ok(self.entries[self.expect_index(dim)?].1)
    }

    /// The label at position `index`
    pub fn label(&self, index: usize) -> &Dim {
        &self.entries[index].0
    }

    /// Extent at position `index`
    pub fn extent_at(&self, index: usize) -> usize {
        self.entries[index].1
    }

    /// Outermost dimension
    pub fn outer(&self) -> Option<&Dim> {
        self.entries.first().map(|(dim, _)| dim)
    }

    /// Innermost (fastest varying) dimension
    pub fn inner(&self) -> Option<&Dim> {
        self.entries.last().map(|(dim, _)| dim)
    }

    /// Append a new innermost dimension
    pub fn add_inner(&mut self, dim: impl Into<Dim>, extent: usize) -> Result<()> {
        let dim = dim.into();
        if self.contains(&dim) {
            return Err(RuLaVarError::DimensionError(format!(
                "Duplicate dimension '{dim}' in {self}"
            )));
        }
        self.entries.push((dim, extent));
        Ok(())
    }

    /// Prepend a new outermost dimension
    pub fn add_outer(&mut self, dim: impl Into<Dim>, extent: usize) -> Result<()> {
        let dim = dim.into();
        if self.contains(&dim) {
            return Err(RuLaVarError::DimensionError(format!(
                "Duplicate dimension '{dim}' in {self}"
            )));
        }
        self.entries.insert(0, (dim, extent));
        Ok(())
    }

    /// Insert a dimension at position `index`
    pub fn insert(&mut self, index: usize, dim: impl Into<Dim>, extent: usize) -> Result<()> {
        let dim = dim.into();
        if self.contains(&dim) {
            return Err(RuLaVarError::DimensionError(format!(
                "Duplicate dimension '{dim}' in {self}"
            )));
        }
        self.entries.insert(index.min(self.entries.len()), (dim, extent));
        Ok(())
    }

    /// Remove `dim`, returning its extent
    pub fn erase(&mut self, dim: &Dim) -> Result<usize> {
        let index = self.expect_index(dim)?;
        Ok(self.entries.remove(index).1)
    }

    /// Change the extent of an existing dimension
    pub fn resize(&mut self, dim: &Dim, extent: usize) -> Result<()> {
        let index = self.expect_index(dim)?;
        self.entries[index].1 = extent;
        Ok(())
    }

    /// Rename an existing dimension
    pub fn relabel(&mut self, from: &Dim, to: impl Into<Dim>) -> Result<()> {
        let to = to.into();
        let index = self.expect_index(from)?;
        if from != &to && self.contains(&to) {
            return Err(RuLaVarError::DimensionError(format!(
                "Cannot rename '{from}' to existing dimension '{to}' in {self}"
            )));
        }
        self.entries[index].0 = to;
        Ok(())
    }

    /// True if every dim of `other` is present here with the same extent.
    pub fn includes(&self, other: &Dimensions) -> bool {
        other
            .iter()
            .all(|(dim, extent)| self.index_of(dim).map(|i| self.entries[i].1) == Some(extent))
    }

    /// Contiguous row-major strides of this layout
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![0; self.ndim()];
        let mut stride = 1;
        for (i, (_, extent)) in self.entries.iter().enumerate().rev() {
            strides[i] = stride;
            stride *= extent;
        }
        strides
    }

    /// Strides of a contiguous buffer with these dims, as seen when iterating
    /// over `target`. Dims missing here broadcast with stride 0.
    pub fn broadcast_strides(&self, target: &Dimensions) -> Vec<usize> {
        let own = self.strides();
        target
            .labels()
            .map(|dim| self.index_of(dim).map_or(0, |i| own[i]))
            .collect()
    }

    /// Return these dims transposed into `order`, which must be a permutation.
    pub fn transpose(&self, order: &[Dim]) -> Result<Dimensions> {
        if order.len() != self.ndim() || !order.iter().all(|d| self.contains(d)) {
            return Err(RuLaVarError::DimensionError(format!(
                "Cannot transpose {self} into order {}",
                format_labels(order)
            )));
        }
        Dimensions::new(order.iter().map(|d| (d.clone(), self.extent_at(self.index_of(d).unwrap_or(0)))))
    }
}

/// Broadcast union of two sets of dimensions.
///
/// The result holds the dims of `a` followed by the dims of `b` not in `a`.
/// Shared dims must agree in extent.
pub fn merge(a: &Dimensions, b: &Dimensions) -> Result<Dimensions> {
    let mut out = a.clone();
    for (dim, extent) in b.iter() {
        match a.index_of(dim) {
            Some(i) if a.extent_at(i) != extent => {
                return Err(RuLaVarError::DimensionError(format!(
                    "Cannot merge {a} and {b}: extent of '{dim}' differs ({} vs {extent})",
                    a.extent_at(i)
                )));
            }
            Some(_) => {}
            None => out.entries.push((dim.clone(), extent)),
        }
    }
    Ok(out)
}

/// True if `edges` describe bin edges for `data` along `dim`.
pub fn is_bin_edge(dim: &Dim, edges: &Dimensions, data: &Dimensions) -> bool {
    match (edges.extent(dim), data.extent(dim)) {
        (Ok(e), Ok(d)) => e == d + 1,
        _ => false,
    }
}

fn format_labels(labels: &[Dim]) -> String {
    let labels: Vec<&str> = labels.iter().map(Dim::as_str).collect();
    format!("[{}]", labels.join(", "))
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (dim, extent)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dim}: {extent}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(entries: &[(&str, usize)]) -> Dimensions {
        Dimensions::new(entries.iter().map(|(d, e)| (*d, *e))).unwrap()
    }

    #[test]
    fn test_volume_and_strides() {
        let d = dims(&[("x", 2), ("y", 3), ("z", 4)]);
        assert_eq!(d.volume(), 24);
        assert_eq!(d.strides(), vec![12, 4, 1]);
        assert_eq!(d.inner(), Some(&Dim::from("z")));
        assert_eq!(Dimensions::scalar().volume(), 1);
    }

    #[test]
    fn test_duplicate_label_rejected() {
        assert!(matches!(
            Dimensions::new([("x", 2), ("x", 3)]),
            Err(RuLaVarError::DimensionError(_))
        ));
    }

    #[test]
    fn test_merge() {
        let a = dims(&[("x", 2), ("y", 3)]);
        let b = dims(&[("z", 4), ("y", 3)]);
        assert_eq!(merge(&a, &b).unwrap(), dims(&[("x", 2), ("y", 3), ("z", 4)]));

        let bad = dims(&[("y", 4)]);
        assert!(matches!(merge(&a, &bad), Err(RuLaVarError::DimensionError(_))));
    }

    #[test]
    fn test_broadcast_strides() {
        let a = dims(&[("y", 3)]);
        let target = dims(&[("x", 2), ("y", 3)]);
        assert_eq!(a.broadcast_strides(&target), vec![0, 1]);
    }

    #[test]
    fn test_includes_and_bin_edges() {
        let a = dims(&[("x", 2), ("y", 3)]);
        assert!(a.includes(&dims(&[("y", 3)])));
        assert!(!a.includes(&dims(&[("y", 4)])));
        assert!(is_bin_edge(&Dim::from("y"), &dims(&[("y", 4)]), &a));
        assert!(!is_bin_edge(&Dim::from("y"), &dims(&[("y", 3)]), &a));
    }

    #[test]
    fn test_missing_dim() {
        let a = dims(&[("x", 2)]);
        assert!(matches!(
            a.extent(&Dim::from("tof")),
            Err(RuLaVarError::DimensionNotFound { .. })
        ));
        assert_eq!(format!("{a}"), "{x: 2}");
    }
}
