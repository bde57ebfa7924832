//! Minimal data arrays: data with named coords and masks
//!
//! A [`DataArray`] owns a data variable plus coordinate variables keyed by
//! dimension label, boolean masks keyed by name, and, for binned data, the
//! per-event coordinates as binned variables sharing the data's bucket
//! ranges. Coords may be bin edges (one longer than the data along a dim).

use crate::arithmetic::logical_not;
use crate::dimensions::{is_bin_edge, Dim, Dimensions};
use crate::dtype::DType;
use crate::errors::{Result, RuLaVarError};
use crate::rebin::rebin;
use crate::reduction::{mean_masked, sum_masked};
use crate::shape::{flatten, fold, take};
use crate::units::Unit;
use crate::variable::{Slice, Variable, VariableView};
use std::collections::BTreeMap;
use tracing::debug;

/// Data variable with coordinates and masks
#[derive(Debug, Clone, PartialEq)]
pub struct DataArray {
    name: String,
    data: Variable,
    coords: BTreeMap<Dim, Variable>,
    masks: BTreeMap<String, Variable>,
    bin_coords: BTreeMap<Dim, Variable>,
}

impl DataArray {
    pub fn new(data: Variable) -> Self {
        Self {
            name: String::new(),
            data,
            coords: BTreeMap::new(),
            masks: BTreeMap::new(),
            bin_coords: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &Variable {
        &self.data
    }

    pub fn dims(&self) -> &Dimensions {
        self.data.dims()
    }

    pub fn coords(&self) -> &BTreeMap<Dim, Variable> {
        &self.coords
    }

    /// # Errors
    ///
    /// Returns `NotFound` if there is no coord for `dim`.
    pub fn coord(&self, dim: &Dim) -> Result<&Variable> {
        self.coords.get(dim).ok_or_else(|| RuLaVarError::NotFound {
            key: dim.to_string(),
        })
    }

    /// Insert or replace a coord.
    ///
    /// # Errors
    ///
    /// Returns `DimensionError` unless every dim of `coord` is a data dim
    /// with the data's extent, or one more for a single bin-edge dim.
    pub fn set_coord(&mut self, dim: impl Into<Dim>, coord: Variable) -> Result<()> {
        check_compatible(coord.dims(), self.data.dims(), true)?;
        self.coords.insert(dim.into(), coord);
        Ok(())
    }

    pub fn masks(&self) -> &BTreeMap<String, Variable> {
        &self.masks
    }

    /// # Errors
    ///
    /// Returns `NotFound` if there is no mask called `name`.
    pub fn mask(&self, name: &str) -> Result<&Variable> {
        self.masks.get(name).ok_or_else(|| RuLaVarError::NotFound {
            key: name.to_string(),
        })
    }

    /// Insert or replace a mask; `true` selects an element.
    ///
    /// # Errors
    ///
    /// Returns `TypeError` unless the mask is bool and `DimensionError`
    /// unless its dims are a subset of the data dims.
    pub fn set_mask(&mut self, name: impl Into<String>, mask: Variable) -> Result<()> {
        if mask.dtype() != DType::Bool {
            return Err(RuLaVarError::TypeError(format!(
                "Masks must be bool, got {}",
                mask.dtype()
            )));
        }
        check_compatible(mask.dims(), self.data.dims(), false)?;
        self.masks.insert(name.into(), mask);
        Ok(())
    }

    /// Per-event coords of binned data
    pub fn bin_coords(&self) -> &BTreeMap<Dim, Variable> {
        &self.bin_coords
    }

    /// # Errors
    ///
    /// Returns `NotFound` if there is no event coord for `dim`.
    pub fn bin_coord(&self, dim: &Dim) -> Result<&Variable> {
        self.bin_coords.get(dim).ok_or_else(|| RuLaVarError::NotFound {
            key: dim.to_string(),
        })
    }

    pub(crate) fn from_parts(
        name: String,
        data: Variable,
        coords: BTreeMap<Dim, Variable>,
        masks: BTreeMap<String, Variable>,
        bin_coords: BTreeMap<Dim, Variable>,
    ) -> Self {
        Self { name, data, coords, masks, bin_coords }
    }

    fn mask_list(&self) -> Vec<Variable> {
        self.masks.values().cloned().collect()
    }

    /// Sum along `dim` over the elements selected by every mask.
    ///
    /// # Errors
    ///
    /// See [`sum_masked`].
    pub fn sum(&self, dim: &Dim) -> Result<Variable> {
        sum_masked(&self.data.view(), dim, &self.mask_list())
    }

    /// Mean along `dim` over the elements selected by every mask.
    ///
    /// # Errors
    ///
    /// See [`mean_masked`].
    pub fn mean(&self, dim: &Dim) -> Result<Variable> {
        mean_masked(&self.data.view(), dim, &self.mask_list())
    }

    /// Narrow data, coords and masks along one dim. Bin-edge coords keep
    /// one extra edge for range slices and are dropped for point slices.
    ///
    /// # Errors
    ///
    /// Returns `DimensionError` for out-of-range slices.
    pub fn slice(&self, slice: &Slice) -> Result<DataArray> {
        let dim = slice.dim();
        let data = self.data.slice(slice.clone())?.to_variable();
        let mut coords = BTreeMap::new();
        for (name, coord) in &self.coords {
            if !coord.dims().contains(dim) {
                coords.insert(name.clone(), coord.clone());
            } else if is_bin_edge(dim, coord.dims(), self.data.dims()) {
                if let Some(end) = slice.end() {
                    let edges = Slice::range(dim.clone(), slice.begin(), end + 1);
                    coords.insert(name.clone(), coord.slice(edges)?.to_variable());
                }
            } else {
                coords.insert(name.clone(), coord.slice(slice.clone())?.to_variable());
            }
        }
        let slice_one = |v: &Variable| -> Result<Variable> {
            if v.dims().contains(dim) {
                Ok(v.slice(slice.clone())?.to_variable())
            } else {
                Ok(v.clone())
            }
        };
        let masks = map_values(&self.masks, &slice_one)?;
        let bin_coords = map_values(&self.bin_coords, &slice_one)?;
        Ok(Self::from_parts(self.name.clone(), data, coords, masks, bin_coords))
    }

    /// Rebin along `dim` using the coord of `dim` as the old edges.
    ///
    /// Coords depending on `dim` are dropped and the new edges become the
    /// coord of `dim`. A new bin stays selected by a mask depending on `dim`
    /// only if every old bin overlapping it was selected.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no coord for `dim`, plus the errors of
    /// [`rebin`].
    pub fn rebin(&self, dim: &Dim, new_edges: &Variable) -> Result<DataArray> {
        let old_edges = self.coord(dim)?;
        let data = rebin(&self.data.view(), dim, &old_edges.view(), &new_edges.view())?;
        let mut coords: BTreeMap<Dim, Variable> = self
            .coords
            .iter()
            .filter(|(_, c)| !c.dims().contains(dim))
            .map(|(k, c)| (k.clone(), c.clone()))
            .collect();
        coords.insert(dim.clone(), new_edges.clone());
        let mut masks = BTreeMap::new();
        for (name, mask) in &self.masks {
            let mask = if mask.dims().contains(dim) {
                let mut deselected = logical_not(&mask.view())?;
                deselected.set_unit(Unit::ONE);
                let rebinned = rebin(&deselected.view(), dim, &old_edges.view(), &new_edges.view())?;
                let mut selected = logical_not(&rebinned.view())?;
                selected.set_unit(mask.unit());
                selected
            } else {
                mask.clone()
            };
            masks.insert(name.clone(), mask);
        }
        Ok(Self::from_parts(self.name.clone(), data, coords, masks, BTreeMap::new()))
    }
}

fn map_values<K, F>(map: &BTreeMap<K, Variable>, f: &F) -> Result<BTreeMap<K, Variable>>
where
    K: Ord + Clone,
    F: Fn(&Variable) -> Result<Variable>,
{
    map.iter().map(|(k, v)| Ok((k.clone(), f(v)?))).collect()
}

fn check_compatible(dims: &Dimensions, data: &Dimensions, allow_edges: bool) -> Result<()> {
    let mut edges = 0;
    for (dim, extent) in dims.iter() {
        match data.extent(dim) {
            Ok(e) if e == extent => {}
            Ok(e) if allow_edges && e + 1 == extent && edges == 0 => edges += 1,
            _ => {
                return Err(RuLaVarError::DimensionError(format!(
                    "{dims} is not compatible with data dimensions {data}"
                )))
            }
        }
    }
    Ok(())
}

/// The dim along which `coord` holds bin edges for `data`, if any
fn edge_dim(coord: &Dimensions, data: &Dimensions) -> Option<Dim> {
    coord.labels().find(|d| is_bin_edge(d, coord, data)).cloned()
}

/// Split bin edges along `dim` into overlapping rows of `inner + 1` edges.
fn fold_edges(coord: &Variable, dim: &Dim, into: &Dimensions) -> Result<Variable> {
    if coord.dims().ndim() != 1 {
        return Err(RuLaVarError::DimensionError(format!(
            "Cannot stack multi-dimensional bin edges {}",
            coord.dims()
        )));
    }
    let inner = into.inner().ok_or_else(|| {
        RuLaVarError::DimensionError("Cannot stack into scalar dimensions".to_string())
    })?;
    let k = into.extent(inner)?;
    let rows: usize = (0..into.ndim() - 1).map(|i| into.extent_at(i)).product();
    let indices: Vec<usize> = (0..rows).flat_map(|r| r * k..=r * k + k).collect();
    let mut dims = into.clone();
    dims.resize(inner, k + 1)?;
    take(&coord.view(), dim, &indices)?.reshape(dims)
}

/// Split `dim` of the data, coords, masks and event coords into `into`.
///
/// Coords not depending on `dim` are unchanged; bin-edge coords along `dim`
/// become overlapping rows of edges.
///
/// # Errors
///
/// Returns `DimensionError` if the volume of `into` differs from the
/// extent of `dim` or the bin edges along `dim` are multi-dimensional.
pub fn stack(array: &DataArray, dim: &Dim, into: &Dimensions) -> Result<DataArray> {
    let data = fold(&array.data.view(), dim, into)?;
    let mut coords = BTreeMap::new();
    for (name, coord) in &array.coords {
        let coord = if !coord.dims().contains(dim) {
            coord.clone()
        } else if is_bin_edge(dim, coord.dims(), array.data.dims()) {
            fold_edges(coord, dim, into)?
        } else {
            fold(&coord.view(), dim, into)?
        };
        coords.insert(name.clone(), coord);
    }
    let fold_one = |v: &Variable| -> Result<Variable> {
        if v.dims().contains(dim) {
            fold(&v.view(), dim, into)
        } else {
            Ok(v.clone())
        }
    };
    let masks = map_values(&array.masks, &fold_one)?;
    let bin_coords = map_values(&array.bin_coords, &fold_one)?;
    Ok(DataArray::from_parts(array.name.clone(), data, coords, masks, bin_coords))
}

/// Broadcast `var` to the data's dims restricted to its own dims and the
/// dims being flattened, keeping its own extents.
fn expand_for_flatten(var: &VariableView<'_>, data: &Dimensions, dims: &[Dim]) -> Result<Variable> {
    let entries: Vec<(Dim, usize)> = data
        .iter()
        .filter(|(d, _)| var.dims().contains(d) || dims.contains(d))
        .map(|(d, e)| (d.clone(), var.dims().extent(d).unwrap_or(e)))
        .collect();
    Ok(var.broadcast(&Dimensions::new(entries)?)?.to_variable())
}

/// Join rows of bin edges along the innermost merged dim into one edge
/// list, or `None` if the rows do not join.
fn join_edges(coord: &Variable, data: &Dimensions, dims: &[Dim], to: &Dim) -> Result<Option<Variable>> {
    let expanded = expand_for_flatten(&coord.view(), data, dims)?;
    if expanded.dims().ndim() != dims.len() {
        return Ok(None);
    }
    let (inner, outer) = match dims.split_last() {
        Some((inner, outer)) => (inner, outer),
        None => return Ok(None),
    };
    let edges = expanded.dims().extent(inner)?;
    let rows: usize = outer.iter().map(|d| data.extent(d)).product::<Result<usize>>()?;
    if rows == 0 || edges == 0 {
        return Ok(None);
    }
    let flat = expanded.reshape(Dimensions::one(inner.clone(), rows * edges))?;
    let point = |i: usize| flat.slice(Slice::point(inner.clone(), i));
    for r in 1..rows {
        if point(r * edges - 1)? != point(r * edges)? {
            return Ok(None);
        }
    }
    let indices: Vec<usize> = (0..edges)
        .chain((1..rows).flat_map(|r| r * edges + 1..(r + 1) * edges))
        .collect();
    let mut joined = take(&flat.view(), inner, &indices)?;
    joined.rename_dim(inner, to.clone())?;
    Ok(Some(joined))
}

/// Merge the adjacent dims `dims` of data, coords, masks and event coords
/// into `to`.
///
/// A bin-edge coord is kept only if its edge dim is the innermost merged
/// dim and consecutive rows join (the last edge of a row equals the first
/// of the next); otherwise it is dropped.
///
/// # Errors
///
/// Returns `DimensionError` if `dims` are not adjacent and in order in the
/// data.
pub fn unstack(array: &DataArray, dims: &[Dim], to: impl Into<Dim>) -> Result<DataArray> {
    let to = to.into();
    let data_dims = array.data.dims();
    let data = flatten(&array.data.view(), dims, to.clone())?;
    let depends = |var: &Variable| dims.iter().any(|d| var.dims().contains(d));
    let mut coords = BTreeMap::new();
    for (name, coord) in &array.coords {
        if !depends(coord) {
            coords.insert(name.clone(), coord.clone());
            continue;
        }
        match edge_dim(coord.dims(), data_dims) {
            Some(edge) if dims.contains(&edge) => {
                let joined = if dims.last() == Some(&edge) {
                    join_edges(coord, data_dims, dims, &to)?
                } else {
                    None
                };
                match joined {
                    Some(joined) => {
                        coords.insert(name.clone(), joined);
                    }
                    None => debug!(coord = %name, "dropping bin edges that do not join"),
                }
            }
            _ => {
                let expanded = expand_for_flatten(&coord.view(), data_dims, dims)?;
                coords.insert(name.clone(), flatten(&expanded.view(), dims, to.clone())?);
            }
        }
    }
    let flatten_one = |v: &Variable| -> Result<Variable> {
        if depends(v) {
            let expanded = expand_for_flatten(&v.view(), data_dims, dims)?;
            flatten(&expanded.view(), dims, to.clone())
        } else {
            Ok(v.clone())
        }
    };
    let masks = map_values(&array.masks, &flatten_one)?;
    let bin_coords = map_values(&array.bin_coords, &flatten_one)?;
    Ok(DataArray::from_parts(array.name.clone(), data, coords, masks, bin_coords))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::{linspace, make_variable};

    fn counts() -> DataArray {
        let data = make_variable(Dimensions::one("x", 6), Unit::COUNTS, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], None).unwrap();
        let mut array = DataArray::new(data).with_name("counts");
        array.set_coord("x", linspace("x", 0.0, 6.0, 7, Unit::M)).unwrap();
        array
            .set_coord("label", make_variable(Dimensions::one("x", 6), Unit::NONE, (0..6).collect::<Vec<i64>>(), None).unwrap())
            .unwrap();
        array
    }

    #[test]
    fn test_coord_validation() {
        let mut array = counts();
        let wrong = make_variable(Dimensions::one("x", 5), Unit::M, vec![0.0; 5], None).unwrap();
        assert!(matches!(array.set_coord("y", wrong), Err(RuLaVarError::DimensionError(_))));
        let not_bool = make_variable(Dimensions::one("x", 6), Unit::NONE, vec![1.0; 6], None).unwrap();
        assert!(matches!(array.set_mask("m", not_bool), Err(RuLaVarError::TypeError(_))));
        assert!(matches!(array.coord(&Dim::from("y")), Err(RuLaVarError::NotFound { .. })));
    }

    #[test]
    fn test_stack_unstack_roundtrip() {
        let array = counts();
        let x = Dim::from("x");
        let into = Dimensions::new([("row", 2), ("tof", 3)]).unwrap();
        let stacked = stack(&array, &x, &into).unwrap();
        assert_eq!(stacked.dims(), &into);
        let edges = stacked.coord(&x).unwrap();
        assert_eq!(edges.dims(), &Dimensions::new([("row", 2), ("tof", 4)]).unwrap());
        assert_eq!(edges.values::<f64>().unwrap(), &[0.0, 1.0, 2.0, 3.0, 3.0, 4.0, 5.0, 6.0]);

        let back = unstack(&stacked, &[Dim::from("row"), Dim::from("tof")], "x").unwrap();
        assert_eq!(back, array);
    }

    #[test]
    fn test_unstack_drops_edges_that_do_not_join() {
        let data = make_variable(Dimensions::new([("row", 2), ("tof", 2)]).unwrap(), Unit::COUNTS, vec![1.0; 4], None).unwrap();
        let mut array = DataArray::new(data);
        let edges = make_variable(
            Dimensions::new([("row", 2), ("tof", 3)]).unwrap(),
            Unit::M,
            vec![0.0, 1.0, 2.0, 10.0, 11.0, 12.0],
            None,
        )
        .unwrap();
        array.set_coord("tof", edges).unwrap();
        let flat = unstack(&array, &[Dim::from("row"), Dim::from("tof")], "x").unwrap();
        assert!(flat.coords().is_empty());
        assert_eq!(flat.dims(), &Dimensions::one("x", 4));
    }

    #[test]
    fn test_masked_sum_and_rebin() {
        let mut array = counts();
        let keep = make_variable(Dimensions::one("x", 6), Unit::NONE, vec![true, true, false, false, true, true], None).unwrap();
        array.set_mask("keep", keep).unwrap();
        let x = Dim::from("x");
        assert_eq!(array.sum(&x).unwrap().value::<f64>().unwrap(), 14.0);

        let rebinned = array.rebin(&x, &linspace("x", 0.0, 6.0, 3, Unit::M)).unwrap();
        assert_eq!(rebinned.data().values::<f64>().unwrap(), &[6.0, 15.0]);
        assert_eq!(rebinned.mask("keep").unwrap().values::<bool>().unwrap(), &[false, false]);
        assert_eq!(rebinned.mask("keep").unwrap().unit(), Unit::NONE);
        assert_eq!(rebinned.sum(&x).unwrap().value::<f64>().unwrap(), 0.0);

        let merged = array.rebin(&x, &linspace("x", 0.0, 6.0, 4, Unit::M)).unwrap();
        assert_eq!(merged.mask("keep").unwrap().values::<bool>().unwrap(), &[true, false, true]);
        assert_eq!(merged.sum(&x).unwrap().value::<f64>().unwrap(), 14.0);
        assert!(rebinned.coords().get(&Dim::from("label")).is_none());
    }

    #[test]
    fn test_slice_keeps_edges() {
        let array = counts();
        let sliced = array.slice(&Slice::range("x", 1, 3)).unwrap();
        assert_eq!(sliced.coord(&Dim::from("x")).unwrap().values::<f64>().unwrap(), &[1.0, 2.0, 3.0]);
        let point = array.slice(&Slice::point("x", 1)).unwrap();
        assert!(point.coords().get(&Dim::from("x")).is_none());
    }
}
