//! Event binning
//!
//! [`bucketby`] partitions unsorted events into buckets keyed by one or
//! more event coordinates. The pipeline is:
//!
//! 1. index assignment: every key maps each event to a bin index (or `-1`
//!    to drop it) through the transform engine; keys combine by mixed radix
//! 2. size counting: per-chunk histograms summed over chunks
//! 3. offsets: exclusive prefix sum of the sizes
//! 4. scatter: each chunk gets a private write cursor per bin, so events
//!    keep their input order within a bin regardless of threading
//!
//! [`sortby`] reorders data and coords by a stable sort of one coord.

use crate::bins::{make_bins, ranges_from_sizes};
use crate::dataset::DataArray;
use crate::dimensions::{is_bin_edge, Dim, Dimensions};
use crate::dtype::{DType, Element, ElementArray, Numeric};
use crate::errors::{Result, RuLaVarError};
use crate::parallel::{chunk_ranges, max_chunks};
use crate::shape::{permute, take};
use crate::transform::{
    binary_dispatch, transform_binary, transform_unary, unary_dispatch, BinaryOp, Kernel1,
    Kernel2, UnaryOp,
};
use crate::units::Unit;
use crate::variable::{make_variable, Variable};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use tracing::debug;

/// Relative tolerance on each step of equally spaced edges
const LINSPACE_TOLERANCE: f64 = 1e-12;

/// Bin index in equally spaced edges
#[derive(Debug, Clone, Copy)]
struct LinspaceIndex {
    low: f64,
    high: f64,
    nbin: usize,
    unit: Unit,
}

impl<T: Numeric> Kernel1<T> for LinspaceIndex {
    type Out = i64;

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap
    )]
    fn value(&self, x: &T) -> i64 {
        let x = x.as_f64();
        if !(x >= self.low && x < self.high) {
            return -1;
        }
        let bin = ((x - self.low) * self.nbin as f64 / (self.high - self.low)) as usize;
        bin.min(self.nbin - 1) as i64
    }
}

impl UnaryOp for LinspaceIndex {
    fn name(&self) -> &'static str {
        "linspace bin index"
    }

    fn unit(&self, a: Unit) -> Result<Unit> {
        a.expect_equal(&self.unit, "bucketby")?;
        Ok(Unit::NONE)
    }

    unary_dispatch! {
        transform: [f64, f32, i64, i32],
        in_place: [],
    }
}

/// Bin index in sorted, unevenly spaced edges
#[derive(Debug, Clone)]
struct SortedEdgeIndex {
    edges: Vec<f64>,
    unit: Unit,
}

impl<T: Numeric> Kernel1<T> for SortedEdgeIndex {
    type Out = i64;

    #[allow(clippy::cast_possible_wrap)]
    fn value(&self, x: &T) -> i64 {
        let x = x.as_f64();
        if x.is_nan() {
            return -1;
        }
        let above = self.edges.partition_point(|&e| e <= x);
        if above == 0 || above >= self.edges.len() {
            -1
        } else {
            (above - 1) as i64
        }
    }
}

impl UnaryOp for SortedEdgeIndex {
    fn name(&self) -> &'static str {
        "sorted bin index"
    }

    fn unit(&self, a: Unit) -> Result<Unit> {
        a.expect_equal(&self.unit, "bucketby")?;
        Ok(Unit::NONE)
    }

    unary_dispatch! {
        transform: [f64, f32, i64, i32],
        in_place: [],
    }
}

/// Values usable as group labels
trait GroupKey: Element + Eq + Hash {}

impl GroupKey for i64 {}
impl GroupKey for i32 {}
impl GroupKey for bool {}
impl GroupKey for String {}

/// Group index by hash lookup
#[derive(Debug, Clone)]
struct GroupIndex<K> {
    lookup: HashMap<K, i64>,
    unit: Unit,
}

impl<K: GroupKey> Kernel1<K> for GroupIndex<K> {
    type Out = i64;

    fn value(&self, x: &K) -> i64 {
        self.lookup.get(x).copied().unwrap_or(-1)
    }
}

impl<K: GroupKey> UnaryOp for GroupIndex<K> {
    fn name(&self) -> &'static str {
        "group index"
    }

    fn unit(&self, a: Unit) -> Result<Unit> {
        a.expect_equal(&self.unit, "bucketby")?;
        Ok(Unit::NONE)
    }

    unary_dispatch! {
        transform: [K],
        in_place: [],
    }
}

/// Mixed-radix combination `a * extent + b`; `-1` propagates
#[derive(Debug, Clone, Copy)]
struct CombineIndex {
    extent: i64,
}

impl Kernel2<i64, i64> for CombineIndex {
    type Out = i64;

    fn value(&self, a: &i64, b: &i64) -> i64 {
        if *a < 0 || *b < 0 {
            -1
        } else {
            a * self.extent + b
        }
    }
}

impl BinaryOp for CombineIndex {
    fn name(&self) -> &'static str {
        "combine bin index"
    }

    fn unit(&self, a: Unit, _b: Unit) -> Result<Unit> {
        Ok(a)
    }

    binary_dispatch! {
        transform: [(i64, i64)],
        in_place: [(i64, i64)],
        accumulate: [],
    }
}

/// Drop (`-1`) the events not selected by a mask
#[derive(Debug, Clone, Copy)]
struct Unselect;

impl Kernel2<i64, bool> for Unselect {
    type Out = i64;

    fn value(&self, index: &i64, selected: &bool) -> i64 {
        if *selected {
            *index
        } else {
            -1
        }
    }
}

impl BinaryOp for Unselect {
    fn name(&self) -> &'static str {
        "unselect"
    }

    fn unit(&self, a: Unit, _mask: Unit) -> Result<Unit> {
        Ok(a)
    }

    binary_dispatch! {
        transform: [(i64, bool)],
        in_place: [(i64, bool)],
        accumulate: [],
    }
}

/// Dense events along one dim, with their per-event coords
struct Events {
    dim: Dim,
    data: Variable,
    coords: BTreeMap<Dim, Variable>,
    /// Existing outer dims and the outer bin index of every event
    outer: Option<(Dimensions, Variable)>,
}

impl Events {
    fn len(&self) -> usize {
        self.data.dims().volume()
    }

    fn from_array(array: &DataArray) -> Result<Self> {
        if array.data().dtype() != DType::Bins {
            if array.dims().ndim() != 1 {
                return Err(RuLaVarError::DimensionError(format!(
                    "Dense event data must be one-dimensional, got {}",
                    array.dims()
                )));
            }
            let coords = array
                .coords()
                .iter()
                .filter(|(_, c)| c.dims() == array.dims())
                .map(|(k, c)| (k.clone(), c.clone()))
                .collect();
            return Ok(Self {
                dim: array.dims().label(0).clone(),
                data: array.data().clone(),
                coords,
                outer: None,
            });
        }

        let bins = array.data().bins()?;
        if bins.buffer().dims().ndim() != 1 {
            return Err(RuLaVarError::NotImplemented(format!(
                "Binning buckets with buffer dimensions {}",
                bins.buffer().dims()
            )));
        }
        let dim = bins.dim().clone();
        let indices = bins.event_indices();
        let data = take(&bins.buffer().view(), &dim, &indices)?;
        let mut coords = BTreeMap::new();
        for (name, coord) in array.bin_coords() {
            let buffer = coord.bins()?.buffer();
            coords.insert(name.clone(), take(&buffer.view(), &dim, &indices)?);
        }
        #[allow(clippy::cast_possible_wrap)]
        let outer_index: Vec<i64> = bins
            .ranges()
            .iter()
            .enumerate()
            .flat_map(|(i, &(b, e))| std::iter::repeat(i as i64).take(e - b))
            .collect();
        let outer_index = make_variable(Dimensions::one(dim.clone(), indices.len()), Unit::NONE, outer_index, None)?;
        Ok(Self {
            dim,
            data,
            coords,
            outer: Some((array.dims().clone(), outer_index)),
        })
    }
}

/// One binning dimension
struct Key {
    dim: Dim,
    extent: usize,
    coord: Variable,
    index: Variable,
}

/// Validate a key and look up the event coord it applies to
fn key_coord<'a>(key: &Variable, events: &'a Events) -> Result<(Dim, &'a Variable)> {
    if key.dims().ndim() != 1 {
        return Err(RuLaVarError::DimensionError(format!(
            "Binning keys must be one-dimensional, got {}",
            key.dims()
        )));
    }
    if key.has_variances() {
        return Err(RuLaVarError::VariancesError(
            "Binning keys cannot have variances".to_string(),
        ));
    }
    let dim = key.dims().label(0).clone();
    let coord = events.coords.get(&dim).ok_or_else(|| RuLaVarError::NotFound {
        key: dim.to_string(),
    })?;
    if coord.dims() != &Dimensions::one(events.dim.clone(), events.len()) {
        return Err(RuLaVarError::DimensionError(format!(
            "Event coord '{dim}' has dimensions {}, expected one-dimensional along '{}'",
            coord.dims(),
            events.dim
        )));
    }
    if coord.has_variances() {
        return Err(RuLaVarError::VariancesError(format!(
            "Event coord '{dim}' cannot have variances"
        )));
    }
    Ok((dim, coord))
}

/// `(low, high)` if the edges are equally spaced
#[allow(clippy::cast_precision_loss)]
fn linspace_range(edges: &[f64]) -> Option<(f64, f64)> {
    let (low, high) = (edges[0], edges[edges.len() - 1]);
    if !(high > low) {
        return None;
    }
    let step = (high - low) / (edges.len() - 1) as f64;
    edges
        .windows(2)
        .all(|w| ((w[1] - w[0]) - step).abs() <= LINSPACE_TOLERANCE * step)
        .then_some((low, high))
}

fn edge_key(edges: &Variable, events: &Events) -> Result<Key> {
    let (dim, coord) = key_coord(edges, events)?;
    if !edges.dtype().is_float() {
        return Err(RuLaVarError::TypeError(format!(
            "Bin edges must be floating point, got {}",
            edges.dtype()
        )));
    }
    let values = edges.values_array().to_f64()?;
    if values.len() < 2 {
        return Err(RuLaVarError::BinEdgeError(format!(
            "Need at least two bin edges along '{dim}'"
        )));
    }
    let nbin = values.len() - 1;
    let unit = edges.unit();
    let index = if let Some((low, high)) = linspace_range(&values) {
        debug!(dim = %dim, nbin, "binning with equally spaced edges");
        transform_unary(&LinspaceIndex { low, high, nbin, unit }, &coord.view())?
    } else {
        if !values.windows(2).all(|w| w[0] <= w[1]) {
            return Err(RuLaVarError::BinEdgeError(format!(
                "Bin edges along '{dim}' must be sorted in ascending order"
            )));
        }
        debug!(dim = %dim, nbin, "binning with sorted edges");
        transform_unary(&SortedEdgeIndex { edges: values, unit }, &coord.view())?
    };
    Ok(Key { dim, extent: nbin, coord: edges.clone(), index })
}

#[allow(clippy::cast_possible_wrap)]
fn group_index<K: GroupKey>(groups: &Variable, coord: &Variable) -> Result<Variable> {
    let mut lookup = HashMap::new();
    for (i, group) in groups.values::<K>()?.iter().enumerate() {
        lookup.entry(group.clone()).or_insert(i as i64);
    }
    transform_unary(&GroupIndex { lookup, unit: groups.unit() }, &coord.view())
}

fn group_key(groups: &Variable, events: &Events) -> Result<Key> {
    let (dim, coord) = key_coord(groups, events)?;
    if coord.dtype() != groups.dtype() {
        return Err(RuLaVarError::TypeError(format!(
            "Groups of dtype {} do not match event coord '{dim}' of dtype {}",
            groups.dtype(),
            coord.dtype()
        )));
    }
    let index = match groups.dtype() {
        DType::Int64 => group_index::<i64>(groups, coord)?,
        DType::Int32 => group_index::<i32>(groups, coord)?,
        DType::Bool => group_index::<bool>(groups, coord)?,
        DType::String => group_index::<String>(groups, coord)?,
        other => {
            return Err(RuLaVarError::TypeError(format!(
                "Cannot group by dtype {other}"
            )))
        }
    };
    debug!(dim = %dim, groups = groups.dims().volume(), "binning by group");
    Ok(Key {
        dim,
        extent: groups.dims().volume(),
        coord: groups.clone(),
        index,
    })
}

/// Reorder keys by `dim_order`, which must name every key dim exactly once.
fn order_keys(mut keys: Vec<Key>, dim_order: &[Dim]) -> Result<Vec<Key>> {
    if dim_order.is_empty() {
        return Ok(keys);
    }
    let invalid = || {
        let dims: Vec<&str> = dim_order.iter().map(Dim::as_str).collect();
        RuLaVarError::DimensionError(format!(
            "Dim order {dims:?} must name each binning dim exactly once"
        ))
    };
    if dim_order.len() != keys.len() {
        return Err(invalid());
    }
    let mut ordered = Vec::with_capacity(keys.len());
    for dim in dim_order {
        let position = keys.iter().position(|k| &k.dim == dim).ok_or_else(invalid)?;
        ordered.push(keys.remove(position));
    }
    Ok(ordered)
}

/// Bucket sizes and the source event of every output position
#[derive(Debug, PartialEq)]
struct Scatter {
    sizes: Vec<usize>,
    source: Vec<usize>,
}

/// Stable scatter of `indices` into `nbins` bins using up to `nchunk` chunks.
#[allow(clippy::cast_sign_loss)]
fn scatter_plan(indices: &[i64], nbins: usize, nchunk: usize) -> Scatter {
    let chunks = chunk_ranges(indices.len(), nchunk);
    let counts: Vec<Vec<usize>> = chunks
        .par_iter()
        .map(|range| {
            let mut counts = vec![0; nbins];
            for &i in &indices[range.clone()] {
                if i >= 0 {
                    counts[i as usize] += 1;
                }
            }
            counts
        })
        .collect();

    let mut sizes = vec![0; nbins];
    for chunk in &counts {
        for (size, n) in sizes.iter_mut().zip(chunk) {
            *size += n;
        }
    }
    let mut running = Vec::with_capacity(nbins);
    let mut total = 0;
    for size in &sizes {
        running.push(total);
        total += size;
    }
    let cursors: Vec<Vec<usize>> = counts
        .iter()
        .map(|chunk| {
            let cursor = running.clone();
            for (r, n) in running.iter_mut().zip(chunk) {
                *r += n;
            }
            cursor
        })
        .collect();

    let mut destinations = vec![usize::MAX; indices.len()];
    if let Some(first) = chunks.first() {
        destinations
            .par_chunks_mut(first.len())
            .zip(chunks.par_iter())
            .zip(cursors.into_par_iter())
            .for_each(|((dest, range), mut cursor)| {
                for (d, &i) in dest.iter_mut().zip(&indices[range.clone()]) {
                    if i >= 0 {
                        let bin = i as usize;
                        *d = cursor[bin];
                        cursor[bin] += 1;
                    }
                }
            });
    }
    let mut source = vec![0; total];
    for (event, &d) in destinations.iter().enumerate() {
        if d != usize::MAX {
            source[d] = event;
        }
    }
    Scatter { sizes, source }
}

fn gather_events(var: &Variable, dim: &Dim, source: &[usize]) -> Result<Variable> {
    Variable::new(
        Dimensions::one(dim.clone(), source.len()),
        var.unit(),
        var.values_array().par_gather(source),
        var.variances_array().map(|v| v.par_gather(source)),
    )
}

/// Bin events by the given edges and groups.
///
/// Dense input must be one-dimensional along its event dim; binned input is
/// re-binned, with its existing bins kept as leading output dims. Keys are
/// ordered by `dim_order` if given, otherwise groups come before edges.
/// Events outside all edges, in no group, or not selected by every mask are
/// dropped. Events keep their input order within a bucket.
///
/// # Errors
///
/// Returns an error if:
/// - a key is not 1-D or `dim_order` is invalid (`DimensionError`)
/// - a key or its event coord has variances (`VariancesError`)
/// - there is no event coord for a key's dim (`NotFound`)
/// - edges are not float, or groups are float or mismatch the coord
///   dtype (`TypeError`)
/// - uneven edges are not sorted (`BinEdgeError`)
/// - units of a key and its event coord differ (`UnitError`)
pub fn bucketby(
    array: &DataArray,
    edges: &[Variable],
    groups: &[Variable],
    dim_order: &[Dim],
) -> Result<DataArray> {
    let events = Events::from_array(array)?;
    let mut keys = Vec::with_capacity(edges.len() + groups.len());
    for g in groups {
        keys.push(group_key(g, &events)?);
    }
    for e in edges {
        keys.push(edge_key(e, &events)?);
    }
    let keys = order_keys(keys, dim_order)?;

    let (mut out_dims, mut combined) = match &events.outer {
        Some((dims, index)) => (dims.clone(), index.clone()),
        None => (
            Dimensions::scalar(),
            Variable::filled(Dimensions::one(events.dim.clone(), events.len()), Unit::NONE, 0_i64),
        ),
    };
    for key in &keys {
        out_dims.add_inner(key.dim.clone(), key.extent)?;
        #[allow(clippy::cast_possible_wrap)]
        let radix = CombineIndex { extent: key.extent as i64 };
        combined = transform_binary(&radix, &combined.view(), &key.index.view())?;
    }
    if events.outer.is_none() {
        for mask in array.masks().values() {
            combined = transform_binary(&Unselect, &combined.view(), &mask.view())?;
        }
    }

    let nbins = out_dims.volume();
    let plan = scatter_plan(combined.values::<i64>()?, nbins, max_chunks());
    debug!(
        events = events.len(),
        kept = plan.source.len(),
        buckets = nbins,
        "scattered events"
    );
    let ranges = ranges_from_sizes(&plan.sizes);
    let buffer = gather_events(&events.data, &events.dim, &plan.source)?;
    let data = make_bins(out_dims.clone(), ranges.clone(), events.dim.clone(), buffer)?;

    let mut coords: BTreeMap<Dim, Variable> = array
        .coords()
        .iter()
        .filter(|(_, c)| !c.dims().contains(&events.dim))
        .map(|(k, c)| (k.clone(), c.clone()))
        .collect();
    for key in &keys {
        coords.insert(key.dim.clone(), key.coord.clone());
    }
    let mut bin_coords = BTreeMap::new();
    for (name, coord) in &events.coords {
        let buffer = gather_events(coord, &events.dim, &plan.source)?;
        bin_coords.insert(
            name.clone(),
            make_bins(out_dims.clone(), ranges.clone(), events.dim.clone(), buffer)?,
        );
    }
    let masks = if events.outer.is_some() {
        array.masks().clone()
    } else {
        BTreeMap::new()
    };
    Ok(DataArray::from_parts(
        array.name().to_string(),
        data,
        coords,
        masks,
        bin_coords,
    ))
}

/// Stable permutation sorting `values`, floats in total order
fn sort_permutation(values: &ElementArray) -> Result<Vec<usize>> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    match values {
        ElementArray::Float64(v) => order.par_sort_by(|&i, &j| v[i].total_cmp(&v[j])),
        ElementArray::Float32(v) => order.par_sort_by(|&i, &j| v[i].total_cmp(&v[j])),
        ElementArray::Int64(v) => order.par_sort_by(|&i, &j| v[i].cmp(&v[j])),
        ElementArray::Int32(v) => order.par_sort_by(|&i, &j| v[i].cmp(&v[j])),
        ElementArray::Bool(v) => order.par_sort_by(|&i, &j| v[i].cmp(&v[j])),
        ElementArray::String(v) => order.par_sort_by(|&i, &j| v[i].cmp(&v[j])),
        other => {
            return Err(RuLaVarError::TypeError(format!(
                "Cannot sort by dtype {}",
                other.dtype()
            )))
        }
    }
    Ok(order)
}

/// Sort data, coords and masks along the dim of the coord `key`.
///
/// The sort is stable. Bin-edge coords along the sorted dim are dropped.
///
/// # Errors
///
/// Returns `NotFound` if there is no coord `key`, `DimensionError` unless
/// it is 1-D and matches the data along its dim, and `TypeError` for
/// unsortable dtypes.
pub fn sortby(array: &DataArray, key: &Dim) -> Result<DataArray> {
    let coord = array.coord(key)?;
    if coord.dims().ndim() != 1 {
        return Err(RuLaVarError::DimensionError(format!(
            "Sort key must be one-dimensional, got {}",
            coord.dims()
        )));
    }
    let dim = coord.dims().label(0).clone();
    if array.dims().extent(&dim)? != coord.dims().extent_at(0) {
        return Err(RuLaVarError::DimensionError(format!(
            "Sort key {} does not match data {}",
            coord.dims(),
            array.dims()
        )));
    }
    let order = sort_permutation(coord.values_array())?;
    let reorder = |var: &Variable| permute(&var.view(), &dim, &order);

    let data = reorder(array.data())?;
    let mut coords = BTreeMap::new();
    for (name, c) in array.coords() {
        if !c.dims().contains(&dim) {
            coords.insert(name.clone(), c.clone());
        } else if is_bin_edge(&dim, c.dims(), array.dims()) {
            debug!(coord = %name, "dropping bin edges of sorted dim");
        } else {
            coords.insert(name.clone(), reorder(c)?);
        }
    }
    let mut masks = BTreeMap::new();
    for (name, m) in array.masks() {
        let m = if m.dims().contains(&dim) { reorder(m)? } else { m.clone() };
        masks.insert(name.clone(), m);
    }
    let mut bin_coords = BTreeMap::new();
    for (name, c) in array.bin_coords() {
        bin_coords.insert(name.clone(), reorder(c)?);
    }
    Ok(DataArray::from_parts(
        array.name().to_string(),
        data,
        coords,
        masks,
        bin_coords,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bins::{bins_flatten, bins_size};

    fn events() -> DataArray {
        let weights = make_variable(
            Dimensions::one("event", 6),
            Unit::COUNTS,
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            Some(vec![1.0; 6]),
        )
        .unwrap();
        let mut array = DataArray::new(weights).with_name("events");
        let x = make_variable(Dimensions::one("event", 6), Unit::M, vec![0.5, 2.5, 1.5, 0.1, 3.5, f64::NAN], None).unwrap();
        let label = make_variable(Dimensions::one("event", 6), Unit::NONE, vec![1_i64, 2, 1, 3, 2, 1], None).unwrap();
        array.set_coord("x", x).unwrap();
        array.set_coord("label", label).unwrap();
        array
    }

    fn x_edges(values: Vec<f64>) -> Variable {
        make_variable(Dimensions::one("x", values.len()), Unit::M, values, None).unwrap()
    }

    fn sizes(array: &DataArray) -> Vec<i64> {
        bins_size(&array.data().view()).unwrap().values::<i64>().unwrap().to_vec()
    }

    #[test]
    fn test_scatter_is_stable_across_chunks() {
        let indices = vec![1, 0, -1, 1, 0, 2, 1, 0];
        let expected = Scatter { sizes: vec![3, 3, 1], source: vec![1, 4, 7, 0, 3, 6, 5] };
        for nchunk in [1, 3, 8] {
            assert_eq!(scatter_plan(&indices, 3, nchunk), expected);
        }
    }

    #[test]
    fn test_linspace_edges() {
        let binned = bucketby(&events(), &[x_edges(vec![0.0, 1.0, 2.0, 3.0])], &[], &[]).unwrap();
        assert_eq!(binned.dims(), &Dimensions::one("x", 3));
        assert_eq!(sizes(&binned), vec![2, 1, 1]);
        let first = binned.data().bins().unwrap().bucket(0).unwrap().to_vec::<f64>().unwrap();
        assert_eq!(first, vec![1.0, 4.0]);
        let x = binned.bin_coord(&Dim::from("x")).unwrap();
        let xs = x.bins().unwrap().bucket(0).unwrap().to_vec::<f64>().unwrap();
        assert_eq!(xs, vec![0.5, 0.1]);
        assert!(binned.coord(&Dim::from("x")).is_ok());
    }

    #[test]
    fn test_sorted_edges() {
        let binned = bucketby(&events(), &[x_edges(vec![0.0, 1.0, 3.0])], &[], &[]).unwrap();
        assert_eq!(sizes(&binned), vec![2, 2]);
        let unsorted = x_edges(vec![0.0, 3.0, 1.0]);
        assert!(matches!(
            bucketby(&events(), &[unsorted], &[], &[]),
            Err(RuLaVarError::BinEdgeError(_))
        ));
    }

    #[test]
    fn test_groups_and_key_order() {
        let groups = make_variable(Dimensions::one("label", 2), Unit::NONE, vec![1_i64, 2], None).unwrap();
        let edges = x_edges(vec![0.0, 2.0, 4.0]);
        let binned = bucketby(&events(), &[edges.clone()], &[groups.clone()], &[]).unwrap();
        assert_eq!(binned.dims(), &Dimensions::new([("label", 2), ("x", 2)]).unwrap());
        assert_eq!(sizes(&binned), vec![2, 0, 0, 2]);

        let order = [Dim::from("x"), Dim::from("label")];
        let binned = bucketby(&events(), &[edges.clone()], &[groups.clone()], &order).unwrap();
        assert_eq!(binned.dims(), &Dimensions::new([("x", 2), ("label", 2)]).unwrap());
        assert_eq!(sizes(&binned), vec![2, 0, 0, 2]);

        assert!(matches!(
            bucketby(&events(), &[edges], &[groups], &[Dim::from("x")]),
            Err(RuLaVarError::DimensionError(_))
        ));
    }

    #[test]
    fn test_key_validation() {
        let missing = make_variable(Dimensions::one("y", 2), Unit::M, vec![0.0, 1.0], None).unwrap();
        assert!(matches!(
            bucketby(&events(), &[missing], &[], &[]),
            Err(RuLaVarError::NotFound { .. })
        ));
        let with_variances = make_variable(Dimensions::one("x", 2), Unit::M, vec![0.0, 1.0], Some(vec![0.0, 0.0])).unwrap();
        assert!(matches!(
            bucketby(&events(), &[with_variances], &[], &[]),
            Err(RuLaVarError::VariancesError(_))
        ));
        let float_groups = make_variable(Dimensions::one("x", 2), Unit::M, vec![0.5, 1.5], None).unwrap();
        assert!(matches!(
            bucketby(&events(), &[], &[float_groups], &[]),
            Err(RuLaVarError::TypeError(_))
        ));
        let seconds = make_variable(Dimensions::one("x", 2), Unit::S, vec![0.0, 1.0], None).unwrap();
        assert!(matches!(
            bucketby(&events(), &[seconds], &[], &[]),
            Err(RuLaVarError::UnitError(_))
        ));
    }

    #[test]
    fn test_masked_events_are_dropped() {
        let mut array = events();
        let keep = make_variable(Dimensions::one("event", 6), Unit::NONE, vec![false, true, true, true, true, true], None).unwrap();
        array.set_mask("keep", keep).unwrap();
        let binned = bucketby(&array, &[x_edges(vec![0.0, 1.0, 2.0, 3.0])], &[], &[]).unwrap();
        assert_eq!(sizes(&binned), vec![1, 1, 1]);
        assert!(binned.masks().is_empty());
    }

    #[test]
    fn test_rebinning_bucketed_events() {
        let groups = make_variable(Dimensions::one("label", 3), Unit::NONE, vec![1_i64, 2, 3], None).unwrap();
        let grouped = bucketby(&events(), &[], &[groups], &[]).unwrap();
        let binned = bucketby(&grouped, &[x_edges(vec![0.0, 2.0, 4.0])], &[], &[]).unwrap();
        assert_eq!(binned.dims(), &Dimensions::new([("label", 3), ("x", 2)]).unwrap());
        assert_eq!(sizes(&binned), vec![2, 0, 0, 2, 1, 0]);
        let flat = bins_flatten(&binned.data().view()).unwrap();
        assert_eq!(flat.values::<f64>().unwrap(), &[1.0, 3.0, 2.0, 5.0, 4.0]);
    }

    #[test]
    fn test_sortby_is_stable() {
        let array = events();
        let sorted = sortby(&array, &Dim::from("label")).unwrap();
        assert_eq!(sorted.data().values::<f64>().unwrap(), &[1.0, 3.0, 6.0, 2.0, 5.0, 4.0]);
        assert_eq!(
            sorted.coord(&Dim::from("label")).unwrap().values::<i64>().unwrap(),
            &[1, 1, 1, 2, 2, 3]
        );
    }
}
