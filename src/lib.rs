//! RuLaVar: labeled, unit-aware multi-dimensional arrays
//!
//! A Rust library for physical data held in [`Variable`]s: arrays whose axes
//! carry dimension labels, whose values carry a physical unit and optional
//! variances (squared uncertainties), and which may be "binned", i.e. hold a
//! variable-length bucket of events per element.
//!
//! ## Key Features
//!
//! - **Transform Engine**: Elementwise operators with unit, variance and
//!   broadcasting rules, dispatched over dtypes and run in parallel with Rayon
//! - **Reductions**: Sum, mean, min, max, all and any over any dimension,
//!   with optional masks
//! - **Rebinning**: Redistribute histogram counts onto new bin edges
//! - **Event Binning**: Partition unsorted events into buckets by edges and
//!   groups with a stable parallel scatter
//! - **Data Arrays**: Coords, masks and stack/unstack of labeled data
//!
//! ## Module Organization
//!
//! - [`dimensions`], [`units`], [`dtype`]: labels, units and element types
//! - [`variable`]: the array type, its views and slices
//! - [`transform`], [`accumulate`], [`ops`]: the operator engine and operators
//! - [`arithmetic`]: named operations and `std::ops` operators
//! - [`reduction`]: reductions along a dimension
//! - [`shape`]: concatenate, permute, fold, flatten and friends
//! - [`rebin`]: histogram rebinning
//! - [`bins`], [`bucketby`]: binned variables and event binning
//! - [`dataset`]: data arrays with coords and masks
//! - [`parallel`]: thread pool configuration
//! - [`errors`]: centralized error handling
//!
//! ## Usage
//!
//! ```rust
//! use ru_la_var::prelude::*;
//!
//! let counts = make_variable(
//!     Dimensions::one("tof", 2),
//!     Unit::COUNTS,
//!     vec![1.0, 2.0],
//!     None,
//! )
//! .unwrap();
//! let edges = make_variable(Dimensions::one("tof", 3), Unit::US, vec![0.0, 10.0, 20.0], None).unwrap();
//! let wide = make_variable(Dimensions::one("tof", 2), Unit::US, vec![0.0, 30.0], None).unwrap();
//!
//! let total = rebin(&counts.view(), &Dim::from("tof"), &edges.view(), &wide.view()).unwrap();
//! assert_eq!(total.values::<f64>().unwrap(), &[3.0]);
//! ```

pub mod accumulate;
pub mod arithmetic;
pub mod bins;
pub mod bucketby;
pub mod dataset;
pub mod dimensions;
pub mod dtype;
pub mod errors;
pub mod ops;
pub mod parallel;
pub mod rebin;
pub mod reduction;
pub mod shape;
pub mod transform;
pub mod units;
pub mod variable;

// Direct re-exports for the public API
pub use bins::{make_bins, make_bins_from_sizes, BinArray};
pub use bucketby::{bucketby, sortby};
pub use dataset::{stack, unstack, DataArray};
pub use dimensions::{Dim, Dimensions};
pub use dtype::{DType, Element, ElementArray, Numeric, Vector3};
pub use errors::{Result, RuLaVarError};
pub use parallel::ParallelConfig;
pub use rebin::rebin;
pub use reduction::{StatOperation, StatisticalReduction};
pub use units::Unit;
pub use variable::{arange, linspace, make_variable, Slice, Variable, VariableView, VariableViewMut};

pub mod prelude {
    //! Commonly used imports for convenience
    pub use crate::bucketby::{bucketby, sortby};
    pub use crate::dataset::{stack, unstack, DataArray};
    pub use crate::dimensions::{Dim, Dimensions};
    pub use crate::dtype::{DType, Vector3};
    pub use crate::errors::{Result, RuLaVarError};
    pub use crate::parallel::ParallelConfig;
    pub use crate::rebin::rebin;
    pub use crate::reduction::{StatOperation, StatisticalReduction};
    pub use crate::units::Unit;
    pub use crate::variable::{make_variable, Slice, Variable, VariableView};
}
