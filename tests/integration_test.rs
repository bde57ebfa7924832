use approx::assert_relative_eq;
use proptest::prelude::*;
use ru_la_var::{
    arithmetic::{multiply, sin},
    bins::bins_flatten,
    bucketby, make_bins_from_sizes, make_variable, rebin,
    reduction::{sum, sum_masked},
    shape::concatenate,
    stack, unstack, DataArray, Dim, Dimensions, Result, RuLaVarError, Slice, Unit, Variable,
};

fn x_values(values: Vec<f64>, unit: Unit) -> Variable {
    make_variable(Dimensions::one("x", values.len()), unit, values, None).unwrap()
}

#[test]
fn test_sin_of_angles() -> Result<()> {
    let angles = x_values(vec![0.0, 0.5, 1.0, 3.0], Unit::RAD);
    let result = sin(&angles.view())?;
    assert!(result.unit().is_dimensionless());
    for (got, x) in result.values::<f64>()?.iter().zip([0.0_f64, 0.5, 1.0, 3.0]) {
        assert_eq!(*got, x.sin());
    }

    let plain = x_values(vec![0.0], Unit::ONE);
    assert!(matches!(sin(&plain.view()), Err(RuLaVarError::UnitError(_))));
    Ok(())
}

#[test]
fn test_concatenate_then_slice_recovers_operands() -> Result<()> {
    let x = Dim::from("x");
    let a = x_values(vec![1.0, 2.0, 3.0], Unit::M);
    let b = x_values(vec![4.0, 5.0], Unit::M);
    let joined = concatenate(&a.view(), &b.view(), &x)?;
    assert_eq!(joined.dims(), &Dimensions::one("x", 5));
    assert_eq!(joined.slice(Slice::range("x", 0, 3))?.to_variable(), a);
    assert_eq!(joined.slice(Slice::range("x", 3, 5))?.to_variable(), b);
    Ok(())
}

#[test]
fn test_concatenate_along_bucketed_dim_joins_buckets() -> Result<()> {
    let buffer = |values: Vec<f64>| {
        make_variable(Dimensions::one("event", values.len()), Unit::COUNTS, values, None).unwrap()
    };
    let dims = Dimensions::one("x", 2);
    let a = make_bins_from_sizes(dims.clone(), &[2, 1], "event", buffer(vec![1.0, 2.0, 3.0]))?;
    let b = make_bins_from_sizes(dims, &[1, 2], "event", buffer(vec![4.0, 5.0, 6.0]))?;
    let joined = concatenate(&a.view(), &b.view(), &Dim::from("event"))?;
    let bins = joined.bins()?;
    assert_eq!(bins.bucket(0)?.to_vec::<f64>()?, vec![1.0, 2.0, 4.0]);
    assert_eq!(bins.bucket(1)?.to_vec::<f64>()?, vec![3.0, 5.0, 6.0]);
    Ok(())
}

#[test]
fn test_rebin_merges_bins() -> Result<()> {
    let counts = x_values(vec![10.0, 20.0], Unit::COUNTS);
    let old = x_values(vec![0.0, 1.0, 2.0], Unit::M);
    let new = x_values(vec![0.0, 2.0], Unit::M);
    let merged = rebin(&counts.view(), &Dim::from("x"), &old.view(), &new.view())?;
    assert_eq!(merged.values::<f64>()?, &[30.0]);
    Ok(())
}

#[test]
fn test_sum_and_masked_sum() -> Result<()> {
    let x = Dim::from("x");
    let data = x_values(vec![1.0, 2.0, 3.0, 4.0], Unit::COUNTS);
    assert_eq!(sum(&data.view(), &x)?.value::<f64>()?, 10.0);

    let mask = make_variable(Dimensions::one("x", 4), Unit::NONE, vec![true, true, false, false], None)?;
    assert_eq!(sum_masked(&data.view(), &x, &[mask])?.value::<f64>()?, 3.0);
    Ok(())
}

#[test]
fn test_self_addition_matches_doubling() -> Result<()> {
    let ints = make_variable(Dimensions::one("x", 3), Unit::COUNTS, vec![1_i64, -7, 42], None)?;
    let two = Variable::scalar(2_i64, Unit::ONE);
    assert_eq!((&ints + &ints)?, multiply(&ints.view(), &two.view())?);

    let floats = x_values(vec![0.1, 1e300, -3.5], Unit::M);
    let two = Variable::scalar(2.0, Unit::ONE);
    assert_eq!((&floats + &floats)?, (&floats * &two)?);
    Ok(())
}

#[test]
fn test_integer_overflow_wraps() -> Result<()> {
    let big = make_variable(Dimensions::one("x", 2), Unit::COUNTS, vec![i64::MAX, 5], None)?;
    let one = make_variable(Dimensions::one("x", 2), Unit::COUNTS, vec![1_i64, 1], None)?;
    assert_eq!((&big + &one)?.values::<i64>()?, &[i64::MIN, 6]);
    assert_eq!((&big + &big)?.values::<i64>()?, &[-2, 10]);

    let low = make_variable(Dimensions::one("x", 1), Unit::COUNTS, vec![i32::MIN], None)?;
    let step = make_variable(Dimensions::one("x", 1), Unit::COUNTS, vec![1_i32], None)?;
    assert_eq!((&low - &step)?.values::<i32>()?, &[i32::MAX]);

    let x = Dim::from("x");
    assert_eq!(sum(&big.view(), &x)?.value::<i64>()?, i64::MIN + 4);
    Ok(())
}

#[test]
fn test_stack_then_unstack_is_identity() -> Result<()> {
    let data = make_variable(
        Dimensions::one("x", 6),
        Unit::COUNTS,
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        Some(vec![1.0; 6]),
    )?;
    let mut array = DataArray::new(data).with_name("counts");
    array.set_coord("x", x_values(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0], Unit::US))?;

    let x = Dim::from("x");
    let into = Dimensions::new([("row", 2), ("tof", 3)])?;
    let stacked = stack(&array, &x, &into)?;
    assert_eq!(stacked.dims(), &into);
    let back = unstack(&stacked, &[Dim::from("row"), Dim::from("tof")], "x")?;
    assert_eq!(back, array);
    Ok(())
}

fn events(x: &[f64]) -> DataArray {
    let n = x.len();
    #[allow(clippy::cast_precision_loss)]
    let ids: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let data = make_variable(Dimensions::one("event", n), Unit::COUNTS, ids, None).unwrap();
    let mut array = DataArray::new(data);
    let coord = make_variable(Dimensions::one("event", n), Unit::M, x.to_vec(), None).unwrap();
    array.set_coord("x", coord).unwrap();
    array
}

fn sorted_edges(widths: &[f64]) -> Vec<f64> {
    let mut edges = vec![0.0];
    for w in widths {
        edges.push(edges[edges.len() - 1] + w);
    }
    edges
}

proptest! {
    #[test]
    fn prop_rebin_conserves_counts(
        counts in prop::collection::vec(0.0_f64..100.0, 1..20),
        widths in prop::collection::vec(0.1_f64..5.0, 20),
        cuts in prop::collection::vec(0.05_f64..1.0, 1..15),
        margin in (0.0_f64..2.0, 0.0_f64..2.0),
    ) {
        let old = sorted_edges(&widths[..counts.len()]);
        let (low, high) = (old[0] - margin.0, old[old.len() - 1] + margin.1);
        let total_cut: f64 = cuts.iter().sum();
        let mut new = vec![low];
        let mut position = 0.0;
        for c in &cuts[..cuts.len() - 1] {
            position += c;
            new.push(low + (high - low) * position / total_cut);
        }
        new.push(high);

        let data = x_values(counts.clone(), Unit::COUNTS);
        let old = x_values(old, Unit::M);
        let new = x_values(new, Unit::M);
        let rebinned = rebin(&data.view(), &Dim::from("x"), &old.view(), &new.view()).unwrap();
        let expected: f64 = counts.iter().sum();
        let total: f64 = rebinned.values::<f64>().unwrap().iter().sum();
        assert_relative_eq!(total, expected, epsilon = 1e-9, max_relative = 1e-9);
    }

    #[test]
    fn prop_bucketby_preserves_events(
        x in prop::collection::vec(-2.0_f64..12.0, 0..200),
        widths in prop::collection::vec(0.5_f64..3.0, 1..8),
        linspace_edges in any::<bool>(),
    ) {
        let edges = if linspace_edges {
            ru_la_var::linspace("x", 0.0, 10.0, widths.len() + 1, Unit::M)
        } else {
            x_values(sorted_edges(&widths), Unit::M)
        };
        let bounds = edges.values::<f64>().unwrap().to_vec();
        let (low, high) = (bounds[0], bounds[bounds.len() - 1]);

        let binned = bucketby(&events(&x), &[edges], &[], &[]).unwrap();
        let bins = binned.data().bins().unwrap();
        for i in 0..bins.len() {
            let ids = bins.bucket(i).unwrap().to_vec::<f64>().unwrap();
            prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
        }

        let flat = bins_flatten(&binned.data().view()).unwrap();
        let mut kept = flat.values::<f64>().unwrap().to_vec();
        kept.sort_by(f64::total_cmp);
        #[allow(clippy::cast_precision_loss)]
        let expected: Vec<f64> = x
            .iter()
            .enumerate()
            .filter(|&(_, &v)| v >= low && v < high)
            .map(|(i, _)| i as f64)
            .collect();
        prop_assert_eq!(kept, expected);
    }
}
