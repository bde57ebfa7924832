//! Tests of the public API across modules
//!
//! These cover the error types, configuration and the data-array level
//! operations that combine several engines.

use ru_la_var::{
    arange,
    arithmetic::{astype, divide, pow},
    bins::{bins_mean, bins_size},
    bucketby,
    dataset::DataArray,
    linspace, make_variable,
    parallel::{get_parallel_info, ParallelConfig},
    reduction::{mean, StatOperation, StatisticalReduction},
    sortby, DType, Dim, Dimensions, Result, RuLaVarError, Unit, Variable,
};

fn grid() -> Variable {
    make_variable(
        Dimensions::new([("y", 2), ("x", 3)]).unwrap(),
        Unit::M,
        vec![3.0, -1.0, 2.0, 7.0, 0.5, 4.0],
        None,
    )
    .unwrap()
}

#[test]
fn test_error_types() {
    let not_found = RuLaVarError::DimensionNotFound {
        dim: "time".to_string(),
        dims: "{x: 2}".to_string(),
    };
    assert_eq!(format!("{not_found}"), "Dimension 'time' not found in {x: 2}");

    let key = RuLaVarError::NotFound { key: "tof".to_string() };
    assert!(format!("{key}").contains("'tof'"));

    let generic: RuLaVarError = "Test error".into();
    assert_eq!(format!("{generic}"), "Test error");
}

#[test]
fn test_parallel_config() {
    let default_config = ParallelConfig::new_default();
    assert!(default_config.num_threads.is_none());

    let config_4 = ParallelConfig::with_threads(4);
    assert_eq!(config_4.num_threads, Some(4));
    assert!(config_4.current_threads() > 0);

    let all_cores_config = ParallelConfig::all_cores();
    assert!(all_cores_config.num_threads.unwrap() > 0);

    let info = get_parallel_info();
    assert!(info.current_threads > 0);
    assert!(info.available_cores > 0);
    info.log_info();
}

#[test]
fn test_stat_operation() {
    assert_eq!(StatOperation::Mean, StatOperation::Mean);
    assert_ne!(StatOperation::Mean, StatOperation::Sum);
    assert_eq!(format!("{:?}", StatOperation::Max), "Max");
    assert_eq!(StatOperation::Min.as_str(), "minimum");
}

#[test]
fn test_reductions_through_trait() -> Result<()> {
    let var = grid();
    let x = Dim::from("x");
    let y = Dim::from("y");

    let sums = var.reduce_along(&x, StatOperation::Sum)?;
    assert_eq!(sums.dims(), &Dimensions::one("y", 2));
    assert_eq!(sums.values::<f64>()?, &[4.0, 11.5]);

    assert_eq!(var.reduce_along(&y, StatOperation::Min)?.values::<f64>()?, &[3.0, -1.0, 2.0]);
    assert_eq!(var.reduce_along(&y, StatOperation::Max)?.values::<f64>()?, &[7.0, 0.5, 4.0]);
    assert_eq!(var.reduce_along(&y, StatOperation::Mean)?.unit(), Unit::M);

    assert!(matches!(
        var.reduce_along(&x, StatOperation::All),
        Err(RuLaVarError::TypeError(_))
    ));
    assert!(matches!(
        var.reduce_along(&Dim::from("z"), StatOperation::Sum),
        Err(RuLaVarError::DimensionNotFound { .. })
    ));
    Ok(())
}

#[test]
fn test_integer_mean_is_float() -> Result<()> {
    let ints = arange("x", 1_i64, 5, 1, Unit::COUNTS)?;
    assert_eq!(ints.values::<i64>()?, &[1, 2, 3, 4]);
    let average = mean(&ints.view(), &Dim::from("x"))?;
    assert_eq!(average.dtype(), DType::Float64);
    assert_eq!(average.value::<f64>()?, 2.5);
    Ok(())
}

#[test]
fn test_integer_division_and_powers() -> Result<()> {
    let a = make_variable(Dimensions::one("x", 2), Unit::ONE, vec![3_i64, 4], None)?;
    let b = Variable::scalar(2_i64, Unit::ONE);
    let quotient = divide(&a.view(), &b.view())?;
    assert_eq!(quotient.values::<f64>()?, &[1.5, 2.0]);

    assert_eq!(pow(&a.view(), 2)?.values::<i64>()?, &[9, 16]);
    assert!(matches!(pow(&a.view(), -1), Err(RuLaVarError::TypeError(_))));
    assert_eq!(astype(&a.view(), DType::Float32)?.values::<f32>()?, &[3.0, 4.0]);
    Ok(())
}

#[test]
fn test_masked_mean_of_data_array() -> Result<()> {
    let data = make_variable(Dimensions::one("x", 4), Unit::COUNTS, vec![1.0, 2.0, 3.0, 4.0], None)?;
    let mut array = DataArray::new(data);
    let keep = make_variable(Dimensions::one("x", 4), Unit::NONE, vec![true, true, false, false], None)?;
    array.set_mask("keep", keep)?;
    assert_eq!(array.mean(&Dim::from("x"))?.value::<f64>()?, 1.5);
    assert_eq!(array.sum(&Dim::from("x"))?.value::<f64>()?, 3.0);
    Ok(())
}

#[test]
fn test_sortby_then_bucketby() -> Result<()> {
    let n = 5;
    let weights = make_variable(Dimensions::one("event", n), Unit::COUNTS, vec![1.0, 2.0, 3.0, 4.0, 5.0], None)?;
    let mut events = DataArray::new(weights);
    let tof = make_variable(Dimensions::one("event", n), Unit::US, vec![9.0, 1.0, 5.0, 1.0, 7.0], None)?;
    events.set_coord("tof", tof)?;

    let sorted = sortby(&events, &Dim::from("tof"))?;
    assert_eq!(sorted.data().values::<f64>()?, &[2.0, 4.0, 3.0, 5.0, 1.0]);

    let edges = linspace("tof", 0.0, 10.0, 3, Unit::US);
    let binned = bucketby(&sorted, &[edges], &[], &[])?;
    let sizes = bins_size(&binned.data().view())?;
    assert_eq!(sizes.values::<i64>()?, &[2, 3]);
    let means = bins_mean(&binned.data().view())?;
    assert_eq!(means.values::<f64>()?, &[3.0, 3.0]);
    Ok(())
}
