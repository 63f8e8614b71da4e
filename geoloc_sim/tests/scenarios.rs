// geoloc_sim/tests/scenarios.rs

use geoloc_sim::prelude::*;

const SCENARIO_FILE: &str = concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../assets/scenarios/range_rate_fix.toml"
);

/// The bundled scenario with the noise, model and estimator swapped out.
fn variant(kind: &str, noise: f64, estimator: &str) -> ScenarioConfig {
    let mut config = ScenarioConfig::load(SCENARIO_FILE).unwrap();
    config.measurement.noise_stddev = noise;
    config.measurement.kind = match kind {
        "range_rate" => ModelKind::RangeRate,
        "frequency_of_arrival" => ModelKind::FrequencyOfArrival,
        "direction_of_arrival" => ModelKind::DirectionOfArrival,
        _ => ModelKind::TimeDifference,
    };
    config.emitter.frequency_hz = Some(1.0e9);
    let estimator_toml = format!("[estimator]\n{estimator}");
    #[derive(serde::Deserialize)]
    struct Only {
        estimator: EstimatorConfig,
    }
    let only: Only = toml::from_str(&estimator_toml).unwrap();
    config.estimator = only.estimator;
    config
}

const ILS: &str = "type = \"Ils\"\ntolerance = 1e-3\nmax_iterations = 25";

#[test]
fn bundled_scenario_loads_and_runs() {
    let config = ScenarioConfig::load(SCENARIO_FILE).unwrap();
    assert_eq!(config.sensors.len(), 4);
    assert_eq!(config.simulation.seed, Some(20240517));

    let report = run_scenario(&config).unwrap();
    assert_eq!(report.kind, ModelKind::RangeRate);
    assert_eq!(report.estimator, "Ils");
    assert!(report.iterations >= 1);
    assert!(report.position_error_m.is_finite());
    assert_eq!(report.estimate.len(), 3);

    let text = report.to_toml_string().unwrap();
    assert!(text.contains("position_error_m"));
    assert!(text.contains("[horizontal_ellipse]"));
}

#[test]
fn seeded_runs_are_reproducible() {
    let config = ScenarioConfig::load(SCENARIO_FILE).unwrap();
    let first = run_scenario(&config).unwrap();
    let second = run_scenario(&config).unwrap();
    assert_eq!(first, second);
}

#[test]
fn noise_free_fixes_recover_the_emitter() {
    for kind in [
        "range_rate",
        "frequency_of_arrival",
        "direction_of_arrival",
        "time_difference",
    ] {
        let report = run_scenario(&variant(kind, 0.0, ILS));
        // Zero noise makes R singular for the exact inverse, so use a tiny sigma instead.
        assert!(matches!(
            report,
            Err(SimError::Estimation(GeolocError::SingularMatrix { .. }))
        ));

        let report = run_scenario(&variant(kind, 1e-9, ILS)).unwrap();
        assert!(
            report.position_error_m < 1.0,
            "{kind}: error {} m",
            report.position_error_m
        );
        assert!(report.horizontal_ellipse.semi_major_m >= report.horizontal_ellipse.semi_minor_m);
    }
}

#[test]
fn ekf_time_difference_run() {
    let config = variant(
        "time_difference",
        5.0,
        "type = \"Ekf\"\nupdates = 10\ninitial_position_sigma_m = 2000.0",
    );
    let report = run_scenario(&config).unwrap();
    assert_eq!(report.estimator, "Ekf");
    assert_eq!(report.iterations, 10);
    assert!(report.position_error_m < 500.0, "error {} m", report.position_error_m);
    assert!(report
        .interval_lower
        .iter()
        .zip(&report.interval_upper)
        .all(|(lo, hi)| lo < hi));
}

#[test]
fn invalid_scenarios_are_rejected() {
    let mut config = ScenarioConfig::load(SCENARIO_FILE).unwrap();
    config.sensors.truncate(2);
    assert!(matches!(
        run_scenario(&config),
        Err(SimError::InvalidScenario(_))
    ));

    let mut config = ScenarioConfig::load(SCENARIO_FILE).unwrap();
    config.measurement.kind = ModelKind::FrequencyOfArrival;
    config.emitter.frequency_hz = None;
    assert!(matches!(
        run_scenario(&config),
        Err(SimError::InvalidScenario(_))
    ));
}
