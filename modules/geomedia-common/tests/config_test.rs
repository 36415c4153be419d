use std::path::PathBuf;

use chrono::NaiveDate;
use geomedia_common::{load_config, Alternative, EdgeTest, Measure, RankBy, TimeResolution};

fn example_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/geomedia.toml")
}

#[test]
fn example_config_loads() {
    let config = load_config(&example_config()).unwrap();

    assert_eq!(config.cube.resolution, TimeResolution::Week);
    assert!(config.cube.sub_topic.is_none());
    assert_eq!(config.filter.start, NaiveDate::from_ymd_opt(2024, 1, 1));
    assert!(!config.filter.self_pairs);
    assert!(config.filter.source.exclude.contains("wire_copy"));
    assert_eq!(config.salience.alternative, Alternative::Greater);
    assert_eq!(config.ranking.by, RankBy::Salience);
    assert_eq!(config.ranking.max_p_value, Some(0.05));
    assert_eq!(config.matrix.measure, Measure::NewsWeight);
    assert!(config.matrix.iterative);
    assert_eq!(config.matrix.s1, 5.0);
    assert_eq!(config.network.test, EdgeTest::ChiResidual);
    assert_eq!(config.null_model.max_size, 10_000);
}

#[test]
fn missing_file_reports_path() {
    let err = load_config(&PathBuf::from("/nonexistent/geomedia.toml")).unwrap_err();
    assert!(format!("{err:#}").contains("/nonexistent/geomedia.toml"));
}
