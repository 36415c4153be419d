//! Dimension aggregators: topic salience by source, time bucket and place.
//!
//! All four share one shape: reduce each row to a "matches topic" indicator,
//! group by a key summing weighted mass into `trial` / `success`, compare
//! every group against one corpus-wide baseline, then rank.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use geomedia_common::{GeomediaError, RankBy, RankingParams, SalienceParams, Tag};

use crate::hypercube::{Hypercube, HypercubeRow};
use crate::salience::{analyze, SalienceInput, SalienceRecord};

/// Which rows count as a success for the topic indicator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TopicMatch {
    /// Any tagged topic value.
    #[default]
    Any,
    /// One specific topic value.
    Exactly(String),
}

impl TopicMatch {
    pub fn from_sub_topic(sub_topic: Option<&str>) -> Self {
        match sub_topic {
            Some(t) => TopicMatch::Exactly(t.to_string()),
            None => TopicMatch::Any,
        }
    }

    pub fn matches(&self, topic: &Tag) -> bool {
        match self {
            TopicMatch::Any => topic.is_tagged(),
            TopicMatch::Exactly(t) => topic.as_value() == Some(t.as_str()),
        }
    }

    pub fn label(&self) -> String {
        match self {
            TopicMatch::Any => "*".to_string(),
            TopicMatch::Exactly(t) => t.clone(),
        }
    }
}

/// Corpus-wide `success / trial` rate of the topic indicator.
/// `None` when the cube carries no mass.
pub fn compute_baseline(cube: &Hypercube, topic: &TopicMatch) -> Option<f64> {
    let (trial, success) = mass(&cube.rows, topic);
    if trial > 0.0 {
        Some(success / trial)
    } else {
        None
    }
}

fn mass<'a>(rows: impl IntoIterator<Item = &'a HypercubeRow>, topic: &TopicMatch) -> (f64, f64) {
    rows.into_iter().fold((0.0, 0.0), |(trial, success), row| {
        let hit = if topic.matches(&row.topic) {
            row.news_weight
        } else {
            0.0
        };
        (trial + row.news_weight, success + hit)
    })
}

/// Ranked salience tables over a hypercube, sharing one baseline.
#[derive(Debug, Clone)]
pub struct DimensionAggregator {
    topic: TopicMatch,
    baseline: Option<f64>,
    salience: SalienceParams,
    ranking: RankingParams,
}

impl DimensionAggregator {
    /// Use a baseline computed elsewhere (typically on the unfiltered cube).
    pub fn with_baseline(
        topic: TopicMatch,
        baseline: Option<f64>,
        salience: SalienceParams,
        ranking: RankingParams,
    ) -> Result<Self, GeomediaError> {
        salience.validate()?;
        ranking.validate()?;
        if baseline.is_none() {
            warn!(topic = %topic.label(), "Baseline undefined, salience will be unset");
        }
        Ok(Self {
            topic,
            baseline,
            salience,
            ranking,
        })
    }

    /// Compute the baseline from `cube` itself.
    pub fn new(
        cube: &Hypercube,
        topic: TopicMatch,
        salience: SalienceParams,
        ranking: RankingParams,
    ) -> Result<Self, GeomediaError> {
        let baseline = compute_baseline(cube, &topic);
        Self::with_baseline(topic, baseline, salience, ranking)
    }

    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    pub fn topic(&self) -> &TopicMatch {
        &self.topic
    }

    /// Overall prevalence of the topic in `cube`: a single ungrouped record.
    pub fn topic_frequency(
        &self,
        cube: &Hypercube,
    ) -> Result<Vec<SalienceRecord<String>>, GeomediaError> {
        let (trial, success) = mass(&cube.rows, &self.topic);
        let inputs = vec![SalienceInput {
            key: self.topic.label(),
            trial,
            success,
            null_value: self.baseline,
        }];
        self.finish("topic", inputs)
    }

    pub fn by_source(
        &self,
        cube: &Hypercube,
    ) -> Result<Vec<SalienceRecord<String>>, GeomediaError> {
        let inputs = self.group(cube, |row| Some(row.source.clone()));
        self.finish("source", inputs)
    }

    pub fn by_time(
        &self,
        cube: &Hypercube,
    ) -> Result<Vec<SalienceRecord<NaiveDate>>, GeomediaError> {
        let inputs = self.group(cube, |row| Some(row.bucket));
        self.finish("time", inputs)
    }

    /// Grouped by the primary geographic entity. Untagged rows form no group.
    pub fn by_place(
        &self,
        cube: &Hypercube,
    ) -> Result<Vec<SalienceRecord<String>>, GeomediaError> {
        let inputs = self.group(cube, |row| row.geo_a.as_value().map(str::to_string));
        self.finish("place", inputs)
    }

    fn group<K: Ord>(
        &self,
        cube: &Hypercube,
        key_of: impl Fn(&HypercubeRow) -> Option<K>,
    ) -> Vec<SalienceInput<K>> {
        let mut groups: BTreeMap<K, (f64, f64)> = BTreeMap::new();
        for row in &cube.rows {
            let Some(key) = key_of(row) else {
                continue;
            };
            let entry = groups.entry(key).or_insert((0.0, 0.0));
            entry.0 += row.news_weight;
            if self.topic.matches(&row.topic) {
                entry.1 += row.news_weight;
            }
        }

        groups
            .into_iter()
            .map(|(key, (trial, success))| SalienceInput {
                key,
                trial,
                success,
                null_value: self.baseline,
            })
            .collect()
    }

    fn finish<K: Ord>(
        &self,
        dimension: &str,
        inputs: Vec<SalienceInput<K>>,
    ) -> Result<Vec<SalienceRecord<K>>, GeomediaError> {
        let groups = inputs.len();
        let records = rank(analyze(inputs, &self.salience)?, &self.ranking);
        info!(
            dimension,
            groups,
            kept = records.len(),
            baseline = self.baseline,
            "Dimension aggregated"
        );
        Ok(records)
    }
}

/// Unset values sort after every set value.
fn cmp_optional(a: Option<f64>, b: Option<f64>, descending: bool) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => {
            if descending {
                y.total_cmp(&x)
            } else {
                x.total_cmp(&y)
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Apply ranking cut-offs, then order by salience (descending) or p-value
/// (ascending). Ties fall back to key order.
pub fn rank<K: Ord>(
    records: Vec<SalienceRecord<K>>,
    ranking: &RankingParams,
) -> Vec<SalienceRecord<K>> {
    let mut kept: Vec<SalienceRecord<K>> = records
        .into_iter()
        .filter(|r| {
            ranking
                .min_salience
                .map_or(true, |min| r.salience.is_some_and(|s| s >= min))
        })
        .filter(|r| {
            ranking
                .max_p_value
                .map_or(true, |max| r.p_value.is_some_and(|p| p <= max))
        })
        .collect();

    kept.sort_by(|a, b| {
        let primary = match ranking.by {
            RankBy::Salience => cmp_optional(a.salience, b.salience, true),
            RankBy::PValue => cmp_optional(a.p_value, b.p_value, false),
        };
        primary.then_with(|| a.key.cmp(&b.key))
    });
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use geomedia_common::{RoleSelectors, TimeResolution};

    fn row(
        source: &str,
        day: u32,
        topic: Option<&str>,
        place: Option<&str>,
        weight: f64,
    ) -> HypercubeRow {
        HypercubeRow {
            sequence: 1,
            source: source.to_string(),
            bucket: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            topic: topic.map(Tag::from).unwrap_or(Tag::Untagged),
            geo_a: place.map(Tag::from).unwrap_or(Tag::Untagged),
            geo_b: Tag::Untagged,
            tag_count: 1,
            news_weight: weight,
        }
    }

    fn cube(rows: Vec<HypercubeRow>) -> Hypercube {
        Hypercube {
            resolution: TimeResolution::Day,
            roles: RoleSelectors::default(),
            document_count: 0,
            rows,
        }
    }

    /// Source "a": 40 of 50 on topic; source "b": 10 of 50.
    fn sample() -> Hypercube {
        cube(vec![
            row("a", 1, Some("mig"), Some("FRA"), 30.0),
            row("a", 2, Some("war"), Some("DEU"), 10.0),
            row("a", 2, None, Some("FRA"), 10.0),
            row("b", 1, Some("mig"), None, 10.0),
            row("b", 2, None, Some("DEU"), 40.0),
        ])
    }

    fn lenient() -> SalienceParams {
        SalienceParams {
            min_sample: 0.0,
            min_expected: 0.0,
            ..SalienceParams::default()
        }
    }

    fn any_topic(c: &Hypercube) -> DimensionAggregator {
        DimensionAggregator::new(c, TopicMatch::Any, lenient(), RankingParams::default()).unwrap()
    }

    // --- baseline tests ---

    #[test]
    fn baseline_is_corpus_wide_rate() {
        let c = sample();
        assert!((compute_baseline(&c, &TopicMatch::Any).unwrap() - 0.5).abs() < 1e-12);
        let mig = TopicMatch::Exactly("mig".to_string());
        assert!((compute_baseline(&c, &mig).unwrap() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn aggregator_computes_baseline_from_its_cube() {
        let agg = any_topic(&sample());
        assert!((agg.baseline().unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(agg.topic(), &TopicMatch::Any);
    }

    #[test]
    fn baseline_undefined_on_empty_cube() {
        assert!(compute_baseline(&cube(vec![]), &TopicMatch::Any).is_none());
    }

    #[test]
    fn undefined_baseline_propagates_to_unset_salience() {
        let empty = cube(vec![]);
        let agg = any_topic(&empty);
        assert!(agg.baseline().is_none());
        let records = agg.by_source(&sample()).unwrap();
        assert!(records.iter().all(|r| r.salience.is_none() && r.p_value.is_none()));
    }

    // --- grouping tests ---

    #[test]
    fn by_source_groups_mass_and_compares_with_baseline() {
        let c = sample();
        let agg = any_topic(&c);
        let records = agg.by_source(&c).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, "a");
        assert!((records[0].trial - 50.0).abs() < 1e-12);
        assert!((records[0].success - 40.0).abs() < 1e-12);
        assert!((records[0].salience.unwrap() - 1.6).abs() < 1e-12);
        assert!((records[1].salience.unwrap() - 0.4).abs() < 1e-12);
        assert_eq!(records[0].null_value, Some(0.5));
    }

    #[test]
    fn by_time_groups_by_bucket() {
        let c = sample();
        let agg = any_topic(&c);
        let records = agg.by_time(&c).unwrap();

        assert_eq!(records.len(), 2);
        // Day 1: 40 of 40 on topic; day 2: 10 of 60.
        assert_eq!(records[0].key, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert!((records[0].estimate.unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn by_place_skips_untagged_rows() {
        let c = sample();
        let agg = any_topic(&c);
        let records = agg.by_place(&c).unwrap();

        let keys: Vec<&str> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"FRA") && keys.contains(&"DEU"));
        let total: f64 = records.iter().map(|r| r.trial).sum();
        assert!((total - 90.0).abs() < 1e-12);
    }

    #[test]
    fn sub_topic_restricts_success() {
        let c = sample();
        let mig = TopicMatch::Exactly("mig".to_string());
        let agg = DimensionAggregator::new(&c, mig, lenient(), RankingParams::default()).unwrap();
        let records = agg.by_source(&c).unwrap();
        let a = records.iter().find(|r| r.key == "a").unwrap();
        assert!((a.success - 30.0).abs() < 1e-12);
    }

    #[test]
    fn topic_frequency_is_single_record_at_baseline() {
        let c = sample();
        let agg = any_topic(&c);
        let records = agg.topic_frequency(&c).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "*");
        assert!((records[0].estimate.unwrap() - 0.5).abs() < 1e-12);
        assert!((records[0].salience.unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn filtered_view_keeps_the_global_baseline() {
        let c = sample();
        let only_b = cube(c.rows.iter().filter(|r| r.source == "b").cloned().collect());
        let agg = any_topic(&c);
        let records = agg.topic_frequency(&only_b).unwrap();
        assert_eq!(records[0].null_value, Some(0.5));
        assert!((records[0].salience.unwrap() - 0.4).abs() < 1e-12);
    }

    // --- ranking tests ---

    fn record(
        key: &'static str,
        salience: Option<f64>,
        p_value: Option<f64>,
    ) -> SalienceRecord<&'static str> {
        SalienceRecord {
            key,
            trial: 1.0,
            success: 0.0,
            null_value: Some(0.5),
            estimate: salience.map(|s| s * 0.5),
            salience,
            test_statistic: p_value.map(|_| 1.0),
            p_value,
        }
    }

    #[test]
    fn magnitude_mode_sorts_descending_with_unset_last() {
        let ranked = rank(
            vec![
                record("x", None, None),
                record("y", Some(0.5), None),
                record("z", Some(2.0), None),
            ],
            &RankingParams::default(),
        );
        let keys: Vec<&str> = ranked.iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["z", "y", "x"]);
    }

    #[test]
    fn significance_mode_sorts_ascending_and_filters() {
        let ranking = RankingParams {
            by: RankBy::PValue,
            min_salience: None,
            max_p_value: Some(0.05),
        };
        let ranked = rank(
            vec![
                record("x", Some(1.0), Some(0.2)),
                record("y", Some(1.0), Some(0.01)),
                record("z", Some(1.0), Some(0.001)),
                record("w", Some(1.0), None),
            ],
            &ranking,
        );
        let keys: Vec<&str> = ranked.iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["z", "y"]);
    }

    #[test]
    fn ties_break_on_key() {
        let ranked = rank(
            vec![record("b", Some(1.0), None), record("a", Some(1.0), None)],
            &RankingParams::default(),
        );
        assert_eq!(ranked[0].key, "a");
    }

    #[test]
    fn min_salience_drops_unset_and_small_values() {
        let ranking = RankingParams {
            min_salience: Some(1.0),
            ..RankingParams::default()
        };
        let ranked = rank(
            vec![
                record("x", None, None),
                record("y", Some(0.9), None),
                record("z", Some(1.5), None),
            ],
            &ranking,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].key, "z");
    }
}
