//! Pipeline: sequences every stage into one analysis run.
//!
//! 1. **Build** the hypercube from the tagged corpus
//! 2. **Baseline** topic prevalence on the unfiltered cube
//! 3. **Filter** the cube by time, source and geography
//! 4. **Aggregate** salience by topic, source, time and place
//! 5. **Interact**: thresholded geo A x geo B matrix, melted
//! 6. **Null model**: Poisson independence fit with residuals
//! 7. **Network**: thresholded residual graph joined to the reference table
//!
//! Same documents and config always produce the same report, apart from
//! `run_id`.

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use geomedia_common::{FileConfig, GeoReferenceTable, GeomediaError, TaggedDocument};

use crate::aggregate::{compute_baseline, DimensionAggregator, TopicMatch};
use crate::filter;
use crate::hypercube::{HypercubeBuilder, HypercubeSummary};
use crate::interaction::{build_interactions, InteractionCell};
use crate::network::{self, EdgeCandidate, Graph};
use crate::null_model::{self, NullModelOutcome};
use crate::salience::SalienceRecord;

/// Everything one run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PipelineReport {
    pub run_id: Uuid,
    /// Topic label: `*` for any topic, otherwise the sub-topic.
    pub topic: String,
    /// Summary of the unfiltered cube.
    pub cube: HypercubeSummary,
    /// Summary after the filter.
    pub filtered: HypercubeSummary,
    pub baseline: Option<f64>,
    pub topic_frequency: Vec<SalienceRecord<String>>,
    pub by_source: Vec<SalienceRecord<String>>,
    pub by_time: Vec<SalienceRecord<NaiveDate>>,
    pub by_place: Vec<SalienceRecord<String>>,
    pub interactions: Vec<InteractionCell>,
    pub null_model: NullModelOutcome,
    /// `None` when the null model produced no residuals.
    pub graph: Option<Graph>,
}

/// Runs the full analysis for one configuration.
pub struct Pipeline {
    config: FileConfig,
}

impl Pipeline {
    pub fn new(config: FileConfig) -> Result<Self, GeomediaError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn run(
        &self,
        documents: &[TaggedDocument],
        reference: &GeoReferenceTable,
    ) -> Result<PipelineReport, GeomediaError> {
        let run_id = Uuid::new_v4();
        let config = &self.config;
        info!(%run_id, documents = documents.len(), "Pipeline: run starting");

        let cube =
            HypercubeBuilder::new(config.cube.resolution, config.cube.roles).build(documents);

        let topic = TopicMatch::from_sub_topic(config.cube.sub_topic.as_deref());
        let baseline = compute_baseline(&cube, &topic);

        let filtered = filter::apply(&config.filter, &cube)?;

        let aggregator =
            DimensionAggregator::with_baseline(topic, baseline, config.salience, config.ranking)?;
        let topic_frequency = aggregator.topic_frequency(&filtered)?;
        let by_source = aggregator.by_source(&filtered)?;
        let by_time = aggregator.by_time(&filtered)?;
        let by_place = aggregator.by_place(&filtered)?;

        let interactions = build_interactions(&filtered, &config.matrix)?;
        let outcome = null_model::estimate(&interactions, &config.null_model)?;

        let graph = match outcome.residuals() {
            Some(residuals) => {
                let candidates: Vec<EdgeCandidate> = residuals
                    .iter()
                    .map(|cell| EdgeCandidate::from_residual(cell, config.network.test))
                    .collect();
                Some(network::extract(&candidates, &config.network, reference)?)
            }
            None => None,
        };

        info!(
            %run_id,
            rows = filtered.rows.len(),
            interactions = interactions.len(),
            fitted = outcome.model().is_some(),
            edges = graph.as_ref().map_or(0, |g| g.edges.len()),
            "Pipeline: run complete"
        );

        Ok(PipelineReport {
            run_id,
            topic: aggregator.topic().label(),
            cube: cube.summary(),
            filtered: filtered.summary(),
            baseline,
            topic_frequency,
            by_source,
            by_time,
            by_place,
            interactions,
            null_model: outcome,
            graph,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use geomedia_common::{HypercubeFilter, Selection};

    fn doc(
        id: &str,
        source: &str,
        day: u32,
        topics: &[&str],
        a: &[&str],
        b: &[&str],
    ) -> TaggedDocument {
        let set = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>();
        TaggedDocument {
            id: id.to_string(),
            sequence: 1,
            source: source.to_string(),
            timestamp: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            topic_tags: set(topics),
            geo_tags_a: set(a),
            geo_tags_b: set(b),
        }
    }

    fn corpus() -> Vec<TaggedDocument> {
        vec![
            doc("1", "le_monde", 4, &["migrant"], &["FRA"], &["ITA"]),
            doc("2", "le_monde", 5, &[], &["FRA"], &["DEU"]),
            doc("3", "guardian", 6, &["migrant"], &["GBR"], &["FRA"]),
            doc("4", "guardian", 12, &[], &["GBR"], &["ITA"]),
        ]
    }

    #[test]
    fn run_produces_every_table() {
        let pipeline = Pipeline::new(FileConfig::default()).unwrap();
        let report = pipeline.run(&corpus(), &GeoReferenceTable::default()).unwrap();

        assert_eq!(report.topic, "*");
        assert_eq!(report.cube.document_count, 4);
        assert!((report.baseline.unwrap() - 0.5).abs() < 1e-10);
        assert_eq!(report.topic_frequency.len(), 1);
        assert_eq!(report.by_source.len(), 2);
        assert_eq!(report.by_time.len(), 2);
        assert_eq!(report.by_place.len(), 2);
        // 2 x 3 matrix melted, zeros included
        assert_eq!(report.interactions.len(), 6);
        assert!(report.null_model.model().is_some());
        assert!(report.graph.is_some());
    }

    #[test]
    fn baseline_comes_from_unfiltered_cube() {
        let config = FileConfig {
            filter: HypercubeFilter::builder()
                .source(Selection::including(["guardian"]))
                .build(),
            ..FileConfig::default()
        };
        let report = Pipeline::new(config)
            .unwrap()
            .run(&corpus(), &GeoReferenceTable::default())
            .unwrap();

        assert!((report.baseline.unwrap() - 0.5).abs() < 1e-10);
        assert_eq!(report.filtered.document_count, 4);
        assert!((report.filtered.total_weight - 2.0).abs() < 1e-10);
        assert_eq!(report.by_source.len(), 1);
    }

    #[test]
    fn oversized_table_skips_network() {
        let mut config = FileConfig::default();
        config.null_model.max_size = 2;
        let report = Pipeline::new(config)
            .unwrap()
            .run(&corpus(), &GeoReferenceTable::default())
            .unwrap();

        assert!(matches!(
            report.null_model,
            NullModelOutcome::SizeExceeded { cells: 6, max_size: 2 }
        ));
        assert!(report.graph.is_none());
    }

    #[test]
    fn empty_corpus_yields_empty_report() {
        let report = Pipeline::new(FileConfig::default())
            .unwrap()
            .run(&[], &GeoReferenceTable::default())
            .unwrap();

        assert!(report.baseline.is_none());
        assert!(report.by_source.is_empty());
        assert!(report.interactions.is_empty());
        assert_eq!(report.null_model, NullModelOutcome::Empty);
        assert!(report.graph.is_none());
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let mut config = FileConfig::default();
        config.matrix.s1 = -1.0;
        assert!(Pipeline::new(config).is_err());
    }
}
