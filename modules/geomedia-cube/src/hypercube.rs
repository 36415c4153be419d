//! Hypercube: the aggregated fact table every analysis reads from.
//!
//! Each document is expanded into the cartesian product of its topic, geo A
//! and geo B values. The document's unit mass is split evenly across those
//! rows before aggregation, so fan-out never inflates coverage: summing
//! `news_weight` over the whole cube gives back the document count.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use geomedia_common::{RoleSelectors, Tag, TaggedDocument, TimeResolution};

/// Aggregation key of one hypercube cell.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct CellKey {
    sequence: u32,
    source: String,
    bucket: NaiveDate,
    topic: Tag,
    geo_a: Tag,
    geo_b: Tag,
}

/// One aggregated combination of the hypercube dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HypercubeRow {
    pub sequence: u32,
    pub source: String,
    /// First day of the time bucket.
    pub bucket: NaiveDate,
    pub topic: Tag,
    pub geo_a: Tag,
    pub geo_b: Tag,
    /// Number of expansion rows that landed in this cell.
    pub tag_count: u64,
    /// Fractional document mass.
    pub news_weight: f64,
}

/// The aggregated fact table, sorted by key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Hypercube {
    pub resolution: TimeResolution,
    pub roles: RoleSelectors,
    pub document_count: usize,
    pub rows: Vec<HypercubeRow>,
}

/// Headline figures of a hypercube.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HypercubeSummary {
    pub document_count: usize,
    pub row_count: usize,
    pub total_weight: f64,
    pub sources: usize,
    pub buckets: usize,
    pub topic_values: usize,
    pub geo_a_values: usize,
    pub geo_b_values: usize,
}

impl Hypercube {
    pub fn total_weight(&self) -> f64 {
        self.rows.iter().map(|r| r.news_weight).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Same cube metadata around a different row set (used by filters).
    pub fn with_rows(&self, rows: Vec<HypercubeRow>) -> Self {
        Self {
            resolution: self.resolution,
            roles: self.roles,
            document_count: self.document_count,
            rows,
        }
    }

    pub fn summary(&self) -> HypercubeSummary {
        let mut sources = BTreeSet::new();
        let mut buckets = BTreeSet::new();
        let mut topics = BTreeSet::new();
        let mut geo_a = BTreeSet::new();
        let mut geo_b = BTreeSet::new();
        for row in &self.rows {
            sources.insert(row.source.as_str());
            buckets.insert(row.bucket);
            if let Some(t) = row.topic.as_value() {
                topics.insert(t);
            }
            if let Some(g) = row.geo_a.as_value() {
                geo_a.insert(g);
            }
            if let Some(g) = row.geo_b.as_value() {
                geo_b.insert(g);
            }
        }
        HypercubeSummary {
            document_count: self.document_count,
            row_count: self.rows.len(),
            total_weight: self.total_weight(),
            sources: sources.len(),
            buckets: buckets.len(),
            topic_values: topics.len(),
            geo_a_values: geo_a.len(),
            geo_b_values: geo_b.len(),
        }
    }
}

/// Expands tagged documents into a hypercube.
#[derive(Debug, Clone, Copy, Default)]
pub struct HypercubeBuilder {
    resolution: TimeResolution,
    roles: RoleSelectors,
}

impl HypercubeBuilder {
    pub fn new(resolution: TimeResolution, roles: RoleSelectors) -> Self {
        Self { resolution, roles }
    }

    /// Weighted expansion rows of a single document, before aggregation.
    /// Always non-empty; weights sum to 1.
    pub fn expand(&self, doc: &TaggedDocument) -> Vec<HypercubeRow> {
        let topics = doc.role_values(self.roles.topic);
        let geo_a = doc.role_values(self.roles.geo_a);
        let geo_b = doc.role_values(self.roles.geo_b);

        let fan_out = topics.len() * geo_a.len() * geo_b.len();
        let weight = 1.0 / fan_out as f64;
        let bucket = self.resolution.bucket(doc.timestamp);

        let mut rows = Vec::with_capacity(fan_out);
        for topic in &topics {
            for a in &geo_a {
                for b in &geo_b {
                    rows.push(HypercubeRow {
                        sequence: doc.sequence,
                        source: doc.source.clone(),
                        bucket,
                        topic: topic.clone(),
                        geo_a: a.clone(),
                        geo_b: b.clone(),
                        tag_count: 1,
                        news_weight: weight,
                    });
                }
            }
        }
        rows
    }

    /// Expand every document and sum both measures per cell.
    pub fn build(&self, docs: &[TaggedDocument]) -> Hypercube {
        let mut cells: BTreeMap<CellKey, (u64, f64)> = BTreeMap::new();
        let mut expanded = 0usize;

        for doc in docs {
            for row in self.expand(doc) {
                expanded += 1;
                let key = CellKey {
                    sequence: row.sequence,
                    source: row.source,
                    bucket: row.bucket,
                    topic: row.topic,
                    geo_a: row.geo_a,
                    geo_b: row.geo_b,
                };
                let cell = cells.entry(key).or_insert((0, 0.0));
                cell.0 += row.tag_count;
                cell.1 += row.news_weight;
            }
        }

        let rows: Vec<HypercubeRow> = cells
            .into_iter()
            .map(|(key, (tag_count, news_weight))| HypercubeRow {
                sequence: key.sequence,
                source: key.source,
                bucket: key.bucket,
                topic: key.topic,
                geo_a: key.geo_a,
                geo_b: key.geo_b,
                tag_count,
                news_weight,
            })
            .collect();

        info!(
            documents = docs.len(),
            expanded,
            rows = rows.len(),
            resolution = %self.resolution,
            "Hypercube built"
        );

        Hypercube {
            resolution: self.resolution,
            roles: self.roles,
            document_count: docs.len(),
            rows,
        }
    }
}
