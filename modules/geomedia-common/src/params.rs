//! Stage parameters.
//!
//! Every struct deserializes from its TOML section with all fields optional;
//! `Default` carries the documented defaults. `validate()` rejects
//! programmer-error values before a stage runs.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::error::{ensure_non_negative, GeomediaError};

// --- Salience ---

/// Direction of the one-sample proportion test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Alternative {
    /// Group rate above the baseline.
    #[default]
    Greater,
    Less,
    TwoSided,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct SalienceParams {
    /// Estimate and salience are reported only when `trial > min_sample`.
    pub min_sample: f64,
    /// The test is run only when `trial * null_value >= min_expected`.
    pub min_expected: f64,
    pub alternative: Alternative,
    /// Yates continuity correction on the chi-square statistic.
    pub continuity_correction: bool,
}

impl Default for SalienceParams {
    fn default() -> Self {
        Self {
            min_sample: 20.0,
            min_expected: 5.0,
            alternative: Alternative::Greater,
            continuity_correction: true,
        }
    }
}

impl SalienceParams {
    pub fn validate(&self) -> Result<(), GeomediaError> {
        ensure_non_negative("min_sample", self.min_sample)?;
        ensure_non_negative("min_expected", self.min_expected)
    }
}

/// Ordering applied to aggregator output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RankBy {
    /// Largest salience first.
    #[default]
    Salience,
    /// Smallest p-value first.
    PValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct RankingParams {
    pub by: RankBy,
    /// Drop groups whose salience is unset or below this value.
    pub min_salience: Option<f64>,
    /// Drop groups whose p-value is unset or above this value.
    pub max_p_value: Option<f64>,
}

impl RankingParams {
    pub fn validate(&self) -> Result<(), GeomediaError> {
        if let Some(v) = self.min_salience {
            ensure_non_negative("min_salience", v)?;
        }
        if let Some(v) = self.max_p_value {
            ensure_non_negative("max_p_value", v)?;
        }
        Ok(())
    }
}

// --- Interaction matrix ---

/// Hypercube measure summed into the interaction matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    #[default]
    NewsWeight,
    TagCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct MatrixThresholds {
    /// Minimum row mass.
    pub s1: f64,
    /// Minimum column mass.
    pub s2: f64,
    /// Minimum number of row cells at or above `k`.
    pub n1: usize,
    /// Minimum number of column cells at or above `k`.
    pub n2: usize,
    /// Binarization cutoff.
    pub k: f64,
    pub measure: Measure,
    /// Re-apply both threshold passes until no row or column is removed.
    pub iterative: bool,
}

impl Default for MatrixThresholds {
    fn default() -> Self {
        Self {
            s1: 0.0,
            s2: 0.0,
            n1: 0,
            n2: 0,
            k: 1.0,
            measure: Measure::NewsWeight,
            iterative: false,
        }
    }
}

impl MatrixThresholds {
    pub fn validate(&self) -> Result<(), GeomediaError> {
        ensure_non_negative("s1", self.s1)?;
        ensure_non_negative("s2", self.s2)?;
        ensure_non_negative("k", self.k)
    }
}

// --- Null model ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct NullModelParams {
    /// Tables with more cells than this are not fitted.
    pub max_size: usize,
    pub exclude_diagonal: bool,
    pub residuals: bool,
    pub max_iterations: usize,
    /// Relative deviance change that ends the IRLS loop.
    pub tolerance: f64,
}

impl Default for NullModelParams {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            exclude_diagonal: true,
            residuals: true,
            max_iterations: 25,
            tolerance: 1e-8,
        }
    }
}

impl NullModelParams {
    pub fn validate(&self) -> Result<(), GeomediaError> {
        ensure_non_negative("tolerance", self.tolerance)?;
        if self.max_iterations == 0 {
            return Err(GeomediaError::InvalidParameter {
                name: "max_iterations",
                value: 0.0,
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

// --- Network ---

/// Residual used as the edge test statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EdgeTest {
    #[default]
    ChiResidual,
    RelResidual,
    AbsResidual,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkThresholds {
    pub min_size: f64,
    pub max_size: Option<f64>,
    /// May be negative: signed residuals below zero mark under-represented pairs.
    pub min_test: f64,
    pub loops: bool,
    pub test: EdgeTest,
}

impl Default for NetworkThresholds {
    fn default() -> Self {
        Self {
            min_size: 1.0,
            max_size: None,
            // chi-square critical value, 1 df, 5%
            min_test: 3.84,
            loops: false,
            test: EdgeTest::ChiResidual,
        }
    }
}

impl NetworkThresholds {
    pub fn validate(&self) -> Result<(), GeomediaError> {
        ensure_non_negative("min_size", self.min_size)?;
        if let Some(max) = self.max_size {
            ensure_non_negative("max_size", max)?;
        }
        if self.min_test.is_nan() {
            return Err(GeomediaError::InvalidParameter {
                name: "min_test",
                value: self.min_test,
                reason: "must be a number",
            });
        }
        Ok(())
    }
}

// --- Filter ---

/// Inclusion/exclusion rule for one dimension.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct Selection {
    /// When present, only these values pass.
    pub include: Option<BTreeSet<String>>,
    pub exclude: BTreeSet<String>,
    /// Drop rows whose value is untagged.
    pub drop_untagged: bool,
}

impl Selection {
    pub fn including<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            include: Some(values.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn excluding<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exclude: values.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn dropping_untagged(mut self) -> Self {
        self.drop_untagged = true;
        self
    }

    /// `None` is the untagged value; it never matches an inclusion list.
    pub fn admits(&self, value: Option<&str>) -> bool {
        match value {
            None => !self.drop_untagged && self.include.is_none(),
            Some(v) => {
                !self.exclude.contains(v)
                    && self.include.as_ref().map_or(true, |inc| inc.contains(v))
            }
        }
    }

    pub fn is_noop(&self) -> bool {
        self.include.is_none() && self.exclude.is_empty() && !self.drop_untagged
    }
}

/// Declarative row filter over a hypercube. All rules AND-compose; an absent
/// rule lets every row through.
///
/// `start` and `end` compare against the first day of each row's time bucket,
/// not the document dates: with week or month resolution a bucket starting
/// inside the range passes whole, even when it runs past `end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, TypedBuilder)]
#[serde(default, deny_unknown_fields)]
pub struct HypercubeFilter {
    /// Inclusive lower bound on the time bucket.
    #[builder(default, setter(strip_option))]
    pub start: Option<NaiveDate>,
    /// Inclusive upper bound on the time bucket.
    #[builder(default, setter(strip_option))]
    pub end: Option<NaiveDate>,
    #[builder(default)]
    pub source: Selection,
    #[builder(default)]
    pub geo_a: Selection,
    #[builder(default)]
    pub geo_b: Selection,
    /// Keep rows where both geo values are the same entity.
    #[builder(default = true)]
    pub self_pairs: bool,
}

impl Default for HypercubeFilter {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl HypercubeFilter {
    pub fn validate(&self) -> Result<(), GeomediaError> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(GeomediaError::InvalidTimeRange { start, end });
            }
        }
        Ok(())
    }

    pub fn is_noop(&self) -> bool {
        self.start.is_none()
            && self.end.is_none()
            && self.source.is_noop()
            && self.geo_a.is_noop()
            && self.geo_b.is_noop()
            && self.self_pairs
    }
}
