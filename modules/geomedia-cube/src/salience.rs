//! Salience: a group's rate of a binary indicator compared with a baseline.
//!
//! Two independent gates guard the output:
//! - `estimate` / `salience` need `trial > min_sample`
//! - the proportion test needs `trial * null_value >= min_expected`
//!
//! A gated field is left as `None`, which is distinct from a computed zero.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};
use tracing::debug;

use geomedia_common::{Alternative, GeomediaError, SalienceParams};

/// One group to analyze.
#[derive(Debug, Clone, PartialEq)]
pub struct SalienceInput<K> {
    pub key: K,
    /// Total weighted mass of the group.
    pub trial: f64,
    /// Weighted mass of the group matching the indicator.
    pub success: f64,
    /// Baseline rate; `None` when the baseline itself is undefined.
    pub null_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SalienceRecord<K> {
    pub key: K,
    pub trial: f64,
    pub success: f64,
    pub null_value: Option<f64>,
    pub estimate: Option<f64>,
    pub salience: Option<f64>,
    pub test_statistic: Option<f64>,
    pub p_value: Option<f64>,
}

impl<K> SalienceRecord<K> {
    pub fn has_estimate(&self) -> bool {
        self.estimate.is_some()
    }

    pub fn is_tested(&self) -> bool {
        self.p_value.is_some()
    }
}

/// Result of a one-sample proportion test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProportionTest {
    /// Chi-square statistic (1 df).
    pub statistic: f64,
    pub p_value: f64,
}

/// One-sample proportion test of `success / trial` against rate `p`.
///
/// Chi-square statistic with optional Yates correction; one-sided
/// alternatives use the signed square root against the normal tail.
/// Returns `None` when the test is undefined (`trial <= 0` or `p` outside
/// the open interval (0, 1)).
pub fn proportion_test(
    success: f64,
    trial: f64,
    p: f64,
    alternative: Alternative,
    continuity_correction: bool,
) -> Option<ProportionTest> {
    if trial <= 0.0 || !(p > 0.0 && p < 1.0) {
        return None;
    }

    let expected = trial * p;
    let deviation = (success - expected).abs();
    let yates = if continuity_correction {
        deviation.min(0.5)
    } else {
        0.0
    };
    let statistic = (deviation - yates).powi(2) / (expected * (1.0 - p));

    let p_value = match alternative {
        Alternative::TwoSided => ChiSquared::new(1.0).ok()?.sf(statistic),
        Alternative::Greater | Alternative::Less => {
            let direction = if success > expected {
                1.0
            } else if success < expected {
                -1.0
            } else {
                0.0
            };
            let z = direction * statistic.sqrt();
            let normal = Normal::standard();
            if alternative == Alternative::Greater {
                normal.sf(z)
            } else {
                normal.cdf(z)
            }
        }
    };

    Some(ProportionTest { statistic, p_value })
}

fn validate_input<K>(input: &SalienceInput<K>) -> Result<(), GeomediaError> {
    let tolerance = 1e-9 * input.trial.abs().max(1.0);
    if !input.trial.is_finite() || !input.success.is_finite() {
        return Err(GeomediaError::MalformedInput(
            "trial and success must be finite".to_string(),
        ));
    }
    if input.trial < 0.0 || input.success < 0.0 {
        return Err(GeomediaError::MalformedInput(format!(
            "negative mass (trial = {}, success = {})",
            input.trial, input.success
        )));
    }
    if input.success > input.trial + tolerance {
        return Err(GeomediaError::MalformedInput(format!(
            "success {} exceeds trial {}",
            input.success, input.trial
        )));
    }
    Ok(())
}

/// Compute a record for one group.
pub fn analyze_one<K>(input: SalienceInput<K>, params: &SalienceParams) -> SalienceRecord<K> {
    let SalienceInput {
        key,
        trial,
        success,
        null_value,
    } = input;

    let (estimate, salience) = if trial > 0.0 && trial > params.min_sample {
        let estimate = success / trial;
        let salience = null_value.filter(|p| *p > 0.0).map(|p| estimate / p);
        (Some(estimate), salience)
    } else {
        (None, None)
    };

    let test = match null_value {
        Some(p) if trial > 0.0 && trial * p >= params.min_expected => proportion_test(
            success,
            trial,
            p,
            params.alternative,
            params.continuity_correction,
        ),
        _ => None,
    };

    SalienceRecord {
        key,
        trial,
        success,
        null_value,
        estimate,
        salience,
        test_statistic: test.map(|t| t.statistic),
        p_value: test.map(|t| t.p_value),
    }
}

/// Compute salience records for every group, in input order.
pub fn analyze<K>(
    inputs: Vec<SalienceInput<K>>,
    params: &SalienceParams,
) -> Result<Vec<SalienceRecord<K>>, GeomediaError> {
    params.validate()?;
    for input in &inputs {
        validate_input(input)?;
    }

    let records: Vec<SalienceRecord<K>> = inputs
        .into_iter()
        .map(|input| analyze_one(input, params))
        .collect();

    debug!(
        groups = records.len(),
        estimated = records.iter().filter(|r| r.has_estimate()).count(),
        tested = records.iter().filter(|r| r.is_tested()).count(),
        "Salience computed"
    );

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(trial: f64, success: f64, null_value: f64) -> SalienceInput<&'static str> {
        SalienceInput {
            key: "g",
            trial,
            success,
            null_value: Some(null_value),
        }
    }

    fn params(min_sample: f64, min_expected: f64) -> SalienceParams {
        SalienceParams {
            min_sample,
            min_expected,
            ..SalienceParams::default()
        }
    }

    // --- gating tests ---

    #[test]
    fn small_trial_leaves_estimate_unset_regardless_of_success() {
        for success in [0.0, 2.0, 5.0] {
            let r = analyze_one(input(5.0, success, 0.2), &params(20.0, 0.0));
            assert!(r.estimate.is_none());
            assert!(r.salience.is_none());
        }
    }

    #[test]
    fn low_expected_count_leaves_test_unset_but_estimate_set() {
        // trial * null = 2.5 < 5
        let r = analyze_one(input(25.0, 5.0, 0.1), &params(20.0, 5.0));
        assert!(r.test_statistic.is_none());
        assert!(r.p_value.is_none());
        assert!((r.estimate.unwrap() - 0.2).abs() < 1e-12);
        assert!((r.salience.unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn gates_are_independent() {
        // Estimate gated, test not: trial 15 <= min_sample 20, 15 * 0.5 >= 5
        let r = analyze_one(input(15.0, 10.0, 0.5), &params(20.0, 5.0));
        assert!(r.estimate.is_none());
        assert!(r.p_value.is_some());
    }

    #[test]
    fn trial_equal_to_min_sample_is_insufficient() {
        let r = analyze_one(input(20.0, 10.0, 0.25), &params(20.0, 0.0));
        assert!(r.estimate.is_none());
        assert!(r.salience.is_none());

        let r = analyze_one(input(20.5, 10.0, 0.25), &params(20.0, 0.0));
        assert!(r.estimate.is_some());
    }

    #[test]
    fn expected_count_equal_to_min_expected_is_tested() {
        // 20 * 0.25 == 5 exactly
        let r = analyze_one(input(20.0, 10.0, 0.25), &params(0.0, 5.0));
        assert!(r.test_statistic.is_some());
        assert!(r.p_value.is_some());

        let r = analyze_one(input(19.0, 10.0, 0.25), &params(0.0, 5.0));
        assert!(r.p_value.is_none());
    }

    #[test]
    fn zero_trial_short_circuits_both_gates() {
        let r = analyze_one(input(0.0, 0.0, 0.5), &params(0.0, 0.0));
        assert!(r.estimate.is_none());
        assert!(r.salience.is_none());
        assert!(r.p_value.is_none());
    }

    #[test]
    fn undefined_baseline_leaves_salience_and_test_unset() {
        let r = analyze_one(
            SalienceInput {
                key: "g",
                trial: 100.0,
                success: 10.0,
                null_value: None,
            },
            &params(20.0, 5.0),
        );
        assert!((r.estimate.unwrap() - 0.1).abs() < 1e-12);
        assert!(r.salience.is_none());
        assert!(r.p_value.is_none());
    }

    // --- salience sign tests ---

    #[test]
    fn salience_above_one_when_rate_exceeds_baseline() {
        let r = analyze_one(input(100.0, 30.0, 0.2), &params(20.0, 5.0));
        assert!(r.salience.unwrap() > 1.0);
    }

    #[test]
    fn salience_below_one_when_rate_under_baseline() {
        let r = analyze_one(input(100.0, 10.0, 0.2), &params(20.0, 5.0));
        assert!(r.salience.unwrap() < 1.0);
    }

    #[test]
    fn salience_is_one_at_baseline() {
        let r = analyze_one(input(100.0, 20.0, 0.2), &params(20.0, 5.0));
        assert!((r.salience.unwrap() - 1.0).abs() < 1e-12);
    }

    // --- proportion test tests ---

    #[test]
    fn corrected_statistic_matches_hand_computation() {
        // x = 30, n = 100, p = 0.2: |30 - 20| - 0.5 = 9.5; 9.5^2 / 16 = 5.640625
        let t = proportion_test(30.0, 100.0, 0.2, Alternative::Greater, true).unwrap();
        assert!((t.statistic - 5.640625).abs() < 1e-12);
        // z = 2.375, upper tail ~ 0.008774
        assert!((t.p_value - 0.008774).abs() < 1e-5);
    }

    #[test]
    fn uncorrected_statistic_drops_yates_term() {
        let t = proportion_test(30.0, 100.0, 0.2, Alternative::Greater, false).unwrap();
        assert!((t.statistic - 6.25).abs() < 1e-12);
        // z = 2.5
        assert!((t.p_value - 0.0062097).abs() < 1e-6);
    }

    #[test]
    fn one_sided_p_values_are_complementary() {
        let greater = proportion_test(30.0, 100.0, 0.2, Alternative::Greater, true).unwrap();
        let less = proportion_test(30.0, 100.0, 0.2, Alternative::Less, true).unwrap();
        assert!((greater.p_value + less.p_value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn two_sided_p_value_doubles_the_tail() {
        let greater = proportion_test(30.0, 100.0, 0.2, Alternative::Greater, true).unwrap();
        let two = proportion_test(30.0, 100.0, 0.2, Alternative::TwoSided, true).unwrap();
        assert!((two.p_value - 2.0 * greater.p_value).abs() < 1e-9);
    }

    #[test]
    fn rate_at_baseline_has_p_value_one_half() {
        let t = proportion_test(20.0, 100.0, 0.2, Alternative::Greater, true).unwrap();
        assert_eq!(t.statistic, 0.0);
        assert!((t.p_value - 0.5).abs() < 1e-12);
    }

    #[test]
    fn degenerate_baselines_are_not_tested() {
        assert!(proportion_test(5.0, 10.0, 0.0, Alternative::Greater, true).is_none());
        assert!(proportion_test(5.0, 10.0, 1.0, Alternative::Greater, true).is_none());
        assert!(proportion_test(0.0, 0.0, 0.5, Alternative::Greater, true).is_none());
    }

    // --- validation tests ---

    #[test]
    fn success_above_trial_is_rejected() {
        let err = analyze(vec![input(10.0, 11.0, 0.5)], &SalienceParams::default());
        assert!(matches!(err, Err(GeomediaError::MalformedInput(_))));
    }

    #[test]
    fn negative_min_sample_is_rejected() {
        let err = analyze(vec![input(10.0, 1.0, 0.5)], &params(-1.0, 5.0));
        assert!(matches!(err, Err(GeomediaError::InvalidParameter { .. })));
    }

    #[test]
    fn records_follow_input_order() {
        let inputs = vec![
            SalienceInput {
                key: "b",
                trial: 50.0,
                success: 5.0,
                null_value: Some(0.2),
            },
            SalienceInput {
                key: "a",
                trial: 50.0,
                success: 20.0,
                null_value: Some(0.2),
            },
        ];
        let records = analyze(inputs, &SalienceParams::default()).unwrap();
        assert_eq!(records[0].key, "b");
        assert_eq!(records[1].key, "a");
    }
}
