//! Independence null model for the interaction table.
//!
//! `F_ij ~ Poisson(mu_ij)`, `log mu_ij = a + r_i + c_j`, fitted by iteratively
//! reweighted least squares on the explicit design matrix. The fitted `mu_ij`
//! is the expected co-occurrence if row and column entities interacted only
//! through their marginal propensities.

use nalgebra::{DMatrix, DVector};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use geomedia_common::{GeomediaError, NullModelParams};

use crate::design::DesignMatrix;
use crate::interaction::InteractionCell;

/// Observed and expected co-occurrence of one pair, with residuals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResidualCell {
    pub row: String,
    pub col: String,
    /// F_ij
    pub observed: f64,
    /// E_ij
    pub expected: f64,
    pub abs_residual: f64,
    pub rel_residual: f64,
    /// sign(F - E) * (F - E)^2 / E
    pub chi_residual: f64,
}

impl ResidualCell {
    fn new(cell: &InteractionCell, expected: f64) -> Self {
        let abs_residual = cell.weight - expected;
        Self {
            row: cell.row.clone(),
            col: cell.col.clone(),
            observed: cell.weight,
            expected,
            abs_residual,
            rel_residual: cell.weight / expected,
            chi_residual: abs_residual.signum() * abs_residual.powi(2) / expected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Coefficient {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NullModel {
    /// Cells the model was fitted on.
    pub cells: usize,
    pub coefficients: Vec<Coefficient>,
    pub deviance: f64,
    pub null_deviance: f64,
    pub iterations: usize,
    pub converged: bool,
    /// Sorted by `chi_residual` descending; `None` when not requested.
    pub residuals: Option<Vec<ResidualCell>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NullModelOutcome {
    Fitted(NullModel),
    /// The table was larger than `max_size`; no fit was attempted.
    SizeExceeded { cells: usize, max_size: usize },
    /// No cells left to fit.
    Empty,
    /// The data admit no finite fit (all-zero table, singular system).
    Degenerate { reason: String },
}

impl NullModelOutcome {
    pub fn model(&self) -> Option<&NullModel> {
        match self {
            NullModelOutcome::Fitted(model) => Some(model),
            _ => None,
        }
    }

    pub fn residuals(&self) -> Option<&[ResidualCell]> {
        self.model()?.residuals.as_deref()
    }
}

/// Raw output of the IRLS loop.
#[derive(Debug, Clone)]
pub struct PoissonFit {
    pub coefficients: DVector<f64>,
    pub fitted: DVector<f64>,
    pub deviance: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Poisson deviance; a zero observation contributes `2 * mu`.
pub fn poisson_deviance(y: &[f64], mu: &[f64]) -> f64 {
    2.0 * y
        .iter()
        .zip(mu)
        .map(|(&y, &mu)| {
            let log_term = if y > 0.0 { y * (y / mu).ln() } else { 0.0 };
            log_term - (y - mu)
        })
        .sum::<f64>()
}

fn solve_normal_equations(xtwx: DMatrix<f64>, xtwz: &DVector<f64>) -> Option<DVector<f64>> {
    match xtwx.clone().cholesky() {
        Some(chol) => Some(chol.solve(xtwz)),
        None => xtwx.lu().solve(xtwz),
    }
}

/// Fit a log-link Poisson GLM by IRLS. `None` when the weighted normal
/// equations are singular.
pub fn fit_poisson(
    design: &DMatrix<f64>,
    y: &[f64],
    max_iterations: usize,
    tolerance: f64,
) -> Option<PoissonFit> {
    let n = y.len();
    let mut mu: Vec<f64> = y.iter().map(|v| v + 0.1).collect();
    let mut eta: Vec<f64> = mu.iter().map(|m| m.ln()).collect();
    let mut deviance = poisson_deviance(y, &mu);
    let mut coefficients = DVector::zeros(design.ncols());
    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iterations {
        iterations += 1;

        // Working response and weights for the log link.
        let z = DVector::from_iterator(n, (0..n).map(|i| eta[i] + (y[i] - mu[i]) / mu[i]));
        let mut weighted = design.clone();
        for (i, w) in mu.iter().enumerate() {
            weighted.row_mut(i).scale_mut(*w);
        }
        let xtwx = design.transpose() * &weighted;
        let xtwz = weighted.transpose() * &z;

        coefficients = solve_normal_equations(xtwx, &xtwz)?;

        let linear = design * &coefficients;
        eta = linear.iter().copied().collect();
        mu = eta.iter().map(|e| e.exp()).collect();

        let previous = deviance;
        deviance = poisson_deviance(y, &mu);
        debug!(iteration = iterations, deviance, "IRLS step");

        if (deviance - previous).abs() / (deviance.abs() + 0.1) < tolerance {
            converged = true;
            break;
        }
    }

    Some(PoissonFit {
        coefficients,
        fitted: DVector::from_vec(mu),
        deviance,
        iterations,
        converged,
    })
}

fn validate_cells(cells: &[InteractionCell]) -> Result<(), GeomediaError> {
    for cell in cells {
        if !cell.weight.is_finite() || cell.weight < 0.0 {
            return Err(GeomediaError::MalformedInput(format!(
                "interaction ({}, {}) has invalid weight {}",
                cell.row, cell.col, cell.weight
            )));
        }
    }
    Ok(())
}

/// Fit the independence model to interaction triples and derive residuals.
pub fn estimate(
    cells: &[InteractionCell],
    params: &NullModelParams,
) -> Result<NullModelOutcome, GeomediaError> {
    params.validate()?;
    validate_cells(cells)?;

    if cells.len() > params.max_size {
        warn!(
            cells = cells.len(),
            max_size = params.max_size,
            "Interaction table too large, null model skipped"
        );
        return Ok(NullModelOutcome::SizeExceeded {
            cells: cells.len(),
            max_size: params.max_size,
        });
    }

    let cells: Vec<InteractionCell> = cells
        .iter()
        .filter(|c| !(params.exclude_diagonal && c.is_diagonal()))
        .cloned()
        .collect();

    if cells.is_empty() {
        info!("No interaction cells to fit");
        return Ok(NullModelOutcome::Empty);
    }

    let y: Vec<f64> = cells.iter().map(|c| c.weight).collect();
    let total: f64 = y.iter().sum();
    if total <= 0.0 {
        return Ok(NullModelOutcome::Degenerate {
            reason: "every interaction cell is zero".to_string(),
        });
    }

    let design = DesignMatrix::from_cells(&cells);
    let Some(fit) = fit_poisson(&design.matrix, &y, params.max_iterations, params.tolerance)
    else {
        warn!(cells = cells.len(), "Null model normal equations are singular");
        return Ok(NullModelOutcome::Degenerate {
            reason: "singular design".to_string(),
        });
    };

    if !fit.converged {
        warn!(
            iterations = fit.iterations,
            deviance = fit.deviance,
            "Null model did not converge"
        );
    }

    let mean = total / y.len() as f64;
    let null_deviance = poisson_deviance(&y, &vec![mean; y.len()]);

    let coefficients = design
        .columns
        .iter()
        .zip(fit.coefficients.iter())
        .map(|(column, value)| Coefficient {
            name: column.to_string(),
            value: *value,
        })
        .collect();

    let residuals = params.residuals.then(|| {
        let mut residuals: Vec<ResidualCell> = cells
            .iter()
            .zip(fit.fitted.iter())
            .map(|(cell, expected)| ResidualCell::new(cell, *expected))
            .collect();
        residuals.sort_by(|a, b| {
            b.chi_residual
                .total_cmp(&a.chi_residual)
                .then_with(|| a.row.cmp(&b.row))
                .then_with(|| a.col.cmp(&b.col))
        });
        residuals
    });

    info!(
        cells = cells.len(),
        parameters = design.ncols(),
        iterations = fit.iterations,
        deviance = fit.deviance,
        null_deviance,
        "Null model fitted"
    );

    Ok(NullModelOutcome::Fitted(NullModel {
        cells: cells.len(),
        coefficients,
        deviance: fit.deviance,
        null_deviance,
        iterations: fit.iterations,
        converged: fit.converged,
        residuals,
    }))
}
