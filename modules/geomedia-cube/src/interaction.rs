//! Interaction matrix between the two geographic roles.
//!
//! Thresholding runs as a single pass by default: row and column masses are
//! measured on the full matrix and both cuts apply at once, then binarized
//! degrees are measured on the survivors and both degree cuts apply at once.
//! A row that passed its own cut can therefore end up under threshold once
//! correlated columns are gone. `MatrixThresholds::iterative` repeats the
//! pass until nothing changes.

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::DMatrix;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use geomedia_common::{GeomediaError, MatrixThresholds, Measure};

use crate::hypercube::Hypercube;

/// Summed co-occurrence weight between a row entity and a column entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InteractionCell {
    pub row: String,
    pub col: String,
    pub weight: f64,
}

impl InteractionCell {
    pub fn new(row: impl Into<String>, col: impl Into<String>, weight: f64) -> Self {
        Self {
            row: row.into(),
            col: col.into(),
            weight,
        }
    }

    pub fn is_diagonal(&self) -> bool {
        self.row == self.col
    }
}

/// Dense matrix with sorted row and column labels.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionMatrix {
    pub rows: Vec<String>,
    pub cols: Vec<String>,
    pub values: DMatrix<f64>,
}

impl InteractionMatrix {
    /// Sum cells into a dense matrix; missing cells are zero.
    pub fn from_cells(cells: &[InteractionCell]) -> Self {
        let rows: Vec<String> = cells
            .iter()
            .map(|c| c.row.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let cols: Vec<String> = cells
            .iter()
            .map(|c| c.col.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let row_index: BTreeMap<&str, usize> =
            rows.iter().enumerate().map(|(i, r)| (r.as_str(), i)).collect();
        let col_index: BTreeMap<&str, usize> =
            cols.iter().enumerate().map(|(j, c)| (c.as_str(), j)).collect();

        let mut values = DMatrix::zeros(rows.len(), cols.len());
        for cell in cells {
            let i = row_index[cell.row.as_str()];
            let j = col_index[cell.col.as_str()];
            values[(i, j)] += cell.weight;
        }

        Self { rows, cols, values }
    }

    /// Pair every tagged geo A value with every tagged geo B value of the cube.
    pub fn from_hypercube(cube: &Hypercube, measure: Measure) -> Self {
        let cells: Vec<InteractionCell> = cube
            .rows
            .iter()
            .filter_map(|row| {
                let (a, b) = (row.geo_a.as_value()?, row.geo_b.as_value()?);
                let weight = match measure {
                    Measure::NewsWeight => row.news_weight,
                    Measure::TagCount => row.tag_count as f64,
                };
                Some(InteractionCell::new(a, b, weight))
            })
            .collect();
        Self::from_cells(&cells)
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.cols.len())
    }

    pub fn row_sums(&self) -> Vec<f64> {
        (0..self.values.nrows()).map(|i| self.values.row(i).sum()).collect()
    }

    pub fn col_sums(&self) -> Vec<f64> {
        (0..self.values.ncols()).map(|j| self.values.column(j).sum()).collect()
    }

    /// Count of cells at or above `k`, per row and per column.
    pub fn binary_degrees(&self, k: f64) -> (Vec<usize>, Vec<usize>) {
        let binary = self.values.map(|v| usize::from(v >= k));
        let rows = (0..binary.nrows()).map(|i| binary.row(i).sum()).collect();
        let cols = (0..binary.ncols()).map(|j| binary.column(j).sum()).collect();
        (rows, cols)
    }

    fn select(&self, keep_rows: &[usize], keep_cols: &[usize]) -> Self {
        let values = self
            .values
            .select_rows(keep_rows.iter())
            .select_columns(keep_cols.iter());
        Self {
            rows: keep_rows.iter().map(|&i| self.rows[i].clone()).collect(),
            cols: keep_cols.iter().map(|&j| self.cols[j].clone()).collect(),
            values,
        }
    }

    /// Long-form triples in row-major label order, zeros included.
    pub fn melt(&self) -> Vec<InteractionCell> {
        let mut cells = Vec::with_capacity(self.rows.len() * self.cols.len());
        for (i, row) in self.rows.iter().enumerate() {
            for (j, col) in self.cols.iter().enumerate() {
                cells.push(InteractionCell::new(row.clone(), col.clone(), self.values[(i, j)]));
            }
        }
        cells
    }
}

fn indices_where<T>(values: &[T], keep: impl Fn(&T) -> bool) -> Vec<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| keep(v))
        .map(|(i, _)| i)
        .collect()
}

fn threshold_pass(matrix: &InteractionMatrix, t: &MatrixThresholds) -> InteractionMatrix {
    let rows = indices_where(&matrix.row_sums(), |s| *s >= t.s1);
    let cols = indices_where(&matrix.col_sums(), |s| *s >= t.s2);
    let massive = matrix.select(&rows, &cols);

    let (row_degrees, col_degrees) = massive.binary_degrees(t.k);
    let rows = indices_where(&row_degrees, |d| *d >= t.n1);
    let cols = indices_where(&col_degrees, |d| *d >= t.n2);
    massive.select(&rows, &cols)
}

/// Apply mass and degree thresholds to a matrix.
pub fn threshold(
    matrix: &InteractionMatrix,
    t: &MatrixThresholds,
) -> Result<InteractionMatrix, GeomediaError> {
    t.validate()?;

    let mut current = threshold_pass(matrix, t);
    let mut passes = 1;
    while t.iterative {
        let next = threshold_pass(&current, t);
        if next.shape() == current.shape() {
            break;
        }
        current = next;
        passes += 1;
    }

    info!(
        input_rows = matrix.rows.len(),
        input_cols = matrix.cols.len(),
        rows = current.rows.len(),
        cols = current.cols.len(),
        passes,
        "Interaction matrix thresholded"
    );
    Ok(current)
}

/// Matrix from the cube, thresholded and melted into triples.
pub fn build_interactions(
    cube: &Hypercube,
    t: &MatrixThresholds,
) -> Result<Vec<InteractionCell>, GeomediaError> {
    let matrix = InteractionMatrix::from_hypercube(cube, t.measure);
    Ok(threshold(&matrix, t)?.melt())
}
