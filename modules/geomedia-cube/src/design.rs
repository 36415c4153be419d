//! Design matrix for the row + column fixed-effects model.
//!
//! Treatment coding: an intercept, one indicator per row level and one per
//! column level, with the first (sorted) level of each factor as reference
//! and therefore dropped.

use std::collections::BTreeSet;

use nalgebra::DMatrix;

use crate::interaction::InteractionCell;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesignColumn {
    Intercept,
    Row(String),
    Col(String),
}

impl std::fmt::Display for DesignColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DesignColumn::Intercept => write!(f, "(intercept)"),
            DesignColumn::Row(level) => write!(f, "row:{level}"),
            DesignColumn::Col(level) => write!(f, "col:{level}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    pub columns: Vec<DesignColumn>,
    /// One row per cell, in input order.
    pub matrix: DMatrix<f64>,
    pub row_levels: Vec<String>,
    pub col_levels: Vec<String>,
}

impl DesignMatrix {
    pub fn from_cells(cells: &[InteractionCell]) -> Self {
        let row_levels: Vec<String> = cells
            .iter()
            .map(|c| c.row.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let col_levels: Vec<String> = cells
            .iter()
            .map(|c| c.col.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut columns = vec![DesignColumn::Intercept];
        columns.extend(row_levels.iter().skip(1).cloned().map(DesignColumn::Row));
        columns.extend(col_levels.iter().skip(1).cloned().map(DesignColumn::Col));

        // Offsets of the first non-reference indicator of each factor.
        let row_offset = 1;
        let col_offset = row_offset + row_levels.len().saturating_sub(1);

        let mut matrix = DMatrix::zeros(cells.len(), columns.len());
        for (n, cell) in cells.iter().enumerate() {
            matrix[(n, 0)] = 1.0;
            if let Ok(level) = row_levels.binary_search(&cell.row) {
                if level > 0 {
                    matrix[(n, row_offset + level - 1)] = 1.0;
                }
            }
            if let Ok(level) = col_levels.binary_search(&cell.col) {
                if level > 0 {
                    matrix[(n, col_offset + level - 1)] = 1.0;
                }
            }
        }

        Self {
            columns,
            matrix,
            row_levels,
            col_levels,
        }
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }
}
