use tracing::debug;

use geomedia_common::{GeomediaError, HypercubeFilter};

use crate::hypercube::{Hypercube, HypercubeRow};

/// Whether a single row passes every rule of the filter.
pub fn matches(filter: &HypercubeFilter, row: &HypercubeRow) -> bool {
    if filter.start.is_some_and(|start| row.bucket < start) {
        return false;
    }
    if filter.end.is_some_and(|end| row.bucket > end) {
        return false;
    }
    if !filter.source.admits(Some(row.source.as_str())) {
        return false;
    }
    if !filter.geo_a.admits(row.geo_a.as_value()) {
        return false;
    }
    if !filter.geo_b.admits(row.geo_b.as_value()) {
        return false;
    }
    // Two untagged values are not an entity pair.
    if !filter.self_pairs && row.geo_a.is_tagged() && row.geo_a == row.geo_b {
        return false;
    }
    true
}

/// Rows of `cube` that pass `filter`, as a new cube. The input is untouched.
pub fn apply(filter: &HypercubeFilter, cube: &Hypercube) -> Result<Hypercube, GeomediaError> {
    filter.validate()?;

    let rows: Vec<HypercubeRow> = cube
        .rows
        .iter()
        .filter(|row| matches(filter, row))
        .cloned()
        .collect();

    debug!(
        input = cube.rows.len(),
        kept = rows.len(),
        "Hypercube filter applied"
    );

    Ok(cube.with_rows(rows))
}
