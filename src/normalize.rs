use ndarray::{Array2, Axis};

use crate::domain::NormalizationMethod;
use crate::table::{ExpressionTable, NormalizedTable};

/// Share of each tail dropped before averaging log counts in TMM.
pub const TMM_TRIM: f64 = 0.3;

pub fn normalize(counts: &ExpressionTable, method: NormalizationMethod) -> NormalizedTable {
    let raw = counts.values().mapv(f64::from);
    let values = match method {
        NormalizationMethod::Quantile => quantile(&raw),
        NormalizationMethod::LogQuantile => quantile(&raw.mapv(|x| (1.0 + x).log2())),
        NormalizationMethod::Cpm => cpm(&raw),
        NormalizationMethod::Tmm => tmm(&raw),
    };
    counts.with_values(values.mapv(|x| x as f32))
}

/// Quantile normalization; tied values share the mean of their reference quantiles.
pub fn quantile(values: &Array2<f64>) -> Array2<f64> {
    let (nrows, ncols) = values.dim();
    if nrows == 0 || ncols == 0 {
        return values.clone();
    }

    let orders: Vec<Vec<usize>> = values
        .axis_iter(Axis(1))
        .map(|col| {
            let mut order: Vec<usize> = (0..nrows).collect();
            order.sort_by(|&a, &b| col[a].total_cmp(&col[b]));
            order
        })
        .collect();

    let mut reference = vec![0.0f64; nrows];
    for (j, order) in orders.iter().enumerate() {
        for (rank, &row) in order.iter().enumerate() {
            reference[rank] += values[(row, j)];
        }
    }
    for value in reference.iter_mut() {
        *value /= ncols as f64;
    }

    let mut out = Array2::<f64>::zeros((nrows, ncols));
    for (j, order) in orders.iter().enumerate() {
        let mut start = 0;
        while start < nrows {
            let tie = values[(order[start], j)];
            let mut end = start + 1;
            while end < nrows && values[(order[end], j)] == tie {
                end += 1;
            }
            let mean = reference[start..end].iter().sum::<f64>() / (end - start) as f64;
            for &row in &order[start..end] {
                out[(row, j)] = mean;
            }
            start = end;
        }
    }
    out
}

/// Counts per million; an all-zero sample stays zero.
pub fn cpm(values: &Array2<f64>) -> Array2<f64> {
    let mut out = values.clone();
    for mut col in out.axis_iter_mut(Axis(1)) {
        let total: f64 = col.sum();
        if total > 0.0 {
            col.mapv_inplace(|x| (x / total).abs() * 1_000_000.0);
        }
    }
    out
}

/// Per-sample scale factors from the trimmed mean of log2 non-zero counts.
pub fn tmm_factors(values: &Array2<f64>) -> Vec<f64> {
    let logs: Vec<Option<f64>> = values
        .axis_iter(Axis(1))
        .map(|col| {
            let mut nonzero: Vec<f64> =
                col.iter().filter(|x| **x > 0.0).map(|x| x.log2()).collect();
            if nonzero.is_empty() {
                return None;
            }
            nonzero.sort_by(f64::total_cmp);
            let cut = (nonzero.len() as f64 * TMM_TRIM).floor() as usize;
            let kept = &nonzero[cut..nonzero.len() - cut];
            Some(kept.iter().sum::<f64>() / kept.len() as f64)
        })
        .collect();

    let present: Vec<f64> = logs.iter().flatten().copied().collect();
    if present.is_empty() {
        return vec![1.0; logs.len()];
    }
    let center = present.iter().sum::<f64>() / present.len() as f64;
    logs.into_iter()
        .map(|log| log.map(|l| (l - center).exp2()).unwrap_or(1.0))
        .collect()
}

pub fn tmm(values: &Array2<f64>) -> Array2<f64> {
    let factors = tmm_factors(values);
    let mut out = values.clone();
    for (mut col, factor) in out.axis_iter_mut(Axis(1)).zip(factors) {
        col.mapv_inplace(|x| x / factor);
    }
    out
}
