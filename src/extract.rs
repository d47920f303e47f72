//! Indexed subset extraction.
//!
//! Reads the requested sample columns of `data/expression` on a bounded
//! worker pool. Every worker opens its own handle through the source, so a
//! failed column only affects its own slot: it is logged and zero-filled while
//! the rest of the table is assembled normally.

use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::SourceKind;
use crate::error::KiraError;
use crate::schema::resolve_row_labels;
use crate::source::{ExpressionSource, SAMPLE_ACCESSIONS};
use crate::table::ExpressionTable;

pub const LOCAL_WORKERS: usize = 16;
pub const REMOTE_WORKERS: usize = 4;

#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Overrides the per-source default pool size.
    pub workers: Option<usize>,
}

impl ExtractOptions {
    pub fn worker_count(&self, kind: SourceKind) -> usize {
        let default = match kind {
            SourceKind::Local => LOCAL_WORKERS,
            SourceKind::Remote => REMOTE_WORKERS,
        };
        self.workers.unwrap_or(default).max(1)
    }
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub table: ExpressionTable,
    /// `fetched[k]` is false when column `k` was zero-filled after a read failure.
    pub fetched: Vec<bool>,
}

impl Extraction {
    pub fn is_complete(&self) -> bool {
        self.fetched.iter().all(|ok| *ok)
    }

    pub fn failed_samples(&self) -> Vec<&str> {
        self.table
            .columns()
            .iter()
            .zip(&self.fetched)
            .filter(|(_, ok)| !**ok)
            .map(|(label, _)| label.as_str())
            .collect()
    }
}

/// Sorted, de-duplicated copy of a caller index set.
pub fn normalize_indices(indices: &[usize]) -> Vec<usize> {
    let mut out = indices.to_vec();
    out.sort_unstable();
    out.dedup();
    out
}

pub fn extract(
    source: &dyn ExpressionSource,
    sample_idx: &[usize],
    gene_idx: &[usize],
    options: &ExtractOptions,
    sink: &dyn ProgressSink,
) -> Result<ExpressionTable, KiraError> {
    extract_with_status(source, sample_idx, gene_idx, options, sink).map(|ex| ex.table)
}

pub fn extract_with_status(
    source: &dyn ExpressionSource,
    sample_idx: &[usize],
    gene_idx: &[usize],
    options: &ExtractOptions,
    sink: &dyn ProgressSink,
) -> Result<Extraction, KiraError> {
    let samples = normalize_indices(sample_idx);
    let requested_genes = normalize_indices(gene_idx);
    let source_id = source.describe();

    // Labels are read once, on a single handle, before any column work starts.
    let (gene_labels, accessions) = {
        let handle = source.open()?;
        let schema = resolve_row_labels(handle.as_ref(), &source_id)?;
        let genes = handle.read_strings(schema.path())?;
        let accessions = handle.read_strings(SAMPLE_ACCESSIONS)?;
        (genes, accessions)
    };

    if let Some(&index) = requested_genes.iter().find(|&&i| i >= gene_labels.len()) {
        return Err(KiraError::GeneIndexOutOfRange {
            index,
            len: gene_labels.len(),
        });
    }
    if let Some(&index) = samples.iter().find(|&&i| i >= accessions.len()) {
        return Err(KiraError::SampleIndexOutOfRange {
            index,
            len: accessions.len(),
        });
    }

    let rows: Vec<usize> = if requested_genes.is_empty() {
        (0..gene_labels.len()).collect()
    } else {
        requested_genes
    };
    let row_labels: Vec<String> = rows.iter().map(|&i| gene_labels[i].clone()).collect();
    let column_labels: Vec<String> = samples.iter().map(|&i| accessions[i].clone()).collect();

    if samples.is_empty() {
        return Ok(Extraction {
            table: ExpressionTable::new(row_labels, column_labels, Array2::zeros((rows.len(), 0))),
            fetched: Vec::new(),
        });
    }

    let workers = options.worker_count(source.kind()).min(samples.len());
    debug!(
        source = %source_id,
        samples = samples.len(),
        genes = rows.len(),
        workers,
        "extracting columns"
    );
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("kira-archs4-fetch-{i}"))
        .build()
        .map_err(|err| KiraError::Filesystem(format!("failed to create worker pool: {err}")))?;

    let total = samples.len() as u64;
    let completed = AtomicUsize::new(0);
    // `collect` on an indexed parallel iterator keeps input order, so slot k
    // always belongs to samples[k] whatever the completion order.
    let columns: Vec<Option<Vec<u32>>> = pool.install(|| {
        samples
            .par_iter()
            .map(|&sample| {
                let column = match fetch_column(source, sample, &rows) {
                    Ok(values) => Some(values),
                    Err(err) => {
                        warn!(
                            source = %source_id,
                            sample,
                            error = %err,
                            "column fetch failed; substituting zeros"
                        );
                        None
                    }
                };
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                sink.event(ProgressEvent::counter("fetch", done as u64, total));
                column
            })
            .collect()
    });

    let mut values = Array2::<u32>::zeros((rows.len(), samples.len()));
    let mut fetched = Vec::with_capacity(samples.len());
    for (k, column) in columns.into_iter().enumerate() {
        match column {
            Some(column) => {
                values.column_mut(k).assign(&ArrayView1::from(&column));
                fetched.push(true);
            }
            None => fetched.push(false),
        }
    }

    Ok(Extraction {
        table: ExpressionTable::new(row_labels, column_labels, values),
        fetched,
    })
}

fn fetch_column(
    source: &dyn ExpressionSource,
    sample: usize,
    rows: &[usize],
) -> Result<Vec<u32>, KiraError> {
    let handle = source.open()?;
    let column = handle.read_column(sample)?;
    rows.iter()
        .map(|&row| {
            column.get(row).copied().ok_or_else(|| {
                KiraError::Hdf5(format!(
                    "column {sample} has {} rows, row {row} requested",
                    column.len()
                ))
            })
        })
        .collect()
}
