mod common;

use std::sync::Mutex;

use assert_matches::assert_matches;

use kira_archs4::app::{ProgressEvent, ProgressSink, SilentSink};
use kira_archs4::error::KiraError;
use kira_archs4::extract::{ExtractOptions, extract, extract_with_status};
use kira_archs4::source::LocalSource;

use common::{FlakySource, RowLabels, archive, small_archive};

#[derive(Default)]
struct RecordingSink {
    counters: Mutex<Vec<(u64, u64)>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        if let Some(progress) = event.progress {
            self.counters.lock().unwrap().push(progress);
        }
    }
}

#[test]
fn subset_rows_and_columns() {
    let archive = small_archive();
    let table = extract(
        &archive.source(),
        &[0, 2, 4],
        &[1],
        &ExtractOptions::default(),
        &SilentSink,
    )
    .unwrap();

    assert_eq!(table.shape(), (1, 3));
    assert_eq!(table.rows(), ["A2"]);
    assert_eq!(table.columns(), ["GSM1", "GSM3", "GSM5"]);
    let row: Vec<u32> = table.values().row(0).to_vec();
    assert_eq!(
        row,
        vec![archive.value(1, 0), archive.value(1, 2), archive.value(1, 4)]
    );
}

#[test]
fn empty_gene_set_means_all_genes() {
    let archive = small_archive();
    let table = extract(
        &archive.source(),
        &[3, 1],
        &[],
        &ExtractOptions::default(),
        &SilentSink,
    )
    .unwrap();
    assert_eq!(table.shape(), (3, 2));
    assert_eq!(table.rows(), archive.genes.as_slice());
    assert_eq!(table.columns(), ["GSM2", "GSM4"]);
    assert_eq!(table.get("A3", "GSM4"), Some(&archive.value(2, 3)));
}

#[test]
fn input_order_and_duplicates_do_not_matter() {
    let archive = archive(4, 12, RowLabels::Symbol);
    let source = archive.source();
    let options = ExtractOptions::default();
    let a = extract(&source, &[5, 2, 9], &[3, 0], &options, &SilentSink).unwrap();
    let b = extract(&source, &[9, 5, 2, 5], &[0, 3, 3], &options, &SilentSink).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.columns(), ["GSM3", "GSM6", "GSM10"]);
    assert_eq!(a.rows(), ["A1", "A4"]);
}

#[test]
fn repeated_calls_are_identical() {
    let archive = small_archive();
    let source = archive.source();
    let options = ExtractOptions { workers: Some(2) };
    let first = extract(&source, &[0, 1, 2, 3, 4], &[], &options, &SilentSink).unwrap();
    let second = extract(&source, &[0, 1, 2, 3, 4], &[], &options, &SilentSink).unwrap();
    assert_eq!(first, second);
}

#[test]
fn empty_sample_set_skips_expression_reads() {
    let archive = small_archive();
    let source = FlakySource::new(archive.source(), []);
    let table = extract(
        &source,
        &[],
        &[0, 2],
        &ExtractOptions::default(),
        &SilentSink,
    )
    .unwrap();
    assert_eq!(table.shape(), (2, 0));
    assert_eq!(table.rows(), ["A1", "A3"]);
    assert!(table.columns().is_empty());
    assert_eq!(source.column_reads(), 0);
}

#[test]
fn failed_column_is_zero_filled() {
    let archive = archive(3, 13, RowLabels::Symbol);
    let source = FlakySource::new(archive.source(), [7]);
    let extraction = extract_with_status(
        &source,
        &[12, 7, 3],
        &[],
        &ExtractOptions::default(),
        &SilentSink,
    )
    .unwrap();

    let table = &extraction.table;
    assert_eq!(table.columns(), ["GSM4", "GSM8", "GSM13"]);
    assert!(table.column("GSM8").unwrap().iter().all(|v| *v == 0));
    for gene in 0..3 {
        assert_eq!(table.values()[(gene, 0)], archive.value(gene, 3));
        assert_eq!(table.values()[(gene, 2)], archive.value(gene, 12));
    }
    assert_eq!(extraction.fetched, vec![true, false, true]);
    assert!(!extraction.is_complete());
    assert_eq!(extraction.failed_samples(), vec!["GSM8"]);
}

#[test]
fn remote_pool_size_still_fills_every_column() {
    let archive = archive(2, 9, RowLabels::Symbol);
    let source = FlakySource::new(archive.source(), [0, 8]).as_remote();
    let extraction = extract_with_status(
        &source,
        &(0..9).collect::<Vec<_>>(),
        &[],
        &ExtractOptions::default(),
        &SilentSink,
    )
    .unwrap();
    assert_eq!(extraction.table.shape(), (2, 9));
    assert_eq!(extraction.failed_samples(), vec!["GSM1", "GSM9"]);
    assert_eq!(source.column_reads(), 9);
}

#[test]
fn progress_counts_every_column() {
    let archive = small_archive();
    let sink = RecordingSink::default();
    extract(
        &archive.source(),
        &[0, 1, 4],
        &[],
        &ExtractOptions { workers: Some(1) },
        &sink,
    )
    .unwrap();
    let counters = sink.counters.lock().unwrap();
    assert_eq!(counters.as_slice(), [(1, 3), (2, 3), (3, 3)]);
}

#[test]
fn row_labels_prefer_gene_symbol() {
    let archive = archive(3, 2, RowLabels::Both);
    let table = extract(
        &archive.source(),
        &[0],
        &[],
        &ExtractOptions::default(),
        &SilentSink,
    )
    .unwrap();
    assert_eq!(table.rows(), archive.genes.as_slice());
    assert!(table.rows().iter().all(|row| !row.starts_with("SYM")));
}

#[test]
fn gene_symbol_alone_labels_rows() {
    let archive = archive(3, 2, RowLabels::GeneSymbol);
    let table = extract(
        &archive.source(),
        &[1],
        &[],
        &ExtractOptions::default(),
        &SilentSink,
    )
    .unwrap();
    assert_eq!(table.rows(), archive.genes.as_slice());
}

#[test]
fn row_labels_fall_back_to_transcripts() {
    let archive = archive(3, 2, RowLabels::Transcripts);
    let table = extract(
        &archive.source(),
        &[1],
        &[2],
        &ExtractOptions::default(),
        &SilentSink,
    )
    .unwrap();
    assert_eq!(table.rows(), ["A3"]);
    assert_eq!(table.values()[(0, 0)], archive.value(2, 1));
}

#[test]
fn missing_row_labels_fail_before_any_read() {
    let archive = archive(3, 2, RowLabels::Missing);
    let source = FlakySource::new(archive.source(), []);
    let err = extract(
        &source,
        &[0, 1],
        &[],
        &ExtractOptions::default(),
        &SilentSink,
    )
    .unwrap_err();
    assert_matches!(err, KiraError::SchemaNotFound(_));
    assert_eq!(source.column_reads(), 0);
}

#[test]
fn out_of_range_indices_are_rejected() {
    let archive = small_archive();
    let source = archive.source();
    let options = ExtractOptions::default();

    let err = extract(&source, &[0, 5], &[], &options, &SilentSink).unwrap_err();
    assert_matches!(err, KiraError::SampleIndexOutOfRange { index: 5, len: 5 });

    let err = extract(&source, &[0], &[3], &options, &SilentSink).unwrap_err();
    assert_matches!(err, KiraError::GeneIndexOutOfRange { index: 3, len: 3 });
}

#[test]
fn unreadable_source_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let source = LocalSource::new(dir.path().join("absent.h5"));
    let err = extract(
        &source,
        &[0],
        &[],
        &ExtractOptions::default(),
        &SilentSink,
    )
    .unwrap_err();
    assert_matches!(err, KiraError::SourceUnavailable { .. });
}
