#![allow(dead_code)]

pub mod server;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use hdf5::File;
use hdf5::types::VarLenUnicode;
use ndarray::{Array1, Array2};
use tempfile::TempDir;

use kira_archs4::domain::SourceKind;
use kira_archs4::error::KiraError;
use kira_archs4::source::{ExpressionHandle, ExpressionSource, LocalSource, NodeEntry};

/// Where the row labels live in a generated archive.
#[derive(Debug, Clone, Copy)]
pub enum RowLabels {
    GeneSymbol,
    Symbol,
    /// Both `gene_symbol` and `symbol`; `symbol` holds `SYM<g>` instead of the gene names.
    Both,
    Transcripts,
    Missing,
}

pub struct Archive {
    pub dir: TempDir,
    pub path: PathBuf,
    pub genes: Vec<String>,
    pub samples: Vec<String>,
}

impl Archive {
    /// Cell `(g, s)` holds `100 * g + s + 1`.
    pub fn value(&self, gene: usize, sample: usize) -> u32 {
        (100 * gene + sample + 1) as u32
    }

    pub fn source(&self) -> LocalSource {
        LocalSource::new(&self.path)
    }
}

const TITLES: [&str; 5] = [
    "Liver tissue",
    "Kidney cortex",
    "T-cell line",
    "liver biopsy",
    "Brain, frontal",
];
const SERIES: [&str; 5] = ["GSE1", "GSE1", "GSE2", "GSE2", "GSE3"];
const SINGLE_CELL: [f64; 5] = [0.1, 0.9, 0.2, 0.7, 0.0];

/// The five-sample, three-gene archive used across the integration tests.
pub fn small_archive() -> Archive {
    archive(3, 5, RowLabels::Symbol)
}

pub fn archive(genes: usize, samples: usize, labels: RowLabels) -> Archive {
    build(genes, samples, labels, false)
}

/// Same layout, but the matrix is stored in 2 x 2 chunks with shuffle and
/// fletcher32 filters.
pub fn chunked_archive(genes: usize, samples: usize) -> Archive {
    build(genes, samples, RowLabels::Symbol, true)
}

fn build(genes: usize, samples: usize, labels: RowLabels, chunked: bool) -> Archive {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("archive.h5");
    let gene_names: Vec<String> = (1..=genes).map(|g| format!("A{g}")).collect();
    let accessions: Vec<String> = (1..=samples).map(|s| format!("GSM{s}")).collect();
    write_archive(&path, &gene_names, &accessions, labels, chunked);
    Archive {
        dir,
        path,
        genes: gene_names,
        samples: accessions,
    }
}

fn strings<S: AsRef<str>>(values: &[S]) -> Array1<VarLenUnicode> {
    values
        .iter()
        .map(|v| VarLenUnicode::from_str(v.as_ref()).unwrap())
        .collect()
}

fn cycle<'a>(values: &[&'a str], len: usize) -> Vec<&'a str> {
    (0..len).map(|i| values[i % values.len()]).collect()
}

fn write_archive(
    path: &Path,
    genes: &[String],
    samples: &[String],
    labels: RowLabels,
    chunked: bool,
) {
    let file = File::create(path).unwrap();
    let meta = file.create_group("meta").unwrap();

    let sample_group = meta.create_group("samples").unwrap();
    sample_group
        .new_dataset_builder()
        .with_data(&strings(samples))
        .create("geo_accession")
        .unwrap();
    sample_group
        .new_dataset_builder()
        .with_data(&strings(&cycle(&SERIES, samples.len())))
        .create("series_id")
        .unwrap();
    sample_group
        .new_dataset_builder()
        .with_data(&strings(&cycle(&TITLES, samples.len())))
        .create("title")
        .unwrap();
    sample_group
        .new_dataset_builder()
        .with_data(&strings(&cycle(&["Homo sapiens"], samples.len())))
        .create("organism_ch1")
        .unwrap();
    let probabilities: Array1<f64> = (0..samples.len())
        .map(|i| SINGLE_CELL[i % SINGLE_CELL.len()])
        .collect();
    sample_group
        .new_dataset_builder()
        .with_data(&probabilities)
        .create("singlecellprobability")
        .unwrap();

    let gene_group = meta.create_group("genes").unwrap();
    let ensembl: Vec<String> = (1..=genes.len()).map(|g| format!("ENSG{g:05}")).collect();
    gene_group
        .new_dataset_builder()
        .with_data(&strings(&ensembl))
        .create("ensembl_gene_id")
        .unwrap();
    match labels {
        RowLabels::GeneSymbol => {
            gene_group
                .new_dataset_builder()
                .with_data(&strings(genes))
                .create("gene_symbol")
                .unwrap();
        }
        RowLabels::Symbol => {
            gene_group
                .new_dataset_builder()
                .with_data(&strings(genes))
                .create("symbol")
                .unwrap();
        }
        RowLabels::Both => {
            let other: Vec<String> = (1..=genes.len()).map(|g| format!("SYM{g}")).collect();
            gene_group
                .new_dataset_builder()
                .with_data(&strings(genes))
                .create("gene_symbol")
                .unwrap();
            gene_group
                .new_dataset_builder()
                .with_data(&strings(&other))
                .create("symbol")
                .unwrap();
        }
        RowLabels::Transcripts => {
            meta.create_group("transcripts")
                .unwrap()
                .new_dataset_builder()
                .with_data(&strings(genes))
                .create("ensembl_id")
                .unwrap();
        }
        RowLabels::Missing => {}
    }

    let matrix = Array2::from_shape_fn((genes.len(), samples.len()), |(g, s)| {
        (100 * g + s + 1) as u32
    });
    let data = file.create_group("data").unwrap();
    let builder = data.new_dataset_builder().with_data(&matrix);
    if chunked {
        builder
            .chunk((2, 2))
            .shuffle()
            .fletcher32()
            .create("expression")
            .unwrap();
    } else {
        builder.create("expression").unwrap();
    }
}

/// Wraps a real source, counting column reads and failing chosen samples.
pub struct FlakySource {
    inner: LocalSource,
    failing: HashSet<usize>,
    column_reads: Arc<AtomicUsize>,
    kind: SourceKind,
}

impl FlakySource {
    pub fn new(inner: LocalSource, failing: impl IntoIterator<Item = usize>) -> Self {
        Self {
            inner,
            failing: failing.into_iter().collect(),
            column_reads: Arc::new(AtomicUsize::new(0)),
            kind: SourceKind::Local,
        }
    }

    pub fn as_remote(mut self) -> Self {
        self.kind = SourceKind::Remote;
        self
    }

    pub fn column_reads(&self) -> usize {
        self.column_reads.load(Ordering::SeqCst)
    }
}

impl ExpressionSource for FlakySource {
    fn open(&self) -> Result<Box<dyn ExpressionHandle>, KiraError> {
        Ok(Box::new(FlakyHandle {
            inner: self.inner.open()?,
            failing: self.failing.clone(),
            column_reads: Arc::clone(&self.column_reads),
        }))
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn describe(&self) -> String {
        format!("flaky:{}", self.inner.describe())
    }
}

struct FlakyHandle {
    inner: Box<dyn ExpressionHandle>,
    failing: HashSet<usize>,
    column_reads: Arc<AtomicUsize>,
}

impl ExpressionHandle for FlakyHandle {
    fn has_path(&self, path: &str) -> bool {
        self.inner.has_path(path)
    }

    fn member_names(&self, group: &str) -> Result<Vec<String>, KiraError> {
        self.inner.member_names(group)
    }

    fn read_strings(&self, path: &str) -> Result<Vec<String>, KiraError> {
        self.inner.read_strings(path)
    }

    fn read_floats(&self, path: &str) -> Result<Vec<f64>, KiraError> {
        self.inner.read_floats(path)
    }

    fn matrix_shape(&self) -> Result<(usize, usize), KiraError> {
        self.inner.matrix_shape()
    }

    fn read_column(&self, sample: usize) -> Result<Vec<u32>, KiraError> {
        self.column_reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&sample) {
            return Err(KiraError::Hdf5(format!("injected failure for column {sample}")));
        }
        self.inner.read_column(sample)
    }

    fn entries(&self, group: &str) -> Result<Vec<NodeEntry>, KiraError> {
        self.inner.entries(group)
    }
}
