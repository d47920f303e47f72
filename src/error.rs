use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid source: {0}")]
    InvalidSource(String),

    #[error("source unavailable ({source_id}): {message}")]
    SourceUnavailable { source_id: String, message: String },

    #[error("no recognized gene/transcript label field in {0}")]
    #[diagnostic(help(
        "expected one of meta/genes/gene_symbol, meta/genes/symbol or meta/transcripts/ensembl_id"
    ))]
    SchemaNotFound(String),

    #[error("sample index {index} out of range for {len} samples")]
    SampleIndexOutOfRange { index: usize, len: usize },

    #[error("gene index {index} out of range for {len} genes")]
    GeneIndexOutOfRange { index: usize, len: usize },

    #[error("metadata field does not exist: {0}")]
    #[diagnostic(help("list the available fields with `kira-archs4 ls --source <source>`"))]
    MissingField(String),

    #[error("HDF5 error: {0}")]
    Hdf5(String),

    #[error("invalid search term: {0}")]
    InvalidSearchTerm(String),

    #[error("requested {requested} samples but only {available} are eligible")]
    SampleSize { requested: usize, available: usize },

    #[error("unknown species: {0}")]
    UnknownSpecies(String),

    #[error("unknown version {version} for {species}")]
    UnknownVersion { species: String, version: String },

    #[error("download failed: {0}")]
    DownloadHttp(String),

    #[error("download returned status {status}: {message}")]
    DownloadStatus { status: u16, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("invalid normalization method: {0}")]
    InvalidNormalization(String),

    #[error("invalid gene mapping: {0}")]
    InvalidMapping(String),
}
