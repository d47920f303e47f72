use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use tracing::debug;

use crate::domain::{ObjectLocation, SourceKind, SourceSpec};
use crate::error::KiraError;
use crate::h5::H5Handle;
use crate::h5range::RangeH5Handle;
use crate::range::{DEFAULT_PAGE_SIZE, HttpRangeReader, PagedReader};

pub const SAMPLE_GROUP: &str = "meta/samples";
pub const GENE_GROUP: &str = "meta/genes";
pub const TRANSCRIPT_GROUP: &str = "meta/transcripts";
pub const SAMPLE_ACCESSIONS: &str = "meta/samples/geo_accession";
pub const SAMPLE_SERIES: &str = "meta/samples/series_id";
pub const SINGLE_CELL_PROBABILITY: &str = "meta/samples/singlecellprobability";
pub const EXPRESSION: &str = "data/expression";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NodeKind {
    Group,
    Dataset { shape: Vec<usize>, dtype: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeEntry {
    pub name: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

/// Read-only view of one opened expression archive.
pub trait ExpressionHandle {
    fn has_path(&self, path: &str) -> bool;
    fn member_names(&self, group: &str) -> Result<Vec<String>, KiraError>;
    fn read_strings(&self, path: &str) -> Result<Vec<String>, KiraError>;
    fn read_floats(&self, path: &str) -> Result<Vec<f64>, KiraError>;
    /// `(genes, samples)`
    fn matrix_shape(&self) -> Result<(usize, usize), KiraError>;
    /// Full expression column for one sample, one value per gene row.
    fn read_column(&self, sample: usize) -> Result<Vec<u32>, KiraError>;
    fn entries(&self, group: &str) -> Result<Vec<NodeEntry>, KiraError>;
}

pub trait ExpressionSource: Send + Sync {
    fn open(&self) -> Result<Box<dyn ExpressionHandle>, KiraError>;
    fn kind(&self) -> SourceKind;
    fn describe(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct LocalSource {
    path: PathBuf,
}

impl LocalSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ExpressionSource for LocalSource {
    fn open(&self) -> Result<Box<dyn ExpressionHandle>, KiraError> {
        Ok(Box::new(H5Handle::open(&self.path)?))
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Local
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Remote-filesystem adapter: turns an object-store address into an open handle.
pub trait ObjectStore: Send + Sync {
    fn open(&self, location: &ObjectLocation) -> Result<Box<dyn ExpressionHandle>, KiraError>;
}

#[derive(Clone)]
pub struct RemoteSource {
    location: ObjectLocation,
    store: Arc<dyn ObjectStore>,
}

impl RemoteSource {
    pub fn new(location: ObjectLocation, store: Arc<dyn ObjectStore>) -> Self {
        Self { location, store }
    }

    pub fn location(&self) -> &ObjectLocation {
        &self.location
    }
}

impl ExpressionSource for RemoteSource {
    fn open(&self) -> Result<Box<dyn ExpressionHandle>, KiraError> {
        self.store.open(&self.location)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Remote
    }

    fn describe(&self) -> String {
        self.location.s3_url()
    }
}

pub fn open_source(
    spec: &SourceSpec,
    store: Arc<dyn ObjectStore>,
) -> Box<dyn ExpressionSource> {
    match spec {
        SourceSpec::Local(path) => Box::new(LocalSource::new(path.clone())),
        SourceSpec::Remote(location) => Box::new(RemoteSource::new(location.clone(), store)),
    }
}

/// Anonymous access to an S3-compatible endpoint over plain HTTP.
///
/// Each `open` yields a fresh handle that reads the object with `Range`
/// requests. Handles share the connection pool but no data, so every worker
/// fetches only the metadata and chunks it touches.
pub struct HttpObjectStore {
    client: Client,
    page_size: u64,
}

impl HttpObjectStore {
    pub fn new() -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-archs4/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| KiraError::DownloadHttp(err.to_string()))?;
        Ok(Self {
            client,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Granularity of the per-handle metadata pages.
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }
}

impl ObjectStore for HttpObjectStore {
    fn open(&self, location: &ObjectLocation) -> Result<Box<dyn ExpressionHandle>, KiraError> {
        debug!(object = %location.s3_url(), endpoint = %location.endpoint, "opening remote object");
        let reader =
            HttpRangeReader::new(self.client.clone(), location.http_url(), location.s3_url());
        let handle = RangeH5Handle::open(PagedReader::new(reader, self.page_size))?;
        Ok(Box::new(handle))
    }
}
