use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::ResolvedConfig;
use crate::domain::{NormalizationMethod, Species, SourceSpec};
use crate::download::{self, DownloadClient};
use crate::error::KiraError;
use crate::extract::{self, ExtractOptions, Extraction};
use crate::normalize;
use crate::query::{self, QueryOptions};
use crate::source::{self, ExpressionSource, ObjectStore};
use crate::table::{ExpressionTable, NormalizedTable};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
    /// `(completed, total)` for counted work such as column fetches or bytes.
    pub progress: Option<(u64, u64)>,
}

impl ProgressEvent {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
            progress: None,
        }
    }

    pub fn counter(message: impl Into<String>, completed: u64, total: u64) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
            progress: Some((completed, total)),
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

pub struct SilentSink;

impl ProgressSink for SilentSink {
    fn event(&self, _event: ProgressEvent) {}
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionsResult {
    pub species: Species,
    pub versions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub species: Species,
    pub version: String,
    pub path: String,
    /// RFC 3339 completion time.
    pub downloaded_at: String,
}

/// Expression table with an optional normalized view.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub extraction: Extraction,
    pub normalized: Option<NormalizedTable>,
}

impl QueryResult {
    pub fn table(&self) -> &ExpressionTable {
        &self.extraction.table
    }
}

pub struct App<D: DownloadClient> {
    config: ResolvedConfig,
    downloader: D,
    objects: Arc<dyn ObjectStore>,
}

impl<D: DownloadClient> App<D> {
    pub fn new(
        config: ResolvedConfig,
        downloader: D,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            config,
            downloader,
            objects,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn source(&self, identifier: &str) -> Result<Box<dyn ExpressionSource>, KiraError> {
        let spec: SourceSpec = identifier.parse()?;
        Ok(source::open_source(&spec, Arc::clone(&self.objects)))
    }

    /// Resolves either an explicit source or the configured default for a species.
    pub fn source_or_default(
        &self,
        identifier: Option<&str>,
        species: Species,
    ) -> Result<Box<dyn ExpressionSource>, KiraError> {
        match identifier {
            Some(identifier) => self.source(identifier),
            None => {
                let url = self.config.remote_source(species)?;
                self.source(url)
            }
        }
    }

    pub fn versions(&self, species: Species) -> VersionsResult {
        VersionsResult {
            species,
            versions: self.config.versions(species),
        }
    }

    pub fn download(
        &self,
        species: Species,
        version: &str,
        destination: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, KiraError> {
        let path: PathBuf = download::gene_counts(
            &self.downloader,
            &self.config,
            species,
            version,
            destination,
            sink,
        )?;
        Ok(DownloadResult {
            species,
            version: version.to_string(),
            path: path.display().to_string(),
            downloaded_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    pub fn index(
        &self,
        source: &dyn ExpressionSource,
        sample_idx: &[usize],
        gene_idx: &[usize],
        options: &ExtractOptions,
        normalization: Option<NormalizationMethod>,
        sink: &dyn ProgressSink,
    ) -> Result<QueryResult, KiraError> {
        let extraction = extract::extract_with_status(source, sample_idx, gene_idx, options, sink)?;
        Ok(finish(extraction, normalization))
    }

    pub fn search(
        &self,
        source: &dyn ExpressionSource,
        term: &str,
        fields: &[String],
        options: &QueryOptions,
        normalization: Option<NormalizationMethod>,
        sink: &dyn ProgressSink,
    ) -> Result<QueryResult, KiraError> {
        let idx = query::search_indices(source, term, fields, options.remove_single_cell)?;
        self.index(source, &idx, &[], &options.extract, normalization, sink)
    }

    pub fn random(
        &self,
        source: &dyn ExpressionSource,
        number: usize,
        seed: u64,
        options: &QueryOptions,
        normalization: Option<NormalizationMethod>,
        sink: &dyn ProgressSink,
    ) -> Result<QueryResult, KiraError> {
        let idx = query::random_indices(source, number, seed, options.remove_single_cell)?;
        self.index(source, &idx, &[], &options.extract, normalization, sink)
    }

    pub fn series(
        &self,
        source: &dyn ExpressionSource,
        series_id: &str,
        options: &QueryOptions,
        normalization: Option<NormalizationMethod>,
        sink: &dyn ProgressSink,
    ) -> Result<Option<QueryResult>, KiraError> {
        let idx = query::series_indices(source, series_id)?;
        if idx.is_empty() {
            return Ok(None);
        }
        self.index(source, &idx, &[], &options.extract, normalization, sink)
            .map(Some)
    }

    pub fn samples(
        &self,
        source: &dyn ExpressionSource,
        accessions: &[String],
        options: &QueryOptions,
        normalization: Option<NormalizationMethod>,
        sink: &dyn ProgressSink,
    ) -> Result<Option<QueryResult>, KiraError> {
        let idx = query::sample_indices(source, accessions)?;
        if idx.is_empty() {
            return Ok(None);
        }
        self.index(source, &idx, &[], &options.extract, normalization, sink)
            .map(Some)
    }
}

fn finish(extraction: Extraction, normalization: Option<NormalizationMethod>) -> QueryResult {
    let normalized =
        normalization.map(|method| normalize::normalize(&extraction.table, method));
    QueryResult {
        extraction,
        normalized,
    }
}
