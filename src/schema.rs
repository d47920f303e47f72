use tracing::debug;

use crate::error::KiraError;
use crate::source::ExpressionHandle;

/// Row-label layouts seen across archive releases, in probing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLabelSchema {
    GeneSymbol,
    Symbol,
    TranscriptEnsembl,
}

impl RowLabelSchema {
    pub const CANDIDATES: [RowLabelSchema; 3] = [
        RowLabelSchema::GeneSymbol,
        RowLabelSchema::Symbol,
        RowLabelSchema::TranscriptEnsembl,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            RowLabelSchema::GeneSymbol => "meta/genes/gene_symbol",
            RowLabelSchema::Symbol => "meta/genes/symbol",
            RowLabelSchema::TranscriptEnsembl => "meta/transcripts/ensembl_id",
        }
    }

    pub fn probe(&self, handle: &dyn ExpressionHandle) -> Option<&'static str> {
        let path = self.path();
        handle.has_path(path).then_some(path)
    }
}

/// First candidate present in the file wins.
pub fn resolve_row_labels(
    handle: &dyn ExpressionHandle,
    source_id: &str,
) -> Result<RowLabelSchema, KiraError> {
    for candidate in RowLabelSchema::CANDIDATES {
        if let Some(path) = candidate.probe(handle) {
            debug!(source = source_id, field = path, "resolved row labels");
            return Ok(candidate);
        }
    }
    Err(KiraError::SchemaNotFound(source_id.to_string()))
}
