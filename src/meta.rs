//! Metadata-only queries. Nothing here touches `data/expression`.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::error::KiraError;
use crate::query;
use crate::source::{
    ExpressionHandle, ExpressionSource, GENE_GROUP, SAMPLE_ACCESSIONS, SAMPLE_GROUP,
    SAMPLE_SERIES, TRANSCRIPT_GROUP,
};
use crate::table::MetadataTable;

pub const DEFAULT_META_SEARCH_FIELDS: [&str; 4] = [
    "characteristics_ch1",
    "extract_protocol_ch1",
    "source_name_ch1",
    "title",
];

/// Reported by accession and series lookups when no fields are named.
pub const DEFAULT_META_FIELDS: [&str; 6] = [
    "geo_accession",
    "series_id",
    "characteristics_ch1",
    "extract_protocol_ch1",
    "source_name_ch1",
    "title",
];

pub fn default_meta_search_fields() -> Vec<String> {
    DEFAULT_META_SEARCH_FIELDS
        .iter()
        .map(|f| f.to_string())
        .collect()
}

pub fn default_meta_fields() -> Vec<String> {
    DEFAULT_META_FIELDS.iter().map(|f| f.to_string()).collect()
}

pub fn search(
    source: &dyn ExpressionSource,
    term: &str,
    fields: &[String],
    remove_single_cell: bool,
) -> Result<MetadataTable, KiraError> {
    let pattern = query::compile_search(term)?;
    let handle = source.open()?;
    let mut idx = query::matching_samples(handle.as_ref(), &pattern, fields)?;
    if remove_single_cell {
        let bulk = query::bulk_mask(handle.as_ref())?;
        idx.retain(|&i| bulk.get(i).copied().unwrap_or(false));
    }
    build_table(handle.as_ref(), &idx, fields)
}

pub fn samples(
    source: &dyn ExpressionSource,
    accessions: &[String],
    fields: &[String],
) -> Result<MetadataTable, KiraError> {
    let wanted: HashSet<String> = accessions.iter().map(|acc| acc.to_uppercase()).collect();
    let handle = source.open()?;
    let idx: Vec<usize> = handle
        .read_strings(SAMPLE_ACCESSIONS)?
        .iter()
        .enumerate()
        .filter(|(_, acc)| wanted.contains(&acc.to_uppercase()))
        .map(|(i, _)| i)
        .collect();
    build_table(handle.as_ref(), &idx, fields)
}

pub fn series(
    source: &dyn ExpressionSource,
    series_id: &str,
    fields: &[String],
) -> Result<MetadataTable, KiraError> {
    let wanted = series_id.to_uppercase();
    let handle = source.open()?;
    let idx: Vec<usize> = handle
        .read_strings(SAMPLE_SERIES)?
        .iter()
        .enumerate()
        .filter(|(_, value)| value.to_uppercase() == wanted)
        .map(|(i, _)| i)
        .collect();
    build_table(handle.as_ref(), &idx, fields)
}

/// One field by name, looked up in samples, then genes, then transcripts.
pub fn field(source: &dyn ExpressionSource, name: &str) -> Result<Vec<String>, KiraError> {
    let handle = source.open()?;
    for group in [SAMPLE_GROUP, GENE_GROUP, TRANSCRIPT_GROUP] {
        let path = format!("{group}/{name}");
        if handle.has_path(&path) {
            debug!(field = %path, "reading metadata field");
            return Ok(handle
                .read_strings(&path)?
                .into_iter()
                .map(|value| value.to_uppercase())
                .collect());
        }
    }
    Err(KiraError::MissingField(name.to_string()))
}

/// Every string-valued sample field. Numeric fields are skipped.
pub fn sample_fields(
    source: &dyn ExpressionSource,
) -> Result<BTreeMap<String, Vec<String>>, KiraError> {
    let handle = source.open()?;
    let mut out = BTreeMap::new();
    for name in handle.member_names(SAMPLE_GROUP)? {
        if let Ok(values) = handle.read_strings(&format!("{SAMPLE_GROUP}/{name}")) {
            out.insert(name, values);
        }
    }
    Ok(out)
}

fn build_table(
    handle: &dyn ExpressionHandle,
    idx: &[usize],
    fields: &[String],
) -> Result<MetadataTable, KiraError> {
    let accessions = handle.read_strings(SAMPLE_ACCESSIONS)?;
    let available: HashSet<String> = handle.member_names(SAMPLE_GROUP)?.into_iter().collect();

    let mut names = Vec::new();
    let mut columns = Vec::new();
    for field in fields.iter().filter(|field| available.contains(field.as_str())) {
        // Fields that are not strings (e.g. probabilities) are left out.
        let Ok(values) = handle.read_strings(&format!("{SAMPLE_GROUP}/{field}")) else {
            continue;
        };
        names.push(field.clone());
        columns.push(values);
    }

    let rows = idx
        .iter()
        .map(|&i| {
            columns
                .iter()
                .map(|values| values.get(i).map(|v| v.to_uppercase()).unwrap_or_default())
                .collect()
        })
        .collect();
    let accessions = idx
        .iter()
        .map(|&i| accessions.get(i).cloned().unwrap_or_default())
        .collect();

    Ok(MetadataTable {
        fields: names,
        accessions,
        rows,
    })
}
