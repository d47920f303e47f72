//! Sample selection for expression queries: metadata search, random draw,
//! series membership and explicit accession lists.

use std::collections::{BTreeSet, HashSet};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use regex::Regex;
use tracing::debug;

use crate::error::KiraError;
use crate::extract::ExtractOptions;
use crate::source::{
    ExpressionHandle, ExpressionSource, SAMPLE_ACCESSIONS, SAMPLE_GROUP, SAMPLE_SERIES,
    SINGLE_CELL_PROBABILITY,
};

pub const DEFAULT_SEARCH_FIELDS: [&str; 6] = [
    "geo_accession",
    "series_id",
    "characteristics_ch1",
    "extract_protocol_ch1",
    "source_name_ch1",
    "title",
];

/// Samples at or above this probability are treated as single-cell.
pub const SINGLE_CELL_CUTOFF: f64 = 0.5;

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub extract: ExtractOptions,
    pub remove_single_cell: bool,
}

pub fn default_search_fields() -> Vec<String> {
    DEFAULT_SEARCH_FIELDS.iter().map(|f| f.to_string()).collect()
}

/// Upper-cases and drops `_ - ' / . ` and spaces, so "T-cell" and "tcell" match.
pub fn normalize_term(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !matches!(ch, '_' | '-' | '\'' | '/' | ' ' | '.'))
        .flat_map(char::to_uppercase)
        .collect()
}

pub fn compile_search(term: &str) -> Result<Regex, KiraError> {
    let normalized = normalize_term(term);
    Regex::new(&normalized).map_err(|err| KiraError::InvalidSearchTerm(err.to_string()))
}

/// Positions whose value in any of `fields` matches `pattern`, sorted.
pub fn matching_samples(
    handle: &dyn ExpressionHandle,
    pattern: &Regex,
    fields: &[String],
) -> Result<Vec<usize>, KiraError> {
    let available: HashSet<String> = handle.member_names(SAMPLE_GROUP)?.into_iter().collect();
    let mut hits = BTreeSet::new();
    for field in fields.iter().filter(|field| available.contains(field.as_str())) {
        let values = handle.read_strings(&format!("{SAMPLE_GROUP}/{field}"))?;
        hits.extend(
            values
                .iter()
                .enumerate()
                .filter(|(_, value)| pattern.is_match(&normalize_term(value)))
                .map(|(i, _)| i),
        );
    }
    Ok(hits.into_iter().collect())
}

/// `true` for samples below the single-cell cutoff.
pub fn bulk_mask(handle: &dyn ExpressionHandle) -> Result<Vec<bool>, KiraError> {
    Ok(handle
        .read_floats(SINGLE_CELL_PROBABILITY)?
        .into_iter()
        .map(|p| p < SINGLE_CELL_CUTOFF)
        .collect())
}

pub fn search_indices(
    source: &dyn ExpressionSource,
    term: &str,
    fields: &[String],
    remove_single_cell: bool,
) -> Result<Vec<usize>, KiraError> {
    let pattern = compile_search(term)?;
    debug!(pattern = pattern.as_str(), "searching sample metadata");
    let handle = source.open()?;
    let hits = matching_samples(handle.as_ref(), &pattern, fields)?;
    if !remove_single_cell {
        return Ok(hits);
    }
    let bulk = bulk_mask(handle.as_ref())?;
    Ok(hits
        .into_iter()
        .filter(|&i| bulk.get(i).copied().unwrap_or(false))
        .collect())
}

pub fn random_indices(
    source: &dyn ExpressionSource,
    number: usize,
    seed: u64,
    remove_single_cell: bool,
) -> Result<Vec<usize>, KiraError> {
    let handle = source.open()?;
    let candidates: Vec<usize> = if remove_single_cell {
        bulk_mask(handle.as_ref())?
            .into_iter()
            .enumerate()
            .filter(|(_, bulk)| *bulk)
            .map(|(i, _)| i)
            .collect()
    } else {
        (0..handle.read_strings(SAMPLE_ACCESSIONS)?.len()).collect()
    };
    if number > candidates.len() {
        return Err(KiraError::SampleSize {
            requested: number,
            available: candidates.len(),
        });
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked: Vec<usize> = index::sample(&mut rng, candidates.len(), number)
        .into_iter()
        .map(|i| candidates[i])
        .collect();
    picked.sort_unstable();
    Ok(picked)
}

pub fn series_indices(
    source: &dyn ExpressionSource,
    series_id: &str,
) -> Result<Vec<usize>, KiraError> {
    let handle = source.open()?;
    let series = handle.read_strings(SAMPLE_SERIES)?;
    Ok(series
        .iter()
        .enumerate()
        .filter(|(_, value)| value.as_str() == series_id)
        .map(|(i, _)| i)
        .collect())
}

pub fn sample_indices(
    source: &dyn ExpressionSource,
    accessions: &[String],
) -> Result<Vec<usize>, KiraError> {
    let wanted: HashSet<&str> = accessions.iter().map(String::as_str).collect();
    let handle = source.open()?;
    let all = handle.read_strings(SAMPLE_ACCESSIONS)?;
    Ok(all
        .iter()
        .enumerate()
        .filter(|(_, acc)| wanted.contains(acc.as_str()))
        .map(|(i, _)| i)
        .collect())
}
