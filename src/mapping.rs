//! Transcript-level counts to gene-level counts.

use std::collections::{BTreeMap, HashMap};
use std::io::BufRead;

use ndarray::Array2;
use tracing::debug;

use crate::domain::{GeneIdentifier, Species};
use crate::error::KiraError;
use crate::table::LabeledMatrix;

pub type TranscriptCounts = LabeledMatrix<f64>;
pub type GeneCounts = LabeledMatrix<u64>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneRecord {
    pub symbol: String,
    pub gene: String,
    pub biotype: String,
}

/// Transcript id (unversioned) to gene annotation.
#[derive(Debug, Clone, Default)]
pub struct GeneMapping {
    transcripts: HashMap<String, GeneRecord>,
    symbols: HashMap<String, String>,
}

impl GeneMapping {
    /// Parses `transcript<TAB>symbol<TAB>gene<TAB>biotype` lines.
    pub fn from_tsv<R: BufRead>(reader: R) -> Result<Self, KiraError> {
        let mut mapping = Self::default();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(|err| KiraError::Filesystem(err.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 3 {
                return Err(KiraError::InvalidMapping(format!(
                    "line {}: expected at least 3 tab-separated columns",
                    lineno + 1
                )));
            }
            let symbol = if fields[1].is_empty() { fields[2] } else { fields[1] };
            mapping.insert(
                fields[0],
                GeneRecord {
                    symbol: symbol.to_string(),
                    gene: fields[2].to_string(),
                    biotype: fields.get(3).copied().unwrap_or_default().to_string(),
                },
            );
        }
        debug!(transcripts = mapping.len(), "parsed gene mapping");
        Ok(mapping)
    }

    /// Adds a transcript unless it is already known; the first record wins.
    pub fn insert(&mut self, transcript: &str, record: GeneRecord) {
        let transcript = strip_version(transcript).to_string();
        if self.transcripts.contains_key(&transcript) {
            return;
        }
        self.symbols
            .entry(record.gene.clone())
            .or_insert_with(|| record.symbol.clone());
        self.transcripts.insert(transcript, record);
    }

    pub fn get(&self, transcript: &str) -> Option<&GeneRecord> {
        self.transcripts.get(strip_version(transcript))
    }

    pub fn symbol(&self, gene: &str) -> Option<&str> {
        self.symbols.get(gene).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.transcripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transcripts.is_empty()
    }
}

/// Per-species mappings, loaded on demand and kept for the owner's lifetime.
#[derive(Debug, Default)]
pub struct GeneMappings {
    by_species: HashMap<Species, GeneMapping>,
}

impl GeneMappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, species: Species, mapping: GeneMapping) {
        self.by_species.insert(species, mapping);
    }

    pub fn get(&self, species: Species) -> Option<&GeneMapping> {
        self.by_species.get(&species)
    }

    pub fn get_or_load(
        &mut self,
        species: Species,
        load: impl FnOnce() -> Result<GeneMapping, KiraError>,
    ) -> Result<&GeneMapping, KiraError> {
        if !self.by_species.contains_key(&species) {
            let mapping = load()?;
            self.by_species.insert(species, mapping);
        }
        self.by_species
            .get(&species)
            .ok_or_else(|| KiraError::InvalidMapping(format!("no mapping for {species}")))
    }
}

/// Sums transcript rows into gene rows, ordered by Ensembl gene id.
///
/// Summed counts are truncated to whole numbers.
pub fn aggregate(
    counts: &TranscriptCounts,
    mapping: &GeneMapping,
    identifier: GeneIdentifier,
) -> Result<GeneCounts, KiraError> {
    let ncols = counts.columns().len();
    let mut sums: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for (row, transcript) in counts.rows().iter().enumerate() {
        let record = mapping.get(transcript).ok_or_else(|| {
            KiraError::InvalidMapping(format!("transcript {transcript} is not in the mapping"))
        })?;
        let acc = sums
            .entry(record.gene.as_str())
            .or_insert_with(|| vec![0.0; ncols]);
        for (slot, value) in acc.iter_mut().zip(counts.values().row(row)) {
            *slot += *value;
        }
    }

    let mut values = Array2::<u64>::zeros((sums.len(), ncols));
    let mut labels = Vec::with_capacity(sums.len());
    for (r, (gene, acc)) in sums.into_iter().enumerate() {
        for (c, value) in acc.into_iter().enumerate() {
            values[(r, c)] = value as u64;
        }
        let label = match identifier {
            GeneIdentifier::Ensembl => gene,
            GeneIdentifier::Symbol => mapping.symbol(gene).unwrap_or(gene),
        };
        labels.push(label.to_string());
    }
    Ok(LabeledMatrix::new(labels, counts.columns().to_vec(), values))
}

fn strip_version(transcript: &str) -> &str {
    transcript.split('.').next().unwrap_or(transcript)
}
