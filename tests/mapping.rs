use assert_matches::assert_matches;
use ndarray::array;

use kira_archs4::domain::{GeneIdentifier, Species};
use kira_archs4::error::KiraError;
use kira_archs4::mapping::{GeneMapping, GeneMappings, TranscriptCounts, aggregate};

const MAPPING: &str = "\
ENST0001\tTP53\tENSG0002\tprotein_coding
ENST0002\tTP53\tENSG0002\tprotein_coding
ENST0003\t\tENSG0001\tlncRNA
ENST0004\tMYC\tENSG0003\tprotein_coding
";

fn counts() -> TranscriptCounts {
    TranscriptCounts::new(
        vec![
            "ENST0001.3".to_string(),
            "ENST0002.1".to_string(),
            "ENST0003".to_string(),
        ],
        vec!["S1".to_string(), "S2".to_string()],
        array![[1.5, 2.0], [2.0, 0.25], [7.9, 1.0]],
    )
}

#[test]
fn sums_transcripts_per_gene() {
    let mapping = GeneMapping::from_tsv(MAPPING.as_bytes()).unwrap();
    let genes = aggregate(&counts(), &mapping, GeneIdentifier::Ensembl).unwrap();
    assert_eq!(genes.rows(), ["ENSG0001", "ENSG0002"]);
    assert_eq!(genes.columns(), ["S1", "S2"]);
    assert_eq!(genes.values(), &array![[7u64, 1], [3, 2]]);
}

#[test]
fn relabels_with_symbols() {
    let mapping = GeneMapping::from_tsv(MAPPING.as_bytes()).unwrap();
    let genes = aggregate(&counts(), &mapping, GeneIdentifier::Symbol).unwrap();
    // ENSG0001 has no symbol and keeps its Ensembl id.
    assert_eq!(genes.rows(), ["ENSG0001", "TP53"]);
}

#[test]
fn unmapped_transcript_is_an_error() {
    let mapping = GeneMapping::from_tsv("ENST0001\tTP53\tENSG0002\tx\n".as_bytes()).unwrap();
    let err = aggregate(&counts(), &mapping, GeneIdentifier::Symbol).unwrap_err();
    assert_matches!(err, KiraError::InvalidMapping(_));
}

#[test]
fn short_lines_are_rejected() {
    let err = GeneMapping::from_tsv("ENST0001\tTP53\n".as_bytes()).unwrap_err();
    assert_matches!(err, KiraError::InvalidMapping(_));
}

#[test]
fn registry_loads_each_species_once() {
    let mut registry = GeneMappings::new();
    let mut loads = 0;
    for _ in 0..2 {
        let mapping = registry
            .get_or_load(Species::Human, || {
                loads += 1;
                GeneMapping::from_tsv(MAPPING.as_bytes())
            })
            .unwrap();
        assert_eq!(mapping.len(), 4);
    }
    assert_eq!(loads, 1);
    assert!(registry.get(Species::Mouse).is_none());
}
