mod common;

use kira_archs4::inspect::{ls, render_tree};
use kira_archs4::source::NodeKind;

use common::small_archive;

#[test]
fn lists_every_group_and_dataset() {
    let archive = small_archive();
    let tree = ls(&archive.source()).unwrap();
    let paths: Vec<&str> = tree.iter().map(|entry| entry.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "data",
            "data/expression",
            "meta",
            "meta/genes",
            "meta/genes/ensembl_gene_id",
            "meta/genes/symbol",
            "meta/samples",
            "meta/samples/geo_accession",
            "meta/samples/organism_ch1",
            "meta/samples/series_id",
            "meta/samples/singlecellprobability",
            "meta/samples/title",
        ]
    );

    let expression = &tree[1];
    assert_eq!(expression.depth, 1);
    assert_matches::assert_matches!(
        &expression.kind,
        NodeKind::Dataset { shape, .. } if shape == &vec![3, 5]
    );
}

#[test]
fn rendered_tree_nests_members() {
    let archive = small_archive();
    let text = render_tree(&ls(&archive.source()).unwrap());
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "data/");
    assert!(lines[1].starts_with("  expression"));
    assert!(lines[1].ends_with("(3 x 5)"));
    assert!(lines.contains(&"  samples/"));
}
