mod common;

use std::fs;
use std::sync::Arc;

use assert_matches::assert_matches;

use kira_archs4::app::SilentSink;
use kira_archs4::domain::ObjectLocation;
use kira_archs4::error::KiraError;
use kira_archs4::extract::{ExtractOptions, extract, extract_with_status};
use kira_archs4::inspect;
use kira_archs4::meta;
use kira_archs4::source::{ExpressionSource, HttpObjectStore, RemoteSource};

use common::server::{Behaviour, ObjectServer, unreachable_url};
use common::{Archive, chunked_archive, small_archive};

const PAGE: u64 = 512;

fn remote(url: &str) -> RemoteSource {
    let location: ObjectLocation = url.parse().unwrap();
    let store = HttpObjectStore::new().unwrap().with_page_size(PAGE);
    RemoteSource::new(location, Arc::new(store))
}

fn serve(archive: &Archive, behaviour: Behaviour) -> ObjectServer {
    ObjectServer::start(fs::read(&archive.path).unwrap(), behaviour)
}

#[test]
fn columns_arrive_through_range_requests() {
    let archive = small_archive();
    let object_len = fs::metadata(&archive.path).unwrap().len();
    let server = serve(&archive, Behaviour::Ranges);

    let table = extract(
        &remote(&server.url),
        &[3, 1],
        &[],
        &ExtractOptions { workers: Some(2) },
        &SilentSink,
    )
    .unwrap();
    assert_eq!(table.columns(), ["GSM2", "GSM4"]);
    assert_eq!(table.rows(), archive.genes.as_slice());
    for gene in 0..3 {
        assert_eq!(table.values()[(gene, 0)], archive.value(gene, 1));
        assert_eq!(table.values()[(gene, 1)], archive.value(gene, 3));
    }

    let requests = server.requests();
    assert!(!requests.is_empty());
    for request in &requests {
        assert_eq!(request.path, "/archs4/archive.h5");
        let len = request.len().expect("every request carries a Range header");
        assert!(len < object_len);
    }
    // one handle for the labels, one per column task; each starts at the superblock
    let opens = requests
        .iter()
        .filter(|request| request.range.map(|(start, _)| start) == Some(0))
        .count();
    assert_eq!(opens, 3);
}

#[test]
fn chunked_filtered_matrix_over_ranges() {
    let archive = chunked_archive(5, 7);
    let server = serve(&archive, Behaviour::Ranges);

    let table = extract(
        &remote(&server.url),
        &[0, 3, 6],
        &[4, 1],
        &ExtractOptions::default(),
        &SilentSink,
    )
    .unwrap();
    assert_eq!(table.rows(), ["A2", "A5"]);
    assert_eq!(table.columns(), ["GSM1", "GSM4", "GSM7"]);
    for (r, gene) in [1, 4].into_iter().enumerate() {
        for (c, sample) in [0, 3, 6].into_iter().enumerate() {
            assert_eq!(table.values()[(r, c)], archive.value(gene, sample));
        }
    }
}

#[test]
fn remote_and_local_archives_agree() {
    let archive = small_archive();
    let server = serve(&archive, Behaviour::Ranges);
    let source = remote(&server.url);

    let local = inspect::ls(&archive.source()).unwrap();
    let over_http = inspect::ls(&source).unwrap();
    let paths = |tree: &[inspect::TreeEntry]| {
        tree.iter().map(|entry| entry.path.clone()).collect::<Vec<_>>()
    };
    assert_eq!(paths(&over_http), paths(&local));

    let table = meta::series(&source, "GSE2", &meta::default_meta_fields()).unwrap();
    assert_eq!(table.accessions, vec!["GSM3", "GSM4"]);
    assert_eq!(table.value("GSM4", "title"), Some("LIVER BIOPSY"));
    assert_matches!(
        meta::field(&source, "singlecellprobability"),
        Err(KiraError::Hdf5(_))
    );
}

#[test]
fn error_status_means_source_unavailable() {
    let archive = small_archive();
    for status in [403, 404, 500] {
        let server = serve(&archive, Behaviour::Status(status));
        let err = extract(
            &remote(&server.url),
            &[0],
            &[],
            &ExtractOptions::default(),
            &SilentSink,
        )
        .unwrap_err();
        let expected = format!("status {status}");
        assert_matches!(
            err,
            KiraError::SourceUnavailable { ref message, .. } if message.contains(&expected)
        );
        assert_eq!(server.requests().len(), 1);
    }
}

#[test]
fn endpoint_ignoring_ranges_is_rejected() {
    let archive = small_archive();
    let server = serve(&archive, Behaviour::WholeObject);
    let err = remote(&server.url).open().err().unwrap();
    assert_matches!(err, KiraError::SourceUnavailable { .. });
}

#[test]
fn unreachable_endpoint_is_fatal() {
    let source = remote(&unreachable_url());
    let err = extract_with_status(
        &source,
        &[0, 1],
        &[],
        &ExtractOptions::default(),
        &SilentSink,
    )
    .unwrap_err();
    assert_matches!(
        err,
        KiraError::SourceUnavailable { ref source_id, .. } if source_id == "s3://archs4/archive.h5"
    );
}

#[test]
fn non_hdf5_object_is_unavailable() {
    let server = ObjectServer::start(b"not an archive at all".to_vec(), Behaviour::Ranges);
    let err = remote(&server.url).open().err().unwrap();
    assert_matches!(
        err,
        KiraError::SourceUnavailable { message, .. } if message == "not an HDF5 file"
    );
}
