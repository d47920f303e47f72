use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use camino::Utf8Path;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tempfile::Builder;
use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::config::ResolvedConfig;
use crate::domain::Species;
use crate::error::KiraError;

const COPY_BUFFER: usize = 1 << 20;

pub trait DownloadClient: Send + Sync {
    /// Fetches `url` into `destination`, returning the number of bytes written.
    fn download(
        &self,
        url: &str,
        destination: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<u64, KiraError>;
}

#[derive(Clone)]
pub struct HttpDownloadClient {
    client: Client,
}

impl HttpDownloadClient {
    pub fn new() -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-archs4/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::Filesystem(err.to_string()))?,
        );
        // Release files run to tens of gigabytes, so only the connect phase is bounded.
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(None::<Duration>)
            .build()
            .map_err(|err| KiraError::DownloadHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl DownloadClient for HttpDownloadClient {
    fn download(
        &self,
        url: &str,
        destination: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<u64, KiraError> {
        let destination = Utf8Path::from_path(destination).ok_or_else(|| {
            KiraError::Filesystem(format!("non UTF-8 path: {}", destination.display()))
        })?;
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| KiraError::DownloadHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "download request failed".to_string());
            return Err(KiraError::DownloadStatus { status, message });
        }

        let total = response.content_length().unwrap_or(0);
        let label = file_name(url).to_string();
        let started = Instant::now();
        let written = write_stream_atomic(destination, response, |bytes| {
            sink.event(ProgressEvent::counter(label.clone(), bytes, total.max(bytes)));
        })?;
        sink.event(ProgressEvent {
            message: format!("downloaded {label}"),
            elapsed: Some(started.elapsed()),
            progress: Some((written, total.max(written))),
        });
        Ok(written)
    }
}

/// Streams `reader` into a temp file next to `path`, then renames it into place.
fn write_stream_atomic<R: Read>(
    path: &Utf8Path,
    mut reader: R,
    mut on_progress: impl FnMut(u64),
) -> Result<u64, KiraError> {
    let parent = path
        .parent()
        .ok_or_else(|| KiraError::Filesystem("invalid destination path".to_string()))?;
    let parent = if parent.as_str().is_empty() {
        Utf8Path::new(".")
    } else {
        parent
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix("kira-archs4-part")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;

    let mut buffer = vec![0u8; COPY_BUFFER];
    let mut written = 0u64;
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(KiraError::DownloadHttp(err.to_string())),
        };
        temp.write_all(&buffer[..read])
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        written += read as u64;
        on_progress(written);
    }
    temp.flush()
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    Ok(written)
}

/// Last path segment of a URL, without query or fragment.
pub fn file_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/// Downloads the gene-count archive of one release into `dest_dir`.
///
/// The primary URL is tried first; any failure moves on to the fallback mirror
/// when the release has one.
pub fn gene_counts(
    client: &dyn DownloadClient,
    config: &ResolvedConfig,
    species: Species,
    version: &str,
    dest_dir: &Path,
    sink: &dyn ProgressSink,
) -> Result<PathBuf, KiraError> {
    let release = config.release(species, version)?;
    let name = file_name(&release.primary);
    if name.is_empty() {
        return Err(KiraError::ConfigParse(format!(
            "{species} {version}: primary URL has no file name"
        )));
    }
    let destination = dest_dir.join(name);

    info!(%species, version, url = %release.primary, "downloading gene counts");
    sink.event(ProgressEvent::message(format!(
        "downloading {species} {version} to {}",
        destination.display()
    )));
    let primary_err = match client.download(&release.primary, &destination, sink) {
        Ok(bytes) => {
            info!(path = %destination.display(), bytes, "download complete");
            return Ok(destination);
        }
        Err(err) => err,
    };

    let Some(fallback) = release.fallback.as_deref() else {
        return Err(primary_err);
    };
    warn!(error = %primary_err, url = fallback, "primary mirror failed, trying fallback");
    let bytes = client.download(fallback, &destination, sink)?;
    info!(path = %destination.display(), bytes, "download complete");
    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_lands_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap().join("nested/archive.h5");
        let mut seen = Vec::new();
        let written =
            write_stream_atomic(&path, &b"expression"[..], |bytes| seen.push(bytes)).unwrap();
        assert_eq!(written, 10);
        assert_eq!(seen.last(), Some(&10));
        assert_eq!(fs::read(path.as_std_path()).unwrap(), b"expression");
        // only the final file remains next to it
        assert_eq!(fs::read_dir(dir.path().join("nested")).unwrap().count(), 1);
    }

    #[test]
    fn file_name_strips_query() {
        assert_eq!(
            file_name("https://host/archs4/files/human_gene_v2.latest.h5?x=1"),
            "human_gene_v2.latest.h5"
        );
        assert_eq!(file_name("human.h5"), "human.h5");
    }
}
