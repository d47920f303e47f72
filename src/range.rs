//! Byte-range access to remote objects.
//!
//! Every read is an HTTP `Range` request; nothing is written to disk. A
//! [`PagedReader`] keeps small metadata reads from turning into one request
//! each, and its pages live only as long as the handle that owns it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::RANGE;
use tracing::{debug, trace};

use crate::error::KiraError;

pub const DEFAULT_PAGE_SIZE: u64 = 64 * 1024;

/// Random access to the bytes of one object.
pub trait RangeRead: Send + Sync {
    /// Reads `[offset, offset + len)`. The result is shorter only when the
    /// object ends inside the range.
    fn read_range(&self, offset: u64, len: u64) -> Result<Vec<u8>, KiraError>;

    fn describe(&self) -> String;
}

pub struct HttpRangeReader {
    client: Client,
    url: String,
    source_id: String,
}

impl HttpRangeReader {
    pub fn new(client: Client, url: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            source_id: source_id.into(),
        }
    }

    fn unavailable(&self, message: String) -> KiraError {
        KiraError::SourceUnavailable {
            source_id: self.source_id.clone(),
            message,
        }
    }
}

impl RangeRead for HttpRangeReader {
    fn read_range(&self, offset: u64, len: u64) -> Result<Vec<u8>, KiraError> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let end = offset + len - 1;
        trace!(url = %self.url, offset, len, "range request");
        let response = self
            .client
            .get(&self.url)
            .header(RANGE, format!("bytes={offset}-{end}"))
            .send()
            .map_err(|err| self.unavailable(err.to_string()))?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::OK => {
                return Err(self.unavailable(
                    "endpoint ignored the range request and returned the whole object".to_string(),
                ));
            }
            // starts past the end of the object
            StatusCode::RANGE_NOT_SATISFIABLE => return Ok(Vec::new()),
            status => {
                return Err(self.unavailable(format!(
                    "endpoint returned status {}",
                    status.as_u16()
                )));
            }
        }

        let bytes = response
            .bytes()
            .map_err(|err| self.unavailable(err.to_string()))?;
        if bytes.len() as u64 > len {
            return Err(self.unavailable(format!(
                "asked for {len} bytes at offset {offset}, endpoint sent {}",
                bytes.len()
            )));
        }
        Ok(bytes.to_vec())
    }

    fn describe(&self) -> String {
        self.source_id.clone()
    }
}

/// Serves reads out of fixed-size aligned pages fetched on demand.
///
/// Reads spanning more than a few pages bypass the page table and go straight
/// to the inner reader.
pub struct PagedReader<R> {
    inner: R,
    page_size: u64,
    pages: Mutex<HashMap<u64, Arc<Vec<u8>>>>,
}

impl<R: RangeRead> PagedReader<R> {
    pub fn new(inner: R, page_size: u64) -> Self {
        Self {
            inner,
            page_size: page_size.max(1),
            pages: Mutex::new(HashMap::new()),
        }
    }

    pub fn pages_held(&self) -> usize {
        self.pages.lock().map(|pages| pages.len()).unwrap_or(0)
    }

    fn page(&self, index: u64) -> Result<Arc<Vec<u8>>, KiraError> {
        if let Some(page) = self.lock()?.get(&index) {
            return Ok(Arc::clone(page));
        }
        let page = Arc::new(self.inner.read_range(index * self.page_size, self.page_size)?);
        self.lock()?.insert(index, Arc::clone(&page));
        Ok(page)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<u64, Arc<Vec<u8>>>>, KiraError> {
        self.pages
            .lock()
            .map_err(|_| KiraError::Hdf5("page table lock poisoned".to_string()))
    }
}

impl<R: RangeRead> RangeRead for PagedReader<R> {
    fn read_range(&self, offset: u64, len: u64) -> Result<Vec<u8>, KiraError> {
        if len >= self.page_size * 4 {
            debug!(offset, len, "direct range read");
            return self.inner.read_range(offset, len);
        }
        let mut out = Vec::with_capacity(len as usize);
        let end = offset + len;
        let mut position = offset;
        while position < end {
            let index = position / self.page_size;
            let page = self.page(index)?;
            let start = (position - index * self.page_size) as usize;
            if start >= page.len() {
                break;
            }
            let take = ((end - position) as usize).min(page.len() - start);
            out.extend_from_slice(&page[start..start + take]);
            position += take as u64;
            if page.len() < self.page_size as usize {
                break;
            }
        }
        Ok(out)
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counted {
        bytes: Vec<u8>,
        reads: AtomicUsize,
    }

    impl RangeRead for Counted {
        fn read_range(&self, offset: u64, len: u64) -> Result<Vec<u8>, KiraError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let start = (offset as usize).min(self.bytes.len());
            let end = (start + len as usize).min(self.bytes.len());
            Ok(self.bytes[start..end].to_vec())
        }

        fn describe(&self) -> String {
            "memory".to_string()
        }
    }

    fn counted(len: usize) -> Counted {
        Counted {
            bytes: (0..len).map(|i| (i % 251) as u8).collect(),
            reads: AtomicUsize::new(0),
        }
    }

    #[test]
    fn small_reads_share_pages() {
        let reader = PagedReader::new(counted(1000), 64);
        assert_eq!(reader.read_range(10, 4).unwrap(), vec![10, 11, 12, 13]);
        assert_eq!(reader.read_range(60, 8).unwrap(), (60..68).collect::<Vec<u8>>());
        assert_eq!(reader.read_range(20, 4).unwrap(), vec![20, 21, 22, 23]);
        // pages 0 and 1 only
        assert_eq!(reader.inner.reads.load(Ordering::SeqCst), 2);
        assert_eq!(reader.pages_held(), 2);
    }

    #[test]
    fn large_reads_bypass_pages() {
        let reader = PagedReader::new(counted(1000), 64);
        assert_eq!(reader.read_range(0, 512).unwrap().len(), 512);
        assert_eq!(reader.pages_held(), 0);
    }

    #[test]
    fn reads_stop_at_end_of_object() {
        let reader = PagedReader::new(counted(100), 64);
        assert_eq!(reader.read_range(90, 30).unwrap().len(), 10);
        assert!(reader.read_range(200, 8).unwrap().is_empty());
    }
}
