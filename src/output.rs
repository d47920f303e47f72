use std::fmt::Display;
use std::io::{self, Write};
use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::app::{DownloadResult, ProgressEvent, ProgressSink, VersionsResult};
use crate::error::KiraError;
use crate::inspect::TreeEntry;
use crate::table::{LabeledMatrix, MetadataTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

/// Row-major JSON rendering of a labelled matrix.
#[derive(Debug, Serialize)]
pub struct MatrixJson<'a, T> {
    pub rows: &'a [String],
    pub columns: &'a [String],
    pub values: Vec<Vec<T>>,
}

impl<'a, T: Clone> MatrixJson<'a, T> {
    pub fn new(matrix: &'a LabeledMatrix<T>) -> Self {
        Self {
            rows: matrix.rows(),
            columns: matrix.columns(),
            values: matrix
                .values()
                .rows()
                .into_iter()
                .map(|row| row.to_vec())
                .collect(),
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_versions(result: &VersionsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_matrix<T: Clone + Serialize>(matrix: &LabeledMatrix<T>) -> io::Result<()> {
        Self::print_json(&MatrixJson::new(matrix))
    }

    pub fn print_metadata(table: &MetadataTable) -> io::Result<()> {
        Self::print_json(table)
    }

    pub fn print_tree(entries: &[TreeEntry]) -> io::Result<()> {
        Self::print_json(&entries)
    }

    pub fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct TsvOutput;

impl TsvOutput {
    /// Header is an empty corner cell followed by the column labels.
    pub fn write_matrix<T: Display + Clone, W: Write>(
        writer: W,
        matrix: &LabeledMatrix<T>,
    ) -> Result<(), KiraError> {
        let mut tsv = csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer);
        let mut header = Vec::with_capacity(matrix.columns().len() + 1);
        header.push(String::new());
        header.extend(matrix.columns().iter().cloned());
        tsv.write_record(&header).map_err(csv_error)?;

        for (label, row) in matrix.rows().iter().zip(matrix.values().rows()) {
            let mut record = Vec::with_capacity(row.len() + 1);
            record.push(label.clone());
            record.extend(row.iter().map(|value| value.to_string()));
            tsv.write_record(&record).map_err(csv_error)?;
        }
        tsv.flush()
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    pub fn write_metadata<W: Write>(writer: W, table: &MetadataTable) -> Result<(), KiraError> {
        let mut tsv = csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer);
        let mut header = vec!["sample".to_string()];
        header.extend(table.fields.iter().cloned());
        tsv.write_record(&header).map_err(csv_error)?;
        for (accession, row) in table.accessions.iter().zip(&table.rows) {
            let mut record = vec![accession.as_str()];
            record.extend(row.iter().map(String::as_str));
            tsv.write_record(&record).map_err(csv_error)?;
        }
        tsv.flush()
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }
}

fn csv_error(err: csv::Error) -> KiraError {
    KiraError::Filesystem(err.to_string())
}

/// Terminal progress bar for column fetches and downloads.
/// Terminal progress bar. Counter events may arrive out of order from
/// worker threads; the bar only ever moves forward within one counter.
pub struct BarSink {
    bar: ProgressBar,
    /// `(total, furthest position shown)` of the current counter.
    shown: Mutex<(u64, u64)>,
}

impl BarSink {
    pub fn new() -> Self {
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        Self::with_bar(ProgressBar::new(0).with_style(style))
    }

    fn with_bar(bar: ProgressBar) -> Self {
        Self {
            bar,
            shown: Mutex::new((0, 0)),
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for BarSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BarSink {
    fn event(&self, event: ProgressEvent) {
        match event.progress {
            Some((done, total)) => {
                let Ok(mut shown) = self.shown.lock() else {
                    return;
                };
                if shown.0 != total {
                    *shown = (total, 0);
                    self.bar.set_length(total);
                    self.bar.set_position(0);
                }
                if done >= shown.1 {
                    shown.1 = done;
                    self.bar.set_position(done);
                    self.bar.set_message(event.message);
                }
            }
            None => self.bar.println(event.message),
        }
    }
}
