use ndarray::{Array2, ArrayView1};
use serde::Serialize;

/// Dense matrix with row (gene) and column (sample) labels.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMatrix<T> {
    rows: Vec<String>,
    columns: Vec<String>,
    values: Array2<T>,
}

pub type ExpressionTable = LabeledMatrix<u32>;
pub type NormalizedTable = LabeledMatrix<f32>;

impl<T: Clone> LabeledMatrix<T> {
    /// Panics if the label counts do not match the matrix shape.
    pub fn new(rows: Vec<String>, columns: Vec<String>, values: Array2<T>) -> Self {
        assert_eq!(values.nrows(), rows.len(), "row label count");
        assert_eq!(values.ncols(), columns.len(), "column label count");
        Self {
            rows,
            columns,
            values,
        }
    }

    pub fn rows(&self) -> &[String] {
        &self.rows
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<T> {
        &self.values
    }

    pub fn into_values(self) -> Array2<T> {
        self.values
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn column(&self, label: &str) -> Option<ArrayView1<'_, T>> {
        let idx = self.columns.iter().position(|col| col == label)?;
        Some(self.values.column(idx))
    }

    pub fn get(&self, row: &str, column: &str) -> Option<&T> {
        let r = self.rows.iter().position(|value| value == row)?;
        let c = self.columns.iter().position(|value| value == column)?;
        self.values.get((r, c))
    }

    /// Same labels, new cell values.
    pub fn with_values<U>(&self, values: Array2<U>) -> LabeledMatrix<U> {
        assert_eq!(values.dim(), self.values.dim(), "shape must be preserved");
        LabeledMatrix {
            rows: self.rows.clone(),
            columns: self.columns.clone(),
            values,
        }
    }
}

/// Sample metadata: one row per sample, one column per field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct MetadataTable {
    pub fields: Vec<String>,
    pub accessions: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl MetadataTable {
    pub fn len(&self) -> usize {
        self.accessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accessions.is_empty()
    }

    pub fn value(&self, accession: &str, field: &str) -> Option<&str> {
        let r = self.accessions.iter().position(|acc| acc == accession)?;
        let c = self.fields.iter().position(|name| name == field)?;
        self.rows.get(r)?.get(c).map(String::as_str)
    }
}
