//! HDF5-backed [`ExpressionHandle`].

use std::path::Path;

use hdf5::types::{FixedAscii, FixedUnicode, VarLenAscii, VarLenUnicode};
use hdf5::{Dataset, File};
use ndarray::s;
use tracing::debug;

use crate::error::KiraError;
use crate::source::{EXPRESSION, ExpressionHandle, NodeEntry, NodeKind};

const FIXED_STRING_LEN: usize = 1024;

fn h5err(err: hdf5::Error) -> KiraError {
    KiraError::Hdf5(err.to_string())
}

pub struct H5Handle {
    file: File,
}

impl H5Handle {
    pub fn open(path: &Path) -> Result<Self, KiraError> {
        let file = File::open(path).map_err(|err| KiraError::SourceUnavailable {
            source_id: path.display().to_string(),
            message: err.to_string(),
        })?;
        debug!(path = %path.display(), "opened HDF5 file");
        Ok(Self { file })
    }

    fn dataset(&self, path: &str) -> Result<Dataset, KiraError> {
        if !self.has_path(path) {
            return Err(KiraError::MissingField(path.to_string()));
        }
        self.file.dataset(path).map_err(h5err)
    }

    fn group(&self, path: &str) -> Result<hdf5::Group, KiraError> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return self.file.group("/").map_err(h5err);
        }
        if !self.has_path(trimmed) {
            return Err(KiraError::MissingField(path.to_string()));
        }
        self.file.group(trimmed).map_err(h5err)
    }
}

impl ExpressionHandle for H5Handle {
    fn has_path(&self, path: &str) -> bool {
        // Check each prefix so a missing intermediate group is a plain `false`.
        let mut prefix = String::new();
        for part in path.trim_matches('/').split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);
            if !self.file.link_exists(&prefix) {
                return false;
            }
        }
        !prefix.is_empty()
    }

    fn member_names(&self, group: &str) -> Result<Vec<String>, KiraError> {
        self.group(group)?.member_names().map_err(h5err)
    }

    fn read_strings(&self, path: &str) -> Result<Vec<String>, KiraError> {
        let ds = self.dataset(path)?;
        if let Ok(values) = ds.read_1d::<VarLenUnicode>() {
            return Ok(values.iter().map(|v| v.as_str().to_string()).collect());
        }
        if let Ok(values) = ds.read_1d::<VarLenAscii>() {
            return Ok(values.iter().map(|v| v.as_str().to_string()).collect());
        }
        if let Ok(values) = ds.read_1d::<FixedAscii<FIXED_STRING_LEN>>() {
            return Ok(values.iter().map(|v| v.as_str().to_string()).collect());
        }
        let values = ds
            .read_1d::<FixedUnicode<FIXED_STRING_LEN>>()
            .map_err(|err| KiraError::Hdf5(format!("{path} is not a string dataset: {err}")))?;
        Ok(values.iter().map(|v| v.as_str().to_string()).collect())
    }

    fn read_floats(&self, path: &str) -> Result<Vec<f64>, KiraError> {
        let ds = self.dataset(path)?;
        Ok(ds.read_1d::<f64>().map_err(h5err)?.to_vec())
    }

    fn matrix_shape(&self) -> Result<(usize, usize), KiraError> {
        let shape = self.dataset(EXPRESSION)?.shape();
        match shape.as_slice() {
            [genes, samples] => Ok((*genes, *samples)),
            other => Err(KiraError::Hdf5(format!(
                "{EXPRESSION} must be two-dimensional, found shape {other:?}"
            ))),
        }
    }

    fn read_column(&self, sample: usize) -> Result<Vec<u32>, KiraError> {
        let ds = self.dataset(EXPRESSION)?;
        let (_, samples) = self.matrix_shape()?;
        if sample >= samples {
            return Err(KiraError::SampleIndexOutOfRange {
                index: sample,
                len: samples,
            });
        }
        let column = ds
            .read_slice_1d::<u32, _>(s![.., sample])
            .map_err(h5err)?;
        Ok(column.to_vec())
    }

    fn entries(&self, group: &str) -> Result<Vec<NodeEntry>, KiraError> {
        let group = self.group(group)?;
        let mut entries = Vec::new();
        for name in group.member_names().map_err(h5err)? {
            let kind = match group.dataset(&name) {
                Ok(ds) => NodeKind::Dataset {
                    shape: ds.shape(),
                    dtype: ds
                        .dtype()
                        .and_then(|dtype| dtype.to_descriptor())
                        .map(|descriptor| descriptor.to_string())
                        .unwrap_or_else(|_| "unknown".to_string()),
                },
                Err(_) => NodeKind::Group,
            };
            entries.push(NodeEntry { name, kind });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use ndarray::{Array1, array};

    use super::*;

    #[test]
    fn reads_strings_and_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mini.h5");
        {
            let file = File::create(&path).unwrap();
            let samples = file.create_group("meta").unwrap().create_group("samples").unwrap();
            let acc: Array1<VarLenUnicode> = ["GSM1", "GSM2"]
                .iter()
                .map(|v| VarLenUnicode::from_str(v).unwrap())
                .collect();
            samples
                .new_dataset_builder()
                .with_data(&acc)
                .create("geo_accession")
                .unwrap();
            file.create_group("data")
                .unwrap()
                .new_dataset_builder()
                .with_data(&array![[1u32, 2], [3, 4], [5, 6]])
                .create("expression")
                .unwrap();
        }

        let handle = H5Handle::open(&path).unwrap();
        assert!(handle.has_path("meta/samples/geo_accession"));
        assert!(!handle.has_path("meta/genes/symbol"));
        assert_eq!(
            handle.read_strings("meta/samples/geo_accession").unwrap(),
            vec!["GSM1", "GSM2"]
        );
        assert_eq!(handle.matrix_shape().unwrap(), (3, 2));
        assert_eq!(handle.read_column(1).unwrap(), vec![2, 4, 6]);
        assert!(handle.read_column(2).is_err());
    }
}
