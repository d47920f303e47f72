use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Species {
    Human,
    Mouse,
}

impl Species {
    pub fn as_str(&self) -> &'static str {
        match self {
            Species::Human => "human",
            Species::Mouse => "mouse",
        }
    }

    pub fn ensembl_name(&self) -> &'static str {
        match self {
            Species::Human => "homo_sapiens",
            Species::Mouse => "mus_musculus",
        }
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Species {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "human" | "homo_sapiens" => Ok(Species::Human),
            "mouse" | "mus_musculus" => Ok(Species::Mouse),
            _ => Err(KiraError::UnknownSpecies(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMethod {
    Quantile,
    LogQuantile,
    Cpm,
    Tmm,
}

impl fmt::Display for NormalizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizationMethod::Quantile => write!(f, "quantile"),
            NormalizationMethod::LogQuantile => write!(f, "log_quantile"),
            NormalizationMethod::Cpm => write!(f, "cpm"),
            NormalizationMethod::Tmm => write!(f, "tmm"),
        }
    }
}

impl FromStr for NormalizationMethod {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "quantile" | "quantiles" => Ok(NormalizationMethod::Quantile),
            "log_quantile" | "log_quantiles" => Ok(NormalizationMethod::LogQuantile),
            "cpm" => Ok(NormalizationMethod::Cpm),
            "tmm" => Ok(NormalizationMethod::Tmm),
            _ => Err(KiraError::InvalidNormalization(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GeneIdentifier {
    #[default]
    Symbol,
    Ensembl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Local,
    Remote,
}

/// Object-store address parsed from `scheme://endpoint/bucket/key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ObjectLocation {
    pub endpoint: String,
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn s3_url(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }

    pub fn http_url(&self) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, self.key)
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.http_url())
    }
}

impl FromStr for ObjectLocation {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim().trim_end_matches('/');
        let (scheme, rest) = trimmed
            .split_once("://")
            .ok_or_else(|| KiraError::InvalidSource(value.to_string()))?;
        let (head, key) = rest
            .rsplit_once('/')
            .ok_or_else(|| KiraError::InvalidSource(value.to_string()))?;
        let (host, bucket) = head
            .rsplit_once('/')
            .ok_or_else(|| KiraError::InvalidSource(value.to_string()))?;
        if scheme.is_empty() || host.is_empty() || bucket.is_empty() || key.is_empty() {
            return Err(KiraError::InvalidSource(value.to_string()));
        }
        Ok(Self {
            endpoint: format!("{scheme}://{host}"),
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Local(PathBuf),
    Remote(ObjectLocation),
}

impl SourceSpec {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceSpec::Local(_) => SourceKind::Local,
            SourceSpec::Remote(_) => SourceKind::Remote,
        }
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Local(path) => write!(f, "{}", path.display()),
            SourceSpec::Remote(location) => write!(f, "{location}"),
        }
    }
}

impl FromStr for SourceSpec {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(KiraError::InvalidSource(value.to_string()));
        }
        if trimmed.starts_with("http") {
            return Ok(SourceSpec::Remote(trimmed.parse()?));
        }
        Ok(SourceSpec::Local(PathBuf::from(trimmed)))
    }
}
