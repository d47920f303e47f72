use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::Species;
use crate::error::KiraError;

const DEFAULT_CATALOGUE: &str = include_str!("../config/archs4.json");

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub species: BTreeMap<String, SpeciesEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SpeciesEntry {
    #[serde(default)]
    pub remote: Option<String>,
    #[serde(default)]
    pub versions: BTreeMap<String, ReleaseEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ReleaseEntry {
    Shorthand(String),
    Detailed(ReleaseEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ReleaseEntryObject {
    pub primary: String,
    #[serde(default)]
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub primary: String,
    pub fallback: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SpeciesCatalogue {
    pub remote: Option<String>,
    pub releases: BTreeMap<String, Release>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub species: HashMap<Species, SpeciesCatalogue>,
}

impl ResolvedConfig {
    /// Known versions, `latest` first, then newest to oldest.
    pub fn versions(&self, species: Species) -> Vec<String> {
        let Some(catalogue) = self.species.get(&species) else {
            return Vec::new();
        };
        let mut versions: Vec<String> = catalogue
            .releases
            .keys()
            .filter(|v| v.as_str() != "latest")
            .cloned()
            .collect();
        versions.sort_by(|a, b| compare_versions(b, a));
        if catalogue.releases.contains_key("latest") {
            versions.insert(0, "latest".to_string());
        }
        versions
    }

    pub fn release(&self, species: Species, version: &str) -> Result<&Release, KiraError> {
        self.species
            .get(&species)
            .ok_or_else(|| KiraError::UnknownSpecies(species.to_string()))?
            .releases
            .get(version)
            .ok_or_else(|| KiraError::UnknownVersion {
                species: species.to_string(),
                version: version.to_string(),
            })
    }

    pub fn remote_source(&self, species: Species) -> Result<&str, KiraError> {
        self.species
            .get(&species)
            .and_then(|catalogue| catalogue.remote.as_deref())
            .ok_or_else(|| {
                KiraError::InvalidSource(format!(
                    "no default remote source configured for {species}"
                ))
            })
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads an override catalogue, or the one bundled with the binary.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let content = match path {
            Some(path) => {
                let config_path = PathBuf::from(path);
                fs::read_to_string(&config_path)
                    .map_err(|_| KiraError::ConfigRead(config_path.clone()))?
            }
            None => DEFAULT_CATALOGUE.to_string(),
        };
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;
        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let species = config
            .species
            .into_iter()
            .map(|(name, entry)| {
                let species: Species = name.parse()?;
                let releases = entry
                    .versions
                    .into_iter()
                    .map(|(version, release)| {
                        let release = match release {
                            ReleaseEntry::Shorthand(primary) => Release {
                                primary,
                                fallback: None,
                            },
                            ReleaseEntry::Detailed(obj) => Release {
                                primary: obj.primary,
                                fallback: obj.fallback.filter(|url| !url.trim().is_empty()),
                            },
                        };
                        if release.primary.trim().is_empty() {
                            return Err(KiraError::ConfigParse(format!(
                                "{name} {version}: missing primary URL"
                            )));
                        }
                        Ok((version, release))
                    })
                    .collect::<Result<BTreeMap<_, _>, KiraError>>()?;
                Ok((
                    species,
                    SpeciesCatalogue {
                        remote: entry.remote,
                        releases,
                    },
                ))
            })
            .collect::<Result<HashMap<_, _>, KiraError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            species,
        })
    }
}

fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |v: &str| {
        v.split('.')
            .map(|part| part.parse::<u64>().unwrap_or(0))
            .collect::<Vec<_>>()
    };
    parse(a).cmp(&parse(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_catalogue_resolves() {
        let resolved = ConfigLoader::resolve(None).unwrap();
        assert_eq!(resolved.schema_version, 1);
        let versions = resolved.versions(Species::Human);
        assert_eq!(versions.first().map(String::as_str), Some("latest"));
        assert!(resolved.release(Species::Mouse, "latest").unwrap().fallback.is_some());
        assert!(resolved.remote_source(Species::Human).unwrap().starts_with("https://"));
    }

    #[test]
    fn versions_sort_numerically() {
        assert_eq!(
            compare_versions("2.10", "2.9"),
            std::cmp::Ordering::Greater
        );
    }
}
