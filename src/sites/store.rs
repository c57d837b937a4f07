//! JSON-file backed store of site configurations

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::{SiteConfig, default_sites};

/// Hostname → [`SiteConfig`] map persisted as a single JSON object
#[derive(Debug, Clone)]
pub struct SiteConfigStore {
    path: PathBuf,
    sites: BTreeMap<String, SiteConfig>,
}

impl SiteConfigStore {
    /// Load the store at `path`; a missing file is an empty store
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let sites = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read site configurations from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Malformed site configurations in {}", path.display()))?
        } else {
            BTreeMap::new()
        };
        debug!("Loaded {} site configuration(s) from {}", sites.len(), path.display());
        Ok(Self { path, sites })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Merge the built-in defaults under the stored entries and persist
    ///
    /// Entries already present win over defaults with the same hostname.
    pub fn install_defaults(&mut self) -> Result<usize> {
        let mut added = 0;
        for (host, config) in default_sites() {
            if !self.sites.contains_key(&host) {
                self.sites.insert(host, config);
                added += 1;
            }
        }
        self.save()?;
        info!(
            "Default and existing site configurations merged ({} added, {} total)",
            added,
            self.sites.len()
        );
        Ok(added)
    }

    /// Configuration for `host`, trying parent domains when there is no exact entry
    pub fn lookup(&self, host: &str) -> Option<(&str, &SiteConfig)> {
        let mut candidate = host.trim_end_matches('.');
        loop {
            if let Some((key, config)) = self.sites.get_key_value(candidate) {
                return Some((key.as_str(), config));
            }
            let (_, parent) = candidate.split_once('.')?;
            // Never fall back to a bare TLD
            if !parent.contains('.') && !self.sites.contains_key(parent) {
                return None;
            }
            candidate = parent;
        }
    }

    pub fn get(&self, host: &str) -> Option<&SiteConfig> {
        self.sites.get(host)
    }

    pub fn set(&mut self, host: &str, config: SiteConfig) -> Result<()> {
        self.sites.insert(host.to_string(), config);
        self.save()
    }

    pub fn remove(&mut self, host: &str) -> Result<Option<SiteConfig>> {
        let removed = self.sites.remove(host);
        if removed.is_some() {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SiteConfig)> {
        self.sites.iter().map(|(host, config)| (host.as_str(), config))
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.sites)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write site configurations to {}", self.path.display()))
    }
}
