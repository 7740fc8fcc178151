//! The loaded, indexed capability catalog.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::model::{CatalogDocument, Capability, PrivilegeLevel, RiskLevel};
use crate::validation::validate_document;
use crate::{CatalogError, Result};

/// Catalog compiled into the binary.
pub const EMBEDDED_CATALOG: &str = include_str!("../resources/capabilities.json");

/// Immutable registry of permitted operations.
///
/// Built once at startup and shared as `Arc<CapabilityCatalog>`.
#[derive(Debug, Clone)]
pub struct CapabilityCatalog {
    version: String,
    last_updated: Option<String>,
    capabilities: Vec<Capability>,
    by_id: HashMap<String, usize>,
    /// Group name to indices, each list sorted by title.
    by_group: BTreeMap<String, Vec<usize>>,
    load_error: Option<String>,
}

/// Counts over the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStatistics {
    pub total: usize,
    pub by_group: BTreeMap<String, usize>,
    pub by_privilege: BTreeMap<String, usize>,
    pub by_risk: BTreeMap<String, usize>,
}

impl CapabilityCatalog {
    /// Strictly parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: CatalogDocument = serde_json::from_str(json)?;
        Self::from_document(doc)
    }

    /// Build from an already decoded document.
    pub fn from_document(doc: CatalogDocument) -> Result<Self> {
        validate_document(&doc)?;

        let by_id = doc
            .capabilities
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();

        let mut by_group: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, cap) in doc.capabilities.iter().enumerate() {
            by_group.entry(cap.group.clone()).or_default().push(i);
        }
        for indices in by_group.values_mut() {
            indices.sort_by(|a, b| {
                doc.capabilities[*a]
                    .title
                    .cmp(&doc.capabilities[*b].title)
            });
        }

        Ok(Self {
            version: doc.version,
            last_updated: doc.last_updated,
            capabilities: doc.capabilities,
            by_id,
            by_group,
            load_error: None,
        })
    }

    /// Strictly load from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| CatalogError::ReadFile {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json(&contents)
    }

    /// Load from a file, degrading to an empty catalog on any failure.
    ///
    /// Check [`is_loaded`](Self::is_loaded) and [`load_error`](Self::load_error)
    /// afterwards.
    pub fn load(path: &Path) -> Self {
        match Self::from_file(path) {
            Ok(catalog) => {
                info!(
                    path = %path.display(),
                    capabilities = catalog.len(),
                    version = %catalog.version,
                    "Capability catalog loaded"
                );
                catalog
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Capability catalog failed to load");
                Self::degraded(e)
            }
        }
    }

    /// The catalog compiled into the binary, degrading like [`load`](Self::load).
    pub fn embedded() -> Self {
        match Self::from_json(EMBEDDED_CATALOG) {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(error = %e, "Embedded capability catalog failed to load");
                Self::degraded(e)
            }
        }
    }

    /// An empty catalog carrying the load failure.
    pub fn degraded(error: CatalogError) -> Self {
        Self {
            version: String::new(),
            last_updated: None,
            capabilities: Vec::new(),
            by_id: HashMap::new(),
            by_group: BTreeMap::new(),
            load_error: Some(error.to_string()),
        }
    }

    /// Whether the catalog loaded successfully.
    pub fn is_loaded(&self) -> bool {
        self.load_error.is_none()
    }

    /// The load failure, if any.
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn last_updated(&self) -> Option<&str> {
        self.last_updated.as_deref()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// All capabilities in document order.
    pub fn all(&self) -> &[Capability] {
        &self.capabilities
    }

    /// Look up a capability by id.
    pub fn capability(&self, id: &str) -> Option<&Capability> {
        self.by_id.get(id).map(|&i| &self.capabilities[i])
    }

    /// Whether a capability id exists.
    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Group names, sorted.
    pub fn groups(&self) -> Vec<&str> {
        self.by_group.keys().map(String::as_str).collect()
    }

    /// Capabilities in a group, sorted by title.
    pub fn by_group(&self, group: &str) -> Vec<&Capability> {
        self.by_group
            .get(group)
            .map(|indices| indices.iter().map(|&i| &self.capabilities[i]).collect())
            .unwrap_or_default()
    }

    /// Capabilities at a privilege level.
    pub fn by_privilege(&self, level: PrivilegeLevel) -> Vec<&Capability> {
        self.capabilities
            .iter()
            .filter(|c| c.privilege == level)
            .collect()
    }

    /// Capabilities of a risk class.
    pub fn by_risk(&self, risk: RiskLevel) -> Vec<&Capability> {
        self.capabilities.iter().filter(|c| c.risk == risk).collect()
    }

    /// Case-insensitive substring search over title, description and id.
    ///
    /// A blank query matches nothing.
    pub fn search(&self, query: &str) -> Vec<&Capability> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.capabilities
            .iter()
            .filter(|c| {
                c.title.to_lowercase().contains(&needle)
                    || c.description.to_lowercase().contains(&needle)
                    || c.id.to_lowercase().contains(&needle)
            })
            .collect()
    }

    /// Bundle ids of every app driven by automation capabilities.
    pub fn automation_targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = self
            .by_privilege(PrivilegeLevel::Automation)
            .into_iter()
            .flat_map(|c| c.required_apps.iter().map(String::as_str))
            .collect();
        targets.sort_unstable();
        targets.dedup();
        targets
    }

    /// Counts per group, privilege and risk.
    pub fn statistics(&self) -> CatalogStatistics {
        let mut stats = CatalogStatistics {
            total: self.capabilities.len(),
            ..Default::default()
        };
        for cap in &self.capabilities {
            *stats.by_group.entry(cap.group.clone()).or_default() += 1;
            *stats
                .by_privilege
                .entry(cap.privilege.as_str().to_string())
                .or_default() += 1;
            *stats.by_risk.entry(cap.risk.as_str().to_string()).or_default() += 1;
        }
        stats
    }
}
