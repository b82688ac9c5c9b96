//! Plugin registry - discovers plugin packages and owns the catalog.
//!
//! The registry is responsible for:
//! - Scanning each configured root (user, developer, builtin) for packages
//! - Parsing and validating manifests, isolating failures per candidate
//! - Dropping duplicate ids (first discovered wins)
//! - Publishing the catalog as an immutable snapshot that is swapped on rescan
//! - Installing from and uninstalling into the user root

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::error::{PluginError, PluginResult};
use super::manifest::PackageManifest;
use super::PluginId;

/// Where a plugin package was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Installed by the user (removable).
    User,
    /// Linked from a development checkout.
    Developer,
    /// Shipped alongside the application.
    Builtin,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::User => "user",
            SourceKind::Developer => "developer",
            SourceKind::Builtin => "builtin",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A root directory whose immediate subdirectories are plugin candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRoot {
    pub kind: SourceKind,
    pub path: PathBuf,
}

impl PluginRoot {
    pub fn new(kind: SourceKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// A discovered plugin. Immutable until the next rescan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginEntity {
    pub id: PluginId,
    pub name: String,
    pub title: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub source_kind: SourceKind,
    /// Package root directory.
    pub path: PathBuf,
    /// Resolved entry module.
    pub entry_path: PathBuf,
}

/// Immutable catalog snapshot, in discovery order.
pub type Catalog = Arc<Vec<Arc<PluginEntity>>>;

/// Discovers plugins and holds the current catalog snapshot.
pub struct PluginRegistry {
    roots: Vec<PluginRoot>,
    catalog: RwLock<Catalog>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("roots", &self.roots)
            .field("plugins", &self.catalog.read().len())
            .finish()
    }
}

impl PluginRegistry {
    /// Create a registry over the given roots. The catalog starts empty; call
    /// [`scan`](Self::scan) to populate it.
    pub fn new(roots: Vec<PluginRoot>) -> Self {
        Self {
            roots,
            catalog: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn roots(&self) -> &[PluginRoot] {
        &self.roots
    }

    /// First configured root of the given kind.
    pub fn root_for(&self, kind: SourceKind) -> Option<&PluginRoot> {
        self.roots.iter().find(|r| r.kind == kind)
    }

    /// Rescan every root and swap in a fresh catalog.
    ///
    /// Readers holding the previous snapshot keep a consistent view; the new
    /// catalog becomes visible atomically once the scan completes.
    pub fn scan(&self) -> Catalog {
        let mut seen = HashSet::new();
        let mut plugins = Vec::new();

        for root in &self.roots {
            scan_root(root, &mut seen, &mut plugins);
        }

        info!(count = plugins.len(), "plugin scan complete");

        let catalog: Catalog = Arc::new(plugins);
        *self.catalog.write() = Arc::clone(&catalog);
        catalog
    }

    /// Current catalog snapshot.
    pub fn plugins(&self) -> Catalog {
        Arc::clone(&self.catalog.read())
    }

    pub fn len(&self) -> usize {
        self.catalog.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.read().is_empty()
    }

    /// Find a plugin by id.
    pub fn find(&self, id: &str) -> Option<Arc<PluginEntity>> {
        self.catalog.read().iter().find(|p| p.id == id).cloned()
    }

    /// Find a plugin by id, accepting only the listed source kinds and
    /// preferring them in order. An empty tier list behaves like [`find`](Self::find).
    pub fn find_tiered(&self, id: &str, tiers: &[SourceKind]) -> Option<Arc<PluginEntity>> {
        if tiers.is_empty() {
            return self.find(id);
        }

        let catalog = self.plugins();
        tiers.iter().find_map(|tier| {
            catalog
                .iter()
                .find(|p| p.id == id && p.source_kind == *tier)
                .cloned()
        })
    }

    /// Remove a user-installed plugin from disk and rescan.
    pub fn uninstall(&self, id: &str) -> PluginResult<Arc<PluginEntity>> {
        let plugin = self
            .find(id)
            .ok_or_else(|| PluginError::PluginNotFound(id.to_string()))?;

        if plugin.source_kind != SourceKind::User {
            return Err(PluginError::NotRemovable(id.to_string()));
        }

        info!(plugin = %plugin.id, path = %plugin.path.display(), "uninstalling plugin");
        std::fs::remove_dir_all(&plugin.path)?;
        self.scan();

        Ok(plugin)
    }

    /// Copy an unpacked plugin package into the user root and rescan.
    pub fn install_local(&self, source: &Path) -> PluginResult<Arc<PluginEntity>> {
        let manifest = PackageManifest::load(source)?;
        let id = manifest.validate(source)?.id.to_string();

        let root = self
            .root_for(SourceKind::User)
            .ok_or(PluginError::NoRoot("user"))?;

        let target = root.path.join(&id);
        if target.exists() || self.find(&id).is_some() {
            return Err(PluginError::AlreadyInstalled(id));
        }

        info!(plugin = %id, from = %source.display(), to = %target.display(), "installing plugin");
        copy_tree(source, &target)?;
        self.scan();

        self.find(&id)
            .ok_or(PluginError::PluginNotFound(id))
    }
}

/// Scan one root, appending valid, not-yet-seen plugins in directory-name order.
fn scan_root(root: &PluginRoot, seen: &mut HashSet<PluginId>, out: &mut Vec<Arc<PluginEntity>>) {
    let entries = match std::fs::read_dir(&root.path) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(root = %root.path.display(), kind = %root.kind, error = %e, "plugin root not readable, skipping");
            return;
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();

    for dir in dirs {
        match load_entity(&dir, root.kind) {
            Ok(entity) => {
                if !seen.insert(entity.id.clone()) {
                    warn!(
                        plugin = %entity.id,
                        path = %dir.display(),
                        "duplicate plugin id, keeping the first discovered"
                    );
                    continue;
                }
                debug!(plugin = %entity.id, kind = %root.kind, "discovered plugin");
                out.push(Arc::new(entity));
            }
            Err(PluginError::ManifestNotFound(_)) | Err(PluginError::NotAPlugin(_)) => {
                // Not a plugin directory
                continue;
            }
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "skipping plugin candidate");
                continue;
            }
        }
    }
}

fn load_entity(dir: &Path, kind: SourceKind) -> PluginResult<PluginEntity> {
    let manifest = PackageManifest::load(dir)?;
    let valid = manifest.validate(dir)?;

    let declaration = manifest.lantern.as_ref();
    let name = manifest
        .name
        .clone()
        .unwrap_or_else(|| valid.id.to_string());

    Ok(PluginEntity {
        id: valid.id.to_string(),
        title: declaration
            .and_then(|d| d.title.clone())
            .unwrap_or_else(|| name.clone()),
        name,
        version: manifest.version.clone().unwrap_or_else(|| "0.0.0".to_string()),
        author: manifest
            .author
            .as_ref()
            .map(|a| a.display_name().to_string())
            .unwrap_or_default(),
        description: manifest.description.clone().unwrap_or_default(),
        source_kind: kind,
        path: dir.to_path_buf(),
        entry_path: PackageManifest::entry_path(dir, valid.entry),
    })
}

fn copy_tree(source: &Path, target: &Path) -> PluginResult<()> {
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| PluginError::Io(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| PluginError::Io(std::io::Error::other(e)))?;
        let dest = target.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}
