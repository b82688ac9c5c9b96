//! Plugin package manifest parsing.
//!
//! Each plugin package carries a `package.json` at its root. Only packages
//! that include a `"lantern"` declaration object are treated as plugins:
//!
//! ```json
//! {
//!   "name": "git-tools",
//!   "version": "1.2.0",
//!   "author": "Jane Doe",
//!   "main": "dist/index.js",
//!   "lantern": { "id": "git", "title": "Git Tools" }
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::{PluginError, PluginResult};

/// File name of the package descriptor inside a plugin directory.
pub const MANIFEST_FILE: &str = "package.json";

/// Package descriptor parsed from `package.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageManifest {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub author: Option<Author>,

    /// Entry module, relative to the package root.
    #[serde(default)]
    pub main: Option<String>,

    /// Plugin declaration. Packages without it are not plugins.
    #[serde(default)]
    pub lantern: Option<PluginDeclaration>,
}

/// `author` may be a plain string or an npm-style person object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Author {
    Name(String),
    Person {
        name: String,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
}

impl Author {
    pub fn display_name(&self) -> &str {
        match self {
            Author::Name(name) => name,
            Author::Person { name, .. } => name,
        }
    }
}

/// The `"lantern"` declaration object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginDeclaration {
    /// Unique plugin id; namespaces every action the plugin contributes.
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub title: Option<String>,

    /// Overrides the package-level `main` when present.
    #[serde(default)]
    pub main: Option<String>,
}

/// A manifest that passed validation.
#[derive(Debug, Clone)]
pub struct ValidManifest<'a> {
    pub id: &'a str,
    pub entry: &'a str,
}

impl PackageManifest {
    /// Load the manifest from a directory containing `package.json`.
    pub fn load(plugin_dir: &Path) -> PluginResult<Self> {
        let manifest_path = plugin_dir.join(MANIFEST_FILE);

        if !manifest_path.is_file() {
            return Err(PluginError::ManifestNotFound(plugin_dir.to_path_buf()));
        }

        let content = std::fs::read_to_string(&manifest_path)?;

        serde_json::from_str(&content).map_err(|e| PluginError::ManifestInvalid {
            path: manifest_path,
            message: e.to_string(),
        })
    }

    /// Check the declaration and required fields.
    ///
    /// A missing declaration yields [`PluginError::NotAPlugin`], which callers
    /// treat as "skip quietly" rather than as a broken package.
    pub fn validate(&self, plugin_dir: &Path) -> PluginResult<ValidManifest<'_>> {
        let manifest_path = || plugin_dir.join(MANIFEST_FILE);

        let declaration = self
            .lantern
            .as_ref()
            .ok_or_else(|| PluginError::NotAPlugin(plugin_dir.to_path_buf()))?;

        let id = declaration.id.trim();
        if id.is_empty() {
            return Err(PluginError::ManifestInvalid {
                path: manifest_path(),
                message: "lantern.id is required".to_string(),
            });
        }
        if id.contains(':') {
            return Err(PluginError::ManifestInvalid {
                path: manifest_path(),
                message: format!("lantern.id '{}' must not contain ':'", id),
            });
        }
        // The id names the install directory, so it must be a single plain
        // path component.
        if !is_safe_id(id) {
            return Err(PluginError::ManifestInvalid {
                path: manifest_path(),
                message: format!(
                    "lantern.id '{}' may only contain letters, digits, '.', '_' and '-'",
                    id
                ),
            });
        }

        let entry = declaration
            .main
            .as_deref()
            .or(self.main.as_deref())
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| PluginError::ManifestInvalid {
                path: manifest_path(),
                message: "main entry path is required".to_string(),
            })?;

        Ok(ValidManifest { id, entry })
    }

    /// Resolve the entry module path against the package root.
    pub fn entry_path(plugin_dir: &Path, entry: &str) -> PathBuf {
        plugin_dir.join(entry.trim_start_matches("./"))
    }
}

fn is_safe_id(id: &str) -> bool {
    id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
