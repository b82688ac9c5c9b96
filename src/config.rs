use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::hotkey::Hotkey;
use crate::plugins::{PluginRoot, SourceKind};
use crate::windows::WindowBehavior;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to create config directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config: {0}")]
    Write(std::io::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub window: WindowConfig,
    pub plugins: PluginsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub hotkey: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub spotlight: bool,
    pub spotlight_width: u32,
    pub spotlight_height: u32,
    pub follow_desktop: bool,
    pub always_on_top: bool,
    /// How long after a show blur events are ignored.
    pub guard_delay_ms: u64,
    /// How long the window stays on all workspaces after a follow-desktop show.
    pub workspace_revert_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    pub user_dir: Option<String>,
    pub developer_dir: Option<String>,
    pub builtin_dir: Option<String>,
    pub cache_actions: bool,
    pub lookup_order: Vec<SourceKind>,
    /// Limit for one call into a plugin; a call past it is abandoned.
    pub call_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            hotkey: "CommandOrControl+Shift+Space".to_string(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            spotlight: true,
            spotlight_width: 700,
            spotlight_height: 500,
            follow_desktop: true,
            always_on_top: false,
            guard_delay_ms: 500,
            workspace_revert_delay_ms: 300,
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            user_dir: None,
            developer_dir: None,
            builtin_dir: None,
            cache_actions: false,
            lookup_order: vec![SourceKind::User, SourceKind::Developer, SourceKind::Builtin],
            call_timeout_ms: 30_000,
        }
    }
}

impl PluginsConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
            })
            .join("lantern")
            .join("config.toml")
    }

    /// Load config from file, or return defaults if not found
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        let mut config = if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => config,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to parse config");
                        Self::default()
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read config");
                    Self::default()
                }
            }
        } else {
            Self::default()
        };

        config.validate();
        config
    }

    /// Validate and clamp config values to acceptable ranges
    pub fn validate(&mut self) {
        self.window.spotlight_width = self.window.spotlight_width.clamp(300, 2000);
        self.window.spotlight_height = self.window.spotlight_height.clamp(200, 1600);

        // Timing constants are tunable but must stay in a sane range
        self.window.guard_delay_ms = self.window.guard_delay_ms.clamp(50, 5000);
        self.window.workspace_revert_delay_ms =
            self.window.workspace_revert_delay_ms.clamp(50, 5000);
        self.plugins.call_timeout_ms = self.plugins.call_timeout_ms.clamp(100, 600_000);

        if let Err(e) = Hotkey::parse(&self.general.hotkey) {
            warn!(hotkey = %self.general.hotkey, error = %e, "invalid hotkey, using default");
            self.general.hotkey = GeneralConfig::default().hotkey;
        }

        let mut seen = Vec::new();
        self.plugins.lookup_order.retain(|kind| {
            let first = !seen.contains(kind);
            seen.push(*kind);
            first
        });
        if self.plugins.lookup_order.is_empty() {
            self.plugins.lookup_order = PluginsConfig::default().lookup_order;
        }

        if self.logging.level.trim().is_empty() {
            self.logging.level = LoggingConfig::default().level;
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::CreateDir)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(ConfigError::Write)?;

        Ok(())
    }

    /// Plugin roots in scan order: user, developer, builtin.
    ///
    /// The developer root only exists when configured.
    pub fn plugin_roots(&self) -> Vec<PluginRoot> {
        let mut roots = Vec::new();

        let user = self
            .plugins
            .user_dir
            .as_deref()
            .map(expand_path)
            .or_else(|| dirs::data_dir().map(|d| d.join("lantern").join("plugins")));
        if let Some(path) = user {
            roots.push(PluginRoot::new(SourceKind::User, path));
        }

        if let Some(dir) = self.plugins.developer_dir.as_deref() {
            roots.push(PluginRoot::new(SourceKind::Developer, expand_path(dir)));
        }

        let builtin = self.plugins.builtin_dir.as_deref().map(expand_path).or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(|dir| dir.join("plugins")))
        });
        if let Some(path) = builtin {
            roots.push(PluginRoot::new(SourceKind::Builtin, path));
        }

        roots
    }

    pub fn window_behavior(&self) -> WindowBehavior {
        WindowBehavior {
            spotlight: self.window.spotlight,
            width: self.window.spotlight_width,
            height: self.window.spotlight_height,
            follow_desktop: self.window.follow_desktop,
            always_on_top: self.window.always_on_top,
            guard_delay: Duration::from_millis(self.window.guard_delay_ms),
            workspace_revert_delay: Duration::from_millis(self.window.workspace_revert_delay_ms),
        }
    }
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}
