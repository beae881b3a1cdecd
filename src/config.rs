use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the xmp-gate CLI and library.
///
/// Controls how the file subsystem embeds packets and how the batch
/// pipeline treats the files it modifies.
///
/// # Loading
///
/// ```rust,no_run
/// use xmp_gate::config::Config;
///
/// // From a JSON file
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.files.sidecar_fallback = true;
/// config.output.backup_originals = false;
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Options handed to the file subsystem when the engine is initialized.
    pub files: FileOptions,
    /// Batch write behavior (dry run, backups).
    pub output: OutputConfig,
}

/// Options for the file subsystem.
///
/// `FileOptions::default()` is the option set used by
/// [`EngineLifecycle::initialize`](crate::EngineLifecycle::initialize) when no
/// configuration is supplied.
///
/// # Example
///
/// ```rust
/// use xmp_gate::config::FileOptions;
///
/// let options = FileOptions {
///     packet_padding: 0,          // no room for in-place updates
///     scan_unknown_formats: true, // find packets in unrecognised files
///     sidecar_fallback: true,     // HEIC/RAW get a .xmp next to them
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOptions {
    /// Bytes of whitespace appended inside the packet trailer so later
    /// updates can be rewritten in place.
    pub packet_padding: usize,
    /// Scan files of unknown type for a raw `<?xpacket` block when reading.
    pub scan_unknown_formats: bool,
    /// Read and write a `.xmp` sidecar for formats without an embedding rule.
    pub sidecar_fallback: bool,
}

/// Output and behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// If `true`, report what would be written without modifying any files.
    pub dry_run: bool,
    /// If `true`, create a `.bak` copy before modifying a file.
    pub backup_originals: bool,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            packet_padding: 2048,
            scan_unknown_formats: true,
            sidecar_fallback: false,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            backup_originals: true,
        }
    }
}

impl Config {
    /// Resolve the config file path — same directory as the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::debug!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(config_path)
    }
}
