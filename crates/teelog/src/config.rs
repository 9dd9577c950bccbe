//! Session configuration and management

use crate::{Error, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Main session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Program name; also the log directory prefix. Defaults to the executable's stem.
    pub name: Option<String>,

    /// Root directory holding `<name>_log/`
    pub log_dir: PathBuf,

    /// Root used when `log_dir` cannot be written
    pub fallback_dir: PathBuf,

    /// In-place compression of the session's log file
    pub compression: Compression,

    /// Codec level override (gzip/bzip2 level, xz preset)
    pub compression_level: Option<u32>,

    /// Write records as raw bytes instead of platform text
    pub binary_mode: bool,

    /// One file per calendar day instead of one per session start
    pub single_log_per_day: bool,

    /// Suppress terminal echo; unset means "suppress when stdout is not a terminal"
    pub suppress_printout: Option<bool>,

    /// Print `[LEVEL] message` instead of ANSI colors
    pub disable_colors: bool,

    /// Default caller depth for location tags (0 = the caller of the session method)
    pub caller_depth: i32,

    /// Width of the `file:line` location tag column
    pub location_width: usize,

    /// Disable all file I/O
    pub no_log: bool,

    /// Terminate the process when every file sink failed instead of logging to stderr
    pub exit_on_fallback_exhausted: bool,

    /// Retention of old log directories
    pub retention: RetentionConfig,
}

/// Retention policy and maintenance pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Compress date directories older than this many 30-day months (0 = never)
    pub compress_after_months: u32,

    /// Delete date directories older than this many 365-day years (0 = never)
    pub delete_after_years: u32,

    /// Background maintenance threads
    pub workers: usize,

    /// Maintenance jobs that may wait for a worker
    pub queue_capacity: usize,
}

/// In-place compression codec of a log file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Bzip2,
    Xz,
}

impl Compression {
    pub const ALL: [Compression; 4] = [
        Compression::None,
        Compression::Gzip,
        Compression::Bzip2,
        Compression::Xz,
    ];

    /// File name suffix appended after `.log`
    pub fn suffix(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => ".gz",
            Compression::Bzip2 => ".bz2",
            Compression::Xz => ".xz",
        }
    }

    pub fn default_level(&self) -> u32 {
        match self {
            Compression::None => 0,
            Compression::Gzip | Compression::Bzip2 => 9,
            Compression::Xz => 6,
        }
    }

    fn level_range(&self) -> Option<(u32, u32)> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some((0, 9)),
            Compression::Bzip2 => Some((1, 9)),
            Compression::Xz => Some((0, 9)),
        }
    }

    /// Reject a level outside the codec's range. Plain files accept anything.
    pub fn check_level(&self, level: Option<u32>) -> Result<()> {
        match (level, self.level_range()) {
            (Some(level), Some((min, max))) if level < min || level > max => Err(Error::Config {
                message: format!(
                    "compression level {} out of range {}..={} for {}",
                    level, min, max, self
                ),
            }),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Bzip2 => "bzip2",
            Compression::Xz => "xz",
        };
        f.write_str(name)
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "off" => Ok(Compression::None),
            "gzip" | "gz" => Ok(Compression::Gzip),
            "bzip2" | "bz2" => Ok(Compression::Bzip2),
            "xz" | "lzma" => Ok(Compression::Xz),
            other => Err(Error::Config {
                message: format!("unknown compression '{}'", other),
            }),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            compress_after_months: 2,
            delete_after_years: 2,
            workers: 2,
            queue_capacity: 64,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: None,
            log_dir: PathBuf::from("."),
            fallback_dir: std::env::temp_dir(),
            compression: Compression::None,
            compression_level: None,
            binary_mode: false,
            single_log_per_day: false,
            suppress_printout: None,
            disable_colors: false,
            caller_depth: 0,
            location_width: 15,
            no_log: false,
            exit_on_fallback_exhausted: false,
            retention: RetentionConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Default configuration for a named program
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Load configuration from file or create default
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config_file = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        let mut config = if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)?;
            toml::from_str(&content).map_err(|e| Error::Config {
                message: format!("Failed to parse teelog config: {}", e),
            })?
        } else {
            Self::default()
        };
        config.load_env_overrides();
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, config_path: Option<&Path>) -> Result<()> {
        let config_file = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if let Some(parent) = config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| Error::Config {
            message: format!("Failed to serialize teelog config: {}", e),
        })?;

        std::fs::write(&config_file, content)?;
        Ok(())
    }

    /// Load environment variable overrides
    pub fn load_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("TEELOG_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }

        if let Ok(compression) = std::env::var("TEELOG_COMPRESSION") {
            match compression.parse() {
                Ok(compression) => self.compression = compression,
                Err(e) => tracing::warn!(
                    teelog.event = "config_override_ignored",
                    variable = "TEELOG_COMPRESSION",
                    error = %e,
                    "Ignoring invalid environment override"
                ),
            }
        }

        if let Ok(level) = std::env::var("TEELOG_COMPRESSION_LEVEL") {
            if let Ok(level) = level.trim().parse() {
                self.compression_level = Some(level);
            }
        }

        if let Ok(single) = std::env::var("TEELOG_SINGLE_LOG_PER_DAY") {
            self.single_log_per_day = single.parse().unwrap_or(self.single_log_per_day);
        }

        if let Ok(suppress) = std::env::var("TEELOG_SUPPRESS_PRINTOUT") {
            if let Ok(suppress) = suppress.parse() {
                self.suppress_printout = Some(suppress);
            }
        }

        if let Ok(disable) = std::env::var("TEELOG_DISABLE_COLORS") {
            self.disable_colors = disable.parse().unwrap_or(self.disable_colors);
        }

        if std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty()) {
            self.disable_colors = true;
        }
    }

    /// Get default configuration file path
    pub fn default_config_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("com", "teelog", "teelog").ok_or_else(|| Error::Config {
                message: "Could not determine config directory".to_string(),
            })?;

        Ok(project_dirs.config_dir().join("teelog.toml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(Error::Config {
                    message: "name must not be empty".to_string(),
                });
            }
            if name.contains(['/', '\\']) {
                return Err(Error::Config {
                    message: format!("name '{}' must not contain path separators", name),
                });
            }
        }

        self.compression.check_level(self.compression_level)?;

        if self.location_width == 0 {
            return Err(Error::Config {
                message: "location_width must be greater than 0".to_string(),
            });
        }

        if self.retention.workers == 0 {
            return Err(Error::Config {
                message: "retention.workers must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// The configured name, or the running executable's stem
    pub fn resolved_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "teelog".to_string())
    }
}
