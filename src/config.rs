use anyhow::{Context, Result, bail};
use converge::ConvergeOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("rowcloud"))
}

/// Default location of `config.toml`
pub fn default_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// SQLite file holding desired state
    pub database: String,
    pub sandbox: SandboxConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    /// JSON file holding the simulated provider's state
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub jobs: usize,
    pub executor_halt_after: usize,
    pub loop_halt_after: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: "~/.local/share/rowcloud/rowcloud.db".to_string(),
            sandbox: SandboxConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            state: "~/.local/share/rowcloud/sandbox.json".to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let defaults = ConvergeOptions::default();
        Self {
            jobs: defaults.jobs,
            executor_halt_after: defaults.executor_halt_after,
            loop_halt_after: defaults.loop_halt_after,
        }
    }
}

impl Config {
    /// Load the config file
    ///
    /// An explicit path must exist; the default location may be absent, in
    /// which case built-in defaults apply.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                path.to_path_buf()
            }
            None => {
                let path = default_path()?;
                if !path.exists() {
                    log::debug!("no config at {}, using defaults", path.display());
                    return Ok(Self::default());
                }
                path
            }
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.options().validate()?;
        Ok(config)
    }

    /// Get expanded database path
    pub fn database_path(&self) -> PathBuf {
        expand(&self.database)
    }

    /// Get expanded sandbox state path
    pub fn sandbox_path(&self) -> PathBuf {
        expand(&self.sandbox.state)
    }

    pub fn options(&self) -> ConvergeOptions {
        ConvergeOptions {
            dry_run: false,
            jobs: self.engine.jobs,
            executor_halt_after: self.engine.executor_halt_after,
            loop_halt_after: self.engine.loop_halt_after,
        }
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.engine.jobs, 16);
        assert_eq!(config.engine.executor_halt_after, 2);
        assert_eq!(config.engine.loop_halt_after, 4);
    }

    #[test]
    fn test_partial_config() {
        let config = Config::parse(
            r#"
            database = "/tmp/rows.db"

            [engine]
            jobs = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path(), PathBuf::from("/tmp/rows.db"));
        assert_eq!(config.engine.jobs, 4);
        assert_eq!(config.engine.loop_halt_after, 4);
        assert_eq!(config.sandbox, SandboxConfig::default());
    }

    #[test]
    fn test_zero_thresholds_rejected() {
        assert!(Config::parse("[engine]\njobs = 0").is_err());
        assert!(Config::parse("[engine]\nloop_halt_after = 0").is_err());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(Config::parse("databse = \"typo.db\"").is_err());
    }

    #[test]
    fn test_tilde_expansion() {
        let config = Config::default();
        let path = config.sandbox_path();
        assert!(!path.to_string_lossy().starts_with('~'));
        assert!(path.ends_with(".local/share/rowcloud/sandbox.json"));
    }

    #[test]
    fn test_load_explicit_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "[sandbox]\nstate = \"/tmp/cloud.json\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.sandbox_path(), PathBuf::from("/tmp/cloud.json"));

        assert!(Config::load(Some(&tmp.path().join("missing.toml"))).is_err());
    }
}
