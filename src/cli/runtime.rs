use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bridge_kernel::Config;
use tokio::fs;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const APP_DIR: &str = "baibridge";
const LOCAL_ENV: &str = "config/local.env";
const LOCAL_CONFIG: &str = "config/config.yaml";

/// Export `config/local.env` pairs the process environment does not already define.
pub fn load_local_env_overrides() {
    let path = Path::new(LOCAL_ENV);
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
        Err(err) => {
            warn!(path = %path.display(), ?err, "failed to read local.env overrides");
            return;
        }
    };

    let fresh: Vec<_> = parse_env_lines(&contents)
        .into_iter()
        .filter(|(key, _)| env::var_os(key).is_none())
        .collect();
    for (key, value) in &fresh {
        env::set_var(key, value);
    }
    info!(path = %path.display(), exported = fresh.len(), "applied local.env");
}

fn parse_env_lines(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .enumerate()
        .filter_map(|(idx, raw)| {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            match line.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    Some((key.trim().to_string(), unquote(value.trim())))
                }
                Some(_) => None,
                None => {
                    warn!(line = idx + 1, "local.env entry without '='; skipping");
                    None
                }
            }
        })
        .collect()
}

fn unquote(value: &str) -> String {
    match value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        Some(inner) => inner
            .replace("\\\"", "\"")
            .replace("\\n", "\n")
            .replace("\\r", "\r")
            .replace("\\t", "\t"),
        None => value.to_string(),
    }
}

/// `RUST_LOG` wins over `--log-level`; `--debug` wins over both.
pub fn init_logging(level: &str, debug: bool) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        let level: tracing::Level = level.parse().context("Invalid log level")?;
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("logging already initialised")?;
    Ok(())
}

/// The YAML file backing the CLI configuration.
pub struct ConfigFile {
    pub path: PathBuf,
}

impl ConfigFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// `--config`, then `config/config.yaml`, then the per-user config dir.
    pub fn locate(explicit: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = explicit {
            return Ok(Self::new(path));
        }
        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            return Ok(Self::new(local));
        }
        let base = dirs::config_dir().context("Failed to get config directory")?;
        Ok(Self::new(&base.join(APP_DIR).join("config.yaml")))
    }

    pub async fn exists(&self) -> Result<bool> {
        Ok(fs::try_exists(&self.path).await?)
    }

    /// Missing file means defaults.
    pub async fn load(&self) -> Result<Config> {
        if !self.exists().await? {
            debug!(path = %self.path.display(), "no config file; using defaults");
            return Ok(Config::default());
        }
        let raw = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        let config = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        info!(path = %self.path.display(), "configuration loaded");
        Ok(config)
    }

    pub async fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(&self.path, serde_yaml::to_string(config)?)
            .await
            .with_context(|| format!("writing {}", self.path.display()))
    }
}

/// Environment wins over the file; out-of-range values are clamped.
pub fn apply_runtime_overrides(mut config: Config) -> Config {
    config.apply_env_overrides();
    config.normalized()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_env_lines_skip_comments_and_unquote() {
        let pairs = parse_env_lines(
            "# comment\nBAI_DELAY_SEC=1.5\n\nBAI_STATE_PATH=\"/tmp/a b/state.json\"\nbroken\n=empty\n",
        );
        assert_eq!(
            pairs,
            vec![
                ("BAI_DELAY_SEC".to_string(), "1.5".to_string()),
                (
                    "BAI_STATE_PATH".to_string(),
                    "/tmp/a b/state.json".to_string()
                ),
            ]
        );
        assert_eq!(unquote("\"a\\tb\""), "a\tb");
        assert_eq!(unquote("\""), "\"");
    }

    #[tokio::test]
    async fn explicit_config_path_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "delay_sec: 2.0\nbridge:\n  highlight_settle_ms: 50\n").unwrap();

        let file = ConfigFile::locate(Some(&path)).unwrap();
        assert_eq!(file.path, path);
        let config = file.load().await.unwrap();
        assert_eq!(config.delay_sec, 2.0);
        assert_eq!(config.bridge.highlight_settle_ms, 50);

        let missing = ConfigFile::new(&dir.path().join("missing.yaml"));
        assert_eq!(missing.load().await.unwrap(), Config::default());
    }

    #[tokio::test]
    async fn save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let file = ConfigFile::new(&dir.path().join("nested").join("config.yaml"));
        let config = Config {
            delay_sec: 3.0,
            ..Config::default()
        };
        file.save(&config).await.unwrap();
        assert_eq!(file.load().await.unwrap().delay_sec, 3.0);
    }
}
