use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use baibridge_state_center::JsonFileStateStore;
use bridge_kernel::{Config, ScanEngine};
use tokio::sync::OnceCell;
use tracing::debug;

use super::output::OutputFormat;

pub struct CliContext {
    config: Arc<Config>,
    config_path: PathBuf,
    output: OutputFormat,
    engine: OnceCell<Arc<ScanEngine>>,
}

impl CliContext {
    pub fn new(config: Config, config_path: PathBuf, output: OutputFormat) -> Self {
        Self {
            config: Arc::new(config),
            config_path,
            output,
            engine: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &Config {
        self.config.as_ref()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn output(&self) -> OutputFormat {
        self.output
    }

    /// Scan engine backed by the state file, opened on first use.
    pub async fn engine(&self) -> Result<Arc<ScanEngine>> {
        self.engine
            .get_or_try_init(|| async {
                let path = &self.config.state_path;
                debug!(path = %path.display(), "opening state file");
                let store = JsonFileStateStore::open(path)
                    .with_context(|| format!("opening state file {}", path.display()))?;
                let engine = ScanEngine::open(self.config.as_ref().clone(), Arc::new(store))
                    .await
                    .context("restoring bridge state")?;
                Ok::<_, anyhow::Error>(Arc::new(engine))
            })
            .await
            .map(Arc::clone)
    }
}
