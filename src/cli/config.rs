use crate::cli::context::CliContext;
use crate::cli::runtime::ConfigFile;
use anyhow::{anyhow, bail, Context, Result};
use bridge_kernel::Config;
use clap::{Args, Subcommand};
use serde_yaml::{Mapping, Value as YamlValue};
use tracing::info;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show the configuration file, defaults filled in
    Show,

    /// Show the configuration after environment overrides
    Effective,

    /// Set a value, dotted for nested keys (e.g. bridge.highlight_settle_ms)
    Set { key: String, value: String },

    /// Print one value
    Get { key: String },

    /// Overwrite the file with defaults
    Reset,

    /// Parse the file and report values that will be clamped
    Validate,
}

pub async fn cmd_config(args: ConfigArgs, ctx: &CliContext) -> Result<()> {
    let file = ConfigFile::new(ctx.config_path());
    match args.action {
        ConfigAction::Show => {
            let config = file.load().await?;
            println!("# {}", file.path.display());
            print!("{}", serde_yaml::to_string(&config)?);
        }
        ConfigAction::Effective => {
            print!("{}", serde_yaml::to_string(ctx.config())?);
        }
        ConfigAction::Set { key, value } => {
            let config = assign(file.load().await?, &key, &value)?;
            file.save(&config).await?;
            info!(key = %key, "configuration updated");
            println!("Saved configuration to {}", file.path.display());
        }
        ConfigAction::Get { key } => {
            let tree = serde_yaml::to_value(file.load().await?)?;
            let value = lookup(&tree, &key).ok_or_else(|| anyhow!("{} not found", key))?;
            print!("{}", serde_yaml::to_string(value)?);
        }
        ConfigAction::Reset => {
            file.save(&Config::default()).await?;
            println!("Wrote defaults to {}", file.path.display());
        }
        ConfigAction::Validate => {
            if !file.exists().await? {
                println!("No configuration at {}; defaults apply", file.path.display());
                return Ok(());
            }
            let config = file.load().await?;
            if config.clone().normalized() == config {
                println!("{} is valid", file.path.display());
            } else {
                println!(
                    "{} is valid; out-of-range values will be clamped",
                    file.path.display()
                );
            }
        }
    }

    Ok(())
}

/// Apply `key = raw` to `config` through its YAML tree; the result is re-validated.
fn assign(config: Config, key: &str, raw: &str) -> Result<Config> {
    let path = key_path(key)?;
    let mut tree = serde_yaml::to_value(&config)?;
    let parsed: YamlValue =
        serde_yaml::from_str(raw).unwrap_or_else(|_| YamlValue::String(raw.to_string()));

    let (last, parents) = path
        .split_last()
        .ok_or_else(|| anyhow!("configuration key cannot be empty"))?;
    let mut node = &mut tree;
    for segment in parents {
        node = mapping_mut(node, segment)?
            .entry(YamlValue::from(*segment))
            .or_insert(YamlValue::Null);
    }
    mapping_mut(node, last)?.insert(YamlValue::from(*last), parsed);

    let updated: Config = serde_yaml::from_value(tree)
        .with_context(|| format!("{} = {} does not fit the configuration", key, raw))?;
    Ok(updated.normalized())
}

fn key_path(key: &str) -> Result<Vec<&str>> {
    let path: Vec<&str> = key.split('.').filter(|s| !s.is_empty()).collect();
    if path.is_empty() {
        bail!("configuration key cannot be empty");
    }
    Ok(path)
}

fn mapping_mut<'a>(node: &'a mut YamlValue, segment: &str) -> Result<&'a mut Mapping> {
    if node.is_null() {
        *node = YamlValue::Mapping(Mapping::new());
    }
    match node {
        YamlValue::Mapping(map) => Ok(map),
        _ => bail!("{} is not a section", segment),
    }
}

fn lookup<'a>(tree: &'a YamlValue, key: &str) -> Option<&'a YamlValue> {
    key.split('.')
        .filter(|s| !s.is_empty())
        .try_fold(tree, |node, segment| node.get(segment))
}
