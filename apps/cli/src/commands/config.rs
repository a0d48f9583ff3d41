//! 配置管理命令
//!
//! 配置文件为 TOML（[`AcquisitionConfig`]），键使用 `section.field` 形式，
//! 例如 `main.port`、`sync.hold_timeout_ms`、`recording.log_dir`。

use anyhow::{Context, Result, anyhow, bail};
use clap::Subcommand;
use oxilog_driver::AcquisitionConfig;
use std::path::{Path, PathBuf};
use toml::Value;

/// 默认配置文件路径
pub fn default_config_path() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| anyhow!("cannot determine config directory"))?;
    path.push("oxilog");
    path.push("config.toml");
    Ok(path)
}

/// 加载配置
///
/// 未指定路径且默认文件不存在时返回默认配置；显式指定的文件必须存在。
pub fn load_config(explicit: Option<&Path>) -> Result<(PathBuf, AcquisitionConfig)> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    if explicit.is_none() && !path.exists() {
        return Ok((path, AcquisitionConfig::default()));
    }

    let config = AcquisitionConfig::load(&path)
        .with_context(|| format!("failed to load config {}", path.display()))?;
    Ok((path, config))
}

/// 设置一个键；值按 整数/浮点/布尔/字符串 依次推断，类型不符时退回字符串
pub fn set_value(config: &AcquisitionConfig, key: &str, raw: &str) -> Result<AcquisitionConfig> {
    let inferred = infer_value(raw);
    match with_value(config, key, Some(inferred.clone())) {
        Ok(updated) => Ok(updated),
        Err(err) if !inferred.is_str() => with_value(config, key, Some(Value::String(raw.into())))
            .map_err(|_| err),
        Err(err) => Err(err),
    }
}

/// 删除一个键（恢复默认值）
pub fn unset_value(config: &AcquisitionConfig, key: &str) -> Result<AcquisitionConfig> {
    with_value(config, key, None)
}

fn infer_value(raw: &str) -> Value {
    if let Ok(v) = raw.parse::<i64>() {
        Value::Integer(v)
    } else if let Ok(v) = raw.parse::<f64>() {
        Value::Float(v)
    } else if let Ok(v) = raw.parse::<bool>() {
        Value::Boolean(v)
    } else {
        Value::String(raw.to_string())
    }
}

fn with_value(
    config: &AcquisitionConfig,
    key: &str,
    value: Option<Value>,
) -> Result<AcquisitionConfig> {
    let (section, field) = key
        .split_once('.')
        .ok_or_else(|| anyhow!("key must look like section.field, got {:?}", key))?;

    let mut root = Value::try_from(config).context("failed to serialize config")?;
    let Some(Value::Table(section_table)) = root.get_mut(section) else {
        bail!("unknown config section {:?}", section);
    };

    match value {
        Some(value) => {
            section_table.insert(field.to_string(), value);
        },
        None => {
            section_table.remove(field);
        },
    }

    let updated: AcquisitionConfig = root
        .try_into()
        .with_context(|| format!("invalid value for {}", key))?;

    // serde(default) 会忽略未知字段，写回后比对以发现拼写错误
    let check = Value::try_from(&updated)?;
    let known = match check.get(section) {
        Some(Value::Table(t)) => t.contains_key(field) || is_optional_field(key),
        _ => false,
    };
    if !known {
        bail!("unknown config key {:?}", key);
    }

    updated.validate()?;
    Ok(updated)
}

/// 值为 `None` 时不会出现在序列化结果中的字段
fn is_optional_field(key: &str) -> bool {
    matches!(key, "main.port" | "sub.port" | "sync.hold_timeout_ms")
}

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 显示配置文件路径
    Path,

    /// 显示当前配置（TOML）
    Show,

    /// 写入默认配置
    Init {
        /// 覆盖已存在的文件
        #[arg(short, long)]
        force: bool,
    },

    /// 设置配置项，例如 `config set main.port COM3`
    Set { key: String, value: String },

    /// 删除配置项（恢复默认值）
    Unset { key: String },
}

impl ConfigCommand {
    pub fn execute(self, explicit: Option<&Path>) -> Result<()> {
        match self {
            ConfigCommand::Path => {
                let path = match explicit {
                    Some(path) => path.to_path_buf(),
                    None => default_config_path()?,
                };
                println!("{}", path.display());
            },

            ConfigCommand::Show => {
                let (path, config) = load_config(explicit)?;
                let text = toml::to_string_pretty(&config)?;
                println!("# {}", path.display());
                print!("{}", text);
            },

            ConfigCommand::Init { force } => {
                let path = match explicit {
                    Some(path) => path.to_path_buf(),
                    None => default_config_path()?,
                };
                if path.exists() && !force {
                    bail!("{} already exists (use --force to overwrite)", path.display());
                }
                AcquisitionConfig::default().save(&path)?;
                println!("✅ Wrote default config to {}", path.display());
            },

            ConfigCommand::Set { key, value } => {
                let (path, config) = load_config(explicit)?;
                let updated = set_value(&config, &key, &value)?;
                updated.save(&path)?;
                println!("✅ {} = {}", key, value);
            },

            ConfigCommand::Unset { key } => {
                let (path, config) = load_config(explicit)?;
                let updated = unset_value(&config, &key)?;
                updated.save(&path)?;
                println!("✅ {} reset", key);
            },
        }
        Ok(())
    }
}
