//! 配置文件读写与带注释生成。
//!
//! 用户文件中缺失的键用默认值补齐；补齐后会把带注释的完整文件写回磁盘。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_yaml::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid yaml at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldMeta {
    pub name: &'static str,
    pub description: &'static str,
}

pub trait ConfigSpec: Serialize + DeserializeOwned + Default {
    const FILE_NAME: &'static str;
    fn fields() -> &'static [FieldMeta];
}

pub fn load_or_create<T: ConfigSpec>(config_path: Option<&Path>) -> Result<T, ConfigError> {
    load_or_create_with_base::<T>(config_path, None)
}

/// 读取配置；文件不存在时写出带注释的默认配置。
///
/// 路径优先级：`config_path` > `base_dir/FILE_NAME` > 当前目录下的 `FILE_NAME`。
pub fn load_or_create_with_base<T: ConfigSpec>(
    config_path: Option<&Path>,
    base_dir: Option<&Path>,
) -> Result<T, ConfigError> {
    let path = resolve_path::<T>(config_path, base_dir);
    ensure_parent(&path)?;

    if !path.exists() {
        let default_config = T::default();
        write_with_comments(&default_config, &path)?;
        info!(target: "config", path = %path.display(), "已生成默认配置文件");
        return Ok(default_config);
    }

    let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let user_yaml = parse_user_yaml(&raw, &path)?;
    let missing = missing_fields::<T>(&user_yaml);
    let unknown = unknown_fields::<T>(&user_yaml);
    if !unknown.is_empty() {
        warn!(target: "config", ?unknown, "配置文件含未知字段（拼写错误？），已忽略");
    }

    let config = merge_with_defaults::<T>(user_yaml)?;

    if !missing.is_empty() {
        debug!(target: "config", ?missing, "配置文件缺少字段，已补齐并写回");
        write_with_comments(&config, &path)?;
    }

    Ok(config)
}

/// 在默认值之上叠加一段 YAML 文本（测试和命令行覆盖用）。
pub fn load_from_str<T: ConfigSpec>(raw: &str) -> Result<T, ConfigError> {
    let user_yaml = parse_user_yaml(raw, Path::new("<inline>"))?;
    merge_with_defaults::<T>(user_yaml)
}

pub fn write_with_comments<T: ConfigSpec>(config: &T, path: &Path) -> Result<(), ConfigError> {
    ensure_parent(path)?;
    let yaml = generate_yaml_with_comments(config)?;
    fs::write(path, yaml).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn generate_yaml_with_comments<T: ConfigSpec>(config: &T) -> Result<String, ConfigError> {
    let value =
        serde_yaml::to_value(config).map_err(|err| ConfigError::Validation(err.to_string()))?;
    let Value::Mapping(mapping) = value else {
        return Err(ConfigError::Validation(
            "config must serialize to a mapping".to_string(),
        ));
    };

    let mut lines = Vec::new();
    for field in T::fields() {
        if !field.description.is_empty() {
            lines.push(format!("# {}", field.description.replace('\n', "\n# ")));
        }
        let key = Value::String(field.name.to_string());
        let val = mapping.get(&key).cloned().unwrap_or(Value::Null);
        let yaml_line = serde_yaml::to_string(&serde_yaml::Mapping::from_iter([(key, val)]))
            .map_err(|err| ConfigError::Validation(err.to_string()))?;
        lines.push(yaml_line.trim_end().to_string());
    }

    let mut out = lines.join("\n");
    out.push('\n');
    Ok(out)
}

fn parse_user_yaml(raw: &str, path: &Path) -> Result<Value, ConfigError> {
    let value: Value = serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    // 空文件解析为 Null，按空映射处理
    Ok(match value {
        Value::Null => Value::Mapping(Default::default()),
        other => other,
    })
}

fn merge_with_defaults<T: ConfigSpec>(user_yaml: Value) -> Result<T, ConfigError> {
    let mut merged = serde_yaml::to_value(T::default())
        .map_err(|err| ConfigError::Validation(err.to_string()))?;
    merge_values(&mut merged, user_yaml);
    serde_yaml::from_value(merged).map_err(|err| ConfigError::Validation(err.to_string()))
}

fn missing_fields<T: ConfigSpec>(user_yaml: &Value) -> Vec<&'static str> {
    let Value::Mapping(map) = user_yaml else {
        return T::fields().iter().map(|f| f.name).collect();
    };
    T::fields()
        .iter()
        .filter(|f| !map.contains_key(Value::String(f.name.to_string())))
        .map(|f| f.name)
        .collect()
}

fn unknown_fields<T: ConfigSpec>(user_yaml: &Value) -> Vec<String> {
    let Value::Mapping(map) = user_yaml else {
        return Vec::new();
    };
    map.keys()
        .filter_map(|k| k.as_str())
        .filter(|k| !T::fields().iter().any(|f| f.name == *k))
        .map(str::to_string)
        .collect()
}

fn merge_values(default: &mut Value, user: Value) {
    match (default, user) {
        (Value::Mapping(dest), Value::Mapping(src)) => {
            for (key, user_val) in src {
                if let Some(dest_val) = dest.get_mut(&key) {
                    merge_values(dest_val, user_val);
                } else {
                    dest.insert(key, user_val);
                }
            }
        }
        // 显式写成 null 的键保留默认值
        (_, Value::Null) => {}
        (dest, other) => {
            *dest = other;
        }
    }
}

fn resolve_path<T: ConfigSpec>(path: Option<&Path>, base_dir: Option<&Path>) -> PathBuf {
    if let Some(p) = path {
        p.to_path_buf()
    } else if let Some(base) = base_dir {
        base.join(T::FILE_NAME)
    } else {
        PathBuf::from(T::FILE_NAME)
    }
}

fn ensure_parent(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_system::context::{Config, OutputFormat};

    #[test]
    fn creates_commented_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg: Config = load_or_create_with_base(None, Some(dir.path())).unwrap();
        assert_eq!(cfg.thread_num, 100);

        let written = fs::read_to_string(dir.path().join("config.yml")).unwrap();
        assert!(written.contains("# 输出格式"));
        assert!(written.contains("content_key: KW8Dvm2N"));
    }

    #[test]
    fn partial_file_is_filled_and_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.yml");
        fs::write(&path, "format: epub3\nthread_num: 8\n").unwrap();

        let cfg: Config = load_or_create(Some(&path)).unwrap();
        assert_eq!(cfg.format, OutputFormat::PackageV3);
        assert_eq!(cfg.thread_num, 8);
        assert_eq!(cfg.max_wait_time, 5000);

        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains("max_wait_time: 5000"));
        assert!(rewritten.contains("thread_num: 8"));
    }

    #[test]
    fn broken_yaml_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(&path, "format: [unterminated\n").unwrap();
        let err = load_or_create::<Config>(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn unknown_keys_are_listed_not_fatal() {
        let yaml: Value = serde_yaml::from_str("thread_num: 4\nthreadnum: 9\n").unwrap();
        assert_eq!(unknown_fields::<Config>(&yaml), vec!["threadnum".to_string()]);
        let cfg: Config = load_from_str("thread_num: 4\nthreadnum: 9\n").unwrap();
        assert_eq!(cfg.thread_num, 4);
    }

    #[test]
    fn wrong_type_reports_validation_error() {
        let err = load_from_str::<Config>("thread_num: lots\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn empty_and_null_values_keep_defaults() {
        let cfg: Config = load_from_str("").unwrap();
        assert_eq!(cfg.version_code, "349");
        let cfg: Config = load_from_str("version_code: ~\ncustom_title: '$1-$2'\n").unwrap();
        assert_eq!(cfg.version_code, "349");
        assert_eq!(cfg.custom_title, "$1-$2");
    }
}
