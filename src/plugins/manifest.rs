//! 插件清单与能力模型
//!
//! 清单描述插件身份、语义化版本、核心版本兼容范围、依赖的外部模块、
//! 产出的结果种类、入口点以及配置Schema。描述文件可以是JSON、YAML或TOML。

use crate::error::{ConfigError, ManifestError};
use crate::types::PluginId;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// 插件包中可识别的清单文件名
pub const BUNDLE_FILE_NAMES: [&str; 4] = ["plugin.json", "plugin.yaml", "plugin.yml", "plugin.toml"];

/// 清单描述格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestFormat {
    Json,
    Yaml,
    Toml,
}

impl ManifestFormat {
    /// 根据文件扩展名判断格式
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match extension.as_str() {
            "json" => Ok(ManifestFormat::Json),
            "yaml" | "yml" => Ok(ManifestFormat::Yaml),
            "toml" => Ok(ManifestFormat::Toml),
            _ => Err(ManifestError::UnsupportedFormat { extension }),
        }
    }
}

/// 核心版本上界
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionBound {
    pub version: Version,
    pub inclusive: bool,
}

/// 核心版本兼容范围：`min` 闭区间，`max` 可选且可开可闭
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreCompatibility {
    pub min: Version,
    pub max: Option<VersionBound>,
}

impl CoreCompatibility {
    pub fn contains(&self, core_version: &Version) -> bool {
        if core_version < &self.min {
            return false;
        }
        match &self.max {
            Some(bound) if bound.inclusive => core_version <= &bound.version,
            Some(bound) => core_version < &bound.version,
            None => true,
        }
    }
}

impl fmt::Display for CoreCompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ">={}", self.min)?;
        if let Some(bound) = &self.max {
            let op = if bound.inclusive { "<=" } else { "<" };
            write!(f, ", {}{}", op, bound.version)?;
        }
        Ok(())
    }
}

/// 配置参数类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Integer,
    Float,
    Boolean,
    String,
}

impl ParamType {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "integer" | "int" => Some(ParamType::Integer),
            "float" | "number" => Some(ParamType::Float),
            "boolean" | "bool" => Some(ParamType::Boolean),
            "string" | "str" => Some(ParamType::String),
            _ => None,
        }
    }

    /// 值是否符合该类型（浮点参数也接受整数）
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Float => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::String => value.is_string(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::Integer => "integer",
            ParamType::Float => "float",
            ParamType::Boolean => "boolean",
            ParamType::String => "string",
        }
    }
}

/// JSON值的类型名称，用于错误信息
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 单个配置参数的声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub kind: ParamType,
    pub default: Value,
    pub allowed: Option<Vec<Value>>,
    pub description: String,
    pub nullable: bool,
}

impl ParamSpec {
    fn check(&self, parameter: &str, value: &Value) -> Result<(), ConfigError> {
        if value.is_null() {
            if self.nullable {
                return Ok(());
            }
            return Err(ConfigError::TypeMismatch {
                parameter: parameter.to_string(),
                expected: self.kind.as_str().to_string(),
                found: "null".to_string(),
            });
        }
        if !self.kind.accepts(value) {
            return Err(ConfigError::TypeMismatch {
                parameter: parameter.to_string(),
                expected: self.kind.as_str().to_string(),
                found: json_type_name(value).to_string(),
            });
        }
        if let Some(allowed) = &self.allowed {
            if !allowed.iter().any(|candidate| values_equal(candidate, value)) {
                return Err(ConfigError::NotAllowed {
                    parameter: parameter.to_string(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }
}

// 数值按大小比较，1 与 1.0 相等
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// 配置Schema：参数名 → 声明
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSchema {
    params: BTreeMap<String, ParamSpec>,
}

impl ConfigSchema {
    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamSpec)> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// 插件清单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: PluginId,
    pub name: String,
    pub description: String,
    pub version: Version,
    pub core: CoreCompatibility,
    /// 依赖的外部模块，按声明顺序
    pub requires: Vec<String>,
    /// 可能产出的结果种类
    pub produces: Vec<String>,
    pub entry_point: String,
    pub config_schema: ConfigSchema,
    /// 确定性插件，注册表可以缓存其输出
    pub cacheable: bool,
}

impl Manifest {
    pub fn produces_kind(&self, kind: &str) -> bool {
        self.produces.iter().any(|k| k == kind)
    }

    /// `id@version`
    pub fn key(&self) -> String {
        format!("{}@{}", self.id, self.version)
    }
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: String,
    version: String,
    core: RawCore,
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    produces: Vec<String>,
    entry_point: String,
    #[serde(default)]
    config_schema: BTreeMap<String, RawParam>,
    #[serde(default)]
    cacheable: bool,
}

#[derive(Debug, Deserialize)]
struct RawCore {
    min: String,
    #[serde(default)]
    max: Option<String>,
    #[serde(default)]
    max_inclusive: bool,
}

#[derive(Debug, Deserialize)]
struct RawParam {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default)]
    allowed: Option<Vec<Value>>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    nullable: bool,
}

/// 解析并校验清单描述
pub fn parse(descriptor: &str, format: ManifestFormat) -> Result<Manifest, ManifestError> {
    let raw: RawManifest = match format {
        ManifestFormat::Json => {
            serde_json::from_str(descriptor).map_err(|e| ManifestError::malformed(e.to_string()))?
        }
        ManifestFormat::Yaml => {
            serde_yaml::from_str(descriptor).map_err(|e| ManifestError::malformed(e.to_string()))?
        }
        ManifestFormat::Toml => {
            toml::from_str(descriptor).map_err(|e| ManifestError::malformed(e.to_string()))?
        }
    };
    build_manifest(raw)
}

fn parse_version(field: &str, value: &str) -> Result<Version, ManifestError> {
    Version::parse(value.trim()).map_err(|_| ManifestError::VersionInvalid {
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn build_manifest(raw: RawManifest) -> Result<Manifest, ManifestError> {
    let id = raw.id.trim().to_string();
    if id.is_empty() {
        return Err(ManifestError::malformed("plugin id must not be empty"));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(ManifestError::malformed(format!(
            "plugin id '{}' contains invalid characters",
            id
        )));
    }

    let version = parse_version("version", &raw.version)?;
    let min = parse_version("core.min", &raw.core.min)?;
    let max = match raw.core.max {
        Some(max) => {
            let max = parse_version("core.max", &max)?;
            let empty = max < min || (max == min && !raw.core.max_inclusive);
            if empty {
                return Err(ManifestError::InvalidRange {
                    min: min.to_string(),
                    max: max.to_string(),
                });
            }
            Some(VersionBound {
                version: max,
                inclusive: raw.core.max_inclusive,
            })
        }
        None => None,
    };

    if raw.entry_point.trim().is_empty() {
        return Err(ManifestError::malformed("entry_point must not be empty"));
    }
    if raw.produces.is_empty() {
        return Err(ManifestError::malformed(
            "produces must declare at least one result kind",
        ));
    }
    if raw.requires.iter().any(|module| module.trim().is_empty()) {
        return Err(ManifestError::malformed("required module names must not be empty"));
    }

    let mut params = BTreeMap::new();
    for (name, param) in raw.config_schema {
        let spec = build_param(&name, param)?;
        params.insert(name, spec);
    }

    Ok(Manifest {
        name: raw.name.unwrap_or_else(|| id.clone()),
        id,
        description: raw.description,
        version,
        core: CoreCompatibility { min, max },
        requires: raw.requires,
        produces: raw.produces,
        entry_point: raw.entry_point.trim().to_string(),
        config_schema: ConfigSchema { params },
        cacheable: raw.cacheable,
    })
}

fn build_param(name: &str, raw: RawParam) -> Result<ParamSpec, ManifestError> {
    let invalid = |reason: String| ManifestError::InvalidSchema {
        parameter: name.to_string(),
        reason,
    };

    let kind = ParamType::parse(&raw.kind)
        .ok_or_else(|| invalid(format!("unknown parameter type '{}'", raw.kind)))?;
    let default = match raw.default {
        Some(value) => value,
        None if raw.nullable => Value::Null,
        None => return Err(invalid("missing default value".to_string())),
    };

    if let Some(allowed) = &raw.allowed {
        if allowed.is_empty() {
            return Err(invalid("allowed set must not be empty".to_string()));
        }
        if let Some(bad) = allowed.iter().find(|v| !kind.accepts(v)) {
            return Err(invalid(format!(
                "allowed value {} is not of type {}",
                bad,
                kind.as_str()
            )));
        }
    }

    let spec = ParamSpec {
        kind,
        default,
        allowed: raw.allowed,
        description: raw.description,
        nullable: raw.nullable,
    };
    spec.check(name, &spec.default)
        .map_err(|e| invalid(format!("default value rejected: {}", e)))?;
    Ok(spec)
}

/// 清单是否兼容给定的核心版本
pub fn validate_compatibility(manifest: &Manifest, core_version: &Version) -> bool {
    manifest.core.contains(core_version)
}

/// 以Schema默认值为底，合并稀疏覆盖项
pub fn merge_config(
    schema: &ConfigSchema,
    overrides: &BTreeMap<String, Value>,
) -> Result<ResolvedConfig, ConfigError> {
    let mut values: BTreeMap<String, Value> = schema
        .iter()
        .map(|(name, spec)| (name.clone(), spec.default.clone()))
        .collect();

    for (name, value) in overrides {
        let spec = schema.get(name).ok_or_else(|| ConfigError::UnknownParameter {
            parameter: name.clone(),
        })?;
        spec.check(name, value)?;
        values.insert(name.clone(), value.clone());
    }

    Ok(ResolvedConfig { values })
}

/// 合并后的完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    values: BTreeMap<String, Value>,
}

impl ResolvedConfig {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    fn require(&self, name: &str) -> Result<&Value, ConfigError> {
        self.values.get(name).ok_or_else(|| ConfigError::UnknownParameter {
            parameter: name.to_string(),
        })
    }

    fn mismatch(name: &str, expected: &str, value: &Value) -> ConfigError {
        ConfigError::TypeMismatch {
            parameter: name.to_string(),
            expected: expected.to_string(),
            found: json_type_name(value).to_string(),
        }
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, ConfigError> {
        let value = self.require(name)?;
        value.as_bool().ok_or_else(|| Self::mismatch(name, "boolean", value))
    }

    pub fn get_f64(&self, name: &str) -> Result<f64, ConfigError> {
        let value = self.require(name)?;
        value.as_f64().ok_or_else(|| Self::mismatch(name, "float", value))
    }

    pub fn get_i64(&self, name: &str) -> Result<i64, ConfigError> {
        let value = self.require(name)?;
        if let Some(raw) = value.as_i64() {
            return Ok(raw);
        }
        match value.as_u64() {
            Some(raw) => Err(Self::out_of_range(name, raw, "a 64-bit signed integer")),
            None => Err(Self::mismatch(name, "integer", value)),
        }
    }

    fn out_of_range(name: &str, raw: impl std::fmt::Display, limit: &str) -> ConfigError {
        ConfigError::InvalidValue {
            parameter: name.to_string(),
            reason: format!("{} does not fit in {}", raw, limit),
        }
    }

    pub fn get_str(&self, name: &str) -> Result<&str, ConfigError> {
        let value = self.require(name)?;
        value.as_str().ok_or_else(|| Self::mismatch(name, "string", value))
    }

    /// 可空的非负整数参数
    pub fn get_optional_usize(&self, name: &str) -> Result<Option<usize>, ConfigError> {
        let value = self.require(name)?;
        if value.is_null() {
            return Ok(None);
        }
        if let Some(raw) = value.as_u64() {
            return usize::try_from(raw)
                .map(Some)
                .map_err(|_| Self::out_of_range(name, raw, "usize"));
        }
        let raw = value.as_i64().ok_or_else(|| Self::mismatch(name, "integer", value))?;
        Err(ConfigError::InvalidValue {
            parameter: name.to_string(),
            reason: format!("{} is negative", raw),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.values.clone().into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const YAML_MANIFEST: &str = r#"
id: smoother
name: Moving Smoother
version: 1.2.0
core:
  min: 0.1.0
  max: 1.0.0
requires: [numerics]
produces: [series]
entry_point: builtin:smoother
cacheable: true
config_schema:
  window:
    type: integer
    default: 5
    description: window length
  mode:
    type: string
    default: mean
    allowed: [mean, median]
  gain:
    type: float
    default: 1.0
  limit:
    type: integer
    nullable: true
"#;

    fn yaml_manifest() -> Manifest {
        parse(YAML_MANIFEST, ManifestFormat::Yaml).unwrap()
    }

    #[test]
    fn test_parse_yaml_manifest() {
        let manifest = yaml_manifest();
        assert_eq!(manifest.id, "smoother");
        assert_eq!(manifest.name, "Moving Smoother");
        assert_eq!(manifest.version, Version::new(1, 2, 0));
        assert_eq!(manifest.requires, vec!["numerics".to_string()]);
        assert!(manifest.cacheable);
        assert_eq!(manifest.config_schema.len(), 4);
        assert_eq!(manifest.config_schema.get("limit").unwrap().default, Value::Null);
        assert_eq!(manifest.key(), "smoother@1.2.0");
        assert_eq!(manifest.core.to_string(), ">=0.1.0, <1.0.0");
    }

    #[test]
    fn test_parse_json_and_toml_manifests() {
        let json = r#"{
            "id": "peaks",
            "version": "0.3.1",
            "core": {"min": "0.1.0"},
            "produces": ["events"],
            "entry_point": "builtin:peaks",
            "config_schema": {"threshold": {"type": "float", "default": 0.5}}
        }"#;
        let manifest = parse(json, ManifestFormat::Json).unwrap();
        assert_eq!(manifest.name, "peaks");
        assert!(manifest.core.max.is_none());

        let toml = r#"
id = "peaks"
version = "0.3.1"
produces = ["events"]
entry_point = "builtin:peaks"

[core]
min = "0.1.0"
max = "0.9.0"
max_inclusive = true

[config_schema.threshold]
type = "float"
default = 0.5
"#;
        let from_toml = parse(toml, ManifestFormat::Toml).unwrap();
        assert_eq!(from_toml.version, manifest.version);
        assert_eq!(
            from_toml.config_schema.get("threshold"),
            manifest.config_schema.get("threshold")
        );
        assert!(from_toml.core.max.as_ref().unwrap().inclusive);
    }

    #[test]
    fn test_malformed_descriptor() {
        let err = parse("id: [unclosed", ManifestFormat::Yaml).unwrap_err();
        assert!(matches!(err, ManifestError::Malformed { .. }));

        let missing_entry = r#"{"id": "x", "version": "1.0.0", "core": {"min": "0.1.0"}, "produces": ["a"]}"#;
        assert!(matches!(
            parse(missing_entry, ManifestFormat::Json).unwrap_err(),
            ManifestError::Malformed { .. }
        ));

        let bad_id = r#"{"id": "a b", "version": "1.0.0", "core": {"min": "0.1.0"}, "produces": ["a"], "entry_point": "e"}"#;
        assert!(matches!(
            parse(bad_id, ManifestFormat::Json).unwrap_err(),
            ManifestError::Malformed { .. }
        ));
    }

    #[test]
    fn test_invalid_versions() {
        let bad = r#"{"id": "x", "version": "1.0", "core": {"min": "0.1.0"}, "produces": ["a"], "entry_point": "e"}"#;
        assert_eq!(
            parse(bad, ManifestFormat::Json).unwrap_err(),
            ManifestError::VersionInvalid {
                field: "version".to_string(),
                value: "1.0".to_string()
            }
        );

        let inverted = r#"{"id": "x", "version": "1.0.0", "core": {"min": "2.0.0", "max": "1.0.0"}, "produces": ["a"], "entry_point": "e"}"#;
        assert!(matches!(
            parse(inverted, ManifestFormat::Json).unwrap_err(),
            ManifestError::InvalidRange { .. }
        ));
    }

    #[test]
    fn test_schema_default_must_match_type() {
        let bad = r#"{"id": "x", "version": "1.0.0", "core": {"min": "0.1.0"}, "produces": ["a"],
            "entry_point": "e", "config_schema": {"w": {"type": "integer", "default": "five"}}}"#;
        assert!(matches!(
            parse(bad, ManifestFormat::Json).unwrap_err(),
            ManifestError::InvalidSchema { .. }
        ));
    }

    #[test]
    fn test_compatibility_range() {
        let manifest = yaml_manifest();
        assert!(validate_compatibility(&manifest, &Version::new(0, 1, 0)));
        assert!(validate_compatibility(&manifest, &Version::new(0, 9, 9)));
        assert!(!validate_compatibility(&manifest, &Version::new(1, 0, 0)));
        assert!(!validate_compatibility(&manifest, &Version::new(0, 0, 9)));
    }

    #[test]
    fn test_merge_config_defaults_and_overrides() {
        let schema = yaml_manifest().config_schema;
        let mut overrides = BTreeMap::new();
        overrides.insert("window".to_string(), json!(9));
        overrides.insert("gain".to_string(), json!(2));

        let resolved = merge_config(&schema, &overrides).unwrap();
        assert_eq!(resolved.get_i64("window").unwrap(), 9);
        assert_eq!(resolved.get_f64("gain").unwrap(), 2.0);
        assert_eq!(resolved.get_str("mode").unwrap(), "mean");
        assert_eq!(resolved.get_optional_usize("limit").unwrap(), None);
        assert_eq!(resolved.len(), 4);
    }

    #[test]
    fn test_merge_config_errors() {
        let schema = yaml_manifest().config_schema;

        let mut unknown = BTreeMap::new();
        unknown.insert("speed".to_string(), json!(1));
        assert_eq!(
            merge_config(&schema, &unknown).unwrap_err(),
            ConfigError::UnknownParameter {
                parameter: "speed".to_string()
            }
        );

        let mut mistyped = BTreeMap::new();
        mistyped.insert("window".to_string(), json!("wide"));
        assert_eq!(
            merge_config(&schema, &mistyped).unwrap_err(),
            ConfigError::TypeMismatch {
                parameter: "window".to_string(),
                expected: "integer".to_string(),
                found: "string".to_string()
            }
        );

        let mut disallowed = BTreeMap::new();
        disallowed.insert("mode".to_string(), json!("max"));
        assert!(matches!(
            merge_config(&schema, &disallowed).unwrap_err(),
            ConfigError::NotAllowed { .. }
        ));

        let mut null_window = BTreeMap::new();
        null_window.insert("window".to_string(), Value::Null);
        assert!(matches!(
            merge_config(&schema, &null_window).unwrap_err(),
            ConfigError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn test_integer_above_i64_range() {
        let schema = yaml_manifest().config_schema;
        let huge = u64::MAX;
        let mut overrides = BTreeMap::new();
        overrides.insert("window".to_string(), json!(huge));
        overrides.insert("limit".to_string(), json!(huge));
        let resolved = merge_config(&schema, &overrides).unwrap();

        assert_eq!(
            resolved.get_i64("window").unwrap_err(),
            ConfigError::InvalidValue {
                parameter: "window".to_string(),
                reason: format!("{} does not fit in a 64-bit signed integer", huge),
            }
        );
        assert_eq!(resolved.get_optional_usize("limit").unwrap(), Some(huge as usize));
    }

    #[test]
    fn test_negative_optional_usize() {
        let schema = yaml_manifest().config_schema;
        let mut overrides = BTreeMap::new();
        overrides.insert("limit".to_string(), json!(-3));
        let resolved = merge_config(&schema, &overrides).unwrap();
        assert!(matches!(
            resolved.get_optional_usize("limit").unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(
            ManifestFormat::from_path(Path::new("a/plugin.yml")).unwrap(),
            ManifestFormat::Yaml
        );
        assert!(matches!(
            ManifestFormat::from_path(Path::new("plugin.ini")).unwrap_err(),
            ManifestError::UnsupportedFormat { .. }
        ));
    }
}
