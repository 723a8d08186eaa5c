//! 规范化指纹
//!
//! 浮点数在哈希前统一格式化为12位有效数字的科学计数法，`-0.0` 视为 `0.0`，
//! NaN 和无穷大使用固定标记。这样由等价输入构造出的键在不同调用间保持一致。

use crate::alignment::DtwConfig;
use crate::plugins::manifest::ResolvedConfig;
use crate::types::{InputValue, PluginInputs, Series, Table};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// 256位内容指纹
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({}…)", &self.to_hex()[..12])
    }
}

/// 浮点数规范化表示
pub fn canonical_float(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value == f64::INFINITY {
        "+inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        // 0.0 == -0.0，统一成正零
        let value = if value == 0.0 { 0.0 } else { value };
        format!("{:.12e}", value)
    }
}

/// 指纹构造器
///
/// 所有字段都带长度前缀写入，避免相邻字段拼接产生歧义。
pub struct FingerprintBuilder {
    hasher: Sha256,
}

impl FingerprintBuilder {
    /// 以领域标签开始一个新指纹
    pub fn new(domain: &str) -> Self {
        let mut builder = Self {
            hasher: Sha256::new(),
        };
        builder.tag(domain);
        builder
    }

    pub fn tag(&mut self, tag: &str) -> &mut Self {
        self.bytes(tag.as_bytes())
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    pub fn number(&mut self, value: u64) -> &mut Self {
        self.hasher.update(value.to_le_bytes());
        self
    }

    pub fn float(&mut self, value: f64) -> &mut Self {
        self.tag(&canonical_float(value))
    }

    pub fn flag(&mut self, value: bool) -> &mut Self {
        self.hasher.update([value as u8]);
        self
    }

    /// 写入实现了 [`Fingerprintable`] 的值
    pub fn feed<T: Fingerprintable + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.fingerprint_into(self);
        self
    }

    pub fn finish(self) -> Fingerprint {
        Fingerprint(self.hasher.finalize().into())
    }
}

/// 可参与指纹计算的值
pub trait Fingerprintable {
    fn fingerprint_into(&self, builder: &mut FingerprintBuilder);
}

impl Fingerprintable for Series {
    fn fingerprint_into(&self, builder: &mut FingerprintBuilder) {
        builder
            .tag("series")
            .number(self.len() as u64)
            .number(self.dim() as u64);
        for value in self.samples().iter() {
            builder.float(*value);
        }
    }
}

impl Fingerprintable for Table {
    fn fingerprint_into(&self, builder: &mut FingerprintBuilder) {
        builder.tag("table").number(self.columns.len() as u64);
        for column in &self.columns {
            builder.tag(column);
        }
        builder.number(self.row_count() as u64);
        for value in self.data.iter() {
            builder.float(*value);
        }
    }
}

impl Fingerprintable for InputValue {
    fn fingerprint_into(&self, builder: &mut FingerprintBuilder) {
        match self {
            InputValue::Sequence(series) => {
                builder.tag("sequence").feed(series);
            }
            InputValue::Batch(list) => {
                builder.tag("batch").number(list.len() as u64);
                for series in list {
                    builder.feed(series);
                }
            }
            InputValue::Table(table) => {
                builder.feed(table);
            }
            InputValue::Scalar(value) => {
                builder.tag("scalar").float(*value);
            }
            InputValue::Text(text) => {
                builder.tag("text").tag(text);
            }
        }
    }
}

impl Fingerprintable for PluginInputs {
    fn fingerprint_into(&self, builder: &mut FingerprintBuilder) {
        builder.tag("inputs").number(self.len() as u64);
        for (name, value) in self.iter() {
            builder.tag(name).feed(value);
        }
    }
}

impl Fingerprintable for DtwConfig {
    fn fingerprint_into(&self, builder: &mut FingerprintBuilder) {
        builder.tag("dtw-config");
        match self.window {
            Some(window) => builder.flag(true).number(window as u64),
            None => builder.flag(false),
        };
        builder
            .tag(self.metric.as_str())
            .tag(self.step_pattern.as_str())
            .flag(self.normalize_distance)
            .flag(self.return_path)
            .flag(self.return_cost_matrix);
    }
}

impl Fingerprintable for Value {
    fn fingerprint_into(&self, builder: &mut FingerprintBuilder) {
        match self {
            Value::Null => {
                builder.tag("null");
            }
            Value::Bool(flag) => {
                builder.tag("bool").flag(*flag);
            }
            Value::Number(number) => {
                // 整数和等值浮点数视为相同
                builder.tag("number").float(number.as_f64().unwrap_or(f64::NAN));
            }
            Value::String(text) => {
                builder.tag("string").tag(text);
            }
            Value::Array(items) => {
                builder.tag("array").number(items.len() as u64);
                for item in items {
                    builder.feed(item);
                }
            }
            Value::Object(map) => {
                // serde_json::Map 默认按键排序
                builder.tag("object").number(map.len() as u64);
                for (key, item) in map {
                    builder.tag(key).feed(item);
                }
            }
        }
    }
}

impl Fingerprintable for ResolvedConfig {
    fn fingerprint_into(&self, builder: &mut FingerprintBuilder) {
        builder.tag("resolved-config").number(self.len() as u64);
        for (name, value) in self.iter() {
            builder.tag(name).feed(value);
        }
    }
}
