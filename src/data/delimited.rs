//! 分隔文本表格加载
//!
//! 支持逗号、制表符等单字符分隔。首行若含非数值字段则视为表头；
//! 无法解析或列数不符的行会被跳过并记录警告。

use super::TableLoader;
use crate::error::PlatformError;
use crate::types::Table;
use crate::Result;
use async_trait::async_trait;
use ndarray::Array2;
use std::path::Path;
use tracing::{info, warn};

/// 分隔文本加载器
#[derive(Debug, Clone)]
pub struct DelimitedTableLoader {
    delimiter: char,
    /// `None` 时自动识别表头
    has_header: Option<bool>,
}

impl Default for DelimitedTableLoader {
    fn default() -> Self {
        Self {
            delimiter: ',',
            has_header: None,
        }
    }
}

impl DelimitedTableLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = Some(has_header);
        self
    }

    /// 解析文本内容；`source` 只用于日志
    pub fn parse_str(&self, content: &str, source: &str) -> Result<Table> {
        let mut lines = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'));

        let first = lines
            .next()
            .ok_or_else(|| PlatformError::data(&format!("{} is empty", source)))?;
        let first_fields = self.split(first);

        let header = match self.has_header {
            Some(flag) => flag,
            None => first_fields.iter().any(|field| field.parse::<f64>().is_err()),
        };

        let width = first_fields.len();
        let columns: Vec<String> = if header {
            first_fields.iter().map(|f| f.to_string()).collect()
        } else {
            (0..width).map(|i| format!("col{}", i)).collect()
        };

        let mut values: Vec<f64> = Vec::new();
        let mut rows = 0usize;
        let mut skipped = 0usize;

        let data_lines = (!header).then_some(first).into_iter().chain(lines);
        for (line_no, line) in data_lines.enumerate() {
            match self.parse_row(line, width) {
                Ok(row) => {
                    values.extend(row);
                    rows += 1;
                }
                Err(reason) => {
                    warn!("Skipping row {} of {}: {}", line_no + 1, source, reason);
                    skipped += 1;
                }
            }
        }

        if rows == 0 {
            return Err(PlatformError::data(&format!("{} has no numeric rows", source)));
        }

        let data = Array2::from_shape_vec((rows, width), values)
            .map_err(|e| PlatformError::data(&format!("failed to shape {}: {}", source, e)))?;
        info!(
            "Loaded {} rows x {} columns from {} ({} skipped)",
            rows, width, source, skipped
        );
        Ok(Table::new(columns, data))
    }

    fn split<'a>(&self, line: &'a str) -> Vec<&'a str> {
        line.split(self.delimiter).map(str::trim).collect()
    }

    fn parse_row(&self, line: &str, width: usize) -> std::result::Result<Vec<f64>, String> {
        let fields = self.split(line);
        if fields.len() != width {
            return Err(format!("expected {} fields, found {}", width, fields.len()));
        }
        fields
            .iter()
            .map(|field| {
                field
                    .parse::<f64>()
                    .map_err(|_| format!("'{}' is not a number", field))
            })
            .collect()
    }
}

#[async_trait]
impl TableLoader for DelimitedTableLoader {
    async fn load(&self, path: &Path) -> Result<Table> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            PlatformError::data(&format!("Failed to read {}: {}", path.display(), e))
        })?;
        self.parse_str(&content, &path.display().to_string())
    }

    fn name(&self) -> &str {
        "delimited"
    }
}
