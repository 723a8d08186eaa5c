//! 时间列与数值列的建议性检查
//!
//! 只产生警告，从不拒绝数据；是否继续由调用方决定。

use crate::types::Table;
use serde::Serialize;
use std::fmt;

/// 校验警告
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum ValidationWarning {
    /// 时间列和数值列长度不同
    LengthMismatch { time: usize, values: usize },
    /// 列为空
    Empty { column: String },
    /// 时间戳不严格递增
    NonMonotonicTime { position: usize },
    /// 重复时间戳
    DuplicateTimestamp { position: usize },
    /// 非有限数值
    NonFinite { column: String, count: usize },
    /// 数值列方差为零
    Constant { column: String },
    /// 采样间隔不均匀
    IrregularSpacing { min_step: f64, max_step: f64 },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::LengthMismatch { time, values } => {
                write!(f, "time column has {} rows but values have {}", time, values)
            }
            ValidationWarning::Empty { column } => write!(f, "column '{}' is empty", column),
            ValidationWarning::NonMonotonicTime { position } => {
                write!(f, "time goes backwards at row {}", position)
            }
            ValidationWarning::DuplicateTimestamp { position } => {
                write!(f, "duplicate timestamp at row {}", position)
            }
            ValidationWarning::NonFinite { column, count } => {
                write!(f, "column '{}' has {} non-finite value(s)", column, count)
            }
            ValidationWarning::Constant { column } => write!(f, "column '{}' is constant", column),
            ValidationWarning::IrregularSpacing { min_step, max_step } => {
                write!(f, "irregular sampling: steps range from {} to {}", min_step, max_step)
            }
        }
    }
}

/// 相对误差超过该比例视为不均匀采样
const SPACING_TOLERANCE: f64 = 0.01;

/// 检查一条时间列和一条数值列
pub fn validate_columns(time: &[f64], values: &[f64]) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    if time.len() != values.len() {
        warnings.push(ValidationWarning::LengthMismatch {
            time: time.len(),
            values: values.len(),
        });
    }
    warnings.extend(check_time(time));
    warnings.extend(check_values("values", values));
    warnings
}

/// 检查整张表格：识别时间列后逐列检查数值列
pub fn validate_table(table: &Table) -> Vec<ValidationWarning> {
    let time_index = super::time_column_index(table);
    let mut warnings = Vec::new();

    if let Some(index) = time_index {
        let time = table.data.column(index).to_vec();
        warnings.extend(check_time(&time));
    }
    for (index, name) in table.columns.iter().enumerate() {
        if Some(index) == time_index {
            continue;
        }
        let values = table.data.column(index).to_vec();
        warnings.extend(check_values(name, &values));
    }
    warnings
}

fn check_time(time: &[f64]) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    if time.is_empty() {
        warnings.push(ValidationWarning::Empty {
            column: "time".to_string(),
        });
        return warnings;
    }

    let non_finite = time.iter().filter(|t| !t.is_finite()).count();
    if non_finite > 0 {
        warnings.push(ValidationWarning::NonFinite {
            column: "time".to_string(),
            count: non_finite,
        });
    }

    let mut min_step = f64::INFINITY;
    let mut max_step = 0.0f64;
    for (position, pair) in time.windows(2).enumerate() {
        let step = pair[1] - pair[0];
        if step < 0.0 {
            warnings.push(ValidationWarning::NonMonotonicTime { position: position + 1 });
        } else if step == 0.0 {
            warnings.push(ValidationWarning::DuplicateTimestamp { position: position + 1 });
        } else if step.is_finite() {
            min_step = min_step.min(step);
            max_step = max_step.max(step);
        }
    }

    if min_step.is_finite() && max_step - min_step > SPACING_TOLERANCE * max_step {
        warnings.push(ValidationWarning::IrregularSpacing { min_step, max_step });
    }
    warnings
}

fn check_values(column: &str, values: &[f64]) -> Vec<ValidationWarning> {
    if values.is_empty() {
        return vec![ValidationWarning::Empty {
            column: column.to_string(),
        }];
    }

    let mut warnings = Vec::new();
    let non_finite = values.iter().filter(|v| !v.is_finite()).count();
    if non_finite > 0 {
        warnings.push(ValidationWarning::NonFinite {
            column: column.to_string(),
            count: non_finite,
        });
    }

    let mut finite = values.iter().filter(|v| v.is_finite());
    if let Some(first) = finite.next() {
        if values.len() > 1 && finite.all(|v| v == first) {
            warnings.push(ValidationWarning::Constant {
                column: column.to_string(),
            });
        }
    }
    warnings
}
