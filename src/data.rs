//! 数据加载与校验
//!
//! 宿主侧协作组件：把文件解码为数值表格，并对时间列和数值列做建议性检查。

pub mod delimited;
pub mod validation;

pub use delimited::DelimitedTableLoader;
pub use validation::{validate_columns, validate_table, ValidationWarning};

use crate::types::{Series, Table};
use crate::Result;
use async_trait::async_trait;
use ndarray::Axis;
use std::path::Path;

/// 表格加载接口
#[async_trait]
pub trait TableLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<Table>;
    fn name(&self) -> &str;
}

/// 常见的时间列名
pub const TIME_COLUMNS: &[&str] = &["time", "timestamp", "t"];

/// 识别时间列的位置
pub fn time_column_index(table: &Table) -> Option<usize> {
    table
        .columns
        .iter()
        .position(|c| TIME_COLUMNS.contains(&c.trim().to_ascii_lowercase().as_str()))
}

/// 去掉时间列后的多维序列
pub fn value_series(table: &Table) -> Result<Series> {
    let data = match time_column_index(table) {
        Some(index) => {
            let keep: Vec<usize> = (0..table.data.ncols()).filter(|&c| c != index).collect();
            table.data.select(Axis(1), &keep)
        }
        None => table.data.clone(),
    };
    if data.ncols() == 0 || data.nrows() == 0 {
        return Err(crate::PlatformError::data("table has no value columns"));
    }
    Ok(Series::from_array(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_value_series_drops_time_column() {
        let table = Table::new(
            vec!["Timestamp".to_string(), "x".to_string(), "y".to_string()],
            array![[0.0, 1.0, 2.0], [1.0, 3.0, 4.0]],
        );
        assert_eq!(time_column_index(&table), Some(0));

        let series = value_series(&table).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.dim(), 2);
        assert_eq!(series.sample(1).to_vec(), vec![3.0, 4.0]);
    }

    #[test]
    fn test_value_series_requires_values() {
        let table = Table::new(vec!["time".to_string()], array![[0.0], [1.0]]);
        assert!(value_series(&table).is_err());
    }
}
