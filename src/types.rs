//! SignalLab 核心数据类型
//!
//! 序列、表格以及插件的输入/输出载荷

use crate::alignment::DtwResult;
use crate::error::DtwError;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// 唯一标识符类型
pub type PluginId = String;

/// 数值序列 - 每行一个采样点，列为采样维度
///
/// 标量序列是 `n x 1` 的矩阵，向量序列是 `n x d` 的矩阵。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    samples: Array2<f64>,
}

impl Series {
    /// 创建标量序列
    pub fn scalar(values: impl Into<Vec<f64>>) -> Self {
        Self {
            samples: Array1::from(values.into()).insert_axis(Axis(1)),
        }
    }

    /// 从向量采样行创建序列，所有行必须维度一致
    pub fn from_rows(rows: &[Vec<f64>]) -> std::result::Result<Self, DtwError> {
        let dim = rows.first().map(|row| row.len()).unwrap_or(1);
        let mut flat = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            if row.len() != dim {
                return Err(DtwError::DimensionMismatch {
                    expected: dim,
                    found: row.len(),
                });
            }
            flat.extend_from_slice(row);
        }

        let samples = Array2::from_shape_vec((rows.len(), dim), flat).map_err(|_| {
            DtwError::DimensionMismatch {
                expected: dim,
                found: 0,
            }
        })?;
        Ok(Self { samples })
    }

    /// 直接包装采样矩阵
    pub fn from_array(samples: Array2<f64>) -> Self {
        Self { samples }
    }

    /// 采样点数量
    pub fn len(&self) -> usize {
        self.samples.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.nrows() == 0
    }

    /// 采样维度
    pub fn dim(&self) -> usize {
        self.samples.ncols()
    }

    /// 第 `index` 个采样点
    pub fn sample(&self, index: usize) -> ArrayView1<'_, f64> {
        self.samples.row(index)
    }

    pub fn samples(&self) -> &Array2<f64> {
        &self.samples
    }
}

impl From<Vec<f64>> for Series {
    fn from(values: Vec<f64>) -> Self {
        Self::scalar(values)
    }
}

/// 带列名的数值表格
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// 列名
    pub columns: Vec<String>,
    /// 行数据，`rows x columns`
    pub data: Array2<f64>,
}

impl Table {
    pub fn new(columns: Vec<String>, data: Array2<f64>) -> Self {
        Self { columns, data }
    }

    pub fn row_count(&self) -> usize {
        self.data.nrows()
    }

    /// 按列名取出一列作为标量序列
    pub fn column(&self, name: &str) -> Option<Series> {
        let index = self.columns.iter().position(|c| c == name)?;
        Some(Series::scalar(self.data.column(index).to_vec()))
    }

    /// 按位置取出一列
    pub fn column_at(&self, index: usize) -> Option<Series> {
        if index >= self.data.ncols() {
            return None;
        }
        Some(Series::scalar(self.data.column(index).to_vec()))
    }
}

/// 单个命名输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputValue {
    /// 单条序列
    Sequence(Series),
    /// 序列列表
    Batch(Vec<Series>),
    /// 表格
    Table(Table),
    /// 标量
    Scalar(f64),
    /// 文本
    Text(String),
}

/// 插件输入载荷 - 命名的序列/表格
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginInputs {
    values: BTreeMap<String, InputValue>,
}

impl PluginInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加输入（builder风格）
    pub fn with(mut self, name: impl Into<String>, value: InputValue) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: InputValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&InputValue> {
        self.values.get(name)
    }

    /// 获取序列输入
    pub fn sequence(&self, name: &str) -> Option<&Series> {
        match self.values.get(name) {
            Some(InputValue::Sequence(series)) => Some(series),
            _ => None,
        }
    }

    /// 获取序列列表输入
    pub fn batch(&self, name: &str) -> Option<&[Series]> {
        match self.values.get(name) {
            Some(InputValue::Batch(series)) => Some(series.as_slice()),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &InputValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// 插件输出值
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum OutputValue {
    /// 单对序列的DTW对齐结果
    Alignment(Arc<DtwResult>),
    /// 成对距离矩阵
    DistanceMatrix(Array2<f64>),
    /// 标量
    Scalar(f64),
    /// 任意结构化结果
    Json(serde_json::Value),
}

/// 插件输出 - 带结果种类标签
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginOutput {
    /// 结果种类，必须在清单 `produces` 中声明
    pub kind: String,
    pub value: OutputValue,
}

impl PluginOutput {
    pub fn new(kind: impl Into<String>, value: OutputValue) -> Self {
        Self {
            kind: kind.into(),
            value,
        }
    }

    pub fn as_alignment(&self) -> Option<&Arc<DtwResult>> {
        match &self.value {
            OutputValue::Alignment(result) => Some(result),
            _ => None,
        }
    }

    pub fn as_distance_matrix(&self) -> Option<&Array2<f64>> {
        match &self.value {
            OutputValue::DistanceMatrix(matrix) => Some(matrix),
            _ => None,
        }
    }
}
