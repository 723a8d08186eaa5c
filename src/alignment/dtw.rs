//! 窗口约束的动态时间规整 (DTW)
//!
//! 代价矩阵只在Sakoe-Chiba带内按行存储：第 `i` 行覆盖列
//! `[i - w, i + w]`（截断到合法范围），带外单元视为 +inf 且从不分配，
//! 因此时间和空间都是 O(n·w) 而不是 O(n·m)。
//!
//! 带宽 `w` 必须不小于 `|len(A) - len(B)|`，否则 (0,0) 与终点
//! (n-1, m-1) 之间不存在合法路径，直接返回 [`DtwError::WindowTooNarrow`]。

use super::metric::DistanceMetric;
use crate::error::DtwError;
use crate::types::Series;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// 对齐过程观察者 - 协作式取消与进度上报
pub trait AlignmentObserver: Sync {
    /// 返回 `true` 时计算在下一行边界处中止
    fn should_stop(&self) -> bool {
        false
    }

    /// 进度回调，取值 0.0 ~ 1.0
    fn on_progress(&self, _fraction: f64) {}
}

/// 不观察任何事件
#[derive(Debug, Clone, Copy, Default)]
pub struct Unobserved;

impl AlignmentObserver for Unobserved {}

/// 步进模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepPattern {
    /// 三种移动等权
    #[default]
    Symmetric,
    /// 只推进B（水平移动）的代价加倍，路径偏向沿A轴推进
    Asymmetric,
}

#[derive(Debug, Clone, Copy)]
struct StepWeights {
    diagonal: f64,
    vertical: f64,
    horizontal: f64,
}

impl StepPattern {
    fn weights(self) -> StepWeights {
        match self {
            StepPattern::Symmetric => StepWeights {
                diagonal: 1.0,
                vertical: 1.0,
                horizontal: 1.0,
            },
            StepPattern::Asymmetric => StepWeights {
                diagonal: 1.0,
                vertical: 1.0,
                horizontal: 2.0,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepPattern::Symmetric => "symmetric",
            StepPattern::Asymmetric => "asymmetric",
        }
    }
}

impl std::str::FromStr for StepPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "symmetric" => Ok(StepPattern::Symmetric),
            "asymmetric" => Ok(StepPattern::Asymmetric),
            other => Err(format!("unknown step pattern '{}'", other)),
        }
    }
}

/// DTW配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DtwConfig {
    /// Sakoe-Chiba带宽，`None` 表示不约束
    pub window: Option<usize>,
    /// 点距离度量
    pub metric: DistanceMetric,
    /// 是否按路径长度归一化距离
    pub normalize_distance: bool,
    /// 是否返回规整路径
    pub return_path: bool,
    /// 是否返回完整代价矩阵（O(n·m) 内存）
    pub return_cost_matrix: bool,
    /// 步进模式
    pub step_pattern: StepPattern,
}

impl DtwConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_step_pattern(mut self, step_pattern: StepPattern) -> Self {
        self.step_pattern = step_pattern;
        self
    }

    pub fn normalized(mut self) -> Self {
        self.normalize_distance = true;
        self
    }

    pub fn with_path(mut self) -> Self {
        self.return_path = true;
        self
    }

    pub fn with_cost_matrix(mut self) -> Self {
        self.return_cost_matrix = true;
        self
    }

    /// 带内单元数量上界
    pub fn band_cells(&self, len_a: usize, len_b: usize) -> usize {
        let width = match self.window {
            Some(w) => w.saturating_mul(2).saturating_add(1).min(len_b),
            None => len_b,
        };
        len_a.saturating_mul(width)
    }

    /// 一次计算的工作集估计（字节）
    pub fn estimated_bytes(&self, len_a: usize, len_b: usize) -> usize {
        let f64_size = std::mem::size_of::<f64>();
        let row_header = std::mem::size_of::<BandRow>();
        let mut bytes = self
            .band_cells(len_a, len_b)
            .saturating_mul(f64_size)
            .saturating_add(len_a.saturating_mul(row_header));
        bytes = bytes.saturating_add(
            (len_a + len_b).saturating_mul(std::mem::size_of::<(usize, usize)>()),
        );
        if self.return_cost_matrix {
            bytes = bytes.saturating_add(len_a.saturating_mul(len_b).saturating_mul(f64_size));
        }
        bytes
    }
}

/// DTW计算结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DtwResult {
    /// 累积代价
    pub distance: f64,
    /// 按路径长度归一化的距离
    pub normalized_distance: Option<f64>,
    /// 最优路径上的点对数量
    pub path_length: usize,
    /// 规整路径，从 (0,0) 到 (n-1,m-1)
    pub path: Option<Vec<(usize, usize)>>,
    /// 完整代价矩阵，带外单元为 +inf
    pub cost_matrix: Option<Array2<f64>>,
}

impl DtwResult {
    /// 归一化距离（如有），否则原始距离
    pub fn effective_distance(&self) -> f64 {
        self.normalized_distance.unwrap_or(self.distance)
    }
}

#[derive(Debug)]
struct BandRow {
    start: usize,
    costs: Vec<f64>,
}

#[derive(Debug)]
struct CostBand {
    rows: Vec<BandRow>,
}

impl CostBand {
    fn get(&self, i: usize, j: usize) -> f64 {
        match self.rows.get(i) {
            Some(row) if j >= row.start => row.costs.get(j - row.start).copied().unwrap_or(f64::INFINITY),
            _ => f64::INFINITY,
        }
    }

    fn to_matrix(&self, len_a: usize, len_b: usize) -> Array2<f64> {
        let mut matrix = Array2::from_elem((len_a, len_b), f64::INFINITY);
        for (i, row) in self.rows.iter().enumerate() {
            for (offset, cost) in row.costs.iter().enumerate() {
                matrix[[i, row.start + offset]] = *cost;
            }
        }
        matrix
    }
}

fn row_bounds(i: usize, len_b: usize, window: Option<usize>) -> (usize, usize) {
    match window {
        Some(w) => (i.saturating_sub(w), i.saturating_add(w).min(len_b - 1)),
        None => (0, len_b - 1),
    }
}

/// 校验一对输入序列
pub fn validate_pair(a: &Series, b: &Series, config: &DtwConfig) -> Result<(), DtwError> {
    if a.is_empty() {
        return Err(DtwError::EmptyInput { index: 0 });
    }
    if b.is_empty() {
        return Err(DtwError::EmptyInput { index: 1 });
    }
    if a.dim() != b.dim() {
        return Err(DtwError::DimensionMismatch {
            expected: a.dim(),
            found: b.dim(),
        });
    }
    for (index, series) in [a, b].into_iter().enumerate() {
        if let Some(position) = series
            .samples()
            .rows()
            .into_iter()
            .position(|row| row.iter().any(|v| !v.is_finite()))
        {
            return Err(DtwError::NonFinite { index, position });
        }
    }
    if let Some(window) = config.window {
        if window < a.len().abs_diff(b.len()) {
            return Err(DtwError::WindowTooNarrow {
                window,
                len_a: a.len(),
                len_b: b.len(),
            });
        }
    }
    Ok(())
}

/// 计算两条序列的DTW距离
pub fn compute_distance(a: &Series, b: &Series, config: &DtwConfig) -> Result<DtwResult, DtwError> {
    compute_distance_observed(a, b, config, &Unobserved)
}

/// 计算DTW距离，每行检查一次取消请求
pub fn compute_distance_observed(
    a: &Series,
    b: &Series,
    config: &DtwConfig,
    observer: &dyn AlignmentObserver,
) -> Result<DtwResult, DtwError> {
    validate_pair(a, b, config)?;

    let band = fill_cost_band(a, b, config, observer)?;
    let (len_a, len_b) = (a.len(), b.len());
    let distance = band.get(len_a - 1, len_b - 1);

    let path = backtrack(a, b, config, &band);
    let path_length = path.len();
    let normalized_distance = config
        .normalize_distance
        .then(|| distance / path_length as f64);
    let cost_matrix = config
        .return_cost_matrix
        .then(|| band.to_matrix(len_a, len_b));

    observer.on_progress(1.0);

    Ok(DtwResult {
        distance,
        normalized_distance,
        path_length,
        path: config.return_path.then_some(path),
        cost_matrix,
    })
}

fn fill_cost_band(
    a: &Series,
    b: &Series,
    config: &DtwConfig,
    observer: &dyn AlignmentObserver,
) -> Result<CostBand, DtwError> {
    let (len_a, len_b) = (a.len(), b.len());
    let weights = config.step_pattern.weights();
    let report_every = (len_a / 100).max(1);
    let mut band = CostBand {
        rows: Vec::with_capacity(len_a),
    };

    for i in 0..len_a {
        if observer.should_stop() {
            return Err(DtwError::Cancelled);
        }

        let (start, end) = row_bounds(i, len_b, config.window);
        let a_i = a.sample(i);
        let mut costs: Vec<f64> = Vec::with_capacity(end - start + 1);

        for j in start..=end {
            let d = config.metric.distance(a_i, b.sample(j));
            let cost = if i == 0 && j == 0 {
                d
            } else {
                let diagonal = if i > 0 && j > 0 {
                    band.get(i - 1, j - 1) + weights.diagonal * d
                } else {
                    f64::INFINITY
                };
                let vertical = if i > 0 {
                    band.get(i - 1, j) + weights.vertical * d
                } else {
                    f64::INFINITY
                };
                // (i, j-1) 是本行上一个单元；行首时它在带外
                let horizontal = costs
                    .last()
                    .map_or(f64::INFINITY, |left| left + weights.horizontal * d);
                diagonal.min(vertical).min(horizontal)
            };
            costs.push(cost);
        }

        band.rows.push(BandRow { start, costs });

        if i % report_every == 0 {
            observer.on_progress(i as f64 / len_a as f64);
        }
    }

    Ok(band)
}

// 平局时按 对角 > 垂直 > 水平 的固定顺序选择前驱
fn backtrack(a: &Series, b: &Series, config: &DtwConfig, band: &CostBand) -> Vec<(usize, usize)> {
    let weights = config.step_pattern.weights();
    let (mut i, mut j) = (a.len() - 1, b.len() - 1);
    let mut path = Vec::with_capacity(a.len() + b.len());
    path.push((i, j));

    while i > 0 || j > 0 {
        if i == 0 {
            j -= 1;
        } else if j == 0 {
            i -= 1;
        } else {
            let d = config.metric.distance(a.sample(i), b.sample(j));
            let diagonal = band.get(i - 1, j - 1) + weights.diagonal * d;
            let vertical = band.get(i - 1, j) + weights.vertical * d;
            let horizontal = band.get(i, j - 1) + weights.horizontal * d;

            if diagonal <= vertical && diagonal <= horizontal {
                i -= 1;
                j -= 1;
            } else if vertical <= horizontal {
                i -= 1;
            } else {
                j -= 1;
            }
        }
        path.push((i, j));
    }

    path.reverse();
    path
}
