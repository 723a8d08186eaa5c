//! 批量成对DTW距离
//!
//! 每个无序对 (i, j), i < j 只计算一次并镜像到 (j, i)；对角线恒为 0，
//! 不做计算。成对计算通过 rayon 并行执行，上报的进度按完成的对数累计且单调不减。

use super::dtw::{compute_distance_observed, AlignmentObserver, DtwConfig, Unobserved};
use crate::error::DtwError;
use crate::types::Series;
use ndarray::Array2;
use rayon::prelude::*;
use serde::Serialize;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 批量计算结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    /// `k x k` 对称距离矩阵
    pub distances: Array2<f64>,
    /// 实际执行的成对DTW计算次数
    pub pair_computations: usize,
    /// 命中缓存的对数
    pub cache_hits: usize,
}

/// 单个成对距离
#[derive(Debug, Clone, Copy)]
pub(crate) struct PairDistance {
    pub distance: f64,
    pub cache_hit: bool,
}

/// 所有 i < j 的下标对
pub fn pair_indices(count: usize) -> Vec<(usize, usize)> {
    (0..count)
        .flat_map(|i| (i + 1..count).map(move |j| (i, j)))
        .collect()
}

/// 成对计算使用的配置：路径和代价矩阵对距离矩阵没有用处
pub(crate) fn pair_config(config: &DtwConfig) -> DtwConfig {
    DtwConfig {
        return_path: false,
        return_cost_matrix: false,
        ..config.clone()
    }
}

/// 把各对的行进度折算为整批进度
struct BatchProgress<'a> {
    inner: &'a dyn AlignmentObserver,
    completed: AtomicUsize,
    reported: Mutex<f64>,
    total: f64,
}

impl<'a> BatchProgress<'a> {
    fn new(inner: &'a dyn AlignmentObserver, pairs: usize) -> Self {
        Self {
            inner,
            completed: AtomicUsize::new(0),
            reported: Mutex::new(0.0),
            total: pairs.max(1) as f64,
        }
    }

    /// 比较与转发在同一把锁内完成，转发出去的值严格递增
    fn report(&self, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        let mut reported = self.reported.lock();
        if fraction > *reported {
            *reported = fraction;
            self.inner.on_progress(fraction);
        }
    }

    fn pair_progress(&self, fraction: f64) {
        let completed = self.completed.load(Ordering::Acquire) as f64;
        self.report((completed + fraction.clamp(0.0, 1.0)) / self.total);
    }

    fn pair_finished(&self) {
        let completed = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        self.report(completed as f64 / self.total);
    }
}

/// 单个成对计算看到的观察者
struct PairObserver<'a, 'b>(&'b BatchProgress<'a>);

impl AlignmentObserver for PairObserver<'_, '_> {
    fn should_stop(&self) -> bool {
        self.0.inner.should_stop()
    }

    fn on_progress(&self, fraction: f64) {
        self.0.pair_progress(fraction);
    }
}

/// 计算序列列表的成对距离矩阵（无缓存）
pub fn compute_batch(series: &[Series], config: &DtwConfig) -> Result<BatchResult, DtwError> {
    compute_batch_with(series, config, &Unobserved, |a, b, cfg, observer| {
        let result = compute_distance_observed(a, b, cfg, observer)?;
        Ok(PairDistance {
            distance: result.effective_distance(),
            cache_hit: false,
        })
    })
}

pub(crate) fn compute_batch_with<F>(
    series: &[Series],
    config: &DtwConfig,
    observer: &dyn AlignmentObserver,
    pair: F,
) -> Result<BatchResult, DtwError>
where
    F: Fn(&Series, &Series, &DtwConfig, &dyn AlignmentObserver) -> Result<PairDistance, DtwError> + Sync,
{
    validate_batch(series)?;

    let count = series.len();
    let pairs = pair_indices(count);
    let cfg = pair_config(config);
    let progress = BatchProgress::new(observer, pairs.len());

    let computed = pairs
        .par_iter()
        .map(|&(i, j)| {
            if observer.should_stop() {
                return Err(DtwError::Cancelled);
            }
            let distance = pair(&series[i], &series[j], &cfg, &PairObserver(&progress))?;
            progress.pair_finished();
            Ok((i, j, distance))
        })
        .collect::<Result<Vec<_>, DtwError>>()?;

    let mut distances = Array2::zeros((count, count));
    let mut cache_hits = 0;
    for (i, j, entry) in &computed {
        distances[[*i, *j]] = entry.distance;
        distances[[*j, *i]] = entry.distance;
        if entry.cache_hit {
            cache_hits += 1;
        }
    }

    Ok(BatchResult {
        distances,
        pair_computations: computed.len() - cache_hits,
        cache_hits,
    })
}

fn validate_batch(series: &[Series]) -> Result<(), DtwError> {
    let expected_dim = series.first().map(|s| s.dim());
    for (index, s) in series.iter().enumerate() {
        if s.is_empty() {
            return Err(DtwError::EmptyInput { index });
        }
        if let Some(expected) = expected_dim {
            if s.dim() != expected {
                return Err(DtwError::DimensionMismatch {
                    expected,
                    found: s.dim(),
                });
            }
        }
        if let Some(position) = s
            .samples()
            .rows()
            .into_iter()
            .position(|row| row.iter().any(|v| !v.is_finite()))
        {
            return Err(DtwError::NonFinite { index, position });
        }
    }
    Ok(())
}
