//! 带缓存的对齐引擎
//!
//! 缓存查找先于计算，未命中时计算完成后写回。键由两条序列和配置的
//! 规范化指纹组成。

use super::batch::{compute_batch_with, BatchResult, PairDistance};
use super::dtw::{self, AlignmentObserver, DtwConfig, DtwResult, Unobserved};
use crate::cache::{CachedValue, Fingerprint, FingerprintBuilder, ResultCache};
use crate::error::DtwError;
use crate::types::Series;
use std::sync::Arc;

/// 单次对齐结果及缓存命中标记
#[derive(Debug, Clone)]
pub struct Alignment {
    pub result: Arc<DtwResult>,
    pub cache_hit: bool,
}

/// 对齐引擎
#[derive(Clone, Default)]
pub struct AlignmentEngine {
    cache: Option<Arc<ResultCache>>,
}

impl AlignmentEngine {
    /// 无缓存引擎
    pub fn new() -> Self {
        Self::default()
    }

    /// 共享结果缓存的引擎
    pub fn with_cache(cache: Arc<ResultCache>) -> Self {
        Self { cache: Some(cache) }
    }

    pub fn cache(&self) -> Option<&Arc<ResultCache>> {
        self.cache.as_ref()
    }

    /// 一对序列在给定配置下的缓存键
    pub fn cache_key(a: &Series, b: &Series, config: &DtwConfig) -> Fingerprint {
        let mut builder = FingerprintBuilder::new("dtw");
        builder.feed(a).feed(b).feed(config);
        builder.finish()
    }

    pub fn compute_distance(
        &self,
        a: &Series,
        b: &Series,
        config: &DtwConfig,
    ) -> Result<Alignment, DtwError> {
        self.compute_distance_observed(a, b, config, &Unobserved)
    }

    pub fn compute_distance_observed(
        &self,
        a: &Series,
        b: &Series,
        config: &DtwConfig,
        observer: &dyn AlignmentObserver,
    ) -> Result<Alignment, DtwError> {
        if let Some(result) = self.lookup(a, b, config) {
            return Ok(Alignment {
                result,
                cache_hit: true,
            });
        }
        Ok(Alignment {
            result: self.compute_and_store(a, b, config, observer)?,
            cache_hit: false,
        })
    }

    /// 只查缓存，不计算
    pub fn lookup(&self, a: &Series, b: &Series, config: &DtwConfig) -> Option<Arc<DtwResult>> {
        let cache = self.cache.as_ref()?;
        match cache.get(&Self::cache_key(a, b, config)) {
            Some(CachedValue::Alignment(result)) => Some(result),
            _ => None,
        }
    }

    /// 跳过查找直接计算，成功后写回缓存
    pub fn compute_and_store(
        &self,
        a: &Series,
        b: &Series,
        config: &DtwConfig,
        observer: &dyn AlignmentObserver,
    ) -> Result<Arc<DtwResult>, DtwError> {
        let result = Arc::new(dtw::compute_distance_observed(a, b, config, observer)?);
        if let Some(cache) = &self.cache {
            cache.put(Self::cache_key(a, b, config), CachedValue::Alignment(Arc::clone(&result)));
        }
        Ok(result)
    }

    /// 成对距离矩阵，每个对都经过缓存
    pub fn compute_batch(&self, series: &[Series], config: &DtwConfig) -> Result<BatchResult, DtwError> {
        self.compute_batch_observed(series, config, &Unobserved)
    }

    pub fn compute_batch_observed(
        &self,
        series: &[Series],
        config: &DtwConfig,
        observer: &dyn AlignmentObserver,
    ) -> Result<BatchResult, DtwError> {
        compute_batch_with(series, config, observer, |a, b, cfg, observer| {
            let alignment = self.compute_distance_observed(a, b, cfg, observer)?;
            Ok(PairDistance {
                distance: alignment.result.effective_distance(),
                cache_hit: alignment.cache_hit,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(capacity: usize) -> AlignmentEngine {
        AlignmentEngine::with_cache(Arc::new(ResultCache::new(capacity)))
    }

    #[test]
    fn test_repeated_call_hits_cache() {
        let engine = engine(8);
        let a = Series::scalar(vec![0.0, 1.0, 2.0, 1.0]);
        let b = Series::scalar(vec![0.0, 2.0, 1.0]);
        let config = DtwConfig::new().with_path();

        let first = engine.compute_distance(&a, &b, &config).unwrap();
        let second = engine.compute_distance(&a, &b, &config).unwrap();

        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.result, second.result);
        assert!(Arc::ptr_eq(&first.result, &second.result));
        assert_eq!(
            first.result.distance.to_bits(),
            second.result.distance.to_bits()
        );
    }

    #[test]
    fn test_config_change_misses_cache() {
        let engine = engine(8);
        let a = Series::scalar(vec![0.0, 1.0, 2.0]);
        let b = Series::scalar(vec![0.0, 2.0]);

        engine.compute_distance(&a, &b, &DtwConfig::new()).unwrap();
        let other = engine
            .compute_distance(&a, &b, &DtwConfig::new().normalized())
            .unwrap();
        assert!(!other.cache_hit);
        assert_eq!(engine.cache().unwrap().len(), 2);
    }

    #[test]
    fn test_lookup_only_sees_stored_results() {
        let engine = engine(8);
        let a = Series::scalar(vec![0.0, 1.0, 2.0]);
        let b = Series::scalar(vec![0.0, 2.0]);
        let config = DtwConfig::new();

        assert!(engine.lookup(&a, &b, &config).is_none());
        let stored = engine.compute_and_store(&a, &b, &config, &Unobserved).unwrap();
        let found = engine.lookup(&a, &b, &config).unwrap();
        assert!(Arc::ptr_eq(&stored, &found));
        assert!(AlignmentEngine::new().lookup(&a, &b, &config).is_none());
    }

    #[test]
    fn test_uncached_engine() {
        let engine = AlignmentEngine::new();
        let a = Series::scalar(vec![1.0, 2.0]);
        let first = engine.compute_distance(&a, &a, &DtwConfig::new()).unwrap();
        let second = engine.compute_distance(&a, &a, &DtwConfig::new()).unwrap();
        assert!(!first.cache_hit && !second.cache_hit);
        assert_eq!(first.result.distance, 0.0);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let engine = engine(8);
        let a = Series::scalar(vec![1.0, 2.0, 3.0]);
        let b = Series::scalar(vec![1.0]);
        assert!(engine.compute_distance(&a, &b, &DtwConfig::new().with_window(0)).is_err());
        assert!(engine.cache().unwrap().is_empty());
    }

    #[test]
    fn test_batch_through_cache() {
        let engine = engine(32);
        let series: Vec<Series> = (0..4)
            .map(|k| Series::scalar((0..100).map(|i| ((i + k) as f64 * 0.2).cos()).collect::<Vec<f64>>()))
            .collect();

        let first = engine.compute_batch(&series, &DtwConfig::new()).unwrap();
        assert_eq!(first.pair_computations, 6);
        assert_eq!(first.cache_hits, 0);

        let second = engine.compute_batch(&series, &DtwConfig::new()).unwrap();
        assert_eq!(second.pair_computations, 0);
        assert_eq!(second.cache_hits, 6);
        assert_eq!(first.distances, second.distances);
    }
}
