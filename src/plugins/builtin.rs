//! 内置插件
//!
//! `builtin:dtw` 通过插件契约暴露对齐引擎：两条序列 `series_a`/`series_b`
//! 产出 `alignment`，序列列表 `series` 产出 `distance_matrix`。

use super::core::{ExecutionContext, Plugin, PluginFactory};
use super::manifest::{parse, Manifest, ManifestFormat, ResolvedConfig};
use crate::alignment::{pair_indices, DistanceMetric, DtwConfig, StepPattern};
use crate::error::{ConfigError, ManifestError, PluginFault};
use crate::types::{OutputValue, PluginInputs, PluginOutput};
use std::sync::Arc;
use tracing::debug;

/// DTW插件入口点
pub const DTW_ENTRY_POINT: &str = "builtin:dtw";

/// 单对对齐的结果种类
pub const ALIGNMENT_KIND: &str = "alignment";

/// 批量距离矩阵的结果种类
pub const DISTANCE_MATRIX_KIND: &str = "distance_matrix";

const DTW_MANIFEST: &str = r#"
id: dtw
name: Dynamic Time Warping
description: Windowed DTW alignment and pairwise distance matrices
version: 1.0.0
core:
  min: 0.1.0
  max: 1.0.0
requires: []
produces: [alignment, distance_matrix]
entry_point: builtin:dtw
config_schema:
  window_size:
    type: integer
    nullable: true
    description: Sakoe-Chiba band width, null for unconstrained
  metric:
    type: string
    default: euclidean
    allowed: [euclidean, manhattan, cosine]
  normalize_distance:
    type: boolean
    default: false
  return_path:
    type: boolean
    default: false
  return_cost_matrix:
    type: boolean
    default: false
  step_pattern:
    type: string
    default: symmetric
    allowed: [symmetric, asymmetric]
"#;

/// 内置DTW插件的清单
pub fn dtw_manifest() -> Result<Manifest, ManifestError> {
    parse(DTW_MANIFEST, ManifestFormat::Yaml)
}

/// 从合并后的配置构造DTW配置
pub fn dtw_config_from(config: &ResolvedConfig) -> Result<DtwConfig, ConfigError> {
    let metric = config
        .get_str("metric")?
        .parse::<DistanceMetric>()
        .map_err(|reason| ConfigError::InvalidValue {
            parameter: "metric".to_string(),
            reason,
        })?;
    let step_pattern = config
        .get_str("step_pattern")?
        .parse::<StepPattern>()
        .map_err(|reason| ConfigError::InvalidValue {
            parameter: "step_pattern".to_string(),
            reason,
        })?;

    Ok(DtwConfig {
        window: config.get_optional_usize("window_size")?,
        metric,
        normalize_distance: config.get_bool("normalize_distance")?,
        return_path: config.get_bool("return_path")?,
        return_cost_matrix: config.get_bool("return_cost_matrix")?,
        step_pattern,
    })
}

/// DTW插件
#[derive(Debug, Clone)]
pub struct DtwPlugin {
    manifest: Manifest,
}

impl DtwPlugin {
    pub fn new(manifest: Manifest) -> Self {
        Self { manifest }
    }

    fn align_pair(&self, inputs: &PluginInputs, ctx: &ExecutionContext, config: &DtwConfig) -> Result<PluginOutput, PluginFault> {
        let (a, b) = match (inputs.sequence("series_a"), inputs.sequence("series_b")) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(PluginFault::message("series_a and series_b are required")),
        };

        let engine = ctx.alignment_engine();
        let result = match engine.lookup(a, b, config) {
            Some(result) => {
                ctx.mark_cache_hit();
                ctx.report_progress(1.0);
                result
            }
            None => {
                // 只有真正计算时才申报代价矩阵的工作内存
                let _workspace = ctx.reserve(config.estimated_bytes(a.len(), b.len()))?;
                engine.compute_and_store(a, b, config, ctx)?
            }
        };
        debug!(
            "DTW alignment {}x{} distance {:.6}",
            a.len(),
            b.len(),
            result.distance
        );
        Ok(PluginOutput::new(ALIGNMENT_KIND, OutputValue::Alignment(result)))
    }

    fn align_batch(&self, inputs: &PluginInputs, ctx: &ExecutionContext, config: &DtwConfig) -> Result<PluginOutput, PluginFault> {
        let series = inputs
            .batch("series")
            .ok_or_else(|| PluginFault::message("series list is required"))?;

        // 并行的成对计算同时持有的工作集
        let pair_config = DtwConfig {
            return_path: false,
            return_cost_matrix: false,
            ..config.clone()
        };
        let pairs = pair_indices(series.len());
        let widest = pairs
            .iter()
            .map(|&(i, j)| pair_config.estimated_bytes(series[i].len(), series[j].len()))
            .max()
            .unwrap_or(0);
        let concurrent = pairs.len().min(rayon::current_num_threads()).max(1);
        let matrix_bytes = series.len() * series.len() * std::mem::size_of::<f64>();
        let _workspace = ctx.reserve(widest.saturating_mul(concurrent).saturating_add(matrix_bytes))?;

        let batch = ctx.alignment_engine().compute_batch_observed(series, config, ctx)?;
        if !pairs.is_empty() && batch.cache_hits == pairs.len() {
            ctx.mark_cache_hit();
        }
        ctx.note(format!(
            "{} pair computations, {} cache hits",
            batch.pair_computations, batch.cache_hits
        ));
        Ok(PluginOutput::new(
            DISTANCE_MATRIX_KIND,
            OutputValue::DistanceMatrix(batch.distances),
        ))
    }
}

impl Plugin for DtwPlugin {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn validate_inputs(&self, inputs: &PluginInputs) -> bool {
        let pair = inputs.sequence("series_a").is_some() && inputs.sequence("series_b").is_some();
        let batch = inputs.batch("series").is_some();
        pair != batch
    }

    fn execute(&self, inputs: &PluginInputs, ctx: &ExecutionContext) -> Result<PluginOutput, PluginFault> {
        let config = dtw_config_from(ctx.config())?;
        if inputs.batch("series").is_some() {
            self.align_batch(inputs, ctx, &config)
        } else {
            self.align_pair(inputs, ctx, &config)
        }
    }
}

/// DTW插件工厂
#[derive(Debug, Clone, Copy, Default)]
pub struct DtwPluginFactory;

impl PluginFactory for DtwPluginFactory {
    fn create(&self, manifest: &Manifest) -> Result<Arc<dyn Plugin>, String> {
        if !manifest.produces_kind(ALIGNMENT_KIND) && !manifest.produces_kind(DISTANCE_MATRIX_KIND) {
            return Err(format!(
                "manifest {} declares neither '{}' nor '{}'",
                manifest.key(),
                ALIGNMENT_KIND,
                DISTANCE_MATRIX_KIND
            ));
        }
        Ok(Arc::new(DtwPlugin::new(manifest.clone())))
    }
}
