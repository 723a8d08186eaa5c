//! 参考对齐引擎 - 窗口约束DTW

pub mod batch;
pub mod dtw;
pub mod engine;
pub mod metric;

pub use batch::{compute_batch, pair_indices, BatchResult};
pub use dtw::{
    compute_distance, compute_distance_observed, validate_pair, AlignmentObserver, DtwConfig,
    DtwResult, StepPattern, Unobserved,
};
pub use engine::{Alignment, AlignmentEngine};
pub use metric::DistanceMetric;
