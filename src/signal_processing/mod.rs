//! Signal Processing Module
//!
//! FIR filtering for SSR recordings:
//! - Windowed-sinc low-pass/high-pass/band-pass/band-stop design
//! - Causal and zero-phase (forward-backward) application
//! - A configurable reference + filter conditioning pipeline

mod filters;
mod pipeline;

pub use filters::{
    create_filter, default_filter_order, filter_matrix, filter_signal, AppliedFilter,
    FilterConfig, FirFilter, ResponseType, Window,
};
pub use pipeline::{condition_batch, ConditioningConfig, ConditioningPipeline, ConditioningReport};
