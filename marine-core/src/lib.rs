//! Core library for the `marine` forecast tool.
//!
//! This crate defines:
//! - Provider adapters for upstream marine-weather sources, each normalizing
//!   into canonical units
//! - The aggregator: concurrent fan-out with per-provider timeout and retry
//! - The merger: confidence-weighted reconciliation into one series
//! - Configuration & credentials handling
//!
//! It is used by `marine-cli`, but can also be embedded by other binaries or
//! services that persist the merged rows themselves.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod merger;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod provider;

pub use aggregator::{Aggregator, RetryPolicy};
pub use config::{Config, PipelineConfig, ProviderConfig};
pub use error::{ConfigError, PipelineError, ProviderError, ProviderErrorKind};
pub use merger::Merger;
pub use model::{
    DroppedProvider, ForecastRow, ForecastSample, MergedForecast, ProviderResult, RawSample,
    TideType, WaveHeight,
};
pub use pipeline::ForecastPipeline;
pub use provider::{MarineProvider, ProviderId};
