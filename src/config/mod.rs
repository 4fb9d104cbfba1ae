// src/config/mod.rs
//! Runtime configuration: pipeline tunables and categorizer provider selection.

pub mod categorizer;
pub mod pipeline;

pub use categorizer::CategorizerConfig;
pub use pipeline::PipelineConfig;
