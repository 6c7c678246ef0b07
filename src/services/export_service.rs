//! Domain service for compiling the policy and publishing the artifacts.

use thiserror::Error;

use crate::compiler::{CompileError, CompiledConfig, PublishError, PublishReport};
use crate::error::StoreError;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to read policy: {0}")]
    Store(#[from] StoreError),

    #[error("Compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),
}

/// Outcome of an apply. `published` is `None` for a dry run.
#[derive(Debug, Clone)]
pub struct ApplyReport {
    pub compiled: CompiledConfig,
    pub published: Option<PublishReport>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    pub dry_run: bool,
    /// Overrides `export.allow_empty` for this call.
    pub allow_empty: bool,
}

#[async_trait::async_trait]
pub trait ExportService: Send + Sync {
    /// Compiles the current policy without writing anything.
    async fn compile(&self) -> Result<CompiledConfig, ExportError>;

    /// Compiles and, unless `dry_run` is set, atomically publishes.
    async fn apply(&self, options: ApplyOptions) -> Result<ApplyReport, ExportError>;
}
