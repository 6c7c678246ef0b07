//! `SeaORM` implementation of the `ExportService` trait.

use async_trait::async_trait;
use tracing::info;

use crate::compiler::{self, CompiledConfig};
use crate::config::ExportConfig;
use crate::db::Store;
use crate::services::export_service::{ApplyOptions, ApplyReport, ExportError, ExportService};

pub struct SeaOrmExportService {
    store: Store,
    export: ExportConfig,
}

impl SeaOrmExportService {
    #[must_use]
    pub const fn new(store: Store, export: ExportConfig) -> Self {
        Self { store, export }
    }
}

#[async_trait]
impl ExportService for SeaOrmExportService {
    async fn compile(&self) -> Result<CompiledConfig, ExportError> {
        let snapshot = self.store.snapshot().await?;
        let compiled = compiler::compile(&snapshot)?;

        for artifact in compiled.artifacts() {
            info!(
                artifact = %artifact.kind,
                records = artifact.records,
                bytes = artifact.content.len(),
                "Artifact compiled"
            );
        }
        Ok(compiled)
    }

    async fn apply(&self, options: ApplyOptions) -> Result<ApplyReport, ExportError> {
        let compiled = self.compile().await?;

        if options.dry_run {
            info!("Dry run; nothing published");
            return Ok(ApplyReport {
                compiled,
                published: None,
            });
        }

        let allow_empty = options.allow_empty || self.export.allow_empty;
        let report = compiler::publish(&compiled, &self.export, allow_empty).await?;

        Ok(ApplyReport {
            compiled,
            published: Some(report),
        })
    }
}
