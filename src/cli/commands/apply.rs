use crate::config::Config;
use crate::services::{ApplyOptions, ExportService, SeaOrmExportService};

use super::connect;

pub async fn cmd_apply(config: &Config, dry_run: bool, allow_empty: bool) -> anyhow::Result<()> {
    let service = SeaOrmExportService::new(connect(config).await?, config.export.clone());
    let report = service
        .apply(ApplyOptions {
            dry_run,
            allow_empty,
        })
        .await?;

    match &report.published {
        None => {
            for artifact in report.compiled.artifacts() {
                println!("### {} ({} records)", artifact.kind, artifact.records);
                print!("{}", artifact.content);
                println!();
            }
            println!("Dry run: nothing was written.");
        }
        Some(published) => {
            println!("Published to {}:", published.directory.display());
            for file in &published.files {
                println!(
                    "  • {} ({} records, {} bytes)",
                    file.path.display(),
                    file.records,
                    file.bytes
                );
            }
        }
    }

    Ok(())
}
