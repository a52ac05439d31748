//! Vector removal command

use anyhow::{bail, Context, Result};
use dialoguer::Confirm;
use serde_json::json;

use kbassist_core::{AuditEvent, AuditLevel, DeleteTarget};

use crate::app::Services;
use crate::output;

pub async fn run(
    services: &Services,
    namespace: Option<&str>,
    ids: Vec<String>,
    assume_yes: bool,
) -> Result<()> {
    let namespace = namespace.unwrap_or(&services.config.vector.namespace);

    let (target, description) = if ids.is_empty() {
        (DeleteTarget::Namespace, format!("every vector in namespace '{}'", namespace))
    } else {
        let description = format!("{} vector(s) from namespace '{}'", ids.len(), namespace);
        (DeleteTarget::Ids(ids), description)
    };

    if !assume_yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete {}?", description))
            .default(false)
            .interact()
            .context("Confirmation prompt failed")?;
        if !confirmed {
            output::info("Aborted");
            return Ok(());
        }
    }

    let deleted_ids = match &target {
        DeleteTarget::Ids(ids) => json!(ids),
        DeleteTarget::Namespace => json!(null),
    };

    if let Err(e) = services.index.delete(target, namespace).await {
        let _ = services
            .store
            .log_event(
                AuditEvent::new("vectors_purged", format!("Failed to delete {}: {}", description, e), AuditLevel::Error)
                    .with_metadata(json!({ "namespace": namespace, "ids": deleted_ids })),
            )
            .await;
        bail!("Failed to delete {}: {}", description, e);
    }

    services
        .store
        .log_event(
            AuditEvent::new("vectors_purged", format!("Deleted {}", description), AuditLevel::Success)
                .with_metadata(json!({ "namespace": namespace, "ids": deleted_ids })),
        )
        .await
        .context("Failed to record audit event")?;

    output::success(&format!("Deleted {}", description));
    Ok(())
}
