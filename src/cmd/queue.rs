//! Queue inspection and mutation commands - `fieldsync enqueue|list|remove|purge|status`.

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};
use std::io::Read;

use fieldsync::config::FieldsyncConfig;
use fieldsync::delivery::{Deliverer, HttpDeliverer};
use fieldsync::errors::QueueError;
use fieldsync::queue::{QueueName, QueuedRecord};

use super::{open_store, try_open_store};

/// Parse a payload argument; it must be a JSON object.
pub(crate) fn parse_payload(raw: &str) -> Result<Map<String, Value>> {
    let value: Value = serde_json::from_str(raw.trim()).context("Payload is not valid JSON")?;
    match value {
        Value::Object(map) => Ok(map),
        other => bail!(
            "Payload must be a JSON object, got {}",
            match other {
                Value::Array(_) => "an array",
                Value::String(_) => "a string",
                Value::Number(_) => "a number",
                Value::Bool(_) => "a boolean",
                _ => "null",
            }
        ),
    }
}

pub async fn cmd_enqueue(
    config: &FieldsyncConfig,
    queue: QueueName,
    id: Option<String>,
    payload: Option<String>,
) -> Result<()> {
    let raw = match payload {
        Some(raw) => raw,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read payload from stdin")?;
            buf
        }
    };
    let payload = parse_payload(&raw)?;
    let record = match id {
        Some(id) => QueuedRecord::with_id(id, payload),
        None => QueuedRecord::new(payload),
    };
    let record_id = record.id.clone();

    let store = match try_open_store(config).await {
        Ok(store) => store,
        Err(QueueError::StorageUnavailable { path, source }) => {
            tracing::warn!(
                path = %path.display(),
                error = %source,
                "Offline queue unavailable; submitting record inline"
            );
            return submit_inline(config, queue, record).await;
        }
        Err(e) => return Err(e.into()),
    };
    store
        .enqueue(queue, record)
        .await
        .with_context(|| format!("Failed to enqueue record in {}", queue))?;

    tracing::info!(queue = %queue, id = %record_id, "Record enqueued");
    println!("{}", record_id);
    Ok(())
}

/// Deliver one record immediately, with no offline durability.
async fn submit_inline(
    config: &FieldsyncConfig,
    queue: QueueName,
    record: QueuedRecord,
) -> Result<()> {
    let deliverer = HttpDeliverer::from_config(config)?;
    deliverer.deliver(queue, &record).await.with_context(|| {
        format!(
            "Offline queue unavailable and inline submission of {} to {} failed",
            record.id, queue
        )
    })?;

    tracing::info!(queue = %queue, id = %record.id, "Record submitted inline");
    println!("{}", record.id);
    Ok(())
}

pub async fn cmd_list(config: &FieldsyncConfig, queue: QueueName, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let records = store.drain_queue(queue).await?.collect_all().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("Queue {} is empty.", queue);
        return Ok(());
    }
    for record in &records {
        let retry = if record.attempts > 0 {
            format!(
                " {}",
                console::style(format!(
                    "[{} failed: {}]",
                    record.attempts,
                    record.last_error.as_deref().unwrap_or("unknown")
                ))
                .yellow()
            )
        } else {
            String::new()
        };
        println!(
            "{}  {}  {}{}",
            record.id,
            console::style(record.enqueued_at.format("%Y-%m-%d %H:%M:%S")).dim(),
            Value::Object(record.payload.clone()),
            retry
        );
    }
    Ok(())
}

pub async fn cmd_remove(config: &FieldsyncConfig, queue: QueueName, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    if store.remove(queue, id).await? {
        println!("Removed {} from {}.", id, queue);
    } else {
        println!("No record {} in {}; nothing to remove.", id, queue);
    }
    Ok(())
}

pub async fn cmd_purge(config: &FieldsyncConfig, queue: QueueName, force: bool) -> Result<()> {
    if !force {
        bail!(
            "Purging deletes every undelivered record in {}. Re-run with --force to confirm.",
            queue
        );
    }
    let store = open_store(config).await?;
    let removed = store.purge(queue).await?;
    tracing::warn!(queue = %queue, removed, "Queue purged");
    println!("Purged {} record(s) from {}.", removed, queue);
    Ok(())
}

pub async fn cmd_status(config: &FieldsyncConfig, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let stats = store.stats().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{}", console::style("Offline Queue Status").bold().cyan());
    println!("Store: {}", config.db_path().display());
    println!();
    for s in &stats {
        let oldest = s
            .oldest_enqueued_at
            .map(|t| format!(", oldest {}", t.format("%Y-%m-%d %H:%M:%S")))
            .unwrap_or_default();
        let retrying = if s.retrying > 0 {
            console::style(format!(", {} retrying", s.retrying))
                .yellow()
                .to_string()
        } else {
            String::new()
        };
        println!(
            "  {:<11} {} pending{}{}",
            s.queue.as_str(),
            s.pending,
            retrying,
            oldest
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payload_accepts_object() {
        let map = parse_payload(r#" {"hours": 8, "note": "site visit"} "#).unwrap();
        assert_eq!(map["hours"], 8);
        assert_eq!(map["note"], "site visit");
    }

    #[test]
    fn test_parse_payload_rejects_non_object() {
        let err = parse_payload("[1, 2]").unwrap_err();
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn test_parse_payload_rejects_invalid_json() {
        assert!(parse_payload("{hours: 8").is_err());
    }
}
