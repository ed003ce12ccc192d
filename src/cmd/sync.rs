//! Flush and trigger commands - `fieldsync flush|serve|tags`.

use anyhow::Result;
use std::sync::Arc;

use fieldsync::config::FieldsyncConfig;
use fieldsync::delivery::HttpDeliverer;
use fieldsync::queue::QueueName;
use fieldsync::server::TriggerServer;
use fieldsync::sync::{FlushReport, SyncService};

use super::open_store;

async fn build_service(config: &FieldsyncConfig) -> Result<SyncService> {
    let store = open_store(config).await?;
    let deliverer = HttpDeliverer::from_config(config)?;
    Ok(SyncService::new(store, Arc::new(deliverer)))
}

fn print_report(report: &FlushReport) {
    let status = if report.failures.is_empty() {
        console::style("ok").green()
    } else {
        console::style("partial").yellow()
    };
    let pending = report
        .pending
        .map_or_else(|| "unknown".to_string(), |n| n.to_string());
    println!(
        "{:<11} {} flushed, {} pending [{}]",
        report.queue.as_str(),
        report.flushed,
        pending,
        status
    );
    for failure in &report.failures {
        println!("  {} {}: {}", console::style("✗").red(), failure.id, failure.error);
    }
}

pub async fn cmd_flush(config: &FieldsyncConfig, queue: Option<QueueName>, json: bool) -> Result<()> {
    let service = build_service(config).await?;
    let reports = match queue {
        Some(queue) => vec![service.flush(queue).await],
        None => service.flush_all().await,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print_report(report);
        }
    }
    Ok(())
}

pub fn cmd_tags() {
    for queue in QueueName::ALL {
        println!("{}", queue.sync_tag());
    }
}

pub async fn cmd_serve(config: &FieldsyncConfig, bind: Option<&str>) -> Result<()> {
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let service = build_service(config).await?;
    let bind = bind.unwrap_or(&config.toml.server.bind);
    let mut server = TriggerServer::start(bind, service).await?;

    println!(
        "{} on {}",
        console::style("fieldsync trigger server listening").bold().cyan(),
        server.url()
    );
    println!("POST {}/sync/<tag> to flush a queue. Ctrl-C to stop.", server.url());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down trigger server");
    server.stop();
    Ok(())
}
