//! `sync`, `reindex` and `notify` commands.
//!
//! `sync` applies configuration changes: the configured collections are
//! diffed against the last applied snapshot, the resulting events are
//! handled, every collection is swept for documents that aren't indexed
//! yet, and the queue is run to completion. The snapshot is saved only
//! after the queue drained.

use anyhow::{bail, Result};

use llm_index_core::models::SourceKind;

use crate::app::Pipeline;
use crate::collections::{diff, load_snapshot, save_snapshot};
use crate::config::Config;
use crate::events::{DocumentEvent, IndexEvent};
use crate::queue::{IndexTask, TaskQueue};
use crate::worker::WorkerReport;

pub async fn run_sync(config: &Config) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let previous = load_snapshot(&pipeline.pool).await?;
    let current = config.collections();

    let events = diff(&previous, &current);
    for event in &events {
        tracing::info!(event = event.name(), tenant = event.tenant(), "applying");
        pipeline.orchestrator.handle_event(event).await?;
    }
    for c in &current {
        pipeline
            .queue
            .enqueue(IndexTask::collection(&c.tenant, &c.id))
            .await?;
    }

    let report = pipeline.worker().run_until_idle().await;
    save_snapshot(&pipeline.pool, &current).await?;

    println!("Collection changes: {}", events.len());
    print_report(&report);
    Ok(())
}

/// Sweeps one collection, or every collection. With `full`, every document
/// is reindexed instead of only the missing ones.
pub async fn run_reindex(config: &Config, collection: Option<&str>, full: bool) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let targets = match collection {
        Some(name) => vec![pipeline.collection(name)?],
        None => pipeline.orchestrator.collections().list(),
    };
    if targets.is_empty() {
        println!("No collections configured.");
        return Ok(());
    }

    for c in &targets {
        if full {
            let scheduled = pipeline.orchestrator.reindex_all(c).await?;
            println!("{}:{}: {} documents scheduled", c.tenant, c.id, scheduled);
        } else {
            pipeline
                .queue
                .enqueue(IndexTask::collection(&c.tenant, &c.id))
                .await?;
        }
    }

    let report = pipeline.worker().run_until_idle().await;
    print_report(&report);
    Ok(())
}

/// Reports an out-of-band change to a document.
///
/// Ids of the form `tenant:collection/name` are managed documents; anything
/// else is a mirrored page reference.
pub async fn run_notify(config: &Config, action: &str, document_id: &str) -> Result<()> {
    let Some((tenant, rest)) = document_id.split_once(':') else {
        bail!("document id '{}' must start with 'tenant:'", document_id);
    };
    let event = match rest.split_once('/') {
        Some((collection, _)) => DocumentEvent::managed(tenant, collection, document_id),
        None => DocumentEvent::mirrored(tenant, document_id),
    };
    let event = match action {
        "created" => IndexEvent::DocumentCreated(event),
        "updated" => IndexEvent::DocumentUpdated(event),
        "deleted" => IndexEvent::DocumentDeleted(event),
        other => bail!("unknown action '{}'. Must be one of: created, updated, deleted", other),
    };

    let pipeline = Pipeline::open(config).await?;
    pipeline.orchestrator.handle_event(&event).await?;
    let report = pipeline.worker().run_until_idle().await;
    print_report(&report);
    Ok(())
}

pub fn print_report(report: &WorkerReport) {
    println!("Tasks:     {} ok, {} retried, {} failed, {} skipped",
        report.succeeded, report.retried, report.failed, report.skipped);
    println!("Documents: {} indexed, {} removed", report.documents_indexed, report.documents_removed);
    println!("Chunks:    {} written, {} without vector", report.chunks_written, report.chunks_without_vector);
}

/// Lists configured collections.
pub fn list_collections(config: &Config) -> Result<()> {
    let collections = config.collections();
    if collections.is_empty() {
        println!("No collections configured.");
        return Ok(());
    }
    println!("{:<12} {:<20} {:<9} {:<16} {:<10} SCOPE", "TENANT", "ID", "SOURCE", "MODEL", "CHUNKING");
    for c in collections {
        let scope = match c.source {
            SourceKind::Managed => "-".to_string(),
            SourceKind::Mirrored => c.scope.join(", "),
        };
        println!(
            "{:<12} {:<20} {:<9} {:<16} {:<10} {}",
            c.tenant,
            c.id,
            c.source,
            c.embedding_model,
            format!("{}/{}", c.chunking.max_chunk_chars, c.chunking.overlap_chars),
            scope
        );
    }
    Ok(())
}
