//! `doc put | rm | ls` for managed collections.

use std::path::Path;

use anyhow::{Context, Result};

use llm_index_core::models::managed_document_id;
use llm_index_core::IndexError;

use crate::app::Pipeline;
use crate::config::Config;
use crate::extract::mimetype_for;
use crate::sources::DocumentDraft;
use crate::sync::print_report;

/// Creates or replaces a managed document from a file, then indexes it.
pub async fn run_put(
    config: &Config,
    collection: &str,
    name: &str,
    file: &Path,
    title: Option<String>,
) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let pipeline = Pipeline::open(config).await?;
    let collection = pipeline.collection(collection)?;
    let source = pipeline.sources.for_collection(&collection);

    let draft = DocumentDraft {
        title: title.or_else(|| Some(name.to_string())),
        content,
        language: None,
        mimetype: Some(mimetype_for(&file.to_string_lossy()).to_string()),
        source_url: Some(format!("file://{}", file.display())),
    };
    let id = managed_document_id(&collection.tenant, &collection.id, name);
    let event = match source.get_document(&collection, &id).await {
        Ok(_) => source.save_document(&collection, name, draft).await?,
        Err(IndexError::NotFound(_)) => source.create_document(&collection, name, draft).await?,
        Err(e) => return Err(e.into()),
    };

    pipeline.orchestrator.handle_event(&event).await?;
    let report = pipeline.worker().run_until_idle().await;
    println!("{} {}", event.name(), id);
    print_report(&report);
    Ok(())
}

pub async fn run_rm(config: &Config, collection: &str, name: &str) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let collection = pipeline.collection(collection)?;
    let event = pipeline
        .sources
        .for_collection(&collection)
        .delete_document(&collection, name)
        .await?;
    pipeline.orchestrator.handle_event(&event).await?;
    println!(
        "Deleted {}",
        managed_document_id(&collection.tenant, &collection.id, name)
    );
    Ok(())
}

pub async fn run_ls(config: &Config, collection: &str) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let collection = pipeline.collection(collection)?;
    let ids = pipeline
        .sources
        .for_collection(&collection)
        .enumerate(&collection, 0, None)
        .await?;
    for id in &ids {
        println!("{}", id);
    }
    println!("{} documents", ids.len());
    Ok(())
}
