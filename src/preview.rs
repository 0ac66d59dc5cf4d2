//! `chunk <file>`: shows how a file would be split, without touching the index.

use std::path::Path;

use anyhow::{Context, Result};

use llm_index_core::chunk::chunk_text;
use llm_index_core::models::{ChunkingMethod, ChunkingPolicy};

pub fn run_chunk(path: &Path, max: usize, overlap: usize, method: &str) -> Result<()> {
    let method = match method {
        "character" => ChunkingMethod::Character,
        "section" => ChunkingMethod::Section,
        other => anyhow::bail!("unknown chunking method '{}'. Must be one of: character, section", other),
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let policy = ChunkingPolicy {
        method,
        max_chunk_chars: max,
        overlap_chars: overlap,
    };
    let spans = chunk_text(&content, &policy)?;

    for span in &spans {
        println!("--- chunk {} [{}..{}) ---", span.index, span.start, span.end);
        println!("{}", span.text);
    }
    println!("{} chunks, {} chars", spans.len(), content.chars().count());
    Ok(())
}
