//! Core data models flowing through the indexing pipeline.
//!
//! A [`Collection`] groups documents under one embedding model and one
//! [`ChunkingPolicy`]. Each indexed [`Document`] is split into [`Chunk`]s, the
//! unit of embedding and index storage. Chunks are derived data: they only
//! ever live in the index.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{IndexError, Result};

/// Chunking strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingMethod {
    /// Character-budgeted windows cut at blank lines or sentence ends.
    #[default]
    Character,
    /// Heading-delimited sections packed up to the character budget.
    Section,
}

/// How a collection's documents are split.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkingPolicy {
    #[serde(default)]
    pub method: ChunkingMethod,
    pub max_chunk_chars: usize,
    #[serde(default)]
    pub overlap_chars: usize,
}

impl ChunkingPolicy {
    pub fn character(max_chunk_chars: usize, overlap_chars: usize) -> Self {
        Self {
            method: ChunkingMethod::Character,
            max_chunk_chars,
            overlap_chars,
        }
    }

    /// Rejects policies that would make the chunker loop or emit nothing.
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_chars == 0 {
            return Err(IndexError::InvalidPolicy(
                "max_chunk_chars must be > 0".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chunk_chars {
            return Err(IndexError::InvalidPolicy(format!(
                "overlap_chars ({}) must be smaller than max_chunk_chars ({})",
                self.overlap_chars, self.max_chunk_chars
            )));
        }
        Ok(())
    }
}

impl Default for ChunkingPolicy {
    fn default() -> Self {
        Self::character(1000, 200)
    }
}

/// Which document source owns a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Documents created and edited through this application.
    Managed,
    /// Documents living in spaces of the host store, observed only.
    Mirrored,
}

impl SourceKind {
    /// Tag written on every index entry produced by this source.
    pub fn store_hint(&self) -> &'static str {
        match self {
            SourceKind::Managed => "managed",
            SourceKind::Mirrored => "mirrored",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.store_hint())
    }
}

/// A named, policy-carrying grouping of documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub tenant: String,
    #[serde(default)]
    pub title: String,
    pub embedding_model: String,
    #[serde(default)]
    pub chunking: ChunkingPolicy,
    pub source: SourceKind,
    /// Space prefixes for mirrored collections. Unused for managed ones.
    #[serde(default)]
    pub scope: Vec<String>,
    /// Principal used to resolve the embedding model and read documents.
    #[serde(default)]
    pub owner: Option<String>,
}

impl Collection {
    pub fn store_hint(&self) -> &'static str {
        self.source.store_hint()
    }

    /// Scope prefixes compared as a set.
    pub fn same_scope(&self, other: &Collection) -> bool {
        let mut a: Vec<&str> = self.scope.iter().map(|s| s.trim()).collect();
        let mut b: Vec<&str> = other.scope.iter().map(|s| s.trim()).collect();
        a.sort_unstable();
        a.dedup();
        b.sort_unstable();
        b.dedup();
        a == b
    }

    /// Document id prefix shared by every managed document of this collection.
    pub fn managed_prefix(&self) -> String {
        format!("{}:{}/", self.tenant, self.id)
    }
}

/// Builds the id of a managed document.
pub fn managed_document_id(tenant: &str, collection_id: &str, name: &str) -> String {
    format!("{}:{}/{}", tenant, collection_id, name)
}

/// A document ready for chunking, content already flattened to text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub tenant: String,
    pub collection_id: String,
    pub title: Option<String>,
    pub content: String,
    pub language: Option<String>,
    pub mimetype: String,
    pub source_url: Option<String>,
}

/// Identity of a chunk in the index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub tenant: String,
    pub collection_id: String,
    pub document_id: String,
    pub chunk_index: usize,
}

/// One chunk record, as written to the index service.
///
/// Serializes to the camelCase wire shape of the index schema. An empty
/// `vector` means the chunk has no embedding; `error_message` says why.
/// `embedding_model` names the model that produced `vector`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub tenant: String,
    pub collection_id: String,
    pub document_id: String,
    pub chunk_index: usize,
    #[serde(rename = "documentURL")]
    pub document_url: Option<String>,
    pub language: Option<String>,
    pub pos_first_char: usize,
    pub pos_last_char: usize,
    pub content: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    pub store_hint: String,
    pub error_message: Option<String>,
}

impl Chunk {
    pub fn key(&self) -> ChunkKey {
        ChunkKey {
            tenant: self.tenant.clone(),
            collection_id: self.collection_id.clone(),
            document_id: self.document_id.clone(),
            chunk_index: self.chunk_index,
        }
    }

    pub fn has_vector(&self) -> bool {
        !self.vector.is_empty()
    }

    /// SHA-256 of the chunk text, used to reuse vectors across reindexing.
    pub fn content_hash(&self) -> String {
        content_hash(&self.content)
    }
}

pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}
