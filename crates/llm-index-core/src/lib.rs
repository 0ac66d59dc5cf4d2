//! # llm-index core
//!
//! Pure, runtime-agnostic logic shared by the indexing pipeline:
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Collections, documents, chunks, chunking policies |
//! | [`reference`] | Document and space references, scope resolution |
//! | [`chunk`] | Character and section chunkers |
//! | [`embedding`] | Vector width fitting and blob encoding |
//! | [`index`] | The [`IndexClient`](index::IndexClient) protocol and an in-memory client |
//! | [`error`] | The [`IndexError`](error::IndexError) taxonomy |
//!
//! This crate has no tokio, sqlx, or network dependencies.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod reference;

pub use error::{ErrorKind, IndexError, Result};
