//! Idempotent schema setup.
//!
//! | Table | Contents |
//! |-------|----------|
//! | `index_chunks` | Chunk records of the SQLite index client |
//! | `managed_documents` | Documents owned by managed collections |
//! | `collection_snapshots` | Last applied definition of every collection |

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_chunks (
            tenant TEXT NOT NULL,
            collection_id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            document_url TEXT,
            language TEXT,
            pos_first_char INTEGER NOT NULL,
            pos_last_char INTEGER NOT NULL,
            content TEXT NOT NULL,
            vector BLOB,
            embedding_model TEXT,
            store_hint TEXT NOT NULL,
            error_message TEXT,
            content_hash TEXT NOT NULL,
            PRIMARY KEY (tenant, collection_id, document_id, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS managed_documents (
            id TEXT PRIMARY KEY,
            tenant TEXT NOT NULL,
            collection_id TEXT NOT NULL,
            name TEXT NOT NULL,
            title TEXT,
            content TEXT NOT NULL,
            language TEXT,
            mimetype TEXT NOT NULL DEFAULT 'text/plain',
            source_url TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collection_snapshots (
            tenant TEXT NOT NULL,
            id TEXT NOT NULL,
            definition TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (tenant, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Databases created before vectors were tagged with their model
    let has_model_column: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM pragma_table_info('index_chunks') WHERE name = 'embedding_model')",
    )
    .fetch_one(pool)
    .await?;
    if !has_model_column {
        sqlx::query("ALTER TABLE index_chunks ADD COLUMN embedding_model TEXT")
            .execute(pool)
            .await?;
    }

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_index_chunks_document ON index_chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_managed_documents_collection ON managed_documents(tenant, collection_id, id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
