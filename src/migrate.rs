use anyhow::Result;
use sqlx::SqlitePool;

/// Create the local descriptor schema. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS descriptor_sets (
            name TEXT PRIMARY KEY,
            dimensions INTEGER NOT NULL,
            engine TEXT NOT NULL,
            metric TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Exactly one of text / image_index per descriptor
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS descriptors (
            id TEXT PRIMARY KEY,
            set_name TEXT NOT NULL,
            pdf_name TEXT NOT NULL,
            text TEXT,
            image_index INTEGER,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            CHECK ((text IS NULL) <> (image_index IS NULL)),
            FOREIGN KEY (set_name) REFERENCES descriptor_sets(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_descriptors_set_name ON descriptors(set_name)")
        .execute(pool)
        .await?;

    Ok(())
}
