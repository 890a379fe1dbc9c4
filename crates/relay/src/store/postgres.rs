use super::{KeyValueStore, StoreError};
use anyhow::Context as _;
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

const CREATE_TABLE: &str = "create table if not exists relay_kv (
    key text primary key,
    value text not null,
    updated_at timestamptz not null default now()
)";

/// Postgres-backed store (single `relay_kv` table).
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and make sure the table exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable or the schema cannot be created.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connect postgres")?;
        // Concurrent `create table if not exists` can still collide in the catalog.
        let mut tx = pool.begin().await.context("begin schema transaction")?;
        sqlx::query("select pg_advisory_xact_lock(hashtext('relay_kv'))")
            .execute(&mut *tx)
            .await
            .context("lock relay_kv schema")?;
        sqlx::query(CREATE_TABLE)
            .execute(&mut *tx)
            .await
            .context("create relay_kv table")?;
        tx.commit().await.context("commit schema transaction")?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl KeyValueStore for PostgresStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = sqlx::query_scalar::<_, String>("select value from relay_kv where key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            "insert into relay_kv (key, value) values ($1, $2)
             on conflict (key) do update set value = excluded.value, updated_at = now()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("delete from relay_kv where key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
