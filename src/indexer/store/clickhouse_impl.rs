use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clickhouse::Client;
use serde::Serialize;

use super::{AbiRow, EventRow, IndexStore, TransactionRow};

/// ClickHouse-backed gateway, speaking the HTTP interface.
///
/// Expects three MergeTree tables whose DDL is managed outside the service:
/// `transactions` ORDER BY (chain_id, block_number, hash),
/// `events` ORDER BY (chain_id, block_number, transaction_hash, log_index),
/// `abis` ORDER BY (chain_id, address). The `abis` table has no uniqueness
/// constraint; duplicate rows are tolerated on read.
pub struct ClickHouseStore {
    client: Client,
}

impl ClickHouseStore {
    pub fn new(url: &str, database: &str, user: Option<&str>, password: Option<&str>) -> Self {
        let mut client = Client::default().with_url(url).with_database(database);
        if let Some(user) = user {
            client = client.with_user(user);
        }
        if let Some(password) = password {
            client = client.with_password(password);
        }
        Self { client }
    }

    async fn insert_rows<T>(&self, table: &str, rows: &[T]) -> Result<()>
    where
        T: clickhouse::Row + Serialize,
    {
        let mut insert = self.client.insert(table)?;
        for row in rows {
            insert.write(row).await?;
        }
        insert
            .end()
            .await
            .with_context(|| format!("insert into {table} failed"))
    }
}

#[async_trait]
impl IndexStore for ClickHouseStore {
    async fn insert_transactions(&self, rows: &[TransactionRow]) -> Result<()> {
        self.insert_rows("transactions", rows).await
    }

    async fn insert_events(&self, rows: &[EventRow]) -> Result<()> {
        self.insert_rows("events", rows).await
    }

    async fn insert_abis(&self, rows: &[AbiRow]) -> Result<()> {
        self.insert_rows("abis", rows).await
    }

    async fn load_abis(
        &self,
        chain_id: u32,
        addresses: &[String],
    ) -> Result<HashMap<String, String>> {
        if addresses.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<AbiRow> = self
            .client
            .query("SELECT ?fields FROM abis WHERE chain_id = ? AND address IN ?")
            .bind(chain_id)
            .bind(addresses)
            .fetch_all()
            .await
            .context("loading abis failed")?;

        // duplicates accumulate in the append-only table, first row wins
        let mut abis = HashMap::new();
        for row in rows {
            abis.entry(row.address).or_insert(row.abi);
        }
        Ok(abis)
    }

    async fn latest_block(&self, chain_id: u32) -> Result<Option<u64>> {
        let latest = self
            .client
            // GROUP BY makes the aggregate return no rows (instead of 0) for
            // a chain that was never indexed
            .query(
                "SELECT max(block_number) FROM \
                 (SELECT chain_id, block_number FROM transactions WHERE chain_id = ? \
                  UNION ALL SELECT chain_id, block_number FROM events WHERE chain_id = ?) \
                 GROUP BY chain_id",
            )
            .bind(chain_id)
            .bind(chain_id)
            .fetch_optional::<u64>()
            .await
            .context("loading checkpoint failed")?;
        Ok(latest)
    }
}
