//! SQLite-backed catalog

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use super::{ValidatorCatalog, ValidatorEndpoint, VendorCatalog, VendorSource, VendorStatus};
use crate::Result;

const SCHEMA: [&str; 2] = [
    r#"CREATE TABLE IF NOT EXISTS vendors (
        name TEXT PRIMARY KEY,
        url TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'active',
        extractor TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS validators (
        url TEXT PRIMARY KEY,
        startstring TEXT NOT NULL
    )"#,
];

/// Catalog stored in a SQLite database
#[derive(Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    /// Open (creating if needed) the catalog database and ensure its schema
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool_options = if database_url.contains(":memory:") {
            // Every connection to :memory: opens a separate database, so keep
            // exactly one alive for the life of the pool
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };
        let pool = pool_options.connect_with(options).await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        tracing::debug!(url = %database_url, "Catalog database ready");

        Ok(Self { pool })
    }

    /// Insert or replace a vendor
    pub async fn upsert_vendor(&self, vendor: &VendorSource) -> Result<()> {
        sqlx::query(
            "INSERT INTO vendors (name, url, status, extractor) VALUES (?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET url = excluded.url,
                 status = excluded.status, extractor = excluded.extractor",
        )
        .bind(&vendor.name)
        .bind(&vendor.url)
        .bind(vendor.status.to_string())
        .bind(&vendor.extractor)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or replace a validator endpoint
    pub async fn upsert_validator(&self, validator: &ValidatorEndpoint) -> Result<()> {
        sqlx::query(
            "INSERT INTO validators (url, startstring) VALUES (?, ?)
             ON CONFLICT(url) DO UPDATE SET startstring = excluded.startstring",
        )
        .bind(&validator.url)
        .bind(&validator.startstring)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every vendor regardless of status
    pub async fn all_vendors(&self) -> Result<Vec<VendorSource>> {
        self.query_vendors("SELECT name, url, status, extractor FROM vendors ORDER BY name")
            .await
    }

    async fn query_vendors(&self, sql: &str) -> Result<Vec<VendorSource>> {
        let rows: Vec<(String, String, String, String)> =
            sqlx::query_as(sql).fetch_all(&self.pool).await?;

        let mut vendors = Vec::with_capacity(rows.len());
        for (name, url, status, extractor) in rows {
            let status = match status.parse::<VendorStatus>() {
                Ok(status) => status,
                Err(_) => {
                    tracing::warn!(vendor = %name, status = %status, "Unknown vendor status, treating as inactive");
                    VendorStatus::Inactive
                }
            };
            vendors.push(VendorSource {
                name,
                url,
                status,
                extractor,
            });
        }
        Ok(vendors)
    }
}

#[async_trait]
impl VendorCatalog for SqliteCatalog {
    async fn active_vendors(&self) -> Result<Vec<VendorSource>> {
        self.query_vendors(
            "SELECT name, url, status, extractor FROM vendors WHERE status = 'active' ORDER BY name",
        )
        .await
    }
}

#[async_trait]
impl ValidatorCatalog for SqliteCatalog {
    async fn validators(&self) -> Result<Vec<ValidatorEndpoint>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT url, startstring FROM validators ORDER BY url")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(url, startstring)| ValidatorEndpoint { url, startstring })
            .collect())
    }
}
