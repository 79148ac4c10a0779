use async_trait::async_trait;
use chrono::{DateTime, Utc};
use settlement::{
    store::check_status, Currency, CurrencyState, MetadataStore, NewCurrency, Parameter,
};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::QueryScalar;
use sqlx::{Pool, Postgres, Row};
use std::time::Duration;
use tracing::info;

use crate::errors::Result;

const CURRENCY_COLUMNS: &str = "id, code, name, state, company_account_id, created_at";

/// Postgres-backed [`MetadataStore`].
///
/// Reads are plain selects; writes call the stored functions from
/// `migrations/`, which answer `OK` or a refusal message.
#[derive(Debug, Clone)]
pub struct PgMetadataStore {
    pool: Pool<Postgres>,
}

impl PgMetadataStore {
    pub async fn new(database_url: &str, max_connections: u32, min_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        Ok(PgMetadataStore { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| crate::errors::TransferEngineError::Database(e.into()))?;
        info!("Database migrations applied");
        Ok(())
    }

    async fn call_status(&self, query: QueryScalar<'_, Postgres, String, PgArguments>) -> settlement::Result<()> {
        let status = query.fetch_one(&self.pool).await.map_err(store_error)?;
        check_status(&status)
    }

    async fn require_currency(&self, id: u32) -> settlement::Result<Currency> {
        self.get_currency(id)
            .await?
            .ok_or(settlement::Error::CurrencyNotFound(id))
    }
}

fn store_error(err: sqlx::Error) -> settlement::Error {
    settlement::Error::Store(err.to_string())
}

fn currency_from_row(row: &PgRow) -> settlement::Result<Currency> {
    let id: i64 = row.try_get("id").map_err(store_error)?;
    let state: String = row.try_get("state").map_err(store_error)?;
    let company_account_id: Option<String> = row.try_get("company_account_id").map_err(store_error)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(store_error)?;

    let company_account_id = company_account_id
        .map(|raw| {
            raw.trim()
                .parse::<u128>()
                .map_err(|_| settlement::Error::Store(format!("invalid company account id '{}' for currency {}", raw, id)))
        })
        .transpose()?;

    Ok(Currency {
        id: u32::try_from(id).map_err(|_| settlement::Error::Store(format!("currency id {} out of range", id)))?,
        code: row.try_get("code").map_err(store_error)?,
        name: row.try_get("name").map_err(store_error)?,
        state: CurrencyState::from_code(&state)
            .ok_or_else(|| settlement::Error::Store(format!("unknown currency state '{}'", state)))?,
        company_account_id,
        created_at,
    })
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn get_currency(&self, id: u32) -> settlement::Result<Option<Currency>> {
        let row = sqlx::query(&format!("SELECT {} FROM currencies WHERE id = $1", CURRENCY_COLUMNS))
            .bind(i64::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;

        row.as_ref().map(currency_from_row).transpose()
    }

    async fn list_currencies(&self, state: Option<CurrencyState>) -> settlement::Result<Vec<Currency>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM currencies WHERE $1::TEXT IS NULL OR state = $1 ORDER BY id",
            CURRENCY_COLUMNS
        ))
        .bind(state.map(CurrencyState::code))
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.iter().map(currency_from_row).collect()
    }

    async fn create_pending_currency(&self, currency: &NewCurrency) -> settlement::Result<Currency> {
        self.call_status(
            sqlx::query_scalar("SELECT create_currency($1, $2, $3)")
                .bind(i64::from(currency.id))
                .bind(currency.code.as_str())
                .bind(currency.name.as_str()),
        )
        .await?;
        self.require_currency(currency.id).await
    }

    async fn activate_currency(&self, id: u32, company_account_id: u128) -> settlement::Result<Currency> {
        self.call_status(
            sqlx::query_scalar("SELECT activate_currency($1, $2)")
                .bind(i64::from(id))
                .bind(company_account_id.to_string()),
        )
        .await?;
        self.require_currency(id).await
    }

    async fn deactivate_currency(&self, id: u32) -> settlement::Result<Currency> {
        self.call_status(sqlx::query_scalar("SELECT deactivate_currency($1)").bind(i64::from(id)))
            .await?;
        self.require_currency(id).await
    }

    async fn delete_currency(&self, id: u32) -> settlement::Result<()> {
        self.call_status(sqlx::query_scalar("SELECT delete_currency($1)").bind(i64::from(id)))
            .await
    }

    async fn get_parameter(&self, name: &str) -> settlement::Result<Option<Parameter>> {
        let row = sqlx::query("SELECT name, value, description, modifiable FROM parameters WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;

        row.map(|row| {
            Ok(Parameter {
                name: row.try_get("name").map_err(store_error)?,
                value: row.try_get("value").map_err(store_error)?,
                description: row.try_get("description").map_err(store_error)?,
                modifiable: row.try_get("modifiable").map_err(store_error)?,
            })
        })
        .transpose()
    }
}
