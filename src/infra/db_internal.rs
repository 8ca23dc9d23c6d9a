use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::infra::config::AppConfig;

pub async fn init_db(config: &AppConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    info!("数据库连接池已建立, max_connections={}", config.max_connections);
    Ok(pool)
}
