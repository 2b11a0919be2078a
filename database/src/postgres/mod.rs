mod indexer;
mod models;
mod reader;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("src/postgres/migrations");

pub struct PostgresDBManager {
    pool: sqlx::Pool<sqlx::Postgres>,
}

impl PostgresDBManager {
    async fn create_pool(
        database_url: &str,
        read_only: bool,
        max_connections: u32,
    ) -> anyhow::Result<sqlx::Pool<sqlx::Postgres>> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        if !read_only {
            Self::run_migrations(&MIGRATOR, &pool).await?;
        }
        Ok(pool)
    }

    async fn run_migrations(
        migrator: &sqlx::migrate::Migrator,
        pool: &sqlx::Pool<sqlx::Postgres>,
    ) -> anyhow::Result<()> {
        migrator.run(pool).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl crate::BaseDbManager for PostgresDBManager {
    async fn new(config: &configuration::DatabaseConfig) -> anyhow::Result<Box<Self>> {
        let pool = Self::create_pool(
            &config.database_url,
            config.read_only,
            config.max_connections,
        )
        .await?;
        Ok(Box::new(Self { pool }))
    }
}
