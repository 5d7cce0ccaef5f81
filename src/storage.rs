use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};

use crate::errors::LatticeError;
use crate::settings::Database as DbCfg;

/// Connects the process-wide pool to the backing store.
pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, LatticeError> {
    let mut options = ConnectOptions::new(cfg.url());
    options
        .max_connections(cfg.max_connections)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);

    let db = Database::connect(options).await?;
    Ok(db)
}
