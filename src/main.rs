use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use lattice::*;
use migration::MigratorTrait;
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "lattice",
    version,
    about = "Relationship-based access control service"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Path to the authorization schema document
    #[arg(long, default_value = "schema.yaml")]
    schema: String,

    /// Hostname for the database
    #[arg(long, env = "DB_HOST")]
    db_host: Option<String>,

    /// Port for the database
    #[arg(long, env = "DB_PORT")]
    db_port: Option<u16>,

    /// Name for the database
    #[arg(long, env = "DB_NAME")]
    db_name: Option<String>,

    /// User for the database
    #[arg(long, env = "DB_USER")]
    db_user: Option<String>,

    /// Password for the database
    #[arg(long, env = "DB_PASSWORD")]
    db_password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings; database flags and their environment fallbacks win
    // over the file
    let mut settings = settings::Settings::load(&cli.config)?;
    if let Some(host) = cli.db_host {
        settings.database.host = host;
    }
    if let Some(port) = cli.db_port {
        settings.database.port = port;
    }
    if let Some(name) = cli.db_name {
        settings.database.name = name;
    }
    if let Some(user) = cli.db_user {
        settings.database.user = user;
    }
    if let Some(password) = cli.db_password {
        settings.database.password = password;
    }
    tracing::info!(server = ?settings.server, "Loaded configuration");

    // the schema loads once; a malformed document aborts startup
    let schema = Arc::new(authz::schema::Schema::load(Path::new(&cli.schema))?);

    // init storage (database) and run migrations
    let db = storage::init(&settings.database).await?;
    migration::Migrator::up(&db, None).await.into_diagnostic()?;
    tracing::info!("Database migrations applied successfully");

    let store = Arc::new(authz::postgres::PgRelationStore::new(db));
    let service = Arc::new(authz::engine::Service::new(store, schema));

    // start web server
    web::serve(settings, service).await?;

    Ok(())
}
