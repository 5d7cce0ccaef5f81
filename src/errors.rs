use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum LatticeError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(lattice::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(lattice::config))]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    #[diagnostic(code(lattice::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("{0}")]
    #[diagnostic(code(lattice::other))]
    Other(String),
}
