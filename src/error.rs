use std::fmt;

use thiserror::Error;

use crate::ledger::ChangeKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
  /// The remote engine rejected a statement. The message is the engine's, verbatim.
  #[error("{0}")]
  Query(String),

  #[error("validation failed: {0}")]
  Validation(#[from] ValidationError),

  #[error(
    "transaction rolled back{}: {source}",
    .change.as_ref().map(|c| format!(" ({c} failed)")).unwrap_or_default()
  )]
  Transaction {
    /// `None` when the COMMIT itself failed.
    change: Option<FailedChange>,
    #[source]
    source: Box<Error>,
    rollback_failed: bool,
  },

  #[error("a save is already in progress for this table")]
  SaveInProgress,

  #[error("cannot identify row: {0}")]
  RowIdentity(String),

  #[error("config error: {0}")]
  Config(String),
}

impl Error {
  pub fn query(message: impl Into<String>) -> Self {
    Self::Query(message.into())
  }

  /// The message of the statement that actually failed, looking through transaction wrappers.
  pub fn root_message(&self) -> String {
    match self {
      Self::Transaction { source, .. } => source.root_message(),
      other => other.to_string(),
    }
  }
}

impl From<sqlx::Error> for Error {
  fn from(err: sqlx::Error) -> Self {
    match err {
      sqlx::Error::Database(db) => Self::Query(db.message().to_string()),
      other => Self::Query(other.to_string()),
    }
  }
}

impl From<config::ConfigError> for Error {
  fn from(err: config::ConfigError) -> Self {
    Self::Config(err.to_string())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("column #{position} has an empty name")]
  EmptyColumnName { position: usize },

  #[error("duplicate column name '{0}'")]
  DuplicateColumnName(String),

  #[error("column '{0}' has no type")]
  EmptyColumnType(String),

  #[error("page size must be greater than zero")]
  ZeroPageSize,

  #[error("{0}")]
  Other(String),
}

/// Which staged change a failing statement was compiled from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedChange {
  pub table: String,
  pub kind: ChangeKind,
  pub column: Option<String>,
}

impl fmt::Display for FailedChange {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.column {
      Some(column) => write!(f, "{} on {}.{}", self.kind, self.table, column),
      None => write!(f, "{} on {}", self.kind, self.table),
    }
  }
}
