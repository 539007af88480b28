//! Storage failures and their classification.
//!
//! SQLx errors are mapped as follows:
//!
//! | SQLx error | SQLite code | StorageError |
//! |------------|-------------|--------------|
//! | Database (busy / locked) | `5`, `6` and their extended codes | `Unavailable` |
//! | Database (unique violation) | `1555`, `2067` | `Duplicate` |
//! | Database (check violation) | `275` | `Constraint` |
//! | PoolTimedOut, Io, WorkerCrashed | n/a | `Unavailable` |
//! | anything else | n/a | `Database` |
//!
//! Only `Unavailable` is transient: the same call may succeed if retried.

use sqlx::error::{DatabaseError, ErrorKind};
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage unavailable during {context}: {source}")]
    Unavailable {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("duplicate key during {context}: {message}")]
    Duplicate {
        context: &'static str,
        message: String,
    },

    #[error("constraint violated during {context}: {message}")]
    Constraint {
        context: &'static str,
        message: String,
    },

    #[error("database error during {context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable { .. })
    }
}

enum Class {
    Transient,
    Duplicate(String),
    Constraint(String),
    Other,
}

/// Classify a SQLx error raised while performing `context`.
pub fn map_sqlx_error(context: &'static str, err: sqlx::Error) -> StorageError {
    let class = match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => {
            Class::Transient
        }
        sqlx::Error::Database(db) if is_busy(&**db) => Class::Transient,
        sqlx::Error::Database(db) => match db.kind() {
            ErrorKind::UniqueViolation => Class::Duplicate(db.message().to_string()),
            ErrorKind::CheckViolation => Class::Constraint(db.message().to_string()),
            _ => Class::Other,
        },
        _ => Class::Other,
    };

    match class {
        Class::Transient => StorageError::Unavailable {
            context,
            source: err,
        },
        Class::Duplicate(message) => StorageError::Duplicate { context, message },
        Class::Constraint(message) => StorageError::Constraint { context, message },
        Class::Other => StorageError::Database {
            context,
            source: err,
        },
    }
}

fn is_busy(db: &dyn DatabaseError) -> bool {
    let primary = db
        .code()
        .and_then(|code| code.parse::<i32>().ok())
        .map(|code| code & 0xff);
    matches!(primary, Some(SQLITE_BUSY) | Some(SQLITE_LOCKED))
}
