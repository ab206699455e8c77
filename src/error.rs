//! Error taxonomy and PostgreSQL error classification.
//!
//! All database failures are classified here, in one place, so callers can
//! use kind predicates (`is_not_found`, `is_conflict`, ...) instead of
//! matching on SQLSTATE codes or detail strings themselves.

use std::borrow::Cow;

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("conflict on {field}: {message}")]
    Conflict { field: String, message: String },

    #[error("validation failed{}: {message}", field_suffix(.field))]
    Validation {
        field: Option<String>,
        message: String,
    },

    #[error("referential integrity violation: {message}")]
    ForeignKey { message: String },

    /// No pending job of the requested type is ready. Not a failure; workers
    /// use this to fall back to waiting on the notify channel.
    #[error("no jobs available")]
    NoJobsAvailable,

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("operation canceled")]
    Canceled,

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error(transparent)]
    Database(sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

fn field_suffix(field: &Option<String>) -> Cow<'static, str> {
    match field {
        Some(f) => Cow::Owned(format!(" on {f}")),
        None => Cow::Borrowed(""),
    }
}

impl Error {
    pub fn not_found(entity: &'static str) -> Self {
        Error::NotFound { entity }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            field: None,
            message: message.into(),
        }
    }

    pub fn validation_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// True when the conflict is on the given field (unique column or the
    /// fire-key metadata index).
    pub fn is_conflict_on(&self, wanted: &str) -> bool {
        matches!(self, Error::Conflict { field, .. } if field == wanted)
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }

    pub fn is_foreign_key(&self) -> bool {
        matches!(self, Error::ForeignKey { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }
}

/// SQLSTATE class 23 codes we classify.
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const NOT_NULL_VIOLATION: &str = "23502";
const CHECK_VIOLATION: &str = "23514";

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Error::NotFound { entity: "row" },
            sqlx::Error::PoolTimedOut => Error::Timeout("database pool".into()),
            sqlx::Error::Database(db) => classify_database_error(db.as_ref(), &err),
            _ => Error::Database(err),
        }
    }
}

/// Map a PostgreSQL error to the taxonomy.
///
/// The field name comes from the constraint name when available (our unique
/// indexes are named `<table>_<field>_key` or `<table>_<field>_idx`), falling
/// back to parsing the `Key (col)=(val)` detail text.
fn classify_database_error(db: &dyn sqlx::error::DatabaseError, original: &sqlx::Error) -> Error {
    let code = match db.code() {
        Some(code) => code.into_owned(),
        None => return Error::Database(clone_message(original)),
    };

    match code.as_str() {
        UNIQUE_VIOLATION => {
            let field = db
                .constraint()
                .and_then(constraint_field)
                .or_else(|| detail_field(db.message()))
                .unwrap_or_else(|| "unique".to_string());
            Error::Conflict {
                field,
                message: db.message().to_string(),
            }
        }
        FOREIGN_KEY_VIOLATION => Error::ForeignKey {
            message: foreign_key_message(db),
        },
        NOT_NULL_VIOLATION | CHECK_VIOLATION => Error::Validation {
            field: db.constraint().and_then(constraint_field),
            message: db.message().to_string(),
        },
        _ => Error::Database(clone_message(original)),
    }
}

/// sqlx errors are not Clone; preserve the rendered message.
fn clone_message(err: &sqlx::Error) -> sqlx::Error {
    sqlx::Error::Protocol(err.to_string())
}

/// Extract the field portion of a constraint name like `sites_name_key`,
/// `jobs_fire_key_idx`, or `secrets_refresh_check`.
fn constraint_field(constraint: &str) -> Option<String> {
    let trimmed = constraint
        .strip_suffix("_key")
        .or_else(|| constraint.strip_suffix("_idx"))
        .or_else(|| constraint.strip_suffix("_check"))?;

    // Drop the leading table name segment.
    trimmed.split_once('_').map(|(_, field)| field.to_string())
}

/// Parse `Key (name)=(value) already exists.` detail text.
fn detail_field(message: &str) -> Option<String> {
    let start = message.find("Key (")? + 5;
    let end = message[start..].find(')')? + start;
    let field = &message[start..end];
    if field.is_empty() {
        None
    } else {
        Some(field.to_string())
    }
}

/// Name the referencing domain so callers see "secret is referenced by a
/// source" instead of raw constraint text.
fn foreign_key_message(db: &dyn sqlx::error::DatabaseError) -> String {
    match db.constraint() {
        Some(constraint) => {
            let table = constraint.split('_').next().unwrap_or("row");
            format!("operation violates a reference held by {table}: {constraint}")
        }
        None => db.message().to_string(),
    }
}
