pub mod address;
pub mod attribute;
pub mod block;
pub mod connection;
pub mod migration;
pub mod trail;
pub mod transaction;

use thiserror::Error;

use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(#[from] ValidationError),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("batch failed: {0}")]
    Batch(String),
}

/// Builds a `?, ?, ...` placeholder list for an IN clause.
pub(crate) fn placeholders(n: usize) -> String {
    let mut s = String::with_capacity(n * 3);
    for i in 0..n {
        if i > 0 {
            s.push_str(", ");
        }
        s.push('?');
    }
    s
}
