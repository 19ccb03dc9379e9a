use thiserror::Error;

#[derive(Error, Debug)]
pub enum CreditError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Invalid transition for {entity} {id}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id:     i64,
        from:   String,
        to:     String,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("Concurrent score update detected for user {user_id}")]
    ConcurrentUpdate { user_id: i64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CreditError {
    /// True when the caller sent something wrong (4xx-equivalent);
    /// false for storage and internal failures (5xx-equivalent).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::InvalidTransition { .. } | Self::Validation(_)
        )
    }

    pub(crate) fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub(crate) fn transition(
        entity: &'static str,
        id: i64,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            id,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

pub type CreditResult<T> = Result<T, CreditError>;
