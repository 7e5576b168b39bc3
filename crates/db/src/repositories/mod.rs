use lapsel_core::errors::StoreError;
use thiserror::Error;

pub mod catalog;

pub use catalog::SqlCatalogStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(error) => Self::Unavailable(error.to_string()),
            RepositoryError::Decode(message) => Self::Decode(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use lapsel_core::errors::StoreError;

    use super::RepositoryError;

    #[test]
    fn database_failures_surface_as_unavailable_store() {
        let mapped = StoreError::from(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        assert!(matches!(mapped, StoreError::Unavailable(_)));

        let mapped = StoreError::from(RepositoryError::Decode("bad row".to_string()));
        assert_eq!(mapped, StoreError::Decode("bad row".to_string()));
    }
}
