use sonde_protocol::ScanError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("record not found: {0}")]
    NotFound(String),

    /// Append-only violation: a record id was written twice.
    #[error("duplicate record id: {0}")]
    DuplicateId(String),
}

impl From<StoreError> for ScanError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ScanError::NotFound(id),
            other => ScanError::StorageWriteFailure(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_scan_not_found() {
        let err: ScanError = StoreError::NotFound("scan_1".into()).into();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_duplicate_maps_to_storage_failure() {
        let err: ScanError = StoreError::DuplicateId("scan_1".into()).into();
        assert_eq!(err.kind(), "storage_write_failure");
    }
}
