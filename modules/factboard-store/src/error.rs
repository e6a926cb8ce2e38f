use factboard_common::{looks_like_connection_failure, FactboardError};

/// SQLSTATE for "no unique or exclusion constraint matching the ON CONFLICT
/// specification".
const NO_MATCHING_CONFLICT_TARGET: &str = "42P10";
const UNIQUE_VIOLATION: &str = "23505";
/// Class 08 covers connection exceptions; 57P01..03 are server shutdowns.
const CONNECTION_EXCEPTION_CLASS: &str = "08";
const SHUTDOWN_CODES: &[&str] = &["57P01", "57P02", "57P03"];

/// Map a driver error onto the pipeline taxonomy so the retry layer can tell
/// a dropped connection from a bad statement.
pub fn db_error(err: sqlx::Error) -> FactboardError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => FactboardError::TransientConnection(err.to_string()),
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            if code == NO_MATCHING_CONFLICT_TARGET || code == UNIQUE_VIOLATION {
                FactboardError::UpsertConflict(format!("{code}: {}", db.message()))
            } else if code.starts_with(CONNECTION_EXCEPTION_CLASS)
                || SHUTDOWN_CODES.contains(&code.as_str())
            {
                FactboardError::TransientConnection(format!("{code}: {}", db.message()))
            } else {
                FactboardError::Database(format!("{code}: {}", db.message()))
            }
        }
        other => {
            let message = other.to_string();
            if looks_like_connection_failure(&message) {
                FactboardError::TransientConnection(message)
            } else {
                FactboardError::Database(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factboard_common::Transient;

    #[test]
    fn pool_and_io_failures_are_transient() {
        assert!(db_error(sqlx::Error::PoolTimedOut).is_transient());
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(db_error(sqlx::Error::Io(io)).is_transient());
    }

    #[test]
    fn missing_row_is_not_transient() {
        let err = db_error(sqlx::Error::RowNotFound);
        assert!(!err.is_transient());
        assert!(matches!(err, FactboardError::Database(_)));
    }
}
