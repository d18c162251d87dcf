//! Classification of database errors into the queue's failure taxonomy.
//!
//! | Class            | Examples                                          | Handling                         |
//! |------------------|---------------------------------------------------|----------------------------------|
//! | `Transient`      | serialization failure, deadlock, lock timeout     | roll back, release claim, retry  |
//! | `Business`       | constraint violations, bad data, decode errors    | task `failed`, job `rejected`    |
//! | `Infrastructure` | I/O, TLS, pool closed/timed out, admin shutdown   | reconnect with backoff           |

/// Failure class of a [`sqlx::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Business,
    Infrastructure,
}

/// `serialization_failure`
pub const SERIALIZATION_FAILURE: &str = "40001";
/// `deadlock_detected`
pub const DEADLOCK_DETECTED: &str = "40P01";
/// `lock_not_available` (raised by `lock_timeout` and `NOWAIT`)
pub const LOCK_NOT_AVAILABLE: &str = "55P03";
/// `query_canceled` (raised by `statement_timeout`)
pub const QUERY_CANCELED: &str = "57014";
/// `foreign_key_violation`
pub const FOREIGN_KEY_VIOLATION: &str = "23503";
/// `unique_violation`
pub const UNIQUE_VIOLATION: &str = "23505";

const TRANSIENT_CODES: [&str; 4] = [
    SERIALIZATION_FAILURE,
    DEADLOCK_DETECTED,
    LOCK_NOT_AVAILABLE,
    QUERY_CANCELED,
];

/// Classify an SQLSTATE code.
pub fn classify_code(code: &str) -> ErrorClass {
    if TRANSIENT_CODES.contains(&code) {
        return ErrorClass::Transient;
    }
    match code.get(..2) {
        // connection_exception, insufficient_resources, system_error
        Some("08") | Some("53") | Some("58") => ErrorClass::Infrastructure,
        // admin_shutdown, crash_shutdown, cannot_connect_now, ...
        Some("57") if code.starts_with("57P") => ErrorClass::Infrastructure,
        _ => ErrorClass::Business,
    }
}

/// Classify a sqlx error.
pub fn classify(err: &sqlx::Error) -> ErrorClass {
    match err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) => classify_code(&code),
            None => ErrorClass::Business,
        },
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Configuration(_) => ErrorClass::Infrastructure,
        _ => ErrorClass::Business,
    }
}

/// SQLSTATE of a database error, if any.
pub fn sqlstate(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|c| c.into_owned()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_transient() {
        for code in ["40001", "40P01", "55P03", "57014"] {
            assert_eq!(classify_code(code), ErrorClass::Transient, "{code}");
        }
    }

    #[test]
    fn constraint_violations_are_business_errors() {
        for code in ["23503", "23505", "23514", "22007"] {
            assert_eq!(classify_code(code), ErrorClass::Business, "{code}");
        }
    }

    #[test]
    fn connection_and_shutdown_codes_are_infrastructure() {
        for code in ["08006", "08003", "57P01", "57P03", "53300"] {
            assert_eq!(classify_code(code), ErrorClass::Infrastructure, "{code}");
        }
    }

    #[test]
    fn pool_errors_are_infrastructure() {
        assert_eq!(classify(&sqlx::Error::PoolTimedOut), ErrorClass::Infrastructure);
        assert_eq!(classify(&sqlx::Error::PoolClosed), ErrorClass::Infrastructure);
    }

    #[test]
    fn missing_row_is_a_business_error() {
        assert_eq!(classify(&sqlx::Error::RowNotFound), ErrorClass::Business);
    }
}
