use libsql::errors::Error as TursoError;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Turso error: {0}")]
    Turso(#[from] TursoError),
    #[error("Corrupted row: {0}")]
    CorruptedRow(String),
    #[error("User not found: {0}")]
    UserNotFound(i64),
}
