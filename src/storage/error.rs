//! Classifiable storage failures.
//!
//! These travel inside `eyre::Report` and are recovered with
//! `report.downcast_ref::<StorageError>()`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// An exact read ran past the end of the stream.
    EndOfStream { position: u64, requested: u64 },
    /// The length header was requested while it was already being loaded.
    LengthReentry,
    /// The stream header is missing or does not match the expected layout.
    BadHeader(String),
}

impl StorageError {
    pub fn is_end_of_stream(report: &eyre::Report) -> bool {
        matches!(
            report.downcast_ref::<StorageError>(),
            Some(StorageError::EndOfStream { .. })
        )
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::EndOfStream {
                position,
                requested,
            } => write!(
                f,
                "end of stream: {} bytes requested at virtual offset {}",
                requested, position
            ),
            StorageError::LengthReentry => {
                write!(f, "length header accessed while it is being loaded")
            }
            StorageError::BadHeader(reason) => write!(f, "invalid stream header: {}", reason),
        }
    }
}

impl std::error::Error for StorageError {}
