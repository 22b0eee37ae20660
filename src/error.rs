use thiserror::Error;

/// Errors that abort a snapshot merge. Every variant is all-or-nothing for
/// the snapshot: previously persisted tables stay untouched.
///
/// Unresolvable natural-key references (a trip naming an unknown route, a
/// transfer naming an unknown stop, a stop naming an unknown parent station)
/// are not errors; they degrade to null references during resolution.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The archive container itself could not be read.
    #[error("corrupt feed archive: {0}")]
    CorruptArchive(#[from] zip::result::ZipError),

    /// One of the required feed tables is absent, or neither calendar table
    /// is present.
    #[error("missing required table `{table}`")]
    MissingRequiredTable { table: &'static str },

    /// A columnar operation on the working tables failed.
    #[error("table operation failed: {0}")]
    Table(#[from] polars::error::PolarsError),

    /// Writing a rebuilt table back to the store failed; the snapshot is
    /// considered not applied.
    #[error("failed to persist table `{table}`: {source}")]
    Persistence {
        table: &'static str,
        #[source]
        source: polars::error::PolarsError,
    },
}
