//! Error types for shmarray

use std::io;
use thiserror::Error;

/// Result type for shmarray operations
pub type Result<T> = std::result::Result<T, ShmError>;

/// Errors that can occur in shmarray operations
#[derive(Debug, Error)]
pub enum ShmError {
    /// Requested segment or array size was zero
    #[error("Invalid size: {got} (must be positive)")]
    InvalidSize { got: usize },

    /// Name already present in this process's registry
    #[error("Segment name '{name}' already registered in this process")]
    DuplicateName { name: String },

    /// No live OS segment with this name
    #[error("Shared memory segment '{name}' has not been created or has already been destroyed")]
    NotFound { name: String },

    /// An OS segment with this name already exists (creation collision)
    #[error("Shared memory segment '{name}' already exists")]
    NameExists { name: String },

    /// Unlink attempted on a segment this process did not create
    #[error("Segment '{name}' was not created by this process; only its creator may unlink it")]
    NotOwner { name: String },

    /// Unlink attempted before the local mapping was closed
    #[error("Segment '{name}' is still mapped in this process; close it before unlinking")]
    MappingStillOpen { name: String },

    /// Segment too small for the requested element count and layout
    #[error("Segment '{name}' holds {size} bytes but the view needs {needed}")]
    ViewGeometry {
        name: String,
        size: usize,
        needed: usize,
    },

    /// Index outside `-len..len`
    #[error("Index {index} out of range for length {len}")]
    IndexOutOfRange { index: isize, len: usize },

    /// Malformed record format string
    #[error("Invalid record format '{format}': {reason}")]
    LayoutParse { format: String, reason: String },

    /// Operation used against the wrong layout mode
    #[error("Layout mismatch: {expected} expected, view is {got}")]
    LayoutMismatch {
        expected: &'static str,
        got: &'static str,
    },

    /// Value does not fit the declared field width
    #[error("Value {value} does not fit field '{code}'")]
    ValueRange { code: char, value: String },

    /// Record value has the wrong number of fields
    #[error("Record has {got} fields, layout declares {expected}")]
    FieldCount { expected: usize, got: usize },

    /// Failed to create shared memory
    #[error("Failed to create shared memory '{name}': {source}")]
    CreateSegment {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to open shared memory
    #[error("Failed to open shared memory '{name}': {source}")]
    OpenSegment {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to map memory
    #[error("Failed to map memory: {0}")]
    Map(#[source] io::Error),

    /// Failed to unmap memory
    #[error("Failed to unmap memory: {0}")]
    Unmap(#[source] io::Error),

    /// Failed to set shared memory size
    #[error("Failed to set shared memory size: {0}")]
    Resize(#[source] io::Error),

    /// Failed to unlink shared memory
    #[error("Failed to unlink shared memory '{name}': {source}")]
    Unlink {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Handle could not be encoded or decoded
    #[error("Failed to serialize handle: {0}")]
    Handle(#[from] serde_json::Error),
}
