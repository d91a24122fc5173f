//! Error types for villas_shmem

use std::io;
use thiserror::Error;

/// Result type for villas_shmem operations
pub type Result<T> = std::result::Result<T, ShmemError>;

/// Errors that can occur while describing or driving a shmem interface
#[derive(Debug, Error)]
pub enum ShmemError {
    /// The interface object could not supply a required field
    #[error("Invalid interface state: {field} {reason}")]
    InvalidInterfaceState {
        field: &'static str,
        reason: &'static str,
    },

    /// Channel name is not a usable POSIX shared memory name
    #[error("Invalid channel name '{name}': {reason}")]
    InvalidChannelName { name: String, reason: &'static str },

    /// Attribute slots fall outside the sample
    #[error("Slot index {idx} (width {width}) out of range for sample length {sample_len}")]
    IndexOutOfRange {
        idx: usize,
        width: usize,
        sample_len: usize,
    },

    /// Slot already claimed by another attribute
    #[error("Slot {idx} already mapped to '{attribute}'")]
    SlotConflict { idx: usize, attribute: String },

    /// Attribute value does not match the slot mode
    #[error("Attribute '{attribute}' expects a {expected} value")]
    ModeMismatch {
        attribute: String,
        expected: &'static str,
    },

    /// Failed to create shared memory
    #[error("Failed to create shared memory '{name}': {source}")]
    ShmCreate {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to open shared memory
    #[error("Failed to open shared memory '{name}': {source}")]
    ShmOpen {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to map memory
    #[error("Failed to map memory: {0}")]
    Mmap(#[source] io::Error),

    /// Failed to truncate shared memory
    #[error("Failed to set shared memory size: {0}")]
    Truncate(#[source] io::Error),

    /// Invalid queue magic number
    #[error("Invalid queue magic number: expected 0x{expected:08X}, got 0x{got:08X}")]
    InvalidMagic { expected: u32, got: u32 },

    /// Queue layout written by an incompatible version
    #[error("Queue version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u32, got: u32 },

    /// A queue needs at least one slot
    #[error("Queue length must be at least 1")]
    InvalidQueueLength,

    /// Queue layout does not fit in the address space
    #[error("Queue of {queue_len} samples x {sample_len} values is too large")]
    QueueTooLarge { queue_len: usize, sample_len: usize },

    /// Attached queue disagrees with the descriptor
    #[error("Queue length mismatch on '{name}': descriptor says {expected}, queue has {got}")]
    QueueLengthMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    /// Attached queue disagrees with the descriptor
    #[error("Sample length mismatch on '{name}': descriptor says {expected}, queue has {got}")]
    SampleLengthMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    /// Sample does not fit into a slot
    #[error("Buffer overflow: max {max} values, got {got} values")]
    BufferOverflow { max: usize, got: usize },

    /// Sample queue is full
    #[error("Sample queue is full")]
    QueueFull,

    /// Writer side of the queue is gone
    #[error("Channel '{0}' was closed by its writer")]
    ChannelClosed(String),

    /// Descriptor (de)serialization failed
    #[error("Descriptor JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
