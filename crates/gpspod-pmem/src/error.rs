use gpspod_link::LinkError;

/// Errors that can occur while reading flash or the track catalog.
#[derive(Debug, thiserror::Error)]
pub enum PmemError {
    /// Communication with the device failed.
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// A block kept failing until the retry budget was spent.
    #[error("block {offset:#08x} failed after {failures} failures: {last_error}")]
    FetchExhausted {
        offset: u32,
        failures: u32,
        last_error: String,
    },

    /// The requested range lies outside the image.
    #[error("range {offset:#x}+{length:#x} outside image of {size:#x} bytes")]
    OutOfBounds {
        offset: usize,
        length: usize,
        size: usize,
    },

    /// Reading was cancelled before the block at `offset`.
    #[error("cancelled before block {offset:#08x}")]
    Cancelled { offset: u32 },

    /// A dump file does not have the flash size.
    #[error("image is {actual} bytes, expected {expected}")]
    ImageSize { expected: usize, actual: usize },

    /// A track header failed its sanity checks.
    #[error("corrupt track at {offset:#08x}: {reason}")]
    CatalogCorrupt { offset: u32, reason: String },

    /// The catalog was used out of order.
    #[error("invalid state: {0}")]
    State(&'static str),

    /// Track index past the end of the catalog.
    #[error("no track {index} (catalog has {count})")]
    NoSuchTrack { index: usize, count: usize },

    /// A byte was read from a block that was never fetched.
    #[error("block at {offset:#08x} not present in image")]
    Missing { offset: usize },

    /// Dump file I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PmemError>;
