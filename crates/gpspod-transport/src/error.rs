use std::path::PathBuf;

/// Errors that can occur on the pod transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the device node.
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No attached device matched the pod's USB vendor/product id.
    #[error("no GPS pod found (looked for usb id {vendor:04x}:{product:04x})")]
    NotFound { vendor: u16, product: u16 },

    /// An I/O error occurred on the device.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A packet larger than one HID report was handed to the transport.
    #[error("packet too large for one report ({size} bytes, max {max})")]
    PacketTooLarge { size: usize, max: usize },

    /// The device went away (read returned end of file).
    #[error("device closed")]
    Closed,

    /// An outgoing packet differs from the recorded traffic being replayed.
    #[error("outgoing packet diverges from recorded entry {index}")]
    Diverged { index: usize },

    /// The recorded traffic being replayed has no entries left.
    #[error("recorded traffic exhausted")]
    Exhausted,
}

pub type Result<T> = std::result::Result<T, TransportError>;
