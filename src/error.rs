use thiserror::Error;

/// Errors returned by library operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Enqueue attempted on a full byte queue; the queue is unchanged.
    #[error("byte queue full")]
    QueueFull,

    /// General I/O error (serial transport).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration file.
    #[error("configuration error: {0}")]
    Config(#[from] serde_yaml::Error),
}

/// Non-fatal conditions raised on the shared fault line.
///
/// Raising a fault never halts processing: overflows and timeouts
/// self-heal through the retry machinery or the next poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    /// Transmit queue lacked space for a frame, or the inbound line
    /// buffer ran out of room before a terminator arrived.
    #[error("queue overflow")]
    QueueOverflow,

    /// Recomputed XOR over an inbound line was nonzero.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// No matching reply arrived before the ack deadline.
    #[error("acknowledgement timeout")]
    AckTimeout,
}

/// Shared "raise fault" collaborator, typically wired to an indicator.
pub trait FaultLine {
    fn raise(&mut self, fault: Fault);
}
