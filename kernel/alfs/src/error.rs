//! Error types for the remapper.

use block_device::IoError;

/// Errors returned by remapper operations.
///
/// `CorruptMapping` and `InvalidAddress` describe integrity violations that
/// most call sites only log; they are surfaced as errors from the few
/// operations that cannot make progress without a consistent mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The underlying device failed a read, write, or discard.
    Io(IoError),
    /// Mount could not locate a dead section in the mapping region.
    NoFreeMapSpace,
    /// Mount could not locate a dead section in the metadata-log region.
    NoFreeMetaSpace,
    /// A read of a logical metadata address that has no mapping.
    UnmappedRead,
    /// The reverse L2P scan could not find the entry for a relocated block.
    CorruptMapping,
    /// The circular log wrapped onto itself; GC failed to keep pace.
    Exhausted,
    /// A physical address, or the region geometry itself, is out of range.
    InvalidAddress,
}

impl From<IoError> for Error {
    fn from(io_error: IoError) -> Self {
        Error::Io(io_error)
    }
}

impl From<Error> for &'static str {
    fn from(error: Error) -> Self {
        match error {
            Error::Io(_)          => "Error: device I/O failed",
            Error::NoFreeMapSpace => "Error: no free space in the mapping region",
            Error::NoFreeMetaSpace => "Error: no free space in the metadata-log region",
            Error::UnmappedRead   => "Error: read of an unmapped metadata block",
            Error::CorruptMapping => "Error: mapping table is inconsistent",
            Error::Exhausted      => "Error: metadata log exhausted",
            Error::InvalidAddress => "Error: physical address out of range",
        }
    }
}
