use core::fmt;

/// Why a buffer could not be read as a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The buffer ends before the header, or before a length field says it should.
    Truncated,

    /// The checksum over the pseudo header and segment did not verify.
    WrongChecksum,

    /// A code or type without meaning to this implementation.
    Unrecognized,

    /// Fields contradict each other, such as a data offset inside the fixed header or an option
    /// length not fitting its kind.
    Malformed,

    /// Decoding would need a feature that is not implemented.
    Unsupported,
}

/// Shorthand for results of decoding.
pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Error::Truncated => "truncated packet",
            Error::WrongChecksum => "checksum error",
            Error::Unrecognized => "unrecognized packet",
            Error::Malformed => "malformed packet",
            Error::Unsupported => "unsupported feature",
        })
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
