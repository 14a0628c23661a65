use core::fmt;

/// Errors returned by the SDP codec and decoder.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Element or PDU specified an invalid length value or was too short.
    ///
    /// This indicates a protocol violation, so the discovery is terminated
    /// when it propagates out of a response handler.
    InvalidLength,

    /// Invalid value supplied for field.
    InvalidValue,

    /// Unexpectedly reached EOF while reading or writing data.
    ///
    /// This is returned when a request does not fit into the outgoing
    /// buffer, and also when reaching EOF prematurely while reading data
    /// from a response.
    Eof,

    /// The discovery database cannot fit another record or attribute node.
    DbFull,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Error::InvalidLength => "invalid length value specified",
            Error::InvalidValue => "invalid value for field",
            Error::Eof => "end of buffer",
            Error::DbFull => "discovery database exhausted",
        })
    }
}

impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter<'_>) {
        defmt::write!(
            f,
            "{=str}",
            match self {
                Error::InvalidLength => "invalid length value specified",
                Error::InvalidValue => "invalid value for field",
                Error::Eof => "end of buffer",
                Error::DbFull => "discovery database exhausted",
            }
        );
    }
}
