use std::fmt;
use std::io;

#[derive(Debug)]
pub enum Error {
    /// The oracle peer closed the connection or stopped answering.
    OracleClosed,
    /// A finite candidate sequence ran out without a conforming multiplier.
    SearchExhausted,
    /// Narrowing left no candidate plaintexts. The true value was lost.
    EmptyIntervalSet,
    /// The blinding multiplier has no inverse modulo n.
    NotInvertible,
    /// A ciphertext was wider than the modulus and could not be sent.
    OversizedCiphertext,
    Format(String),
    Config(String),
    Io(io::Error),
    Json(serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OracleClosed => write!(f, "oracle connection closed"),
            Error::SearchExhausted => write!(f, "candidate search exhausted without a match"),
            Error::EmptyIntervalSet => write!(f, "interval narrowing produced an empty set"),
            Error::NotInvertible => write!(f, "blinding multiplier is not invertible mod n"),
            Error::OversizedCiphertext => write!(f, "ciphertext wider than the modulus"),
            Error::Format(msg) => write!(f, "malformed input: {}", msg),
            Error::Config(msg) => write!(f, "invalid configuration: {}", msg),
            Error::Io(err) => write!(f, "io error: {}", err),
            Error::Json(err) => write!(f, "json error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl Error {
    /// Errors after which the attack cannot continue and no partial answer is useful.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::OracleClosed)
    }
}
