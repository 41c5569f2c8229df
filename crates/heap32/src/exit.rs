use std::fmt;
use std::io;

use heap32_codec::{DecodeError, EncodeError};

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const PERMISSION_DENIED: i32 = 50;
pub const NOT_FOUND: i32 = 51;
pub const DATA_INVALID: i32 = 60;
pub const LIMIT_EXCEEDED: i32 = 61;
pub const USAGE: i32 = 64;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound => NOT_FOUND,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn decode_error(context: &str, err: DecodeError) -> CliError {
    let code = match err {
        DecodeError::TooManyObjects { .. } | DecodeError::BufferTooLarge { .. } => LIMIT_EXCEEDED,
        _ => DATA_INVALID,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn encode_error(context: &str, err: EncodeError) -> CliError {
    let code = match err {
        EncodeError::InvalidObjectId(_) => INTERNAL,
        EncodeError::HeapTooLarge { .. } | EncodeError::ObjectTooLarge { .. } => LIMIT_EXCEEDED,
        _ => DATA_INVALID,
    };
    CliError::new(code, format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use heap32_format::FormatError;

    use super::*;

    #[test]
    fn maps_decode_errors_by_kind() {
        let truncated = DecodeError::Format(FormatError::TruncatedHeader {
            offset: 0,
            available: 3,
        });
        assert_eq!(decode_error("decode", truncated).code, DATA_INVALID);
        assert_eq!(
            decode_error("decode", DecodeError::TooManyObjects { limit: 4 }).code,
            LIMIT_EXCEEDED
        );
    }

    #[test]
    fn maps_io_errors_by_kind() {
        let err = io_error("read", io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(err.code, NOT_FOUND);
        assert!(err.message.starts_with("read: "));
    }
}
