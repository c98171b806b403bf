//! Read a NUL-terminated UTF-8 string from the front of a byte slice.

use memchr::memchr;
use std::{error::Error as StdError, fmt, str};

// -----------------------------------------------------------------------------
// ----- read_cstr (mutates input) ---------------------------------------------

/// Read a NUL-terminated UTF-8 string from the front of `input_bytes`.
///
/// Returns a `&str` borrowed from `input_bytes` and advances `input_bytes` to
/// start **after** the NUL terminator.
#[inline]
pub fn read_cstr<'a>(input_bytes: &mut &'a [u8]) -> Result<&'a str, ReadCStrError> {
    let unread_bytes = *input_bytes;

    let nul_index = memchr(0, unread_bytes).ok_or(ReadCStrError::UnexpectedEof)?;

    let (bytes_before_nul, bytes_from_nul) = unread_bytes.split_at(nul_index);

    // advance past the NUL
    *input_bytes = &bytes_from_nul[1..];

    str::from_utf8(bytes_before_nul).map_err(ReadCStrError::Utf8Error)
}

// -----------------------------------------------------------------------------
// ----- Error -----------------------------------------------------------------

#[derive(Debug)]
pub enum ReadCStrError {
    UnexpectedEof,
    Utf8Error(str::Utf8Error),
}

impl fmt::Display for ReadCStrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadCStrError::UnexpectedEof => write!(f, "missing NUL terminator"),
            ReadCStrError::Utf8Error(e) => write!(f, "UTF-8 error: {e}"),
        }
    }
}

impl StdError for ReadCStrError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ReadCStrError::Utf8Error(e) => Some(e),
            _ => None,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_and_advances() {
        let mut input: &[u8] = b"1234\0345\0rest";
        assert_eq!(read_cstr(&mut input).unwrap(), "1234");
        assert_eq!(read_cstr(&mut input).unwrap(), "345");
        assert_eq!(input, b"rest");
    }

    #[test]
    fn empty_string_is_allowed() {
        let mut input: &[u8] = b"\0";
        assert_eq!(read_cstr(&mut input).unwrap(), "");
        assert!(input.is_empty());
    }

    #[test]
    fn missing_nul() {
        let mut input: &[u8] = b"abc";
        assert!(matches!(
            read_cstr(&mut input),
            Err(ReadCStrError::UnexpectedEof)
        ));
    }

    #[test]
    fn invalid_utf8() {
        let mut input: &[u8] = &[0xff, 0xfe, 0];
        assert!(matches!(
            read_cstr(&mut input),
            Err(ReadCStrError::Utf8Error(_))
        ));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
