//! # Operation Status
//!
//! Closed taxonomy of protocol-level outcomes. Every terminal operation maps
//! to exactly one [`OperationStatus`], independent of transport success.
//!
//! ## Design Principles
//! 1. **Closed Set**: `StatusCode` is exhaustive; unknown server codes fold
//!    into `ErrInternal` instead of leaking raw numbers to callers.
//! 2. **Values, Not Errors**: not-found, exists and too-big are valid
//!    decoded outcomes, so they live here rather than in error enums.
//! 3. **Wire Neutral**: both the binary status word and the text status line
//!    map onto the same codes.

use std::fmt;

use crate::protocol::response as wire;

/// Protocol-level outcome of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success,
    ErrNotFound,
    ErrExists,
    /// Value exceeds the server's item size limit.
    Err2Big,
    ErrInval,
    ErrNotStored,
    ErrDeltaBadval,
    ErrNotMyVbucket,
    ErrUnknownCommand,
    ErrNoMem,
    ErrNotSupported,
    ErrInternal,
    ErrBusy,
    ErrTempFail,
    /// The client could not interpret the response or the request was invalid.
    ErrClient,
    Cancelled,
    Timedout,
}

impl StatusCode {
    /// Maps a binary response status word to a status code.
    pub fn from_binary(code: u16) -> Self {
        match code {
            wire::SUCCESS => StatusCode::Success,
            wire::KEY_NOT_FOUND => StatusCode::ErrNotFound,
            wire::KEY_EXISTS => StatusCode::ErrExists,
            wire::TOO_LARGE => StatusCode::Err2Big,
            wire::INVALID_ARGS => StatusCode::ErrInval,
            wire::NOT_STORED => StatusCode::ErrNotStored,
            wire::DELTA_BADVAL => StatusCode::ErrDeltaBadval,
            wire::NOT_MY_VBUCKET => StatusCode::ErrNotMyVbucket,
            wire::UNKNOWN_COMMAND => StatusCode::ErrUnknownCommand,
            wire::NO_MEMORY => StatusCode::ErrNoMem,
            wire::NOT_SUPPORTED => StatusCode::ErrNotSupported,
            wire::INTERNAL_ERROR => StatusCode::ErrInternal,
            wire::BUSY => StatusCode::ErrBusy,
            wire::TEMPORARY_FAILURE => StatusCode::ErrTempFail,
            _ => StatusCode::ErrInternal,
        }
    }

    /// Maps a text protocol status line to a status code.
    ///
    /// Lines that carry no recognised token map to `ErrInternal`.
    pub fn from_text_line(line: &str) -> Self {
        match line {
            "STORED" | "DELETED" | "OK" | "TOUCHED" => StatusCode::Success,
            "NOT_STORED" => StatusCode::ErrNotStored,
            "EXISTS" => StatusCode::ErrExists,
            "NOT_FOUND" => StatusCode::ErrNotFound,
            "ERROR" => StatusCode::ErrUnknownCommand,
            _ if line.starts_with("SERVER_ERROR object too large") => StatusCode::Err2Big,
            _ if line.starts_with("SERVER_ERROR out of memory") => StatusCode::ErrNoMem,
            _ if line.starts_with("SERVER_ERROR") => StatusCode::ErrInternal,
            _ if line.starts_with("CLIENT_ERROR") => StatusCode::ErrClient,
            _ => StatusCode::ErrInternal,
        }
    }

    #[inline]
    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Success => "SUCCESS",
            StatusCode::ErrNotFound => "ERR_NOT_FOUND",
            StatusCode::ErrExists => "ERR_EXISTS",
            StatusCode::Err2Big => "ERR_2BIG",
            StatusCode::ErrInval => "ERR_INVAL",
            StatusCode::ErrNotStored => "ERR_NOT_STORED",
            StatusCode::ErrDeltaBadval => "ERR_DELTA_BADVAL",
            StatusCode::ErrNotMyVbucket => "ERR_NOT_MY_VBUCKET",
            StatusCode::ErrUnknownCommand => "ERR_UNKNOWN_COMMAND",
            StatusCode::ErrNoMem => "ERR_NO_MEM",
            StatusCode::ErrNotSupported => "ERR_NOT_SUPPORTED",
            StatusCode::ErrInternal => "ERR_INTERNAL",
            StatusCode::ErrBusy => "ERR_BUSY",
            StatusCode::ErrTempFail => "ERR_TEMP_FAIL",
            StatusCode::ErrClient => "ERR_CLIENT",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Timedout => "TIMEDOUT",
        };
        f.write_str(name)
    }
}

/// Immutable (success, message, code) triple describing a terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStatus {
    success: bool,
    message: String,
    code: StatusCode,
}

impl OperationStatus {
    pub fn new(success: bool, message: impl Into<String>, code: StatusCode) -> Self {
        OperationStatus {
            success,
            message: message.into(),
            code,
        }
    }

    /// Successful outcome carrying the server's message.
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(true, message, StatusCode::Success)
    }

    /// Failed outcome; the code decides which kind of failure it was.
    pub fn failure(message: impl Into<String>, code: StatusCode) -> Self {
        Self::new(false, message, code)
    }

    pub fn cancelled() -> Self {
        Self::failure("cancelled", StatusCode::Cancelled)
    }

    pub fn timed_out() -> Self {
        Self::failure("timed out", StatusCode::Timedout)
    }

    /// Builds the status for a binary response word and its error text.
    pub fn from_binary(code: u16, message: &[u8]) -> Self {
        let status = StatusCode::from_binary(code);
        let message = if status.is_success() {
            "OK".to_string()
        } else {
            String::from_utf8_lossy(message).into_owned()
        };
        Self::new(status.is_success(), message, status)
    }

    /// Builds the status for a text response line.
    ///
    /// `expected` is the line that counts as success for the operation
    /// (`STORED`, `DELETED`, `OK`, ...); any other line is a failure.
    pub fn from_text_line(line: &str, expected: &str) -> Self {
        if line == expected {
            return Self::success(line);
        }
        Self::failure(line, StatusCode::from_text_line(line))
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.success
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[inline]
    pub fn code(&self) -> StatusCode {
        self.code
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.message)
    }
}

/// Outcome of a compare-and-swap store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasResponse {
    Ok,
    /// The stored CAS no longer matches.
    Exists,
    NotFound,
    /// Any other failure (too big, not stored, transport status).
    Observed(StatusCode),
}

impl From<StatusCode> for CasResponse {
    fn from(code: StatusCode) -> Self {
        match code {
            StatusCode::Success => CasResponse::Ok,
            StatusCode::ErrExists => CasResponse::Exists,
            StatusCode::ErrNotFound => CasResponse::NotFound,
            other => CasResponse::Observed(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_binary_codes() {
        assert_eq!(StatusCode::from_binary(0x0000), StatusCode::Success);
        assert_eq!(StatusCode::from_binary(0x0002), StatusCode::ErrExists);
        assert_eq!(StatusCode::from_binary(0x0003), StatusCode::Err2Big);
        assert_eq!(StatusCode::from_binary(0x0081), StatusCode::ErrUnknownCommand);
        assert_eq!(StatusCode::from_binary(0x7777), StatusCode::ErrInternal);
    }

    #[test]
    fn maps_text_lines() {
        assert_eq!(StatusCode::from_text_line("EXISTS"), StatusCode::ErrExists);
        assert_eq!(
            StatusCode::from_text_line("SERVER_ERROR object too large for cache"),
            StatusCode::Err2Big
        );
        assert_eq!(
            StatusCode::from_text_line("CLIENT_ERROR bad data chunk"),
            StatusCode::ErrClient
        );
    }

    #[test]
    fn too_big_is_a_failure_with_distinct_code() {
        let status = OperationStatus::from_binary(0x0003, b"Too large.");
        assert!(!status.is_success());
        assert_eq!(status.code(), StatusCode::Err2Big);
        assert_eq!(status.message(), "Too large.");
    }

    #[test]
    fn text_line_matches_expected_token() {
        let ok = OperationStatus::from_text_line("OK", "OK");
        assert!(ok.is_success());
        let failed = OperationStatus::from_text_line("SERVER_ERROR reload failed", "OK");
        assert!(!failed.is_success());
        assert_eq!(failed.code(), StatusCode::ErrInternal);
    }

    #[test]
    fn cas_response_from_code() {
        assert_eq!(CasResponse::from(StatusCode::Success), CasResponse::Ok);
        assert_eq!(CasResponse::from(StatusCode::ErrExists), CasResponse::Exists);
        assert_eq!(
            CasResponse::from(StatusCode::Err2Big),
            CasResponse::Observed(StatusCode::Err2Big)
        );
    }
}
