// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Errno values carried in datapath control replies.
//!
//! The control channel reports per-operation outcomes as errno-class codes in
//! the reply's `error` field.  Only the values the datapath actually emits are
//! defined here; anything else arriving off the wire is preserved as an
//! [`ErrorCode::Other`].
//!
//! Happy to work in `no_std` environments.

#![cfg_attr(not(test), no_std)]
#![deny(clippy::all, clippy::pedantic)]
#![forbid(
    clippy::expect_used,
    clippy::missing_errors_doc,
    clippy::panic,
    clippy::unwrap_used,
    missing_docs,
    unsafe_code
)]

/// No error, operation succeeded
pub const SUCCESS: i32 = 0;
/// Not super-user
pub const EPERM: i32 = 1;
/// No such file or directory
pub const ENOENT: i32 = 2;
/// Interrupted system call
pub const EINTR: i32 = 4;
/// I/O error
pub const EIO: i32 = 5;
/// Resource temporarily unavailable
pub const EAGAIN: i32 = 11;
/// Not enough memory
pub const ENOMEM: i32 = 12;
/// Device or resource busy
pub const EBUSY: i32 = 16;
/// File exists
pub const EEXIST: i32 = 17;
/// No such device
pub const ENODEV: i32 = 19;
/// Invalid argument
pub const EINVAL: i32 = 22;
/// No space left on a device
pub const ENOSPC: i32 = 28;
/// No message of desired type
pub const ENOMSG: i32 = 35;
/// No buffer space available
pub const ENOBUFS: i32 = 105;

/// The errno values the datapath emits in control replies.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[must_use]
#[repr(i32)]
pub enum StandardErrno {
    /// Operation succeeded
    #[error("Success")]
    Success = SUCCESS,
    /// Operation not permitted
    #[error("Operation not permitted")]
    PermissionDenied = EPERM,
    /// No such file or directory
    #[error("No such file or directory")]
    NoSuchFileOrDirectory = ENOENT,
    /// Interrupted system call
    #[error("Interrupted system call")]
    Interrupted = EINTR,
    /// I/O error
    #[error("I/O error")]
    Io = EIO,
    /// Try again
    #[error("Try again")]
    TryAgain = EAGAIN,
    /// No memory available
    #[error("No memory available")]
    NoMemory = ENOMEM,
    /// Device or resource busy
    #[error("Device or resource busy")]
    Busy = EBUSY,
    /// File exists
    #[error("File exists")]
    FileExists = EEXIST,
    /// No such device
    #[error("No such device")]
    NoSuchDevice = ENODEV,
    /// Invalid argument
    #[error("Invalid argument")]
    InvalidArgument = EINVAL,
    /// No space left on device
    #[error("No space left on device")]
    NoSpaceLeftOnDevice = ENOSPC,
    /// No message of desired type
    #[error("No message of desired type")]
    NoMessage = ENOMSG,
    /// No buffer space available
    #[error("No buffer space available")]
    NoBufferSpace = ENOBUFS,
}

impl StandardErrno {
    /// Get the `i32` value of a standard errno.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Parse an `i32` value into a `StandardErrno`.
    ///
    /// # Errors
    ///
    /// Returns the original `i32` value if it does not correspond to an errno
    /// the datapath emits.
    pub const fn parse_i32(value: i32) -> Result<StandardErrno, i32> {
        #[allow(clippy::enum_glob_use)]
        use StandardErrno::*;
        match value {
            SUCCESS => Ok(Success),
            EPERM => Ok(PermissionDenied),
            ENOENT => Ok(NoSuchFileOrDirectory),
            EINTR => Ok(Interrupted),
            EIO => Ok(Io),
            EAGAIN => Ok(TryAgain),
            ENOMEM => Ok(NoMemory),
            EBUSY => Ok(Busy),
            EEXIST => Ok(FileExists),
            ENODEV => Ok(NoSuchDevice),
            EINVAL => Ok(InvalidArgument),
            ENOSPC => Ok(NoSpaceLeftOnDevice),
            ENOMSG => Ok(NoMessage),
            ENOBUFS => Ok(NoBufferSpace),
            _ => Err(value),
        }
    }
}

/// A raw errno value as found on the control wire.
#[must_use]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(transparent)]
pub struct Errno(pub i32);

impl From<i32> for Errno {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<Errno> for i32 {
    fn from(value: Errno) -> i32 {
        value.0
    }
}

impl TryFrom<Errno> for StandardErrno {
    type Error = i32;

    fn try_from(value: Errno) -> Result<Self, Self::Error> {
        StandardErrno::parse_i32(value.0)
    }
}

impl From<StandardErrno> for Errno {
    fn from(value: StandardErrno) -> Self {
        Self(value as i32)
    }
}

/// An "errno" error.
///
/// Codes the datapath emits map to [`StandardErrno`]; any other value read
/// back off the wire is kept verbatim in the [`ErrorCode::Other`] arm.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[must_use]
pub enum ErrorCode {
    /// A standard errno value
    #[error(transparent)]
    Standard(StandardErrno),
    /// Any `i32` which does not map to a standard errno value
    #[error("Unknown (non-standard) errno: {0:?}")]
    Other(Errno),
}

impl ErrorCode {
    /// Parse an `i32` value into an [`ErrorCode`].
    pub const fn parse_i32(val: i32) -> ErrorCode {
        match StandardErrno::parse_i32(val) {
            Ok(standard) => ErrorCode::Standard(standard),
            Err(code) => ErrorCode::Other(Errno(code)),
        }
    }

    /// Parse an `Errno` value into an [`ErrorCode`].
    pub const fn parse_errno(val: Errno) -> ErrorCode {
        Self::parse_i32(val.0)
    }

    /// Get the wire representation of this code.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            ErrorCode::Standard(standard) => standard.as_i32(),
            ErrorCode::Other(errno) => errno.0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn standard_codes_round_trip() {
        for code in [
            SUCCESS, EPERM, ENOENT, EINTR, EIO, EAGAIN, ENOMEM, EBUSY, EEXIST, ENODEV, EINVAL,
            ENOSPC, ENOMSG, ENOBUFS,
        ] {
            assert_eq!(
                StandardErrno::parse_i32(code).map(StandardErrno::as_i32),
                Ok(code)
            );
            assert!(matches!(
                ErrorCode::parse_i32(code),
                ErrorCode::Standard(_)
            ));
            assert_eq!(ErrorCode::parse_i32(code).as_i32(), code);
        }
    }

    #[test]
    fn unknown_codes_are_preserved() {
        let code = ErrorCode::parse_i32(-7);
        assert_eq!(code, ErrorCode::Other(Errno(-7)));
        assert_eq!(code.as_i32(), -7);
    }
}
