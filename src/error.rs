//! Error types for the memory container subsystem.

use rustix::io::Errno;
use thiserror::Error;

/// Result type alias using this crate's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for container, object and lock operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The calling task is not a member of any container.
    #[error("calling task is not a member of any container")]
    NotInContainer,

    /// No memory object with the requested id exists in the caller's container.
    #[error("memory object not found")]
    ObjectNotFound,

    /// No held lock with the requested id exists in the caller's container.
    #[error("lock not found")]
    LockNotFound,

    /// Backing store allocation failed.
    #[error("memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Copying the command record from caller memory failed.
    #[error("failed to transfer command record from caller memory")]
    TransferFault,

    /// Installing a frame into the caller's address space failed.
    #[error("failed to install mapping: {0}")]
    RemapFailed(String),

    /// The control code does not name a known command.
    #[error("unknown control command: {0:#x}")]
    UnknownCommand(u32),

    /// The container was torn down while the caller was blocked on it.
    #[error("container destroyed while waiting")]
    ContainerDestroyed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] Errno),
}

impl Error {
    /// The errno relayed to a caller that speaks the `-errno` convention.
    pub fn errno(&self) -> Errno {
        match self {
            Error::NotInContainer => Errno::SRCH,
            Error::ObjectNotFound => Errno::NOENT,
            Error::LockNotFound => Errno::NOLCK,
            Error::AllocationFailed(_) => Errno::NOMEM,
            Error::TransferFault => Errno::FAULT,
            Error::RemapFailed(_) => Errno::AGAIN,
            Error::UnknownCommand(_) => Errno::NOTTY,
            Error::ContainerDestroyed => Errno::IDRM,
            Error::Io(e) => e
                .raw_os_error()
                .map(Errno::from_raw_os_error)
                .unwrap_or(Errno::IO),
            Error::System(errno) => *errno,
        }
    }

    /// Whether this error is an ordinary lookup miss rather than a failure.
    ///
    /// Lookup misses never change registry state.
    pub fn is_lookup_miss(&self) -> bool {
        matches!(
            self,
            Error::NotInContainer | Error::ObjectNotFound | Error::LockNotFound
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping_is_distinct() {
        let errors = [
            Error::NotInContainer,
            Error::ObjectNotFound,
            Error::LockNotFound,
            Error::AllocationFailed("x".into()),
            Error::TransferFault,
            Error::RemapFailed("x".into()),
            Error::UnknownCommand(9),
            Error::ContainerDestroyed,
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.errno().raw_os_error()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_unknown_command_is_enotty() {
        assert_eq!(Error::UnknownCommand(0x42).errno(), Errno::NOTTY);
    }

    #[test]
    fn test_io_error_keeps_os_code() {
        let err = Error::Io(std::io::Error::from_raw_os_error(Errno::ACCESS.raw_os_error()));
        assert_eq!(err.errno(), Errno::ACCESS);

        let err = Error::Io(std::io::Error::other("synthetic"));
        assert_eq!(err.errno(), Errno::IO);
    }

    #[test]
    fn test_lookup_miss_classification() {
        assert!(Error::LockNotFound.is_lookup_miss());
        assert!(Error::ObjectNotFound.is_lookup_miss());
        assert!(!Error::TransferFault.is_lookup_miss());
    }
}
