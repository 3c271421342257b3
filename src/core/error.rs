use thiserror::Error;
use crate::kv::client::StoreError;

/// Outcome kinds surfaced at the pipeline boundary. Each maps onto one
/// directory-protocol result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    OperationsError,
    ProtocolError,
    TimeLimitExceeded,
    SizeLimitExceeded,
    NoSuchAttribute,
    ConstraintViolation,
    NoSuchObject,
    InvalidDnSyntax,
    InvalidCredentials,
    UnwillingToPerform,
    NotAllowedOnNonLeaf,
    EntryAlreadyExists,
    InvalidFilter,
    InvalidConfig,
}

impl ErrorKind {
    /// Directory protocol result code for this kind.
    pub fn result_code(&self) -> u32 {
        match self {
            ErrorKind::OperationsError => 1,
            ErrorKind::ProtocolError => 2,
            ErrorKind::TimeLimitExceeded => 3,
            ErrorKind::SizeLimitExceeded => 4,
            ErrorKind::NoSuchAttribute => 16,
            ErrorKind::ConstraintViolation => 19,
            ErrorKind::NoSuchObject => 32,
            ErrorKind::InvalidDnSyntax => 34,
            ErrorKind::InvalidCredentials => 49,
            ErrorKind::UnwillingToPerform => 53,
            ErrorKind::NotAllowedOnNonLeaf => 66,
            ErrorKind::EntryAlreadyExists => 68,
            // filters and config never reach the wire as their own codes
            ErrorKind::InvalidFilter => 2,
            ErrorKind::InvalidConfig => 80,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {context}")]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: String) -> Self {
        Error { kind, context }
    }

    pub fn no_such_object(dn: impl Into<String>) -> Self {
        Error::new(ErrorKind::NoSuchObject, dn.into())
    }

    pub fn already_exists(dn: impl Into<String>) -> Self {
        Error::new(ErrorKind::EntryAlreadyExists, dn.into())
    }

    pub fn constraint_violation(attribute: impl Into<String>) -> Self {
        Error::new(ErrorKind::ConstraintViolation, attribute.into())
    }

    pub fn no_such_attribute(attribute: impl Into<String>) -> Self {
        Error::new(ErrorKind::NoSuchAttribute, attribute.into())
    }

    /// Wraps any store-level failure.
    pub fn operations(message: impl std::fmt::Display) -> Self {
        Error::new(ErrorKind::OperationsError, format!("store failure: {}", message))
    }

    pub fn result_code(&self) -> u32 {
        self.kind.result_code()
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::operations(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::new(ErrorKind::OperationsError, format!("serialization failure: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_failures_become_operations_errors() {
        let err: Error = StoreError::NotFound("people/cn=a".to_string()).into();
        assert_eq!(err.kind, ErrorKind::OperationsError);
        assert_eq!(err.result_code(), 1);
        assert!(err.to_string().contains("people/cn=a"));
    }

    #[test]
    fn constructors_carry_their_codes() {
        assert_eq!(Error::no_such_object("o=x").result_code(), 32);
        assert_eq!(Error::already_exists("o=x").result_code(), 68);
        assert_eq!(Error::constraint_violation("uid").result_code(), 19);
        assert_eq!(Error::no_such_attribute("mail").result_code(), 16);
    }
}
