//! Error types for the object model

use thiserror::Error;

use crate::version::ObjectVersion;

/// Result type for object operations
pub type Result<T> = std::result::Result<T, ObjectError>;

/// Object model errors
#[derive(Error, Debug)]
pub enum ObjectError {
    #[error("{object} object has no attribute '{attribute}'")]
    UnknownAttribute { object: String, attribute: String },

    #[error("Attribute '{attribute}' of {object} is not set")]
    AttributeUnset { object: String, attribute: String },

    #[error("Cannot load '{attribute}' of {object}: lazy loading is not supported")]
    LoadUnsupported { object: String, attribute: String },

    #[error("Cannot modify readonly field {field}")]
    ReadOnlyFieldViolation { field: String },

    #[error("Invalid value for field {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unsupported object type {objtype}")]
    UnsupportedObjectType { objtype: String },

    #[error("Version {objver} of {objname} is not supported, supported version is {supported}")]
    IncompatibleObjectVersion {
        objname: String,
        objver: String,
        supported: ObjectVersion,
    },

    #[error("Object action {action} failed because: {reason}")]
    ActionError { action: String, reason: String },

    #[error("Cannot call {method} on orphaned {objtype} object")]
    OrphanedObjectError { method: String, objtype: String },

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Object {object} relationship {owner}->{child} for field {field} is out of order")]
    RelationshipOrder {
        object: String,
        field: String,
        owner: ObjectVersion,
        child: ObjectVersion,
    },

    #[error("Hashes have changed for {}", .objects.join(","))]
    HashMismatch { objects: Vec<String> },

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl ObjectError {
    pub(crate) fn action(action: impl Into<String>, reason: impl Into<String>) -> Self {
        ObjectError::ActionError {
            action: action.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ObjectError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
