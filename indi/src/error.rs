//! INDI error types
//!
//! Provides structured error types for driver-side INDI operations. Most
//! variants are recoverable and end up as a `<message>` to the client; only
//! [`IndiError::is_fatal`] errors stop the event loop.

use std::path::PathBuf;

use crate::serial::TtyError;

/// INDI driver errors
#[derive(Debug, thiserror::Error)]
pub enum IndiError {
    /// XML parse error (malformed input or structural desync)
    #[error("XML parse error: {0}")]
    ParseError(String),
    /// A top-level element lacks a required attribute
    #[error("{tag} requires '{attribute}' attribute")]
    MissingAttribute { tag: String, attribute: &'static str },
    /// A client addressed a property that was never defined
    #[error("Property {name} is not defined in {device}.")]
    PropertyNotDefined { device: String, name: String },
    /// A client tried to write a read-only property
    #[error("Cannot set read-only property {name}")]
    ReadOnly { device: String, name: String },
    /// Unrecognized top-level tag
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    /// getProperties without a version attribute
    #[error("getProperties missing version")]
    MissingVersion,
    /// Client protocol version is newer than ours
    #[error("client version {client} > {supported}")]
    VersionMismatch { client: f64, supported: f64 },
    /// A new*Vector carried no usable members
    #[error("{name}: {tag} with no valid members")]
    NoValidMembers { device: String, name: String, tag: String },
    /// Number member text that is neither decimal nor sexagesimal
    #[error("{name}: Bad format {value}")]
    BadNumber { name: String, value: String },
    /// Switch member text other than On/Off
    #[error("{name}: must be On or Off: {value}")]
    InvalidSwitchState { name: String, value: String },
    /// Member name not present in the target vector
    #[error("Error: {member} is not a member of {label} ({name}) property.")]
    UnknownMember { name: String, label: String, member: String },
    /// Number outside the member's [min, max]
    #[error("Error: Invalid range for {label} ({member}). Valid range is from {min} to {max}. Requested value is {value}")]
    ValueOutOfRange {
        label: String,
        member: String,
        value: f64,
        min: f64,
        max: f64,
    },
    /// Switch update would break the vector's rule
    #[error("Error: invalid state switch for property {label} ({name}). {reason}.")]
    SwitchRuleViolation { label: String, name: String, reason: &'static str },
    /// Snooped element belongs to another vector or is incomplete
    #[error("Snooped element does not match {device}.{name}")]
    SnoopMismatch { device: String, name: String },
    /// Sexagesimal or printf style format not understood
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    /// Input stream closed
    #[error("EOF on input stream")]
    Eof,
    /// I/O failure on stdout or a file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Config file problems
    #[error("Config error: {0}")]
    Config(String),
    /// Config file exists but belongs to root
    #[error("Config file {} is owned by root! This will lead to serious errors. To fix this, run: sudo chown -R $USER:$USER ~/.indi", .0.display())]
    ConfigOwnedByRoot(PathBuf),
    /// Serial line failure
    #[error(transparent)]
    Tty(#[from] TtyError),
    /// setuid/setgid failed or did not stick
    #[error("Privilege drop failed: {0}")]
    Privileges(String),
}

impl IndiError {
    /// Errors that must terminate the driver process. A parse error leaves
    /// the inbound stream out of sync, so it is fatal too.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IndiError::ParseError(_)
                | IndiError::MissingVersion
                | IndiError::VersionMismatch { .. }
                | IndiError::Eof
        )
    }

    /// Device the error should be reported against, if any.
    pub fn device(&self) -> Option<&str> {
        match self {
            IndiError::PropertyNotDefined { device, .. }
            | IndiError::ReadOnly { device, .. }
            | IndiError::NoValidMembers { device, .. } => Some(device),
            _ => None,
        }
    }
}

impl From<quick_xml::Error> for IndiError {
    fn from(err: quick_xml::Error) -> Self {
        IndiError::ParseError(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for IndiError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        IndiError::ParseError(err.to_string())
    }
}

impl From<IndiError> for String {
    fn from(err: IndiError) -> String {
        err.to_string()
    }
}

/// Result type for INDI operations
pub type IndiResult<T> = Result<T, IndiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndiError::PropertyNotDefined {
            device: "Focuser".to_string(),
            name: "TEMP".to_string(),
        };
        assert_eq!(err.to_string(), "Property TEMP is not defined in Focuser.");

        let err = IndiError::ReadOnly {
            device: "Focuser".to_string(),
            name: "FOCUS_TEMPERATURE".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot set read-only property FOCUS_TEMPERATURE"
        );

        let err = IndiError::MissingAttribute {
            tag: "newNumberVector".to_string(),
            attribute: "device",
        };
        assert_eq!(err.to_string(), "newNumberVector requires 'device' attribute");
    }

    #[test]
    fn test_range_error_display() {
        let err = IndiError::ValueOutOfRange {
            label: "Temperature".to_string(),
            member: "TEMP".to_string(),
            value: 100.0,
            min: -30.0,
            max: 40.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("Valid range is from -30 to 40"));
        assert!(msg.contains("Requested value is 100"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(IndiError::MissingVersion.is_fatal());
        assert!(IndiError::Eof.is_fatal());
        assert!(IndiError::VersionMismatch {
            client: 2.0,
            supported: 1.7
        }
        .is_fatal());
        assert!(!IndiError::UnknownCommand("foo".to_string()).is_fatal());
        assert!(IndiError::ParseError("bad".to_string()).is_fatal());
        assert!(!IndiError::BadNumber {
            name: "P".to_string(),
            value: "x".to_string()
        }
        .is_fatal());
    }

    #[test]
    fn test_device_scope() {
        let err = IndiError::NoValidMembers {
            device: "Dev".to_string(),
            name: "P".to_string(),
            tag: "newSwitchVector".to_string(),
        };
        assert_eq!(err.device(), Some("Dev"));
        assert_eq!(err.to_string(), "P: newSwitchVector with no valid members");
        assert_eq!(IndiError::Eof.device(), None);
    }

    #[test]
    fn test_error_into_string() {
        let err = IndiError::UnknownCommand("frobnicate".to_string());
        let s: String = err.into();
        assert_eq!(s, "Unknown command: frobnicate");
    }
}
