//! INDI XML Protocol definitions

use std::fmt;

/// INDI protocol version
pub const INDI_PROTOCOL_VERSION: &str = "1.7";

/// Protocol version as a number, for getProperties negotiation
pub const INDIV: f64 = 1.7;

/// Buffer sizes of the C protocol; identifiers are truncated to one less.
pub const MAXINDINAME: usize = 64;
pub const MAXINDILABEL: usize = 64;
pub const MAXINDIDEVICE: usize = 64;
pub const MAXINDIGROUP: usize = 64;
pub const MAXINDIFORMAT: usize = 64;
pub const MAXINDIBLOBFMT: usize = 64;

/// Property vector state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PropertyState {
    #[default]
    Idle,
    Ok,
    Busy,
    Alert,
}

impl PropertyState {
    pub fn as_str(self) -> &'static str {
        match self {
            PropertyState::Idle => "Idle",
            PropertyState::Ok => "Ok",
            PropertyState::Busy => "Busy",
            PropertyState::Alert => "Alert",
        }
    }

    /// Exact match on the wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Idle" => Some(PropertyState::Idle),
            "Ok" => Some(PropertyState::Ok),
            "Busy" => Some(PropertyState::Busy),
            "Alert" => Some(PropertyState::Alert),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Switch member state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwitchState {
    #[default]
    Off,
    On,
}

impl SwitchState {
    pub fn as_str(self) -> &'static str {
        match self {
            SwitchState::Off => "Off",
            SwitchState::On => "On",
        }
    }

    /// "On" is matched as a prefix, "Off" exactly.
    pub fn parse(s: &str) -> Option<Self> {
        if s.starts_with("On") {
            Some(SwitchState::On)
        } else if s == "Off" {
            Some(SwitchState::Off)
        } else {
            None
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Switch vector behaviour rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchRule {
    OneOfMany,
    AtMostOne,
    AnyOfMany,
}

impl SwitchRule {
    pub fn as_str(self) -> &'static str {
        match self {
            SwitchRule::OneOfMany => "OneOfMany",
            SwitchRule::AtMostOne => "AtMostOne",
            SwitchRule::AnyOfMany => "AnyOfMany",
        }
    }
}

/// Client permission on a property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::ReadOnly => "ro",
            Permission::WriteOnly => "wo",
            Permission::ReadWrite => "rw",
        }
    }

    /// Prefix match, so "rw " or "rwx" still resolve.
    pub fn parse(s: &str) -> Option<Self> {
        if s.starts_with("rw") {
            Some(Permission::ReadWrite)
        } else if s.starts_with("ro") {
            Some(Permission::ReadOnly)
        } else if s.starts_with("wo") {
            Some(Permission::WriteOnly)
        } else {
            None
        }
    }

    pub fn is_writable(self) -> bool {
        self != Permission::ReadOnly
    }
}

/// Which BLOBs a snooping driver wants forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobHandling {
    Never,
    Also,
    Only,
}

impl BlobHandling {
    pub fn as_str(self) -> &'static str {
        match self {
            BlobHandling::Never => "Never",
            BlobHandling::Also => "Also",
            BlobHandling::Only => "Only",
        }
    }
}

/// The five property vector families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Number,
    Switch,
    Text,
    Light,
    Blob,
}

impl PropertyKind {
    /// Tag suffix shared by def/set/new forms, e.g. "NumberVector".
    pub fn vector_tag(self) -> &'static str {
        match self {
            PropertyKind::Number => "NumberVector",
            PropertyKind::Switch => "SwitchVector",
            PropertyKind::Text => "TextVector",
            PropertyKind::Light => "LightVector",
            PropertyKind::Blob => "BLOBVector",
        }
    }

    /// Member tag suffix, e.g. "Number" for oneNumber/defNumber.
    pub fn member_tag(self) -> &'static str {
        match self {
            PropertyKind::Number => "Number",
            PropertyKind::Switch => "Switch",
            PropertyKind::Text => "Text",
            PropertyKind::Light => "Light",
            PropertyKind::Blob => "BLOB",
        }
    }
}

/// Standard INDI properties
pub mod standard_properties {
    /// Connection control switch
    pub const CONNECTION: &str = "CONNECTION";
    pub const CONNECT: &str = "CONNECT";
    pub const DISCONNECT: &str = "DISCONNECT";

    /// Device port
    pub const DEVICE_PORT: &str = "DEVICE_PORT";
    pub const PORT: &str = "PORT";

    // Config handling
    pub const CONFIG_PROCESS: &str = "CONFIG_PROCESS";
    pub const CONFIG_LOAD: &str = "CONFIG_LOAD";
    pub const CONFIG_SAVE: &str = "CONFIG_SAVE";
    pub const CONFIG_DEFAULT: &str = "CONFIG_DEFAULT";
    pub const CONFIG_PURGE: &str = "CONFIG_PURGE";

    // Focuser properties
    pub const ABS_FOCUS_POSITION: &str = "ABS_FOCUS_POSITION";
    pub const FOCUS_ABSOLUTE_POSITION: &str = "FOCUS_ABSOLUTE_POSITION";
    pub const FOCUS_ABORT_MOTION: &str = "FOCUS_ABORT_MOTION";
    pub const ABORT: &str = "ABORT";
    pub const FOCUS_TEMPERATURE: &str = "FOCUS_TEMPERATURE";
    pub const TEMPERATURE: &str = "TEMPERATURE";
    pub const FOCUS_STATUS: &str = "FOCUS_STATUS";
    pub const FOCUS_MOVING: &str = "FOCUS_MOVING";
    pub const FIRMWARE_INFO: &str = "FIRMWARE_INFO";
    pub const FIRMWARE_VERSION: &str = "FIRMWARE_VERSION";
}

/// Common property groups
pub mod groups {
    pub const MAIN_CONTROL: &str = "Main Control";
    pub const OPTIONS: &str = "Options";
}
