//! INDI Driver Core (Linux/macOS)
//!
//! Implements the device side of the INDI protocol: a driver process speaks
//! XML over stdin/stdout to an INDI server, which relays to clients.
//!
//! ## Features
//!
//! - Typed property vectors (switch, number, text, light, BLOB) with
//!   atomic validate-then-apply updates and switch rule enforcement
//! - XML wire codec with base64 BLOB framing
//! - Dispatcher with registry checks for undefined and read-only writes
//! - Per-property handler tables for drivers
//! - Config file persistence replayed through the dispatcher
//! - Snooping on other devices' traffic
//! - Blocking serial line helpers with classic error messages
//! - Single-threaded event loop with one-shot and periodic timers and
//!   idle work procs

mod context;
mod dispatcher;
mod error;
mod handler;
mod options;
mod property;
mod protocol;
mod registry;
mod timer;

pub mod config;
pub mod eventloop;
pub mod numfmt;
pub mod serial;
pub mod snoop;
pub mod wire;
pub mod xml;

pub use config::{ConfigFile, ConfigWriter};
pub use context::{IndiContext, SharedBuffer};
pub use dispatcher::{Dispatcher, Driver};
pub use error::{IndiError, IndiResult};
pub use eventloop::{drop_privileges, run, run_stdio};
pub use handler::{BlobHandler, Handler, NumberHandler, PropertyTable, SwitchHandler, TextHandler};
pub use options::{DriverOptions, SerialTimeouts};
pub use property::{
    find_index, find_on_switch_name, lock, shared, Blob, BlobUpload, BlobVector, Light,
    LightVector, Number, NumberVector, PropertyVector, Shared, Switch, SwitchVector, Text,
    TextVector,
};
pub use protocol::{
    groups, standard_properties, BlobHandling, Permission, PropertyKind, PropertyState,
    SwitchRule, SwitchState, INDIV, INDI_PROTOCOL_VERSION, MAXINDIBLOBFMT, MAXINDIDEVICE,
    MAXINDIFORMAT, MAXINDIGROUP, MAXINDILABEL, MAXINDINAME,
};
pub use registry::{PropertyHandle, Registry, RegistryEntry};
pub use serial::{Parity, SerialIo, Tty, TtyError, TtyResult};
pub use timer::{TimerId, TimerQueue, WorkProcId, WorkQueue};
pub use xml::XmlElement;
