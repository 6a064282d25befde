//! Defined-property registry
//!
//! Every def* call records its vector here so that inbound new*Vector
//! messages can be checked for existence and permission, and so a
//! targeted getProperties can be answered without the driver.

use std::collections::HashMap;

use crate::property::{
    lock, BlobVector, LightVector, NumberVector, Shared, SwitchVector, TextVector,
};
use crate::protocol::{Permission, PropertyKind};
use crate::wire;

/// A registered vector of any family.
#[derive(Debug, Clone)]
pub enum PropertyHandle {
    Number(Shared<NumberVector>),
    Switch(Shared<SwitchVector>),
    Text(Shared<TextVector>),
    Light(Shared<LightVector>),
    Blob(Shared<BlobVector>),
}

impl PropertyHandle {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyHandle::Number(_) => PropertyKind::Number,
            PropertyHandle::Switch(_) => PropertyKind::Switch,
            PropertyHandle::Text(_) => PropertyKind::Text,
            PropertyHandle::Light(_) => PropertyKind::Light,
            PropertyHandle::Blob(_) => PropertyKind::Blob,
        }
    }

    /// Current definition, rendered as a def*Vector element.
    pub fn def_xml(&self) -> String {
        match self {
            PropertyHandle::Number(v) => wire::def_number_xml(&lock(v), None),
            PropertyHandle::Switch(v) => wire::def_switch_xml(&lock(v), None),
            PropertyHandle::Text(v) => wire::def_text_xml(&lock(v), None),
            PropertyHandle::Light(v) => wire::def_light_xml(&lock(v), None),
            PropertyHandle::Blob(v) => wire::def_blob_xml(&lock(v), None),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub device: String,
    pub name: String,
    pub perm: Permission,
    pub handle: PropertyHandle,
}

impl RegistryEntry {
    pub fn kind(&self) -> PropertyKind {
        self.handle.kind()
    }
}

/// Append-only table of (device, name) pairs.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<RegistryEntry>,
    index: HashMap<(String, String), usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a definition. Returns false if (device, name) was already
    /// present; the first definition stays authoritative.
    pub fn insert(&mut self, entry: RegistryEntry) -> bool {
        let key = (entry.device.clone(), entry.name.clone());
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key, self.entries.len());
        self.entries.push(entry);
        true
    }

    pub fn find(&self, device: &str, name: &str) -> Option<&RegistryEntry> {
        self.index
            .get(&(device.to_string(), name.to_string()))
            .map(|i| &self.entries[*i])
    }

    pub fn contains(&self, device: &str, name: &str) -> bool {
        self.find(device, name).is_some()
    }

    /// Entries in definition order.
    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{shared, Light, Number};
    use crate::protocol::PropertyState;

    fn number(device: &str, name: &str, perm: Permission) -> RegistryEntry {
        let v = NumberVector::new(
            device,
            name,
            name,
            "Main",
            perm,
            0.0,
            PropertyState::Idle,
            vec![Number::new("X", "X", "%g", 0.0, 1.0, 0.0, 0.0)],
        );
        RegistryEntry {
            device: device.to_string(),
            name: name.to_string(),
            perm,
            handle: PropertyHandle::Number(shared(v)),
        }
    }

    #[test]
    fn test_first_definition_wins() {
        let mut reg = Registry::new();
        assert!(reg.insert(number("Dev", "P", Permission::ReadWrite)));
        assert!(!reg.insert(number("Dev", "P", Permission::ReadOnly)));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.find("Dev", "P").unwrap().perm, Permission::ReadWrite);
    }

    #[test]
    fn test_lookup_is_per_device() {
        let mut reg = Registry::new();
        reg.insert(number("A", "P", Permission::ReadWrite));
        reg.insert(number("B", "P", Permission::ReadOnly));
        assert_eq!(reg.find("B", "P").unwrap().perm, Permission::ReadOnly);
        assert!(!reg.contains("C", "P"));
        let names: Vec<_> = reg.iter().map(|e| e.device.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_handle_renders_definition() {
        let lights = LightVector::new(
            "Dev",
            "STATUS",
            "Status",
            "Main",
            PropertyState::Ok,
            vec![Light::new("READY", "Ready", PropertyState::Ok)],
        );
        let handle = PropertyHandle::Light(shared(lights));
        assert_eq!(handle.kind(), PropertyKind::Light);
        assert!(handle.def_xml().starts_with("<defLightVector device='Dev' name='STATUS'"));
    }
}
