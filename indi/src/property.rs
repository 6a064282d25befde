//! Property vectors and their members
//!
//! Each vector family mirrors one INDI `def*Vector`. Vectors are owned by
//! the driver and shared with the registry through [`Shared`], so the
//! getProperties fast path can re-emit a definition without calling back
//! into the driver.
//!
//! The `apply` methods validate a client update completely before
//! assigning anything: a rejected update leaves every member value as it
//! was and only moves the vector state.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{IndiError, IndiResult};
use crate::protocol::{
    Permission, PropertyKind, PropertyState, SwitchRule, SwitchState, MAXINDIBLOBFMT,
    MAXINDIDEVICE, MAXINDIFORMAT, MAXINDIGROUP, MAXINDILABEL, MAXINDINAME,
};

/// A vector shared between its driver and the registry.
pub type Shared<V> = Arc<Mutex<V>>;

/// Wrap a vector for registration.
pub fn shared<V>(vector: V) -> Shared<V> {
    Arc::new(Mutex::new(vector))
}

/// Lock a shared vector, recovering from a poisoned lock.
pub fn lock<V>(vector: &Mutex<V>) -> MutexGuard<'_, V> {
    vector.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Truncate an identifier to fit a `size`-byte C buffer.
pub(crate) fn truncate_ident(s: &str, size: usize) -> String {
    let max = size.saturating_sub(1);
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Common view over the five vector families.
pub trait PropertyVector {
    const KIND: PropertyKind;

    fn device(&self) -> &str;
    fn name(&self) -> &str;
    fn label(&self) -> &str;
    fn perm(&self) -> Permission;
    fn state(&self) -> PropertyState;
    fn set_state(&mut self, state: PropertyState);
}

/// Switch member
#[derive(Debug, Clone, PartialEq)]
pub struct Switch {
    pub name: String,
    pub label: String,
    pub state: SwitchState,
}

impl Switch {
    pub fn new(name: &str, label: &str, state: SwitchState) -> Self {
        Self {
            name: truncate_ident(name, MAXINDINAME),
            label: truncate_ident(label, MAXINDILABEL),
            state,
        }
    }
}

/// Number member
#[derive(Debug, Clone, PartialEq)]
pub struct Number {
    pub name: String,
    pub label: String,
    /// printf-style format, `%m` variants select sexagesimal
    pub format: String,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub value: f64,
}

impl Number {
    pub fn new(
        name: &str,
        label: &str,
        format: &str,
        min: f64,
        max: f64,
        step: f64,
        value: f64,
    ) -> Self {
        Self {
            name: truncate_ident(name, MAXINDINAME),
            label: truncate_ident(label, MAXINDILABEL),
            format: truncate_ident(format, MAXINDIFORMAT),
            min,
            max,
            step,
            value,
        }
    }

    pub fn in_range(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Text member
#[derive(Debug, Clone, PartialEq)]
pub struct Text {
    pub name: String,
    pub label: String,
    pub text: String,
}

impl Text {
    pub fn new(name: &str, label: &str, text: &str) -> Self {
        Self {
            name: truncate_ident(name, MAXINDINAME),
            label: truncate_ident(label, MAXINDILABEL),
            text: text.to_string(),
        }
    }
}

/// Light member
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub name: String,
    pub label: String,
    pub state: PropertyState,
}

impl Light {
    pub fn new(name: &str, label: &str, state: PropertyState) -> Self {
        Self {
            name: truncate_ident(name, MAXINDINAME),
            label: truncate_ident(label, MAXINDILABEL),
            state,
        }
    }
}

/// BLOB member
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Blob {
    pub name: String,
    pub label: String,
    /// Format suffix such as ".fits" or ".fits.z"
    pub format: String,
    /// Uncompressed size as reported on the wire
    pub size: usize,
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(name: &str, label: &str, format: &str) -> Self {
        Self {
            name: truncate_ident(name, MAXINDINAME),
            label: truncate_ident(label, MAXINDILABEL),
            format: truncate_ident(format, MAXINDIBLOBFMT),
            size: 0,
            data: Vec::new(),
        }
    }
}

/// One member of an incoming newBLOBVector
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlobUpload {
    pub name: String,
    pub size: usize,
    pub format: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchVector {
    pub device: String,
    pub name: String,
    pub label: String,
    pub group: String,
    pub perm: Permission,
    pub rule: SwitchRule,
    pub timeout: f64,
    pub state: PropertyState,
    pub switches: Vec<Switch>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumberVector {
    pub device: String,
    pub name: String,
    pub label: String,
    pub group: String,
    pub perm: Permission,
    pub timeout: f64,
    pub state: PropertyState,
    pub numbers: Vec<Number>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextVector {
    pub device: String,
    pub name: String,
    pub label: String,
    pub group: String,
    pub perm: Permission,
    pub timeout: f64,
    pub state: PropertyState,
    pub texts: Vec<Text>,
}

/// Lights are always read-only and carry no timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct LightVector {
    pub device: String,
    pub name: String,
    pub label: String,
    pub group: String,
    pub state: PropertyState,
    pub lights: Vec<Light>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlobVector {
    pub device: String,
    pub name: String,
    pub label: String,
    pub group: String,
    pub perm: Permission,
    pub timeout: f64,
    pub state: PropertyState,
    pub blobs: Vec<Blob>,
}

impl SwitchVector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: &str,
        name: &str,
        label: &str,
        group: &str,
        perm: Permission,
        rule: SwitchRule,
        timeout: f64,
        state: PropertyState,
        switches: Vec<Switch>,
    ) -> Self {
        Self {
            device: truncate_ident(device, MAXINDIDEVICE),
            name: truncate_ident(name, MAXINDINAME),
            label: truncate_ident(label, MAXINDILABEL),
            group: truncate_ident(group, MAXINDIGROUP),
            perm,
            rule,
            timeout,
            state,
            switches,
        }
    }

    pub fn find(&self, name: &str) -> Option<&Switch> {
        self.switches.iter().find(|s| s.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Switch> {
        self.switches.iter_mut().find(|s| s.name == name)
    }

    /// First member that is On.
    pub fn find_on_switch(&self) -> Option<&Switch> {
        self.switches.iter().find(|s| s.state == SwitchState::On)
    }

    pub fn find_on_switch_index(&self) -> Option<usize> {
        self.switches.iter().position(|s| s.state == SwitchState::On)
    }

    /// Turn every member Off.
    pub fn reset(&mut self) {
        for s in &mut self.switches {
            s.state = SwitchState::Off;
        }
    }

    /// Apply a client update, enforcing the vector rule.
    ///
    /// For OneOfMany and AtMostOne, an update that turns any member On
    /// first turns the others Off. Afterwards OneOfMany needs exactly one
    /// member On and AtMostOne at most one; otherwise nothing changes and
    /// the vector goes to Alert. An unknown member name leaves the vector
    /// Idle.
    pub fn apply(&mut self, states: &[SwitchState], names: &[&str]) -> IndiResult<()> {
        let mut next: Vec<SwitchState> = self.switches.iter().map(|s| s.state).collect();

        let exclusive = matches!(self.rule, SwitchRule::OneOfMany | SwitchRule::AtMostOne);
        if exclusive && states.iter().any(|s| *s == SwitchState::On) {
            next.iter_mut().for_each(|s| *s = SwitchState::Off);
        }

        for (state, name) in states.iter().zip(names) {
            match self.switches.iter().position(|s| s.name == *name) {
                Some(i) => next[i] = *state,
                None => {
                    self.state = PropertyState::Idle;
                    return Err(IndiError::UnknownMember {
                        name: self.name.clone(),
                        label: self.label.clone(),
                        member: name.to_string(),
                    });
                }
            }
        }

        let on = next.iter().filter(|s| **s == SwitchState::On).count();
        let reason = match self.rule {
            SwitchRule::OneOfMany if on == 0 => Some("No switch is on"),
            SwitchRule::OneOfMany | SwitchRule::AtMostOne if on > 1 => {
                Some("Too many switches are on")
            }
            _ => None,
        };
        if let Some(reason) = reason {
            self.state = PropertyState::Alert;
            return Err(IndiError::SwitchRuleViolation {
                label: self.label.clone(),
                name: self.name.clone(),
                reason,
            });
        }

        for (member, state) in self.switches.iter_mut().zip(next) {
            member.state = state;
        }
        Ok(())
    }
}

impl NumberVector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: &str,
        name: &str,
        label: &str,
        group: &str,
        perm: Permission,
        timeout: f64,
        state: PropertyState,
        numbers: Vec<Number>,
    ) -> Self {
        Self {
            device: truncate_ident(device, MAXINDIDEVICE),
            name: truncate_ident(name, MAXINDINAME),
            label: truncate_ident(label, MAXINDILABEL),
            group: truncate_ident(group, MAXINDIGROUP),
            perm,
            timeout,
            state,
            numbers,
        }
    }

    pub fn find(&self, name: &str) -> Option<&Number> {
        self.numbers.iter().find(|n| n.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Number> {
        self.numbers.iter_mut().find(|n| n.name == name)
    }

    /// Apply a client update. Every value is range checked before any
    /// member is assigned.
    pub fn apply(&mut self, values: &[f64], names: &[&str]) -> IndiResult<()> {
        let mut targets = Vec::with_capacity(names.len());
        for (value, name) in values.iter().zip(names) {
            let Some(i) = self.numbers.iter().position(|n| n.name == *name) else {
                self.state = PropertyState::Idle;
                return Err(IndiError::UnknownMember {
                    name: self.name.clone(),
                    label: self.label.clone(),
                    member: name.to_string(),
                });
            };
            let member = &self.numbers[i];
            if !member.in_range(*value) {
                let err = IndiError::ValueOutOfRange {
                    label: member.label.clone(),
                    member: member.name.clone(),
                    value: *value,
                    min: member.min,
                    max: member.max,
                };
                self.state = PropertyState::Alert;
                return Err(err);
            }
            targets.push((i, *value));
        }

        for (i, value) in targets {
            self.numbers[i].value = value;
        }
        Ok(())
    }
}

impl TextVector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: &str,
        name: &str,
        label: &str,
        group: &str,
        perm: Permission,
        timeout: f64,
        state: PropertyState,
        texts: Vec<Text>,
    ) -> Self {
        Self {
            device: truncate_ident(device, MAXINDIDEVICE),
            name: truncate_ident(name, MAXINDINAME),
            label: truncate_ident(label, MAXINDILABEL),
            group: truncate_ident(group, MAXINDIGROUP),
            perm,
            timeout,
            state,
            texts,
        }
    }

    pub fn find(&self, name: &str) -> Option<&Text> {
        self.texts.iter().find(|t| t.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Text> {
        self.texts.iter_mut().find(|t| t.name == name)
    }

    pub fn apply(&mut self, texts: &[&str], names: &[&str]) -> IndiResult<()> {
        let mut targets = Vec::with_capacity(names.len());
        for (text, name) in texts.iter().zip(names) {
            match self.texts.iter().position(|t| t.name == *name) {
                Some(i) => targets.push((i, *text)),
                None => {
                    self.state = PropertyState::Idle;
                    return Err(IndiError::UnknownMember {
                        name: self.name.clone(),
                        label: self.label.clone(),
                        member: name.to_string(),
                    });
                }
            }
        }

        for (i, text) in targets {
            self.texts[i].text = text.to_string();
        }
        Ok(())
    }
}

impl LightVector {
    pub fn new(
        device: &str,
        name: &str,
        label: &str,
        group: &str,
        state: PropertyState,
        lights: Vec<Light>,
    ) -> Self {
        Self {
            device: truncate_ident(device, MAXINDIDEVICE),
            name: truncate_ident(name, MAXINDINAME),
            label: truncate_ident(label, MAXINDILABEL),
            group: truncate_ident(group, MAXINDIGROUP),
            state,
            lights,
        }
    }

    pub fn find(&self, name: &str) -> Option<&Light> {
        self.lights.iter().find(|l| l.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Light> {
        self.lights.iter_mut().find(|l| l.name == name)
    }
}

impl BlobVector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: &str,
        name: &str,
        label: &str,
        group: &str,
        perm: Permission,
        timeout: f64,
        state: PropertyState,
        blobs: Vec<Blob>,
    ) -> Self {
        Self {
            device: truncate_ident(device, MAXINDIDEVICE),
            name: truncate_ident(name, MAXINDINAME),
            label: truncate_ident(label, MAXINDILABEL),
            group: truncate_ident(group, MAXINDIGROUP),
            perm,
            timeout,
            state,
            blobs,
        }
    }

    pub fn find(&self, name: &str) -> Option<&Blob> {
        self.blobs.iter().find(|b| b.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Blob> {
        self.blobs.iter_mut().find(|b| b.name == name)
    }

    pub fn apply(&mut self, uploads: Vec<BlobUpload>) -> IndiResult<()> {
        let mut targets = Vec::with_capacity(uploads.len());
        for upload in uploads {
            match self.blobs.iter().position(|b| b.name == upload.name) {
                Some(i) => targets.push((i, upload)),
                None => {
                    self.state = PropertyState::Idle;
                    return Err(IndiError::UnknownMember {
                        name: self.name.clone(),
                        label: self.label.clone(),
                        member: upload.name,
                    });
                }
            }
        }

        for (i, upload) in targets {
            let blob = &mut self.blobs[i];
            blob.size = upload.size;
            blob.format = truncate_ident(&upload.format, MAXINDIBLOBFMT);
            blob.data = upload.data;
        }
        Ok(())
    }
}

impl PropertyVector for SwitchVector {
    const KIND: PropertyKind = PropertyKind::Switch;

    fn device(&self) -> &str {
        &self.device
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn label(&self) -> &str {
        &self.label
    }
    fn perm(&self) -> Permission {
        self.perm
    }
    fn state(&self) -> PropertyState {
        self.state
    }
    fn set_state(&mut self, state: PropertyState) {
        self.state = state;
    }
}

impl PropertyVector for NumberVector {
    const KIND: PropertyKind = PropertyKind::Number;

    fn device(&self) -> &str {
        &self.device
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn label(&self) -> &str {
        &self.label
    }
    fn perm(&self) -> Permission {
        self.perm
    }
    fn state(&self) -> PropertyState {
        self.state
    }
    fn set_state(&mut self, state: PropertyState) {
        self.state = state;
    }
}

impl PropertyVector for TextVector {
    const KIND: PropertyKind = PropertyKind::Text;

    fn device(&self) -> &str {
        &self.device
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn label(&self) -> &str {
        &self.label
    }
    fn perm(&self) -> Permission {
        self.perm
    }
    fn state(&self) -> PropertyState {
        self.state
    }
    fn set_state(&mut self, state: PropertyState) {
        self.state = state;
    }
}

impl PropertyVector for LightVector {
    const KIND: PropertyKind = PropertyKind::Light;

    fn device(&self) -> &str {
        &self.device
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn label(&self) -> &str {
        &self.label
    }
    fn perm(&self) -> Permission {
        Permission::ReadOnly
    }
    fn state(&self) -> PropertyState {
        self.state
    }
    fn set_state(&mut self, state: PropertyState) {
        self.state = state;
    }
}

impl PropertyVector for BlobVector {
    const KIND: PropertyKind = PropertyKind::Blob;

    fn device(&self) -> &str {
        &self.device
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn label(&self) -> &str {
        &self.label
    }
    fn perm(&self) -> Permission {
        self.perm
    }
    fn state(&self) -> PropertyState {
        self.state
    }
    fn set_state(&mut self, state: PropertyState) {
        self.state = state;
    }
}

/// Name of the first On switch in a parallel states/names pair.
pub fn find_on_switch_name<'a>(states: &[SwitchState], names: &[&'a str]) -> Option<&'a str> {
    states
        .iter()
        .zip(names)
        .find(|(s, _)| **s == SwitchState::On)
        .map(|(_, n)| *n)
}

/// Index of `needle` among `names`.
pub fn find_index(needle: &str, names: &[&str]) -> Option<usize> {
    names.iter().position(|n| *n == needle)
}
