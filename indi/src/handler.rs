//! Per-property handler table
//!
//! Drivers register one function per writable property at init and route
//! their `new_*` callbacks through [`PropertyTable`] instead of comparing
//! property names by hand. Handlers are plain function pointers taking the
//! driver as `&mut D`, so lookup and invocation never borrow the table and
//! the driver at the same time.

use std::collections::HashMap;

use crate::context::IndiContext;
use crate::error::IndiResult;
use crate::property::BlobUpload;
use crate::protocol::{PropertyKind, SwitchState};

pub type SwitchHandler<D> = fn(&mut D, &IndiContext, &[SwitchState], &[&str]) -> IndiResult<()>;
pub type NumberHandler<D> = fn(&mut D, &IndiContext, &[f64], &[&str]) -> IndiResult<()>;
pub type TextHandler<D> = fn(&mut D, &IndiContext, &[&str], &[&str]) -> IndiResult<()>;
pub type BlobHandler<D> = fn(&mut D, &IndiContext, Vec<BlobUpload>) -> IndiResult<()>;

pub enum Handler<D> {
    Switch(SwitchHandler<D>),
    Number(NumberHandler<D>),
    Text(TextHandler<D>),
    Blob(BlobHandler<D>),
}

impl<D> Clone for Handler<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D> Copy for Handler<D> {}

impl<D> Handler<D> {
    pub fn kind(&self) -> PropertyKind {
        match self {
            Handler::Switch(_) => PropertyKind::Switch,
            Handler::Number(_) => PropertyKind::Number,
            Handler::Text(_) => PropertyKind::Text,
            Handler::Blob(_) => PropertyKind::Blob,
        }
    }
}

/// (device, name) → handler
pub struct PropertyTable<D> {
    handlers: HashMap<(String, String), Handler<D>>,
}

impl<D> Default for PropertyTable<D> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<D> PropertyTable<D> {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, device: &str, name: &str, handler: Handler<D>) {
        let previous = self
            .handlers
            .insert((device.to_string(), name.to_string()), handler);
        if previous.is_some() {
            tracing::warn!("Replacing handler for {}.{}", device, name);
        }
    }

    pub fn on_switch(&mut self, device: &str, name: &str, handler: SwitchHandler<D>) {
        self.insert(device, name, Handler::Switch(handler));
    }

    pub fn on_number(&mut self, device: &str, name: &str, handler: NumberHandler<D>) {
        self.insert(device, name, Handler::Number(handler));
    }

    pub fn on_text(&mut self, device: &str, name: &str, handler: TextHandler<D>) {
        self.insert(device, name, Handler::Text(handler));
    }

    pub fn on_blob(&mut self, device: &str, name: &str, handler: BlobHandler<D>) {
        self.insert(device, name, Handler::Blob(handler));
    }

    pub fn get(&self, device: &str, name: &str) -> Option<Handler<D>> {
        self.handlers
            .get(&(device.to_string(), name.to_string()))
            .copied()
    }

    pub fn switch(&self, device: &str, name: &str) -> Option<SwitchHandler<D>> {
        match self.get(device, name)? {
            Handler::Switch(h) => Some(h),
            _ => None,
        }
    }

    pub fn number(&self, device: &str, name: &str) -> Option<NumberHandler<D>> {
        match self.get(device, name)? {
            Handler::Number(h) => Some(h),
            _ => None,
        }
    }

    pub fn text(&self, device: &str, name: &str) -> Option<TextHandler<D>> {
        match self.get(device, name)? {
            Handler::Text(h) => Some(h),
            _ => None,
        }
    }

    pub fn blob(&self, device: &str, name: &str) -> Option<BlobHandler<D>> {
        match self.get(device, name)? {
            Handler::Blob(h) => Some(h),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
