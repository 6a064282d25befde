//! Driver-side output and shared state
//!
//! [`IndiContext`] is what a driver talks to: it serializes every
//! outbound element under one lock so concurrent emitters never
//! interleave, records definitions in the registry, and owns the timer
//! queue driven by the event loop.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::IndiResult;
use crate::property::{
    lock, BlobUpload, BlobVector, LightVector, NumberVector, PropertyVector, Shared,
    SwitchVector, TextVector,
};
use crate::protocol::{BlobHandling, Permission, PropertyState, SwitchState};
use crate::registry::{PropertyHandle, Registry, RegistryEntry};
use crate::timer::{TimerId, TimerQueue, WorkProcId, WorkQueue};
use crate::wire;

pub struct IndiContext {
    output: Mutex<Box<dyn Write + Send>>,
    registry: Mutex<Registry>,
    timers: Mutex<TimerQueue>,
    work: Mutex<WorkQueue>,
}

impl IndiContext {
    pub fn new(output: impl Write + Send + 'static) -> Self {
        Self {
            output: Mutex::new(Box::new(output)),
            registry: Mutex::new(Registry::new()),
            timers: Mutex::new(TimerQueue::new()),
            work: Mutex::new(WorkQueue::new()),
        }
    }

    /// Context writing to the process's stdout.
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    /// Write one complete element and flush.
    pub fn emit(&self, xml: &str) -> IndiResult<()> {
        tracing::trace!(target: "indi::wire", "-> {}", xml.trim_end());
        let mut out = lock(&self.output);
        out.write_all(xml.as_bytes())?;
        out.flush()?;
        Ok(())
    }

    fn register(&self, device: &str, name: &str, perm: Permission, handle: PropertyHandle) {
        let added = lock(&self.registry).insert(RegistryEntry {
            device: device.to_string(),
            name: name.to_string(),
            perm,
            handle,
        });
        if !added {
            tracing::debug!("{}.{} already registered, keeping first definition", device, name);
        }
    }

    pub fn def_text(&self, tvp: &Shared<TextVector>, message: Option<&str>) -> IndiResult<()> {
        let (xml, device, name, perm) = {
            let v = lock(tvp);
            (wire::def_text_xml(&v, message), v.device.clone(), v.name.clone(), v.perm)
        };
        self.emit(&xml)?;
        self.register(&device, &name, perm, PropertyHandle::Text(Arc::clone(tvp)));
        Ok(())
    }

    pub fn def_number(&self, nvp: &Shared<NumberVector>, message: Option<&str>) -> IndiResult<()> {
        let (xml, device, name, perm) = {
            let v = lock(nvp);
            (wire::def_number_xml(&v, message), v.device.clone(), v.name.clone(), v.perm)
        };
        self.emit(&xml)?;
        self.register(&device, &name, perm, PropertyHandle::Number(Arc::clone(nvp)));
        Ok(())
    }

    pub fn def_switch(&self, svp: &Shared<SwitchVector>, message: Option<&str>) -> IndiResult<()> {
        let (xml, device, name, perm) = {
            let v = lock(svp);
            (wire::def_switch_xml(&v, message), v.device.clone(), v.name.clone(), v.perm)
        };
        self.emit(&xml)?;
        self.register(&device, &name, perm, PropertyHandle::Switch(Arc::clone(svp)));
        Ok(())
    }

    /// Lights register as read-only.
    pub fn def_light(&self, lvp: &Shared<LightVector>, message: Option<&str>) -> IndiResult<()> {
        let (xml, device, name, perm) = {
            let v = lock(lvp);
            (wire::def_light_xml(&v, message), v.device.clone(), v.name.clone(), v.perm())
        };
        self.emit(&xml)?;
        self.register(&device, &name, perm, PropertyHandle::Light(Arc::clone(lvp)));
        Ok(())
    }

    pub fn def_blob(&self, bvp: &Shared<BlobVector>, message: Option<&str>) -> IndiResult<()> {
        let (xml, device, name, perm) = {
            let v = lock(bvp);
            (wire::def_blob_xml(&v, message), v.device.clone(), v.name.clone(), v.perm)
        };
        self.emit(&xml)?;
        self.register(&device, &name, perm, PropertyHandle::Blob(Arc::clone(bvp)));
        Ok(())
    }

    pub fn set_text(&self, tvp: &TextVector, message: Option<&str>) -> IndiResult<()> {
        self.emit(&wire::set_text_xml(tvp, message))
    }

    pub fn set_number(&self, nvp: &NumberVector, message: Option<&str>) -> IndiResult<()> {
        self.emit(&wire::set_number_xml(nvp, message))
    }

    pub fn set_switch(&self, svp: &SwitchVector, message: Option<&str>) -> IndiResult<()> {
        self.emit(&wire::set_switch_xml(svp, message))
    }

    pub fn set_light(&self, lvp: &LightVector, message: Option<&str>) -> IndiResult<()> {
        self.emit(&wire::set_light_xml(lvp, message))
    }

    pub fn set_blob(&self, bvp: &BlobVector, message: Option<&str>) -> IndiResult<()> {
        self.emit(&wire::set_blob_xml(bvp, message))
    }

    /// Republish a number vector including min, max and step.
    pub fn update_min_max(&self, nvp: &NumberVector) -> IndiResult<()> {
        self.emit(&wire::min_max_xml(nvp))
    }

    /// Send a message, scoped to `device` or global.
    pub fn message(&self, device: Option<&str>, message: &str) -> IndiResult<()> {
        self.emit(&wire::message_xml(device, Some(message)))
    }

    /// Tell clients a property, or all of a device's properties, is gone.
    pub fn delete(
        &self,
        device: &str,
        name: Option<&str>,
        message: Option<&str>,
    ) -> IndiResult<()> {
        self.emit(&wire::del_property_xml(device, name, message))
    }

    /// Set a registered vector to Alert and republish it with `message`.
    pub fn alert(&self, handle: &PropertyHandle, message: &str) -> IndiResult<()> {
        match handle {
            PropertyHandle::Number(v) => {
                let mut v = lock(v);
                v.state = PropertyState::Alert;
                self.set_number(&v, Some(message))
            }
            PropertyHandle::Switch(v) => {
                let mut v = lock(v);
                v.state = PropertyState::Alert;
                self.set_switch(&v, Some(message))
            }
            PropertyHandle::Text(v) => {
                let mut v = lock(v);
                v.state = PropertyState::Alert;
                self.set_text(&v, Some(message))
            }
            PropertyHandle::Light(v) => {
                let mut v = lock(v);
                v.state = PropertyState::Alert;
                self.set_light(&v, Some(message))
            }
            PropertyHandle::Blob(v) => {
                let mut v = lock(v);
                v.state = PropertyState::Alert;
                self.set_blob(&v, Some(message))
            }
        }
    }

    /// Ask the server to forward another device's traffic to us.
    pub fn snoop_device(&self, device: &str, name: Option<&str>) -> IndiResult<()> {
        self.emit(&wire::get_properties_xml(device, name))
    }

    pub fn snoop_blobs(
        &self,
        device: &str,
        name: Option<&str>,
        handling: BlobHandling,
    ) -> IndiResult<()> {
        self.emit(&wire::enable_blob_xml(device, name, handling))
    }

    /// Apply a client switch update. A rejected update is republished
    /// with the reason before the error is returned.
    pub fn update_switch(
        &self,
        svp: &mut SwitchVector,
        states: &[SwitchState],
        names: &[&str],
    ) -> IndiResult<()> {
        if let Err(e) = svp.apply(states, names) {
            tracing::warn!("{}.{}: {}", svp.device, svp.name, e);
            self.set_switch(svp, Some(&e.to_string()))?;
            return Err(e);
        }
        Ok(())
    }

    pub fn update_number(
        &self,
        nvp: &mut NumberVector,
        values: &[f64],
        names: &[&str],
    ) -> IndiResult<()> {
        if let Err(e) = nvp.apply(values, names) {
            tracing::warn!("{}.{}: {}", nvp.device, nvp.name, e);
            self.set_number(nvp, Some(&e.to_string()))?;
            return Err(e);
        }
        Ok(())
    }

    pub fn update_text(
        &self,
        tvp: &mut TextVector,
        texts: &[&str],
        names: &[&str],
    ) -> IndiResult<()> {
        if let Err(e) = tvp.apply(texts, names) {
            tracing::warn!("{}.{}: {}", tvp.device, tvp.name, e);
            self.set_text(tvp, Some(&e.to_string()))?;
            return Err(e);
        }
        Ok(())
    }

    pub fn update_blob(&self, bvp: &mut BlobVector, uploads: Vec<BlobUpload>) -> IndiResult<()> {
        if let Err(e) = bvp.apply(uploads) {
            tracing::warn!("{}.{}: {}", bvp.device, bvp.name, e);
            self.set_blob(bvp, Some(&e.to_string()))?;
            return Err(e);
        }
        Ok(())
    }

    /// Registered definition for (device, name).
    pub fn find_property(&self, device: &str, name: &str) -> Option<RegistryEntry> {
        lock(&self.registry).find(device, name).cloned()
    }

    /// Fire `timer_fired` once after `delay`.
    pub fn add_timer(&self, delay: Duration) -> TimerId {
        lock(&self.timers).add(Instant::now(), delay, None)
    }

    /// Fire `timer_fired` every `period` until removed.
    pub fn add_periodic_timer(&self, period: Duration) -> TimerId {
        lock(&self.timers).add(Instant::now(), period, Some(period))
    }

    pub fn remove_timer(&self, id: TimerId) -> bool {
        lock(&self.timers).remove(id)
    }

    pub fn remaining_timer(&self, id: TimerId) -> Option<Duration> {
        lock(&self.timers).remaining(id, Instant::now())
    }

    pub(crate) fn next_timer_deadline(&self) -> Option<Instant> {
        lock(&self.timers).next_deadline()
    }

    pub(crate) fn take_due_timers(&self, now: Instant) -> Vec<TimerId> {
        lock(&self.timers).take_due(now)
    }

    /// Call `work_proc` whenever the loop is otherwise idle, until removed.
    pub fn add_work_proc(&self) -> WorkProcId {
        lock(&self.work).add()
    }

    pub fn remove_work_proc(&self, id: WorkProcId) -> bool {
        lock(&self.work).remove(id)
    }

    pub(crate) fn has_work_procs(&self) -> bool {
        !lock(&self.work).is_empty()
    }

    pub(crate) fn next_work_proc(&self) -> Option<WorkProcId> {
        lock(&self.work).next()
    }
}

/// In-memory sink for capturing emitted XML.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&lock(&self.0)).to_string()
    }

    /// Return and clear everything captured so far.
    pub fn take(&self) -> String {
        let bytes = std::mem::take(&mut *lock(&self.0));
        String::from_utf8_lossy(&bytes).to_string()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        lock(&self.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{shared, Light, Number, Switch, Text};
    use crate::protocol::{PropertyKind, SwitchRule};

    fn context() -> (IndiContext, SharedBuffer) {
        let buf = SharedBuffer::new();
        (IndiContext::new(buf.clone()), buf)
    }

    #[test]
    fn test_def_registers_property() {
        let (ctx, buf) = context();
        let nvp = shared(NumberVector::new(
            "Dev",
            "TEMP",
            "Temperature",
            "Main",
            Permission::ReadOnly,
            0.0,
            PropertyState::Idle,
            vec![Number::new("TEMP", "T", "%g", -30.0, 40.0, 0.0, 0.0)],
        ));
        ctx.def_number(&nvp, None).unwrap();
        assert!(buf.contents().contains("<defNumberVector device='Dev' name='TEMP'"));

        let entry = ctx.find_property("Dev", "TEMP").unwrap();
        assert_eq!(entry.perm, Permission::ReadOnly);
        assert_eq!(entry.kind(), PropertyKind::Number);
        assert!(ctx.find_property("Dev", "OTHER").is_none());
    }

    #[test]
    fn test_lights_register_read_only() {
        let (ctx, _buf) = context();
        let lvp = shared(LightVector::new(
            "Dev",
            "STATUS",
            "Status",
            "Main",
            PropertyState::Idle,
            vec![Light::new("L", "L", PropertyState::Idle)],
        ));
        ctx.def_light(&lvp, None).unwrap();
        assert_eq!(
            ctx.find_property("Dev", "STATUS").unwrap().perm,
            Permission::ReadOnly
        );
    }

    #[test]
    fn test_rejected_update_is_republished() {
        let (ctx, buf) = context();
        let mut svp = SwitchVector::new(
            "Dev",
            "MODE",
            "Mode",
            "Main",
            Permission::ReadWrite,
            SwitchRule::OneOfMany,
            0.0,
            PropertyState::Ok,
            vec![
                Switch::new("A", "A", SwitchState::On),
                Switch::new("B", "B", SwitchState::Off),
            ],
        );
        assert!(ctx.update_switch(&mut svp, &[SwitchState::Off], &["A"]).is_err());
        let out = buf.take();
        assert!(out.contains("<setSwitchVector device='Dev' name='MODE' state='Alert'"));
        assert!(out.contains("No switch is on"));

        ctx.update_switch(&mut svp, &[SwitchState::On], &["B"]).unwrap();
        assert!(buf.take().is_empty());
    }

    #[test]
    fn test_message_and_snoop_requests() {
        let (ctx, buf) = context();
        ctx.message(None, "hello").unwrap();
        ctx.snoop_device("Mount", Some("EQUATORIAL_EOD_COORD")).unwrap();
        ctx.snoop_blobs("Cam", None, BlobHandling::Only).unwrap();
        let out = buf.contents();
        assert!(out.contains("<message timestamp="));
        assert!(out.contains(
            "<getProperties version='1.7' device='Mount' name='EQUATORIAL_EOD_COORD'/>"
        ));
        assert!(out.contains("<enableBLOB device='Cam'>Only</enableBLOB>"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_bookkeeping() {
        let (ctx, _buf) = context();
        let id = ctx.add_timer(Duration::from_millis(250));
        assert_eq!(ctx.remaining_timer(id), Some(Duration::from_millis(250)));
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(ctx.remaining_timer(id), Some(Duration::from_millis(150)));
        assert!(ctx.remove_timer(id));
        assert!(ctx.next_timer_deadline().is_none());
    }

    #[test]
    fn test_alert_republishes_registered_vector() {
        let (ctx, buf) = context();
        let tvp = shared(TextVector::new(
            "Dev",
            "PORT",
            "Port",
            "Main",
            Permission::ReadWrite,
            0.0,
            PropertyState::Ok,
            vec![Text::new("PORT", "Port", "/dev/ttyS0")],
        ));
        ctx.def_text(&tvp, None).unwrap();
        buf.take();

        let entry = ctx.find_property("Dev", "PORT").unwrap();
        ctx.alert(&entry.handle, "port vanished").unwrap();
        let out = buf.take();
        assert!(out.contains("<setTextVector device='Dev' name='PORT' state='Alert'"));
        assert!(out.contains("message='port vanished'"));
        assert_eq!(lock(&tvp).state, PropertyState::Alert);
    }
}
