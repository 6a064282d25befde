//! Inbound message dispatch
//!
//! Turns one parsed top-level element into a driver callback:
//!
//! - `getProperties` is answered from the registry when it names a single
//!   known property, otherwise handed to [`Driver::get_properties`].
//! - `set*`/`def*Vector`, `message` and `delProperty` come from snooped
//!   devices and go to [`Driver::snoop`].
//! - `new*Vector` is checked against the registry (defined, writable),
//!   its members are collected into parallel name/value slices and the
//!   matching `new_*` callback runs.
//!
//! Rejected writes are reported to the client before the error is
//! returned: a read-only vector goes to Alert and is republished, an
//! undefined property or unknown command becomes a device message.

use crate::context::IndiContext;
use crate::error::{IndiError, IndiResult};
use crate::numfmt::{atof, scan_sexa};
use crate::property::BlobUpload;
use crate::protocol::{Permission, SwitchState, INDIV};
use crate::timer::{TimerId, WorkProcId};
use crate::wire::decode_blob;
use crate::xml::XmlElement;

/// Callbacks a device driver implements.
///
/// Every callback gets the context so it can publish updates. Errors a
/// callback returns are logged by the event loop; anything the client
/// should see must be published by the driver itself.
pub trait Driver {
    /// A client asked for definitions, for one device or all of them.
    fn get_properties(&mut self, ctx: &IndiContext, device: Option<&str>) -> IndiResult<()>;

    fn new_switch(
        &mut self,
        _ctx: &IndiContext,
        _device: &str,
        _name: &str,
        _states: &[SwitchState],
        _names: &[&str],
    ) -> IndiResult<()> {
        Ok(())
    }

    fn new_number(
        &mut self,
        _ctx: &IndiContext,
        _device: &str,
        _name: &str,
        _values: &[f64],
        _names: &[&str],
    ) -> IndiResult<()> {
        Ok(())
    }

    fn new_text(
        &mut self,
        _ctx: &IndiContext,
        _device: &str,
        _name: &str,
        _texts: &[&str],
        _names: &[&str],
    ) -> IndiResult<()> {
        Ok(())
    }

    fn new_blob(
        &mut self,
        _ctx: &IndiContext,
        _device: &str,
        _name: &str,
        _blobs: Vec<BlobUpload>,
    ) -> IndiResult<()> {
        Ok(())
    }

    /// Traffic from another device this driver asked to snoop on.
    fn snoop(&mut self, _ctx: &IndiContext, _root: &XmlElement) -> IndiResult<()> {
        Ok(())
    }

    fn timer_fired(&mut self, _ctx: &IndiContext, _id: TimerId) -> IndiResult<()> {
        Ok(())
    }

    /// One slice of background work, run when the loop is idle.
    fn work_proc(&mut self, _ctx: &IndiContext, _id: WorkProcId) -> IndiResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    verbose: bool,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log every inbound element before dispatching it.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn dispatch<D: Driver + ?Sized>(
        &self,
        ctx: &IndiContext,
        driver: &mut D,
        root: &XmlElement,
    ) -> IndiResult<()> {
        if self.verbose {
            tracing::debug!(target: "indi::wire", "<- {}", root.to_xml().trim_end());
        }

        let tag = root.tag.as_str();
        if tag == "getProperties" {
            return self.get_properties(ctx, driver, root);
        }

        if tag.starts_with("set")
            || tag.starts_with("def")
            || tag == "message"
            || tag == "delProperty"
        {
            return driver.snoop(ctx, root);
        }

        let (device, name) = root.crack_dn()?;

        let Some(entry) = ctx.find_property(device, name) else {
            return reject(
                ctx,
                device,
                IndiError::PropertyNotDefined {
                    device: device.to_string(),
                    name: name.to_string(),
                },
            );
        };
        if entry.perm == Permission::ReadOnly {
            let err = IndiError::ReadOnly {
                device: device.to_string(),
                name: name.to_string(),
            };
            ctx.alert(&entry.handle, &err.to_string())?;
            return Err(err);
        }

        match tag {
            "newNumberVector" => {
                let mut values = Vec::new();
                let mut names = Vec::new();
                for member in root.members("Number").filter(|m| m.tag == "oneNumber") {
                    let Some(member_name) = member.attr("name") else {
                        continue;
                    };
                    match scan_sexa(member.pcdata()) {
                        Some(v) => {
                            values.push(v);
                            names.push(member_name);
                        }
                        None => report_member_error(
                            ctx,
                            device,
                            IndiError::BadNumber {
                                name: name.to_string(),
                                value: member.pcdata().to_string(),
                            },
                        )?,
                    }
                }
                if names.is_empty() {
                    return no_valid_members(ctx, device, name, tag);
                }
                driver.new_number(ctx, device, name, &values, &names)
            }
            "newSwitchVector" => {
                let mut states = Vec::new();
                let mut names = Vec::new();
                for member in root.members("Switch").filter(|m| m.tag == "oneSwitch") {
                    let Some(member_name) = member.attr("name") else {
                        continue;
                    };
                    match SwitchState::parse(member.pcdata()) {
                        Some(s) => {
                            states.push(s);
                            names.push(member_name);
                        }
                        None => report_member_error(
                            ctx,
                            device,
                            IndiError::InvalidSwitchState {
                                name: name.to_string(),
                                value: member.pcdata().to_string(),
                            },
                        )?,
                    }
                }
                if names.is_empty() {
                    return no_valid_members(ctx, device, name, tag);
                }
                driver.new_switch(ctx, device, name, &states, &names)
            }
            "newTextVector" => {
                let mut texts = Vec::new();
                let mut names = Vec::new();
                for member in root.members("Text").filter(|m| m.tag == "oneText") {
                    if let Some(member_name) = member.attr("name") {
                        texts.push(member.pcdata());
                        names.push(member_name);
                    }
                }
                if names.is_empty() {
                    return no_valid_members(ctx, device, name, tag);
                }
                driver.new_text(ctx, device, name, &texts, &names)
            }
            "newBLOBVector" => {
                let mut blobs = Vec::new();
                for member in root.members("BLOB").filter(|m| m.tag == "oneBLOB") {
                    let (Some(member_name), Some(format), Some(size)) =
                        (member.attr("name"), member.attr("format"), member.attr("size"))
                    else {
                        continue;
                    };
                    let enclen = member.attr("enclen").map(|v| atof(v).max(0.0) as usize);
                    blobs.push(BlobUpload {
                        name: member_name.to_string(),
                        size: atof(size).max(0.0) as usize,
                        format: format.to_string(),
                        data: decode_blob(member.pcdata(), enclen),
                    });
                }
                if blobs.is_empty() {
                    return no_valid_members(ctx, device, name, tag);
                }
                driver.new_blob(ctx, device, name, blobs)
            }
            _ => reject(ctx, device, IndiError::UnknownCommand(tag.to_string())),
        }
    }

    fn get_properties<D: Driver + ?Sized>(
        &self,
        ctx: &IndiContext,
        driver: &mut D,
        root: &XmlElement,
    ) -> IndiResult<()> {
        let version = root.attr("version").ok_or(IndiError::MissingVersion)?;
        let client = atof(version);
        if client > INDIV {
            return Err(IndiError::VersionMismatch {
                client,
                supported: INDIV,
            });
        }

        let device = root.attr("device");
        if let (Some(device), Some(name)) = (device, root.attr("name")) {
            if let Some(entry) = ctx.find_property(device, name) {
                ctx.emit(&entry.handle.def_xml())?;
            }
            return Ok(());
        }
        driver.get_properties(ctx, device)
    }
}

fn report_member_error(ctx: &IndiContext, device: &str, err: IndiError) -> IndiResult<()> {
    tracing::warn!("{}: {}", device, err);
    ctx.message(Some(device), &format!("[ERROR] {}", err))
}

/// Tell the client about a dropped message, then hand the error back.
fn reject(ctx: &IndiContext, device: &str, err: IndiError) -> IndiResult<()> {
    ctx.message(Some(device), &format!("[ERROR] {}", err))?;
    Err(err)
}

fn no_valid_members(ctx: &IndiContext, device: &str, name: &str, tag: &str) -> IndiResult<()> {
    report_member_error(
        ctx,
        device,
        IndiError::NoValidMembers {
            device: device.to_string(),
            name: name.to_string(),
            tag: tag.to_string(),
        },
    )
}
