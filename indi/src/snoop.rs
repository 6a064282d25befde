//! Helpers for reading snooped traffic into local vectors
//!
//! A driver that snoops another device keeps its own copy of the remote
//! vector and feeds each forwarded def/set element through one of these.
//! Number and text copies need every member present in the element;
//! lights, switches and BLOBs accept partial updates.

use crate::error::{IndiError, IndiResult};
use crate::numfmt::{atof, scan_sexa};
use crate::property::{BlobVector, LightVector, NumberVector, SwitchVector, TextVector};
use crate::protocol::{PropertyState, SwitchState};
use crate::wire::decode_blob;
use crate::xml::XmlElement;

fn mismatch(device: &str, name: &str) -> IndiError {
    IndiError::SnoopMismatch {
        device: device.to_string(),
        name: name.to_string(),
    }
}

/// Check tag family and (device, name), then pick up the state.
fn check_root(
    root: &XmlElement,
    vector_tag: &str,
    device: &str,
    name: &str,
) -> IndiResult<Option<PropertyState>> {
    if root.tag.get(3..) != Some(vector_tag) {
        return Err(mismatch(device, name));
    }
    let (rdev, rname) = root.crack_dn()?;
    if rdev != device || rname != name {
        return Err(mismatch(device, name));
    }
    Ok(root.attr("state").and_then(PropertyState::parse))
}

fn find_member<'a>(root: &'a XmlElement, tag: &'a str, name: &str) -> Option<&'a XmlElement> {
    root.members(tag).find(|m| m.attr("name") == Some(name))
}

pub fn snoop_number(root: &XmlElement, nvp: &mut NumberVector) -> IndiResult<()> {
    let state = check_root(root, "NumberVector", &nvp.device, &nvp.name)?;

    let mut values = Vec::with_capacity(nvp.numbers.len());
    for n in &nvp.numbers {
        let value = find_member(root, "Number", &n.name)
            .and_then(|m| scan_sexa(m.pcdata()))
            .ok_or_else(|| mismatch(&nvp.device, &nvp.name))?;
        values.push(value);
    }

    if let Some(s) = state {
        nvp.state = s;
    }
    for (n, v) in nvp.numbers.iter_mut().zip(values) {
        n.value = v;
    }
    Ok(())
}

pub fn snoop_text(root: &XmlElement, tvp: &mut TextVector) -> IndiResult<()> {
    let state = check_root(root, "TextVector", &tvp.device, &tvp.name)?;

    let mut texts = Vec::with_capacity(tvp.texts.len());
    for t in &tvp.texts {
        let member = find_member(root, "Text", &t.name)
            .ok_or_else(|| mismatch(&tvp.device, &tvp.name))?;
        texts.push(member.pcdata().to_string());
    }

    if let Some(s) = state {
        tvp.state = s;
    }
    for (t, text) in tvp.texts.iter_mut().zip(texts) {
        t.text = text;
    }
    Ok(())
}

pub fn snoop_light(root: &XmlElement, lvp: &mut LightVector) -> IndiResult<()> {
    let state = check_root(root, "LightVector", &lvp.device, &lvp.name)?;
    if let Some(s) = state {
        lvp.state = s;
    }
    for l in &mut lvp.lights {
        if let Some(s) =
            find_member(root, "Light", &l.name).and_then(|m| PropertyState::parse(m.pcdata()))
        {
            l.state = s;
        }
    }
    Ok(())
}

pub fn snoop_switch(root: &XmlElement, svp: &mut SwitchVector) -> IndiResult<()> {
    let state = check_root(root, "SwitchVector", &svp.device, &svp.name)?;
    if let Some(s) = state {
        svp.state = s;
    }
    for sw in &mut svp.switches {
        if let Some(s) =
            find_member(root, "Switch", &sw.name).and_then(|m| SwitchState::parse(m.pcdata()))
        {
            sw.state = s;
        }
    }
    Ok(())
}

/// Only `setBLOBVector` carries data, so other forms are rejected.
pub fn snoop_blob(root: &XmlElement, bvp: &mut BlobVector) -> IndiResult<()> {
    if root.tag != "setBLOBVector" {
        return Err(mismatch(&bvp.device, &bvp.name));
    }
    let state = check_root(root, "BLOBVector", &bvp.device, &bvp.name)?;
    if let Some(s) = state {
        bvp.state = s;
    }
    for b in &mut bvp.blobs {
        let Some(member) = find_member(root, "BLOB", &b.name) else {
            continue;
        };
        let (Some(format), Some(size)) = (member.attr("format"), member.attr("size")) else {
            continue;
        };
        let enclen = member.attr("enclen").map(|v| atof(v).max(0.0) as usize);
        b.data = decode_blob(member.pcdata(), enclen);
        b.size = atof(size).max(0.0) as usize;
        b.format = format.to_string();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{Blob, Light, Number, Switch, Text};
    use crate::protocol::Permission;
    use crate::wire;
    use crate::xml::parse_elements;

    fn element(xml: &str) -> XmlElement {
        parse_elements(xml).unwrap().remove(0)
    }

    fn remote_coords() -> NumberVector {
        NumberVector::new(
            "Mount",
            "EQUATORIAL_EOD_COORD",
            "Coords",
            "Main",
            Permission::ReadWrite,
            0.0,
            PropertyState::Idle,
            vec![
                Number::new("RA", "RA", "%10.6m", 0.0, 24.0, 0.0, 0.0),
                Number::new("DEC", "Dec", "%10.6m", -90.0, 90.0, 0.0, 0.0),
            ],
        )
    }

    #[test]
    fn test_snoop_number_needs_all_members() {
        let mut nvp = remote_coords();
        let full = element(
            "<setNumberVector device='Mount' name='EQUATORIAL_EOD_COORD' state='Busy'>\
             <oneNumber name='RA'>12:30:00</oneNumber>\
             <oneNumber name='DEC'>-45.5</oneNumber>\
             </setNumberVector>",
        );
        snoop_number(&full, &mut nvp).unwrap();
        assert_eq!(nvp.state, PropertyState::Busy);
        assert_eq!(nvp.find("RA").unwrap().value, 12.5);
        assert_eq!(nvp.find("DEC").unwrap().value, -45.5);

        let partial = element(
            "<setNumberVector device='Mount' name='EQUATORIAL_EOD_COORD' state='Ok'>\
             <oneNumber name='RA'>1</oneNumber>\
             </setNumberVector>",
        );
        assert!(snoop_number(&partial, &mut nvp).is_err());
        assert_eq!(nvp.find("RA").unwrap().value, 12.5);
        assert_eq!(nvp.state, PropertyState::Busy);
    }

    #[test]
    fn test_snoop_rejects_other_vectors() {
        let mut nvp = remote_coords();
        let other = element("<setNumberVector device='Mount' name='OTHER'/>");
        assert!(snoop_number(&other, &mut nvp).is_err());
        let wrong_kind = element("<setTextVector device='Mount' name='EQUATORIAL_EOD_COORD'/>");
        assert!(snoop_number(&wrong_kind, &mut nvp).is_err());
    }

    #[test]
    fn test_snoop_switch_partial() {
        let mut svp = SwitchVector::new(
            "Mount",
            "PARK",
            "Park",
            "Main",
            Permission::ReadWrite,
            crate::protocol::SwitchRule::OneOfMany,
            0.0,
            PropertyState::Idle,
            vec![
                Switch::new("PARK", "Park", SwitchState::Off),
                Switch::new("UNPARK", "Unpark", SwitchState::On),
            ],
        );
        let el = element(
            "<defSwitchVector device='Mount' name='PARK' state='Ok'>\
             <defSwitch name='PARK'>On</defSwitch>\
             </defSwitchVector>",
        );
        snoop_switch(&el, &mut svp).unwrap();
        assert_eq!(svp.find("PARK").unwrap().state, SwitchState::On);
        assert_eq!(svp.find("UNPARK").unwrap().state, SwitchState::On);
        assert_eq!(svp.state, PropertyState::Ok);
    }

    #[test]
    fn test_snoop_text_and_light() {
        let mut tvp = TextVector::new(
            "Mount",
            "SITE",
            "Site",
            "Main",
            Permission::ReadOnly,
            0.0,
            PropertyState::Idle,
            vec![Text::new("NAME", "Name", "")],
        );
        let el = element(
            "<setTextVector device='Mount' name='SITE'><oneText name='NAME'>Obs &amp; Co</oneText></setTextVector>",
        );
        snoop_text(&el, &mut tvp).unwrap();
        assert_eq!(tvp.texts[0].text, "Obs & Co");

        let mut lvp = LightVector::new(
            "Mount",
            "STATUS",
            "Status",
            "Main",
            PropertyState::Idle,
            vec![
                Light::new("A", "A", PropertyState::Idle),
                Light::new("B", "B", PropertyState::Idle),
            ],
        );
        let el = element(
            "<setLightVector device='Mount' name='STATUS'><oneLight name='B'>Alert</oneLight></setLightVector>",
        );
        snoop_light(&el, &mut lvp).unwrap();
        assert_eq!(lvp.lights[0].state, PropertyState::Idle);
        assert_eq!(lvp.lights[1].state, PropertyState::Alert);
    }

    #[test]
    fn test_snoop_blob_from_set_only() {
        let mut remote = BlobVector::new(
            "Cam",
            "CCD1",
            "Image",
            "Main",
            Permission::ReadOnly,
            0.0,
            PropertyState::Ok,
            vec![Blob::new("CCD1", "Image", ".fits")],
        );
        remote.blobs[0].data = b"SIMPLE  =  T".to_vec();
        remote.blobs[0].size = remote.blobs[0].data.len();
        let set = element(&wire::set_blob_xml(&remote, None));

        let mut local = BlobVector::new(
            "Cam",
            "CCD1",
            "Image",
            "Main",
            Permission::ReadOnly,
            0.0,
            PropertyState::Idle,
            vec![Blob::new("CCD1", "Image", "")],
        );
        snoop_blob(&set, &mut local).unwrap();
        assert_eq!(local.blobs[0].data, b"SIMPLE  =  T".to_vec());
        assert_eq!(local.blobs[0].size, 12);
        assert_eq!(local.blobs[0].format, ".fits");

        let def = element(&wire::def_blob_xml(&remote, None));
        assert!(snoop_blob(&def, &mut local).is_err());
    }
}
