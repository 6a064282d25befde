//! Outbound INDI XML rendering
//!
//! Every function here returns one complete top-level element, ready to
//! be written to the client in a single locked write. Attribute values
//! are single-quoted and escaped; numbers use the shortest text that
//! reads back to the same `f64`, independent of locale.

use std::borrow::Cow;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::numfmt::{format_g, format_value};
use crate::property::{BlobVector, LightVector, NumberVector, SwitchVector, TextVector};
use crate::protocol::{BlobHandling, INDI_PROTOCOL_VERSION};

/// base64 line length inside BLOB bodies
pub const BLOB_LINE_WIDTH: usize = 72;

/// Escape `& ' " < >` for attribute values and character data.
pub fn escape_xml(raw: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(raw)
}

/// UTC timestamp in the protocol's `YYYY-MM-DDTHH:MM:SS` form.
pub fn timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// base64 encode, wrapped every [`BLOB_LINE_WIDTH`] characters.
///
/// Returns the wrapped text and the encoded length without newlines.
pub fn encode_blob(data: &[u8]) -> (String, usize) {
    let encoded = BASE64.encode(data);
    let enclen = encoded.len();
    let mut out = String::with_capacity(enclen + enclen / BLOB_LINE_WIDTH + 1);
    for chunk in encoded.as_bytes().chunks(BLOB_LINE_WIDTH) {
        // base64 output is ASCII, so every chunk boundary is a char boundary
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    (out, enclen)
}

/// Decode a base64 BLOB body, ignoring embedded whitespace.
///
/// When `enclen` is given only that many encoded characters are used.
/// Undecodable input yields an empty buffer.
pub fn decode_blob(text: &str, enclen: Option<usize>) -> Vec<u8> {
    let mut compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if let Some(n) = enclen {
        if n < compact.len() {
            compact.truncate(n);
        }
    }
    match BASE64.decode(compact.as_bytes()) {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!("Discarding malformed BLOB body: {}", e);
            Vec::new()
        }
    }
}

/// Accumulates one element's opening tag.
struct Open {
    buf: String,
}

impl Open {
    fn new(tag: &str) -> Self {
        Self {
            buf: format!("<{}", tag),
        }
    }

    fn attr(mut self, key: &str, value: &str) -> Self {
        self.buf.push(' ');
        self.buf.push_str(key);
        self.buf.push_str("='");
        self.buf.push_str(&escape_xml(value));
        self.buf.push('\'');
        self
    }

    fn opt_attr(self, key: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.attr(key, v),
            None => self,
        }
    }

    /// Close as `<tag ...>` followed by a newline.
    fn open(mut self) -> String {
        self.buf.push_str(">\n");
        self.buf
    }

    /// Close as an empty element `<tag .../>`.
    fn empty(mut self) -> String {
        self.buf.push_str("/>\n");
        self.buf
    }
}

fn member(out: &mut String, head: Open, tag: &str, body: &str) {
    out.push_str("  ");
    let mut head = head.buf;
    head.push('>');
    out.push_str(&head);
    out.push_str("\n      ");
    out.push_str(body);
    out.push_str("\n  </");
    out.push_str(tag);
    out.push_str(">\n");
}

pub fn def_text_xml(tvp: &TextVector, message: Option<&str>) -> String {
    let mut out = Open::new("defTextVector")
        .attr("device", &tvp.device)
        .attr("name", &tvp.name)
        .attr("label", &tvp.label)
        .attr("group", &tvp.group)
        .attr("state", tvp.state.as_str())
        .attr("perm", tvp.perm.as_str())
        .attr("timeout", &format_g(tvp.timeout))
        .attr("timestamp", &timestamp())
        .opt_attr("message", message)
        .open();
    for t in &tvp.texts {
        let head = Open::new("defText").attr("name", &t.name).attr("label", &t.label);
        member(&mut out, head, "defText", &escape_xml(&t.text));
    }
    out.push_str("</defTextVector>\n");
    out
}

pub fn def_number_xml(nvp: &NumberVector, message: Option<&str>) -> String {
    let mut out = Open::new("defNumberVector")
        .attr("device", &nvp.device)
        .attr("name", &nvp.name)
        .attr("label", &nvp.label)
        .attr("group", &nvp.group)
        .attr("state", nvp.state.as_str())
        .attr("perm", nvp.perm.as_str())
        .attr("timeout", &format_g(nvp.timeout))
        .attr("timestamp", &timestamp())
        .opt_attr("message", message)
        .open();
    for n in &nvp.numbers {
        let head = Open::new("defNumber")
            .attr("name", &n.name)
            .attr("label", &n.label)
            .attr("format", &n.format)
            .attr("min", &format_value(n.min))
            .attr("max", &format_value(n.max))
            .attr("step", &format_value(n.step));
        member(&mut out, head, "defNumber", &format_value(n.value));
    }
    out.push_str("</defNumberVector>\n");
    out
}

pub fn def_switch_xml(svp: &SwitchVector, message: Option<&str>) -> String {
    let mut out = Open::new("defSwitchVector")
        .attr("device", &svp.device)
        .attr("name", &svp.name)
        .attr("label", &svp.label)
        .attr("group", &svp.group)
        .attr("state", svp.state.as_str())
        .attr("perm", svp.perm.as_str())
        .attr("rule", svp.rule.as_str())
        .attr("timeout", &format_g(svp.timeout))
        .attr("timestamp", &timestamp())
        .opt_attr("message", message)
        .open();
    for s in &svp.switches {
        let head = Open::new("defSwitch").attr("name", &s.name).attr("label", &s.label);
        member(&mut out, head, "defSwitch", s.state.as_str());
    }
    out.push_str("</defSwitchVector>\n");
    out
}

pub fn def_light_xml(lvp: &LightVector, message: Option<&str>) -> String {
    let mut out = Open::new("defLightVector")
        .attr("device", &lvp.device)
        .attr("name", &lvp.name)
        .attr("label", &lvp.label)
        .attr("group", &lvp.group)
        .attr("state", lvp.state.as_str())
        .attr("timestamp", &timestamp())
        .opt_attr("message", message)
        .open();
    for l in &lvp.lights {
        let head = Open::new("defLight").attr("name", &l.name).attr("label", &l.label);
        member(&mut out, head, "defLight", l.state.as_str());
    }
    out.push_str("</defLightVector>\n");
    out
}

pub fn def_blob_xml(bvp: &BlobVector, message: Option<&str>) -> String {
    let mut out = Open::new("defBLOBVector")
        .attr("device", &bvp.device)
        .attr("name", &bvp.name)
        .attr("label", &bvp.label)
        .attr("group", &bvp.group)
        .attr("state", bvp.state.as_str())
        .attr("perm", bvp.perm.as_str())
        .attr("timeout", &format_g(bvp.timeout))
        .attr("timestamp", &timestamp())
        .opt_attr("message", message)
        .open();
    for b in &bvp.blobs {
        out.push_str("  ");
        out.push_str(
            &Open::new("defBLOB")
                .attr("name", &b.name)
                .attr("label", &b.label)
                .empty(),
        );
    }
    out.push_str("</defBLOBVector>\n");
    out
}

pub fn set_text_xml(tvp: &TextVector, message: Option<&str>) -> String {
    let mut out = Open::new("setTextVector")
        .attr("device", &tvp.device)
        .attr("name", &tvp.name)
        .attr("state", tvp.state.as_str())
        .attr("timeout", &format_g(tvp.timeout))
        .attr("timestamp", &timestamp())
        .opt_attr("message", message)
        .open();
    for t in &tvp.texts {
        let open = Open::new("oneText").attr("name", &t.name);
        member(&mut out, open, "oneText", &escape_xml(&t.text));
    }
    out.push_str("</setTextVector>\n");
    out
}

pub fn set_number_xml(nvp: &NumberVector, message: Option<&str>) -> String {
    let mut out = Open::new("setNumberVector")
        .attr("device", &nvp.device)
        .attr("name", &nvp.name)
        .attr("state", nvp.state.as_str())
        .attr("timeout", &format_g(nvp.timeout))
        .attr("timestamp", &timestamp())
        .opt_attr("message", message)
        .open();
    for n in &nvp.numbers {
        let open = Open::new("oneNumber").attr("name", &n.name);
        member(&mut out, open, "oneNumber", &format_value(n.value));
    }
    out.push_str("</setNumberVector>\n");
    out
}

pub fn set_switch_xml(svp: &SwitchVector, message: Option<&str>) -> String {
    let mut out = Open::new("setSwitchVector")
        .attr("device", &svp.device)
        .attr("name", &svp.name)
        .attr("state", svp.state.as_str())
        .attr("timeout", &format_g(svp.timeout))
        .attr("timestamp", &timestamp())
        .opt_attr("message", message)
        .open();
    for s in &svp.switches {
        let open = Open::new("oneSwitch").attr("name", &s.name);
        member(&mut out, open, "oneSwitch", s.state.as_str());
    }
    out.push_str("</setSwitchVector>\n");
    out
}

pub fn set_light_xml(lvp: &LightVector, message: Option<&str>) -> String {
    let mut out = Open::new("setLightVector")
        .attr("device", &lvp.device)
        .attr("name", &lvp.name)
        .attr("state", lvp.state.as_str())
        .attr("timestamp", &timestamp())
        .opt_attr("message", message)
        .open();
    for l in &lvp.lights {
        member(&mut out, Open::new("oneLight").attr("name", &l.name), "oneLight", l.state.as_str());
    }
    out.push_str("</setLightVector>\n");
    out
}

pub fn set_blob_xml(bvp: &BlobVector, message: Option<&str>) -> String {
    let mut out = Open::new("setBLOBVector")
        .attr("device", &bvp.device)
        .attr("name", &bvp.name)
        .attr("state", bvp.state.as_str())
        .attr("timeout", &format_g(bvp.timeout))
        .attr("timestamp", &timestamp())
        .opt_attr("message", message)
        .open();
    for b in &bvp.blobs {
        blob_member(&mut out, &b.name, b.size, &b.format, &b.data);
    }
    out.push_str("</setBLOBVector>\n");
    out
}

fn blob_member(out: &mut String, name: &str, size: usize, format: &str, data: &[u8]) {
    let head = Open::new("oneBLOB").attr("name", name).attr("size", &size.to_string());
    out.push_str("  ");
    if size == 0 || data.is_empty() {
        out.push_str(&head.attr("enclen", "0").attr("format", format).empty());
        return;
    }
    let (body, enclen) = encode_blob(data);
    out.push_str(
        &head
            .attr("enclen", &enclen.to_string())
            .attr("format", format)
            .open(),
    );
    out.push_str(&body);
    out.push_str("  </oneBLOB>\n");
}

/// Number vector update that also carries min, max and step.
pub fn min_max_xml(nvp: &NumberVector) -> String {
    let mut out = Open::new("setNumberVector")
        .attr("device", &nvp.device)
        .attr("name", &nvp.name)
        .attr("state", nvp.state.as_str())
        .attr("timeout", &format_g(nvp.timeout))
        .attr("timestamp", &timestamp())
        .open();
    for n in &nvp.numbers {
        let head = Open::new("oneNumber")
            .attr("name", &n.name)
            .attr("min", &format_value(n.min))
            .attr("max", &format_value(n.max))
            .attr("step", &format_value(n.step));
        member(&mut out, head, "oneNumber", &format_value(n.value));
    }
    out.push_str("</setNumberVector>\n");
    out
}

/// Client-form text vector, as stored in config files.
pub fn new_text_xml(tvp: &TextVector) -> String {
    let mut out = Open::new("newTextVector")
        .attr("device", &tvp.device)
        .attr("name", &tvp.name)
        .open();
    for t in &tvp.texts {
        let open = Open::new("oneText").attr("name", &t.name);
        member(&mut out, open, "oneText", &escape_xml(&t.text));
    }
    out.push_str("</newTextVector>\n");
    out
}

pub fn new_number_xml(nvp: &NumberVector) -> String {
    let mut out = Open::new("newNumberVector")
        .attr("device", &nvp.device)
        .attr("name", &nvp.name)
        .open();
    for n in &nvp.numbers {
        let open = Open::new("oneNumber").attr("name", &n.name);
        member(&mut out, open, "oneNumber", &format_value(n.value));
    }
    out.push_str("</newNumberVector>\n");
    out
}

pub fn new_switch_xml(svp: &SwitchVector) -> String {
    let mut out = Open::new("newSwitchVector")
        .attr("device", &svp.device)
        .attr("name", &svp.name)
        .open();
    for s in &svp.switches {
        let open = Open::new("oneSwitch").attr("name", &s.name);
        member(&mut out, open, "oneSwitch", s.state.as_str());
    }
    out.push_str("</newSwitchVector>\n");
    out
}

pub fn new_blob_xml(bvp: &BlobVector) -> String {
    let mut out = Open::new("newBLOBVector")
        .attr("device", &bvp.device)
        .attr("name", &bvp.name)
        .open();
    for b in &bvp.blobs {
        blob_member(&mut out, &b.name, b.size, &b.format, &b.data);
    }
    out.push_str("</newBLOBVector>\n");
    out
}

/// Free-form message, device scoped or global.
pub fn message_xml(device: Option<&str>, message: Option<&str>) -> String {
    Open::new("message")
        .opt_attr("device", device)
        .attr("timestamp", &timestamp())
        .opt_attr("message", message)
        .empty()
}

/// Property deletion; without `name` every property of `device` goes.
pub fn del_property_xml(device: &str, name: Option<&str>, message: Option<&str>) -> String {
    Open::new("delProperty")
        .attr("device", device)
        .opt_attr("name", name)
        .attr("timestamp", &timestamp())
        .opt_attr("message", message)
        .empty()
}

/// Snoop request for another device's properties.
pub fn get_properties_xml(device: &str, name: Option<&str>) -> String {
    Open::new("getProperties")
        .attr("version", INDI_PROTOCOL_VERSION)
        .attr("device", device)
        .opt_attr("name", name)
        .empty()
}

pub fn enable_blob_xml(device: &str, name: Option<&str>, handling: BlobHandling) -> String {
    let mut out = Open::new("enableBLOB")
        .attr("device", device)
        .opt_attr("name", name)
        .buf;
    out.push('>');
    out.push_str(handling.as_str());
    out.push_str("</enableBLOB>\n");
    out
}
