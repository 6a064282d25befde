//! Inbound XML element trees
//!
//! The client stream is a sequence of top-level elements with no
//! document root. [`ElementReader`] turns quick-xml events into one
//! [`XmlElement`] tree per top-level element. Any structural error
//! leaves the stream unrecoverable and is reported as
//! [`IndiError::ParseError`].

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use tokio::io::AsyncBufRead;

use crate::error::{IndiError, IndiResult};
use crate::wire::escape_xml;

/// A parsed element with its attributes, children and character data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    /// Concatenated, trimmed character data
    pub pcdata: String,
}

impl XmlElement {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.attrs.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_pcdata(mut self, text: &str) -> Self {
        self.pcdata = text.to_string();
        self
    }

    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(child);
        self
    }

    /// Attribute value by name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn pcdata(&self) -> &str {
        &self.pcdata
    }

    /// Children whose tag ends with `suffix` after a three letter
    /// def/set/new style prefix, e.g. "Number" matches oneNumber and
    /// defNumber.
    pub fn members<'a>(&'a self, suffix: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children
            .iter()
            .filter(move |c| c.tag.get(3..) == Some(suffix))
    }

    /// The `device` and `name` attributes, both required.
    pub fn crack_dn(&self) -> IndiResult<(&str, &str)> {
        let device = self.attr("device").ok_or_else(|| IndiError::MissingAttribute {
            tag: self.tag.clone(),
            attribute: "device",
        })?;
        let name = self.attr("name").ok_or_else(|| IndiError::MissingAttribute {
            tag: self.tag.clone(),
            attribute: "name",
        })?;
        Ok((device, name))
    }

    /// Serialize back to XML, used for diagnostics.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_into(&mut out, 0);
        out
    }

    fn write_into(&self, out: &mut String, depth: usize) {
        let indent = "    ".repeat(depth);
        out.push_str(&indent);
        out.push('<');
        out.push_str(&self.tag);
        for (k, v) in &self.attrs {
            out.push_str(&format!(" {}='{}'", k, escape_xml(v)));
        }
        if self.children.is_empty() && self.pcdata.is_empty() {
            out.push_str("/>\n");
            return;
        }
        out.push('>');
        if self.children.is_empty() {
            out.push_str(&escape_xml(&self.pcdata));
        } else {
            out.push('\n');
            if !self.pcdata.is_empty() {
                out.push_str(&indent);
                out.push_str(&escape_xml(&self.pcdata));
                out.push('\n');
            }
            for child in &self.children {
                child.write_into(out, depth + 1);
            }
            out.push_str(&indent);
        }
        out.push_str(&format!("</{}>\n", self.tag));
    }
}

fn element_from_start(e: &BytesStart<'_>) -> IndiResult<XmlElement> {
    let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
    let mut element = XmlElement::new(&tag);
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr.unescape_value()?.to_string();
        element.attrs.push((key, value));
    }
    Ok(element)
}

/// Assembles element trees from a flat event stream.
#[derive(Debug, Default)]
struct TreeBuilder {
    stack: Vec<XmlElement>,
}

impl TreeBuilder {
    fn in_progress(&self) -> bool {
        !self.stack.is_empty()
    }

    /// Attach a finished element, returning it if it is top-level.
    fn close(&mut self, element: XmlElement) -> Option<XmlElement> {
        match self.stack.last_mut() {
            Some(parent) => {
                parent.children.push(element);
                None
            }
            None => Some(element),
        }
    }

    fn feed(&mut self, event: Event<'_>) -> IndiResult<Option<XmlElement>> {
        match event {
            Event::Start(e) => {
                self.stack.push(element_from_start(&e)?);
                Ok(None)
            }
            Event::Empty(e) => {
                let element = element_from_start(&e)?;
                Ok(self.close(element))
            }
            Event::End(e) => {
                let element = self.stack.pop().ok_or_else(|| {
                    IndiError::ParseError(format!(
                        "unmatched closing tag </{}>",
                        String::from_utf8_lossy(e.name().as_ref())
                    ))
                })?;
                if e.name().as_ref() != element.tag.as_bytes() {
                    return Err(IndiError::ParseError(format!(
                        "closing tag </{}> does not match <{}>",
                        String::from_utf8_lossy(e.name().as_ref()),
                        element.tag
                    )));
                }
                Ok(self.close(element))
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                match self.stack.last_mut() {
                    Some(top) => top.pcdata.push_str(&text),
                    None if text.trim().is_empty() => {}
                    None => {
                        return Err(IndiError::ParseError(format!(
                            "character data outside any element: {}",
                            text.trim()
                        )))
                    }
                }
                Ok(None)
            }
            Event::CData(c) => {
                if let Some(top) = self.stack.last_mut() {
                    top.pcdata.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
                Ok(None)
            }
            Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_) => Ok(None),
            Event::Eof => {
                if self.in_progress() {
                    Err(IndiError::ParseError(
                        "input ended inside an element".to_string(),
                    ))
                } else {
                    Ok(None)
                }
            }
        }
    }
}

fn configure<R>(reader: &mut Reader<R>) {
    reader.trim_text(true);
    reader.check_end_names(false);
}

/// Reads top-level elements from an async byte stream.
pub struct ElementReader<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
    builder: TreeBuilder,
}

impl<R: AsyncBufRead + Unpin> ElementReader<R> {
    pub fn new(inner: R) -> Self {
        let mut reader = Reader::from_reader(inner);
        configure(&mut reader);
        Self {
            reader,
            buf: Vec::new(),
            builder: TreeBuilder::default(),
        }
    }

    /// Next complete top-level element, or `None` at a clean end of input.
    pub async fn next_element(&mut self) -> IndiResult<Option<XmlElement>> {
        loop {
            self.buf.clear();
            let event = self.reader.read_event_into_async(&mut self.buf).await?;
            let eof = matches!(event, Event::Eof);
            if let Some(element) = self.builder.feed(event)? {
                return Ok(Some(element));
            }
            if eof {
                return Ok(None);
            }
        }
    }
}

/// Parse every top-level element in `text`.
pub fn parse_elements(text: &str) -> IndiResult<Vec<XmlElement>> {
    let mut reader = Reader::from_str(text);
    configure(&mut reader);
    let mut builder = TreeBuilder::default();
    let mut elements = Vec::new();
    loop {
        let event = reader.read_event()?;
        let eof = matches!(event, Event::Eof);
        if let Some(element) = builder.feed(event)? {
            elements.push(element);
        }
        if eof {
            return Ok(elements);
        }
    }
}
