//! XML instance tokenizer
//!
//! [`XmlTokenizer`] wraps the `quick-xml` pull reader and turns its raw
//! events into namespace-resolved tokens for the validation engine.
//!
//! - `xmlns` attributes are kept on a binding stack, not reported as
//!   attributes; the tokenizer itself is a [`NamespaceResolver`] for the
//!   current element
//! - empty-element tags are reported as a start token followed by an end
//!   token
//! - CDATA sections are reported as text; the predefined entities and
//!   character references are resolved
//! - well-formedness rules the reader leaves to its caller (a single root,
//!   no text outside it, bound prefixes, unique expanded attribute names,
//!   closed elements at end of input) are checked here
//!
//! Token data (names, attribute values, text) lives in reused buffers and
//! stays valid until the next call to [`XmlTokenizer::next_token`].

use std::collections::{HashSet, VecDeque};
use std::io::{self, BufRead, Read};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::namespaces::{NamespaceResolver, QName, XMLNS_NAMESPACE, XML_NAMESPACE};
use crate::error::Error;
use crate::options::RuntimeOptions;
use crate::validators::exceptions::{Violation, ViolationCode};

/// A byte reader that remembers where lines start
///
/// Only newlines past the last located offset are kept, so memory stays
/// bounded however long the document is.
struct LineTracker<R> {
    inner: R,
    consumed: u64,
    newlines: VecDeque<u64>,
    line: u32,
    line_start: u64,
}

impl<R: BufRead> LineTracker<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            consumed: 0,
            newlines: VecDeque::new(),
            line: 1,
            line_start: 0,
        }
    }

    /// 1-based line and column of a byte offset; offsets must not decrease
    fn locate(&mut self, offset: u64) -> (u32, u32) {
        while let Some(&nl) = self.newlines.front() {
            if nl >= offset {
                break;
            }
            self.newlines.pop_front();
            self.line += 1;
            self.line_start = nl + 1;
        }
        let column = offset.saturating_sub(self.line_start) + 1;
        (self.line, u32::try_from(column).unwrap_or(u32::MAX))
    }
}

impl<R: BufRead> Read for LineTracker<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl<R: BufRead> BufRead for LineTracker<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        if let Ok(buf) = self.inner.fill_buf() {
            let end = amt.min(buf.len());
            for (i, b) in buf[..end].iter().enumerate() {
                if *b == b'\n' {
                    self.newlines.push_back(self.consumed + i as u64);
                }
            }
        }
        self.consumed += amt as u64;
        self.inner.consume(amt);
    }
}

/// What [`XmlTokenizer::next_token`] produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// A start tag; see [`XmlTokenizer::start_tag`]
    StartElement,
    /// An end tag; see [`XmlTokenizer::end_name`]
    EndElement,
    /// Character data inside the root; see [`XmlTokenizer::text`]
    Text,
    /// End of input
    Eof,
}

/// An attribute of a start tag (namespace declarations excluded)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    /// Expanded name; unprefixed attributes are in no namespace
    pub name: QName,
    /// Value with references resolved
    pub value: String,
}

/// The current start tag
#[derive(Debug, Clone)]
pub struct StartTag {
    /// Expanded element name
    pub name: QName,
    /// Attributes in document order
    pub attributes: Vec<XmlAttribute>,
}

impl StartTag {
    /// Value of an attribute by expanded name
    pub fn attribute(&self, name: &QName) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == *name)
            .map(|a| a.value.as_str())
    }
}

/// Namespace-aware pull tokenizer over an XML 1.0 byte stream
pub struct XmlTokenizer<R: BufRead> {
    reader: Reader<LineTracker<R>>,
    buf: Vec<u8>,
    system_id: Option<String>,
    options: RuntimeOptions,
    start: StartTag,
    end_name: QName,
    text: String,
    /// Open elements with the binding-stack height before each
    open: Vec<(QName, usize)>,
    bindings: Vec<(String, Option<String>)>,
    /// Bindings to drop before the next token
    pop_to: Option<usize>,
    /// End token owed for an empty-element tag
    pending_end: bool,
    names: HashSet<QName>,
    seen_root: bool,
    line: u32,
    column: u32,
}

impl<R: BufRead> XmlTokenizer<R> {
    /// Create a tokenizer with the instance caps of `options`
    pub fn new(input: R, options: &RuntimeOptions) -> Self {
        let mut reader = Reader::from_reader(LineTracker::new(input));
        reader.trim_text(false);
        reader.expand_empty_elements(false);
        reader.check_end_names(true);
        Self {
            reader,
            buf: Vec::new(),
            system_id: None,
            options: *options,
            start: StartTag {
                name: QName::local(""),
                attributes: Vec::new(),
            },
            end_name: QName::local(""),
            text: String::new(),
            open: Vec::new(),
            bindings: Vec::new(),
            pop_to: None,
            pending_end: false,
            names: HashSet::new(),
            seen_root: false,
            line: 0,
            column: 0,
        }
    }

    /// Name the document in violations
    pub fn with_system_id(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = Some(system_id.into());
        self
    }

    /// Document name used in violations
    pub fn system_id(&self) -> Option<&str> {
        self.system_id.as_deref()
    }

    /// The start tag of the last [`Token::StartElement`]
    pub fn start_tag(&self) -> &StartTag {
        &self.start
    }

    /// The name of the last [`Token::EndElement`]
    pub fn end_name(&self) -> &QName {
        &self.end_name
    }

    /// The character data of the last [`Token::Text`]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Line and column of the last token
    pub fn position(&self) -> (u32, u32) {
        (self.line, self.column)
    }

    /// Number of open elements
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Build a violation positioned at the last token
    pub fn violation(&self, code: ViolationCode, message: impl Into<String>) -> Violation {
        let violation = Violation::new(code, message).with_position(self.line, self.column);
        match &self.system_id {
            Some(id) => violation.with_document(id.clone()),
            None => violation,
        }
    }

    fn malformed(&self, message: impl Into<String>) -> Violation {
        self.violation(ViolationCode::XmlParse, message)
    }

    fn limit(&self, error: Error) -> Violation {
        self.violation(ViolationCode::LimitExceeded, error.to_string())
    }

    /// Read the next token.
    ///
    /// An error is fatal: the input is malformed or a cap was breached.
    pub fn next_token(&mut self) -> Result<Token, Violation> {
        if let Some(height) = self.pop_to.take() {
            self.bindings.truncate(height);
        }
        if self.pending_end {
            self.pending_end = false;
            return Ok(self.close_element());
        }
        loop {
            let offset = self.reader.buffer_position() as u64;
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event.into_owned(),
                Err(e) => {
                    let (line, column) = self.reader.get_mut().locate(offset);
                    self.line = line;
                    self.column = column;
                    return Err(self.malformed(e.to_string()));
                }
            };
            let (line, column) = self.reader.get_mut().locate(offset);
            self.line = line;
            self.column = column;
            match event {
                Event::Start(start) => {
                    self.open_element(&start)?;
                    return Ok(Token::StartElement);
                }
                Event::Empty(start) => {
                    self.open_element(&start)?;
                    self.pending_end = true;
                    return Ok(Token::StartElement);
                }
                Event::End(_) => {
                    if self.open.is_empty() {
                        return Err(self.malformed("end tag without a matching start tag"));
                    }
                    return Ok(self.close_element());
                }
                Event::Text(text) => {
                    let text = text.unescape().map_err(|e| self.malformed(e.to_string()))?;
                    if let Some(token) = self.character_data(&text)? {
                        return Ok(token);
                    }
                }
                Event::CData(data) => {
                    let bytes = data.into_inner();
                    let text = std::str::from_utf8(&bytes)
                        .map_err(|e| self.malformed(format!("invalid UTF-8 in CDATA: {}", e)))?
                        .to_string();
                    if let Some(token) = self.character_data(&text)? {
                        return Ok(token);
                    }
                }
                Event::Eof => {
                    if let Some((name, _)) = self.open.last() {
                        return Err(self.malformed(format!("element <{}> is not closed", name)));
                    }
                    if !self.seen_root {
                        return Err(self.malformed("document has no root element"));
                    }
                    return Ok(Token::Eof);
                }
                Event::Comment(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
            }
        }
    }

    fn character_data(&mut self, text: &str) -> Result<Option<Token>, Violation> {
        if self.open.is_empty() {
            if text.trim().is_empty() {
                return Ok(None);
            }
            return Err(self.malformed("character data outside the root element"));
        }
        self.options
            .check_token_size(text.len())
            .map_err(|e| self.limit(e))?;
        self.text.clear();
        self.text.push_str(text);
        Ok(Some(Token::Text))
    }

    fn close_element(&mut self) -> Token {
        if let Some((name, height)) = self.open.pop() {
            self.end_name = name;
            self.pop_to = Some(height);
        }
        Token::EndElement
    }

    fn intern(&mut self, name: QName) -> Result<QName, Violation> {
        if !self.names.contains(&name) {
            self.options
                .check_names(self.names.len() + 1)
                .map_err(|e| self.limit(e))?;
            self.names.insert(name.clone());
        }
        Ok(name)
    }

    fn expand(&self, raw: &str, is_attribute: bool) -> Result<QName, Violation> {
        match raw.split_once(':') {
            Some((prefix, local)) => {
                if prefix.is_empty() || local.is_empty() || local.contains(':') {
                    return Err(self.malformed(format!("'{}' is not a valid qualified name", raw)));
                }
                let ns = self
                    .lookup_prefix(prefix)
                    .ok_or_else(|| self.malformed(format!("prefix '{}' is not bound", prefix)))?;
                Ok(QName::namespaced(ns, local))
            }
            None if is_attribute => Ok(QName::local(raw)),
            None => Ok(QName::new(self.lookup_prefix("").map(str::to_string), raw)),
        }
    }

    fn open_element(&mut self, start: &BytesStart<'_>) -> Result<(), Violation> {
        if self.open.is_empty() && self.seen_root {
            return Err(self.malformed("content after the root element"));
        }
        self.options
            .check_depth(self.open.len() + 1)
            .map_err(|e| self.limit(e))?;
        let raw_name = std::str::from_utf8(start.name().as_ref())
            .map_err(|e| self.malformed(format!("invalid UTF-8 in element name: {}", e)))?
            .to_string();

        let mut raw_attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| self.malformed(e.to_string()))?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|e| self.malformed(format!("invalid UTF-8 in attribute name: {}", e)))?
                .to_string();
            let value = attr
                .unescape_value()
                .map_err(|e| self.malformed(e.to_string()))?
                .into_owned();
            self.options
                .check_token_size(value.len())
                .map_err(|e| self.limit(e))?;
            raw_attributes.push((key, value));
            self.options
                .check_attrs(raw_attributes.len())
                .map_err(|e| self.limit(e))?;
        }

        let height = self.bindings.len();
        for (key, value) in &raw_attributes {
            if key == "xmlns" {
                let uri = (!value.is_empty()).then(|| value.clone());
                self.bindings.push((String::new(), uri));
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                if prefix == "xmlns" || (prefix == "xml" && value != XML_NAMESPACE) {
                    return Err(self.malformed(format!("prefix '{}' cannot be rebound", prefix)));
                }
                if value.is_empty() {
                    return Err(self.malformed(format!("prefix '{}' bound to an empty namespace", prefix)));
                }
                if value == XMLNS_NAMESPACE {
                    return Err(self.malformed("the xmlns namespace cannot be bound"));
                }
                self.bindings.push((prefix.to_string(), Some(value.clone())));
            }
        }

        let name = self.expand(&raw_name, false)?;
        let name = self.intern(name)?;

        let mut attributes: Vec<XmlAttribute> = Vec::with_capacity(raw_attributes.len());
        for (key, value) in raw_attributes {
            if key == "xmlns" || key.starts_with("xmlns:") {
                continue;
            }
            let attr_name = self.expand(&key, true)?;
            if attributes.iter().any(|a| a.name == attr_name) {
                return Err(self.malformed(format!(
                    "attribute {} appears twice on <{}>",
                    attr_name, raw_name
                )));
            }
            let attr_name = self.intern(attr_name)?;
            attributes.push(XmlAttribute {
                name: attr_name,
                value,
            });
        }

        self.seen_root = true;
        self.open.push((name.clone(), height));
        self.start.name = name;
        self.start.attributes = attributes;
        Ok(())
    }
}

impl<R: BufRead> NamespaceResolver for XmlTokenizer<R> {
    fn lookup_prefix(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(XML_NAMESPACE);
        }
        self.bindings
            .iter()
            .rev()
            .find(|(p, _)| p == prefix)
            .and_then(|(_, uri)| uri.as_deref())
    }
}
