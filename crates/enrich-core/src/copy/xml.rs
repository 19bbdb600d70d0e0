//! Structured XML object-graph encoding.
//!
//! Shared cells are written once as `<Obj RefId="n">` and later occurrences as
//! `<Ref RefId="n"/>`, so aliasing and cycles survive inside the depth bound.
//! Containers at or below the bound are written as `<Nil/>`.
//!
//! ```text
//! <Objs Version="1">
//!   <Rec><P N="a"><I64>1</I64></P><P N="b"><Nil/></P></Rec>
//! </Objs>
//! ```

use base64::Engine;
use once_cell::sync::OnceCell;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, warn};

use super::strategy::{CopyContext, CopyStrategy, Fidelity, StrategyError, StrategyKind};
use crate::value::{SharedValue, Value};

const FORMAT_VERSION: &str = "1";

/// Container nesting accepted by the decoder.
pub const XML_NESTING_LIMIT: usize = 256;

static CODEC_AVAILABLE: OnceCell<bool> = OnceCell::new();

struct GraphWriter {
    writer: Writer<Vec<u8>>,
    max_depth: usize,
    ref_ids: HashMap<usize, u32>,
}

impl GraphWriter {
    fn emit(&mut self, event: Event<'_>) -> Result<(), StrategyError> {
        self.writer
            .write_event(event)
            .map_err(|e| StrategyError::Encode(e.to_string()))
    }

    fn empty(&mut self, name: &str) -> Result<(), StrategyError> {
        self.emit(Event::Empty(BytesStart::new(name)))
    }

    fn text_element(&mut self, name: &str, text: &str) -> Result<(), StrategyError> {
        self.emit(Event::Start(BytesStart::new(name)))?;
        self.emit(Event::Text(BytesText::new(text)))?;
        self.emit(Event::End(BytesEnd::new(name)))
    }

    fn value(&mut self, value: &Value, level: usize) -> Result<(), StrategyError> {
        let truncated = level >= self.max_depth;
        match value {
            Value::Null => self.empty("Nil"),
            Value::Bool(b) => self.text_element("B", if *b { "true" } else { "false" }),
            Value::Int(i) => self.text_element("I64", &i.to_string()),
            Value::Float(x) => self.text_element("Db", &x.to_string()),
            Value::String(s) => self.text_element("S", s),
            Value::Bytes(b) => {
                self.text_element("BA", &base64::engine::general_purpose::STANDARD.encode(b))
            }
            Value::Opaque(opaque) => self.emit(Event::Empty(
                BytesStart::new("Opaque").with_attributes([("T", opaque.type_name())]),
            )),
            Value::Array(_) | Value::Record(_) if truncated => self.empty("Nil"),
            Value::Array(items) => {
                self.emit(Event::Start(BytesStart::new("Arr")))?;
                for item in items {
                    self.value(item, level + 1)?;
                }
                self.emit(Event::End(BytesEnd::new("Arr")))
            }
            Value::Record(record) => {
                self.emit(Event::Start(BytesStart::new("Rec")))?;
                for (key, item) in record {
                    self.emit(Event::Start(
                        BytesStart::new("P").with_attributes([("N", key.as_str())]),
                    ))?;
                    self.value(item, level + 1)?;
                    self.emit(Event::End(BytesEnd::new("P")))?;
                }
                self.emit(Event::End(BytesEnd::new("Rec")))
            }
            Value::Shared(shared) => {
                if let Some(ref_id) = self.ref_ids.get(&shared.id()) {
                    let ref_id = ref_id.to_string();
                    return self.emit(Event::Empty(
                        BytesStart::new("Ref").with_attributes([("RefId", ref_id.as_str())]),
                    ));
                }
                let inner = shared.get();
                if truncated && matches!(&*inner, Value::Array(_) | Value::Record(_)) {
                    return self.empty("Nil");
                }
                let ref_id = self.ref_ids.len() as u32;
                self.ref_ids.insert(shared.id(), ref_id);
                let ref_id = ref_id.to_string();
                self.emit(Event::Start(
                    BytesStart::new("Obj").with_attributes([("RefId", ref_id.as_str())]),
                ))?;
                self.value(&inner, level)?;
                self.emit(Event::End(BytesEnd::new("Obj")))
            }
        }
    }
}

/// Encode `value` as an XML object graph bounded by `max_depth`.
pub fn encode(value: &Value, max_depth: usize) -> Result<String, StrategyError> {
    let mut graph = GraphWriter {
        writer: Writer::new(Vec::new()),
        max_depth,
        ref_ids: HashMap::new(),
    };
    graph.emit(Event::Start(
        BytesStart::new("Objs").with_attributes([("Version", FORMAT_VERSION)]),
    ))?;
    graph.value(value, 0)?;
    graph.emit(Event::End(BytesEnd::new("Objs")))?;
    String::from_utf8(graph.writer.into_inner()).map_err(|e| StrategyError::Encode(e.to_string()))
}

struct GraphReader<'a> {
    reader: Reader<&'a [u8]>,
    cells: HashMap<u32, SharedValue>,
    nesting: usize,
}

impl<'a> GraphReader<'a> {
    /// Next structural event, skipping declarations, comments and whitespace.
    fn next(&mut self) -> Result<Event<'a>, StrategyError> {
        loop {
            let event = self
                .reader
                .read_event()
                .map_err(|e| StrategyError::Decode(e.to_string()))?;
            match event {
                Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
                Event::Text(ref t) if t.iter().all(u8::is_ascii_whitespace) => {}
                Event::Eof => return Err(StrategyError::Decode("unexpected end of document".into())),
                other => return Ok(other),
            }
        }
    }

    fn expect_end(&mut self, name: &str) -> Result<(), StrategyError> {
        match self.next()? {
            Event::End(e) if e.name().as_ref() == name.as_bytes() => Ok(()),
            other => Err(StrategyError::Decode(format!(
                "expected </{name}>, found {other:?}"
            ))),
        }
    }

    fn enter(&mut self) -> Result<(), StrategyError> {
        self.nesting += 1;
        if self.nesting > XML_NESTING_LIMIT {
            return Err(StrategyError::NestingLimit(XML_NESTING_LIMIT));
        }
        Ok(())
    }

    fn attribute(start: &BytesStart<'_>, key: &str) -> Result<String, StrategyError> {
        let attr = start
            .try_get_attribute(key)
            .map_err(|e| StrategyError::Decode(e.to_string()))?
            .ok_or_else(|| StrategyError::Decode(format!("missing attribute {key}")))?;
        attr.unescape_value()
            .map(|v| v.into_owned())
            .map_err(|e| StrategyError::Decode(e.to_string()))
    }

    fn ref_id(start: &BytesStart<'_>) -> Result<u32, StrategyError> {
        Self::attribute(start, "RefId")?
            .parse()
            .map_err(|_| StrategyError::Decode("RefId is not a number".to_string()))
    }

    /// Text content up to the closing tag of `name`. Raw reads keep leading
    /// and trailing whitespace intact.
    fn text(&mut self, name: &str) -> Result<String, StrategyError> {
        let mut content = String::new();
        loop {
            let event = self
                .reader
                .read_event()
                .map_err(|e| StrategyError::Decode(e.to_string()))?;
            match event {
                Event::Text(t) => content.push_str(
                    &t.unescape()
                        .map_err(|e| StrategyError::Decode(e.to_string()))?,
                ),
                Event::CData(c) => content.push_str(&String::from_utf8_lossy(&c)),
                Event::End(e) if e.name().as_ref() == name.as_bytes() => return Ok(content),
                other => {
                    return Err(StrategyError::Decode(format!(
                        "unexpected {other:?} inside <{name}>"
                    )))
                }
            }
        }
    }

    fn value(&mut self, event: Event<'a>) -> Result<Value, StrategyError> {
        match event {
            Event::Empty(e) => match e.name().as_ref() {
                b"Nil" => Ok(Value::Null),
                b"S" => Ok(Value::String(String::new())),
                b"BA" => Ok(Value::Bytes(Vec::new())),
                b"Arr" => Ok(Value::Array(Vec::new())),
                b"Rec" => Ok(Value::Record(Default::default())),
                b"Opaque" => Ok(Value::String(Self::attribute(&e, "T")?)),
                b"Ref" => {
                    let ref_id = Self::ref_id(&e)?;
                    self.cells
                        .get(&ref_id)
                        .cloned()
                        .map(Value::Shared)
                        .ok_or_else(|| StrategyError::Decode(format!("unknown RefId {ref_id}")))
                }
                other => Err(StrategyError::Decode(format!(
                    "unexpected empty element <{}/>",
                    String::from_utf8_lossy(other)
                ))),
            },
            Event::Start(e) => match e.name().as_ref() {
                b"Nil" => self.expect_end("Nil").map(|_| Value::Null),
                b"B" => match self.text("B")?.as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    other => Err(StrategyError::Decode(format!("bad boolean {other:?}"))),
                },
                b"I64" => self
                    .text("I64")?
                    .parse()
                    .map(Value::Int)
                    .map_err(|e| StrategyError::Decode(format!("bad integer: {e}"))),
                b"Db" => self
                    .text("Db")?
                    .parse()
                    .map(Value::Float)
                    .map_err(|e| StrategyError::Decode(format!("bad float: {e}"))),
                b"S" => self.text("S").map(Value::String),
                b"BA" => base64::engine::general_purpose::STANDARD
                    .decode(self.text("BA")?)
                    .map(Value::Bytes)
                    .map_err(|e| StrategyError::Decode(format!("bad base64: {e}"))),
                b"Arr" => {
                    self.enter()?;
                    let mut items = Vec::new();
                    loop {
                        match self.next()? {
                            Event::End(end) if end.name().as_ref() == b"Arr" => break,
                            event => items.push(self.value(event)?),
                        }
                    }
                    self.nesting -= 1;
                    Ok(Value::Array(items))
                }
                b"Rec" => {
                    self.enter()?;
                    let mut record = crate::value::Record::new();
                    loop {
                        match self.next()? {
                            Event::End(end) if end.name().as_ref() == b"Rec" => break,
                            Event::Start(prop) if prop.name().as_ref() == b"P" => {
                                let key = Self::attribute(&prop, "N")?;
                                let event = self.next()?;
                                let item = self.value(event)?;
                                self.expect_end("P")?;
                                record.insert(key, item);
                            }
                            other => {
                                return Err(StrategyError::Decode(format!(
                                    "expected <P> inside <Rec>, found {other:?}"
                                )))
                            }
                        }
                    }
                    self.nesting -= 1;
                    Ok(Value::Record(record))
                }
                b"Obj" => {
                    let ref_id = Self::ref_id(&e)?;
                    let cell = SharedValue::new(Value::Null);
                    self.cells.insert(ref_id, cell.clone());
                    let event = self.next()?;
                    cell.set(self.value(event)?);
                    self.expect_end("Obj")?;
                    Ok(Value::Shared(cell))
                }
                other => Err(StrategyError::Decode(format!(
                    "unexpected element <{}>",
                    String::from_utf8_lossy(other)
                ))),
            },
            other => Err(StrategyError::Decode(format!("unexpected {other:?}"))),
        }
    }
}

/// Decode a document produced by [`encode`].
pub fn decode(text: &str) -> Result<Value, StrategyError> {
    let mut graph = GraphReader {
        reader: Reader::from_str(text),
        cells: HashMap::new(),
        nesting: 0,
    };
    match graph.next()? {
        Event::Start(e) if e.name().as_ref() == b"Objs" => {
            let version = GraphReader::attribute(&e, "Version")?;
            if version != FORMAT_VERSION {
                return Err(StrategyError::Decode(format!(
                    "unsupported format version {version}"
                )));
            }
        }
        other => {
            return Err(StrategyError::Decode(format!(
                "expected <Objs>, found {other:?}"
            )))
        }
    }
    let event = graph.next()?;
    let value = graph.value(event)?;
    graph.expect_end("Objs")?;
    Ok(value)
}

/// Whether the in-memory codec works in this process. Probed once with a
/// trivial value; the answer is cached for the life of the process.
pub fn codec_available() -> bool {
    *CODEC_AVAILABLE.get_or_init(|| {
        let available = encode(&Value::Null, 1)
            .and_then(|text| decode(&text))
            .map(|value| value.is_null())
            .unwrap_or(false);
        debug!(available, "XML object-graph codec probed");
        available
    })
}

/// In-memory XML object-graph round trip.
#[derive(Debug, Default)]
pub struct XmlObjectGraphStrategy;

impl CopyStrategy for XmlObjectGraphStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::XmlObjectGraph
    }

    fn fidelity(&self) -> Fidelity {
        Fidelity::Approximate
    }

    fn probe(&self, _ctx: &CopyContext<'_>) -> bool {
        codec_available()
    }

    fn attempt(&self, source: &Value, max_depth: usize) -> Result<Value, StrategyError> {
        let text = encode(source, max_depth)?;
        decode(&text)
    }
}

/// XML object-graph round trip through a temporary file. Last resort.
///
/// Each attempt creates one uniquely named file and removes it before
/// returning, whether or not decoding succeeded.
#[derive(Debug, Default)]
pub struct XmlFileRoundtripStrategy {
    dir: Option<PathBuf>,
}

impl XmlFileRoundtripStrategy {
    /// Place temporary files in `dir` instead of the system temp directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    fn roundtrip(file: &mut tempfile::NamedTempFile, text: &str) -> Result<Value, StrategyError> {
        file.write_all(text.as_bytes())?;
        file.flush()?;
        let read_back = std::fs::read_to_string(file.path())?;
        decode(&read_back)
    }
}

impl CopyStrategy for XmlFileRoundtripStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::XmlFileRoundtrip
    }

    fn fidelity(&self) -> Fidelity {
        Fidelity::Approximate
    }

    fn probe(&self, _ctx: &CopyContext<'_>) -> bool {
        true
    }

    fn attempt(&self, source: &Value, max_depth: usize) -> Result<Value, StrategyError> {
        let text = encode(source, max_depth)?;

        let mut builder = tempfile::Builder::new();
        builder.prefix("enrich-copy-").suffix(".xml");
        let mut file = match &self.dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        debug!(path = %file.path().display(), "XML copy spooled to temporary file");

        let result = Self::roundtrip(&mut file, &text);
        if let Err(e) = file.close() {
            warn!("Failed to remove temporary copy file: {}", e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_shape() {
        let value = Value::record([
            ("a", Value::Int(1)),
            ("b", Value::record([("c", Value::Int(2))])),
        ]);
        let text = encode(&value, 1).unwrap();
        assert_eq!(
            text,
            "<Objs Version=\"1\"><Rec><P N=\"a\"><I64>1</I64></P><P N=\"b\"><Nil/></P></Rec></Objs>"
        );
    }

    #[test]
    fn escaping_and_whitespace_survive() {
        let value = Value::record([
            ("key <&>", Value::from("  padded \"text\" & <tags>  ")),
            ("empty", Value::from("")),
            ("ratio", Value::Float(0.1)),
            ("flag", Value::Bool(false)),
        ]);
        let copy = decode(&encode(&value, 2).unwrap()).unwrap();
        assert_eq!(copy, value);
    }

    #[test]
    fn cycles_are_preserved_within_bound() {
        let cell = SharedValue::new(Value::Null);
        cell.set(Value::record([
            ("id", Value::Int(7)),
            ("self", Value::Shared(cell.clone())),
        ]));
        let copy = decode(&encode(&Value::Shared(cell.clone()), 2).unwrap()).unwrap();

        let Value::Shared(copied) = &copy else {
            panic!("expected shared cell");
        };
        assert!(!copied.ptr_eq(&cell));
        let Value::Record(record) = &*copied.get() else {
            panic!("expected record");
        };
        let Some(Value::Shared(inner)) = record.get("self") else {
            panic!("expected back reference");
        };
        assert!(inner.ptr_eq(copied));
    }

    #[test]
    fn unknown_ref_is_rejected() {
        let text = "<Objs Version=\"1\"><Ref RefId=\"3\"/></Objs>";
        assert!(matches!(decode(text), Err(StrategyError::Decode(_))));
    }

    #[test]
    fn nesting_limit_is_enforced() {
        let mut value = Value::Int(0);
        for _ in 0..(XML_NESTING_LIMIT + 10) {
            value = Value::Array(vec![value]);
        }
        let text = encode(&value, XML_NESTING_LIMIT + 20).unwrap();
        assert!(matches!(
            decode(&text),
            Err(StrategyError::NestingLimit(_))
        ));
    }

    #[test]
    fn probe_is_cached_and_positive() {
        assert!(codec_available());
        assert!(codec_available());
    }

    #[test]
    fn file_roundtrip_leaves_no_files_behind() {
        let dir = tempfile::TempDir::new().unwrap();
        let strategy = XmlFileRoundtripStrategy::in_dir(dir.path());
        let value = Value::record([("text", Value::from("hello"))]);

        let copy = strategy.attempt(&value, 2).unwrap();
        assert_eq!(copy, value);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let mut deep = Value::Int(0);
        for _ in 0..(XML_NESTING_LIMIT + 1) {
            deep = Value::Array(vec![deep]);
        }
        assert!(strategy.attempt(&deep, XML_NESTING_LIMIT + 5).is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
