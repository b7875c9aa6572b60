//! Streaming record encoder.
//!
//! Records are serialized one at a time into a reused buffer and flushed to
//! the sink immediately; nothing is retained between records.

use std::borrow::Cow;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::{EncodeError, EncodeResult, PipelineError, PipelineResult};
use crate::schema::{Accessor, Record, SchemaDescriptor};

/// Default indentation of record content.
pub const DEFAULT_INDENT: usize = 2;

/// Writes records as a single document: declaration, root container, one
/// element per record, root close.
pub struct RecordEncoder<R, W: Write> {
    sink: W,
    schema: Arc<SchemaDescriptor<R>>,
    indent: usize,
    buf: Vec<u8>,
    opened: bool,
    written: usize,
}

impl<R: Record, W: Write> RecordEncoder<R, W> {
    pub fn new(sink: W, schema: Arc<SchemaDescriptor<R>>) -> Self {
        Self {
            sink,
            schema,
            indent: DEFAULT_INDENT,
            buf: Vec::new(),
            opened: false,
            written: 0,
        }
    }

    /// Indentation width for record content; `0` writes each record on one line.
    pub fn with_indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    pub fn records_written(&self) -> usize {
        self.written
    }

    /// Emit the declaration and open the root container. Idempotent.
    pub fn begin(&mut self) -> EncodeResult<()> {
        if self.opened {
            return Ok(());
        }

        self.buf.clear();
        Writer::new(&mut self.buf)
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_error)?;
        self.buf.push(b'\n');
        Writer::new(&mut self.buf)
            .write_event(Event::Start(BytesStart::new(self.schema.root_tag())))
            .map_err(xml_error)?;
        self.buf.push(b'\n');

        self.sink.write_all(&self.buf)?;
        self.sink.flush()?;
        self.opened = true;
        Ok(())
    }

    /// Serialize one record and flush it.
    pub fn write_record(&mut self, record: &R) -> EncodeResult<()> {
        self.begin()?;

        self.buf.clear();
        serialize_record(&mut self.buf, &self.schema, record, self.indent)?;
        self.buf.push(b'\n');

        self.sink.write_all(&self.buf)?;
        self.sink.flush()?;
        self.written += 1;
        Ok(())
    }

    /// Close the root container and hand back the sink.
    ///
    /// A document with no records still gets its declaration and root.
    pub fn finish(mut self) -> EncodeResult<W> {
        self.begin()?;

        self.buf.clear();
        Writer::new(&mut self.buf)
            .write_event(Event::End(BytesEnd::new(self.schema.root_tag())))
            .map_err(xml_error)?;
        self.buf.push(b'\n');

        self.sink.write_all(&self.buf)?;
        self.sink.flush()?;
        Ok(self.sink)
    }

    /// Write every record, stopping at the first upstream error, then finish.
    ///
    /// On an upstream error the document is left unterminated.
    pub fn encode<I, E>(mut self, records: I) -> PipelineResult<W>
    where
        I: IntoIterator<Item = Result<R, E>>,
        E: Into<PipelineError>,
    {
        self.begin()?;
        for record in records {
            let record = match record {
                Ok(record) => record,
                Err(err) => return Err(err.into()),
            };
            self.write_record(&record)?;
        }
        Ok(self.finish()?)
    }
}

fn xml_error(err: impl fmt::Display) -> EncodeError {
    EncodeError::Xml(err.to_string())
}

fn serialize_record<R>(
    out: &mut Vec<u8>,
    schema: &SchemaDescriptor<R>,
    record: &R,
    indent: usize,
) -> EncodeResult<()> {
    let mut writer = if indent > 0 {
        Writer::new_with_indent(out, b' ', indent)
    } else {
        Writer::new(out)
    };
    let record_tag = schema.record_tag();

    open(&mut writer, record_tag)?;
    for field in schema.fields() {
        let name = field.name();
        match field.accessor() {
            Accessor::Integer { get, .. } => {
                if let Some(value) = get(record) {
                    write_text(&mut writer, name, &value.to_string())?;
                }
            }
            Accessor::Float { get, .. } => {
                if let Some(value) = get(record) {
                    write_text(&mut writer, name, &value.to_string())?;
                }
            }
            Accessor::Text { get, literal, .. } => {
                if let Some(text) = get(record) {
                    if *literal {
                        write_literal(&mut writer, name, text)?;
                    } else {
                        write_text(&mut writer, name, text)?;
                    }
                }
            }
            Accessor::TextList { item, get, .. } => {
                let items = get(record);
                if !items.is_empty() {
                    open(&mut writer, name)?;
                    for value in items {
                        write_text(&mut writer, item, value)?;
                    }
                    close(&mut writer, name)?;
                }
            }
            Accessor::Attributes { entry, get, .. } => {
                let attributes = get(record);
                if !attributes.is_empty() {
                    open(&mut writer, name)?;
                    for attr in attributes {
                        open(&mut writer, entry)?;
                        write_text(&mut writer, "name", &attr.name)?;
                        write_text(&mut writer, "value", &attr.value)?;
                        close(&mut writer, entry)?;
                    }
                    close(&mut writer, name)?;
                }
            }
        }
    }
    close(&mut writer, record_tag)
}

fn open<W: Write>(writer: &mut Writer<W>, tag: &str) -> EncodeResult<()> {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .map_err(xml_error)
}

fn close<W: Write>(writer: &mut Writer<W>, tag: &str) -> EncodeResult<()> {
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .map_err(xml_error)
}

fn write_empty<W: Write>(writer: &mut Writer<W>, tag: &str) -> EncodeResult<()> {
    writer
        .write_event(Event::Empty(BytesStart::new(tag)))
        .map_err(xml_error)
}

/// Escaped text element.
fn write_text<W: Write>(writer: &mut Writer<W>, tag: &str, text: &str) -> EncodeResult<()> {
    if text.is_empty() {
        return write_empty(writer, tag);
    }
    open(writer, tag)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_error)?;
    close(writer, tag)
}

/// Literal text element, written verbatim as CDATA.
fn write_literal<W: Write>(writer: &mut Writer<W>, tag: &str, text: &str) -> EncodeResult<()> {
    if text.is_empty() {
        return write_empty(writer, tag);
    }
    open(writer, tag)?;
    for section in cdata_sections(text) {
        writer
            .write_event(Event::CData(BytesCData::new(section)))
            .map_err(xml_error)?;
    }
    close(writer, tag)
}

/// Split text so no section contains the CDATA terminator.
fn cdata_sections(text: &str) -> Vec<Cow<'_, str>> {
    if !text.contains("]]>") {
        return vec![Cow::Borrowed(text)];
    }

    let parts: Vec<&str> = text.split("]]>").collect();
    let last = parts.len() - 1;
    parts
        .iter()
        .enumerate()
        .map(|(i, part)| {
            let mut section = String::with_capacity(part.len() + 3);
            if i > 0 {
                section.push('>');
            }
            section.push_str(part);
            if i < last {
                section.push_str("]]");
            }
            Cow::Owned(section)
        })
        .collect()
}
