//! Streaming record decoder.
//!
//! Pulls markup events from the source and keeps only the sub-tree of the
//! record currently being read. When the record element closes, the tree is
//! mapped onto a fresh record through the schema and dropped, so memory is
//! bounded by the largest single record no matter how long the document is.
//!
//! ```text
//! <products>                 ignored outside a record
//!   <product>                open: [product]
//!     <name>..</name>        open: [product, name] → attached to product
//!     <images>
//!       <image>..</image>
//!     </images>
//!   </product>               tree → record, tree dropped
//! </products>
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Serialize;

use crate::error::{RecordDecodeError, SchemaResult, StreamDecodeError};
use crate::logs::log_warning;
use crate::models::AttributeList;
use crate::schema::{Accessor, FieldDescriptor, Record, SchemaDescriptor};

/// Receives records that were dropped because they could not be assembled.
pub trait ErrorSink: Send {
    fn report(&mut self, error: RecordDecodeError);
}

impl<F> ErrorSink for F
where
    F: FnMut(RecordDecodeError) + Send,
{
    fn report(&mut self, error: RecordDecodeError) {
        self(error)
    }
}

/// Reports dropped records through the run log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn report(&mut self, error: RecordDecodeError) {
        log_warning(format!("Skipped record: {}", error));
    }
}

/// Counters of a decoding pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    /// Records yielded.
    pub records: usize,
    /// Records dropped and reported to the error sink.
    pub errors: usize,
    /// Largest number of nodes held for a single record.
    pub peak_record_nodes: usize,
}

/// In-progress element of the current record.
#[derive(Debug, Default)]
struct Node {
    name: String,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn new(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Detach the first child called `name`, keeping sibling order.
    fn take_child(&mut self, name: &str) -> Option<Node> {
        let index = self.children.iter().position(|c| c.name == name)?;
        Some(self.children.remove(index))
    }
}

/// What one markup event means for the decoder, detached from the read buffer.
enum Step {
    Open(String),
    Leaf(String),
    Close,
    Text(Result<String, String>),
    Eof,
    Skip,
}

/// Lazily yields records from a markup byte stream.
///
/// Record-level failures go to the [`ErrorSink`] and decoding continues; a
/// stream-level failure is yielded once as `Err` and ends the iteration.
pub struct RecordDecoder<R, S> {
    reader: Reader<S>,
    schema: Arc<SchemaDescriptor<R>>,
    sink: Box<dyn ErrorSink>,
    buf: Vec<u8>,
    open: Vec<Node>,
    depth: usize,
    saw_root: bool,
    seen: usize,
    fault: Option<RecordDecodeError>,
    live_nodes: usize,
    stats: DecodeStats,
    finished: bool,
}

/// Decode `source` as a stream of `R`, building its schema once.
pub fn decode<R, S>(source: S, sink: impl ErrorSink + 'static) -> SchemaResult<RecordDecoder<R, S>>
where
    R: Record,
    S: BufRead,
{
    Ok(RecordDecoder::new(source, Arc::new(R::describe()?), sink))
}

impl<R: Record> RecordDecoder<R, BufReader<File>> {
    /// Open a catalog file. The file is closed when the decoder is dropped.
    pub fn open(
        path: impl AsRef<Path>,
        schema: Arc<SchemaDescriptor<R>>,
        sink: impl ErrorSink + 'static,
    ) -> Result<Self, StreamDecodeError> {
        let file = File::open(path.as_ref())?;
        Ok(Self::new(BufReader::new(file), schema, sink))
    }
}

impl<R: Record, S: BufRead> RecordDecoder<R, S> {
    pub fn new(source: S, schema: Arc<SchemaDescriptor<R>>, sink: impl ErrorSink + 'static) -> Self {
        Self {
            reader: Reader::from_reader(source),
            schema,
            sink: Box::new(sink),
            buf: Vec::new(),
            open: Vec::new(),
            depth: 0,
            saw_root: false,
            seen: 0,
            fault: None,
            live_nodes: 0,
            stats: DecodeStats::default(),
            finished: false,
        }
    }

    pub fn schema(&self) -> &Arc<SchemaDescriptor<R>> {
        &self.schema
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Nodes currently held for the record being assembled.
    pub fn retained_nodes(&self) -> usize {
        self.live_nodes
    }

    fn read_step(&mut self) -> Result<Step, StreamDecodeError> {
        self.buf.clear();
        let inside = !self.open.is_empty();
        let event = match self.reader.read_event_into(&mut self.buf) {
            Ok(event) => event,
            Err(err) => {
                return Err(StreamDecodeError::Syntax {
                    position: self.reader.buffer_position() as u64,
                    message: err.to_string(),
                })
            }
        };

        let step = match event {
            Event::Start(e) => Step::Open(String::from_utf8_lossy(e.name().as_ref()).into_owned()),
            Event::Empty(e) => Step::Leaf(String::from_utf8_lossy(e.name().as_ref()).into_owned()),
            Event::End(_) => Step::Close,
            Event::Text(e) if inside => Step::Text(
                e.unescape()
                    .map(|text| text.into_owned())
                    .map_err(|err| err.to_string()),
            ),
            Event::CData(e) if inside => Step::Text(
                self.reader
                    .decoder()
                    .decode(&e)
                    .map(|text| text.into_owned())
                    .map_err(|err| err.to_string()),
            ),
            Event::Eof => Step::Eof,
            _ => Step::Skip,
        };
        Ok(step)
    }

    fn track_node(&mut self) {
        self.live_nodes += 1;
        self.stats.peak_record_nodes = self.stats.peak_record_nodes.max(self.live_nodes);
    }

    fn begin_record(&mut self) {
        self.seen += 1;
        self.fault = None;
        self.live_nodes = 0;
    }

    /// Turn a closed record tree into a record, releasing the tree.
    fn complete(&mut self, root: Node) -> Option<R> {
        let outcome = match self.fault.take() {
            Some(err) => Err(err),
            None => self.assemble(root),
        };
        self.live_nodes = 0;

        match outcome {
            Ok(record) => {
                self.stats.records += 1;
                Some(record)
            }
            Err(err) => {
                self.stats.errors += 1;
                self.sink.report(err);
                None
            }
        }
    }

    fn assemble(&self, mut root: Node) -> Result<R, RecordDecodeError> {
        let mut record = R::default();

        for field in self.schema.fields() {
            let Some(node) = root.take_child(field.name()) else {
                continue;
            };

            match field.accessor() {
                Accessor::Integer { set, .. } => {
                    let text = node.text.trim();
                    if !text.is_empty() {
                        let value = text.parse::<i64>().map_err(|_| self.invalid(field, text))?;
                        set(&mut record, value);
                    }
                }
                Accessor::Float { set, .. } => {
                    let text = node.text.trim();
                    if !text.is_empty() {
                        let value = text.parse::<f64>().map_err(|_| self.invalid(field, text))?;
                        set(&mut record, value);
                    }
                }
                Accessor::Text { set, .. } => {
                    if !node.text.is_empty() {
                        set(&mut record, node.text);
                    }
                }
                Accessor::TextList { item, set, .. } => {
                    let items = node
                        .children
                        .into_iter()
                        .filter(|c| c.name == *item && !c.text.is_empty())
                        .map(|c| c.text)
                        .collect();
                    set(&mut record, items);
                }
                Accessor::Attributes { entry, set, .. } => {
                    let mut attributes = AttributeList::new();
                    for attr in node.children.iter().filter(|c| c.name == *entry) {
                        let name = attr.child("name").map(|n| n.text.as_str());
                        let value = attr.child("value").map(|v| v.text.as_str());
                        match (name, value) {
                            (Some(name), Some(value)) if !name.trim().is_empty() => {
                                attributes.upsert(name, value)
                            }
                            _ => {}
                        }
                    }
                    set(&mut record, attributes);
                }
            }
        }

        Ok(record)
    }

    fn invalid(&self, field: &FieldDescriptor<R>, value: &str) -> RecordDecodeError {
        RecordDecodeError::InvalidValue {
            record: self.seen,
            field: field.name().to_string(),
            expected: field.kind(),
            value: value.to_string(),
        }
    }
}

impl<R: Record, S: BufRead> Iterator for RecordDecoder<R, S> {
    type Item = Result<R, StreamDecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let step = match self.read_step() {
                Ok(step) => step,
                Err(err) => {
                    self.finished = true;
                    self.open.clear();
                    self.live_nodes = 0;
                    return Some(Err(err));
                }
            };

            match step {
                Step::Open(name) => {
                    if self.depth == 0 {
                        self.saw_root = true;
                    }
                    self.depth += 1;
                    if self.open.is_empty() {
                        if name != self.schema.record_tag() {
                            continue;
                        }
                        self.begin_record();
                    }
                    self.track_node();
                    self.open.push(Node::new(name));
                }
                Step::Leaf(name) => {
                    if self.depth == 0 {
                        self.saw_root = true;
                    }
                    if let Some(parent) = self.open.last_mut() {
                        parent.children.push(Node::new(name));
                        self.track_node();
                    } else if name == self.schema.record_tag() {
                        self.begin_record();
                        self.track_node();
                        if let Some(record) = self.complete(Node::new(name)) {
                            return Some(Ok(record));
                        }
                    }
                }
                Step::Close => {
                    self.depth = self.depth.saturating_sub(1);
                    let Some(node) = self.open.pop() else {
                        continue;
                    };
                    match self.open.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => {
                            if let Some(record) = self.complete(node) {
                                return Some(Ok(record));
                            }
                        }
                    }
                }
                Step::Text(Ok(text)) => {
                    if let Some(node) = self.open.last_mut() {
                        node.text.push_str(&text);
                    }
                }
                Step::Text(Err(message)) => {
                    if self.fault.is_none() {
                        let element = self.open.last().map(|n| n.name.clone()).unwrap_or_default();
                        self.fault = Some(RecordDecodeError::MalformedText {
                            record: self.seen,
                            element,
                            message,
                        });
                    }
                }
                Step::Eof => {
                    self.finished = true;
                    if self.depth > 0 {
                        let open = self.depth;
                        self.open.clear();
                        self.live_nodes = 0;
                        return Some(Err(StreamDecodeError::UnexpectedEof { open }));
                    }
                    if !self.saw_root {
                        return Some(Err(StreamDecodeError::MissingRoot));
                    }
                }
                Step::Skip => {}
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Product, ProductWithName};
    use std::sync::Mutex;

    const CATALOG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<products>
  <product>
    <product_id>101</product_id>
    <name>Klocki 250 elementów &amp;amp; figurki</name>
    <quantity>7</quantity>
    <ean>5901234123457</ean>
    <sku>KL-250</sku>
    <category_name>Zabawki</category_name>
    <manufacturer_name>Brickmaster</manufacturer_name>
    <price>129.99</price>
    <tax_rate>23%</tax_rate>
    <weight>1.2</weight>
    <width>30</width>
    <height>20.5</height>
    <length>8</length>
    <description><![CDATA[<p>Zestaw &amp;nbsp;klocków</p>]]></description>
    <images>
      <image>https://cdn.example/1.jpg</image>
      <image>https://cdn.example/2.jpg</image>
    </images>
    <attributes>
      <attribute><name>Kolor</name><value>Czerwony</value></attribute>
      <attribute><name>Wiek</name><value>6+</value></attribute>
    </attributes>
  </product>
  <product>
    <product_id>102</product_id>
    <name>Puzzle</name>
  </product>
</products>
"#;

    fn collecting_sink() -> (Arc<Mutex<Vec<RecordDecodeError>>>, impl ErrorSink + 'static) {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink_errors = errors.clone();
        let sink = move |err: RecordDecodeError| sink_errors.lock().unwrap().push(err);
        (errors, sink)
    }

    fn decode_str(xml: &str) -> (Vec<Result<Product, StreamDecodeError>>, Vec<RecordDecodeError>) {
        let (errors, sink) = collecting_sink();
        let decoder = decode::<Product, _>(xml.as_bytes(), sink).unwrap();
        let items: Vec<_> = decoder.collect();
        let errors = errors.lock().unwrap().clone();
        (items, errors)
    }

    #[test]
    fn test_decode_full_record() {
        let (items, errors) = decode_str(CATALOG);
        assert!(errors.is_empty());
        assert_eq!(items.len(), 2);

        let first = items[0].as_ref().unwrap();
        assert_eq!(first.product_id, 101);
        assert_eq!(first.name, "Klocki 250 elementów &amp; figurki");
        assert_eq!(first.quantity, 7);
        assert_eq!(first.price, 129.99);
        assert_eq!(first.width, 30.0);
        assert_eq!(first.description, "<p>Zestaw &amp;nbsp;klocków</p>");
        assert_eq!(
            first.images,
            vec!["https://cdn.example/1.jpg", "https://cdn.example/2.jpg"]
        );
        assert_eq!(first.attributes.len(), 2);
        assert_eq!(first.attributes.as_slice()[0].name, "Kolor");
        assert_eq!(first.attributes.get("Wiek"), Some("6+"));
    }

    #[test]
    fn test_absent_fields_take_defaults() {
        let (items, _) = decode_str(CATALOG);
        let second = items[1].as_ref().unwrap();

        assert_eq!(second.product_id, 102);
        assert_eq!(second.quantity, 0);
        assert_eq!(second.price, 0.0);
        assert_eq!(second.ean, "");
        assert_eq!(second.description_extra_1, None);
        assert!(second.images.is_empty());
        assert!(second.attributes.is_empty());
    }

    #[test]
    fn test_malformed_record_is_isolated() {
        let xml = r#"<products>
            <product><product_id>1</product_id></product>
            <product><product_id>2</product_id></product>
            <product><product_id>3</product_id><price>12,50</price></product>
            <product><product_id>4</product_id></product>
            <product><product_id>5</product_id></product>
        </products>"#;

        let (items, errors) = decode_str(xml);
        let ids: Vec<i64> = items.into_iter().map(|r| r.unwrap().product_id).collect();
        assert_eq!(ids, vec![1, 2, 4, 5]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].record(), 3);
        assert!(matches!(
            &errors[0],
            RecordDecodeError::InvalidValue { field, .. } if field == "price"
        ));
    }

    #[test]
    fn test_unknown_entity_is_record_level() {
        let xml = r#"<products>
            <product><name>A &nbsp; B</name></product>
            <product><name>ok</name></product>
        </products>"#;

        let (items, errors) = decode_str(xml);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().name, "ok");
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            RecordDecodeError::MalformedText { element, .. } if element == "name"
        ));
    }

    #[test]
    fn test_incomplete_attributes_are_skipped() {
        let xml = r#"<products><product>
            <attributes>
              <attribute><name>Kolor</name><value>Niebieski</value></attribute>
              <attribute><name>Bez wartości</name></attribute>
              <attribute><value>bez nazwy</value></attribute>
              <attribute><name>Pusta</name><value/></attribute>
              <attribute><name>Kolor</name><value>Zielony</value></attribute>
            </attributes>
        </product></products>"#;

        let (items, errors) = decode_str(xml);
        assert!(errors.is_empty());
        let product = items[0].as_ref().unwrap();
        assert_eq!(product.attributes.len(), 2);
        assert_eq!(product.attributes.get("Kolor"), Some("Zielony"));
        assert_eq!(product.attributes.get("Pusta"), Some(""));
    }

    #[test]
    fn test_stream_error_is_fatal_after_valid_records() {
        let xml = "<products><product><product_id>1</product_id></product>\
                   <product><name>x</nme></product></products>";

        let (items, _) = decode_str(xml);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().product_id, 1);
        assert!(matches!(items[1], Err(StreamDecodeError::Syntax { .. })));
    }

    #[test]
    fn test_truncated_document_reports_eof() {
        let xml = "<products><product><product_id>1</product_id></product><product><name>x</name>";

        let (items, _) = decode_str(xml);
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(
            items[1],
            Err(StreamDecodeError::UnexpectedEof { .. }) | Err(StreamDecodeError::Syntax { .. })
        ));
    }

    #[test]
    fn test_input_without_root_is_fatal() {
        for input in ["", "{\"products\": []}", "this is not a catalog", "<?xml version=\"1.0\"?>\n"] {
            let (items, errors) = decode_str(input);
            assert!(errors.is_empty());
            assert_eq!(items.len(), 1, "input {:?}", input);
            assert!(matches!(items[0], Err(StreamDecodeError::MissingRoot)), "input {:?}", input);
        }
    }

    #[test]
    fn test_empty_root_is_empty_catalog() {
        for input in ["<products></products>", "<products/>"] {
            let (items, errors) = decode_str(input);
            assert!(items.is_empty(), "input {:?}", input);
            assert!(errors.is_empty());
        }
    }

    #[test]
    fn test_empty_record_element() {
        let (items, errors) = decode_str("<products><product/></products>");
        assert!(errors.is_empty());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), &Product::default());
    }

    #[test]
    fn test_memory_bounded_by_largest_record() {
        let mut xml = String::from("<products>");
        xml.push_str(
            "<product><product_id>0</product_id><images>\
             <image>a</image><image>b</image><image>c</image>\
             </images></product>",
        );
        for id in 1..=200 {
            xml.push_str(&format!("<product><product_id>{}</product_id></product>", id));
        }
        xml.push_str("</products>");

        let mut decoder = decode::<Product, _>(xml.as_bytes(), LogSink).unwrap();
        let mut count = 0;
        while let Some(item) = decoder.next() {
            item.unwrap();
            assert_eq!(decoder.retained_nodes(), 0);
            count += 1;
        }

        assert_eq!(count, 201);
        // product + product_id + images + 3 × image
        assert_eq!(decoder.stats().peak_record_nodes, 6);
        assert_eq!(decoder.stats().records, 201);
    }

    #[test]
    fn test_extended_record_type() {
        let xml = "<products><product><name>Lalka</name><man_name>Doll X</man_name></product></products>";
        let mut decoder = decode::<ProductWithName, _>(xml.as_bytes(), LogSink).unwrap();

        let record = decoder.next().unwrap().unwrap();
        assert_eq!(record.base.name, "Lalka");
        assert_eq!(record.man_name.as_deref(), Some("Doll X"));
        assert!(decoder.next().is_none());
    }
}
