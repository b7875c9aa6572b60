//! Field-mapping tables for record types.
//!
//! A [`SchemaDescriptor`] is built once per record type and lists the
//! record's fields in document order. Each field carries its element name,
//! its [`FieldKind`] and a typed getter/setter pair, so the decoder and the
//! encoder never inspect the record type itself.
//!
//! ```rust,ignore
//! let schema = SchemaBuilder::<Item>::new("items", "item")
//!     .integer("id", |i| i.id, |i, v| i.id = v)
//!     .text("title", |i| i.title.as_str(), |i, v| i.title = v)
//!     .text_list("tags", "tag", |i| i.tags.as_slice(), |i, v| i.tags = v)
//!     .build()?;
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{SchemaError, SchemaResult};
use crate::models::AttributeList;

/// A record type the codec can stream.
pub trait Record: Default + Send + 'static {
    /// Build the field-mapping table for this type.
    fn describe() -> SchemaResult<SchemaDescriptor<Self>>;
}

/// Supported field kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Integer,
    Float,
    Text,
    TextList,
    Attributes,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Text => "text",
            Self::TextList => "text list",
            Self::Attributes => "attribute list",
        };
        f.write_str(label)
    }
}

// =============================================================================
// Accessors
// =============================================================================

pub(crate) type ValueGetter<R, T> = Arc<dyn Fn(&R) -> Option<T> + Send + Sync>;
pub(crate) type TextGetter<R> = Arc<dyn for<'a> Fn(&'a R) -> Option<&'a str> + Send + Sync>;
pub(crate) type ListGetter<R> = Arc<dyn for<'a> Fn(&'a R) -> &'a [String] + Send + Sync>;
pub(crate) type AttributesGetter<R> = Arc<dyn for<'a> Fn(&'a R) -> &'a AttributeList + Send + Sync>;
pub(crate) type Setter<R, T> = Arc<dyn Fn(&mut R, T) + Send + Sync>;

/// Typed access to one field. `None` from a getter means the field is absent.
pub(crate) enum Accessor<R> {
    Integer {
        get: ValueGetter<R, i64>,
        set: Setter<R, i64>,
    },
    Float {
        get: ValueGetter<R, f64>,
        set: Setter<R, f64>,
    },
    Text {
        get: TextGetter<R>,
        set: Setter<R, String>,
        literal: bool,
    },
    TextList {
        item: String,
        get: ListGetter<R>,
        set: Setter<R, Vec<String>>,
    },
    Attributes {
        entry: String,
        get: AttributesGetter<R>,
        set: Setter<R, AttributeList>,
    },
}

impl<R> Clone for Accessor<R> {
    fn clone(&self) -> Self {
        match self {
            Self::Integer { get, set } => Self::Integer {
                get: get.clone(),
                set: set.clone(),
            },
            Self::Float { get, set } => Self::Float {
                get: get.clone(),
                set: set.clone(),
            },
            Self::Text { get, set, literal } => Self::Text {
                get: get.clone(),
                set: set.clone(),
                literal: *literal,
            },
            Self::TextList { item, get, set } => Self::TextList {
                item: item.clone(),
                get: get.clone(),
                set: set.clone(),
            },
            Self::Attributes { entry, get, set } => Self::Attributes {
                entry: entry.clone(),
                get: get.clone(),
                set: set.clone(),
            },
        }
    }
}

// Higher-ranked closures only infer their signature when passed to a
// bounded generic, hence these constructors.
fn text_getter<R, F>(f: F) -> TextGetter<R>
where
    F: for<'a> Fn(&'a R) -> Option<&'a str> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn list_getter<R, F>(f: F) -> ListGetter<R>
where
    F: for<'a> Fn(&'a R) -> &'a [String] + Send + Sync + 'static,
{
    Arc::new(f)
}

fn attributes_getter<R, F>(f: F) -> AttributesGetter<R>
where
    F: for<'a> Fn(&'a R) -> &'a AttributeList + Send + Sync + 'static,
{
    Arc::new(f)
}

impl<B: 'static> Accessor<B> {
    /// Re-target a base-type accessor onto a type embedding `B`.
    fn project<R: 'static>(&self, get: fn(&R) -> &B, get_mut: fn(&mut R) -> &mut B) -> Accessor<R> {
        match self.clone() {
            Self::Integer { get: g, set: s } => Accessor::Integer {
                get: Arc::new(move |r: &R| g(get(r))),
                set: Arc::new(move |r: &mut R, v| s(get_mut(r), v)),
            },
            Self::Float { get: g, set: s } => Accessor::Float {
                get: Arc::new(move |r: &R| g(get(r))),
                set: Arc::new(move |r: &mut R, v| s(get_mut(r), v)),
            },
            Self::Text { get: g, set: s, literal } => Accessor::Text {
                get: text_getter(move |r: &R| g(get(r))),
                set: Arc::new(move |r: &mut R, v| s(get_mut(r), v)),
                literal,
            },
            Self::TextList { item, get: g, set: s } => Accessor::TextList {
                item,
                get: list_getter(move |r: &R| g(get(r))),
                set: Arc::new(move |r: &mut R, v| s(get_mut(r), v)),
            },
            Self::Attributes { entry, get: g, set: s } => Accessor::Attributes {
                entry,
                get: attributes_getter(move |r: &R| g(get(r))),
                set: Arc::new(move |r: &mut R, v| s(get_mut(r), v)),
            },
        }
    }
}

// =============================================================================
// Descriptor
// =============================================================================

/// One field of a record type.
pub struct FieldDescriptor<R> {
    name: String,
    accessor: Accessor<R>,
}

impl<R> FieldDescriptor<R> {
    /// Element name, identical to the field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        match self.accessor {
            Accessor::Integer { .. } => FieldKind::Integer,
            Accessor::Float { .. } => FieldKind::Float,
            Accessor::Text { .. } => FieldKind::Text,
            Accessor::TextList { .. } => FieldKind::TextList,
            Accessor::Attributes { .. } => FieldKind::Attributes,
        }
    }

    /// Whether the field is long free text, emitted as a literal block.
    pub fn is_literal(&self) -> bool {
        matches!(self.accessor, Accessor::Text { literal: true, .. })
    }

    /// Entry element name for list kinds.
    pub fn entry_tag(&self) -> Option<&str> {
        match &self.accessor {
            Accessor::TextList { item, .. } => Some(item),
            Accessor::Attributes { entry, .. } => Some(entry),
            _ => None,
        }
    }

    pub(crate) fn accessor(&self) -> &Accessor<R> {
        &self.accessor
    }
}

impl<R> fmt::Debug for FieldDescriptor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("literal", &self.is_literal())
            .field("entry_tag", &self.entry_tag())
            .finish()
    }
}

/// Ordered, immutable field map of a record type.
pub struct SchemaDescriptor<R> {
    root_tag: String,
    record_tag: String,
    fields: Vec<FieldDescriptor<R>>,
}

impl<R> SchemaDescriptor<R> {
    /// Tag of the document's root container.
    pub fn root_tag(&self) -> &str {
        &self.root_tag
    }

    /// Tag of each record element.
    pub fn record_tag(&self) -> &str {
        &self.record_tag
    }

    pub fn fields(&self) -> &[FieldDescriptor<R>] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor<R>> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Ordered (name, kind) pairs.
    pub fn summary(&self) -> Vec<(&str, FieldKind)> {
        self.fields.iter().map(|f| (f.name(), f.kind())).collect()
    }
}

impl<R> fmt::Debug for SchemaDescriptor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaDescriptor")
            .field("root_tag", &self.root_tag)
            .field("record_tag", &self.record_tag)
            .field("fields", &self.fields)
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`SchemaDescriptor`]; validation happens in [`SchemaBuilder::build`].
pub struct SchemaBuilder<R> {
    root_tag: String,
    record_tag: String,
    fields: Vec<FieldDescriptor<R>>,
}

impl<R: 'static> SchemaBuilder<R> {
    pub fn new(root_tag: impl Into<String>, record_tag: impl Into<String>) -> Self {
        Self {
            root_tag: root_tag.into(),
            record_tag: record_tag.into(),
            fields: Vec::new(),
        }
    }

    fn push(mut self, name: impl Into<String>, accessor: Accessor<R>) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            accessor,
        });
        self
    }

    pub fn integer<G, S>(self, name: impl Into<String>, get: G, set: S) -> Self
    where
        G: Fn(&R) -> i64 + Send + Sync + 'static,
        S: Fn(&mut R, i64) + Send + Sync + 'static,
    {
        let accessor = Accessor::Integer {
            get: Arc::new(move |r: &R| Some(get(r))),
            set: Arc::new(set),
        };
        self.push(name, accessor)
    }

    pub fn float<G, S>(self, name: impl Into<String>, get: G, set: S) -> Self
    where
        G: Fn(&R) -> f64 + Send + Sync + 'static,
        S: Fn(&mut R, f64) + Send + Sync + 'static,
    {
        let accessor = Accessor::Float {
            get: Arc::new(move |r: &R| Some(get(r))),
            set: Arc::new(set),
        };
        self.push(name, accessor)
    }

    pub fn text<G, S>(self, name: impl Into<String>, get: G, set: S) -> Self
    where
        G: for<'a> Fn(&'a R) -> &'a str + Send + Sync + 'static,
        S: Fn(&mut R, String) + Send + Sync + 'static,
    {
        self.text_field(name, text_getter(move |r: &R| Some(get(r))), set, false)
    }

    pub fn optional_text<G, S>(self, name: impl Into<String>, get: G, set: S) -> Self
    where
        G: for<'a> Fn(&'a R) -> Option<&'a str> + Send + Sync + 'static,
        S: Fn(&mut R, String) + Send + Sync + 'static,
    {
        self.text_field(name, text_getter(get), set, false)
    }

    /// Free text that may already contain escaped markup.
    pub fn long_text<G, S>(self, name: impl Into<String>, get: G, set: S) -> Self
    where
        G: for<'a> Fn(&'a R) -> &'a str + Send + Sync + 'static,
        S: Fn(&mut R, String) + Send + Sync + 'static,
    {
        self.text_field(name, text_getter(move |r: &R| Some(get(r))), set, true)
    }

    pub fn optional_long_text<G, S>(self, name: impl Into<String>, get: G, set: S) -> Self
    where
        G: for<'a> Fn(&'a R) -> Option<&'a str> + Send + Sync + 'static,
        S: Fn(&mut R, String) + Send + Sync + 'static,
    {
        self.text_field(name, text_getter(get), set, true)
    }

    fn text_field<S>(self, name: impl Into<String>, get: TextGetter<R>, set: S, literal: bool) -> Self
    where
        S: Fn(&mut R, String) + Send + Sync + 'static,
    {
        let accessor = Accessor::Text {
            get,
            set: Arc::new(set),
            literal,
        };
        self.push(name, accessor)
    }

    /// Container element holding one `item_tag` child per entry.
    pub fn text_list<G, S>(self, name: impl Into<String>, item_tag: impl Into<String>, get: G, set: S) -> Self
    where
        G: for<'a> Fn(&'a R) -> &'a [String] + Send + Sync + 'static,
        S: Fn(&mut R, Vec<String>) + Send + Sync + 'static,
    {
        let accessor = Accessor::TextList {
            item: item_tag.into(),
            get: list_getter(get),
            set: Arc::new(set),
        };
        self.push(name, accessor)
    }

    /// Container element holding one `entry_tag` child with `name`/`value` per attribute.
    pub fn attributes<G, S>(self, name: impl Into<String>, entry_tag: impl Into<String>, get: G, set: S) -> Self
    where
        G: for<'a> Fn(&'a R) -> &'a AttributeList + Send + Sync + 'static,
        S: Fn(&mut R, AttributeList) + Send + Sync + 'static,
    {
        let accessor = Accessor::Attributes {
            entry: entry_tag.into(),
            get: attributes_getter(get),
            set: Arc::new(set),
        };
        self.push(name, accessor)
    }

    /// Append every field of `base`, reached through the embedding projections.
    pub fn extend<B: 'static>(
        mut self,
        base: &SchemaDescriptor<B>,
        get: fn(&R) -> &B,
        get_mut: fn(&mut R) -> &mut B,
    ) -> Self {
        for field in base.fields() {
            self.fields.push(FieldDescriptor {
                name: field.name.clone(),
                accessor: field.accessor.project(get, get_mut),
            });
        }
        self
    }

    pub fn build(self) -> SchemaResult<SchemaDescriptor<R>> {
        if self.fields.is_empty() {
            return Err(SchemaError::Empty);
        }
        validate_name(&self.root_tag)?;
        validate_name(&self.record_tag)?;
        if self.root_tag == self.record_tag {
            return Err(SchemaError::TagConflict(self.root_tag));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            validate_name(&field.name)?;
            if let Some(entry) = field.entry_tag() {
                validate_name(entry)?;
            }
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
        }

        Ok(SchemaDescriptor {
            root_tag: self.root_tag,
            record_tag: self.record_tag,
            fields: self.fields,
        })
    }
}

/// Element names: a letter or `_`, then letters, digits, `_`, `-` or `.`.
fn validate_name(name: &str) -> SchemaResult<()> {
    let invalid = |reason| SchemaError::InvalidName {
        name: name.to_string(),
        reason,
    };

    let mut chars = name.chars();
    match chars.next() {
        None => return Err(invalid("empty")),
        Some(c) if !(c.is_alphabetic() || c == '_') => {
            return Err(invalid("must start with a letter or underscore"))
        }
        Some(_) => {}
    }
    if chars.any(|c| !(c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))) {
        return Err(invalid("contains a character not allowed in element names"));
    }
    if name.get(..3).is_some_and(|prefix| prefix.eq_ignore_ascii_case("xml")) {
        return Err(invalid("names starting with 'xml' are reserved"));
    }
    Ok(())
}
