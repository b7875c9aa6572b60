//! Domain models for catalog records.
//!
//! - [`Product`] - the base catalog entry
//! - [`ProductWithName`] - a product carrying a manufacturer-facing secondary name
//! - [`Attribute`] / [`AttributeList`] - unique-by-name (name, value) pairs
//! - [`CatalogRecord`] - the capability operations are written against

use serde::{Deserialize, Serialize};

use crate::error::SchemaResult;
use crate::schema::{Record, SchemaBuilder, SchemaDescriptor};

// =============================================================================
// Attributes
// =============================================================================

/// A single (name, value) attribute of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Ordered attribute list whose names are unique.
///
/// The only mutation is [`AttributeList::upsert`]; every constructor routes
/// through it, so a duplicate name can never be introduced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Attribute>", into = "Vec<Attribute>")]
pub struct AttributeList {
    items: Vec<Attribute>,
}

impl AttributeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`, appending when the name is new.
    ///
    /// An existing attribute keeps its position.
    pub fn upsert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.items.iter_mut().find(|a| a.name == name) {
            Some(existing) => existing.value = value,
            None => self.items.push(Attribute { name, value }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Attribute] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<Attribute> for AttributeList {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        let mut list = Self::new();
        for attr in iter {
            list.upsert(attr.name, attr.value);
        }
        list
    }
}

impl From<Vec<Attribute>> for AttributeList {
    fn from(items: Vec<Attribute>) -> Self {
        items.into_iter().collect()
    }
}

impl From<AttributeList> for Vec<Attribute> {
    fn from(list: AttributeList) -> Self {
        list.items
    }
}

impl<'a> IntoIterator for &'a AttributeList {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

// =============================================================================
// Capability
// =============================================================================

/// What pipeline operations may rely on, independent of the concrete record type.
pub trait CatalogRecord: Record {
    /// Primary display name.
    fn name(&self) -> &str;

    fn manufacturer_name(&self) -> &str;

    fn attributes(&self) -> &AttributeList;

    fn attributes_mut(&mut self) -> &mut AttributeList;

    /// Name plus every present free-text field.
    fn free_text_mut(&mut self) -> Vec<&mut String>;

    /// Secondary name, for record types that carry one.
    fn secondary_name(&self) -> Option<&str> {
        None
    }
}

// =============================================================================
// Product
// =============================================================================

/// A catalog product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: i64,
    pub name: String,
    pub quantity: i64,
    pub ean: String,
    pub sku: String,
    pub category_name: String,
    pub manufacturer_name: String,
    pub price: f64,
    pub tax_rate: String,
    pub weight: f64,
    pub width: f64,
    pub height: f64,
    pub length: f64,
    pub description: String,
    #[serde(default)]
    pub description_extra_1: Option<String>,
    #[serde(default)]
    pub description_extra_2: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub attributes: AttributeList,
}

impl Product {
    /// Add or update an attribute.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.upsert(name, value);
    }
}

impl Record for Product {
    fn describe() -> SchemaResult<SchemaDescriptor<Self>> {
        SchemaBuilder::<Self>::new("products", "product")
            .integer("product_id", |p| p.product_id, |p, v| p.product_id = v)
            .text("name", |p| p.name.as_str(), |p, v| p.name = v)
            .integer("quantity", |p| p.quantity, |p, v| p.quantity = v)
            .text("ean", |p| p.ean.as_str(), |p, v| p.ean = v)
            .text("sku", |p| p.sku.as_str(), |p, v| p.sku = v)
            .text("category_name", |p| p.category_name.as_str(), |p, v| p.category_name = v)
            .text(
                "manufacturer_name",
                |p| p.manufacturer_name.as_str(),
                |p, v| p.manufacturer_name = v,
            )
            .float("price", |p| p.price, |p, v| p.price = v)
            .text("tax_rate", |p| p.tax_rate.as_str(), |p, v| p.tax_rate = v)
            .float("weight", |p| p.weight, |p, v| p.weight = v)
            .float("width", |p| p.width, |p, v| p.width = v)
            .float("height", |p| p.height, |p, v| p.height = v)
            .float("length", |p| p.length, |p, v| p.length = v)
            .long_text("description", |p| p.description.as_str(), |p, v| p.description = v)
            .optional_long_text(
                "description_extra_1",
                |p| p.description_extra_1.as_deref(),
                |p, v| p.description_extra_1 = Some(v),
            )
            .optional_long_text(
                "description_extra_2",
                |p| p.description_extra_2.as_deref(),
                |p, v| p.description_extra_2 = Some(v),
            )
            .text_list("images", "image", |p| p.images.as_slice(), |p, v| p.images = v)
            .attributes(
                "attributes",
                "attribute",
                |p| &p.attributes,
                |p, v| p.attributes = v,
            )
            .build()
    }
}

impl CatalogRecord for Product {
    fn name(&self) -> &str {
        &self.name
    }

    fn manufacturer_name(&self) -> &str {
        &self.manufacturer_name
    }

    fn attributes(&self) -> &AttributeList {
        &self.attributes
    }

    fn attributes_mut(&mut self) -> &mut AttributeList {
        &mut self.attributes
    }

    fn free_text_mut(&mut self) -> Vec<&mut String> {
        let mut fields = vec![&mut self.name, &mut self.description];
        fields.extend(self.description_extra_1.as_mut());
        fields.extend(self.description_extra_2.as_mut());
        fields
    }
}

// =============================================================================
// Product with secondary name
// =============================================================================

/// A [`Product`] with an additional manufacturer-facing name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductWithName {
    #[serde(flatten)]
    pub base: Product,
    #[serde(default)]
    pub man_name: Option<String>,
}

impl Record for ProductWithName {
    fn describe() -> SchemaResult<SchemaDescriptor<Self>> {
        let base = Product::describe()?;
        SchemaBuilder::<Self>::new(base.root_tag(), base.record_tag())
            .extend(&base, |p| &p.base, |p| &mut p.base)
            .optional_text("man_name", |p| p.man_name.as_deref(), |p, v| p.man_name = Some(v))
            .build()
    }
}

impl CatalogRecord for ProductWithName {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn manufacturer_name(&self) -> &str {
        &self.base.manufacturer_name
    }

    fn attributes(&self) -> &AttributeList {
        &self.base.attributes
    }

    fn attributes_mut(&mut self) -> &mut AttributeList {
        &mut self.base.attributes
    }

    fn free_text_mut(&mut self) -> Vec<&mut String> {
        self.base.free_text_mut()
    }

    fn secondary_name(&self) -> Option<&str> {
        self.man_name.as_deref()
    }
}
