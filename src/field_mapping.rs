use crate::config::{FieldDefinition, MappingConfig};
use crate::error::{ComparatorError, Result};
use crate::schema::{FieldFormat, FieldPolarity, ProductType};
use crate::utils::key_form;
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};

/// A canonical field as seen from one product type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub label: String,
    pub format: FieldFormat,
    pub polarity: FieldPolarity,
    /// Declared aliases in resolution order, followed by the canonical name itself.
    pub aliases: Vec<String>,
    pub plausible_range: Option<(f64, f64)>,
}

impl FieldSpec {
    pub fn is_plausible(&self, value: f64) -> bool {
        match self.plausible_range {
            Some((min, max)) => value >= min && value <= max,
            None => true,
        }
    }

    /// The first `limit` source spellings, used in "expected one of" messages.
    pub fn expected_spellings(&self, limit: usize) -> Vec<&str> {
        self.aliases.iter().take(limit).map(String::as_str).collect()
    }
}

/// Canonical schema of one product type: its required fields in display order and the
/// reverse alias index over every field defined for the type.
#[derive(Debug, Clone)]
pub struct ProductSchema {
    pub product_type: ProductType,
    fields: Vec<FieldSpec>,
    alias_index: BTreeMap<String, String>,
    synthetic_defaults: serde_json::Map<String, serde_json::Value>,
}

impl ProductSchema {
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn required_count(&self) -> usize {
        self.fields.len()
    }

    pub fn aliases_to_canonical(&self) -> &BTreeMap<String, String> {
        &self.alias_index
    }

    pub fn synthetic_defaults(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.synthetic_defaults
    }
}

/// Static, immutable mapping between canonical fields and their source spellings.
///
/// Built once from a [`MappingConfig`]; every inconsistency in the configuration is reported
/// here so that nothing downstream has to handle it.
#[derive(Debug, Clone)]
pub struct FieldMappingTable {
    // Indexed by `ProductType as usize`, in `ProductType::ALL` order.
    products: Vec<ProductSchema>,
}

impl FieldMappingTable {
    pub fn builtin() -> Result<Self> {
        Self::from_config(&MappingConfig::builtin()?)
    }

    pub fn from_config(config: &MappingConfig) -> Result<Self> {
        let mut definitions: BTreeMap<&str, &FieldDefinition> = BTreeMap::new();
        for definition in &config.fields {
            if definitions
                .insert(definition.name.as_str(), definition)
                .is_some()
            {
                return Err(ComparatorError::InvalidConfig(format!(
                    "field '{}' is defined more than once",
                    definition.name
                )));
            }
        }

        let mut products = Vec::with_capacity(ProductType::ALL.len());
        for product_type in ProductType::ALL {
            let product = config
                .products
                .iter()
                .find(|p| p.product_type == product_type)
                .ok_or(ComparatorError::MissingProductDefinition(product_type))?;

            let alias_index = build_alias_index(product_type, &config.fields)?;

            let mut seen = BTreeSet::new();
            let mut fields = Vec::with_capacity(product.required_fields.len());
            for required in &product.required_fields {
                if !seen.insert(required.field.as_str()) {
                    return Err(ComparatorError::InvalidConfig(format!(
                        "field '{}' is required twice for {}",
                        required.field, product_type
                    )));
                }
                let definition = definitions
                    .get(required.field.as_str())
                    .filter(|d| d.product_types.contains(&product_type))
                    .ok_or_else(|| ComparatorError::MissingFieldDefinition {
                        product_type,
                        field: required.field.clone(),
                    })?;
                fields.push(field_spec(definition, required.polarity));
            }

            if fields.is_empty() {
                return Err(ComparatorError::InvalidConfig(format!(
                    "product type {} has no required fields",
                    product_type
                )));
            }

            for key in product.synthetic_defaults.keys() {
                if !seen.contains(key.as_str()) {
                    return Err(ComparatorError::InvalidConfig(format!(
                        "synthetic default '{}' for {} is not a required field",
                        key, product_type
                    )));
                }
            }

            debug!(
                "{}: {} required fields, {} known spellings",
                product_type,
                fields.len(),
                alias_index.len()
            );

            products.push(ProductSchema {
                product_type,
                fields,
                alias_index,
                synthetic_defaults: product.synthetic_defaults.clone(),
            });
        }

        info!(
            "Loaded field mapping table: {} canonical fields across {} product types",
            definitions.len(),
            products.len()
        );

        Ok(Self { products })
    }

    pub fn schema(&self, product_type: ProductType) -> &ProductSchema {
        &self.products[product_type as usize]
    }

    /// Aliases of `field` for `product_type` in resolution order, `None` for a field the
    /// product type does not require.
    pub fn resolve(&self, product_type: ProductType, field: &str) -> Option<&[String]> {
        self.schema(product_type)
            .field(field)
            .map(|f| f.aliases.as_slice())
    }

    /// Reverse lookup: every known spelling, folded with [`key_form`], to its canonical name.
    pub fn aliases_to_canonical(&self, product_type: ProductType) -> &BTreeMap<String, String> {
        self.schema(product_type).aliases_to_canonical()
    }

    pub fn canonical_for(&self, product_type: ProductType, alias: &str) -> Option<&str> {
        self.aliases_to_canonical(product_type)
            .get(&key_form(alias))
            .map(String::as_str)
    }

    pub fn field(&self, product_type: ProductType, field: &str) -> Result<&FieldSpec> {
        self.schema(product_type)
            .field(field)
            .ok_or_else(|| ComparatorError::UnknownField {
                product_type,
                field: field.to_string(),
            })
    }

    pub fn display_label<'a>(&'a self, product_type: ProductType, field: &'a str) -> &'a str {
        self.schema(product_type)
            .field(field)
            .map(|f| f.label.as_str())
            .unwrap_or(field)
    }
}

fn field_spec(definition: &FieldDefinition, polarity: FieldPolarity) -> FieldSpec {
    let mut aliases: Vec<String> = Vec::with_capacity(definition.aliases.len() + 1);
    for alias in definition.aliases.iter().chain(std::iter::once(&definition.name)) {
        if !aliases.contains(alias) {
            aliases.push(alias.clone());
        }
    }

    // Flags never have a magnitude. Text fields still rank when their values parse.
    let polarity = match definition.format {
        FieldFormat::Flag => FieldPolarity::NotComparable,
        _ => polarity,
    };

    FieldSpec {
        name: definition.name.clone(),
        label: definition.label.clone(),
        format: definition.format,
        polarity,
        aliases,
        plausible_range: definition.plausible_range.map(|[min, max]| (min, max)),
    }
}

fn build_alias_index(
    product_type: ProductType,
    fields: &[FieldDefinition],
) -> Result<BTreeMap<String, String>> {
    let mut index: BTreeMap<String, String> = BTreeMap::new();
    for definition in fields
        .iter()
        .filter(|d| d.product_types.contains(&product_type))
    {
        for alias in definition
            .aliases
            .iter()
            .chain(std::iter::once(&definition.name))
        {
            let key = key_form(alias);
            if key.is_empty() {
                return Err(ComparatorError::InvalidConfig(format!(
                    "field '{}' declares an empty alias",
                    definition.name
                )));
            }
            match index.get(&key) {
                Some(existing) if existing != &definition.name => {
                    return Err(ComparatorError::AliasCollision {
                        product_type,
                        alias: alias.clone(),
                        first: existing.clone(),
                        second: definition.name.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    index.insert(key, definition.name.clone());
                }
            }
        }
    }
    Ok(index)
}
