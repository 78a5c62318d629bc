use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashSet;

use super::types::ValueType;
use crate::core::{MapperError, Result};

/// How unmapped columns are mapped onto properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoMapping {
    None,
    /// Only shapes without nested result shapes are auto-mapped.
    #[default]
    Partial,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MappingKind {
    #[default]
    Result,
    Association,
    Collection,
}

/// One column-to-property rule of a [`ResultShape`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultMapping {
    pub property: Option<String>,
    pub column: Option<String>,
    /// `{prop=col,...}` pairs passed to a nested select.
    pub composites: Vec<(String, String)>,
    pub value_type: Option<ValueType>,
    pub of_type: Option<ValueType>,
    pub jdbc_type: Option<String>,
    pub nested_select: Option<String>,
    pub nested_result_map: Option<String>,
    pub column_prefix: Option<String>,
    pub not_null_columns: Vec<String>,
    pub id: bool,
    pub constructor: bool,
    pub kind: MappingKind,
    pub lazy: bool,
    pub result_set: Option<String>,
    pub foreign_column: Option<String>,
}

impl ResultMapping {
    pub fn column(property: &str, column: &str) -> Self {
        Self {
            property: Some(property.to_string()),
            column: Some(column.to_string()),
            ..Self::default()
        }
    }

    pub fn validate(&self, shape_id: &str) -> Result<()> {
        let malformed = |message: String| MapperError::MalformedShape {
            id: shape_id.to_string(),
            message,
        };
        let name = self.property.as_deref().unwrap_or("<unnamed>");
        if self.nested_select.is_some() && self.nested_result_map.is_some() {
            return Err(malformed(format!(
                "cannot define both nestedQueryId and nestedResultMapId in property '{name}'"
            )));
        }
        if self.nested_select.is_none() && !self.composites.is_empty() {
            return Err(malformed(format!(
                "composite column '{{...}}' without a nested select in property '{name}'"
            )));
        }
        if self.result_set.is_some() && self.nested_result_map.is_none() && self.nested_select.is_none() {
            return Err(malformed(format!("resultSet without a nested result shape in property '{name}'")));
        }
        Ok(())
    }

    /// Columns this mapping reads, upper-cased.
    fn columns(&self) -> impl Iterator<Item = String> + '_ {
        self.column
            .iter()
            .map(|c| c.to_ascii_uppercase())
            .chain(self.composites.iter().map(|(_, c)| c.to_ascii_uppercase()))
    }
}

/// Picks an alternate shape by the value of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discriminator {
    pub column: String,
    pub value_type: Option<ValueType>,
    /// Column value (as displayed) to shape id.
    pub cases: IndexMap<String, String>,
}

/// A declarative column-to-property mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultShape {
    pub id: String,
    pub result_type: ValueType,
    pub mappings: Vec<ResultMapping>,
    pub constructor_mappings: Vec<ResultMapping>,
    pub discriminator: Option<Discriminator>,
    pub auto_mapping: Option<bool>,
    pub has_nested_result_maps: bool,
    pub has_nested_queries: bool,
    mapped_columns: HashSet<String>,
    mapped_properties: HashSet<String>,
}

impl ResultShape {
    /// Splits constructor mappings off and records the columns already covered.
    pub fn new(
        id: impl Into<String>,
        result_type: ValueType,
        mappings: Vec<ResultMapping>,
        discriminator: Option<Discriminator>,
        auto_mapping: Option<bool>,
    ) -> Result<Self> {
        let id = id.into();
        let mut shape = Self {
            id,
            result_type,
            mappings: Vec::new(),
            constructor_mappings: Vec::new(),
            discriminator,
            auto_mapping,
            has_nested_result_maps: false,
            has_nested_queries: false,
            mapped_columns: HashSet::new(),
            mapped_properties: HashSet::new(),
        };
        for mapping in mappings {
            mapping.validate(&shape.id)?;
            shape.has_nested_result_maps |= mapping.nested_result_map.is_some() && mapping.result_set.is_none();
            shape.has_nested_queries |= mapping.nested_select.is_some();
            shape.mapped_columns.extend(mapping.columns());
            if let Some(property) = &mapping.property {
                shape.mapped_properties.insert(property.clone());
            }
            if mapping.constructor {
                shape.constructor_mappings.push(mapping);
            } else {
                shape.mappings.push(mapping);
            }
        }
        Ok(shape)
    }

    /// The implicit shape of a statement declaring only a result type.
    pub fn inline(id: impl Into<String>, result_type: ValueType) -> Self {
        Self {
            id: id.into(),
            result_type,
            mappings: Vec::new(),
            constructor_mappings: Vec::new(),
            discriminator: None,
            auto_mapping: None,
            has_nested_result_maps: false,
            has_nested_queries: false,
            mapped_columns: HashSet::new(),
            mapped_properties: HashSet::new(),
        }
    }

    /// Mappings that identify a row; every mapping when none is flagged.
    pub fn id_mappings(&self) -> Vec<&ResultMapping> {
        let flagged: Vec<_> = self.mappings.iter().chain(&self.constructor_mappings).filter(|m| m.id).collect();
        if flagged.is_empty() {
            self.mappings.iter().chain(&self.constructor_mappings).collect()
        } else {
            flagged
        }
    }

    pub fn maps_column(&self, column: &str) -> bool {
        self.mapped_columns.contains(&column.to_ascii_uppercase())
    }

    pub fn maps_property(&self, property: &str) -> bool {
        self.mapped_properties.contains(property)
    }

    /// Nested shape ids this shape must see registered before it is usable.
    pub fn nested_shape_ids(&self) -> impl Iterator<Item = &str> {
        self.mappings
            .iter()
            .chain(&self.constructor_mappings)
            .filter_map(|m| m.nested_result_map.as_deref())
            .chain(
                self.discriminator
                    .iter()
                    .flat_map(|d| d.cases.values().map(String::as_str)),
            )
    }

    /// Merges a parent's mappings under this shape: own mappings win by property,
    /// own constructor mappings replace the parent's entirely.
    pub fn extend_from(&mut self, parent: &Self) {
        let own_constructor = !self.constructor_mappings.is_empty();
        if !own_constructor {
            self.constructor_mappings = parent.constructor_mappings.clone();
        }
        for mapping in &parent.mappings {
            let overridden = mapping
                .property
                .as_deref()
                .is_some_and(|p| self.maps_property(p));
            if !overridden {
                self.mappings.push(mapping.clone());
            }
        }
        self.mapped_columns = self
            .mappings
            .iter()
            .chain(&self.constructor_mappings)
            .flat_map(ResultMapping::columns)
            .collect();
        self.mapped_properties = self
            .mappings
            .iter()
            .chain(&self.constructor_mappings)
            .filter_map(|m| m.property.clone())
            .collect();
        self.has_nested_result_maps |= parent.has_nested_result_maps;
        self.has_nested_queries |= parent.has_nested_queries;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_shape() -> ResultShape {
        let mut id = ResultMapping::column("id", "user_id");
        id.id = true;
        ResultShape::new(
            "ns.user",
            ValueType::Object("User".into()),
            vec![id, ResultMapping::column("name", "user_name")],
            None,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_mapped_columns_are_case_insensitive() {
        let shape = user_shape();
        assert!(shape.maps_column("USER_ID"));
        assert!(shape.maps_column("user_name"));
        assert!(!shape.maps_column("email"));
        assert_eq!(shape.id_mappings().len(), 1);
    }

    #[test]
    fn test_both_select_and_result_map_is_rejected() {
        let mapping = ResultMapping {
            property: Some("orders".into()),
            nested_select: Some("ns.orders".into()),
            nested_result_map: Some("ns.order".into()),
            ..ResultMapping::default()
        };
        let err = ResultShape::new("ns.x", ValueType::Map, vec![mapping], None, None).unwrap_err();
        assert!(matches!(err, MapperError::MalformedShape { .. }));
    }

    #[test]
    fn test_extend_keeps_child_overrides() {
        let mut child = ResultShape::new(
            "ns.admin",
            ValueType::Map,
            vec![ResultMapping::column("name", "admin_name")],
            None,
            None,
        )
        .unwrap();
        child.extend_from(&user_shape());

        let columns: Vec<_> = child
            .mappings
            .iter()
            .map(|m| m.column.as_deref().unwrap_or_default())
            .collect();
        assert_eq!(columns, vec!["admin_name", "user_id"]);
        assert!(child.maps_column("user_id"));
    }
}
