use std::str::FromStr;

use super::types::ValueType;
use crate::core::MapperError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParameterMode {
    #[default]
    In,
    Out,
    InOut,
}

impl FromStr for ParameterMode {
    type Err = MapperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IN" => Ok(Self::In),
            "OUT" => Ok(Self::Out),
            "INOUT" => Ok(Self::InOut),
            _ => Err(MapperError::InvalidAttribute {
                attribute: "mode".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterMapping {
    pub property: String,
    pub value_type: Option<ValueType>,
    pub jdbc_type: Option<String>,
    pub mode: ParameterMode,
    pub result_map: Option<String>,
}

/// Legacy `<parameterMap>`: ordered properties feeding bare `?` markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterMap {
    pub id: String,
    pub parameter_type: Option<ValueType>,
    pub mappings: Vec<ParameterMapping>,
}
