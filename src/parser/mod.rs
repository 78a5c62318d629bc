// Module declarations
pub mod markup;
mod mapper;
mod result_shape;
pub(crate) mod statement;

// Re-exports
pub use mapper::{MappingUnit, XmlMapperBuilder};
pub use markup::{Element, Node, parse_document};

use crate::core::{MapperError, Result};

/// Qualifies `base` with the current namespace.
///
/// References (`refid`, `resultMap`, `extends`, ...) that already contain a
/// dot are taken as fully qualified. Declared ids may repeat their own
/// namespace but must not point into another one.
pub fn apply_namespace(namespace: &str, base: &str, is_reference: bool) -> Result<String> {
    if is_reference {
        if base.contains('.') {
            return Ok(base.to_string());
        }
    } else {
        if base
            .strip_prefix(namespace)
            .is_some_and(|rest| rest.starts_with('.'))
        {
            return Ok(base.to_string());
        }
        if base.contains('.') {
            return Err(MapperError::DottedId(base.to_string()));
        }
    }
    Ok(format!("{namespace}.{base}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_namespace_to_reference() {
        assert_eq!(apply_namespace("ns", "shape", true).unwrap(), "ns.shape");
        assert_eq!(apply_namespace("ns", "other.shape", true).unwrap(), "other.shape");
    }

    #[test]
    fn test_apply_namespace_to_declaration() {
        assert_eq!(apply_namespace("ns", "find", false).unwrap(), "ns.find");
        assert_eq!(apply_namespace("ns", "ns.find", false).unwrap(), "ns.find");
        assert!(matches!(
            apply_namespace("ns", "other.find", false),
            Err(MapperError::DottedId(_))
        ));
        assert!(apply_namespace("ns", "nsx.find", false).is_err());
    }
}
