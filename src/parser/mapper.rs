use std::path::Path;

use super::apply_namespace;
use super::markup::{Element, parse_document};
use super::result_shape::ShapeParser;
use super::statement::build_statement;
use crate::core::{MapperError, Result};
use crate::mapping::{CacheConfig, ParameterMap, ParameterMapping, ParameterMode, ValueType};
use crate::registry::{PendingCacheRef, PendingStatement, Progress, StatementRegistry};

/// Elements that declare statements.
const STATEMENT_ELEMENTS: [&str; 4] = ["select", "insert", "update", "delete"];

/// One mapping document plus the identifiers it is loaded under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingUnit {
    /// Re-parsing the same resource is a no-op.
    pub resource: String,
    /// Expected namespace; the document's own must agree when both are present.
    pub namespace: Option<String>,
    pub source: String,
}

impl MappingUnit {
    pub fn new(resource: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            namespace: None,
            source: source.into(),
        }
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Ok(Self::new(path.display().to_string(), source))
    }
}

/// Parses one mapping unit into the registry.
///
/// Element errors are collected while siblings keep registering; items
/// waiting on something not yet loaded are queued, and every pending queue
/// is retried once the unit is done.
pub struct XmlMapperBuilder<'a> {
    registry: &'a mut StatementRegistry,
    unit: &'a MappingUnit,
}

impl<'a> XmlMapperBuilder<'a> {
    pub fn new(registry: &'a mut StatementRegistry, unit: &'a MappingUnit) -> Self {
        Self { registry, unit }
    }

    pub fn parse(mut self) -> Result<()> {
        let unit = self.unit;
        let resource = unit.resource.as_str();
        if self.registry.is_resource_loaded(resource) {
            tracing::debug!(resource, "mapping unit already loaded");
            return Ok(());
        }

        let root = parse_document(resource, &unit.source)?;
        if root.name != "mapper" {
            return Err(MapperError::Markup {
                resource: resource.to_string(),
                message: format!("expected root element 'mapper', found '{}'", root.name),
            });
        }
        let namespace = self.namespace(&root)?;
        self.registry.mark_resource_loaded(resource);

        let mut errors = Vec::new();
        let mut collect = |result: Result<()>| {
            if let Err(err) = result {
                errors.push(err);
            }
        };

        if let Some(element) = root.first_named("cache-ref") {
            collect(self.cache_ref(&namespace, element));
        }
        if let Some(element) = root.first_named("cache") {
            collect(self.cache(&namespace, element));
        }
        for element in root.elements_named("parameterMap") {
            collect(self.parameter_map(&namespace, element));
        }
        for element in root.elements_named("resultMap") {
            collect(self.result_map(&namespace, element));
        }
        let database_id = self.registry.settings().database_id.clone();
        if database_id.is_some() {
            collect(self.sql_fragments(&namespace, &root, database_id.as_deref()));
        }
        collect(self.sql_fragments(&namespace, &root, None));
        if database_id.is_some() {
            self.statements(&namespace, &root, database_id.as_deref(), &mut collect);
        }
        self.statements(&namespace, &root, None, &mut collect);

        errors.extend(self.registry.retry_pending());
        let (shapes, cache_refs, statements) = self.registry.pending_counts();
        tracing::info!(
            resource,
            namespace = %namespace,
            errors = errors.len(),
            pending_shapes = shapes,
            pending_cache_refs = cache_refs,
            pending_statements = statements,
            "mapping unit parsed"
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MapperError::Unit {
                resource: resource.to_string(),
                errors,
            })
        }
    }

    fn namespace(&self, root: &Element) -> Result<String> {
        let declared = root.attr("namespace").map(str::trim).filter(|ns| !ns.is_empty());
        match (declared, self.unit.namespace.as_deref()) {
            (Some(declared), Some(expected)) if declared != expected => Err(MapperError::NamespaceMismatch {
                resource: self.unit.resource.clone(),
                declared: declared.to_string(),
                expected: expected.to_string(),
            }),
            (Some(ns), _) | (None, Some(ns)) => Ok(ns.to_string()),
            (None, None) => Err(MapperError::EmptyNamespace(self.unit.resource.clone())),
        }
    }

    fn cache_ref(&mut self, namespace: &str, element: &Element) -> Result<()> {
        let target = element.required_attr("namespace")?;
        if let Progress::Blocked(dependency) = self.registry.use_cache_ref(namespace, target) {
            tracing::debug!(namespace, waiting_on = %dependency, "cache-ref deferred");
            self.registry.push_pending_cache_ref(PendingCacheRef {
                namespace: namespace.to_string(),
                target: target.to_string(),
            });
        }
        Ok(())
    }

    fn cache(&mut self, namespace: &str, element: &Element) -> Result<()> {
        let mut config = CacheConfig::new(namespace);
        config.implementation = element.attr("type").map(str::to_string);
        if let Some(eviction) = element.attr("eviction") {
            config.eviction = eviction.to_string();
        }
        config.flush_interval = element.attr_u32("flushInterval")?.map(u64::from);
        config.size = element.attr_u32("size")?.map(|s| s as usize);
        config.read_write = !element.attr_bool("readOnly")?.unwrap_or(false);
        config.blocking = element.attr_bool("blocking")?.unwrap_or(false);
        config.properties = element.properties();
        self.registry.add_cache(&config)
    }

    fn parameter_map(&mut self, namespace: &str, element: &Element) -> Result<()> {
        let id = apply_namespace(namespace, element.required_attr("id")?, false)?;
        let mut mappings = Vec::new();
        for parameter in element.elements_named("parameter") {
            mappings.push(ParameterMapping {
                property: parameter.required_attr("property")?.to_string(),
                value_type: parameter.attr("javaType").map(ValueType::resolve),
                jdbc_type: parameter.attr("jdbcType").map(str::to_string),
                mode: parameter
                    .attr("mode")
                    .map(str::parse::<ParameterMode>)
                    .transpose()?
                    .unwrap_or_default(),
                result_map: parameter
                    .attr("resultMap")
                    .map(|r| apply_namespace(namespace, r, true))
                    .transpose()?,
            });
        }
        self.registry.add_parameter_map(ParameterMap {
            id,
            parameter_type: element.attr("type").map(ValueType::resolve),
            mappings,
        })
    }

    fn result_map(&mut self, namespace: &str, element: &Element) -> Result<()> {
        let parser = ShapeParser {
            resource: &self.unit.resource,
            namespace,
            settings: self.registry.settings(),
        };
        let drafts = parser.drafts(element, "mapper", None, &[])?;
        for draft in drafts {
            if let Err(pending) = self.registry.resolve_shape(draft)? {
                self.registry.push_pending_shape(pending);
            }
        }
        Ok(())
    }

    fn sql_fragments(&mut self, namespace: &str, root: &Element, required: Option<&str>) -> Result<()> {
        for element in root.elements_named("sql") {
            let id = apply_namespace(namespace, element.required_attr("id")?, false)?;
            let database_id = element.attr("databaseId");
            let matches = match required {
                Some(required) => database_id == Some(required),
                None if database_id.is_some() => false,
                None => match self.registry.sql_fragment(&id) {
                    Ok(Some(previous)) => previous.attr("databaseId").is_none(),
                    _ => true,
                },
            };
            if matches {
                self.registry.add_sql_fragment(&id, element.clone())?;
            }
        }
        Ok(())
    }

    fn statements(
        &mut self,
        namespace: &str,
        root: &Element,
        required: Option<&str>,
        collect: &mut impl FnMut(Result<()>),
    ) {
        for element in root.elements().filter(|e| STATEMENT_ELEMENTS.contains(&e.name.as_str())) {
            let pending = PendingStatement {
                resource: self.unit.resource.clone(),
                namespace: namespace.to_string(),
                element: element.clone(),
                required_database_id: required.map(str::to_string),
            };
            match build_statement(self.registry, &pending) {
                Ok(Progress::Done) => {}
                Ok(Progress::Blocked(_)) => self.registry.push_pending_statement(pending),
                Err(err) => collect(Err(err)),
            }
        }
    }
}
