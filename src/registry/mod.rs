/// Registry module - every compiled definition, keyed by namespace-qualified id
///
/// Structure:
/// - strict_map: full-id / short-id maps with duplicate and ambiguity checks
/// - pending: work items waiting on a dependency
///
/// Population happens single-threaded through `RegistryBuilder`; once frozen
/// into an `Arc` the registry only serves lookups (plus the method cache).
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::binding::{MapperInterface, MapperMethod};
use crate::config::Settings;
use crate::core::{Dependency, MapperError, Result, UnresolvedElement};
use crate::executor::{DefaultResultAssembler, ResultAssembler};
use crate::mapping::{
    Cache, CacheConfig, CacheFactory, DefaultCacheFactory, LanguageDriver, MappedStatement, ParameterMap,
    ResultShape, TextLanguageDriver,
};
use crate::parser::markup::Element;
use crate::parser::statement::{build_statement, statement_blocker};
use crate::parser::{MappingUnit, XmlMapperBuilder};

pub mod pending;
pub mod strict_map;

pub use pending::{PendingCacheRef, PendingQueue, PendingShape, PendingStatement, Progress};
pub use strict_map::StrictMap;

/// Name of the language driver used when a statement declares none.
pub const DEFAULT_LANGUAGE: &str = "text";

type MethodKey = (String, String);

pub struct StatementRegistry {
    settings: Settings,
    statements: StrictMap<Arc<MappedStatement>>,
    result_shapes: StrictMap<Arc<ResultShape>>,
    parameter_maps: StrictMap<Arc<ParameterMap>>,
    sql_fragments: StrictMap<Element>,
    /// Caches by owning namespace.
    caches: HashMap<String, Arc<dyn Cache>>,
    /// Namespace to the namespace whose cache it uses.
    namespace_caches: HashMap<String, String>,
    unresolved_cache_refs: HashMap<String, String>,
    loaded_resources: HashSet<String>,
    pending_shapes: PendingQueue<PendingShape>,
    pending_cache_refs: PendingQueue<PendingCacheRef>,
    pending_statements: PendingQueue<PendingStatement>,
    language_drivers: HashMap<String, Arc<dyn LanguageDriver>>,
    assembler: Arc<dyn ResultAssembler>,
    cache_factory: Arc<dyn CacheFactory>,
    mappers: HashMap<String, Arc<MapperInterface>>,
    methods: RwLock<HashMap<MethodKey, Arc<MapperMethod>>>,
}

impl StatementRegistry {
    pub fn new(settings: Settings) -> Self {
        let mut language_drivers: HashMap<String, Arc<dyn LanguageDriver>> = HashMap::new();
        language_drivers.insert(DEFAULT_LANGUAGE.to_string(), Arc::new(TextLanguageDriver));
        Self {
            settings,
            statements: StrictMap::new("Mapped Statements collection"),
            result_shapes: StrictMap::new("Result Maps collection"),
            parameter_maps: StrictMap::new("Parameter Maps collection"),
            sql_fragments: StrictMap::new("XML fragments parsed from previous mappers"),
            caches: HashMap::new(),
            namespace_caches: HashMap::new(),
            unresolved_cache_refs: HashMap::new(),
            loaded_resources: HashSet::new(),
            pending_shapes: PendingQueue::default(),
            pending_cache_refs: PendingQueue::default(),
            pending_statements: PendingQueue::default(),
            language_drivers,
            assembler: Arc::new(DefaultResultAssembler),
            cache_factory: Arc::new(DefaultCacheFactory),
            mappers: HashMap::new(),
            methods: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // ========== Statements ==========

    pub fn add_statement(&mut self, statement: MappedStatement) -> Result<()> {
        let id = statement.id.clone();
        self.statements.insert(&id, Arc::new(statement))
    }

    pub fn statement(&self, id: &str) -> Result<Arc<MappedStatement>> {
        self.statements
            .get(id)?
            .cloned()
            .ok_or_else(|| MapperError::StatementNotFound(id.to_string()))
    }

    pub fn has_statement(&self, id: &str) -> bool {
        self.statements.contains_key(id)
    }

    /// Full ids of every registered statement, sorted.
    pub fn statement_ids(&self) -> Vec<&str> {
        let mut ids: Vec<_> = self.statements.entries().map(|(id, _)| id).collect();
        ids.sort_unstable();
        ids
    }

    // ========== Result shapes ==========

    pub fn add_result_shape(&mut self, shape: ResultShape) -> Result<()> {
        let id = shape.id.clone();
        self.result_shapes.insert(&id, Arc::new(shape))
    }

    pub fn result_shape(&self, id: &str) -> Result<Arc<ResultShape>> {
        self.result_shapes
            .get(id)?
            .cloned()
            .ok_or_else(|| MapperError::ShapeNotFound(id.to_string()))
    }

    pub fn has_result_shape(&self, id: &str) -> bool {
        self.result_shapes.contains_key(id)
    }

    // ========== Parameter maps and fragments ==========

    pub fn add_parameter_map(&mut self, map: ParameterMap) -> Result<()> {
        let id = map.id.clone();
        self.parameter_maps.insert(&id, Arc::new(map))
    }

    pub fn parameter_map(&self, id: &str) -> Result<Option<Arc<ParameterMap>>> {
        Ok(self.parameter_maps.get(id)?.cloned())
    }

    pub fn add_sql_fragment(&mut self, id: &str, fragment: Element) -> Result<()> {
        self.sql_fragments.insert(id, fragment)
    }

    pub fn sql_fragment(&self, id: &str) -> Result<Option<&Element>> {
        self.sql_fragments.get(id)
    }

    pub fn has_sql_fragment(&self, id: &str) -> bool {
        self.sql_fragments.contains_key(id)
    }

    // ========== Caches ==========

    /// Creates and registers the cache owned by `config.namespace`.
    pub fn add_cache(&mut self, config: &CacheConfig) -> Result<()> {
        let cache = self.cache_factory.create(config)?;
        let namespace = config.namespace.clone();
        if self.caches.contains_key(&namespace) {
            return Err(MapperError::Duplicate {
                collection: "Caches collection",
                id: namespace,
            });
        }
        self.caches.insert(namespace.clone(), cache);
        self.namespace_caches.insert(namespace.clone(), namespace.clone());
        self.unresolved_cache_refs.remove(&namespace);
        Ok(())
    }

    /// Points `namespace` at the cache of `target`, once `target` has one.
    pub fn use_cache_ref(&mut self, namespace: &str, target: &str) -> Progress {
        match self.namespace_caches.get(target).cloned() {
            Some(owner) => {
                self.namespace_caches.entry(namespace.to_string()).or_insert(owner);
                self.unresolved_cache_refs.remove(namespace);
                Progress::Done
            }
            None => {
                if !self.namespace_caches.contains_key(namespace) {
                    self.unresolved_cache_refs
                        .insert(namespace.to_string(), target.to_string());
                }
                Progress::Blocked(Dependency::CacheRef(target.to_string()))
            }
        }
    }

    /// Target of a cache link that has not resolved yet.
    pub fn unresolved_cache_ref(&self, namespace: &str) -> Option<&str> {
        self.unresolved_cache_refs.get(namespace).map(String::as_str)
    }

    /// Namespace owning the cache that `namespace` uses.
    pub fn cache_owner(&self, namespace: &str) -> Option<&str> {
        self.namespace_caches.get(namespace).map(String::as_str)
    }

    pub fn cache_for(&self, namespace: &str) -> Option<Arc<dyn Cache>> {
        self.namespace_caches
            .get(namespace)
            .and_then(|owner| self.caches.get(owner))
            .cloned()
    }

    pub fn cache_namespaces(&self) -> impl Iterator<Item = &str> {
        self.caches.keys().map(String::as_str)
    }

    // ========== Resources and plug points ==========

    pub fn is_resource_loaded(&self, resource: &str) -> bool {
        self.loaded_resources.contains(resource)
    }

    pub fn mark_resource_loaded(&mut self, resource: &str) {
        self.loaded_resources.insert(resource.to_string());
    }

    pub fn language_driver(&self, name: Option<&str>) -> Result<Arc<dyn LanguageDriver>> {
        let name = name.unwrap_or(DEFAULT_LANGUAGE);
        self.language_drivers
            .get(name)
            .cloned()
            .ok_or_else(|| MapperError::UnknownLanguage(name.to_string()))
    }

    pub fn assembler(&self) -> &Arc<dyn ResultAssembler> {
        &self.assembler
    }

    // ========== Mapper interfaces ==========

    pub fn add_mapper(&mut self, mapper: MapperInterface) -> Result<()> {
        if self.mappers.contains_key(&mapper.name) {
            return Err(MapperError::Duplicate {
                collection: "Mapper registry",
                id: mapper.name,
            });
        }
        self.mappers.insert(mapper.name.clone(), Arc::new(mapper));
        Ok(())
    }

    pub fn mapper(&self, name: &str) -> Result<Arc<MapperInterface>> {
        self.mappers
            .get(name)
            .cloned()
            .ok_or_else(|| MapperError::UnknownMapper(name.to_string()))
    }

    pub fn has_mapper(&self, name: &str) -> bool {
        self.mappers.contains_key(name)
    }

    /// Cached binding of `interface.method`, built on first use.
    pub fn mapper_method(&self, interface: &str, method: &str) -> Result<Arc<MapperMethod>> {
        let key = (interface.to_string(), method.to_string());
        if let Some(found) = self.methods.read().get(&key) {
            return Ok(Arc::clone(found));
        }
        let mapper = self.mapper(interface)?;
        let built = Arc::new(MapperMethod::new(self, &mapper, method)?);
        self.methods.write().insert(key, Arc::clone(&built));
        Ok(built)
    }

    // ========== Deferred resolution ==========

    pub fn push_pending_shape(&self, pending: PendingShape) {
        self.pending_shapes.push(pending);
    }

    pub fn push_pending_cache_ref(&self, pending: PendingCacheRef) {
        self.pending_cache_refs.push(pending);
    }

    pub fn push_pending_statement(&self, pending: PendingStatement) {
        self.pending_statements.push(pending);
    }

    pub fn pending_counts(&self) -> (usize, usize, usize) {
        (
            self.pending_shapes.len(),
            self.pending_cache_refs.len(),
            self.pending_statements.len(),
        )
    }

    fn shape_blocker(&self, pending: &PendingShape, assumed: &HashSet<String>) -> Option<Dependency> {
        if let Some(parent) = &pending.extends {
            if !self.has_result_shape(parent) {
                return Some(Dependency::ParentShape(parent.clone()));
            }
        }
        pending
            .shape
            .nested_shape_ids()
            .find(|id| *id != pending.shape.id && !self.has_result_shape(id) && !assumed.contains(*id))
            .map(|id| Dependency::NestedShape(id.to_string()))
    }

    fn finalize_shape(&mut self, pending: PendingShape) -> Result<()> {
        let PendingShape { mut shape, extends, .. } = pending;
        if let Some(parent) = extends {
            let parent = self.result_shape(&parent)?;
            shape.extend_from(&parent);
        }
        self.add_result_shape(shape)
    }

    /// Registers `pending` unless a dependency is still missing.
    pub fn resolve_shape(&mut self, pending: PendingShape) -> Result<std::result::Result<(), PendingShape>> {
        match self.shape_blocker(&pending, &HashSet::new()) {
            Some(dependency) => {
                tracing::debug!(shape = %pending.shape.id, waiting_on = %dependency, "result shape deferred");
                Ok(Err(pending))
            }
            None => self.finalize_shape(pending).map(Ok),
        }
    }

    fn retry_shapes(&mut self, errors: &mut Vec<MapperError>) {
        loop {
            let items = self.pending_shapes.take();
            if items.is_empty() {
                return;
            }
            let before = items.len();
            let mut blocked = Vec::new();
            for item in items {
                if self.shape_blocker(&item, &HashSet::new()).is_some() {
                    blocked.push(item);
                } else if let Err(err) = self.finalize_shape(item) {
                    errors.push(err);
                }
            }
            let progressed = blocked.len() < before;
            self.pending_shapes.restore(blocked);
            if !progressed {
                break;
            }
        }
        self.relax_shape_cycles(errors);
    }

    /// Finalizes shapes that are blocked only on each other through nested
    /// references. Parents named by `extends` must always exist first.
    fn relax_shape_cycles(&mut self, errors: &mut Vec<MapperError>) {
        let items = self.pending_shapes.take();
        let (mut candidates, mut rest): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|p| p.extends.as_ref().is_none_or(|parent| self.has_result_shape(parent)));
        loop {
            let ids: HashSet<String> = candidates.iter().map(|p| p.shape.id.clone()).collect();
            let (ready, excluded): (Vec<_>, Vec<_>) = candidates
                .into_iter()
                .partition(|p| self.shape_blocker(p, &ids).is_none());
            let done = excluded.is_empty();
            candidates = ready;
            rest.extend(excluded);
            if done {
                break;
            }
        }
        for item in candidates {
            tracing::debug!(shape = %item.shape.id, "result shape finalized within a nested cycle");
            if let Err(err) = self.finalize_shape(item) {
                errors.push(err);
            }
        }
        self.pending_shapes.restore(rest);
    }

    fn retry_cache_refs(&mut self) {
        loop {
            let items = self.pending_cache_refs.take();
            if items.is_empty() {
                return;
            }
            let before = items.len();
            let blocked: Vec<_> = items
                .into_iter()
                .filter(|item| self.use_cache_ref(&item.namespace, &item.target) != Progress::Done)
                .collect();
            let progressed = blocked.len() < before;
            self.pending_cache_refs.restore(blocked);
            if !progressed {
                return;
            }
        }
    }

    fn retry_statements(&mut self, errors: &mut Vec<MapperError>) {
        loop {
            let items = self.pending_statements.take();
            if items.is_empty() {
                return;
            }
            let before = items.len();
            let mut blocked = Vec::new();
            for item in items {
                match build_statement(self, &item) {
                    Ok(Progress::Done) => {}
                    Ok(Progress::Blocked(_)) => blocked.push(item),
                    Err(err) => errors.push(err),
                }
            }
            let progressed = blocked.len() < before;
            self.pending_statements.restore(blocked);
            if !progressed {
                return;
            }
        }
    }

    /// Retries every pending queue: shapes, then cache links, then statements.
    /// Returns the definition errors hit by items that became resolvable.
    pub fn retry_pending(&mut self) -> Vec<MapperError> {
        let mut errors = Vec::new();
        self.retry_shapes(&mut errors);
        self.retry_cache_refs();
        self.retry_statements(&mut errors);
        errors
    }

    /// Final pass. Anything still pending becomes one `Unresolved` error.
    pub fn finish(&mut self) -> Result<()> {
        let mut errors = self.retry_pending();
        let mut unresolved = Vec::new();

        let shapes = self.pending_shapes.take();
        for item in &shapes {
            if let Some(waiting_on) = self.shape_blocker(item, &HashSet::new()) {
                unresolved.push(UnresolvedElement {
                    kind: "result shape",
                    id: item.shape.id.clone(),
                    waiting_on,
                });
            }
        }
        self.pending_shapes.restore(shapes);

        let cache_refs = self.pending_cache_refs.take();
        for item in &cache_refs {
            unresolved.push(UnresolvedElement {
                kind: "cache-ref",
                id: item.namespace.clone(),
                waiting_on: Dependency::CacheRef(item.target.clone()),
            });
        }
        self.pending_cache_refs.restore(cache_refs);

        let statements = self.pending_statements.take();
        for item in &statements {
            match statement_blocker(self, item) {
                Ok(Some(waiting_on)) => unresolved.push(UnresolvedElement {
                    kind: "statement",
                    id: pending_statement_id(item),
                    waiting_on,
                }),
                Ok(None) => {}
                Err(err) => errors.push(err),
            }
        }
        self.pending_statements.restore(statements);

        if !unresolved.is_empty() {
            errors.push(MapperError::Unresolved(unresolved));
        }
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(MapperError::Aggregate(errors)),
        }
    }
}

fn pending_statement_id(item: &PendingStatement) -> String {
    let local = item.element.attr("id").unwrap_or("?");
    format!("{}.{local}", item.namespace)
}

impl std::fmt::Debug for StatementRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementRegistry")
            .field("statements", &self.statements.len())
            .field("result_shapes", &self.result_shapes.len())
            .field("caches", &self.caches.len())
            .field("mappers", &self.mappers.len())
            .finish_non_exhaustive()
    }
}

/// Feeds mapping units and mapper interfaces into a registry, then freezes it.
pub struct RegistryBuilder {
    registry: StatementRegistry,
    errors: Vec<MapperError>,
}

impl RegistryBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            registry: StatementRegistry::new(settings),
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_language_driver(mut self, name: &str, driver: Arc<dyn LanguageDriver>) -> Self {
        self.registry.language_drivers.insert(name.to_string(), driver);
        self
    }

    #[must_use]
    pub fn with_cache_factory(mut self, factory: Arc<dyn CacheFactory>) -> Self {
        self.registry.cache_factory = factory;
        self
    }

    #[must_use]
    pub fn with_assembler(mut self, assembler: Arc<dyn ResultAssembler>) -> Self {
        self.registry.assembler = assembler;
        self
    }

    pub fn add_mapper(&mut self, mapper: MapperInterface) -> &mut Self {
        if let Err(err) = self.registry.add_mapper(mapper) {
            self.errors.push(err);
        }
        self
    }

    /// Parses one unit; its errors are kept and reported by `build`.
    pub fn add_unit(&mut self, unit: &MappingUnit) -> &mut Self {
        if let Err(err) = XmlMapperBuilder::new(&mut self.registry, unit).parse() {
            self.errors.push(err);
        }
        self
    }

    /// Direct access for callers that drive parsing themselves.
    pub fn registry_mut(&mut self) -> &mut StatementRegistry {
        &mut self.registry
    }

    pub fn build(mut self) -> Result<Arc<StatementRegistry>> {
        if let Err(err) = self.registry.finish() {
            self.errors.push(err);
        }
        match self.errors.len() {
            0 => {
                tracing::info!(
                    statements = self.registry.statements.len(),
                    result_shapes = self.registry.result_shapes.len(),
                    "registry built"
                );
                Ok(Arc::new(self.registry))
            }
            1 => Err(self.errors.remove(0)),
            _ => Err(MapperError::Aggregate(self.errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::mapping::{CommandKind, ResultMapping, TextSqlSource, ValueType};

    fn statement(id: &str) -> MappedStatement {
        let source = Arc::new(TextSqlSource::parse(id, "SELECT 1").unwrap());
        MappedStatement::new(id, CommandKind::Select, source)
    }

    fn shape(id: &str, nested: Option<&str>) -> ResultShape {
        let mut mappings = vec![ResultMapping::column("id", "id")];
        if let Some(nested) = nested {
            mappings.push(ResultMapping {
                property: Some("child".into()),
                nested_result_map: Some(nested.into()),
                ..ResultMapping::default()
            });
        }
        ResultShape::new(id, ValueType::Map, mappings, None, None).unwrap()
    }

    fn pending(id: &str, nested: Option<&str>, extends: Option<&str>) -> PendingShape {
        PendingShape {
            resource: "test".into(),
            shape: shape(id, nested),
            extends: extends.map(Into::into),
        }
    }

    #[test]
    fn test_statement_lookup_by_full_and_short_id() {
        let mut registry = StatementRegistry::new(Settings::default());
        registry.add_statement(statement("ns.find")).unwrap();
        assert!(registry.has_statement("ns.find"));
        assert_eq!(registry.statement("find").unwrap().id, "ns.find");
        assert!(matches!(
            registry.statement("ns.missing"),
            Err(MapperError::StatementNotFound(_))
        ));
        assert!(registry.add_statement(statement("ns.find")).is_err());
    }

    #[test]
    fn test_extends_waits_for_parent() {
        let mut registry = StatementRegistry::new(Settings::default());
        registry.push_pending_shape(pending("ns.child", None, Some("ns.parent")));
        assert!(registry.retry_pending().is_empty());
        assert!(!registry.has_result_shape("ns.child"));

        registry.push_pending_shape(pending("ns.parent", None, None));
        assert!(registry.retry_pending().is_empty());
        assert!(registry.has_result_shape("ns.child"));
        assert_eq!(registry.pending_counts(), (0, 0, 0));
    }

    #[test]
    fn test_mutually_nested_shapes_finalize_together() {
        let mut registry = StatementRegistry::new(Settings::default());
        registry.push_pending_shape(pending("ns.a", Some("ns.b"), None));
        registry.push_pending_shape(pending("ns.b", Some("ns.a"), None));
        assert!(registry.retry_pending().is_empty());
        assert!(registry.has_result_shape("ns.a"));
        assert!(registry.has_result_shape("ns.b"));
    }

    #[test]
    fn test_cycle_with_missing_member_stays_pending() {
        let mut registry = StatementRegistry::new(Settings::default());
        registry.push_pending_shape(pending("ns.a", Some("ns.b"), None));
        registry.push_pending_shape(pending("ns.b", Some("ns.missing"), None));
        registry.retry_pending();
        assert!(!registry.has_result_shape("ns.a"));
        match registry.finish() {
            Err(MapperError::Unresolved(items)) => {
                assert_eq!(items.len(), 2);
                assert!(items.iter().any(|i| i.waiting_on == Dependency::NestedShape("ns.missing".into())));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_cache_ref_chain_resolves_when_target_gains_cache() {
        let mut registry = StatementRegistry::new(Settings::default());
        assert!(matches!(registry.use_cache_ref("a", "b"), Progress::Blocked(_)));
        registry.push_pending_cache_ref(PendingCacheRef {
            namespace: "a".into(),
            target: "b".into(),
        });
        registry.push_pending_cache_ref(PendingCacheRef {
            namespace: "b".into(),
            target: "c".into(),
        });
        registry.add_cache(&CacheConfig::new("c")).unwrap();
        registry.retry_pending();
        assert_eq!(registry.cache_owner("a"), Some("c"));
        assert_eq!(registry.unresolved_cache_ref("a"), None);

        let cache = registry.cache_for("a").unwrap();
        cache.put(crate::mapping::CacheKey::new(["k"]), vec![Value::Integer(1)]);
        assert_eq!(registry.cache_for("c").unwrap().size(), 1);
    }

    #[test]
    fn test_own_cache_wins_over_cache_ref() {
        let mut registry = StatementRegistry::new(Settings::default());
        registry.add_cache(&CacheConfig::new("a")).unwrap();
        registry.add_cache(&CacheConfig::new("b")).unwrap();
        assert_eq!(registry.use_cache_ref("a", "b"), Progress::Done);
        assert_eq!(registry.cache_owner("a"), Some("a"));
    }
}
