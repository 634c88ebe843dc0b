//! Plugin dependency validation and resolution.
//!
//! [`DependencyManager::validate_dependencies`] checks one plugin's declared
//! package dependencies against the package index. Lookups for the
//! dependencies of one plugin run concurrently, bounded by a semaphore, with
//! a per-lookup timeout and retry with exponential backoff. Results go
//! through the [`ValidationCache`], keyed by the plugin's dependency
//! fingerprint.
//!
//! [`DependencyManager::resolve_dependencies`] reconciles the requirements of
//! a set of plugins: disjoint ranges for the same dependency, inter-plugin
//! version mismatches, cycles and over-deep chains.
//!
//! [`resolve_load_order`] sorts plugins so that plugins another plugin
//! depends on come first (Kahn's algorithm).

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use lakebench_sdk::diagnostics::{ErrorCode, Severity, StructuredError};
use lakebench_sdk::types::{
    CompatibilityResult, Conflict, DependencyScope, DependencySpec, PluginMetadata,
    ValidationResult,
};
use semver::Version;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::error::{PluginError, ResolutionError};
use crate::cache::{Resolution, ValidationCache, fingerprint};
use crate::config::DependencyConfig;
use crate::index::{self, ConnectError, IndexError, PackageIndex};
use crate::version::{VersionError, VersionRange, parse_version};

const VALIDATE_OP: &str = "dependency_validation";
const RESOLVE_OP: &str = "dependency_resolution";

/// Outcome of checking a single dependency.
#[derive(Debug, Clone)]
enum Check {
    Satisfied(Version),
    /// Not published, or no published version matches. Carries the highest
    /// published version, if any.
    Unsatisfied(Option<Version>),
    Malformed(VersionError),
    /// The index could not be reached after all retries.
    Unavailable(String),
}

/// Validates and resolves plugin dependencies.
///
/// Cheap to clone; clones share the cache and index client.
#[derive(Clone)]
pub struct DependencyManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: DependencyConfig,
    index: Arc<dyn PackageIndex>,
    cache: ValidationCache,
}

impl DependencyManager {
    pub fn new(config: DependencyConfig, index: Arc<dyn PackageIndex>) -> Self {
        let cache = ValidationCache::new(&config);
        Self {
            inner: Arc::new(ManagerInner {
                config,
                index,
                cache,
            }),
        }
    }

    /// Build a manager talking to the configured package index.
    pub fn from_config(config: DependencyConfig) -> Result<Self, ConnectError> {
        let index = index::connect(&config.package_index, config.lookup_timeout)?;
        Ok(Self::new(config, index))
    }

    pub fn config(&self) -> &DependencyConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &ValidationCache {
        &self.inner.cache
    }

    /// Validate one plugin's dependencies against the package index.
    ///
    /// Never fails: every problem is reported in the returned result.
    /// Concurrent calls for the same plugin version and dependency set share
    /// one resolution.
    pub async fn validate_dependencies(&self, metadata: &PluginMetadata) -> ValidationResult {
        let key = fingerprint(metadata);
        let result = self
            .inner
            .cache
            .get_or_resolve(&key, &metadata.id, &metadata.version, self.check_all(metadata))
            .await;

        if result.is_valid {
            debug!(plugin = %metadata.id, version = %metadata.version, warnings = result.warnings.len(), "dependencies valid");
        } else {
            warn!(
                plugin = %metadata.id,
                version = %metadata.version,
                errors = ?result.error_codes(),
                "dependency validation failed"
            );
        }
        result
    }

    async fn check_all(&self, metadata: &PluginMetadata) -> Resolution {
        let config = &self.inner.config;
        let specs: Vec<DependencySpec> = metadata
            .dependencies
            .values()
            .filter(|spec| !(config.skip_test_scope && spec.scope == DependencyScope::Test))
            .cloned()
            .collect();

        if specs.is_empty() {
            return Resolution {
                result: ValidationResult::valid(),
                complete: true,
            };
        }

        let permits = Arc::new(Semaphore::new(specs.len().min(config.max_concurrency.max(1))));
        let mut tasks = JoinSet::new();
        for (position, spec) in specs.iter().enumerate() {
            let manager = self.clone();
            let permits = Arc::clone(&permits);
            let spec = spec.clone();
            tasks.spawn(async move {
                // The semaphore is never closed, so acquiring cannot fail.
                let _permit = permits.acquire_owned().await.ok();
                (position, manager.check_one(&spec).await)
            });
        }

        let mut checks: Vec<Option<Check>> = vec![None; specs.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, check)) => checks[position] = Some(check),
                Err(e) => warn!(plugin = %metadata.id, error = %e, "dependency check task failed"),
            }
        }

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut complete = true;
        for (spec, check) in specs.iter().zip(checks) {
            let check = check.unwrap_or_else(|| Check::Unavailable("dependency check aborted".into()));
            if matches!(check, Check::Unavailable(_)) {
                complete = false;
            }
            self.report(&metadata.id, spec, check, &mut errors, &mut warnings);
        }

        Resolution {
            result: ValidationResult::from_parts(errors, warnings),
            complete,
        }
    }

    async fn check_one(&self, spec: &DependencySpec) -> Check {
        let range = match VersionRange::parse(&spec.version_range) {
            Ok(range) => range,
            Err(e) => return Check::Malformed(e),
        };

        match self.available_versions(&spec.name).await {
            Ok(versions) => match range.best_match(&versions) {
                Some(version) => Check::Satisfied(version.clone()),
                None => Check::Unsatisfied(versions.iter().max().cloned()),
            },
            Err(IndexError::NotFound { .. }) => Check::Unsatisfied(None),
            Err(e) => Check::Unavailable(e.to_string()),
        }
    }

    async fn available_versions(&self, name: &str) -> Result<Arc<Vec<Version>>, IndexError> {
        self.inner
            .cache
            .index_versions_or_lookup(name, self.lookup_with_retry(name))
            .await
    }

    async fn lookup_with_retry(&self, name: &str) -> Result<Vec<Version>, IndexError> {
        let config = &self.inner.config;
        let attempts = config.retry_attempts.max(1);
        let mut delay = config.retry_backoff;
        let mut attempt = 1;

        loop {
            let outcome =
                match tokio::time::timeout(config.lookup_timeout, self.inner.index.lookup(name)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(IndexError::unavailable(
                        name,
                        format!("lookup timed out after {:?}", config.lookup_timeout),
                    )),
                };

            match outcome {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        package = %name,
                        attempt,
                        retry_in = ?delay,
                        error = %e,
                        "package index lookup failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Turn one dependency check into errors or warnings.
    fn report(
        &self,
        plugin_id: &str,
        spec: &DependencySpec,
        check: Check,
        errors: &mut Vec<StructuredError>,
        warnings: &mut Vec<String>,
    ) {
        let ignore_optional = self.inner.config.ignore_optional;
        let scope = spec.scope.as_str();

        match check {
            Check::Satisfied(version) => {
                debug!(plugin = %plugin_id, dependency = %spec.name, %version, "dependency satisfied");
            }
            Check::Malformed(e) => {
                if spec.is_required() || !ignore_optional {
                    errors.push(
                        StructuredError::new(
                            ErrorCode::MalformedVersion,
                            plugin_id,
                            VALIDATE_OP,
                            format!("Dependency {} has a malformed version range: {e}", spec.name),
                        )
                        .with_dependency(&spec.name)
                        .with_required_version(&spec.version_range)
                        .suggest("Use comparators such as '>=2.0.0,<3.0.0', '^1.4' or '~2.3.1'")
                        .suggest(format!("Fix the '{}' entry in the plugin manifest", spec.name)),
                    );
                } else {
                    warnings.push(format!(
                        "Optional dependency {} ({scope}) ignored: {e}",
                        spec.name
                    ));
                }
            }
            Check::Unsatisfied(found) => {
                let found_text = found
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "none".into());

                if spec.is_required() {
                    errors.push(
                        StructuredError::new(
                            ErrorCode::MissingRequiredDependency,
                            plugin_id,
                            VALIDATE_OP,
                            format!(
                                "Required dependency {} {} not satisfied (found: {found_text})",
                                spec.name, spec.version_range
                            ),
                        )
                        .with_dependency(&spec.name)
                        .with_required_version(&spec.version_range)
                        .with_found_version(found.map(|v| v.to_string()))
                        .suggest(format!(
                            "Install {} with a version matching {}",
                            spec.name, spec.version_range
                        ))
                        .suggest("Or relax the version range in the plugin manifest"),
                    );
                } else {
                    warnings.push(format!(
                        "Optional dependency {} {} ({scope}) not satisfied (found: {found_text})",
                        spec.name, spec.version_range
                    ));
                }
            }
            Check::Unavailable(reason) => {
                let unavailable = StructuredError::new(
                    ErrorCode::IndexUnavailable,
                    plugin_id,
                    VALIDATE_OP,
                    format!("Package index unavailable for {}: {reason}", spec.name),
                )
                .with_severity(Severity::Warn)
                .with_dependency(&spec.name);
                warnings.push(unavailable.to_string());

                if spec.is_required() {
                    errors.push(
                        StructuredError::new(
                            ErrorCode::MissingRequiredDependency,
                            plugin_id,
                            VALIDATE_OP,
                            format!(
                                "Required dependency {} {} could not be resolved",
                                spec.name, spec.version_range
                            ),
                        )
                        .with_dependency(&spec.name)
                        .with_required_version(&spec.version_range)
                        .suggest("Check that the package index is reachable and retry"),
                    );
                }
            }
        }
    }

    /// Check a set of plugins against each other.
    ///
    /// Range conflicts and inter-plugin version mismatches are reported as
    /// conflicts. A dependency cycle or a chain deeper than `max_depth` fails
    /// the whole resolution; the error still carries every conflict found.
    pub fn resolve_dependencies(
        &self,
        plugins: &[PluginMetadata],
    ) -> Result<CompatibilityResult, ResolutionError> {
        let mut conflicts = ConflictSet::default();

        let mut requirements: BTreeMap<&str, Vec<(&PluginMetadata, VersionRange)>> = BTreeMap::new();
        for plugin in plugins {
            for spec in plugin.dependencies.values() {
                match VersionRange::parse(&spec.version_range) {
                    Ok(range) => requirements.entry(&spec.name).or_default().push((plugin, range)),
                    Err(e) => conflicts.malformed(&plugin.id, &spec.name, &e),
                }
            }
        }

        for (name, required) in &requirements {
            for (i, (a, a_range)) in required.iter().enumerate() {
                for (b, b_range) in &required[i + 1..] {
                    if a.id == b.id || !a_range.is_disjoint(b_range) {
                        continue;
                    }
                    conflicts.disagree(
                        &a.id,
                        name,
                        format!("requires {name} {a_range}, incompatible with {} requiring {b_range}", b.id),
                    );
                    conflicts.disagree(
                        &b.id,
                        name,
                        format!("requires {name} {b_range}, incompatible with {} requiring {a_range}", a.id),
                    );
                }
            }
        }

        let by_id: HashMap<&str, &PluginMetadata> =
            plugins.iter().map(|p| (p.id.as_str(), p)).collect();

        for plugin in plugins {
            for spec in plugin.dependencies.values() {
                let Some(target) = by_id.get(spec.name.as_str()) else {
                    continue;
                };
                if target.id == plugin.id {
                    continue;
                }
                let Ok(range) = VersionRange::parse(&spec.version_range) else {
                    continue;
                };
                match parse_version(&target.version) {
                    Ok(version) if range.contains(&version) => {}
                    Ok(version) => conflicts.disagree(
                        &plugin.id,
                        &spec.name,
                        format!("requires plugin {} {range}, but version {version} is supplied", target.id),
                    ),
                    Err(e) => conflicts.malformed(&plugin.id, &spec.name, &e),
                }
            }
        }

        let errors = GraphWalk::new(plugins, &by_id, self.inner.config.max_depth).run();
        let conflicts = conflicts.into_vec();

        if !errors.is_empty() {
            warn!(
                plugins = plugins.len(),
                errors = errors.len(),
                conflicts = conflicts.len(),
                "dependency resolution failed"
            );
            return Err(ResolutionError { errors, conflicts });
        }

        let result = CompatibilityResult::from_conflicts(conflicts);
        info!(
            plugins = plugins.len(),
            compatible = result.is_compatible,
            conflicts = result.conflicts.len(),
            "dependency resolution complete"
        );
        Ok(result)
    }
}

/// Conflicts in insertion order, without duplicates.
#[derive(Default)]
struct ConflictSet {
    seen: HashSet<Conflict>,
    ordered: Vec<Conflict>,
}

impl ConflictSet {
    fn disagree(&mut self, plugin_id: &str, dependency: &str, reason: String) {
        self.push(ErrorCode::VersionConflict, plugin_id, dependency, reason);
    }

    fn malformed(&mut self, plugin_id: &str, dependency: &str, error: &VersionError) {
        self.push(ErrorCode::MalformedVersion, plugin_id, dependency, error.to_string());
    }

    fn push(&mut self, code: ErrorCode, plugin_id: &str, dependency: &str, reason: String) {
        let conflict = Conflict {
            code,
            plugin_id: plugin_id.to_string(),
            dependency: dependency.to_string(),
            reason,
        };
        if self.seen.insert(conflict.clone()) {
            self.ordered.push(conflict);
        }
    }

    fn into_vec(self) -> Vec<Conflict> {
        self.ordered
    }
}

/// Depth-bounded DFS over inter-plugin edges.
struct GraphWalk<'a> {
    plugins: &'a [PluginMetadata],
    by_id: &'a HashMap<&'a str, &'a PluginMetadata>,
    max_depth: usize,
    cycles_seen: HashSet<Vec<String>>,
    errors: Vec<StructuredError>,
}

impl<'a> GraphWalk<'a> {
    fn new(
        plugins: &'a [PluginMetadata],
        by_id: &'a HashMap<&'a str, &'a PluginMetadata>,
        max_depth: usize,
    ) -> Self {
        Self {
            plugins,
            by_id,
            max_depth,
            cycles_seen: HashSet::new(),
            errors: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<StructuredError> {
        for plugin in self.plugins {
            let mut path = vec![plugin.id.as_str()];
            let mut too_deep = false;
            self.visit(&mut path, &mut too_deep);
        }
        self.errors
    }

    fn edges(&self, id: &str) -> Vec<&'a str> {
        self.by_id
            .get(id)
            .map(|p| {
                p.dependencies
                    .keys()
                    .map(String::as_str)
                    .filter(|name| *name != id)
                    .filter_map(|name| self.by_id.get(name).map(|target| target.id.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn visit(&mut self, path: &mut Vec<&'a str>, too_deep: &mut bool) {
        let Some(&current) = path.last() else {
            return;
        };

        for next in self.edges(current) {
            if let Some(start) = path.iter().position(|id| *id == next) {
                let mut cycle: Vec<&str> = path[start..].to_vec();
                cycle.push(next);
                self.record_cycle(&cycle);
                continue;
            }

            // `path.len()` is the depth of the edge current -> next.
            if path.len() > self.max_depth {
                if !*too_deep {
                    *too_deep = true;
                    let mut chain = path.clone();
                    chain.push(next);
                    self.errors.push(
                        StructuredError::new(
                            ErrorCode::DepthExceeded,
                            path[0],
                            RESOLVE_OP,
                            format!(
                                "Dependency chain {} exceeds maximum depth {}",
                                chain.join(" -> "),
                                self.max_depth
                            ),
                        )
                        .suggest("Flatten the plugin dependency chain")
                        .suggest("Or raise LAKEBENCH_MAX_DEPTH"),
                    );
                }
                continue;
            }

            path.push(next);
            self.visit(path, too_deep);
            path.pop();
        }
    }

    fn record_cycle(&mut self, cycle: &[&str]) {
        // `cycle` repeats its first node at the end; rotate the distinct nodes
        // so the smallest id leads, making each cycle reportable once.
        let nodes = &cycle[..cycle.len() - 1];
        let Some(lead) = nodes
            .iter()
            .enumerate()
            .min_by_key(|(_, id)| **id)
            .map(|(i, _)| i)
        else {
            return;
        };
        let mut canonical: Vec<String> = nodes[lead..]
            .iter()
            .chain(&nodes[..lead])
            .map(|s| s.to_string())
            .collect();
        if !self.cycles_seen.insert(canonical.clone()) {
            return;
        }
        if let Some(first) = canonical.first().cloned() {
            canonical.push(first);
        }

        self.errors.push(
            StructuredError::new(
                ErrorCode::DependencyCycle,
                cycle[0],
                RESOLVE_OP,
                format!("Circular dependency: {}", canonical.join(" -> ")),
            )
            .suggest("Remove one of the dependencies in the cycle"),
        );
    }
}

/// Resolve plugin registration order based on inter-plugin dependencies.
///
/// Returns plugin ids sorted so that plugins another plugin depends on come
/// first. Dependencies that are not plugins in the set are package
/// dependencies and do not affect ordering. Ties keep the input order.
///
/// # Errors
/// Returns [`PluginError::CircularDependency`] if the plugins depend on each
/// other in a cycle.
pub fn resolve_load_order(plugins: &[PluginMetadata]) -> Result<Vec<String>, PluginError> {
    // in_degree[p] = number of plugins that p depends on (that must load first)
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for plugin in plugins {
        in_degree.insert(&plugin.id, 0);
        dependents.entry(&plugin.id).or_default();
    }

    for plugin in plugins {
        for dep in plugin.dependencies.keys() {
            if dep == &plugin.id || !in_degree.contains_key(dep.as_str()) {
                continue;
            }
            if let Some(degree) = in_degree.get_mut(plugin.id.as_str()) {
                *degree += 1;
            }
            dependents.entry(dep.as_str()).or_default().push(&plugin.id);
        }
    }

    // Kahn's algorithm
    let mut order = Vec::with_capacity(plugins.len());
    let mut queue: VecDeque<&str> = plugins
        .iter()
        .map(|p| p.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();

    while let Some(plugin) = queue.pop_front() {
        order.push(plugin.to_string());

        if let Some(deps) = dependents.get(plugin) {
            for dependent in deps {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*dependent);
                    }
                }
            }
        }
    }

    if order.len() != in_degree.len() {
        let ordered: HashSet<_> = order.iter().map(String::as_str).collect();
        let in_cycle: Vec<String> = plugins
            .iter()
            .map(|p| p.id.clone())
            .filter(|id| !ordered.contains(id.as_str()))
            .collect();
        return Err(PluginError::circular(&in_cycle));
    }

    Ok(order)
}
