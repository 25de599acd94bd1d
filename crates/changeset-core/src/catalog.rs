//! Change sets, the units that group them, and discovery.
//!
//! A [`CatalogUnit`] is a named, ordered group of change sets built by a
//! factory. The runner asks a [`Catalog`] for the units under its configured
//! source, instantiates each unit once per run and executes the resulting
//! change sets in order.

use std::fmt;
use std::sync::Arc;

use crate::environment::{profiles_match, Environment};
use crate::error::{ChangesetError, Result};
use crate::invoker::{handler, Arg, ChangeSetFn, ParamKind};
use crate::mapper::DocumentMapper;
use crate::store::KvStore;

// ---------------------------------------------------------------------------
// ChangeSet
// ---------------------------------------------------------------------------

/// One step: an id recorded in the ledger plus the handle that applies it.
#[derive(Clone)]
pub struct ChangeSet {
    pub id: String,
    pub author: String,
    /// Name of the step within its unit, recorded for provenance.
    pub method: String,
    pub order: String,
    pub run_always: bool,
    pub profiles: Vec<String>,
    pub params: Vec<ParamKind>,
    pub(crate) handle: ChangeSetFn,
}

impl fmt::Debug for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSet")
            .field("id", &self.id)
            .field("author", &self.author)
            .field("method", &self.method)
            .field("order", &self.order)
            .field("run_always", &self.run_always)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl ChangeSet {
    /// A change set whose handle does nothing. Attach the real work with
    /// one of the `run*` methods or [`ChangeSet::handler`].
    pub fn new(id: impl Into<String>, author: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            method: method.into(),
            order: String::new(),
            run_always: false,
            profiles: Vec::new(),
            params: Vec::new(),
            handle: handler(|_| Ok(())),
        }
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = order.into();
        self
    }

    pub fn run_always(mut self) -> Self {
        self.run_always = true;
        self
    }

    pub fn profiles<I, S>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profiles = profiles.into_iter().map(Into::into).collect();
        self
    }

    /// Attach a raw handle with an explicit declared parameter list.
    pub fn handler(mut self, params: Vec<ParamKind>, handle: ChangeSetFn) -> Self {
        self.params = params;
        self.handle = handle;
        self
    }

    pub fn run<F>(self, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handler(vec![], handler(move |_| f()))
    }

    pub fn run_with_client<F>(self, f: F) -> Self
    where
        F: Fn(&dyn KvStore) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handler(
            vec![ParamKind::Client],
            handler(move |args| match args {
                [Arg::Client(client)] => f(*client),
                _ => anyhow::bail!("expected (client) arguments"),
            }),
        )
    }

    pub fn run_with_mapper<F>(self, f: F) -> Self
    where
        F: Fn(&DocumentMapper) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handler(
            vec![ParamKind::Mapper],
            handler(move |args| match args {
                [Arg::Mapper(mapper)] => f(mapper),
                _ => anyhow::bail!("expected (mapper) arguments"),
            }),
        )
    }

    pub fn run_with_mapper_and_env<F>(self, f: F) -> Self
    where
        F: Fn(&DocumentMapper, &Environment) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handler(
            vec![ParamKind::Mapper, ParamKind::Environment],
            handler(move |args| match args {
                [Arg::Mapper(mapper), Arg::Environment(env)] => f(mapper, env),
                _ => anyhow::bail!("expected (mapper, environment) arguments"),
            }),
        )
    }

    pub fn run_with_mapper_and_client<F>(self, f: F) -> Self
    where
        F: Fn(&DocumentMapper, &dyn KvStore) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handler(
            vec![ParamKind::Mapper, ParamKind::Client],
            handler(move |args| match args {
                [Arg::Mapper(mapper), Arg::Client(client)] => f(mapper, *client),
                _ => anyhow::bail!("expected (mapper, client) arguments"),
            }),
        )
    }
}

// ---------------------------------------------------------------------------
// CatalogUnit
// ---------------------------------------------------------------------------

pub type UnitFactory = Arc<dyn Fn() -> anyhow::Result<Vec<ChangeSet>> + Send + Sync>;

#[derive(Clone)]
pub struct CatalogUnit {
    pub name: String,
    /// Discovery path, e.g. `app::migrations`.
    pub source: String,
    pub order: String,
    pub profiles: Vec<String>,
    factory: UnitFactory,
}

impl fmt::Debug for CatalogUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogUnit")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("order", &self.order)
            .field("profiles", &self.profiles)
            .finish_non_exhaustive()
    }
}

impl CatalogUnit {
    pub fn new<F>(name: impl Into<String>, source: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Vec<ChangeSet>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            source: source.into(),
            order: String::new(),
            profiles: Vec::new(),
            factory: Arc::new(factory),
        }
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = order.into();
        self
    }

    pub fn profiles<I, S>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profiles = profiles.into_iter().map(Into::into).collect();
        self
    }

    /// Build the unit's change sets, drop those not enabled for the active
    /// profiles, and sort by `order`. Ties keep declaration order.
    pub fn instantiate(&self, environment: Option<&Environment>) -> Result<Vec<ChangeSet>> {
        let mut change_sets = (self.factory)().map_err(|e| {
            ChangesetError::Catalog(format!("cannot instantiate unit '{}': {e:#}", self.name))
        })?;
        change_sets.retain(|cs| profiles_match(environment, &cs.profiles));
        change_sets.sort_by(|a, b| a.order.cmp(&b.order));
        Ok(change_sets)
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Discovery of migration units.
pub trait Catalog: Send + Sync {
    /// Units under `source`, in execution order.
    fn list_units(&self, source: &str, environment: Option<&Environment>)
        -> Result<Vec<CatalogUnit>>;
}

fn source_matches(unit_source: &str, source: &str) -> bool {
    unit_source == source
        || unit_source
            .strip_prefix(source)
            .is_some_and(|rest| rest.starts_with("::"))
}

/// In-process catalog of explicitly registered units.
#[derive(Clone, Default)]
pub struct ChangeLogRegistry {
    units: Vec<CatalogUnit>,
}

impl ChangeLogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, unit: CatalogUnit) -> &mut Self {
        self.units.push(unit);
        self
    }

    pub fn with(mut self, unit: CatalogUnit) -> Self {
        self.units.push(unit);
        self
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl Catalog for ChangeLogRegistry {
    fn list_units(
        &self,
        source: &str,
        environment: Option<&Environment>,
    ) -> Result<Vec<CatalogUnit>> {
        let mut units: Vec<CatalogUnit> = self
            .units
            .iter()
            .filter(|u| source_matches(&u.source, source))
            .filter(|u| profiles_match(environment, &u.profiles))
            .cloned()
            .collect();
        units.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str, source: &str, order: &str) -> CatalogUnit {
        let n = name.to_string();
        CatalogUnit::new(name, source, move || {
            Ok(vec![ChangeSet::new(format!("{n}-1"), "ops", "first")])
        })
        .order(order)
    }

    fn names(units: &[CatalogUnit]) -> Vec<&str> {
        units.iter().map(|u| u.name.as_str()).collect()
    }

    #[test]
    fn source_match_is_by_path_segment() {
        assert!(source_matches("app::migrations", "app::migrations"));
        assert!(source_matches("app::migrations::v2", "app::migrations"));
        assert!(!source_matches("app::migrations_legacy", "app::migrations"));
        assert!(!source_matches("other::migrations", "app::migrations"));
    }

    #[test]
    fn list_units_filters_by_source_and_sorts_by_order_then_name() {
        let registry = ChangeLogRegistry::new()
            .with(unit("beta", "app::migrations", "002"))
            .with(unit("alpha", "app::migrations::v2", "002"))
            .with(unit("first", "app::migrations", "001"))
            .with(unit("elsewhere", "tools::migrations", "000"));
        let units = registry.list_units("app::migrations", None).unwrap();
        assert_eq!(names(&units), vec!["first", "alpha", "beta"]);
    }

    #[test]
    fn register_in_place() {
        let mut registry = ChangeLogRegistry::new();
        assert!(registry.is_empty());
        registry
            .register(unit("first", "app", "1"))
            .register(unit("second", "app", "2"));
        assert_eq!(registry.len(), 2);
        assert_eq!(
            names(&registry.list_units("app", None).unwrap()),
            vec!["first", "second"]
        );
    }

    #[test]
    fn list_units_applies_profiles() {
        let registry = ChangeLogRegistry::new()
            .with(unit("always", "app", "1"))
            .with(unit("prod-only", "app", "2").profiles(["prod"]))
            .with(unit("not-prod", "app", "3").profiles(["!prod"]));
        let prod = Environment::new().with_profiles(["prod"]);
        assert_eq!(
            names(&registry.list_units("app", Some(&prod)).unwrap()),
            vec!["always", "prod-only"]
        );
        assert_eq!(names(&registry.list_units("app", None).unwrap()).len(), 3);
    }

    #[test]
    fn instantiate_orders_and_filters_change_sets() {
        let unit = CatalogUnit::new("u", "app", || {
            Ok(vec![
                ChangeSet::new("c", "ops", "third").order("3"),
                ChangeSet::new("a", "ops", "first").order("1"),
                ChangeSet::new("dev", "ops", "dev_seed").order("2").profiles(["dev"]),
                ChangeSet::new("b", "ops", "second").order("1"),
            ])
        });
        let prod = Environment::new().with_profiles(["prod"]);
        let ids: Vec<String> = unit
            .instantiate(Some(&prod))
            .unwrap()
            .into_iter()
            .map(|cs| cs.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn factory_failure_is_catalog_error() {
        let unit = CatalogUnit::new("broken", "app", || anyhow::bail!("missing fixture"));
        let err = unit.instantiate(None).unwrap_err();
        assert!(matches!(err, ChangesetError::Catalog(m) if m.contains("missing fixture")));
    }
}
