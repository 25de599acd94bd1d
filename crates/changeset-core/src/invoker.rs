//! Dispatch of a change set to its handle.
//!
//! Each change set declares the parameters its handle expects. The declared
//! list is matched against a closed set of [`InvocationShape`]s; the matching
//! shape decides which context handles are passed and in what order. Any list
//! outside that set is a [`ChangesetError::StepInvocation`], which the runner
//! logs and skips without aborting the run.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::catalog::ChangeSet;
use crate::environment::Environment;
use crate::error::{ChangesetError, Result};
use crate::mapper::DocumentMapper;
use crate::store::KvStore;

// ---------------------------------------------------------------------------
// ParamKind / Arg
// ---------------------------------------------------------------------------

/// A parameter type a change set handle declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    /// The low-level [`KvStore`] client.
    Client,
    /// The higher-level [`DocumentMapper`].
    Mapper,
    /// The [`Environment`] profile accessor.
    Environment,
    /// Any other type. Never invocable.
    Other(String),
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Client => f.write_str("client"),
            ParamKind::Mapper => f.write_str("mapper"),
            ParamKind::Environment => f.write_str("environment"),
            ParamKind::Other(name) => f.write_str(name),
        }
    }
}

/// An argument passed to a handle, in declared order.
#[derive(Clone, Copy)]
pub enum Arg<'a> {
    Client(&'a dyn KvStore),
    Mapper(&'a DocumentMapper),
    Environment(&'a Environment),
}

/// The callable behind a change set.
pub type ChangeSetFn = Arc<dyn Fn(&[Arg<'_>]) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as a [`ChangeSetFn`].
pub fn handler<F>(f: F) -> ChangeSetFn
where
    F: for<'a> Fn(&[Arg<'a>]) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

// ---------------------------------------------------------------------------
// InvocationShape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationShape {
    NoArgs,
    Client,
    Mapper,
    MapperEnvironment,
    EnvironmentMapper,
    MapperClient,
    ClientMapper,
}

impl InvocationShape {
    /// `None` for every parameter list outside the supported set.
    pub fn from_params(params: &[ParamKind]) -> Option<Self> {
        use ParamKind as P;
        match params {
            [] => Some(Self::NoArgs),
            [P::Client] => Some(Self::Client),
            [P::Mapper] => Some(Self::Mapper),
            [P::Mapper, P::Environment] => Some(Self::MapperEnvironment),
            [P::Environment, P::Mapper] => Some(Self::EnvironmentMapper),
            [P::Mapper, P::Client] => Some(Self::MapperClient),
            [P::Client, P::Mapper] => Some(Self::ClientMapper),
            _ => None,
        }
    }
}

fn describe(params: &[ParamKind]) -> String {
    let names: Vec<String> = params.iter().map(ToString::to_string).collect();
    format!("({})", names.join(", "))
}

// ---------------------------------------------------------------------------
// ChangeSetInvoker
// ---------------------------------------------------------------------------

/// Holds the context handles available to change sets during one run.
pub struct ChangeSetInvoker {
    client: Arc<dyn KvStore>,
    mapper: Option<DocumentMapper>,
    environment: Option<Environment>,
    table_prefix: Option<String>,
}

impl ChangeSetInvoker {
    pub fn new(client: Arc<dyn KvStore>) -> Self {
        Self {
            client,
            mapper: None,
            environment: None,
            table_prefix: None,
        }
    }

    pub fn with_mapper(mut self, mapper: Option<DocumentMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_environment(mut self, environment: Option<Environment>) -> Self {
        self.environment = environment;
        self
    }

    /// Prefix given to a mapper synthesized from the client.
    pub fn with_table_prefix(mut self, prefix: Option<String>) -> Self {
        self.table_prefix = prefix;
        self
    }

    pub fn resolve(change_set: &ChangeSet) -> Result<InvocationShape> {
        InvocationShape::from_params(&change_set.params).ok_or_else(|| {
            ChangesetError::StepInvocation {
                change_id: change_set.id.clone(),
                method: change_set.method.clone(),
                reason: format!(
                    "unsupported parameter list {}",
                    describe(&change_set.params)
                ),
            }
        })
    }

    fn mapper(&self) -> Cow<'_, DocumentMapper> {
        match &self.mapper {
            Some(mapper) => Cow::Borrowed(mapper),
            None => {
                debug!("no mapper supplied; building one from the client");
                let mapper = DocumentMapper::new(Arc::clone(&self.client));
                Cow::Owned(match &self.table_prefix {
                    Some(prefix) => mapper.with_table_prefix(prefix.clone()),
                    None => mapper,
                })
            }
        }
    }

    fn environment(&self) -> Cow<'_, Environment> {
        match &self.environment {
            Some(env) => Cow::Borrowed(env),
            None => Cow::Owned(Environment::default()),
        }
    }

    /// Run the change set's handle with the arguments its shape calls for.
    ///
    /// A failure inside the handle is returned as
    /// [`ChangesetError::ChangeSetFailed`].
    pub fn invoke(&self, change_set: &ChangeSet) -> Result<()> {
        let shape = Self::resolve(change_set)?;
        debug!(change_id = %change_set.id, ?shape, "invoking change set");

        let handle = &change_set.handle;
        let client: &dyn KvStore = self.client.as_ref();
        let outcome = match shape {
            InvocationShape::NoArgs => handle(&[]),
            InvocationShape::Client => handle(&[Arg::Client(client)]),
            InvocationShape::Mapper => {
                let mapper = self.mapper();
                handle(&[Arg::Mapper(&*mapper)])
            }
            InvocationShape::MapperEnvironment => {
                let mapper = self.mapper();
                let env = self.environment();
                handle(&[Arg::Mapper(&*mapper), Arg::Environment(&*env)])
            }
            InvocationShape::EnvironmentMapper => {
                let mapper = self.mapper();
                let env = self.environment();
                handle(&[Arg::Environment(&*env), Arg::Mapper(&*mapper)])
            }
            InvocationShape::MapperClient => {
                let mapper = self.mapper();
                handle(&[Arg::Mapper(&*mapper), Arg::Client(client)])
            }
            InvocationShape::ClientMapper => {
                let mapper = self.mapper();
                handle(&[Arg::Client(client), Arg::Mapper(&*mapper)])
            }
        };

        outcome.map_err(|source| ChangesetError::ChangeSetFailed {
            change_id: change_set.id.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, ChangeSetFn) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let f = handler(move |args: &[Arg<'_>]| {
            let kinds: Vec<String> = args
                .iter()
                .map(|a| match a {
                    Arg::Client(_) => "client".to_string(),
                    Arg::Mapper(m) => format!("mapper:{}", m.table_prefix().unwrap_or("-")),
                    Arg::Environment(e) => format!("env:{}", e.active_profiles.join("+")),
                })
                .collect();
            sink.lock().unwrap().push(kinds.join(","));
            Ok(())
        });
        (seen, f)
    }

    fn change_set(params: Vec<ParamKind>, f: ChangeSetFn) -> ChangeSet {
        ChangeSet::new("001", "ops", "migrate").handler(params, f)
    }

    #[test]
    fn every_supported_shape_resolves() {
        use ParamKind as P;
        let cases = [
            (vec![], InvocationShape::NoArgs),
            (vec![P::Client], InvocationShape::Client),
            (vec![P::Mapper], InvocationShape::Mapper),
            (vec![P::Mapper, P::Environment], InvocationShape::MapperEnvironment),
            (vec![P::Environment, P::Mapper], InvocationShape::EnvironmentMapper),
            (vec![P::Mapper, P::Client], InvocationShape::MapperClient),
            (vec![P::Client, P::Mapper], InvocationShape::ClientMapper),
        ];
        for (params, expected) in cases {
            assert_eq!(InvocationShape::from_params(&params), Some(expected));
        }
    }

    #[test]
    fn unsupported_shapes_do_not_resolve() {
        use ParamKind as P;
        let cases = [
            vec![P::Environment],
            vec![P::Client, P::Environment],
            vec![P::Mapper, P::Mapper],
            vec![P::Other("String".into())],
            vec![P::Mapper, P::Environment, P::Client],
        ];
        for params in cases {
            assert_eq!(InvocationShape::from_params(&params), None, "{params:?}");
        }
    }

    #[test]
    fn unsupported_shape_is_a_step_invocation_error() {
        let invoker = ChangeSetInvoker::new(Arc::new(MemoryStore::new()));
        let (seen, f) = recorder();
        let cs = change_set(vec![ParamKind::Other("u32".into())], f);
        let err = invoker.invoke(&cs).unwrap_err();
        match err {
            ChangesetError::StepInvocation {
                change_id, reason, ..
            } => {
                assert_eq!(change_id, "001");
                assert!(reason.contains("u32"), "reason: {reason}");
            }
            other => panic!("expected StepInvocation, got {other:?}"),
        }
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn arguments_follow_declared_order() {
        let invoker = ChangeSetInvoker::new(Arc::new(MemoryStore::new()))
            .with_environment(Some(Environment::new().with_profiles(["prod"])));
        let (seen, f) = recorder();

        invoker
            .invoke(&change_set(
                vec![ParamKind::Environment, ParamKind::Mapper],
                f.clone(),
            ))
            .unwrap();
        invoker
            .invoke(&change_set(vec![ParamKind::Client, ParamKind::Mapper], f))
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["env:prod,mapper:-".to_string(), "client,mapper:-".to_string()]
        );
    }

    #[test]
    fn synthesized_mapper_inherits_table_prefix() {
        let invoker = ChangeSetInvoker::new(Arc::new(MemoryStore::new()))
            .with_table_prefix(Some("qa_".into()));
        let (seen, f) = recorder();
        invoker
            .invoke(&change_set(vec![ParamKind::Mapper], f))
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["mapper:qa_".to_string()]);
    }

    #[test]
    fn supplied_mapper_wins_over_synthesized() {
        let client: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let invoker = ChangeSetInvoker::new(Arc::clone(&client))
            .with_table_prefix(Some("qa_".into()))
            .with_mapper(Some(DocumentMapper::new(client).with_table_prefix("prebuilt_")));
        let (seen, f) = recorder();
        invoker
            .invoke(&change_set(vec![ParamKind::Mapper], f))
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["mapper:prebuilt_".to_string()]);
    }

    #[test]
    fn missing_environment_is_passed_empty() {
        let invoker = ChangeSetInvoker::new(Arc::new(MemoryStore::new()));
        let (seen, f) = recorder();
        invoker
            .invoke(&change_set(
                vec![ParamKind::Mapper, ParamKind::Environment],
                f,
            ))
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["mapper:-,env:".to_string()]);
    }

    #[test]
    fn handle_failure_is_change_set_failed() {
        let invoker = ChangeSetInvoker::new(Arc::new(MemoryStore::new()));
        let cs = ChangeSet::new("boom", "ops", "explode").run(|| anyhow::bail!("disk full"));
        match invoker.invoke(&cs).unwrap_err() {
            ChangesetError::ChangeSetFailed { change_id, source } => {
                assert_eq!(change_id, "boom");
                assert_eq!(source.to_string(), "disk full");
            }
            other => panic!("expected ChangeSetFailed, got {other:?}"),
        }
    }
}
