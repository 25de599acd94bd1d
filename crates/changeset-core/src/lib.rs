pub mod catalog;
pub mod config;
pub mod entry;
pub mod environment;
pub mod error;
pub mod invoker;
pub mod ledger;
pub mod lock;
pub mod mapper;
pub mod runner;
pub mod store;

pub use catalog::{Catalog, CatalogUnit, ChangeLogRegistry, ChangeSet};
pub use config::RunnerConfig;
pub use environment::Environment;
pub use error::{ChangesetError, Result};
pub use runner::{RunOutcome, RunReport, Runner};
