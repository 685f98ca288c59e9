//! Request environment handed to the worker pool.
//!
//! An [`Environment`] composes an [`Engine`] (anything that is [`Loadable`],
//! [`Executable`] and a [`FactSource`]) with the [`ModuleCatalog`] discovered
//! under the configuration directory. Workers only see it through
//! [`crate::workers::RequestHandler`].

mod capability;
mod catalog;
mod compose;
mod engine;
mod errors;

pub use self::capability::{Engine, Executable, FactSource, Loadable, Source};
pub use self::catalog::{ModuleCatalog, ModuleEntry};
pub use self::compose::{Environment, FACTS_EXTENSION};
pub use self::engine::{HANDLE_REQUEST, RecordingEngine};
pub use self::errors::EnvironmentError;

pub(crate) const ENVIRONMENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::environment");
