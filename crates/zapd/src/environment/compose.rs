use std::path::Path;

use tracing::{debug, info};
use zap_config::Config;

use super::{
    ENVIRONMENT_TARGET, Engine, EnvironmentError, HANDLE_REQUEST, ModuleCatalog, RecordingEngine,
    Source,
};
use crate::workers::{HandlerError, RequestHandler};

/// Extension of module files holding initial facts.
pub const FACTS_EXTENSION: &str = "fct";

/// Request environment built from an engine and the discovered modules.
#[derive(Debug)]
pub struct Environment<E = RecordingEngine> {
    engine: E,
    catalog: ModuleCatalog,
}

impl Environment<RecordingEngine> {
    /// Builds the default environment described by `config`.
    ///
    /// Scans the module directory, loads the bootstrap and configuration
    /// files when they exist, then loads the discovered fact files.
    ///
    /// # Errors
    ///
    /// Returns an error when the module directory cannot be listed or when a
    /// present startup or fact file is empty or unreadable.
    pub fn from_config(config: &Config) -> Result<Self, EnvironmentError> {
        info!(target: ENVIRONMENT_TARGET, "initializing environment");
        let catalog = ModuleCatalog::scan(config.module_dir())?;
        let mut environment = Self::new(RecordingEngine::new(), catalog);
        environment.load_startup(&config.bootstrap_path(), &config.configuration_path())?;
        environment.load_module_facts()?;
        Ok(environment)
    }
}

impl<E: Engine> Environment<E> {
    /// Composes an environment from an engine and a module catalog.
    #[must_use]
    pub const fn new(engine: E, catalog: ModuleCatalog) -> Self {
        Self { engine, catalog }
    }

    /// Loads the bootstrap file and then the configuration file.
    ///
    /// Files that do not exist are skipped.
    ///
    /// # Errors
    ///
    /// Propagates the engine's load errors.
    pub fn load_startup(
        &mut self,
        bootstrap: &Path,
        configuration: &Path,
    ) -> Result<(), EnvironmentError> {
        for path in [bootstrap, configuration] {
            if path.exists() {
                self.engine.load(&Source::File(path.to_path_buf()))?;
            } else {
                debug!(
                    target: ENVIRONMENT_TARGET,
                    path = %path.display(),
                    "startup file absent; skipping"
                );
            }
        }
        Ok(())
    }

    /// Loads every catalogued `.fct` module as initial facts.
    ///
    /// # Errors
    ///
    /// Propagates the engine's fact loading errors.
    pub fn load_module_facts(&mut self) -> Result<usize, EnvironmentError> {
        let mut total = 0;
        for entry in self.catalog.with_extension(FACTS_EXTENSION) {
            total += self
                .engine
                .load_facts(&Source::File(entry.path().to_path_buf()))?;
        }
        debug!(target: ENVIRONMENT_TARGET, facts = total, "module facts loaded");
        Ok(total)
    }

    /// The composed engine.
    #[must_use]
    pub const fn engine(&self) -> &E {
        &self.engine
    }

    /// Modules discovered at start-up.
    #[must_use]
    pub const fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }
}

impl<E: Engine> RequestHandler for Environment<E> {
    fn handle(&self, request: &[u8]) -> Result<Option<Vec<u8>>, HandlerError> {
        self.engine
            .execute(HANDLE_REQUEST, request)
            .map_err(|source| HandlerError::Environment { source })
    }
}
