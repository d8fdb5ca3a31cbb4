//! Store identity, configuration and error reporting.

use crate::error::StoreError;
use log::error;
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Environment variable overriding the default store directory.
pub const STORE_DIR_ENV: &str = "ENTITYKIT_STORE_DIR";

const STORE_DIR_NAME: &str = "entitykit";
const STORE_FILE_EXTENSION: &str = "sqlite";

/// Callback receiving failures that are not returned to any caller.
pub type ErrorHandler = Arc<dyn Fn(&StoreError) + Send + Sync>;

/// Dedup key of a persistence stack.
///
/// Two identities are equal iff both name and location match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreIdentity {
    name: String,
    location: Option<PathBuf>,
}

impl StoreIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: None,
        }
    }

    /// Uses `path` as the store file instead of the default location.
    pub fn with_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.location = Some(path.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    /// Store file path: the explicit location, else `<name>.sqlite` inside
    /// [`default_store_directory`].
    pub fn resolved_path(&self) -> PathBuf {
        match &self.location {
            Some(path) => path.clone(),
            None => default_store_directory()
                .join(format!("{}.{STORE_FILE_EXTENSION}", self.name)),
        }
    }
}

/// Everything needed to bring up one persistence stack.
#[derive(Clone)]
pub struct StoreConfiguration {
    identity: StoreIdentity,
    error_handler: Option<ErrorHandler>,
    auto_migrate: bool,
}

impl StoreConfiguration {
    /// Configuration for the store `name` at its default location, with
    /// automatic migration and no error handler.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            identity: StoreIdentity::new(name),
            error_handler: None,
            auto_migrate: true,
        }
    }

    pub fn with_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity = self.identity.with_location(path);
        self
    }

    /// Installs the callback that receives open, flush and save failures.
    pub fn with_error_handler(
        mut self,
        handler: impl Fn(&StoreError) + Send + Sync + 'static,
    ) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_auto_migrate(mut self, enabled: bool) -> Self {
        self.auto_migrate = enabled;
        self
    }

    pub fn identity(&self) -> &StoreIdentity {
        &self.identity
    }

    pub fn auto_migrate(&self) -> bool {
        self.auto_migrate
    }

    pub(crate) fn error_handler(&self) -> Option<ErrorHandler> {
        self.error_handler.clone()
    }
}

impl Debug for StoreConfiguration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfiguration")
            .field("identity", &self.identity)
            .field("error_handler", &self.error_handler.is_some())
            .field("auto_migrate", &self.auto_migrate)
            .finish()
    }
}

/// Routes unreturned failures to the log and the configured handler.
#[derive(Clone)]
pub(crate) struct ErrorReporter {
    store: Arc<str>,
    handler: Option<ErrorHandler>,
}

impl ErrorReporter {
    pub(crate) fn new(store: &str, handler: Option<ErrorHandler>) -> Self {
        Self {
            store: Arc::from(store),
            handler,
        }
    }

    pub(crate) fn report(&self, err: &StoreError) {
        error!(
            "event=store_error module=stack status=error store={} error={}",
            self.store, err
        );
        if let Some(handler) = &self.handler {
            handler(err);
        }
    }
}

/// Directory holding stores that have no explicit location.
///
/// Resolution order: `ENTITYKIT_STORE_DIR`, the platform data directory
/// joined with `entitykit`, then the system temp directory.
pub fn default_store_directory() -> PathBuf {
    if let Ok(raw) = std::env::var(STORE_DIR_ENV) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    platform_data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(STORE_DIR_NAME)
}

fn platform_data_dir() -> Option<PathBuf> {
    if cfg!(target_os = "windows") {
        return env_dir("APPDATA");
    }
    let home = env_dir("HOME");
    if cfg!(target_os = "macos") {
        return home.map(|home| home.join("Library").join("Application Support"));
    }
    env_dir("XDG_DATA_HOME").or_else(|| home.map(|home| home.join(".local").join("share")))
}

fn env_dir(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}
