//! Stateful loader facade.
//!
//! [`HiveParser`] wraps [`Hive`] for callers that prefer a load-then-query
//! object: `load` reports success as a boolean and keeps the failure for
//! later inspection, and queries on an unloaded parser return nothing.

use crate::error::{ErrorKind, RegistryError};
use crate::hive::{Hive, LoadOptions, RegKey};
use std::path::Path;
use tracing::warn;

/// Holds at most one loaded hive plus the error of the last failed load.
#[derive(Debug, Default)]
pub struct HiveParser {
    options: LoadOptions,
    hive: Option<Hive>,
    last_error: Option<RegistryError>,
}

impl HiveParser {
    /// Creates a parser with default load options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a parser that loads with the given options.
    pub fn with_options(options: LoadOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Loads a hive, replacing any previously loaded one.
    ///
    /// Returns false on failure; the cause is then available from
    /// [`HiveParser::last_error`] and the parser holds no hive.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> bool {
        match Hive::open_with_options(path.as_ref(), &self.options) {
            Ok(hive) => {
                self.hive = Some(hive);
                self.last_error = None;
                true
            }
            Err(e) => {
                warn!(path = %path.as_ref().display(), error = %e, "Failed to load hive");
                self.hive = None;
                self.last_error = Some(e);
                false
            }
        }
    }

    /// Error of the most recent failed load.
    pub fn last_error(&self) -> Option<&RegistryError> {
        self.last_error.as_ref()
    }

    /// Category of the most recent failed load.
    pub fn last_error_kind(&self) -> Option<ErrorKind> {
        self.last_error.as_ref().map(RegistryError::kind)
    }

    /// The loaded hive, if any.
    pub fn hive(&self) -> Option<&Hive> {
        self.hive.as_ref()
    }

    /// Returns true if a hive is loaded.
    pub fn is_loaded(&self) -> bool {
        self.hive.is_some()
    }

    /// Root key of the loaded hive.
    pub fn get_root_key(&self) -> Option<RegKey> {
        self.hive.as_ref()?.root_key()
    }

    /// Key at `path` in the loaded hive.
    pub fn get_key(&self, path: &str) -> Option<RegKey> {
        self.hive.as_ref()?.get_key(path)
    }

    /// Every key of the loaded hive in pre-order; empty when nothing is
    /// loaded.
    pub fn iter(&self) -> impl Iterator<Item = RegKey> + '_ {
        self.hive.iter().flat_map(Hive::iter)
    }

    /// Returns true if the loaded hive had transaction log pages applied.
    pub fn transaction_logs_applied(&self) -> bool {
        self.hive.as_ref().map_or(false, Hive::transaction_logs_applied)
    }
}
