//! Runtime environment detection.
//!
//! Before a shell is spawned, the resolver looks for a language-runtime
//! environment (a Python virtualenv, for instance) that the session should
//! activate. Candidates are checked in a fixed order and the first valid one
//! wins:
//!
//! 1. the configured `preferred` environment,
//! 2. the environment bundled next to the daemon,
//! 3. conventional directory names in the session's directory and up to
//!    `search_depth - 1` of its ancestors.

use std::path::{Path, PathBuf};

use crate::config::EnvironmentConfig;

/// A runtime environment a session will activate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    path: PathBuf,
    activation_script: PathBuf,
}

impl Environment {
    /// Returns the environment's root directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the environment's display name (its directory name).
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Returns the full path of the activation script.
    pub fn activation_script(&self) -> PathBuf {
        self.path.join(&self.activation_script)
    }

    /// Returns the line typed into the shell to activate the environment.
    pub fn activation_command(&self) -> String {
        format!("source \"{}\"\n", self.activation_script().display())
    }
}

/// Finds the environment a session started in a given directory should use.
#[derive(Debug, Clone)]
pub struct EnvironmentResolver {
    config: EnvironmentConfig,
}

impl EnvironmentResolver {
    /// Creates a resolver from the environment configuration.
    pub fn new(config: EnvironmentConfig) -> Self {
        Self { config }
    }

    /// Returns the first valid environment for `start_dir`, if any.
    ///
    /// A miss is not an error: the session simply starts without activation.
    pub fn resolve(&self, start_dir: &Path) -> Option<Environment> {
        if !self.config.enabled {
            return None;
        }

        let fixed = [
            self.config.preferred.as_deref(),
            self.config.bundled_dir.as_deref(),
        ];
        if let Some(found) = fixed.into_iter().flatten().find_map(|dir| self.candidate(dir)) {
            tracing::debug!(path = %found.path.display(), "Using fixed environment");
            return Some(found);
        }

        let start = absolutize(start_dir);
        let found = start
            .ancestors()
            .take(self.config.search_depth)
            .find_map(|dir| {
                self.config
                    .directory_names
                    .iter()
                    .find_map(|name| self.candidate(&dir.join(name)))
            });

        match &found {
            Some(env) => tracing::debug!(
                start_dir = %start.display(),
                path = %env.path.display(),
                "Resolved environment"
            ),
            None => tracing::trace!(start_dir = %start.display(), "No environment found"),
        }

        found
    }

    fn candidate(&self, dir: &Path) -> Option<Environment> {
        if dir.join(&self.config.activation_script).is_file() {
            Some(Environment {
                path: dir.to_path_buf(),
                activation_script: self.config.activation_script.clone(),
            })
        } else {
            None
        }
    }
}

fn absolutize(dir: &Path) -> PathBuf {
    if dir.is_absolute() {
        return dir.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(dir))
        .unwrap_or_else(|_| dir.to_path_buf())
}
