//! Well-known files inside an environment directory.

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// Inventory consumed by the playbook run.
pub const INVENTORY_FILE: &str = "hosts";
/// Stack template consumed by the heat provisioner.
pub const TEMPLATE_FILE: &str = "heat_stack.yml";
/// Extra variables passed to the playbook when the heat provisioner runs.
pub const TEMPLATE_VARS_FILE: &str = "vars_heat.yml";
/// Routing file maintained by the operator.
pub const OPERATOR_ROUTING_FILE: &str = "ssh_config";
/// Routing file generated from stack outputs.
pub const GENERATED_ROUTING_FILE: &str = ".ssh_config";
/// Private key generated by the stack.
pub const GENERATED_KEY_FILE: &str = ".ssh_key";

/// Errors raised while resolving an environment directory.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum EnvironmentError {
    /// Raised when the environment directory is missing.
    #[error("environment '{path}' does not exist")]
    Missing {
        /// Directory that was expected.
        path: Utf8PathBuf,
    },
    /// Raised when the inventory file is missing.
    #[error("inventory file '{path}' does not exist")]
    MissingInventory {
        /// File that was expected.
        path: Utf8PathBuf,
    },
    /// Raised when a required template is absent.
    #[error("heat provisioner requires a template at {path}")]
    MissingTemplate {
        /// File that was expected.
        path: Utf8PathBuf,
    },
    /// Raised when a file exists but cannot be read.
    #[error("failed to read {path}: {message}")]
    Read {
        /// File that could not be read.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the directory name cannot serve as a stack name.
    #[error("cannot derive a stack name from '{path}'")]
    Unnamed {
        /// Directory without a usable base name.
        path: Utf8PathBuf,
    },
}

/// Resolved paths for a single environment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnvironmentLayout {
    root: Utf8PathBuf,
}

impl EnvironmentLayout {
    /// Wraps `root` without touching the file system. Trailing separators
    /// are removed so derived names stay stable.
    #[must_use]
    pub fn new(root: impl AsRef<Utf8Path>) -> Self {
        let raw = root.as_ref().as_str();
        let trimmed = raw.trim_end_matches(['/', '\\']);
        let normalised = if trimmed.is_empty() { raw } else { trimmed };
        Self {
            root: Utf8PathBuf::from(normalised),
        }
    }

    /// Resolves `root` and checks that it is an existing directory. Relative
    /// paths are made absolute against the current directory so generated
    /// files reference stable locations.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::Missing`] when the directory is absent.
    pub fn open(root: impl AsRef<Utf8Path>) -> Result<Self, EnvironmentError> {
        let layout = Self::new(root);
        if !layout.root.is_dir() {
            return Err(EnvironmentError::Missing { path: layout.root });
        }
        let absolute =
            std::path::absolute(&layout.root).map_err(|err| EnvironmentError::Read {
                path: layout.root.clone(),
                message: err.to_string(),
            })?;
        let root = Utf8PathBuf::from_path_buf(absolute).map_err(|path| EnvironmentError::Read {
            path: layout.root.clone(),
            message: format!("non-UTF-8 path {}", path.display()),
        })?;
        Ok(Self { root })
    }

    /// Environment directory.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Default stack name: the directory's base name.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::Unnamed`] for paths without a base name.
    pub fn stack_name(&self) -> Result<String, EnvironmentError> {
        self.root
            .file_name()
            .filter(|name| !name.trim().is_empty())
            .map(str::to_owned)
            .ok_or_else(|| EnvironmentError::Unnamed {
                path: self.root.clone(),
            })
    }

    /// Inventory path.
    #[must_use]
    pub fn inventory(&self) -> Utf8PathBuf {
        self.root.join(INVENTORY_FILE)
    }

    /// Ensures the inventory exists and returns its path.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::MissingInventory`] when it is absent.
    pub fn require_inventory(&self) -> Result<Utf8PathBuf, EnvironmentError> {
        let path = self.inventory();
        if path.is_file() {
            Ok(path)
        } else {
            Err(EnvironmentError::MissingInventory { path })
        }
    }

    /// Template path.
    #[must_use]
    pub fn template(&self) -> Utf8PathBuf {
        self.root.join(TEMPLATE_FILE)
    }

    /// Reads the stack template.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::MissingTemplate`] when the file is absent
    /// and [`EnvironmentError::Read`] when it cannot be read.
    pub fn read_template(&self) -> Result<String, EnvironmentError> {
        let path = self.template();
        if !path.is_file() {
            return Err(EnvironmentError::MissingTemplate { path });
        }
        std::fs::read_to_string(&path).map_err(|err| EnvironmentError::Read {
            path,
            message: err.to_string(),
        })
    }

    /// Extra variables file, when present.
    #[must_use]
    pub fn template_vars(&self) -> Option<Utf8PathBuf> {
        Some(self.root.join(TEMPLATE_VARS_FILE)).filter(|path| path.is_file())
    }

    /// Generated routing file path.
    #[must_use]
    pub fn generated_routing(&self) -> Utf8PathBuf {
        self.root.join(GENERATED_ROUTING_FILE)
    }

    /// Generated private key path.
    #[must_use]
    pub fn generated_key(&self) -> Utf8PathBuf {
        self.root.join(GENERATED_KEY_FILE)
    }

    /// Routing file to reuse when no provisioner runs: the generated file
    /// from an earlier run wins over the operator-maintained one.
    #[must_use]
    pub fn existing_routing(&self) -> Option<Utf8PathBuf> {
        [self.generated_routing(), self.root.join(OPERATOR_ROUTING_FILE)]
            .into_iter()
            .find(|path| path.is_file())
    }
}
