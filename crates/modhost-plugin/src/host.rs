//! Facts about the hosting process consulted by the loader.

use std::sync::atomic::{AtomicBool, Ordering};

use semver::Version;

use modhost_core::config::HostConfig;
use modhost_core::result::AppResult;

use crate::version::parse_lenient;

/// Running host version and setup-mode flag.
#[derive(Debug)]
pub struct HostEnvironment {
    /// Version compared against descriptors' minimum host version.
    version: Version,
    /// Whether the host is still in initial-setup mode.
    setup_mode: AtomicBool,
}

impl HostEnvironment {
    /// Creates a host environment.
    pub fn new(version: Version, setup_mode: bool) -> Self {
        Self {
            version,
            setup_mode: AtomicBool::new(setup_mode),
        }
    }

    /// Builds the environment from configuration.
    pub fn from_config(config: &HostConfig) -> AppResult<Self> {
        Ok(Self::new(parse_lenient(&config.version)?, config.setup_mode))
    }

    /// Running host version.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Whether the host is in setup mode.
    pub fn is_setup_mode(&self) -> bool {
        self.setup_mode.load(Ordering::Acquire)
    }

    /// Enters or leaves setup mode.
    pub fn set_setup_mode(&self, setup_mode: bool) {
        self.setup_mode.store(setup_mode, Ordering::Release);
    }
}
