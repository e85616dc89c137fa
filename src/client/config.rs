//! Client configuration

use crate::resolver::{ResolveOptions, DEFAULT_BASE_IMAGE, DEFAULT_CORE_IMAGE};
use std::time::Duration;

/// Default grace period before a stopped container is killed
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Orchestration client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Image of attachment containers
    pub base_image: String,
    /// Image for attached volume initialization
    pub core_image: String,
    /// Grace period for stop; `None` leaves it to the engine
    pub stop_timeout: Option<Duration>,
    /// Remove containers even if they are running
    pub force_remove: bool,
    /// Inspect containers first and skip operations already satisfied
    pub check_state: bool,
    /// Include dependencies of requested containers
    pub dependencies: bool,
    /// Include attachment containers
    pub attached: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_image: DEFAULT_BASE_IMAGE.to_string(),
            core_image: DEFAULT_CORE_IMAGE.to_string(),
            stop_timeout: Some(DEFAULT_STOP_TIMEOUT),
            force_remove: false,
            check_state: true,
            dependencies: true,
            attached: true,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set base image
    pub fn with_base_image(mut self, image: &str) -> Self {
        self.base_image = image.to_string();
        self
    }

    /// Set core image
    pub fn with_core_image(mut self, image: &str) -> Self {
        self.core_image = image.to_string();
        self
    }

    /// Set stop timeout
    pub fn with_stop_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Set force remove
    pub fn with_force_remove(mut self, force: bool) -> Self {
        self.force_remove = force;
        self
    }

    /// Set state pre-check
    pub fn with_check_state(mut self, check: bool) -> Self {
        self.check_state = check;
        self
    }

    /// Set dependency handling
    pub fn with_dependencies(mut self, dependencies: bool) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Set attachment container handling
    pub fn with_attached(mut self, attached: bool) -> Self {
        self.attached = attached;
        self
    }

    /// Resolver options for this configuration
    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            dependencies: self.dependencies,
            attached: self.attached,
            base_image: self.base_image.clone(),
            core_image: self.core_image.clone(),
        }
    }
}
