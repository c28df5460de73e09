// Logging utilities for the certstore crate
//
// Component-scoped loggers over the `log` facade: every manager carries an
// Arc<Logger> and log lines are prefixed with the component and the store
// scope they belong to.

use log::{debug, error, info, warn};

/// Predefined components for logging categorization
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Component {
    Store,
    Manager,
    Gateway,
    Custom(&'static str),
}

impl Component {
    /// Get the string representation of the component
    pub fn as_str(&self) -> &str {
        match self {
            Component::Store => "Store",
            Component::Manager => "Manager",
            Component::Gateway => "Gateway",
            Component::Custom(name) => name,
        }
    }
}

/// A helper for creating component-specific loggers with scope tracking
#[derive(Clone)]
pub struct Logger {
    component: Component,
    /// Scope identifier (store name, gateway instance, test name)
    scope: String,
}

impl Logger {
    pub fn new_root(component: Component, scope: &str) -> Self {
        Self {
            component,
            scope: scope.to_string(),
        }
    }

    /// Create a child logger with the same scope but a different component
    pub fn with_component(&self, component: Component) -> Self {
        Self {
            component,
            scope: self.scope.clone(),
        }
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        debug!("[{}:{}] {}", self.component.as_str(), self.scope, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        info!("[{}:{}] {}", self.component.as_str(), self.scope, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        warn!("[{}:{}] {}", self.component.as_str(), self.scope, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        error!("[{}:{}] {}", self.component.as_str(), self.scope, message.as_ref());
    }
}
