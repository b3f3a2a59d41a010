//! Service registry
//!
//! Name → [`Service`] lookup consumed by the connection multiplexer. Populated during
//! configuration, then shared read-only (`Arc<Registry>`) by every connection.

use std::collections::HashMap;

use crate::error::RegistryError;
use crate::service::{Method, Service};

/// Registry of all services
#[derive(Debug, Default)]
pub struct Registry {
    services: HashMap<String, Service>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new service with an initial method table.
    ///
    /// Fails if `name` is already registered or the table repeats a method name.
    pub fn register<I, S>(
        &mut self,
        name: impl Into<String>,
        methods: I,
    ) -> Result<&mut Service, RegistryError>
    where
        I: IntoIterator<Item = (S, Method)>,
        S: Into<String>,
    {
        let name = name.into();
        if self.services.contains_key(&name) {
            return Err(RegistryError::DuplicateService { name });
        }

        let mut service = Service::new(name.clone());
        service.extend(methods)?;
        tracing::info!("Registered service \"{}\" ({} methods)", name, service.method_names().len());

        Ok(self.services.entry(name).or_insert(service))
    }

    /// Look up a service by name
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }

    /// Look up a service for further configuration (extra methods, hooks)
    pub fn service_mut(&mut self, name: &str) -> Option<&mut Service> {
        self.services.get_mut(name)
    }

    /// Apply a configuration function to this registry
    pub fn configure<F>(&mut self, f: F) -> Result<&mut Self, RegistryError>
    where
        F: FnOnce(&mut Self) -> Result<(), RegistryError>,
    {
        f(self)?;
        Ok(self)
    }

    /// Sorted names of all registered services
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get stats about the registry
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            service_count: self.services.len(),
            method_count: self.services.values().map(|s| s.method_names().len()).sum(),
        }
    }
}

/// Statistics about the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub service_count: usize,
    pub method_count: usize,
}
