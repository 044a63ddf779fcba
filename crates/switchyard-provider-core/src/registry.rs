use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::{ProviderAdapter, ProviderDescriptor};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("provider {0} is already registered")]
    Duplicate(String),
    #[error("provider name must not be empty")]
    EmptyName,
}

#[derive(Clone)]
pub struct RegisteredProvider {
    pub descriptor: Arc<ProviderDescriptor>,
    pub adapter: Arc<dyn ProviderAdapter>,
}

/// Provider lookup table, filled once at startup and read-only afterwards.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, RegisteredProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        descriptor: ProviderDescriptor,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Result<(), RegistryError> {
        if descriptor.name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.providers.contains_key(&descriptor.name) {
            return Err(RegistryError::Duplicate(descriptor.name));
        }
        self.providers.insert(
            descriptor.name.clone(),
            RegisteredProvider {
                descriptor: Arc::new(descriptor),
                adapter,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredProvider> {
        self.providers.get(name)
    }

    pub fn descriptor(&self, name: &str) -> Option<&ProviderDescriptor> {
        self.providers.get(name).map(|p| p.descriptor.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
