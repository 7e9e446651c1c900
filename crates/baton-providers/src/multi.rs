//! Prefix-routing provider.
//!
//! Model names of the form `prefix/model` are dispatched to the provider
//! registered for `prefix`; everything else goes to the fallback provider
//! with the name untouched.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::{Model, ModelProvider};

#[derive(Default)]
pub struct MultiProvider {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    fallback: Option<Arc<dyn ModelProvider>>,
}

impl MultiProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for names starting with `prefix/`.
    pub fn with_provider(mut self, prefix: impl Into<String>, provider: Arc<dyn ModelProvider>) -> Self {
        self.providers.insert(prefix.into(), provider);
        self
    }

    /// Provider used for unprefixed names, unknown prefixes, and the
    /// default model.
    pub fn with_fallback(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    fn fallback(&self, name: Option<&str>) -> anyhow::Result<Arc<dyn Model>> {
        match &self.fallback {
            Some(provider) => provider.get_model(name),
            None => Err(anyhow::anyhow!(
                "No provider registered for model '{}'",
                name.unwrap_or("<default>")
            )),
        }
    }
}

impl ModelProvider for MultiProvider {
    fn get_model(&self, name: Option<&str>) -> anyhow::Result<Arc<dyn Model>> {
        let Some(name) = name else {
            return self.fallback(None);
        };

        if let Some((prefix, model)) = name.split_once('/') {
            if let Some(provider) = self.providers.get(prefix) {
                debug!(prefix, model, "Routing model to prefixed provider");
                return provider.get_model(Some(model));
            }
            warn!(prefix, "Unknown model prefix, using fallback provider");
        }
        self.fallback(Some(name))
    }
}
