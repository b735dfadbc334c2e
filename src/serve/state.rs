//! Shared server state: served models and the error table

use crate::config::EffectiveConfig;
use crate::error::ModelError;
use crate::model::{matches_tags, route_name, select_version, ModelHandle, ModelLoader};
use crate::registry::{ModelVersion, RegisteredModel, RegistrySource};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

/// Error table key for registry failures.
pub const SERVER_ERROR_KEY: &str = "server";

pub struct ServerState {
    config: Arc<EffectiveConfig>,
    registry: Box<dyn RegistrySource>,
    loader: Box<dyn ModelLoader>,
    models: RwLock<BTreeMap<String, Arc<ModelHandle>>>,
    errors: RwLock<BTreeMap<String, String>>,
}

/// Summary of one refresh pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub loaded: Vec<String>,
    pub unchanged: usize,
    pub failed: Vec<String>,
    pub removed: Vec<String>,
}

impl ServerState {
    pub fn new(
        config: Arc<EffectiveConfig>,
        registry: Box<dyn RegistrySource>,
        loader: Box<dyn ModelLoader>,
    ) -> Self {
        Self {
            config,
            registry,
            loader,
            models: RwLock::new(BTreeMap::new()),
            errors: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &EffectiveConfig {
        &self.config
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect()
    }

    pub fn model(&self, route: &str) -> Option<Arc<ModelHandle>> {
        self.models.read().unwrap_or_else(PoisonError::into_inner).get(route).cloned()
    }

    pub fn errors(&self) -> BTreeMap<String, String> {
        self.errors.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_error(&self, key: &str, message: Option<String>) {
        let mut errors = self.errors.write().unwrap_or_else(PoisonError::into_inner);
        match message {
            Some(msg) => {
                errors.insert(key.to_string(), msg);
            }
            None => {
                errors.remove(key);
            }
        }
    }

    /// Sync the served models with the registry.
    ///
    /// Models whose selected run is already loaded are left alone. New or
    /// changed models are loaded in parallel. Models that vanished from the
    /// registry or no longer pass the tag filter are dropped.
    pub fn update_models(&self) -> RefreshReport {
        tracing::info!("Update models");
        let mut report = RefreshReport::default();

        let registered = match self.registry.list_models() {
            Ok(models) => {
                self.set_error(SERVER_ERROR_KEY, None);
                models
            }
            Err(e) => {
                tracing::warn!("Failed to list registered models: {}", e);
                self.set_error(SERVER_ERROR_KEY, Some(e.to_string()));
                return report;
            }
        };

        let mut wanted = HashSet::new();
        let mut to_load: Vec<(String, RegisteredModel, ModelVersion)> = Vec::new();

        for model in registered {
            if !matches_tags(&model, &self.config.tags) {
                continue;
            }
            let route = route_name(&model.name);
            let Some(version) = select_version(&model, self.config.staging).cloned() else {
                let err = ModelError::NoVersions { name: model.name.clone() };
                tracing::debug!("{}", err);
                continue;
            };
            wanted.insert(route.clone());

            if self.model(&route).is_some_and(|m| m.run_id() == version.run_id) {
                report.unchanged += 1;
                continue;
            }
            to_load.push((route, model, version));
        }

        let results: Vec<(String, Result<ModelHandle, ModelError>)> = to_load
            .into_par_iter()
            .map(|(route, model, version)| {
                tracing::info!("Update model {} (version {})", route, version.version);
                let loaded = self
                    .loader
                    .load(&model, &version)
                    .map(|predictor| ModelHandle::new(model, version, predictor));
                (route, loaded)
            })
            .collect();

        let mut stale = Vec::new();
        {
            let mut models = self.models.write().unwrap_or_else(PoisonError::into_inner);
            for (route, result) in results {
                match result {
                    Ok(handle) => {
                        if let Some(old) = models.insert(route.clone(), Arc::new(handle)) {
                            stale.push(old);
                        }
                        self.set_error(&route, None);
                        report.loaded.push(route);
                    }
                    Err(e) => {
                        tracing::error!("Failed to load model {}: {}", route, e);
                        self.set_error(&route, Some(e.to_string()));
                        report.failed.push(route);
                    }
                }
            }

            let gone: Vec<String> =
                models.keys().filter(|k| !wanted.contains(*k)).cloned().collect();
            for route in gone {
                tracing::info!("Removing model {}", route);
                if let Some(old) = models.remove(&route) {
                    stale.push(old);
                }
                report.removed.push(route);
            }
        }
        // Replaced handles are dropped outside the lock; their scoring
        // processes stop once in-flight requests release them.
        drop(stale);

        report
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::RegistryError;
    use crate::model::testing::EchoPredictor;
    use crate::model::Predictor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Registry returning a configurable list, or an error when `None`.
    #[derive(Default)]
    pub struct FakeRegistry {
        pub models: Mutex<Option<Vec<RegisteredModel>>>,
    }

    impl FakeRegistry {
        pub fn with(models: Vec<RegisteredModel>) -> Self {
            Self { models: Mutex::new(Some(models)) }
        }
    }

    impl RegistrySource for Arc<FakeRegistry> {
        fn list_models(&self) -> Result<Vec<RegisteredModel>, RegistryError> {
            self.models
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
                .ok_or_else(|| RegistryError::Api { status: 503, message: "registry down".into() })
        }
    }

    /// Loader that counts loads and fails for names starting with "broken".
    #[derive(Default)]
    pub struct CountingLoader {
        pub loads: AtomicUsize,
    }

    impl ModelLoader for Arc<CountingLoader> {
        fn load(
            &self,
            model: &RegisteredModel,
            _version: &ModelVersion,
        ) -> Result<Box<dyn Predictor>, ModelError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if model.name.starts_with("broken") {
                return Err(ModelError::Load { name: model.name.clone(), reason: "boom".into() });
            }
            Ok(Box::new(EchoPredictor))
        }
    }

    pub fn state_with(
        config: EffectiveConfig,
        registry: Arc<FakeRegistry>,
        loader: Arc<CountingLoader>,
    ) -> ServerState {
        ServerState::new(Arc::new(config), Box::new(registry), Box::new(loader))
    }
}
