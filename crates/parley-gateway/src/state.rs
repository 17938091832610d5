//! Shared handler state

use std::sync::Arc;

use parley_context::{EstimateCounter, ModelCatalog, StaticCatalog};
use parley_runtime::{
    CompletionBackend, CompletionOrchestrator, Credential, OpenAIBackend, ProviderError,
    RuntimeConfig,
};

use crate::error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<CompletionOrchestrator>,
    pub catalog: Arc<dyn ModelCatalog>,
    /// Used when a request carries no bearer token
    pub default_credential: Option<Credential>,
}

impl AppState {
    /// Wire the orchestrator to an arbitrary backend with the built-in catalog.
    pub fn with_backend(backend: Arc<dyn CompletionBackend>, config: RuntimeConfig) -> Self {
        let catalog: Arc<dyn ModelCatalog> = Arc::new(StaticCatalog::default());
        let default_credential = config.api_key.clone().map(Credential::new);
        let orchestrator = CompletionOrchestrator::new(
            backend,
            Arc::new(EstimateCounter),
            Arc::clone(&catalog),
            config,
        );

        Self {
            orchestrator: Arc::new(orchestrator),
            catalog,
            default_credential,
        }
    }

    pub fn from_config(config: RuntimeConfig) -> Result<Self, ProviderError> {
        let backend = OpenAIBackend::new(&config)?;
        Ok(Self::with_backend(Arc::new(backend), config))
    }

    pub fn credential(&self, bearer: Option<&str>) -> ApiResult<Credential> {
        match bearer {
            Some(token) if !token.is_empty() => Ok(Credential::new(token)),
            _ => self
                .default_credential
                .clone()
                .ok_or(ApiError::MissingCredential),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("orchestrator", &self.orchestrator)
            .field("default_credential", &self.default_credential)
            .finish_non_exhaustive()
    }
}
