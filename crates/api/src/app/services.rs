//! Infrastructure wiring: picks store, object store and analysis backends from
//! `AppConfig` and assembles the `DocumentService`.

use std::sync::Arc;

use tracing::info;

use docintel_infra::analysis::{AnalysisError, AnalysisService, HttpAnalysisClient, SimulatedAnalysisService};
use docintel_infra::config::{AppConfig, DEFAULT_OBJECT_STORE_BASE_URL, StorageConfig};
use docintel_infra::jobs::{DocumentService, ServiceComponents, ServiceSettings};
use docintel_infra::object_store::{FilesystemObjectStore, InMemoryObjectStore, ObjectStore, ObjectStoreError};
use docintel_infra::secrets::{EnvSecretStore, SecretStore};
use docintel_infra::store::{InMemoryMetadataStore, MetadataStore, PostgresMetadataStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ServicesError {
    #[error("metadata store: {0}")]
    Store(#[from] StoreError),
    #[error("object store: {0}")]
    ObjectStore(#[from] ObjectStoreError),
    #[error("analysis client: {0}")]
    Analysis(#[from] AnalysisError),
}

#[derive(Clone, Debug)]
pub struct AppServices {
    pub documents: DocumentService,
}

impl AppServices {
    pub fn new(documents: DocumentService) -> Self {
        Self { documents }
    }
}

pub async fn build_services(config: &AppConfig) -> Result<AppServices, ServicesError> {
    let store: Arc<dyn MetadataStore> = match &config.storage {
        StorageConfig::Postgres { database_url } => {
            info!("using postgres metadata store");
            Arc::new(PostgresMetadataStore::connect(database_url).await?)
        }
        StorageConfig::InMemory => {
            info!("using in-memory metadata store");
            Arc::new(InMemoryMetadataStore::new())
        }
    };

    let objects: Arc<dyn ObjectStore> = match &config.object_store.root {
        Some(root) => {
            info!(root = %root.display(), "using filesystem object store");
            Arc::new(FilesystemObjectStore::open(root.clone(), config.object_store.base_url.clone()).await?)
        }
        None => {
            info!("using in-memory object store");
            let base_url = config
                .object_store
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OBJECT_STORE_BASE_URL.to_string());
            Arc::new(InMemoryObjectStore::new(base_url))
        }
    };

    let (analysis, secrets): (Arc<dyn AnalysisService>, Option<Arc<dyn SecretStore>>) =
        match &config.analyzer.endpoint {
            Some(endpoint) => {
                info!(endpoint = %endpoint, analyzer_id = %config.analyzer.analyzer_id, "using http analysis client");
                let secrets: Arc<dyn SecretStore> = Arc::new(EnvSecretStore::new());
                let client = HttpAnalysisClient::new(endpoint.clone(), &config.analyzer, Arc::clone(&secrets))?;
                (Arc::new(client), Some(secrets))
            }
            None => {
                info!(
                    running_polls = config.analyzer.simulated_polls,
                    "ANALYZER_ENDPOINT not set; using simulated analysis service"
                );
                (
                    Arc::new(SimulatedAnalysisService::new().with_running_polls(config.analyzer.simulated_polls)),
                    None,
                )
            }
        };

    let documents = DocumentService::new(
        ServiceComponents {
            store,
            objects,
            analysis,
            secrets,
            extractor: None,
        },
        ServiceSettings::from_config(config),
    );
    Ok(AppServices::new(documents))
}
