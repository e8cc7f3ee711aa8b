use crate::errors::{Error, Result};
use async_trait::async_trait;
use azure_core::credentials::TokenCredential;
use azure_identity::{
    AzureCliCredential, ManagedIdentityCredential, ManagedIdentityCredentialOptions,
    UserAssignedId,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const UNSELECTED: usize = usize::MAX;

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self, scope: &str) -> Result<String>;
}

#[async_trait]
impl TokenSource for Arc<dyn TokenCredential> {
    async fn token(&self, scope: &str) -> Result<String> {
        let access = self
            .get_token(&[scope], None)
            .await
            .map_err(|e| Error::Credential(e.to_string()))?;
        Ok(access.token.secret().to_string())
    }
}

/// Tries each source in order and sticks with the first one that works.
pub struct CredentialChain {
    sources: Vec<(&'static str, Box<dyn TokenSource>)>,
    selected: AtomicUsize,
}

impl CredentialChain {
    pub fn new(sources: Vec<(&'static str, Box<dyn TokenSource>)>) -> Self {
        Self {
            sources,
            selected: AtomicUsize::new(UNSELECTED),
        }
    }

    // host managed identity first, developer CLI login second
    pub fn azure_default(client_id: Option<&str>) -> Result<Self> {
        let mut options = ManagedIdentityCredentialOptions::default();
        if let Some(client_id) = client_id {
            debug!(client_id, "Using user-assigned managed identity");
            options.user_assigned_id = Some(UserAssignedId::ClientId(client_id.to_string()));
        }

        let managed: Arc<dyn TokenCredential> = ManagedIdentityCredential::new(Some(options))
            .map_err(|e| Error::Credential(e.to_string()))?;
        let cli: Arc<dyn TokenCredential> =
            AzureCliCredential::new(None).map_err(|e| Error::Credential(e.to_string()))?;

        Ok(Self::new(vec![
            ("managed identity", Box::new(managed) as Box<dyn TokenSource>),
            ("Azure CLI", Box::new(cli) as Box<dyn TokenSource>),
        ]))
    }
}

#[async_trait]
impl TokenSource for CredentialChain {
    async fn token(&self, scope: &str) -> Result<String> {
        let selected = self.selected.load(Ordering::Acquire);
        if let Some((_, source)) = self.sources.get(selected) {
            return source.token(scope).await;
        }

        let mut failures = Vec::with_capacity(self.sources.len());
        for (index, (name, source)) in self.sources.iter().enumerate() {
            match source.token(scope).await {
                Ok(token) => {
                    info!("Authenticated to Cosmos DB with {}", name);
                    self.selected.store(index, Ordering::Release);
                    return Ok(token);
                }
                Err(e) => {
                    debug!("{} credential unavailable: {}", name, e);
                    failures.push(format!("{}: {}", name, e));
                }
            }
        }

        warn!("No credential could provide a token for {}", scope);
        Err(Error::Credential(format!(
            "no credential in the chain succeeded ({})",
            failures.join("; ")
        )))
    }
}
