use crate::domain::{DomainResult, Tenant};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Provisioned tenants keyed by organization ID.
/// Written by the tenant provisioner, read wherever messages are routed per organization.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TenantRegistry: Send + Sync {
    /// Insert or replace the tenant for its organization
    async fn register(&self, tenant: Tenant) -> DomainResult<()>;

    async fn get(&self, organization_id: &str) -> DomainResult<Option<Tenant>>;

    async fn list(&self) -> DomainResult<Vec<Tenant>>;
}

/// In-memory implementation of TenantRegistry using HashMap
pub struct InMemoryTenantRegistry {
    tenants: Arc<RwLock<HashMap<String, Tenant>>>,
}

impl InMemoryTenantRegistry {
    pub fn new() -> Self {
        Self {
            tenants: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryTenantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TenantRegistry for InMemoryTenantRegistry {
    async fn register(&self, tenant: Tenant) -> DomainResult<()> {
        let mut tenants = self.tenants.write().await;
        tenants.insert(tenant.organization.id.clone(), tenant);
        Ok(())
    }

    async fn get(&self, organization_id: &str) -> DomainResult<Option<Tenant>> {
        let tenants = self.tenants.read().await;
        Ok(tenants.get(organization_id).cloned())
    }

    async fn list(&self) -> DomainResult<Vec<Tenant>> {
        let tenants = self.tenants.read().await;
        let mut list: Vec<Tenant> = tenants.values().cloned().collect();
        list.sort_by(|a, b| a.organization.id.cmp(&b.organization.id));
        Ok(list)
    }
}
