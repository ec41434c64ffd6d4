//! Client organization lookups served through the typed cache.
//!
//! Every write goes to the database first and then drops the cached entry.

use super::clients::{ClientOrganizationsDao, NewClientOrganization};
use crate::cache::{CacheManager, TypedCache};
use crate::database::DatabaseResult;
use crate::database::entities::ClientOrganization;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct CachedClientOrganizationsDao {
    inner: ClientOrganizationsDao,
    cache: TypedCache<ClientOrganization>,
    ttl: Duration,
}

impl CachedClientOrganizationsDao {
    pub fn new(inner: ClientOrganizationsDao, cache: &CacheManager) -> Self {
        Self {
            inner,
            cache: cache.cache(),
            ttl: Duration::from_secs(cache.config().client_ttl_secs),
        }
    }

    pub async fn find_by_id(&self, id: &str) -> DatabaseResult<Option<ClientOrganization>> {
        match self.cache.get(id).await {
            Ok(Some(client)) => {
                debug!(client_org_id = id, "Client organization served from cache");
                return Ok(Some(client));
            }
            Ok(None) => {}
            Err(e) => warn!(client_org_id = id, "Client cache read failed: {}", e),
        }

        let client = self.inner.find_by_id(id).await?;
        if let Some(client) = &client {
            if let Err(e) = self.cache.set_with_ttl(id, client, Some(self.ttl)).await {
                warn!(client_org_id = id, "Client cache write failed: {}", e);
            }
        }
        Ok(client)
    }

    pub async fn list(&self, active_only: bool) -> DatabaseResult<Vec<ClientOrganization>> {
        self.inner.list(active_only).await
    }

    pub async fn create(&self, client: NewClientOrganization) -> DatabaseResult<ClientOrganization> {
        let id = client.id.clone();
        let created = self.inner.create(client).await?;
        self.invalidate(&id).await;
        Ok(created)
    }

    pub async fn update_markup_rate(
        &self,
        id: &str,
        markup_rate: &str,
    ) -> DatabaseResult<ClientOrganization> {
        let updated = self.inner.update_markup_rate(id, markup_rate).await?;
        self.invalidate(id).await;
        Ok(updated)
    }

    pub async fn set_monthly_limit(
        &self,
        id: &str,
        monthly_limit_nanos: Option<i64>,
    ) -> DatabaseResult<ClientOrganization> {
        let updated = self.inner.set_monthly_limit(id, monthly_limit_nanos).await?;
        self.invalidate(id).await;
        Ok(updated)
    }

    pub async fn deactivate(&self, id: &str) -> DatabaseResult<ClientOrganization> {
        let updated = self.inner.deactivate(id).await?;
        self.invalidate(id).await;
        Ok(updated)
    }

    async fn invalidate(&self, id: &str) {
        if let Err(e) = self.cache.delete(id).await {
            warn!(client_org_id = id, "Client cache invalidation failed: {}", e);
        }
    }
}
