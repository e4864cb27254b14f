//! Registry wrapper whose calls can be switched to fail.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{HealthStatus, InMemoryRegistry, RegistryError, RegistryResult, ServiceInstance, ServiceRegistry};

pub(crate) struct FailingRegistry {
    inner: InMemoryRegistry,
    fail_listing: AtomicBool,
    fail_lookups: Mutex<HashSet<String>>,
}

impl FailingRegistry {
    pub(crate) fn new(inner: InMemoryRegistry) -> Self {
        Self {
            inner,
            fail_listing: AtomicBool::new(false),
            fail_lookups: Mutex::new(HashSet::new()),
        }
    }

    /// Make `get_all_services` fail.
    pub(crate) fn fail_listing(&self) {
        self.fail_listing.store(true, Ordering::SeqCst);
    }

    /// Make `get_service_instances(service)` fail.
    pub(crate) fn fail_lookup(&self, service: &str) {
        self.fail_lookups.lock().unwrap().insert(service.to_ascii_lowercase());
    }

    pub(crate) fn heal(&self) {
        self.fail_listing.store(false, Ordering::SeqCst);
        self.fail_lookups.lock().unwrap().clear();
    }
}

#[async_trait]
impl ServiceRegistry for FailingRegistry {
    async fn get_service_instances(&self, service_name: &str) -> RegistryResult<Vec<ServiceInstance>> {
        if self
            .fail_lookups
            .lock()
            .unwrap()
            .contains(&service_name.to_ascii_lowercase())
        {
            return Err(RegistryError::Unavailable(format!("lookup of '{}' refused", service_name)));
        }
        self.inner.get_service_instances(service_name).await
    }

    async fn get_all_services(&self) -> RegistryResult<Vec<String>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable("service listing refused".to_string()));
        }
        self.inner.get_all_services().await
    }

    async fn update_health_status(&self, service_id: &str, status: HealthStatus) -> RegistryResult<bool> {
        self.inner.update_health_status(service_id, status).await
    }
}
