//! Process-local registry backed by a concurrent map.
//!
//! Seeded from the `[registry]` section of the config file and re-seeded on
//! hot reload. Stands in for an external registry client.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{HealthStatus, RegistryError, RegistryResult, ServiceInstance, ServiceRegistry};

/// In-memory registry keyed by `service_id`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    instances: Arc<DashMap<String, ServiceInstance>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of instances.
    pub fn from_instances(instances: Vec<ServiceInstance>) -> RegistryResult<Self> {
        let registry = Self::new();
        for instance in instances {
            registry.register(instance)?;
        }
        Ok(registry)
    }

    /// Register (or re-register) an instance.
    ///
    /// Fails if the id is already taken by a different service.
    pub fn register(&self, instance: ServiceInstance) -> RegistryResult<()> {
        match self.instances.entry(instance.service_id.clone()) {
            Entry::Occupied(mut existing) => {
                if !existing.get().service_name.eq_ignore_ascii_case(&instance.service_name) {
                    return Err(RegistryError::DuplicateServiceId {
                        service_id: instance.service_id,
                        existing_service: existing.get().service_name.clone(),
                    });
                }
                existing.insert(instance);
            }
            Entry::Vacant(slot) => {
                tracing::debug!(
                    service = %instance.service_name,
                    instance = %instance.service_id,
                    "Instance registered"
                );
                slot.insert(instance);
            }
        }
        Ok(())
    }

    /// Remove an instance. Returns true if it was present.
    pub fn deregister(&self, service_id: &str) -> bool {
        self.instances.remove(service_id).is_some()
    }

    /// Replace the whole instance set.
    ///
    /// Instances that survive the swap keep the health status learned by probing.
    pub fn replace_all(&self, instances: Vec<ServiceInstance>) -> RegistryResult<()> {
        let mut incoming: HashMap<String, ServiceInstance> = HashMap::with_capacity(instances.len());
        for mut instance in instances {
            if let Some(dup) = incoming.get(&instance.service_id) {
                return Err(RegistryError::DuplicateServiceId {
                    service_id: instance.service_id,
                    existing_service: dup.service_name.clone(),
                });
            }
            if let Some(current) = self.instances.get(&instance.service_id) {
                instance.status = current.status;
                instance.last_health_check = current.last_health_check;
            }
            incoming.insert(instance.service_id.clone(), instance);
        }

        self.instances.retain(|id, _| incoming.contains_key(id));
        for (id, instance) in incoming {
            self.instances.insert(id, instance);
        }

        tracing::info!(instances = self.instances.len(), "Registry contents replaced");
        Ok(())
    }

    /// Current copy of one instance.
    pub fn get(&self, service_id: &str) -> Option<ServiceInstance> {
        self.instances.get(service_id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[async_trait]
impl ServiceRegistry for InMemoryRegistry {
    async fn get_service_instances(&self, service_name: &str) -> RegistryResult<Vec<ServiceInstance>> {
        let mut found: Vec<ServiceInstance> = self
            .instances
            .iter()
            .filter(|r| r.value().service_name.eq_ignore_ascii_case(service_name))
            .map(|r| r.value().clone())
            .collect();
        // DashMap iteration order is arbitrary; keep selection indices stable.
        found.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        Ok(found)
    }

    /// One name per service. Spellings differing only in case are one service,
    /// listed under the lexically smallest spelling.
    async fn get_all_services(&self) -> RegistryResult<Vec<String>> {
        let mut names: BTreeMap<String, String> = BTreeMap::new();
        for r in self.instances.iter() {
            let name = &r.value().service_name;
            names
                .entry(name.to_ascii_lowercase())
                .and_modify(|kept| {
                    if name.as_str() < kept.as_str() {
                        kept.clone_from(name);
                    }
                })
                .or_insert_with(|| name.clone());
        }
        Ok(names.into_values().collect())
    }

    async fn update_health_status(&self, service_id: &str, status: HealthStatus) -> RegistryResult<bool> {
        match self.instances.get_mut(service_id) {
            Some(mut instance) => {
                instance.status = status;
                instance.last_health_check = SystemTime::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_list() {
        let registry = InMemoryRegistry::new();
        registry.register(ServiceInstance::new("orders", "o2", "10.0.0.2", 80)).unwrap();
        registry.register(ServiceInstance::new("orders", "o1", "10.0.0.1", 80)).unwrap();
        registry.register(ServiceInstance::new("billing", "b1", "10.0.0.3", 80)).unwrap();

        let services = registry.get_all_services().await.unwrap();
        assert_eq!(services, vec!["billing".to_string(), "orders".to_string()]);

        let orders = registry.get_service_instances("orders").await.unwrap();
        let ids: Vec<_> = orders.iter().map(|i| i.service_id.as_str()).collect();
        assert_eq!(ids, vec!["o1", "o2"]);
    }

    #[tokio::test]
    async fn test_service_names_listed_once_regardless_of_case() {
        let registry = InMemoryRegistry::new();
        registry.register(ServiceInstance::new("orders", "o1", "10.0.0.1", 80)).unwrap();
        registry.register(ServiceInstance::new("Orders", "o2", "10.0.0.2", 80)).unwrap();
        registry.register(ServiceInstance::new("billing", "b1", "10.0.0.3", 80)).unwrap();

        let services = registry.get_all_services().await.unwrap();
        assert_eq!(services, vec!["billing".to_string(), "Orders".to_string()]);

        let orders = registry.get_service_instances(&services[1]).await.unwrap();
        assert_eq!(orders.len(), 2);
    }

    #[test]
    fn test_duplicate_id_across_services_rejected() {
        let registry = InMemoryRegistry::new();
        registry.register(ServiceInstance::new("orders", "x1", "10.0.0.1", 80)).unwrap();
        let err = registry
            .register(ServiceInstance::new("billing", "x1", "10.0.0.2", 80))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateServiceId { .. }));
    }

    #[tokio::test]
    async fn test_update_health_status() {
        let registry = InMemoryRegistry::new();
        registry.register(ServiceInstance::new("orders", "o1", "10.0.0.1", 80)).unwrap();

        assert!(registry.update_health_status("o1", HealthStatus::Healthy).await.unwrap());
        assert!(!registry.update_health_status("missing", HealthStatus::Healthy).await.unwrap());
        assert_eq!(registry.get("o1").unwrap().status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_replace_all_keeps_known_status() {
        let registry = InMemoryRegistry::new();
        registry.register(ServiceInstance::new("orders", "o1", "10.0.0.1", 80)).unwrap();
        registry.register(ServiceInstance::new("orders", "o2", "10.0.0.2", 80)).unwrap();
        registry.update_health_status("o1", HealthStatus::Healthy).await.unwrap();

        registry
            .replace_all(vec![
                ServiceInstance::new("orders", "o1", "10.0.0.9", 80),
                ServiceInstance::new("orders", "o3", "10.0.0.3", 80),
            ])
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.get("o2").is_none());
        let o1 = registry.get("o1").unwrap();
        assert_eq!(o1.address, "10.0.0.9");
        assert_eq!(o1.status, HealthStatus::Healthy);
    }
}
