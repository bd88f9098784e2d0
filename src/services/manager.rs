//! Services manager for long-running background services.
//!
//! Services register with the manager and are started and stopped together.
//! Start order respects [dependencies](Service::dependencies): a service is
//! only started after everything it depends on. Shutdown runs in reverse.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Health status of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Result of a service health check.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ServiceHealth {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// A service that can be started, stopped and health-checked by the manager.
///
/// Log lifecycle events with [tracing] and include the service name so logs
/// are filterable, e.g. `info!(service = %self.name(), "Started")`.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Unique name for logging and lookup.
    fn name(&self) -> &str;

    /// Names of services that must be started before this one.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Start background tasks. Calling it on a running service is a no-op.
    async fn start(&self) -> Result<()>;

    /// Stop background tasks and wait for them to finish. Idempotent.
    async fn stop(&self) -> Result<()>;

    async fn health(&self) -> Result<ServiceHealth> {
        Ok(ServiceHealth::healthy())
    }
}

/// Builder for [ServicesManager].
///
/// ```ignore
/// let services = ServicesManager::builder()
///     .add_service(scanner.clone())
///     .start()
///     .await?;
/// ```
#[derive(Default)]
pub struct ServicesManagerBuilder {
    services: Vec<Arc<dyn Service>>,
}

impl ServicesManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_service(mut self, service: Arc<dyn Service>) -> Self {
        self.services.push(service);
        self
    }

    /// Build the manager and register all services. Does not start them.
    pub async fn build(self) -> Arc<ServicesManager> {
        let manager = Arc::new(ServicesManager::new());
        for service in self.services {
            manager.register(service).await;
        }
        manager
    }

    /// Build the manager and start every service in dependency order.
    pub async fn start(self) -> Result<Arc<ServicesManager>> {
        let manager = self.build().await;
        manager.start_all().await?;
        Ok(manager)
    }
}

/// Registry and lifecycle controller for services.
#[derive(Default)]
pub struct ServicesManager {
    services: RwLock<HashMap<String, Arc<dyn Service>>>,
    started: RwLock<HashSet<String>>,
}

impl ServicesManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> ServicesManagerBuilder {
        ServicesManagerBuilder::new()
    }

    /// Topological start order. Errors on unknown dependencies or cycles.
    async fn start_order(&self) -> Result<Vec<String>> {
        let guard = self.services.read().await;
        let mut deps: HashMap<String, Vec<String>> = HashMap::new();
        for (name, svc) in guard.iter() {
            let d = svc.dependencies();
            if let Some(missing) = d.iter().find(|dep| !guard.contains_key(*dep)) {
                anyhow::bail!(
                    "Service {} depends on {} which is not registered",
                    name,
                    missing
                );
            }
            deps.insert(name.clone(), d);
        }
        drop(guard);

        // Kahn's algorithm; dependencies come first.
        let mut in_degree: HashMap<&str, usize> =
            deps.iter().map(|(n, d)| (n.as_str(), d.len())).collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for (name, d) in &deps {
            for dep in d {
                dependents.entry(dep.as_str()).or_default().push(name.as_str());
            }
        }
        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        ready.sort_unstable();

        let mut order = Vec::with_capacity(deps.len());
        while let Some(n) = ready.pop() {
            order.push(n.to_string());
            for s in dependents.get(n).into_iter().flatten() {
                if let Some(deg) = in_degree.get_mut(s) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push(*s);
                    }
                }
            }
        }
        if order.len() != deps.len() {
            anyhow::bail!("Service dependency cycle detected");
        }
        Ok(order)
    }

    /// Register a service without starting it. A service with the same name
    /// is replaced (the previous instance is not stopped).
    pub async fn register(&self, service: Arc<dyn Service>) {
        let name = service.name().to_string();
        let mut guard = self.services.write().await;
        if guard.insert(name.clone(), service).is_some() {
            warn!(service = %name, "Service '{}' reregistered, overwriting previous", name);
        } else {
            info!(service = %name, "Service '{}' registered", name);
        }
    }

    /// Start all registered services in dependency order.
    pub async fn start_all(&self) -> Result<()> {
        for name in self.start_order().await? {
            let Some(svc) = self.get(&name).await else {
                continue;
            };
            if let Err(e) = svc.start().await {
                warn!(service = %name, error = %e, "Service '{}' start failed", name);
                return Err(e).context(format!("failed to start service {}", name));
            }
            self.started.write().await.insert(name.clone());
            info!(service = %name, "Service '{}' started", name);
        }
        Ok(())
    }

    /// Stop all registered services in reverse dependency order. Failures are
    /// logged and do not stop the remaining services from shutting down.
    pub async fn stop_all(&self) -> Result<()> {
        for name in self.start_order().await?.into_iter().rev() {
            let Some(svc) = self.get(&name).await else {
                continue;
            };
            match svc.stop().await {
                Ok(()) => info!(service = %name, "Service '{}' stopped", name),
                Err(e) => warn!(service = %name, error = %e, "Service '{}' stop failed", name),
            }
            self.started.write().await.remove(&name);
        }
        Ok(())
    }

    /// Health of every registered service. A failing check is reported as
    /// [Unhealthy](HealthStatus::Unhealthy) with the error message.
    pub async fn health_all(&self) -> HashMap<String, ServiceHealth> {
        let services: Vec<(String, Arc<dyn Service>)> = self
            .services
            .read()
            .await
            .iter()
            .map(|(n, s)| (n.clone(), s.clone()))
            .collect();
        let mut out = HashMap::new();
        for (name, svc) in services {
            let health = match svc.health().await {
                Ok(h) => h,
                Err(e) => ServiceHealth::unhealthy(e.to_string()),
            };
            out.insert(name, health);
        }
        out
    }

    pub async fn is_started(&self, name: &str) -> bool {
        self.started.read().await.contains(name)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.read().await.get(name).cloned()
    }
}
