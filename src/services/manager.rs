use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::services::{Service, ServiceResult, run_service};

/// Manages multiple services and their lifecycle
pub struct ServiceManager {
    registered_services: HashMap<String, Box<dyn Service>>,
    running_services: HashMap<String, JoinHandle<ServiceResult>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            registered_services: HashMap::new(),
            running_services: HashMap::new(),
            shutdown_tx,
        }
    }

    /// Register a service to be managed (not yet spawned)
    pub fn register_service(&mut self, name: &str, service: Box<dyn Service>) {
        self.registered_services.insert(name.to_string(), service);
    }

    /// Spawn all registered services
    pub fn spawn_all(&mut self) {
        let service_count = self.registered_services.len();
        let service_names: Vec<_> = self.registered_services.keys().cloned().collect();

        for (name, service) in self.registered_services.drain() {
            let shutdown_rx = self.shutdown_tx.subscribe();
            let handle = tokio::spawn(run_service(service, shutdown_rx));
            self.running_services.insert(name, handle);
        }

        info!(
            service_count,
            services = ?service_names,
            "spawned {} services",
            service_count
        );
    }

    /// Run all services until one completes or fails.
    /// Returns the first service that completes and its result.
    pub async fn run(&mut self) -> (String, ServiceResult) {
        if self.running_services.is_empty() {
            return (
                "none".to_string(),
                ServiceResult::Error(anyhow::anyhow!("No services to run")),
            );
        }

        loop {
            let completed: Option<String> = self
                .running_services
                .iter()
                .find(|(_, handle)| handle.is_finished())
                .map(|(name, _)| name.clone());

            if let Some(name) = completed {
                let handle = self.running_services.remove(&name).unwrap();
                return match handle.await {
                    Ok(result) => (name, result),
                    Err(e) => {
                        error!(service = %name, "service task panicked: {e}");
                        (name, ServiceResult::Error(anyhow::anyhow!("Task panic: {e}")))
                    }
                };
            }

            // Small delay to prevent busy-waiting
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Shutdown all services gracefully with a timeout.
    ///
    /// Returns the elapsed duration on success, or the names of services
    /// that did not complete within the timeout.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<Duration, Vec<String>> {
        let service_count = self.running_services.len();
        let service_names: Vec<_> = self.running_services.keys().cloned().collect();

        info!(
            service_count,
            services = ?service_names,
            timeout = format!("{:.2?}", timeout),
            "shutting down {} services",
            service_count
        );

        let _ = self.shutdown_tx.send(());

        let start_time = std::time::Instant::now();
        let mut pending_services = Vec::new();

        for (name, handle) in self.running_services.drain() {
            let remaining = timeout.saturating_sub(start_time.elapsed());
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    error!(service = %name, "service task panicked during shutdown: {e}");
                }
                Err(_) => {
                    pending_services.push(name);
                }
            }
        }

        if pending_services.is_empty() {
            Ok(start_time.elapsed())
        } else {
            Err(pending_services)
        }
    }
}
