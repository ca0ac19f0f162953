//! Engine registry: discovery, listing, and status refresh.

use sonde_protocol::{Engine, EngineStatus, ScanError};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::builtin::SignatureEngine;
use crate::subprocess::SubprocessEngine;
use crate::transport::EngineTransport;

/// Static configuration for one engine, supplied at construction.
/// No process-wide registry state: each orchestrator owns its own.
#[derive(Debug, Clone)]
pub enum EngineDefinition {
    /// The built-in in-process signature engine.
    Signature,
    /// An external program speaking the JSON report contract.
    Subprocess {
        name: String,
        version: String,
        cost: f32,
        command: PathBuf,
        args: Vec<String>,
    },
}

impl EngineDefinition {
    /// Default engine set: just the built-in signature engine.
    pub fn defaults() -> Vec<EngineDefinition> {
        vec![EngineDefinition::Signature]
    }
}

/// The set of known engines and their live status.
///
/// The registry exclusively owns engine status; everyone else sees
/// immutable `Engine` snapshots ordered by name.
pub struct EngineRegistry {
    transports: BTreeMap<String, Arc<dyn EngineTransport>>,
    status: RwLock<BTreeMap<String, EngineStatus>>,
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("transports", &self.transports.keys().collect::<Vec<_>>())
            .field("status", &self.status)
            .finish()
    }
}

impl EngineRegistry {
    /// Discover engines from static definitions, probing each one.
    pub async fn discover(definitions: Vec<EngineDefinition>) -> Result<Self, ScanError> {
        let mut transports: Vec<Arc<dyn EngineTransport>> = Vec::with_capacity(definitions.len());
        for def in definitions {
            match def {
                EngineDefinition::Signature => transports.push(Arc::new(SignatureEngine::new())),
                EngineDefinition::Subprocess {
                    name,
                    version,
                    cost,
                    command,
                    args,
                } => transports.push(Arc::new(SubprocessEngine::new(
                    name, version, cost, command, args,
                ))),
            }
        }
        Self::with_transports(transports).await
    }

    /// Build a registry from already-constructed transports and probe them.
    pub async fn with_transports(
        transports: Vec<Arc<dyn EngineTransport>>,
    ) -> Result<Self, ScanError> {
        let mut by_name = BTreeMap::new();
        for transport in transports {
            let name = transport.name().to_string();
            if by_name.insert(name.clone(), transport).is_some() {
                return Err(ScanError::EngineRegistryUnavailable(format!(
                    "duplicate engine definition '{}'",
                    name
                )));
            }
        }

        let registry = Self {
            transports: by_name,
            status: RwLock::new(BTreeMap::new()),
        };
        registry.refresh().await?;
        info!(
            "engine registry ready: {} engines, {} available",
            registry.transports.len(),
            registry.available_names().len()
        );
        Ok(registry)
    }

    /// Re-probe every engine and update status.
    ///
    /// A single failing probe degrades that engine to unavailable; every
    /// probe failing means the discovery mechanism itself cannot run, which
    /// callers must see distinctly from "zero engines configured".
    pub async fn refresh(&self) -> Result<(), ScanError> {
        let mut fresh = BTreeMap::new();
        let mut probe_errors = Vec::new();

        for (name, transport) in &self.transports {
            match transport.probe().await {
                Ok(status) => {
                    fresh.insert(name.clone(), status);
                }
                Err(e) => {
                    warn!("probe failed for engine '{}': {}", name, e);
                    probe_errors.push(format!("{}: {}", name, e));
                    fresh.insert(name.clone(), EngineStatus::Unavailable);
                }
            }
        }

        *self.status_write() = fresh;

        if !self.transports.is_empty() && probe_errors.len() == self.transports.len() {
            return Err(ScanError::EngineRegistryUnavailable(
                probe_errors.join("; "),
            ));
        }
        Ok(())
    }

    /// All registered engines with their current status, ordered by name.
    pub fn list(&self) -> Vec<Engine> {
        let status = self.status_read();
        self.transports
            .iter()
            .map(|(name, transport)| Engine {
                name: name.clone(),
                version: transport.version().to_string(),
                status: status.get(name).copied().unwrap_or_default(),
                cost: transport.cost(),
            })
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn EngineTransport>> {
        self.transports.get(name).cloned()
    }

    pub fn is_available(&self, name: &str) -> bool {
        matches!(
            self.status_read().get(name),
            Some(EngineStatus::Available) | Some(EngineStatus::Degraded)
        )
    }

    /// Names of engines currently usable, in lexicographic order.
    pub fn available_names(&self) -> Vec<String> {
        let status = self.status_read();
        self.transports
            .keys()
            .filter(|name| {
                matches!(
                    status.get(*name),
                    Some(EngineStatus::Available) | Some(EngineStatus::Degraded)
                )
            })
            .cloned()
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transports.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }

    fn status_read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, EngineStatus>> {
        self.status.read().unwrap_or_else(|e| e.into_inner())
    }

    fn status_write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, EngineStatus>> {
        self.status.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sonde_protocol::EngineReport;

    struct BrokenProbe;

    #[async_trait]
    impl EngineTransport for BrokenProbe {
        fn name(&self) -> &str {
            "broken"
        }
        fn version(&self) -> &str {
            "0"
        }
        fn cost(&self) -> f32 {
            1.0
        }
        async fn probe(&self) -> Result<EngineStatus, ScanError> {
            Err(ScanError::EngineRegistryUnavailable(
                "probe machinery missing".into(),
            ))
        }
        async fn detect(&self, _payload: &[u8]) -> Result<EngineReport, ScanError> {
            unreachable!("never invoked in these tests")
        }
    }

    #[tokio::test]
    async fn test_discover_defaults() {
        let registry = EngineRegistry::discover(EngineDefinition::defaults())
            .await
            .unwrap();
        let engines = registry.list();
        assert_eq!(engines.len(), 1);
        assert_eq!(engines[0].name, "signature");
        assert_eq!(engines[0].status, EngineStatus::Available);
        assert!(registry.is_available("signature"));
    }

    #[tokio::test]
    async fn test_zero_engines_configured_is_not_an_error() {
        let registry = EngineRegistry::discover(vec![]).await.unwrap();
        assert!(registry.is_empty());
        assert!(registry.list().is_empty());
    }

    #[tokio::test]
    async fn test_all_probes_failing_is_registry_unavailable() {
        let err = EngineRegistry::with_transports(vec![Arc::new(BrokenProbe)])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "engine_registry_unavailable");
    }

    #[tokio::test]
    async fn test_one_broken_probe_among_healthy_engines_degrades_only_it() {
        let registry = EngineRegistry::with_transports(vec![
            Arc::new(SignatureEngine::new()),
            Arc::new(BrokenProbe),
        ])
        .await
        .unwrap();
        assert!(registry.is_available("signature"));
        assert!(!registry.is_available("broken"));
        assert_eq!(registry.available_names(), vec!["signature".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_definition_rejected() {
        let err = EngineRegistry::with_transports(vec![
            Arc::new(SignatureEngine::new()),
            Arc::new(SignatureEngine::new()),
        ])
        .await
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_name() {
        let registry = EngineRegistry::discover(vec![
            EngineDefinition::Subprocess {
                name: "zeta".into(),
                version: "1".into(),
                cost: 1.0,
                command: "definitely-not-a-real-binary-sonde".into(),
                args: vec![],
            },
            EngineDefinition::Signature,
        ])
        .await
        .unwrap();
        let names: Vec<String> = registry.list().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["signature".to_string(), "zeta".to_string()]);
        // Missing binary is a clean "unavailable", not a registry error.
        assert!(!registry.is_available("zeta"));
    }
}
