//! Backend Selector - availability probing, priority and demotion
//!
//! Backends are kept in a fixed priority list. Each one is probed at most
//! once per process (lazily, on first need) and can be demoted after an
//! availability failure; demotion lasts for the rest of the process.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::config::{BackendKind, SandboxConfig};
use crate::error::{Error, Result};
use crate::sandbox::executor::SandboxBackend;
use crate::sandbox::{ContainerBackend, DirectBackend, NamespaceBackend};

/// Snapshot of one backend's standing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendDescriptor {
    pub name: String,
    pub kind: BackendKind,
    /// Position in the priority list, 0 is preferred
    pub rank: usize,
    pub available: bool,
    pub demoted: bool,
    /// Probe failure reason, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

struct BackendSlot {
    backend: Arc<dyn SandboxBackend>,
    probe: OnceCell<std::result::Result<(), String>>,
    demoted: AtomicBool,
}

impl BackendSlot {
    async fn probe_result(&self) -> &std::result::Result<(), String> {
        self.probe
            .get_or_init(|| async {
                match self.backend.probe().await {
                    Ok(()) => {
                        info!(backend = self.backend.name(), "Backend available");
                        Ok(())
                    }
                    Err(e) => {
                        info!(backend = self.backend.name(), "Backend unavailable: {}", e);
                        Err(e.to_string())
                    }
                }
            })
            .await
    }

    fn is_demoted(&self) -> bool {
        self.demoted.load(Ordering::Acquire)
    }

    async fn usable(&self) -> bool {
        !self.is_demoted() && self.probe_result().await.is_ok()
    }
}

/// Ordered set of backends with cached availability
pub struct BackendSelector {
    slots: Vec<BackendSlot>,
}

impl BackendSelector {
    /// Build a selector over `backends`, highest priority first
    pub fn new(backends: Vec<Arc<dyn SandboxBackend>>) -> Self {
        let slots = backends
            .into_iter()
            .map(|backend| BackendSlot {
                backend,
                probe: OnceCell::new(),
                demoted: AtomicBool::new(false),
            })
            .collect();
        BackendSelector { slots }
    }

    /// Instantiate the configured backends in priority order.
    ///
    /// Duplicates are dropped. The direct backend is included only when
    /// `allow_direct_fallback` is set, and then always last.
    pub fn from_config(config: &SandboxConfig) -> Self {
        let mut order: Vec<BackendKind> = Vec::new();
        for kind in &config.preferred_backend_order {
            if *kind != BackendKind::Direct && !order.contains(kind) {
                order.push(*kind);
            }
        }
        if config.allow_direct_fallback {
            order.push(BackendKind::Direct);
        }

        let backends = order
            .into_iter()
            .map(|kind| -> Arc<dyn SandboxBackend> {
                match kind {
                    BackendKind::Namespace => Arc::new(NamespaceBackend::new(config)),
                    BackendKind::Container => Arc::new(ContainerBackend::new(config)),
                    BackendKind::Direct => Arc::new(DirectBackend::new(config)),
                }
            })
            .collect();
        Self::new(backends)
    }

    /// Usable backends, highest priority first
    pub async fn available_backends(&self) -> Vec<Arc<dyn SandboxBackend>> {
        let mut available = Vec::new();
        for slot in &self.slots {
            if slot.usable().await {
                available.push(slot.backend.clone());
            }
        }
        available
    }

    /// The highest-priority usable backend
    pub async fn select(&self) -> Result<Arc<dyn SandboxBackend>> {
        for slot in &self.slots {
            if slot.usable().await {
                return Ok(slot.backend.clone());
            }
        }
        Err(Error::NoBackendAvailable)
    }

    /// Stop using `kind` for the rest of the process
    pub fn demote(&self, kind: BackendKind) {
        for slot in self.slots.iter().filter(|s| s.backend.kind() == kind) {
            if !slot.demoted.swap(true, Ordering::AcqRel) {
                warn!(backend = slot.backend.name(), "Demoting backend after availability failure");
            }
        }
    }

    /// Describe every configured backend, probing any not yet probed
    pub async fn describe(&self) -> Vec<BackendDescriptor> {
        let mut descriptors = Vec::with_capacity(self.slots.len());
        for (rank, slot) in self.slots.iter().enumerate() {
            let probe = slot.probe_result().await;
            descriptors.push(BackendDescriptor {
                name: slot.backend.name().to_string(),
                kind: slot.backend.kind(),
                rank,
                available: probe.is_ok(),
                demoted: slot.is_demoted(),
                detail: probe.as_ref().err().cloned(),
            });
        }
        descriptors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::testing::FakeBackend;

    #[tokio::test]
    async fn test_select_skips_unavailable() {
        let broken = Arc::new(FakeBackend::unavailable(BackendKind::Namespace));
        let working = Arc::new(FakeBackend::new(BackendKind::Container));
        let selector = BackendSelector::new(vec![broken.clone(), working.clone()]);

        let selected = selector.select().await.unwrap();
        assert_eq!(selected.kind(), BackendKind::Container);

        let available = selector.available_backends().await;
        assert_eq!(available.len(), 1);
    }

    #[tokio::test]
    async fn test_probe_runs_once() {
        let fake = Arc::new(FakeBackend::new(BackendKind::Namespace));
        let selector = BackendSelector::new(vec![fake.clone()]);

        for _ in 0..3 {
            selector.select().await.unwrap();
        }
        selector.describe().await;
        assert_eq!(fake.probe_count(), 1);
    }

    #[tokio::test]
    async fn test_demotion_is_sticky() {
        let first = Arc::new(FakeBackend::new(BackendKind::Namespace));
        let second = Arc::new(FakeBackend::new(BackendKind::Container));
        let selector = BackendSelector::new(vec![first, second]);

        selector.demote(BackendKind::Namespace);
        assert_eq!(selector.select().await.unwrap().kind(), BackendKind::Container);
        assert_eq!(selector.select().await.unwrap().kind(), BackendKind::Container);

        selector.demote(BackendKind::Container);
        assert!(matches!(selector.select().await, Err(Error::NoBackendAvailable)));

        let described = selector.describe().await;
        assert!(described.iter().all(|d| d.demoted && d.available));
        assert_eq!(described[1].rank, 1);
    }

    #[tokio::test]
    async fn test_describe_reports_probe_failure() {
        let selector = BackendSelector::new(vec![Arc::new(FakeBackend::unavailable(
            BackendKind::Namespace,
        ))]);
        let described = selector.describe().await;
        assert!(!described[0].available);
        assert!(described[0].detail.as_deref().unwrap().contains("fake"));
    }

    #[test]
    fn test_from_config_direct_only_when_allowed() {
        let mut config = SandboxConfig::default();
        config.preferred_backend_order = vec![
            BackendKind::Direct,
            BackendKind::Container,
            BackendKind::Container,
        ];
        let kinds = |s: &BackendSelector| -> Vec<BackendKind> {
            s.slots.iter().map(|slot| slot.backend.kind()).collect()
        };

        let selector = BackendSelector::from_config(&config);
        assert_eq!(kinds(&selector), vec![BackendKind::Container]);

        config.allow_direct_fallback = true;
        let selector = BackendSelector::from_config(&config);
        assert_eq!(
            kinds(&selector),
            vec![BackendKind::Container, BackendKind::Direct]
        );
    }
}
