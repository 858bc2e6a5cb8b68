use crate::providers::PlatformAdapter;
use crate::types::PlatformInfo;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

/// One registered platform and the adapter serving it
#[derive(Clone)]
pub struct PlatformRegistration {
    pub info: PlatformInfo,
    pub adapter: Arc<dyn PlatformAdapter>,
}

impl std::fmt::Debug for PlatformRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformRegistration")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Platforms by name, in registration order.
///
/// The first registration of a name wins; registering it again is a logged
/// no-op, so a plugin reloading does not replace a live adapter.
#[derive(Default)]
pub struct PlatformRegistry {
    platforms: RwLock<Vec<PlatformRegistration>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the platform was added
    pub fn register_platform(&self, info: PlatformInfo, adapter: Arc<dyn PlatformAdapter>) -> bool {
        let mut platforms = self.platforms.write().unwrap_or_else(PoisonError::into_inner);
        if platforms.iter().any(|p| p.info.name == info.name) {
            warn!("Platform already registered: {}", info.name);
            return false;
        }
        info!("Registered platform: {}", info.name);
        platforms.push(PlatformRegistration { info, adapter });
        true
    }

    /// Returns whether a platform was removed
    pub fn unregister_platform(&self, name: &str) -> bool {
        let mut platforms = self.platforms.write().unwrap_or_else(PoisonError::into_inner);
        let before = platforms.len();
        platforms.retain(|p| p.info.name != name);
        let removed = platforms.len() != before;
        if removed {
            info!("Unregistered platform: {}", name);
        }
        removed
    }

    pub fn get_platform(&self, name: &str) -> Option<PlatformRegistration> {
        let found = self
            .platforms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.info.name == name)
            .cloned();
        if found.is_none() {
            warn!("Platform not found: {}", name);
        }
        found
    }

    pub fn get_all_platforms(&self) -> Vec<PlatformRegistration> {
        self.platforms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
