//! Plugin lifecycle
//!
//! Plugins contribute platforms (and could contribute anything else that
//! hooks into [`PluginContext`]). The host decides which plugins are enabled,
//! runs their hooks in the fixed order `on_install`, `on_register`,
//! `on_load`, and calls `on_unload` at teardown.

use crate::factory::{create_adapter, ChatServices, PlatformKind};
use crate::registry::PlatformRegistry;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

fn default_entry() -> String {
    "index.js".to_string()
}

/// Contents of a plugin's `plugin.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginManifest {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_entry")]
    pub entry: String,
    /// Never enabled
    #[serde(default)]
    pub disabled: bool,
    /// Never disabled
    #[serde(default)]
    pub required: bool,
}

impl PluginManifest {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            entry: default_entry(),
            disabled: false,
            required: false,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(json).context("Invalid plugin manifest")?;
        if manifest.uuid.trim().is_empty() {
            anyhow::bail!("Plugin manifest has an empty uuid");
        }
        Ok(manifest)
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.uuid
        } else {
            &self.name
        }
    }
}

/// What a plugin's hooks get to work with
#[derive(Clone)]
pub struct PluginContext {
    pub manifest: PluginManifest,
    pub platforms: Arc<PlatformRegistry>,
    pub services: ChatServices,
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn manifest(&self) -> &PluginManifest;

    async fn on_install(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    async fn on_register(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    async fn on_load(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    async fn on_unload(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }
}

struct LoadedPlugin {
    plugin: Arc<dyn Plugin>,
    ctx: PluginContext,
}

/// Tracks available plugins, the enabled selection and loaded instances
pub struct PluginHost {
    platforms: Arc<PlatformRegistry>,
    services: ChatServices,
    available: Vec<Arc<dyn Plugin>>,
    /// Enabled uuids. `None` until the first resolution.
    selection: Option<Vec<String>>,
    loaded: Vec<LoadedPlugin>,
}

impl PluginHost {
    pub fn new(platforms: Arc<PlatformRegistry>, services: ChatServices) -> Self {
        Self {
            platforms,
            services,
            available: Vec::new(),
            selection: None,
            loaded: Vec::new(),
        }
    }

    /// Start from a previously stored selection
    pub fn with_selection(mut self, selection: Option<Vec<String>>) -> Self {
        self.selection = selection;
        self
    }

    pub fn add(&mut self, plugin: Arc<dyn Plugin>) {
        self.available.push(plugin);
    }

    pub fn platforms(&self) -> &Arc<PlatformRegistry> {
        &self.platforms
    }

    /// Current selection, for persisting
    pub fn selection(&self) -> Option<&[String]> {
        self.selection.as_deref()
    }

    fn find(&self, uuid: &str) -> Option<&Arc<dyn Plugin>> {
        self.available.iter().find(|p| p.manifest().uuid == uuid)
    }

    /// Plugins to load. Without a stored selection every plugin not marked
    /// disabled is enabled, and that choice becomes the selection.
    pub fn enabled(&mut self) -> Vec<Arc<dyn Plugin>> {
        let candidates: Vec<Arc<dyn Plugin>> = self
            .available
            .iter()
            .filter(|p| !p.manifest().disabled)
            .cloned()
            .collect();

        let selection = self.selection.get_or_insert_with(|| {
            candidates
                .iter()
                .map(|p| p.manifest().uuid.clone())
                .collect()
        });

        candidates
            .into_iter()
            .filter(|p| selection.contains(&p.manifest().uuid))
            .collect()
    }

    /// Returns whether the selection changed
    pub fn set_enabled(&mut self, uuid: &str, enabled: bool) -> bool {
        if let Some(plugin) = self.find(uuid) {
            let manifest = plugin.manifest();
            if enabled && manifest.disabled {
                warn!("Refusing to enable disabled plugin: {}", manifest.display_name());
                return false;
            }
            if !enabled && manifest.required {
                warn!("Refusing to disable required plugin: {}", manifest.display_name());
                return false;
            }
        }

        let selection = self.selection.get_or_insert_with(Vec::new);
        let present = selection.iter().any(|u| u == uuid);
        match (enabled, present) {
            (true, false) => selection.push(uuid.to_string()),
            (false, true) => selection.retain(|u| u != uuid),
            _ => return false,
        }
        true
    }

    /// Unloads everything, then loads every enabled plugin. A plugin whose
    /// hook fails is skipped. Returns how many plugins loaded.
    pub async fn load_all(&mut self) -> usize {
        self.unload_all().await;

        for plugin in self.enabled() {
            let manifest = plugin.manifest().clone();
            if let Err(e) = self.load_plugin(plugin).await {
                warn!("Failed to load plugin {}: {:#}", manifest.display_name(), e);
            }
        }

        info!("{} plugin(s) loaded", self.loaded.len());
        self.loaded.len()
    }

    /// Loads one enabled plugin that is not loaded yet
    pub async fn load(&mut self, uuid: &str) -> Result<()> {
        if self.is_loaded(uuid) {
            anyhow::bail!("Plugin already loaded: {uuid}");
        }
        let plugin = self
            .enabled()
            .into_iter()
            .find(|p| p.manifest().uuid == uuid)
            .ok_or_else(|| anyhow::anyhow!("Plugin not enabled: {uuid}"))?;

        self.load_plugin(plugin).await
    }

    async fn load_plugin(&mut self, plugin: Arc<dyn Plugin>) -> Result<()> {
        let manifest = plugin.manifest().clone();
        let name = manifest.display_name().to_string();
        let ctx = PluginContext {
            manifest,
            platforms: self.platforms.clone(),
            services: self.services.clone(),
        };

        plugin
            .on_install(&ctx)
            .await
            .with_context(|| format!("on_install of {name}"))?;
        debug!("Plugin installed: {}", name);
        plugin
            .on_register(&ctx)
            .await
            .with_context(|| format!("on_register of {name}"))?;
        debug!("Plugin registered: {}", name);
        plugin
            .on_load(&ctx)
            .await
            .with_context(|| format!("on_load of {name}"))?;
        info!("Plugin loaded: {}", name);

        self.loaded.push(LoadedPlugin { plugin, ctx });
        Ok(())
    }

    pub async fn unload_all(&mut self) {
        for loaded in self.loaded.drain(..) {
            if let Err(e) = loaded.plugin.on_unload(&loaded.ctx).await {
                warn!(
                    "Failed to unload plugin {}: {:#}",
                    loaded.ctx.manifest.display_name(),
                    e
                );
            }
        }
    }

    /// Unloads one plugin. Unknown or not loaded uuids are ignored.
    pub async fn unload(&mut self, uuid: &str) {
        let Some(index) = self.loaded.iter().position(|l| l.ctx.manifest.uuid == uuid) else {
            debug!("Plugin not loaded, nothing to unload: {}", uuid);
            return;
        };
        let loaded = self.loaded.remove(index);
        if let Err(e) = loaded.plugin.on_unload(&loaded.ctx).await {
            warn!(
                "Failed to unload plugin {}: {:#}",
                loaded.ctx.manifest.display_name(),
                e
            );
        }
    }

    pub fn is_loaded(&self, uuid: &str) -> bool {
        self.loaded.iter().any(|l| l.ctx.manifest.uuid == uuid)
    }

    /// Uuids of loaded plugins, in load order
    pub fn loaded(&self) -> Vec<String> {
        self.loaded
            .iter()
            .map(|l| l.ctx.manifest.uuid.clone())
            .collect()
    }
}

/// Registers one built-in platform adapter while loaded
pub struct PlatformPlugin {
    manifest: PluginManifest,
    kind: PlatformKind,
}

impl PlatformPlugin {
    pub fn new(kind: PlatformKind) -> Self {
        let manifest = PluginManifest::new(
            format!("system.platform.{}", kind.name().to_lowercase()),
            kind.name(),
        );
        Self { manifest, kind }
    }
}

#[async_trait]
impl Plugin for PlatformPlugin {
    fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    async fn on_register(&self, ctx: &PluginContext) -> Result<()> {
        let adapter = create_adapter(self.kind, &ctx.services)?;
        ctx.platforms.register_platform(adapter.info(), adapter);
        Ok(())
    }

    async fn on_unload(&self, ctx: &PluginContext) -> Result<()> {
        ctx.platforms.unregister_platform(self.kind.name());
        Ok(())
    }
}

pub fn builtin_plugins() -> Vec<Arc<dyn Plugin>> {
    PlatformKind::all()
        .into_iter()
        .map(|kind| Arc::new(PlatformPlugin::new(kind)) as Arc<dyn Plugin>)
        .collect()
}
