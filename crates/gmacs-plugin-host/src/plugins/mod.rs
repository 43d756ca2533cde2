//! Out-of-process plugin system
//!
//! Plugins run as child processes speaking JSON-RPC over stdio. This module
//! spawns them, serves their calls into the editor, merges their specs and
//! drives their lifecycle.

pub mod bridge;
pub mod build_cache;
pub mod container;
pub mod handles;
pub mod hooks;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod spec_registry;
pub mod transport;

pub use bridge::{HostBridge, PluginRouter};
pub use build_cache::{BuildCache, BuildCacheEntry};
pub use container::{InFlight, PluginClient};
pub use hooks::{HookFailure, HookTable};
pub use loader::{BuildSpec, PluginBuilder, PluginLoader, PluginSource, ResolvedBinary};
pub use manager::{PluginInfo, PluginManager, PluginManagerBuilder, PluginState};
pub use manifest::PluginManifest;
pub use spec_registry::{PluginSpecs, SpecConflict, SpecKind, SpecRegistry};
pub use transport::{PluginChannel, ProcessTransport, Transport};
