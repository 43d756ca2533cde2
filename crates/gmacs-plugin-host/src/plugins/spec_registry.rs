//! Plugin spec registry
//!
//! Host-wide namespace of commands, modes and key bindings contributed by
//! loaded plugins. A plugin's specs are validated as one batch and either
//! all published or none.

use gmacs_plugin_sdk::{CommandSpec, KeyBindingSpec, MajorModeSpec, MinorModeSpec};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Namespace a spec lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpecKind {
    Command,
    MajorMode,
    MinorMode,
    KeyBinding,
}

impl fmt::Display for SpecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpecKind::Command => "command",
            SpecKind::MajorMode => "major mode",
            SpecKind::MinorMode => "minor mode",
            SpecKind::KeyBinding => "key binding",
        };
        f.write_str(name)
    }
}

/// A name collision found while merging a plugin's specs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} '{name}' is already registered by {owner}")]
pub struct SpecConflict {
    pub kind: SpecKind,
    pub name: String,
    /// Plugin that holds the name; the loading plugin itself for duplicates
    /// inside one batch
    pub owner: String,
}

/// Everything one plugin declares
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSpecs {
    pub commands: Vec<CommandSpec>,
    pub major_modes: Vec<MajorModeSpec>,
    pub minor_modes: Vec<MinorModeSpec>,
    pub key_bindings: Vec<KeyBindingSpec>,
}

impl PluginSpecs {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
            && self.major_modes.is_empty()
            && self.minor_modes.is_empty()
            && self.key_bindings.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Owned<T> {
    owner: String,
    spec: T,
}

/// (sequence, mode); `None` is the global keymap
type BindingKey = (String, Option<String>);

#[derive(Debug, Clone)]
struct Binding {
    owner: String,
    spec: KeyBindingSpec,
    /// Declared inside a mode spec rather than in the plugin's binding list
    nested: bool,
}

/// Merged, conflict-checked specs of all loaded plugins
#[derive(Debug, Default)]
pub struct SpecRegistry {
    commands: IndexMap<String, Owned<CommandSpec>>,
    major_modes: IndexMap<String, Owned<MajorModeSpec>>,
    minor_modes: IndexMap<String, Owned<MinorModeSpec>>,
    key_bindings: IndexMap<BindingKey, Binding>,
}

impl SpecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and publish `specs` for `owner`.
    ///
    /// On conflict nothing is published and existing registrations are left
    /// untouched.
    pub fn register(&mut self, owner: &str, specs: PluginSpecs) -> Result<(), SpecConflict> {
        let bindings = self.validate(owner, &specs)?;

        for spec in specs.commands {
            self.commands.insert(
                spec.name.clone(),
                Owned {
                    owner: owner.to_string(),
                    spec,
                },
            );
        }
        for spec in specs.major_modes {
            self.major_modes.insert(
                spec.name.clone(),
                Owned {
                    owner: owner.to_string(),
                    spec,
                },
            );
        }
        for spec in specs.minor_modes {
            self.minor_modes.insert(
                spec.name.clone(),
                Owned {
                    owner: owner.to_string(),
                    spec,
                },
            );
        }
        for (key, spec, nested) in bindings {
            self.key_bindings.insert(
                key,
                Binding {
                    owner: owner.to_string(),
                    spec,
                    nested,
                },
            );
        }
        Ok(())
    }

    fn validate(
        &self,
        owner: &str,
        specs: &PluginSpecs,
    ) -> Result<Vec<(BindingKey, KeyBindingSpec, bool)>, SpecConflict> {
        let conflict = |kind, name: &str, holder: &str| SpecConflict {
            kind,
            name: name.to_string(),
            owner: holder.to_string(),
        };

        let mut seen = HashSet::new();
        for spec in &specs.commands {
            if let Some(existing) = self.commands.get(&spec.name) {
                return Err(conflict(SpecKind::Command, &spec.name, &existing.owner));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(conflict(SpecKind::Command, &spec.name, owner));
            }
        }

        let mut seen = HashSet::new();
        for spec in &specs.major_modes {
            if let Some(existing) = self.major_modes.get(&spec.name) {
                return Err(conflict(SpecKind::MajorMode, &spec.name, &existing.owner));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(conflict(SpecKind::MajorMode, &spec.name, owner));
            }
        }

        let mut seen = HashSet::new();
        for spec in &specs.minor_modes {
            if let Some(existing) = self.minor_modes.get(&spec.name) {
                return Err(conflict(SpecKind::MinorMode, &spec.name, &existing.owner));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(conflict(SpecKind::MinorMode, &spec.name, owner));
            }
        }

        // Bindings nested in a mode are scoped to that mode
        let nested = specs
            .major_modes
            .iter()
            .flat_map(|m| m.key_bindings.iter().map(move |b| (b, Some(m.name.clone()))))
            .chain(
                specs
                    .minor_modes
                    .iter()
                    .flat_map(|m| m.key_bindings.iter().map(move |b| (b, Some(m.name.clone())))),
            )
            .map(|(b, scope)| (b, scope, true));
        let top_level = specs
            .key_bindings
            .iter()
            .map(|b| (b, b.mode.clone(), false));

        let mut bindings = Vec::new();
        let mut seen = HashSet::new();
        for (spec, scope, is_nested) in top_level.chain(nested) {
            let key = (spec.sequence.clone(), scope);
            let label = binding_label(&key);
            if let Some(existing) = self.key_bindings.get(&key) {
                return Err(conflict(SpecKind::KeyBinding, &label, &existing.owner));
            }
            if !seen.insert(key.clone()) {
                return Err(conflict(SpecKind::KeyBinding, &label, owner));
            }
            bindings.push((key, spec.clone(), is_nested));
        }
        Ok(bindings)
    }

    /// Remove everything `owner` contributed. Returns how many specs went.
    pub fn unregister(&mut self, owner: &str) -> usize {
        let before = self.len();
        self.commands.retain(|_, c| c.owner != owner);
        self.major_modes.retain(|_, m| m.owner != owner);
        self.minor_modes.retain(|_, m| m.owner != owner);
        self.key_bindings.retain(|_, b| b.owner != owner);
        before - self.len()
    }

    /// Total number of registered specs, nested bindings included
    pub fn len(&self) -> usize {
        self.commands.len() + self.major_modes.len() + self.minor_modes.len() + self.key_bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn commands(&self) -> Vec<CommandSpec> {
        self.commands.values().map(|c| c.spec.clone()).collect()
    }

    pub fn major_modes(&self) -> Vec<MajorModeSpec> {
        self.major_modes.values().map(|m| m.spec.clone()).collect()
    }

    pub fn minor_modes(&self) -> Vec<MinorModeSpec> {
        self.minor_modes.values().map(|m| m.spec.clone()).collect()
    }

    /// Bindings declared in plugins' binding lists, as declared
    pub fn key_bindings(&self) -> Vec<KeyBindingSpec> {
        self.key_bindings
            .values()
            .filter(|b| !b.nested)
            .map(|b| b.spec.clone())
            .collect()
    }

    /// Everything `owner` currently has registered
    pub fn specs_of(&self, owner: &str) -> PluginSpecs {
        PluginSpecs {
            commands: self
                .commands
                .values()
                .filter(|c| c.owner == owner)
                .map(|c| c.spec.clone())
                .collect(),
            major_modes: self
                .major_modes
                .values()
                .filter(|m| m.owner == owner)
                .map(|m| m.spec.clone())
                .collect(),
            minor_modes: self
                .minor_modes
                .values()
                .filter(|m| m.owner == owner)
                .map(|m| m.spec.clone())
                .collect(),
            key_bindings: self
                .key_bindings
                .values()
                .filter(|b| b.owner == owner && !b.nested)
                .map(|b| b.spec.clone())
                .collect(),
        }
    }

    pub fn command(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name).map(|c| &c.spec)
    }

    /// Plugin that registered the command
    pub fn command_owner(&self, name: &str) -> Option<&str> {
        self.commands.get(name).map(|c| c.owner.as_str())
    }

    pub fn major_mode_owner(&self, name: &str) -> Option<&str> {
        self.major_modes.get(name).map(|m| m.owner.as_str())
    }

    pub fn minor_mode_owner(&self, name: &str) -> Option<&str> {
        self.minor_modes.get(name).map(|m| m.owner.as_str())
    }

    /// Major mode claiming the file's extension
    pub fn major_mode_for_file(&self, filename: &str) -> Option<&MajorModeSpec> {
        self.major_modes
            .values()
            .map(|m| &m.spec)
            .find(|spec| spec.extensions.iter().any(|ext| filename.ends_with(ext.as_str())))
    }

    /// Resolve a key sequence: the mode's keymap first, then the global one
    pub fn lookup_key(&self, sequence: &str, mode: Option<&str>) -> Option<&KeyBindingSpec> {
        if let Some(mode) = mode {
            let key = (sequence.to_string(), Some(mode.to_string()));
            if let Some(binding) = self.key_bindings.get(&key) {
                return Some(&binding.spec);
            }
        }
        self.key_bindings
            .get(&(sequence.to_string(), None))
            .map(|b| &b.spec)
    }
}

fn binding_label((sequence, mode): &BindingKey) -> String {
    match mode {
        Some(mode) => format!("{sequence} in {mode}"),
        None => format!("{sequence} (global)"),
    }
}
