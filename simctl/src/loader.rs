//! ControllerLoader - binds every capability directory to every agent.
//!
//! The capability tree looks like `tools_dir/{agent,admin}/<name>/` with a
//! `server.lua` fragment and a `client.rs` implementation in each directory.
//! Implementations are resolved through the compile-time catalog in
//! [`crate::tools`], never loaded from disk.

use crate::capability::ToolContext;
use crate::error::{ControlError, ControlResult};
use crate::hooks::HookRegistry;
use crate::namespace::{CapabilityBinding, Namespace, Visibility};
use crate::scripts::registry::sorted_dirs;
use crate::session::SessionCore;
use crate::tools;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const OWNER_CLASSES: [(&str, Visibility); 2] =
    [("agent", Visibility::Public), ("admin", Visibility::Admin)];

const SERVER_STEM: &str = "server";
const CLIENT_STEM: &str = "client";

/// Identifiers that do not follow the plain snake_case -> UpperCamelCase rule.
const IDENTIFIER_OVERRIDES: [(&str, &str); 2] = [
    ("place_entity_next_to", "PlaceNextTo"),
    ("pickup_entity", "PickUpEntity"),
];

/// `move_to` -> `MoveTo`, with the two fixed exceptions.
pub fn implementation_identifier(dir_name: &str) -> String {
    if let Some((_, id)) = IDENTIFIER_OVERRIDES.iter().find(|(d, _)| *d == dir_name) {
        return id.to_string();
    }
    dir_name
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// One valid capability directory.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityDir {
    pub owner: String,
    pub name: String,
    pub path: PathBuf,
    pub visibility: Visibility,
}

impl CapabilityDir {
    pub fn identifier(&self) -> String {
        implementation_identifier(&self.name)
    }

    /// Prefix of this capability's fragments in the script registry.
    pub fn fragment_prefix(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// List capability directories in load order (owner class, then name).
pub fn discover(tools_dir: &Path) -> ControlResult<Vec<CapabilityDir>> {
    let mut found = Vec::new();
    for (owner, visibility) in OWNER_CLASSES {
        for path in sorted_dirs(&tools_dir.join(owner))? {
            if !has_file_with_stem(&path, SERVER_STEM)? || !has_file_with_stem(&path, CLIENT_STEM)? {
                tracing::debug!("skipping {}: needs both server and client", path.display());
                continue;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            found.push(CapabilityDir {
                owner: owner.to_string(),
                name,
                path,
                visibility,
            });
        }
    }
    Ok(found)
}

fn has_file_with_stem(dir: &Path, stem: &str) -> ControlResult<bool> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.file_stem().map_or(false, |s| s == stem) {
            return Ok(true);
        }
    }
    Ok(false)
}

pub struct ControllerLoader<'a> {
    core: &'a Arc<SessionCore>,
    hooks: &'a HookRegistry,
}

impl<'a> ControllerLoader<'a> {
    pub fn new(core: &'a Arc<SessionCore>, hooks: &'a HookRegistry) -> Self {
        Self { core, hooks }
    }

    /// Install every capability's fragments and bind it in each namespace.
    /// Returns the number of capabilities loaded.
    pub fn load(&self, namespaces: &mut [Namespace]) -> ControlResult<usize> {
        let dirs = discover(&self.core.config().scripts.tools_dir)?;
        for dir in &dirs {
            self.load_one(dir, namespaces)?;
        }
        tracing::info!(
            "loaded {} capabilities for {} agents",
            dirs.len(),
            namespaces.len()
        );
        Ok(dirs.len())
    }

    fn load_one(&self, dir: &CapabilityDir, namespaces: &mut [Namespace]) -> ControlResult<()> {
        let identifier = dir.identifier();
        let failure = |reason: String| ControlError::Capability {
            directory: dir.path.display().to_string(),
            identifier: identifier.clone(),
            reason,
        };

        let constructor = tools::catalog()
            .get(identifier.as_str())
            .copied()
            .ok_or_else(|| failure("no implementation registered under this identifier".into()))?;

        let installed = self.core.install_capability(&dir.fragment_prefix())?;
        tracing::debug!(
            "capability `{}` ({}): {} fragments uploaded",
            dir.name,
            identifier,
            installed
        );

        for namespace in namespaces.iter_mut() {
            let context = ToolContext::new(&dir.name, namespace.agent_index(), self.core.clone());
            let instance = constructor(context).map_err(|e| failure(e.to_string()))?;
            namespace.register(CapabilityBinding {
                name: dir.name.clone(),
                agent_index: namespace.agent_index(),
                visibility: dir.visibility,
                instance: self.hooks.wrap(instance),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    #[test]
    fn test_identifier_rule() {
        assert_eq!(implementation_identifier("move_to"), "MoveTo");
        assert_eq!(implementation_identifier("inspect_inventory"), "InspectInventory");
        assert_eq!(implementation_identifier("sleep"), "Sleep");
        assert_eq!(implementation_identifier("place_entity_next_to"), "PlaceNextTo");
        assert_eq!(implementation_identifier("pickup_entity"), "PickUpEntity");
    }

    #[test]
    fn test_discover_requires_server_and_client() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for (path, files) in [
            ("agent/move_to", &["server.lua", "client.rs"][..]),
            ("agent/half_done", &["server.lua"][..]),
            ("admin/clear_entities", &["server.lua", "client.rs"][..]),
            ("other/ignored", &["server.lua", "client.rs"][..]),
        ] {
            fs::create_dir_all(root.join(path)).unwrap();
            for file in files {
                fs::write(root.join(path).join(file), "").unwrap();
            }
        }

        let found = discover(root).unwrap();
        let names: Vec<(&str, Visibility)> = found
            .iter()
            .map(|d| (d.name.as_str(), d.visibility))
            .collect();
        assert_eq!(
            names,
            vec![
                ("move_to", Visibility::Public),
                ("clear_entities", Visibility::Admin)
            ]
        );
        assert_eq!(found[0].fragment_prefix(), "agent/move_to");
    }

    #[test]
    fn test_shipped_tree_matches_catalog() {
        let tools_dir = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/src/tools"));
        let found = discover(tools_dir).unwrap();
        assert!(!found.is_empty());
        for dir in &found {
            assert!(
                tools::catalog().contains_key(dir.identifier().as_str()),
                "{} has no catalog entry",
                dir.identifier()
            );
        }
        assert_eq!(found.len(), tools::catalog().len());
    }
}
