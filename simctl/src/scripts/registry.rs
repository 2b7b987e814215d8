//! ScriptRegistry - discovers script fragments and tracks what the remote
//! side already has installed.
//!
//! The remote side keeps a `name -> fingerprint` table in `global.fingerprints`.
//! A fragment is uploaded only when its local fingerprint differs from the
//! remote one (or the remote one is missing).

use crate::decoder;
use crate::error::{ControlError, ControlResult};
use crate::link::LinkHandle;
use indexmap::IndexMap;
use itertools::Itertools;
use lua_codec::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const SCRIPT_EXTENSION: &str = "lua";

const GET_FINGERPRINTS: &str = "/sc rcon.print(game.table_to_json(global.fingerprints or {}))";
const CLEAR_FINGERPRINTS: &str = "/sc global.fingerprints = {}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptKind {
    /// Session-global, installed once at bootstrap.
    Library,
    /// Owned by one capability.
    Tool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptFragment {
    pub name: String,
    pub kind: ScriptKind,
    pub content: String,
    pub path: PathBuf,
}

impl ScriptFragment {
    pub fn new(name: impl Into<String>, kind: ScriptKind, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            content: content.into(),
            path: PathBuf::new(),
        }
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.content)
    }
}

/// Lowercase hex SHA-256 of the content.
pub fn fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct ScriptRegistry {
    fragments: IndexMap<String, ScriptFragment>,
    /// Mirror of the remote fingerprint table.
    remote: HashMap<String, String>,
    caching: bool,
}

impl ScriptRegistry {
    pub fn new(caching: bool) -> Self {
        Self {
            fragments: IndexMap::new(),
            remote: HashMap::new(),
            caching,
        }
    }

    /// Scan the library directory (one fragment per file) and the capability
    /// tree (`<owner>/<capability>/*.lua`).
    pub fn discover(library_dir: &Path, tools_dir: &Path, caching: bool) -> ControlResult<Self> {
        let mut registry = Self::new(caching);

        for path in script_files(library_dir)? {
            let name = file_stem(&path);
            registry.insert(read_fragment(path, name, ScriptKind::Library)?);
        }

        for owner_dir in sorted_dirs(tools_dir)? {
            let owner = file_stem(&owner_dir);
            for capability_dir in sorted_dirs(&owner_dir)? {
                let capability = file_stem(&capability_dir);
                for path in script_files(&capability_dir)? {
                    let name = format!("{}/{}/{}", owner, capability, file_stem(&path));
                    registry.insert(read_fragment(path, name, ScriptKind::Tool)?);
                }
            }
        }

        tracing::debug!(
            "discovered {} script fragments ({} libraries)",
            registry.len(),
            registry.library_names().len()
        );
        Ok(registry)
    }

    pub fn insert(&mut self, fragment: ScriptFragment) {
        self.fragments.insert(fragment.name.clone(), fragment);
    }

    pub fn get(&self, name: &str) -> Option<&ScriptFragment> {
        self.fragments.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fragments.contains_key(name)
    }

    pub fn fragments(&self) -> impl Iterator<Item = &ScriptFragment> {
        self.fragments.values()
    }

    pub fn library_names(&self) -> Vec<&str> {
        self.fragments
            .values()
            .filter(|f| f.kind == ScriptKind::Library)
            .map(|f| f.name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn caching(&self) -> bool {
        self.caching
    }

    pub fn remote_table(&self) -> &HashMap<String, String> {
        &self.remote
    }

    pub fn should_install(&self, fragment: &ScriptFragment) -> bool {
        self.remote.get(&fragment.name) != Some(&fragment.fingerprint())
    }

    /// Bring the local mirror in line with the remote side. With caching
    /// disabled the remote table is wiped instead, forcing full reinstall.
    pub fn sync_remote(&mut self, link: &LinkHandle) -> ControlResult<()> {
        if self.caching {
            self.fetch_remote_table(link)
        } else {
            self.clear_remote(link)
        }
    }

    pub fn fetch_remote_table(&mut self, link: &LinkHandle) -> ControlResult<()> {
        let reply = link.send(GET_FINGERPRINTS)?;
        self.remote = parse_fingerprint_table(&reply)?;
        tracing::debug!("remote side holds {} fingerprints", self.remote.len());
        Ok(())
    }

    pub fn clear_remote(&mut self, link: &LinkHandle) -> ControlResult<()> {
        link.send(CLEAR_FINGERPRINTS)?;
        self.remote.clear();
        tracing::debug!("cleared remote fingerprint table");
        Ok(())
    }

    /// Record fingerprints locally and remotely, as one update command.
    pub fn mark_installed(
        &mut self,
        link: &LinkHandle,
        entries: &[(String, String)],
    ) -> ControlResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        link.send(&set_fingerprints_command(entries))?;
        for (name, hash) in entries {
            self.remote.insert(name.clone(), hash.clone());
        }
        Ok(())
    }

    /// Install one fragment if needed. Returns whether it was uploaded.
    pub fn install(&mut self, link: &LinkHandle, name: &str) -> ControlResult<bool> {
        Ok(!self.install_many(link, &[name])?.is_empty())
    }

    /// Install every named fragment that is out of date, then record all new
    /// fingerprints with a single update. Returns the uploaded names.
    pub fn install_many(&mut self, link: &LinkHandle, names: &[&str]) -> ControlResult<Vec<String>> {
        let mut pending: Vec<(String, String)> = Vec::new();
        for name in names {
            let fragment = self
                .fragments
                .get(*name)
                .ok_or_else(|| ControlError::UnknownFragment(name.to_string()))?;
            let hash = fragment.fingerprint();
            if !self.should_install(fragment) || pending.iter().any(|(n, _)| n == name) {
                tracing::debug!("fragment `{}` is up to date", name);
                continue;
            }

            lua_codec::check_syntax(&fragment.content).map_err(|issue| ControlError::Syntax {
                fragment: fragment.name.clone(),
                line: issue.line,
                message: issue.message,
            })?;

            tracing::debug!("installing fragment `{}` ({})", name, &hash[..12]);
            let reply = link.send(&format!("/sc {}", fragment.content))?;
            decoder::decode_value(&reply)?;
            pending.push((name.to_string(), hash));
        }

        self.mark_installed(link, &pending)?;
        Ok(pending.into_iter().map(|(name, _)| name).collect())
    }

    /// Bootstrap libraries are required; a missing one is fatal.
    pub fn install_library(&mut self, link: &LinkHandle, name: &str) -> ControlResult<bool> {
        Ok(!self.install_libraries(link, &[name])?.is_empty())
    }

    /// Install several libraries with one fingerprint update. Every name is
    /// checked before anything is sent.
    pub fn install_libraries(
        &mut self,
        link: &LinkHandle,
        names: &[&str],
    ) -> ControlResult<Vec<String>> {
        if let Some(missing) = names.iter().find(|name| {
            !matches!(self.fragments.get(**name), Some(f) if f.kind == ScriptKind::Library)
        }) {
            return Err(ControlError::MissingLibrary(missing.to_string()));
        }
        self.install_many(link, names)
    }

    /// Install all tool fragments under `"{owner}/{capability}/"`.
    pub fn install_tools_for(&mut self, link: &LinkHandle, prefix: &str) -> ControlResult<usize> {
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        let names: Vec<String> = self
            .fragments
            .values()
            .filter(|f| f.kind == ScriptKind::Tool && f.name.starts_with(&prefix))
            .map(|f| f.name.clone())
            .collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        Ok(self.install_many(link, &refs)?.len())
    }
}

fn set_fingerprints_command(entries: &[(String, String)]) -> String {
    let assignments = entries
        .iter()
        .map(|(name, hash)| {
            format!(
                "global.fingerprints[{}] = {}",
                lua_codec::encode(&Value::from(name.as_str())),
                lua_codec::encode(&Value::from(hash.as_str()))
            )
        })
        .join("; ");
    format!(
        "/sc global.fingerprints = global.fingerprints or {{}}; {}",
        assignments
    )
}

/// The remote side prints its table as JSON; an empty table may come back as
/// `[]`, `{}` or nothing at all.
fn parse_fingerprint_table(reply: &str) -> ControlResult<HashMap<String, String>> {
    let text = reply.trim();
    if text.is_empty() || text == "[]" || text == "{}" {
        return Ok(HashMap::new());
    }
    serde_json::from_str(text)
        .map_err(|e| ControlError::Transport(format!("malformed fingerprint table: {}", e)))
}

fn read_fragment(path: PathBuf, name: String, kind: ScriptKind) -> ControlResult<ScriptFragment> {
    let content = std::fs::read_to_string(&path)?;
    Ok(ScriptFragment {
        name,
        kind,
        content,
        path,
    })
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn sorted_entries(dir: &Path) -> ControlResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        tracing::debug!("script directory {} does not exist", dir.display());
        return Ok(Vec::new());
    }
    let mut entries = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();
    Ok(entries)
}

pub(crate) fn sorted_dirs(dir: &Path) -> ControlResult<Vec<PathBuf>> {
    Ok(sorted_entries(dir)?
        .into_iter()
        .filter(|p| p.is_dir())
        .collect())
}

fn script_files(dir: &Path) -> ControlResult<Vec<PathBuf>> {
    Ok(sorted_entries(dir)?
        .into_iter()
        .filter(|p| p.is_file() && p.extension().map_or(false, |e| e == SCRIPT_EXTENSION))
        .collect())
}
