//! Per-agent capability namespace.
//!
//! Admin capabilities are stored under a marked name (`_clear_entities`).
//! They are always callable by that name; the plain name and the listing
//! only include them while admin visibility is switched on.

use crate::capability::Capability;
use crate::error::{ControlError, ControlResult};
use indexmap::IndexMap;
use lua_codec::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const ADMIN_MARKER: &str = "_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Admin,
}

#[derive(Clone)]
pub struct CapabilityBinding {
    pub name: String,
    pub agent_index: usize,
    pub visibility: Visibility,
    pub instance: Arc<dyn Capability>,
}

impl CapabilityBinding {
    /// Key under which the binding lives in its namespace.
    pub fn key(&self) -> String {
        match self.visibility {
            Visibility::Public => self.name.clone(),
            Visibility::Admin => format!("{}{}", ADMIN_MARKER, self.name),
        }
    }

    pub fn call(&self, args: &[Value]) -> ControlResult<Value> {
        self.instance.call(args)
    }
}

impl std::fmt::Debug for CapabilityBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityBinding")
            .field("name", &self.name)
            .field("agent_index", &self.agent_index)
            .field("visibility", &self.visibility)
            .finish()
    }
}

#[derive(Debug)]
pub struct Namespace {
    agent_index: usize,
    bindings: IndexMap<String, CapabilityBinding>,
    admin_visible: AtomicBool,
}

impl Namespace {
    pub fn new(agent_index: usize) -> Self {
        Self {
            agent_index,
            bindings: IndexMap::new(),
            admin_visible: AtomicBool::new(false),
        }
    }

    pub fn agent_index(&self) -> usize {
        self.agent_index
    }

    /// Replaces any earlier binding with the same key.
    pub fn register(&mut self, binding: CapabilityBinding) {
        self.bindings.insert(binding.key(), binding);
    }

    pub fn get(&self, name: &str) -> Option<&CapabilityBinding> {
        if let Some(binding) = self.bindings.get(name) {
            return Some(binding);
        }
        if self.admin_visible() {
            return self
                .bindings
                .get(&format!("{}{}", ADMIN_MARKER, name))
                .filter(|b| b.visibility == Visibility::Admin);
        }
        None
    }

    pub fn call(&self, name: &str, args: &[Value]) -> ControlResult<Value> {
        let binding = self.get(name).ok_or_else(|| ControlError::UnknownCapability {
            name: name.to_string(),
            agent_index: self.agent_index,
        })?;
        tracing::debug!("agent {} calls `{}`", self.agent_index, binding.name);
        binding.call(args)
    }

    /// Names visible right now, in load order.
    pub fn capability_names(&self) -> Vec<String> {
        let show_admin = self.admin_visible();
        self.bindings
            .values()
            .filter(|b| show_admin || b.visibility == Visibility::Public)
            .map(CapabilityBinding::key)
            .collect()
    }

    pub fn admin_names(&self) -> Vec<String> {
        self.bindings
            .values()
            .filter(|b| b.visibility == Visibility::Admin)
            .map(CapabilityBinding::key)
            .collect()
    }

    pub fn set_admin_visible(&self, visible: bool) {
        self.admin_visible.store(visible, Ordering::Relaxed);
    }

    pub fn admin_visible(&self) -> bool {
        self.admin_visible.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }
}
