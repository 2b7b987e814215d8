//! HookRegistry - pre/post callbacks around capability calls.
//!
//! Hooks are keyed by `(capability, phase)` and run in registration order.
//! A failing hook is logged and skipped; it never stops the other hooks or
//! the wrapped call. Post hooks run even when the call fails or panics.

use crate::capability::Capability;
use crate::error::{ControlError, ControlResult};
use lua_codec::Value;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    Pre,
    Post,
}

/// How the wrapped call ended, as seen by post hooks.
#[derive(Debug, Clone, Copy)]
pub enum HookOutcome<'a> {
    Returned(&'a Value),
    Failed(&'a ControlError),
    Panicked(&'a str),
}

impl HookOutcome<'_> {
    pub fn is_success(&self) -> bool {
        matches!(self, HookOutcome::Returned(_))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum HookEvent<'a> {
    Pre {
        capability: &'a str,
        args: &'a [Value],
    },
    Post {
        capability: &'a str,
        args: &'a [Value],
        outcome: HookOutcome<'a>,
    },
}

impl<'a> HookEvent<'a> {
    pub fn capability(&self) -> &'a str {
        match self {
            HookEvent::Pre { capability, .. } | HookEvent::Post { capability, .. } => capability,
        }
    }

    pub fn args(&self) -> &'a [Value] {
        match self {
            HookEvent::Pre { args, .. } | HookEvent::Post { args, .. } => args,
        }
    }

    pub fn phase(&self) -> HookPhase {
        match self {
            HookEvent::Pre { .. } => HookPhase::Pre,
            HookEvent::Post { .. } => HookPhase::Post,
        }
    }
}

#[derive(Debug, Error)]
#[error("hook error: {0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        HookError(message.into())
    }
}

pub type HookFn = Arc<dyn Fn(&HookEvent<'_>) -> Result<(), HookError> + Send + Sync>;

type HookTable = HashMap<(String, HookPhase), Vec<HookFn>>;

/// Cloneable handle; clones share the same table.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Arc<RwLock<HookTable>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, capability: &str, phase: HookPhase, hook: F)
    where
        F: Fn(&HookEvent<'_>) -> Result<(), HookError> + Send + Sync + 'static,
    {
        let mut table = match self.hooks.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        table
            .entry((capability.to_string(), phase))
            .or_default()
            .push(Arc::new(hook));
    }

    /// Snapshot of the hooks for `(capability, phase)`, in registration order.
    pub fn hooks_for(&self, capability: &str, phase: HookPhase) -> Vec<HookFn> {
        let table = match self.hooks.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        table
            .get(&(capability.to_string(), phase))
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of registered hooks.
    pub fn len(&self) -> usize {
        match self.hooks.read() {
            Ok(table) => table.values().map(Vec::len).sum(),
            Err(poisoned) => poisoned.into_inner().values().map(Vec::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        match self.hooks.write() {
            Ok(mut table) => table.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    /// Run every hook matching the event. Returns how many failed.
    pub fn run(&self, event: &HookEvent<'_>) -> usize {
        let capability = event.capability();
        let phase = event.phase();
        let mut failures = 0;
        for (i, hook) in self.hooks_for(capability, phase).iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| hook(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::warn!("{:?} hook #{} for `{}` failed: {}", phase, i, capability, e);
                }
                Err(payload) => {
                    failures += 1;
                    tracing::warn!(
                        "{:?} hook #{} for `{}` panicked: {}",
                        phase,
                        i,
                        capability,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
        failures
    }

    /// Wrap a capability so every call runs its hooks.
    ///
    /// Hooks are looked up at call time, so hooks registered after wrapping
    /// still apply.
    pub fn wrap(&self, inner: Arc<dyn Capability>) -> Arc<dyn Capability> {
        Arc::new(HookedCapability {
            inner,
            hooks: self.clone(),
        })
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.len())
            .finish()
    }
}

struct HookedCapability {
    inner: Arc<dyn Capability>,
    hooks: HookRegistry,
}

impl Capability for HookedCapability {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn call(&self, args: &[Value]) -> ControlResult<Value> {
        let capability = self.inner.name();
        self.hooks.run(&HookEvent::Pre { capability, args });

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.inner.call(args)));

        let outcome = match &result {
            Ok(Ok(value)) => HookOutcome::Returned(value),
            Ok(Err(e)) => HookOutcome::Failed(e),
            Err(payload) => HookOutcome::Panicked(panic_message(payload.as_ref())),
        };
        self.hooks.run(&HookEvent::Post {
            capability,
            args,
            outcome,
        });

        match result {
            Ok(outcome) => outcome,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
