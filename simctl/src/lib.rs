//! simctl - drive a simulation server through its remote admin console.
//!
//! Typed capability calls become remote script invocations; replies come
//! back as [`lua_codec::Value`]s or typed errors. See [`session::Session`]
//! for the entry point.

pub mod capability;
pub mod config;
pub mod decoder;
pub mod error;
pub mod hooks;
pub mod link;
pub mod loader;
pub mod namespace;
pub mod scripts;
pub mod session;
pub mod tools;
pub mod transaction;

pub use capability::{Capability, ToolContext};
pub use config::SimctlConfig;
pub use decoder::{Decoded, ErrorResult};
pub use error::{ControlError, ControlResult};
pub use hooks::{HookError, HookEvent, HookOutcome, HookPhase, HookRegistry};
pub use link::{ConsoleLink, LinkHandle, RconLink};
pub use namespace::{CapabilityBinding, Namespace, Visibility};
pub use scripts::{Command, CommandCompiler, ScriptFragment, ScriptKind, ScriptRegistry};
pub use session::{Session, SessionClock, SessionCore};
pub use transaction::{TransactionBatcher, TransactionOutcome};

pub use lua_codec::Value;
