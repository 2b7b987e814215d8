//! Script fragments: discovery, fingerprint caching, and command rendering.

pub mod compiler;
pub mod registry;

pub use compiler::{substitute, Command, CommandCompiler, MEASURED_PREFIX, SILENT_PREFIX};
pub use registry::{fingerprint, ScriptFragment, ScriptKind, ScriptRegistry};
