//! CommandCompiler - renders fragments and parameters into console text.

use super::registry::ScriptRegistry;
use lua_codec::Value;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Executes without touching the remote side's command accounting.
pub const SILENT_PREFIX: &str = "/sc ";
/// Goes through the remote side's counted command path.
pub const MEASURED_PREFIX: &str = "/command ";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\barg(\d+)\b").expect("placeholder regex"));

/// A unit of work for the console.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Fragment name, or literal script text when `raw` is set.
    pub target: String,
    pub params: Vec<Value>,
    pub raw: bool,
    /// Overrides `target` when building the transaction tag.
    pub label: Option<String>,
}

impl Command {
    pub fn fragment(target: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            target: target.into(),
            params,
            raw: false,
            label: None,
        }
    }

    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            target: text.into(),
            params: Vec::new(),
            raw: true,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// `"{index}_{label or target}"`.
    pub fn tag(&self, index: usize) -> String {
        format!("{}_{}", index, self.label.as_deref().unwrap_or(&self.target))
    }
}

#[derive(Debug, Clone)]
pub struct CommandCompiler {
    silent_prefix: String,
    measured_prefix: String,
}

impl Default for CommandCompiler {
    fn default() -> Self {
        Self {
            silent_prefix: SILENT_PREFIX.to_string(),
            measured_prefix: MEASURED_PREFIX.to_string(),
        }
    }
}

impl CommandCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render `target` with `params`. A target the registry does not know is
    /// treated as literal script text and returned unchanged.
    pub fn compile(
        &self,
        registry: &ScriptRegistry,
        target: &str,
        params: &[Value],
        measured: bool,
    ) -> String {
        let Some(fragment) = registry.get(target) else {
            return target.to_string();
        };
        self.envelope(&substitute(&fragment.content, params), measured)
    }

    /// Console prefix for a measured or silent call.
    pub fn prefix(&self, measured: bool) -> &str {
        if measured {
            &self.measured_prefix
        } else {
            &self.silent_prefix
        }
    }

    /// Wrap already-rendered script text in the console prefix.
    pub fn envelope(&self, body: &str, measured: bool) -> String {
        format!("{}{}", self.prefix(measured), body)
    }

    pub fn compile_command(
        &self,
        registry: &ScriptRegistry,
        command: &Command,
        measured: bool,
    ) -> String {
        if command.raw {
            command.target.clone()
        } else {
            self.compile(registry, &command.target, &command.params, measured)
        }
    }
}

/// Replace every `argN` with the literal form of `params[N - 1]`.
///
/// One pass over the original text, so encoded parameters that themselves
/// contain `argN` are never substituted again. Placeholders past the end of
/// `params` are left alone.
pub fn substitute(content: &str, params: &[Value]) -> String {
    PLACEHOLDER
        .replace_all(content, |caps: &Captures| {
            let index = caps[1].parse::<usize>().ok().filter(|n| *n >= 1);
            match index.and_then(|n| params.get(n - 1)) {
                Some(value) => lua_codec::encode(value),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
