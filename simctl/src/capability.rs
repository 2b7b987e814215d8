//! Capabilities: named operations bound to one controlled agent.
//!
//! Every shipped capability pairs a remote fragment that registers
//! `global.actions.<name>` with a local object that validates arguments and
//! calls it through the interface-call envelope in [`ToolContext::invoke`].

use crate::decoder;
use crate::error::{ControlError, ControlResult};
use crate::scripts::Command;
use crate::session::SessionCore;
use lua_codec::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub trait Capability: Send + Sync {
    fn name(&self) -> &str;
    fn call(&self, args: &[Value]) -> ControlResult<Value>;
}

/// What a capability implementation gets to talk to the remote side.
pub struct ToolContext {
    capability: String,
    agent_index: usize,
    core: Arc<SessionCore>,
    /// Set once a probe has seen the remote function.
    registered: AtomicBool,
}

impl ToolContext {
    pub fn new(capability: impl Into<String>, agent_index: usize, core: Arc<SessionCore>) -> Self {
        Self {
            capability: capability.into(),
            agent_index,
            core,
            registered: AtomicBool::new(false),
        }
    }

    pub fn capability(&self) -> &str {
        &self.capability
    }

    pub fn agent_index(&self) -> usize {
        self.agent_index
    }

    pub fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    /// Call `global.actions.<capability>(agent_index, args...)` remotely.
    ///
    /// Inside an open transaction the call is queued and `Nil` is returned;
    /// the real result comes back with the transaction outcome.
    pub fn invoke(&self, args: &[Value]) -> ControlResult<Value> {
        let command = self.invoke_command(args);

        if self
            .core
            .queue_if_open(Command::raw(command.clone()).with_label(&self.capability))?
            .is_some()
        {
            return Ok(Value::Nil);
        }

        self.ensure_registered()?;

        let started = Instant::now();
        let reply = self.core.link().send(&command)?;
        let decoded = decoder::decode(&reply, started)?;
        self.core.advance_clock(decoded.elapsed);
        Ok(decoded.value)
    }

    fn ensure_registered(&self) -> ControlResult<()> {
        if self.registered.load(Ordering::Acquire) {
            return Ok(());
        }
        match self.probe() {
            Err(ControlError::CacheMismatch { capability }) => {
                tracing::info!(
                    "`{}` missing on the remote side, reinstalling scripts",
                    capability
                );
                self.core.invalidate_caches()?;
                self.probe()
            }
            other => other,
        }
    }

    fn probe(&self) -> ControlResult<()> {
        let reply = self.core.link().send(&self.probe_command())?;
        match decoder::decode_value(&reply)? {
            Value::Boolean(true) => {
                self.registered.store(true, Ordering::Release);
                Ok(())
            }
            _ => Err(ControlError::CacheMismatch {
                capability: self.capability.clone(),
            }),
        }
    }

    pub fn probe_command(&self) -> String {
        let key = lua_codec::encode(&Value::from(self.capability.as_str()));
        format!(
            "/sc rcon.print(global.actions ~= nil and global.actions[{}] ~= nil)",
            key
        )
    }

    /// Interface calls are measured: they advance the session clock.
    pub fn invoke_command(&self, args: &[Value]) -> String {
        let key = lua_codec::encode(&Value::from(self.capability.as_str()));
        let mut call_args = lua_codec::encode(&Value::from(self.agent_index));
        if !args.is_empty() {
            call_args.push_str(", ");
            call_args.push_str(&lua_codec::encode_args(args));
        }
        let body = format!(
            "local a, b = pcall(global.actions[{}], {}); rcon.print(dump({{a = a, b = b}}))",
            key, call_args
        );
        self.core.compiler().envelope(&body, true)
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("capability", &self.capability)
            .field("agent_index", &self.agent_index)
            .finish()
    }
}

/// Argument checks shared by the shipped capabilities.
pub mod args {
    use super::*;

    pub fn arity(capability: &str, args: &[Value], min: usize, max: usize) -> ControlResult<()> {
        if args.len() < min || args.len() > max {
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{} to {}", min, max)
            };
            return Err(ControlError::invalid_argument(
                capability,
                format!("expected {} arguments, got {}", expected, args.len()),
            ));
        }
        Ok(())
    }

    pub fn number(capability: &str, args: &[Value], index: usize, what: &str) -> ControlResult<f64> {
        args.get(index)
            .and_then(Value::as_f64)
            .filter(|n| n.is_finite())
            .ok_or_else(|| {
                ControlError::invalid_argument(capability, format!("{} must be a finite number", what))
            })
    }

    pub fn string<'a>(
        capability: &str,
        args: &'a [Value],
        index: usize,
        what: &str,
    ) -> ControlResult<&'a str> {
        args.get(index)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ControlError::invalid_argument(capability, format!("{} must be a non-empty string", what))
            })
    }

    /// Non-negative whole number.
    pub fn count(capability: &str, args: &[Value], index: usize, what: &str) -> ControlResult<i64> {
        args.get(index)
            .and_then(Value::as_i64)
            .filter(|n| *n >= 0)
            .ok_or_else(|| {
                ControlError::invalid_argument(
                    capability,
                    format!("{} must be a non-negative integer", what),
                )
            })
    }
}

/// The eight map directions, in the remote side's numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    North = 0,
    NorthEast = 1,
    East = 2,
    SouthEast = 3,
    South = 4,
    SouthWest = 5,
    West = 6,
    NorthWest = 7,
}

const DIRECTION_NAMES: [(&str, Direction); 8] = [
    ("north", Direction::North),
    ("northeast", Direction::NorthEast),
    ("east", Direction::East),
    ("southeast", Direction::SouthEast),
    ("south", Direction::South),
    ("southwest", Direction::SouthWest),
    ("west", Direction::West),
    ("northwest", Direction::NorthWest),
];

impl Direction {
    pub fn from_name(name: &str) -> Result<Self, String> {
        let wanted = name.trim().to_ascii_lowercase().replace(['_', '-', ' '], "");
        if let Some((_, d)) = DIRECTION_NAMES.iter().find(|(n, _)| *n == wanted) {
            return Ok(*d);
        }
        let names: Vec<&str> = DIRECTION_NAMES.iter().map(|(n, _)| *n).collect();
        Err(match nearest_match(&wanted, &names) {
            Some(best) => format!("unknown direction `{}`, did you mean `{}`?", name, best),
            None => format!("unknown direction `{}`", name),
        })
    }

    pub fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::String(s) => Self::from_name(s),
            other => match other.as_i64() {
                Some(n @ 0..=7) => Ok(DIRECTION_NAMES[n as usize].1),
                _ => Err(format!("direction must be a name or 0..7, got {}", other)),
            },
        }
    }
}

/// Closest candidate by edit distance, if it is close enough to be a typo.
pub fn nearest_match<'a>(input: &str, candidates: &[&'a str]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (edit_distance(input, c), *c))
        .filter(|(d, c)| *d <= (c.len() / 3).max(2))
        .min_by_key(|(d, _)| *d)
        .map(|(_, c)| c)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut prev = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == *cb {
                prev
            } else {
                1 + prev.min(above).min(row[j])
            };
            prev = above;
        }
    }
    row[b.len()]
}
