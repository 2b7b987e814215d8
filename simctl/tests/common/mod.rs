//! In-process stand-in for the simulation server's console.
//!
//! It understands the fingerprint protocol, records which `global.actions`
//! entries uploaded fragments define, answers probes from that, and answers
//! capability invocations through an optional responder.

#![allow(dead_code)]

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use simctl::{ConsoleLink, ControlResult, SimctlConfig};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

static SET_ENTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"global\.fingerprints\["([^"]+)"\] = "([0-9a-f]+)""#).unwrap());
static DEFINES_ACTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"global\.actions\.(\w+)\s*=\s*function").unwrap());
static PROBE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^/sc rcon\.print\(global\.actions ~= nil and global\.actions\["(\w+)"\] ~= nil\)$"#).unwrap());
static INVOKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^/(?:sc|command) local a, b = pcall\(global\.actions\["(\w+)"\], (\d+)"#).unwrap());

const GET_FINGERPRINTS: &str = "/sc rcon.print(game.table_to_json(global.fingerprints or {}))";
const CLEAR_FINGERPRINTS: &str = "/sc global.fingerprints = {}";
const SET_PREFIX: &str = "/sc global.fingerprints = global.fingerprints or {}";

pub type Responder = Arc<dyn Fn(&str, usize, &str) -> Option<String> + Send + Sync>;

#[derive(Default)]
pub struct RemoteState {
    pub fingerprints: HashMap<String, String>,
    pub actions: HashSet<String>,
    /// Every command, in arrival order (batched ones included).
    pub sent: Vec<String>,
    pub batches: Vec<Vec<String>>,
    pub fingerprint_updates: usize,
    pub uploads: Vec<String>,
    pub invocations: Vec<(String, usize)>,
    pub closed: bool,
    responder: Option<Responder>,
}

#[derive(Clone, Default)]
pub struct FakeServer {
    pub state: Arc<Mutex<RemoteState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(&self) -> Box<dyn ConsoleLink> {
        Box::new(FakeLink {
            server: self.clone(),
        })
    }

    /// `responder(capability, agent_index, command)`; `None` falls back to a
    /// successful empty envelope.
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&str, usize, &str) -> Option<String> + Send + Sync + 'static,
    {
        self.state.lock().unwrap().responder = Some(Arc::new(responder));
    }

    pub fn fingerprint_updates(&self) -> usize {
        self.state.lock().unwrap().fingerprint_updates
    }

    pub fn uploads(&self) -> Vec<String> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().batches.clone()
    }

    pub fn invocations(&self) -> Vec<(String, usize)> {
        self.state.lock().unwrap().invocations.clone()
    }

    pub fn fingerprint(&self, name: &str) -> Option<String> {
        self.state.lock().unwrap().fingerprints.get(name).cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Lose every registered action but keep the fingerprints, like a server
    /// restarted from an older save.
    pub fn forget_actions(&self) {
        self.state.lock().unwrap().actions.clear();
    }

    pub fn clear_log(&self) {
        let mut state = self.state.lock().unwrap();
        state.sent.clear();
        state.batches.clear();
        state.uploads.clear();
        state.invocations.clear();
        state.fingerprint_updates = 0;
    }

    fn handle(&self, command: &str) -> String {
        let responder = {
            let mut state = self.state.lock().unwrap();
            state.sent.push(command.to_string());

            if command == GET_FINGERPRINTS {
                return serde_json::to_string(&state.fingerprints).unwrap();
            }
            if command == CLEAR_FINGERPRINTS {
                state.fingerprints.clear();
                return String::new();
            }
            if command.starts_with(SET_PREFIX) {
                state.fingerprint_updates += 1;
                for caps in SET_ENTRY.captures_iter(command) {
                    state.fingerprints.insert(caps[1].to_string(), caps[2].to_string());
                }
                return String::new();
            }
            if let Some(caps) = PROBE.captures(command) {
                return state.actions.contains(&caps[1]).to_string();
            }
            if let Some(caps) = INVOKE.captures(command) {
                let name = caps[1].to_string();
                let agent: usize = caps[2].parse().unwrap();
                if !state.actions.contains(&name) {
                    return format!(
                        "{{[\"a\"] = false, [\"b\"] = \"attempt to call a nil value (field '{}')\"}}",
                        name
                    );
                }
                state.invocations.push((name.clone(), agent));
                Some((state.responder.clone(), name, agent))
            } else {
                if command == "/sc rcon.print(game.tick)" {
                    return "1000".to_string();
                }
                if let Some(body) = command.strip_prefix("/sc ") {
                    state.uploads.push(body.to_string());
                    for caps in DEFINES_ACTION.captures_iter(body) {
                        state.actions.insert(caps[1].to_string());
                    }
                }
                None
            }
        };

        // Responders run without the state lock so they may record freely
        match responder {
            Some((Some(respond), name, agent)) => respond(&name, agent, command)
                .unwrap_or_else(|| "{[\"a\"] = true}".to_string()),
            Some((None, _, _)) => "{[\"a\"] = true}".to_string(),
            None => String::new(),
        }
    }
}

pub struct FakeLink {
    server: FakeServer,
}

impl ConsoleLink for FakeLink {
    fn send(&mut self, command: &str) -> ControlResult<String> {
        Ok(self.server.handle(command))
    }

    fn send_batch(
        &mut self,
        commands: &IndexMap<String, String>,
    ) -> ControlResult<IndexMap<String, String>> {
        self.server
            .state
            .lock()
            .unwrap()
            .batches
            .push(commands.values().cloned().collect());
        Ok(commands
            .iter()
            .map(|(tag, command)| (tag.clone(), self.server.handle(command)))
            .collect())
    }

    fn close(&mut self) -> ControlResult<()> {
        self.server.state.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Config pointing at the crate's own scripts and tools.
pub fn shipped_config(agents: usize) -> SimctlConfig {
    let mut config = SimctlConfig::default();
    config.session.agents = agents;
    config
}

/// Config pointing at a scratch script tree.
pub fn config_for(root: &Path, libraries: &[&str]) -> SimctlConfig {
    let mut config = SimctlConfig::default();
    config.scripts.library_dir = root.join("lib");
    config.scripts.tools_dir = root.join("tools");
    config.scripts.bootstrap_libraries = libraries.iter().map(|s| s.to_string()).collect();
    config
}

pub fn write_file(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}
