//! Session lifecycle.
//!
//! A [`Session`] owns one console connection and everything bound to it:
//! the script registry, the transaction batcher, the per-agent namespaces,
//! the hook registry and an optional heartbeat worker. Bindings share the
//! [`SessionCore`] through an `Arc`.

use crate::config::SimctlConfig;
use crate::decoder;
use crate::error::{ControlError, ControlResult};
use crate::hooks::HookRegistry;
use crate::link::{ConsoleLink, LinkHandle, RconLink};
use crate::loader::{self, ControllerLoader};
use crate::namespace::Namespace;
use crate::scripts::{Command, CommandCompiler, ScriptRegistry};
use crate::transaction::{TransactionBatcher, TransactionOutcome};
use lua_codec::Value;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const TICKS_PER_SECOND: f64 = 60.0;
const GAME_TICK_COMMAND: &str = "/sc rcon.print(game.tick)";
const SET_GAME_SPEED: &str = "set_game_speed";

/// Elapsed-time accounting for measured calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionClock {
    pub game_speed: f64,
    /// Game ticks spent in measured calls since the last reset.
    pub elapsed_ticks: f64,
    /// Last tick reported by the heartbeat worker.
    pub server_tick: Option<i64>,
}

impl SessionClock {
    pub fn new(game_speed: f64) -> Self {
        Self {
            game_speed,
            elapsed_ticks: 0.0,
            server_tick: None,
        }
    }

    pub fn advance(&mut self, elapsed: Duration) {
        self.elapsed_ticks += elapsed.as_secs_f64() * TICKS_PER_SECOND * self.game_speed;
    }

    pub fn reset(&mut self) {
        self.elapsed_ticks = 0.0;
        self.server_tick = None;
    }
}

/// State shared by the session and every capability binding.
pub struct SessionCore {
    link: LinkHandle,
    registry: RwLock<ScriptRegistry>,
    batcher: Mutex<TransactionBatcher>,
    clock: Mutex<SessionClock>,
    compiler: CommandCompiler,
    config: SimctlConfig,
}

impl SessionCore {
    /// Discover scripts; nothing is sent yet.
    pub fn new(config: SimctlConfig, link: LinkHandle) -> ControlResult<Self> {
        let registry = discover_scripts(&config, config.scripts.cache_scripts)?;
        Ok(Self {
            link,
            registry: RwLock::new(registry),
            batcher: Mutex::new(TransactionBatcher::new()),
            clock: Mutex::new(SessionClock::new(config.session.game_speed)),
            compiler: CommandCompiler::new(),
            config,
        })
    }

    pub fn link(&self) -> &LinkHandle {
        &self.link
    }

    pub fn config(&self) -> &SimctlConfig {
        &self.config
    }

    pub fn compiler(&self) -> &CommandCompiler {
        &self.compiler
    }

    pub fn registry(&self) -> RwLockReadGuard<'_, ScriptRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, ScriptRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn batcher(&self) -> MutexGuard<'_, TransactionBatcher> {
        self.batcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn clock_guard(&self) -> MutexGuard<'_, SessionClock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sync the fingerprint mirror and install the bootstrap libraries.
    pub fn bootstrap(&self) -> ControlResult<()> {
        let mut registry = self.registry_mut();
        registry.sync_remote(&self.link)?;
        let names: Vec<&str> = self
            .config
            .scripts
            .bootstrap_libraries
            .iter()
            .map(String::as_str)
            .collect();
        registry.install_libraries(&self.link, &names)?;
        Ok(())
    }

    pub fn install_capability(&self, prefix: &str) -> ControlResult<usize> {
        self.registry_mut().install_tools_for(&self.link, prefix)
    }

    /// Rediscover scripts with caching off, wipe the remote fingerprints and
    /// reinstall libraries and every capability's fragments.
    pub fn invalidate_caches(&self) -> ControlResult<()> {
        tracing::info!("invalidating script caches");
        let fresh = discover_scripts(&self.config, false)?;
        *self.registry_mut() = fresh;
        self.bootstrap()?;
        for dir in loader::discover(&self.config.scripts.tools_dir)? {
            self.install_capability(&dir.fragment_prefix())?;
        }
        Ok(())
    }

    /// Queue `command` if a transaction is open; returns its index.
    pub fn queue_if_open(&self, command: Command) -> ControlResult<Option<usize>> {
        let mut batcher = self.batcher();
        if batcher.is_open() {
            batcher.add(command).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Compile and run a fragment (or literal text). Queued and `Nil` while a
    /// transaction is open.
    pub fn execute(&self, target: &str, params: &[Value], measured: bool) -> ControlResult<Value> {
        if self
            .queue_if_open(Command::fragment(target, params.to_vec()))?
            .is_some()
        {
            return Ok(Value::Nil);
        }
        let text = self
            .compiler
            .compile(&self.registry(), target, params, measured);
        self.run(&text, measured)
    }

    pub fn execute_raw(&self, text: &str) -> ControlResult<Value> {
        if self.queue_if_open(Command::raw(text))?.is_some() {
            return Ok(Value::Nil);
        }
        self.run(text, false)
    }

    fn run(&self, text: &str, measured: bool) -> ControlResult<Value> {
        let started = Instant::now();
        let reply = self.link.send(text)?;
        let decoded = decoder::decode(&reply, started)?;
        if measured {
            self.advance_clock(decoded.elapsed);
        }
        Ok(decoded.value)
    }

    pub fn begin_transaction(&self) {
        self.batcher().begin();
    }

    pub fn commit(&self) -> ControlResult<TransactionOutcome> {
        let mut batcher = self.batcher();
        let registry = self.registry();
        batcher.execute(&self.compiler, &registry, &self.link, false)
    }

    pub fn rollback(&self) {
        self.batcher().discard();
    }

    pub fn transaction_open(&self) -> bool {
        self.batcher().is_open()
    }

    pub fn clock(&self) -> SessionClock {
        *self.clock_guard()
    }

    pub fn advance_clock(&self, elapsed: Duration) {
        self.clock_guard().advance(elapsed);
    }

    fn record_server_tick(&self, tick: i64) {
        self.clock_guard().server_tick = Some(tick);
    }
}

fn discover_scripts(config: &SimctlConfig, caching: bool) -> ControlResult<ScriptRegistry> {
    ScriptRegistry::discover(
        &config.scripts.library_dir,
        &config.scripts.tools_dir,
        caching,
    )
}

/// Discards an open transaction unless disarmed, including on panic.
struct TransactionGuard<'a> {
    core: &'a SessionCore,
    armed: bool,
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.core.rollback();
        }
    }
}

struct Heartbeat {
    stop: mpsc::Sender<()>,
    done: mpsc::Receiver<()>,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    fn spawn(core: Arc<SessionCore>, interval: Duration) -> ControlResult<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("simctl-heartbeat".to_string())
            .spawn(move || {
                while let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(interval) {
                    match core.link().send(GAME_TICK_COMMAND) {
                        Ok(reply) => match decoder::decode_value(&reply) {
                            Ok(value) => {
                                if let Some(tick) = value.as_i64() {
                                    core.record_server_tick(tick);
                                }
                            }
                            Err(e) => tracing::debug!("heartbeat reply was an error: {}", e),
                        },
                        Err(e) => tracing::warn!("heartbeat failed: {}", e),
                    }
                }
                let _ = done_tx.send(());
            })?;
        Ok(Self {
            stop: stop_tx,
            done: done_rx,
            handle,
        })
    }

    /// Stop and join, waiting at most `timeout`.
    fn shutdown(self, timeout: Duration) {
        let _ = self.stop.send(());
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    tracing::warn!("heartbeat worker panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "heartbeat worker did not stop within {:?}, detaching it",
                    timeout
                );
            }
        }
    }
}

pub struct Session {
    core: Arc<SessionCore>,
    hooks: HookRegistry,
    namespaces: Vec<Namespace>,
    heartbeat: Option<Heartbeat>,
    /// Set once bootstrap and loading succeeded.
    ready: bool,
    closed: bool,
}

impl Session {
    /// Connect over RCON and bring the session up.
    pub fn connect(config: SimctlConfig) -> ControlResult<Self> {
        let link = RconLink::connect(&config.rcon)?;
        Self::with_link(config, Box::new(link))
    }

    /// Bring a session up over an already-open link.
    pub fn with_link(config: SimctlConfig, link: Box<dyn ConsoleLink>) -> ControlResult<Self> {
        Self::with_hooks(config, link, HookRegistry::new())
    }

    /// Like [`Session::with_link`], with hooks registered up front.
    pub fn with_hooks(
        config: SimctlConfig,
        link: Box<dyn ConsoleLink>,
        hooks: HookRegistry,
    ) -> ControlResult<Self> {
        config.validate()?;
        let agents = config.session.agents;
        let heartbeat_interval = config.session.heartbeat_interval_ms;
        let core = Arc::new(SessionCore::new(config, LinkHandle::new(link))?);

        let mut session = Self {
            core,
            hooks,
            namespaces: (0..agents).map(Namespace::new).collect(),
            heartbeat: None,
            ready: false,
            closed: false,
        };

        session.core.bootstrap()?;
        ControllerLoader::new(&session.core, &session.hooks).load(&mut session.namespaces)?;

        if heartbeat_interval > 0 {
            session.heartbeat = Some(Heartbeat::spawn(
                session.core.clone(),
                Duration::from_millis(heartbeat_interval),
            )?);
        }
        session.ready = true;
        tracing::info!("session ready with {} agents", agents);
        Ok(session)
    }

    pub fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn namespace(&self, agent_index: usize) -> ControlResult<&Namespace> {
        self.namespaces.get(agent_index).ok_or_else(|| {
            ControlError::Config(format!(
                "no agent {} (session has {})",
                agent_index,
                self.namespaces.len()
            ))
        })
    }

    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    pub fn execute(&self, target: &str, params: &[Value], measured: bool) -> ControlResult<Value> {
        self.core.execute(target, params, measured)
    }

    pub fn execute_raw(&self, text: &str) -> ControlResult<Value> {
        self.core.execute_raw(text)
    }

    /// Run `f` inside a transaction. Everything it queues is sent as one
    /// batch when it returns `Ok`; on `Err` or panic nothing is sent.
    pub fn transaction<T, F>(&self, f: F) -> ControlResult<(T, TransactionOutcome)>
    where
        F: FnOnce(&Session) -> ControlResult<T>,
    {
        self.core.begin_transaction();
        let mut guard = TransactionGuard {
            core: &self.core,
            armed: true,
        };
        let value = f(self)?;
        guard.armed = false;
        let outcome = self.core.commit()?;
        Ok((value, outcome))
    }

    pub fn begin_transaction(&self) {
        self.core.begin_transaction();
    }

    pub fn commit(&self) -> ControlResult<TransactionOutcome> {
        self.core.commit()
    }

    pub fn rollback(&self) {
        self.core.rollback();
    }

    /// Drop all caches, reinstall everything and rebind the namespaces.
    /// Hooks survive the reload.
    pub fn invalidate_and_reload(&mut self) -> ControlResult<()> {
        self.core.invalidate_caches()?;
        for namespace in &mut self.namespaces {
            namespace.clear();
        }
        ControllerLoader::new(&self.core, &self.hooks).load(&mut self.namespaces)?;
        Ok(())
    }

    /// Forget queued commands and zero the clock.
    pub fn reset(&self) {
        self.core.rollback();
        self.core.clock_guard().reset();
    }

    pub fn clock(&self) -> SessionClock {
        self.core.clock()
    }

    pub fn set_game_speed(&self, speed: f64) -> ControlResult<()> {
        if !(speed > 0.0 && speed.is_finite()) {
            return Err(ControlError::invalid_argument(
                SET_GAME_SPEED,
                format!("speed must be positive, got {}", speed),
            ));
        }
        if !self.core.registry().contains(SET_GAME_SPEED) {
            return Err(ControlError::MissingLibrary(SET_GAME_SPEED.to_string()));
        }
        self.core.execute(SET_GAME_SPEED, &[Value::Number(speed)], false)?;
        self.core.clock_guard().game_speed = speed;
        Ok(())
    }

    /// Stop workers, reset hooks, close the link. Idempotent.
    ///
    /// Bounded by `teardown_timeout_ms`: a heartbeat stuck in a request is
    /// detached and the request interrupted. Hooks of a session that never
    /// came up are left to the caller.
    pub fn close(&mut self) -> ControlResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.shutdown(Duration::from_millis(
                self.core.config().session.teardown_timeout_ms,
            ));
        }
        if self.ready {
            self.hooks.clear();
        }
        for namespace in &mut self.namespaces {
            namespace.clear();
        }
        tracing::info!("session closed");
        self.core.link().close()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("error while closing session: {}", e);
        }
    }
}
