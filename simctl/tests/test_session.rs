mod common;

use common::{shipped_config, FakeServer};
use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use simctl::link::Interrupt;
use simctl::{ConsoleLink, ControlError, ControlResult, Session, SimctlConfig};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const GAME_TICK: &str = "/sc rcon.print(game.tick)";

type Gate = Arc<(Mutex<bool>, Condvar)>;

/// Answers like the fake server, except that tick reads hang until the gate
/// opens or `stall` passes.
struct StallingLink {
    inner: Box<dyn ConsoleLink>,
    gate: Gate,
    stall: Duration,
    entered: mpsc::Sender<()>,
    interruptible: bool,
}

impl ConsoleLink for StallingLink {
    fn send(&mut self, command: &str) -> ControlResult<String> {
        if command != GAME_TICK {
            return self.inner.send(command);
        }
        let _ = self.entered.send(());
        let (lock, cvar) = &*self.gate;
        let open = lock.lock().unwrap();
        let (open, _) = cvar
            .wait_timeout_while(open, self.stall, |open| !*open)
            .unwrap();
        if *open {
            Err(ControlError::Transport("interrupted".to_string()))
        } else {
            Ok("1000".to_string())
        }
    }

    fn send_batch(
        &mut self,
        commands: &IndexMap<String, String>,
    ) -> ControlResult<IndexMap<String, String>> {
        self.inner.send_batch(commands)
    }

    fn close(&mut self) -> ControlResult<()> {
        self.inner.close()
    }

    fn interrupt_handle(&self) -> Option<Interrupt> {
        if !self.interruptible {
            return None;
        }
        let gate = self.gate.clone();
        Some(Arc::new(move || {
            let (lock, cvar) = &*gate;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }))
    }
}

fn heartbeat_config(interval_ms: u64, teardown_ms: u64) -> SimctlConfig {
    let mut config = shipped_config(1);
    config.session.heartbeat_interval_ms = interval_ms;
    config.session.teardown_timeout_ms = teardown_ms;
    config
}

fn stalled_session(interruptible: bool) -> (Session, Gate, mpsc::Receiver<()>) {
    let gate: Gate = Arc::new((Mutex::new(false), Condvar::new()));
    let (entered_tx, entered_rx) = mpsc::channel();
    let link = StallingLink {
        inner: FakeServer::new().link(),
        gate: gate.clone(),
        stall: Duration::from_secs(3),
        entered: entered_tx,
        interruptible,
    };
    let session = Session::with_link(heartbeat_config(10, 100), Box::new(link)).unwrap();
    (session, gate, entered_rx)
}

#[test]
fn test_heartbeat_records_server_tick_and_stops() {
    let server = FakeServer::new();
    let mut session = Session::with_link(heartbeat_config(10, 2_000), server.link()).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while session.clock().server_tick.is_none() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(session.clock().server_tick, Some(1000));

    let started = Instant::now();
    session.close().unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(server.is_closed());

    // No tick reads after close
    let sent = server.sent().len();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(server.sent().len(), sent);
}

#[test]
fn test_close_interrupts_stuck_heartbeat() {
    let (mut session, gate, entered) = stalled_session(true);
    entered.recv_timeout(Duration::from_secs(5)).unwrap();

    let started = Instant::now();
    session.close().unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(*gate.0.lock().unwrap());
}

#[test]
fn test_close_is_bounded_without_interrupt() {
    let (mut session, gate, entered) = stalled_session(false);
    entered.recv_timeout(Duration::from_secs(5)).unwrap();

    let started = Instant::now();
    session.close().unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!*gate.0.lock().unwrap());
}
