//! RemoteConsoleLink - the text request/response channel to the server.
//!
//! Only one request may be in flight per connection, so every link is
//! reached through a [`LinkHandle`] that serializes access.

use crate::error::{ControlError, ControlResult};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex, TryLockError};

pub mod rcon;

pub use rcon::RconLink;

/// Aborts whatever request a link is blocked in, without taking its lock.
pub type Interrupt = Arc<dyn Fn() + Send + Sync>;

/// A blocking console connection.
///
/// `send_batch` takes an ordered map so the wire order matches submission
/// order; implementations must return one reply per tag.
pub trait ConsoleLink: Send {
    fn send(&mut self, command: &str) -> ControlResult<String>;

    fn send_batch(
        &mut self,
        commands: &IndexMap<String, String>,
    ) -> ControlResult<IndexMap<String, String>>;

    fn close(&mut self) -> ControlResult<()> {
        Ok(())
    }

    /// Links whose requests can block for long should hand out a way to
    /// break them off, e.g. by shutting the socket down.
    fn interrupt_handle(&self) -> Option<Interrupt> {
        None
    }
}

/// Shared, serialized access to a [`ConsoleLink`].
#[derive(Clone)]
pub struct LinkHandle {
    inner: Arc<Mutex<Box<dyn ConsoleLink>>>,
    interrupt: Option<Interrupt>,
}

impl LinkHandle {
    pub fn new(link: Box<dyn ConsoleLink>) -> Self {
        let interrupt = link.interrupt_handle();
        Self {
            inner: Arc::new(Mutex::new(link)),
            interrupt,
        }
    }

    pub fn send(&self, command: &str) -> ControlResult<String> {
        tracing::trace!(command = %command, "console send");
        let mut link = self.lock()?;
        let reply = link.send(command)?;
        tracing::trace!(reply = %reply, "console reply");
        Ok(reply)
    }

    pub fn send_batch(
        &self,
        commands: &IndexMap<String, String>,
    ) -> ControlResult<IndexMap<String, String>> {
        tracing::trace!(count = commands.len(), "console batch");
        let mut link = self.lock()?;
        link.send_batch(commands)
    }

    /// Close the link without waiting on a request in flight.
    ///
    /// When another thread holds the link, its request is interrupted if the
    /// link supports it; the link itself is closed when the last handle drops.
    pub fn close(&self) -> ControlResult<()> {
        match self.inner.try_lock() {
            Ok(mut link) => link.close(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().close(),
            Err(TryLockError::WouldBlock) => {
                match &self.interrupt {
                    Some(interrupt) => {
                        tracing::warn!("console link busy, interrupting the request in flight");
                        interrupt();
                    }
                    None => tracing::warn!("console link busy, it closes once released"),
                }
                Ok(())
            }
        }
    }

    fn lock(&self) -> ControlResult<std::sync::MutexGuard<'_, Box<dyn ConsoleLink>>> {
        self.inner
            .lock()
            .map_err(|_| ControlError::Transport("console link lock poisoned".to_string()))
    }
}

impl std::fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkHandle").finish_non_exhaustive()
    }
}
