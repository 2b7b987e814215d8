//! TransactionBatcher - queues commands and sends them as one round trip.
//!
//! State goes Idle -> Open -> Idle. `execute` and `discard` both return to
//! Idle; a batch is sent at most once and never partially.

use crate::decoder::{self, ErrorResult};
use crate::error::{ControlError, ControlResult};
use crate::link::LinkHandle;
use crate::scripts::{Command, CommandCompiler, ScriptRegistry};
use indexmap::IndexMap;
use lua_codec::Value;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchState {
    #[default]
    Idle,
    Open,
}

#[derive(Debug, Default)]
pub struct TransactionBatcher {
    state: BatchState,
    queue: Vec<Command>,
}

impl TransactionBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == BatchState::Open
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Open a batch. Leftovers from an earlier batch are dropped.
    pub fn begin(&mut self) {
        if !self.queue.is_empty() {
            tracing::debug!("dropping {} stale queued commands", self.queue.len());
        }
        self.queue.clear();
        self.state = BatchState::Open;
    }

    /// Queue a command; returns its submission index.
    pub fn add(&mut self, command: Command) -> ControlResult<usize> {
        if !self.is_open() {
            return Err(ControlError::TransactionState(
                "add() called with no open transaction".to_string(),
            ));
        }
        self.queue.push(command);
        Ok(self.queue.len() - 1)
    }

    /// Drop the queue without sending anything.
    pub fn discard(&mut self) {
        if self.is_open() {
            tracing::debug!("discarding transaction of {} commands", self.queue.len());
        }
        self.queue.clear();
        self.state = BatchState::Idle;
    }

    /// Send every queued command as one batch and decode the replies.
    ///
    /// The batcher is back to Idle afterwards whether or not sending worked.
    pub fn execute(
        &mut self,
        compiler: &CommandCompiler,
        registry: &ScriptRegistry,
        link: &LinkHandle,
        measured: bool,
    ) -> ControlResult<TransactionOutcome> {
        if !self.is_open() {
            return Err(ControlError::TransactionState(
                "execute() called with no open transaction".to_string(),
            ));
        }
        let queue = std::mem::take(&mut self.queue);
        self.state = BatchState::Idle;

        if queue.is_empty() {
            return Ok(TransactionOutcome::default());
        }

        let batch: IndexMap<String, String> = queue
            .iter()
            .enumerate()
            .map(|(i, command)| {
                (
                    command.tag(i),
                    compiler.compile_command(registry, command, measured),
                )
            })
            .collect();

        tracing::debug!("executing transaction of {} commands", batch.len());
        let started = Instant::now();
        let mut replies = link.send_batch(&batch)?;

        let mut results = IndexMap::with_capacity(batch.len());
        for tag in batch.keys() {
            let reply = replies.shift_remove(tag).ok_or_else(|| {
                ControlError::Transport(format!("no reply for transaction entry `{}`", tag))
            })?;
            let result = decoder::decode(&reply, started).map(|d| d.value);
            results.insert(tag.clone(), result);
        }
        Ok(TransactionOutcome { results })
    }
}

/// Decoded results of one executed batch, in submission order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionOutcome {
    results: IndexMap<String, Result<Value, ErrorResult>>,
}

impl TransactionOutcome {
    /// Result of the command submitted at `index`.
    pub fn result(&self, index: usize) -> Option<&Result<Value, ErrorResult>> {
        self.results.get_index(index).map(|(_, r)| r)
    }

    /// Lookup by exact tag (`"{index}_{target}"`).
    pub fn by_tag(&self, tag: &str) -> Option<&Result<Value, ErrorResult>> {
        self.results.get(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.results.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Result<Value, ErrorResult>)> {
        self.results.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// First remote error, if any command failed.
    pub fn first_error(&self) -> Option<&ErrorResult> {
        self.results.values().find_map(|r| r.as_ref().err())
    }

    pub fn into_results(self) -> Vec<Result<Value, ErrorResult>> {
        self.results.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::ConsoleLink;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    /// Replies with the command text, or an error envelope for `/sc fail`.
    struct EchoLink {
        batches: Arc<Mutex<Vec<IndexMap<String, String>>>>,
    }

    impl ConsoleLink for EchoLink {
        fn send(&mut self, command: &str) -> ControlResult<String> {
            Ok(command.to_string())
        }

        fn send_batch(
            &mut self,
            commands: &IndexMap<String, String>,
        ) -> ControlResult<IndexMap<String, String>> {
            self.batches.lock().unwrap().push(commands.clone());
            Ok(commands
                .iter()
                .map(|(tag, cmd)| {
                    let reply = if cmd == "/sc fail" {
                        r#"{a = false, b = "boom"}"#.to_string()
                    } else {
                        format!("\"{}\"", cmd)
                    };
                    (tag.clone(), reply)
                })
                .collect())
        }
    }

    fn echo() -> (LinkHandle, Arc<Mutex<Vec<IndexMap<String, String>>>>) {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let link = LinkHandle::new(Box::new(EchoLink {
            batches: batches.clone(),
        }));
        (link, batches)
    }

    #[test]
    fn test_add_requires_open_batch() {
        let mut batcher = TransactionBatcher::new();
        assert!(matches!(
            batcher.add(Command::raw("/sc x")),
            Err(ControlError::TransactionState(_))
        ));
    }

    #[test]
    fn test_execute_sends_one_batch_in_order() {
        let (link, batches) = echo();
        let mut batcher = TransactionBatcher::new();
        batcher.begin();
        batcher.add(Command::raw("/sc a")).unwrap();
        batcher.add(Command::raw("/sc fail")).unwrap();
        batcher.add(Command::raw("/sc c")).unwrap();

        let outcome = batcher
            .execute(&CommandCompiler::new(), &ScriptRegistry::new(true), &link, false)
            .unwrap();
        assert_eq!(batches.lock().unwrap().len(), 1);
        assert_eq!(outcome.result(0), Some(&Ok(Value::from("/sc a"))));
        assert_eq!(outcome.result(1).unwrap().as_ref().unwrap_err().message, "boom");
        assert_eq!(outcome.by_tag("2_/sc c"), Some(&Ok(Value::from("/sc c"))));
        assert_eq!(batcher.state(), BatchState::Idle);
        assert!(batcher.is_empty());
    }

    #[test]
    fn test_discard_sends_nothing() {
        let (link, batches) = echo();
        let mut batcher = TransactionBatcher::new();
        batcher.begin();
        batcher.add(Command::raw("/sc a")).unwrap();
        batcher.discard();
        assert!(batches.lock().unwrap().is_empty());
        assert!(batcher
            .execute(&CommandCompiler::new(), &ScriptRegistry::new(true), &link, false)
            .is_err());
        assert!(batches.lock().unwrap().is_empty());
    }

    #[test]
    fn test_begin_clears_stale_commands() {
        let mut batcher = TransactionBatcher::new();
        batcher.begin();
        batcher.add(Command::raw("/sc a")).unwrap();
        batcher.begin();
        assert_eq!(batcher.len(), 0);
        assert_eq!(batcher.add(Command::raw("/sc b")).unwrap(), 0);
    }
}
