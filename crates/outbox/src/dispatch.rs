//! Running work off the caller's path

use anyhow::{Context, Result};

/// A unit of detached work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks without making the caller wait for them
pub trait Dispatcher: Send + Sync {
    /// Hand off `task`; `name` identifies it in logs and thread names
    ///
    /// An error means the task was dropped without running.
    fn dispatch(&self, name: &str, task: Task) -> Result<()>;
}

/// Spawns a named OS thread per task
///
/// There is no cap on concurrent tasks. Sends block on network IO, so a
/// thread each keeps one slow mailbox from holding up the rest.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadDispatcher;

impl Dispatcher for ThreadDispatcher {
    fn dispatch(&self, name: &str, task: Task) -> Result<()> {
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(task)
            .with_context(|| format!("Failed to spawn {}", name))?;
        Ok(())
    }
}

/// Runs each task immediately on the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, _name: &str, task: Task) -> Result<()> {
        task();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn test_inline_runs_before_returning() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        InlineDispatcher.dispatch("inline", Box::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_thread_dispatcher_names_threads() {
        let (tx, rx) = mpsc::channel();
        ThreadDispatcher.dispatch("outbox-send-7", Box::new(move || {
            let name = std::thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        }))
        .unwrap();
        let name = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("outbox-send-7"));
    }
}
