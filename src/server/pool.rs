//! Event-loop pool.
//!
//! A fixed set of OS threads, each driving its own current-thread tokio
//! runtime. The server hands every accepted socket to one of them, round
//! robin, and the connection stays on that thread for its whole life.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use tokio::runtime::{Builder, Handle};
use tokio::sync::watch;

use crate::error::{RpcError, Result};

struct Worker {
    handle: Handle,
    thread: Option<thread::JoinHandle<()>>,
}

/// Pool of single-threaded runtimes.
pub struct IoPool {
    workers: Vec<Worker>,
    next: AtomicUsize,
    shutdown: watch::Sender<bool>,
}

impl IoPool {
    /// Start `size` runtime threads.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for a zero size, `Io` if a runtime or thread cannot
    /// be created.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(RpcError::InvalidConfig(
                "pool size must be at least 1".into(),
            ));
        }

        let (shutdown, _) = watch::channel(false);
        let mut pool = Self {
            workers: Vec::with_capacity(size),
            next: AtomicUsize::new(0),
            shutdown,
        };

        for index in 0..size {
            let runtime = Builder::new_current_thread().enable_all().build()?;
            let handle = runtime.handle().clone();
            let mut stop = pool.shutdown.subscribe();

            // On failure `pool` is dropped, which stops the threads already
            // started.
            let thread = thread::Builder::new()
                .name(format!("wirecall-io-{}", index))
                .spawn(move || {
                    runtime.block_on(async move {
                        let _ = stop.wait_for(|stop| *stop).await;
                    });
                })?;

            pool.workers.push(Worker {
                handle,
                thread: Some(thread),
            });
        }

        tracing::debug!("Started I/O pool with {} thread(s)", size);
        Ok(pool)
    }

    /// Next runtime in round-robin order.
    pub fn acquire(&self) -> Handle {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.workers[index].handle.clone()
    }

    /// Number of runtimes.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stop every runtime and join its thread.
    ///
    /// Tasks still running on a runtime are dropped. Blocks the calling
    /// thread until the runtimes have exited.
    pub fn shutdown(&mut self) {
        self.shutdown.send_replace(true);

        let current = thread::current().id();
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                // Joining our own thread would never return.
                if thread.thread().id() == current {
                    continue;
                }
                if thread.join().is_err() {
                    tracing::warn!("I/O thread panicked during shutdown");
                }
            }
        }
    }
}

impl Drop for IoPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
