//! 渲染线程: Dedicated thread that serializes GPU command submission.
//!
//! Commands are boxed closures run against a context `C` owned by the thread,
//! strictly in the order they were enqueued.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::error::LabelError;

pub type RenderCommand<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;

enum Message<C> {
    Run {
        name: &'static str,
        command: RenderCommand<C>,
    },
    Fence(Sender<()>),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct RenderThreadConfig {
    pub name: String,
    /// `None` for an unbounded queue. A bounded queue makes `enqueue` block
    /// while it is full.
    pub queue_capacity: Option<usize>,
}

impl Default for RenderThreadConfig {
    fn default() -> Self {
        Self {
            name: "label-render".to_string(),
            queue_capacity: None,
        }
    }
}

impl RenderThreadConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }
}

#[derive(Debug, Default)]
pub struct QueueCounters {
    enqueued: AtomicU64,
    executed: AtomicU64,
    panicked: AtomicU64,
}

impl QueueCounters {
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Acquire)
    }

    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Acquire)
    }

    pub fn panicked(&self) -> u64 {
        self.panicked.load(Ordering::Acquire)
    }
}

pub struct RenderThread<C: Send + 'static> {
    sender: Sender<Message<C>>,
    handle: Option<JoinHandle<()>>,
    counters: Arc<QueueCounters>,
}

impl<C: Send + 'static> RenderThread<C> {
    pub fn spawn(config: RenderThreadConfig, context: C) -> Result<Self, LabelError> {
        let (sender, receiver) = match config.queue_capacity {
            Some(capacity) => crossbeam_channel::bounded(capacity),
            None => crossbeam_channel::unbounded(),
        };
        let counters = Arc::new(QueueCounters::default());
        let thread_counters = counters.clone();
        let handle = std::thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || run(receiver, context, &thread_counters))?;
        log::debug!("render thread '{}' started", config.name);
        Ok(Self {
            sender,
            handle: Some(handle),
            counters,
        })
    }

    /// Hands `command` to the render thread. Never waits for it to run.
    pub fn enqueue<F>(&self, name: &'static str, command: F) -> Result<(), LabelError>
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.sender
            .send(Message::Run {
                name,
                command: Box::new(command),
            })
            .map_err(|_| LabelError::RenderThreadClosed)?;
        self.counters.enqueued.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Blocks until every command enqueued before this call has run.
    ///
    /// Calling this from inside a render command deadlocks.
    pub fn flush(&self) -> Result<(), LabelError> {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        self.sender
            .send(Message::Fence(done_tx))
            .map_err(|_| LabelError::RenderThreadClosed)?;
        done_rx.recv().map_err(|_| LabelError::RenderThreadClosed)
    }

    pub fn counters(&self) -> &QueueCounters {
        &self.counters
    }
}

impl<C: Send + 'static> Drop for RenderThread<C> {
    fn drop(&mut self) {
        let _ = self.sender.send(Message::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("render thread terminated abnormally");
            }
        }
    }
}

fn run<C>(receiver: Receiver<Message<C>>, mut context: C, counters: &QueueCounters) {
    while let Ok(message) = receiver.recv() {
        match message {
            Message::Run { name, command } => {
                let result = panic::catch_unwind(AssertUnwindSafe(|| command(&mut context)));
                if result.is_err() {
                    counters.panicked.fetch_add(1, Ordering::AcqRel);
                    log::error!("render command '{name}' panicked");
                }
                counters.executed.fetch_add(1, Ordering::AcqRel);
            }
            Message::Fence(done) => {
                let _ = done.send(());
            }
            Message::Shutdown => break,
        }
    }
    log::debug!("render thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_commands_run_in_fifo_order() {
        let thread = RenderThread::spawn(RenderThreadConfig::default(), Vec::<u32>::new()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100 {
            thread
                .enqueue("push", move |ctx: &mut Vec<u32>| ctx.push(i))
                .unwrap();
        }
        let sink = seen.clone();
        thread
            .enqueue("collect", move |ctx: &mut Vec<u32>| {
                sink.lock().unwrap().extend(ctx.drain(..));
            })
            .unwrap();
        thread.flush().unwrap();

        assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
        assert_eq!(thread.counters().enqueued(), 101);
        assert_eq!(thread.counters().executed(), 101);
    }

    #[test]
    fn test_commands_from_many_threads() {
        let thread = Arc::new(
            RenderThread::spawn(
                RenderThreadConfig::default().with_queue_capacity(4),
                0u64,
            )
            .unwrap(),
        );
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let thread = thread.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        thread.enqueue("add", |ctx: &mut u64| *ctx += 1).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let (tx, rx) = crossbeam_channel::bounded(1);
        thread
            .enqueue("read", move |ctx: &mut u64| tx.send(*ctx).unwrap())
            .unwrap();
        assert_eq!(rx.recv().unwrap(), 200);
    }

    #[test]
    fn test_panicking_command_does_not_stop_thread() {
        let thread = RenderThread::spawn(RenderThreadConfig::default(), ()).unwrap();
        thread.enqueue("boom", |_| panic!("boom")).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        thread.enqueue("after", move |_| tx.send(7).unwrap()).unwrap();
        assert_eq!(rx.recv().unwrap(), 7);
        assert_eq!(thread.counters().panicked(), 1);
    }

    #[test]
    fn test_drop_drains_pending_commands() {
        let ran = Arc::new(AtomicU64::new(0));
        {
            let thread = RenderThread::spawn(RenderThreadConfig::default(), ()).unwrap();
            for _ in 0..10 {
                let ran = ran.clone();
                thread
                    .enqueue("count", move |_| {
                        ran.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
            }
        }
        assert_eq!(ran.load(Ordering::SeqCst), 10);
    }
}
