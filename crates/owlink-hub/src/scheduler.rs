use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{HubError, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handle for cancelling a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug, PartialEq, Eq)]
struct Deadline {
    at: Instant,
    id: u64,
}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max heap; earliest deadline first, then lowest id.
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

#[derive(Default)]
struct Queue {
    deadlines: BinaryHeap<Deadline>,
    tasks: HashMap<u64, Task>,
    next_id: u64,
    stopped: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One timer thread running cancellable one-shot tasks.
///
/// Tasks run on the timer thread and must not block for long.
pub struct Scheduler {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Start the timer thread.
    pub fn new() -> Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            wake: Condvar::new(),
        });
        let worker = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("owlink-timer".to_string())
            .spawn(move || run(&worker))
            .map_err(|source| HubError::Spawn {
                name: "timer",
                source,
            })?;
        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Run `task` once after `delay`.
    ///
    /// After shutdown the task is dropped without running.
    pub fn schedule(&self, delay: Duration, task: impl FnOnce() + Send + 'static) -> TimerId {
        let mut queue = self.shared.lock();
        let id = queue.next_id;
        queue.next_id += 1;
        if !queue.stopped {
            queue.deadlines.push(Deadline {
                at: Instant::now() + delay,
                id,
            });
            queue.tasks.insert(id, Box::new(task));
            self.shared.wake.notify_one();
        }
        TimerId(id)
    }

    /// Cancel a task that has not run yet. Returns false if it already ran.
    pub fn cancel(&self, timer: TimerId) -> bool {
        self.shared.lock().tasks.remove(&timer.0).is_some()
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.shared.lock().tasks.len()
    }

    /// Stop the timer thread, dropping tasks that have not run.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.lock();
            queue.stopped = true;
            queue.tasks.clear();
            queue.deadlines.clear();
        }
        self.shared.wake.notify_all();

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            // A task may itself trigger shutdown; never join our own thread.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: &Shared) {
    let mut queue = shared.lock();
    loop {
        if queue.stopped {
            break;
        }

        let now = Instant::now();
        let next = queue.deadlines.peek().map(|deadline| (deadline.at, deadline.id));
        match next {
            None => {
                queue = shared
                    .wake
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Some((_, id)) if !queue.tasks.contains_key(&id) => {
                queue.deadlines.pop();
            }
            Some((at, id)) if at <= now => {
                queue.deadlines.pop();
                if let Some(task) = queue.tasks.remove(&id) {
                    drop(queue);
                    task();
                    queue = shared.lock();
                }
            }
            Some((at, _)) => {
                queue = shared
                    .wake
                    .wait_timeout(queue, at - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        }
    }
    debug!("timer thread stopped");
}
