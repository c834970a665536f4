// Webmap is an open source distributed web crawler.
// Copyright (C) 2024 Webmap
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! A fixed-size thread pool with a FIFO task queue and a small futures
//! interface.
//!
//! Workers block on the shared queue and run tasks to completion; results
//! travel back through single-use channels as [`TaskHandle`]s. Handles
//! complete in task-completion order, which is not generally submission
//! order — only [`ThreadPool::transform`] guarantees that the i-th handle
//! belongs to the i-th input element.
//!
//! [`join`](ThreadPool::join) is idempotent: workers drain whatever is still
//! queued and exit. Tasks spawned after `join` are dropped.

use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

type Task = Box<dyn FnOnce() + Send + 'static>;

pub struct ThreadPool {
    queue: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(threads: usize) -> Self {
        assert!(threads > 0, "a thread pool needs at least one worker");

        let (queue, tasks) = crossbeam_channel::unbounded::<Task>();

        let workers = (0..threads)
            .map(|_| {
                let tasks: Receiver<Task> = tasks.clone();
                std::thread::spawn(move || {
                    while let Ok(task) = tasks.recv() {
                        task();
                    }
                })
            })
            .collect();

        Self {
            queue: Some(queue),
            workers,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Enqueues a task. Exactly one sleeping worker wakes up for it.
    pub fn spawn(&self, task: impl FnOnce() + Send + 'static) {
        if let Some(queue) = &self.queue {
            queue.send(Box::new(task)).ok();
        }
    }

    /// Enqueues a task and returns a handle that completes with its result.
    pub fn spawn_with_future<F, R>(&self, task: F) -> TaskHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (result_tx, result_rx) = crossbeam_channel::bounded(1);

        self.spawn(move || {
            result_tx.send(task()).ok();
        });

        TaskHandle { result: result_rx }
    }

    /// Applies `task` to every element in parallel. The i-th handle of the
    /// returned vector corresponds to the i-th input element.
    pub fn transform<I, F, R>(&self, items: I, task: F) -> Vec<TaskHandle<R>>
    where
        I: IntoIterator,
        I::Item: Send + 'static,
        F: Fn(I::Item) -> R + Send + Sync + 'static,
        R: Send + 'static,
    {
        let task = Arc::new(task);

        items
            .into_iter()
            .map(|item| {
                let task = Arc::clone(&task);
                self.spawn_with_future(move || task(item))
            })
            .collect()
    }

    /// Like [`transform`](Self::transform) but awaits every task before
    /// returning. The closure must not produce a value.
    pub fn for_each<I, F>(&self, items: I, task: F)
    where
        I: IntoIterator,
        I::Item: Send + 'static,
        F: Fn(I::Item) + Send + Sync + 'static,
    {
        for handle in self.transform(items, task) {
            handle.wait();
        }
    }

    /// Shuts the pool down: workers finish the queued tasks and exit, then
    /// their threads are joined. Safe to call more than once.
    pub fn join(&mut self) {
        self.queue.take();

        for worker in self.workers.drain(..) {
            worker.join().expect("pool worker panicked");
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.join();
    }
}

/// Completion handle for a task spawned with a future. Dropping it detaches
/// the task; it still runs.
pub struct TaskHandle<R> {
    result: Receiver<R>,
}

impl<R> TaskHandle<R> {
    /// Blocks until the task finishes and returns its result.
    pub fn wait(self) -> R {
        self.result.recv().expect("pool task panicked")
    }
}

static GLOBAL: OnceLock<ThreadPool> = OnceLock::new();

/// The process-wide pool, sized to the machine. First use initialises it;
/// it lives until process exit.
pub fn global() -> &'static ThreadPool {
    GLOBAL.get_or_init(|| ThreadPool::new(num_cpus::get()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[test]
    fn tasks_run_to_completion() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..64 {
            let counter = Arc::clone(&counter);
            pool.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn futures_deliver_results() {
        let pool = ThreadPool::new(2);

        let handle = pool.spawn_with_future(|| 21 * 2);
        assert_eq!(handle.wait(), 42);
    }

    #[test]
    fn single_worker_runs_tasks_in_fifo_order() {
        let pool = ThreadPool::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let order = Arc::clone(&order);
                pool.spawn_with_future(move || order.lock().unwrap().push(i))
            })
            .collect();

        for handle in handles {
            handle.wait();
        }

        assert_eq!(*order.lock().unwrap(), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn transform_preserves_element_order() {
        let pool = ThreadPool::new(4);

        let handles = pool.transform(0..32, |i| {
            // make late elements finish first
            std::thread::sleep(Duration::from_millis(32 - i as u64));
            i * i
        });

        let results: Vec<_> = handles.into_iter().map(TaskHandle::wait).collect();
        assert_eq!(results, (0..32).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn for_each_awaits_every_task() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&counter);
        pool.for_each(0..100, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn join_drains_the_queue_and_is_idempotent() {
        let mut pool = ThreadPool::new(1);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            pool.spawn(move || {
                std::thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.join();
        assert_eq!(counter.load(Ordering::SeqCst), 8);

        pool.join();

        // spawning after join drops the task
        let counter = Arc::clone(&counter);
        pool.spawn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }

    #[test]
    fn global_pool_is_shared() {
        assert!(std::ptr::eq(global(), global()));
        assert!(global().size() > 0);
    }
}
