//! The request scheduler.
//!
//! One instance runs in exactly one of two modes. Cooperative mode drives
//! every in-flight request on the scheduler thread itself, advancing each
//! driver by one bounded step per pass. Sync mode spawns one detached OS
//! thread per admitted request and lets the driver retry transient errors
//! with bounded sleeps.
//!
//! Requests wait in a priority queue (ties broken by submission order)
//! until a concurrency slot frees up; `OutOfQueue` requests are admitted
//! immediately, above the cap. Lock order, where several are held:
//! pending, then active, then failed.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{info, warn};
use slab::Slab;

use crate::cfg;
use crate::error::{Error, RequestError};
use crate::request::{Priority, Request, Status};
use crate::scheduler::driver::{Driver, Step};
use crate::scheduler::sync;

/// Processing mode of a scheduler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Single-threaded cooperative round-robin over nonblocking drivers.
    Cooperative,
    /// One detached OS thread per request with bounded retry sleeps.
    Sync,
}

/// Control messages flowing into the run loop.
pub(crate) enum Command {
    /// Something changed; wake up the loop if it is idling.
    Wake,
    /// Give the driver of this request a step, reinjecting it if parked.
    Resume(String),
    /// A sync-mode request thread returned.
    SyncDone(String),
}

struct Queued {
    request: Arc<Request>,
    priority: Priority,
    seq: u64,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Highest priority first; equal priorities keep submission order.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Bounded-concurrency processor of submitted requests.
///
/// Lifecycle: construct, call [`Scheduler::run`] on a dedicated thread,
/// submit requests, then [`Scheduler::stop`]. Exit callbacks registered
/// with [`Scheduler::notify_when_exit`] fire, in registration order, right
/// before `run` returns.
pub struct Scheduler {
    mode: Mode,
    cmd_tx: Sender<Command>,
    cmd_rx: Receiver<Command>,
    pending: Mutex<BinaryHeap<Queued>>,
    active: Mutex<Vec<Arc<Request>>>,
    failed: Mutex<Vec<Arc<Request>>>,
    exit_callbacks: Mutex<Vec<Box<dyn Fn() + Send>>>,
    active_limit: AtomicUsize,
    seq: AtomicU64,
    working: AtomicBool,
    paused: AtomicBool,
}

impl Scheduler {
    pub fn new(mode: Mode) -> Scheduler {
        let (cmd_tx, cmd_rx) = unbounded();
        Scheduler {
            mode,
            cmd_tx,
            cmd_rx,
            pending: Mutex::new(BinaryHeap::new()),
            active: Mutex::new(Vec::new()),
            failed: Mutex::new(Vec::new()),
            exit_callbacks: Mutex::new(Vec::new()),
            active_limit: AtomicUsize::new(cfg::DEFAULT_ACTIVE_LIMIT),
            seq: AtomicU64::new(0),
            working: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Caps how many requests are processed simultaneously.
    pub fn set_active_requests_limit(&self, limit: usize) {
        self.active_limit.store(limit.max(1), Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.working.load(Ordering::SeqCst)
    }

    /// Stops issuing driver steps without touching queued or in-flight
    /// requests.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Resumes issuing driver steps.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        let _ = self.cmd_tx.send(Command::Wake);
    }

    /// Makes the run loop return after its current pass.
    pub fn stop(&self) {
        self.working.store(false, Ordering::SeqCst);
        let _ = self.cmd_tx.send(Command::Wake);
    }

    /// Registers a callback fired when the run loop exits.
    pub fn notify_when_exit<F>(&self, callback: F)
    where
        F: Fn() + Send + 'static,
    {
        self.exit_callbacks
            .lock()
            .unwrap()
            .push(Box::new(callback));
    }

    /// Submits a request. On a stopped scheduler the request is marked
    /// failed with [`RequestError::SchedulerNotRunning`].
    pub fn add_request(&self, request: Arc<Request>) {
        if !self.working.load(Ordering::SeqCst) {
            warn!(
                "request {} submitted to a scheduler that is not running",
                request.uuid()
            );
            request.set_error(RequestError::SchedulerNotRunning.into());
            return;
        }
        if !request.mark_submitted() {
            warn!("request {} was already submitted", request.uuid());
            return;
        }
        if request.status().is_terminal() {
            // Submission preparation failed, e.g. a missing output
            // directory.
            self.failed.lock().unwrap().push(request);
            return;
        }
        request.attach_scheduler(self.cmd_tx.clone());
        let priority = request.priority();
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().unwrap().push(Queued {
            request,
            priority,
            seq,
        });
        let _ = self.cmd_tx.send(Command::Wake);
    }

    /// Requests currently being processed.
    pub fn active_requests(&self) -> Vec<Arc<Request>> {
        self.active.lock().unwrap().clone()
    }

    /// Requests that terminated with an error, retained for inspection.
    pub fn failed_requests(&self) -> Vec<Arc<Request>> {
        self.failed.lock().unwrap().clone()
    }

    /// The blocking run loop. Returns
    /// [`RequestError::SchedulerLaunchedTwice`] when the scheduler is
    /// already running.
    pub fn run(&self) -> Result<(), Error> {
        if self.working.swap(true, Ordering::SeqCst) {
            return Err(RequestError::SchedulerLaunchedTwice.into());
        }
        info!("scheduler started in {:?} mode", self.mode);
        match self.mode {
            Mode::Cooperative => self.run_cooperative(),
            Mode::Sync => self.run_sync(),
        }
        for callback in self.exit_callbacks.lock().unwrap().iter() {
            callback();
        }
        info!("scheduler stopped");
        Ok(())
    }

    fn run_cooperative(&self) {
        let mut tasks: Slab<Driver> = Slab::new();
        let mut parked: HashMap<String, Driver> = HashMap::new();
        let mut resumed: VecDeque<Driver> = VecDeque::new();

        while self.working.load(Ordering::SeqCst) {
            while let Ok(command) = self.cmd_rx.try_recv() {
                handle_cooperative_command(command, &mut parked, &mut resumed);
            }
            if self.paused.load(Ordering::SeqCst) {
                if let Ok(command) = self.cmd_rx.recv_timeout(cfg::SCHEDULER_TICK) {
                    handle_cooperative_command(command, &mut parked, &mut resumed);
                }
                continue;
            }

            // Admission: resumed tasks first, then the pending queue.
            let limit = self.active_limit.load(Ordering::SeqCst);
            while tasks.len() < limit {
                let Some(driver) = resumed.pop_front() else {
                    break;
                };
                self.active.lock().unwrap().push(driver.request().clone());
                tasks.insert(driver);
            }
            loop {
                let mut pending = self.pending.lock().unwrap();
                let admit = match pending.peek() {
                    Some(next) => tasks.len() < limit || next.priority == Priority::OutOfQueue,
                    None => false,
                };
                if !admit {
                    break;
                }
                let Some(queued) = pending.pop() else {
                    break;
                };
                drop(pending);
                self.active.lock().unwrap().push(queued.request.clone());
                tasks.insert(Driver::new(queued.request, cfg::COOP_FRAME_MAX));
            }

            if tasks.is_empty() {
                match self.cmd_rx.recv_timeout(cfg::SCHEDULER_TICK) {
                    Ok(command) => {
                        handle_cooperative_command(command, &mut parked, &mut resumed)
                    }
                    Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
                }
                continue;
            }

            // One round-robin pass, one bounded step per task.
            let mut progressed = false;
            let keys: Vec<usize> = tasks.iter().map(|(key, _)| key).collect();
            for key in keys {
                match tasks[key].step() {
                    Step::Progress => progressed = true,
                    Step::Idle => {}
                    Step::Paused => {
                        let driver = tasks.remove(key);
                        let request = driver.request().clone();
                        self.untrack(&request);
                        parked.insert(request.uuid().to_owned(), driver);
                        progressed = true;
                    }
                    Step::Finished => {
                        let driver = tasks.remove(key);
                        let request = driver.request().clone();
                        self.untrack(&request);
                        if request.status() == Status::Error {
                            self.failed.lock().unwrap().push(request);
                        }
                        progressed = true;
                    }
                }
            }
            if !progressed {
                thread::sleep(cfg::IDLE_PASS_TICK);
            }
        }
    }

    fn run_sync(&self) {
        let mut running: HashMap<String, Arc<Request>> = HashMap::new();

        while self.working.load(Ordering::SeqCst) {
            while let Ok(command) = self.cmd_rx.try_recv() {
                self.handle_sync_command(command, &mut running);
            }
            if !self.paused.load(Ordering::SeqCst) {
                let limit = self.active_limit.load(Ordering::SeqCst);
                loop {
                    let mut pending = self.pending.lock().unwrap();
                    let admit = match pending.peek() {
                        Some(next) => {
                            running.len() < limit || next.priority == Priority::OutOfQueue
                        }
                        None => false,
                    };
                    if !admit {
                        break;
                    }
                    let Some(queued) = pending.pop() else {
                        break;
                    };
                    drop(pending);
                    let request = queued.request;
                    running.insert(request.uuid().to_owned(), request.clone());
                    self.active.lock().unwrap().push(request.clone());
                    let done_tx = self.cmd_tx.clone();
                    thread::spawn(move || {
                        let uuid = request.uuid().to_owned();
                        sync::process(request);
                        let _ = done_tx.send(Command::SyncDone(uuid));
                    });
                }
            }
            match self.cmd_rx.recv_timeout(cfg::SCHEDULER_TICK) {
                Ok(command) => self.handle_sync_command(command, &mut running),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
            }
        }
    }

    fn handle_sync_command(&self, command: Command, running: &mut HashMap<String, Arc<Request>>) {
        match command {
            Command::Wake | Command::Resume(_) => {}
            Command::SyncDone(uuid) => {
                if let Some(request) = running.remove(&uuid) {
                    self.untrack(&request);
                    if request.status() == Status::Error {
                        self.failed.lock().unwrap().push(request);
                    }
                }
            }
        }
    }

    fn untrack(&self, request: &Arc<Request>) {
        self.active
            .lock()
            .unwrap()
            .retain(|r| r.uuid() != request.uuid());
    }
}

fn handle_cooperative_command(
    command: Command,
    parked: &mut HashMap<String, Driver>,
    resumed: &mut VecDeque<Driver>,
) {
    match command {
        Command::Wake | Command::SyncDone(_) => {}
        Command::Resume(uuid) => {
            if let Some(driver) = parked.remove(&uuid) {
                resumed.push_back(driver);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::Url;

    fn request() -> Arc<Request> {
        Request::tcp(Url::parse("http://127.0.0.1:80/").unwrap())
    }

    #[test]
    fn queue_orders_by_priority_then_submission() {
        let mut heap = BinaryHeap::new();
        let low = request();
        let normal_a = request();
        let normal_b = request();
        let high = request();
        heap.push(Queued {
            request: low.clone(),
            priority: Priority::Low,
            seq: 0,
        });
        heap.push(Queued {
            request: normal_a.clone(),
            priority: Priority::Normal,
            seq: 1,
        });
        heap.push(Queued {
            request: normal_b.clone(),
            priority: Priority::Normal,
            seq: 2,
        });
        heap.push(Queued {
            request: high.clone(),
            priority: Priority::High,
            seq: 3,
        });
        let order: Vec<String> = std::iter::from_fn(|| heap.pop())
            .map(|q| q.request.uuid().to_owned())
            .collect();
        assert_eq!(
            order,
            [
                high.uuid().to_owned(),
                normal_a.uuid().to_owned(),
                normal_b.uuid().to_owned(),
                low.uuid().to_owned()
            ]
        );
    }

    #[test]
    fn submission_to_stopped_scheduler_fails() {
        let scheduler = Scheduler::new(Mode::Cooperative);
        let r = request();
        scheduler.add_request(r.clone());
        assert_eq!(r.status(), Status::Error);
        assert_eq!(r.error(), Some(RequestError::SchedulerNotRunning.into()));
    }

    #[test]
    fn run_twice_is_rejected() {
        let scheduler = Arc::new(Scheduler::new(Mode::Cooperative));
        let background = scheduler.clone();
        let handle = thread::spawn(move || background.run());
        while !scheduler.is_running() {
            thread::yield_now();
        }
        assert_eq!(
            scheduler.run().unwrap_err(),
            RequestError::SchedulerLaunchedTwice.into()
        );
        scheduler.stop();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn exit_callbacks_fire_in_order() {
        let scheduler = Arc::new(Scheduler::new(Mode::Cooperative));
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = order.clone();
        let second = order.clone();
        scheduler.notify_when_exit(move || first.lock().unwrap().push(1));
        scheduler.notify_when_exit(move || second.lock().unwrap().push(2));
        let background = scheduler.clone();
        let handle = thread::spawn(move || background.run());
        while !scheduler.is_running() {
            thread::yield_now();
        }
        scheduler.stop();
        handle.join().unwrap().unwrap();
        assert_eq!(*order.lock().unwrap(), [1, 2]);
    }
}
