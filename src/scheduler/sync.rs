//! Sync processing mode: the same driver state machine as cooperative
//! mode, run to completion on a dedicated thread with bounded sleeps
//! between transient retries. A paused request keeps its thread and its
//! socket; the driver simply idles until the flag clears or the request is
//! canceled.

use std::sync::Arc;
use std::thread;

use crate::cfg;
use crate::request::Request;
use crate::scheduler::driver::{Driver, Step};

pub(crate) fn process(request: Arc<Request>) {
    let mut driver = Driver::new(request, cfg::SYNC_FRAME_MAX);
    loop {
        match driver.step() {
            Step::Progress => {}
            Step::Idle | Step::Paused => thread::sleep(cfg::SYNC_RETRY_TICK),
            Step::Finished => return,
        }
    }
}
