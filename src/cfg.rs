//! Engine-wide constants.

use std::time::Duration;

/// Largest number of bytes moved by a single socket call in cooperative
/// mode. Keeps every scheduler step short so in-flight requests are
/// round-robined fairly.
pub const COOP_FRAME_MAX: usize = 255;

/// Largest number of bytes moved by a single socket call in sync mode,
/// where each request owns its thread and latency does not matter.
pub const SYNC_FRAME_MAX: usize = 65_535;

/// How long the scheduler loop sleeps when there is nothing to run.
pub const SCHEDULER_TICK: Duration = Duration::from_millis(500);

/// Pause between retries of a transient socket error in sync mode.
pub const SYNC_RETRY_TICK: Duration = Duration::from_millis(250);

/// Sleep inserted after a scheduler pass in which no task made progress,
/// so a transient-only pass does not spin the CPU.
pub const IDLE_PASS_TICK: Duration = Duration::from_millis(1);

/// Default per-phase idle timeout of a request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of simultaneously processed requests.
pub const DEFAULT_ACTIVE_LIMIT: usize = 5;
