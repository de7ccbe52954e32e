use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a whole run
///
/// `Running -> Draining -> Stopped`, never backwards. Draining means no new
/// items are claimed; in-flight items still finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunPhase {
    Running,
    Draining,
    Stopped,
}

impl RunPhase {
    fn to_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Draining => 1,
            Self::Stopped => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Why a run left the Running phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrainReason {
    /// The valid-game quota was met
    QuotaReached,

    /// Every candidate in the listing was examined
    Exhausted,

    /// Shutdown was requested from outside
    Interrupted,

    /// A storage error made further progress unsafe
    Fatal,
}

impl DrainReason {
    fn to_u8(self) -> u8 {
        match self {
            Self::QuotaReached => 1,
            Self::Exhausted => 2,
            Self::Interrupted => 3,
            Self::Fatal => 4,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::QuotaReached),
            2 => Some(Self::Exhausted),
            3 => Some(Self::Interrupted),
            4 => Some(Self::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for DrainReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::QuotaReached => "quota reached",
            Self::Exhausted => "catalog exhausted",
            Self::Interrupted => "interrupted",
            Self::Fatal => "fatal error",
        };
        f.write_str(name)
    }
}

/// Lock-free holder for the run phase, shared by all workers
///
/// The first caller of [`begin_drain`](Self::begin_drain) decides the drain
/// reason; later calls are no-ops.
#[derive(Debug)]
pub struct PhaseCell {
    phase: AtomicU8,
    reason: AtomicU8,
}

impl Default for PhaseCell {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseCell {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(RunPhase::Running.to_u8()),
            reason: AtomicU8::new(0),
        }
    }

    pub fn phase(&self) -> RunPhase {
        RunPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.phase() == RunPhase::Running
    }

    /// Moves Running to Draining; returns true if this call made the move
    pub fn begin_drain(&self, reason: DrainReason) -> bool {
        let moved = self
            .phase
            .compare_exchange(
                RunPhase::Running.to_u8(),
                RunPhase::Draining.to_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if reason == DrainReason::Fatal {
            // A fatal error overrides whatever reason drained the run
            self.reason.store(reason.to_u8(), Ordering::SeqCst);
        } else if moved {
            let _ = self.reason.compare_exchange(
                0,
                reason.to_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }
        moved
    }

    /// Moves to Stopped, recording `fallback` if no drain reason was set
    pub fn stop(&self, fallback: DrainReason) {
        let _ = self.reason.compare_exchange(
            0,
            fallback.to_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.phase.store(RunPhase::Stopped.to_u8(), Ordering::SeqCst);
    }

    pub fn drain_reason(&self) -> Option<DrainReason> {
        DrainReason::from_u8(self.reason.load(Ordering::SeqCst))
    }
}
