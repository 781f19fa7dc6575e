//! Interrupt scheduling for the music player.
//!
//! The device never raises its interrupt line itself. Command handlers only
//! record their intent in an [`IrqIntent`]: a countdown, the command to run
//! when it expires, a request to fire right away, or a plain line request.
//! The scheduler consumes that intent after every bus access and on every
//! tick, so no command ever runs from inside another command.

use crate::mmio::nmp::{NmpState, OpState};
use nmp_hw::memory_map::interrupt;
use tracing::{debug, trace, warn};

// ================================================================================================
// Scheduling Constants
// ================================================================================================

/// Upper bound of immediate fires handled by one service pass
const MAX_IMMEDIATE_FIRES: usize = 8;

/// Interrupt intent recorded by the device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IrqIntent {
    /// Ticks until the scheduled interrupt fires, 0 when idle
    pub delay: u32,
    /// Countdown saved by PAUSE, restored by RESUME
    pub last_delay: u32,
    /// Command run when the interrupt fires
    pub manual_cmd: u16,
    /// Fire on the next service pass, ignoring `delay`
    pub manual_irq: bool,
    /// Raise the interrupt line without running a command
    pub line_request: bool,
}

impl IrqIntent {
    pub fn schedule(&mut self, ticks: u32) {
        self.delay = ticks;
    }

    pub fn trigger_now(&mut self) {
        self.delay = 0;
        self.manual_irq = true;
    }

    pub fn request_line(&mut self) {
        self.line_request = true;
    }

    /// Drop every pending interrupt
    pub fn cancel(&mut self) {
        self.manual_cmd = 0;
        self.delay = 0;
        self.last_delay = 0;
        self.manual_irq = false;
    }
}

/// Game Pak interrupt line as seen by the guest (`REG_IF` bit 13)
#[derive(Debug, Clone, Default)]
pub struct InterruptLine {
    flags: u16,
    raised: u64,
}

impl InterruptLine {
    pub fn assert(&mut self) {
        self.flags |= interrupt::GAME_PAK;
        self.raised += 1;
    }

    pub fn pending(&self) -> bool {
        self.flags & interrupt::GAME_PAK != 0
    }

    /// Clear the line, returning whether it was asserted
    pub fn acknowledge(&mut self) -> bool {
        let pending = self.pending();
        self.flags &= !interrupt::GAME_PAK;
        pending
    }

    /// Number of times the line was asserted
    pub fn raised(&self) -> u64 {
        self.raised
    }
}

/// Configuration for the scheduler
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    /// Stop after this many ticks
    pub max_ticks: Option<u64>,
}

/// Scheduler driving the device's interrupt intent
#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    line: InterruptLine,
    total_ticks: u64,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            line: InterruptLine::default(),
            total_ticks: 0,
        }
    }

    pub fn line(&self) -> &InterruptLine {
        &self.line
    }

    pub fn line_mut(&mut self) -> &mut InterruptLine {
        &mut self.line
    }

    /// Get total ticks elapsed
    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    /// Check if any stop condition is met
    pub fn check_stop_conditions(&self) -> bool {
        if let Some(max) = self.config.max_ticks
            && self.total_ticks >= max
        {
            return true;
        }

        false
    }

    /// Advance one tick: count the scheduled interrupt down and fire it when it
    /// reaches zero
    pub fn tick(&mut self, nmp: &mut NmpState) {
        self.total_ticks += 1;

        if nmp.irq.delay > 0 {
            nmp.irq.delay -= 1;
            if nmp.irq.delay == 0 {
                trace!("Scheduled NMP interrupt fired at tick {}", self.total_ticks);
                self.fire(nmp);
            }
        }

        self.service(nmp);
    }

    /// Consume line requests and immediate fires
    pub fn service(&mut self, nmp: &mut NmpState) {
        for _ in 0..MAX_IMMEDIATE_FIRES {
            if std::mem::take(&mut nmp.irq.line_request) {
                self.line.assert();
            }

            if !std::mem::take(&mut nmp.irq.manual_irq) {
                return;
            }

            nmp.irq.delay = 0;
            self.fire(nmp);
        }

        warn!("NMP immediate interrupts did not settle");
    }

    fn fire(&mut self, nmp: &mut NmpState) {
        if nmp.op_state == OpState::BootSequence {
            nmp.finish_boot();
            self.line.assert();
            return;
        }

        if nmp.irq.manual_cmd != 0 {
            debug!("NMP interrupt runs {:#06X}", nmp.irq.manual_cmd);
            nmp.run_manual_command();
            self.line.assert();
        }
    }
}
