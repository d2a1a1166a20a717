// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

use std::{cell::RefCell, rc::Rc};

use arrayvec::ArrayVec;

use crate::Time;

/// Anything that can be driven by the [Clock]: advances to a target tick
/// when asked and can have its tick counter rebased between frames.
pub trait Clocked {
    /// Run until at least `target` is reached, or until the device cannot
    /// continue (a scheduled boundary). Returns the tick actually reached,
    /// which may be less or slightly more than `target`.
    fn execute(&mut self, target: Time) -> Time;
    /// Rebase the internal tick counter by subtracting `by`.
    fn advance(&mut self, by: Time);
}

pub type ClockedHandle = Rc<RefCell<dyn Clocked>>;

/// Cooperative multi-rate scheduler. Masters are driven to a common tick
/// target with a min-converge loop; slaves are pure followers that only
/// ever observe an already-converged tick.
#[derive(Default)]
pub struct Clock {
    target_tick: Time,
    executed_tick: Time,
    masters: ArrayVec<ClockedHandle, 4>,
    slaves: ArrayVec<ClockedHandle, 4>,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_master(&mut self, clocked: ClockedHandle) {
        self.masters.push(clocked);
    }

    pub fn add_slave(&mut self, clocked: ClockedHandle) {
        self.slaves.push(clocked);
    }

    pub fn remove(&mut self, clocked: &ClockedHandle) {
        self.masters.retain(|c| !Rc::ptr_eq(c, clocked));
        self.slaves.retain(|c| !Rc::ptr_eq(c, clocked));
    }

    pub fn executed(&self) -> Time {
        self.executed_tick
    }

    /// Advance all masters to `tick`, re-converging whenever one of them
    /// stops short, then bring every slave up to the converged point.
    /// A master that can never make progress will spin here.
    pub fn execute(&mut self, tick: Time) {
        while self.executed_tick < tick {
            self.target_tick = tick;
            while self.executed_tick < self.target_tick {
                let mut master_tick = self.target_tick;
                for clocked in &self.masters {
                    let executed = clocked.borrow_mut().execute(self.target_tick);
                    master_tick = master_tick.min(executed);
                }
                self.executed_tick = master_tick;
                self.target_tick = master_tick;
            }

            for clocked in &self.slaves {
                clocked.borrow_mut().execute(self.target_tick);
            }
        }
    }

    /// Rebase all counters by `tick`, once per frame, so they never grow
    /// without bound.
    pub fn advance(&mut self, tick: Time) {
        self.target_tick = self.target_tick.saturating_sub(tick);
        self.executed_tick = self.executed_tick.saturating_sub(tick);
        for clocked in self.masters.iter().chain(self.slaves.iter()) {
            clocked.borrow_mut().advance(tick);
        }
    }
}
