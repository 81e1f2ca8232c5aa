//! Process table
//!
//! Fixed-size table owning every PCB. Slot index and pid coincide, so lookup
//! is O(1) and "lowest unused slot" allocation doubles as pid assignment.
//! Slot 0 stays vacant forever: pid 0 names the idle/kernel pseudo-process.

use alloc::boxed::Box;

use super::{Pid, Process, MAX_PROCESSES};

/// The global process table.
pub struct ProcessTable {
    slots: [Option<Box<Process>>; MAX_PROCESSES],
    live: usize,
}

impl ProcessTable {
    pub fn new() -> Self {
        log::info!(target: "process", "process table initialized ({MAX_PROCESSES} slots)");
        Self { slots: [const { None }; MAX_PROCESSES], live: 0 }
    }

    /// Lowest unused slot, skipping the reserved pid 0. Does not reserve.
    pub fn find_free_slot(&self) -> Option<Pid> {
        (1..MAX_PROCESSES).find(|&i| self.slots[i].is_none()).map(|i| Pid(i as u32))
    }

    /// Install a PCB in its slot. The slot must be vacant and match the pid.
    pub fn insert(&mut self, process: Process) {
        let slot = process.pid.0 as usize;
        debug_assert!(slot != 0 && slot < MAX_PROCESSES);
        debug_assert!(self.slots[slot].is_none());
        self.slots[slot] = Some(Box::new(process));
        self.live += 1;
    }

    /// Vacate a slot, returning the PCB.
    pub fn remove(&mut self, pid: Pid) -> Option<Box<Process>> {
        let process = self.slots.get_mut(pid.0 as usize)?.take();
        if process.is_some() {
            self.live -= 1;
        }
        process
    }

    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.slots.get(pid.0 as usize)?.as_deref()
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.slots.get_mut(pid.0 as usize)?.as_deref_mut()
    }

    /// Number of live processes (zombies included).
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterate over live PCBs in pid order.
    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.slots.iter().filter_map(|slot| slot.as_deref())
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}
