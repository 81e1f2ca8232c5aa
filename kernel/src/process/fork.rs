//! fork
//!
//! The child is a verbatim copy of the parent PCB over a deep-cloned address
//! space (no copy-on-write): every per-process page of the parent is copied
//! into a fresh frame. The caller must have mirrored the parent's trap-time
//! register state into its saved context first; the child's context is that
//! snapshot with the syscall return register forced to 0, so the child
//! observes `fork() == 0` on its first slice.

use log::debug;

use super::table::ProcessTable;
use super::{Pid, ProcessState};
use crate::error::{KernelError, KernelResult};
use crate::mm::MemoryManager;
use crate::platform::Platform;

/// Fork `parent`, returning the child pid. On any failure the child slot is
/// left unused and everything built so far is released.
pub fn fork_process<P: Platform>(
    table: &mut ProcessTable,
    mm: &mut MemoryManager,
    platform: &mut P,
    parent: Pid,
) -> KernelResult<Pid> {
    let child_pid = table.find_free_slot().ok_or(KernelError::ProcessTableFull)?;

    let parent_pcb =
        table.get(parent).ok_or(KernelError::ProcessNotFound { pid: parent.0 })?;
    let parent_dir = parent_pcb.address_space;
    let parent_kstack = parent_pcb.kernel_stack;
    let mut child = parent_pcb.clone();

    let child_dir =
        mm.paging.clone_directory(&mut mm.window, &mut mm.heap, platform, parent_dir)?;

    let child_kstack = match mm.heap.alloc_page(&mut mm.window) {
        Some(page) => page,
        None => {
            mm.paging.release_directory(&mut mm.window, &mut mm.heap, child_dir)?;
            return Err(KernelError::OutOfMemory);
        }
    };
    mm.window.copy_page(child_kstack, parent_kstack);

    child.pid = child_pid;
    child.state = ProcessState::Ready;
    child.address_space = child_dir;
    child.kernel_stack = child_kstack;
    child.parent = Some(parent);
    child.children.clear();
    child.pending.clear();
    child.ticks = 0;
    // The one observable difference between the copies.
    child.context.eax = 0;

    table.insert(child);
    if let Some(parent_pcb) = table.get_mut(parent) {
        parent_pcb.children.push(child_pid);
    }

    debug!(target: "process", "fork: pid {parent} -> child {child_pid}");
    Ok(child_pid)
}
