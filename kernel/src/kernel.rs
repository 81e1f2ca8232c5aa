//! The kernel aggregate
//!
//! Every process-wide singleton — allocators, paging state, process table,
//! ready queue, socket table — is a field of one [`Kernel`] value built at
//! boot. The platform layer owns it and hands it to every interrupt
//! callback; methods assume interrupts are disabled for the duration of the
//! call, which is the core's only synchronization.

use log::{error, info, warn};

use crate::error::{KernelError, KernelResult};
use crate::ipc::SocketTable;
use crate::mm::{MemoryManager, PhysAddr, PhysWindow, VirtAddr};
use crate::panic::kernel_panic;
use crate::platform::Platform;
use crate::process::signal::{self, Delivery};
use crate::process::{lifecycle, Context, Pid, Process, ProcessTable, Signal, SignalDisposition};
use crate::sched::Scheduler;
use crate::syscall;
use crate::trap::{TrapFrame, IRQ_BASE, IRQ_LAST, VECTOR_PAGE_FAULT, VECTOR_SYSCALL, VECTOR_TIMER};

/// PIT input clock in Hz.
const PIT_FREQUENCY: u32 = 1_193_180;

/// Timer interrupt rate the kernel programs.
const TIMER_HZ: u32 = 100;

const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;

/// Boot-time parameters.
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    /// Size of the kernel window (identity-mapped low RAM).
    pub window_size: u32,
    /// Kernel heap placement inside the window.
    pub heap_start: u32,
    pub heap_size: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            window_size: 0x0100_0000,           // 16 MiB
            heap_start: 0x0050_0000,            // 5 MiB
            heap_size: 0x00A0_0000,             // 10 MiB
        }
    }
}

/// The core supervisor.
pub struct Kernel<P: Platform> {
    pub(crate) platform: P,
    pub(crate) mem: MemoryManager,
    pub(crate) procs: ProcessTable,
    pub(crate) sched: Scheduler,
    pub(crate) sockets: SocketTable,
}

impl<P: Platform> Kernel<P> {
    /// Boot over a window the platform layer donated: allocators, kernel
    /// directory, paging enable, tables, timer programming.
    pub fn boot_with_window(
        mut platform: P,
        window: PhysWindow,
        config: KernelConfig,
    ) -> KernelResult<Self> {
        crate::logger::init(log::LevelFilter::Debug);

        let mem = MemoryManager::init(
            window,
            PhysAddr(config.heap_start),
            config.heap_size,
            &mut platform,
        )?;
        let procs = ProcessTable::new();
        let sockets = SocketTable::new();
        let sched = Scheduler::new();

        let mut kernel = Self { platform, mem, procs, sched, sockets };
        kernel.program_timer();
        info!(target: "kernel", "core supervisor up");
        Ok(kernel)
    }

    /// Boot over a simulated window (hosted builds).
    #[cfg(not(target_os = "none"))]
    pub fn boot(platform: P, config: KernelConfig) -> KernelResult<Self> {
        Self::boot_with_window(platform, PhysWindow::simulated(config.window_size), config)
    }

    /// Program the PIT for [`TIMER_HZ`] and unmask its IRQ line.
    fn program_timer(&mut self) {
        let divisor = PIT_FREQUENCY / TIMER_HZ;
        // Channel 0, lo/hi byte access, rate generator, binary counting.
        self.platform.outb(PIT_COMMAND, 0x36);
        self.platform.outb(PIT_CHANNEL0, (divisor & 0xFF) as u8);
        self.platform.outb(PIT_CHANNEL0, ((divisor >> 8) & 0xFF) as u8);
        self.platform.enable_irq(0);
        info!(target: "kernel", "timer programmed at {TIMER_HZ} Hz (divisor {divisor})");
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The running process's PCB, used by drivers to target the active
    /// session.
    pub fn current_process(&self) -> Option<&Process> {
        self.sched.current().and_then(|pid| self.procs.get(pid))
    }

    pub fn current_pid(&self) -> Option<Pid> {
        self.sched.current()
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut MemoryManager {
        &mut self.mem
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.procs
    }

    pub fn processes_mut(&mut self) -> &mut ProcessTable {
        &mut self.procs
    }

    pub fn sockets(&self) -> &SocketTable {
        &self.sockets
    }

    pub fn sockets_mut(&mut self) -> &mut SocketTable {
        &mut self.sockets
    }

    /// Socket table and memory subsystem together; socket data paths store
    /// message records through the kernel heap.
    pub fn sockets_and_memory(&mut self) -> (&mut SocketTable, &mut MemoryManager) {
        (&mut self.sockets, &mut self.mem)
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn ticks(&self) -> u64 {
        self.sched.ticks()
    }

    /// The scheduler's ready ring (the running process is never in it).
    pub fn ready_queue(&self) -> &crate::sched::ReadyQueue {
        &self.sched.ready
    }

    // -----------------------------------------------------------------------
    // Process surface
    // -----------------------------------------------------------------------

    /// Create a process (child of the current one, if any) and queue it.
    pub fn spawn(&mut self, name: &str, entry: VirtAddr, uid: u32) -> KernelResult<Pid> {
        let parent = self.sched.current();
        let pid = lifecycle::create_process(
            &mut self.procs,
            &mut self.mem,
            &mut self.platform,
            name,
            entry,
            uid,
            parent,
        )?;
        self.sched.add(&mut self.procs, pid);
        Ok(pid)
    }

    /// Page-granular kernel allocation from the virtual arena, backed by
    /// heap frames mapped into the current directory. For boot-time and
    /// driver use; pair with [`Kernel::vfree`].
    pub fn vmalloc(&mut self, size: u32) -> Option<VirtAddr> {
        let mm = &mut self.mem;
        mm.vmem.alloc(&mut mm.window, &mut mm.heap, &mm.paging, &mut self.platform, size)
    }

    /// Release a virtual-arena allocation.
    pub fn vfree(&mut self, ptr: VirtAddr) -> KernelResult<()> {
        let mm = &mut self.mem;
        mm.vmem.free(&mut mm.window, &mut mm.heap, &mm.paging, &mut self.platform, ptr)
    }

    /// Companion of the mmap syscall; no syscall number is assigned to it,
    /// so in-kernel callers use this directly.
    pub fn munmap(&mut self, pid: Pid, addr: u32, len: u32) -> KernelResult<()> {
        let process = self
            .procs
            .get_mut(pid)
            .ok_or(KernelError::ProcessNotFound { pid: pid.0 })?;
        crate::process::memory::munmap(&mut self.mem, &mut self.platform, process, addr, len)
    }

    /// Run one scheduling decision.
    pub fn schedule(&mut self) {
        if let Err(err) = self.sched.run(&mut self.procs, &mut self.mem, &mut self.platform) {
            self.die(err, None);
        }
    }

    /// Raise `signal` on `pid` (driver-facing, e.g. keyboard to foreground
    /// process).
    pub fn signal_process(&mut self, pid: Pid, signal: Signal) -> KernelResult<()> {
        lifecycle::kill(&mut self.procs, &mut self.sched.ready, pid, signal)
    }

    /// Raw-number variant of [`Kernel::signal_process`].
    pub fn kill(&mut self, pid: u32, signal: u32) -> KernelResult<()> {
        let signal = Signal::new(signal).ok_or(KernelError::BadSignal { signal })?;
        self.signal_process(Pid(pid), signal)
    }

    /// Replace a signal disposition. The numbered syscall only carries
    /// default/ignore; kernel-resident process code registers real handlers
    /// here.
    pub fn register_signal_handler(
        &mut self,
        pid: Pid,
        sig: Signal,
        disposition: SignalDisposition,
    ) -> KernelResult<()> {
        signal::register_handler(&mut self.procs, pid, sig, disposition)
    }

    // -----------------------------------------------------------------------
    // Trap entry
    // -----------------------------------------------------------------------

    /// Entry point for every numbered event the platform traps: CPU
    /// exceptions, hardware IRQs, and the system-call gate.
    pub fn on_trap(&mut self, frame: &mut TrapFrame) {
        match frame.vector {
            VECTOR_SYSCALL => syscall::dispatch(self, frame),
            VECTOR_TIMER => {
                // Preemption must resume the process exactly where the trap
                // cut it off.
                if let Some(process) = self.sched.current().and_then(|pid| self.procs.get_mut(pid))
                {
                    process.context = Context::from_trap(frame);
                }
                if let Err(err) =
                    self.sched.timer_tick(&mut self.procs, &mut self.mem, &mut self.platform)
                {
                    self.die(err, Some(frame));
                }
            }
            vector @ IRQ_BASE..=IRQ_LAST => {
                // Driver IRQs are dispatched by the platform layer before the
                // core sees them; acknowledge strays.
                self.platform.eoi((vector - IRQ_BASE) as u8);
            }
            vector if vector < IRQ_BASE => self.handle_exception(vector, frame),
            vector => warn!(target: "kernel", "trap with unknown vector {vector}"),
        }
    }

    /// CPU exception: surface it to the current process as a signal, or die
    /// when there is no process context to charge.
    fn handle_exception(&mut self, vector: u32, frame: &mut TrapFrame) {
        let Some(pid) = self.sched.current() else {
            kernel_panic(
                &mut self.platform,
                "unrecoverable CPU exception with no current process",
                Some(frame),
                Some(&self.mem),
            );
        };

        if vector == VECTOR_PAGE_FAULT {
            let faulting = self.platform.current_cr2();
            warn!(
                target: "kernel",
                "page fault in pid {pid} at {faulting:#010x} (eip {:#010x}, err {:#x})",
                frame.eip, frame.err_code
            );
        } else {
            warn!(target: "kernel", "exception {vector} in pid {pid} (eip {:#010x})", frame.eip);
        }

        let Some(signal) = signal::signal_for_exception(vector) else {
            error!(target: "kernel", "no signal mapping for exception {vector}");
            return;
        };

        if let Some(process) = self.procs.get_mut(pid) {
            process.context = Context::from_trap(frame);
        }
        if let Err(err) =
            signal::send_signal(&mut self.procs, &mut self.sched.ready, pid, signal)
        {
            error!(target: "kernel", "failed to raise {} on pid {pid}: {err}", signal.name());
            return;
        }

        // Deliver at the trap exit, before the process resumes.
        match signal::deliver_pending(
            pid,
            &mut self.procs,
            &mut self.mem,
            &mut self.sched.ready,
            &mut self.platform,
        ) {
            Ok(Delivery::Runnable) => {}
            Ok(Delivery::Descheduled) => self.schedule(),
            Err(err) => self.die(err, Some(frame)),
        }
    }

    /// Escalate an unrecoverable error to the panic path.
    pub(crate) fn die(&mut self, err: KernelError, frame: Option<&TrapFrame>) -> ! {
        error!(target: "kernel", "fatal: {err}");
        let message = alloc::format!("{err}");
        kernel_panic(&mut self.platform, &message, frame, Some(&self.mem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{HwEvent, MockPlatform};

    fn booted() -> Kernel<MockPlatform> {
        Kernel::boot(MockPlatform::new(), KernelConfig::default()).unwrap()
    }

    #[test]
    fn boot_programs_the_hardware() {
        let kernel = booted();
        let events = &kernel.platform().events;

        // PIT: command byte then divisor lo/hi on channel 0.
        assert!(events.contains(&HwEvent::Outb { port: 0x43, value: 0x36 }));
        let divisor = 1_193_180u32 / 100;
        assert!(events.contains(&HwEvent::Outb { port: 0x40, value: (divisor & 0xFF) as u8 }));
        assert!(events.contains(&HwEvent::Outb { port: 0x40, value: (divisor >> 8) as u8 }));
        assert!(events.contains(&HwEvent::IrqEnabled(0)));
        assert!(events.contains(&HwEvent::PagingEnabled));
        // CR3 loaded with the kernel directory.
        assert!(events.contains(&HwEvent::Cr3(kernel.memory().paging.kernel_dir().0)));
    }

    #[test]
    fn spawn_and_schedule() {
        let mut kernel = booted();
        let pid = kernel.spawn("init", crate::mm::VirtAddr(0x0804_8000), 0).unwrap();
        assert_eq!(pid, Pid(1));
        assert!(kernel.current_pid().is_none());

        kernel.schedule();
        assert_eq!(kernel.current_pid(), Some(pid));
        let process = kernel.current_process().unwrap();
        assert_eq!(process.context.eip, 0x0804_8000);
        assert_eq!(process.context.eflags, 0x202);
        // Stack pointer parked just under the fixed top.
        assert_eq!(process.context.esp, 0x1000_0000 - 4);
        // The running process is not in the ready ring.
        assert!(!kernel.ready_queue().contains(pid));
    }

    #[test]
    fn idle_without_processes_parks_the_cpu() {
        let mut kernel = booted();
        kernel.schedule();
        assert_eq!(kernel.current_pid(), None);
        assert!(kernel.platform().events.contains(&HwEvent::Idle));
    }

    #[test]
    fn unknown_irq_gets_an_eoi() {
        let mut kernel = booted();
        let mut frame = TrapFrame { vector: 40, ..TrapFrame::default() };
        kernel.on_trap(&mut frame);
        assert_eq!(kernel.platform().eoi_count(8), 1);
    }
}
