//! Platform abstraction
//!
//! The core never touches hardware directly. Everything the bring-up layer
//! owns (port I/O, interrupt gates, paging control registers, the
//! context-switch primitive) is reached through the [`Platform`] trait. A
//! bare-metal build implements it with `in`/`out`, `mov cr3` and friends;
//! hosted builds use [`MockPlatform`], which records every call so tests can
//! assert on the hardware-visible behavior of the core.

use crate::process::Context;

/// Hardware services the core requires from the bring-up layer.
pub trait Platform {
    /// Write one byte to an I/O port.
    fn outb(&mut self, port: u16, value: u8);

    /// Read one byte from an I/O port.
    fn inb(&mut self, port: u16) -> u8;

    /// Unmask an IRQ line at the interrupt controller.
    fn enable_irq(&mut self, irq: u8);

    /// Mask an IRQ line at the interrupt controller.
    fn mask_irq(&mut self, irq: u8);

    /// Signal end-of-interrupt for an IRQ line.
    fn eoi(&mut self, irq: u8);

    /// Clear the CPU interrupt-enable flag.
    fn interrupts_off(&mut self);

    /// Set the CPU interrupt-enable flag.
    fn interrupts_on(&mut self);

    /// Load a page-directory physical address into the paging root register.
    fn set_cr3(&mut self, dir: u32);

    /// Set the paging-enable bit. The directory loaded via
    /// [`Platform::set_cr3`] becomes live.
    fn enable_paging(&mut self);

    /// Invalidate the TLB entry covering one virtual address.
    fn invalidate_tlb(&mut self, virt: u32);

    /// Read the faulting address of the most recent page fault.
    fn current_cr2(&mut self) -> u32;

    /// Resume execution from a saved register set. On bare metal this does
    /// not return to the caller in the usual sense; the scheduler relies only
    /// on the target context becoming live.
    fn switch_context(&mut self, to: &Context);

    /// Idle until the next interrupt.
    fn wait_for_interrupt(&mut self);

    /// Write bytes to the console.
    fn console_write(&mut self, text: &str);

    /// Stop forever. Terminal half of the panic path.
    fn halt(&mut self) -> !;
}

// ---------------------------------------------------------------------------
// Mock platform (hosted builds)
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "none"))]
pub use mock::{HwEvent, MockPlatform};

#[cfg(not(target_os = "none"))]
mod mock {
    use alloc::string::String;
    use alloc::vec::Vec;

    use super::Platform;
    use crate::process::Context;

    /// Recorded side effect of a [`Platform`] call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum HwEvent {
        Outb { port: u16, value: u8 },
        IrqEnabled(u8),
        IrqMasked(u8),
        Eoi(u8),
        Cr3(u32),
        PagingEnabled,
        TlbInvalidate(u32),
        ContextLoad { eip: u32, esp: u32 },
        Idle,
    }

    /// Test double that records hardware-visible calls instead of touching
    /// hardware. `halt` panics so a kernel-fatal path fails the test (or is
    /// caught by `#[should_panic]`).
    pub struct MockPlatform {
        /// Every recorded hardware event, in call order.
        pub events: Vec<HwEvent>,
        /// Console output accumulated by `console_write`.
        pub console: String,
        /// Value returned by `current_cr2`.
        pub cr2: u32,
        /// Whether the interrupt flag is currently set.
        pub interrupts_enabled: bool,
    }

    impl MockPlatform {
        pub fn new() -> Self {
            Self {
                events: Vec::new(),
                console: String::new(),
                cr2: 0,
                interrupts_enabled: false,
            }
        }

        /// Pids of context loads are not known to the platform; tests match
        /// on the instruction pointer instead.
        pub fn context_loads(&self) -> Vec<u32> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    HwEvent::ContextLoad { eip, .. } => Some(*eip),
                    _ => None,
                })
                .collect()
        }

        /// Count of end-of-interrupt signals for one IRQ line.
        pub fn eoi_count(&self, irq: u8) -> usize {
            self.events.iter().filter(|e| **e == HwEvent::Eoi(irq)).count()
        }
    }

    impl Default for MockPlatform {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Platform for MockPlatform {
        fn outb(&mut self, port: u16, value: u8) {
            self.events.push(HwEvent::Outb { port, value });
        }

        fn inb(&mut self, _port: u16) -> u8 {
            0
        }

        fn enable_irq(&mut self, irq: u8) {
            self.events.push(HwEvent::IrqEnabled(irq));
        }

        fn mask_irq(&mut self, irq: u8) {
            self.events.push(HwEvent::IrqMasked(irq));
        }

        fn eoi(&mut self, irq: u8) {
            self.events.push(HwEvent::Eoi(irq));
        }

        fn interrupts_off(&mut self) {
            self.interrupts_enabled = false;
        }

        fn interrupts_on(&mut self) {
            self.interrupts_enabled = true;
        }

        fn set_cr3(&mut self, dir: u32) {
            self.events.push(HwEvent::Cr3(dir));
        }

        fn enable_paging(&mut self) {
            self.events.push(HwEvent::PagingEnabled);
        }

        fn invalidate_tlb(&mut self, virt: u32) {
            self.events.push(HwEvent::TlbInvalidate(virt));
        }

        fn current_cr2(&mut self) -> u32 {
            self.cr2
        }

        fn switch_context(&mut self, to: &Context) {
            self.events.push(HwEvent::ContextLoad { eip: to.eip, esp: to.esp });
        }

        fn wait_for_interrupt(&mut self) {
            self.events.push(HwEvent::Idle);
        }

        fn console_write(&mut self, text: &str) {
            self.console.push_str(text);
        }

        fn halt(&mut self) -> ! {
            panic!("platform halted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{HwEvent, MockPlatform};
    use super::Platform;

    #[test]
    fn mock_records_in_call_order() {
        let mut hw = MockPlatform::new();
        hw.outb(0x43, 0x36);
        hw.set_cr3(0x1000);
        hw.eoi(0);
        assert_eq!(
            hw.events,
            [
                HwEvent::Outb { port: 0x43, value: 0x36 },
                HwEvent::Cr3(0x1000),
                HwEvent::Eoi(0),
            ]
        );
        assert_eq!(hw.eoi_count(0), 1);
    }

    #[test]
    #[should_panic(expected = "platform halted")]
    fn mock_halt_panics() {
        MockPlatform::new().halt();
    }
}
