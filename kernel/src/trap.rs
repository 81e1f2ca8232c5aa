//! Trap frames
//!
//! The record the platform's ISR stubs build on the kernel stack and hand to
//! [`crate::Kernel::on_trap`]. Push order (reverse of memory order): the CPU
//! pushes EFLAGS/CS/EIP (plus SS:ESP first for cross-privilege traps, plus an
//! error code for some exceptions), the stub pushes the vector number and a
//! dummy error code where the CPU did not, then the eight general-purpose
//! registers, then the four data segment selectors.
//!
//! Reconstructing the pre-trap stack pointer is privilege-dependent and is
//! the load-bearing detail `fork` relies on: for a cross-privilege trap the
//! CPU pushed the old SS:ESP; for a same-privilege trap the pre-trap ESP is
//! the frame's end — equivalently, the saved `esp` field (captured when the
//! register push began) plus the five words pushed above it.

use crate::process::pcb::{Context, KERNEL_DS};

/// First hardware-interrupt vector.
pub const IRQ_BASE: u32 = 32;

/// Timer interrupt vector (IRQ 0).
pub const VECTOR_TIMER: u32 = IRQ_BASE;

/// Last hardware-interrupt vector.
pub const IRQ_LAST: u32 = 47;

/// Software-interrupt vector of the system-call gate.
pub const VECTOR_SYSCALL: u32 = 0x80;

/// Page-fault exception vector.
pub const VECTOR_PAGE_FAULT: u32 = 14;

/// Bytes pushed between the saved `esp` field's value and the pre-trap
/// stack top: vector, error code, EIP, CS, EFLAGS.
pub const SAME_PRIV_ESP_ADJUST: u32 = 20;

/// Size of the pushed frame through EFLAGS (segments + GPRs + vector +
/// error code + EIP/CS/EFLAGS). Cross-privilege traps push 8 more bytes.
pub const TRAP_PUSH_BYTES: u32 = 68;

/// Register-state record for one trap, in stack memory order.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TrapFrame {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    /// ESP at the start of the general-register push; points at the vector
    /// slot of this frame.
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub vector: u32,
    pub err_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    /// Pre-trap stack pointer; pushed by the CPU only for cross-privilege
    /// traps.
    pub user_esp: u32,
    pub user_ss: u32,
}

impl TrapFrame {
    /// Whether the trapped code was running at the kernel's privilege.
    pub fn is_same_privilege(&self) -> bool {
        self.cs & 0x3 == 0
    }
}

impl Context {
    /// Transcribe a trap frame into a schedulable context, reconstructing
    /// the pre-trap stack pointer per trap privilege.
    pub fn from_trap(frame: &TrapFrame) -> Self {
        let (esp, ss) = if frame.is_same_privilege() {
            (frame.esp.wrapping_add(SAME_PRIV_ESP_ADJUST), KERNEL_DS)
        } else {
            (frame.user_esp, frame.user_ss)
        };
        Self {
            eax: frame.eax,
            ebx: frame.ebx,
            ecx: frame.ecx,
            edx: frame.edx,
            esi: frame.esi,
            edi: frame.edi,
            ebp: frame.ebp,
            esp,
            eip: frame.eip,
            eflags: frame.eflags,
            cs: frame.cs,
            ds: frame.ds,
            es: frame.es,
            fs: frame.fs,
            gs: frame.gs,
            ss,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout_matches_the_push_sequence() {
        assert_eq!(core::mem::size_of::<TrapFrame>(), 76);
        assert_eq!(TRAP_PUSH_BYTES, 68);
        assert_eq!(core::mem::offset_of!(TrapFrame, vector), 48);
        assert_eq!(core::mem::offset_of!(TrapFrame, eflags), 64);
    }

    #[test]
    fn same_privilege_esp_reconstruction() {
        let frame = TrapFrame {
            cs: 0x08,
            esp: 0x0050_1000, // saved at the vector slot
            eip: 0x0804_8123,
            eflags: 0x202,
            eax: 42,
            ..TrapFrame::default()
        };
        let ctx = Context::from_trap(&frame);
        assert_eq!(ctx.esp, 0x0050_1000 + SAME_PRIV_ESP_ADJUST);
        assert_eq!(ctx.ss, KERNEL_DS);
        assert_eq!(ctx.eip, 0x0804_8123);
        assert_eq!(ctx.eax, 42);
    }

    #[test]
    fn cross_privilege_uses_cpu_pushed_stack() {
        let frame = TrapFrame {
            cs: 0x1B, // ring-3 selector
            esp: 0x0050_1000,
            user_esp: 0x0FFF_FFF0,
            user_ss: 0x23,
            ..TrapFrame::default()
        };
        let ctx = Context::from_trap(&frame);
        assert_eq!(ctx.esp, 0x0FFF_FFF0);
        assert_eq!(ctx.ss, 0x23);
    }
}
