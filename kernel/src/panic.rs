//! Kernel panic path
//!
//! Terminal error handling: disable interrupts, dump the register state and
//! a bounded stack window to the console, halt forever. Never unwinds,
//! never frees.

use core::fmt::Write;

use crate::mm::{MemoryManager, PhysAddr};
use crate::platform::Platform;
use crate::trap::TrapFrame;

/// Number of stack dwords included in the dump.
const STACK_DUMP_WORDS: u32 = 32;

struct Console<'a, P: Platform>(&'a mut P);

impl<P: Platform> Write for Console<'_, P> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.0.console_write(s);
        Ok(())
    }
}

/// Enter the panic path. `frame` supplies the register snapshot when the
/// failure came through a trap; `mm` lets the dump read the faulting stack
/// through the kernel window.
pub fn kernel_panic<P: Platform>(
    platform: &mut P,
    message: &str,
    frame: Option<&TrapFrame>,
    mm: Option<&MemoryManager>,
) -> ! {
    platform.interrupts_off();

    {
        let mut console = Console(platform);
        let _ = writeln!(console, "\n*** KERNEL PANIC ***");
        let _ = writeln!(console, "{message}\n");

        if let Some(frame) = frame {
            let _ = writeln!(console, "Register state:");
            let _ = writeln!(
                console,
                "  EAX={:#010x}  EBX={:#010x}  ECX={:#010x}  EDX={:#010x}",
                frame.eax, frame.ebx, frame.ecx, frame.edx
            );
            let _ = writeln!(
                console,
                "  ESI={:#010x}  EDI={:#010x}  EBP={:#010x}  ESP={:#010x}",
                frame.esi, frame.edi, frame.ebp, frame.esp
            );
            let _ = writeln!(
                console,
                "  EIP={:#010x}  EFLAGS={:#010x}  vector={} err={:#x}",
                frame.eip, frame.eflags, frame.vector, frame.err_code
            );
            let _ = writeln!(
                console,
                "  CS={:#06x} DS={:#06x} ES={:#06x} FS={:#06x} GS={:#06x}",
                frame.cs, frame.ds, frame.es, frame.fs, frame.gs
            );

            if let Some(mm) = mm {
                let _ = writeln!(console, "\nStack window at ESP={:#010x}:", frame.esp);
                for i in 0..STACK_DUMP_WORDS {
                    let addr = PhysAddr(frame.esp.wrapping_add(i * 4));
                    if !mm.window.contains(addr, 4) {
                        break;
                    }
                    let word: u32 = mm.window.read(addr);
                    if i % 4 == 0 {
                        let _ = write!(console, "\n  {:#010x}:", addr.0);
                    }
                    let _ = write!(console, " {word:#010x}");
                }
                let _ = writeln!(console);
            }
        }

        let _ = writeln!(console, "\nSystem halted.");
    }

    platform.halt()
}
