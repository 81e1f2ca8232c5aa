//! Per-process memory
//!
//! Region setup for fresh processes and the mmap/brk surface. The layout is
//! fixed: code, rodata, data and bss each start at their own base with one
//! zeroed page; the heap begins empty at its base; the user stack occupies
//! 64 KiB below a fixed top.

use log::debug;

use super::pcb::{MemoryLayout, Process, Region, RegionFlags};
use crate::error::{KernelError, KernelResult};
use crate::mm::{align_up, MemoryManager, PageFlags, PhysAddr, VirtAddr, PAGE_SIZE};
use crate::platform::Platform;

/// Base of the code (.text) region.
pub const CODE_BASE: u32 = 0x0804_8000;
/// Base of the read-only data region.
pub const RODATA_BASE: u32 = 0x0805_0000;
/// Base of the initialized-data region.
pub const DATA_BASE: u32 = 0x0806_0000;
/// Base of the zero-initialized region.
pub const BSS_BASE: u32 = 0x0807_0000;
/// Base of the process heap; the break starts here.
pub const HEAP_BASE: u32 = 0x0808_0000;
/// Top of the user stack (exclusive).
pub const USER_STACK_TOP: u32 = 0x1000_0000;
/// Mapped user stack size.
pub const USER_STACK_SIZE: u32 = 0x0001_0000; // 64 KiB

bitflags::bitflags! {
    /// mmap protection bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Prot: u32 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC  = 1 << 2;
    }
}

bitflags::bitflags! {
    /// mmap flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        const PRIVATE   = 1 << 1;
        const ANONYMOUS = 1 << 5;
    }
}

fn page_flags_for(writable: bool) -> PageFlags {
    let mut flags = PageFlags::USER;
    if writable {
        flags |= PageFlags::WRITABLE;
    }
    flags
}

/// Allocate one zeroed frame and map it at `virt` in `dir`.
fn map_zeroed_page<P: Platform>(
    mm: &mut MemoryManager,
    platform: &mut P,
    dir: PhysAddr,
    virt: VirtAddr,
    flags: PageFlags,
) -> KernelResult<()> {
    let frame = mm.heap.alloc_page(&mut mm.window).ok_or(KernelError::OutOfMemory)?;
    mm.window.fill_zero(frame, PAGE_SIZE);
    if let Err(err) = mm.paging.map(&mut mm.window, &mut mm.heap, platform, dir, virt, frame, flags)
    {
        mm.heap.free(&mut mm.window, frame)?;
        return Err(err);
    }
    Ok(())
}

/// Build the initial layout in `dir`: one page per section, the full user
/// stack, an empty heap. On failure the partially mapped pages stay in the
/// directory; the caller releases it wholesale.
pub fn build_layout<P: Platform>(
    mm: &mut MemoryManager,
    platform: &mut P,
    dir: PhysAddr,
) -> KernelResult<MemoryLayout> {
    let sections = [
        (CODE_BASE, RegionFlags::READ | RegionFlags::EXEC),
        (RODATA_BASE, RegionFlags::READ),
        (DATA_BASE, RegionFlags::READ | RegionFlags::WRITE),
        (BSS_BASE, RegionFlags::READ | RegionFlags::WRITE),
    ];
    for (base, flags) in sections {
        map_zeroed_page(
            mm,
            platform,
            dir,
            VirtAddr(base),
            page_flags_for(flags.contains(RegionFlags::WRITE)),
        )?;
    }

    let stack_base = USER_STACK_TOP - USER_STACK_SIZE;
    for i in 0..USER_STACK_SIZE / PAGE_SIZE {
        map_zeroed_page(
            mm,
            platform,
            dir,
            VirtAddr(stack_base + i * PAGE_SIZE),
            page_flags_for(true),
        )?;
    }

    let region = |base: u32, flags: RegionFlags| Region {
        start: VirtAddr(base),
        end: VirtAddr(base + PAGE_SIZE),
        flags,
    };
    Ok(MemoryLayout {
        code: region(CODE_BASE, RegionFlags::READ | RegionFlags::EXEC),
        rodata: region(RODATA_BASE, RegionFlags::READ),
        data: region(DATA_BASE, RegionFlags::READ | RegionFlags::WRITE),
        bss: region(BSS_BASE, RegionFlags::READ | RegionFlags::WRITE),
        heap_start: VirtAddr(HEAP_BASE),
        heap_end: VirtAddr(HEAP_BASE),
        stack_top: VirtAddr(USER_STACK_TOP),
        stack_size: USER_STACK_SIZE,
    })
}

/// Map `len` bytes for `process`. A zero `addr` places the mapping at the
/// current break and advances it; an explicit `addr` is honored page-aligned.
pub fn mmap<P: Platform>(
    mm: &mut MemoryManager,
    platform: &mut P,
    process: &mut Process,
    addr: u32,
    len: u32,
    prot: Prot,
    _flags: MapFlags,
) -> KernelResult<VirtAddr> {
    if len == 0 {
        return Err(KernelError::InvalidAddress { addr });
    }
    let total = align_up(len, PAGE_SIZE);
    let base = if addr != 0 { VirtAddr(addr).page_base() } else { process.layout.heap_end };

    let dir = process.address_space;
    let flags = page_flags_for(prot.contains(Prot::WRITE));
    for i in 0..total / PAGE_SIZE {
        let virt = base.add(i * PAGE_SIZE);
        if let Err(err) = map_zeroed_page(mm, platform, dir, virt, flags) {
            // Unwind what this call mapped.
            for j in 0..i {
                let virt = base.add(j * PAGE_SIZE);
                if let Some(frame) = mm.paging.translate(&mm.window, dir, virt) {
                    mm.heap.free(&mut mm.window, frame.page_base())?;
                }
                mm.paging.unmap(&mut mm.window, platform, dir, virt);
            }
            return Err(err);
        }
    }

    if base.0 + total > process.layout.heap_end.0 {
        process.layout.heap_end = VirtAddr(base.0 + total);
    }
    debug!(target: "process", "mmap: {} bytes at {:#010x} for pid {}", total, base.0, process.pid);
    Ok(base)
}

/// Unmap and release `len` bytes at `addr`. Pages without a mapping are
/// skipped.
pub fn munmap<P: Platform>(
    mm: &mut MemoryManager,
    platform: &mut P,
    process: &mut Process,
    addr: u32,
    len: u32,
) -> KernelResult<()> {
    if addr == 0 || len == 0 {
        return Err(KernelError::InvalidAddress { addr });
    }
    let base = VirtAddr(addr).page_base();
    let dir = process.address_space;
    for i in 0..align_up(len, PAGE_SIZE) / PAGE_SIZE {
        let virt = base.add(i * PAGE_SIZE);
        if let Some(frame) = mm.paging.translate(&mm.window, dir, virt) {
            mm.heap.free(&mut mm.window, frame.page_base())?;
            mm.paging.unmap(&mut mm.window, platform, dir, virt);
        }
    }
    Ok(())
}

/// Move the break. `addr == 0` reports the current break; growth maps zeroed
/// pages, shrinking releases them. Returns the new break.
pub fn brk<P: Platform>(
    mm: &mut MemoryManager,
    platform: &mut P,
    process: &mut Process,
    addr: u32,
) -> KernelResult<u32> {
    if addr == 0 {
        return Ok(process.layout.heap_end.0);
    }
    let new_break = align_up(addr, PAGE_SIZE);
    if new_break < process.layout.heap_start.0 {
        return Err(KernelError::InvalidAddress { addr });
    }

    let old_break = process.layout.heap_end.0;
    if new_break > old_break {
        let dir = process.address_space;
        let flags = page_flags_for(true);
        for page in (old_break..new_break).step_by(PAGE_SIZE as usize) {
            if let Err(err) = map_zeroed_page(mm, platform, dir, VirtAddr(page), flags) {
                // Keep what was already committed; report the old break.
                for rollback in (old_break..page).step_by(PAGE_SIZE as usize) {
                    let virt = VirtAddr(rollback);
                    if let Some(frame) = mm.paging.translate(&mm.window, dir, virt) {
                        mm.heap.free(&mut mm.window, frame.page_base())?;
                    }
                    mm.paging.unmap(&mut mm.window, platform, dir, virt);
                }
                return Err(err);
            }
        }
    } else if new_break < old_break {
        munmap(mm, platform, process, new_break, old_break - new_break)?;
    }

    process.layout.heap_end = VirtAddr(new_break);
    Ok(new_break)
}

/// Copy bytes out of a process address space through the kernel window.
pub fn copy_from_user(
    mm: &MemoryManager,
    dir: PhysAddr,
    virt: VirtAddr,
    out: &mut [u8],
) -> KernelResult<()> {
    let mut done = 0usize;
    while done < out.len() {
        let va = virt.add(done as u32);
        let phys = mm
            .paging
            .translate(&mm.window, dir, va)
            .ok_or(KernelError::Unmapped { addr: va.0 })?;
        let in_page = (PAGE_SIZE - va.page_offset()) as usize;
        let take = in_page.min(out.len() - done);
        mm.window.read_bytes(phys, &mut out[done..done + take]);
        done += take;
    }
    Ok(())
}

/// Copy bytes into a process address space through the kernel window.
pub fn copy_to_user(
    mm: &mut MemoryManager,
    dir: PhysAddr,
    virt: VirtAddr,
    data: &[u8],
) -> KernelResult<()> {
    let mut done = 0usize;
    while done < data.len() {
        let va = virt.add(done as u32);
        let phys = mm
            .paging
            .translate(&mm.window, dir, va)
            .ok_or(KernelError::Unmapped { addr: va.0 })?;
        let in_page = (PAGE_SIZE - va.page_offset()) as usize;
        let take = in_page.min(data.len() - done);
        mm.window.write_bytes(phys, &data[done..done + take]);
        done += take;
    }
    Ok(())
}
