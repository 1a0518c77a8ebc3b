//! ELF64 program loading: builds a READY ring-3 process from an executable
//! image.
//!
//! Parsing and validation live in `sable-elf`; this module owns process
//! construction: kernel stack, per-process address space, segment frames,
//! the 4-page user stack, and SysV AMD64 argv seeding. Every allocation is
//! tracked so a mid-load failure rolls the whole process back.
//!
//! Segment bytes are written through the HHDM translation of the freshly
//! mapped frames, never through the current address space — the loader
//! runs on whatever CR3 happens to be live.

use alloc::boxed::Box;

use planck_noalloc::vec::ArrayVec;
use sable_core::addr::{PhysAddr, VirtAddr};
use sable_core::paging::{PhysFrame, Size4KiB};
use sable_core::structures::PageTableFlags;
use sable_core::{kdebug, kinfo};
use sable_elf::{ElfFile, ElfError};
use sable_mm::address_space::AddressSpace;

use crate::arch::x86_64::context::user_process_entry;
use crate::arch::x86_64::gdt::{USER_CODE_SELECTOR, USER_DATA_SELECTOR};
use crate::config::{FIRST_USER_PID, PAGE_SIZE, USER_STACK_PAGES, USER_STACK_TOP};
use crate::mm::{hhdm, pmm, vmm};
use crate::proc::{self, INITIAL_RFLAGS, ProcState, Process};

/// Most `PT_LOAD` segments a single executable may carry.
const MAX_SEGMENTS: usize = 32;

/// Most argv entries the initial stack will seed.
const MAX_ARGS: usize = 32;

/// Why a load failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// The image failed ELF validation.
    Elf(ElfError),
    /// Frame or table allocation failed.
    OutOfMemory,
    /// The image has more loadable segments than the loader tracks.
    TooManySegments,
}

impl From<ElfError> for LoadError {
    fn from(err: ElfError) -> Self {
        Self::Elf(err)
    }
}

/// A tracked physical run backing one segment (for rollback).
#[derive(Clone, Copy)]
struct SegmentRun {
    base: PhysFrame<Size4KiB>,
    pages: usize,
}

fn page_align_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE as u64 - 1)
}

fn page_align_up(addr: u64) -> u64 {
    (addr + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1)
}

/// Writes one byte into `aspace` at user address `va` via HHDM.
fn poke_user(aspace: &AddressSpace, va: u64, byte: u8) {
    let page = VirtAddr::new_truncate(page_align_down(va));
    let phys = aspace.translate(page).expect("seeded stack page is mapped");
    let dst = hhdm::phys_to_virt(PhysAddr::new_truncate(phys.as_u64() + (va & 0xFFF)));
    // SAFETY: The page was just mapped by the loader and is ours alone.
    unsafe { dst.as_mut_ptr::<u8>().write(byte) };
}

/// Writes a 64-bit word into `aspace` at user address `va` via HHDM.
fn poke_user_u64(aspace: &AddressSpace, va: u64, value: u64) {
    for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
        poke_user(aspace, va + i as u64, byte);
    }
}

/// Loads an ELF64 image as a new user process and returns its pid.
///
/// On success the process is READY and linked into the registry; the next
/// voluntary switch or timer tick starts it at `e_entry` with
/// `RDI = argc`, `RSI = argv` per the SysV AMD64 start protocol.
///
/// # Errors
///
/// Returns [`LoadError`] with every allocated frame, the user stack, the
/// page table, and the process record rolled back.
pub fn load(name: &str, image: &[u8], argv: &[&str]) -> Result<u32, LoadError> {
    let elf = ElfFile::parse(image)?;

    // Process record and kernel stack.
    let (kernel_stack, kernel_stack_top) =
        proc::alloc_kernel_stack().ok_or(LoadError::OutOfMemory)?;

    let mut rollback = Rollback {
        segments: ArrayVec::new(),
        user_stack: None,
        kernel_stack: Some((kernel_stack, crate::config::KERNEL_STACK_PAGES)),
        aspace: None,
    };

    match build(name, &elf, argv, kernel_stack, kernel_stack_top, &mut rollback) {
        Ok(pid) => {
            rollback.disarm();
            kinfo!("exec: {} -> pid {}", name, pid);
            Ok(pid)
        }
        Err(err) => {
            kdebug!("exec: loading {} failed: {:?}", name, err);
            rollback.run();
            Err(err)
        }
    }
}

/// Tracked allocations, freed in `run()` unless disarmed.
struct Rollback {
    segments: ArrayVec<SegmentRun, MAX_SEGMENTS>,
    user_stack: Option<SegmentRun>,
    kernel_stack: Option<(PhysFrame<Size4KiB>, usize)>,
    aspace: Option<AddressSpace>,
}

impl Rollback {
    fn disarm(&mut self) {
        self.segments = ArrayVec::new();
        self.user_stack = None;
        self.kernel_stack = None;
        self.aspace = None;
    }

    fn run(&mut self) {
        for run in self.segments.iter() {
            pmm::free_frames(run.base, run.pages);
        }
        if let Some(run) = self.user_stack.take() {
            pmm::free_frames(run.base, run.pages);
        }
        if let Some((frame, pages)) = self.kernel_stack.take() {
            pmm::free_frames(frame, pages);
        }
        if let Some(aspace) = self.aspace.take() {
            aspace.destroy(&mut pmm::GlobalFrameAlloc);
        }
        self.segments = ArrayVec::new();
    }
}

fn build(
    name: &str,
    elf: &ElfFile<'_>,
    argv: &[&str],
    kernel_stack: PhysFrame<Size4KiB>,
    kernel_stack_top: VirtAddr,
    rollback: &mut Rollback,
) -> Result<u32, LoadError> {
    // Per-process address space sharing the kernel upper half. It lives in
    // the rollback record until the process record takes ownership, so a
    // failed load frees its table frames too.
    rollback.aspace = Some(vmm::create_address_space().map_err(|_| LoadError::OutOfMemory)?);
    let aspace = rollback.aspace.as_ref().expect("just stored");

    // Map every PT_LOAD segment into a contiguous frame run.
    for segment in elf.load_segments() {
        let va_lo = page_align_down(segment.vaddr);
        let va_hi = page_align_up(segment.vaddr + segment.memsz);
        let pages = ((va_hi - va_lo) / PAGE_SIZE as u64) as usize;
        if pages == 0 {
            continue;
        }

        let run = pmm::alloc_frames(pages).ok_or(LoadError::OutOfMemory)?;
        if rollback.segments.try_push(SegmentRun { base: run, pages }).is_err() {
            pmm::free_frames(run, pages);
            return Err(LoadError::TooManySegments);
        }

        let mut flags = PageTableFlags::PRESENT | PageTableFlags::USER;
        if segment.is_writable() {
            flags |= PageTableFlags::WRITABLE;
        }

        for i in 0..pages {
            let va = VirtAddr::new_truncate(va_lo + (i * PAGE_SIZE) as u64);
            let pa = run.start_address() + (i * PAGE_SIZE) as u64;
            aspace
                .map_page(va, pa, flags, &mut pmm::GlobalFrameAlloc)
                .map_err(|_| LoadError::OutOfMemory)?;
        }

        // Zero the whole run, then splice in the file-backed bytes.
        let base = hhdm::phys_to_virt(run.start_address()).as_mut_ptr::<u8>();
        // SAFETY: The run was just allocated and is HHDM-addressable.
        unsafe {
            core::ptr::write_bytes(base, 0, pages * PAGE_SIZE);
            let offset_in_run = (segment.vaddr - va_lo) as usize;
            core::ptr::copy_nonoverlapping(
                segment.data.as_ptr(),
                base.add(offset_in_run),
                segment.data.len(),
            );
        }
    }

    // 4-page user stack just below the canonical boundary; PT_GNU_STACK
    // decides writability (there is no NX to withhold execute).
    let stack_run = pmm::alloc_frames(USER_STACK_PAGES).ok_or(LoadError::OutOfMemory)?;
    rollback.user_stack = Some(SegmentRun {
        base: stack_run,
        pages: USER_STACK_PAGES,
    });

    let mut stack_flags = PageTableFlags::PRESENT | PageTableFlags::USER;
    if elf.stack_policy().writable {
        stack_flags |= PageTableFlags::WRITABLE;
    }
    let stack_base = USER_STACK_TOP - (USER_STACK_PAGES * PAGE_SIZE) as u64;
    for i in 0..USER_STACK_PAGES {
        let va = VirtAddr::new_truncate(stack_base + (i * PAGE_SIZE) as u64);
        let pa = stack_run.start_address() + (i * PAGE_SIZE) as u64;
        aspace
            .map_page(va, pa, stack_flags, &mut pmm::GlobalFrameAlloc)
            .map_err(|_| LoadError::OutOfMemory)?;
    }
    // SAFETY: The stack run was just allocated and is HHDM-addressable.
    unsafe {
        core::ptr::write_bytes(
            hhdm::phys_to_virt(stack_run.start_address()).as_mut_ptr::<u8>(),
            0,
            USER_STACK_PAGES * PAGE_SIZE,
        );
    }

    // Seed argc/argv on the user stack, top-down.
    let (user_rsp, argc, argv_va) = seed_argv(aspace, argv);

    // The user heap begins after the highest loaded segment.
    let heap_start = page_align_up(elf.highest_load_end());

    // Both start paths are pre-seeded: the voluntary path enters through
    // the trampoline reading this frame, the preemptive path copies it
    // onto the interrupt stack.
    let mut proc = Box::new(new_user_record(name));
    proc.kernel_stack = kernel_stack;
    proc.kernel_stack_top = kernel_stack_top;
    proc.user_stack_top = VirtAddr::new_truncate(USER_STACK_TOP);
    proc.heap_start = heap_start;
    proc.heap_end = heap_start;

    proc.frame.iret.rip = elf.entry_point();
    proc.frame.iret.cs = u64::from(USER_CODE_SELECTOR);
    proc.frame.iret.rflags = INITIAL_RFLAGS;
    proc.frame.iret.rsp = user_rsp;
    proc.frame.iret.ss = u64::from(USER_DATA_SELECTOR);
    proc.frame.regs.rdi = argc;
    proc.frame.regs.rsi = argv_va;

    // Kernel-stack return frame pointing at the ring-3 entry trampoline.
    let slot = (kernel_stack_top - 8).as_mut_ptr::<u64>();
    // SAFETY: Topmost word of the freshly allocated kernel stack.
    unsafe { slot.write(user_process_entry as usize as u64) };
    proc.context.rsp = (kernel_stack_top - 8).as_u64();
    proc.context.rflags = INITIAL_RFLAGS;

    // The record now owns the address space; the remaining rollback entries
    // are disarmed by the caller on success.
    proc.address_space = rollback.aspace.take();

    let pid = proc::with_table(|table| {
        let pid = next_user_pid(table);
        proc.pid = pid;
        table.insert(proc);
        pid
    });

    Ok(pid)
}

/// Writes the SysV AMD64 start-protocol data onto the mapped user stack:
/// argv strings (16-byte realigned after each), the argv pointer array
/// with its NULL terminator, then argc. Returns `(rsp, argc, argv)`.
fn seed_argv(aspace: &AddressSpace, argv: &[&str]) -> (u64, u64, u64) {
    let argc = argv.len().min(MAX_ARGS);
    let mut stack = USER_STACK_TOP;
    let mut arg_ptrs = [0u64; MAX_ARGS];

    for i in (0..argc).rev() {
        let arg = argv[i].as_bytes();
        stack -= arg.len() as u64 + 1;
        stack &= !0xF;

        for (j, &byte) in arg.iter().enumerate() {
            poke_user(aspace, stack + j as u64, byte);
        }
        poke_user(aspace, stack + arg.len() as u64, 0);
        arg_ptrs[i] = stack;
    }

    // argv array: argc pointers plus the trailing NULL.
    stack -= ((argc + 1) * 8) as u64;
    stack &= !0xF;
    let argv_va = stack;
    for (i, &ptr) in arg_ptrs[..argc].iter().enumerate() {
        poke_user_u64(aspace, argv_va + (i * 8) as u64, ptr);
    }
    poke_user_u64(aspace, argv_va + (argc * 8) as u64, 0);

    // argc as a 64-bit word, leaving RSP 16-byte aligned.
    stack -= 8;
    stack &= !0xF;
    poke_user_u64(aspace, stack, argc as u64);

    (stack, argc as u64, argv_va)
}

fn new_user_record(name: &str) -> Process {
    let mut record = Process::blank(0, name, true);
    record.state = ProcState::Ready;
    record
}

fn next_user_pid(table: &mut proc::ProcessTable) -> u32 {
    let mut pid = FIRST_USER_PID;
    while table.get_mut(pid).is_some() {
        pid += 1;
    }
    pid
}

/// Loads the image and seeds `argv[0] = name` when the caller passes no
/// arguments, then performs the first voluntary switch into the process.
///
/// # Errors
///
/// Propagates [`load`] failures.
pub fn spawn(name: &str, image: &[u8], argv: &[&str]) -> Result<u32, LoadError> {
    let default_argv = [name];
    let argv: &[&str] = if argv.is_empty() { &default_argv } else { argv };

    let pid = load(name, image, argv)?;
    proc::switch_to(pid);
    Ok(pid)
}
