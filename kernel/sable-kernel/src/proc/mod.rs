//! Process management.
//!
//! The registry owns every [`Process`] record (boxed, so addresses stay
//! stable); the scheduler holds only the current pid. Kernel threads start
//! through [`kernel_thread_entry`]; user processes are built by the ELF
//! loader and start through [`user_process_entry`], which drops into ring 3
//! via the pre-seeded interrupt frame.
//!
//! Destruction returns every owned frame: mapped lower-half leaves (minus
//! the framebuffer-reserved range), the user and kernel stacks, and the
//! page-table hierarchy. It never runs on the currently executing process;
//! terminated processes linger until the next cleanup pass.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use sable_core::addr::{PhysAddr, VirtAddr};
use sable_core::paging::{PhysFrame, Size4KiB};
use sable_core::sync::SpinLock;
use sable_core::kdebug;
use sable_mm::address_space::AddressSpace;

use crate::arch::x86_64::context::{Context, kernel_thread_entry, switch_context};
use crate::arch::x86_64::frame::InterruptFrame;
use crate::arch::x86_64::{gdt, instructions};
use crate::config::{KERNEL_STACK_PAGES, MAX_FDS, MAX_PROC_NAME, PAGE_SIZE};
use crate::mm::{hhdm, pmm, vmm};
use crate::time;

pub use crate::arch::x86_64::context::user_process_entry;

/// Initial RFLAGS for every new context: IF set plus the reserved bit.
pub const INITIAL_RFLAGS: u64 = 0x202;

/// Scheduling state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    /// Runnable, waiting for a time slice.
    Ready,
    /// Currently executing.
    Running,
    /// Waiting for `sleep_until` ticks.
    Sleeping,
    /// Dead; reclaimed at the next cleanup pass.
    Terminated,
}

/// An open file: contents loaded into kernel memory at open time.
pub struct FdFile {
    /// File name (for diagnostics).
    pub name: String,
    /// File contents.
    pub data: Vec<u8>,
    /// Read cursor.
    pub offset: usize,
    /// Open flags.
    pub flags: u32,
}

/// A physical range that must survive process teardown (the framebuffer).
#[derive(Debug, Clone, Copy)]
pub struct FbReservation {
    /// First reserved physical address.
    pub phys_base: u64,
    /// Length of the reservation in bytes.
    pub size: u64,
    /// Where the range is mapped in the process.
    pub virt_base: u64,
}

impl FbReservation {
    /// Returns `true` when `phys` lies inside the reservation.
    #[must_use]
    pub fn contains(&self, phys: u64) -> bool {
        let end = self.phys_base.wrapping_add(self.size);
        end >= self.phys_base && phys >= self.phys_base && phys < end
    }
}

/// A process record.
pub struct Process {
    /// Process id.
    pub pid: u32,
    /// Printable name (truncated to 63 bytes).
    pub name: String,
    /// `true` for ring-3 processes, `false` for kernel threads.
    pub user: bool,
    /// Scheduling state.
    pub state: ProcState,
    /// Callee-saved context for voluntary switches.
    pub context: Context,
    /// Full saved frame for preemptive switches (and first user entry).
    pub frame: InterruptFrame,
    /// Base frame of the kernel stack run (2 pages).
    pub kernel_stack: PhysFrame<Size4KiB>,
    /// Top of the kernel stack (HHDM address); loaded into TSS RSP0.
    pub kernel_stack_top: VirtAddr,
    /// Top of the user stack, or zero for kernel threads.
    pub user_stack_top: VirtAddr,
    /// Start of the brk-managed user heap.
    pub heap_start: u64,
    /// Current end of the brk-managed user heap (half-open).
    pub heap_end: u64,
    /// Per-process address space (`None` for kernel threads).
    pub address_space: Option<AddressSpace>,
    /// Set once a timer interrupt has saved a full frame.
    pub has_been_interrupted: bool,
    /// Tick at which a sleeping process becomes READY again.
    pub sleep_until: u64,
    /// Set when a sleep was cut short (no path sets it today).
    pub sleep_interrupted: bool,
    /// Device range that teardown must not return to the PMM.
    pub fb_reservation: Option<FbReservation>,
    /// Errno of the last failed syscall.
    pub last_errno: i32,
    /// Fixed-capacity file-descriptor table.
    pub fds: [Option<FdFile>; MAX_FDS],
    /// Working directory.
    pub cwd: String,
    /// Tick count at creation.
    pub start_ticks: u64,
}

impl Process {
    /// Creates an empty record; the caller fills in stacks, address space,
    /// and pid before inserting it into the registry.
    #[must_use]
    pub(crate) fn blank(pid: u32, name: &str, user: bool) -> Self {
        let mut truncated = String::new();
        for ch in name.chars() {
            if truncated.len() + ch.len_utf8() > MAX_PROC_NAME {
                break;
            }
            truncated.push(ch);
        }
        Self {
            pid,
            name: truncated,
            user,
            state: ProcState::Ready,
            context: Context::default(),
            frame: InterruptFrame::default(),
            kernel_stack: PhysFrame::containing_address(PhysAddr::zero()),
            kernel_stack_top: VirtAddr::zero(),
            user_stack_top: VirtAddr::zero(),
            heap_start: 0,
            heap_end: 0,
            address_space: None,
            has_been_interrupted: false,
            sleep_until: 0,
            sleep_interrupted: false,
            fb_reservation: None,
            last_errno: 0,
            fds: [const { None }; MAX_FDS],
            cwd: String::from("/"),
            start_ticks: time::ticks(),
        }
    }

    /// Returns the CR3 value for this process (kernel root for threads).
    #[must_use]
    pub fn page_root(&self) -> PhysAddr {
        self.address_space
            .as_ref()
            .map_or_else(vmm::kernel_root, AddressSpace::root_phys)
    }
}

/// The process registry: owns all records, tracks the current pid.
pub struct ProcessTable {
    procs: Vec<Box<Process>>,
    current: u32,
    next_kernel_pid: u32,
}

impl ProcessTable {
    /// Returns the process with `pid`.
    pub fn get_mut(&mut self, pid: u32) -> Option<&mut Process> {
        self.procs.iter_mut().map(|b| b.as_mut()).find(|p| p.pid == pid)
    }

    /// Returns the currently executing process.
    pub fn current_mut(&mut self) -> &mut Process {
        let pid = self.current;
        self.get_mut(pid).expect("current process missing")
    }

    /// Returns the current pid.
    #[must_use]
    pub fn current_pid(&self) -> u32 {
        self.current
    }

    /// Makes `pid` current.
    pub fn set_current(&mut self, pid: u32) {
        self.current = pid;
    }

    /// Iterates over all processes.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Process> {
        self.procs.iter_mut().map(|b| b.as_mut())
    }

    /// Picks the next READY user process after `from`, round-robin over the
    /// registry order. The idle process (pid 0) is never selected.
    #[must_use]
    pub fn next_ready_user(&self, from: u32) -> Option<u32> {
        let len = self.procs.len();
        let start = self
            .procs
            .iter()
            .position(|p| p.pid == from)
            .map_or(0, |i| i + 1);

        for offset in 0..len {
            let p = &self.procs[(start + offset) % len];
            if p.pid != 0 && p.pid != from && p.user && p.state == ProcState::Ready {
                return Some(p.pid);
            }
        }
        None
    }

    /// Adds a process to the registry.
    pub fn insert(&mut self, proc: Box<Process>) {
        self.procs.push(proc);
    }

    /// Destroys every terminated process except the current one.
    pub fn cleanup_terminated(&mut self) {
        let current = self.current;
        let mut i = 0;
        while i < self.procs.len() {
            if self.procs[i].state == ProcState::Terminated && self.procs[i].pid != current {
                let victim = self.procs.remove(i);
                destroy(victim);
            } else {
                i += 1;
            }
        }
    }
}

static TABLE: SpinLock<Option<ProcessTable>> = SpinLock::new(None);

/// Creates the registry and the idle process (pid 0).
///
/// Idle is the boot thread itself: it has no allocated stack, and its
/// context record is filled in the first time the kernel switches away.
pub fn init() {
    let mut idle = Box::new(Process::blank(0, "idle", false));
    idle.state = ProcState::Running;

    let mut table = TABLE.lock();
    assert!(table.is_none(), "process table already initialized");
    *table = Some(ProcessTable {
        procs: {
            let mut v = Vec::new();
            v.push(idle);
            v
        },
        current: 0,
        next_kernel_pid: 1,
    });
}

/// Executes a closure with the process table.
///
/// # Panics
///
/// Panics before [`init`].
pub fn with_table<R>(f: impl FnOnce(&mut ProcessTable) -> R) -> R {
    let mut table = TABLE.lock();
    f(table.as_mut().expect("process table not initialized"))
}

/// Like [`with_table`], but gives up instead of spinning when the table is
/// already locked. The timer interrupt uses this: a tick that lands while
/// ring-0 code is inside the table must not deadlock the only CPU.
pub fn try_with_table<R>(f: impl FnOnce(&mut ProcessTable) -> R) -> Option<R> {
    let mut table = TABLE.try_lock()?;
    table.as_mut().map(f)
}

/// Executes a closure with the current process.
pub fn with_current<R>(f: impl FnOnce(&mut Process) -> R) -> R {
    with_table(|t| f(t.current_mut()))
}

/// Returns the current pid.
#[must_use]
pub fn current_pid() -> u32 {
    with_table(ProcessTable::current_pid)
}

/// Returns a copy of the current process's name.
#[must_use]
pub fn current_name() -> String {
    with_current(|p| p.name.clone())
}

/// Returns the current process's working directory, or `None` before the
/// registry exists.
#[must_use]
pub fn try_current_cwd() -> Option<String> {
    let mut table = TABLE.lock();
    table.as_mut().map(|t| t.current_mut().cwd.clone())
}

/// Marks the current process terminated (reclaimed at the next cleanup).
pub fn terminate_current() {
    with_current(|p| p.state = ProcState::Terminated);
}

/// Allocates a kernel stack and returns `(base frame, stack top)`.
pub(crate) fn alloc_kernel_stack() -> Option<(PhysFrame<Size4KiB>, VirtAddr)> {
    let frame = pmm::alloc_frames(KERNEL_STACK_PAGES)?;
    let top = hhdm::phys_to_virt(frame.start_address()) + (KERNEL_STACK_PAGES * PAGE_SIZE) as u64;
    Some((frame, top))
}

/// Creates a kernel thread that runs `entry` and returns its pid.
///
/// The new thread's kernel stack carries the trampoline return address;
/// `r12` carries the entry function, exactly what
/// [`kernel_thread_entry`] expects.
pub fn create_kernel_thread(name: &str, entry: extern "C" fn()) -> Option<u32> {
    let (stack_frame, stack_top) = alloc_kernel_stack()?;

    with_table(|table| {
        let pid = table.next_kernel_pid;
        table.next_kernel_pid += 1;

        let mut proc = Box::new(Process::blank(pid, name, false));
        proc.kernel_stack = stack_frame;
        proc.kernel_stack_top = stack_top;

        // Seed the stack so switch_context "returns" into the trampoline.
        let slot = (stack_top - 8).as_mut_ptr::<u64>();
        // SAFETY: The slot is the topmost word of the freshly allocated,
        // HHDM-mapped kernel stack.
        unsafe { slot.write(kernel_thread_entry as usize as u64) };

        proc.context.rsp = (stack_top - 8).as_u64();
        proc.context.r12 = entry as usize as u64;
        proc.context.rflags = INITIAL_RFLAGS;

        table.insert(proc);
        Some(pid)
    })
}

/// Rust half of the kernel-thread trampoline: run the entry, terminate,
/// hand the CPU onward.
pub extern "C" fn kernel_thread_main(entry: extern "C" fn()) -> ! {
    entry();

    terminate_current();
    loop {
        let next = with_table(|t| {
            let current = t.current_pid();
            t.iter_mut()
                .find(|p| p.pid != current && p.state == ProcState::Ready)
                .map(|p| p.pid)
        });
        if let Some(pid) = next {
            switch_to(pid);
        }
        instructions::hlt();
    }
}

/// Returns a pointer to the current process's pre-seeded interrupt frame.
///
/// Called by the user-process trampoline on first entry to ring 3.
pub extern "C" fn current_initial_frame() -> *const InterruptFrame {
    with_current(|p| core::ptr::from_ref(&p.frame))
}

/// Voluntary switch to `pid`.
///
/// Installs the target's page table and kernel stack, swaps states, and
/// performs the callee-saved context switch. Afterwards (back on this
/// stack) terminated processes are reclaimed.
pub fn switch_to(pid: u32) {
    let mut pair: Option<(*mut Context, *const Context)> = None;

    with_table(|table| {
        if pid == table.current_pid() {
            return;
        }
        let Some(next) = table.get_mut(pid) else {
            return;
        };
        if next.state != ProcState::Ready && next.state != ProcState::Running {
            return;
        }

        let next_root = next.page_root();
        let next_stack_top = next.kernel_stack_top.as_u64();
        let next_ctx = core::ptr::from_ref(&next.context);
        next.state = ProcState::Running;

        let old = table.current_mut();
        if old.state == ProcState::Running {
            old.state = ProcState::Ready;
        }
        let old_ctx = core::ptr::from_mut(&mut old.context);

        // Install the target's world before the old one becomes reclaimable.
        // SAFETY: next_root is a valid PML4 sharing the kernel upper half.
        unsafe { vmm::switch_to(next_root) };
        if next_stack_top != 0 {
            gdt::set_kernel_stack(next_stack_top);
        }

        table.set_current(pid);
        pair = Some((old_ctx, next_ctx));
    });

    if let Some((old_ctx, new_ctx)) = pair {
        // SAFETY: Both contexts live in boxed process records that outlive
        // the switch; the table lock is released; CR3 and TSS are set.
        unsafe { switch_context(old_ctx, new_ctx) };

        // Running again on this stack: reap whatever died meanwhile.
        with_table(ProcessTable::cleanup_terminated);
    }
}

/// Destroys a process record, returning every owned frame to the PMM.
fn destroy(proc: Box<Process>) {
    kdebug!("destroying process {} ({})", proc.pid, proc.name);
    let proc = *proc;

    if let Some(aspace) = proc.address_space {
        // Free every mapped lower-half leaf, sparing the framebuffer.
        let reservation = proc.fb_reservation;
        aspace.for_each_lower_leaf(|_va, pa| {
            let reserved = reservation.is_some_and(|r| r.contains(pa.as_u64()));
            if !reserved {
                pmm::free_frame(PhysFrame::containing_address(pa));
            }
        });

        // Then the intermediate tables and the PML4 itself.
        aspace.destroy(&mut pmm::GlobalFrameAlloc);
    }

    // Kernel stack (idle has none).
    if proc.kernel_stack_top != VirtAddr::zero() {
        pmm::free_frames(proc.kernel_stack, KERNEL_STACK_PAGES);
    }

    // The record itself (name, fds, cwd) drops here.
}
