//! Kernel panic handler: log and halt.

use sable_core::kfatal;

use crate::arch::x86_64::instructions;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    kfatal!("KERNEL PANIC: {}", info.message());
    if let Some(location) = info.location() {
        kfatal!("  at {}:{}", location.file(), location.line());
    }
    instructions::halt_loop();
}
