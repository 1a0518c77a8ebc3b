//! x86-64 architecture support: segmentation, interrupt plumbing, context
//! switching, and privileged instructions.

pub mod context;
pub mod frame;
pub mod gdt;
pub mod idt;
pub mod instructions;
pub mod interrupts;
pub mod pic;
