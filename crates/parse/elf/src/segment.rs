//! ELF64 segment (program header) iteration and loader-facing validation.
//!
//! Provides [`ElfFile`] as the main entry point for parsing an ELF64 binary,
//! and [`LoadSegment`] for iterating over validated `PT_LOAD` segments.

use crate::header::{ELF64_PHDR_SIZE, Elf64Header, Elf64ProgramHeader, ElfError};
use crate::{PF_W, PT_DYNAMIC, PT_GNU_STACK, PT_INTERP, PT_LOAD};

/// A parsed ELF64 file, holding a reference to the raw data and the parsed header.
#[derive(Debug, Clone, Copy)]
pub struct ElfFile<'a> {
    data: &'a [u8],
    header: Elf64Header,
}

/// A validated loadable segment extracted from an ELF64 file.
#[derive(Debug)]
pub struct LoadSegment<'a> {
    /// Virtual address where this segment should be mapped.
    pub vaddr: u64,
    /// File content of this segment (may be shorter than `memsz`; remainder is zero-filled).
    pub data: &'a [u8],
    /// Total size of the segment in memory.
    pub memsz: u64,
    /// Segment permission flags (`PF_R = 4`, `PF_W = 2`, `PF_X = 1`).
    pub flags: u32,
}

impl LoadSegment<'_> {
    /// Returns `true` if the segment is writable (`PF_W`).
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.flags & PF_W != 0
    }
}

/// User-stack permissions derived from `PT_GNU_STACK`.
///
/// Without NX support the executability bit carries no weight here; only the
/// writable bit of the marker is honored for the stack mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackPolicy {
    /// Whether the user stack should be mapped writable.
    pub writable: bool,
}

impl Default for StackPolicy {
    fn default() -> Self {
        Self { writable: true }
    }
}

impl<'a> ElfFile<'a> {
    /// Parse an ELF64 file from raw bytes.
    ///
    /// Beyond the header checks (magic, class, encoding, version, machine,
    /// type, fixed header sizes, program-header table bounds), this walks the
    /// program header table once and rejects files that require a dynamic
    /// linker (`PT_INTERP` or `PT_DYNAMIC`) and files whose `PT_LOAD`
    /// segments are malformed: `p_memsz < p_filesz`, file data out of
    /// bounds, or `p_vaddr` incongruent with `p_offset` modulo `p_align`.
    ///
    /// # Errors
    ///
    /// Returns [`ElfError`] if any validation fails.
    pub fn parse(data: &'a [u8]) -> Result<Self, ElfError> {
        let header = Elf64Header::parse(data)?;
        let file = Self { data, header };

        for phdr in file.program_headers() {
            match phdr.p_type {
                PT_INTERP | PT_DYNAMIC => return Err(ElfError::NeedsInterpreter),
                PT_LOAD => {
                    if phdr.p_memsz < phdr.p_filesz {
                        return Err(ElfError::BadSegment);
                    }
                    let file_end = phdr
                        .p_offset
                        .checked_add(phdr.p_filesz)
                        .ok_or(ElfError::BadSegment)?;
                    if file_end > data.len() as u64 {
                        return Err(ElfError::BadSegment);
                    }
                    if phdr.p_align > 1
                        && phdr.p_vaddr % phdr.p_align != phdr.p_offset % phdr.p_align
                    {
                        return Err(ElfError::BadSegment);
                    }
                }
                _ => {}
            }
        }

        Ok(file)
    }

    /// Returns the virtual address of the entry point.
    #[must_use]
    pub fn entry_point(&self) -> u64 {
        self.header.e_entry
    }

    /// Returns the parsed ELF64 file header.
    #[must_use]
    pub fn header(&self) -> &Elf64Header {
        &self.header
    }

    /// Returns an iterator over all program headers.
    pub fn program_headers(&self) -> impl Iterator<Item = Elf64ProgramHeader> + 'a {
        let data = self.data;
        let phoff = self.header.e_phoff as usize;
        let phentsize = self.header.e_phentsize as usize;
        let phnum = self.header.e_phnum as usize;

        (0..phnum).filter_map(move |i| {
            let offset = phoff + i * phentsize;
            if offset + ELF64_PHDR_SIZE > data.len() {
                return None;
            }
            Some(Elf64ProgramHeader::parse(data, offset))
        })
    }

    /// Returns an iterator over `PT_LOAD` segments.
    ///
    /// Each yielded [`LoadSegment`] contains a slice into the original data
    /// for the file-backed portion and the total memory size (which may be
    /// larger if the segment has a `.bss`-like zero-fill region). Bounds
    /// were validated in [`parse`](Self::parse), so the slice is exact.
    pub fn load_segments(&self) -> impl Iterator<Item = LoadSegment<'a>> {
        let data = self.data;
        self.program_headers().filter_map(move |phdr| {
            if phdr.p_type != PT_LOAD {
                return None;
            }
            let start = phdr.p_offset as usize;
            let len = phdr.p_filesz as usize;
            Some(LoadSegment {
                vaddr: phdr.p_vaddr,
                data: &data[start..start + len],
                memsz: phdr.p_memsz,
                flags: phdr.p_flags,
            })
        })
    }

    /// Returns the user-stack policy derived from `PT_GNU_STACK`.
    ///
    /// Defaults to a writable stack when the marker is absent.
    #[must_use]
    pub fn stack_policy(&self) -> StackPolicy {
        for phdr in self.program_headers() {
            if phdr.p_type == PT_GNU_STACK {
                return StackPolicy {
                    writable: phdr.p_flags & PF_W != 0,
                };
            }
        }
        StackPolicy::default()
    }

    /// Returns the page-aligned end of the highest `PT_LOAD` segment, or 0
    /// if the file has no loadable segments. The user heap begins here.
    #[must_use]
    pub fn highest_load_end(&self) -> u64 {
        self.load_segments()
            .map(|seg| seg.vaddr + seg.memsz)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::tests::{append_phdr, make_elf_header};
    use crate::{PF_R, PF_X};

    /// Build a minimal ELF with one PT_LOAD segment containing `payload`.
    fn make_elf_with_load_segment(payload: &[u8]) -> Vec<u8> {
        let mut buf = make_elf_header();
        let data_offset = (64 + 56) as u64; // ehdr + 1 phdr
        append_phdr(
            &mut buf,
            PT_LOAD,
            PF_R | PF_X,
            data_offset,
            0x0040_0000 + (data_offset % 0x1000),
            payload.len() as u64,
            payload.len() as u64 + 0x100, // memsz > filesz (BSS region)
            0x1000,
        );
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn one_load_segment() {
        let payload = b"hello, elf!";
        let buf = make_elf_with_load_segment(payload);

        let elf = ElfFile::parse(&buf).expect("valid ELF");
        let segments: Vec<_> = elf.load_segments().collect();

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].data, payload);
        assert_eq!(segments[0].memsz, payload.len() as u64 + 0x100);
        assert!(!segments[0].is_writable());
    }

    #[test]
    fn reject_interp_segment() {
        let mut buf = make_elf_header();
        append_phdr(&mut buf, PT_INTERP, PF_R, 0, 0, 0, 0, 0);
        assert_eq!(ElfFile::parse(&buf).unwrap_err(), ElfError::NeedsInterpreter);
    }

    #[test]
    fn reject_dynamic_segment() {
        let mut buf = make_elf_header();
        append_phdr(&mut buf, PT_DYNAMIC, PF_R, 0, 0, 0, 0, 0);
        assert_eq!(ElfFile::parse(&buf).unwrap_err(), ElfError::NeedsInterpreter);
    }

    #[test]
    fn reject_memsz_smaller_than_filesz() {
        let mut buf = make_elf_header();
        append_phdr(&mut buf, PT_LOAD, PF_R, 120, 0x40_0000, 0x100, 0x80, 0x1000);
        assert_eq!(ElfFile::parse(&buf).unwrap_err(), ElfError::BadSegment);
    }

    #[test]
    fn reject_file_data_out_of_bounds() {
        let mut buf = make_elf_header();
        append_phdr(
            &mut buf,
            PT_LOAD,
            PF_R,
            0x10_0000,
            0x40_0000,
            0x100,
            0x100,
            0x1000,
        );
        assert_eq!(ElfFile::parse(&buf).unwrap_err(), ElfError::BadSegment);
    }

    #[test]
    fn reject_incongruent_alignment() {
        let mut buf = make_elf_header();
        // vaddr % align (0x500) != offset % align (120)
        append_phdr(&mut buf, PT_LOAD, PF_R, 120, 0x40_0500, 0, 0, 0x1000);
        assert_eq!(ElfFile::parse(&buf).unwrap_err(), ElfError::BadSegment);
    }

    #[test]
    fn stack_policy_default_writable() {
        let buf = make_elf_with_load_segment(b"x");
        let elf = ElfFile::parse(&buf).expect("valid ELF");
        assert!(elf.stack_policy().writable);
    }

    #[test]
    fn stack_policy_honors_gnu_stack() {
        let mut buf = make_elf_header();
        append_phdr(&mut buf, PT_GNU_STACK, PF_R, 0, 0, 0, 0, 0);
        let elf = ElfFile::parse(&buf).expect("valid ELF");
        assert!(!elf.stack_policy().writable);
    }

    #[test]
    fn highest_load_end() {
        let mut buf = make_elf_header();
        append_phdr(&mut buf, PT_LOAD, PF_R, 176, 0x40_0000 + 176 % 0x1000, 0, 0x800, 0x1000);
        append_phdr(&mut buf, PT_LOAD, PF_R | PF_W, 232, 0x60_0000 + 232 % 0x1000, 0, 0x1000, 0x1000);
        append_phdr(&mut buf, PT_GNU_STACK, PF_R | PF_W, 0, 0, 0, 0, 0);
        let elf = ElfFile::parse(&buf).expect("valid ELF");
        assert_eq!(elf.highest_load_end(), 0x60_0000 + 232 % 0x1000 + 0x1000);
    }

    #[test]
    fn bss_only_segment() {
        let mut buf = make_elf_header();
        append_phdr(&mut buf, PT_LOAD, PF_R | PF_W, 0, 0x60_0000, 0, 0x4000, 0);
        let elf = ElfFile::parse(&buf).expect("valid ELF");
        let segments: Vec<_> = elf.load_segments().collect();
        assert_eq!(segments.len(), 1);
        assert!(segments[0].data.is_empty());
        assert_eq!(segments[0].memsz, 0x4000);
    }
}
