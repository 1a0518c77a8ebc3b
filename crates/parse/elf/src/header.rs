//! ELF64 header parsing.
//!
//! Parses the ELF64 file header and program headers from raw byte slices
//! using safe field extraction via `from_le_bytes()`.

use core::fmt;

/// ELF magic bytes: `\x7fELF`.
const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// ELF class: 64-bit.
const ELFCLASS64: u8 = 2;

/// ELF data encoding: little-endian.
const ELFDATA2LSB: u8 = 1;

/// ELF identification version: current.
const EV_CURRENT: u8 = 1;

/// ELF type: executable.
const ET_EXEC: u16 = 2;

/// ELF type: shared object (static PIE).
const ET_DYN: u16 = 3;

/// ELF machine: x86-64.
const EM_X86_64: u16 = 62;

/// Size of an ELF64 file header (64 bytes).
pub(crate) const ELF64_EHDR_SIZE: usize = 64;

/// Size of an ELF64 program header entry (56 bytes).
pub(crate) const ELF64_PHDR_SIZE: usize = 56;

/// Read a little-endian `u16` from `data` at byte offset `off`.
///
/// # Panics
///
/// Panics if `off + 2 > data.len()`. Callers must bounds-check first.
pub(crate) fn le_u16(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

/// Read a little-endian `u32` from `data` at byte offset `off`.
pub(crate) fn le_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

/// Read a little-endian `u64` from `data` at byte offset `off`.
pub(crate) fn le_u64(data: &[u8], off: usize) -> u64 {
    u64::from_le_bytes([
        data[off],
        data[off + 1],
        data[off + 2],
        data[off + 3],
        data[off + 4],
        data[off + 5],
        data[off + 6],
        data[off + 7],
    ])
}

/// Errors that can occur when parsing an ELF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// The file does not start with the ELF magic bytes.
    BadMagic,
    /// The ELF file is not 64-bit (`ELFCLASS64`).
    UnsupportedClass,
    /// The ELF file is not little-endian.
    UnsupportedEncoding,
    /// The ELF identification version is not `EV_CURRENT`.
    UnsupportedVersion,
    /// The ELF machine type is not `EM_X86_64`.
    UnsupportedMachine,
    /// The ELF type is not `ET_EXEC` or `ET_DYN`.
    UnsupportedType,
    /// A declared header size does not match the ELF64 fixed layout.
    BadHeaderSize,
    /// The input data is too short for the declared structure.
    Truncated,
    /// A header offset or size is out of bounds.
    InvalidOffset,
    /// The file requires a dynamic linker (`PT_INTERP` / `PT_DYNAMIC`).
    NeedsInterpreter,
    /// A loadable segment is malformed (sizes or alignment congruence).
    BadSegment,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "invalid ELF magic bytes"),
            Self::UnsupportedClass => write!(f, "unsupported ELF class (expected ELFCLASS64)"),
            Self::UnsupportedEncoding => {
                write!(f, "unsupported data encoding (expected little-endian)")
            }
            Self::UnsupportedVersion => write!(f, "unsupported ELF version"),
            Self::UnsupportedMachine => {
                write!(f, "unsupported machine type (expected EM_X86_64)")
            }
            Self::UnsupportedType => write!(f, "unsupported ELF type (expected ET_EXEC or ET_DYN)"),
            Self::BadHeaderSize => write!(f, "header size fields do not match ELF64 layout"),
            Self::Truncated => write!(f, "input data truncated"),
            Self::InvalidOffset => write!(f, "invalid header offset or size"),
            Self::NeedsInterpreter => write!(f, "dynamic executables are not supported"),
            Self::BadSegment => write!(f, "malformed loadable segment"),
        }
    }
}

/// Parsed ELF64 file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf64Header {
    /// ELF type (`ET_EXEC` or `ET_DYN`).
    pub e_type: u16,
    /// Target machine architecture.
    pub e_machine: u16,
    /// Virtual address of the entry point.
    pub e_entry: u64,
    /// Offset of the program header table in the file.
    pub e_phoff: u64,
    /// Number of program header entries.
    pub e_phnum: u16,
    /// Size of each program header entry.
    pub e_phentsize: u16,
}

impl Elf64Header {
    /// Parse an ELF64 file header from raw bytes.
    ///
    /// Validates the magic, class, encoding, version, machine type, ELF
    /// type, the fixed header sizes, that at least one program header
    /// exists, and that the program header table fits within `data`.
    ///
    /// # Errors
    ///
    /// Returns [`ElfError`] if validation fails or the data is too short.
    pub fn parse(data: &[u8]) -> Result<Self, ElfError> {
        if data.len() < ELF64_EHDR_SIZE {
            return Err(ElfError::Truncated);
        }

        if data[..4] != ELF_MAGIC {
            return Err(ElfError::BadMagic);
        }
        if data[4] != ELFCLASS64 {
            return Err(ElfError::UnsupportedClass);
        }
        if data[5] != ELFDATA2LSB {
            return Err(ElfError::UnsupportedEncoding);
        }
        if data[6] != EV_CURRENT {
            return Err(ElfError::UnsupportedVersion);
        }

        let e_type = le_u16(data, 16);
        if e_type != ET_EXEC && e_type != ET_DYN {
            return Err(ElfError::UnsupportedType);
        }

        let e_machine = le_u16(data, 18);
        if e_machine != EM_X86_64 {
            return Err(ElfError::UnsupportedMachine);
        }

        let e_entry = le_u64(data, 24);
        let e_phoff = le_u64(data, 32);
        let e_ehsize = le_u16(data, 52);
        let e_phentsize = le_u16(data, 54);
        let e_phnum = le_u16(data, 56);

        // The loader only understands the fixed ELF64 layout.
        if e_ehsize as usize != ELF64_EHDR_SIZE || e_phentsize as usize != ELF64_PHDR_SIZE {
            return Err(ElfError::BadHeaderSize);
        }
        if e_phnum == 0 {
            return Err(ElfError::InvalidOffset);
        }

        let ph_end = e_phoff
            .checked_add(u64::from(e_phnum) * u64::from(e_phentsize))
            .ok_or(ElfError::InvalidOffset)?;
        if e_phoff == 0 || ph_end > data.len() as u64 {
            return Err(ElfError::InvalidOffset);
        }

        Ok(Self {
            e_type,
            e_machine,
            e_entry,
            e_phoff,
            e_phnum,
            e_phentsize,
        })
    }
}

/// Parsed ELF64 program header entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf64ProgramHeader {
    /// Segment type (`PT_LOAD`, `PT_DYNAMIC`, ...).
    pub p_type: u32,
    /// Segment permission flags (`PF_R` / `PF_W` / `PF_X`).
    pub p_flags: u32,
    /// Offset of the segment data in the file.
    pub p_offset: u64,
    /// Virtual address where the segment should be mapped.
    pub p_vaddr: u64,
    /// Number of bytes backed by file data.
    pub p_filesz: u64,
    /// Total size of the segment in memory (`>= p_filesz`).
    pub p_memsz: u64,
    /// Required alignment of the segment.
    pub p_align: u64,
}

impl Elf64ProgramHeader {
    /// Parse a program header entry at byte offset `off`.
    ///
    /// The caller must have bounds-checked `off + 56 <= data.len()`.
    pub(crate) fn parse(data: &[u8], off: usize) -> Self {
        Self {
            p_type: le_u32(data, off),
            p_flags: le_u32(data, off + 4),
            p_offset: le_u64(data, off + 8),
            p_vaddr: le_u64(data, off + 16),
            p_filesz: le_u64(data, off + 32),
            p_memsz: le_u64(data, off + 40),
            p_align: le_u64(data, off + 48),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a valid 64-byte ELF64 header with no program headers declared
    /// yet. Callers bump `e_phnum` (offset 56) as they append entries.
    pub(crate) fn make_elf_header() -> Vec<u8> {
        let mut buf = vec![0u8; ELF64_EHDR_SIZE];
        buf[..4].copy_from_slice(&ELF_MAGIC);
        buf[4] = ELFCLASS64;
        buf[5] = ELFDATA2LSB;
        buf[6] = EV_CURRENT;
        buf[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
        buf[18..20].copy_from_slice(&EM_X86_64.to_le_bytes());
        buf[24..32].copy_from_slice(&0x0040_1000u64.to_le_bytes()); // e_entry
        buf[32..40].copy_from_slice(&(ELF64_EHDR_SIZE as u64).to_le_bytes()); // e_phoff
        buf[52..54].copy_from_slice(&(ELF64_EHDR_SIZE as u16).to_le_bytes()); // e_ehsize
        buf[54..56].copy_from_slice(&(ELF64_PHDR_SIZE as u16).to_le_bytes()); // e_phentsize
        buf[56..58].copy_from_slice(&1u16.to_le_bytes()); // e_phnum (placeholder)
        buf
    }

    /// Appends a program header entry and bumps `e_phnum` accordingly.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn append_phdr(
        buf: &mut Vec<u8>,
        p_type: u32,
        p_flags: u32,
        p_offset: u64,
        p_vaddr: u64,
        p_filesz: u64,
        p_memsz: u64,
        p_align: u64,
    ) {
        let mut phdr = vec![0u8; ELF64_PHDR_SIZE];
        phdr[0..4].copy_from_slice(&p_type.to_le_bytes());
        phdr[4..8].copy_from_slice(&p_flags.to_le_bytes());
        phdr[8..16].copy_from_slice(&p_offset.to_le_bytes());
        phdr[16..24].copy_from_slice(&p_vaddr.to_le_bytes());
        phdr[24..32].copy_from_slice(&p_vaddr.to_le_bytes()); // p_paddr
        phdr[32..40].copy_from_slice(&p_filesz.to_le_bytes());
        phdr[40..48].copy_from_slice(&p_memsz.to_le_bytes());
        phdr[48..56].copy_from_slice(&p_align.to_le_bytes());
        buf.extend_from_slice(&phdr);

        // Count how many phdrs are now present after the header.
        let phnum = ((buf.len() - ELF64_EHDR_SIZE) / ELF64_PHDR_SIZE) as u16;
        buf[56..58].copy_from_slice(&phnum.to_le_bytes());
    }

    #[test]
    fn parse_valid_header() {
        let mut buf = make_elf_header();
        append_phdr(&mut buf, 1, 4 | 1, 0, 0x40_0000, 0, 0, 0x1000);
        let hdr = Elf64Header::parse(&buf).expect("valid header");
        assert_eq!(hdr.e_entry, 0x0040_1000);
        assert_eq!(hdr.e_machine, EM_X86_64);
        assert_eq!(hdr.e_phnum, 1);
    }

    #[test]
    fn reject_bad_magic() {
        let mut buf = make_elf_header();
        append_phdr(&mut buf, 1, 4, 0, 0, 0, 0, 0);
        buf[0] = 0x7E;
        assert_eq!(Elf64Header::parse(&buf), Err(ElfError::BadMagic));
    }

    #[test]
    fn reject_32bit_class() {
        let mut buf = make_elf_header();
        append_phdr(&mut buf, 1, 4, 0, 0, 0, 0, 0);
        buf[4] = 1;
        assert_eq!(Elf64Header::parse(&buf), Err(ElfError::UnsupportedClass));
    }

    #[test]
    fn reject_big_endian() {
        let mut buf = make_elf_header();
        append_phdr(&mut buf, 1, 4, 0, 0, 0, 0, 0);
        buf[5] = 2;
        assert_eq!(Elf64Header::parse(&buf), Err(ElfError::UnsupportedEncoding));
    }

    #[test]
    fn reject_bad_version() {
        let mut buf = make_elf_header();
        append_phdr(&mut buf, 1, 4, 0, 0, 0, 0, 0);
        buf[6] = 0;
        assert_eq!(Elf64Header::parse(&buf), Err(ElfError::UnsupportedVersion));
    }

    #[test]
    fn reject_relocatable_type() {
        let mut buf = make_elf_header();
        append_phdr(&mut buf, 1, 4, 0, 0, 0, 0, 0);
        buf[16..18].copy_from_slice(&1u16.to_le_bytes()); // ET_REL
        assert_eq!(Elf64Header::parse(&buf), Err(ElfError::UnsupportedType));
    }

    #[test]
    fn reject_wrong_machine() {
        let mut buf = make_elf_header();
        append_phdr(&mut buf, 1, 4, 0, 0, 0, 0, 0);
        buf[18..20].copy_from_slice(&183u16.to_le_bytes()); // EM_AARCH64
        assert_eq!(Elf64Header::parse(&buf), Err(ElfError::UnsupportedMachine));
    }

    #[test]
    fn reject_bad_phentsize() {
        let mut buf = make_elf_header();
        append_phdr(&mut buf, 1, 4, 0, 0, 0, 0, 0);
        buf[54..56].copy_from_slice(&32u16.to_le_bytes());
        assert_eq!(Elf64Header::parse(&buf), Err(ElfError::BadHeaderSize));
    }

    #[test]
    fn reject_zero_phnum() {
        let buf = make_elf_header();
        let mut buf2 = buf.clone();
        buf2[56..58].copy_from_slice(&0u16.to_le_bytes());
        assert_eq!(Elf64Header::parse(&buf2), Err(ElfError::InvalidOffset));
    }

    #[test]
    fn reject_phdr_table_out_of_bounds() {
        let buf = make_elf_header(); // declares one phdr but none appended
        assert_eq!(Elf64Header::parse(&buf), Err(ElfError::InvalidOffset));
    }

    #[test]
    fn reject_truncated() {
        assert_eq!(Elf64Header::parse(&[0u8; 32]), Err(ElfError::Truncated));
    }

    #[test]
    fn accept_pie() {
        let mut buf = make_elf_header();
        buf[16..18].copy_from_slice(&ET_DYN.to_le_bytes());
        append_phdr(&mut buf, 1, 4, 0, 0, 0, 0, 0);
        assert!(Elf64Header::parse(&buf).is_ok());
    }
}
