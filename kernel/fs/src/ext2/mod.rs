//! Writable ext2 driver.
//!
//! Mounts revision 0/1 ext2 volumes, resolves paths lexically against a
//! caller-supplied working directory, reads through direct, single- and
//! double-indirect blocks (triple-indirect is not supported), and supports
//! creating, appending to, and truncating regular files. Nothing here is
//! journaled: writes are best-effort ordered, and a crash mid-operation may
//! leave orphan blocks.

extern crate alloc;

mod disk;
mod write;

#[cfg(test)]
mod tests;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use sable_driver_api::BlockDevice;

use crate::block::{read_bytes, write_bytes};
use crate::FsError;

pub use disk::{
    EXT2_MAGIC, FILE_TYPE_DIRECTORY, FILE_TYPE_REGULAR, Inode, ROOT_INODE, min_rec_len,
};
use disk::{
    GROUP_DESC_SIZE, GroupTable, INODE_SIZE, MODE_DIRECTORY, MODE_TYPE_MASK, SLOT_DOUBLE,
    SLOT_SINGLE, SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE, Superblock, parse_dirent,
};

/// Maximum length of a single path component.
pub const MAX_NAME_LEN: usize = 255;

/// Maximum length of a normalized path (matches the per-process cwd buffer).
pub const MAX_PATH_LEN: usize = 512;

/// File attributes returned by [`Ext2Fs::stat`].
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    /// File mode (type and permissions).
    pub mode: u16,
    /// Owner user id.
    pub uid: u16,
    /// Group id.
    pub gid: u16,
    /// File size in bytes (low 32 bits).
    pub size: u32,
    /// Access time (seconds).
    pub atime: u32,
    /// Inode change time (seconds).
    pub ctime: u32,
    /// Modification time (seconds).
    pub mtime: u32,
    /// Hard link count.
    pub links_count: u16,
    /// 512-byte sector count.
    pub blocks: u32,
}

/// A directory entry passed to the [`Ext2Fs::list_dir`] callback.
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Inode number.
    pub ino: u32,
    /// `FILE_TYPE_REGULAR`, `FILE_TYPE_DIRECTORY`, or the raw hint.
    pub file_type: u8,
    /// Entry name.
    pub name: String,
}

/// A mounted ext2 volume.
pub struct Ext2Fs {
    dev: Arc<dyn BlockDevice>,
    sb: Superblock,
    gdt: GroupTable,
    block_size: u32,
    groups: u32,
    /// Monotonic-seconds clock for timestamps; registered by the kernel.
    now: fn() -> u32,
}

impl core::fmt::Debug for Ext2Fs {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Ext2Fs")
            .field("block_size", &self.block_size)
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}

fn zero_clock() -> u32 {
    0
}

impl Ext2Fs {
    /// Mounts an ext2 volume from `dev`.
    ///
    /// Reads and caches the superblock and the group descriptor table.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::Io`] on device errors and [`FsError::Corrupt`] if
    /// the magic does not match.
    pub fn mount(dev: Arc<dyn BlockDevice>) -> Result<Self, FsError> {
        let mut raw_sb = [0u8; SUPERBLOCK_SIZE];
        read_bytes(dev.as_ref(), SUPERBLOCK_OFFSET, &mut raw_sb).map_err(|_| FsError::Io)?;
        let sb = Superblock::from_raw(raw_sb);
        if sb.magic() != EXT2_MAGIC {
            return Err(FsError::Corrupt);
        }

        let block_size = 1024u32 << sb.log_block_size();
        let data_blocks = sb.blocks_count().saturating_sub(sb.first_data_block());
        let groups = data_blocks.div_ceil(sb.blocks_per_group()).max(1);

        // The descriptor table sits in the block after the superblock.
        let gdt_start_block: u32 = if block_size == 1024 { 2 } else { 1 };
        let gdt_bytes = groups as usize * GROUP_DESC_SIZE;
        let gdt_blocks = gdt_bytes.div_ceil(block_size as usize);
        let mut raw_gdt = vec![0u8; gdt_blocks * block_size as usize];
        read_bytes(
            dev.as_ref(),
            u64::from(gdt_start_block) * u64::from(block_size),
            &mut raw_gdt,
        )
        .map_err(|_| FsError::Io)?;

        Ok(Self {
            dev,
            sb,
            gdt: GroupTable::from_raw(raw_gdt),
            block_size,
            groups,
            now: zero_clock,
        })
    }

    /// Registers the monotonic-seconds clock used for timestamps.
    pub fn set_clock(&mut self, now: fn() -> u32) {
        self.now = now;
    }

    /// Returns the volume's block size in bytes.
    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Returns the number of block groups.
    #[must_use]
    pub fn group_count(&self) -> u32 {
        self.groups
    }

    // -- block and inode I/O ------------------------------------------------

    pub(crate) fn read_block(&self, blk: u32, out: &mut [u8]) -> Result<(), FsError> {
        read_bytes(
            self.dev.as_ref(),
            u64::from(blk) * u64::from(self.block_size),
            out,
        )
        .map_err(|_| FsError::Io)
    }

    pub(crate) fn write_block(&self, blk: u32, src: &[u8]) -> Result<(), FsError> {
        write_bytes(
            self.dev.as_ref(),
            u64::from(blk) * u64::from(self.block_size),
            src,
        )
        .map_err(|_| FsError::Io)
    }

    /// Locates inode `ino` in its table: `(table_block, byte_offset)`.
    fn inode_slot(&self, ino: u32) -> Result<(u32, usize), FsError> {
        if ino == 0 || ino > self.sb.inodes_count() {
            return Err(FsError::Corrupt);
        }
        let group = (ino - 1) / self.sb.inodes_per_group();
        let index = (ino - 1) % self.sb.inodes_per_group();
        let isz = self.sb.inode_size();
        let inodes_per_block = self.block_size / isz;
        let table_block = self.gdt.inode_table(group) + index / inodes_per_block;
        let offset = (index % inodes_per_block) * isz;
        Ok((table_block, offset as usize))
    }

    pub(crate) fn read_inode(&self, ino: u32) -> Result<Inode, FsError> {
        let (block, offset) = self.inode_slot(ino)?;
        let mut buf = vec![0u8; self.block_size as usize];
        self.read_block(block, &mut buf)?;

        let mut raw = [0u8; INODE_SIZE];
        raw.copy_from_slice(&buf[offset..offset + INODE_SIZE]);
        Ok(Inode::from_raw(raw))
    }

    pub(crate) fn write_inode(&self, ino: u32, inode: &Inode) -> Result<(), FsError> {
        let (block, offset) = self.inode_slot(ino)?;
        let mut buf = vec![0u8; self.block_size as usize];
        self.read_block(block, &mut buf)?;
        buf[offset..offset + INODE_SIZE].copy_from_slice(inode.raw());
        self.write_block(block, &buf)
    }

    /// Maps a file block index to a physical block number (0 for holes).
    ///
    /// Walks direct slots 0..11, the single-indirect block, then the
    /// double-indirect tree. Triple-indirect is not supported and reads as
    /// a hole.
    pub(crate) fn block_of_file(&self, inode: &Inode, file_block: u32) -> Result<u32, FsError> {
        if file_block < SLOT_SINGLE as u32 {
            return Ok(inode.block(file_block as usize));
        }

        let per = self.block_size / 4;
        let mut index = file_block - SLOT_SINGLE as u32;

        if index < per {
            let single = inode.block(SLOT_SINGLE);
            if single == 0 {
                return Ok(0);
            }
            return self.read_indirect_slot(single, index);
        }

        index -= per;
        if index < per * per {
            let double = inode.block(SLOT_DOUBLE);
            if double == 0 {
                return Ok(0);
            }
            let l1 = self.read_indirect_slot(double, index / per)?;
            if l1 == 0 {
                return Ok(0);
            }
            return self.read_indirect_slot(l1, index % per);
        }

        Ok(0)
    }

    /// Reads slot `index` of the indirection block `blk`.
    fn read_indirect_slot(&self, blk: u32, index: u32) -> Result<u32, FsError> {
        let mut buf = vec![0u8; self.block_size as usize];
        self.read_block(blk, &mut buf)?;
        let off = index as usize * 4;
        Ok(u32::from_le_bytes([
            buf[off],
            buf[off + 1],
            buf[off + 2],
            buf[off + 3],
        ]))
    }

    /// Reads `out.len()` bytes of file content starting at byte `pos`.
    ///
    /// Fails with [`FsError::Corrupt`] when the range runs into a hole;
    /// files written by this driver are dense.
    pub(crate) fn read_file_range(
        &self,
        inode: &Inode,
        mut pos: u32,
        out: &mut [u8],
    ) -> Result<(), FsError> {
        let block_size = self.block_size;
        let mut buf = vec![0u8; block_size as usize];
        let mut done = 0usize;

        while done < out.len() {
            let blk = self.block_of_file(inode, pos / block_size)?;
            if blk == 0 {
                return Err(FsError::Corrupt);
            }
            self.read_block(blk, &mut buf)?;

            let off = (pos % block_size) as usize;
            let take = (block_size as usize - off).min(out.len() - done);
            out[done..done + take].copy_from_slice(&buf[off..off + take]);
            done += take;
            pos += take as u32;
        }
        Ok(())
    }

    // -- path resolution ----------------------------------------------------

    /// Joins `path` onto `cwd` (when relative) and resolves `.` and `..`
    /// lexically. `..` at the root stays at the root. The result is absolute
    /// with no trailing slash (except the root itself).
    #[must_use]
    pub fn normalize_path(cwd: &str, path: &str) -> String {
        let mut components: Vec<&str> = Vec::new();

        let absolute = path.starts_with('/');
        if !absolute {
            for comp in cwd.split('/') {
                match comp {
                    "" | "." => {}
                    ".." => {
                        components.pop();
                    }
                    name => components.push(name),
                }
            }
        }
        for comp in path.split('/') {
            match comp {
                "" | "." => {}
                ".." => {
                    components.pop();
                }
                name => components.push(name),
            }
        }

        if components.is_empty() {
            return String::from("/");
        }
        let mut out = String::new();
        for comp in components {
            out.push('/');
            out.push_str(comp);
        }
        out
    }

    /// Scans directory `dir` for an entry named `name`.
    ///
    /// Directory entries are walked linearly, block by block. Entries with
    /// inode 0 (deleted) are skipped.
    fn lookup_in_dir(&self, dir: &Inode, name: &str) -> Result<Option<u32>, FsError> {
        let block_size = self.block_size;
        let size = dir.size_lo();
        let mut buf = vec![0u8; block_size as usize];

        let mut pos = 0u32;
        while pos < size {
            let blk = self.block_of_file(dir, pos / block_size)?;
            if blk == 0 {
                return Err(FsError::Corrupt);
            }
            self.read_block(blk, &mut buf)?;

            let mut inner = (pos % block_size) as usize;
            while inner < block_size as usize && pos < size {
                let Some(de) = parse_dirent(&buf, inner) else {
                    break;
                };
                if de.inode != 0 && de.name_len as usize == name.len() {
                    let name_bytes = &buf[inner + 8..inner + 8 + de.name_len as usize];
                    if name_bytes == name.as_bytes() {
                        return Ok(Some(de.inode));
                    }
                }
                pos += u32::from(de.rec_len);
                inner += de.rec_len as usize;
            }
        }
        Ok(None)
    }

    /// Resolves a path to an inode number.
    ///
    /// Absolute paths start at inode 2; relative paths are joined with
    /// `cwd` first. Resolution of `.` and `..` is purely lexical.
    ///
    /// # Errors
    ///
    /// [`FsError::NotFound`] when a component is missing,
    /// [`FsError::NotADirectory`] when a non-final component is not a
    /// directory.
    pub fn resolve(&self, cwd: &str, path: &str) -> Result<u32, FsError> {
        let normalized = Self::normalize_path(cwd, path);
        let mut cur = ROOT_INODE;

        for comp in normalized.split('/').filter(|c| !c.is_empty()) {
            let dir = self.read_inode(cur)?;
            if !dir.is_dir() {
                return Err(FsError::NotADirectory);
            }
            cur = self
                .lookup_in_dir(&dir, comp)?
                .ok_or(FsError::NotFound)?;
        }
        Ok(cur)
    }

    // -- public read API ----------------------------------------------------

    /// Returns the attributes of the file or directory at `path`.
    ///
    /// # Errors
    ///
    /// Propagates resolution and I/O errors.
    pub fn stat(&self, cwd: &str, path: &str) -> Result<Stat, FsError> {
        let ino = self.resolve(cwd, path)?;
        let inode = self.read_inode(ino)?;
        Ok(Stat {
            mode: inode.mode(),
            uid: inode.uid(),
            gid: inode.gid(),
            size: inode.size_lo(),
            atime: inode.atime(),
            ctime: inode.ctime(),
            mtime: inode.mtime(),
            links_count: inode.links_count(),
            blocks: inode.blocks(),
        })
    }

    /// Returns `true` if `path` resolves to a directory.
    #[must_use]
    pub fn is_dir(&self, cwd: &str, path: &str) -> bool {
        self.stat(cwd, path)
            .is_ok_and(|st| st.mode & MODE_TYPE_MASK == MODE_DIRECTORY)
    }

    /// Returns `true` if `path` resolves to a regular file.
    #[must_use]
    pub fn is_file(&self, cwd: &str, path: &str) -> bool {
        self.stat(cwd, path)
            .is_ok_and(|st| st.mode & MODE_TYPE_MASK == disk::MODE_REGULAR)
    }

    /// Reads an entire regular file into a fresh buffer.
    ///
    /// # Errors
    ///
    /// [`FsError::NotAFile`] when `path` is not a regular file, plus
    /// resolution and I/O errors.
    pub fn read_entire_file(&self, cwd: &str, path: &str) -> Result<Vec<u8>, FsError> {
        let ino = self.resolve(cwd, path)?;
        let inode = self.read_inode(ino)?;
        if !inode.is_regular() {
            return Err(FsError::NotAFile);
        }

        let size = inode.size_lo() as usize;
        let mut out = vec![0u8; size];
        if size > 0 {
            self.read_file_range(&inode, 0, &mut out)?;
        }
        Ok(out)
    }

    /// Invokes `cb` for every live entry of the directory at `path`.
    ///
    /// When the volume does not advertise the filetype feature
    /// (`file_type == 0`), the entry's inode mode is consulted so callers
    /// can still tell directories from files.
    ///
    /// # Errors
    ///
    /// [`FsError::NotADirectory`] when `path` is not a directory, plus
    /// resolution and I/O errors.
    pub fn list_dir(
        &self,
        cwd: &str,
        path: &str,
        mut cb: impl FnMut(&DirEntry),
    ) -> Result<(), FsError> {
        let ino = self.resolve(cwd, path)?;
        let dir = self.read_inode(ino)?;
        if !dir.is_dir() {
            return Err(FsError::NotADirectory);
        }

        let block_size = self.block_size;
        let size = dir.size_lo();
        let mut buf = vec![0u8; block_size as usize];

        let mut pos = 0u32;
        while pos < size {
            let blk = self.block_of_file(&dir, pos / block_size)?;
            if blk == 0 {
                return Err(FsError::Corrupt);
            }
            self.read_block(blk, &mut buf)?;

            let mut inner = (pos % block_size) as usize;
            while inner < block_size as usize && pos < size {
                let Some(de) = parse_dirent(&buf, inner) else {
                    break;
                };
                if de.inode != 0 && de.name_len != 0 {
                    let name_bytes = &buf[inner + 8..inner + 8 + de.name_len as usize];
                    let mut file_type = de.file_type;
                    if file_type == 0 {
                        if let Ok(target) = self.read_inode(de.inode) {
                            file_type = if target.is_dir() {
                                FILE_TYPE_DIRECTORY
                            } else {
                                FILE_TYPE_REGULAR
                            };
                        }
                    }
                    cb(&DirEntry {
                        ino: de.inode,
                        file_type,
                        name: String::from_utf8_lossy(name_bytes).into_owned(),
                    });
                }
                pos += u32::from(de.rec_len);
                inner += de.rec_len as usize;
            }
        }
        Ok(())
    }

    /// Validates `path` as a directory and returns the normalized absolute
    /// path to store as the new working directory.
    ///
    /// # Errors
    ///
    /// [`FsError::NotADirectory`] when the target is not a directory, plus
    /// resolution errors.
    pub fn change_dir(&self, cwd: &str, path: &str) -> Result<String, FsError> {
        let normalized = Self::normalize_path(cwd, path);
        if normalized.len() >= MAX_PATH_LEN {
            return Err(FsError::NotFound);
        }
        let ino = self.resolve("/", &normalized)?;
        let inode = self.read_inode(ino)?;
        if !inode.is_dir() {
            return Err(FsError::NotADirectory);
        }
        Ok(normalized)
    }
}
