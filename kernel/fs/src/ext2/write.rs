//! Ext2 write paths: inode/block allocation, directory insertion, create,
//! append, truncate.
//!
//! The mutation order is fixed so that a crash leaves at worst orphan
//! blocks, never dangling directory entries: bitmap bits are set before the
//! structures that reference them are written, and the inode-bitmap bit is
//! rolled back when directory insertion finds no slack.

extern crate alloc;

use alloc::string::String;
use alloc::vec;

use crate::FsError;
use crate::block::write_bytes;

use super::disk::{
    FILE_TYPE_REGULAR, Inode, MODE_REGULAR, SLOT_DOUBLE, SLOT_SINGLE, SUPERBLOCK_OFFSET,
    min_rec_len, parse_dirent, set_dirent_rec_len, write_dirent,
};
use super::{Ext2Fs, MAX_NAME_LEN};

impl Ext2Fs {
    /// First block of the group descriptor table.
    fn gdt_start_block(&self) -> u32 {
        if self.block_size == 1024 { 2 } else { 1 }
    }

    /// Flushes the in-memory superblock and the whole descriptor table.
    fn flush_sb_and_gdt(&self) -> Result<(), FsError> {
        write_bytes(self.dev.as_ref(), SUPERBLOCK_OFFSET, self.sb.raw())
            .map_err(|_| FsError::Io)?;
        write_bytes(
            self.dev.as_ref(),
            u64::from(self.gdt_start_block()) * u64::from(self.block_size),
            self.gdt.raw(),
        )
        .map_err(|_| FsError::Io)
    }

    /// Writes zeroes over a whole block.
    fn zero_block(&self, blk: u32) -> Result<(), FsError> {
        let zeroes = vec![0u8; self.block_size as usize];
        self.write_block(blk, &zeroes)
    }

    // -- inode allocation ---------------------------------------------------

    /// Allocates an inode: first group with free inodes, first clear bit in
    /// its bitmap. Returns the global inode number (1-based).
    fn alloc_inode(&mut self) -> Result<u32, FsError> {
        let bits_per_block = self.block_size * 8;
        let per_group = self.sb.inodes_per_group();

        for group in 0..self.groups {
            if self.gdt.free_inodes_count(group) == 0 {
                continue;
            }

            let bitmap_blocks = per_group.div_ceil(bits_per_block);
            for bi in 0..bitmap_blocks {
                let bmp_block = self.gdt.inode_bitmap(group) + bi;
                let mut bmp = vec![0u8; self.block_size as usize];
                self.read_block(bmp_block, &mut bmp)?;

                let base = bi * bits_per_block;
                let limit = (per_group - base).min(bits_per_block);

                for i in 0..limit {
                    let byte = (i >> 3) as usize;
                    let mask = 1u8 << (i & 7);
                    if bmp[byte] & mask == 0 {
                        bmp[byte] |= mask;
                        self.write_block(bmp_block, &bmp)?;
                        return Ok(group * per_group + base + i + 1);
                    }
                }
            }
        }
        Err(FsError::NoSpace)
    }

    /// Clears the bitmap bit of `ino` again (directory insertion failed).
    fn rollback_inode_bit(&mut self, ino: u32) -> Result<(), FsError> {
        let per_group = self.sb.inodes_per_group();
        let group = (ino - 1) / per_group;
        let index = (ino - 1) % per_group;
        let bits_per_block = self.block_size * 8;

        let bmp_block = self.gdt.inode_bitmap(group) + index / bits_per_block;
        let bit = index % bits_per_block;

        let mut bmp = vec![0u8; self.block_size as usize];
        self.read_block(bmp_block, &mut bmp)?;
        bmp[(bit >> 3) as usize] &= !(1u8 << (bit & 7));
        self.write_block(bmp_block, &bmp)
    }

    // -- data block allocation ----------------------------------------------

    /// Allocates a data block in `group`, if it has one free.
    ///
    /// Bitmap bit `i` of group `g` covers block
    /// `first_data_block + g * blocks_per_group + i`.
    fn alloc_block_in_group(&mut self, group: u32) -> Result<Option<u32>, FsError> {
        if self.gdt.free_blocks_count(group) == 0 {
            return Ok(None);
        }

        let bits_per_block = self.block_size * 8;
        let per_group = self.sb.blocks_per_group();
        let bitmap_blocks = per_group.div_ceil(bits_per_block);

        for bi in 0..bitmap_blocks {
            let bmp_block = self.gdt.block_bitmap(group) + bi;
            let mut bmp = vec![0u8; self.block_size as usize];
            self.read_block(bmp_block, &mut bmp)?;

            let base = bi * bits_per_block;
            let limit = (per_group - base).min(bits_per_block);

            for i in 0..limit {
                let byte = (i >> 3) as usize;
                let mask = 1u8 << (i & 7);
                if bmp[byte] & mask == 0 {
                    bmp[byte] |= mask;
                    self.write_block(bmp_block, &bmp)?;

                    let blk =
                        self.sb.first_data_block() + group * per_group + base + i;

                    self.sb
                        .set_free_blocks_count(self.sb.free_blocks_count().saturating_sub(1));
                    self.gdt.set_free_blocks_count(
                        group,
                        self.gdt.free_blocks_count(group).saturating_sub(1),
                    );

                    self.zero_block(blk)?;
                    self.flush_sb_and_gdt()?;
                    return Ok(Some(blk));
                }
            }
        }
        Ok(None)
    }

    /// Allocates a data block anywhere, first-fit over groups.
    fn alloc_block(&mut self) -> Result<u32, FsError> {
        for group in 0..self.groups {
            if let Some(blk) = self.alloc_block_in_group(group)? {
                return Ok(blk);
            }
        }
        Err(FsError::NoSpace)
    }

    /// Frees a data block: clears its bitmap bit, bumps the free counters
    /// and flushes. Freeing an already-free block is a no-op.
    fn free_block(&mut self, blk: u32) -> Result<(), FsError> {
        if blk < self.sb.first_data_block() {
            return Ok(());
        }
        let rel = blk - self.sb.first_data_block();
        let group = rel / self.sb.blocks_per_group();
        let index = rel % self.sb.blocks_per_group();
        if group >= self.groups {
            return Ok(());
        }

        let bits_per_block = self.block_size * 8;
        let bmp_block = self.gdt.block_bitmap(group) + index / bits_per_block;
        let bit = index % bits_per_block;

        let mut bmp = vec![0u8; self.block_size as usize];
        self.read_block(bmp_block, &mut bmp)?;

        let byte = (bit >> 3) as usize;
        let mask = 1u8 << (bit & 7);
        if bmp[byte] & mask == 0 {
            return Ok(());
        }
        bmp[byte] &= !mask;
        self.write_block(bmp_block, &bmp)?;

        self.sb
            .set_free_blocks_count(self.sb.free_blocks_count() + 1);
        self.gdt
            .set_free_blocks_count(group, self.gdt.free_blocks_count(group) + 1);
        self.flush_sb_and_gdt()
    }

    // -- indirect-block plumbing --------------------------------------------

    /// Reads slot `index` of indirection block `blk`.
    fn indirect_get(&self, blk: u32, index: u32) -> Result<u32, FsError> {
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

    /// Writes slot `index` of indirection block `blk`.
    fn indirect_set(&self, blk: u32, index: u32, value: u32) -> Result<(), FsError> {
        let mut buf = vec![0u8; self.block_size as usize];
        self.read_block(blk, &mut buf)?;
        let off = index as usize * 4;
        buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
        self.write_block(blk, &buf)
    }

    /// Returns `true` when every slot of indirection block `blk` is zero.
    fn indirect_is_empty(&self, blk: u32) -> Result<bool, FsError> {
        let mut buf = vec![0u8; self.block_size as usize];
        self.read_block(blk, &mut buf)?;
        Ok(buf.iter().all(|&b| b == 0))
    }

    /// Hangs a freshly allocated data block off the inode: first free direct
    /// slot, then the single-indirect block, then the double-indirect tree
    /// (L1/L2 tables allocated lazily). Triple-indirect is not implemented,
    /// so a file that exhausts the double-indirect range stops growing.
    fn append_block_to_inode(&mut self, inode: &mut Inode) -> Result<u32, FsError> {
        // Direct slots.
        for i in 0..SLOT_SINGLE {
            if inode.block(i) == 0 {
                let blk = self.alloc_block()?;
                inode.set_block(i, blk);
                return Ok(blk);
            }
        }

        let per = self.block_size / 4;

        // Single indirect.
        if inode.block(SLOT_SINGLE) == 0 {
            let ind = self.alloc_block()?;
            inode.set_block(SLOT_SINGLE, ind);
        }
        let single = inode.block(SLOT_SINGLE);
        for i in 0..per {
            if self.indirect_get(single, i)? == 0 {
                let blk = self.alloc_block()?;
                self.indirect_set(single, i, blk)?;
                return Ok(blk);
            }
        }

        // Double indirect.
        if inode.block(SLOT_DOUBLE) == 0 {
            let dbl = self.alloc_block()?;
            inode.set_block(SLOT_DOUBLE, dbl);
        }
        let double = inode.block(SLOT_DOUBLE);
        for i in 0..per {
            let mut l1 = self.indirect_get(double, i)?;
            if l1 == 0 {
                l1 = self.alloc_block()?;
                self.indirect_set(double, i, l1)?;
            }
            for j in 0..per {
                if self.indirect_get(l1, j)? == 0 {
                    let blk = self.alloc_block()?;
                    self.indirect_set(l1, j, blk)?;
                    return Ok(blk);
                }
            }
        }

        Err(FsError::Unsupported)
    }

    // -- directory insertion ------------------------------------------------

    /// Inserts `name -> ino` into the parent directory using slack at the
    /// end of an existing data block. The directory is never grown; when no
    /// block has enough slack the insertion fails.
    fn insert_dirent(&mut self, parent: &Inode, name: &str, ino: u32) -> Result<(), FsError> {
        let block_size = self.block_size;
        let need = min_rec_len(name.len() as u8);
        let dir_blocks = parent.size_lo().div_ceil(block_size);
        let mut buf = vec![0u8; block_size as usize];

        for fb in 0..dir_blocks {
            let blk = self.block_of_file(parent, fb)?;
            if blk == 0 {
                return Err(FsError::Corrupt);
            }
            self.read_block(blk, &mut buf)?;

            // Find the last entry in this block.
            let mut off = 0usize;
            let mut last: Option<(usize, u8)> = None;
            while let Some(de) = parse_dirent(&buf, off) {
                last = Some((off, de.name_len));
                off += de.rec_len as usize;
                if off >= block_size as usize {
                    break;
                }
            }

            if let Some((last_off, last_name_len)) = last {
                let de = parse_dirent(&buf, last_off).ok_or(FsError::Corrupt)?;
                let last_min = min_rec_len(last_name_len);
                let slack = de.rec_len.saturating_sub(last_min);
                if slack >= need {
                    // Shrink the last entry to its minimum and put the new
                    // entry in the gap, claiming the leftover slack.
                    set_dirent_rec_len(&mut buf, last_off, last_min);
                    let new_off = last_off + last_min as usize;
                    write_dirent(
                        &mut buf,
                        new_off,
                        ino,
                        slack,
                        FILE_TYPE_REGULAR,
                        name.as_bytes(),
                    );
                    // Zero-pad the tail of the new record.
                    let used = 8 + name.len();
                    for b in &mut buf[new_off + used..new_off + slack as usize] {
                        *b = 0;
                    }
                    self.write_block(blk, &buf)?;
                    return Ok(());
                }
            }
        }
        Err(FsError::NoSpace)
    }

    /// Splits a normalized path into `(parent, leaf)`.
    fn split_parent_leaf(cwd: &str, path: &str) -> Result<(String, String), FsError> {
        let normalized = Self::normalize_path(cwd, path);
        if normalized == "/" {
            return Err(FsError::NotFound);
        }
        let slash = normalized.rfind('/').ok_or(FsError::NotFound)?;
        let parent = if slash == 0 {
            String::from("/")
        } else {
            String::from(&normalized[..slash])
        };
        let leaf = String::from(&normalized[slash + 1..]);
        if leaf.is_empty() || leaf.len() > MAX_NAME_LEN {
            return Err(FsError::NotFound);
        }
        Ok((parent, leaf))
    }

    // -- public write API ---------------------------------------------------

    /// Creates an empty regular file at `path` with permission bits `perm`.
    ///
    /// If the path already exists this behaves like `touch`: timestamps are
    /// refreshed and the call succeeds.
    ///
    /// # Errors
    ///
    /// [`FsError::NoSpace`] when no inode is free or the parent directory
    /// has no slack (in which case the inode bitmap bit is rolled back),
    /// plus resolution and I/O errors.
    pub fn create_empty(&mut self, cwd: &str, path: &str, perm: u16) -> Result<(), FsError> {
        if let Ok(existing) = self.resolve(cwd, path) {
            let mut inode = self.read_inode(existing)?;
            let now = (self.now)();
            inode.set_mtime(now);
            inode.set_ctime(now);
            return self.write_inode(existing, &inode);
        }

        let (parent_path, name) = Self::split_parent_leaf(cwd, path)?;
        let parent_ino = self.resolve("/", &parent_path)?;
        let mut parent = self.read_inode(parent_ino)?;
        if !parent.is_dir() {
            return Err(FsError::NotADirectory);
        }

        let new_ino = self.alloc_inode()?;
        let group = (new_ino - 1) / self.sb.inodes_per_group();

        // Initialize the inode on disk.
        let now = (self.now)();
        let mut inode = Inode::zeroed();
        inode.set_mode(MODE_REGULAR | (perm & 0x0FFF));
        inode.set_links_count(1);
        inode.set_atime(now);
        inode.set_ctime(now);
        inode.set_mtime(now);
        self.write_inode(new_ino, &inode)?;

        // Hook it into the parent, rolling the bitmap bit back on failure.
        if let Err(e) = self.insert_dirent(&parent, &name, new_ino) {
            self.rollback_inode_bit(new_ino)?;
            return Err(e);
        }

        self.sb
            .set_free_inodes_count(self.sb.free_inodes_count().saturating_sub(1));
        self.gdt
            .set_free_inodes_count(group, self.gdt.free_inodes_count(group).saturating_sub(1));

        parent.set_mtime(now);
        parent.set_ctime(now);
        self.write_inode(parent_ino, &parent)?;

        self.flush_sb_and_gdt()
    }

    /// Appends `data` to the regular file at `path`, creating it first if it
    /// does not exist.
    ///
    /// Bytes are spliced in one destination block at a time with
    /// read-modify-write; new blocks are allocated lazily through the
    /// direct, single- and double-indirect paths.
    ///
    /// # Errors
    ///
    /// [`FsError::NotAFile`] for non-regular targets, [`FsError::NoSpace`]
    /// under allocation pressure, plus I/O errors. Data blocks allocated
    /// before a failure are not reclaimed.
    pub fn append(&mut self, cwd: &str, path: &str, data: &[u8]) -> Result<(), FsError> {
        if data.is_empty() {
            return Ok(());
        }

        let ino_nr = match self.resolve(cwd, path) {
            Ok(ino) => ino,
            Err(FsError::NotFound) => {
                self.create_empty(cwd, path, 0o644)?;
                self.resolve(cwd, path)?
            }
            Err(e) => return Err(e),
        };

        let mut inode = self.read_inode(ino_nr)?;
        if !inode.is_regular() {
            return Err(FsError::NotAFile);
        }

        let block_size = self.block_size;
        let mut pos = inode.size_lo();
        let mut remaining = data;
        let mut buf = vec![0u8; block_size as usize];

        while !remaining.is_empty() {
            let block_off = (pos % block_size) as usize;
            let fb = pos / block_size;

            let mut blk = self.block_of_file(&inode, fb)?;
            if blk == 0 {
                blk = self.append_block_to_inode(&mut inode)?;
                // Persist the new block[] so the next lookup sees it.
                self.write_inode(ino_nr, &inode)?;
            }

            self.read_block(blk, &mut buf)?;
            let take = (block_size as usize - block_off).min(remaining.len());
            buf[block_off..block_off + take].copy_from_slice(&remaining[..take]);
            self.write_block(blk, &buf)?;

            remaining = &remaining[take..];
            pos += take as u32;
            if pos > inode.size_lo() {
                inode.set_size_lo(pos);
            }
        }

        let now = (self.now)();
        inode.set_mtime(now);
        inode.set_ctime(now);
        self.write_inode(ino_nr, &inode)
    }

    /// Truncates the regular file at `path` to `new_size`.
    ///
    /// Shrink only: the partial block at the new end is zero-padded, blocks
    /// strictly past the new end are freed in reverse order, and indirection
    /// blocks that become all-zero are freed too. Growing a file via
    /// truncate is not supported; a `new_size` beyond the current size only
    /// updates the size field of a sparse tail-free file (matching the
    /// source semantics of rejecting nothing but doing no allocation).
    /// A missing file is created empty first.
    ///
    /// # Errors
    ///
    /// [`FsError::NotAFile`] for non-regular targets, plus I/O errors.
    pub fn truncate(&mut self, cwd: &str, path: &str, new_size: u32) -> Result<(), FsError> {
        let ino_nr = match self.resolve(cwd, path) {
            Ok(ino) => ino,
            Err(FsError::NotFound) => {
                self.create_empty(cwd, path, 0o644)?;
                self.resolve(cwd, path)?
            }
            Err(e) => return Err(e),
        };

        let mut inode = self.read_inode(ino_nr)?;
        if !inode.is_regular() {
            return Err(FsError::NotAFile);
        }

        let old_size = inode.size_lo();
        if new_size == old_size {
            return Ok(());
        }

        let block_size = self.block_size;
        if new_size < old_size {
            // Zero the bytes past the cut within the boundary block.
            let off = new_size % block_size;
            if off != 0 {
                let blk = self.block_of_file(&inode, new_size / block_size)?;
                if blk != 0 {
                    let mut buf = vec![0u8; block_size as usize];
                    self.read_block(blk, &mut buf)?;
                    for b in &mut buf[off as usize..] {
                        *b = 0;
                    }
                    self.write_block(blk, &buf)?;
                }
            }

            // Free whole blocks past the new end, highest first.
            let old_blocks = old_size.div_ceil(block_size);
            let new_blocks = new_size.div_ceil(block_size);
            let per = block_size / 4;

            for fb in (new_blocks..old_blocks).rev() {
                self.drop_file_block(&mut inode, fb, per)?;
            }

            // The double-indirect root may have emptied out last.
            let double = inode.block(SLOT_DOUBLE);
            if double != 0 && self.indirect_is_empty(double)? {
                self.free_block(double)?;
                inode.set_block(SLOT_DOUBLE, 0);
            }
        }

        inode.set_size_lo(new_size);
        let now = (self.now)();
        inode.set_mtime(now);
        inode.set_ctime(now);
        self.write_inode(ino_nr, &inode)
    }

    /// Frees the physical block behind file block `fb` and clears its slot,
    /// collapsing indirection blocks that become empty.
    fn drop_file_block(&mut self, inode: &mut Inode, fb: u32, per: u32) -> Result<(), FsError> {
        if fb < SLOT_SINGLE as u32 {
            let blk = inode.block(fb as usize);
            if blk != 0 {
                self.free_block(blk)?;
                inode.set_block(fb as usize, 0);
            }
            return Ok(());
        }

        let mut index = fb - SLOT_SINGLE as u32;
        if index < per {
            let single = inode.block(SLOT_SINGLE);
            if single == 0 {
                return Ok(());
            }
            let blk = self.indirect_get(single, index)?;
            if blk != 0 {
                self.free_block(blk)?;
                self.indirect_set(single, index, 0)?;
            }
            if self.indirect_is_empty(single)? {
                self.free_block(single)?;
                inode.set_block(SLOT_SINGLE, 0);
            }
            return Ok(());
        }

        index -= per;
        let double = inode.block(SLOT_DOUBLE);
        if double == 0 {
            return Ok(());
        }
        let l1 = self.indirect_get(double, index / per)?;
        if l1 == 0 {
            return Ok(());
        }
        let blk = self.indirect_get(l1, index % per)?;
        if blk != 0 {
            self.free_block(blk)?;
            self.indirect_set(l1, index % per, 0)?;
        }
        if self.indirect_is_empty(l1)? {
            self.free_block(l1)?;
            self.indirect_set(double, index / per, 0)?;
        }
        Ok(())
    }

    /// Replaces the file contents at `path` with `data`
    /// (truncate-to-zero followed by append).
    ///
    /// # Errors
    ///
    /// Propagates [`truncate`](Self::truncate) and [`append`](Self::append)
    /// errors.
    pub fn replace(&mut self, cwd: &str, path: &str, data: &[u8]) -> Result<(), FsError> {
        self.truncate(cwd, path, 0)?;
        if data.is_empty() {
            return Ok(());
        }
        self.append(cwd, path, data)
    }

    /// Returns `(free_inodes, free_blocks)` from the cached superblock.
    #[must_use]
    pub fn free_counts(&self) -> (u32, u32) {
        (self.sb.free_inodes_count(), self.sb.free_blocks_count())
    }
}
