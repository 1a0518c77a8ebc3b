//! Ext2 driver tests against an in-memory volume.
//!
//! `mkfs()` builds a minimal 1 MiB revision-1 volume with 1 KiB blocks, one
//! block group, a root directory and an empty `/tmp` subdirectory, then the
//! tests drive mount/create/append/truncate round trips over a `RamDisk`.

use alloc::sync::Arc;

use super::*;
use crate::FsError;
use crate::block::tests::RamDisk;

const BLOCK_SIZE: usize = 1024;
const BLOCKS_COUNT: u32 = 1024;
const INODES_COUNT: u32 = 32;
const INODE_SIZE: usize = 128;

// Fixed layout: 0 boot, 1 superblock, 2 GDT, 3 block bitmap, 4 inode bitmap,
// 5..=8 inode table, 9 root dir data, 10 /tmp dir data.
const BLK_BLOCK_BITMAP: usize = 3;
const BLK_INODE_BITMAP: usize = 4;
const BLK_INODE_TABLE: usize = 5;
const BLK_ROOT_DIR: usize = 9;
const BLK_TMP_DIR: usize = 10;

const INO_TMP: u32 = 11;

const FREE_BLOCKS: u32 = 1023 - 10; // valid bitmap bits minus blocks 1..=10
const FREE_INODES: u32 = INODES_COUNT - 11; // 10 reserved + /tmp

fn put_u16(image: &mut [u8], off: usize, v: u16) {
    image[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(image: &mut [u8], off: usize, v: u32) {
    image[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

/// Writes a dirent at `off`, returning the offset just past it.
fn put_dirent(image: &mut [u8], off: usize, ino: u32, rec_len: u16, ftype: u8, name: &[u8]) -> usize {
    put_u32(image, off, ino);
    put_u16(image, off + 4, rec_len);
    image[off + 6] = name.len() as u8;
    image[off + 7] = ftype;
    image[off + 8..off + 8 + name.len()].copy_from_slice(name);
    off + rec_len as usize
}

/// Writes a directory inode at table index `ino`.
fn put_dir_inode(image: &mut [u8], ino: u32, links: u16, data_block: u32) {
    let index = (ino - 1) as usize;
    let off = BLK_INODE_TABLE * BLOCK_SIZE + index * INODE_SIZE;
    put_u16(image, off, 0x41ED); // drwxr-xr-x
    put_u32(image, off + 4, BLOCK_SIZE as u32); // size_lo
    put_u16(image, off + 26, links);
    put_u32(image, off + 40, data_block); // block[0]
}

/// Builds the test volume image.
fn mkfs() -> Vec<u8> {
    let mut image = vec![0u8; BLOCKS_COUNT as usize * BLOCK_SIZE];

    // Superblock at byte 1024.
    let sb = 1024;
    put_u32(&mut image, sb, INODES_COUNT); // inodes_count
    put_u32(&mut image, sb + 4, BLOCKS_COUNT); // blocks_count
    put_u32(&mut image, sb + 12, FREE_BLOCKS); // free_blocks_count
    put_u32(&mut image, sb + 16, FREE_INODES); // free_inodes_count
    put_u32(&mut image, sb + 20, 1); // first_data_block
    put_u32(&mut image, sb + 24, 0); // log_block_size -> 1024
    put_u32(&mut image, sb + 32, 8192); // blocks_per_group
    put_u32(&mut image, sb + 40, INODES_COUNT); // inodes_per_group
    put_u16(&mut image, sb + 56, 0xEF53); // magic
    put_u32(&mut image, sb + 76, 1); // rev_level
    put_u16(&mut image, sb + 88, INODE_SIZE as u16); // inode_size

    // Group descriptor 0 (block 2).
    let gd = 2 * BLOCK_SIZE;
    put_u32(&mut image, gd, BLK_BLOCK_BITMAP as u32);
    put_u32(&mut image, gd + 4, BLK_INODE_BITMAP as u32);
    put_u32(&mut image, gd + 8, BLK_INODE_TABLE as u32);
    put_u16(&mut image, gd + 12, FREE_BLOCKS as u16);
    put_u16(&mut image, gd + 14, FREE_INODES as u16);
    put_u16(&mut image, gd + 16, 2); // used_dirs_count

    // Block bitmap: bit i covers block 1 + i. Blocks 1..=10 are used and
    // bits past the last valid block are forced used so the allocator never
    // hands out blocks beyond the volume.
    let bb = BLK_BLOCK_BITMAP * BLOCK_SIZE;
    for i in 0..10 {
        image[bb + i / 8] |= 1 << (i % 8);
    }
    for i in (BLOCKS_COUNT as usize - 1)..(BLOCK_SIZE * 8) {
        image[bb + i / 8] |= 1 << (i % 8);
    }

    // Inode bitmap: inodes 1..=10 reserved, /tmp takes 11; inodes past
    // `inodes_count` are forced used.
    let ib = BLK_INODE_BITMAP * BLOCK_SIZE;
    for i in 0..11 {
        image[ib + i / 8] |= 1 << (i % 8);
    }
    for i in (INODES_COUNT as usize)..(BLOCK_SIZE * 8) {
        image[ib + i / 8] |= 1 << (i % 8);
    }

    // Root and /tmp inodes.
    put_dir_inode(&mut image, ROOT_INODE, 3, BLK_ROOT_DIR as u32);
    put_dir_inode(&mut image, INO_TMP, 2, BLK_TMP_DIR as u32);

    // Root directory data: ".", "..", "tmp".
    let rd = BLK_ROOT_DIR * BLOCK_SIZE;
    let off = put_dirent(&mut image, rd, ROOT_INODE, 12, FILE_TYPE_DIRECTORY, b".");
    let off = put_dirent(&mut image, off, ROOT_INODE, 12, FILE_TYPE_DIRECTORY, b"..");
    put_dirent(
        &mut image,
        off,
        INO_TMP,
        (BLOCK_SIZE - 24) as u16,
        FILE_TYPE_DIRECTORY,
        b"tmp",
    );

    // /tmp directory data: ".", "..".
    let td = BLK_TMP_DIR * BLOCK_SIZE;
    let off = put_dirent(&mut image, td, INO_TMP, 12, FILE_TYPE_DIRECTORY, b".");
    put_dirent(
        &mut image,
        off,
        ROOT_INODE,
        (BLOCK_SIZE - 12) as u16,
        FILE_TYPE_DIRECTORY,
        b"..",
    );

    image
}

fn mount_test_fs() -> (Ext2Fs, Arc<RamDisk>) {
    let disk = Arc::new(RamDisk::from_image(mkfs()));
    let fs = Ext2Fs::mount(disk.clone()).expect("mount");
    (fs, disk)
}

#[test]
fn mount_reads_geometry() {
    let (fs, _disk) = mount_test_fs();
    assert_eq!(fs.block_size(), 1024);
    assert_eq!(fs.group_count(), 1);
    assert_eq!(fs.free_counts(), (FREE_INODES, FREE_BLOCKS));
}

#[test]
fn mount_rejects_bad_magic() {
    let mut image = mkfs();
    image[1024 + 56] = 0;
    let disk = Arc::new(RamDisk::from_image(image));
    assert_eq!(Ext2Fs::mount(disk).unwrap_err(), FsError::Corrupt);
}

#[test]
fn normalize_path_lexical() {
    assert_eq!(Ext2Fs::normalize_path("/", "/a/b/c"), "/a/b/c");
    assert_eq!(Ext2Fs::normalize_path("/a/b", "c"), "/a/b/c");
    assert_eq!(Ext2Fs::normalize_path("/a/b", "../c"), "/a/c");
    assert_eq!(Ext2Fs::normalize_path("/", ".."), "/");
    assert_eq!(Ext2Fs::normalize_path("/", "../../x"), "/x");
    assert_eq!(Ext2Fs::normalize_path("/a", "./b/./c/.."), "/a/b");
    assert_eq!(Ext2Fs::normalize_path("/a", ""), "/a");
    assert_eq!(Ext2Fs::normalize_path("/", "//x///y"), "/x/y");
}

#[test]
fn resolve_root_and_tmp() {
    let (fs, _disk) = mount_test_fs();
    assert_eq!(fs.resolve("/", "/").unwrap(), ROOT_INODE);
    assert_eq!(fs.resolve("/", "/tmp").unwrap(), INO_TMP);
    assert_eq!(fs.resolve("/tmp", ".").unwrap(), INO_TMP);
    assert_eq!(fs.resolve("/tmp", "..").unwrap(), ROOT_INODE);
    assert!(fs.is_dir("/", "/tmp"));
    assert!(!fs.is_file("/", "/tmp"));
    assert_eq!(fs.resolve("/", "/nope").unwrap_err(), FsError::NotFound);
}

#[test]
fn list_root_dir() {
    let (fs, _disk) = mount_test_fs();
    let mut names = Vec::new();
    fs.list_dir("/", "/", |e| names.push((e.name.clone(), e.file_type)))
        .unwrap();
    assert_eq!(
        names,
        vec![
            (".".to_string(), FILE_TYPE_DIRECTORY),
            ("..".to_string(), FILE_TYPE_DIRECTORY),
            ("tmp".to_string(), FILE_TYPE_DIRECTORY),
        ]
    );
}

#[test]
fn create_then_listdir_and_stat() {
    let (mut fs, _disk) = mount_test_fs();
    fs.create_empty("/", "/hello.txt", 0o644).unwrap();

    assert!(fs.is_file("/", "/hello.txt"));
    let st = fs.stat("/", "/hello.txt").unwrap();
    assert_eq!(st.size, 0);
    assert_eq!(st.links_count, 1);

    let mut seen = false;
    fs.list_dir("/", "/", |e| {
        if e.name == "hello.txt" {
            seen = true;
            assert_eq!(e.file_type, FILE_TYPE_REGULAR);
        }
    })
    .unwrap();
    assert!(seen);

    // Accounting: one inode gone, no data blocks yet.
    assert_eq!(fs.free_counts(), (FREE_INODES - 1, FREE_BLOCKS));
}

#[test]
fn create_existing_is_touch() {
    let (mut fs, _disk) = mount_test_fs();
    fs.create_empty("/", "/f", 0o644).unwrap();
    fs.create_empty("/", "/f", 0o644).unwrap();
    assert_eq!(fs.free_counts(), (FREE_INODES - 1, FREE_BLOCKS));
}

#[test]
fn append_and_read_roundtrip() {
    let (mut fs, _disk) = mount_test_fs();
    fs.create_empty("/", "/tmp/foo", 0o644).unwrap();
    fs.append("/", "/tmp/foo", b"hello").unwrap();
    fs.append("/", "/tmp/foo", b" world").unwrap();

    assert_eq!(fs.read_entire_file("/", "/tmp/foo").unwrap(), b"hello world");
    assert_eq!(fs.stat("/", "/tmp/foo").unwrap().size, 11);
}

#[test]
fn append_creates_missing_file() {
    let (mut fs, _disk) = mount_test_fs();
    fs.append("/", "/auto", b"data").unwrap();
    assert_eq!(fs.read_entire_file("/", "/auto").unwrap(), b"data");
}

#[test]
fn append_across_block_boundaries() {
    let (mut fs, _disk) = mount_test_fs();
    let payload: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    fs.append("/", "/big", &payload[..1000]).unwrap();
    fs.append("/", "/big", &payload[1000..]).unwrap();

    assert_eq!(fs.read_entire_file("/", "/big").unwrap(), payload);
    // 3000 bytes -> 3 data blocks.
    assert_eq!(fs.free_counts(), (FREE_INODES - 1, FREE_BLOCKS - 3));
}

#[test]
fn truncate_shrink_and_reuse() {
    let (mut fs, _disk) = mount_test_fs();
    fs.append("/", "/tmp/foo", b"hello world").unwrap();

    fs.truncate("/", "/tmp/foo", 5).unwrap();
    assert_eq!(fs.read_entire_file("/", "/tmp/foo").unwrap(), b"hello");

    fs.truncate("/", "/tmp/foo", 0).unwrap();
    assert_eq!(fs.read_entire_file("/", "/tmp/foo").unwrap(), b"");
    // The data block went back to the pool.
    assert_eq!(fs.free_counts(), (FREE_INODES - 1, FREE_BLOCKS));

    fs.append("/", "/tmp/foo", b"fresh").unwrap();
    assert_eq!(fs.read_entire_file("/", "/tmp/foo").unwrap(), b"fresh");
}

#[test]
fn truncate_is_idempotent() {
    let disk = Arc::new(RamDisk::from_image(mkfs()));
    let mut fs = Ext2Fs::mount(disk.clone()).expect("mount");
    fs.append("/", "/f", b"some content that spans a bit").unwrap();

    fs.truncate("/", "/f", 9).unwrap();
    let first = disk.snapshot();
    fs.truncate("/", "/f", 9).unwrap();
    assert_eq!(disk.snapshot(), first);
}

#[test]
fn truncate_zeroes_partial_block_tail() {
    let (mut fs, _disk) = mount_test_fs();
    fs.append("/", "/f", &[0xFFu8; 600]).unwrap();
    fs.truncate("/", "/f", 100).unwrap();
    fs.append("/", "/f", &[0xAAu8; 10]).unwrap();

    let data = fs.read_entire_file("/", "/f").unwrap();
    assert_eq!(data.len(), 110);
    assert!(data[..100].iter().all(|&b| b == 0xFF));
    assert!(data[100..].iter().all(|&b| b == 0xAA));
}

#[test]
fn large_file_through_double_indirect() {
    let (mut fs, _disk) = mount_test_fs();

    // 300 KiB: past the 12 direct + 256 single-indirect blocks.
    let payload: Vec<u8> = (0..300 * 1024u32).map(|i| (i % 239) as u8).collect();
    for chunk in payload.chunks(8192) {
        fs.append("/", "/huge", chunk).unwrap();
    }

    assert_eq!(fs.read_entire_file("/", "/huge").unwrap(), payload);

    // 300 data blocks + single-indirect + double root + one L1 table.
    assert_eq!(fs.free_counts(), (FREE_INODES - 1, FREE_BLOCKS - 303));

    // Shrinking back to 100 bytes returns everything but one data block.
    fs.truncate("/", "/huge", 100).unwrap();
    assert_eq!(fs.free_counts(), (FREE_INODES - 1, FREE_BLOCKS - 1));
    assert_eq!(fs.read_entire_file("/", "/huge").unwrap(), &payload[..100]);
}

#[test]
fn replace_swaps_contents() {
    let (mut fs, _disk) = mount_test_fs();
    fs.append("/", "/f", b"old old old old").unwrap();
    fs.replace("/", "/f", b"new").unwrap();
    assert_eq!(fs.read_entire_file("/", "/f").unwrap(), b"new");
}

#[test]
fn relative_paths_use_cwd() {
    let (mut fs, _disk) = mount_test_fs();
    fs.create_empty("/tmp", "bar", 0o644).unwrap();
    assert!(fs.is_file("/", "/tmp/bar"));

    fs.append("/tmp", "bar", b"relative").unwrap();
    assert_eq!(fs.read_entire_file("/tmp", "bar").unwrap(), b"relative");
    assert_eq!(fs.read_entire_file("/", "/tmp/bar").unwrap(), b"relative");
}

#[test]
fn chdir_validates_and_normalizes() {
    let (fs, _disk) = mount_test_fs();
    assert_eq!(fs.change_dir("/", "tmp").unwrap(), "/tmp");
    assert_eq!(fs.change_dir("/tmp", "..").unwrap(), "/");
    assert_eq!(fs.change_dir("/", "/tmp/../tmp").unwrap(), "/tmp");
    assert_eq!(fs.change_dir("/", "..").unwrap(), "/");
    assert_eq!(
        fs.change_dir("/", "/nope").unwrap_err(),
        FsError::NotFound
    );
    // A file is not a valid working directory.
    let (mut fs, _disk) = mount_test_fs();
    fs.create_empty("/", "/f", 0o644).unwrap();
    assert_eq!(fs.change_dir("/", "/f").unwrap_err(), FsError::NotADirectory);
}

#[test]
fn dirent_slack_exhaustion_rolls_back_inode() {
    let (mut fs, _disk) = mount_test_fs();

    // Long names burn root-directory slack quickly: each entry needs
    // (8 + 200) rounded to 208 bytes. The root block offers 12+12+12 used
    // plus 988 slack -> exactly four entries fit.
    let name_for = |i: usize| {
        let mut name = String::from("/");
        for _ in 0..199 {
            name.push('x');
        }
        name.push(char::from(b'a' + i as u8));
        name
    };

    for i in 0..4 {
        fs.create_empty("/", &name_for(i), 0o644).unwrap();
    }
    let before = fs.free_counts();

    let err = fs.create_empty("/", &name_for(4), 0o644).unwrap_err();
    assert_eq!(err, FsError::NoSpace);

    // The speculatively allocated inode bit was rolled back.
    assert_eq!(fs.free_counts(), before);

    // And the bit really is clear on disk: a create in /tmp still succeeds.
    fs.create_empty("/", "/tmp/ok", 0o644).unwrap();
    assert_eq!(fs.free_counts(), (before.0 - 1, before.1));
}

#[test]
fn file_type_fallback_reads_inode_mode() {
    // Zero out the file_type byte of the "tmp" entry to simulate a volume
    // without the filetype feature.
    let mut image = mkfs();
    let tmp_entry = BLK_ROOT_DIR * BLOCK_SIZE + 24;
    image[tmp_entry + 7] = 0;

    let disk = Arc::new(RamDisk::from_image(image));
    let fs = Ext2Fs::mount(disk).expect("mount");

    let mut tmp_type = 0xFF;
    fs.list_dir("/", "/", |e| {
        if e.name == "tmp" {
            tmp_type = e.file_type;
        }
    })
    .unwrap();
    assert_eq!(tmp_type, FILE_TYPE_DIRECTORY);
}
