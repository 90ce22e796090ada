use fuser::{FileAttr, FileType};

use super::adapter::NodeAttr;

const BLOCK_SIZE: u32 = 512;

pub(crate) fn to_file_attr(attr: &NodeAttr) -> FileAttr {
    FileAttr {
        ino: attr.id,
        size: attr.size,
        blocks: attr.size.div_ceil(BLOCK_SIZE as u64),
        atime: attr.mtime,
        mtime: attr.mtime,
        ctime: attr.mtime,
        crtime: attr.mtime,
        kind: attr.kind,
        perm: attr.perm,
        nlink: if attr.kind == FileType::Directory { 2 } else { 1 },
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}
