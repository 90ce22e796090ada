//! The filesystem exposed through the kernel.
//!
//! [`DriveAdapter`] holds the semantics and is usable without a mount;
//! [`DriveFs`] is the thin `fuser` binding that forwards kernel requests to
//! it and turns [`FsError`]s into errno values. Requests run on the tokio
//! blocking pool, so a slow write never holds up the session thread.

pub mod adapter;
mod convert;
pub mod types;

pub use adapter::{AdapterOptions, DirEntry, DirListing, DriveAdapter, ListingMode, NodeAttr};
pub use types::{ConflictKind, FsError, LocalId, Node, NodeKind, ROOT_ID};

use convert::to_file_attr;

use fuser::{
    FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;

pub struct DriveFs {
    adapter: Arc<DriveAdapter>,
    /// Attribute and entry cache timeout handed to the kernel.
    ttl: Duration,
    runtime: Handle,
}

impl DriveFs {
    pub fn new(adapter: Arc<DriveAdapter>, ttl: Duration, runtime: Handle) -> Self {
        DriveFs {
            adapter,
            ttl,
            runtime,
        }
    }

    /// Run `op` on a worker and return immediately; `op` owns the reply.
    fn dispatch<F>(&self, op: F)
    where
        F: FnOnce(&DriveAdapter) + Send + 'static,
    {
        let adapter = self.adapter.clone();
        self.runtime.spawn_blocking(move || op(&adapter));
    }
}

fn reply_entry(adapter: &DriveAdapter, node: &Node, ttl: Duration, reply: ReplyEntry) {
    let attr = to_file_attr(&adapter.attributes(node));
    reply.entry(&ttl, &attr, 0);
}

fn reply_attr(adapter: &DriveAdapter, node: &Node, ttl: Duration, reply: ReplyAttr) {
    reply.attr(&ttl, &to_file_attr(&adapter.attributes(node)));
}

impl Filesystem for DriveFs {
    fn init(
        &mut self,
        _req: &Request,
        _config: &mut KernelConfig,
    ) -> std::result::Result<(), libc::c_int> {
        tracing::info!("drivefuse filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        tracing::info!("drivefuse filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        tracing::debug!("lookup(parent={}, name={:?})", parent, name);
        let Some(name) = name.to_str().map(str::to_owned) else {
            reply.error(libc::ENOENT);
            return;
        };
        let ttl = self.ttl;
        self.dispatch(move |adapter| match adapter.lookup(parent, &name) {
            Ok(node) => reply_entry(adapter, &node, ttl, reply),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        tracing::trace!("getattr(ino={})", ino);
        let ttl = self.ttl;
        self.dispatch(move |adapter| match adapter.node(ino) {
            Ok(node) => reply_attr(adapter, &node, ttl, reply),
            Err(e) => reply.error(e.errno()),
        });
    }

    /// Only size changes are honored; other attributes are derived.
    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        tracing::debug!("setattr(ino={}, size={:?})", ino, size);
        let ttl = self.ttl;
        self.dispatch(move |adapter| {
            let result = match size {
                Some(size) => adapter.truncate(ino, size),
                None => adapter.node(ino),
            };
            match result {
                Ok(node) => reply_attr(adapter, &node, ttl, reply),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        tracing::debug!("mkdir(parent={}, name={:?})", parent, name);
        let Some(name) = name.to_str().map(str::to_owned) else {
            reply.error(libc::EINVAL);
            return;
        };
        let ttl = self.ttl;
        self.dispatch(move |adapter| match adapter.make_directory(parent, &name) {
            Ok(node) => reply_entry(adapter, &node, ttl, reply),
            Err(e) => {
                tracing::warn!("mkdir {:?} under {} failed: {}", name, parent, e);
                reply.error(e.errno());
            }
        });
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        tracing::debug!("create(parent={}, name={:?}, flags={:#x})", parent, name, flags);
        let Some(name) = name.to_str().map(str::to_owned) else {
            reply.error(libc::EINVAL);
            return;
        };
        let ttl = self.ttl;
        self.dispatch(move |adapter| match adapter.create(parent, &name) {
            Ok(node) => {
                let attr = to_file_attr(&adapter.attributes(&node));
                reply.created(&ttl, &attr, 0, 0, 0);
            }
            Err(e) => {
                tracing::warn!("create {:?} under {} failed: {}", name, parent, e);
                reply.error(e.errno());
            }
        });
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        tracing::debug!("unlink(parent={}, name={:?})", parent, name);
        self.remove_entry(parent, name, false, reply);
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        tracing::debug!("rmdir(parent={}, name={:?})", parent, name);
        self.remove_entry(parent, name, true, reply);
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        tracing::debug!(
            "rename(parent={}, name={:?}, newparent={}, newname={:?})",
            parent,
            name,
            newparent,
            newname
        );
        let (Some(name), Some(newname)) = (
            name.to_str().map(str::to_owned),
            newname.to_str().map(str::to_owned),
        ) else {
            reply.error(libc::EINVAL);
            return;
        };
        self.dispatch(move |adapter| {
            match adapter.rename(parent, &name, newparent, &newname) {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        tracing::debug!("open(ino={}, flags={:#x})", ino, flags);
        self.dispatch(move |adapter| match adapter.node(ino) {
            Ok(_) => reply.opened(0, 0),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        self.dispatch(move |adapter| match adapter.node(ino) {
            Ok(node) if node.is_folder() => reply.opened(0, 0),
            Ok(_) => reply.error(libc::ENOTDIR),
            Err(e) => reply.error(e.errno()),
        });
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        tracing::debug!("read(ino={}, offset={}, size={})", ino, offset, size);
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        self.dispatch(move |adapter| {
            let result = adapter
                .node(ino)
                .and_then(|node| adapter.read(&node, offset, size));
            match result {
                Ok(bytes) => reply.data(&bytes),
                Err(e) => {
                    tracing::debug!("read: node {} failed: {}", ino, e);
                    reply.error(e.errno());
                }
            }
        });
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        tracing::debug!("write(ino={}, offset={}, len={})", ino, offset, data.len());
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        let data = data.to_vec();
        self.dispatch(move |adapter| match adapter.write(ino, offset, &data) {
            Ok(written) => reply.written(written),
            Err(e) => {
                tracing::warn!("write: node {} failed: {}", ino, e);
                reply.error(e.errno());
            }
        });
    }

    /// Writes are committed per call, so there is nothing left to flush.
    fn flush(&mut self, _req: &Request, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        reply: ReplyDirectory,
    ) {
        tracing::debug!("readdir(ino={}, offset={})", ino, offset);
        self.dispatch(move |adapter| read_directory(adapter, ino, offset, reply));
    }
}

impl DriveFs {
    fn remove_entry(&self, parent: u64, name: &OsStr, is_dir: bool, reply: ReplyEmpty) {
        let Some(name) = name.to_str().map(str::to_owned) else {
            reply.error(libc::ENOENT);
            return;
        };
        self.dispatch(move |adapter| match adapter.remove(parent, &name, is_dir) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        });
    }
}

fn read_directory(adapter: &DriveAdapter, ino: u64, offset: i64, mut reply: ReplyDirectory) {
    let node = match adapter.node(ino) {
        Ok(node) if node.is_folder() => node,
        Ok(_) => {
            reply.error(libc::ENOTDIR);
            return;
        }
        Err(e) => {
            reply.error(e.errno());
            return;
        }
    };
    let listing = match adapter.read_directory(ino) {
        Ok(listing) => listing,
        Err(e) => {
            reply.error(e.errno());
            return;
        }
    };

    let parent = node.parent.unwrap_or(ROOT_ID);
    let dots = [
        (ino, FileType::Directory, ".".to_string()),
        (parent, FileType::Directory, "..".to_string()),
    ];
    let entries = dots
        .into_iter()
        .chain(listing.map(|entry| (entry.id, entry.kind, entry.name)));

    for (idx, (child, kind, name)) in entries.enumerate().skip(offset.max(0) as usize) {
        if reply.add(child, (idx + 1) as i64, kind, &name) {
            break;
        }
    }
    reply.ok();
}
