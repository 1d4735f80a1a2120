//! Plain-data containers handed to callers by the walkers and directory
//! opener.
//!
//! The specification treats these as externally-supplied collaborators
//! (`FsFile`/`FsMeta`/`FsName`/`FsAttr`/`FsDir`). This crate implements
//! minimal versions of them directly: they hold decoded fields and nothing
//! else, so the component design reads the same while the crate stays
//! runnable end to end.

use bitflags::bitflags;

/// A closed set of file types, replacing the source's `mode >> 12` bitmask
/// dispatch at the edge of decoding. The full mode word is carried
/// separately on [`FsMeta`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Reg,
    Dir,
    Socket,
    Link,
    Block,
    Char,
    Fifo,
    Undef,
}

bitflags! {
    /// Allocation/usage flags shared by inodes, blocks, and NTFS index
    /// entries. Not every flag is meaningful for every kind of object (e.g.
    /// `META`/`CONT` only apply to blocks), but keeping one flag set avoids
    /// three near-identical bitflag types.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u16 {
        /// The object is allocated / in use by the filesystem's own bookkeeping.
        const ALLOC   = 0b0000_0001;
        /// The object is not allocated.
        const UNALLOC = 0b0000_0010;
        /// The inode looks used (non-zero ctime).
        const USED    = 0b0000_0100;
        /// The inode looks never used.
        const UNUSED  = 0b0000_1000;
        /// Restrict an inode walk to orphans only.
        const ORPHAN  = 0b0001_0000;
        /// The block belongs to filesystem metadata (bitmap, inode table, …).
        const META    = 0b0010_0000;
        /// The block holds file content (or is a sparse hole).
        const CONT    = 0b0100_0000;
    }
}

/// Generic decoded metadata for one inode / MFT record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsMeta {
    pub addr: u64,
    pub file_type: FileType,
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub dtime: u32,
    pub flags: Flags,
    /// Resolved symlink target, if `file_type == Link` and decoding succeeded.
    pub link_target: Option<String>,
}

/// One name attached to a file: a directory entry (ext) or a `$FILE_NAME`
/// attribute instance (NTFS).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsName {
    pub name: String,
    /// Address of the file this name refers to.
    pub addr: u64,
    /// Address of the parent directory (NTFS: the 48-bit MFT reference part
    /// of `parent_ref`; ext: the containing directory's inode number).
    pub parent_addr: u64,
    /// NTFS sequence number of `parent_addr`; unused (0) on ext.
    pub parent_seq: u16,
    /// NTFS sequence number of this file itself; unused (0) on ext.
    pub seq: u16,
    pub file_type: FileType,
    pub flags: Flags,
}

/// A single attribute instance (NTFS `$ATTR`, or the notional ext equivalent
/// used for extended attributes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsAttr {
    pub type_code: u32,
    pub id: u16,
    pub resident: bool,
    pub data: Vec<u8>,
}

/// An ordered directory listing, built up by `add`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsDir {
    pub entries: Vec<FsName>,
}

impl FsDir {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: FsName) {
        self.entries.push(name);
    }
}

/// Return value of a walker callback on the non-error path: continue, or
/// stop cleanly. The third leg of the source's `CONT`/`STOP`/`ERROR`
/// protocol is carried by wrapping this in a [`crate::error::Result`]
/// (`Ok(Continue)`/`Ok(Stop)`/`Err(_)`) rather than as a third variant
/// here, so a failing callback can report a real [`crate::error::Error`]
/// instead of a bare sentinel. The enclosing walk propagates all three
/// outcomes verbatim: `Ok(Stop)` ends the walk successfully, `Err`
/// unwinds it as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    Stop,
}
