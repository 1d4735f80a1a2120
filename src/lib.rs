//! A read-only forensic reader for ext2/ext3 and NTFS filesystem images:
//! superblock/boot-sector parsing, inode and block walkers, directory
//! listing (including deleted and orphaned entries), and path resolution.
//!
//! Everything here takes a `Read + Seek` image and an in-partition byte
//! offset; nothing opens a path or touches the environment.

pub mod error;
pub mod ext;
pub mod image;
pub mod model;
pub mod ntfs;
pub mod utf16;

pub use error::{Error, ErrorKind, Result};
pub use ext::ext_open;
pub use model::{FileType, Flags, FsAttr, FsDir, FsMeta, FsName, WalkControl};
pub use ntfs::{ntfs_dir_open_meta, ntfs_find_file, ntfs_open, ntfs_resolve_path};
