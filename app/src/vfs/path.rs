//! path name resolution
use log::trace;

use crate::{
    error::{FsError, Result},
    fs::{FileKind, FileName},
};

use super::{DirLookup, InodeRef, Vfs};

/// copy the next path element from `path` into `name`
/// # Return
/// the rest of the path with leading slashes removed,
/// or `None` if there is no element left
/// # Example
/// ```
/// use xv6fs::{fs::FileName, vfs::path::skipelem};
/// let mut name = FileName::default();
/// assert_eq!(skipelem("a/bb/c", &mut name), Some("bb/c"));
/// assert_eq!(name, FileName::from("a"));
/// assert_eq!(skipelem("///a//bb", &mut name), Some("bb"));
/// assert_eq!(skipelem("a", &mut name), Some(""));
/// assert_eq!(skipelem("", &mut name), None);
/// assert_eq!(skipelem("////", &mut name), None);
/// ```
pub fn skipelem<'p>(path: &'p str, name: &mut FileName) -> Option<&'p str> {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return None;
    }
    let (elem, rest) = path.split_once('/').unwrap_or((path, ""));
    *name = FileName::from(elem);
    Some(rest.trim_start_matches('/'))
}

/// look up and return the inode for a path name.
/// If `want_parent`, return the inode for the parent and copy the final
/// path element into `name`, which must have room for a full element.
fn namex(
    vfs: &Vfs,
    cwd: &InodeRef,
    path: &str,
    want_parent: bool,
    name: &mut FileName,
) -> Result<InodeRef> {
    let mut ip = if path.starts_with('/') {
        vfs.idup(&vfs.root())?
    } else {
        vfs.idup(cwd)?
    };

    let mut rest = path;
    while let Some(next) = skipelem(rest, name) {
        rest = next;
        let mut guard = vfs.ilock(&ip)?;
        if guard.kind != FileKind::Directory {
            vfs.iunlockput(guard)?;
            return Err(FsError::NotDirectory);
        }
        if want_parent && rest.is_empty() {
            // stop one level early
            guard.unlock();
            return Ok(ip);
        }
        let found = vfs.ops().dirlookup(vfs, &mut guard, name);
        vfs.iunlockput(guard)?;
        match found? {
            DirLookup::Hit { ip: next, .. } => ip = next,
            DirLookup::Miss => {
                trace!("lookup of {name} in {path:?} missed");
                return Err(FsError::NotFound);
            }
        }
    }
    if want_parent {
        vfs.iput(ip)?;
        return Err(FsError::NotFound);
    }
    Ok(ip)
}

/// resolve `path` relative to `cwd`, returning a referenced, unlocked inode
pub fn namei(vfs: &Vfs, cwd: &InodeRef, path: &str) -> Result<InodeRef> {
    let mut name = FileName::default();
    namex(vfs, cwd, path, false, &mut name)
}

/// resolve the directory containing the last element of `path`,
/// storing that element in `name`
pub fn nameiparent(
    vfs: &Vfs,
    cwd: &InodeRef,
    path: &str,
    name: &mut FileName,
) -> Result<InodeRef> {
    namex(vfs, cwd, path, true, name)
}
