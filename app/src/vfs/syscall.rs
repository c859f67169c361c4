//! file-system system calls
//!
//! A [Process] carries what the calls need from the calling process:
//! the current directory and the table of open file descriptors.
//! Arguments are checked here and the work is dispatched to the VFS and
//! the mounted file system.
use std::sync::Arc;

use bitflags::bitflags;
use log::debug;

use crate::{
    error::{FsError, Result},
    fs::{FileKind, FileName},
    param::MAXPATH,
};

use super::{
    path::{namei, nameiparent},
    FileId, InodeGuard, InodeRef, Stat, Vfs,
};

bitflags! {
    /// flags for [Process::open]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const RDONLY = 0x000;
        const WRONLY = 0x001;
        const RDWR = 0x002;
        const CREATE = 0x200;
        const TRUNC = 0x400;
    }
}

/// a file descriptor
pub type Fd = usize;

#[derive(Debug)]
pub struct Process {
    vfs: Arc<Vfs>,
    cwd: InodeRef,
    ofile: Vec<Option<FileId>>,
}

impl Process {
    /// a process whose current directory is the root
    pub fn new(vfs: Arc<Vfs>) -> Result<Self> {
        let cwd = vfs.idup(&vfs.root())?;
        let ofile = vec![None; vfs.config().max_fds_per_process];
        Ok(Process { vfs, cwd, ofile })
    }

    pub fn vfs(&self) -> &Arc<Vfs> {
        &self.vfs
    }

    pub fn cwd(&self) -> InodeRef {
        self.cwd
    }

    /// close every open file and release the current directory
    pub fn exit(mut self) -> Result<()> {
        for fd in 0..self.ofile.len() {
            if let Some(f) = self.ofile[fd].take() {
                self.vfs.file_close(f)?;
            }
        }
        self.vfs.iput(self.cwd)
    }

    pub fn open(&mut self, path: &str, flags: OpenFlags) -> Result<Fd> {
        check_path(path)?;
        let vfs = self.vfs.clone();
        let mut guard = if flags.contains(OpenFlags::CREATE) {
            self.create(&vfs, path, FileKind::RegularFile, 0, 0)?
        } else {
            let ip = namei(&vfs, &self.cwd, path)?;
            let guard = vfs.ilock(&ip)?;
            if guard.kind == FileKind::Directory && flags != OpenFlags::RDONLY {
                vfs.iunlockput(guard)?;
                return Err(FsError::IsDirectory);
            }
            guard
        };

        let f = match vfs.ops().open(&vfs, &guard, flags) {
            Ok(f) => f,
            Err(e) => {
                vfs.iunlockput(guard)?;
                return Err(e);
            }
        };
        let Some(fd) = self.fdalloc(f) else {
            // the open file owns the inode reference now
            guard.unlock();
            vfs.file_close(f)?;
            return Err(FsError::TooManyOpenFiles);
        };

        if flags.contains(OpenFlags::TRUNC) && guard.kind == FileKind::RegularFile {
            vfs.ops().trunc(&mut guard)?;
        }
        debug!("open {path:?} -> fd {fd} (inode {})", guard.inum());
        guard.unlock();
        Ok(fd)
    }

    pub fn read(&mut self, fd: Fd, dst: &mut [u8]) -> Result<usize> {
        let f = self.fd(fd)?;
        self.vfs.file_read(f, dst)
    }

    pub fn write(&mut self, fd: Fd, src: &[u8]) -> Result<usize> {
        let f = self.fd(fd)?;
        self.vfs.file_write(f, src)
    }

    pub fn close(&mut self, fd: Fd) -> Result<()> {
        let f = self.fd(fd)?;
        self.ofile[fd] = None;
        self.vfs.file_close(f)
    }

    pub fn fstat(&self, fd: Fd) -> Result<Stat> {
        self.vfs.file_stat(self.fd(fd)?)
    }

    /// a second descriptor sharing the open file, and its offset
    pub fn dup(&mut self, fd: Fd) -> Result<Fd> {
        let f = self.fd(fd)?;
        let new = self.fdalloc(f).ok_or(FsError::TooManyOpenFiles)?;
        self.vfs.file_dup(f)?;
        Ok(new)
    }

    /// create the path `new` as a link to the same inode as `old`
    pub fn link(&mut self, old: &str, new: &str) -> Result<()> {
        check_path(old)?;
        check_path(new)?;
        let vfs = self.vfs.clone();
        let ip = namei(&vfs, &self.cwd, old)?;
        let mut guard = vfs.ilock(&ip)?;
        if guard.kind == FileKind::Directory {
            vfs.iunlockput(guard)?;
            return Err(FsError::IsDirectory);
        }
        guard.nlink += 1;
        vfs.ops().write_inode(&guard)?;
        guard.unlock();

        let linked = (|| -> Result<()> {
            let mut name = FileName::default();
            let dp = nameiparent(&vfs, &self.cwd, new, &mut name)?;
            let mut dguard = vfs.ilock(&dp)?;
            if dp.dev() != ip.dev() {
                vfs.iunlockput(dguard)?;
                return Err(FsError::CrossDevice);
            }
            let result = vfs.ops().link(&vfs, &mut dguard, &name, ip.inum());
            vfs.iunlockput(dguard)?;
            result
        })();

        match linked {
            Ok(()) => vfs.iput(ip),
            Err(e) => {
                let mut guard = vfs.ilock(&ip)?;
                guard.nlink -= 1;
                vfs.ops().write_inode(&guard)?;
                vfs.iunlockput(guard)?;
                Err(e)
            }
        }
    }

    pub fn unlink(&mut self, path: &str) -> Result<()> {
        check_path(path)?;
        self.vfs.ops().unlink(&self.vfs, &self.cwd, path)
    }

    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        check_path(path)?;
        let vfs = self.vfs.clone();
        let guard = self.create(&vfs, path, FileKind::Directory, 0, 0)?;
        vfs.iunlockput(guard)
    }

    pub fn mknod(&mut self, path: &str, major: i16, minor: i16) -> Result<()> {
        check_path(path)?;
        let vfs = self.vfs.clone();
        let guard = self.create(&vfs, path, FileKind::Device, major, minor)?;
        vfs.iunlockput(guard)
    }

    pub fn chdir(&mut self, path: &str) -> Result<()> {
        check_path(path)?;
        let ip = namei(&self.vfs, &self.cwd, path)?;
        let guard = self.vfs.ilock(&ip)?;
        if guard.kind != FileKind::Directory {
            self.vfs.iunlockput(guard)?;
            return Err(FsError::NotDirectory);
        }
        guard.unlock();
        let old = std::mem::replace(&mut self.cwd, ip);
        self.vfs.iput(old)
    }

    fn create<'v>(
        &self,
        vfs: &'v Vfs,
        path: &str,
        kind: FileKind,
        major: i16,
        minor: i16,
    ) -> Result<InodeGuard<'v>> {
        let mut name = FileName::default();
        let dp = nameiparent(vfs, &self.cwd, path, &mut name)?;
        vfs.ops().create(vfs, dp, &name, kind, major, minor)
    }

    /// allocate a file descriptor for the given file
    fn fdalloc(&mut self, f: FileId) -> Option<Fd> {
        let fd = self.ofile.iter().position(Option::is_none)?;
        self.ofile[fd] = Some(f);
        Some(fd)
    }

    fn fd(&self, fd: Fd) -> Result<FileId> {
        self.ofile
            .get(fd)
            .copied()
            .flatten()
            .ok_or(FsError::InvalidArgument("bad file descriptor"))
    }
}

fn check_path(path: &str) -> Result<()> {
    if path.len() >= MAXPATH {
        return Err(FsError::InvalidArgument("path too long"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::thread;

    use parking_lot::Mutex;

    use super::*;
    use crate::{
        error::Invariant,
        fs::BSIZE,
        param::FsConfig,
        utils::init_test_environment::{init_test_environment, mount_test_image},
        vfs::CharDevice,
    };

    #[test]
    fn test_write_close_reopen_read() -> anyhow::Result<()> {
        let vfs = init_test_environment();
        let mut proc = Process::new(vfs)?;
        let data: Vec<u8> = (0..10000u32).map(|i| (i * 7 % 256) as u8).collect();

        let fd = proc.open("/f", OpenFlags::CREATE | OpenFlags::RDWR)?;
        assert_eq!(proc.write(fd, &data)?, 10000);
        proc.close(fd)?;

        let fd = proc.open("/f", OpenFlags::RDONLY)?;
        let mut back = vec![0u8; 10000];
        assert_eq!(proc.read(fd, &mut back)?, 10000);
        assert_eq!(back, data);
        assert_eq!(proc.read(fd, &mut back)?, 0);
        assert_eq!(proc.fstat(fd)?.size, 10000);
        proc.close(fd)?;
        proc.exit()?;
        Ok(())
    }

    #[test]
    fn test_link_then_unlink_original() -> anyhow::Result<()> {
        let vfs = init_test_environment();
        let mut proc = Process::new(vfs)?;
        proc.mkdir("/d")?;
        let fd = proc.open("/d/f", OpenFlags::CREATE | OpenFlags::WRONLY)?;
        proc.write(fd, b"shared")?;
        proc.close(fd)?;

        proc.link("/d/f", "/d/g")?;
        let fd = proc.open("/d/g", OpenFlags::RDONLY)?;
        assert_eq!(proc.fstat(fd)?.nlink, 2);
        proc.close(fd)?;

        proc.unlink("/d/f")?;
        assert!(matches!(
            proc.open("/d/f", OpenFlags::RDONLY),
            Err(FsError::NotFound)
        ));
        let fd = proc.open("/d/g", OpenFlags::RDONLY)?;
        let st = proc.fstat(fd)?;
        assert_eq!(st.nlink, 1);
        let mut buf = [0u8; 16];
        assert_eq!(proc.read(fd, &mut buf)?, 6);
        assert_eq!(&buf[..6], b"shared");
        proc.close(fd)?;
        proc.exit()?;
        Ok(())
    }

    #[test]
    fn test_failed_link_restores_link_count() -> anyhow::Result<()> {
        let vfs = init_test_environment();
        let mut proc = Process::new(vfs)?;
        proc.mkdir("/d")?;
        for path in ["/a", "/b"] {
            let fd = proc.open(path, OpenFlags::CREATE)?;
            proc.close(fd)?;
        }
        assert!(matches!(proc.link("/a", "/b"), Err(FsError::Exists)));
        assert!(matches!(
            proc.link("/a", "/missing/x"),
            Err(FsError::NotFound)
        ));
        assert!(matches!(proc.link("/d", "/e"), Err(FsError::IsDirectory)));
        let fd = proc.open("/a", OpenFlags::RDONLY)?;
        assert_eq!(proc.fstat(fd)?.nlink, 1);
        proc.close(fd)?;
        proc.exit()?;
        Ok(())
    }

    #[test]
    fn test_open_modes() -> anyhow::Result<()> {
        let vfs = init_test_environment();
        let mut proc = Process::new(vfs)?;
        let fd = proc.open("/f", OpenFlags::CREATE | OpenFlags::WRONLY)?;
        let mut buf = [0u8; 4];
        assert!(matches!(
            proc.read(fd, &mut buf),
            Err(FsError::PermissionDenied)
        ));
        proc.write(fd, b"abcdef")?;
        proc.close(fd)?;

        let fd = proc.open("/f", OpenFlags::RDONLY)?;
        assert!(matches!(
            proc.write(fd, b"x"),
            Err(FsError::PermissionDenied)
        ));
        proc.close(fd)?;

        // create on an existing file opens it
        let fd = proc.open("/f", OpenFlags::CREATE | OpenFlags::RDONLY)?;
        assert_eq!(proc.fstat(fd)?.size, 6);
        proc.close(fd)?;

        let fd = proc.open("/f", OpenFlags::RDWR | OpenFlags::TRUNC)?;
        assert_eq!(proc.fstat(fd)?.size, 0);
        proc.close(fd)?;

        assert!(matches!(
            proc.open("/", OpenFlags::RDWR),
            Err(FsError::IsDirectory)
        ));
        proc.mkdir("/d")?;
        assert!(matches!(
            proc.open("/d", OpenFlags::CREATE),
            Err(FsError::Exists)
        ));
        assert!(matches!(proc.mkdir("/d"), Err(FsError::Exists)));
        assert!(matches!(
            proc.open("/nope", OpenFlags::RDONLY),
            Err(FsError::NotFound)
        ));
        proc.exit()?;
        Ok(())
    }

    #[test]
    fn test_dup_shares_offset() -> anyhow::Result<()> {
        let vfs = init_test_environment();
        let mut proc = Process::new(vfs.clone())?;
        let fd = proc.open("/f", OpenFlags::CREATE | OpenFlags::RDWR)?;
        let fd2 = proc.dup(fd)?;
        assert_ne!(fd, fd2);
        proc.write(fd, b"ab")?;
        proc.write(fd2, b"cd")?;
        proc.close(fd)?;
        assert_eq!(proc.fstat(fd2)?.size, 4);
        proc.close(fd2)?;
        assert!(matches!(
            proc.fstat(fd2),
            Err(FsError::InvalidArgument(_))
        ));

        let fd = proc.open("/f", OpenFlags::RDONLY)?;
        let mut buf = [0u8; 4];
        proc.read(fd, &mut buf)?;
        assert_eq!(&buf, b"abcd");
        proc.close(fd)?;
        proc.exit()?;
        Ok(())
    }

    #[test]
    fn test_descriptor_and_file_table_limits() -> anyhow::Result<()> {
        let config = FsConfig {
            max_fds_per_process: 3,
            file_table_capacity: 4,
            ..FsConfig::default()
        };
        let (vfs, _fs) = mount_test_image(2000, 200, config);
        let mut proc = Process::new(vfs.clone())?;
        for _ in 0..3 {
            proc.open("/", OpenFlags::RDONLY)?;
        }
        assert!(matches!(
            proc.open("/", OpenFlags::RDONLY),
            Err(FsError::TooManyOpenFiles)
        ));
        // the failed open released its file and inode reference
        assert_eq!(vfs.icache().refcnt(&vfs.root()), 5);

        let mut other = Process::new(vfs.clone())?;
        other.open("/", OpenFlags::RDONLY)?;
        assert!(matches!(
            other.open("/", OpenFlags::RDONLY),
            Err(FsError::TooManyOpenFiles)
        ));
        other.exit()?;
        proc.exit()?;
        assert_eq!(vfs.icache().refcnt(&vfs.root()), 1);
        Ok(())
    }

    #[test]
    fn test_chdir_and_relative_paths() -> anyhow::Result<()> {
        let vfs = init_test_environment();
        let mut proc = Process::new(vfs.clone())?;
        proc.mkdir("/a")?;
        proc.mkdir("/a/b")?;
        proc.chdir("/a")?;
        let fd = proc.open("b/f", OpenFlags::CREATE)?;
        proc.close(fd)?;
        proc.chdir("b")?;
        let fd = proc.open("f", OpenFlags::RDONLY)?;
        proc.close(fd)?;
        proc.chdir("..")?;
        assert!(matches!(proc.chdir("b/f"), Err(FsError::NotDirectory)));
        proc.chdir("/")?;
        assert_eq!(proc.cwd(), vfs.root());
        proc.exit()?;
        Ok(())
    }

    #[test]
    fn test_unlink_rules() -> anyhow::Result<()> {
        let vfs = init_test_environment();
        let mut proc = Process::new(vfs.clone())?;
        proc.mkdir("/d")?;
        let fd = proc.open("/d/f", OpenFlags::CREATE)?;
        proc.close(fd)?;

        assert!(matches!(proc.unlink("/d"), Err(FsError::NotEmpty)));
        assert!(matches!(
            proc.unlink("/d/."),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(matches!(
            proc.unlink("/d/.."),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(matches!(proc.unlink("/d/g"), Err(FsError::NotFound)));

        let root_links = |proc: &mut Process| -> anyhow::Result<i16> {
            let fd = proc.open("/", OpenFlags::RDONLY)?;
            let nlink = proc.fstat(fd)?.nlink;
            proc.close(fd)?;
            Ok(nlink)
        };
        assert_eq!(root_links(&mut proc)?, 2);
        proc.unlink("/d/f")?;
        proc.unlink("/d")?;
        assert_eq!(root_links(&mut proc)?, 1);
        proc.exit()?;
        Ok(())
    }

    #[test]
    fn test_write_chunks_follow_block_budget() -> anyhow::Result<()> {
        let config = FsConfig {
            max_op_blocks: 6,
            ..FsConfig::default()
        };
        assert_eq!(config.max_write_bytes(), BSIZE);
        let (vfs, _fs) = mount_test_image(2000, 200, config);
        let mut proc = Process::new(vfs)?;
        let fd = proc.open("/f", OpenFlags::CREATE | OpenFlags::RDWR)?;
        assert_eq!(proc.write(fd, &[9u8; 5 * BSIZE + 17])?, 5 * BSIZE + 17);
        assert_eq!(proc.fstat(fd)?.size as usize, 5 * BSIZE + 17);
        proc.close(fd)?;
        proc.exit()?;
        Ok(())
    }

    #[derive(Default)]
    struct Recorder {
        written: Mutex<Vec<u8>>,
    }

    impl CharDevice for Recorder {
        fn read(&self, dst: &mut [u8]) -> Result<usize> {
            dst.fill(b'z');
            Ok(dst.len())
        }

        fn write(&self, src: &[u8]) -> Result<usize> {
            self.written.lock().extend_from_slice(src);
            Ok(src.len())
        }
    }

    #[test]
    fn test_device_files_dispatch_by_major() -> anyhow::Result<()> {
        let vfs = init_test_environment();
        let recorder = Arc::new(Recorder::default());
        vfs.devices().register(2, recorder.clone())?;
        let mut proc = Process::new(vfs.clone())?;

        proc.mknod("/rec", 2, 0)?;
        let fd = proc.open("/rec", OpenFlags::RDWR)?;
        assert_eq!(proc.write(fd, b"to the device")?, 13);
        let mut buf = [0u8; 3];
        assert_eq!(proc.read(fd, &mut buf)?, 3);
        assert_eq!(&buf, b"zzz");
        let st = proc.fstat(fd)?;
        assert_eq!((st.kind, st.size), (FileKind::Device, 0));
        proc.close(fd)?;
        assert_eq!(&recorder.written.lock()[..], b"to the device");

        // create on a device opens the device
        let fd = proc.open("/rec", OpenFlags::CREATE | OpenFlags::WRONLY)?;
        proc.close(fd)?;

        proc.mknod("/nodriver", 5, 0)?;
        let fd = proc.open("/nodriver", OpenFlags::WRONLY)?;
        let err = proc.write(fd, b"x").unwrap_err();
        assert!(matches!(err, FsError::Fatal(Invariant::UnknownDevice(5))));
        proc.close(fd)?;

        proc.mknod("/bad", 42, 0)?;
        assert!(matches!(
            proc.open("/bad", OpenFlags::RDONLY),
            Err(FsError::InvalidArgument(_))
        ));
        proc.exit()?;
        Ok(())
    }

    #[test]
    fn test_path_length_is_bounded() -> anyhow::Result<()> {
        let vfs = init_test_environment();
        let mut proc = Process::new(vfs)?;
        let long = "/".repeat(MAXPATH);
        assert!(matches!(
            proc.open(&long, OpenFlags::RDONLY),
            Err(FsError::InvalidArgument(_))
        ));
        proc.exit()?;
        Ok(())
    }

    #[test]
    fn test_concurrent_creates_in_one_directory() -> anyhow::Result<()> {
        let vfs = init_test_environment();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let vfs = vfs.clone();
                thread::spawn(move || -> Result<()> {
                    let mut proc = Process::new(vfs)?;
                    for i in 0..8 {
                        let fd = proc.open(&format!("/t{t}_{i}"), OpenFlags::CREATE | OpenFlags::RDWR)?;
                        proc.write(fd, format!("{t}:{i}").as_bytes())?;
                        proc.close(fd)?;
                    }
                    proc.exit()
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker panicked")?;
        }

        let mut proc = Process::new(vfs.clone())?;
        let mut inodes = Vec::new();
        for t in 0..4 {
            for i in 0..8 {
                let fd = proc.open(&format!("/t{t}_{i}"), OpenFlags::RDONLY)?;
                let mut buf = [0u8; 8];
                let n = proc.read(fd, &mut buf)?;
                assert_eq!(&buf[..n], format!("{t}:{i}").as_bytes());
                inodes.push(proc.fstat(fd)?.ino);
                proc.close(fd)?;
            }
        }
        inodes.sort_unstable();
        inodes.dedup();
        assert_eq!(inodes.len(), 32);
        proc.exit()?;
        assert_eq!(vfs.icache().in_use(), 1);
        Ok(())
    }

    #[test]
    fn test_racing_creates_of_one_name_agree() -> anyhow::Result<()> {
        let vfs = init_test_environment();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let vfs = vfs.clone();
                thread::spawn(move || -> Result<u32> {
                    let mut proc = Process::new(vfs)?;
                    let fd = proc.open("/same", OpenFlags::CREATE | OpenFlags::RDWR)?;
                    let ino = proc.fstat(fd)?.ino;
                    proc.close(fd)?;
                    proc.exit()?;
                    Ok(ino)
                })
            })
            .collect();
        let mut inodes = Vec::new();
        for handle in handles {
            inodes.push(handle.join().expect("worker panicked")?);
        }
        inodes.dedup();
        assert_eq!(inodes.len(), 1);

        // exactly one directory entry names it
        let mut proc = Process::new(vfs)?;
        let fd = proc.open("/", OpenFlags::RDONLY)?;
        assert_eq!(proc.fstat(fd)?.size, 3 * 16);
        proc.close(fd)?;
        proc.exit()?;
        Ok(())
    }

    #[test]
    fn test_shared_file_writers_do_not_overlap() -> anyhow::Result<()> {
        let vfs = init_test_environment();
        let mut proc = Process::new(vfs.clone())?;
        let fd = proc.open("/log", OpenFlags::CREATE | OpenFlags::RDWR)?;
        let f = proc.ofile[fd].ok_or(FsError::NotFound)?;
        let handles: Vec<_> = (0..4u8)
            .map(|t| {
                let vfs = vfs.clone();
                vfs.file_dup(f).map(|f| {
                    thread::spawn(move || -> Result<()> {
                        for _ in 0..16 {
                            vfs.file_write(f, &[b'a' + t; 64])?;
                        }
                        vfs.file_close(f)
                    })
                })
            })
            .collect::<Result<_>>()?;
        for handle in handles {
            handle.join().expect("worker panicked")?;
        }
        assert_eq!(proc.fstat(fd)?.size, 4 * 16 * 64);
        proc.close(fd)?;

        let fd = proc.open("/log", OpenFlags::RDONLY)?;
        let mut content = vec![0u8; 4 * 16 * 64];
        proc.read(fd, &mut content)?;
        for record in content.chunks(64) {
            assert!(record.iter().all(|b| *b == record[0]));
        }
        proc.close(fd)?;
        proc.exit()?;
        Ok(())
    }
}
