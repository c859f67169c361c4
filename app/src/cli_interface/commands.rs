//! carry out one command line against an image file
use std::io::Write;

use anyhow::Context;

use crate::{
    fs::{Dirent, FileKind, DIRENT_SIZE},
    mkfs,
    mount::mount_image,
    param::FsConfig,
    utils::traits::OnDiskRecord,
    vfs::{OpenFlags, Process, Stat},
};

use super::Xv6FsCli;

/// run `cli`, writing anything it prints to `out`
pub fn run<W: Write>(cli: Xv6FsCli, out: &mut W) -> anyhow::Result<()> {
    match cli {
        Xv6FsCli::Mkfs(args) => mkfs::mkfs(&args.image_file_path, args.size, args.inode_count),
        Xv6FsCli::Ls(args) => with_process(&args.image_file_path, |proc| ls(proc, &args.path, out)),
        Xv6FsCli::Cat(args) => with_process(&args.image_file_path, |proc| {
            let fd = proc
                .open(&args.path, OpenFlags::RDONLY)
                .with_context(|| format!("cat: cannot open {}", args.path))?;
            let mut buf = [0u8; 512];
            loop {
                let n = proc.read(fd, &mut buf)?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n])?;
            }
            Ok(proc.close(fd)?)
        }),
        Xv6FsCli::Put(args) => with_process(&args.image_file_path, |proc| {
            let data = std::fs::read(&args.source)
                .with_context(|| format!("put: cannot read {}", args.source))?;
            let fd = proc
                .open(
                    &args.dest,
                    OpenFlags::CREATE | OpenFlags::WRONLY | OpenFlags::TRUNC,
                )
                .with_context(|| format!("put: cannot create {}", args.dest))?;
            let written = proc.write(fd, &data)?;
            proc.close(fd)?;
            writeln!(out, "{written} bytes written to {}", args.dest)?;
            Ok(())
        }),
        Xv6FsCli::Mkdir(args) => with_process(&args.image_file_path, |proc| {
            proc.mkdir(&args.path)
                .with_context(|| format!("mkdir: {} failed to create", args.path))
        }),
        Xv6FsCli::Mknod(args) => with_process(&args.image_file_path, |proc| {
            proc.mknod(&args.path, args.major, args.minor)
                .with_context(|| format!("mknod: {} failed to create", args.path))
        }),
        Xv6FsCli::Rm(args) => with_process(&args.image_file_path, |proc| {
            proc.unlink(&args.path)
                .with_context(|| format!("rm: {} failed to delete", args.path))
        }),
        Xv6FsCli::Ln(args) => with_process(&args.image_file_path, |proc| {
            proc.link(&args.old, &args.new)
                .with_context(|| format!("link {} {}: failed", args.old, args.new))
        }),
        Xv6FsCli::Stat(args) => with_process(&args.image_file_path, |proc| {
            let fd = proc
                .open(&args.path, OpenFlags::RDONLY)
                .with_context(|| format!("stat: cannot open {}", args.path))?;
            let st = proc.fstat(fd)?;
            proc.close(fd)?;
            writeln!(
                out,
                "dev {} ino {} type {} nlink {} size {}",
                st.dev,
                st.ino,
                kind_label(st.kind),
                st.nlink,
                st.size
            )?;
            Ok(())
        }),
    }
}

/// mount the image, run `f` as a fresh process, then flush everything
fn with_process<F>(image_file_path: &str, f: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut Process) -> anyhow::Result<()>,
{
    let vfs = mount_image(image_file_path, FsConfig::default())?;
    let mut proc = Process::new(vfs.clone())?;
    let result = f(&mut proc);
    proc.exit()?;
    vfs.sync()?;
    result
}

fn ls<W: Write>(proc: &mut Process, path: &str, out: &mut W) -> anyhow::Result<()> {
    let fd = proc
        .open(path, OpenFlags::RDONLY)
        .with_context(|| format!("ls: cannot open {path}"))?;
    let st = proc.fstat(fd)?;
    if st.kind != FileKind::Directory {
        print_entry(out, path, &st)?;
        return Ok(proc.close(fd)?);
    }

    let mut raw = [0u8; DIRENT_SIZE];
    while proc.read(fd, &mut raw)? == DIRENT_SIZE {
        let entry = Dirent::decode_from(&raw)?;
        if entry.is_hole() {
            continue;
        }
        let name = entry.file_name().to_string();
        let child = format!("{}/{}", path.trim_end_matches('/'), name);
        let cfd = proc
            .open(&child, OpenFlags::RDONLY)
            .with_context(|| format!("ls: cannot stat {child}"))?;
        let st = proc.fstat(cfd)?;
        proc.close(cfd)?;
        print_entry(out, &name, &st)?;
    }
    Ok(proc.close(fd)?)
}

fn print_entry<W: Write>(out: &mut W, name: &str, st: &Stat) -> anyhow::Result<()> {
    writeln!(
        out,
        "{name:<14} {:<4} {:>3} {}",
        kind_label(st.kind),
        st.ino,
        st.size
    )?;
    Ok(())
}

fn kind_label(kind: FileKind) -> &'static str {
    match kind {
        FileKind::Free => "free",
        FileKind::Directory => "dir",
        FileKind::RegularFile => "file",
        FileKind::Device => "dev",
    }
}
