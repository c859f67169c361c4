use clap::Parser;

use crate::param::{FSSIZE, NINODES};

#[derive(Parser, Debug, PartialEq)]
#[command(author, version, about, long_about)]
pub enum Xv6FsCli {
    /// create a new file system image
    Mkfs(MkfsArgs),
    /// list a directory
    Ls(PathArgs),
    /// print a file's contents
    Cat(PathArgs),
    /// copy a host file into the image
    Put(PutArgs),
    /// create a directory
    Mkdir(PathArgs),
    /// create a device file
    Mknod(MknodArgs),
    /// remove a file or an empty directory
    Rm(PathArgs),
    /// create a hard link
    Ln(LinkArgs),
    /// show an inode's metadata
    Stat(PathArgs),
}

///make a new fs subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "make a new file system")]
pub struct MkfsArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long)]
    pub image_file_path: String,
    /// the size of the file system in blocks
    #[clap(short, long, default_value_t = FSSIZE)]
    pub size: u32,
    /// the inode count of the file system
    #[clap(short, long, default_value_t = NINODES)]
    pub inode_count: u32,
}

/// a subcommand operating on one path inside the image
#[derive(clap::Args, Debug, PartialEq)]
pub struct PathArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long)]
    pub image_file_path: String,
    /// path inside the file system
    #[clap(default_value = "/")]
    pub path: String,
}

#[derive(clap::Args, Debug, PartialEq)]
pub struct PutArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long)]
    pub image_file_path: String,
    /// file on the host to copy
    pub source: String,
    /// destination path inside the file system
    pub dest: String,
}

#[derive(clap::Args, Debug, PartialEq)]
pub struct MknodArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long)]
    pub image_file_path: String,
    pub path: String,
    pub major: i16,
    pub minor: i16,
}

#[derive(clap::Args, Debug, PartialEq)]
pub struct LinkArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long)]
    pub image_file_path: String,
    /// existing path
    pub old: String,
    /// new name for it
    pub new: String,
}
