use clap::Parser;
use xv6fs::cli_interface::{self, Xv6FsCli};
/// a CLI interface to users to create an xv6 file system image,
/// or to work with the files inside one.
///
/// Every file subcommand mounts the image, runs as a single process
/// whose current directory is the root, and flushes the image on exit.
fn main() -> anyhow::Result<()> {
    env_logger::builder().format_timestamp_nanos().init();
    let args = Xv6FsCli::parse();
    cli_interface::run(args, &mut std::io::stdout().lock())
}
