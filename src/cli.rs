use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::logging::{DEFAULT_TRACE_FILE, LogConfig};
use crate::size::{format_size, parse_size};
use crate::unpack::DEFAULT_TMP_ROOT;

#[derive(Parser, Debug)]
#[command(name = "unpackscan")]
#[command(version)]
#[command(about = "Recursively unpack large archives and disk images so clamdscan can see inside them", long_about = None)]
#[command(after_help = "Examples:\n  \
  unpackscan scan disk.vmdk                unpack, scan and clean up a virtual disk\n  \
  unpackscan unpack -r image.iso           unpack an ISO and every archive inside it\n  \
  unpackscan cleanup --file image.iso      remove everything unpacked from image.iso")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Disable all console logging
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Log every action to /tmp/clam_unpacker.log
    #[arg(short = 't', long, global = true)]
    pub trace: bool,

    /// Override the trace log file, implies --trace
    #[arg(long, global = true, value_name = "FILE")]
    pub trace_file: Option<PathBuf>,
}

impl Cli {
    pub fn log_config(&self) -> LogConfig {
        let trace_file = self
            .trace_file
            .clone()
            .or_else(|| self.trace.then(|| PathBuf::from(DEFAULT_TRACE_FILE)));

        LogConfig {
            verbose: self.verbose,
            quiet: self.quiet,
            trace_file,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Unpack a file into the scratch directory
    Unpack(UnpackArgs),

    /// Remove scratch directories, un-mounting what was mounted
    Cleanup(CleanupArgs),

    /// Recursively unpack a file, scan everything with clamdscan, then clean up
    Scan(ScanArgs),
}

#[derive(Args, Debug)]
pub struct SizeArgs {
    /// Minimum file size to unpack, e.g. 500M or 2G
    #[arg(long, value_name = "SIZE", default_value = "2G", value_parser = parse_size)]
    pub min_size: u64,

    /// Ignore the file size lower limit (same as --min-size=0)
    #[arg(long)]
    pub ignore_size: bool,
}

impl SizeArgs {
    /// The effective minimum size in bytes.
    pub fn threshold(&self) -> u64 {
        if self.ignore_size { 0 } else { self.min_size }
    }

    /// The threshold for messages, e.g. `2 GiB`.
    pub fn threshold_display(&self) -> String {
        format_size(self.threshold())
    }
}

#[derive(Args, Debug)]
pub struct UnpackArgs {
    /// File or directory to unpack
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Recursively unpack the archives found inside
    #[arg(short = 'r', long)]
    pub recursive: bool,

    #[command(flatten)]
    pub size: SizeArgs,

    /// Directory to unpack files to
    #[arg(long, value_name = "DIR", default_value = DEFAULT_TMP_ROOT)]
    pub tmp_dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Scratch directory to remove, or the original file with --file
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Treat PATH as an original file and remove every directory unpacked from it
    #[arg(long)]
    pub file: bool,

    /// Directory to search for unpacked files
    #[arg(long, value_name = "DIR", default_value = DEFAULT_TMP_ROOT)]
    pub tmp_dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// File or directory to scan
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    #[command(flatten)]
    pub size: SizeArgs,

    /// Stop scanning after the first failure
    #[arg(long, visible_alias = "ff", conflicts_with = "allmatch")]
    pub fail_fast: bool,

    /// Report every signature match, not just the first
    #[arg(long)]
    pub allmatch: bool,

    /// Temporary working directory
    #[arg(long, value_name = "DIR", default_value = DEFAULT_TMP_ROOT)]
    pub tmp_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unpack::DEFAULT_MIN_SIZE;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("unpackscan").chain(args.iter().copied()))
    }

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn unpack_defaults() {
        let cli = parse(&["unpack", "disk.vmdk"]).unwrap();
        let Command::Unpack(args) = cli.command else {
            panic!("expected unpack");
        };
        assert!(!args.recursive);
        assert_eq!(args.size.threshold(), DEFAULT_MIN_SIZE);
        assert_eq!(args.size.threshold_display(), "2 GiB");
        assert_eq!(args.tmp_dir, PathBuf::from("/tmp"));
    }

    #[test]
    fn sizes_are_parsed_and_can_be_ignored() {
        let cli = parse(&["unpack", "-r", "--min-size", "40M", "x.tar"]).unwrap();
        let Command::Unpack(args) = cli.command else {
            panic!("expected unpack");
        };
        assert_eq!(args.size.threshold(), 40 * 1024 * 1024);

        let cli = parse(&["scan", "--ignore-size", "x.tar"]).unwrap();
        let Command::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(args.size.threshold(), 0);

        assert!(parse(&["unpack", "--min-size", "1.5Z", "x.tar"]).is_err());
    }

    #[test]
    fn fail_fast_conflicts_with_allmatch() {
        assert!(parse(&["scan", "--fail-fast", "--allmatch", "x.iso"]).is_err());
        assert!(parse(&["scan", "--ff", "x.iso"]).is_ok());
    }

    #[test]
    fn global_logging_flags() {
        let cli = parse(&["cleanup", "--file", "x.iso", "-v", "-t"]).unwrap();
        let config = cli.log_config();
        assert!(config.verbose);
        assert_eq!(config.trace_file, Some(PathBuf::from(DEFAULT_TRACE_FILE)));

        let cli = parse(&["--trace-file", "/var/log/u.log", "cleanup", "x"]).unwrap();
        assert_eq!(cli.log_config().trace_file, Some(PathBuf::from("/var/log/u.log")));
        assert_eq!(parse(&["cleanup", "x"]).unwrap().log_config().trace_file, None);
    }
}
