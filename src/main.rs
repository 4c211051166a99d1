//! Entry point for the unpackscan CLI.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{debug, info, info_span, warn};

use unpackscan::cli::{CleanupArgs, Command, ScanArgs, SizeArgs, UnpackArgs};
use unpackscan::{
    ClamdScanner, CleanupEngine, Cli, FileKind, ScanOptions, Toolbox, UnpackEngine, UnpackOptions, UnpackTree,
    logging, scan_contexts,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_config())?;

    match cli.command {
        Command::Unpack(args) => unpack(args).await,
        Command::Cleanup(args) => cleanup(args).await,
        Command::Scan(args) => scan(args).await,
    }
}

/// Resolve a path that has to exist, the way it will show up in logs.
fn existing_path(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).with_context(|| format!("Path {} does not exist", path.display()))
}

async fn unpack(args: UnpackArgs) -> Result<()> {
    let path = existing_path(&args.path)?;
    let tmp_root = existing_path(&args.tmp_dir)?;
    let engine = UnpackEngine::new(Toolbox::system(), info_span!("unpack"));

    if let Some(tree) = unpack_requested(&engine, &path, args.recursive, &args.size, &tmp_root).await? {
        print!("{tree}");
    }
    Ok(())
}

/// Unpack `path` as asked on the command line.
///
/// Directories are always walked recursively. Anything else below the size
/// threshold is left alone, which yields `None`.
async fn unpack_requested(
    engine: &UnpackEngine,
    path: &Path,
    recursive: bool,
    size: &SizeArgs,
    tmp_root: &Path,
) -> Result<Option<UnpackTree>> {
    let classification = engine.classify(path).await;
    debug!("Got file metadata:\n{classification}");

    let recursive = recursive || classification.kind == FileKind::Dir;
    if classification.kind != FileKind::Dir && classification.size < size.threshold() {
        warn!(
            "File size is below the threshold of {}, not unpacking. See help for options",
            size.threshold_display()
        );
        return Ok(None);
    }

    let tree = if recursive {
        let options = UnpackOptions {
            min_size: size.threshold(),
            tmp_root: tmp_root.to_path_buf(),
        };
        let tree = engine.unpack_recursive(classification, &options).await?;
        info!("Found and unpacked the following:\n{tree}");
        tree
    } else {
        let context = engine.unpack(classification, tmp_root).await?;
        let tree = UnpackTree::new(context);
        info!("Unpacked {tree}");
        tree
    };

    Ok(Some(tree))
}

async fn cleanup(args: CleanupArgs) -> Result<()> {
    let path = existing_path(&args.path)?;
    let engine = CleanupEngine::new(Toolbox::system(), info_span!("cleanup"));
    info!("Attempting to clean up {}", path.display());

    if args.file {
        let tmp_root = existing_path(&args.tmp_dir)?;
        engine.cleanup_recursive(&path, &tmp_root).await?;
    } else {
        engine.cleanup_path(&path).await?;
    }

    info!("Cleaned up {}", path.display());
    Ok(())
}

async fn scan(args: ScanArgs) -> Result<()> {
    if !ClamdScanner::is_available() {
        bail!("Unable to find {}, please install it and try again", ClamdScanner::PROGRAM);
    }

    let path = existing_path(&args.path)?;
    let tmp_root = existing_path(&args.tmp_dir)?;
    let tools = Toolbox::system();
    let unpacker = UnpackEngine::new(tools.clone(), info_span!("unpack"));
    let cleaner = CleanupEngine::new(tools, info_span!("cleanup"));

    let scanned = async {
        let summary = match unpack_requested(&unpacker, &path, true, &args.size, &tmp_root).await? {
            Some(tree) => {
                let options = ScanOptions {
                    fail_fast: args.fail_fast,
                    all_match: args.allmatch,
                };
                Some(scan_contexts(&ClamdScanner, &tree, options).await)
            }
            None => None,
        };
        anyhow::Ok(summary)
    }
    .await;

    // Whatever happened above, nothing may be left mounted
    cleaner
        .cleanup_recursive(&path, &tmp_root)
        .await
        .with_context(|| format!("Unable to clean up after {}", path.display()))?;

    if let Some(summary) = scanned?
        && !summary.is_clean()
    {
        bail!("Found virus in {}", path.display());
    }
    Ok(())
}
