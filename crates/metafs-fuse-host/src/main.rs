// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! MetaFS FUSE Host - in-memory filesystem with extended attributes
//!
//! This binary mounts a MetaFS volume using libfuse (Linux) and serves it in
//! the foreground until it is unmounted.

#[cfg(all(feature = "fuse", target_os = "linux"))]
mod adapter;
#[cfg(any(test, all(feature = "fuse", target_os = "linux")))]
mod reply;

#[cfg(all(feature = "fuse", target_os = "linux"))]
use adapter::MetaFsFuse;
use anyhow::{Context, Result};
use clap::Parser;
use metafs_core::{FileStore, FsConfig};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(about = "An in-memory filesystem with extended attribute support using FUSE")]
struct Args {
    /// Mount point for the filesystem
    mount_point: PathBuf,

    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Allow other users to access the filesystem
    #[arg(long)]
    allow_other: bool,

    /// Allow root to access the filesystem
    #[arg(long)]
    allow_root: bool,

    /// Auto unmount on process exit
    #[arg(long)]
    auto_unmount: bool,

    /// Start without the sample file
    #[arg(long)]
    no_sample: bool,
}

fn load_config(config_path: Option<PathBuf>) -> Result<FsConfig> {
    match config_path {
        Some(path) => {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let config = FsConfig::from_json(&content)
                .with_context(|| format!("parsing config {}", path.display()))?;
            Ok(config)
        }
        None => Ok(FsConfig::default()),
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("Starting MetaFS FUSE Host");
    info!("Mount point: {}", args.mount_point.display());

    let mut config = load_config(args.config)?;
    if args.no_sample || env_flag("METAFS_NO_SAMPLE") {
        config.seed_sample = false;
    }
    info!("Configuration loaded: {:?}", config);

    let store = Arc::new(FileStore::new(&config));

    #[cfg(all(feature = "fuse", target_os = "linux"))]
    {
        let filesystem = MetaFsFuse::new(Arc::clone(&store), &config);

        let mut mount_options = vec![
            fuser::MountOption::FSName(config.fs_name.clone()),
            fuser::MountOption::Subtype("metafs".to_string()),
        ];

        if args.allow_other {
            mount_options.push(fuser::MountOption::AllowOther);
        }

        if args.allow_root {
            mount_options.push(fuser::MountOption::AllowRoot);
        }

        if args.auto_unmount {
            mount_options.push(fuser::MountOption::AutoUnmount);
        }

        info!("Mounting filesystem...");
        fuser::mount2(filesystem, &args.mount_point, &mount_options)
            .with_context(|| format!("mounting at {}", args.mount_point.display()))?;
        info!("MetaFS unmounted");
    }

    #[cfg(not(all(feature = "fuse", target_os = "linux")))]
    {
        warn!("FUSE support not compiled in. This binary is for testing only.");
        info!("To enable FUSE support, compile with: cargo build --features fuse");
    }

    let stats = store.stats();
    info!(
        files = stats.files,
        bytes = stats.bytes,
        descriptors = stats.descriptors_issued,
        "MetaFS FUSE host exiting"
    );

    Ok(())
}
