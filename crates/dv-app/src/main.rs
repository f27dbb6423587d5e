//! Command line browser for data files

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use dv_core::{ErrorPolicy, RepoConfig, RepoTree};
use dv_data::{default_registry, registry_from_config, RegistryConfig};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod render;

#[derive(Parser)]
#[command(name = "repo-browse", version, about = "Browse data files as a lazily loaded tree")]
struct Opts {
    /// Files or directories to load
    paths: Vec<PathBuf>,

    /// How many levels below each loaded path to expand
    #[arg(long, default_value_t = 1)]
    depth: usize,

    /// TOML file with the file type registry
    #[arg(long, value_name = "FILE")]
    registry: Option<PathBuf>,

    /// Fail on the first open or fetch error instead of reporting it
    #[arg(long)]
    strict: bool,

    /// Print part of a node's data, e.g. `/grid.npy:1,2:5`
    #[arg(long, value_name = "NODE_PATH:INDEX")]
    slice: Vec<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, value_name = "LEVEL", default_value = "warn")]
    log_level: String,
}

fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// Split `NODE_PATH:INDEX` at the first colon. A missing index selects everything.
fn parse_slice(text: &str) -> Result<(&str, &str)> {
    let (path, index) = text.split_once(':').unwrap_or((text, ""));
    if !path.starts_with('/') {
        bail!("node path '{path}' must start with '/'");
    }
    Ok((path, index))
}

fn run(opts: Opts) -> Result<()> {
    let registry = match &opts.registry {
        Some(path) => {
            let config = RegistryConfig::load(path)
                .with_context(|| format!("reading registry {}", path.display()))?;
            registry_from_config(&config)?
        }
        None => default_registry(),
    };
    let config = RepoConfig {
        error_policy: if opts.strict { ErrorPolicy::Strict } else { ErrorPolicy::Lenient },
        ..RepoConfig::default()
    };
    let mut repo = RepoTree::new(Arc::new(registry), config);

    for path in &opts.paths {
        let id = repo.load_file(path)?;
        repo.expand(id, opts.depth)?;
    }
    info!("Loaded {} nodes", repo.len());

    let mut out = io::stdout().lock();
    render::print_tree(&mut out, &repo)?;

    for slice in &opts.slice {
        let (node_path, index) = parse_slice(slice)?;
        let id = repo
            .find_by_node_path(node_path)
            .ok_or_else(|| anyhow!("no loaded node at {node_path}"))?;
        if !repo.item(id)?.is_open() {
            debug!("Opening {} for slicing", node_path);
            repo.open(id)?;
        }
        render::print_slice(&mut out, &repo, id, index)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    init_tracing(&opts.log_level);
    run(opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dv_core::Registry;
    use tempfile::tempdir;

    #[test]
    fn test_parse_slice() {
        assert_eq!(parse_slice("/a/b:1, 2:5").unwrap(), ("/a/b", "1, 2:5"));
        assert_eq!(parse_slice("/a").unwrap(), ("/a", ""));
        assert!(parse_slice("a:1").is_err());
    }

    #[test]
    fn test_print_tree_and_slice() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.csv");
        std::fs::write(&path, "x,y\n1,2\n3,4\n").unwrap();

        let mut repo = RepoTree::new(Arc::new(default_registry()), RepoConfig::strict());
        let id = repo.load_file(&path).unwrap();
        repo.expand(id, 1).unwrap();

        let mut text = Vec::new();
        render::print_tree(&mut text, &repo).unwrap();
        let text = String::from_utf8(text).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "table.csv  [CSV table]  2 rows, 2 columns");
        assert!(lines[1].starts_with("  x  [Column]"));
        assert_eq!(lines.len(), 5);

        let mut text = Vec::new();
        render::print_slice(&mut text, &repo, id, "1").unwrap();
        let text = String::from_utf8(text).unwrap();
        assert!(text.starts_with("/table.csv [1]\n  float64 2 × 2 (index, columns)\n"));
    }

    #[test]
    fn test_missing_file_is_reported() {
        let dir = tempdir().unwrap();
        let mut repo = RepoTree::new(Arc::new(Registry::new()), RepoConfig::default());
        let id = repo.load_file(dir.path().join("absent.bin")).unwrap();
        repo.expand(id, 1).unwrap();

        let mut text = Vec::new();
        render::print_tree(&mut text, &repo).unwrap();
        let text = String::from_utf8(text).unwrap();
        assert!(text.contains("absent.bin  [Unknown File]"));
        assert!(text.contains("! File not found"));
    }
}
