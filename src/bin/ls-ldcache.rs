use anyhow::{Context, Result};
use bpaf::Bpaf;
use camino::Utf8PathBuf;
use ls_ldcache::resolver::DEFAULT_MAX_HOPS;
use ls_ldcache::{Cache, CacheEntry, Settings, SymlinkResolver};
use std::io::{self, Write};
use tracing::{debug, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Bpaf)]
#[bpaf(options, version)]
/// List the entries of a glibc ld.so.cache or resolve the libraries it maps
struct Options {
    #[bpaf(short, long)]
    /// Verbose output
    verbose: bool,

    #[bpaf(short('i'), long("input"), argument("CACHE"))]
    /// Input cache file, default etc/ld.so.cache under the root
    input: Option<Utf8PathBuf>,

    #[bpaf(short('r'), long, argument("NAME"))]
    /// Resolve the symlink chain of every library whose name starts with NAME
    resolve: Option<String>,

    #[bpaf(short('R'), long, argument("PREFIX"), fallback("/".into()))]
    /// Use alternative root prefix (like chroot)
    root: Utf8PathBuf,

    #[bpaf(long, argument("N"), fallback(DEFAULT_MAX_HOPS))]
    /// Maximum number of symlinks followed per library
    max_hops: usize,
}

/// Initialize the tracing subscriber, logging to stderr
///
/// # Arguments
///
/// * `verbose` - If true, sets log level to DEBUG, otherwise WARN
pub fn init_logging(verbose: bool) {
    let filter_level = if verbose { Level::DEBUG } else { Level::WARN };

    // Allow overriding via RUST_LOG
    let env_filter = EnvFilter::builder()
        .with_default_directive(filter_level.into())
        .from_env_lossy();

    let fmt_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_level(verbose)
        .with_target(verbose)
        .with_line_number(verbose)
        .without_time()
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    debug!("Logging initialized with level: {}", filter_level);
}

fn main() -> Result<()> {
    let options = options().run();

    init_logging(options.verbose);

    let settings = Settings::builder()
        .root(options.root)
        .maybe_cache(options.input)
        .max_hops(options.max_hops)
        .build();

    let cache_path = settings.cache_path();
    debug!("Using cache file: {}", cache_path);

    let cache = Cache::from_file(&cache_path)
        .with_context(|| format!("failed to decode cache {}", cache_path))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    // An empty name lists, like no name at all.
    let resolve = options.resolve.as_deref().filter(|name| !name.is_empty());

    let written = match resolve {
        Some(name) => resolve_entries(&mut out, &cache, name, &settings.resolver()),
        None => list_entries(&mut out, &cache),
    };

    finish_output(written)
}

/// A closed stdout (e.g. `| head`) ends the run normally.
fn finish_output(written: io::Result<()>) -> Result<()> {
    match written {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => Ok(other?),
    }
}

fn list_entries<W: Write>(out: &mut W, cache: &Cache) -> io::Result<()> {
    for entry in cache.entries() {
        writeln!(out, "{}", entry)?;
    }
    out.flush()
}

fn resolve_entries<W: Write>(
    out: &mut W,
    cache: &Cache,
    name: &str,
    resolver: &SymlinkResolver,
) -> io::Result<()> {
    let mut matched = 0;
    for entry in cache.find(name) {
        matched += 1;
        print_chain(out, entry, resolver)?;
    }

    if matched == 0 {
        warn!("No cache entry starts with {:?}", name);
    }
    out.flush()
}

fn print_chain<W: Write>(
    out: &mut W,
    entry: &CacheEntry,
    resolver: &SymlinkResolver,
) -> io::Result<()> {
    let chain = resolver.resolve(&entry.path);

    writeln!(out)?;
    writeln!(out, "{} [{}]", entry.soname, entry.arch())?;
    for hop in chain.hops() {
        writeln!(out, "    - {}", hop)?;
    }

    // Per-entry failures are reported inline; the remaining entries still run.
    if let Some(error) = chain.error() {
        debug!("{}: {}", entry.soname, error);
        writeln!(out, "    ! {}", error)?;
    }
    Ok(())
}
