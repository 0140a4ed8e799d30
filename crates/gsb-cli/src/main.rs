//! Safe Browsing CLI
//!
//! Keeps a local list store up to date and checks URLs against it.

mod store;
mod transport;

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gsb_core::hash::{host_keys, url_prefixes};
use gsb_core::ranges::format_ranges;
use gsb_core::url::TEST_VECTORS;
use gsb_core::{
    canonicalize, canonicalize_bytes, ChunkKind, ChunkKinds, ClientConfig, Matcher, RequestKind, Storage, Verdict,
};
use gsb_updater::mac::CLIENT_KEY;
use gsb_updater::{UpdateOutcome, Updater};

use store::JsonFileStore;
use transport::HttpTransport;

#[derive(Parser)]
#[command(name = "gsb-cli")]
#[command(about = "Safe Browsing v2 list client")]
struct Cli {
    /// JSON client configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Local list store
    #[arg(short, long, global = true, default_value = "gsb-store.json")]
    store: PathBuf,

    /// HTTP proxy for requests to the service, overrides the config file
    #[arg(long, global = true)]
    proxy: Option<String>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch list updates from the service
    Update,

    /// Check URLs against the local lists
    Lookup {
        /// URLs to check
        #[arg(required = true)]
        urls: Vec<String>,

        /// Treat unconfirmed matches as listed
        #[arg(long)]
        fail_closed: bool,
    },

    /// Print the canonical form of a URL
    Canonicalize {
        url: String,
    },

    /// Print the host keys and prefixes derived from a URL
    Hash {
        url: String,
    },

    /// Run the canonicalization test vectors
    Selftest,

    /// Dump store info
    Info,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = Settings {
        config: cli.config.as_deref(),
        proxy: cli.proxy.as_deref(),
    };

    let result = match cli.command {
        Commands::Update => cmd_update(&settings, &cli.store),
        Commands::Lookup { urls, fail_closed } => cmd_lookup(&settings, &cli.store, &urls, fail_closed),
        Commands::Canonicalize { url } => cmd_canonicalize(&url),
        Commands::Hash { url } => cmd_hash(&url),
        Commands::Selftest => cmd_selftest(),
        Commands::Info => cmd_info(&settings, &cli.store),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

/// Where the client configuration comes from.
struct Settings<'a> {
    config: Option<&'a Path>,
    proxy: Option<&'a str>,
}

fn load_config(settings: &Settings<'_>) -> Result<ClientConfig, String> {
    let mut config = match settings.config {
        Some(path) => {
            let content =
                fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
            serde_json::from_str(&content).map_err(|e| format!("Invalid config '{}': {}", path.display(), e))?
        }
        None => ClientConfig::default(),
    };
    if let Some(proxy) = settings.proxy {
        config.proxy = Some(proxy.to_string());
    }
    Ok(config)
}

fn open_store(path: &Path) -> Result<JsonFileStore, String> {
    JsonFileStore::open(path).map_err(|e| e.to_string())
}

fn cmd_update(settings: &Settings<'_>, store_path: &Path) -> Result<(), String> {
    let config = load_config(settings)?;
    let store = open_store(store_path)?;
    let transport = HttpTransport::new(&config).map_err(|e| e.to_string())?;

    match Updater::new(&store, &transport, &config).run_update() {
        Ok(UpdateOutcome::Completed { saved, next_update_in }) => {
            println!("Update complete: {saved} chunk(s) saved");
            println!("  Next update in {next_update_in}s");
            Ok(())
        }
        Ok(UpdateOutcome::Blocked { remaining }) => {
            println!("Update skipped: next update allowed in {remaining}s");
            Ok(())
        }
        Ok(UpdateOutcome::RestartLimit) => Err("Server kept restarting the update, try again later".to_string()),
        Err(e) => Err(format!("Update failed: {e}")),
    }
}

fn cmd_lookup(settings: &Settings<'_>, store_path: &Path, urls: &[String], fail_closed: bool) -> Result<(), String> {
    let config = load_config(settings)?;
    let store = open_store(store_path)?;
    let transport = HttpTransport::new(&config).map_err(|e| e.to_string())?;
    let matcher = Matcher::new(&store, &transport, &config);

    for url in urls {
        match matcher.lookup(url) {
            Ok(Verdict::Listed(hit)) => println!("{url}: listed in {} (add chunk {})", hit.list, hit.add_chunk),
            Ok(Verdict::NotListed) => println!("{url}: not listed"),
            Err(e) if e.is_indeterminate() => {
                let verdict = if fail_closed { "listed" } else { "not listed" };
                println!("{url}: {verdict} (unconfirmed: {e})");
            }
            Err(e) => return Err(format!("Lookup of '{url}' failed: {e}")),
        }
    }
    Ok(())
}

fn cmd_canonicalize(url: &str) -> Result<(), String> {
    let form = canonicalize(url);
    println!("{}", form.matching_form());
    if form.display_form() != form.matching_form() {
        println!("  Display: {}", form.display_form());
    }
    Ok(())
}

fn cmd_hash(url: &str) -> Result<(), String> {
    let form = canonicalize(url);
    println!("Canonical: {}", form.matching_form());

    println!("Host keys:");
    for key in host_keys(&form.host, form.is_ip) {
        println!("  {}  {}", key.key, key.variant);
    }

    println!("Prefixes:");
    for variant in url_prefixes(&form) {
        println!("  {}  {}", hex(&variant.full_hash), variant.original);
    }
    Ok(())
}

fn cmd_selftest() -> Result<(), String> {
    let mut failed = 0usize;
    for (input, expected) in TEST_VECTORS {
        let actual = canonicalize_bytes(input).matching_form();
        if actual != *expected {
            failed += 1;
            println!("  FAIL {:?}", String::from_utf8_lossy(input));
            println!("       expected {expected}");
            println!("       got      {actual}");
        }
    }

    println!("{}/{} canonicalization vectors passed", TEST_VECTORS.len() - failed, TEST_VECTORS.len());
    if failed > 0 {
        return Err(format!("{failed} vector(s) failed"));
    }
    Ok(())
}

fn cmd_info(settings: &Settings<'_>, store_path: &Path) -> Result<(), String> {
    let config = load_config(settings)?;
    let store = open_store(store_path)?;
    let state = store.snapshot().map_err(|e| e.to_string())?;

    println!("Store: {}", store.path().display());
    println!("  Chunks:       {}", state.chunks.len());
    println!("  Full hashes:  {}", state.full_hashes.len());

    let ranges = store
        .list_ranges(&config.lists, ChunkKinds::ALL)
        .map_err(|e| e.to_string())?;
    println!("Lists:");
    for list in &config.lists {
        let held = |kind: ChunkKind| {
            ranges
                .iter()
                .find(|r| &r.list == list && r.kind == kind)
                .map(|r| format_ranges(&r.ranges))
                .unwrap_or_else(|| "-".to_string())
        };
        println!("  {list}");
        println!("    add: {}", held(ChunkKind::Add));
        println!("    sub: {}", held(ChunkKind::Sub));
    }

    println!("Requests:");
    for kind in [RequestKind::Data, RequestKind::Lookup] {
        let get = |key: String| {
            store
                .get_config(&key)
                .map(|v| v.unwrap_or_else(|| "-".to_string()))
                .map_err(|e| e.to_string())
        };
        println!(
            "  {:<7} timeout: {}, failures: {}",
            kind.as_str(),
            get(kind.timeout_key())?,
            get(kind.backoff_key())?
        );
    }

    let has_keys = store
        .get_config(CLIENT_KEY)
        .map_err(|e| e.to_string())?
        .is_some_and(|k| !k.is_empty());
    println!("MAC keys: {}", if has_keys { "present" } else { "none" });

    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
