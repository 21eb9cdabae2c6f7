//! Command line interface for turning Nostr form submissions into invoices.
//! Supports creating and saving forms, encoding locators, offline mapping and
//! assembly, following a form live, and serving the invoices over HTTP.

mod config;
mod decrypt;
mod error;
mod event;
mod fetch;
mod field_map;
mod form;
mod invoice;
mod locator;
mod nip44;
mod reducer;
mod relay;
mod render;
mod schema;
mod server;
mod session;
mod store;

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use config::Settings;
use event::Event;
use field_map::Role;
use invoice::InvoiceRecord;
use locator::Locator;
use relay::{RelayPool, Transport};
use schema::FormSchema;
use session::{Session, SessionConfig};
use store::{FormStore, SavedForm};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "invoicr",
    author,
    version,
    about = "Invoices from Nostr form submissions"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env", global = true)]
    env: String,
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Write a default `.env` if missing and create `STORE_ROOT`.
    Init,
    /// Create, save and forget forms.
    Form {
        #[command(subcommand)]
        action: FormAction,
    },
    /// Build or inspect shareable locators.
    Locator {
        #[command(subcommand)]
        action: LocatorAction,
    },
    /// Print the role mapping of a form template event (JSON file).
    Map {
        schema: PathBuf,
        /// Secret key (hex) for private templates.
        #[arg(long)]
        credential: Option<String>,
    },
    /// Assemble invoices from a template and submission event files.
    Assemble {
        /// Form template event (JSON file).
        #[arg(long)]
        schema: PathBuf,
        /// Submission event files.
        #[arg(required = true)]
        submissions: Vec<PathBuf>,
        /// Secret key (hex) for encrypted submissions.
        #[arg(long)]
        credential: Option<String>,
        /// Also render PDFs into `OUT_DIR`.
        #[arg(long)]
        pdf: bool,
    },
    /// Follow a form and write a PDF for every invoice.
    Watch {
        /// Form locator; defaults to the most recently saved form.
        locator: Option<String>,
    },
    /// Follow a form and serve its invoices over HTTP.
    Serve {
        /// Form locator; defaults to the most recently saved form.
        locator: Option<String>,
    },
}

/// Operations available under `invoicr form`.
#[derive(Subcommand)]
enum FormAction {
    /// Publish a new invoice form and save its credential.
    Create {
        #[arg(long)]
        name: Option<String>,
    },
    /// Save an existing form by locator.
    Add {
        locator: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// List saved forms.
    List,
    /// Forget a saved form.
    Remove { locator: String },
}

/// Operations available under `invoicr locator`.
#[derive(Subcommand)]
enum LocatorAction {
    /// Print the shareable URL for a form.
    Encode {
        /// Owner public key (hex or npub).
        owner: String,
        identifier: String,
        #[arg(long)]
        credential: Option<String>,
        /// Relay hint to embed; repeatable.
        #[arg(long = "relay")]
        relays: Vec<String>,
    },
    /// Print the parts of a locator as JSON.
    Decode { locator: String },
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    let store = FormStore::new(&cfg.store_root);
    match cli.command {
        Commands::Init => {
            fs::create_dir_all(&cfg.store_root)
                .with_context(|| format!("creating {}", cfg.store_root.display()))?;
            info!(root = %cfg.store_root.display(), "initialized");
        }
        Commands::Form { action } => handle_form(action, &cfg, &store).await?,
        Commands::Locator { action } => handle_locator(action, &cfg)?,
        Commands::Map { schema, credential } => {
            let schema = load_schema(&schema, credential.as_deref(), &cfg)?;
            let (map, unmapped) = field_map::map_schema_with_report(&schema.fields);
            let out = serde_json::json!({ "fieldMap": map, "unmapped": unmapped });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Assemble {
            schema,
            submissions,
            credential,
            pdf,
        } => {
            let schema = load_schema(&schema, credential.as_deref(), &cfg)?;
            let map = field_map::map_schema(&schema.fields);
            let events = submissions
                .iter()
                .map(|p| read_event(p))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let invoices = reducer::build_invoices(&events, &map, credential.as_deref()).await;
            println!("{}", serde_json::to_string_pretty(&invoices)?);
            if pdf {
                write_invoices(&cfg.out_dir, &invoices);
            }
        }
        Commands::Watch { locator } => {
            let loc = resolve_locator(locator.as_deref(), &store)?;
            let session = start_session(&cfg, &loc).await?;
            let mut rx = session.watch_invoices();
            loop {
                let invoices = rx.borrow_and_update().clone();
                print_summary(&invoices);
                write_invoices(&cfg.out_dir, &invoices);
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            session.shutdown().await;
        }
        Commands::Serve { locator } => {
            let loc = resolve_locator(locator.as_deref(), &store)?;
            let addr: SocketAddr = cfg
                .bind_http
                .parse()
                .with_context(|| format!("BIND_HTTP {}", cfg.bind_http))?;
            let session = start_session(&cfg, &loc).await?;
            info!(%addr, "serving invoices");
            let res = server::serve_http(
                addr,
                session.watch_invoices(),
                session.watch_phase(),
                async {
                    let _ = tokio::signal::ctrl_c().await;
                },
            )
            .await;
            session.shutdown().await;
            res?;
        }
    }
    Ok(())
}

async fn handle_form(action: FormAction, cfg: &Settings, store: &FormStore) -> anyhow::Result<()> {
    match action {
        FormAction::Create { name } => {
            let pool = RelayPool::new(cfg.relays.clone(), cfg.tor_socks.clone());
            let name = name.unwrap_or_else(|| form::DEFAULT_FORM_NAME.to_string());
            let (created, accepted) = form::create_default_form(&pool, &name, &cfg.relays).await?;
            if accepted == 0 {
                warn!("no relay accepted the form; it may not be reachable yet");
            }
            store.save(SavedForm {
                locator: created.locator.naddr()?,
                credential: Some(created.secret_hex.clone()),
                name: Some(name),
                saved_at: event::unix_now(),
            })?;
            println!("{}", created.locator.to_url(&cfg.locator_base)?);
        }
        FormAction::Add { locator, name } => {
            let loc = Locator::parse(&locator)?;
            let naddr = loc.naddr()?;
            if loc.credential.is_none() {
                warn!("locator has no credential; encrypted submissions will be skipped");
            }
            store.save(SavedForm {
                locator: naddr.clone(),
                credential: loc.credential,
                name,
                saved_at: event::unix_now(),
            })?;
            println!("{naddr}");
        }
        FormAction::List => {
            for f in store.list()? {
                println!(
                    "{}\t{}\t{}",
                    f.locator,
                    f.name.as_deref().unwrap_or("-"),
                    if f.credential.is_some() {
                        "credential"
                    } else {
                        "no credential"
                    }
                );
            }
        }
        FormAction::Remove { locator } => {
            let key = Locator::parse(&locator)
                .and_then(|l| l.naddr())
                .unwrap_or(locator.clone());
            if !store.remove(&key)? {
                bail!("form not saved: {locator}");
            }
        }
    }
    Ok(())
}

fn handle_locator(action: LocatorAction, cfg: &Settings) -> anyhow::Result<()> {
    match action {
        LocatorAction::Encode {
            owner,
            identifier,
            credential,
            relays,
        } => {
            let owner = locator::decode_pubkey(&owner)?;
            let mut loc = Locator::new(owner, identifier).with_relays(relays);
            if let Some(credential) = credential {
                nip44::parse_secret(&credential)?;
                loc = loc.with_credential(credential.to_lowercase());
            }
            println!("{}", loc.to_url(&cfg.locator_base)?);
        }
        LocatorAction::Decode { locator } => {
            let loc = locator::decode(&locator)?;
            let out = serde_json::json!({
                "owner": loc.owner,
                "identifier": loc.identifier,
                "relays": loc.relays,
                "credential": loc.credential,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}

fn read_event(path: &Path) -> anyhow::Result<Event> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

fn load_schema(
    path: &Path,
    credential: Option<&str>,
    cfg: &Settings,
) -> anyhow::Result<FormSchema> {
    let ev = read_event(path)?;
    if ev.kind != event::FORM_KIND {
        bail!("{} is kind {}, not a form template", path.display(), ev.kind);
    }
    Ok(FormSchema::from_event(&ev, credential, &cfg.view_pubkey))
}

/// An explicit locator, borrowing the saved credential when it has none, or
/// the most recently saved form.
fn resolve_locator(input: Option<&str>, store: &FormStore) -> anyhow::Result<Locator> {
    let Some(input) = input else {
        let saved = store
            .latest()?
            .ok_or_else(|| anyhow!("no locator given and no saved forms"))?;
        let mut loc = Locator::parse(&saved.locator)?;
        loc.credential = saved.credential;
        return Ok(loc);
    };
    let mut loc = Locator::parse(input)?;
    if loc.credential.is_none() {
        let naddr = loc.naddr()?;
        loc.credential = store
            .list()?
            .into_iter()
            .find(|f| f.locator == naddr)
            .and_then(|f| f.credential);
    }
    Ok(loc)
}

async fn start_session(cfg: &Settings, loc: &Locator) -> anyhow::Result<Session> {
    let transport: Arc<dyn Transport> = Arc::new(
        RelayPool::new(cfg.relays.clone(), cfg.tor_socks.clone())
            .verify_signatures(cfg.verify_sig),
    );
    let session = Session::start(
        transport,
        SessionConfig {
            owner: loc.owner.clone(),
            identifier: loc.identifier.clone(),
            credential: loc.credential.clone(),
            view_pubkey: cfg.view_pubkey.clone(),
            allowed_authors: cfg.allowed_authors.clone(),
            relay_hints: loc.relays.clone(),
            schema_timeout: cfg.schema_timeout,
        },
    )
    .await
    .context("opening form")?;
    let mapped = Role::ALL
        .iter()
        .filter(|role| session.field_map().is_mapped(**role))
        .count();
    info!(
        form = session.schema().name.as_deref().unwrap_or(loc.identifier.as_str()),
        fields = session.schema().field_tags().len(),
        mapped,
        "form loaded"
    );
    Ok(session)
}

fn print_summary(invoices: &[InvoiceRecord]) {
    println!("{} invoice(s)", invoices.len());
    for inv in invoices {
        println!(
            "{}\t{}\t{} {}\t{}",
            inv.invoice_number,
            if inv.client_name.is_empty() {
                "-"
            } else {
                &inv.client_name
            },
            inv.total_amount,
            inv.currency,
            invoice::display_datetime(&inv.submitted_at_iso)
        );
    }
}

fn write_invoices(dir: &Path, invoices: &[InvoiceRecord]) {
    let results = render::write_pdfs(dir, invoices);
    let written = results.iter().filter(|r| r.is_ok()).count();
    info!(dir = %dir.display(), written, failed = results.len() - written, "wrote pdfs");
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let store_root = base_dir.join("invoicr-data");
    let mut content = String::new();
    content.push_str(&format!("STORE_ROOT={}\n", display_path(&store_root)));
    content.push_str(&format!("RELAYS={}\n", config::DEFAULT_RELAYS.join(",")));
    content.push_str(&format!("BIND_HTTP={}\n", config::DEFAULT_BIND_HTTP));
    content.push_str("OUT_DIR=\n");
    content.push_str("ALLOWED_AUTHORS=\n");
    content.push_str(&format!("LOCATOR_BASE={}\n", config::DEFAULT_LOCATOR_BASE));
    content.push_str("VIEW_KEY=\n");
    content.push_str("SCHEMA_TIMEOUT_SECS=10\n");
    content.push_str("VERIFY_SIG=0\n");
    content.push_str("TOR_SOCKS=\n");
    fs::write(env_path, content)?;
    Ok(())
}

fn display_path(path: &PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run(cli).await
}
