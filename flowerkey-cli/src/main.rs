//! FlowerKey command-line front end.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use config::{BackendConfig, CliConfig};
use dialoguer::Password;
use flowerkey_core::sync::{DirBackend, WebDavBackend};
use flowerkey_core::vault::MASTER_DATA_KEY;
use flowerkey_core::{
    CharsetMode, Entry, EntryType, KeyRing, MasterPasswordData, NewEntry, Session,
    StorageBackend, SyncEngine, Vault,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use zeroize::Zeroizing;

const SECRET_ENV: &str = "FLOWERKEY_SECRET";

/// FlowerKey - stateless passwords and encrypted vault sync
#[derive(Parser)]
#[command(name = "flowerkey", version)]
#[command(about = "Stateless passwords and encrypted vault sync", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "FLOWERKEY_CONFIG")]
    config: Option<PathBuf>,

    /// Vault database path override
    #[arg(long)]
    vault: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Letters and digits
    Alnum,
    /// Letters, digits and symbols
    Symbols,
}

impl From<ModeArg> for CharsetMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Alnum => CharsetMode::Alphanumeric,
            ModeArg::Symbols => CharsetMode::WithSymbols,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TypeArg {
    Password,
    Bookmark,
    FileRef,
}

impl From<TypeArg> for EntryType {
    fn from(t: TypeArg) -> Self {
        match t {
            TypeArg::Password => EntryType::Password,
            TypeArg::Bookmark => EntryType::Bookmark,
            TypeArg::FileRef => EntryType::FileRef,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a vault protected by a memory secret
    Init {
        /// Account salt mixed into generated passwords
        #[arg(long)]
        user_salt: Option<String>,
    },

    /// Regenerate the password for a codename
    Generate {
        codename: String,
        #[arg(long, value_enum, default_value = "alnum")]
        mode: ModeArg,
        #[arg(long, default_value_t = 16)]
        length: usize,
    },

    /// Add an entry
    Add {
        #[command(subcommand)]
        kind: AddKind,
    },

    /// List entries
    List {
        #[arg(long = "type", value_enum)]
        entry_type: Option<TypeArg>,
        #[arg(long)]
        folder: Option<String>,
    },

    /// Search entries
    Search { query: String },

    /// Delete an entry
    Delete { id: Uuid },

    /// Store an entry type as plaintext or sealed
    Policy {
        #[arg(value_enum)]
        entry_type: TypeArg,
        #[arg(long)]
        encrypt: bool,
    },

    /// Run one sync round
    Sync,

    /// Replace local entries with the remote snapshot
    Restore,

    /// Show sync status
    Status,
}

#[derive(Subcommand)]
enum AddKind {
    /// A generated password, stored by codename only
    Password {
        codename: String,
        #[arg(long, value_enum, default_value = "alnum")]
        mode: ModeArg,
        #[arg(long, default_value_t = 16)]
        length: usize,
        #[arg(long, default_value = "")]
        folder: String,
        #[arg(long)]
        tag: Vec<String>,
    },

    Bookmark {
        url: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        folder: String,
        #[arg(long)]
        tag: Vec<String>,
    },

    /// A reference to a file stored elsewhere
    File {
        name: String,
        #[arg(long)]
        source: String,
        #[arg(long, default_value = "")]
        folder: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(CliConfig::default_path);
    let mut cfg = if config_path.exists() {
        CliConfig::load(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        info!("No config file found, using defaults");
        CliConfig::default()
    };
    if let Some(vault) = cli.vault {
        cfg.vault_path = vault;
    }

    match cli.command {
        Commands::Init { user_salt } => init(&cfg, user_salt.as_deref()),
        Commands::Generate {
            codename,
            mode,
            length,
        } => {
            let (vault, session) = open_unlocked(&cfg)?;
            let password =
                Zeroizing::new(session.generate_password(&codename, mode.into(), length)?);
            println!("{}", password.as_str());
            close(&vault, session)
        }
        Commands::Add { kind } => {
            let (vault, session) = open_unlocked(&cfg)?;
            let entry = vault.create_entry(new_entry(kind))?;
            println!("{}", entry.id);
            close(&vault, session)
        }
        Commands::List { entry_type, folder } => {
            let (vault, session) = open_unlocked(&cfg)?;
            let entries = match (entry_type, folder) {
                (Some(t), _) => vault.entries_by_type(t.into())?,
                (None, Some(folder)) => vault.entries_by_folder(&folder)?,
                (None, None) => vault.all_entries()?,
            };
            print_entries(&entries);
            close(&vault, session)
        }
        Commands::Search { query } => {
            let (vault, session) = open_unlocked(&cfg)?;
            print_entries(&vault.search(&query)?);
            close(&vault, session)
        }
        Commands::Delete { id } => {
            let (vault, session) = open_unlocked(&cfg)?;
            vault.delete_entry(id)?;
            println!("Deleted {}", id);
            close(&vault, session)
        }
        Commands::Policy {
            entry_type,
            encrypt,
        } => {
            let (vault, session) = open_unlocked(&cfg)?;
            let rewritten = vault.set_encryption_policy(entry_type.into(), encrypt)?;
            println!("Rewrote {} entries", rewritten);
            close(&vault, session)
        }
        Commands::Sync => sync_command(&cfg, SyncAction::Round).await,
        Commands::Restore => sync_command(&cfg, SyncAction::Restore).await,
        Commands::Status => sync_command(&cfg, SyncAction::Status).await,
    }
}

#[derive(Clone, Copy)]
enum SyncAction {
    Round,
    Restore,
    Status,
}

async fn sync_command(cfg: &CliConfig, action: SyncAction) -> Result<()> {
    let (vault, session) = open_unlocked(cfg)?;
    match &cfg.backend {
        BackendConfig::Dir { path } => {
            run_sync(action, DirBackend::new(path), Arc::clone(&vault), cfg).await?
        }
        BackendConfig::WebDav(dav) => {
            let backend = WebDavBackend::new(dav.clone())?;
            run_sync(action, backend, Arc::clone(&vault), cfg).await?
        }
    }
    close(&vault, session)
}

fn init(cfg: &CliConfig, user_salt: Option<&str>) -> Result<()> {
    if let Some(parent) = cfg.vault_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let vault = Vault::open(&cfg.vault_path)?;
    if vault.get_config::<MasterPasswordData>(MASTER_DATA_KEY)?.is_some() {
        bail!("Vault at {} is already initialized", cfg.vault_path.display());
    }

    let secret = read_secret(true)?;
    let (data, session) = KeyRing::new().setup(secret.as_bytes(), user_salt)?;
    vault.set_config(MASTER_DATA_KEY, &data)?;
    session.lock();

    println!(
        "Initialized vault {} (device {})",
        cfg.vault_path.display(),
        vault.device_id()
    );
    Ok(())
}

/// Detach the vault's codec before dropping the session that owns the key.
fn close(vault: &Vault, session: Session) -> Result<()> {
    vault.lock()?;
    session.lock();
    Ok(())
}

fn open_unlocked(cfg: &CliConfig) -> Result<(Arc<Vault>, Session)> {
    if !cfg.vault_path.exists() {
        bail!(
            "No vault at {}; run `flowerkey init` first",
            cfg.vault_path.display()
        );
    }
    let vault = Vault::open(&cfg.vault_path)?;

    let data: MasterPasswordData = vault
        .get_config(MASTER_DATA_KEY)?
        .context("Vault is not initialized")?;
    let secret = read_secret(false)?;
    let session = KeyRing::new()
        .unlock(secret.as_bytes(), &data)
        .context("Wrong memory secret")?;
    vault.unlock(session.codec())?;

    Ok((Arc::new(vault), session))
}

/// Read the memory secret from the environment or the terminal.
fn read_secret(confirm: bool) -> Result<Zeroizing<String>> {
    if let Ok(value) = std::env::var(SECRET_ENV) {
        let value = Zeroizing::new(value);
        if !value.is_empty() {
            return Ok(value);
        }
    }

    let prompt = Password::new().with_prompt("Memory secret");
    let prompt = if confirm {
        prompt.with_confirmation("Confirm memory secret", "Secrets do not match")
    } else {
        prompt
    };
    prompt
        .interact()
        .map(Zeroizing::new)
        .map_err(|e| anyhow::anyhow!("Failed to read memory secret: {}", e))
}

fn new_entry(kind: AddKind) -> NewEntry {
    match kind {
        AddKind::Password {
            codename,
            mode,
            length,
            folder,
            tag,
        } => NewEntry::password(codename, mode.into(), length)
            .in_folder(folder)
            .with_tags(tag),
        AddKind::Bookmark {
            url,
            title,
            folder,
            tag,
        } => NewEntry::bookmark(url, title).in_folder(folder).with_tags(tag),
        AddKind::File {
            name,
            source,
            folder,
        } => NewEntry::file_ref(name, source).in_folder(folder),
    }
}

fn print_entries(entries: &[Entry]) {
    for entry in entries {
        let label = match entry.entry_type {
            EntryType::Password => entry.codename.as_deref(),
            EntryType::Bookmark => entry.title.as_deref().or(entry.url.as_deref()),
            EntryType::FileRef => entry.file_name.as_deref(),
        }
        .unwrap_or("");
        let folder = if entry.folder.is_empty() {
            String::new()
        } else {
            format!(" [{}]", entry.folder)
        };
        println!("{}  {:<9} {}{}", entry.id, entry.entry_type, label, folder);
    }
}

async fn run_sync<B: StorageBackend + 'static>(
    action: SyncAction,
    backend: B,
    vault: Arc<Vault>,
    cfg: &CliConfig,
) -> Result<()> {
    let engine = SyncEngine::with_settings(Arc::new(backend), vault, cfg.sync);

    match action {
        SyncAction::Round => {
            let report = engine.sync().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        SyncAction::Restore => {
            if engine.restore_from_snapshot().await? {
                println!("Restored {} entries", engine.vault().all_entries()?.len());
            } else {
                println!("No remote snapshot found");
            }
        }
        SyncAction::Status => {
            println!("{}", serde_json::to_string_pretty(&engine.status()?)?);
        }
    }
    Ok(())
}
