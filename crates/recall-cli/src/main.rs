use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use recall_core::export::{export_conversation, EventStatus, RawVoice};
use recall_core::store::FilterCategory;
use recall_core::{
    Direction, ExportOrchestrator, ExportRequest, KeyMaterial, MessageFilter, MessageProvider,
    PageCipher, RecallSettings,
};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "recall")]
#[command(about = "Recover chat history from the desktop client's encrypted store", long_about = None)]
struct Cli {
    /// Settings file (defaults to the per-user data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the database key in the running client
    #[cfg(windows)]
    Key {
        /// Client process id (looked up by name when omitted)
        #[arg(long)]
        pid: Option<u32>,

        /// Container used to verify candidates (the account's Media.db when omitted)
        #[arg(long)]
        container: Option<PathBuf>,
    },

    /// List running clients with their account, data directory and version
    #[cfg(windows)]
    Accounts,

    /// Check a key against page 1 of a container
    Verify {
        #[arg(long)]
        key: String,
        container: PathBuf,
    },

    /// Decrypt one container into a plain SQLite file
    Decrypt {
        #[arg(long)]
        key: String,
        container: PathBuf,
        output: PathBuf,
    },

    /// Export a whole account, streaming progress as JSON lines
    Export {
        #[arg(long)]
        key: String,
        source: PathBuf,
        dest: PathBuf,
    },

    /// Page through a conversation
    Messages {
        /// Decrypted account directory
        root: PathBuf,
        talker: String,

        /// Unix timestamp to start from (now when omitted)
        #[arg(long)]
        anchor: Option<i64>,

        #[arg(long, default_value = "50")]
        count: usize,

        #[arg(long, default_value = "forward")]
        direction: Direction,
    },

    /// Search a conversation by keyword and category
    Search {
        root: PathBuf,
        talker: String,

        #[arg(long)]
        keyword: Option<String>,

        /// all, file, media, link, voice, call or member:<user>
        #[arg(long, default_value = "all")]
        category: FilterCategory,

        #[arg(long)]
        anchor: Option<i64>,

        #[arg(long, default_value = "50")]
        count: usize,

        #[arg(long, default_value = "forward")]
        direction: Direction,
    },

    /// Days that have messages in a conversation
    Dates { root: PathBuf, talker: String },

    /// Profile of the account that owns a decrypted directory
    Whoami { root: PathBuf },

    /// Copy one conversation into a new, smaller account directory
    ExportChat {
        root: PathBuf,
        talker: String,
        dest: PathBuf,
    },
}

fn load_settings(config: Option<&Path>) -> Result<RecallSettings> {
    let path = match config {
        Some(p) => p.to_path_buf(),
        None => recall_core::paths::settings_path()?,
    };
    RecallSettings::load(&path).with_context(|| format!("loading settings from {}", path.display()))
}

fn cipher(settings: &RecallSettings) -> Result<PageCipher> {
    Ok(PageCipher::new(settings.cipher_params())?)
}

fn print_lines<T: Serialize>(items: &[T]) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for item in items {
        serde_json::to_writer(&mut out, item)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(i64::MAX / 2)
}

#[cfg(windows)]
fn find_key(settings: &RecallSettings, pid: Option<u32>, container: Option<PathBuf>) -> Result<KeyMaterial> {
    use recall_core::account::account_from_open_files;
    use recall_core::memory::windows::{find_process, WindowsProcess, CLIENT_MODULE, CLIENT_PROCESS};

    let pid = match pid {
        Some(pid) => pid,
        None => find_process(CLIENT_PROCESS)?,
    };
    let process = WindowsProcess::open(pid)?;
    let container = match container {
        Some(path) => path,
        None => account_from_open_files(process.open_file_paths()?)
            .map(|location| location.media_db())
            .with_context(|| format!("process {pid} has no account open; pass --container"))?,
    };
    let image = process.module_image(CLIENT_MODULE)?;
    let cipher = cipher(settings)?;
    let page1 = cipher.read_page1(&container)?;
    Ok(recall_core::recover_key(&process, &image, &page1, &cipher)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        #[cfg(windows)]
        Commands::Key { pid, container } => {
            let key = find_key(&settings, pid, container)?;
            println!("{}", key.to_hex());
        }

        #[cfg(windows)]
        Commands::Accounts => {
            print_lines(&recall_core::memory::windows::discover_clients()?)?;
        }

        Commands::Verify { key, container } => {
            let key = KeyMaterial::from_hex(&key)?;
            let cipher = cipher(&settings)?;
            let page1 = cipher.read_page1(&container)?;
            if !cipher.verify(&page1, key.as_bytes()) {
                bail!("key does not verify against {}", container.display());
            }
            println!("ok");
        }

        Commands::Decrypt { key, container, output } => {
            let key = KeyMaterial::from_hex(&key)?;
            cipher(&settings)?
                .decrypt_file(&container, &output, &key)
                .with_context(|| format!("decrypting {}", container.display()))?;
            println!("{}", output.display());
        }

        Commands::Export { key, source, dest } => {
            let orchestrator = ExportOrchestrator::new(settings, Arc::new(RawVoice));
            let mut events = orchestrator.export_all(ExportRequest {
                source_root: source,
                dest_root: dest,
                key_hex: key,
            });
            let mut finished = false;
            while let Some(event) = events.recv().await {
                finished = event.status == EventStatus::Processing && event.progress == 100;
                println!("{}", serde_json::to_string(&event)?);
            }
            if !finished {
                bail!("export did not finish");
            }
        }

        Commands::Messages {
            root,
            talker,
            anchor,
            count,
            direction,
        } => {
            let provider = MessageProvider::open(&root, &settings)?;
            let rows = provider.query(&talker, anchor.unwrap_or_else(now), count, direction)?;
            print_lines(&rows)?;
            provider.close()?;
        }

        Commands::Search {
            root,
            talker,
            keyword,
            category,
            anchor,
            count,
            direction,
        } => {
            let provider = MessageProvider::open(&root, &settings)?;
            let filter = MessageFilter { keyword, category };
            let rows = provider.search(&talker, anchor.unwrap_or_else(now), count, direction, &filter)?;
            print_lines(&rows)?;
            provider.close()?;
        }

        Commands::Dates { root, talker } => {
            let provider = MessageProvider::open(&root, &settings)?;
            print_lines(&provider.message_dates(&talker)?)?;
            provider.close()?;
        }

        Commands::Whoami { root } => {
            let provider = MessageProvider::open(&root, &settings)?;
            let info = provider
                .account_info()?
                .with_context(|| format!("no contact row for {}", provider.account()))?;
            println!("{}", serde_json::to_string(&info)?);
            provider.close()?;
        }

        Commands::ExportChat { root, talker, dest } => {
            let provider = MessageProvider::open(&root, &settings)?;
            let report = export_conversation(&provider, &talker, &dest)
                .with_context(|| format!("exporting {talker} to {}", dest.display()))?;
            println!("{}", serde_json::to_string(&report)?);
            provider.close()?;
        }
    }

    Ok(())
}
