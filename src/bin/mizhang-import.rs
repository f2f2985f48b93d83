use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use mizhang::models::RuleSet;
use mizhang::services::chapterizer::segment_with;
use mizhang::services::client::LibraryClient;
use mizhang::services::codec::{self, CodecContext, TextEncoding};
use mizhang::services::uploader::{DEFAULT_CHUNK_BUDGET, ImportOptions, import_text};
use mizhang::utils::{RetryPolicy, decode_utf8_text};

#[derive(Parser)]
#[command(author, version, about = "Encrypt and import plain-text books", long_about = None)]
struct Cli {
    /// Content server base URL
    #[arg(long, env = "MIZHANG_API_URL", default_value = "http://localhost:3000")]
    server: String,

    /// Bearer token sent with every request
    #[arg(long, env = "MIZHANG_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Attempts per request, including the first
    #[arg(long, default_value_t = 3)]
    attempts: u32,

    #[arg(long = "retry-delay-ms", default_value_t = 500)]
    retry_delay_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Segment, encrypt and upload a text file
    Import {
        file: PathBuf,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        author: String,
        /// Upload into an existing book instead of creating one
        #[arg(long = "book-id")]
        book_id: Option<String>,
        /// JSON rule list; the built-in rules are used when omitted
        #[arg(long)]
        rules: Option<PathBuf>,
        #[arg(long, default_value = "base91")]
        encoding: TextEncoding,
        /// Target encrypted bytes per upload chunk
        #[arg(long = "chunk-bytes", default_value_t = DEFAULT_CHUNK_BUDGET)]
        chunk_bytes: usize,
    },
    /// Print the chapter titles a text file would be split into
    Segment {
        file: PathBuf,
        #[arg(long)]
        rules: Option<PathBuf>,
    },
    /// Fetch and decrypt one chapter
    Read {
        book_id: String,
        chapter: usize,
    },
}

fn password() -> Result<String> {
    let password =
        std::env::var("MIZHANG_PASSWORD").context("MIZHANG_PASSWORD must be set")?;
    if password.is_empty() {
        bail!("MIZHANG_PASSWORD must not be empty");
    }
    Ok(password)
}

fn load_rules(path: Option<&Path>) -> Result<RuleSet> {
    match path {
        None => Ok(RuleSet::builtin()),
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read rules from {}", path.display()))?;
            RuleSet::from_json(&json)
                .with_context(|| format!("invalid rules in {}", path.display()))
        }
    }
}

fn load_text(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    decode_utf8_text(bytes).with_context(|| format!("{} is not valid UTF-8", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "mizhang=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let retry = RetryPolicy::new(cli.attempts, Duration::from_millis(cli.retry_delay_ms));
    let client = LibraryClient::new(cli.server, cli.token).with_retry(retry);

    match cli.command {
        Commands::Import {
            file,
            title,
            author,
            book_id,
            rules,
            encoding,
            chunk_bytes,
        } => {
            let ctx = CodecContext::new(password()?).with_encoding(encoding);
            let rules = load_rules(rules.as_deref())?;
            let text = load_text(&file)?;

            let book_id = match book_id {
                Some(id) => id,
                None => {
                    let title = codec::encode(&title, &ctx)?;
                    let author = codec::encode(&author, &ctx)?;
                    client.create_book(&title, &author).await?
                }
            };

            let options = ImportOptions {
                budget_bytes: chunk_bytes,
                retry,
            };
            let report = import_text(&book_id, &text, &rules, &ctx, &client, &options).await?;
            println!(
                "imported {} chapters into book {} ({} chunks, {} bytes)",
                report.chapter_count, report.book_id, report.total_chunks, report.file_size
            );
        }
        Commands::Segment { file, rules } => {
            let rules = load_rules(rules.as_deref())?;
            let text = load_text(&file)?;
            for (index, chapter) in segment_with(&text, &rules).iter().enumerate() {
                println!("{:>5}  {}  ({} bytes)", index, chapter.title, chapter.content.len());
            }
        }
        Commands::Read { book_id, chapter } => {
            let ctx = CodecContext::new(password()?);
            let record = client.chapter(&book_id, chapter).await?;
            let title = codec::decode(&record.title, &ctx).unwrap_or_else(|e| e.to_string());
            let content = if record.content.is_empty() {
                String::new()
            } else {
                codec::decode(&record.content, &ctx).unwrap_or_else(|e| e.to_string())
            };
            println!("{}\n\n{}", title, content);
        }
    }

    Ok(())
}
