use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use epistle::config::{self, EpistleConfig};
use epistle::daemon::Daemon;
use epistle::ingest::Ingestor;
use epistle::mail::session::MailSession;
use epistle::model::providers;
use epistle::secrets;
use epistle::store::{self, correspondents, memories, messages};
use epistle::summarize::Summarizer;

#[derive(Parser)]
#[command(name = "epistle")]
#[command(about = "An automated email assistant with long-term memory and retrieval")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the polling daemon
    Run,

    /// Generate all outstanding summaries of one kind
    Summarize {
        /// daily, weekly, monthly, or quarterly
        #[arg(long, default_value = "daily")]
        kind: String,

        /// Send each generated summary to its correspondent
        #[arg(long)]
        notify: bool,
    },

    /// Import the full mailbox history for configured correspondents
    Backfill,

    /// Store a credential: mail, anthropic, or openai
    Auth {
        /// Credential name
        name: String,
    },

    /// Show configuration and store counts
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            let config = config::load()?;
            let pool = store::open(&config.store.path).await?;
            let (chat, embedder) = providers::from_config(&config.model)?;
            let transport = MailSession::new(&config.mail)?;

            Daemon::new(
                &config,
                &pool,
                chat.as_ref(),
                embedder.as_ref(),
                &transport,
            )
            .run()
            .await
        }

        Commands::Summarize { kind, notify } => {
            let kind = memories::MemoryKind::from_str(&kind).ok_or_else(|| {
                anyhow::anyhow!("invalid kind '{kind}': use daily, weekly, monthly, or quarterly")
            })?;

            let config = config::load()?;
            let pool = store::open(&config.store.path).await?;
            let (chat, embedder) = providers::from_config(&config.model)?;
            let transport = MailSession::new(&config.mail)?;

            let summarizer = Summarizer::new(
                &pool,
                chat.as_ref(),
                embedder.as_ref(),
                &transport,
                &config.mail,
                &config.summarizer,
                config.model.summary_prompt.as_deref(),
            );
            summarizer.run_kind(kind, notify).await
        }

        Commands::Backfill => {
            let config = config::load()?;
            let pool = store::open(&config.store.path).await?;
            let (_, embedder) = providers::from_config(&config.model)?;
            let transport = MailSession::new(&config.mail)?;

            let ingestor = Ingestor::new(&pool, embedder.as_ref(), &config.mail);
            let inserted = ingestor.backfill(&transport).await?;
            println!("imported {inserted} new messages");
            Ok(())
        }

        Commands::Auth { name } => {
            let value = rpassword::prompt_password(format!("Value for '{name}': "))?;
            let path = secrets::store_key(&name, &value)?;
            println!("stored {}", path.display());
            Ok(())
        }

        Commands::Status => {
            let config = config::load()?;
            print_status(&config).await
        }
    }
}

async fn print_status(config: &EpistleConfig) -> anyhow::Result<()> {
    println!("epistle v{}", env!("CARGO_PKG_VERSION"));
    println!("store: {}", config.store.path);
    println!("provider: {} ({})", config.model.provider, config.model.chat_model);

    let pool = store::open(&config.store.path).await?;
    let correspondent_count = correspondents::all(&pool).await?.len();
    let message_count = messages::count(&pool).await?;
    let memory_count = memories::count(&pool).await?;

    println!("correspondents: {correspondent_count}");
    println!("messages: {message_count}");
    println!("memories: {memory_count}");
    Ok(())
}
