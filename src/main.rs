//! # paper-chat CLI (`pchat`)
//!
//! Ask questions about a PDF from the terminal, against any
//! OpenAI-compatible model server (Ollama, LM Studio, llama.cpp, vLLM,
//! OpenAI itself).
//!
//! ## Usage
//!
//! ```bash
//! pchat --config ./pchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pchat ask <pdf> "<question>"` | Answer one question and exit |
//! | `pchat chat <pdf>` | Interactive multi-turn session |
//! | `pchat extract <pdf>` | Print the extracted text per page |
//! | `pchat chunks <pdf>` | Print the chunks the PDF is split into |
//! | `pchat completions <shell>` | Print a shell completion script |
//!
//! In `chat`, `/reset` starts a fresh conversation, `/history` prints the
//! transcript so far, `/quit` exits, and Ctrl-C cancels the question in
//! flight without touching the history.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use paper_chat::config::{self, FileConfig, RagOptions};
use paper_chat::pdf::{PdfDocument, PdfTextExtractor, TextExtractor};
use paper_chat::{ErrorKind, FileResolver, PdfRef, RagEngine};
use paper_chat_core::chunk::RecursiveSplitter;
use paper_chat_core::models::Role;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Level;

/// Grounded, multi-turn question answering over academic PDFs.
///
/// Model endpoints are read from a TOML file with `[llm]` and `[embedding]`
/// tables. API keys fall back to `OPENAI_API_KEY`.
#[derive(Parser)]
#[command(
    name = "pchat",
    about = "Ask grounded, multi-turn questions about an academic PDF",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./pchat.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug). Logs go to stderr.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question about a PDF.
    Ask {
        /// Path to the PDF.
        pdf: PathBuf,
        /// The question.
        question: String,
    },

    /// Start an interactive conversation about a PDF.
    Chat {
        /// Path to the PDF.
        pdf: PathBuf,
    },

    /// Print the text extracted from each page.
    ///
    /// Does not need a configuration file.
    Extract {
        /// Path to the PDF.
        pdf: PathBuf,
        /// Print all pages as one text, separated by blank lines.
        #[arg(long)]
        joined: bool,
    },

    /// Print the chunks a PDF is split into before embedding.
    ///
    /// Uses `[rag]` chunk settings from the config file when present.
    Chunks {
        /// Path to the PDF.
        pdf: PathBuf,
    },

    /// Generate a shell completion script.
    Completions {
        /// Target shell.
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that don't require config
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "pchat", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Extract { pdf, joined } => {
            let document = extract(pdf).await?;
            print_document(&document, *joined);
            return Ok(());
        }
        Commands::Chunks { pdf } => {
            // Use config if available, otherwise the default chunk sizes
            let options = config::load_config(&cli.config)
                .map(|cfg| cfg.rag)
                .unwrap_or_default();
            run_chunks(pdf, &options).await?;
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ask { pdf, question } => {
            let engine = build_engine(cfg)?;
            let answer = engine.answer("ask", &pdf_ref(&pdf), &question).await?;
            println!("{}", answer.trim_end());
        }
        Commands::Chat { pdf } => {
            let engine = build_engine(cfg)?;
            run_chat(&engine, &pdf_ref(&pdf)).await?;
        }
        Commands::Extract { .. } | Commands::Chunks { .. } | Commands::Completions { .. } => {}
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn build_engine(cfg: FileConfig) -> Result<RagEngine> {
    let options = cfg.rag.clone();
    let engine = RagEngine::builder(Arc::new(cfg), Arc::new(FileResolver::new()))
        .options(options)
        .build()?;
    Ok(engine)
}

/// Reference a PDF by path, labelled with its file name.
fn pdf_ref(path: &Path) -> PdfRef {
    let label = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    PdfRef::new(path.to_string_lossy().into_owned()).with_label(label)
}

async fn extract(path: &Path) -> Result<PdfDocument> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let document = tokio::task::spawn_blocking(move || PdfTextExtractor.extract(&bytes)).await??;
    Ok(document)
}

fn print_document(document: &PdfDocument, joined: bool) {
    eprintln!(
        "PDF {}: {} pages, {} with text",
        document.version,
        document.total_pages,
        document.pages.len()
    );
    for (key, value) in &document.info {
        eprintln!("  {}: {}", key, value);
    }

    if joined {
        println!("{}", document.joined_text());
        return;
    }
    for page in &document.pages {
        println!("--- page {} ---", page.page);
        println!("{}", page.text);
    }
}

async fn run_chunks(path: &Path, options: &RagOptions) -> Result<()> {
    let document = extract(path).await?;
    let splitter = RecursiveSplitter::new(options.chunk_size, options.chunk_overlap)?;
    let source = pdf_ref(path);
    let chunks = splitter.chunk_pages(&document.pages, source.source());

    for chunk in &chunks {
        println!(
            "--- chunk {} (page {}, {} chars) ---",
            chunk.ord,
            chunk.page.unwrap_or(1),
            chunk.text.chars().count()
        );
        println!("{}", chunk.text);
    }
    eprintln!("{} chunks", chunks.len());
    Ok(())
}

/// Read stdin lines on a dedicated thread.
///
/// A blocking read inside the runtime would keep `pchat` from exiting
/// until the next line arrives.
fn stdin_lines() -> mpsc::UnboundedReceiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Interactive loop. Once `pchat` listens for Ctrl-C it no longer dies on
/// SIGINT, so Ctrl-C is watched throughout: at the prompt it exits, while
/// a question is in flight it cancels that question.
async fn run_chat(engine: &RagEngine, pdf: &PdfRef) -> Result<()> {
    let mut conv_id = uuid::Uuid::new_v4().to_string();
    let mut lines = stdin_lines();

    eprintln!(
        "Chatting about {}. /reset starts over, /history shows the transcript, /quit exits.",
        pdf.source()
    );

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.recv() => line,
            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        let line = line?;
        let question = line.trim();
        match question {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                engine.reset_conversation(&conv_id).await;
                conv_id = uuid::Uuid::new_v4().to_string();
                eprintln!("Conversation reset.");
                continue;
            }
            "/history" => {
                for message in engine.history(&conv_id).await {
                    let who = match message.role {
                        Role::Human => "you",
                        Role::Ai => "assistant",
                        Role::System => "system",
                    };
                    println!("[{}] {}", who, message.content);
                }
                continue;
            }
            _ => {}
        }

        let cancel = CancellationToken::new();
        let turn = engine.answer_with_cancel(&conv_id, pdf, question, &cancel);
        tokio::pin!(turn);
        let result = loop {
            tokio::select! {
                result = &mut turn => break result,
                _ = tokio::signal::ctrl_c() => cancel.cancel(),
            }
        };

        match result {
            Ok(answer) => println!("{}\n", answer.trim_end()),
            Err(e) if e.kind() == ErrorKind::Cancelled => eprintln!("(cancelled)"),
            Err(e) if e.kind() == ErrorKind::ConfigIncomplete => return Err(e.into()),
            Err(e) => eprintln!("error: {}", e),
        }
    }

    Ok(())
}
