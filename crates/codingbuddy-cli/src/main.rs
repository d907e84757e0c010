use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codingbuddy_agent::{EditSession, SessionController};
use codingbuddy_core::{AppConfig, CancellationToken};
use codingbuddy_diff::collab::{FileSystemService, GitVcs, LocalFileSystem, Vcs};
use codingbuddy_llm::DeepSeekClient;
use codingbuddy_observe::Observer;
use std::io::Read;
use std::path::PathBuf;

mod output;

use output::print_json;

#[derive(Parser)]
#[command(name = "codingbuddy")]
#[command(about = "SEARCH/REPLACE edit-block engine", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging to stderr.
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a request to the model and apply the SEARCH/REPLACE edits it
    /// proposes, retrying with reflection feedback on failure.
    Edit {
        /// The change to request. Reads from stdin if omitted.
        prompt: Option<String>,

        /// Repo-relative files the model may edit (repeatable).
        #[arg(long = "file", value_name = "PATH")]
        files: Vec<PathBuf>,

        /// Working directory (defaults to the current directory).
        #[arg(long, default_value = ".")]
        cwd: PathBuf,

        /// Parse and validate, but never write or commit.
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Edit {
            prompt,
            files,
            cwd,
            dry_run,
        } => run_edit(&cwd, prompt, files, dry_run, cli.json, cli.verbose),
    }
}

fn run_edit(
    cwd: &PathBuf,
    prompt: Option<String>,
    files: Vec<PathBuf>,
    dry_run: bool,
    json_mode: bool,
    verbose: bool,
) -> Result<()> {
    let prompt = match prompt {
        Some(p) => p,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading prompt from stdin")?;
            buf
        }
    };

    let mut config = AppConfig::load(cwd).unwrap_or_default();
    config.edit.dry_run = dry_run || config.edit.dry_run;

    let fs = LocalFileSystem::new(cwd.clone());
    let abs_fnames_in_chat: Vec<PathBuf> = if files.is_empty() {
        fs.list_repo_files()
            .unwrap_or_default()
            .into_iter()
            .map(|rel| cwd.join(rel))
            .collect()
    } else {
        files.iter().map(|f| cwd.join(f)).collect()
    };

    let llm = DeepSeekClient::new(&config.llm).context("constructing LLM client")?;
    let vcs = GitVcs::new(cwd.clone());
    let vcs_ref: Option<&dyn Vcs> = if fs.vcs_root().is_some() {
        Some(&vcs)
    } else {
        None
    };

    let mut observer = Observer::new(cwd, &config.telemetry).context("initialising observer")?;
    observer.set_verbose(verbose);

    let mut controller = SessionController::new(
        &llm,
        &fs,
        vcs_ref,
        Some(&observer),
        config.edit,
        CancellationToken::new(),
    );
    let mut session = EditSession::new(cwd.clone(), prompt, abs_fnames_in_chat);

    match controller.run_to_completion(&mut session) {
        Ok(applied) => {
            if json_mode {
                print_json(&serde_json::json!({
                    "applied_files": applied,
                    "attempts": session.attempt,
                }))?;
            } else {
                for file in &applied {
                    println!("applied {file}");
                }
            }
            Ok(())
        }
        Err(err) => {
            if json_mode {
                print_json(&serde_json::json!({
                    "error": err.to_string(),
                    "attempts": session.attempt,
                    "reflection_messages": session.reflection_messages,
                }))?;
            } else {
                eprintln!("codingbuddy: {err}");
            }
            Err(err.into())
        }
    }
}
