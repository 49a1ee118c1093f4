use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use secrecy::SecretString;

use book_import::telemetry::{self, LogFormat};
use book_import::{
    load_config, Database, FsObjectStore, ImportError, ImportJob, ImportJobManager, ImportRequest,
    ImportType, JobStatus,
};

/// Import manuscripts (EPUB, Word, Google Docs) as books.
#[derive(Parser, Debug)]
#[command(name = "book-import", version, about)]
struct Cli {
    /// Path to the JSON config file
    #[arg(short, long, env = "BOOK_IMPORT_CONFIG")]
    config: PathBuf,

    /// Log output format: text or json
    #[arg(long, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit an import and wait for it to finish
    #[command(subcommand)]
    Import(ImportCommand),
    /// Print a stored import job
    Status {
        job_id: String,
    },
}

#[derive(Subcommand, Debug)]
enum ImportCommand {
    /// Import an EPUB file
    Epub(FileArgs),
    /// Import a Word (.docx) file
    Word(FileArgs),
    /// Import a Google document
    Gdoc {
        /// Document id or URL
        handle: String,
        #[arg(long)]
        author: String,
        /// Environment variable holding the OAuth access token
        #[arg(long, default_value = "GOOGLE_ACCESS_TOKEN")]
        token_env: String,
    },
}

#[derive(Args, Debug)]
struct FileArgs {
    path: PathBuf,
    #[arg(long)]
    author: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.log_format);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command ended in a non-failed state.
async fn run(cli: Cli) -> Result<bool, ImportError> {
    let config = load_config(&cli.config)?;
    let db = Database::from_config(&config)?;
    let store = Arc::new(FsObjectStore::new(
        &config.object_store.root,
        config.object_store.public_base_url.clone(),
    ));
    let manager = ImportJobManager::new(&config, db, store)?;

    match cli.command {
        Command::Status { job_id } => {
            let job = manager
                .get_job(&job_id)?
                .ok_or(ImportError::JobNotFound(job_id))?;
            print_job(&job)?;
            Ok(job.status != JobStatus::Failed)
        }
        Command::Import(import) => {
            let request = build_request(import)?;
            let job_id = manager.submit(request).await?;
            eprintln!("submitted job {}", job_id);

            let job = wait_and_report(&manager, &job_id).await?;
            print_job(&job)?;
            Ok(job.status == JobStatus::Completed)
        }
    }
}

fn build_request(import: ImportCommand) -> Result<ImportRequest, ImportError> {
    match import {
        ImportCommand::Epub(args) => file_request(ImportType::Epub, args),
        ImportCommand::Word(args) => file_request(ImportType::Word, args),
        ImportCommand::Gdoc {
            handle,
            author,
            token_env,
        } => {
            let token = std::env::var(&token_env).map_err(|_| {
                ImportError::InvalidRequest(format!("environment variable {} is not set", token_env))
            })?;
            Ok(ImportRequest::google_doc(
                author,
                handle,
                SecretString::from(token),
            ))
        }
    }
}

fn file_request(import_type: ImportType, args: FileArgs) -> Result<ImportRequest, ImportError> {
    ImportRequest::from_path(args.author, import_type, &args.path)
}

/// Polls once a second, echoing step changes to stderr.
async fn wait_and_report(manager: &ImportJobManager, job_id: &str) -> Result<ImportJob, ImportError> {
    let mut last_step = String::new();
    loop {
        let job = manager
            .get_job(job_id)?
            .ok_or_else(|| ImportError::JobNotFound(job_id.to_string()))?;
        if job.current_step != last_step {
            eprintln!("[{:>3}%] {}", job.progress_percentage, job.current_step);
            last_step = job.current_step.clone();
        }
        if job.is_terminal() {
            return Ok(job);
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

fn print_job(job: &ImportJob) -> Result<(), ImportError> {
    let json = serde_json::to_string_pretty(job)?;
    println!("{}", json);
    Ok(())
}
