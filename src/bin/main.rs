//! fsbridge CLI - drive the configured provider through the worker pool
//!
//! Usage:
//!   fsbridge ls [path]
//!   fsbridge cat <path>
//!   fsbridge put <path> [--file <local>]
//!   fsbridge stat <path>
//!   fsbridge mv <from> <to>
//!
//! Examples:
//!   fsbridge ls
//!   echo hello | fsbridge put notes/hello.txt
//!   fsbridge --thread --config ./fsbridge.toml cat notes/hello.txt

use clap::{Parser, Subcommand};
use fsbridge::classify::NodeKind;
use fsbridge::config::{Settings, WorkerMode};
use fsbridge::logging::set_up_logging;
use fsbridge::worker::protocol::ListOrder;
use fsbridge::{FsAdapter, FsError};
use futures::StreamExt;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Parser)]
#[command(name = "fsbridge")]
#[command(about = "fsbridge - non-blocking access to a storage provider via worker processes")]
#[command(version)]
struct Cli {
    /// Config file (defaults to FSBRIDGE_CONFIG, ./fsbridge.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Run workers on threads in this process instead of child processes
    #[arg(long, global = true)]
    thread: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a directory
    Ls {
        #[arg(default_value = "")]
        path: String,

        /// Sort entries by path
        #[arg(short, long)]
        sort: bool,
    },

    /// Print a file to stdout
    Cat { path: String },

    /// Store a file from stdin or a local file
    Put {
        path: String,

        /// Read contents from this local file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Show size and modification time
    Stat { path: String },

    /// Rename a file
    Mv { from: String, to: String },
}

fn load_settings(cli: &Cli) -> Result<Settings, FsError> {
    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::load()?,
    };
    if cli.thread {
        settings.worker.mode = WorkerMode::Thread;
    }
    Ok(settings)
}

fn main() -> ExitCode {
    set_up_logging();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error starting runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, FsError> {
    let mut settings = load_settings(&cli)?;
    if let Commands::Ls { sort: true, .. } = cli.command {
        settings.listing.order = ListOrder::Ascending;
    }

    let fs = FsAdapter::connect(&settings).await?;
    let code = match cli.command {
        Commands::Ls { path, .. } => cmd_ls(&fs, &path).await?,
        Commands::Cat { path } => cmd_cat(&fs, &path).await?,
        Commands::Put { path, file } => cmd_put(&fs, &path, file).await?,
        Commands::Stat { path } => cmd_stat(&fs, &path).await?,
        Commands::Mv { from, to } => cmd_mv(&fs, &from, &to).await?,
    };
    fs.shutdown();
    Ok(code)
}

async fn cmd_ls(fs: &FsAdapter, path: &str) -> Result<ExitCode, FsError> {
    let mut nodes = fs.ls(path);
    while let Some(node) = nodes.next().await {
        let node = node?;
        let marker = match node.kind {
            NodeKind::Directory => "d",
            NodeKind::File => "-",
            NodeKind::Other => "?",
        };
        println!("{} {}", marker, node.path);
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_cat(fs: &FsAdapter, path: &str) -> Result<ExitCode, FsError> {
    let opened = fs.open(path, "r").await?;
    let fd = opened.fd();
    let Some(stream) = opened.into_read() else {
        return Ok(ExitCode::FAILURE);
    };
    let contents = stream.contents().await?;
    fs.close(fd).await?;

    let mut stdout = tokio::io::stdout();
    stdout.write_all(&contents).await?;
    stdout.flush().await?;
    Ok(ExitCode::SUCCESS)
}

async fn cmd_put(fs: &FsAdapter, path: &str, file: Option<PathBuf>) -> Result<ExitCode, FsError> {
    let contents = match file {
        Some(local) => tokio::fs::read(&local).await?,
        None => {
            let mut buf = Vec::new();
            tokio::io::stdin().read_to_end(&mut buf).await?;
            buf
        }
    };

    let Some(mut stream) = fs.open(path, "w").await?.into_write() else {
        return Ok(ExitCode::FAILURE);
    };
    stream.write_all(&contents).await?;

    if stream.finish().await? {
        println!("wrote {} bytes to {}", contents.len(), path);
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("provider did not write {}", path);
        Ok(ExitCode::FAILURE)
    }
}

async fn cmd_stat(fs: &FsAdapter, path: &str) -> Result<ExitCode, FsError> {
    let stat = fs.stat(path).await?;
    println!("path:  {}", path);
    println!("size:  {}", stat.size);
    println!("mtime: {}", stat.mtime.to_rfc3339());
    Ok(ExitCode::SUCCESS)
}

async fn cmd_mv(fs: &FsAdapter, from: &str, to: &str) -> Result<ExitCode, FsError> {
    if fs.rename(from, to).await? {
        println!("{} -> {}", from, to);
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("provider declined to rename {} to {}", from, to);
        Ok(ExitCode::FAILURE)
    }
}
