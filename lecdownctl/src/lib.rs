use std::fmt;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::{Args, Parser, Subcommand, ValueEnum};
use lecdown_core::exec::{probe_tool, ToolError};
use lecdown_core::manifest::{Catalog, LastRendition, ManifestError, ManifestResult};
use lecdown_core::request::RequestError;
use lecdown_core::{
    load_config, load_request_list, BatchResult, Downloader, LecdownConfig, PipelineError,
    QualityChooser, SessionCredential, SessionError,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] lecdown_core::ConfigError),
    #[error("credential rejected: {0}")]
    Credential(#[from] SessionError),
    #[error("missing session token: pass --{flag} or set {env}")]
    MissingCredential {
        flag: &'static str,
        env: &'static str,
    },
    #[error("preflight failed: {0}")]
    Tool(#[from] ToolError),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot read video list: {0}")]
    Request(#[from] RequestError),
    #[error("pipeline setup failed: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{0}")]
    HealthCheck(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Lecture recording downloader", long_about = None)]
pub struct Cli {
    /// Path to lecdown.toml; built-in defaults apply when the file is absent
    #[arg(long, default_value = "lecdown.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download one or more lecture recordings
    Download(DownloadArgs),
    /// Runs environment checks
    #[command(subcommand)]
    Health(HealthCommands),
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Video URLs to download
    #[arg(
        short = 'v',
        long = "video-urls",
        num_args = 1..,
        required_unless_present = "video_urls_file",
        conflicts_with = "video_urls_file"
    )]
    pub video_urls: Vec<String>,
    /// File with one video URL per line
    #[arg(short = 'f', long = "video-urls-file")]
    pub video_urls_file: Option<PathBuf>,
    /// Directory receiving the merged recordings
    #[arg(short = 'o', long = "output-directory")]
    pub output_directory: Option<PathBuf>,
    /// Index of the quality tier to download; out of range picks the last one
    #[arg(short = 'q', long, allow_negative_numbers = true)]
    pub quality: Option<i64>,
    /// Value of the Authorization_Api browser cookie, sent as Authorization
    #[arg(long, env = AUTHORIZATION_ENV, hide_env_values = true)]
    pub authorization: Option<String>,
    /// Value of the Signature_Api browser cookie, sent as Signature
    #[arg(long, env = SIGNATURE_ENV, hide_env_values = true)]
    pub signature: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum HealthCommands {
    /// Checks configuration, output directory and external tools
    Check,
}

const AUTHORIZATION_ENV: &str = "LECDOWN_AUTHORIZATION";
const SIGNATURE_ENV: &str = "LECDOWN_SIGNATURE";

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_or_default(&cli.config)?;

    match &cli.command {
        Commands::Download(args) => {
            let result = download(config, args).await?;
            render(&result, cli.format)?;
        }
        Commands::Health(HealthCommands::Check) => {
            let report = health_check(&cli.config, &config).await;
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::HealthCheck(
                    "one or more checks failed".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn load_or_default(path: &Path) -> Result<LecdownConfig> {
    if path.exists() {
        Ok(load_config(path)?)
    } else {
        info!(path = %path.display(), "config file not found, using defaults");
        Ok(LecdownConfig::default())
    }
}

async fn download(mut config: LecdownConfig, args: &DownloadArgs) -> Result<BatchResult> {
    if let Some(dir) = &args.output_directory {
        config.paths.output_dir = dir.to_string_lossy().to_string();
    }
    let urls = match &args.video_urls_file {
        Some(path) => load_request_list(path)?,
        None => args.video_urls.clone(),
    };
    let credential = credential(args)?;
    preflight(&config).await?;

    let downloader = Downloader::new(&config)?
        .with_quality(args.quality)
        .with_quality_chooser(quality_chooser());
    info!(
        videos = urls.len(),
        output_dir = %downloader.output_dir().display(),
        "starting batch"
    );
    Ok(downloader.run(&urls, &credential).await)
}

fn credential(args: &DownloadArgs) -> Result<SessionCredential> {
    let authorization = args
        .authorization
        .as_deref()
        .ok_or(AppError::MissingCredential {
            flag: "authorization",
            env: AUTHORIZATION_ENV,
        })?;
    let signature = args.signature.as_deref().ok_or(AppError::MissingCredential {
        flag: "signature",
        env: SIGNATURE_ENV,
    })?;
    Ok(SessionCredential::new(authorization, signature)?)
}

/// Aborts the run before any request is touched when a tool is missing or
/// the output directory cannot be created.
async fn preflight(config: &LecdownConfig) -> Result<()> {
    let transfer = probe_tool(Path::new(&config.download.tool), "--version").await?;
    info!(tool = %config.download.tool, version = %transfer, "transfer tool found");
    let muxer = probe_tool(Path::new(&config.merge.tool), "-version").await?;
    info!(tool = %config.merge.tool, version = %muxer, "muxer found");
    let output_dir = config.output_dir();
    std::fs::create_dir_all(&output_dir).map_err(|source| AppError::Io {
        path: output_dir,
        source,
    })?;
    Ok(())
}

fn quality_chooser() -> Arc<dyn QualityChooser> {
    if io::stdin().is_terminal() {
        Arc::new(PromptChooser::new(
            io::BufReader::new(io::stdin()),
            io::stdout(),
        ))
    } else {
        info!("stdin is not a terminal; without --quality the last rendition is downloaded");
        Arc::new(LastRendition)
    }
}

/// Asks on the terminal which rendition to download, repeating the question
/// until a listed index is entered.
pub struct PromptChooser {
    input: Mutex<Box<dyn BufRead + Send>>,
    output: Mutex<Box<dyn Write + Send>>,
}

impl PromptChooser {
    pub fn new(input: impl BufRead + Send + 'static, output: impl Write + Send + 'static) -> Self {
        Self {
            input: Mutex::new(Box::new(input)),
            output: Mutex::new(Box::new(output)),
        }
    }
}

impl QualityChooser for PromptChooser {
    fn choose(&self, catalog: &Catalog) -> ManifestResult<usize> {
        let unavailable = ManifestError::SelectionUnavailable;
        let mut input = self
            .input
            .lock()
            .map_err(|_| unavailable("prompt input poisoned".to_string()))?;
        let mut output = self
            .output
            .lock()
            .map_err(|_| unavailable("prompt output poisoned".to_string()))?;
        let count = catalog.renditions.len();
        if count == 0 {
            return Err(ManifestError::NoRenditions);
        }
        loop {
            write!(output, "{}Choose the desired resolution: ", catalog.menu())
                .and_then(|_| output.flush())
                .map_err(|err| unavailable(err.to_string()))?;
            let mut line = String::new();
            let read = input
                .read_line(&mut line)
                .map_err(|err| unavailable(err.to_string()))?;
            if read == 0 {
                return Err(unavailable("input closed".to_string()));
            }
            match line.trim().parse::<usize>() {
                Ok(index) if index < count => return Ok(index),
                _ => {
                    warn!(input = line.trim(), "not a listed resolution, asking again");
                    writeln!(output, "Please enter a number between 0 and {}", count - 1)
                        .map_err(|err| unavailable(err.to_string()))?;
                }
            }
        }
    }
}

async fn health_check(config_path: &Path, config: &LecdownConfig) -> Vec<HealthEntry> {
    let mut entries = Vec::new();
    entries.push(if config_path.exists() {
        HealthEntry::ok("config", config_path.display().to_string())
    } else {
        HealthEntry::warn(
            "config",
            format!("{} not found, using defaults", config_path.display()),
        )
    });
    entries.push(check_tool(&config.download.tool, "--version").await);
    entries.push(check_tool(&config.merge.tool, "-version").await);
    entries.push(check_directory("output_dir", &config.output_dir()));
    entries.push(check_env(AUTHORIZATION_ENV));
    entries.push(check_env(SIGNATURE_ENV));
    entries
}

async fn check_tool(program: &str, version_flag: &str) -> HealthEntry {
    match probe_tool(Path::new(program), version_flag).await {
        Ok(version) => HealthEntry::ok(program, version),
        Err(err) => HealthEntry::error(program, err.to_string()),
    }
}

fn check_directory(name: &str, path: &Path) -> HealthEntry {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => HealthEntry::ok(name, path.display().to_string()),
        Ok(_) => HealthEntry::error(name, format!("{} is not a directory", path.display())),
        Err(_) => HealthEntry::warn(
            name,
            format!("{} missing, created on first download", path.display()),
        ),
    }
}

fn check_env(name: &str) -> HealthEntry {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => HealthEntry::ok(name, "set"),
        _ => HealthEntry::warn(name, "unset, pass the token on the command line"),
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

impl DisplayFallback for BatchResult {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        for entry in &self.completed {
            lines.push(format!("saved {}", entry.output.display()));
        }
        lines.push(self.summary());
        lines.join("\n")
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(DisplayFallback::display)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::with_status(name, CheckStatus::Ok, detail)
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::with_status(name, CheckStatus::Warn, detail)
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::with_status(name, CheckStatus::Error, detail)
    }

    fn with_status(name: impl Into<String>, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for HealthEntry {
    fn display(&self) -> String {
        format!("[{}] {}: {}", self.status, self.name, self.detail)
    }
}
