//! evlock: evidence integrity and encryption CLI
//!
//! Commands:
//!   upload <FILES>...        - hash, encrypt, anchor, and store (several files = one batch)
//!   download <FILE_ID>       - fetch and decrypt with the local key record
//!   verify <PATH>            - re-check a file against its stored record or a proof file
//!   hash <PATH>              - print a file's content hash
//!   keys list|show|delete    - manage local key records
//!   config show              - display current configuration

mod wiring;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;

use evlock_core::config::EvlockConfig;
use evlock_core::{CaseContext, FileId};
use evlock_hash::{ContentHasher, HashAlgorithm};
use evlock_pipeline::{
    DownloadSource, EvidenceFile, IntegrityProof, ProgressFn, Stage, UploadReceipt, Verdict,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "evlock",
    version,
    about = "Evidence integrity and encryption",
    long_about = "evlock: hash evidence before encryption, seal it with an AEAD cipher, \
                  anchor hashes or Merkle roots, and re-verify later"
)]
struct Cli {
    /// Path to evlock.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "EVLOCK_CONFIG",
        default_value = "~/.config/evlock/evlock.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload one file, or several as one Merkle batch
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        case: CaseArgs,

        /// Write each issued proof to <DIR>/<file_id>.proof.json
        #[arg(long)]
        save_proofs: Option<PathBuf>,
    },

    /// Download and decrypt a stored file
    Download {
        file_id: String,

        /// Output path (default: original file name in the current directory)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Verify a local file against its upload record or a saved proof
    Verify {
        path: PathBuf,

        #[arg(long, conflicts_with = "proof", required_unless_present = "proof")]
        file_id: Option<String>,

        /// Proof JSON written by `upload --save-proofs`
        #[arg(long)]
        proof: Option<PathBuf>,
    },

    /// Print the content hash of a file
    Hash {
        path: PathBuf,

        /// Override hashing.algorithm (sha256 or blake3)
        #[arg(long)]
        algorithm: Option<String>,
    },

    /// Local key record management
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug)]
struct CaseArgs {
    /// Case identifier
    #[arg(long)]
    case: String,

    /// Uploader identity (email)
    #[arg(long, env = "EVLOCK_IDENTITY")]
    identity: String,

    #[arg(long, default_value = "")]
    description: String,
}

#[derive(Subcommand, Debug)]
enum KeysAction {
    /// List file ids with a local key record
    List,
    /// Show the encryption metadata for a file (never the key)
    Show { file_id: String },
    /// Delete a key record; the file can no longer be decrypted with it
    Delete { file_id: String },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Show current configuration
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = wiring::expand_tilde(&cli.config);
    let (config, found) = load_config(&config_path).await?;

    init_logging(&config.logging.level, &config.logging.format);
    if !found {
        tracing::warn!(path = %config_path.display(), "config file not found, using defaults");
    }

    match cli.command {
        Commands::Upload {
            files,
            case,
            save_proofs,
        } => cmd_upload(&config, &files, case, save_proofs.as_deref()).await,
        Commands::Download { file_id, output } => {
            cmd_download(&config, &FileId::from(file_id), output.as_deref()).await
        }
        Commands::Verify {
            path,
            file_id,
            proof,
        } => cmd_verify(&config, &path, file_id.map(FileId::from), proof.as_deref()).await,
        Commands::Hash { path, algorithm } => cmd_hash(&config, &path, algorithm.as_deref()),
        Commands::Keys { action } => cmd_keys(&config, action),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path, found),
    }
}

// ── Config loading / logging ──────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<(EvlockConfig, bool)> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("parsing config: {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((EvlockConfig::default(), false))
    }
}

fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output; logs go to stderr
    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Progress helpers ──────────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("progress bar template")?
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

/// One tick per file reaching a terminal stage.
fn progress_callback(pb: &ProgressBar) -> ProgressFn {
    let pb = pb.clone();
    Box::new(move |event| {
        match event.stage {
            Stage::Complete => pb.inc(1),
            Stage::Failed => {
                pb.inc(1);
                if let Some(err) = &event.error {
                    pb.println(format!("  ! {}: {err}", event.file_name));
                }
            }
            _ => {}
        }
        pb.set_message(format!("{} {}", event.stage, event.file_name));
    })
}

// ── `evlock upload` ───────────────────────────────────────────────────────────

async fn cmd_upload(
    config: &EvlockConfig,
    files: &[PathBuf],
    case: CaseArgs,
    save_proofs: Option<&Path>,
) -> Result<()> {
    let pipeline = wiring::build(config)?;
    let ctx = CaseContext::new(case.case, case.identity).with_description(case.description);

    let pb = make_progress_bar(files.len() as u64, "upload")?;
    let progress = progress_callback(&pb);

    let receipts = if files.len() == 1 {
        let receipt = pipeline
            .upload(EvidenceFile::from_path(&files[0]), &ctx, Some(&progress))
            .await
            .with_context(|| format!("uploading {}", files[0].display()))?;
        pb.finish_and_clear();
        vec![receipt]
    } else {
        let evidence = files.iter().map(|p| EvidenceFile::from_path(p)).collect();
        let batch = pipeline
            .upload_batch(evidence, &ctx, Some(&progress))
            .await
            .context("uploading batch")?;
        pb.finish_and_clear();
        println!("batch    {}", batch.batch_id);
        println!("root     {}", batch.root);
        if let Some(tx) = &batch.tx_ref {
            println!("tx       {tx}");
        }
        batch.files
    };

    for receipt in &receipts {
        print_receipt(receipt);
        if let (Some(dir), Some(proof)) = (save_proofs, &receipt.proof) {
            let path = write_proof(dir, &receipt.file_id, proof)?;
            println!("  proof saved to {}", path.display());
        }
    }
    Ok(())
}

fn print_receipt(receipt: &UploadReceipt) {
    println!("{}  {}", receipt.file_id, receipt.file_name);
    println!("  hash   {}", receipt.content_hash);
    match (&receipt.proof, &receipt.proof_error) {
        (Some(proof), _) => {
            println!("  proof  {} (tx {})", proof.proof_id, proof.tx_ref);
            if let Some(batch) = &proof.batch {
                println!("  batch  {} leaf {} of {}", batch.batch_id, batch.index + 1, batch.size);
            }
        }
        (None, Some(err)) => println!("  proof  none: {err}"),
        (None, None) => println!("  proof  none"),
    }
}

fn write_proof(dir: &Path, file_id: &FileId, proof: &IntegrityProof) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(format!("{file_id}.proof.json"));
    let json = serde_json::to_string_pretty(proof).context("serializing proof")?;
    std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

// ── `evlock download` ─────────────────────────────────────────────────────────

async fn cmd_download(config: &EvlockConfig, file_id: &FileId, output: Option<&Path>) -> Result<()> {
    let pipeline = wiring::build(config)?;
    let evidence = pipeline
        .download(file_id)
        .await
        .with_context(|| format!("downloading {file_id}"))?;

    let dest = match output {
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(sanitize_file_name(&evidence.file_name)),
    };
    std::fs::write(&dest, &evidence.bytes)
        .with_context(|| format!("writing {}", dest.display()))?;

    match evidence.source {
        DownloadSource::Decrypted => {
            println!("{} -> {} ({})", file_id, dest.display(), fmt_bytes(evidence.bytes.len() as u64))
        }
        DownloadSource::LegacyPlaintext => println!(
            "{} -> {} ({}, no key record: written as stored)",
            file_id,
            dest.display(),
            fmt_bytes(evidence.bytes.len() as u64)
        ),
    }
    Ok(())
}

/// Keep only the final path component of a stored name.
fn sanitize_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "evidence.bin".to_string())
}

// ── `evlock verify` ───────────────────────────────────────────────────────────

async fn cmd_verify(
    config: &EvlockConfig,
    path: &Path,
    file_id: Option<FileId>,
    proof_path: Option<&Path>,
) -> Result<()> {
    let pipeline = wiring::build(config)?;

    let verdict = match (file_id, proof_path) {
        (Some(id), _) => pipeline
            .verify_stored_file(&id, path)
            .await
            .with_context(|| format!("verifying against record {id}"))?,
        (None, Some(proof_path)) => {
            let json = std::fs::read_to_string(proof_path)
                .with_context(|| format!("reading proof: {}", proof_path.display()))?;
            let proof: IntegrityProof = serde_json::from_str(&json)
                .with_context(|| format!("parsing proof: {}", proof_path.display()))?;
            pipeline
                .verify_file(path, &proof)
                .await
                .with_context(|| format!("verifying against proof {}", proof.proof_id))?
        }
        (None, None) => anyhow::bail!("pass --file-id or --proof"),
    };

    match verdict {
        Verdict::Verified => {
            println!("VERIFIED  {}", path.display());
            Ok(())
        }
        Verdict::Tampered(ev) => {
            println!("TAMPERED  {}", path.display());
            println!("  reason    {:?}", ev.reason);
            println!("  expected  {}", ev.expected);
            println!("  actual    {}", ev.actual);
            anyhow::bail!("integrity check failed for {}", path.display())
        }
    }
}

// ── `evlock hash` ─────────────────────────────────────────────────────────────

fn cmd_hash(config: &EvlockConfig, path: &Path, algorithm: Option<&str>) -> Result<()> {
    let algorithm: HashAlgorithm = algorithm
        .unwrap_or(&config.hashing.algorithm)
        .parse()
        .context("hash algorithm")?;
    let hash = ContentHasher::new(algorithm)
        .with_buffer_size(config.hashing.read_buffer_kib.max(1) * 1024)
        .hash_file(path)
        .with_context(|| format!("hashing {}", path.display()))?;
    println!("{hash}  {}", path.display());
    Ok(())
}

// ── `evlock keys` ─────────────────────────────────────────────────────────────

fn cmd_keys(config: &EvlockConfig, action: KeysAction) -> Result<()> {
    let keys = wiring::build_keys(config)?;
    match action {
        KeysAction::List => {
            let ids = keys.list().context("listing key records")?;
            if ids.is_empty() {
                println!("no key records");
            }
            for id in ids {
                println!("{id}");
            }
        }
        KeysAction::Show { file_id } => {
            let id = FileId::from(file_id);
            let record = keys
                .get(&id)?
                .with_context(|| format!("no key record for {id}"))?;
            let json = serde_json::to_string_pretty(&record.metadata)
                .context("serializing metadata")?;
            println!("{json}");
        }
        KeysAction::Delete { file_id } => {
            let id = FileId::from(file_id);
            keys.delete(&id)?;
            println!("deleted key record for {id}");
        }
    }
    Ok(())
}

// ── `evlock config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &EvlockConfig, config_path: &Path, found: bool) -> Result<()> {
    if found {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn verify_needs_file_id_or_proof() {
        assert!(Cli::try_parse_from(["evlock", "verify", "a.bin"]).is_err());
        assert!(Cli::try_parse_from(["evlock", "verify", "a.bin", "--file-id", "f"]).is_ok());
        assert!(Cli::try_parse_from(["evlock", "verify", "a.bin", "--proof", "p.json"]).is_ok());
        assert!(Cli::try_parse_from([
            "evlock", "verify", "a.bin", "--file-id", "f", "--proof", "p.json"
        ])
        .is_err());
    }

    #[test]
    fn upload_takes_many_files() {
        let cli = Cli::try_parse_from([
            "evlock", "upload", "a.jpg", "b.jpg", "--case", "CASE-1", "--identity", "a@x.gov",
        ])
        .unwrap();
        match cli.command {
            Commands::Upload { files, case, .. } => {
                assert_eq!(files.len(), 2);
                assert_eq!(case.case, "CASE-1");
                assert_eq!(case.description, "");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name(""), "evidence.bin");
    }

    #[test]
    fn fmt_bytes_units() {
        assert_eq!(fmt_bytes(512), "512 B");
        assert_eq!(fmt_bytes(2048), "2.0 KB");
        assert_eq!(fmt_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[tokio::test]
    async fn missing_config_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, found) = load_config(&tmp.path().join("absent.toml")).await.unwrap();
        assert!(!found);
        assert_eq!(config.hashing.algorithm, "sha256");
    }

    #[tokio::test]
    async fn config_file_is_parsed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("evlock.toml");
        std::fs::write(&path, "[hashing]\nalgorithm = \"blake3\"\n").unwrap();
        let (config, found) = load_config(&path).await.unwrap();
        assert!(found);
        assert_eq!(config.hashing.algorithm, "blake3");
        assert_eq!(config.crypto.cipher, "aes-256-gcm");
    }
}
