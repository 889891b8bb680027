//! CLI command definitions and argument parsing

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use cipherchat_core::{
    CoreError, Envelope, FileBackend, Handle, KeyIntroduction, KeyStore, PublicKey,
    ReplacePolicy, SecureChannel, MAX_KEY_BYTES,
};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use crate::config::{CliOverrides, Config};
use crate::output::{OutputFormat, OutputFormatter};
use crate::ExitCode;

/// Marker for "read from stdin" / "write to stdout".
const STDIO: &str = "-";

type Store = KeyStore<FileBackend>;

/// CipherChat - signed, encrypted messages between identities
#[derive(Parser, Debug)]
#[command(name = "cipherchat")]
#[command(version, about = "CipherChat - signed, encrypted messages between identities")]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format: table, json, quiet
    #[arg(long, default_value = "table", global = true)]
    pub output: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Key store directory
    #[arg(long, global = true)]
    pub keys_dir: Option<PathBuf>,

    /// Oldest accepted envelope or introduction, in seconds
    #[arg(long, global = true)]
    pub freshness_secs: Option<u64>,

    /// Reject a second delivery of the same envelope within one run
    #[arg(long, global = true)]
    pub reject_duplicates: bool,
}

impl Cli {
    /// Overrides carried by the global flags.
    pub fn overrides(&self) -> CliOverrides {
        let log_level = if self.debug {
            Some("debug".to_string())
        } else if self.verbose {
            Some("info".to_string())
        } else {
            None
        };
        CliOverrides {
            keys_dir: self.keys_dir.clone(),
            freshness_secs: self.freshness_secs,
            reject_duplicates: self.reject_duplicates.then_some(true),
            log_level,
        }
    }

    /// Execute the CLI command with a resolved configuration
    pub fn execute_with_config(self, config: Config) -> anyhow::Result<ExitCode> {
        let output = OutputFormatter::new(self.output, self.verbose);

        match self.command {
            Commands::Keygen(args) => args.execute(&open_store(&config)?, &output),
            Commands::Export(args) => args.execute(&open_store(&config)?, &output),
            Commands::Import(args) => args.execute(&open_store(&config)?, &output),
            Commands::List => list(&open_store(&config)?, &output),
            Commands::Delete(args) => args.execute(&open_store(&config)?, &output),
            Commands::Seal(args) => args.execute(&open_channel(&config)?, &output),
            Commands::Open(args) => args.execute(&open_channel(&config)?, &output),
            Commands::Introduce(args) => args.execute(&open_channel(&config)?, &output),
            Commands::Accept(args) => args.execute(&open_channel(&config)?, &output),
            Commands::Config(command) => command.execute(self.config.as_deref(), &config, &output),
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a key pair for a new identity
    Keygen(KeygenArgs),
    /// Print an identity's public key (SPKI PEM)
    Export(ExportArgs),
    /// Import another user's public key
    Import(ImportArgs),
    /// List identities and imported keys
    List,
    /// Destroy an identity or forget an imported key
    Delete(DeleteArgs),
    /// Encrypt and sign a message into an envelope
    Seal(SealArgs),
    /// Verify and decrypt an envelope
    Open(OpenArgs),
    /// Create a signed introduction of your public key
    Introduce(IntroduceArgs),
    /// Verify an introduction and import the key it carries
    Accept(AcceptArgs),
    /// Write or print the configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

fn open_store(config: &Config) -> anyhow::Result<Store> {
    let dir = config.keys_dir()?;
    let backend = FileBackend::open(&dir)
        .with_context(|| format!("opening key store at {}", dir.display()))?;
    Ok(KeyStore::new(backend))
}

fn open_channel(config: &Config) -> anyhow::Result<SecureChannel<Store>> {
    Ok(SecureChannel::new(open_store(config)?, config.channel.clone())?)
}

fn read_input(path: &Path) -> anyhow::Result<Vec<u8>> {
    if path.as_os_str() == STDIO {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("reading stdin")?;
        return Ok(buf);
    }
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

/// Read at most `limit + 1` bytes, enough for the consumer to see that the
/// input is over `limit` without buffering all of it.
fn read_input_capped(path: &Path, limit: usize) -> anyhow::Result<Vec<u8>> {
    let cap = u64::try_from(limit).map_or(u64::MAX, |limit| limit.saturating_add(1));
    let mut buf = Vec::new();
    if path.as_os_str() == STDIO {
        std::io::stdin()
            .take(cap)
            .read_to_end(&mut buf)
            .context("reading stdin")?;
    } else {
        std::fs::File::open(path)
            .and_then(|file| file.take(cap).read_to_end(&mut buf))
            .with_context(|| format!("reading {}", path.display()))?;
    }
    Ok(buf)
}

fn write_payload(out: Option<&Path>, bytes: &[u8]) -> anyhow::Result<()> {
    match out {
        Some(path) if path.as_os_str() != STDIO => {
            std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
        }
        _ => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(bytes)?;
            stdout.flush()?;
            Ok(())
        }
    }
}

/// Write a payload, then report on it when stdout is free for the report.
fn deliver<T: Serialize>(
    output: &OutputFormatter,
    out: Option<&Path>,
    payload: &[u8],
    summary: &T,
    command: &str,
) -> anyhow::Result<()> {
    write_payload(out, payload)?;
    let to_file = out.is_some_and(|p| p.as_os_str() != STDIO);
    if to_file && output.format() == OutputFormat::Json {
        emit(output.format_success(summary, command));
    }
    Ok(())
}

fn emit(text: String) {
    if !text.is_empty() {
        println!("{text}");
    }
}

fn parse_handle(raw: &str) -> anyhow::Result<Handle> {
    Ok(Handle::new(raw)?)
}

/// Arguments for the keygen command
#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Identity handle (3-32 characters: letters, digits, '_' or '-')
    pub handle: String,

    /// Replace an existing key pair. Envelopes sealed to the old key become unreadable.
    #[arg(long)]
    pub force: bool,
}

impl KeygenArgs {
    pub fn execute(self, store: &Store, output: &OutputFormatter) -> anyhow::Result<ExitCode> {
        let handle = parse_handle(&self.handle)?;
        let policy = if self.force {
            ReplacePolicy::Replace
        } else {
            ReplacePolicy::Refuse
        };

        output.progress("Generating RSA-2048 key pair");
        let meta = store.generate(&handle, policy)?;
        emit(output.format_identity(&meta, "keygen"));
        output.success(&format!("Identity '{handle}' ready"));
        Ok(ExitCode::Success)
    }
}

/// Arguments for the export command
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Identity handle
    pub handle: String,

    /// Output file (stdout if omitted)
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Serialize)]
struct ExportSummary {
    handle: String,
    fingerprint: String,
}

impl ExportArgs {
    pub fn execute(self, store: &Store, output: &OutputFormatter) -> anyhow::Result<ExitCode> {
        let handle = parse_handle(&self.handle)?;
        let pem = store.export_public(&handle)?;
        let summary = ExportSummary {
            handle: handle.to_string(),
            fingerprint: PublicKey::from_pem(&pem).map_err(CoreError::from)?.fingerprint_hex(),
        };
        deliver(output, self.out.as_deref(), pem.as_bytes(), &summary, "export")?;
        Ok(ExitCode::Success)
    }
}

/// Arguments for the import command
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Handle the key belongs to
    pub handle: String,

    /// PEM or DER public key file ('-' for stdin)
    #[arg(default_value = STDIO)]
    pub file: PathBuf,
}

impl ImportArgs {
    pub fn execute(self, store: &Store, output: &OutputFormatter) -> anyhow::Result<ExitCode> {
        let handle = parse_handle(&self.handle)?;
        let bytes = read_input_capped(&self.file, MAX_KEY_BYTES)?;
        let record = store.import_public(&handle, &bytes)?;
        emit(output.format_imported(&record, "import"));
        output.warning(&format!(
            "Compare fingerprint {} with {handle} over another channel before trusting this key",
            record.fingerprint()
        ));
        Ok(ExitCode::Success)
    }
}

fn list(store: &Store, output: &OutputFormatter) -> anyhow::Result<ExitCode> {
    let identities = store
        .list_identities()?
        .iter()
        .map(|handle| store.metadata(handle))
        .collect::<Result<Vec<_>, CoreError>>()?;
    let imported = store.list_imported()?;
    emit(output.format_list(&identities, &imported));
    Ok(ExitCode::Success)
}

/// Arguments for the delete command
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Handle to delete
    pub handle: String,

    /// Forget the imported public key instead of an own identity
    #[arg(long)]
    pub imported: bool,

    /// Confirm destruction of key material
    #[arg(long)]
    pub yes: bool,
}

impl DeleteArgs {
    pub fn execute(self, store: &Store, output: &OutputFormatter) -> anyhow::Result<ExitCode> {
        let handle = parse_handle(&self.handle)?;
        if !self.yes && !self.imported {
            emit(output.format_error_with_code(
                &format!("Deleting '{handle}' destroys its private key; pass --yes to confirm"),
                ExitCode::InvalidInput,
            ));
            return Ok(ExitCode::InvalidInput);
        }

        let removed = if self.imported {
            store.remove_imported(&handle)?
        } else {
            store.delete(&handle)?
        };
        if !removed {
            emit(output.format_error_with_code(
                &format!("No key stored for '{handle}'"),
                ExitCode::KeyNotFound,
            ));
            return Ok(ExitCode::KeyNotFound);
        }

        emit(output.format_success(
            &serde_json::json!({ "handle": handle.as_str(), "imported": self.imported }),
            "delete",
        ));
        output.success(&format!("Deleted '{handle}'"));
        Ok(ExitCode::Success)
    }
}

/// Arguments for the seal command
#[derive(Args, Debug)]
pub struct SealArgs {
    /// Sending identity
    #[arg(long)]
    pub from: String,

    /// Recipient handle
    #[arg(long)]
    pub to: String,

    /// Message text
    #[arg(short, long, conflicts_with = "input")]
    pub message: Option<String>,

    /// Read the message from a file ('-' for stdin, the default)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Envelope output file (stdout if omitted)
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Serialize)]
struct SealSummary<'a> {
    sender: &'a str,
    recipient: &'a str,
    timestamp: u64,
}

impl SealArgs {
    pub fn execute(
        self,
        channel: &SecureChannel<Store>,
        output: &OutputFormatter,
    ) -> anyhow::Result<ExitCode> {
        let plaintext = match (&self.message, &self.input) {
            (Some(text), _) => text.clone().into_bytes(),
            (None, Some(path)) => read_input(path)?,
            (None, None) => read_input(Path::new(STDIO))?,
        };

        let envelope = channel.send(&self.from, &self.to, &plaintext)?;
        let mut json = envelope.to_json().map_err(CoreError::from)?;
        json.push('\n');

        let summary = SealSummary {
            sender: &envelope.sender,
            recipient: &envelope.recipient,
            timestamp: envelope.timestamp,
        };
        deliver(output, self.out.as_deref(), json.as_bytes(), &summary, "seal")?;
        output.success(&format!("Sealed {} bytes for '{}'", plaintext.len(), self.to));
        Ok(ExitCode::Success)
    }
}

/// Arguments for the open command
#[derive(Args, Debug)]
pub struct OpenArgs {
    /// Receiving identity
    #[arg(long = "as", value_name = "HANDLE")]
    pub local: String,

    /// Envelope file ('-' for stdin)
    #[arg(default_value = STDIO)]
    pub envelope: PathBuf,

    /// Plaintext output file (stdout if omitted)
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Serialize)]
struct OpenSummary {
    sender: String,
    timestamp: u64,
    bytes: usize,
}

impl OpenArgs {
    pub fn execute(
        self,
        channel: &SecureChannel<Store>,
        output: &OutputFormatter,
    ) -> anyhow::Result<ExitCode> {
        let raw = read_input(&self.envelope)?;
        let envelope = Envelope::from_json_slice(&raw).map_err(CoreError::from)?;
        let message = channel.receive(&envelope, &self.local)?;

        let summary = OpenSummary {
            sender: message.sender.to_string(),
            timestamp: message.timestamp,
            bytes: message.plaintext.len(),
        };
        deliver(output, self.out.as_deref(), &message.plaintext, &summary, "open")?;
        let sent_at = message
            .sent_at()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| message.timestamp.to_string());
        output.success(&format!("Verified message from '{}' sent {sent_at}", message.sender));
        Ok(ExitCode::Success)
    }
}

/// Arguments for the introduce command
#[derive(Args, Debug)]
pub struct IntroduceArgs {
    /// Identity whose key is introduced
    #[arg(long)]
    pub from: String,

    /// Intended recipient
    #[arg(long)]
    pub to: String,

    /// Introduction output file (stdout if omitted)
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Serialize)]
struct IntroduceSummary<'a> {
    sender: &'a str,
    recipient: &'a str,
    fingerprint: String,
}

impl IntroduceArgs {
    pub fn execute(
        self,
        channel: &SecureChannel<Store>,
        output: &OutputFormatter,
    ) -> anyhow::Result<ExitCode> {
        let intro = channel.introduce(&self.from, &self.to)?;
        let fingerprint = intro.parse_key()?.fingerprint_hex();
        let mut json = intro.to_json()?;
        json.push('\n');

        let summary = IntroduceSummary {
            sender: &intro.sender,
            recipient: &intro.recipient,
            fingerprint: fingerprint.clone(),
        };
        deliver(output, self.out.as_deref(), json.as_bytes(), &summary, "introduce")?;
        output.success(&format!(
            "Introduction created; tell '{}' your fingerprint {fingerprint} out of band",
            self.to
        ));
        Ok(ExitCode::Success)
    }
}

/// Arguments for the accept command
#[derive(Args, Debug)]
pub struct AcceptArgs {
    /// Receiving identity
    #[arg(long = "as", value_name = "HANDLE")]
    pub local: String,

    /// Introduction file ('-' for stdin)
    #[arg(default_value = STDIO)]
    pub file: PathBuf,

    /// Fingerprint the sender gave you out of band (hex, ':' allowed)
    #[arg(long)]
    pub fingerprint: Option<String>,
}

impl AcceptArgs {
    pub fn execute(
        self,
        channel: &SecureChannel<Store>,
        output: &OutputFormatter,
    ) -> anyhow::Result<ExitCode> {
        let raw = read_input(&self.file)?;
        let text =
            String::from_utf8(raw).map_err(|e| CoreError::MalformedEnvelope(e.to_string()))?;
        let intro = KeyIntroduction::from_json(&text)?;
        let record =
            channel.accept_introduction(&intro, &self.local, self.fingerprint.as_deref())?;

        emit(output.format_imported(&record, "accept"));
        if self.fingerprint.is_none() {
            output.warning(&format!(
                "Key for '{}' is unverified; rerun with --fingerprint after confirming {}",
                record.handle,
                record.fingerprint()
            ));
        }
        Ok(ExitCode::Success)
    }
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write a config file (the --config path, or the default location)
    Init(ConfigInitArgs),
    /// Print the effective configuration
    Show,
}

/// Arguments for the config init command
#[derive(Args, Debug)]
pub struct ConfigInitArgs {
    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,

    /// Write the effective settings (file, environment and flags applied)
    /// instead of the commented sample
    #[arg(long)]
    pub resolved: bool,
}

impl ConfigCommand {
    pub fn execute(
        self,
        config_path: Option<&Path>,
        config: &Config,
        output: &OutputFormatter,
    ) -> anyhow::Result<ExitCode> {
        match self {
            ConfigCommand::Init(args) => args.execute(config_path, config, output),
            ConfigCommand::Show => {
                if output.format() == OutputFormat::Json {
                    emit(output.format_success(config, "config show"));
                } else {
                    let text = toml::to_string_pretty(config).context("encoding configuration")?;
                    write_payload(None, text.as_bytes())?;
                }
                Ok(ExitCode::Success)
            }
        }
    }
}

impl ConfigInitArgs {
    pub fn execute(
        self,
        config_path: Option<&Path>,
        config: &Config,
        output: &OutputFormatter,
    ) -> anyhow::Result<ExitCode> {
        let path = config_path
            .map(Path::to_path_buf)
            .or_else(Config::default_path)
            .context("no default config location on this platform; pass --config")?;
        if path.exists() && !self.force {
            emit(output.format_error_with_code(
                &format!("{} already exists; pass --force to overwrite", path.display()),
                ExitCode::InvalidInput,
            ));
            return Ok(ExitCode::InvalidInput);
        }

        if self.resolved {
            config.save(&path)?;
        } else {
            Config::write_sample(&path)?;
        }
        output.success(&format!("Wrote {}", path.display()));
        Ok(ExitCode::Success)
    }
}
