//! BioKey Vault - CLI
//!
//! Command-line interface for register and access.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;

use biokey_vault::{BioVaultApi, BioVaultConfig, FingerprintDeriver, FingerprintHash, VaultError};

#[derive(Parser)]
#[command(name = "biokey")]
#[command(author = "Karen Tonoyan")]
#[command(version = biokey_vault::VERSION)]
#[command(about = "BioKey Vault - files unlocked by a fingerprint of two biometric images")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, env = "BIOKEY_CONFIG")]
    config: Option<PathBuf>,

    /// Master password for the key store
    #[arg(long, env = "BIOKEY_MASTER_PASSWORD", hide_env_values = true)]
    master_password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create directories and an empty key store
    Init,

    /// Encrypt a file and bind it to two biometric images
    Register {
        /// File to protect
        file: PathBuf,
        /// Iris image
        #[arg(long)]
        iris: PathBuf,
        /// Fingerprint image
        #[arg(long)]
        fingerprint: PathBuf,
    },

    /// Decrypt a .enc file with the same two images
    ///
    /// Attempt counters and lockouts live in memory, so every run of this
    /// command starts with a clear guard. Lockout is only enforced across
    /// attempts made through one long-lived `BioVaultApi`.
    Access {
        /// Encrypted file (a name in the secure directory, or a path)
        file: PathBuf,
        /// Iris image
        #[arg(long)]
        iris: PathBuf,
        /// Fingerprint image
        #[arg(long)]
        fingerprint: PathBuf,
    },

    /// Remove a registration by fingerprint hash
    Revoke {
        /// 64 hex chars, as printed by `fingerprint`
        hash: String,
    },

    /// Show vault statistics
    Stats,

    /// Show health report
    Health,

    /// Print the fingerprint hash of two images
    Fingerprint {
        /// Iris image
        #[arg(long)]
        iris: PathBuf,
        /// Fingerprint image
        #[arg(long)]
        fingerprint: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}

fn exit_code(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<VaultError>() {
        Some(v) if v.retry_after().is_some() => 3,
        Some(v) if v.is_access_denial() => 2,
        _ => 1,
    }
}

fn load_config(path: Option<&Path>) -> Result<BioVaultConfig> {
    match path {
        Some(path) => Ok(BioVaultConfig::load(path)?),
        None => Ok(BioVaultConfig::default()),
    }
}

fn open_api(config: BioVaultConfig, password: Option<String>) -> Result<BioVaultApi> {
    let Some(password) = password.filter(|p| !p.is_empty()) else {
        bail!("no master password: pass --master-password or set BIOKEY_MASTER_PASSWORD");
    };
    let password = SecretString::new(password);

    BioVaultApi::open(config, &password).context("failed to open key vault")
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))
}

fn file_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("not a file name: {}", path.display()))
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => {
            println!("🔐 Initializing BioKey Vault...");
            let api = open_api(config, cli.master_password)?;
            let stats = api.stats()?;
            println!("✅ Vault ready");
            println!("   Secure directory: {}", api.secure_dir().display());
            println!("   Key store:        {}", api.vault().path().display());
            println!("   Registrations:    {}", stats.total_registrations);
        }

        Commands::Register { file, iris, fingerprint } => {
            println!("📥 Registering file: {}", file.display());
            let api = open_api(config, cli.master_password)?;

            let reg = api.register(file_name(&file)?, &read(&file)?, &read(&iris)?, &read(&fingerprint)?)?;

            println!("✅ File secured: {}", reg.encrypted_file);
            println!("   Path:        {}", reg.encrypted_path.display());
            println!("   Fingerprint: {}…", reg.fingerprint_prefix);
            if let Some(preview) = &reg.preview {
                println!("   Preview:     {}", preview.display());
            }
            if let Some(advisory) = &reg.advisory {
                println!("   Advisory:    {} ({:.2})", advisory.label, advisory.confidence);
            }
        }

        Commands::Access { file, iris, fingerprint } => {
            println!("🔓 Accessing file: {}", file.display());
            let api = open_api(config, cli.master_password)?;
            let (sample_a, sample_b) = (read(&iris)?, read(&fingerprint)?);

            let grant = if file.components().count() == 1 && api.secure_dir().join(&file).is_file() {
                api.access(file_name(&file)?, &sample_a, &sample_b)?
            } else {
                api.access_bytes(file_name(&file)?, &read(&file)?, &sample_a, &sample_b)?
            };

            println!("✅ Access granted: {}", grant.decrypted_file);
            println!("   Path: {}", grant.decrypted_path.display());
            if let Some(content) = &grant.content_preview {
                println!("{:-<60}", "");
                println!("{}", content);
                println!("{:-<60}", "");
            }
        }

        Commands::Revoke { hash } => {
            let hash: FingerprintHash = hash.trim().parse()?;
            let api = open_api(config, cli.master_password)?;

            if api.revoke(&hash)? {
                println!("🗑️ Registration {} revoked", hash.short());
            } else {
                println!("📭 No registration for {}", hash.short());
            }
        }

        Commands::Stats => {
            let api = open_api(config, cli.master_password)?;
            let stats = api.stats()?;

            println!("📊 BioKey Vault Statistics");
            println!("{:-<40}", "");
            println!("Registrations:    {}", stats.total_registrations);
            println!("Encrypted files:  {}", stats.encrypted_files);
            println!("Advisory model:   {}", if stats.scorer_loaded { "loaded" } else { "none" });
        }

        Commands::Health => {
            let api = open_api(config, cli.master_password)?;
            let report = api.health();
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Fingerprint { iris, fingerprint } => {
            let deriver = FingerprintDeriver::new(config.fingerprint)?;
            let derivation = deriver.derive(&read(&iris)?, &read(&fingerprint)?)?;
            println!("{}", derivation.hash);
        }
    }

    Ok(())
}
