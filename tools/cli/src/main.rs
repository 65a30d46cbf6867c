//! Strongbox CLI - Command line interface for the encryption service.
//!
//! Encrypts and decrypts files, seals files under timelocks, checks
//! geo-fencing rules, hashes files and manages distributed backups.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use strongbox_crypto::{os_random, HashAlgorithm};
use strongbox_geo::{GeoFencingRule, GeoLocation};
use strongbox_service::{
    BackupRequest, DecryptRequest, EncryptRequest, EncryptResponse, EncryptionService,
    GeoFenceRequest, HashRequest, RestoreRequest, ServiceConfig, TimelockDecryptRequest,
    TimelockEncryptRequest, TimelockEncryptResponse, TimelockStatusRequest, VerifyHashRequest,
};
use strongbox_storage::StoreSpec;
use strongbox_timelock::{TimelockKeyPair, TimelockMode};

#[derive(Parser)]
#[command(name = "strongbox")]
#[command(about = "Strongbox - Encryption, timelocks and distributed backup")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Service configuration file (JSON).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backup store: "memory", "local:<dir>" or "ipfs:<api url>".
    #[arg(long, global = true)]
    store: Option<StoreSpec>,

    /// JSON-RPC endpoint used for block-height timelocks.
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a file under a password.
    Encrypt {
        /// File to encrypt.
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the encrypted JSON.
        #[arg(short, long)]
        output: PathBuf,

        /// PBKDF2 iterations (default from config).
        #[arg(long)]
        iterations: Option<u32>,

        /// Split into independently encrypted shards of this many bytes.
        #[arg(long)]
        shard_size: Option<usize>,
    },

    /// Decrypt a file produced by `encrypt`.
    Decrypt {
        /// Encrypted JSON.
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the plaintext.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Hash a file.
    Hash {
        /// File to hash.
        file: PathBuf,

        /// MD5, SHA1, SHA256, SHA384 or SHA512.
        #[arg(short, long, default_value = "SHA256")]
        algorithm: HashAlgorithm,
    },

    /// Check a file against an expected digest.
    Verify {
        /// File to check.
        file: PathBuf,

        /// Expected hex digest.
        #[arg(short, long)]
        expected: String,

        /// MD5, SHA1, SHA256, SHA384 or SHA512.
        #[arg(short, long, default_value = "SHA256")]
        algorithm: HashAlgorithm,
    },

    /// Generate a timelock key pair.
    Keygen {
        /// Write the private key here instead of printing it.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Encrypt a file that opens only after a time and/or block height.
    TimelockEncrypt {
        /// File to encrypt.
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the timelocked JSON.
        #[arg(short, long)]
        output: PathBuf,

        /// Where to write the private key. Keep it safe; there is no other copy.
        #[arg(short, long)]
        key_out: PathBuf,

        /// Timestamp, BlockNumber or Hybrid.
        #[arg(short, long, default_value = "Timestamp")]
        mode: TimelockMode,

        /// Unlock time (RFC 3339).
        #[arg(long)]
        unlock_at: Option<DateTime<Utc>>,

        /// Unlock block number.
        #[arg(long)]
        block: Option<u64>,
    },

    /// Decrypt a timelocked file once its condition holds.
    TimelockDecrypt {
        /// Timelocked JSON.
        #[arg(short, long)]
        input: PathBuf,

        /// Private key written by `timelock-encrypt`.
        #[arg(short, long)]
        key: PathBuf,

        /// Where to write the plaintext.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Show whether a timelocked file can be opened yet.
    TimelockStatus {
        /// Timelocked JSON.
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Check a location against a geo-fencing rule.
    Geofence {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lng: f64,

        /// Source IP of the request.
        #[arg(long)]
        ip: Option<String>,

        /// Rule as JSON (camelCase fields).
        #[arg(short, long)]
        rule: Option<PathBuf>,

        /// Allowed countries, comma separated.
        #[arg(long, value_delimiter = ',')]
        allow_countries: Vec<String>,

        /// Allowed cities, comma separated.
        #[arg(long, value_delimiter = ',')]
        allow_cities: Vec<String>,
    },

    /// Shard, encrypt and distribute a file.
    Backup {
        /// File to back up.
        #[arg(short, long)]
        input: PathBuf,

        /// Name recorded in the manifest (default: the file name).
        #[arg(short, long)]
        name: Option<String>,

        /// Bytes per shard (default from config).
        #[arg(long)]
        shard_size: Option<usize>,

        /// Number of replica nodes to copy the manifest to.
        #[arg(long)]
        replication: Option<u32>,

        /// Expiry (RFC 3339).
        #[arg(long)]
        expires_at: Option<DateTime<Utc>>,
    },

    /// Restore a distributed backup.
    Restore {
        /// Manifest address.
        #[arg(long)]
        hash: String,

        /// Name recorded in the manifest.
        #[arg(short, long)]
        name: String,

        /// Where to write the restored file.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Show how many shards of a backup are still available.
    BackupStatus {
        /// Manifest address.
        #[arg(long)]
        hash: String,
    },

    /// Hash an account password with bcrypt.
    HashPassword,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Key generation needs no service
    if let Commands::Keygen { output } = &cli.command {
        return cmd_keygen(output.as_deref()).await;
    }

    let service = build_service(cli.config.as_deref(), cli.store, cli.rpc_url)?;

    match cli.command {
        Commands::Encrypt {
            input,
            output,
            iterations,
            shard_size,
        } => cmd_encrypt(&service, &input, &output, iterations, shard_size).await,

        Commands::Decrypt { input, output } => cmd_decrypt(&service, &input, &output).await,

        Commands::Hash { file, algorithm } => cmd_hash(&service, &file, algorithm).await,

        Commands::Verify {
            file,
            expected,
            algorithm,
        } => cmd_verify(&service, &file, &expected, algorithm).await,

        Commands::Keygen { .. } => Ok(()),

        Commands::TimelockEncrypt {
            input,
            output,
            key_out,
            mode,
            unlock_at,
            block,
        } => cmd_timelock_encrypt(&service, &input, &output, &key_out, mode, unlock_at, block).await,

        Commands::TimelockDecrypt { input, key, output } => {
            cmd_timelock_decrypt(&service, &input, &key, &output).await
        }

        Commands::TimelockStatus { input } => cmd_timelock_status(&service, &input).await,

        Commands::Geofence {
            lat,
            lng,
            ip,
            rule,
            allow_countries,
            allow_cities,
        } => {
            let mut location = GeoLocation::new(lat, lng);
            location.ip_address = ip;
            cmd_geofence(&service, location, rule.as_deref(), allow_countries, allow_cities).await
        }

        Commands::Backup {
            input,
            name,
            shard_size,
            replication,
            expires_at,
        } => cmd_backup(&service, &input, name, shard_size, replication, expires_at).await,

        Commands::Restore { hash, name, output } => {
            cmd_restore(&service, &hash, &name, &output).await
        }

        Commands::BackupStatus { hash } => cmd_backup_status(&service, &hash).await,

        Commands::HashPassword => cmd_hash_password(&service).await,
    }
}

/// Load configuration, apply flag overrides and start the service.
fn build_service(
    config_path: Option<&Path>,
    store: Option<StoreSpec>,
    rpc_url: Option<String>,
) -> Result<EncryptionService> {
    let mut config = match config_path {
        Some(path) => ServiceConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ServiceConfig::default(),
    };
    if let Some(store) = store {
        config.backup.store = store;
    }
    if rpc_url.is_some() {
        config.chain.rpc_url = rpc_url;
    }

    EncryptionService::from_config(config).context("Failed to start encryption service")
}

/// Prompt for password securely.
fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(password))
}

/// Prompt twice and require a non-empty match.
fn prompt_new_password(prompt: &str) -> Result<Zeroizing<String>> {
    let password = prompt_password(prompt)?;
    let confirm = prompt_password("Confirm password: ")?;

    if password != confirm {
        anyhow::bail!("Passwords do not match");
    }

    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }

    Ok(password)
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("Invalid JSON in {}", path.display()))
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Encrypt a file.
async fn cmd_encrypt(
    service: &EncryptionService,
    input: &Path,
    output: &Path,
    iterations: Option<u32>,
    shard_size: Option<usize>,
) -> Result<()> {
    info!("Encrypting {}", input.display());

    let data = tokio::fs::read(input)
        .await
        .context("Failed to read input file")?;
    let password = prompt_new_password("Enter password: ")?;

    let mut request = EncryptRequest::new(data, password.as_str());
    request.key_derivation_iterations = iterations;
    if shard_size.is_some() {
        request = request.with_sharding(shard_size);
    }

    let response = service
        .encrypt(request)
        .await
        .context("Failed to encrypt file")?;
    write_json(output, &response).await?;

    println!("File encrypted successfully!");
    println!("  Output: {}", output.display());
    println!("  SHA-256: {}", response.file_hash);
    println!(
        "  Size: {} -> {} bytes",
        response.original_size, response.encrypted_size
    );
    if !response.encrypted_shards.is_empty() {
        println!("  Shards: {}", response.encrypted_shards.len());
    }

    Ok(())
}

/// Decrypt a file.
async fn cmd_decrypt(service: &EncryptionService, input: &Path, output: &Path) -> Result<()> {
    let encrypted: EncryptResponse = read_json(input).await?;
    let password = prompt_password("Enter password: ")?;

    let response = service
        .decrypt(DecryptRequest::from_response(&encrypted, password.as_str()))
        .await
        .context("Failed to decrypt file")?;

    tokio::fs::write(output, &response.file_data)
        .await
        .context("Failed to write output file")?;

    println!(
        "File decrypted successfully: {} ({} bytes)",
        output.display(),
        response.size
    );

    Ok(())
}

/// Hash a file.
async fn cmd_hash(service: &EncryptionService, file: &Path, algorithm: HashAlgorithm) -> Result<()> {
    let response = service.hash(HashRequest::for_path(file, algorithm)).await;
    if !response.success {
        anyhow::bail!(
            "Failed to hash {}: {}",
            file.display(),
            response.error_message.unwrap_or_default()
        );
    }

    println!("{}  {}", response.hash, file.display());
    info!(
        algorithm = %response.algorithm,
        size = response.file_size,
        ms = response.hash_time_ms,
        "Hashed"
    );

    Ok(())
}

/// Verify a file's digest.
async fn cmd_verify(
    service: &EncryptionService,
    file: &Path,
    expected: &str,
    algorithm: HashAlgorithm,
) -> Result<()> {
    let matches = service
        .verify_hash(VerifyHashRequest {
            file_path: Some(file.to_path_buf()),
            file_data: None,
            expected_hash: expected.to_string(),
            hash_algorithm: algorithm,
        })
        .await
        .context("Failed to verify file")?;

    if matches {
        println!("OK: {}", file.display());
        Ok(())
    } else {
        anyhow::bail!("Hash mismatch: {}", file.display())
    }
}

/// Generate a timelock key pair.
async fn cmd_keygen(output: Option<&Path>) -> Result<()> {
    let keypair =
        TimelockKeyPair::generate(os_random().as_ref()).context("Failed to generate key pair")?;

    println!("Public key: {}", keypair.public.to_base64());
    match output {
        Some(path) => {
            let private = Zeroizing::new(keypair.private.to_base64());
            tokio::fs::write(path, private.as_bytes())
                .await
                .context("Failed to write private key")?;
            println!("Private key written to {}", path.display());
        }
        None => println!("Private key: {}", keypair.private.to_base64()),
    }

    Ok(())
}

/// Encrypt a file under a timelock.
async fn cmd_timelock_encrypt(
    service: &EncryptionService,
    input: &Path,
    output: &Path,
    key_out: &Path,
    mode: TimelockMode,
    unlock_at: Option<DateTime<Utc>>,
    block: Option<u64>,
) -> Result<()> {
    info!("Timelocking {}", input.display());

    let data = tokio::fs::read(input)
        .await
        .context("Failed to read input file")?;
    let password = prompt_new_password("Enter password: ")?;

    let mut response = service
        .timelock_encrypt(TimelockEncryptRequest {
            file_data: data,
            password: password.to_string(),
            unlock_at,
            block_number: block,
            timelock_type: mode,
            key_derivation_iterations: None,
        })
        .await
        .context("Failed to timelock file")?;

    let private_key = Zeroizing::new(std::mem::take(&mut response.timelock_private_key));
    tokio::fs::write(key_out, private_key.as_bytes())
        .await
        .context("Failed to write private key")?;
    write_json(output, &response).await?;

    println!("File timelocked successfully!");
    println!("  Output: {}", output.display());
    println!("  Private key: {}", key_out.display());
    println!("  Mode: {}", response.timelock_type);
    if let Some(at) = response.unlock_at {
        println!("  Unlocks at: {}", at.to_rfc3339());
    }
    if let Some(block) = response.block_number {
        println!("  Unlocks at block: {}", block);
    }

    Ok(())
}

/// Decrypt a timelocked file.
async fn cmd_timelock_decrypt(
    service: &EncryptionService,
    input: &Path,
    key: &Path,
    output: &Path,
) -> Result<()> {
    let sealed: TimelockEncryptResponse = read_json(input).await?;
    let private_key = Zeroizing::new(
        tokio::fs::read_to_string(key)
            .await
            .context("Failed to read private key")?,
    );
    let password = prompt_password("Enter password: ")?;

    let mut request = TimelockDecryptRequest::from_response(&sealed, password.as_str());
    request.timelock_private_key = private_key.trim().to_string();

    let plaintext = service
        .timelock_decrypt(request)
        .await
        .context("Failed to open timelocked file")?;

    tokio::fs::write(output, &plaintext)
        .await
        .context("Failed to write output file")?;

    println!(
        "File decrypted successfully: {} ({} bytes)",
        output.display(),
        plaintext.len()
    );

    Ok(())
}

/// Show a timelock's status.
async fn cmd_timelock_status(service: &EncryptionService, input: &Path) -> Result<()> {
    let sealed: TimelockEncryptResponse = read_json(input).await?;
    let status = service
        .timelock_status(TimelockStatusRequest {
            timelock_type: sealed.timelock_type,
            unlock_at: sealed.unlock_at,
            block_number: sealed.block_number,
        })
        .await
        .context("Invalid timelock condition")?;

    println!("Timelock Status:");
    println!("  State: {:?}", status.state);
    if let Some(seconds) = status.remaining_seconds {
        println!("  Seconds remaining: {}", seconds);
    }
    if let Some(height) = status.current_height {
        let suffix = if status.estimated { " (estimated)" } else { "" };
        println!("  Current block: {}{}", height, suffix);
    }
    if let Some(blocks) = status.blocks_remaining {
        println!("  Blocks remaining: {}", blocks);
    }
    if let Some(eta) = status.estimated_unlock_at {
        println!("  Estimated unlock: {}", eta.to_rfc3339());
    }

    Ok(())
}

/// Check a location against a rule.
async fn cmd_geofence(
    service: &EncryptionService,
    location: GeoLocation,
    rule_path: Option<&Path>,
    allow_countries: Vec<String>,
    allow_cities: Vec<String>,
) -> Result<()> {
    let mut rule = match rule_path {
        Some(path) => read_json::<GeoFencingRule>(path).await?,
        None => GeoFencingRule::enabled(),
    };
    if !allow_countries.is_empty() {
        rule = rule.with_countries(allow_countries);
    }
    if !allow_cities.is_empty() {
        rule = rule.with_cities(allow_cities);
    }

    let response = service
        .validate_geofence(GeoFenceRequest { location, rule })
        .await;

    if response.is_valid {
        println!("Allowed: {}", response.reason);
        Ok(())
    } else {
        anyhow::bail!("Denied: {}", response.reason)
    }
}

/// Back up a file.
async fn cmd_backup(
    service: &EncryptionService,
    input: &Path,
    name: Option<String>,
    shard_size: Option<usize>,
    replication: Option<u32>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<()> {
    let name = match name {
        Some(name) => name,
        None => input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .context("Input has no file name; pass --name")?,
    };
    info!("Backing up {} as {}", input.display(), name);

    let data = tokio::fs::read(input)
        .await
        .context("Failed to read input file")?;
    let key = prompt_new_password("Enter encryption key: ")?;

    let mut request = BackupRequest::new(data, &name, key.as_str());
    request.shard_size = shard_size;
    request.replication_factor = replication;
    request.expires_at = expires_at;

    let response = service.backup(request).await.context("Backup failed")?;

    println!("Backup created successfully!");
    println!("  Manifest: {}", response.dht_hash);
    println!("  Shards: {}", response.shard_count);
    println!("  Size: {} bytes", response.total_size);
    println!("  Nodes: {}", response.estimated_nodes);

    Ok(())
}

/// Restore a backup.
async fn cmd_restore(
    service: &EncryptionService,
    hash: &str,
    name: &str,
    output: &Path,
) -> Result<()> {
    let key = prompt_password("Enter encryption key: ")?;

    let data = service
        .restore(RestoreRequest {
            content_hash: hash.to_string(),
            file_name: name.to_string(),
            encryption_key: key.to_string(),
        })
        .await
        .context("Restore failed")?;

    tokio::fs::write(output, &data)
        .await
        .context("Failed to write output file")?;

    println!(
        "Backup restored successfully: {} ({} bytes)",
        output.display(),
        data.len()
    );

    Ok(())
}

/// Show backup health.
async fn cmd_backup_status(service: &EncryptionService, hash: &str) -> Result<()> {
    let status = service.backup_status(hash).await;
    if !status.exists {
        anyhow::bail!("No backup manifest at {}", hash);
    }

    println!("Backup Status:");
    println!(
        "  Shards: {}/{} available ({:.1}%)",
        status.available_shards, status.total_shards, status.health_percentage
    );
    println!("  Healthy: {}", status.healthy);
    println!("  Expired: {}", status.expired);

    Ok(())
}

/// Hash an account password.
async fn cmd_hash_password(service: &EncryptionService) -> Result<()> {
    let password = prompt_new_password("Enter password: ")?;
    let hash = service
        .hash_password(&password)
        .await
        .context("Failed to hash password")?;
    println!("{}", hash);
    Ok(())
}
