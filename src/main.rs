//! vault-piv-helper - CLI
//!
//! Initialize, unseal and log in to Vault with secrets sealed to a PIV token.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use secrecy::SecretBox;
use serde_json::Value;
use tracing::{info, warn};
use zeroize::Zeroizing;

use vault_piv_helper::config::{LogArgs, LoginArgs, TokenArgs, VaultArgs};
use vault_piv_helper::crypto::KeyAgreement;
use vault_piv_helper::envelope_crypto::{self, ENCRYPTION_SLOT};
use vault_piv_helper::piv::{Access, DeviceSelector, TokenBackend};
use vault_piv_helper::secure_fs::{read_file, write_atomic, PRIVATE_MODE};
use vault_piv_helper::vault_api::{root_token, unseal_key, TokenCreateRequest, VaultClient};
use vault_piv_helper::{Envelope, EnvelopeError};

#[derive(Parser)]
#[command(name = "vault-piv-helper")]
#[command(version = vault_piv_helper::VERSION)]
#[command(about = "Seal Vault unseal keys and root tokens to PIV hardware tokens")]
struct Cli {
    #[command(flatten)]
    vault: VaultArgs,

    #[command(flatten)]
    token: TokenArgs,

    #[command(flatten)]
    log: LogArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new vault, encrypt its unseal key and root token, and write them to FILE
    Init { file: PathBuf },

    /// Decrypt an unseal key and use it to unseal a vault instance
    Unseal { file: PathBuf },

    /// Decrypt a root token and use it to create a local session token
    Login {
        file: PathBuf,

        #[command(flatten)]
        token: LoginArgs,
    },

    /// Re-encrypt existing vault secrets to another PIV device
    Share { from: PathBuf, to: PathBuf },

    /// List PIV devices and their KEY_MANAGEMENT keys
    Ls,
}

#[cfg(feature = "yubikey")]
fn backend() -> anyhow::Result<Box<dyn TokenBackend>> {
    Ok(Box::new(vault_piv_helper::piv::yubikey::YubiKeyBackend::new()))
}

#[cfg(not(feature = "yubikey"))]
fn backend() -> anyhow::Result<Box<dyn TokenBackend>> {
    anyhow::bail!("built without PIV hardware support; rebuild with `--features yubikey`")
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let dispatch = vault_piv_helper::logging::dispatch(&cli.log);

    tracing::dispatcher::with_default(&dispatch, || match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    })
}

fn read_secrets(
    backend: &dyn TokenBackend,
    cli: &Cli,
    path: &Path,
) -> anyhow::Result<(Envelope, Value)> {
    info!(path = %path.display(), "Reading encrypted vault secrets");
    let bytes = read_file(path).with_context(|| format!("reading {}", path.display()))?;

    let criteria = cli.token.authenticated(cli.log.verbose)?;
    let opened = envelope_crypto::decrypt(backend, &criteria, &bytes)
        .with_context(|| format!("decrypting {}", path.display()))?;
    Ok(opened)
}

fn write_secrets(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    info!(path = %path.display(), "Writing encrypted vault secrets");
    write_atomic(path, bytes, PRIVATE_MODE).with_context(|| format!("writing {}", path.display()))
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let backend = backend()?;
    let backend = backend.as_ref();
    let verbose = cli.log.verbose;

    match &cli.command {
        Commands::Init { file } => {
            // Find the device before initializing so the secrets are never stranded
            let criteria = cli.token.selection(verbose);
            let device = DeviceSelector::new(backend).select(
                &criteria,
                Some(ENCRYPTION_SLOT),
                Access::ReadOnly,
            )?;
            let serial = device.serial();
            let key = device.public_key()?.clone();
            drop(device);

            let vault = VaultClient::new(cli.vault.client_config())?;
            info!(endpoint = vault.address(), "Initializing vault with 1-of-1 secret");
            let secrets = vault.init()?;

            info!(serial, key_id = %key.fingerprint(), "Encrypting with {}", key.scheme());
            let encrypted = envelope_crypto::seal_value(serial, &key, &secrets)?.encode()?;
            write_secrets(file, &encrypted)?;
        }

        Commands::Unseal { file } => {
            let (_, secrets) = read_secrets(backend, &cli, file)?;

            let vault = VaultClient::new(cli.vault.client_config())?;
            info!(endpoint = vault.address(), "Unsealing vault");
            let status = vault.unseal(unseal_key(&secrets)?)?;

            if status.sealed {
                warn!(
                    t = status.threshold,
                    n = status.shares,
                    progress = status.progress,
                    "Unable to unseal vault"
                );
                return Err(EnvelopeError::VaultSealed {
                    threshold: status.threshold,
                    shares: status.shares,
                    progress: status.progress,
                }
                .into());
            }

            info!(
                version = %status.version,
                cluster = status.cluster_name.as_deref().unwrap_or_default(),
                "Unseal successful"
            );
        }

        Commands::Login { file, token } => {
            let (_, secrets) = read_secrets(backend, &cli, file)?;
            let root = SecretBox::new(Box::new(root_token(&secrets)?.to_owned()));

            let vault = VaultClient::new(cli.vault.client_config())?.with_token(root);
            let request = TokenCreateRequest::new(token.token_policies.clone(), token.ttl());

            match &token.token_role {
                Some(role) => info!(role = %role, "Requesting token with role"),
                None => info!("Requesting orphan token"),
            }
            let secret = vault.create_token(&request, token.token_role.as_deref())?;

            info!(
                lease_id = %secret.lease_id,
                lease_duration = secret.auth.lease_duration,
                path = %token.token_path.display(),
                "Writing token to file"
            );
            let client_token = Zeroizing::new(secret.auth.client_token);
            write_atomic(&token.token_path, client_token.as_bytes(), PRIVATE_MODE)
                .with_context(|| format!("writing {}", token.token_path.display()))?;
        }

        Commands::Share { from, to } => {
            let (source, secrets) = read_secrets(backend, &cli, from)?;

            // Never re-encrypt to the source device unless --serial names it
            let criteria = cli.token.selection(verbose).excluding(source.device);
            let encrypted = envelope_crypto::encrypt(backend, &criteria, &secrets)?;
            write_secrets(to, &encrypted)?;
        }

        Commands::Ls => {
            let criteria = cli.token.selection(verbose);
            let inventory =
                DeviceSelector::new(backend).inventory(&criteria, Some(ENCRYPTION_SLOT))?;

            for failure in &inventory.errors {
                eprintln!("{}: {}", failure.reader, failure.error);
            }
            if inventory.selected().is_none() {
                eprintln!("!! No devices match the given --serial/--avoid-serial flags");
            }
            for (index, device) in inventory.devices.iter().enumerate() {
                println!("{}: {}", index, device);
            }
        }
    }

    Ok(())
}
