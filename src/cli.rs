use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::vault::kv::KvSecret;
use crate::vault::policy::marshal_rules;
use crate::vault::{StringSource, Vault};

#[derive(Parser, Debug)]
#[command(
    name = "vault-steward",
    about = "Manage HashiCorp Vault secrets, keys, policies and certificates",
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub connection: Connection,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct Connection {
    /// Vault server address.
    #[arg(long, global = true, default_value = crate::vault::DEFAULT_ADDRESS, env = "VAULT_ADDR")]
    pub vault_addr: String,

    /// Vault token.
    #[arg(long, global = true, env = "VAULT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate random data with Vault.
    Random {
        /// Number of random bytes.
        #[arg(long, default_value_t = 32)]
        length: usize,
        /// Print base64 characters instead of hex-encoded bytes.
        #[arg(long)]
        string: bool,
    },
    /// Work with secrets of a KV v2 engine.
    Kv {
        #[command(subcommand)]
        command: KvCommand,
    },
    /// Encrypt and decrypt with a transit key.
    Transit {
        #[command(subcommand)]
        command: TransitCommand,
    },
    /// Inspect ACL policies.
    Policy {
        #[command(subcommand)]
        command: PolicyCommand,
    },
    /// Inspect PKI engines.
    Pki {
        #[command(subcommand)]
        command: PkiCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum KvCommand {
    /// Print the latest version of a secret as JSON.
    Get {
        #[arg(long, default_value = "secret")]
        mount: String,
        path: String,
    },
    /// Write a secret unless it already holds the same fields.
    Put {
        #[arg(long, default_value = "secret")]
        mount: String,
        path: String,
        /// Fields as KEY=VALUE.
        #[arg(value_parser = parse_field, required = true)]
        fields: Vec<(String, String)>,
    },
    /// List every secret of the engine.
    List {
        #[arg(long, default_value = "secret")]
        mount: String,
    },
    /// Delete all versions of a secret.
    Delete {
        #[arg(long, default_value = "secret")]
        mount: String,
        path: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum TransitCommand {
    Encrypt {
        #[arg(long, default_value = "transit")]
        mount: String,
        #[arg(long)]
        key: String,
        plaintext: String,
    },
    Decrypt {
        #[arg(long, default_value = "transit")]
        mount: String,
        #[arg(long)]
        key: String,
        ciphertext: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum PolicyCommand {
    /// Print a policy as HCL.
    Read { name: String },
    Delete { name: String },
}

#[derive(Subcommand, Debug)]
pub enum PkiCommand {
    /// List serial numbers of the certificates issued by an engine.
    ListCerts {
        #[arg(long, default_value = "pki")]
        mount: String,
    },
}

fn parse_field(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, field)) if !key.is_empty() => Ok((key.to_string(), field.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {}", value)),
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{:02x}", byte)).collect()
}

async fn connect(connection: &Connection) -> Result<Vault> {
    let mut builder = Vault::builder().address_from(StringSource::value(connection.vault_addr.clone()));
    if let Some(token) = &connection.token {
        builder = builder.token_from(StringSource::value(token.clone()));
    }
    builder
        .complete()
        .await
        .with_context(|| format!("failed to connect to vault at {}", connection.vault_addr))
}

pub async fn run_cli() -> Result<()> {
    run(Cli::parse()).await
}

pub async fn run(cli: Cli) -> Result<()> {
    let vault = connect(&cli.connection).await?;

    match cli.command {
        Commands::Random { length, string } => {
            let random = vault.random();
            if string {
                println!("{}", random.generate_random_string(length).await?);
            } else {
                println!("{}", to_hex(&random.generate_random_bytes(length).await?));
            }
        }

        Commands::Kv { command } => {
            let kv = vault.kv();
            match command {
                KvCommand::Get { mount, path } => {
                    let secret = match kv.read_kv_secret(mount.as_str(), path.as_str()).await {
                        Ok(secret) => secret,
                        Err(err) if err.is_does_not_exist() => {
                            return Err(anyhow!("no secret at {}/{}", mount, path))
                        }
                        Err(err) => return Err(err.into()),
                    };
                    println!("{}", serde_json::to_string_pretty(&secret.fields)?);
                }
                KvCommand::Put { mount, path, fields } => {
                    let secret = fields
                        .into_iter()
                        .fold(KvSecret::new(path), |secret, (key, value)| secret.with_field(key, value));
                    kv.update_kv_secret(mount.as_str(), &secret).await?;
                    info!(mount = %mount, path = %secret.path, "secret is up to date");
                }
                KvCommand::List { mount } => {
                    for secret in kv.list_kv_secrets(mount.as_str()).await? {
                        println!("{}", secret);
                    }
                }
                KvCommand::Delete { mount, path } => {
                    kv.delete_kv_secret(mount.as_str(), path.as_str()).await?;
                }
            }
        }

        Commands::Transit { command } => {
            let transit = vault.transit();
            match command {
                TransitCommand::Encrypt { mount, key, plaintext } => {
                    let ciphertext = transit
                        .encrypt(mount.as_str(), key.as_str(), plaintext.as_bytes())
                        .await?;
                    println!("{}", ciphertext);
                }
                TransitCommand::Decrypt { mount, key, ciphertext } => {
                    let plaintext = transit.decrypt(mount.as_str(), key.as_str(), &ciphertext).await?;
                    println!("{}", String::from_utf8_lossy(&plaintext));
                }
            }
        }

        Commands::Policy { command } => {
            let policies = vault.policies();
            match command {
                PolicyCommand::Read { name } => {
                    let policy = match policies.read_policy(name.as_str()).await {
                        Ok(policy) => policy,
                        Err(err) if err.is_does_not_exist() => return Err(anyhow!("no policy named {}", name)),
                        Err(err) => return Err(err.into()),
                    };
                    println!("{}", marshal_rules(&policy.rules)?);
                }
                PolicyCommand::Delete { name } => {
                    policies.delete_policy(name.as_str()).await?;
                }
            }
        }

        Commands::Pki { command } => match command {
            PkiCommand::ListCerts { mount } => {
                for serial in vault.pki().list_certificates(mount.as_str()).await? {
                    println!("{}", serial);
                }
            }
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_kv_put_fields() {
        let cli = Cli::try_parse_from([
            "vault-steward",
            "--vault-addr",
            "http://vault:8200",
            "kv",
            "put",
            "app/db",
            "user=admin",
            "url=postgres://db?a=b",
        ])
        .unwrap();
        assert_eq!(cli.connection.vault_addr, "http://vault:8200");
        match cli.command {
            Commands::Kv {
                command: KvCommand::Put { mount, path, fields },
            } => {
                assert_eq!(mount, "secret");
                assert_eq!(path, "app/db");
                assert_eq!(fields[1], ("url".to_string(), "postgres://db?a=b".to_string()));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_bad_field() {
        assert!(Cli::try_parse_from(["vault-steward", "kv", "put", "app", "novalue"]).is_err());
        assert!(parse_field("=x").is_err());
    }

    #[test]
    fn test_parse_pki_list_certs() {
        let cli = Cli::try_parse_from(["vault-steward", "pki", "list-certs", "--mount", "pki_int"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Pki {
                command: PkiCommand::ListCerts { ref mount }
            } if mount == "pki_int"
        ));
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0, 15, 255]), "000fff");
    }
}
