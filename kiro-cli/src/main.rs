//! Kiro CLI
//!
//! Command-line interface for provisioning plugin API keys and calling the
//! Kiro plugin API on behalf of a user.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use kiro_client::UpstreamClient;
use kiro_hex::KiroService;
use kiro_repo::{AesGcmCipher, Repo, build_repo};
use kiro_types::{ConsumptionQuery, JsonObject, StatsQuery, UserId};

#[derive(Parser)]
#[command(name = "kiro")]
#[command(author, version, about = "Kiro plugin proxy CLI", long_about = None)]
struct Cli {
    /// Credential store URL (memory:, sqlite://..., postgres://...)
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Base URL of the plugin API gateway
    #[arg(long, env = "PLUGIN_API_BASE_URL", global = true)]
    plugin_api_url: Option<String>,

    /// 64 hex chars, or a passphrase
    #[arg(long, env = "CREDENTIAL_ENCRYPTION_KEY", hide_env_values = true, global = true)]
    encryption_key: Option<String>,

    /// Upstream timeout in seconds
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = 300, global = true)]
    timeout_secs: u64,

    /// User to act on behalf of
    #[arg(long, env = "KIRO_USER_ID", global = true)]
    user: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encryption key helpers
    Key {
        #[command(subcommand)]
        action: KeyCommands,
    },
    /// Plugin API key provisioning
    Credential {
        #[command(subcommand)]
        action: CredentialCommands,
    },
    /// Kiro OAuth flow
    Oauth {
        #[command(subcommand)]
        action: OauthCommands,
    },
    /// Kiro account operations
    Account {
        #[command(subcommand)]
        action: AccountCommands,
    },
    /// Consumption statistics across all accounts
    Stats {
        #[arg(long)]
        start_date: Option<String>,
        #[arg(long)]
        end_date: Option<String>,
    },
    /// List models
    Models {
        /// Print the local catalogue instead of asking upstream
        #[arg(long)]
        supported: bool,
    },
    /// Send a chat completion request
    Chat {
        /// Request body as a JSON object
        request: String,
        /// Stream the response to stdout as it arrives
        #[arg(long)]
        stream: bool,
    },
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Print a fresh 256-bit key as hex
    Generate,
}

#[derive(Subcommand)]
enum CredentialCommands {
    /// Print the encrypted form of a plugin API key
    Encrypt { token: String },
    /// Encrypt and store a plugin API key for --user
    Set { token: String },
    /// Deactivate the plugin API key of --user
    Disable,
}

#[derive(Subcommand)]
enum OauthCommands {
    /// Start an authorization and print the URL to visit
    Authorize {
        #[arg(long, default_value = "Google")]
        provider: String,
        /// Share the resulting account
        #[arg(long)]
        shared: bool,
    },
    /// Poll the status of an authorization
    Status { state: String },
}

#[derive(Subcommand)]
enum AccountCommands {
    /// Create an account from a JSON object
    Create { data: String },
    /// List accounts
    List,
    /// Get account details
    Get { id: String },
    /// Enable (1) or disable (0) an account
    Status { id: String, status: i32 },
    /// Rename an account
    Rename { id: String, name: String },
    /// Get account balance
    Balance { id: String },
    /// List consumption records
    Consumption {
        id: String,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
        #[arg(long)]
        start_date: Option<String>,
        #[arg(long)]
        end_date: Option<String>,
    },
    /// Delete an account
    Delete { id: String },
}

fn require<'a>(value: &'a Option<String>, flag: &str) -> Result<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("{} is required for this command", flag))
}

fn parse_object(raw: &str) -> Result<JsonObject> {
    serde_json::from_str(raw).context("expected a JSON object")
}

fn print_json(value: &JsonObject) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

impl Cli {
    fn cipher(&self) -> Result<AesGcmCipher> {
        Ok(AesGcmCipher::from_config(require(
            &self.encryption_key,
            "--encryption-key",
        )?)?)
    }

    fn user_id(&self) -> Result<UserId> {
        self.user
            .map(UserId::new)
            .ok_or_else(|| anyhow::anyhow!("--user is required for this command"))
    }

    async fn repo(&self) -> Result<Repo> {
        build_repo(require(&self.database_url, "--database-url")?).await
    }

    async fn service(&self) -> Result<KiroService<Repo, AesGcmCipher>> {
        let upstream = UpstreamClient::new(require(&self.plugin_api_url, "--plugin-api-url")?)
            .with_timeout(Duration::from_secs(self.timeout_secs));
        Ok(KiroService::new(self.repo().await?, self.cipher()?, upstream))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Key {
            action: KeyCommands::Generate,
        } => {
            println!("{}", AesGcmCipher::generate_key_hex());
        }

        Commands::Credential { action } => match action {
            CredentialCommands::Encrypt { token } => {
                println!("{}", cli.cipher()?.encrypt(token)?);
            }
            CredentialCommands::Set { token } => {
                let user_id = cli.user_id()?;
                let blob = cli.cipher()?.encrypt(token)?;
                let record = cli.repo().await?.save(user_id, &blob).await?;
                println!("✓ Plugin API key stored for user {}", record.user_id);
            }
            CredentialCommands::Disable => {
                let user_id = cli.user_id()?;
                if cli.repo().await?.deactivate(user_id).await? {
                    println!("✓ Plugin API key disabled for user {}", user_id);
                } else {
                    println!("✗ No plugin API key for user {}", user_id);
                    std::process::exit(1);
                }
            }
        },

        Commands::Oauth { action } => {
            let (service, user_id) = (cli.service().await?, cli.user_id()?);
            let resp = match action {
                OauthCommands::Authorize { provider, shared } => {
                    service
                        .get_oauth_authorize_url(user_id, provider, i32::from(*shared))
                        .await?
                }
                OauthCommands::Status { state } => service.get_oauth_status(user_id, state).await?,
            };
            print_json(&resp)?;
        }

        Commands::Account { action } => {
            let (service, user_id) = (cli.service().await?, cli.user_id()?);
            let resp = match action {
                AccountCommands::Create { data } => {
                    service.create_account(user_id, &parse_object(data)?).await?
                }
                AccountCommands::List => service.get_accounts(user_id).await?,
                AccountCommands::Get { id } => service.get_account(user_id, id).await?,
                AccountCommands::Status { id, status } => {
                    service.update_account_status(user_id, id, *status).await?
                }
                AccountCommands::Rename { id, name } => {
                    service.update_account_name(user_id, id, name).await?
                }
                AccountCommands::Balance { id } => service.get_account_balance(user_id, id).await?,
                AccountCommands::Consumption {
                    id,
                    limit,
                    offset,
                    start_date,
                    end_date,
                } => {
                    let query = ConsumptionQuery {
                        limit: *limit,
                        offset: *offset,
                        start_date: start_date.clone(),
                        end_date: end_date.clone(),
                    };
                    service.get_account_consumption(user_id, id, &query).await?
                }
                AccountCommands::Delete { id } => service.delete_account(user_id, id).await?,
            };
            print_json(&resp)?;
        }

        Commands::Stats {
            start_date,
            end_date,
        } => {
            let (service, user_id) = (cli.service().await?, cli.user_id()?);
            let query = StatsQuery {
                start_date: start_date.clone(),
                end_date: end_date.clone(),
            };
            print_json(&service.get_user_consumption_stats(user_id, &query).await?)?;
        }

        Commands::Models { supported: true } => {
            for model in kiro_types::SUPPORTED_MODELS {
                println!("{}", model);
            }
        }

        Commands::Models { supported: false } => {
            let (service, user_id) = (cli.service().await?, cli.user_id()?);
            print_json(&service.get_models(user_id).await?)?;
        }

        Commands::Chat { request, stream } => {
            let (service, user_id) = (cli.service().await?, cli.user_id()?);
            let mut request = parse_object(request)?;

            if !stream {
                print_json(&service.chat_completions(user_id, &request).await?)?;
                return Ok(());
            }

            request.insert("stream".into(), serde_json::Value::Bool(true));
            let mut chunks = service.chat_completions_stream(user_id, &request).await?;
            let mut stdout = tokio::io::stdout();
            while let Some(chunk) = chunks.next().await {
                stdout.write_all(&chunk?).await?;
                stdout.flush().await?;
            }
        }
    }

    Ok(())
}
