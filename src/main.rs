use chrono::Utc;
use clap::{Parser, Subcommand};
use integration_auth::provider::Method;
use integration_auth::{Error, ResourceRequest};
use log::{error, info};
use serde_json::{json, Value};
use service::{config::Config, logging::Logger, Manager};

#[derive(Parser)]
#[command(author, version, about = "Operate delegated provider credentials", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the configured providers
    Providers,
    /// Show the stored credential and its lifecycle state, without refreshing it
    Status {
        #[arg(long)]
        account: String,
        #[arg(long)]
        provider: String,
    },
    /// Return a usable credential, refreshing or revoking it as its age requires
    EnsureFresh {
        #[arg(long)]
        account: String,
        #[arg(long)]
        provider: String,
    },
    /// Refresh a credential now, regardless of its age
    Refresh {
        #[arg(long)]
        account: String,
        #[arg(long)]
        provider: String,
    },
    /// Disconnect an integration, provider-side and locally
    Revoke {
        #[arg(long)]
        account: String,
        #[arg(long)]
        provider: String,
    },
    /// Call a provider resource endpoint with the account's credential
    Call {
        #[arg(long)]
        account: String,
        #[arg(long)]
        provider: String,
        #[arg(long, default_value = "GET", value_parser = parse_method)]
        method: Method,
        /// Path relative to the provider API base, e.g. /v2/locations
        #[arg(long)]
        path: String,
        /// JSON request body
        #[arg(long, value_parser = parse_json)]
        body: Option<Value>,
    },
}

fn parse_method(value: &str) -> Result<Method, String> {
    Method::from_bytes(value.to_uppercase().as_bytes()).map_err(|e| e.to_string())
}

fn parse_json(value: &str) -> Result<Value, String> {
    serde_json::from_str(value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() {
    service::config::load_dotenv();
    let cli = Cli::parse();

    if let Err(e) = Logger::init_logger(&cli.config) {
        eprintln!("Failed to start logger: {e}");
    }

    let manager = match service::init_manager(&cli.config) {
        Ok(manager) => manager,
        Err(e) => {
            error!("Failed to initialize credential manager: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&manager, cli.command).await {
        if e.requires_reconnect() {
            error!("{e}: the integration has to be reconnected");
        } else {
            error!("{e}");
        }
        std::process::exit(1);
    }
}

async fn run(manager: &Manager, command: Command) -> Result<(), Error> {
    match command {
        Command::Providers => {
            for id in manager.providers().ids() {
                println!("{id}");
            }
        }
        Command::Status { account, provider } => {
            let report = match manager.status(&account, &provider).await? {
                Some((credential, state)) => json!({
                    "account": account,
                    "provider": provider,
                    "state": format!("{:?}", state),
                    "age_days": credential.age_days(Utc::now()),
                    "issued_at": credential.issued_at(),
                    "expires_at": credential.expires_at(),
                    "provider_account_id": credential.provider_account_id(),
                    "has_refresh_token": credential.refresh_token().is_some(),
                    "metadata": credential.metadata(),
                }),
                None => json!({
                    "account": account,
                    "provider": provider,
                    "state": "NotConnected",
                }),
            };
            println!("{report:#}");
        }
        Command::EnsureFresh { account, provider } => {
            let credential = manager.ensure_fresh(&account, &provider).await?;
            info!(
                "{} credential for account {} is usable, issued {}",
                provider,
                account,
                credential.issued_at()
            );
        }
        Command::Refresh { account, provider } => {
            let credential = manager.refresh(&account, &provider).await?;
            info!(
                "Refreshed {} credential for account {}, expires {:?}",
                provider,
                account,
                credential.expires_at()
            );
        }
        Command::Revoke { account, provider } => {
            manager.revoke(&account, &provider).await?;
            info!("Disconnected {} for account {}", provider, account);
        }
        Command::Call {
            account,
            provider,
            method,
            path,
            body,
        } => {
            let mut request = ResourceRequest::new(method, &path);
            if let Some(body) = body {
                request = request.with_body(body);
            }
            let response = manager.call(&account, &provider, request).await?;
            println!("{:#}", response.body);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_command_parsing() {
        let cli = Cli::try_parse_from([
            "credential_keeper",
            "call",
            "--account",
            "acct-1",
            "--provider",
            "square",
            "--method",
            "post",
            "--path",
            "/v2/terminals/checkouts",
            "--body",
            r#"{"amount_money":{"amount":100,"currency":"USD"}}"#,
        ])
        .unwrap();

        match cli.command {
            Command::Call {
                method, path, body, ..
            } => {
                assert_eq!(method, Method::POST);
                assert_eq!(path, "/v2/terminals/checkouts");
                assert_eq!(
                    body.and_then(|b| b.pointer("/amount_money/amount").cloned()),
                    Some(json!(100))
                );
            }
            _ => panic!("expected call command"),
        }
    }

    #[test]
    fn test_invalid_body_is_rejected() {
        let parsed = Cli::try_parse_from([
            "credential_keeper",
            "call",
            "--account",
            "acct-1",
            "--provider",
            "zoom",
            "--path",
            "/v2/users/me",
            "--body",
            "{not json",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_config_flags_precede_subcommand() {
        let cli = Cli::try_parse_from([
            "credential_keeper",
            "--soft-refresh-days",
            "15",
            "revoke",
            "--account",
            "acct-1",
            "--provider",
            "zoom",
        ])
        .unwrap();

        assert_eq!(cli.config.soft_refresh_days, 15);
        assert!(matches!(cli.command, Command::Revoke { .. }));
    }
}
