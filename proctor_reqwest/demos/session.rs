use std::path::PathBuf;

use clap::Parser;
use proctor_reqwest::{AuthenticatedClient, ClientConfig, Paged};
use proctor_tokens::{Credentials, LoginRedirect, Password};
use serde_json::Value;

#[derive(Debug, Parser)]
struct Opts {
    /// The backend's base URL
    #[arg(short = 'u', long, env = "PROCTOR_API_URL", default_value = "http://localhost:8080")]
    api_url: reqwest::Url,

    /// The local file used to persist the session
    #[arg(short = 'f', long, env = "PROCTOR_TOKEN_FILE", default_value = ".proctor-session.json")]
    token_file: PathBuf,

    /// The user to sign in as, if there is no session to restore
    #[arg(short, long, env = "PROCTOR_USERNAME")]
    name: Option<String>,

    /// The user's password
    #[arg(short, long, env = "PROCTOR_PASSWORD", hide_env_values = true)]
    password: Option<Password>,

    /// Sign out when done
    #[arg(long)]
    logout: bool,
}

#[derive(Debug)]
struct LogRedirect;

impl LoginRedirect for LogRedirect {
    fn redirect_to_login(&self) {
        tracing::warn!("session ended, sign in again to continue");
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let config = ClientConfig::new(opts.api_url)?.with_token_file(opts.token_file);
    let client = AuthenticatedClient::connect(&config, LogRedirect).await?;

    if !client.session().is_authenticated() {
        let (Some(name), Some(password)) = (opts.name, opts.password) else {
            color_eyre::eyre::bail!("no session to restore; provide a name and password");
        };

        client
            .session()
            .login(&Credentials { name, password })
            .await?;
    }

    tracing::info!(user = ?client.session().username(), "signed in");

    let mut watcher = client.session().subscribe();
    tokio::spawn(async move {
        while watcher.changed().await.is_ok() {
            tracing::info!(
                authenticated = watcher.tokens().is_authenticated(),
                "session changed"
            );
        }
    });

    let page: Paged<Value> = client
        .fetch_paged("/tests", &[("page", 0), ("size", 20)])
        .await?;

    tracing::info!(
        tests = page.content.len(),
        total = page.total_elements,
        last = page.last,
        "fetched first page of tests"
    );

    if opts.logout {
        client.session().logout().await;
    }

    Ok(())
}
