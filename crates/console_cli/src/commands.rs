use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use reqwest::{Client, Proxy};
use session_manager::{
    build_api_client, mask_token, FileSessionStorage, Navigator, RefreshOutcome, SessionManager,
};
use status_channel::{ConnectionState, StatusChannel, TokenProvider};
use tracing::{debug, info};

use crate::config::Config;
use crate::paths::session_file_path;

/// Terminal stand-in for the browser redirect after logout
struct CliNavigator;

impl Navigator for CliNavigator {
    fn redirect(&self, route: &str) {
        eprintln!("Session ended ({route}); run `lab-console login` to sign in again.");
    }
}

pub struct App {
    config: Config,
    http: Client,
    session: SessionManager,
}

impl App {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let storage_path = session_file_path(&config.storage_dir());
        debug!("Session storage at {}", storage_path.display());

        let http = build_http_client(&config)?;
        let auth_http = http_builder(&config)?
            .timeout(Duration::from_millis(config.session.auth_timeout_ms))
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {e}"))?;

        let session = SessionManager::with_http_client(
            config.session.clone(),
            auth_http,
            Arc::new(FileSessionStorage::new(storage_path)),
            Arc::new(CliNavigator),
        )
        .await
        .context("Failed to restore session")?;

        Ok(Self {
            config,
            http,
            session,
        })
    }

    pub async fn login(&self, username: &str, password: Option<String>) -> anyhow::Result<()> {
        let password = match password {
            Some(password) => password,
            None => read_password()?,
        };
        let record = self.session.login(username, &password).await?;
        println!(
            "Signed in as {} (token {}, expires {})",
            username,
            mask_token(&record.access_token),
            record.expires_at
        );
        Ok(())
    }

    pub async fn refresh(&self) -> anyhow::Result<()> {
        match self.session.refresh().await {
            RefreshOutcome::Refreshed => {
                let expires_at = self
                    .session
                    .token_record()
                    .map(|record| record.expires_at.to_rfc3339())
                    .unwrap_or_default();
                println!("Session refreshed, expires {expires_at}");
                Ok(())
            }
            RefreshOutcome::NoRefreshToken => bail!("Not signed in"),
            RefreshOutcome::Failed(reason) => bail!("Refresh failed: {reason}"),
        }
    }

    pub fn whoami(&self) -> anyhow::Result<()> {
        let Some(record) = self.session.token_record() else {
            println!("Not signed in");
            return Ok(());
        };
        println!("Token:   {}", mask_token(&record.access_token));
        println!("Expires: {}", record.expires_at);
        println!(
            "Valid:   {}",
            if self.session.is_authenticated() { "yes" } else { "no (refresh needed)" }
        );
        if let Some(user_info) = record.user_info {
            println!("User:    {}", serde_json::to_string_pretty(&user_info)?);
        }
        Ok(())
    }

    pub async fn logout(&self) -> anyhow::Result<()> {
        self.session.logout().await;
        Ok(())
    }

    pub async fn get(&self, path: &str) -> anyhow::Result<()> {
        self.ensure_session().await?;
        let url = url::Url::parse(&self.config.session.backend_url)?.join(path)?;
        let client = build_api_client(
            self.session.clone(),
            self.http.clone(),
            self.config.max_transient_retries,
        );

        let response = client.get(url.clone()).send().await?;
        let status = response.status();
        let body = response.text().await?;
        info!("GET {} -> {}", url.path(), status);

        match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
            Err(_) => println!("{body}"),
        }
        if !status.is_success() {
            bail!("Request failed with status {status}");
        }
        Ok(())
    }

    pub async fn watch(&self) -> anyhow::Result<()> {
        let channel = self.open_channel().await?;

        let mut state = channel.watch_state();
        let state_task = tokio::spawn(async move {
            while state.changed().await.is_ok() {
                let current = *state.borrow_and_update();
                println!("[channel] {current}");
            }
        });
        let subscription = channel.subscribe(|batch| {
            for entry in batch {
                println!(
                    "{:<24} {}",
                    entry.resource_id,
                    if entry.is_online { "online" } else { "offline" }
                );
            }
        });

        channel.connect();
        tokio::signal::ctrl_c().await?;

        subscription.unsubscribe();
        channel.disconnect();
        state_task.abort();
        Ok(())
    }

    pub async fn query(&self, kind: &str, data: Option<&str>) -> anyhow::Result<()> {
        let payload = data
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()
            .context("--data must be valid JSON")?;

        let channel = self.connected_channel().await?;
        let result = channel.query(kind, payload).await;
        channel.disconnect();

        let message = result?;
        println!("{}", serde_json::to_string_pretty(&message)?);
        Ok(())
    }

    pub async fn status(&self, resource_ids: &[String]) -> anyhow::Result<()> {
        let channel = self.connected_channel().await?;
        let result = channel.query_status(resource_ids).await;
        channel.disconnect();

        for entry in result? {
            let last_seen = entry
                .last_connected_at
                .map(|ms| ms.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<24} {:<8} {}",
                entry.resource_id,
                if entry.is_online { "online" } else { "offline" },
                last_seen
            );
        }
        Ok(())
    }

    /// Refreshes an expired session before it is needed.
    async fn ensure_session(&self) -> anyhow::Result<()> {
        if self.session.is_authenticated() {
            return Ok(());
        }
        match self.session.refresh().await {
            RefreshOutcome::Refreshed => Ok(()),
            RefreshOutcome::NoRefreshToken => bail!("Not signed in; run `lab-console login`"),
            RefreshOutcome::Failed(reason) => bail!("Session expired: {reason}"),
        }
    }

    async fn open_channel(&self) -> anyhow::Result<StatusChannel> {
        self.ensure_session().await?;
        let session = self.session.clone();
        let token_provider: Arc<dyn TokenProvider> = Arc::new(move || session.access_token());
        Ok(StatusChannel::new(self.config.channel.clone(), token_provider))
    }

    /// Channel that reached `Connected`, for one-shot commands.
    async fn connected_channel(&self) -> anyhow::Result<StatusChannel> {
        let channel = self.open_channel().await?;
        let mut state = channel.watch_state();
        channel.connect();

        let reached = state
            .wait_for(|s| {
                matches!(
                    s,
                    ConnectionState::Connected
                        | ConnectionState::GaveUp
                        | ConnectionState::Disconnected
                )
            })
            .await
            .map(|current| *current)
            .map_err(|_| anyhow!("Status channel dropped"))?;

        if !reached.is_connected() {
            channel.disconnect();
            bail!("Status channel unavailable ({reached})");
        }
        Ok(channel)
    }
}

fn http_builder(config: &Config) -> anyhow::Result<reqwest::ClientBuilder> {
    let mut builder = Client::builder();
    if !config.http_proxy.is_empty() {
        builder = builder.proxy(Proxy::http(&config.http_proxy)?);
    }
    if !config.https_proxy.is_empty() {
        builder = builder.proxy(Proxy::https(&config.https_proxy)?);
    }
    Ok(builder)
}

fn build_http_client(config: &Config) -> anyhow::Result<Client> {
    http_builder(config)?
        .build()
        .map_err(|e| anyhow!("Failed to build HTTP client: {e}"))
}

fn read_password() -> anyhow::Result<String> {
    eprint!("Password: ");
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Failed to read password")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("Empty password");
    }
    Ok(password)
}
