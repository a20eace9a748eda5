//! Command implementations.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context as _, Result};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use fieldsync_core::api::{ApiClient, ReqwestTransport};
use fieldsync_core::auth::{AuthStatus, FileSessionStorage, KeyringSessionStorage, SessionStore};
use fieldsync_core::cache::ViewCache;
use fieldsync_core::config::{Config, SessionBackend};
use fieldsync_core::realtime::{RealtimeChannel, WsConnector};
use fieldsync_core::sync::{SyncController, SyncEvent, ViewSnapshot, ViewStatus};
use fieldsync_core::RequestExecutor;

use crate::args::Cli;

/// Keychain account holding the session when the keyring backend is used.
const KEYRING_ACCOUNT: &str = "default";

/// Everything a command needs, built once from the CLI flags and config file.
pub struct Context {
    config: Config,
    config_path: PathBuf,
    store: SessionStore,
    client: ApiClient<ReqwestTransport>,
    cache: ViewCache,
}

impl Context {
    pub fn open(cli: &Cli) -> Result<Self> {
        let config_path = match &cli.config {
            Some(path) => path.clone(),
            None => Config::config_path()?,
        };
        let mut config = Config::load_from(&config_path)?;
        if let Some(url) = &cli.api_url {
            config.api_base_url = url.clone();
        }
        if let Some(url) = &cli.ws_url {
            config.ws_url = Some(url.clone());
        }

        let cache_dir = config.cache_dir()?;
        let store = match config.session_backend {
            SessionBackend::File => SessionStore::open(FileSessionStorage::new(cache_dir.clone())),
            SessionBackend::Keyring => SessionStore::open(KeyringSessionStorage::new(KEYRING_ACCOUNT)),
        };
        let transport = ReqwestTransport::new(config.api_base_url.clone(), config.request_timeout())?;
        let client = ApiClient::new(RequestExecutor::new(transport, store.clone()));
        let cache = ViewCache::new(cache_dir.join("views"))?;

        Ok(Self {
            config,
            config_path,
            store,
            client,
            cache,
        })
    }

    fn controller(&self) -> SyncController<ReqwestTransport> {
        SyncController::new(
            self.client.executor().clone(),
            self.config.view_specs(),
            Some(self.cache.clone()),
        )
    }

    fn ensure_logged_in(&self) -> Result<()> {
        if !self.store.is_authenticated() {
            bail!("Not logged in. Run `fieldsync login` first.");
        }
        Ok(())
    }

    /// Persist the username without writing back any command line overrides.
    fn remember_username(&self, username: &str) -> Result<()> {
        let mut saved = Config::load_from(&self.config_path)?;
        if saved.last_username.as_deref() == Some(username) {
            return Ok(());
        }
        saved.last_username = Some(username.to_string());
        saved.save_to(&self.config_path)
    }
}

fn prompt(label: &str) -> Result<String> {
    eprint!("{}", label);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        bail!("No input given");
    }
    Ok(value)
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

fn print_update(view: &str, snapshot: &ViewSnapshot) {
    let data = snapshot.data.as_ref().unwrap_or(&Value::Null);
    println!("[{}] {}: {}", timestamp(), view, data);
}

pub async fn login(ctx: &Context, username: Option<String>) -> Result<()> {
    let username = match username.or_else(|| ctx.config.last_username.clone()) {
        Some(username) => username,
        None => prompt("Email: ")?,
    };
    let password = match std::env::var("FIELDSYNC_PASSWORD") {
        Ok(password) if !password.is_empty() => password,
        _ => rpassword::prompt_password("Password: ")?,
    };

    ctx.client.executor().login(&username, &password).await?;
    info!(username = %username, "Logged in");

    match ctx.client.me().await {
        Ok(identity) => println!(
            "Logged in as {} ({})",
            identity.email.as_deref().unwrap_or(&username),
            identity.role.as_deref().unwrap_or("unknown role")
        ),
        Err(e) => {
            warn!(error = %e, "Could not fetch identity");
            println!("Logged in as {}", username);
        }
    }

    ctx.remember_username(&username)
}

pub async fn logout(ctx: &Context) -> Result<()> {
    if !ctx.store.is_authenticated() {
        println!("Not logged in");
        return Ok(());
    }
    ctx.client.executor().logout().await;
    println!("Logged out");
    Ok(())
}

pub fn status(ctx: &Context) -> Result<()> {
    println!("Server:    {}", ctx.config.api_base_url);
    println!("Realtime:  {}", ctx.config.websocket_url());

    match ctx.store.get() {
        Some(session) => {
            let expiry = match session.minutes_until_expiry() {
                Some(minutes) if minutes > 0 => format!("access expires in {}m", minutes),
                Some(_) => "access expired, renews on next request".to_string(),
                None => "access expiry unknown".to_string(),
            };
            println!("Session:   logged in, {}", expiry);
        }
        None => {
            let state = match ctx.store.status() {
                AuthStatus::Expired => "expired, please log in again",
                _ => "logged out",
            };
            println!("Session:   {}", state);
        }
    }

    println!("Views:");
    for view in &ctx.config.views {
        let age = ctx.cache.age(&view.name).unwrap_or_else(|| "never".to_string());
        println!(
            "  {:<12} {:<20} updated {:<10} topics: {}",
            view.name,
            view.path,
            age,
            view.topics.join(", ")
        );
    }
    Ok(())
}

pub async fn fetch(ctx: &Context, view: &str) -> Result<()> {
    ctx.ensure_logged_in()?;
    let controller = ctx.controller();
    let snapshot = controller
        .refresh(view)
        .await
        .with_context(|| format!("Available views: {}", controller.view_names().join(", ")))?;

    if snapshot.status == ViewStatus::Error {
        bail!(
            "{}",
            snapshot.error.unwrap_or_else(|| "Fetch failed".to_string())
        );
    }
    let data = snapshot.data.unwrap_or(Value::Null);
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

pub async fn watch(ctx: &Context, views: Vec<String>) -> Result<()> {
    ctx.ensure_logged_in()?;
    let controller = ctx.controller();
    let available = controller.view_names();
    if let Some(unknown) = views.iter().find(|v| !available.contains(*v)) {
        bail!("Unknown view: {} (available: {})", unknown, available.join(", "));
    }
    let shown = if views.is_empty() { available } else { views };

    for name in &shown {
        if let (Some(snapshot), Some(age)) = (controller.snapshot(name), ctx.cache.age(name)) {
            if snapshot.data.is_some() {
                eprintln!("[{}] {} (cached {})", timestamp(), name, age);
                print_update(name, &snapshot);
            }
        }
    }

    let mut events = controller.events();
    let channel = RealtimeChannel::new();
    controller.start(&channel);
    let mut states = channel.watch_state();
    let mut task = channel.connect(WsConnector, ctx.config.channel_config())?;

    let initial = controller.clone();
    tokio::spawn(async move {
        initial.refresh_all().await;
    });

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Interrupted");
                break Ok(());
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let state = *states.borrow_and_update();
                eprintln!("[{}] connection: {:?}", timestamp(), state);
            }
            event = events.recv() => match event {
                Ok(SyncEvent::StatusChanged { view, status: ViewStatus::Idle }) if shown.contains(&view) => {
                    if let Some(snapshot) = controller.snapshot(&view) {
                        print_update(&view, &snapshot);
                    }
                }
                Ok(SyncEvent::StatusChanged { .. }) => {}
                Ok(SyncEvent::Failed { view, error, .. }) => {
                    eprintln!("[{}] {} failed: {}", timestamp(), view, error);
                }
                Ok(SyncEvent::SessionExpired) => {
                    break Err(anyhow!("Session expired, please log in again"));
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Sync events lagged"),
                Err(RecvError::Closed) => break Ok(()),
            },
            result = &mut task => {
                break match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.into()),
                    Err(e) => Err(anyhow!("Realtime task failed: {}", e)),
                };
            }
        }
    };

    controller.stop();
    channel.close();
    outcome
}
