//! HTTP server command: `retrai serve`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use retrai::config::ServerSettings;
use retrai::provider::AnthropicProvider;
use retrai::server::start_server;

/// Command-line overrides; unset fields keep the environment/default value.
#[derive(Debug, Default)]
pub struct ServeOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub checkpoint_dir: Option<PathBuf>,
    pub event_log: Option<PathBuf>,
    pub dev: bool,
}

impl ServeOptions {
    fn apply(self, mut settings: ServerSettings) -> ServerSettings {
        if let Some(host) = self.host {
            settings.host = host;
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if self.checkpoint_dir.is_some() {
            settings.checkpoint_dir = self.checkpoint_dir;
        }
        if self.event_log.is_some() {
            settings.event_log = self.event_log;
        }
        settings.dev_mode |= self.dev;
        settings
    }
}

pub async fn cmd_serve(options: ServeOptions) -> Result<()> {
    let settings = options.apply(ServerSettings::from_env()?);
    let provider = AnthropicProvider::from_env().context("Model provider is not available")?;
    start_server(settings, Arc::new(provider)).await
}
