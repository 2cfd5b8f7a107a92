//! Coordinator process configuration.

/// Configuration for the coordinator broker.
#[derive(Debug, Clone, clap::Parser)]
pub struct CoordinatorConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "COORDINATOR_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8420, env = "COORDINATOR_PORT")]
    pub port: u16,

    /// Connection URL for the backing key/value store.
    #[arg(long, default_value = "redis://127.0.0.1:6379", env = "COORDINATOR_STORE_URL")]
    pub store_url: String,

    /// Shared server secret — the prefix half of agent/admin bearer tokens.
    /// If unset (along with `admin_key` and `proxy_token`), the broker runs
    /// in dev mode and every request is allowed.
    #[arg(long, env = "COORDINATOR_SERVER_SECRET")]
    pub server_secret: Option<String>,

    /// Admin bearer key (the suffix half of an admin token).
    #[arg(long, env = "COORDINATOR_ADMIN_KEY")]
    pub admin_key: Option<String>,

    /// Shared proxy bearer token (oauth mode).
    #[arg(long, env = "COORDINATOR_PROXY_TOKEN")]
    pub proxy_token: Option<String>,
}

impl CoordinatorConfig {
    pub fn auth_config(&self) -> crate::auth::AuthConfig {
        crate::auth::AuthConfig {
            server_secret: self.server_secret.clone(),
            admin_key: self.admin_key.clone(),
            proxy_token: self.proxy_token.clone(),
        }
    }
}
