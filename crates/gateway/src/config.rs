use barge_broker::BrokerConfig;

/// Gateway configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// HTTP listen port (`PORT`).
    pub port: u16,
    /// Allowed CORS origin (`CORS_ORIGIN`).
    pub cors_origin: String,
    pub broker: BrokerConfig,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(4000);
        let connection_name = format!("gateway@{}", host());
        Self {
            port,
            cors_origin: std::env::var("CORS_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            broker: BrokerConfig::from_env().with_connection_name(connection_name),
        }
    }
}

fn host() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".into())
}
