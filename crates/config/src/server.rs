use secrecy::SecretString;

/// `PORT` / `HOST` / `AUTO_PORT` / `CLIENT_API_KEY` listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// `AUTO_PORT=true` binds an ephemeral port instead of `port`.
    pub auto_port: bool,
    /// Required `Authorization`/`x-api-key` value when set; unauthenticated otherwise.
    pub client_api_key: Option<SecretString>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            auto_port: false,
            client_api_key: None,
        }
    }
}
