/// Errors raised while assembling [`crate::Config`] from the process environment.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{name} must be a valid u16 port, got '{value}'")]
    InvalidPort { name: &'static str, value: String },

    #[error("{name} must be a positive integer, got '{value}'")]
    InvalidInteger { name: &'static str, value: String },

    #[error("{name} must be 'true' or 'false', got '{value}'")]
    InvalidBool { name: &'static str, value: String },

    #[error(
        "no upstream configured: set UPSTREAM_BASE_URL, UPSTREAM_CONFIG_1_BASE_URL, or at least one CHANNEL_1_* entry"
    )]
    NoUpstreamConfigured,

    #[error("CHANNEL_{index}_NAME is required once CHANNEL_{index}_BASE_URL is set")]
    ChannelMissingName { index: u32 },

    #[error("UPSTREAM_CONFIG_{index}_NAME_MODEL is required once UPSTREAM_CONFIG_{index}_BASE_URL is set")]
    UpstreamConfigMissingNameModel { index: u32 },

    #[error("unknown protocol '{value}' for CHANNEL_{index}_PROTOCOL, expected 'openai' or 'anthropic'")]
    UnknownProtocol { index: u32, value: String },
}

pub type Result<T> = std::result::Result<T, Error>;
