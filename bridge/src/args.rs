use clap::Parser;

/// Protocol-translating reverse proxy that fronts non-Anthropic chat
/// backends as the Anthropic Messages API.
#[derive(Debug, Parser)]
#[command(name = "claude-bridge", version, about)]
pub struct Args {
    /// Log filter, e.g. "info" or "server=debug,proxy=trace" (spec §6 `LOG_LEVEL`).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Disables all logging output regardless of `--log-level` (spec §6 `LOGGING_DISABLED`).
    #[arg(long, env = "LOGGING_DISABLED", default_value_t = false)]
    pub logging_disabled: bool,
}
