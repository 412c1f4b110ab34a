pub mod agent;
pub mod config;
pub mod tenant;

use clap::{Args, Parser, Subcommand};

/// Pinmark: page annotations for coding agents.
#[derive(Debug, Parser)]
#[command(name = "pinmark", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the annotation server (default when no subcommand is given).
    Serve {
        /// Listen port; overrides `server.port`.
        #[arg(long)]
        port: Option<u16>,
        /// Do not listen; follow the events of an already running server.
        #[arg(long)]
        mcp_only: bool,
        /// Base URL of the server the bridge talks to.
        /// Defaults to `http://localhost:<port>`.
        #[arg(long)]
        http_url: Option<String>,
    },
    #[command(flatten)]
    Agent(AgentCommand),
    /// Stream events as JSON lines.
    Watch {
        #[arg(long)]
        http_url: Option<String>,
        /// Follow one session (with replay on reconnect).
        #[arg(long)]
        session: Option<String>,
        /// Follow every session hosted on this domain (e.g. `localhost:3000`).
        #[arg(long)]
        domain: Option<String>,
    },
    /// Organizations, users and API keys (operates on the store directly).
    #[command(subcommand)]
    Tenant(TenantCommand),
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

/// Where a client command finds the server.
#[derive(Debug, Clone, Default, Args)]
pub struct Remote {
    /// Base URL of a running server. Defaults to `http://localhost:<port>`.
    #[arg(long)]
    pub http_url: Option<String>,
}

/// Read and act on feedback through a running server's HTTP API.
#[derive(Debug, Subcommand)]
pub enum AgentCommand {
    /// List sessions as JSON.
    Sessions {
        #[command(flatten)]
        remote: Remote,
    },
    /// Print one session with all of its annotations.
    Session {
        id: String,
        #[command(flatten)]
        remote: Remote,
    },
    /// Print pending annotations as JSON.
    Pending {
        /// Only this session's annotations.
        #[arg(long)]
        session: Option<String>,
        #[command(flatten)]
        remote: Remote,
    },
    /// Mark an annotation as acknowledged.
    Ack {
        annotation_id: String,
        #[command(flatten)]
        remote: Remote,
    },
    /// Mark an annotation as resolved, optionally posting a summary.
    Resolve {
        annotation_id: String,
        #[arg(long)]
        summary: Option<String>,
        #[command(flatten)]
        remote: Remote,
    },
    /// Dismiss an annotation and post the reason to its thread.
    Dismiss {
        annotation_id: String,
        #[arg(long)]
        reason: String,
        #[command(flatten)]
        remote: Remote,
    },
    /// Add an agent reply to an annotation's thread.
    Reply {
        annotation_id: String,
        message: String,
        #[command(flatten)]
        remote: Remote,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

#[derive(Debug, Subcommand)]
pub enum TenantCommand {
    /// Create an organization and print it.
    CreateOrg {
        name: String,
    },
    /// Create a user in an existing organization.
    CreateUser {
        email: String,
        #[arg(long)]
        org: String,
        /// owner, admin or member.
        #[arg(long, default_value = "member")]
        role: String,
    },
    /// Issue an API key. The raw key is printed once and never stored.
    CreateKey {
        /// User id or email.
        user: String,
        #[arg(long, default_value = "default")]
        name: String,
        /// Expire after this many days.
        #[arg(long)]
        expires_in_days: Option<u32>,
    },
    /// List a user's keys (prefixes only), newest first.
    ListKeys {
        /// User id or email.
        user: String,
    },
    /// Delete an API key by id.
    RevokeKey {
        key_id: String,
    },
}

// ── Config loading helper ─────────────────────────────────────────────

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "PINMARK_CONFIG";

/// Load the configuration from the path specified by `PINMARK_CONFIG` (or
/// `config.toml` by default), with environment overrides applied.
/// Returns the parsed [`Config`](pm_domain::config::Config) and the path
/// that was used.
pub fn load_config() -> anyhow::Result<(pm_domain::config::Config, String)> {
    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        pm_domain::config::Config::from_toml_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        let mut config = pm_domain::config::Config::default();
        config.apply_env();
        config
    };

    Ok((config, config_path))
}
