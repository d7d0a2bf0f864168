//! Agent identity, resolved from CLI flags with `HIVE_*` environment
//! fallbacks. Flags win over environment; both carry the same semantics.

use clap::Args;
use std::path::PathBuf;

/// Flag/environment surface consumed by agent processes at startup. The
/// desktop shell launches children with the `HIVE_*` variables set; flags are
/// for humans and wrappers.
#[derive(Debug, Clone, Args)]
pub struct IdentityArgs {
    /// Broker WebSocket URL. Falls back to the discovery sidecar when unset.
    #[arg(long, env = "HIVE_BROKER_URL")]
    pub broker_url: Option<String>,

    /// Display name requested at registration.
    #[arg(long, env = "HIVE_NAME")]
    pub name: Option<String>,

    /// Opaque agent id. Generated when unset.
    #[arg(long, env = "HIVE_ID")]
    pub id: Option<String>,

    /// Id of the agent that spawned this one.
    #[arg(long, env = "HIVE_PARENT_ID")]
    pub parent_id: Option<String>,

    /// Free-form role description.
    #[arg(long, env = "HIVE_ROLE")]
    pub role: Option<String>,

    /// Whether a human is attached; non-interactive agents may self-terminate
    /// on reaching the done status.
    #[arg(long, env = "HIVE_INTERACTIVE", value_parser = parse_flag)]
    pub interactive: Option<bool>,
}

fn parse_flag(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(format!("not a boolean flag: {other:?}")),
    }
}

/// Fully resolved identity an agent registers with.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub id: String,
    pub name: String,
    pub role: String,
    pub parent_id: Option<String>,
    pub cwd: String,
    pub interactive: bool,
    pub broker_url: Option<String>,
}

impl AgentIdentity {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            role: role.into(),
            parent_id: None,
            cwd: current_dir_string(),
            interactive: false,
            broker_url: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn with_broker_url(mut self, url: impl Into<String>) -> Self {
        self.broker_url = Some(url.into());
        self
    }

    /// Resolve from parsed flags (which clap has already backed with the
    /// `HIVE_*` environment), filling generated defaults for the rest.
    pub fn from_args(args: &IdentityArgs) -> Self {
        Self {
            id: args
                .id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name: args.name.clone().unwrap_or_else(|| "agent".to_string()),
            role: args.role.clone().unwrap_or_else(|| "agent".to_string()),
            parent_id: args.parent_id.clone(),
            cwd: current_dir_string(),
            interactive: args.interactive.unwrap_or(false),
            broker_url: args.broker_url.clone(),
        }
    }
}

fn current_dir_string() -> String {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .to_string_lossy()
        .into_owned()
}
