use clap::Args;
use foundation::ids::{ProjectId, UserId};
use review::navigator::ReviewConfig;

/// Server connection. Flags left out fall back to `CATMAID_*` variables.
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Base URL of the CATMAID server [env: CATMAID_URL]
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Project id [env: CATMAID_PROJECT]
    #[arg(long, global = true)]
    pub project: Option<u64>,

    /// API token [env: CATMAID_TOKEN]
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Id of the reviewing user [env: CATMAID_USER]
    #[arg(long, global = true)]
    pub user: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    /// Always ends with a slash.
    pub base_url: String,
    pub project: ProjectId,
    pub token: Option<String>,
    pub user: UserId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { name: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(name) => write!(f, "missing {name} (flag or environment)"),
            ConfigError::Invalid { name, value } => write!(f, "invalid {name}: {value:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConnectionArgs {
    pub fn resolve(self) -> Result<Connection, ConfigError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    pub fn resolve_with(self, env: impl Fn(&str) -> Option<String>) -> Result<Connection, ConfigError> {
        let mut base_url = self
            .url
            .or_else(|| env("CATMAID_URL"))
            .ok_or(ConfigError::Missing("CATMAID_URL"))?;
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let project = match self.project {
            Some(p) => p,
            None => env_u64(&env, "CATMAID_PROJECT")?,
        };
        let user = match self.user {
            Some(u) => u,
            None => env_u64(&env, "CATMAID_USER")?,
        };
        Ok(Connection {
            base_url,
            project: ProjectId(project),
            token: self.token.or_else(|| env("CATMAID_TOKEN")),
            user: UserId(user),
        })
    }
}

fn env_u64(env: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<u64, ConfigError> {
    let value = env(name).ok_or(ConfigError::Missing(name))?;
    let parsed = value.trim().parse::<u64>();
    parsed.map_err(|_| ConfigError::Invalid { name, value })
}

/// Navigation settings of a review session.
#[derive(Args, Debug, Clone)]
pub struct ReviewArgs {
    /// Most sections a single step may cross
    #[arg(long, default_value_t = 1)]
    pub step: u32,

    /// Review from the segment's end towards its start
    #[arg(long)]
    pub downstream: bool,

    /// Only centre the view when entering a segment
    #[arg(long)]
    pub no_centering: bool,

    /// Keep reviews local instead of storing them on the server
    #[arg(long)]
    pub no_persist: bool,

    /// Don't reload the table after finishing a segment
    #[arg(long)]
    pub no_refresh: bool,

    /// Count only the listed reviewers and yourself, ignoring the whitelist
    #[arg(long, value_delimiter = ',')]
    pub follow: Vec<u64>,
}

impl ReviewArgs {
    pub fn review_config(&self) -> ReviewConfig {
        ReviewConfig {
            virtual_node_step: self.step.max(1),
            review_upstream: !self.downstream,
            auto_centering: !self.no_centering,
            persist_review: !self.no_persist,
            no_refresh_between_segments: self.no_refresh,
        }
    }
}
