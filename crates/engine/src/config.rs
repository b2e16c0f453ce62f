//! Engine configuration.

use crate::status::StatusMap;

/// Environment variable selecting the deployment environment.
pub const ENV_VAR: &str = "FLOWLINE_ENV";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// In production, error jobs carry the message only, no error chain.
    pub production: bool,
    pub status_map: StatusMap,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            production: !cfg!(debug_assertions),
            status_map: StatusMap::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults, with `FLOWLINE_ENV` deciding `production` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(env) = std::env::var(ENV_VAR) {
            config.production = env.eq_ignore_ascii_case("production");
        }
        config
    }

    pub fn with_status_map(mut self, status_map: StatusMap) -> Self {
        self.status_map = status_map;
        self
    }
}
