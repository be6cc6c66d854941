use crate::api::pool_dto::PoolConfigDto;
use crate::error::{Error, Result};

/// Environment variable overriding `max_pending_reservations`. Accepts an
/// integer, or `auto`/empty for no limit.
pub const MAX_PENDING_RESERVATIONS_ENV: &str = "PG_POOL_MAX_PENDING_RESERVATIONS";

pub const DEFAULT_CACHE_CAPACITY_PER_SPEC: usize = 1;
pub const DEFAULT_MAX_CREATION_RETRIES: u32 = 3;

/// Explicit configuration of one reservation pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of Staging + Ready reservations across all specs.
    /// `None` forwards every request to the backend immediately.
    pub max_pending_reservations: Option<usize>,

    /// Whether the executor releases reservations with `reuse = true`.
    pub reuse_enabled: bool,

    /// Maximum number of Cached reservations per distinct spec.
    pub cache_capacity_per_spec: usize,

    /// How often a failed creation is re-issued before it is surfaced.
    pub max_creation_retries: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_pending_reservations: None,
            reuse_enabled: false,
            cache_capacity_per_spec: DEFAULT_CACHE_CAPACITY_PER_SPEC,
            max_creation_retries: DEFAULT_MAX_CREATION_RETRIES,
        }
    }
}

impl PoolConfig {
    pub fn with_max_pending_reservations(mut self, limit: usize) -> Self {
        self.max_pending_reservations = Some(limit);
        self
    }

    pub fn with_reuse(mut self, reuse_enabled: bool) -> Self {
        self.reuse_enabled = reuse_enabled;
        self
    }

    pub fn with_cache_capacity_per_spec(mut self, capacity: usize) -> Self {
        self.cache_capacity_per_spec = capacity;
        self
    }

    pub fn with_max_creation_retries(mut self, retries: u32) -> Self {
        self.max_creation_retries = retries;
        self
    }

    /// Applies [`MAX_PENDING_RESERVATIONS_ENV`] if it is set.
    pub fn with_env_overrides(self) -> Result<Self> {
        match std::env::var(MAX_PENDING_RESERVATIONS_ENV) {
            Ok(value) => self.with_max_pending_override(&value),
            Err(_) => Ok(self),
        }
    }

    fn with_max_pending_override(mut self, value: &str) -> Result<Self> {
        let value = value.trim();
        self.max_pending_reservations = if value.is_empty() || value.eq_ignore_ascii_case("auto") {
            None
        } else {
            let limit = value
                .parse::<usize>()
                .map_err(|e| Error::ConfigError(format!("{}='{}' is not a valid limit: {}", MAX_PENDING_RESERVATIONS_ENV, value, e)))?;
            Some(limit)
        };
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_pending_reservations == Some(0) {
            return Err(Error::ConfigError("max_pending_reservations must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl TryFrom<PoolConfigDto> for PoolConfig {
    type Error = Error;

    fn try_from(dto: PoolConfigDto) -> Result<Self> {
        let config = PoolConfig {
            max_pending_reservations: dto.max_pending_reservations,
            reuse_enabled: dto.reuse_enabled,
            cache_capacity_per_spec: dto.cache_capacity_per_spec.unwrap_or(DEFAULT_CACHE_CAPACITY_PER_SPEC),
            max_creation_retries: dto.max_creation_retries.unwrap_or(DEFAULT_MAX_CREATION_RETRIES),
        };
        config.validate()?;
        Ok(config)
    }
}
