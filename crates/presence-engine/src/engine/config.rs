use presence_common::{AppConfig, FanoutConfig, PresenceConfig, TypingConfig};

/// The slices of [`AppConfig`] the engine reads
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub presence: PresenceConfig,
    pub typing: TypingConfig,
    pub fanout: FanoutConfig,
}

impl From<&AppConfig> for EngineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            presence: config.presence.clone(),
            typing: config.typing.clone(),
            fanout: config.fanout.clone(),
        }
    }
}
