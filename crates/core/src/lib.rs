pub mod config;
pub mod domain;
pub mod random;

pub use config::{
    AppConfig, ConfigError, ConfigOverrides, GameConfig, LoadOptions, LogFormat, LoggingConfig,
    SlackConfig,
};
pub use domain::{BotIdentity, Channel, ChannelId, Participant, UserId};
pub use random::{Picker, SequencePicker, ThreadRngPicker};
