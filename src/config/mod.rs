pub mod schema;

#[allow(unused_imports)]
pub use schema::{
    mask_secret, BotConfig, Config, SessionsConfig, TelegramConfig, CONFIG_DIR_ENV,
    TELEGRAM_MAX_MESSAGE_LENGTH,
};
