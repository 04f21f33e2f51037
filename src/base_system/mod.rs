pub mod config;
pub mod context;
pub mod cooldown_retry;
pub mod json_extract;
pub mod logging;
pub mod script_convert;
pub mod text_utils;
