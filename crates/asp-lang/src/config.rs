use std::{env, path::PathBuf, time::Duration};

use crate::eval::Options;

#[derive(Debug, Clone)]
pub struct Config {
    pub script_timeout: Duration,
    pub max_call_depth: u32,
    pub option_base: i64,
    /// Directory `Server.MapPath` resolves against.
    pub root_dir: PathBuf,
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for Config {
    fn default() -> Self {
        let options = Options::default();
        Self {
            script_timeout: options.timeout.unwrap_or(Duration::from_secs(90)),
            max_call_depth: options.max_call_stack_depth,
            option_base: options.option_base,
            root_dir: PathBuf::from("."),
            log_level: "asp_lang=info,asp_run=info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(timeout_str) = env::var("ASP_SCRIPT_TIMEOUT") {
            if let Ok(seconds) = timeout_str.parse::<u64>() {
                config.script_timeout = Duration::from_secs(seconds);
            } else {
                eprintln!(
                    "Warning: Invalid ASP_SCRIPT_TIMEOUT value '{}', using default {}",
                    timeout_str,
                    config.script_timeout.as_secs()
                );
            }
        }

        if let Ok(depth_str) = env::var("ASP_MAX_CALL_DEPTH") {
            match depth_str.parse::<u32>() {
                Ok(depth) if depth > 0 => config.max_call_depth = depth,
                _ => eprintln!(
                    "Warning: Invalid ASP_MAX_CALL_DEPTH value '{}', using default {}",
                    depth_str, config.max_call_depth
                ),
            }
        }

        if let Ok(base_str) = env::var("ASP_OPTION_BASE") {
            match base_str.trim() {
                "0" => config.option_base = 0,
                "1" => config.option_base = 1,
                _ => eprintln!(
                    "Warning: Invalid ASP_OPTION_BASE value '{}', using default {}",
                    base_str, config.option_base
                ),
            }
        }

        if let Ok(root_dir) = env::var("ASP_ROOT_DIR") {
            config.root_dir = PathBuf::from(root_dir);
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            config.log_level = log_level;
        } else if let Ok(log_level) = env::var("ASP_LOG_LEVEL") {
            config.log_level = log_level;
        }

        if let Ok(log_format) = env::var("ASP_LOG_FORMAT") {
            config.log_format = match log_format.to_lowercase().as_str() {
                "text" | "plain" => LogFormat::Text,
                "json" => LogFormat::Json,
                _ => {
                    eprintln!(
                        "Warning: Invalid ASP_LOG_FORMAT value '{}', using default text",
                        log_format
                    );
                    LogFormat::Text
                }
            };
        }

        config
    }

    pub fn options(&self) -> Options {
        Options::from(self)
    }
}

impl From<&Config> for Options {
    fn from(config: &Config) -> Self {
        Options {
            max_call_stack_depth: config.max_call_depth,
            timeout: Some(config.script_timeout),
            option_base: config.option_base,
        }
    }
}
