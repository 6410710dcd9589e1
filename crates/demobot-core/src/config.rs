use std::{env, fs, path::Path, time::Duration};

use crate::{errors::Error, Result};

/// Upper bound for command listener execution.
pub const MAX_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);
/// Upper bound for inline (callback query) listener execution.
pub const MAX_INLINE_TIMEOUT: Duration = Duration::from_secs(60);

/// Runtime knobs of the dispatch engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Bot username without the leading `@`. Used to detect mentions of commands.
    pub bot_username: String,
    /// Timeout applied to plain message listeners.
    pub default_listener_timeout: Duration,
    /// How long the worker waits on the outbound queue before it polls for updates.
    pub queue_poll_interval: Duration,
    /// `timeout` argument of the `getUpdates` long poll.
    pub long_poll_timeout: Duration,
    /// Cursor the worker starts from. `0` fetches everything still pending upstream.
    pub initial_offset: i64,
    /// Optional `allowed_updates` filter for the fetch call.
    pub allowed_updates: Option<Vec<String>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bot_username: String::new(),
            default_listener_timeout: Duration::from_secs(300),
            queue_poll_interval: Duration::from_millis(100),
            long_poll_timeout: Duration::from_secs(1),
            initial_offset: 0,
            allowed_updates: None,
        }
    }
}

/// Process-level configuration, loaded from env (+ optional `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    pub telegram_bot_token: String,
    pub telegram_api_url: String,
    pub http_timeout: Duration,
    pub restart_delay: Duration,
    pub engine: EngineConfig,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let bot_username = env_str("TELEGRAM_BOT_USERNAME")
            .map(|s| s.trim().trim_start_matches('@').to_string())
            .unwrap_or_default();
        if bot_username.is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_USERNAME environment variable is required".to_string(),
            ));
        }

        let telegram_api_url = env_str("TELEGRAM_API_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| "https://api.telegram.org".to_string())
            .trim_end_matches('/')
            .to_string();

        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            bot_username,
            default_listener_timeout: env_u64("LISTENER_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_listener_timeout),
            queue_poll_interval: env_u64("QUEUE_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.queue_poll_interval),
            long_poll_timeout: env_u64("LONG_POLL_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.long_poll_timeout),
            initial_offset: env_i64("INITIAL_OFFSET").unwrap_or(defaults.initial_offset),
            allowed_updates: parse_csv(env_str("ALLOWED_UPDATES")),
        };

        // The HTTP client must outlive the long poll, or every idle fetch times out.
        let http_timeout = env_u64("HTTP_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(10))
            .max(engine.long_poll_timeout + Duration::from_secs(5));

        let restart_delay =
            Duration::from_secs(env_u64("RESTART_DELAY_SECS").unwrap_or(5));

        Ok(Self {
            telegram_bot_token,
            telegram_api_url,
            http_timeout,
            restart_delay,
            engine,
        })
    }
}

/// Validate a per-registration timeout against its upper bound.
pub fn check_timeout(timeout: Duration, max: Duration, what: &str) -> Result<()> {
    if timeout.is_zero() {
        return Err(Error::Config(format!("{what} timeout must be positive")));
    }
    if timeout > max {
        return Err(Error::Config(format!(
            "{what} timeout must not exceed {}s (got {}s)",
            max.as_secs(),
            timeout.as_secs_f64()
        )));
    }
    Ok(())
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|s| s.trim().parse::<i64>().ok())
}

fn parse_csv(v: Option<String>) -> Option<Vec<String>> {
    let out = v?
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_bounds_are_enforced() {
        assert!(check_timeout(Duration::from_secs(600), MAX_COMMAND_TIMEOUT, "command").is_ok());
        assert!(matches!(
            check_timeout(Duration::from_secs(601), MAX_COMMAND_TIMEOUT, "command"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            check_timeout(Duration::from_secs(61), MAX_INLINE_TIMEOUT, "inline"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            check_timeout(Duration::ZERO, MAX_INLINE_TIMEOUT, "inline"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn csv_list_drops_blanks() {
        assert_eq!(
            parse_csv(Some("message, callback_query,,".to_string())),
            Some(vec!["message".to_string(), "callback_query".to_string()])
        );
        assert_eq!(parse_csv(Some(" , ".to_string())), None);
        assert_eq!(parse_csv(None), None);
    }

    #[test]
    fn default_engine_config_starts_from_the_beginning() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.initial_offset, 0);
        assert!(cfg.default_listener_timeout <= MAX_COMMAND_TIMEOUT);
    }
}
