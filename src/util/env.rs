//! Environment helpers: centralized dotenv loading and ergonomic getters.
//! Call `init_env()` once early in each binary (or rely on lazy Once).
use std::str::FromStr;
use std::sync::Once;
use tracing::{info, warn};

static INIT: Once = Once::new();

pub const DEFAULT_DB_NAME: &str = "letterboxd";

/// Load .env exactly once. Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        let _ = dotenv::dotenv();
    });
}

/// Common bootstrap for the pipeline binaries: load .env and report which
/// store settings were found, without echoing any credentials.
pub fn bootstrap_cli(bin_name: &str) {
    init_env();

    match mongo_url() {
        Ok(_) => info!(target = "bootstrap", bin = bin_name, "store URI detected"),
        Err(_) => warn!(
            target = "bootstrap",
            bin = bin_name,
            "no store URI configured; set MONGODB_URI / MONGO_URL / DATABASE_URL"
        ),
    }
    if tmdb_api_key().is_none() {
        warn!(
            target = "bootstrap",
            bin = bin_name,
            "TMDB_API_KEY not set; enrichment phase will be skipped"
        );
    }
}

/// Get optional env var (None if unset or empty).
pub fn env_opt(key: &str) -> Option<String> {
    init_env();
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Get parsed value with default fallback.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Clone,
{
    init_env();
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Boolean flag; accepts 1/true/on/yes (case-insensitive) as true.
pub fn env_flag(key: &str, default: bool) -> bool {
    init_env();
    match std::env::var(key) {
        Ok(raw) => {
            let v = raw.trim().to_ascii_lowercase();
            matches!(v.as_str(), "1" | "true" | "on" | "yes")
        }
        Err(_) => default,
    }
}

/// Optional parsed value.
pub fn env_parse_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    init_env();
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Store connection string (tries specific -> generic). Returns first found.
pub fn mongo_url() -> anyhow::Result<String> {
    for k in ["MONGODB_URI", "MONGO_URL", "DATABASE_URL"] {
        if let Some(v) = env_opt(k) {
            return Ok(v);
        }
    }
    Err(anyhow::anyhow!("no store URI env vars set"))
}

/// Database name holding the `movies` and `ratings` collections.
pub fn mongo_db_name() -> String {
    env_opt("MONGODB_DB")
        .or_else(|| env_opt("DB_NAME"))
        .unwrap_or_else(|| DEFAULT_DB_NAME.to_string())
}

/// Static credential for the enrichment API.
pub fn tmdb_api_key() -> Option<String> {
    env_opt("TMDB_API_KEY").or_else(|| env_opt("TMDB_KEY"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_falls_back_on_garbage() {
        std::env::set_var("FH_TEST_PARSE_GARBAGE", "twelve");
        assert_eq!(env_parse("FH_TEST_PARSE_GARBAGE", 12usize), 12);
        std::env::set_var("FH_TEST_PARSE_GARBAGE", " 7 ");
        assert_eq!(env_parse("FH_TEST_PARSE_GARBAGE", 12usize), 7);
    }

    #[test]
    fn blank_values_are_treated_as_unset() {
        std::env::set_var("FH_TEST_BLANK", "   ");
        assert!(env_opt("FH_TEST_BLANK").is_none());
    }

    #[test]
    fn flag_accepts_common_truthy_spellings() {
        for raw in ["1", "true", "ON", "yes"] {
            std::env::set_var("FH_TEST_FLAG", raw);
            assert!(env_flag("FH_TEST_FLAG", false), "{raw} should be truthy");
        }
        std::env::set_var("FH_TEST_FLAG", "nope");
        assert!(!env_flag("FH_TEST_FLAG", true));
    }
}
