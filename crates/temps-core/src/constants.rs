use once_cell::sync::Lazy;

pub const DOCKER_LABEL_PREFIX: &str = "temps.";

/// Default docker network name - configurable via TEMPS_NETWORK_NAME environment variable
/// Defaults to "temps-app-network" if not set
pub static NETWORK_NAME: Lazy<String> = Lazy::new(|| {
    std::env::var("TEMPS_NETWORK_NAME").unwrap_or_else(|_| "temps-app-network".to_string())
});

/// Build a fully qualified docker label key, e.g. `temps.managed`
pub fn docker_label(key: &str) -> String {
    format!("{}{}", DOCKER_LABEL_PREFIX, key)
}
