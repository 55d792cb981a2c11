//! config-rs/lib.rs
//! Shared configuration utilities for consistent service configuration
//! Provides standardized functions for port/address management and dataset paths

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Get service port from environment variables with proper fallback
///
/// # Arguments
/// * `service_name` - The name of the service (e.g., "ASK")
/// * `default_port` - The default port to use if not specified in environment
///
/// # Returns
/// The port number to use for the service
pub fn get_service_port(service_name: &str, default_port: u16) -> u16 {
    let var_name = format!("{}_SERVICE_PORT", service_name.to_uppercase());
    env::var(&var_name)
        .unwrap_or_else(|_| default_port.to_string())
        .parse::<u16>()
        .unwrap_or_else(|_| {
            log::warn!("Invalid port in {}, using default {}", var_name, default_port);
            default_port
        })
}

/// Create a SocketAddr for binding a service
///
/// Checks `{SERVICE}_SERVICE_ADDR` for a full address override first, then
/// falls back to `{SERVICE}_SERVICE_PORT` on 0.0.0.0.
pub fn get_bind_address(service_name: &str, default_port: u16) -> SocketAddr {
    let var_name = format!("{}_SERVICE_ADDR", service_name.to_uppercase());

    if let Ok(addr_str) = env::var(&var_name) {
        if let Ok(addr) = addr_str.parse::<SocketAddr>() {
            return addr;
        }
        log::warn!("Invalid address format in {}, using default", var_name);
    }

    let port = get_service_port(service_name, default_port);
    format!("0.0.0.0:{}", port).parse().unwrap()
}

/// Get service name for logging and monitoring
pub fn get_formatted_service_name(service_name: &str) -> String {
    match service_name.to_uppercase().as_str() {
        "ASK" => "ask-service".to_string(),
        _ => format!("{}-service", service_name.to_lowercase()),
    }
}

/// Directory holding the election dataset CSV files.
///
/// Defaults to `./data` when `DATASET_DIR` is unset.
pub fn get_dataset_dir() -> PathBuf {
    env::var("DATASET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

/// Read an environment variable with a typed default.
pub fn get_env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_service_port() {
        // Test with environment variable
        std::env::set_var("TEST_SERVICE_PORT", "9000");
        assert_eq!(get_service_port("TEST", 8000), 9000);

        // Test with default
        std::env::remove_var("UNKNOWN_SERVICE_PORT");
        assert_eq!(get_service_port("UNKNOWN", 8000), 8000);

        // Malformed value falls back to default
        std::env::set_var("BROKEN_SERVICE_PORT", "not-a-port");
        assert_eq!(get_service_port("BROKEN", 8000), 8000);
        std::env::remove_var("TEST_SERVICE_PORT");
        std::env::remove_var("BROKEN_SERVICE_PORT");
    }

    #[test]
    fn test_get_bind_address() {
        std::env::set_var("BINDTEST_SERVICE_ADDR", "127.0.0.1:9100");
        assert_eq!(
            get_bind_address("BINDTEST", 8000),
            "127.0.0.1:9100".parse::<SocketAddr>().unwrap()
        );
        std::env::remove_var("BINDTEST_SERVICE_ADDR");

        std::env::remove_var("NOADDR_SERVICE_PORT");
        assert_eq!(
            get_bind_address("NOADDR", 8000),
            "0.0.0.0:8000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_get_formatted_service_name() {
        assert_eq!(get_formatted_service_name("ASK"), "ask-service");
        assert_eq!(get_formatted_service_name("other"), "other-service");
    }

    #[test]
    fn test_get_env_or() {
        std::env::remove_var("MISSING_NUMERIC");
        assert_eq!(get_env_or("MISSING_NUMERIC", 42u64), 42);
        std::env::set_var("PRESENT_NUMERIC", "7");
        assert_eq!(get_env_or("PRESENT_NUMERIC", 42u64), 7);
        std::env::remove_var("PRESENT_NUMERIC");
    }
}
