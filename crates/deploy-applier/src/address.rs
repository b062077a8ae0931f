//! Dashboard address validation

use common::error::{Error, Result};

fn invalid_address(address: &str) -> Error {
    Error::ConfigValidation(format!(
        "Got an unexpected address \"{}\" while trying to connect to the Ray dashboard. \
         The deploy tool requires the dashboard's HTTP(S) address, which should start \
         with \"http://\" or \"https://\". If this address wasn't passed explicitly, it \
         may be set in the RAY_DASHBOARD_ADDRESS environment variable.",
        address
    ))
}

/// Checks that `address` is an `http://` or `https://` URL
///
/// Returns the address without trailing slashes. Nothing is sent over the
/// network.
pub fn validate_dashboard_address(address: &str) -> Result<String> {
    let (scheme, rest) = address
        .split_once("://")
        .ok_or_else(|| invalid_address(address))?;

    if scheme != "http" && scheme != "https" {
        return Err(invalid_address(address));
    }

    if rest.trim_end_matches('/').is_empty() {
        return Err(invalid_address(address));
    }

    Ok(address.trim_end_matches('/').to_string())
}
