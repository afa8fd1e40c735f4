//! Lenient host-version parsing for descriptor minimum-version checks.

use semver::Version;

use modhost_core::error::AppError;
use modhost_core::result::AppResult;

/// Parses a version, accepting forms such as `4.1` or `4.1.0 Alpha`.
///
/// Strict semver is tried first; otherwise the leading dotted numeric part
/// of the first token is taken and padded to three components.
pub fn parse_lenient(raw: &str) -> AppResult<Version> {
    let token = raw.split_whitespace().next().unwrap_or_default();
    if let Ok(version) = Version::parse(token) {
        return Ok(version);
    }

    let mut parts = [0u64; 3];
    let mut found = 0;
    for (slot, segment) in parts.iter_mut().zip(token.split('.')) {
        let digits: String = segment.chars().take_while(char::is_ascii_digit).collect();
        if digits.is_empty() {
            break;
        }
        *slot = digits
            .parse()
            .map_err(|_| AppError::version(format!("Version component too large in '{raw}'")))?;
        found += 1;
        if digits.len() != segment.len() {
            break;
        }
    }

    if found == 0 {
        return Err(AppError::version(format!("Unrecognized version '{raw}'")));
    }
    Ok(Version::new(parts[0], parts[1], parts[2]))
}

/// Whether `required` is newer than the running `current` version.
pub fn requires_newer_host(required: &Version, current: &Version) -> bool {
    required > current
}
