//! Installed-package discovery.
//!
//! Package listings look like
//! `package:/data/app/~~xyz==/com.example-1/base.apk=com.example.app`.
//! The package name is whatever follows the `base.apk=` marker.

use std::collections::HashSet;

use super::error::DeviceError;

pub const PACKAGE_MARKER: &str = "base.apk=";

/// Non-empty, trimmed listing lines.
pub fn parse_listing(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Package name of the single entry present in `after` but not in `before`.
pub fn detect_new_package(before: &[String], after: &[String]) -> Result<String, DeviceError> {
    let known: HashSet<&str> = before.iter().map(String::as_str).collect();
    let mut added: Vec<&str> = after
        .iter()
        .map(String::as_str)
        .filter(|line| !known.contains(line))
        .collect();
    added.dedup();

    let line = match added.as_slice() {
        [line] => *line,
        [] => {
            return Err(DeviceError::Install(
                "no new package found after installation".to_string(),
            ))
        }
        many => {
            return Err(DeviceError::Install(format!(
                "expected one new package after installation, found {}",
                many.len()
            )))
        }
    };

    let idx = line.find(PACKAGE_MARKER).ok_or_else(|| {
        DeviceError::Install(format!("'{}' not found in package line: {}", PACKAGE_MARKER, line))
    })?;

    let package = line[idx + PACKAGE_MARKER.len()..].trim();
    if package.is_empty() {
        return Err(DeviceError::Install(format!(
            "empty package name in line: {}",
            line
        )));
    }
    Ok(package.to_string())
}
