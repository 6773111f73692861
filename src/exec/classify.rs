// src/exec/classify.rs

//! Failure classification.
//!
//! Classification is syntactic by contract: a substring match on the last
//! non-debug line of the agent stream. The pattern table below *is* the
//! contract — an agent failure whose message matches any entry is
//! external (environment trouble: network, permissions, certificates,
//! package installation, lockfile contention, DNS, saturation) and stops
//! the run; anything else is internal and only fails the task.

use serde::Serialize;

/// Where the blame for a task failure lies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The agent failed logically; other tasks keep running.
    Internal,
    /// The environment failed; the run enters graceful stop.
    External,
    /// No message survived to classify.
    Unknown,
}

/// Case-insensitive substrings marking a failure as external.
const EXTERNAL_PATTERNS: &[&str] = &[
    // network
    "network",
    "econnrefused",
    "econnreset",
    "etimedout",
    "enotfound",
    "eai_again",
    "socket hang up",
    "dns",
    "timed out",
    // permissions
    "permission denied",
    "eacces",
    "eperm",
    // certificates
    "certificate",
    "self-signed",
    "ssl",
    "tls",
    // package installation
    "npm install",
    "npm err",
    "yarn install",
    "pnpm install",
    "could not resolve dependencies",
    // lockfile contention
    "lockfile",
    "ebusy",
    // provider saturation
    "rate limit",
    "429",
    "overloaded",
    "quota",
];

/// Classify a failure from the last non-debug line of the agent stream.
pub fn classify_failure(last_line: Option<&str>) -> FailureKind {
    let Some(line) = last_line else {
        return FailureKind::Unknown;
    };
    let lower = line.to_lowercase();
    if EXTERNAL_PATTERNS.iter().any(|p| lower.contains(p)) {
        FailureKind::External
    } else {
        FailureKind::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_are_external() {
        assert_eq!(
            classify_failure(Some("network: ETIMEDOUT")),
            FailureKind::External
        );
        assert_eq!(
            classify_failure(Some("getaddrinfo ENOTFOUND registry.npmjs.org")),
            FailureKind::External
        );
    }

    #[test]
    fn permission_and_certificate_errors_are_external() {
        assert_eq!(
            classify_failure(Some("EACCES: permission denied, open '/etc/x'")),
            FailureKind::External
        );
        assert_eq!(
            classify_failure(Some("unable to verify the first certificate")),
            FailureKind::External
        );
    }

    #[test]
    fn plain_logic_failures_are_internal() {
        assert_eq!(
            classify_failure(Some("assertion failed: expected 3, got 4")),
            FailureKind::Internal
        );
        assert_eq!(
            classify_failure(Some("the agent gave up")),
            FailureKind::Internal
        );
    }

    #[test]
    fn missing_message_is_unknown() {
        assert_eq!(classify_failure(None), FailureKind::Unknown);
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(
            classify_failure(Some("Rate Limit exceeded")),
            FailureKind::External
        );
    }
}
