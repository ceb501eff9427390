//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Required fields per transport kind (url for network kinds, command for process)
//! - Prefix uniqueness across entries
//! - Validate value ranges (retry > 0, timeout_secs > 0, urls parse with a matching scheme)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: Config → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system; one bad entry rejects the file

use std::collections::HashMap;

use thiserror::Error;
use url::Url;

use crate::config::schema::{Config, TransportKind};

/// A single semantic violation in the topology description.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("server.name must not be empty")]
    EmptyServerName,

    #[error("server.host must not be empty")]
    EmptyHost,

    #[error("mcpServers.{entry}: prefix must not be empty")]
    EmptyPrefix { entry: String },

    #[error("mcpServers.{entry}: prefix '{prefix}' is already used by mcpServers.{first}")]
    DuplicatePrefix {
        entry: String,
        prefix: String,
        first: String,
    },

    #[error("mcpServers.{entry}: type '{kind}' requires a url")]
    MissingUrl { entry: String, kind: TransportKind },

    #[error("mcpServers.{entry}: invalid url '{url}': {reason}")]
    InvalidUrl {
        entry: String,
        url: String,
        reason: String,
    },

    #[error("mcpServers.{entry}: type 'process' requires a command")]
    MissingCommand { entry: String },

    #[error("mcpServers.{entry}: retry must be at least 1")]
    ZeroRetry { entry: String },

    #[error("mcpServers.{entry}: timeout_secs must be at least 1")]
    ZeroTimeout { entry: String },
}

/// Validate a parsed configuration, collecting every violation.
pub fn validate_config(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.name.trim().is_empty() {
        errors.push(ValidationError::EmptyServerName);
    }
    if config.server.host.trim().is_empty() {
        errors.push(ValidationError::EmptyHost);
    }

    let mut seen_prefixes: HashMap<&str, &str> = HashMap::new();

    for (entry, descriptor) in config.mcp_servers.iter() {
        let prefix = descriptor.prefix.trim();
        if prefix.is_empty() {
            errors.push(ValidationError::EmptyPrefix {
                entry: entry.to_string(),
            });
        } else if let Some(first) = seen_prefixes.get(prefix) {
            errors.push(ValidationError::DuplicatePrefix {
                entry: entry.to_string(),
                prefix: prefix.to_string(),
                first: first.to_string(),
            });
        } else {
            seen_prefixes.insert(prefix, entry);
        }

        if descriptor.kind.is_network() {
            match descriptor.url.as_deref().map(str::trim) {
                None | Some("") => errors.push(ValidationError::MissingUrl {
                    entry: entry.to_string(),
                    kind: descriptor.kind,
                }),
                Some(url) => {
                    if let Err(reason) = check_url(descriptor.kind, url) {
                        errors.push(ValidationError::InvalidUrl {
                            entry: entry.to_string(),
                            url: url.to_string(),
                            reason,
                        });
                    }
                }
            }
        }

        if descriptor.kind == TransportKind::Process
            && descriptor.command.as_deref().map_or(true, |c| c.trim().is_empty())
        {
            errors.push(ValidationError::MissingCommand {
                entry: entry.to_string(),
            });
        }

        if descriptor.retry == 0 {
            errors.push(ValidationError::ZeroRetry {
                entry: entry.to_string(),
            });
        }
        if descriptor.timeout_secs == 0 {
            errors.push(ValidationError::ZeroTimeout {
                entry: entry.to_string(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(kind: TransportKind, raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    let allowed: &[&str] = match kind {
        TransportKind::Http | TransportKind::Https => &["http", "https"],
        TransportKind::Websocket => &["ws", "wss"],
        _ => return Ok(()),
    };
    if allowed.contains(&url.scheme()) {
        Ok(())
    } else {
        Err(format!(
            "scheme '{}' does not match type '{}'",
            url.scheme(),
            kind
        ))
    }
}
