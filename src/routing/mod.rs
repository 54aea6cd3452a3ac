//! SSH routing table derived from stack outputs.
//!
//! The table always opens with a wildcard block carrying the baseline
//! options. OpenSSH keeps the first value it sees for each option, so host
//! blocks only ever set `Hostname` and `ProxyCommand`, which the wildcard
//! block never sets.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::stack::{FLOATING_IP_OUTPUT, StackOutputs};

/// Alias under which the shared public address is published.
pub const GATEWAY_ALIAS: &str = "gateway";

/// A provisioned host addressed by its role.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Host {
    /// Role name taken from the output key.
    pub role: String,
    /// Address taken from the output value.
    pub address: String,
}

/// What a routing rule applies to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RuleTarget {
    /// Every host (`Host *`).
    Default,
    /// The synthetic alias for the shared public address.
    Gateway,
    /// A single provisioned host.
    Host(Host),
}

impl RuleTarget {
    /// Pattern written after the `Host` keyword.
    #[must_use]
    pub fn pattern(&self) -> &str {
        match self {
            Self::Default => "*",
            Self::Gateway => GATEWAY_ALIAS,
            Self::Host(host) => &host.role,
        }
    }
}

/// A single block of the routing document.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RoutingRule {
    /// Hosts the block applies to.
    pub target: RuleTarget,
    /// Address to connect to, absent for the default block.
    pub hostname: Option<String>,
    /// Shared address to tunnel through.
    pub proxy_via: Option<String>,
    /// Key presented during authentication.
    pub identity_file: Option<Utf8PathBuf>,
    /// Operator user for the connection or the tunnel.
    pub user: String,
}

impl fmt::Display for RoutingRule {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(formatter, "Host {}", self.target.pattern())?;
        if matches!(self.target, RuleTarget::Default) {
            writeln!(formatter, "  User {}", self.user)?;
            formatter.write_str("  ForwardAgent yes\n")?;
            formatter.write_str("  UserKnownHostsFile /dev/null\n")?;
            formatter.write_str("  StrictHostKeyChecking no\n")?;
            formatter.write_str("  PasswordAuthentication no\n")?;
            if let Some(identity) = &self.identity_file {
                writeln!(formatter, "  IdentityFile {identity}")?;
            }
        }
        if let Some(hostname) = &self.hostname {
            writeln!(formatter, "  Hostname {hostname}")?;
        }
        if let Some(proxy) = &self.proxy_via {
            writeln!(
                formatter,
                "  ProxyCommand ssh -W %h:%p -o StrictHostKeyChecking=no {}@{proxy}",
                self.user
            )?;
        }
        Ok(())
    }
}

/// Errors raised when stack outputs cannot be turned into routing rules.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RoutingError {
    /// Raised when the operator user is blank or unsafe.
    #[error("invalid operator user '{0}'")]
    InvalidUser(String),
    /// Raised when an output key cannot serve as a host alias.
    #[error("output '{role}' cannot be used as a host alias")]
    InvalidRole {
        /// Offending output key.
        role: String,
    },
    /// Raised when an output value is not a usable address.
    #[error("output '{key}' carries an invalid address '{value}'")]
    InvalidAddress {
        /// Output key.
        key: String,
        /// Offending value.
        value: String,
    },
    /// Raised when a host role collides with the gateway alias.
    #[error("output '{GATEWAY_ALIAS}' collides with the gateway alias")]
    ReservedAlias,
}

/// Ordered routing rules plus the addresses the readiness gate must reach.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RoutingTable {
    rules: Vec<RoutingRule>,
    hosts: Vec<Host>,
    gateway: Option<String>,
    private_key: Option<String>,
}

impl RoutingTable {
    /// Builds the table for `outputs`, connecting as `user`. When the outputs
    /// carry a private key the default block points at `key_path`, where the
    /// caller is expected to persist it.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError`] when the user, a role, or an address would
    /// produce an unsafe or ambiguous document.
    pub fn build(
        outputs: &StackOutputs,
        user: &str,
        key_path: &Utf8Path,
    ) -> Result<Self, RoutingError> {
        if !is_safe_token(user) {
            return Err(RoutingError::InvalidUser(user.to_owned()));
        }
        let gateway = outputs
            .floating_ip()
            .map(|address| validate_address(FLOATING_IP_OUTPUT, address))
            .transpose()?;
        let private_key = outputs
            .private_key()
            .filter(|key| !key.trim().is_empty())
            .map(str::to_owned);

        let hosts = outputs
            .hosts()
            .map(|(role, address)| {
                if !is_safe_alias(role) {
                    return Err(RoutingError::InvalidRole {
                        role: role.to_owned(),
                    });
                }
                if gateway.is_some() && role == GATEWAY_ALIAS {
                    return Err(RoutingError::ReservedAlias);
                }
                Ok(Host {
                    role: role.to_owned(),
                    address: validate_address(role, address)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut rules = Vec::with_capacity(hosts.len() + 2);
        rules.push(RoutingRule {
            target: RuleTarget::Default,
            hostname: None,
            proxy_via: None,
            identity_file: private_key.as_ref().map(|_| key_path.to_path_buf()),
            user: user.to_owned(),
        });
        if let Some(address) = &gateway {
            rules.push(RoutingRule {
                target: RuleTarget::Gateway,
                hostname: Some(address.clone()),
                proxy_via: None,
                identity_file: None,
                user: user.to_owned(),
            });
        }
        rules.extend(hosts.iter().map(|host| RoutingRule {
            target: RuleTarget::Host(host.clone()),
            hostname: Some(host.address.clone()),
            proxy_via: gateway.clone(),
            identity_file: None,
            user: user.to_owned(),
        }));

        Ok(Self {
            rules,
            hosts,
            gateway,
            private_key,
        })
    }

    /// Rules in emission order; the default rule is always first.
    #[must_use]
    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    /// Hosts in ascending role order.
    #[must_use]
    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    /// Shared public address, when the stack published one.
    #[must_use]
    pub fn gateway(&self) -> Option<&str> {
        self.gateway.as_deref()
    }

    /// Generated private key, when the stack published one.
    #[must_use]
    pub fn private_key(&self) -> Option<&str> {
        self.private_key.as_deref()
    }

    /// Addresses that must answer before the hand-off. Traffic to private
    /// hosts flows through the gateway, so when one exists it is the only
    /// address that needs proving.
    #[must_use]
    pub fn readiness_targets(&self) -> Vec<String> {
        self.gateway.as_ref().map_or_else(
            || {
                let mut addresses: Vec<String> =
                    self.hosts.iter().map(|host| host.address.clone()).collect();
                addresses.sort();
                addresses.dedup();
                addresses
            },
            |gateway| vec![gateway.clone()],
        )
    }

    /// Renders the routing document.
    #[must_use]
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RoutingTable {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, rule) in self.rules.iter().enumerate() {
            if index > 0 {
                formatter.write_str("\n")?;
            }
            write!(formatter, "{rule}")?;
        }
        Ok(())
    }
}

fn validate_address(key: &str, value: &str) -> Result<String, RoutingError> {
    let trimmed = value.trim();
    if is_safe_token(trimmed) {
        Ok(trimmed.to_owned())
    } else {
        Err(RoutingError::InvalidAddress {
            key: key.to_owned(),
            value: value.to_owned(),
        })
    }
}

fn is_safe_token(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|ch| !ch.is_whitespace() && !ch.is_control() && !matches!(ch, '"' | '#'))
}

fn is_safe_alias(value: &str) -> bool {
    is_safe_token(value) && !value.contains(['*', '?', '!', ','])
}
