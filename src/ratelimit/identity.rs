//! Identity resolution and the store key namespace.

use std::fmt;

/// The principal a quota is tracked against.
///
/// A token always wins over an IP; the two never share a counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// An API token taken from the request credentials
    Token(String),
    /// The client address
    Ip(String),
}

impl Identity {
    /// Pick the identity for a request: the token if non-empty, else the IP.
    ///
    /// Returns `None` when both are empty.
    pub fn resolve(ip: &str, token: &str) -> Option<Self> {
        if !token.is_empty() {
            Some(Identity::Token(token.to_string()))
        } else if !ip.is_empty() {
            Some(Identity::Ip(ip.to_string()))
        } else {
            None
        }
    }

    /// The kind segment used in store keys.
    pub fn kind(&self) -> &'static str {
        match self {
            Identity::Token(_) => "token",
            Identity::Ip(_) => "ip",
        }
    }

    /// The raw token or address.
    pub fn value(&self) -> &str {
        match self {
            Identity::Token(v) | Identity::Ip(v) => v,
        }
    }

    /// Key of the usage counter, e.g. `limit:ip:10.0.0.1`.
    pub fn usage_key(&self) -> String {
        format!("limit:{}:{}", self.kind(), self.value())
    }

    /// Key of the per-identity limit override, e.g. `config:token:abc:limit`.
    pub fn limit_override_key(&self) -> String {
        format!("config:{}:{}:limit", self.kind(), self.value())
    }

    /// Key of the per-identity window override, e.g. `config:token:abc:expiration`.
    pub fn window_override_key(&self) -> String {
        format!("config:{}:{}:expiration", self.kind(), self.value())
    }
}

/// Tokens are credentials, so only a short prefix is ever displayed.
impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Ip(ip) => write!(f, "ip:{}", ip),
            Identity::Token(token) => {
                let prefix: String = token.chars().take(4).collect();
                if prefix.len() < token.len() {
                    write!(f, "token:{}***", prefix)
                } else {
                    write!(f, "token:***")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_takes_precedence() {
        let identity = Identity::resolve("1.2.3.4", "T").unwrap();
        assert_eq!(identity, Identity::Token("T".to_string()));
    }

    #[test]
    fn test_ip_used_without_token() {
        let identity = Identity::resolve("192.168.0.1", "").unwrap();
        assert_eq!(identity, Identity::Ip("192.168.0.1".to_string()));
    }

    #[test]
    fn test_empty_identity() {
        assert!(Identity::resolve("", "").is_none());
    }

    #[test]
    fn test_key_namespace() {
        let ip = Identity::Ip("10.0.0.1".to_string());
        assert_eq!(ip.usage_key(), "limit:ip:10.0.0.1");
        assert_eq!(ip.limit_override_key(), "config:ip:10.0.0.1:limit");
        assert_eq!(ip.window_override_key(), "config:ip:10.0.0.1:expiration");

        let token = Identity::Token("abc123".to_string());
        assert_eq!(token.usage_key(), "limit:token:abc123");
        assert_eq!(token.limit_override_key(), "config:token:abc123:limit");
        assert_eq!(token.window_override_key(), "config:token:abc123:expiration");
    }

    #[test]
    fn test_display_redacts_tokens() {
        assert_eq!(Identity::Ip("10.0.0.1".to_string()).to_string(), "ip:10.0.0.1");
        assert_eq!(
            Identity::Token("secret-token".to_string()).to_string(),
            "token:secr***"
        );
        assert_eq!(Identity::Token("abc".to_string()).to_string(), "token:***");
    }
}
