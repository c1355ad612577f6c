//! Configuration for k8s-ldap-auth
//!
//! Settings are collected into a mutable [`ConfigBuilder`] (flags, environment,
//! secret file) and frozen into a validated [`ServerConfiguration`] once at
//! startup. Nothing downstream can observe a configuration that failed
//! validation.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tracing::debug;

use crate::{Error, Result};

/// Default listening port
pub const DEFAULT_PORT: u16 = 3000;

/// Default directory URL
pub const DEFAULT_DIRECTORY_URL: &str = "ldap://localhost";

/// Default user search filter
pub const DEFAULT_SEARCH_FILTER: &str = "(&(objectClass=inetOrgPerson)(uid=%s))";

/// Default attribute holding group entitlements
pub const DEFAULT_MEMBER_OF_PROPERTY: &str = "ismemberof";

/// Fallback location of the service account password
pub const BIND_CREDENTIALS_FILE: &str = "/etc/k8s-ldap-auth/ldap/password";

/// Substitution token for the principal in the search filter
pub const PRINCIPAL_PLACEHOLDER: &str = "%s";

/// Attributes always fetched for a user, in this order
pub const MANDATORY_ATTRIBUTES: [&str; 3] = ["uid", "dn", "cn"];

// ============================================================================
// Search scope
// ============================================================================

/// Breadth of the user search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchScope {
    /// The base entry only
    Base,
    /// One level below the base entry
    SingleLevel,
    /// The whole subtree
    #[default]
    Subtree,
}

impl SearchScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchScope::Base => "base",
            SearchScope::SingleLevel => "single",
            SearchScope::Subtree => "sub",
        }
    }
}

impl FromStr for SearchScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base" => Ok(SearchScope::Base),
            "single" => Ok(SearchScope::SingleLevel),
            "sub" => Ok(SearchScope::Subtree),
            other => Err(Error::config(format!(
                "unknown search scope '{}', expected one of: base, single, sub",
                other
            ))),
        }
    }
}

impl fmt::Display for SearchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<SearchScope> for ldap3::Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => ldap3::Scope::Base,
            SearchScope::SingleLevel => ldap3::Scope::OneLevel,
            SearchScope::Subtree => ldap3::Scope::Subtree,
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Raw, unvalidated settings as gathered from the command line and environment.
#[derive(Clone)]
pub struct ConfigBuilder {
    pub listen_host: String,
    pub listen_port: u16,
    pub directory_url: String,
    pub bind_dn: String,
    pub bind_credentials: String,
    pub search_base: String,
    pub search_scope: SearchScope,
    pub search_filter: String,
    pub member_of_property: String,
    pub search_attributes: Vec<String>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            listen_host: String::new(),
            listen_port: DEFAULT_PORT,
            directory_url: DEFAULT_DIRECTORY_URL.to_string(),
            bind_dn: String::new(),
            bind_credentials: String::new(),
            search_base: String::new(),
            search_scope: SearchScope::default(),
            search_filter: DEFAULT_SEARCH_FILTER.to_string(),
            member_of_property: DEFAULT_MEMBER_OF_PROPERTY.to_string(),
            search_attributes: MANDATORY_ATTRIBUTES.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl fmt::Debug for ConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigBuilder")
            .field("listen_host", &self.listen_host)
            .field("listen_port", &self.listen_port)
            .field("directory_url", &self.directory_url)
            .field("bind_dn", &self.bind_dn)
            .field("bind_credentials", &redacted(&self.bind_credentials))
            .field("search_base", &self.search_base)
            .field("search_scope", &self.search_scope)
            .field("search_filter", &self.search_filter)
            .field("member_of_property", &self.member_of_property)
            .field("search_attributes", &self.search_attributes)
            .finish()
    }
}

impl ConfigBuilder {
    /// Validate the settings and freeze them.
    pub fn build(self) -> Result<ServerConfiguration> {
        if self.bind_dn.trim().is_empty() {
            return Err(Error::config("bind DN is required"));
        }

        if self.bind_credentials.is_empty() {
            return Err(Error::config(format!(
                "bind credentials are required (flag, environment or {})",
                BIND_CREDENTIALS_FILE
            )));
        }

        if !self.directory_url.starts_with("ldap://") && !self.directory_url.starts_with("ldaps://")
        {
            return Err(Error::config(format!(
                "directory URL must start with ldap:// or ldaps://, got '{}'",
                self.directory_url
            )));
        }

        let placeholders = self.search_filter.matches(PRINCIPAL_PLACEHOLDER).count();
        if placeholders != 1 {
            return Err(Error::config(format!(
                "search filter must contain exactly one {} placeholder, found {}",
                PRINCIPAL_PLACEHOLDER, placeholders
            )));
        }

        if self.member_of_property.trim().is_empty() {
            return Err(Error::config("member-of property must not be empty"));
        }

        Ok(ServerConfiguration {
            listen_host: self.listen_host,
            listen_port: self.listen_port,
            directory_url: self.directory_url,
            bind_dn: self.bind_dn,
            bind_credentials: self.bind_credentials,
            search_base: self.search_base,
            search_scope: self.search_scope,
            search_filter: self.search_filter,
            member_of_property: self.member_of_property,
            search_attributes: normalize_attributes(self.search_attributes),
        })
    }
}

/// Mandatory attributes first, then the extras in the order given, without
/// duplicates or blanks.
fn normalize_attributes(requested: Vec<String>) -> Vec<String> {
    let mut attributes: Vec<String> = MANDATORY_ATTRIBUTES.iter().map(|a| a.to_string()).collect();

    for attr in requested {
        let attr = attr.trim();
        if attr.is_empty() || attributes.iter().any(|a| a == attr) {
            continue;
        }
        attributes.push(attr.to_string());
    }

    attributes
}

/// Resolve the service account password.
///
/// An explicit value wins. Otherwise `path` is read and trailing line breaks
/// are dropped. A missing file resolves to an empty value and is left for
/// [`ConfigBuilder::build`] to reject.
pub fn resolve_bind_credentials(explicit: Option<String>, path: &Path) -> Result<String> {
    if let Some(value) = explicit.filter(|v| !v.is_empty()) {
        return Ok(value);
    }

    match std::fs::read_to_string(path) {
        Ok(content) => {
            debug!("Read bind credentials from {}", path.display());
            Ok(content.trim_end_matches(['\r', '\n']).to_string())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(Error::SecretFile {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "<redacted>"
    }
}

// ============================================================================
// Validated configuration
// ============================================================================

/// Validated server configuration. Built once at startup, never mutated.
#[derive(Clone)]
pub struct ServerConfiguration {
    listen_host: String,
    listen_port: u16,
    directory_url: String,
    bind_dn: String,
    bind_credentials: String,
    search_base: String,
    search_scope: SearchScope,
    search_filter: String,
    member_of_property: String,
    search_attributes: Vec<String>,
}

impl fmt::Debug for ServerConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfiguration")
            .field("listen_host", &self.listen_host)
            .field("listen_port", &self.listen_port)
            .field("directory_url", &self.directory_url)
            .field("bind_dn", &self.bind_dn)
            .field("bind_credentials", &redacted(&self.bind_credentials))
            .field("search_base", &self.search_base)
            .field("search_scope", &self.search_scope)
            .field("search_filter", &self.search_filter)
            .field("member_of_property", &self.member_of_property)
            .field("search_attributes", &self.search_attributes)
            .finish()
    }
}

impl ServerConfiguration {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn listen_host(&self) -> &str {
        &self.listen_host
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// `host:port` to bind. An empty host means all interfaces.
    pub fn listen_address(&self) -> String {
        let host = self.listen_host.trim();
        if host.is_empty() {
            format!("0.0.0.0:{}", self.listen_port)
        } else if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, self.listen_port)
        } else {
            format!("{}:{}", host, self.listen_port)
        }
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    pub fn bind_dn(&self) -> &str {
        &self.bind_dn
    }

    pub fn bind_credentials(&self) -> &str {
        &self.bind_credentials
    }

    pub fn search_base(&self) -> &str {
        &self.search_base
    }

    pub fn search_scope(&self) -> SearchScope {
        self.search_scope
    }

    pub fn search_filter(&self) -> &str {
        &self.search_filter
    }

    pub fn member_of_property(&self) -> &str {
        &self.member_of_property
    }

    /// All attributes to fetch: `uid`, `dn`, `cn`, then the extras.
    pub fn search_attributes(&self) -> &[String] {
        &self.search_attributes
    }

    /// Attributes beyond the mandatory ones. They end up as extra values of
    /// the authenticated user.
    pub fn extra_attributes(&self) -> &[String] {
        &self.search_attributes[MANDATORY_ATTRIBUTES.len()..]
    }

    /// Build the user search filter for `principal`.
    pub fn build_user_filter(&self, principal: &str) -> String {
        self.search_filter
            .replacen(PRINCIPAL_PLACEHOLDER, &ldap3::ldap_escape(principal), 1)
    }

    /// The directory search an authenticator issues for `principal`.
    pub fn user_query(&self, principal: &str) -> DirectoryQuery<'_> {
        let mut attributes: Vec<&str> =
            self.search_attributes.iter().map(String::as_str).collect();
        if !attributes.contains(&self.member_of_property.as_str()) {
            attributes.push(&self.member_of_property);
        }

        DirectoryQuery {
            base: &self.search_base,
            scope: self.search_scope.into(),
            filter: self.build_user_filter(principal),
            attributes,
        }
    }
}

/// A user search, ready to be handed to an `ldap3` connection.
#[derive(Debug, Clone)]
pub struct DirectoryQuery<'a> {
    pub base: &'a str,
    pub scope: ldap3::Scope,
    pub filter: String,
    pub attributes: Vec<&'a str>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_builder() -> ConfigBuilder {
        ConfigBuilder {
            bind_dn: "cn=reader,dc=example,dc=com".to_string(),
            bind_credentials: "s3cret".to_string(),
            search_base: "ou=people,dc=example,dc=com".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = valid_builder().build().unwrap();

        assert_eq!(config.listen_port(), 3000);
        assert_eq!(config.directory_url(), "ldap://localhost");
        assert_eq!(config.search_scope(), SearchScope::Subtree);
        assert_eq!(config.member_of_property(), "ismemberof");
        assert_eq!(config.search_attributes(), &["uid", "dn", "cn"]);
        assert!(config.extra_attributes().is_empty());
    }

    #[test]
    fn test_missing_bind_dn_is_rejected() {
        let builder = ConfigBuilder {
            bind_dn: String::new(),
            ..valid_builder()
        };

        let err = builder.build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("bind DN"));
    }

    #[test]
    fn test_missing_bind_credentials_is_rejected() {
        let builder = ConfigBuilder {
            bind_credentials: String::new(),
            ..valid_builder()
        };

        assert!(matches!(builder.build(), Err(Error::Config(_))));
    }

    #[test]
    fn test_filter_placeholder_validation() {
        let none = ConfigBuilder {
            search_filter: "(uid=john)".to_string(),
            ..valid_builder()
        };
        assert!(none.build().is_err());

        let two = ConfigBuilder {
            search_filter: "(|(uid=%s)(mail=%s))".to_string(),
            ..valid_builder()
        };
        assert!(two.build().is_err());
    }

    #[test]
    fn test_directory_url_scheme() {
        let builder = ConfigBuilder {
            directory_url: "http://ldap.example.com".to_string(),
            ..valid_builder()
        };
        assert!(builder.build().is_err());

        let builder = ConfigBuilder {
            directory_url: "ldaps://ldap.example.com:636".to_string(),
            ..valid_builder()
        };
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_search_attributes_keep_mandatory_first() {
        let builder = ConfigBuilder {
            search_attributes: vec![
                "mail".to_string(),
                "cn".to_string(),
                "uid".to_string(),
                "mail".to_string(),
                " ".to_string(),
                "telephoneNumber".to_string(),
            ],
            ..valid_builder()
        };

        let config = builder.build().unwrap();
        assert_eq!(
            config.search_attributes(),
            &["uid", "dn", "cn", "mail", "telephoneNumber"]
        );
        assert_eq!(config.extra_attributes(), &["mail", "telephoneNumber"]);
    }

    #[test]
    fn test_search_scope_parsing() {
        assert_eq!("base".parse::<SearchScope>().unwrap(), SearchScope::Base);
        assert_eq!("SINGLE".parse::<SearchScope>().unwrap(), SearchScope::SingleLevel);
        assert_eq!("sub".parse::<SearchScope>().unwrap(), SearchScope::Subtree);
        assert!("subtree".parse::<SearchScope>().is_err());

        assert_eq!(SearchScope::SingleLevel.to_string(), "single");
        assert!(matches!(
            ldap3::Scope::from(SearchScope::SingleLevel),
            ldap3::Scope::OneLevel
        ));
    }

    #[test]
    fn test_listen_address() {
        let config = valid_builder().build().unwrap();
        assert_eq!(config.listen_address(), "0.0.0.0:3000");

        let config = ConfigBuilder {
            listen_host: "127.0.0.1".to_string(),
            listen_port: 8443,
            ..valid_builder()
        }
        .build()
        .unwrap();
        assert_eq!(config.listen_address(), "127.0.0.1:8443");

        let config = ConfigBuilder {
            listen_host: "::1".to_string(),
            ..valid_builder()
        }
        .build()
        .unwrap();
        assert_eq!(config.listen_address(), "[::1]:3000");
    }

    #[test]
    fn test_user_query() {
        let config = ConfigBuilder {
            search_attributes: vec!["mail".to_string()],
            ..valid_builder()
        }
        .build()
        .unwrap();

        let query = config.user_query("john");
        assert_eq!(query.base, "ou=people,dc=example,dc=com");
        assert!(matches!(query.scope, ldap3::Scope::Subtree));
        assert_eq!(query.filter, "(&(objectClass=inetOrgPerson)(uid=john))");
        assert_eq!(query.attributes, vec!["uid", "dn", "cn", "mail", "ismemberof"]);
    }

    #[test]
    fn test_user_filter_escapes_principal() {
        let config = valid_builder().build().unwrap();

        let filter = config.build_user_filter("*)(uid=*");
        assert_eq!(
            filter.to_ascii_lowercase(),
            "(&(objectClass=inetOrgPerson)(uid=\\2a\\29\\28uid=\\2a))"
        );
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let config = valid_builder().build().unwrap();
        let debug = format!("{:?}", config);

        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_resolve_bind_credentials() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "from-file").unwrap();

        let explicit = resolve_bind_credentials(Some("from-flag".to_string()), file.path());
        assert_eq!(explicit.unwrap(), "from-flag");

        let fallback = resolve_bind_credentials(None, file.path());
        assert_eq!(fallback.unwrap(), "from-file");

        let empty_flag = resolve_bind_credentials(Some(String::new()), file.path());
        assert_eq!(empty_flag.unwrap(), "from-file");

        let dir = tempfile::tempdir().unwrap();
        let missing = resolve_bind_credentials(None, &dir.path().join("password"));
        assert_eq!(missing.unwrap(), "");
    }
}
