//! Token lifecycle for a captured Teams browser session
//!
//! The extractor answers "which bearer token is usable for resource X" from
//! the persisted session; the orchestrator keeps those tokens fresh through
//! an HTTP refresh-token exchange with a headless-browser fallback.

pub mod browser;
pub mod extract;
pub mod http_refresh;
pub mod identity;
pub mod refresh;
pub mod region;
pub mod skype;
pub mod tokens;

use std::fmt;
use std::str::FromStr;

pub use browser::{BrowserSession, CommandBrowser};
pub use extract::TokenExtractor;
pub use refresh::Orchestrator;
pub use tokens::{BearerToken, TokenCacheSummary};

/// Cookie holding the chat-service (Skype) identity token. Set on two domains.
pub const SKYPE_TOKEN_COOKIE: &str = "skypetoken_asm";

/// Cookie holding the URL-encoded `Bearer=...&Origin=...` auth token.
pub const AUTH_TOKEN_COOKIE: &str = "authtoken";

/// Endpoints and headers for the Teams web client.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Authority host; tenant and `/oauth2/v2.0/...` are appended.
    pub authority: String,
    /// `Origin` sent with token requests (the web client is a SPA registration).
    pub origin: String,
    /// Skype token exchange endpoint.
    pub authz_url: String,
}

impl AuthConfig {
    pub fn work() -> Self {
        Self {
            authority: "https://login.microsoftonline.com".to_string(),
            origin: "https://teams.microsoft.com".to_string(),
            authz_url: "https://teams.microsoft.com/api/authsvc/v1.0/authz".to_string(),
        }
    }

    pub fn token_url(&self, tenant: &str) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority, tenant)
    }

    pub fn authorize_url(&self, tenant: &str) -> String {
        format!("{}/{}/oauth2/v2.0/authorize", self.authority, tenant)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::work()
    }
}

/// Backend services the session holds MSAL access tokens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Substrate (search, people, files).
    Substrate,
    /// Spaces (calendar, middle tier).
    Spaces,
    /// Chat service aggregator; also the input to the Skype token exchange.
    ChatSvcAgg,
    Graph,
}

impl Resource {
    /// Every resource the orchestrator refreshes.
    pub const TRACKED: [Resource; 4] = [
        Resource::Substrate,
        Resource::Spaces,
        Resource::ChatSvcAgg,
        Resource::Graph,
    ];

    /// Token validity is verified against this one after a refresh.
    pub const CANONICAL: Resource = Resource::Substrate;

    pub fn audience(&self) -> &'static str {
        match self {
            Resource::Substrate => "https://substrate.office.com",
            Resource::Spaces => "https://api.spaces.skype.com",
            Resource::ChatSvcAgg => "https://chatsvcagg.teams.microsoft.com",
            Resource::Graph => "https://graph.microsoft.com",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Resource::Substrate => "substrate",
            Resource::Spaces => "spaces",
            Resource::ChatSvcAgg => "chatsvcagg",
            Resource::Graph => "graph",
        }
    }

    /// Whether an MSAL `target` scope string belongs to this resource.
    pub fn matches_target(&self, target: &str) -> bool {
        let audience = self.audience();
        target.split_whitespace().any(|scope| {
            scope
                .get(..audience.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(audience))
                && matches!(scope.as_bytes().get(audience.len()), None | Some(b'/'))
        })
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resource::TRACKED
            .into_iter()
            .find(|r| r.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "unknown resource '{}' (expected one of: substrate, spaces, chatsvcagg, graph)",
                    s
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_target() {
        assert!(Resource::Substrate.matches_target("https://substrate.office.com/.default"));
        assert!(Resource::Substrate
            .matches_target("openid profile https://Substrate.office.com/search/SubstrateSearch-Internal.ReadWrite"));
        assert!(Resource::Spaces.matches_target("https://api.spaces.skype.com/.default"));
        assert!(!Resource::Spaces.matches_target("https://substrate.office.com/.default"));
        // Prefix of a different host must not match
        assert!(!Resource::Graph.matches_target("https://graph.microsoft.com.evil/.default"));
    }

    #[test]
    fn test_parse_resource() {
        assert_eq!("Substrate".parse::<Resource>(), Ok(Resource::Substrate));
        assert_eq!("chatsvcagg".parse::<Resource>(), Ok(Resource::ChatSvcAgg));
        assert!("calendar".parse::<Resource>().is_err());
    }

    #[test]
    fn test_token_url() {
        let config = AuthConfig::default();
        assert_eq!(
            config.token_url("tid-1"),
            "https://login.microsoftonline.com/tid-1/oauth2/v2.0/token"
        );
    }
}
