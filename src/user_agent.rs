//! User-Agent string for all outbound API traffic.

/// Project URL advertised in the User-Agent.
const PROJECT_UA_URL: &str = "https://github.com/fierce/helpdesk-export";

/// Default User-Agent for API and attachment requests.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("helpdesk-export/{version} (conversation-archiver; +{PROJECT_UA_URL})")
}
