//! Per-domain login templates
//!
//! Administrators can configure how the SMTP login is derived from what the
//! user typed. `%u` expands to the username and `%d` to the domain, so
//! `%u@corp.com` maps `jane@alias.co` to `jane@corp.com`.

/// Username placeholder
pub const USER_MARKER: &str = "%u";
/// Domain placeholder
pub const DOMAIN_MARKER: &str = "%d";

/// Login template attached to an SMTP endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginTemplate(String);

impl LoginTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Expand the template, or `None` when it is empty.
    ///
    /// The username is substituted before the domain. A template without
    /// markers is returned verbatim.
    pub fn rewrite(&self, username: &str, domain: &str) -> Option<String> {
        if self.is_empty() {
            return None;
        }

        Some(
            self.0
                .replace(USER_MARKER, username)
                .replace(DOMAIN_MARKER, domain),
        )
    }
}

impl From<Option<String>> for LoginTemplate {
    fn from(value: Option<String>) -> Self {
        Self(value.unwrap_or_default())
    }
}

/// Login string for `template`, falling back to `candidate` when the
/// template is empty
pub fn rewrite(username: &str, domain: &str, template: &LoginTemplate, candidate: &str) -> String {
    template
        .rewrite(username, domain)
        .unwrap_or_else(|| candidate.to_string())
}
