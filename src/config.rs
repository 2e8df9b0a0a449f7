use std::collections::HashMap;

use secrecy::SecretString;

/// Environment variable names read by [`AuthEnv`].
pub mod vars {
    pub const AUTH_SECRET: &str = "AUTH_SECRET";
    pub const AUTH_TRUST_HOST: &str = "AUTH_TRUST_HOST";
    pub const AUTH_URL: &str = "AUTH_URL";
    pub const AUTH_GITHUB_ID: &str = "AUTH_GITHUB_ID";
    pub const AUTH_GITHUB_SECRET: &str = "AUTH_GITHUB_SECRET";
    pub const CF_PAGES: &str = "CF_PAGES";
    pub const VERCEL: &str = "VERCEL";
    pub const NODE_ENV: &str = "NODE_ENV";

    #[cfg(test)]
    pub(crate) const ALL: [&str; 8] = [
        AUTH_SECRET,
        AUTH_TRUST_HOST,
        AUTH_URL,
        AUTH_GITHUB_ID,
        AUTH_GITHUB_SECRET,
        CF_PAGES,
        VERCEL,
        NODE_ENV,
    ];
}

/// Auth-related environment, resolved once per process (or per request on
/// platforms that hand bindings to each invocation).
///
/// Every field is optional: absence is a policy decision made by the caller
/// (see [`crate::resolver::get_server_token`] for the secret).
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct AuthEnv {
    pub secret: Option<SecretString>,
    pub trust_host: Option<String>,
    pub auth_url: Option<String>,
    pub github_id: Option<String>,
    pub github_secret: Option<SecretString>,
    pub cf_pages: Option<String>,
    pub vercel: Option<String>,
    pub node_env: Option<String>,
}

impl AuthEnv {
    /// Read the process environment.
    ///
    /// Empty values are treated as unset.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Overlay platform bindings (e.g. a Workers/Pages `env` object) on top of
    /// this environment. A binding wins over the process value of the same
    /// name; names not present in `bindings` are left untouched.
    #[must_use]
    pub fn with_bindings<I, K, V>(self, bindings: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let bindings: HashMap<String, String> = bindings
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let overlay = Self::from_lookup(|name| bindings.get(name).cloned());

        Self {
            secret: overlay.secret.or(self.secret),
            trust_host: overlay.trust_host.or(self.trust_host),
            auth_url: overlay.auth_url.or(self.auth_url),
            github_id: overlay.github_id.or(self.github_id),
            github_secret: overlay.github_secret.or(self.github_secret),
            cf_pages: overlay.cf_pages.or(self.cf_pages),
            vercel: overlay.vercel.or(self.vercel),
            node_env: overlay.node_env.or(self.node_env),
        }
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());
        Self {
            secret: get(vars::AUTH_SECRET).map(SecretString::from),
            trust_host: get(vars::AUTH_TRUST_HOST),
            auth_url: get(vars::AUTH_URL),
            github_id: get(vars::AUTH_GITHUB_ID),
            github_secret: get(vars::AUTH_GITHUB_SECRET).map(SecretString::from),
            cf_pages: get(vars::CF_PAGES),
            vercel: get(vars::VERCEL),
            node_env: get(vars::NODE_ENV),
        }
    }

    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(SecretString::from(secret.into()));
        self
    }

    #[must_use]
    pub fn with_node_env(mut self, node_env: impl Into<String>) -> Self {
        self.node_env = Some(node_env.into());
        self
    }

    #[must_use]
    pub fn with_github_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.github_id = Some(client_id.into());
        self.github_secret = Some(SecretString::from(client_secret.into()));
        self
    }

    #[must_use]
    pub fn with_auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_trust_host(mut self, flag: impl Into<String>) -> Self {
        self.trust_host = Some(flag.into());
        self
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        self.node_env.as_deref() == Some("production")
    }

    /// See [`crate::callbacks::resolve_trust_host`].
    #[must_use]
    pub fn trust_host(&self) -> bool {
        crate::callbacks::resolve_trust_host(
            self.node_env.as_deref(),
            self.trust_host.as_deref(),
            self.cf_pages.as_deref(),
            self.vercel.as_deref(),
        )
    }
}
