//! Application options.

use std::env;

/// Environment variable read by [`Options::from_env`].
pub const ENV_VAR: &str = "STRATA_ENV";

/// Settings that shape how an [`Application`](crate::Application) reads
/// requests and reports failures.
///
/// ```rust
/// use strata::Options;
///
/// let options = Options::default().proxy(true).subdomain_offset(3);
/// assert!(options.proxy);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Options {
    /// Deployment environment, e.g. `"production"`.
    pub env: String,
    /// Signing secrets, newest first.
    pub keys: Vec<String>,
    /// Trust `X-Forwarded-*` headers.
    pub proxy: bool,
    /// Labels dropped from the right of the hostname by
    /// [`Context::subdomains`](crate::Context::subdomains).
    pub subdomain_offset: usize,
    /// Suppress the default error log.
    pub silent: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            env: "development".to_owned(),
            keys: Vec::new(),
            proxy: false,
            subdomain_offset: 2,
            silent: false,
        }
    }
}

impl Options {
    /// Defaults, with `env` taken from `STRATA_ENV` when set.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Ok(value) = env::var(ENV_VAR)
            && !value.is_empty()
        {
            options.env = value;
        }
        options
    }

    pub fn env(mut self, env: impl Into<String>) -> Self {
        self.env = env.into();
        self
    }

    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn proxy(mut self, proxy: bool) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn subdomain_offset(mut self, offset: usize) -> Self {
        self.subdomain_offset = offset;
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn is_production(&self) -> bool {
        self.env == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = Options::default();
        assert_eq!(options.env, "development");
        assert_eq!(options.subdomain_offset, 2);
        assert!(!options.proxy && !options.silent);
        assert!(options.keys.is_empty());
    }

    #[test]
    fn builder_chain() {
        let options = Options::default()
            .env("production")
            .keys(["new", "old"])
            .silent(true);
        assert!(options.is_production());
        assert_eq!(options.keys, ["new", "old"]);
        assert!(options.silent);
    }
}
