use std::{net::SocketAddr, time::Duration};

use barista_auth::{
    claims::{Audience, Issuer},
    Algorithm, AuthConfig,
};
use clap::Parser;
use color_eyre::eyre::{bail, Result};

/// Serves the drinks menu, guarding changes with Auth0 permissions
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Opts {
    /// The Auth0 tenant domain, such as `barista.us.auth0.com`
    #[arg(long, env = "AUTH0_DOMAIN")]
    pub auth0_domain: Option<String>,

    /// The expected token issuer, overriding the one derived from the domain
    #[arg(long, env = "AUTH_ISSUER")]
    pub issuer: Option<String>,

    /// The URL of the key document, overriding the one derived from the domain
    #[arg(long, env = "JWKS_URL")]
    pub jwks_url: Option<String>,

    /// The audience tokens must be issued for
    #[arg(long, env = "API_AUDIENCE")]
    pub audience: String,

    /// The only algorithm tokens may be signed with
    #[arg(long, env = "SIGNING_ALGORITHM", default_value = "RS256")]
    pub algorithm: Algorithm,

    /// How long a key document fetch may take
    #[arg(long, env = "JWKS_FETCH_TIMEOUT_SECS", default_value_t = 10)]
    pub fetch_timeout_secs: u64,

    /// Refetch the key document this often, in addition to on unknown keys
    #[arg(long, env = "JWKS_REFRESH_SECS")]
    pub refresh_secs: Option<u64>,

    /// The address to listen on
    #[arg(long, env = "BIND_ADDRESS", default_value = "127.0.0.1:5000")]
    pub bind_address: SocketAddr,
}

impl Opts {
    /// Resolves the authority settings
    ///
    /// An explicit issuer or key URL wins over the ones derived from the
    /// Auth0 domain. Without a domain, both must be given.
    pub fn auth_config(&self) -> Result<AuthConfig> {
        let audience = Audience::new(self.audience.clone());

        let mut config = match (&self.auth0_domain, &self.issuer, &self.jwks_url) {
            (Some(domain), _, _) => AuthConfig::auth0(domain, audience),
            (None, Some(issuer), Some(jwks_url)) => AuthConfig {
                issuer: Issuer::new(issuer.clone()),
                audience,
                algorithm: self.algorithm,
                jwks_url: jwks_url.clone(),
                fetch_timeout_secs: self.fetch_timeout_secs,
            },
            (None, _, _) => bail!("either AUTH0_DOMAIN or both AUTH_ISSUER and JWKS_URL must be set"),
        };

        if let Some(issuer) = &self.issuer {
            config.issuer = Issuer::new(issuer.clone());
        }
        if let Some(jwks_url) = &self.jwks_url {
            config.jwks_url.clone_from(jwks_url);
        }
        config.algorithm = self.algorithm;
        config.fetch_timeout_secs = self.fetch_timeout_secs;

        Ok(config)
    }

    /// The background refresh interval, if one is configured
    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_secs
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }
}
