//! Shared HTTP client construction.

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::redirect::Policy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::util::{is_public_ip, validate_url};

/// Maximum redirect hops followed for feeds and pages
const MAX_REDIRECTS: usize = 5;

/// Create a redirect policy that bounds hops, rejects loops and, unless
/// `allow_private_hosts` is set, refuses redirects into localhost or
/// private address space.
///
/// Validating every hop closes the gap where a public URL redirects to an
/// internal service after the initial URL check passed.
pub fn create_redirect_policy(allow_private_hosts: bool) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("Too many redirects (max {MAX_REDIRECTS})"));
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        if !allow_private_hosts {
            if let Err(e) = validate_url(url.as_str()) {
                tracing::warn!(to = %url, error = %e, "Refusing redirect");
                return attempt.error(format!("Redirect rejected: {e}"));
            }
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

/// DNS resolver that drops loopback, private and link-local answers.
///
/// URL checks only see host names; this catches names that resolve into
/// internal address space.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublicOnlyResolver;

impl Resolve for PublicOnlyResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(resolve_public(name.as_str().to_string()))
    }
}

async fn resolve_public(host: String) -> Result<Addrs, Box<dyn std::error::Error + Send + Sync>> {
    let public: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
        .await?
        .filter(|addr| is_public_ip(&addr.ip()))
        .collect();

    if public.is_empty() {
        tracing::warn!(host = %host, "Refusing host without public addresses");
        return Err(format!("{host} does not resolve to a public address").into());
    }
    Ok(Box::new(public.into_iter()))
}

/// Build the HTTP client used for both feed refreshes and page fetches.
///
/// Per-request timeouts are applied by the callers; the client-level timeout
/// is only a backstop.
pub fn build_client(config: &Config) -> reqwest::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .redirect(create_redirect_policy(config.allow_private_hosts))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .timeout(Duration::from_secs(60));

    if !config.allow_private_hosts {
        builder = builder.dns_resolver(Arc::new(PublicOnlyResolver));
    }
    builder.build()
}
