//! KeyDB connection pool shared by the registry, user store and credential
//! store.

use anyhow::{Context, Result};
use fred::clients::Pool;
use fred::interfaces::ClientLike;
use fred::types::config::{Config as FredConfig, ReconnectPolicy, ServerConfig, TlsConnector};
use fred::types::Builder;
use tracing::info;

use crate::config::KeyDbConfig;

const POOL_SIZE: usize = 4;

/// Connect to KeyDB and verify the link with a PING.
///
/// The auth token is read from the environment variable named by
/// `config.auth_token_env`; an unset variable means no password.
pub async fn create_pool(config: &KeyDbConfig) -> Result<Pool> {
    let endpoint = strip_scheme(&config.endpoint);
    let (host, port) = parse_host_port(endpoint)?;

    let mut fred_config = FredConfig {
        server: ServerConfig::new_centralized(host, port),
        ..FredConfig::default()
    };
    if config.tls {
        fred_config.tls = Some(TlsConnector::default_rustls()?.into());
    }
    if let Ok(token) = std::env::var(&config.auth_token_env) {
        fred_config.password = Some(token);
    }

    let mut builder = Builder::from_config(fred_config);
    builder.set_policy(ReconnectPolicy::new_exponential(0, 100, 30_000, 2));

    let pool = builder
        .build_pool(POOL_SIZE)
        .context("failed to build KeyDB connection pool")?;
    pool.init().await.context("failed to connect to KeyDB")?;

    let _: String = pool
        .ping(None)
        .await
        .context("KeyDB PING failed after connect")?;

    info!(host, port, tls = config.tls, pool_size = POOL_SIZE, "KeyDB pool ready");
    Ok(pool)
}

fn strip_scheme(endpoint: &str) -> &str {
    endpoint
        .trim_start_matches("rediss://")
        .trim_start_matches("redis://")
}

/// Split `host[:port][/db]`; the port defaults to 6379.
pub fn parse_host_port(endpoint: &str) -> Result<(&str, u16)> {
    let endpoint = endpoint.split('/').next().unwrap_or(endpoint);
    match endpoint.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .with_context(|| format!("invalid port in KeyDB endpoint: {endpoint}"))?;
            Ok((host, port))
        }
        None => Ok((endpoint, 6379)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_with_scheme_and_port() {
        let endpoint = strip_scheme("rediss://keydb.internal:6380");
        assert_eq!(parse_host_port(endpoint).unwrap(), ("keydb.internal", 6380));
    }

    #[test]
    fn endpoint_defaults_port_and_drops_db_path() {
        assert_eq!(parse_host_port("keydb.internal").unwrap(), ("keydb.internal", 6379));
        assert_eq!(
            parse_host_port(strip_scheme("redis://localhost:6379/2")).unwrap(),
            ("localhost", 6379)
        );
    }

    #[test]
    fn bad_port_is_rejected() {
        assert!(parse_host_port("keydb.internal:notaport").is_err());
    }
}
