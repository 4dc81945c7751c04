use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, Context, Result};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::JwtConfig;

/// Claims the session layer relies on
#[derive(Debug, Clone, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: i64,
}

enum KeySource {
    Shared(Arc<DecodingKey>),
    Jwks {
        jwks_uri: String,
        client: Client,
        keys: Arc<RwLock<HashMap<String, Arc<DecodingKey>>>>,
        last_refresh: Arc<RwLock<Option<Instant>>>,
        cache_ttl: Duration,
    },
}

/// Validates access tokens issued by the hosted auth provider
pub struct JwtValidator {
    issuer: String,
    audience: String,
    source: KeySource,
}

impl JwtValidator {
    pub async fn from_config(config: &JwtConfig) -> Result<Self> {
        let source = if let Some(secret) = &config.shared_secret {
            KeySource::Shared(Arc::new(DecodingKey::from_secret(secret.as_bytes())))
        } else {
            let client = Client::builder()
                .user_agent("mopsagent-auth/0.1.0")
                .timeout(Duration::from_secs(10))
                .build()
                .context("failed to build HTTP client for token validation")?;
            let jwks_uri = resolve_jwks_uri(config, &client).await?;

            KeySource::Jwks {
                jwks_uri,
                client,
                keys: Arc::new(RwLock::new(HashMap::new())),
                last_refresh: Arc::new(RwLock::new(None)),
                cache_ttl: Duration::from_secs(config.jwks_cache_ttl_secs.max(60)),
            }
        };

        let validator = Self {
            issuer: config.issuer_url.clone(),
            audience: config.audience.clone(),
            source,
        };

        // Prime the JWKS cache so the first request doesn't incur latency.
        if matches!(validator.source, KeySource::Jwks { .. }) {
            validator.refresh_keys().await?;
        }

        Ok(validator)
    }

    pub async fn validate(&self, token: &str) -> Result<AccessClaims> {
        let header = decode_header(token).context("failed to parse token header")?;

        let key = match &self.source {
            KeySource::Shared(key) => {
                if header.alg != Algorithm::HS256 {
                    bail!("expected an HS256 token, got {:?}", header.alg);
                }
                Arc::clone(key)
            }
            KeySource::Jwks { .. } => {
                let kid = header
                    .kid
                    .as_deref()
                    .ok_or_else(|| anyhow!("token header missing 'kid'"))?;
                self.get_decoding_key(kid).await?
            }
        };

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        let data = decode::<AccessClaims>(token, key.as_ref(), &validation)
            .context("token failed signature or claim validation")?;

        Ok(data.claims)
    }

    async fn get_decoding_key(&self, kid: &str) -> Result<Arc<DecodingKey>> {
        let KeySource::Jwks { keys, .. } = &self.source else {
            bail!("validator is not configured for JWKS");
        };

        self.ensure_fresh_keys(kid).await?;

        if let Some(key) = keys.read().await.get(kid) {
            return Ok(Arc::clone(key));
        }

        // Key rotation: refresh once more explicitly
        self.refresh_keys().await?;
        keys.read()
            .await
            .get(kid)
            .cloned()
            .ok_or_else(|| anyhow!("no JWKS entry found for key id '{kid}'"))
    }

    async fn ensure_fresh_keys(&self, kid: &str) -> Result<()> {
        let KeySource::Jwks {
            keys,
            last_refresh,
            cache_ttl,
            ..
        } = &self.source
        else {
            return Ok(());
        };

        let expired = match *last_refresh.read().await {
            Some(last) => last.elapsed() > *cache_ttl,
            None => true,
        };

        if expired {
            debug!("Refreshing JWKS cache due to expiration");
            return self.refresh_keys().await;
        }

        if !keys.read().await.contains_key(kid) {
            debug!("Refreshing JWKS cache because key {kid} was missing");
            self.refresh_keys().await?;
        }

        Ok(())
    }

    async fn refresh_keys(&self) -> Result<()> {
        let KeySource::Jwks {
            jwks_uri,
            client,
            keys,
            last_refresh,
            ..
        } = &self.source
        else {
            return Ok(());
        };

        let jwks: JwkSet = client
            .get(jwks_uri)
            .send()
            .await
            .context("failed to request JWKS")?
            .error_for_status()
            .context("JWKS endpoint returned an error status")?
            .json()
            .await
            .context("failed to parse JWKS response")?;

        let mut new_keys: HashMap<String, Arc<DecodingKey>> = HashMap::new();

        for jwk in jwks.keys {
            let Some(kid) = jwk.kid else {
                warn!("Skipping JWKS entry without 'kid'");
                continue;
            };

            let key = match jwk.kty.as_str() {
                "RSA" => {
                    let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
                        warn!("Skipping RSA JWKS entry {kid} without modulus/exponent");
                        continue;
                    };
                    DecodingKey::from_rsa_components(n, e)
                        .context("failed to build RSA decoding key from JWKS entry")?
                }
                "EC" => {
                    let (Some(x), Some(y)) = (jwk.x.as_deref(), jwk.y.as_deref()) else {
                        warn!("Skipping EC JWKS entry {kid} without coordinates");
                        continue;
                    };
                    DecodingKey::from_ec_components(x, y)
                        .context("failed to build EC decoding key from JWKS entry")?
                }
                other => {
                    warn!("Skipping unsupported JWKS key type: {other}");
                    continue;
                }
            };
            new_keys.insert(kid, Arc::new(key));
        }

        if new_keys.is_empty() {
            bail!("JWKS response did not contain any usable keys");
        }

        *keys.write().await = new_keys;
        *last_refresh.write().await = Some(Instant::now());

        Ok(())
    }
}

async fn resolve_jwks_uri(config: &JwtConfig, client: &Client) -> Result<String> {
    if let Some(url) = &config.jwks_url {
        return Ok(url.clone());
    }

    let issuer = config.issuer_url.trim_end_matches('/');
    let discovery_url = format!("{issuer}/.well-known/openid-configuration");
    let metadata: ProviderMetadata = client
        .get(&discovery_url)
        .send()
        .await
        .context("failed to request auth provider metadata")?
        .error_for_status()
        .context("auth provider metadata endpoint returned an error status")?
        .json()
        .await
        .context("failed to parse auth provider metadata")?;

    metadata
        .jwks_uri
        .ok_or_else(|| anyhow!("auth provider metadata did not include 'jwks_uri'"))
}

#[derive(Debug, Deserialize)]
struct ProviderMetadata {
    jwks_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: Option<String>,
    #[serde(default)]
    kty: String,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
    #[serde(default)]
    x: Option<String>,
    #[serde(default)]
    y: Option<String>,
}
