use crate::acquire::{AcquisitionRequest, Strategy, StrategyError};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

const PROXY_HOST: &str = "ytstream-download-youtube-videos.p.rapidapi.com";
const READY_POLLS: u32 = 5;
const READY_POLL_DELAY: Duration = Duration::from_secs(2);

/// Third-party REST proxy with rotating credentials. Keys are shuffled per
/// invocation to spread load; the first key that yields a file wins.
pub struct ProxyStrategy {
    client: reqwest::Client,
    keys: Vec<String>,
    timeout: Duration,
    min_bytes: u64,
    max_attempts: u32,
}

#[derive(Debug, Deserialize)]
struct ProxyResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    msg: Option<String>,
}

impl ProxyStrategy {
    pub fn new(
        client: reqwest::Client,
        keys: Vec<String>,
        timeout: Duration,
        min_bytes: u64,
        max_attempts: u32,
    ) -> Self {
        Self {
            client,
            keys,
            timeout,
            min_bytes,
            max_attempts,
        }
    }

    async fn try_key(
        &self,
        key: &str,
        reference: &str,
        dest: &Path,
    ) -> Result<(), StrategyError> {
        let url = format!("https://{}/dl?id={}", PROXY_HOST, reference);
        let resp = self
            .client
            .get(&url)
            .header("X-RapidAPI-Key", key)
            .header("X-RapidAPI-Host", PROXY_HOST)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| StrategyError::Transient(e.to_string()))?;

        match resp.status().as_u16() {
            200 => {}
            404 => return Err(StrategyError::NotFound("proxy: video not found".to_string())),
            429 | 403 => {
                return Err(StrategyError::QuotaExceeded(format!(
                    "proxy HTTP {}",
                    resp.status().as_u16()
                )));
            }
            code => return Err(StrategyError::Transient(format!("proxy HTTP {}", code))),
        }

        let body: ProxyResponse = resp
            .json()
            .await
            .map_err(|e| StrategyError::Transient(format!("proxy response parse: {}", e)))?;
        let link = resolve_link(body)?;

        self.wait_until_ready(&link).await?;
        self.download(&link, dest).await
    }

    /// Some proxies answer with a link before the backing file exists; a HEAD
    /// with a real content-length says it is ready.
    async fn wait_until_ready(&self, link: &str) -> Result<(), StrategyError> {
        for poll in 0..READY_POLLS {
            let head = self
                .client
                .head(link)
                .timeout(Duration::from_secs(15))
                .send()
                .await;

            match head {
                Ok(resp) if resp.status().is_success() => {
                    let len = resp.content_length().unwrap_or(0);
                    if len > 0 {
                        return Ok(());
                    }
                    debug!("proxy asset not ready yet (poll {})", poll + 1);
                }
                Ok(resp) => {
                    debug!("proxy HEAD HTTP {} (poll {})", resp.status().as_u16(), poll + 1);
                }
                Err(err) => {
                    debug!("proxy HEAD failed (poll {}): {}", poll + 1, err);
                }
            }
            tokio::time::sleep(READY_POLL_DELAY).await;
        }

        Err(StrategyError::AssetUnready(format!(
            "asset never became ready after {} polls",
            READY_POLLS
        )))
    }

    async fn download(&self, link: &str, dest: &Path) -> Result<(), StrategyError> {
        let resp = self
            .client
            .get(link)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| StrategyError::Transient(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(StrategyError::Transient(format!(
                "media fetch HTTP {}",
                resp.status().as_u16()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| StrategyError::Transient(e.to_string()))?;
        fs::write(dest, &bytes)
            .await
            .map_err(|e| StrategyError::Fatal(format!("write failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl Strategy for ProxyStrategy {
    fn name(&self) -> &str {
        "proxy-api"
    }

    fn min_valid_bytes(&self) -> u64 {
        self.min_bytes
    }

    fn attempts(&self) -> u32 {
        self.max_attempts
    }

    async fn attempt(
        &self,
        request: &AcquisitionRequest,
        dest: &Path,
    ) -> Result<(), StrategyError> {
        let reference = request
            .reference
            .as_deref()
            .ok_or_else(|| StrategyError::Fatal("content reference required".to_string()))?;
        if self.keys.is_empty() {
            return Err(StrategyError::Fatal("no proxy credentials configured".to_string()));
        }

        let keys = rotation_order(&self.keys);
        let mut failures = Vec::new();

        for (idx, key) in keys.iter().enumerate() {
            match self.try_key(key, reference, dest).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!("proxy credential {}/{} failed: {}", idx + 1, keys.len(), err);
                    failures.push(err);
                }
            }
        }

        Err(rotation_verdict(failures))
    }
}

fn rotation_order(keys: &[String]) -> Vec<&String> {
    let mut order: Vec<&String> = keys.iter().collect();
    order.shuffle(&mut rand::thread_rng());
    order
}

fn resolve_link(body: ProxyResponse) -> Result<String, StrategyError> {
    match (body.link, body.status.as_deref()) {
        (Some(link), _) if !link.is_empty() => Ok(link),
        (_, Some("processing")) => Err(StrategyError::AssetUnready(
            "proxy still preparing the asset".to_string(),
        )),
        _ => Err(StrategyError::Transient(format!(
            "proxy returned no link ({})",
            body.msg.unwrap_or_default()
        ))),
    }
}

/// Exhausting every credential is a strategy-level failure, not fatal to the
/// chain; when every credential hit its quota the verdict says so.
fn rotation_verdict(mut failures: Vec<StrategyError>) -> StrategyError {
    let all_quota = !failures.is_empty()
        && failures
            .iter()
            .all(|e| matches!(e, StrategyError::QuotaExceeded(_)));
    if all_quota {
        StrategyError::QuotaExceeded("all proxy credentials exhausted".to_string())
    } else {
        failures
            .pop()
            .unwrap_or_else(|| StrategyError::Transient("no credential attempted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_preserves_the_credential_set() {
        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let order = rotation_order(&keys);
        assert_eq!(order.len(), 3);
        for key in &keys {
            assert!(order.contains(&key));
        }
    }

    #[test]
    fn all_quota_failures_aggregate_to_quota() {
        let verdict = rotation_verdict(vec![
            StrategyError::QuotaExceeded("key 1".to_string()),
            StrategyError::QuotaExceeded("key 2".to_string()),
        ]);
        assert!(matches!(verdict, StrategyError::QuotaExceeded(_)));
        assert!(verdict.to_string().contains("all proxy credentials"));
    }

    #[test]
    fn mixed_failures_keep_the_last_error() {
        let verdict = rotation_verdict(vec![
            StrategyError::QuotaExceeded("key 1".to_string()),
            StrategyError::Transient("reset".to_string()),
        ]);
        assert!(matches!(verdict, StrategyError::Transient(_)));
        assert!(verdict.retryable());
    }

    #[test]
    fn link_present_resolves() {
        let body = ProxyResponse {
            status: Some("ok".to_string()),
            link: Some("https://cdn.example/v.mp4".to_string()),
            msg: None,
        };
        assert_eq!(resolve_link(body).unwrap(), "https://cdn.example/v.mp4");
    }

    #[test]
    fn processing_status_is_asset_unready() {
        let body = ProxyResponse {
            status: Some("processing".to_string()),
            link: None,
            msg: None,
        };
        let err = resolve_link(body).unwrap_err();
        assert!(matches!(err, StrategyError::AssetUnready(_)));
        assert!(err.retryable());
    }

    #[test]
    fn missing_link_is_transient() {
        let body = ProxyResponse {
            status: Some("fail".to_string()),
            link: Some(String::new()),
            msg: Some("bad id".to_string()),
        };
        let err = resolve_link(body).unwrap_err();
        assert!(matches!(err, StrategyError::Transient(_)));
        assert!(err.to_string().contains("bad id"));
    }
}
