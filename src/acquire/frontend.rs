use crate::acquire::{AcquisitionRequest, Strategy, StrategyError};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::warn;

/// Alternate open-protocol frontends exposing a `latest_version` endpoint
/// that serves (or redirects to) the media directly. Instances are tried in
/// the configured order within a single attempt.
pub struct FrontendStrategy {
    client: reqwest::Client,
    instances: Vec<String>,
    timeout: Duration,
    min_bytes: u64,
    max_attempts: u32,
}

impl FrontendStrategy {
    pub fn new(
        client: reqwest::Client,
        instances: Vec<String>,
        timeout: Duration,
        min_bytes: u64,
        max_attempts: u32,
    ) -> Self {
        Self {
            client,
            instances,
            timeout,
            min_bytes,
            max_attempts,
        }
    }

    async fn try_instance(
        &self,
        instance: &str,
        reference: &str,
        dest: &Path,
    ) -> Result<(), StrategyError> {
        let url = media_url(instance, reference);

        let resp = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| StrategyError::Transient(e.to_string()))?;

        match resp.status().as_u16() {
            200 => {}
            404 => {
                return Err(StrategyError::NotFound(format!(
                    "{}: video not found",
                    instance
                )));
            }
            code => return Err(StrategyError::Transient(format!("{}: HTTP {}", instance, code))),
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
impl Strategy for FrontendStrategy {
    fn name(&self) -> &str {
        "frontend"
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
        if self.instances.is_empty() {
            return Err(StrategyError::Fatal("no frontend instances configured".to_string()));
        }

        let mut failures = Vec::new();

        for instance in &self.instances {
            match self.try_instance(instance, reference, dest).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!("frontend {} failed: {}", instance, err);
                    failures.push(err);
                }
            }
        }

        Err(instance_verdict(failures))
    }
}

// itag 22: 720p mp4 with muxed audio
fn media_url(instance: &str, reference: &str) -> String {
    format!(
        "{}/latest_version?id={}&itag=22",
        instance.trim_end_matches('/'),
        reference
    )
}

/// Every instance agreeing the video does not exist is a verdict, not a
/// flake; anything else keeps the most recent error.
fn instance_verdict(mut failures: Vec<StrategyError>) -> StrategyError {
    let all_not_found = !failures.is_empty()
        && failures
            .iter()
            .all(|e| matches!(e, StrategyError::NotFound(_)));
    if all_not_found {
        StrategyError::NotFound("video not found on any frontend".to_string())
    } else {
        failures
            .pop()
            .unwrap_or_else(|| StrategyError::Transient("no instance attempted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_url_trims_trailing_slash() {
        assert_eq!(
            media_url("https://yewtu.be/", "abc123"),
            "https://yewtu.be/latest_version?id=abc123&itag=22"
        );
        assert_eq!(
            media_url("https://inv.nadeko.net", "abc123"),
            "https://inv.nadeko.net/latest_version?id=abc123&itag=22"
        );
    }

    #[test]
    fn unanimous_not_found_is_a_verdict() {
        let verdict = instance_verdict(vec![
            StrategyError::NotFound("a".to_string()),
            StrategyError::NotFound("b".to_string()),
        ]);
        assert!(matches!(verdict, StrategyError::NotFound(_)));
        assert!(verdict.to_string().contains("any frontend"));
        assert!(!verdict.retryable());
    }

    #[test]
    fn mixed_failures_keep_the_last_error() {
        let verdict = instance_verdict(vec![
            StrategyError::NotFound("a".to_string()),
            StrategyError::Transient("timeout".to_string()),
        ]);
        assert!(matches!(verdict, StrategyError::Transient(_)));
        assert!(verdict.retryable());
    }
}
