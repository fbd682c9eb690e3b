use anyhow::Result;
use std::time::Duration;

pub const DEFAULT_MIN_CONTENT_BYTES: u64 = 100 * 1024;
pub const DEFAULT_CHUNK_BUDGET: usize = 450;
pub const DEFAULT_COVER_DURATION: f64 = 5.0;

const DEFAULT_FRONTEND_INSTANCES: &[&str] = &[
    "https://yewtu.be",
    "https://inv.nadeko.net",
    "https://invidious.nerdvpn.de",
];

/// Runtime configuration, read once from the environment and passed into
/// every component constructor. Nothing re-reads the environment mid-job.
#[derive(Debug, Clone)]
pub struct Config {
    pub tmdb_api_key: Option<String>,
    pub allow_degraded_cover: bool,

    pub proxy_keys: Vec<String>,
    pub frontend_instances: Vec<String>,

    pub elevenlabs_key: Option<String>,
    pub eleven_voice_id: String,
    pub eleven_model_id: String,
    pub edge_voice: String,

    pub min_content_bytes: u64,
    pub chunk_budget: usize,
    pub cover_duration: f64,
    pub strategy_attempts: u32,
    pub backoff_base: Duration,

    pub metadata_timeout: Duration,
    pub download_timeout: Duration,
    pub transcode_timeout: Duration,
}

fn default_voice_id() -> String {
    "JBFqnCBsd6RMkjVDRZzb".to_string()
}

fn default_model_id() -> String {
    "eleven_multilingual_v2".to_string()
}

fn default_edge_voice() -> String {
    "tr-TR-AhmetNeural".to_string()
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Proxy credentials come either as a comma-separated `RAPIDAPI_KEYS` or as
/// suffix-enumerated `RAPIDAPI_KEY_1`, `RAPIDAPI_KEY_2`, ... entries.
fn collect_proxy_keys(lookup: &impl Fn(&str) -> Option<String>) -> Vec<String> {
    if let Some(raw) = lookup("RAPIDAPI_KEYS") {
        let keys = split_csv(&raw);
        if !keys.is_empty() {
            return keys;
        }
    }

    let mut keys = Vec::new();
    for idx in 1.. {
        match lookup(&format!("RAPIDAPI_KEY_{}", idx)) {
            Some(key) if !key.trim().is_empty() => keys.push(key.trim().to_string()),
            _ => break,
        }
    }
    keys
}

fn parse_bool(raw: Option<String>, default: bool) -> bool {
    match raw.as_deref() {
        Some("1") | Some("true") | Some("yes") | Some("on") => true,
        Some("0") | Some("false") | Some("no") | Some("off") => false,
        _ => default,
    }
}

fn parse_u64(raw: Option<String>, default: u64) -> u64 {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let tmdb_api_key = lookup("TMDB_API_KEY").filter(|k| !k.trim().is_empty());
        let allow_degraded_cover = parse_bool(lookup("FRAGMAN_ALLOW_DEGRADED_COVER"), true);

        if tmdb_api_key.is_none() && !allow_degraded_cover {
            anyhow::bail!("TMDB_API_KEY missing and degraded cover disabled");
        }

        let frontend_instances = match lookup("FRAGMAN_FRONTEND_INSTANCES") {
            Some(raw) if !split_csv(&raw).is_empty() => split_csv(&raw),
            _ => DEFAULT_FRONTEND_INSTANCES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };

        Ok(Self {
            tmdb_api_key,
            allow_degraded_cover,
            proxy_keys: collect_proxy_keys(&lookup),
            frontend_instances,
            elevenlabs_key: lookup("ELEVENLABS_API_KEY").filter(|k| !k.trim().is_empty()),
            eleven_voice_id: lookup("ELEVEN_VOICE_ID").unwrap_or_else(default_voice_id),
            eleven_model_id: lookup("ELEVEN_MODEL_ID").unwrap_or_else(default_model_id),
            edge_voice: lookup("FRAGMAN_EDGE_VOICE").unwrap_or_else(default_edge_voice),
            min_content_bytes: parse_u64(
                lookup("FRAGMAN_MIN_CONTENT_BYTES"),
                DEFAULT_MIN_CONTENT_BYTES,
            ),
            chunk_budget: parse_u64(lookup("FRAGMAN_CHUNK_BUDGET"), DEFAULT_CHUNK_BUDGET as u64)
                as usize,
            cover_duration: lookup("FRAGMAN_COVER_DURATION")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_COVER_DURATION),
            strategy_attempts: parse_u64(lookup("FRAGMAN_STRATEGY_ATTEMPTS"), 2) as u32,
            backoff_base: Duration::from_secs(parse_u64(lookup("FRAGMAN_BACKOFF_BASE_SECS"), 2)),
            metadata_timeout: Duration::from_secs(parse_u64(
                lookup("FRAGMAN_METADATA_TIMEOUT_SECS"),
                15,
            )),
            download_timeout: Duration::from_secs(parse_u64(
                lookup("FRAGMAN_DOWNLOAD_TIMEOUT_SECS"),
                300,
            )),
            transcode_timeout: Duration::from_secs(parse_u64(
                lookup("FRAGMAN_TRANSCODE_TIMEOUT_SECS"),
                300,
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_any_env() {
        let cfg = load(&[]).unwrap();
        assert!(cfg.tmdb_api_key.is_none());
        assert!(cfg.allow_degraded_cover);
        assert!(cfg.proxy_keys.is_empty());
        assert_eq!(cfg.min_content_bytes, DEFAULT_MIN_CONTENT_BYTES);
        assert_eq!(cfg.chunk_budget, DEFAULT_CHUNK_BUDGET);
        assert_eq!(cfg.metadata_timeout, Duration::from_secs(15));
        assert!(!cfg.frontend_instances.is_empty());
    }

    #[test]
    fn missing_tmdb_key_fatal_when_degrade_disabled() {
        let err = load(&[("FRAGMAN_ALLOW_DEGRADED_COVER", "false")]).unwrap_err();
        assert!(err.to_string().contains("TMDB_API_KEY"));
    }

    #[test]
    fn missing_tmdb_key_tolerated_when_degrade_enabled() {
        let cfg = load(&[("FRAGMAN_ALLOW_DEGRADED_COVER", "true")]).unwrap();
        assert!(cfg.tmdb_api_key.is_none());
    }

    #[test]
    fn proxy_keys_from_csv() {
        let cfg = load(&[("RAPIDAPI_KEYS", "aaa, bbb,ccc,")]).unwrap();
        assert_eq!(cfg.proxy_keys, vec!["aaa", "bbb", "ccc"]);
    }

    #[test]
    fn proxy_keys_from_suffix_enumeration() {
        let cfg = load(&[
            ("RAPIDAPI_KEY_1", "first"),
            ("RAPIDAPI_KEY_2", "second"),
            // gap: RAPIDAPI_KEY_4 must not be picked up
            ("RAPIDAPI_KEY_4", "orphan"),
        ])
        .unwrap();
        assert_eq!(cfg.proxy_keys, vec!["first", "second"]);
    }

    #[test]
    fn csv_takes_precedence_over_suffixes() {
        let cfg = load(&[("RAPIDAPI_KEYS", "only"), ("RAPIDAPI_KEY_1", "ignored")]).unwrap();
        assert_eq!(cfg.proxy_keys, vec!["only"]);
    }

    #[test]
    fn threshold_override() {
        let cfg = load(&[("FRAGMAN_MIN_CONTENT_BYTES", "1048576")]).unwrap();
        assert_eq!(cfg.min_content_bytes, 1024 * 1024);
    }
}
