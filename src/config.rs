use std::{str::FromStr, time::Duration};

use anyhow::{Context, Result};

use crate::db::models::Metric;

// ---------------------------------------------------------------------------
// SourceKind
// ---------------------------------------------------------------------------

/// Known sensor boards. The kind fixes which JSON keys the board reports and
/// which metric each key feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Environment,
    Water,
}

impl SourceKind {
    /// `(json key, metric)` pairs read from this board's body.
    pub fn fields(self) -> &'static [(&'static str, Metric)] {
        match self {
            SourceKind::Environment => &[
                ("Temperature", Metric::Temperature),
                ("Humidity", Metric::Humidity),
                ("CO2", Metric::Co2),
                ("FlowRate", Metric::FlowRate),
                ("Lux", Metric::Lux),
            ],
            SourceKind::Water => &[
                ("Distance", Metric::Level),
                ("TDS", Metric::Tds),
                ("pH_Value", Metric::Ph),
            ],
        }
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "environment" => Ok(Self::Environment),
            "water" => Ok(Self::Water),
            other => Err(anyhow::anyhow!("unknown source kind: {other:?}")),
        }
    }
}

/// One polled sensor endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub kind: SourceKind,
    pub url: String,
}

// ---------------------------------------------------------------------------
// StoreBackend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres { database_url: String },
    Memory,
}

impl StoreBackend {
    /// Backend name without connection details, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            StoreBackend::Postgres { .. } => "postgres",
            StoreBackend::Memory => "memory",
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreBackend,
    pub server_host: String,
    pub server_port: u16,
    /// Format: `"kind:url,kind:url"` (e.g. `"environment:http://10.0.0.2/"`).
    pub sources: Vec<Source>,
    /// Key of the aggregate device document the ingestion loop maintains.
    pub device_key: String,
    /// Fixed delay between ingestion cycles.
    pub retry_delay: Duration,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_client_id: String,
    /// First segment of `<namespace>/<device_id>/commands`.
    pub topic_namespace: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            store: parse_store_backend(&optional("STORE_BACKEND", "postgres"))?,
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "5000")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            sources: parse_sources(&optional("SENSOR_SOURCES", ""))?,
            device_key: optional("DEVICE_KEY", "default"),
            retry_delay: Duration::from_secs(
                optional("RETRY_DELAY_SECS", "1")
                    .parse()
                    .context("RETRY_DELAY_SECS must be a non-negative integer")?,
            ),
            mqtt_host: optional("MQTT_HOST", "127.0.0.1"),
            mqtt_port: optional("MQTT_PORT", "1883")
                .parse()
                .context("MQTT_PORT must be a valid port number")?,
            mqtt_client_id: optional("MQTT_CLIENT_ID", "hydro-telemetry"),
            topic_namespace: optional("COMMAND_TOPIC_NAMESPACE", "hydro"),
        })
    }
}

fn parse_store_backend(raw: &str) -> Result<StoreBackend> {
    match raw.trim() {
        "postgres" => Ok(StoreBackend::Postgres {
            database_url: required("DATABASE_URL")?,
        }),
        "memory" => Ok(StoreBackend::Memory),
        other => Err(anyhow::anyhow!(
            "STORE_BACKEND must be 'postgres' or 'memory', got: {other:?}"
        )),
    }
}

/// Parse `"kind:url,kind:url"` into a list of sources.
///
/// Only the first `:` separates kind from URL, so URLs keep their scheme.
fn parse_sources(raw: &str) -> Result<Vec<Source>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (kind, url) = entry.split_once(':').with_context(|| {
                format!("SENSOR_SOURCES entry must be 'kind:url', got: {entry:?}")
            })?;
            let kind = kind
                .trim()
                .parse::<SourceKind>()
                .with_context(|| format!("unknown source kind in SENSOR_SOURCES entry {entry:?}"))?;
            let url = url.trim();
            if url.is_empty() {
                anyhow::bail!("SENSOR_SOURCES entry {entry:?} has an empty url");
            }
            Ok(Source {
                kind,
                url: url.to_owned(),
            })
        })
        .collect()
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sources_empty() {
        assert!(parse_sources("").unwrap().is_empty());
    }

    #[test]
    fn parse_sources_keeps_url_scheme() {
        let sources =
            parse_sources("environment:http://172.25.60.213/,water:http://172.25.161.53/")
                .unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].kind, SourceKind::Environment);
        assert_eq!(sources[0].url, "http://172.25.60.213/");
        assert_eq!(sources[1].kind, SourceKind::Water);
        assert_eq!(sources[1].url, "http://172.25.161.53/");
    }

    #[test]
    fn parse_sources_unknown_kind_errors() {
        let err = parse_sources("soil:http://x/").unwrap_err();
        assert!(format!("{err:#}").contains("unknown source kind"));
    }

    #[test]
    fn parse_sources_missing_colon_errors() {
        let err = parse_sources("environment").unwrap_err();
        assert!(err.to_string().contains("kind:url"));
    }

    #[test]
    fn parse_sources_empty_url_errors() {
        let err = parse_sources("water:").unwrap_err();
        assert!(err.to_string().contains("empty url"));
    }

    #[test]
    fn memory_backend_needs_no_database_url() {
        let backend = parse_store_backend("memory").unwrap();
        assert_eq!(backend, StoreBackend::Memory);
        assert_eq!(backend.name(), "memory");
    }

    #[test]
    fn unknown_backend_errors() {
        let err = parse_store_backend("mongo").unwrap_err();
        assert!(err.to_string().contains("STORE_BACKEND"));
    }

    #[test]
    fn water_board_feeds_level_from_distance() {
        let fields = SourceKind::Water.fields();
        assert!(fields.contains(&("Distance", Metric::Level)));
        assert!(fields.contains(&("pH_Value", Metric::Ph)));
    }

    #[test]
    fn source_kind_from_str_roundtrip() {
        assert_eq!("environment".parse::<SourceKind>().unwrap(), SourceKind::Environment);
        assert_eq!("water".parse::<SourceKind>().unwrap(), SourceKind::Water);
    }
}
