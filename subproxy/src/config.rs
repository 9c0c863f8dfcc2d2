use crate::types::{Result, SubproxyError};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const DEFAULT_TEST_URL: &str = "https://www.google.com/generate_204";
const DEFAULT_UPDATE_INTERVAL: &str = "6h";
const DEFAULT_TEST_INTERVAL: &str = "30m";
const DEFAULT_TIMEOUT_MS: u64 = 8000;

const DEFAULT_LISTEN: &str = "127.0.0.1";
const DEFAULT_SOCKS_PORT: u16 = 1080;
const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_SING_BOX_BIN: &str = "sing-box";

const DEFAULT_GEOIP_CN_URL: &str =
    "https://raw.githubusercontent.com/Dreista/sing-box-rule-set-cn/rule-set/apnic-cn-ipv4.srs";
const DEFAULT_GEOSITE_CN_URL: &str =
    "https://raw.githubusercontent.com/Dreista/sing-box-rule-set-cn/rule-set/accelerated-domains.china.conf.srs";
const DEFAULT_RULESET_UPDATE: &str = "1d";

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
pub const DEFAULT_DATA_DIR: &str = ".subproxy-cli";

/// Fallback used when `interval.update` does not parse or is zero.
pub const DEFAULT_UPDATE_PERIOD: Duration = Duration::from_secs(6 * 60 * 60);

/// Longest accepted update period. Larger values are clamped to it.
pub const MAX_UPDATE_PERIOD: Duration = Duration::from_secs(365 * 86_400);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Config file as written by the user. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInput {
    pub subscriptions: Option<Vec<String>>,
    pub nodes: Option<Vec<Value>>,
    pub exclude_keywords: Option<Vec<String>>,
    pub test: Option<TestInput>,
    pub interval: Option<IntervalInput>,
    pub inbound: Option<InboundInput>,
    pub sing_box: Option<SingBoxInput>,
    pub rule_set: Option<RuleSetInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestInput {
    pub url: Option<String>,
    pub timeout_ms: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntervalInput {
    pub update: Option<String>,
    pub test: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundInput {
    pub listen: Option<String>,
    pub socks_port: Option<u16>,
    pub http_port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingBoxInput {
    pub bin: Option<String>,
    pub work_dir: Option<String>,
    pub config_path: Option<String>,
    pub log_level: Option<LogLevel>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSetInput {
    pub geoip_cn_url: Option<String>,
    pub geosite_cn_url: Option<String>,
    pub update_interval: Option<String>,
}

/// Fully defaulted runtime policy. Nothing downstream re-checks these fields.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedConfig {
    pub subscriptions: Vec<String>,
    pub nodes: Vec<Value>,
    pub exclude_keywords: Vec<String>,
    pub test: TestPolicy,
    pub interval: IntervalPolicy,
    pub inbound: InboundPolicy,
    pub sing_box: SingBoxPolicy,
    pub rule_set: RuleSetPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestPolicy {
    pub url: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntervalPolicy {
    pub update: String,
    pub test: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundPolicy {
    pub listen: String,
    pub socks_port: u16,
    pub http_port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SingBoxPolicy {
    pub bin: String,
    pub work_dir: PathBuf,
    pub config_path: PathBuf,
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleSetPolicy {
    pub geoip_cn_url: String,
    pub geosite_cn_url: String,
    pub update_interval: String,
}

impl NormalizedConfig {
    /// Daemon tick period. Never zero and never above `MAX_UPDATE_PERIOD`.
    pub fn update_period(&self) -> Duration {
        let period = parse_duration(&self.interval.update, DEFAULT_UPDATE_PERIOD);
        if period.is_zero() {
            DEFAULT_UPDATE_PERIOD
        } else {
            period.min(MAX_UPDATE_PERIOD)
        }
    }
}

/// Resolve the config path against the working directory, read the YAML file
/// and normalize it relative to the file's directory.
pub async fn load_config(config_path: Option<&Path>) -> Result<NormalizedConfig> {
    let resolved = resolve_config_path(config_path)?;
    debug!("Loading config from {}", resolved.display());

    let raw = tokio::fs::read_to_string(&resolved)
        .await
        .map_err(|e| SubproxyError::Config(format!("Failed to read {}: {}", resolved.display(), e)))?;

    let input = parse_config(&raw)?;
    let base_dir = resolved.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok(normalize_config(input, &base_dir))
}

pub fn resolve_config_path(config_path: Option<&Path>) -> Result<PathBuf> {
    let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

pub fn parse_config(raw: &str) -> Result<ConfigInput> {
    if raw.trim().is_empty() {
        return Ok(ConfigInput::default());
    }
    Ok(serde_yaml::from_str(raw)?)
}

pub fn normalize_config(input: ConfigInput, base_dir: &Path) -> NormalizedConfig {
    let subscriptions = non_blank(input.subscriptions);
    let nodes = input.nodes.unwrap_or_default();
    let exclude_keywords = non_blank(input.exclude_keywords);

    let test = input.test.unwrap_or_default();
    let interval = input.interval.unwrap_or_default();
    let inbound = input.inbound.unwrap_or_default();
    let sing_box = input.sing_box.unwrap_or_default();
    let rule_set = input.rule_set.unwrap_or_default();

    let timeout_ms = match test.timeout_ms {
        // Fractional milliseconds truncate; anything below 1ms is unusable.
        Some(ms) if ms.is_finite() && ms >= 1.0 => ms as u64,
        _ => DEFAULT_TIMEOUT_MS,
    };

    let work_dir = trimmed(sing_box.work_dir.as_deref())
        .map(PathBuf::from)
        .unwrap_or_else(|| base_dir.join(DEFAULT_DATA_DIR));
    let config_path = trimmed(sing_box.config_path.as_deref())
        .map(PathBuf::from)
        .unwrap_or_else(|| work_dir.join("sing-box.json"));

    NormalizedConfig {
        subscriptions,
        nodes,
        exclude_keywords,
        test: TestPolicy {
            url: or_default(test.url.as_deref(), DEFAULT_TEST_URL),
            timeout_ms,
        },
        interval: IntervalPolicy {
            update: or_default(interval.update.as_deref(), DEFAULT_UPDATE_INTERVAL),
            test: or_default(interval.test.as_deref(), DEFAULT_TEST_INTERVAL),
        },
        inbound: InboundPolicy {
            listen: or_default(inbound.listen.as_deref(), DEFAULT_LISTEN),
            socks_port: inbound.socks_port.unwrap_or(DEFAULT_SOCKS_PORT),
            http_port: inbound.http_port.unwrap_or(DEFAULT_HTTP_PORT),
        },
        sing_box: SingBoxPolicy {
            bin: or_default(sing_box.bin.as_deref(), DEFAULT_SING_BOX_BIN),
            work_dir,
            config_path,
            log_level: sing_box.log_level.unwrap_or_default(),
        },
        rule_set: RuleSetPolicy {
            geoip_cn_url: or_default(rule_set.geoip_cn_url.as_deref(), DEFAULT_GEOIP_CN_URL),
            geosite_cn_url: or_default(rule_set.geosite_cn_url.as_deref(), DEFAULT_GEOSITE_CN_URL),
            update_interval: or_default(rule_set.update_interval.as_deref(), DEFAULT_RULESET_UPDATE),
        },
    }
}

/// Parse `<amount><unit>` with unit one of `s`, `m`, `h`, `d` (case-insensitive,
/// optional whitespace between). Anything else yields `fallback`.
pub fn parse_duration(value: &str, fallback: Duration) -> Duration {
    let trimmed = value.trim();
    let Some(unit) = trimmed.chars().last() else {
        return fallback;
    };
    let multiplier: u64 = match unit.to_ascii_lowercase() {
        's' => 1,
        'm' => 60,
        'h' => 3_600,
        'd' => 86_400,
        _ => return fallback,
    };

    let amount = trimmed[..trimmed.len() - unit.len_utf8()].trim_end();
    if amount.is_empty() || !amount.bytes().all(|b| b.is_ascii_digit()) {
        return fallback;
    }

    amount
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .map(Duration::from_secs)
        .unwrap_or(fallback)
}

// List entries are kept verbatim; only blank ones are dropped.
fn non_blank(values: Option<Vec<String>>) -> Vec<String> {
    values
        .unwrap_or_default()
        .into_iter()
        .filter(|value| !value.trim().is_empty())
        .collect()
}

fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn or_default(value: Option<&str>, default: &str) -> String {
    trimmed(value).unwrap_or(default).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_defaults_and_trims_inputs() {
        let raw = r#"
subscriptions:
  - " https://example.com/sub "
  - ""
excludeKeywords: [" HK ", ""]
test:
  url: " https://example.com/test "
interval:
  update: " 2h "
  test: " 10m "
inbound:
  listen: " 0.0.0.0 "
  socksPort: 1081
  httpPort: 8081
singBox:
  bin: " sing-box "
  workDir: ""
ruleSet:
  updateInterval: " 2d "
"#;
        let base_dir = Path::new("/tmp/project");
        let config = normalize_config(parse_config(raw).unwrap(), base_dir);

        assert_eq!(config.subscriptions, vec![" https://example.com/sub ".to_string()]);
        assert_eq!(config.exclude_keywords, vec![" HK ".to_string()]);
        assert_eq!(config.test.url, "https://example.com/test");
        assert_eq!(config.test.timeout_ms, 8000);
        assert_eq!(config.interval.update, "2h");
        assert_eq!(config.interval.test, "10m");
        assert_eq!(config.inbound.listen, "0.0.0.0");
        assert_eq!(config.inbound.socks_port, 1081);
        assert_eq!(config.inbound.http_port, 8081);
        assert_eq!(config.sing_box.bin, "sing-box");
        assert_eq!(config.sing_box.work_dir, base_dir.join(".subproxy-cli"));
        assert_eq!(
            config.sing_box.config_path,
            base_dir.join(".subproxy-cli").join("sing-box.json")
        );
        assert_eq!(config.sing_box.log_level, LogLevel::Info);
        assert_eq!(config.rule_set.update_interval, "2d");
        assert_eq!(config.rule_set.geoip_cn_url, DEFAULT_GEOIP_CN_URL);
    }

    #[test]
    fn test_empty_file_uses_all_defaults() {
        let config = normalize_config(parse_config("  \n").unwrap(), Path::new("/srv"));
        assert!(config.subscriptions.is_empty());
        assert!(config.nodes.is_empty());
        assert_eq!(config.inbound.socks_port, 1080);
        assert_eq!(config.inbound.http_port, 8080);
        assert_eq!(config.interval.update, "6h");
        assert_eq!(config.update_period(), Duration::from_secs(6 * 3600));
    }

    #[test]
    fn test_non_positive_timeout_falls_back() {
        let config = normalize_config(parse_config("test:\n  timeoutMs: -5\n").unwrap(), Path::new("/"));
        assert_eq!(config.test.timeout_ms, DEFAULT_TIMEOUT_MS);

        let config = normalize_config(parse_config("test:\n  timeoutMs: 1500\n").unwrap(), Path::new("/"));
        assert_eq!(config.test.timeout_ms, 1500);
    }

    #[test]
    fn test_fractional_timeout_is_accepted() {
        let config = normalize_config(parse_config("test:\n  timeoutMs: 1500.5\n").unwrap(), Path::new("/"));
        assert_eq!(config.test.timeout_ms, 1500);

        let config = normalize_config(parse_config("test:\n  timeoutMs: 0.5\n").unwrap(), Path::new("/"));
        assert_eq!(config.test.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_update_period_is_never_zero_or_unbounded() {
        let period = |raw: &str| normalize_config(parse_config(raw).unwrap(), Path::new("/")).update_period();

        assert_eq!(period("interval:\n  update: 0s\n"), DEFAULT_UPDATE_PERIOD);
        assert_eq!(period("interval:\n  update: 0d\n"), DEFAULT_UPDATE_PERIOD);
        assert_eq!(period("interval:\n  update: 106751991167301d\n"), MAX_UPDATE_PERIOD);
        assert_eq!(period("interval:\n  update: 90s\n"), Duration::from_secs(90));
    }

    #[test]
    fn test_log_level_and_static_nodes() {
        let raw = r#"
singBox:
  logLevel: warn
  configPath: /etc/sing-box/config.json
nodes:
  - type: direct
    tag: home
"#;
        let config = normalize_config(parse_config(raw).unwrap(), Path::new("/srv"));
        assert_eq!(config.sing_box.log_level, LogLevel::Warn);
        assert_eq!(config.sing_box.config_path, PathBuf::from("/etc/sing-box/config.json"));
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.nodes[0]["tag"], "home");
    }

    #[test]
    fn test_parses_duration_with_fallback() {
        let fallback = Duration::from_millis(123);
        assert_eq!(parse_duration("10s", fallback), Duration::from_secs(10));
        assert_eq!(parse_duration("5m", fallback), Duration::from_secs(300));
        assert_eq!(parse_duration("2h", fallback), Duration::from_secs(7_200));
        assert_eq!(parse_duration("1d", fallback), Duration::from_secs(86_400));
        assert_eq!(parse_duration(" 3 H ", fallback), Duration::from_secs(10_800));
        assert_eq!(parse_duration("invalid", fallback), fallback);
        assert_eq!(parse_duration("h", fallback), fallback);
        assert_eq!(parse_duration("1.5h", fallback), fallback);
        assert_eq!(parse_duration("", fallback), fallback);
    }
}
