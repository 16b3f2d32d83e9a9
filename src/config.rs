use anyhow::Result;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_LINE_BROADCAST_URL: &str = "https://api.line.me/v2/bot/message/broadcast";
const DEFAULT_TELEMETRY_URL: &str =
    "https://api-v3.thaiwater.net/api/v1/thaiwater30/provinces/waterlevel";

/// Which halves of the pipeline this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    All,
    Scheduler,
    Worker,
}

impl RunMode {
    pub fn runs_scheduler(self) -> bool {
        matches!(self, RunMode::All | RunMode::Scheduler)
    }

    pub fn runs_worker(self) -> bool {
        matches!(self, RunMode::All | RunMode::Worker)
    }
}

impl FromStr for RunMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(RunMode::All),
            "scheduler" | "cron" => Ok(RunMode::Scheduler),
            "worker" => Ok(RunMode::Worker),
            other => Err(ConfigError::Invalid {
                key: "RUN_MODE",
                value: other.to_string(),
            }),
        }
    }
}

/// Messaging channel binding, resolved once at startup.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelConfig {
    Line { token: String, broadcast_url: String },
    Webhook { url: String },
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub group_id: String,
    pub auto_offset_reset: String,
    pub sasl_mechanism: String,
    pub username: String,
    pub password: String,
    pub security_protocol: String,
    pub max_retries: u32,
    pub circuit_breaker_cooldown: u64,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub url: String,
    pub scope_param: String,
    pub scope_value: String,
    pub timeout: Duration,
    pub utc_offset_hours: i32,
}

#[derive(Debug, Clone)]
pub struct AlertQueueConfig {
    pub queue_name: String,
    pub concurrency: usize,
    pub max_retry: u32,
    pub task_timeout: Duration,
    pub retry_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub run_mode: RunMode,
    pub database_url: String,
    pub db_max_connections: u32,
    pub kafka: KafkaConfig,
    pub telemetry: TelemetryConfig,
    pub alert_queue: AlertQueueConfig,
    pub channel: ChannelConfig,
    pub classifier_margin: f64,
    pub ingestion_interval: Duration,
    pub retention_interval: Duration,
    pub retention_keep_latest: u32,
    pub upload_dir: String,
    pub log_level: String,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let run_mode = env::var("RUN_MODE")
            .unwrap_or_else(|_| "all".to_string())
            .parse::<RunMode>()?;

        let db_host = env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string());
        let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
        let db_name = env::var("DB_DATABASE").unwrap_or_else(|_| "flood_watch".to_string());
        let db_user = env::var("DB_USER").unwrap_or_else(|_| "flood_watch".to_string());
        let db_pwd = env::var("DB_PWD").unwrap_or_else(|_| "flood_watch".to_string());

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );

        let kafka = KafkaConfig {
            bootstrap_servers: env::var("KAFKA_BOOTSTRAP_SERVERS")
                .unwrap_or_else(|_| "localhost:9092".to_string()),
            group_id: env::var("KAFKA_GROUP_ID")
                .unwrap_or_else(|_| "flood-watch-dispatcher".to_string()),
            auto_offset_reset: env::var("KAFKA_AUTO_OFFSET_RESET")
                .unwrap_or_else(|_| "earliest".to_string()),
            sasl_mechanism: env::var("KAFKA_SASL_MECHANISM")
                .unwrap_or_else(|_| "SCRAM-SHA-256".to_string()),
            username: env::var("KAFKA_USERNAME").unwrap_or_default(),
            password: env::var("KAFKA_PASSWORD").unwrap_or_default(),
            security_protocol: env::var("KAFKA_SECURITY_PROTOCOL")
                .unwrap_or_else(|_| "PLAINTEXT".to_string()),
            max_retries: parse_or("KAFKA_MAX_RETRIES", 5)?,
            circuit_breaker_cooldown: parse_or("KAFKA_CIRCUIT_BREAKER_COOLDOWN", 300)?,
        };

        let telemetry = TelemetryConfig {
            url: env::var("TELEMETRY_URL").unwrap_or_else(|_| DEFAULT_TELEMETRY_URL.to_string()),
            scope_param: env::var("TELEMETRY_SCOPE_PARAM")
                .unwrap_or_else(|_| "province_code".to_string()),
            scope_value: env::var("TELEMETRY_SCOPE_VALUE").unwrap_or_else(|_| "13".to_string()),
            timeout: Duration::from_secs(parse_or("TELEMETRY_TIMEOUT_SECS", 30)?),
            utc_offset_hours: parse_or("TELEMETRY_UTC_OFFSET_HOURS", 7)?,
        };

        let alert_queue = AlertQueueConfig {
            queue_name: env::var("ALERT_QUEUE_NAME")
                .unwrap_or_else(|_| "notifications".to_string()),
            concurrency: parse_or("ALERT_QUEUE_CONCURRENCY", 10)?,
            max_retry: parse_or("ALERT_TASK_MAX_RETRY", 3)?,
            task_timeout: Duration::from_secs(parse_or("ALERT_TASK_TIMEOUT_SECS", 30)?),
            retry_backoff: Duration::from_millis(parse_or("ALERT_RETRY_BACKOFF_MS", 1000)?),
        };
        if alert_queue.concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "ALERT_QUEUE_CONCURRENCY",
                value: "0".to_string(),
            }
            .into());
        }

        let channel = channel_from_env(
            &env::var("NOTIFIER_CHANNEL").unwrap_or_else(|_| "line".to_string()),
            env::var("LINE_CHANNEL_ACCESS_TOKEN").ok(),
            env::var("LINE_BROADCAST_URL").ok(),
            env::var("WEBHOOK_URL").ok(),
        )?;

        let classifier_margin: f64 = parse_or("CLASSIFIER_MARGIN", 0.2)?;
        if !classifier_margin.is_finite() || classifier_margin < 0.0 {
            return Err(ConfigError::Invalid {
                key: "CLASSIFIER_MARGIN",
                value: classifier_margin.to_string(),
            }
            .into());
        }

        Ok(Self {
            run_mode,
            database_url,
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", 20)?,
            kafka,
            telemetry,
            alert_queue,
            channel,
            classifier_margin,
            ingestion_interval: timer_period(
                "INGESTION_INTERVAL_SECS",
                parse_or("INGESTION_INTERVAL_SECS", 600)?,
            )?,
            retention_interval: timer_period(
                "RETENTION_INTERVAL_SECS",
                parse_or("RETENTION_INTERVAL_SECS", 86_400)?,
            )?,
            retention_keep_latest: parse_or("RETENTION_KEEP_LATEST", 5)?,
            upload_dir: env::var("UPLOAD_DIR").unwrap_or_else(|_| "./uploads".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Reads `key`, falling back to `default` when unset. A set but unparseable
/// value is an error rather than a silent default.
fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        _ => Ok(default),
    }
}

/// A timer period must be non-zero; `tokio::time::interval` panics otherwise.
fn timer_period(key: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: secs.to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

fn channel_from_env(
    kind: &str,
    line_token: Option<String>,
    line_url: Option<String>,
    webhook_url: Option<String>,
) -> Result<ChannelConfig, ConfigError> {
    match kind.trim().to_ascii_lowercase().as_str() {
        "line" => {
            let token = line_token
                .filter(|t| !t.is_empty())
                .ok_or(ConfigError::Missing {
                    key: "LINE_CHANNEL_ACCESS_TOKEN",
                })?;
            Ok(ChannelConfig::Line {
                token,
                broadcast_url: line_url
                    .filter(|u| !u.is_empty())
                    .unwrap_or_else(|| DEFAULT_LINE_BROADCAST_URL.to_string()),
            })
        }
        "webhook" => {
            let url = webhook_url
                .filter(|u| !u.is_empty())
                .ok_or(ConfigError::Missing { key: "WEBHOOK_URL" })?;
            Ok(ChannelConfig::Webhook { url })
        }
        other => Err(ConfigError::Invalid {
            key: "NOTIFIER_CHANNEL",
            value: other.to_string(),
        }),
    }
}
