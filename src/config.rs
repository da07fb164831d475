//! Runtime configuration.
//!
//! Loaded with `dotenv` + `clap::Parser`, following the reference
//! backend's tolerant `Config::from_env` idiom: malformed env overrides
//! fall back to the default rather than aborting startup.

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "triage-server", about = "Real-time fraud triage pipeline")]
pub struct Config {
    /// Redis connection string backing both the inbound and AI queue streams.
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Inbound stream of `TransactionEvent`s.
    #[arg(long, env = "TRANSACTIONS_STREAM", default_value = "deriv:transactions")]
    pub transactions_stream: String,

    /// Outbound stream consumed by the external AI investigator.
    #[arg(long, env = "AI_QUEUE_STREAM", default_value = "fraud:investigation:queue")]
    pub ai_queue_stream: String,

    #[arg(long, env = "CONSUMER_GROUP", default_value = "fraud-detector1")]
    pub consumer_group: String,

    #[arg(long, env = "CONSUMER_NAME", default_value = "processor-1")]
    pub consumer_name: String,

    /// SQLite file backing the Case Store.
    #[arg(long, env = "CASE_DB_PATH", default_value = "fraud_cases.db")]
    pub case_db_path: String,

    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:3000")]
    pub http_addr: String,

    /// Triage tick cadence in milliseconds (§4.3).
    #[arg(long, env = "TRIAGE_TICK_MS", default_value_t = 100)]
    pub triage_tick_ms: u64,

    /// Stats broadcast cadence in milliseconds (§4.7).
    #[arg(long, env = "STATS_TICK_MS", default_value_t = 1000)]
    pub stats_tick_ms: u64,

    /// Max batch size pulled from the stream per tick (N in §4.1).
    #[arg(long, env = "BATCH_SIZE", default_value_t = 1000)]
    pub batch_size: usize,

    /// Poison-record delivery count threshold (K in §7).
    #[arg(long, env = "POISON_RETRY_LIMIT", default_value_t = 5)]
    pub poison_retry_limit: u32,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Config::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::parse_from(["triage-server"]);
        assert_eq!(cfg.consumer_group, "fraud-detector1");
        assert_eq!(cfg.consumer_name, "processor-1");
        assert_eq!(cfg.transactions_stream, "deriv:transactions");
        assert_eq!(cfg.batch_size, 1000);
        assert_eq!(cfg.poison_retry_limit, 5);
    }
}
