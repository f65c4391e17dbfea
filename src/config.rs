use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::sync::OnceLock;

/// How to report a gradebook override whose grade item is waiting for regrading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaleOverridePolicy {
    /// Show zero. Matches the behaviour of older quiz pages.
    #[default]
    Zero,
    /// Show the gradebook's final grade as stored.
    FinalGrade,
}

impl FromStr for StaleOverridePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zero" => Ok(StaleOverridePolicy::Zero),
            "final_grade" => Ok(StaleOverridePolicy::FinalGrade),
            other => Err(format!("unknown policy '{}', expected 'zero' or 'final_grade'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub webhook_secret: String,
    pub notification_webhook_url: String,
    pub public_rps: u32,
    pub overdue_sweep_secs: u64,
    pub stale_override_policy: StaleOverridePolicy,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            jwt_secret: get_env("JWT_SECRET")?,
            webhook_secret: get_env("WEBHOOK_SECRET")?,
            notification_webhook_url: get_env("NOTIFICATION_WEBHOOK_URL")?,
            public_rps: get_env_parse("PUBLIC_RPS")?,
            overdue_sweep_secs: get_env_parse_or("OVERDUE_SWEEP_SECS", 60)?,
            stale_override_policy: get_env_parse_or(
                "STALE_OVERRIDE_POLICY",
                StaleOverridePolicy::default(),
            )?,
        })
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_parse<T>(name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get_env(name)?;
    raw.parse()
        .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e)))
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(_) => get_env_parse(name),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}
