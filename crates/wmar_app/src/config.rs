//! Process configuration, read once from the environment.
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use engine_logging::LogDestination;
use log::LevelFilter;
use wmar_core::{Credentials, CredentialsError};
use wmar_engine::{DriverSettings, FlowSettings, MonitorSettings, DEFAULT_SUBJECT};

pub const DEFAULT_TAX_YEAR: u16 = 2023;
pub const HISTORY_FILENAME: &str = ".wmar_history.json";
pub const LOG_FILENAME: &str = "wmar.log";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
}

#[derive(Clone)]
struct RawCredentials {
    ssn: Option<String>,
    dob: Option<String>,
    zip: Option<String>,
}

// Secrets must never reach the log.
impl fmt::Debug for RawCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("RawCredentials")
            .field("ssn", &shown(&self.ssn))
            .field("dob", &shown(&self.dob))
            .field("zip", &shown(&self.zip))
            .finish()
    }
}

/// Everything the binary reads from its environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    credentials: RawCredentials,
    pub tax_year: u16,
    pub submit: bool,
    pub verify_delay: Duration,
    pub pause_before_year: Duration,
    pub pause_after_year: Duration,
    pub slow_flow: Duration,
    pub headed: bool,
    pub state_path: Option<PathBuf>,
    pub history_path: Option<PathBuf>,
    pub result_screenshot: bool,
    pub subject: String,
    pub outbox_dir: Option<PathBuf>,
    pub artifact_dir: PathBuf,
    pub chrome_webdriver_url: String,
    pub firefox_webdriver_url: String,
    pub log_level: LevelFilter,
    pub log_destination: LogDestination,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let state_path = get("STATE_PATH").map(PathBuf::from);
        let history_path = get("HISTORY_PATH")
            .map(PathBuf::from)
            .or_else(|| state_path.as_deref().map(default_history_path));

        Ok(Self {
            credentials: RawCredentials {
                ssn: get("IRS_SSN"),
                dob: get("IRS_DOB"),
                zip: get("IRS_ZIP"),
            },
            tax_year: parse_or(&get, "TAX_YEAR", DEFAULT_TAX_YEAR)?,
            submit: flag(&get, "SUBMIT", true)?,
            verify_delay: millis(&get, "VERIFY_MS")?,
            pause_before_year: millis(&get, "PAUSE_BEFORE_YEAR_MS")?,
            pause_after_year: millis(&get, "PAUSE_AFTER_YEAR_MS")?,
            slow_flow: millis(&get, "SLOW_FLOW_MS")?,
            headed: flag(&get, "HEAD", false)?,
            state_path,
            history_path,
            result_screenshot: flag(&get, "RESULT_SHOT", false)?,
            subject: get("MAIL_SUBJECT").unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
            outbox_dir: get("OUTBOX_DIR").map(PathBuf::from),
            artifact_dir: get("ARTIFACT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            chrome_webdriver_url: get("CHROME_WEBDRIVER_URL")
                .unwrap_or_else(|| DriverSettings::default().chrome_url),
            firefox_webdriver_url: get("FIREFOX_WEBDRIVER_URL")
                .unwrap_or_else(|| DriverSettings::default().firefox_url),
            log_level: parse_or(&get, "LOG_LEVEL", LevelFilter::Info)?,
            log_destination: match get("LOG_DESTINATION") {
                None => LogDestination::Terminal,
                Some(value) => parse_destination(&value).ok_or(ConfigError::Invalid {
                    name: "LOG_DESTINATION",
                    value,
                })?,
            },
        })
    }

    /// Validated credentials; the SSN is canonicalized here.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let raw = &self.credentials;
        let ssn = raw.ssn.as_deref().ok_or(ConfigError::Missing("IRS_SSN"))?;
        let dob = raw.dob.as_deref().ok_or(ConfigError::Missing("IRS_DOB"))?;
        let zip = raw.zip.as_deref().ok_or(ConfigError::Missing("IRS_ZIP"))?;
        Ok(Credentials::new(ssn, dob, zip)?)
    }

    pub fn flow_settings(&self) -> FlowSettings {
        FlowSettings {
            tax_year: self.tax_year,
            submit: self.submit,
            verify_delay: self.verify_delay,
            pause_before_year: self.pause_before_year,
            pause_after_year: self.pause_after_year,
            slow_flow: self.slow_flow,
            ..FlowSettings::default()
        }
    }

    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            chrome_url: self.chrome_webdriver_url.clone(),
            firefox_url: self.firefox_webdriver_url.clone(),
            headless: !self.headed,
            ..DriverSettings::default()
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            subject: self.subject.clone(),
            result_screenshot: self.result_screenshot,
            ..MonitorSettings::default()
        }
    }
}

fn default_history_path(state_path: &Path) -> PathBuf {
    match state_path.parent() {
        Some(dir) => dir.join(HISTORY_FILENAME),
        None => PathBuf::from(HISTORY_FILENAME),
    }
}

fn parse_destination(value: &str) -> Option<LogDestination> {
    match value.to_ascii_lowercase().as_str() {
        "terminal" => Some(LogDestination::Terminal),
        "file" => Some(LogDestination::File),
        "both" => Some(LogDestination::Both),
        _ => None,
    }
}

fn parse_or<G, T>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match get(name) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

fn flag<G>(get: &G, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(name).as_deref() {
        None => Ok(default),
        Some("1") | Some("true") => Ok(true),
        Some("0") | Some("false") => Ok(false),
        Some(other) => Err(ConfigError::Invalid {
            name,
            value: other.to_string(),
        }),
    }
}

fn millis<G>(get: &G, name: &'static str) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, name, 0u64).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.tax_year, 2023);
        assert!(cfg.submit);
        assert!(!cfg.headed);
        assert_eq!(cfg.state_path, None);
        assert_eq!(cfg.history_path, None);
        assert_eq!(cfg.subject, "WMAR — amended return (daily)");
        assert_eq!(cfg.artifact_dir, PathBuf::from("."));
        assert_eq!(cfg.log_level, LevelFilter::Info);
        assert_eq!(cfg.log_destination, LogDestination::Terminal);
        assert_eq!(cfg.chrome_webdriver_url, "http://localhost:9515");
    }

    #[test]
    fn history_defaults_next_to_state() {
        let cfg = config(&[("STATE_PATH", "/var/lib/wmar/state.json")]).unwrap();
        assert_eq!(
            cfg.history_path,
            Some(PathBuf::from("/var/lib/wmar/.wmar_history.json"))
        );

        let cfg = config(&[("STATE_PATH", "s.json"), ("HISTORY_PATH", "h.json")]).unwrap();
        assert_eq!(cfg.history_path, Some(PathBuf::from("h.json")));
    }

    #[test]
    fn bad_numbers_are_configuration_errors() {
        let err = config(&[("VERIFY_MS", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "VERIFY_MS", .. }));
        assert!(config(&[("TAX_YEAR", "twenty")]).is_err());
        assert!(config(&[("SUBMIT", "maybe")]).is_err());
    }

    #[test]
    fn flow_settings_carry_overrides() {
        let cfg = config(&[("SUBMIT", "0"), ("TAX_YEAR", "2022"), ("SLOW_FLOW_MS", "250")]).unwrap();
        let flow = cfg.flow_settings();
        assert!(!flow.submit);
        assert_eq!(flow.tax_year, 2022);
        assert_eq!(flow.slow_flow, Duration::from_millis(250));
        assert!(cfg.driver_settings().headless);
    }

    #[test]
    fn credentials_are_required_and_validated() {
        let cfg = config(&[("IRS_SSN", "123-45-6789"), ("IRS_DOB", "01/02/1980")]).unwrap();
        assert!(matches!(cfg.credentials(), Err(ConfigError::Missing("IRS_ZIP"))));

        let cfg = config(&[
            ("IRS_SSN", "12345"),
            ("IRS_DOB", "01/02/1980"),
            ("IRS_ZIP", "12345"),
        ])
        .unwrap();
        assert!(matches!(cfg.credentials(), Err(ConfigError::Credentials(_))));

        let cfg = config(&[
            ("IRS_SSN", "123 45 6789"),
            ("IRS_DOB", "01/02/1980"),
            ("IRS_ZIP", "12345"),
        ])
        .unwrap();
        assert_eq!(cfg.credentials().unwrap().ssn(), "123-45-6789");
        assert!(!format!("{cfg:?}").contains("6789"));
    }
}
