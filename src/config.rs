//! Strongly-typed configuration for the probe.
//!
//! Configuration values can be constructed from defaults, loaded from
//! environment variables (with optional `.env` support), or read from the
//! selectors/profile YAML files that describe a contest page.

use std::env;
use std::fmt;
use std::fs;
use std::num::ParseIntError;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dotenvy::dotenv;
use serde::de::{Deserialize, Deserializer, Error as DeError};
use serde::ser::{Serialize, Serializer};
use serde::{Deserialize as DeriveDeserialize, Serialize as DeriveSerialize};
use thiserror::Error;

use crate::browser::Viewport;
use crate::classifier::DEFAULT_GATE_PATTERNS;
use crate::navigator::RetryPolicy;
use crate::types::{Profile, SelectorSpec};

/// Contest label used when the selectors file carries no `meta` section.
pub const DEFAULT_CONTEST_LABEL: &str = "grattweb.fr / instant_gagnant";

/// Verbosity level for probe logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Minimal,
    Medium,
    Detailed,
}

impl Verbosity {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Verbosity::Minimal => 0,
            Verbosity::Medium => 1,
            Verbosity::Detailed => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Verbosity::Minimal),
            1 => Some(Verbosity::Medium),
            2 => Some(Verbosity::Detailed),
            _ => None,
        }
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::Medium
    }
}

impl Serialize for Verbosity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Verbosity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        Verbosity::from_u8(value).ok_or_else(|| {
            DeError::custom(format!(
                "invalid verbosity value {value}; expected 0, 1, or 2"
            ))
        })
    }
}

/// Bounded waits applied by the navigator and the snapshot capturer.
#[derive(Debug, Clone, PartialEq, Eq, DeriveSerialize, DeriveDeserialize)]
#[serde(default)]
pub struct Timings {
    #[serde(alias = "navigationTimeoutMs")]
    pub navigation_timeout_ms: u64,
    #[serde(alias = "networkIdleTimeoutMs")]
    pub network_idle_timeout_ms: u64,
    #[serde(alias = "settleDelayMs")]
    pub settle_delay_ms: u64,
    #[serde(alias = "captureTimeoutMs")]
    pub capture_timeout_ms: u64,
    #[serde(alias = "captureSettleMs")]
    pub capture_settle_ms: u64,
    #[serde(alias = "ladderRetryDelayMs")]
    pub ladder_retry_delay_ms: u64,
    /// Bound on each DOM query, text read or fill once the page has loaded.
    #[serde(alias = "domTimeoutMs")]
    pub dom_timeout_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 15_000,
            network_idle_timeout_ms: 5_000,
            settle_delay_ms: 800,
            capture_timeout_ms: 10_000,
            capture_settle_ms: 500,
            ladder_retry_delay_ms: 1_000,
            dom_timeout_ms: 5_000,
        }
    }
}

impl Timings {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn network_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.network_idle_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn capture_settle(&self) -> Duration {
        Duration::from_millis(self.capture_settle_ms)
    }

    pub fn ladder_retry_delay(&self) -> Duration {
        Duration::from_millis(self.ladder_retry_delay_ms)
    }

    pub fn dom_timeout(&self) -> Duration {
        Duration::from_millis(self.dom_timeout_ms)
    }
}

/// Configuration values for a probe run.
#[derive(Debug, Clone, DeriveSerialize, DeriveDeserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub url: Option<String>,
    pub contest: String,
    pub selectors: SelectorSpec,
    pub profile: Profile,
    #[serde(alias = "retryPolicy")]
    pub retry_policy: RetryPolicy,
    pub timings: Timings,
    #[serde(alias = "gatePatterns")]
    pub gate_patterns: Vec<String>,
    #[serde(alias = "artifactDir")]
    pub artifact_dir: PathBuf,
    pub verbose: Verbosity,
    pub headless: bool,
    #[serde(alias = "chromeExecutable")]
    pub chrome_executable: Option<PathBuf>,
    #[serde(alias = "userDataDir")]
    pub user_data_dir: Option<PathBuf>,
    #[serde(alias = "browserArgs")]
    pub browser_args: Vec<String>,
    pub locale: String,
    #[serde(alias = "timezoneId")]
    pub timezone_id: String,
    pub viewport: Viewport,
    #[serde(alias = "ignoreHttpsErrors")]
    pub ignore_https_errors: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            url: None,
            contest: DEFAULT_CONTEST_LABEL.to_string(),
            selectors: SelectorSpec::default(),
            profile: Profile::default(),
            retry_policy: RetryPolicy::default(),
            timings: Timings::default(),
            gate_patterns: DEFAULT_GATE_PATTERNS
                .iter()
                .map(|pattern| pattern.to_string())
                .collect(),
            artifact_dir: PathBuf::from("data/screenshots"),
            verbose: Verbosity::default(),
            headless: true,
            chrome_executable: None,
            user_data_dir: None,
            browser_args: Vec::new(),
            locale: "fr-FR".to_string(),
            timezone_id: "Europe/Paris".to_string(),
            viewport: Viewport::default(),
            ignore_https_errors: false,
        }
    }
}

impl ProbeConfig {
    /// Construct a configuration by reading relevant environment variables, after
    /// loading a `.env` file if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv();
        let mut config = ProbeConfig::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Overlay `FORMPROBE_*` environment variables onto this configuration.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = env_var("FORMPROBE_URL") {
            self.url = Some(value);
        }

        if let Some(value) = env_var("FORMPROBE_CONTEST") {
            self.contest = value;
        }

        if let Some(value) = env_var("FORMPROBE_RETRY_DELAYS_MS") {
            self.retry_policy = parse_retry_delays("FORMPROBE_RETRY_DELAYS_MS", &value)?;
        }

        if let Some(value) = env_var("FORMPROBE_NAVIGATION_TIMEOUT_MS") {
            self.timings.navigation_timeout_ms =
                parse_u64("FORMPROBE_NAVIGATION_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = env_var("FORMPROBE_NETWORK_IDLE_TIMEOUT_MS") {
            self.timings.network_idle_timeout_ms =
                parse_u64("FORMPROBE_NETWORK_IDLE_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = env_var("FORMPROBE_SETTLE_DELAY_MS") {
            self.timings.settle_delay_ms = parse_u64("FORMPROBE_SETTLE_DELAY_MS", &value)?;
        }

        if let Some(value) = env_var("FORMPROBE_CAPTURE_TIMEOUT_MS") {
            self.timings.capture_timeout_ms = parse_u64("FORMPROBE_CAPTURE_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = env_var("FORMPROBE_DOM_TIMEOUT_MS") {
            self.timings.dom_timeout_ms = parse_u64("FORMPROBE_DOM_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = env_var("FORMPROBE_GATE_PATTERNS") {
            self.gate_patterns = value
                .split('|')
                .map(str::trim)
                .filter(|pattern| !pattern.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(value) = env_var("FORMPROBE_ARTIFACT_DIR") {
            self.artifact_dir = PathBuf::from(value);
        }

        if let Some(value) = env_var("FORMPROBE_VERBOSE") {
            let parsed = parse_u8("FORMPROBE_VERBOSE", &value)?;
            self.verbose = Verbosity::from_u8(parsed).ok_or_else(|| {
                ConfigError::invalid_enum("FORMPROBE_VERBOSE", parsed.to_string())
            })?;
        }

        if let Some(value) = env_var("FORMPROBE_HEADLESS") {
            self.headless = parse_bool("FORMPROBE_HEADLESS", &value)?;
        }

        if let Some(value) = env_var("FORMPROBE_CHROME_BIN") {
            self.chrome_executable = Some(PathBuf::from(value));
        }

        if let Some(value) = env_var("FORMPROBE_LOCALE") {
            self.locale = value;
        }

        if let Some(value) = env_var("FORMPROBE_TIMEZONE") {
            self.timezone_id = value;
        }

        Ok(())
    }

    /// Construct a configuration from a selectors file and an optional profile file.
    pub fn from_yaml_files(selectors: &Path, profile: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = ProbeConfig::default();
        config.load_selectors_file(selectors)?;
        if let Some(profile) = profile {
            config.load_profile_file(profile)?;
        }
        Ok(config)
    }

    /// Read a selectors file (`meta`, `form.url`, `selectors`) into this configuration.
    pub fn load_selectors_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = read_file(path)?;
        self.apply_selectors_yaml(&text)
            .map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Read a profile file (`profile.*`, `profile.preferences.accept_terms`).
    pub fn load_profile_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = read_file(path)?;
        self.apply_profile_yaml(&text)
            .map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })
    }

    fn apply_selectors_yaml(&mut self, text: &str) -> Result<(), serde_yaml::Error> {
        let file: SelectorsFile = serde_yaml::from_str(text)?;
        self.contest = file.meta.contest_label();
        if let Some(url) = file.form.url.filter(|url| !url.trim().is_empty()) {
            self.url = Some(url);
        }
        self.selectors = file.selectors;
        Ok(())
    }

    fn apply_profile_yaml(&mut self, text: &str) -> Result<(), serde_yaml::Error> {
        let file: ProfileFile = serde_yaml::from_str(text)?;
        let section = file.profile;
        self.profile = Profile {
            lastname: section.lastname,
            firstname: section.firstname,
            email: section.email,
            accept_terms: section.preferences.accept_terms,
        };
        Ok(())
    }

    /// Fail fast on configuration the probe cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => {}
            _ => return Err(ConfigError::MissingUrl),
        }
        if self.selectors.is_empty() {
            return Err(ConfigError::MissingSelectors);
        }
        Ok(())
    }
}

#[derive(Debug, Default, DeriveDeserialize)]
#[serde(default)]
struct SelectorsFile {
    meta: MetaSection,
    form: FormSection,
    selectors: SelectorSpec,
}

#[derive(Debug, Default, DeriveDeserialize)]
#[serde(default)]
struct MetaSection {
    site: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl MetaSection {
    fn contest_label(&self) -> String {
        let site = self.site.as_deref().unwrap_or("grattweb.fr");
        let kind = self.kind.as_deref().unwrap_or("instant_gagnant");
        format!("{site} / {kind}")
    }
}

#[derive(Debug, Default, DeriveDeserialize)]
#[serde(default)]
struct FormSection {
    url: Option<String>,
}

#[derive(Debug, Default, DeriveDeserialize)]
#[serde(default)]
struct ProfileFile {
    profile: ProfileSection,
}

#[derive(Debug, Default, DeriveDeserialize)]
#[serde(default)]
struct ProfileSection {
    lastname: String,
    firstname: String,
    email: String,
    preferences: Preferences,
}

#[derive(Debug, DeriveDeserialize)]
#[serde(default)]
struct Preferences {
    accept_terms: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self { accept_terms: true }
    }
}

/// Errors that can arise while constructing a [`ProbeConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no target URL configured (form.url)")]
    MissingUrl,
    #[error("no selector declared for the required form fields")]
    MissingSelectors,
    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),
    #[error("invalid value '{value}' for {field}")]
    InvalidEnumVariant { field: &'static str, value: String },
    #[error("invalid boolean '{value}' for {field}")]
    InvalidBool { field: &'static str, value: String },
    #[error("invalid number '{value}' for {field}: {source}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML in {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl ConfigError {
    fn invalid_enum(field: &'static str, value: String) -> Self {
        ConfigError::InvalidEnumVariant { field, value }
    }
}

impl fmt::Display for Timings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "navigation {}ms, network idle {}ms, settle {}ms, capture {}ms, dom {}ms",
            self.navigation_timeout_ms,
            self.network_idle_timeout_ms,
            self.settle_delay_ms,
            self.capture_timeout_ms,
            self.dom_timeout_ms
        )
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn env_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            field,
            value: value.to_string(),
        }),
    }
}

fn parse_u8(field: &'static str, value: &str) -> Result<u8, ConfigError> {
    value
        .trim()
        .parse::<u8>()
        .map_err(|source| ConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|source| ConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

/// Parse a comma-separated list of millisecond delays, e.g. `0,2000,5000`.
pub fn parse_retry_delays(field: &'static str, value: &str) -> Result<RetryPolicy, ConfigError> {
    let delays = value
        .split(',')
        .map(|part| parse_u64(field, part))
        .collect::<Result<Vec<_>, _>>()?;
    RetryPolicy::from_millis(&delays)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    #[derive(Debug)]
    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(vars: &[(&str, Option<&str>)]) -> Self {
            let saved = vars
                .iter()
                .map(|(key, value)| {
                    let original = env::var(key).ok();
                    match value {
                        Some(v) => unsafe {
                            env::set_var(key, v);
                        },
                        None => unsafe {
                            env::remove_var(key);
                        },
                    };
                    ((*key).to_string(), original)
                })
                .collect();
            EnvGuard { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => unsafe {
                        env::set_var(&key, v);
                    },
                    None => unsafe {
                        env::remove_var(&key);
                    },
                }
            }
        }
    }

    fn with_env<F, T>(vars: &[(&str, Option<&str>)], f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let lock = env_lock().lock().expect("env mutex poisoned");
        let guard = EnvGuard::new(vars);
        let result = f();
        drop(guard);
        drop(lock);
        result
    }

    const SELECTORS_YAML: &str = r##"
meta:
  site: gulli.fr
  type: jeu_concours
form:
  url: https://example.com/concours
selectors:
  lastname: "#nom"
  firstname: "#prenom"
  email: "input[type=email]"
  terms: "#cgu"
  submit: "button[type=submit]"
"##;

    const PROFILE_YAML: &str = r#"
profile:
  lastname: Dupont
  firstname: Marie
  email: marie@example.com
  preferences:
    accept_terms: false
"#;

    #[test]
    fn defaults_match_probe_expectations() {
        let config = ProbeConfig::default();
        assert!(config.url.is_none());
        assert_eq!(config.contest, DEFAULT_CONTEST_LABEL);
        assert_eq!(config.retry_policy.attempts(), 3);
        assert_eq!(config.timings.navigation_timeout(), Duration::from_secs(15));
        assert_eq!(config.gate_patterns.len(), DEFAULT_GATE_PATTERNS.len());
        assert!(config.headless);
        assert!(config.profile.accept_terms);
    }

    #[test]
    fn selectors_yaml_sets_url_label_and_locators() {
        let mut config = ProbeConfig::default();
        config.apply_selectors_yaml(SELECTORS_YAML).expect("yaml");
        assert_eq!(config.url.as_deref(), Some("https://example.com/concours"));
        assert_eq!(config.contest, "gulli.fr / jeu_concours");
        assert_eq!(config.selectors.terms.as_deref(), Some("#cgu"));
        config.validate().expect("valid");
    }

    #[test]
    fn profile_yaml_reads_nested_preferences() {
        let mut config = ProbeConfig::default();
        config.apply_profile_yaml(PROFILE_YAML).expect("yaml");
        assert_eq!(config.profile.lastname, "Dupont");
        assert_eq!(config.profile.firstname, "Marie");
        assert!(!config.profile.accept_terms);
    }

    #[test]
    fn profile_without_preferences_accepts_terms() {
        let mut config = ProbeConfig::default();
        config
            .apply_profile_yaml("profile:\n  email: a@b.c\n")
            .expect("yaml");
        assert!(config.profile.accept_terms);
        assert_eq!(config.profile.email, "a@b.c");
    }

    #[test]
    fn missing_url_fails_fast() {
        let mut config = ProbeConfig::default();
        config
            .apply_selectors_yaml("selectors:\n  lastname: '#nom'\n")
            .expect("yaml");
        assert!(matches!(config.validate(), Err(ConfigError::MissingUrl)));

        config.url = Some("https://example.com".into());
        config.selectors = SelectorSpec::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingSelectors)
        ));
    }

    #[test]
    fn selectors_file_errors_name_the_path() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "selectors: [unclosed").expect("write");
        let mut config = ProbeConfig::default();
        let err = config
            .load_selectors_file(file.path())
            .expect_err("invalid yaml");
        assert!(matches!(err, ConfigError::Yaml { .. }));

        let err = config
            .load_profile_file(Path::new("/definitely/not/here.yaml"))
            .expect_err("missing file");
        assert!(err.to_string().contains("/definitely/not/here.yaml"));
    }

    #[test]
    fn from_yaml_files_combines_selectors_and_profile() {
        let dir = tempfile::tempdir().expect("tempdir");
        let selectors = dir.path().join("selectors.yaml");
        let profile = dir.path().join("profile.yaml");
        fs::write(&selectors, SELECTORS_YAML).expect("write selectors");
        fs::write(&profile, PROFILE_YAML).expect("write profile");

        let config =
            ProbeConfig::from_yaml_files(&selectors, Some(&profile)).expect("config from files");
        assert_eq!(config.contest, "gulli.fr / jeu_concours");
        assert_eq!(config.profile.email, "marie@example.com");
        assert_eq!(config.selectors.lastname.as_deref(), Some("#nom"));
    }

    #[test]
    fn from_env_parses_and_normalises_values() {
        let vars = [
            ("FORMPROBE_URL", Some("https://example.com/jeu")),
            ("FORMPROBE_CONTEST", Some("corolle / tirage")),
            ("FORMPROBE_RETRY_DELAYS_MS", Some("0, 1000")),
            ("FORMPROBE_NAVIGATION_TIMEOUT_MS", Some("9000")),
            ("FORMPROBE_NETWORK_IDLE_TIMEOUT_MS", None),
            ("FORMPROBE_SETTLE_DELAY_MS", Some("100")),
            ("FORMPROBE_CAPTURE_TIMEOUT_MS", None),
            ("FORMPROBE_DOM_TIMEOUT_MS", Some("2500")),
            ("FORMPROBE_GATE_PATTERNS", Some("Log in | Sign up")),
            ("FORMPROBE_ARTIFACT_DIR", Some("/tmp/shots")),
            ("FORMPROBE_VERBOSE", Some("2")),
            ("FORMPROBE_HEADLESS", Some("false")),
            ("FORMPROBE_CHROME_BIN", None),
            ("FORMPROBE_LOCALE", None),
            ("FORMPROBE_TIMEZONE", None),
        ];

        with_env(&vars, || {
            let config = ProbeConfig::from_env().expect("config from env");
            assert_eq!(config.url.as_deref(), Some("https://example.com/jeu"));
            assert_eq!(config.contest, "corolle / tirage");
            assert_eq!(config.retry_policy.attempts(), 2);
            assert_eq!(config.timings.navigation_timeout_ms, 9_000);
            assert_eq!(config.timings.settle_delay_ms, 100);
            assert_eq!(config.timings.dom_timeout(), Duration::from_millis(2_500));
            assert_eq!(config.timings.capture_timeout_ms, 10_000);
            assert_eq!(config.gate_patterns, vec!["Log in", "Sign up"]);
            assert_eq!(config.artifact_dir, PathBuf::from("/tmp/shots"));
            assert_eq!(config.verbose, Verbosity::Detailed);
            assert!(!config.headless);
        });
    }

    #[test]
    fn invalid_env_values_are_rejected() {
        with_env(&[("FORMPROBE_HEADLESS", Some("maybe"))], || {
            let err = ProbeConfig::from_env().expect_err("invalid bool");
            assert!(matches!(err, ConfigError::InvalidBool { .. }));
        });

        with_env(&[("FORMPROBE_RETRY_DELAYS_MS", Some("500,1000"))], || {
            let err = ProbeConfig::from_env().expect_err("first delay must be zero");
            assert!(matches!(err, ConfigError::InvalidRetryPolicy(_)));
        });
    }
}
