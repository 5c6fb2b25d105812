//! Service configuration: `$HUDDLE_HOME/config.toml` plus programmatic
//! overrides, merged over built-in defaults.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::context_store::DEFAULT_LINE_CAP;
use crate::flags;

pub const DEFAULT_RATE_LIMIT_CEILING: u32 = 50;
pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_MAX_PROMPT_CHARS: usize = 2000;

/// Filesystem roots no execution may be scoped under.
const DEFAULT_DENIED_ROOTS: &[&str] = &[
    "/bin", "/boot", "/dev", "/etc", "/lib", "/proc", "/root", "/sbin", "/sys", "/usr", "/var",
];

/// On-disk shape of `config.toml`. Everything is optional; missing fields
/// fall back to defaults at merge time.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ConfigToml {
    pub assistant_program: Option<String>,
    pub assistant_args: Option<Vec<String>>,
    pub exec_timeout_ms: Option<u64>,
    pub rate_limit_per_hour: Option<u32>,
    pub max_prompt_chars: Option<usize>,
    pub context_line_cap: Option<usize>,
    pub denied_roots: Option<Vec<PathBuf>>,
}

/// Programmatic overrides that beat both the file and the defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub assistant_program: Option<String>,
    pub assistant_args: Option<Vec<String>>,
    pub exec_timeout: Option<Duration>,
    pub rate_limit_ceiling: Option<u32>,
    pub rate_limit_window: Option<Duration>,
    pub max_prompt_chars: Option<usize>,
    pub context_line_cap: Option<usize>,
    pub denied_roots: Option<Vec<PathBuf>>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub huddle_home: PathBuf,
    pub assistant_program: String,
    pub assistant_args: Vec<String>,
    pub exec_timeout: Duration,
    pub rate_limit_ceiling: u32,
    pub rate_limit_window: Duration,
    pub max_prompt_chars: usize,
    pub context_line_cap: usize,
    pub denied_roots: Vec<PathBuf>,
}

impl Config {
    /// Load `$HUDDLE_HOME/config.toml` (if present) and merge.
    pub fn load_with_overrides(overrides: ConfigOverrides) -> io::Result<Self> {
        let huddle_home = find_huddle_home()?;
        let config_toml = match std::fs::read_to_string(huddle_home.join("config.toml")) {
            Ok(contents) => toml::from_str(&contents).map_err(io::Error::other)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => ConfigToml::default(),
            Err(e) => return Err(e),
        };
        Ok(Self::load_from_base_config_with_overrides(
            config_toml,
            overrides,
            huddle_home,
        ))
    }

    pub fn load_from_base_config_with_overrides(
        config_toml: ConfigToml,
        overrides: ConfigOverrides,
        huddle_home: PathBuf,
    ) -> Self {
        let ConfigOverrides {
            assistant_program,
            assistant_args,
            exec_timeout,
            rate_limit_ceiling,
            rate_limit_window,
            max_prompt_chars,
            context_line_cap,
            denied_roots,
        } = overrides;

        Self {
            huddle_home,
            assistant_program: assistant_program
                .or(config_toml.assistant_program)
                .unwrap_or_else(|| flags::HUDDLE_ASSISTANT.to_string()),
            assistant_args: assistant_args
                .or(config_toml.assistant_args)
                .unwrap_or_default(),
            exec_timeout: exec_timeout
                .or(config_toml.exec_timeout_ms.map(Duration::from_millis))
                .unwrap_or(*flags::HUDDLE_EXEC_TIMEOUT_MS),
            rate_limit_ceiling: rate_limit_ceiling
                .or(config_toml.rate_limit_per_hour)
                .unwrap_or(DEFAULT_RATE_LIMIT_CEILING),
            rate_limit_window: rate_limit_window.unwrap_or(DEFAULT_RATE_LIMIT_WINDOW),
            max_prompt_chars: max_prompt_chars
                .or(config_toml.max_prompt_chars)
                .unwrap_or(DEFAULT_MAX_PROMPT_CHARS),
            context_line_cap: context_line_cap
                .or(config_toml.context_line_cap)
                .unwrap_or(DEFAULT_LINE_CAP),
            denied_roots: denied_roots
                .or(config_toml.denied_roots)
                .unwrap_or_else(default_denied_roots),
        }
    }
}

fn default_denied_roots() -> Vec<PathBuf> {
    DEFAULT_DENIED_ROOTS.iter().map(PathBuf::from).collect()
}

/// `$HUDDLE_HOME` when set and non-empty; `~/.huddle` otherwise.
fn find_huddle_home() -> io::Result<PathBuf> {
    match std::env::var("HUDDLE_HOME") {
        Ok(value) if !value.is_empty() => Ok(PathBuf::from(value)),
        _ => {
            let mut home = dirs::home_dir().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "could not find home directory")
            })?;
            home.push(".huddle");
            Ok(home)
        }
    }
}
