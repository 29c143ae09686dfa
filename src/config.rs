//! Configuration handling
use std::{
    collections::BTreeSet,
    env,
    fs::{create_dir_all, read_to_string, File},
    io::{IsTerminal, Write},
    num::NonZeroUsize,
    path::PathBuf,
    time::Duration,
};

use chrono::NaiveDate;
use home::home_dir;
use serde::{Deserialize, Serialize};

use crate::{
    auth::{AuthMode, Credential, OAuthConfig, TokenConfig},
    cli::{BackupArgs, OrgBackupCli},
    config_secret,
    coordinator::{MigrationConfig, DEFAULT_CLONE_DIR, DEFAULT_CONCURRENCY},
    errors::{ErrorKind, OrgBackupError},
    filter::FilterConfig,
    github::config::GithubConfig,
    utils::Direction,
    worker::RetryPolicy,
};

/// Name of the cached OAuth token, next to the config file
const OAUTH_TOKEN_FILE: &str = "oauth_token.json";

/// Token read by both sides when no side specific variable is set
const SHARED_TOKEN_VAR: &str = "GITHUB_TOKEN";

/// Configuration data
#[derive(Default, Clone, Debug)]
pub struct OrgBackupConfig {
    /// path to the configuration file
    pub config_path: PathBuf,

    /// actual configuration data
    pub config_data: ConfigData,

    /// CLI arguments
    pub cli_args: OrgBackupCli,

    /// Whether missing secrets may be prompted for
    pub interactive: bool,
}

/// Content of the config file
#[derive(Deserialize, Serialize, Default, Clone, Debug)]
pub struct ConfigData {
    /// Organization copied from
    pub source_org: Option<String>,

    /// Organization copied to
    pub dest_org: Option<String>,

    /// Repositories never backed up
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,

    /// When not empty, the only repositories backed up
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_only: Vec<String>,

    /// Prefix of destination names
    pub name_prefix: Option<String>,

    /// Prepend the run date to destination names
    pub include_date_prefix: Option<bool>,

    /// Skip private repositories
    pub public_only: Option<bool>,

    /// Simultaneous transfers
    pub concurrency: Option<usize>,

    /// Root of the scratch clones
    pub clone_dir: Option<PathBuf>,

    /// Retries of a failed step
    pub retries: Option<u32>,

    /// Pause between retries
    pub retry_delay_secs: Option<u64>,

    /// File the log is appended to
    pub log_file: Option<PathBuf>,

    /// Authentication mode
    pub auth: Option<AuthMode>,

    /// Personal access tokens
    pub tokens: Option<TokenConfig>,

    /// OAuth app
    pub oauth: Option<OAuthConfig>,

    /// Github configuration
    pub github: Option<GithubConfig>,
}

impl OrgBackupConfig {
    /// Create a new Config object from the default path
    /// # Errors
    /// Error if the config file can't be opened
    pub fn try_new(cli_args: OrgBackupCli) -> Result<Self, OrgBackupError> {
        let config_path = match cli_args.config.clone() {
            Some(p) => PathBuf::from(p),
            None => Self::get_config_path()?,
        };
        let config_data = if config_path.exists() {
            let contents = read_to_string(&config_path).map_err(|e| {
                OrgBackupError::new_with_source(ErrorKind::Config, "Unable to open", e)
            })?;
            toml::from_str(&contents)?
        } else {
            ConfigData::default()
        };
        Ok(OrgBackupConfig {
            config_path,
            cli_args,
            config_data,
            interactive: std::io::stdin().is_terminal(),
        })
    }

    /// Save the config data to the config file
    /// # Errors
    /// Error if the config file can't be created or written to
    pub fn save(&self) -> Result<(), OrgBackupError> {
        let config_str = toml::to_string(&self.config_data)?;
        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent).map_err(|e| {
                    OrgBackupError::new_with_source(ErrorKind::Io, "Unable to create config dir", e)
                })?;
            }
        }
        let mut file = File::create(&self.config_path).map_err(|e| {
            OrgBackupError::new_with_source(ErrorKind::Io, "Unable to create config file", e)
        })?;
        file.write_all(config_str.as_bytes()).map_err(|e| {
            OrgBackupError::new_with_source(ErrorKind::Io, "Unable to write to config file", e)
        })
    }

    /// Get the path to the config file
    /// # Errors
    /// Error if the home directory can't be found
    pub fn get_config_path() -> Result<PathBuf, OrgBackupError> {
        let home_dir = match home_dir() {
            Some(path) if !path.as_os_str().is_empty() => path,
            _ => {
                return Err(OrgBackupError::new(ErrorKind::Config)
                    .with_text("Unable to get your home dir! home::home_dir() isn't working"))
            }
        };
        let config_directory = home_dir.join(".config").join(".org-backup");
        let config_path = config_directory.join("config.toml");
        create_dir_all(&config_directory).map_err(|e| {
            OrgBackupError::new_with_source(ErrorKind::Io, "Unable to create config dir", e)
        })?;
        if !config_path.exists() {
            let mut file = File::create(&config_path).map_err(|e| {
                OrgBackupError::new_with_source(ErrorKind::Io, "Unable to create config file", e)
            })?;
            file.write_all(b"").map_err(|e| {
                OrgBackupError::new_with_source(ErrorKind::Io, "Unable to write to config file", e)
            })?;
        }
        Ok(config_path)
    }

    /// Update the config data and save it to the config file
    /// # Errors
    /// Error if fail to save config
    pub fn update(
        &mut self,
        updater_fn: impl FnOnce(&mut ConfigData),
    ) -> Result<(), OrgBackupError> {
        updater_fn(&mut self.config_data);
        self.save()?;
        Ok(())
    }

    /// Where the OAuth token is cached
    pub fn oauth_token_cache(&self) -> PathBuf {
        match self.config_path.parent() {
            Some(dir) => dir.join(OAUTH_TOKEN_FILE),
            None => PathBuf::from(OAUTH_TOKEN_FILE),
        }
    }

    /// Log file, `--log-file` first
    pub fn log_file(&self) -> Option<PathBuf> {
        self.cli_args
            .log_file
            .clone()
            .or_else(|| self.config_data.log_file.clone())
    }

    /// The `[github]` section, defaults filled in
    pub fn github(&self) -> GithubConfig {
        self.config_data.github.clone().unwrap_or_default()
    }

    /// Authentication mode, `flag` first
    pub fn auth_mode(&self, flag: Option<AuthMode>) -> AuthMode {
        flag.or(self.config_data.auth).unwrap_or_default()
    }

    /// Token of `direction`: flag, environment, config file, then prompt.
    ///
    /// `None` when nothing is found and no terminal is attached.
    /// # Errors
    /// Error if the prompt or saving the answer fails
    pub fn resolve_token(
        &mut self,
        direction: Direction,
        flag: Option<&str>,
    ) -> Result<Option<Credential>, OrgBackupError> {
        if let Some(token) = flag.map(str::trim).filter(|t| !t.is_empty()) {
            return Ok(Some(Credential::new(token)));
        }
        if let Some(token) = env_token(direction) {
            return Ok(Some(Credential::new(token)));
        }
        let config = self;
        let token = match direction {
            Direction::Source => config_secret!(
                config,
                tokens,
                TokenConfig,
                source,
                "the source organization token"
            )?,
            Direction::Destination => config_secret!(
                config,
                tokens,
                TokenConfig,
                destination,
                "the destination organization token"
            )?,
        };
        Ok(token.map(Credential::new))
    }

    /// Validated settings of a backup run, CLI values over config file values
    /// # Errors
    /// `Config` if an organization is missing, concurrency is zero, or the
    /// run would copy an organization onto itself
    pub fn migration_config(
        &self,
        args: &BackupArgs,
        today: NaiveDate,
    ) -> Result<MigrationConfig, OrgBackupError> {
        let data = &self.config_data;
        let source_org = required_org(
            args.source_org.as_ref().or(data.source_org.as_ref()),
            "source organization (--source-org or source_org)",
        )?;
        let dest_org = required_org(
            args.dest_org.as_ref().or(data.dest_org.as_ref()),
            "destination organization (--dest-org or dest_org)",
        )?;
        let concurrency = args
            .workers
            .or(data.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY);
        let concurrency = NonZeroUsize::new(concurrency).ok_or_else(|| {
            OrgBackupError::new(ErrorKind::Config).with_text("concurrency must be at least 1")
        })?;

        let pick = |cli: &Vec<String>, file: &Vec<String>| -> BTreeSet<String> {
            let chosen = if cli.is_empty() { file } else { cli };
            chosen
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        };
        let filter = FilterConfig {
            include_only: pick(&args.include_only, &data.include_only),
            exclude: pick(&args.exclude, &data.exclude),
            name_prefix: args
                .repo_prefix
                .clone()
                .or_else(|| data.name_prefix.clone())
                .unwrap_or_default(),
            include_date_prefix: args.include_date_prefix
                || data.include_date_prefix.unwrap_or(false),
            public_only: args.public_only || data.public_only.unwrap_or(false),
        };
        if source_org.eq_ignore_ascii_case(&dest_org)
            && filter.name_prefix.is_empty()
            && !filter.include_date_prefix
        {
            return Err(OrgBackupError::new(ErrorKind::Config).with_text(&format!(
                "source and destination are both {source_org}: set a prefix or the date prefix"
            )));
        }

        let default_retry = RetryPolicy::default();
        Ok(MigrationConfig {
            source_org,
            dest_org,
            filter,
            concurrency,
            dry_run: args.dry_run,
            clone_dir: args
                .clone_dir
                .clone()
                .or_else(|| data.clone_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CLONE_DIR)),
            retry: RetryPolicy {
                retries: args
                    .retries
                    .or(data.retries)
                    .unwrap_or(default_retry.retries),
                delay: data
                    .retry_delay_secs
                    .map(Duration::from_secs)
                    .unwrap_or(default_retry.delay),
            },
            run_date: today,
        })
    }
}

/// Trimmed organization name, or a `Config` error naming `what`
fn required_org(value: Option<&String>, what: &str) -> Result<String, OrgBackupError> {
    match value.map(|v| v.trim()) {
        Some(org) if !org.is_empty() => Ok(org.to_string()),
        _ => {
            let message = format!("Missing {what}");
            Err(OrgBackupError::new(ErrorKind::Config).with_text(&message))
        }
    }
}

/// Environment variable holding the token of `direction`
pub(crate) fn token_var(direction: Direction) -> &'static str {
    match direction {
        Direction::Source => "SOURCE_GITHUB_TOKEN",
        Direction::Destination => "DEST_GITHUB_TOKEN",
    }
}

/// Token of `direction` from the environment
fn env_token(direction: Direction) -> Option<String> {
    [token_var(direction), SHARED_TOKEN_VAR]
        .into_iter()
        .filter_map(|var| env::var(var).ok())
        .map(|token| token.trim().to_string())
        .find(|token| !token.is_empty())
}

#[cfg(test)]
mod test {
    use super::*;

    fn config_with(data: &str) -> (tempfile::TempDir, OrgBackupConfig) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, data).unwrap();
        let cli_args = OrgBackupCli {
            config: Some(path.to_string_lossy().to_string()),
            ..Default::default()
        };
        let mut config = OrgBackupConfig::try_new(cli_args).unwrap();
        config.interactive = false;
        (dir, config)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 29).unwrap()
    }

    #[test]
    fn file_values_fill_missing_flags() {
        let (_dir, config) = config_with(
            r#"
source_org = "acme"
dest_org = "acme-backup"
exclude = ["old-repo"]
name_prefix = "backup-"
concurrency = 5
retries = 4
retry_delay_secs = 1

[github]
api_url = "https://ghe.example.com/api/v3"
"#,
        );

        let migration = config
            .migration_config(&BackupArgs::default(), today())
            .unwrap();

        assert_eq!(migration.source_org, "acme");
        assert_eq!(migration.dest_org, "acme-backup");
        assert!(migration.filter.exclude.contains("old-repo"));
        assert_eq!(migration.filter.name_prefix, "backup-");
        assert_eq!(migration.concurrency.get(), 5);
        assert_eq!(migration.retry.retries, 4);
        assert_eq!(migration.retry.delay, Duration::from_secs(1));
        assert_eq!(migration.clone_dir, PathBuf::from(DEFAULT_CLONE_DIR));
        assert_eq!(config.github().api_url(), "https://ghe.example.com/api/v3");
        assert_eq!(config.github().git_host(), "github.com");
    }

    #[test]
    fn flags_win_over_file() {
        let (_dir, config) =
            config_with("source_org = \"acme\"\ndest_org = \"b\"\nconcurrency = 5\n");
        let args = BackupArgs {
            source_org: Some("other".to_string()),
            workers: Some(1),
            exclude: vec!["x".to_string()],
            dry_run: true,
            ..Default::default()
        };

        let migration = config.migration_config(&args, today()).unwrap();

        assert_eq!(migration.source_org, "other");
        assert_eq!(migration.concurrency.get(), 1);
        assert!(migration.dry_run);
        assert_eq!(migration.run_date, today());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let (_dir, config) = config_with("source_org = \"a\"\ndest_org = \"b\"\n");
        let args = BackupArgs {
            workers: Some(0),
            ..Default::default()
        };
        let err = config.migration_config(&args, today()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn missing_org_is_rejected() {
        let (_dir, config) = config_with("dest_org = \"b\"\n");
        let err = config
            .migration_config(&BackupArgs::default(), today())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("source organization"));
    }

    #[test]
    fn same_org_needs_a_prefix() {
        let (_dir, config) = config_with("source_org = \"acme\"\ndest_org = \"ACME\"\n");
        let err = config
            .migration_config(&BackupArgs::default(), today())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        let args = BackupArgs {
            include_date_prefix: true,
            ..Default::default()
        };
        assert!(config.migration_config(&args, today()).is_ok());
    }

    #[test]
    fn token_flag_comes_first() {
        let (_dir, mut config) =
            config_with("[tokens]\nsource = \"from-file\"\ndestination = \"dest-file\"\n");
        let token = config
            .resolve_token(Direction::Source, Some("from-flag"))
            .unwrap()
            .unwrap();
        assert_eq!(token.secret(), "from-flag");
    }

    #[test]
    fn update_persists_to_disk() {
        let (_dir, mut config) = config_with("");
        config
            .update(|data| data.source_org = Some("acme".to_string()))
            .unwrap();

        let saved = read_to_string(&config.config_path).unwrap();
        let data: ConfigData = toml::from_str(&saved).unwrap();
        assert_eq!(data.source_org.as_deref(), Some("acme"));
        assert_eq!(
            config.oauth_token_cache(),
            config.config_path.with_file_name("oauth_token.json")
        );
    }

    #[test]
    fn log_file_flag_wins() {
        let (_dir, mut config) = config_with("log_file = \"backup.log\"\n");
        assert_eq!(config.log_file(), Some(PathBuf::from("backup.log")));
        config.cli_args.log_file = Some(PathBuf::from("/var/log/org-backup.log"));
        assert_eq!(
            config.log_file(),
            Some(PathBuf::from("/var/log/org-backup.log"))
        );
    }

    #[test]
    fn auth_mode_from_file() {
        let (_dir, config) = config_with("auth = \"gh-cli\"\n");
        assert_eq!(config.auth_mode(None), AuthMode::GhCli);
        assert_eq!(config.auth_mode(Some(AuthMode::Token)), AuthMode::Token);
    }
}
