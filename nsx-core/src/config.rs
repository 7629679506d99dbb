//! nsx-apply configs

pub mod cli {
    //! Parse from either cli or env var

    /// the default path to the resource manifest
    pub static DEFAULT_MANIFEST_PATH: &str = "nsx.yaml";
    /// Default request timeout in seconds
    pub const DEFAULT_REQUEST_TIMEOUT: u64 = 30;
    /// Default number of fetch/write cycles for a stale section token
    pub const DEFAULT_MAX_ATTEMPTS: u32 = section_guard::DEFAULT_MAX_ATTEMPTS;
    /// Default delay before the first stale-token retry
    pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 50;
    /// default log level. Can use this argument or NSX_LOG env var
    pub const DEFAULT_NSX_LOG: &str = "info";

    use std::{fmt, path::PathBuf, time::Duration};

    pub use clap::Parser;
    use clap::ValueEnum;
    use nsx_api::NsxConfig;
    use section_guard::RetryPolicy;

    /// Lifecycle operation to run against every resource in the manifest
    #[derive(ValueEnum, Debug, Copy, Clone, PartialEq, Eq)]
    pub enum Lifecycle {
        /// create resources that have no id yet
        Create,
        /// refresh resources from the manager
        Read,
        /// push changed attributes to the manager
        Update,
        /// remove resources from the manager
        Delete,
    }

    impl Lifecycle {
        /// name used in logs and metric labels
        pub fn as_str(&self) -> &'static str {
            match self {
                Lifecycle::Create => "create",
                Lifecycle::Read => "read",
                Lifecycle::Update => "update",
                Lifecycle::Delete => "delete",
            }
        }
    }

    /// How log lines are written to stderr
    #[derive(ValueEnum, Debug, Copy, Clone, Default, PartialEq, Eq)]
    pub enum LogFormat {
        /// unstructured, one line per event
        #[default]
        Standard,
        /// one json object per event
        Json,
        /// multi-line, human readable
        Pretty,
    }

    #[derive(Parser, Clone, PartialEq, Eq)]
    #[clap(author, name = "nsx-apply", bin_name = "nsx-apply", about, long_about = None)]
    /// parses from cli & environment var. nsx-apply will load `.env` in the current dir as well
    pub struct Config {
        /// path to the resource manifest
        #[clap(short, long, value_parser, env, default_value = DEFAULT_MANIFEST_PATH)]
        pub manifest_path: PathBuf,
        /// lifecycle operation to run
        #[clap(short, long, value_enum, env, default_value_t = Lifecycle::Create)]
        pub action: Lifecycle,
        /// NSX manager base url, ex. https://nsxmanager.example.com
        #[clap(long, env = "NSX_MANAGER_URL", value_parser, default_value = "")]
        pub manager_url: String,
        /// NSX manager user
        #[clap(long, env = "NSX_USERNAME", value_parser, default_value = "")]
        pub username: String,
        /// NSX manager password
        #[clap(long, env = "NSX_PASSWORD", value_parser, default_value = "", hide_env_values = true)]
        pub password: String,
        /// accept self-signed or otherwise unverifiable manager certificates
        #[clap(long, env)]
        pub allow_unverified_ssl: bool,
        /// request timeout in seconds
        #[clap(long, env, value_parser, default_value_t = DEFAULT_REQUEST_TIMEOUT)]
        pub request_timeout: u64,
        /// fetch/write cycles before a stale section token is reported
        #[clap(long, env, value_parser = clap::value_parser!(u32).range(1..), default_value_t = DEFAULT_MAX_ATTEMPTS)]
        pub max_attempts: u32,
        /// delay before the first stale-token retry, doubled for each next one
        #[clap(long, env, value_parser, default_value_t = DEFAULT_RETRY_BASE_DELAY_MS)]
        pub retry_base_delay_ms: u64,
        /// run against an in-memory manager instead of a real one
        #[clap(long, env)]
        pub dry_run: bool,
        /// write prometheus metrics to stderr before exiting
        #[clap(long, env)]
        pub print_metrics: bool,
        /// set the log level. All valid RUST_LOG arguments are accepted
        #[clap(long, env, value_parser, default_value = DEFAULT_NSX_LOG)]
        pub nsx_log: String,
        /// log output format
        #[clap(long, env, value_enum, default_value_t = LogFormat::Standard)]
        pub log_format: LogFormat,
    }

    impl fmt::Debug for Config {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Config")
                .field("manifest_path", &self.manifest_path)
                .field("action", &self.action)
                .field("manager_url", &self.manager_url)
                .field("username", &self.username)
                .field("password", &"<redacted>")
                .field("allow_unverified_ssl", &self.allow_unverified_ssl)
                .field("request_timeout", &self.request_timeout)
                .field("max_attempts", &self.max_attempts)
                .field("retry_base_delay_ms", &self.retry_base_delay_ms)
                .field("dry_run", &self.dry_run)
                .field("print_metrics", &self.print_metrics)
                .field("nsx_log", &self.nsx_log)
                .field("log_format", &self.log_format)
                .finish()
        }
    }

    impl Config {
        /// Create new timeout as `Duration`
        pub fn request_timeout(&self) -> Duration {
            Duration::from_secs(self.request_timeout)
        }

        /// connection settings for [`nsx_api::NsxClient`]
        pub fn nsx_config(&self) -> NsxConfig {
            NsxConfig::new(&self.manager_url, &self.username, &self.password)
                .with_allow_unverified_ssl(self.allow_unverified_ssl)
                .with_request_timeout(self.request_timeout())
        }

        /// stale section token retry policy
        pub fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_parse_args() {
            let config = Config::try_parse_from([
                "nsx-apply",
                "--manager-url",
                "https://nsx.local",
                "--username",
                "admin",
                "--password",
                "secret",
                "--action",
                "delete",
                "--max-attempts",
                "5",
                "--retry-base-delay-ms",
                "10",
                "--allow-unverified-ssl",
            ])
            .unwrap();
            assert_eq!(config.action, Lifecycle::Delete);
            assert_eq!(config.action.as_str(), "delete");

            let nsx = config.nsx_config();
            assert_eq!(nsx.manager_url, "https://nsx.local");
            assert!(nsx.allow_unverified_ssl);
            assert!(nsx.validate().is_ok());

            assert!(!format!("{config:?}").contains("secret"));

            let policy = config.retry_policy();
            assert_eq!(policy.max_attempts, 5);
            assert_eq!(policy.base_delay, Duration::from_millis(10));
            assert_eq!(config.log_format, LogFormat::Standard);
        }

        #[test]
        fn test_log_format() {
            let config =
                Config::try_parse_from(["nsx-apply", "--log-format", "json"]).unwrap();
            assert_eq!(config.log_format, LogFormat::Json);
            assert!(Config::try_parse_from(["nsx-apply", "--log-format", "xml"]).is_err());
        }

        #[test]
        fn test_zero_attempts_rejected() {
            let err = Config::try_parse_from(["nsx-apply", "--max-attempts", "0"]);
            assert!(err.is_err());
        }
    }
}

pub mod trace {
    //! tracing configuration
    use anyhow::Result;
    use tracing_subscriber::{
        filter::EnvFilter,
        fmt::{
            self,
            format::{Format, PrettyFields},
        },
        prelude::__tracing_subscriber_SubscriberExt,
        util::SubscriberInitExt,
    };

    use super::cli::LogFormat;

    /// Logging configuration
    #[derive(Debug)]
    pub struct Config {
        /// formatting to apply to logs
        pub log_format: LogFormat,
    }

    impl Config {
        /// Install the global subscriber with `nsx_log` as the filter
        pub fn parse(nsx_log: &str, log_format: LogFormat) -> Result<Self> {
            let filter = EnvFilter::try_new(nsx_log)
                .or_else(|_| EnvFilter::try_new("info"))?
                .add_directive("hyper=off".parse()?)
                .add_directive("reqwest=warn".parse()?);

            // logs go to stderr, stdout carries the resulting state
            match log_format {
                LogFormat::Json => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().json().with_writer(std::io::stderr))
                        .init();
                }
                LogFormat::Pretty => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(
                            fmt::layer()
                                .event_format(
                                    Format::default().pretty().with_source_location(false),
                                )
                                .fmt_fields(PrettyFields::new())
                                .with_writer(std::io::stderr),
                        )
                        .init();
                }
                LogFormat::Standard => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().with_writer(std::io::stderr))
                        .init();
                }
            }

            Ok(Self { log_format })
        }
    }
}
