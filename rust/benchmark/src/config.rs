//! Run configuration for the build and search programs.
//!
//! Values are layered with figment, lowest precedence first: built-in
//! defaults, a YAML file (`--config`, or `./rangebench.yaml` when present),
//! `RANGEBENCH_` environment variables, then command line flags. Validation
//! happens after layering and before any input is touched.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use rangebench_error::{BenchError, ErrorCodes};
use rangebench_index::{BuildParams, SearchParams};
use rangebench_tracing::LogFilter;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::datasets::vecs::OpenPolicy;
use crate::monitor::DEFAULT_SAMPLE_INTERVAL;

const DEFAULT_CONFIG_PATH: &str = "./rangebench.yaml";
const ENV_PREFIX: &str = "RANGEBENCH_";

/// Neighbors requested per query.
pub const QUERY_K: usize = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is empty")]
    EmptyPath(&'static str),
    #[error("{name} should be a positive integer, got {value}")]
    NotPositive { name: &'static str, value: i64 },
    #[error("Config file `{0}` does not exist")]
    MissingConfigFile(PathBuf),
    #[error("Error loading config: {0}")]
    Load(String),
}

impl BenchError for ConfigError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

fn require_path(value: &str, name: &'static str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyPath(name));
    }
    Ok(())
}

fn require_positive(value: i64, name: &'static str) -> Result<usize, ConfigError> {
    match usize::try_from(value) {
        Ok(positive) if positive > 0 => Ok(positive),
        _ => Err(ConfigError::NotPositive { name, value }),
    }
}

fn layered(config_path: Option<&Path>, defaults: impl Serialize) -> Result<Figment, ConfigError> {
    let mut f = Figment::from(Serialized::defaults(defaults));
    match config_path {
        Some(path) if !path.exists() => {
            return Err(ConfigError::MissingConfigFile(path.to_path_buf()))
        }
        Some(path) => f = f.merge(Yaml::file(path)),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            f = f.merge(Yaml::file(DEFAULT_CONFIG_PATH))
        }
        None => {}
    }
    // Figment cannot tell nesting from underscores, so nested keys use `__`.
    Ok(f.merge(Env::prefixed(ENV_PREFIX).map(|k| k.as_str().replace("__", ".").into())))
}

fn default_monitor_interval_ms() -> u64 {
    DEFAULT_SAMPLE_INTERVAL.as_millis() as u64
}

/// Configuration of one index construction run.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildConfig {
    pub data_path: String,
    pub index_file: String,
    pub m: i64,
    pub ef_construction: i64,
    pub threads: i64,
    /// Fail on an unopenable dataset instead of continuing with no vectors.
    pub strict_inputs: bool,
    pub report_json: Option<PathBuf>,
    pub monitor_interval_ms: u64,
    /// Per-crate log levels applied when `RUST_LOG` is unset.
    pub log_filters: Vec<LogFilter>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            data_path: String::new(),
            index_file: String::new(),
            m: 0,
            ef_construction: 0,
            threads: 0,
            strict_inputs: false,
            report_json: None,
            monitor_interval_ms: default_monitor_interval_ms(),
            log_filters: Vec::new(),
        }
    }
}

impl BuildConfig {
    pub fn load(config_path: Option<&Path>, overrides: impl Serialize) -> Result<Self, ConfigError> {
        layered(config_path, Self::default())?
            .merge(Serialized::defaults(overrides))
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_path(&self.data_path, "data path")?;
        require_path(&self.index_file, "index path")?;
        self.build_params().map(|_| ())
    }

    pub fn build_params(&self) -> Result<BuildParams, ConfigError> {
        Ok(BuildParams {
            m: require_positive(self.m, "M")?,
            ef_construction: require_positive(self.ef_construction, "ef_construction")?,
            threads: require_positive(self.threads, "threads")?,
        })
    }

    pub fn open_policy(&self) -> OpenPolicy {
        if self.strict_inputs {
            OpenPolicy::Strict
        } else {
            OpenPolicy::Lenient
        }
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms.max(1))
    }
}

/// Configuration of one query workload run.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchConfig {
    pub data_path: String,
    pub query_path: String,
    pub query_ranges_file: String,
    pub groundtruth_file: String,
    pub index_file: String,
    pub m: i64,
    pub ef_search: i64,
    /// Neighbors requested per query. Not a command line flag.
    pub k: i64,
    /// Translate engine ids through `<data_path>.mapping` before scoring.
    pub use_id_mapping: bool,
    /// Fail on unopenable binary inputs instead of continuing with no records.
    pub strict_inputs: bool,
    pub report_json: Option<PathBuf>,
    pub monitor_interval_ms: u64,
    /// Per-crate log levels applied when `RUST_LOG` is unset.
    pub log_filters: Vec<LogFilter>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            data_path: String::new(),
            query_path: String::new(),
            query_ranges_file: String::new(),
            groundtruth_file: String::new(),
            index_file: String::new(),
            m: 0,
            ef_search: 0,
            k: QUERY_K as i64,
            use_id_mapping: false,
            strict_inputs: false,
            report_json: None,
            monitor_interval_ms: default_monitor_interval_ms(),
            log_filters: Vec::new(),
        }
    }
}

impl SearchConfig {
    pub fn load(config_path: Option<&Path>, overrides: impl Serialize) -> Result<Self, ConfigError> {
        layered(config_path, Self::default())?
            .merge(Serialized::defaults(overrides))
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_path(&self.data_path, "data path")?;
        require_path(&self.query_path, "query path")?;
        require_path(&self.query_ranges_file, "query ranges file")?;
        require_path(&self.groundtruth_file, "groundtruth file")?;
        require_path(&self.index_file, "index path")?;
        require_positive(self.m, "M")?;
        require_positive(self.ef_search, "ef_search")?;
        require_positive(self.k, "K")?;
        Ok(())
    }

    /// Per-query parameters for the range `[low, high]`. The edge limit is the
    /// configured fan-out.
    pub fn search_params(&self, low: i32, high: i32) -> Result<SearchParams, ConfigError> {
        let m = require_positive(self.m, "M")?;
        Ok(SearchParams {
            ef_search: require_positive(self.ef_search, "ef_search")?,
            k: require_positive(self.k, "K")?,
            low,
            high,
            edge_limit: m,
        })
    }

    pub fn mapping_path(&self) -> PathBuf {
        crate::datasets::id_mapping::IdMapping::path_for(Path::new(&self.data_path))
    }

    pub fn open_policy(&self) -> OpenPolicy {
        if self.strict_inputs {
            OpenPolicy::Strict
        } else {
            OpenPolicy::Lenient
        }
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms.max(1))
    }
}

/// Command line of `rangebench-build`.
#[derive(Parser, Debug, Default, Serialize)]
#[command(name = "rangebench-build")]
#[command(about = "Build a range-filtered ANN index and report build time and resource usage")]
pub struct BuildArgs {
    /// YAML config file; flags override its values
    #[arg(long)]
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Dataset of base vectors (.fvecs)
    #[arg(long = "data_path")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_path: Option<String>,

    /// Where to write the built index
    #[arg(long = "index_file")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_file: Option<String>,

    /// Fan-out: maximum edges per node
    #[arg(long = "M", allow_negative_numbers = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub m: Option<i64>,

    /// Candidate queue size during construction
    #[arg(long = "ef_construction", allow_negative_numbers = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ef_construction: Option<i64>,

    /// Thread budget for construction
    #[arg(long = "threads", allow_negative_numbers = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<i64>,

    /// Abort if the dataset cannot be opened
    #[arg(long = "strict_inputs")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub strict_inputs: bool,

    /// Also write the report as JSON to this path
    #[arg(long = "report_json")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_json: Option<PathBuf>,
}

impl BuildArgs {
    pub fn into_config(self) -> Result<BuildConfig, ConfigError> {
        let config = BuildConfig::load(self.config.as_deref(), &self)?;
        config.validate()?;
        Ok(config)
    }
}

/// Command line of `rangebench-search`.
#[derive(Parser, Debug, Default, Serialize)]
#[command(name = "rangebench-search")]
#[command(about = "Run a range-filtered query workload and report QPS, recall and resource usage")]
pub struct SearchArgs {
    /// YAML config file; flags override its values
    #[arg(long)]
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Dataset of base vectors (.fvecs) the index was built over
    #[arg(long = "data_path")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_path: Option<String>,

    /// Query vectors (.fvecs)
    #[arg(long = "query_path")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_path: Option<String>,

    /// One `low-high` range per query
    #[arg(long = "query_ranges_file")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_ranges_file: Option<String>,

    /// Groundtruth ids per query (.ivecs, or comma separated rows)
    #[arg(long = "groundtruth_file")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groundtruth_file: Option<String>,

    /// Index built by rangebench-build
    #[arg(long = "index_file")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_file: Option<String>,

    /// Fan-out the index was built with; also the per-node edge limit
    #[arg(long = "M", allow_negative_numbers = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub m: Option<i64>,

    /// Candidate queue size during search
    #[arg(long = "ef_search", allow_negative_numbers = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ef_search: Option<i64>,

    /// Translate result ids through `<data_path>.mapping`
    #[arg(long = "use_id_mapping")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub use_id_mapping: bool,

    /// Abort if a binary input cannot be opened
    #[arg(long = "strict_inputs")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub strict_inputs: bool,

    /// Also write the report as JSON to this path
    #[arg(long = "report_json")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_json: Option<PathBuf>,
}

impl SearchArgs {
    pub fn into_config(self) -> Result<SearchConfig, ConfigError> {
        let config = SearchConfig::load(self.config.as_deref(), &self)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rangebench_tracing::LogFilterLevel;
    use serial_test::serial;

    fn search_args() -> SearchArgs {
        SearchArgs::parse_from([
            "rangebench-search",
            "--data_path",
            "base.fvecs",
            "--query_path",
            "query.fvecs",
            "--query_ranges_file",
            "ranges.txt",
            "--groundtruth_file",
            "gt.ivecs",
            "--index_file",
            "tree.index",
            "--M",
            "16",
            "--ef_search",
            "64",
        ])
    }

    #[test]
    #[serial]
    fn test_build_flags() {
        Jail::expect_with(|_jail| {
            let args = BuildArgs::parse_from([
                "rangebench-build",
                "--data_path",
                "base.fvecs",
                "--index_file",
                "tree.index",
                "--M",
                "32",
                "--ef_construction",
                "200",
                "--threads",
                "4",
            ]);
            let config = args.into_config().expect("config should be valid");
            assert_eq!(config.data_path, "base.fvecs");
            assert_eq!(
                config.build_params().expect("params should be valid"),
                BuildParams {
                    m: 32,
                    ef_construction: 200,
                    threads: 4
                }
            );
            assert_eq!(config.open_policy(), OpenPolicy::Lenient);
            assert_eq!(config.monitor_interval(), Duration::from_millis(100));
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_build_validation_names_parameter() {
        Jail::expect_with(|_jail| {
            let err = BuildArgs::parse_from(["rangebench-build", "--index_file", "x"])
                .into_config()
                .expect_err("missing data path should fail");
            assert_eq!(err.to_string(), "data path is empty");

            let err = BuildArgs::parse_from([
                "rangebench-build",
                "--data_path",
                "a",
                "--index_file",
                "b",
                "--M",
                "16",
                "--ef_construction",
                "-3",
                "--threads",
                "1",
            ])
            .into_config()
            .expect_err("negative ef_construction should fail");
            assert!(matches!(
                err,
                ConfigError::NotPositive {
                    name: "ef_construction",
                    value: -3
                }
            ));
            assert_eq!(err.code(), ErrorCodes::InvalidArgument);

            let err = BuildArgs::parse_from([
                "rangebench-build",
                "--data_path",
                "a",
                "--index_file",
                "b",
                "--M",
                "16",
                "--ef_construction",
                "8",
                "--threads",
                "0",
            ])
            .into_config()
            .expect_err("zero threads should fail");
            assert_eq!(err.to_string(), "threads should be a positive integer, got 0");
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_search_flags_and_defaults() {
        Jail::expect_with(|_jail| {
            let config = search_args().into_config().expect("config should be valid");
            assert_eq!(config.k, QUERY_K as i64);
            assert!(!config.use_id_mapping);
            assert_eq!(config.mapping_path(), PathBuf::from("base.fvecs.mapping"));
            let params = config.search_params(5, 10).expect("params should be valid");
            assert_eq!(
                params,
                SearchParams {
                    ef_search: 64,
                    k: 10,
                    low: 5,
                    high: 10,
                    edge_limit: 16
                }
            );
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_search_validation_order() {
        Jail::expect_with(|_jail| {
            let mut args = search_args();
            args.groundtruth_file = Some(String::new());
            let err = args.into_config().expect_err("empty groundtruth should fail");
            assert_eq!(err.to_string(), "groundtruth file is empty");

            let mut args = search_args();
            args.m = Some(0);
            let err = args.into_config().expect_err("zero M should fail");
            assert_eq!(err.to_string(), "M should be a positive integer, got 0");
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_yaml_then_env_then_flags() {
        Jail::expect_with(|jail| {
            let _ = jail.create_file(
                "run.yaml",
                r#"
                data_path: "from-yaml.fvecs"
                query_path: "query.fvecs"
                query_ranges_file: "ranges.txt"
                groundtruth_file: "gt.csv"
                index_file: "tree.index"
                m: 8
                ef_search: 32
                k: 5
                use_id_mapping: true
                "#,
            );
            jail.set_env("RANGEBENCH_EF_SEARCH", "48");
            jail.set_env("RANGEBENCH_QUERY_PATH", "env-query.fvecs");

            let args = SearchArgs::parse_from([
                "rangebench-search",
                "--config",
                "run.yaml",
                "--query_path",
                "flag-query.fvecs",
            ]);
            let config = args.into_config().expect("config should be valid");
            assert_eq!(config.data_path, "from-yaml.fvecs");
            assert_eq!(config.query_path, "flag-query.fvecs");
            assert_eq!(config.ef_search, 48);
            assert_eq!(config.m, 8);
            assert_eq!(config.k, 5);
            assert!(config.use_id_mapping);
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_default_config_file_is_picked_up() {
        Jail::expect_with(|jail| {
            let _ = jail.create_file(
                "rangebench.yaml",
                r#"
                data_path: "base.fvecs"
                index_file: "tree.index"
                m: 16
                ef_construction: 100
                threads: 2
                strict_inputs: true
                "#,
            );
            let config = BuildArgs::default()
                .into_config()
                .expect("config should be valid");
            assert_eq!(config.threads, 2);
            assert_eq!(config.open_policy(), OpenPolicy::Strict);
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_log_filters_from_yaml() {
        Jail::expect_with(|jail| {
            let _ = jail.create_file(
                "run.yaml",
                r#"
                log_filters:
                  - crate_name: "rangebench_index"
                    filter_level: "debug"
                  - crate_name: "rayon_core"
                    filter_level: "warn"
                "#,
            );
            let mut args = search_args();
            args.config = Some(PathBuf::from("run.yaml"));
            let config = args.into_config().expect("config should be valid");
            assert_eq!(
                config.log_filters,
                vec![
                    LogFilter {
                        crate_name: "rangebench_index".to_string(),
                        filter_level: LogFilterLevel::Debug,
                    },
                    LogFilter {
                        crate_name: "rayon_core".to_string(),
                        filter_level: LogFilterLevel::Warn,
                    },
                ]
            );

            let config = BuildArgs::parse_from([
                "rangebench-build",
                "--data_path",
                "a",
                "--index_file",
                "b",
                "--M",
                "4",
                "--ef_construction",
                "8",
                "--threads",
                "1",
            ])
            .into_config()
            .expect("config should be valid");
            assert!(config.log_filters.is_empty());
            assert_eq!(config.monitor_interval(), DEFAULT_SAMPLE_INTERVAL);
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_missing_explicit_config_file() {
        Jail::expect_with(|_jail| {
            let args = BuildArgs {
                config: Some(PathBuf::from("absent.yaml")),
                ..Default::default()
            };
            let err = args.into_config().expect_err("missing config should fail");
            assert!(matches!(err, ConfigError::MissingConfigFile(_)));
            Ok(())
        });
    }
}
