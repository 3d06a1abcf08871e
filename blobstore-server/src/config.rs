//! Server configuration, loaded from defaults, a YAML file, and the environment.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;
use blobstore_types::ClusterLayout;
use figment::providers::{Env, Format, Serialized, Yaml};
use secrecy::{CloneableSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

const ENV_PREFIX: &str = "BLOBSTORE_";

/// Newtype around `String` that protects against accidental logging of secrets in the
/// configuration struct. Use with [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    /// The secret value.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Http {
    /// The address the server listens on.
    pub addr: SocketAddr,
    /// The TCP listen backlog before connections are refused.
    pub backlog: u32,
    /// Connections with no read or write activity for this long are closed. Zero disables
    /// idle enforcement.
    pub idle_time_secs: u64,
    /// How long the supervisor waits for the listener to come up.
    pub startup_wait_secs: u64,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8900".parse().expect("valid default addr"),
            backlog: 1024,
            idle_time_secs: 60,
            startup_wait_secs: 10,
        }
    }
}

/// Async runtime settings.
///
/// The acceptor and worker thread groups of the original deployment model collapse into a
/// single tokio runtime; this controls its worker count.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Runtime {
    /// Number of worker threads for the server runtime.
    pub worker_threads: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
        }
    }
}

/// Coordinator tunables exposed through server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinatorOptions {
    /// Maximum concurrent replica attempts per get operation.
    pub get_parallelism: usize,
    /// Successful responses required to complete a get operation.
    pub get_success_target: usize,
    /// Deadline applied to every coordinator operation driven by the ingress.
    pub operation_timeout_ms: u64,
    /// Maximum concurrent pooled connections per replica endpoint.
    pub max_connections_per_endpoint: usize,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        let defaults = blobstore_coordinator::CoordinatorConfig::default();
        Self {
            get_parallelism: defaults.get_parallelism,
            get_success_target: defaults.get_success_target,
            operation_timeout_ms: 5000,
            max_connections_per_endpoint: defaults.max_connections_per_endpoint,
        }
    }
}

/// Controls the log format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format: [`LogFormat::Pretty`] for TTY, otherwise
    /// [`LogFormat::Simplified`].
    Auto,
    /// Pretty printing with colors.
    Pretty,
    /// Simplified plain text output.
    Simplified,
    /// Dump out JSON lines.
    Json,
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logging {
    /// The maximum level to log at.
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,
    /// The output format.
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// The full server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// HTTP listener settings.
    pub http: Http,
    /// Async runtime settings.
    pub runtime: Runtime,
    /// Coordinator tunables.
    pub coordinator: CoordinatorOptions,
    /// The static cluster topology the coordinator reads against.
    pub cluster: ClusterLayout,

    /// Logging settings.
    pub logging: Logging,
    /// Datadog API key; metrics are disabled when unset.
    pub datadog_key: Option<SecretBox<ConfigSecret>>,
    /// Tags attached to every emitted metric.
    pub metric_tags: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: Http::default(),
            runtime: Runtime::default(),
            coordinator: CoordinatorOptions::default(),
            cluster: ClusterLayout {
                local_datacenter: "local".into(),
                partitions: Vec::new(),
            },
            logging: Logging::default(),
            datadog_key: None,
            metric_tags: Default::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from command line arguments and the environment.
    pub fn from_env() -> Result<Self> {
        let args: Args = argh::from_env();
        Self::from_args(args)
    }

    /// Loads the configuration from the given arguments and the environment.
    pub fn from_args(args: Args) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(config_path) = &args.config {
            figment = figment.merge(Yaml::file(config_path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }
}

/// Command line arguments for the server.
#[derive(Debug, Default, FromArgs)]
pub struct Args {
    /// path to the yaml configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            http:
                addr: 127.0.0.1:9999
                idle_time_secs: 5
            coordinator:
                get_parallelism: 3
            cluster:
                local_datacenter: dc1
                partitions:
                    - id: 1
                      replicas:
                        - host: replica-1
                          port: 6001
                          datacenter: dc1
                        - host: replica-2
                          port: 6001
                          datacenter: dc2
            "#,
            )
            .unwrap();

        let args = Args {
            config: Some(tempfile.path().into()),
        };
        let config = Config::from_args(args).unwrap();

        assert_eq!(config.http.addr, "127.0.0.1:9999".parse().unwrap());
        assert_eq!(config.http.idle_time_secs, 5);
        assert_eq!(config.http.backlog, 1024);
        assert_eq!(config.coordinator.get_parallelism, 3);
        assert_eq!(config.coordinator.get_success_target, 1);
        assert_eq!(config.cluster.local_datacenter, "dc1");
        assert_eq!(config.cluster.partitions.len(), 1);
        assert_eq!(config.cluster.partitions[0].replicas[1].datacenter, "dc2");
    }

    #[test]
    fn environment_overrides_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            http:
                addr: 127.0.0.1:9999
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("blobstore_http__addr", "127.0.0.1:8081");
            jail.set_env("blobstore_coordinator__operation_timeout_ms", "250");
            jail.set_env("blobstore_metric_tags__region", "eu-west");

            let args = Args {
                config: Some(tempfile.path().into()),
            };
            let config = Config::from_args(args).unwrap();

            assert_eq!(config.http.addr, "127.0.0.1:8081".parse().unwrap());
            assert_eq!(config.coordinator.operation_timeout_ms, 250);
            assert_eq!(
                config.metric_tags,
                [("region".into(), "eu-west".into())].into()
            );

            Ok(())
        });
    }
}
