use std::time::Duration;

use async_openai::Client;
use async_openai::config::{Config, OpenAIConfig};
use clap::{ArgAction, Args, Command, FromArgMatches};
use serde::Serialize;

/// Build any of the argument groups below with the same defaults the CLI would use.
fn defaults_of<T: Args>() -> T {
    let matches = T::augment_args(Command::new("defaults"))
        .no_binary_name(true)
        .get_matches_from(Vec::<String>::new());
    T::from_arg_matches(&matches).expect("argument defaults must parse")
}

/// Connection to the OpenAI-compatible model server (Ollama, LM Studio, OpenAI).
#[derive(Args, Debug, Clone, Serialize)]
pub struct ServerArgs {
    /// Whether to use secure connection (HTTPS) to the model server
    /// Defaults to false for local servers (i.e. `localhost` and private subnets)
    /// Defaults to true for public IP addresses and hostnames
    #[arg(long)]
    pub secure: Option<bool>,

    /// Host for the model server
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Port for the model server
    #[arg(long, default_value_t = 11434)]
    pub port: u16,

    /// OpenAI API version path segment
    #[arg(long, default_value = "v1")]
    pub api_version: String,

    /// API key, if the server wants one. Falls back to `OPENAI_API_KEY`.
    #[arg(long)]
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for ServerArgs {
    fn default() -> Self {
        defaults_of()
    }
}

impl ServerArgs {
    fn is_local_host(&self) -> bool {
        self.host == "localhost"
            || self.host.ends_with(".local")
            || self.host.ends_with(".internal")
            || self.host.ends_with(".lan")
            || self.host.ends_with(".home.arpa")
            || self.host.ends_with(".test")
            || self
                .host
                .parse::<std::net::Ipv4Addr>()
                .is_ok_and(|ip| ip.is_loopback() || ip.is_private() || ip.is_link_local())
            || self.host.parse::<std::net::Ipv6Addr>().is_ok_and(|ip| {
                ip.is_loopback() || ip.is_unique_local() || ip.is_unicast_link_local()
            })
    }

    pub fn api_base(&self) -> String {
        let scheme = match self.secure {
            Some(true) => "https",
            Some(false) => "http",
            None if self.is_local_host() => "http",
            None => "https",
        };
        format!(
            "{scheme}://{}:{}/{}",
            self.host, self.port, self.api_version
        )
    }

    pub fn get_client(&self) -> Client<Box<dyn Config>> {
        let mut config = OpenAIConfig::default().with_api_base(self.api_base());
        if let Some(key) = &self.api_key {
            config = config.with_api_key(key);
        }
        Client::with_config(Box::new(config) as Box<dyn Config>)
    }
}

/// Options for turning posts into vectors.
#[derive(Args, Debug, Clone, Serialize)]
pub struct EmbeddingArgs {
    /// Embedding model served by the model server
    #[arg(id = "embedding_model", long = "embedding-model", default_value = "nomic-embed-text")]
    pub model: String,

    /// Attempts per post before it is dropped from the run
    #[arg(
        id = "embedding_attempts",
        long = "embedding-attempts",
        default_value_t = 3,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_attempts: u32,

    /// Pause between failed embedding attempts (e.g. `1s`, `500ms`)
    #[arg(
        id = "embedding_retry_pause",
        long = "embedding-retry-pause",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    #[serde(with = "crate::serde_helpers::duration")]
    pub retry_pause: Duration,

    /// Embedding requests kept in flight at once
    #[arg(id = "embedding_concurrency", long = "embedding-concurrency", default_value_t = 4)]
    pub concurrency: usize,

    /// Log a progress line every N posts
    #[arg(long, default_value_t = 50)]
    pub progress_every: usize,
}

impl Default for EmbeddingArgs {
    fn default() -> Self {
        defaults_of()
    }
}

/// HDBSCAN parameters.
#[derive(Args, Debug, Clone, Serialize)]
pub struct ClusterArgs {
    /// Smallest group of posts that counts as a cluster
    #[arg(long, default_value_t = 15, value_parser = clap::value_parser!(u32).range(2..))]
    pub min_cluster_size: u32,

    /// Density smoothing; larger values mark more posts as noise
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
    pub min_samples: u32,
}

impl Default for ClusterArgs {
    fn default() -> Self {
        defaults_of()
    }
}

/// 2D projection used for the scatter plot only.
#[derive(Args, Debug, Clone, Serialize)]
pub struct ProjectionArgs {
    /// Skip the projection and the plot entirely
    #[arg(long, default_value_t = false, action = ArgAction::SetTrue)]
    pub no_plot: bool,

    /// Neighbourhood size of the projection graph
    #[arg(long, default_value_t = 15)]
    pub n_neighbors: usize,

    /// Minimum distance between points in the projected layout
    #[arg(long, default_value_t = 0.1)]
    pub min_dist: f64,

    /// Optimisation epochs
    #[arg(long, default_value_t = 200)]
    pub n_epochs: usize,

    /// Seed for the projection layout
    #[arg(id = "projection_seed", long = "projection-seed", default_value_t = 42)]
    pub seed: u64,
}

impl Default for ProjectionArgs {
    fn default() -> Self {
        defaults_of()
    }
}

/// Options for describing each cluster with the generative model.
#[derive(Args, Debug, Clone, Serialize)]
pub struct LabelArgs {
    /// Chat model used to describe clusters
    #[arg(id = "label_model", long = "label-model", default_value = "llama3.2:1b")]
    pub model: String,

    /// Posts sampled from each cluster for the prompt
    #[arg(long, default_value_t = 12, value_parser = clap::value_parser!(u32).range(1..))]
    pub n_examples: u32,

    /// Characters of post text kept per sampled post
    #[arg(long, default_value_t = 900)]
    pub max_chars: usize,

    /// Seed used when sampling posts from large clusters
    #[arg(id = "sample_seed", long = "sample-seed", default_value_t = 42)]
    pub seed: u64,

    /// What the stance of a cluster is measured against
    #[arg(long, default_value = "therapy and psychology")]
    pub subject: String,

    /// Do not ask the server for JSON-formatted replies
    #[arg(long = "no-json-mode", default_value_t = true, action = ArgAction::SetFalse)]
    pub json_mode: bool,

    /// Sampling temperature passed to the chat model
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Attempts per cluster before its record is left empty
    #[arg(
        id = "label_attempts",
        long = "label-attempts",
        default_value_t = 3,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_attempts: u32,

    /// Pause between failed labeling attempts
    #[arg(
        id = "label_retry_pause",
        long = "label-retry-pause",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    #[serde(with = "crate::serde_helpers::duration")]
    pub retry_pause: Duration,

    /// Clusters labeled at once
    #[arg(id = "label_concurrency", long = "label-concurrency", default_value_t = 1)]
    pub concurrency: usize,
}

impl Default for LabelArgs {
    fn default() -> Self {
        defaults_of()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cluster = ClusterArgs::default();
        assert_eq!(cluster.min_cluster_size, 15);
        assert_eq!(cluster.min_samples, 5);

        let embedding = EmbeddingArgs::default();
        assert_eq!(embedding.max_attempts, 3);
        assert_eq!(embedding.retry_pause, Duration::from_secs(1));

        let labels = LabelArgs::default();
        assert_eq!(labels.n_examples, 12);
        assert_eq!(labels.max_chars, 900);
        assert!(labels.json_mode);

        let projection = ProjectionArgs::default();
        assert_eq!(projection.n_neighbors, 15);
        assert!((projection.min_dist - 0.1).abs() < f64::EPSILON);
        assert_eq!(projection.seed, 42);
    }

    #[test]
    fn local_hosts_use_plain_http() {
        let server = ServerArgs::default();
        assert_eq!(server.api_base(), "http://localhost:11434/v1");

        let remote = ServerArgs {
            host: "api.example.com".to_string(),
            port: 443,
            ..ServerArgs::default()
        };
        assert_eq!(remote.api_base(), "https://api.example.com:443/v1");

        let forced = ServerArgs {
            host: "10.0.0.4".to_string(),
            secure: Some(true),
            ..ServerArgs::default()
        };
        assert!(forced.api_base().starts_with("https://"));
    }

    #[test]
    fn serialized_config_hides_api_key() {
        let server = ServerArgs {
            api_key: Some("secret".to_string()),
            ..ServerArgs::default()
        };
        let json = serde_json::to_string(&server).unwrap();
        assert!(!json.contains("secret"));
    }
}
