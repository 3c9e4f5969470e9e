use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{StreamExt, stream};
use ndarray_rand::rand::{SeedableRng, rngs::StdRng, seq::index};
use post_clusters_include_zstd::include_zstd;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::{Map, Value};
use tracing::{Instrument, Span, debug, info, info_span, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use super::extract::Extracted;
use super::generate::Generator;
use super::prompt::PromptTemplate;
use super::query::Query;
use crate::classify::cluster::ClusterAssignment;
use crate::config::LabelArgs;
use crate::document::Document;
use crate::error::AppError;
use crate::logging::bar_style;
use crate::{AppResult, impl_query};

static LABEL_CLUSTER_PROMPT: &[u8] = include_zstd!("src/ai/prompts/label_cluster_prompt.md");

const KEYWORD_COUNT: usize = 5;
const POST_SEPARATOR: &str = "\n\n---\n\n";

/// Overall attitude of a cluster towards the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    Positive,
    Negative,
    Ambivalent,
    Neutral,
}

impl FromStr for Stance {
    type Err = String;

    /// Case-insensitive, and accepts the Spanish spellings the scraped posts prompt models into.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "positive" | "positiva" | "positivo" => Ok(Stance::Positive),
            "negative" | "negativa" | "negativo" => Ok(Stance::Negative),
            "ambivalent" | "ambivalente" => Ok(Stance::Ambivalent),
            "neutral" | "neutra" | "neutro" => Ok(Stance::Neutral),
            other => Err(format!(
                "unknown stance `{other}`, expected positive, negative, ambivalent or neutral"
            )),
        }
    }
}

impl<'de> Deserialize<'de> for Stance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// # cluster_label
/// A short description of one group of posts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClusterLabel {
    /// 3 to 6 neutral, descriptive words
    #[serde(alias = "label")]
    pub short_label: String,
    /// Exactly five keywords
    pub keywords: Vec<String>,
    /// One or two sentences
    pub description: String,
    /// Attitude of the posts towards the subject
    #[serde(alias = "attitude")]
    pub stance: Stance,
    /// Any other fields the model chose to return, kept as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClusterLabel {
    fn check(&self) -> Result<(), String> {
        if self.short_label.trim().is_empty() {
            return Err("short_label is empty".to_string());
        }
        if self.keywords.len() != KEYWORD_COUNT {
            return Err(format!(
                "expected {KEYWORD_COUNT} keywords, got {}",
                self.keywords.len()
            ));
        }
        Ok(())
    }
}

impl_query!(ClusterLabel, LABEL_CLUSTER_PROMPT, validate = ClusterLabel::check);

/// What gets written for each cluster: the parsed label or the model's raw reply.
pub type ClusterLabelRecord = Extracted<ClusterLabel>;

/// Records per cluster id plus counts for the run report.
#[derive(Debug, Clone, Default)]
pub struct LabelOutcome {
    pub records: BTreeMap<i32, ClusterLabelRecord>,
    pub parsed: usize,
    pub raw_fallback: usize,
    pub failed_calls: usize,
}

/// Describes clusters by prompting a [`Generator`] with a sample of their posts.
pub struct ClusterLabeler<G> {
    generator: G,
    n_examples: usize,
    max_chars: usize,
    seed: u64,
    subject: String,
    json_mode: AtomicBool,
    max_attempts: u32,
    retry_pause: Duration,
    concurrency: usize,
}

impl<G: Generator> ClusterLabeler<G> {
    pub fn new(generator: G, args: &LabelArgs) -> Self {
        Self {
            generator,
            n_examples: args.n_examples.max(1) as usize,
            max_chars: args.max_chars,
            seed: args.seed,
            subject: args.subject.clone(),
            json_mode: AtomicBool::new(args.json_mode),
            max_attempts: args.max_attempts.max(1),
            retry_pause: args.retry_pause,
            concurrency: args.concurrency.max(1),
        }
    }

    /// Up to `n_examples` member rows. Larger clusters are sampled with a generator seeded the
    /// same way for every cluster, so reruns pick the same posts.
    pub fn sample_members(&self, members: &[usize]) -> Vec<usize> {
        if members.len() <= self.n_examples {
            return members.to_vec();
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut picked = index::sample(&mut rng, members.len(), self.n_examples).into_vec();
        picked.sort_unstable();
        picked.into_iter().map(|i| members[i]).collect()
    }

    /// The `TITLE:`/`TEXT:` blocks for the sampled posts.
    pub fn format_posts(&self, posts: &[&Document]) -> String {
        posts
            .iter()
            .map(|doc| {
                let text: String = doc.text.trim().chars().take(self.max_chars).collect();
                format!("TITLE: {}\nTEXT: {}", doc.title.trim(), text)
            })
            .collect::<Vec<_>>()
            .join(POST_SEPARATOR)
    }

    /// One call. A refused JSON mode is switched off for the rest of the run and the call is
    /// repeated without it.
    async fn ask_once(&self, prompt: &str) -> AppResult<String> {
        let json_mode = self.json_mode.load(Ordering::Relaxed);
        match self.generator.generate(prompt, json_mode).await {
            Err(AppError::UnsupportedResponseFormat(reason)) if json_mode => {
                warn!("JSON mode rejected ({reason}); continuing without it");
                self.json_mode.store(false, Ordering::Relaxed);
                self.generator.generate(prompt, false).await
            }
            other => other,
        }
    }

    /// `None` once every attempt has failed.
    async fn ask(&self, prompt: &str) -> Option<String> {
        for attempt in 1..=self.max_attempts {
            match self.ask_once(prompt).await {
                Ok(reply) => return Some(reply),
                Err(e) => {
                    warn!(
                        "Labeling call failed (attempt {}/{}): {}",
                        attempt, self.max_attempts, e
                    );
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_pause).await;
                    }
                }
            }
        }
        None
    }

    /// Produce one record per non-noise cluster. `documents[i]` must be the post behind
    /// `assignment.labels()[i]`.
    #[tracing::instrument(name = "Labeling clusters", level = "info", skip_all)]
    pub async fn label_clusters(
        &self,
        documents: &[Document],
        assignment: &ClusterAssignment,
    ) -> AppResult<LabelOutcome> {
        assert_eq!(documents.len(), assignment.len());
        let template = ClusterLabel::template()?;
        let template = PromptTemplate::new(template);
        let grouped = assignment.grouped();

        let header_span = info_span!("Labeling clusters...");
        header_span.pb_set_style(&bar_style());
        header_span.pb_set_message("Labeling...");
        header_span.pb_set_finish_message("Labeling complete");
        header_span.pb_set_length(grouped.len() as u64);

        let results: Vec<(i32, Option<String>)> = async {
            stream::iter(grouped)
                .map(|(id, members)| {
                    let posts: Vec<&Document> = self
                        .sample_members(&members)
                        .into_iter()
                        .map(|i| &documents[i])
                        .collect();
                    let block = self.format_posts(&posts);
                    let vars = HashMap::from([
                        ("subject", self.subject.as_str()),
                        ("posts", block.as_str()),
                    ]);
                    let prompt = template.render(&vars);
                    debug!("Cluster {} prompt uses {} posts", id, posts.len());
                    async move { (id, self.ask(&prompt).await) }
                })
                .buffered(self.concurrency)
                .inspect(|_| Span::current().pb_inc(1))
                .collect()
                .await
        }
        .instrument(header_span)
        .await;

        let mut outcome = LabelOutcome::default();
        for (id, reply) in results {
            let record = match reply {
                Some(reply) => {
                    let record = ClusterLabel::extract(&reply);
                    if record.is_parsed() {
                        outcome.parsed += 1;
                    } else {
                        warn!("Cluster {} kept as raw text", id);
                        outcome.raw_fallback += 1;
                    }
                    record
                }
                None => {
                    warn!("Cluster {} could not be labeled", id);
                    outcome.failed_calls += 1;
                    Extracted::raw("")
                }
            };
            outcome.records.insert(id, record);
        }

        info!(
            "Labeled {} clusters: {} parsed, {} raw, {} failed",
            outcome.records.len(),
            outcome.parsed,
            outcome.raw_fallback,
            outcome.failed_calls
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use futures::FutureExt;
    use futures::future::BoxFuture;

    use super::*;
    use crate::classify::cluster::NOISE;

    const GOOD_REPLY: &str = "```json\n{\"label\": \"Waiting lists for therapy\", \"keywords\": [\"waiting\", \"list\", \"public\", \"therapy\", \"cost\"], \"description\": \"Posts about long waits.\", \"attitude\": \"negativa\"}\n```";

    enum Behavior {
        Reply(&'static str),
        RejectsJsonMode,
        AlwaysFails,
    }

    struct FakeGenerator {
        behavior: Behavior,
        calls: AtomicUsize,
        json_flags: Mutex<Vec<bool>>,
        prompts: Mutex<Vec<String>>,
    }

    impl FakeGenerator {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                calls: AtomicUsize::new(0),
                json_flags: Mutex::new(Vec::new()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    impl Generator for FakeGenerator {
        fn generate<'a>(
            &'a self,
            prompt: &'a str,
            json_mode: bool,
        ) -> BoxFuture<'a, AppResult<String>> {
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.json_flags.lock().unwrap().push(json_mode);
                self.prompts.lock().unwrap().push(prompt.to_string());
                match self.behavior {
                    Behavior::Reply(reply) => Ok(reply.to_string()),
                    Behavior::RejectsJsonMode if json_mode => Err(
                        AppError::UnsupportedResponseFormat("response_format".to_string()),
                    ),
                    Behavior::RejectsJsonMode => Ok(GOOD_REPLY.to_string()),
                    Behavior::AlwaysFails => Err(AppError::Other("connection refused".to_string())),
                }
            }
            .boxed()
        }
    }

    fn args() -> LabelArgs {
        LabelArgs {
            retry_pause: Duration::ZERO,
            ..LabelArgs::default()
        }
    }

    fn corpus() -> (Vec<Document>, ClusterAssignment) {
        let docs = (0..30)
            .map(|i| Document::new(i, format!("post {i}"), "x".repeat(2000)))
            .collect();
        let mut labels = vec![0; 20];
        labels.extend(vec![NOISE; 5]);
        labels.extend(vec![1; 5]);
        (docs, ClusterAssignment::new(labels))
    }

    #[test]
    fn sampling_is_capped_and_deterministic() {
        let labeler = ClusterLabeler::new(FakeGenerator::new(Behavior::AlwaysFails), &args());
        let members: Vec<usize> = (100..150).collect();
        let first = labeler.sample_members(&members);
        assert_eq!(first.len(), 12);
        assert_eq!(first, labeler.sample_members(&members));
        assert!(first.iter().all(|m| members.contains(m)));

        let small = [3, 9, 11];
        assert_eq!(labeler.sample_members(&small), small.to_vec());
    }

    #[test]
    fn posts_are_truncated_and_separated() {
        let labeler = ClusterLabeler::new(FakeGenerator::new(Behavior::AlwaysFails), &args());
        let a = Document::new(0, " First ", "é".repeat(1000));
        let b = Document::new(1, "Second", "short");
        let block = labeler.format_posts(&[&a, &b]);
        let parts: Vec<&str> = block.split(POST_SEPARATOR).collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], format!("TITLE: First\nTEXT: {}", "é".repeat(900)));
        assert_eq!(parts[1], "TITLE: Second\nTEXT: short");
    }

    #[test]
    fn prompt_template_has_placeholders() {
        let template = ClusterLabel::template().unwrap();
        assert!(template.contains("{{posts}}"));
        assert!(template.contains("{{subject}}"));
    }

    #[test]
    fn wrong_keyword_count_falls_back_to_raw() {
        let reply = r#"{"short_label": "x y z", "keywords": ["a"], "description": "d", "stance": "neutral"}"#;
        assert_eq!(ClusterLabel::extract(reply), Extracted::raw(reply));
    }

    #[test]
    fn unknown_stance_falls_back_to_raw() {
        let reply = r#"{"short_label": "x y z", "keywords": ["a","b","c","d","e"], "description": "d", "stance": "furious"}"#;
        assert!(!ClusterLabel::extract(reply).is_parsed());
    }

    #[test]
    fn stance_ignores_case_and_padding() {
        for (raw, stance) in [
            ("NEGATIVE", Stance::Negative),
            ("Negativa", Stance::Negative),
            (" Positive ", Stance::Positive),
            ("AMBIVALENTE", Stance::Ambivalent),
            ("neutral", Stance::Neutral),
        ] {
            assert_eq!(raw.parse::<Stance>().unwrap(), stance);
        }
        let reply = r#"{"short_label": "x y z", "keywords": ["a","b","c","d","e"], "description": "d", "stance": "NEGATIVE"}"#;
        assert_eq!(
            ClusterLabel::extract(reply).parsed().unwrap().stance,
            Stance::Negative
        );
    }

    #[test]
    fn extra_fields_survive_extraction() {
        let reply = r#"{"short_label": "x y z", "keywords": ["a","b","c","d","e"], "description": "d", "stance": "neutral", "confidence": 0.9, "notes": ["n"]}"#;
        let record = ClusterLabel::extract(reply);
        let label = record.parsed().unwrap();
        assert_eq!(label.extra.get("confidence"), Some(&serde_json::json!(0.9)));

        let written = serde_json::to_value(&record).unwrap();
        let original: Value = serde_json::from_str(reply).unwrap();
        assert_eq!(written, original);
    }

    #[tokio::test]
    async fn fenced_replies_are_parsed_per_cluster() {
        let (docs, assignment) = corpus();
        let labeler = ClusterLabeler::new(FakeGenerator::new(Behavior::Reply(GOOD_REPLY)), &args());
        let outcome = labeler.label_clusters(&docs, &assignment).await.unwrap();

        assert_eq!(outcome.records.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(outcome.parsed, 2);
        let label = outcome.records[&0].parsed().unwrap();
        assert_eq!(label.keywords.len(), 5);
        assert_eq!(label.stance, Stance::Negative);

        let prompts = labeler.generator.prompts.lock().unwrap();
        assert!(prompts.iter().all(|p| p.contains("therapy and psychology")));
        assert!(prompts.iter().all(|p| !p.contains("{{")));
        // Cluster 0 has 20 members, so only 12 posts reach the prompt.
        assert_eq!(prompts[0].matches("TITLE: ").count(), 12);
        assert_eq!(prompts[1].matches("TITLE: ").count(), 5);
    }

    #[tokio::test]
    async fn rejected_json_mode_is_dropped_without_spending_attempts() {
        let (docs, assignment) = corpus();
        let labeler = ClusterLabeler::new(
            FakeGenerator::new(Behavior::RejectsJsonMode),
            &LabelArgs {
                max_attempts: 1,
                ..args()
            },
        );
        let outcome = labeler.label_clusters(&docs, &assignment).await.unwrap();
        assert_eq!(outcome.parsed, 2);
        assert_eq!(outcome.failed_calls, 0);
        let flags = labeler.generator.json_flags.lock().unwrap().clone();
        assert_eq!(flags, vec![true, false, false]);
    }

    #[tokio::test]
    async fn exhausted_retries_leave_an_empty_raw_record() {
        let (docs, assignment) = corpus();
        let labeler = ClusterLabeler::new(FakeGenerator::new(Behavior::AlwaysFails), &args());
        let outcome = labeler.label_clusters(&docs, &assignment).await.unwrap();
        assert_eq!(outcome.failed_calls, 2);
        assert_eq!(outcome.records[&0], Extracted::raw(""));
        assert_eq!(outcome.records[&1], Extracted::raw(""));
        assert_eq!(labeler.generator.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn prose_reply_is_kept_verbatim() {
        let (docs, assignment) = corpus();
        let reply = "  I think these posts are about sleep.  ";
        let labeler = ClusterLabeler::new(FakeGenerator::new(Behavior::Reply(reply)), &args());
        let outcome = labeler.label_clusters(&docs, &assignment).await.unwrap();
        assert_eq!(outcome.raw_fallback, 2);
        assert_eq!(outcome.records[&1], Extracted::raw(reply));
    }
}
