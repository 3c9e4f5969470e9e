use std::fmt::Display;
use std::io::Write;
use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Color, Style, Styles};
use clap::{ColorChoice, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::aot::{Generator, Shell, generate};
use clap_complete_nushell::Nushell;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use post_clusters_dirs::DirType;
use serde::Serialize;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::info;

use crate::AppResult;
use crate::ai::SchemaInfo;
use crate::ai::generate::OAIGenerator;
use crate::ai::label_clusters::{ClusterLabel, ClusterLabeler};
use crate::ai::query::Query;
use crate::classify::Classifier;
use crate::classify::cluster::HdbscanClusterer;
use crate::classify::embed::EmbeddingClient;
use crate::classify::openai::OAIEmbedder;
use crate::classify::project::Projector;
use crate::config::{ClusterArgs, EmbeddingArgs, LabelArgs, ProjectionArgs, ServerArgs};
use crate::document::load_documents;
use crate::io_utils::{RunMetadata, write_artifacts};

const STYLES: Styles = Styles::styled()
    .header(Style::new().bold())
    .usage(Style::new().bold())
    .error(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red))))
    .literal(
        Style::new()
            .bold()
            .fg_color(Some(Color::Ansi(AnsiColor::Green))),
    )
    .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Yellow))))
    .valid(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan))))
    .invalid(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightRed))))
    .context(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Magenta))))
    .context_value(
        Style::new()
            .bold()
            .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
    );

/// Long-form CLI description shown in `--help`.
const LONG_ABOUT: &str = "Post Clusters - Group forum posts by topic and describe each group

This tool:
- embeds the text of every post with an OpenAI-compatible embedding model (for example \x1b]8;;https://ollama.com/\x1b\\\x1b[4;36mOllama\x1b[24;39m\x1b]8;;\x1b\\)
- clusters the embeddings with HDBSCAN
- draws a 2-D map of the clusters
- asks a chat model for a short label, keywords, a description and a stance for every cluster";

/// Post Clusters - Group forum posts by topic and describe each group.
#[derive(Parser, Debug, Clone)]
#[command(author, version, propagate_version = true, about, long_about = Some(LONG_ABOUT), styles = STYLES)]
pub struct Cli {
    /// Color choice for the output
    #[arg(long, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Subcommand to run
    #[command(subcommand)]
    pub cmd: Cmd,
}

/// Top-level commands supported by the CLI.
#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Embed, cluster, plot and label a table of posts
    Run {
        /// JSON array or JSON Lines file with one post per record
        input: PathBuf,

        /// Directory to write the results to
        /// Defaults to a new timestamped directory under the data dir
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        server: ServerArgs,
        #[command(flatten)]
        embedding: EmbeddingArgs,
        #[command(flatten)]
        clustering: ClusterArgs,
        #[command(flatten)]
        projection: ProjectionArgs,
        #[command(flatten)]
        labeling: LabelArgs,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Print the label schema or the labeling prompt
    ///
    /// Useful when trying a new model, to see exactly what it is asked for.
    Show {
        /// What to print
        #[arg(value_enum)]
        target: ShowTarget,

        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Generate shell completion for a given shell
    Completion {
        /// Output file to write the completion script to
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// The shell to generate the completion for
        #[arg(value_enum)]
        shell: CompletionShell,

        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ShowTarget {
    /// JSON schema of a cluster label
    LabelSchema,
    /// The labeling prompt template, placeholders unfilled
    LabelPrompt,
}

impl ShowTarget {
    fn render(&self) -> AppResult<String> {
        match self {
            ShowTarget::LabelSchema => Ok(serde_json::to_string_pretty(
                &ClusterLabel::schema_value(),
            )?),
            ShowTarget::LabelPrompt => ClusterLabel::template(),
        }
    }
}

/// Supported completion targets for shell auto-completion.
#[derive(ValueEnum, Clone, Debug)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
    Nushell,
}

impl Display for CompletionShell {
    /// Render the canonical shell name string.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompletionShell::Bash => "bash",
            CompletionShell::Zsh => "zsh",
            CompletionShell::Fish => "fish",
            CompletionShell::PowerShell => "powershell",
            CompletionShell::Elvish => "elvish",
            CompletionShell::Nushell => "nushell",
        };
        write!(f, "{}", s)
    }
}

impl Generator for &CompletionShell {
    fn generate(&self, cmd: &clap::builder::Command, buf: &mut dyn Write) {
        match self {
            CompletionShell::Bash => Shell::Bash.generate(cmd, buf),
            CompletionShell::Zsh => Shell::Zsh.generate(cmd, buf),
            CompletionShell::Fish => Shell::Fish.generate(cmd, buf),
            CompletionShell::PowerShell => Shell::PowerShell.generate(cmd, buf),
            CompletionShell::Elvish => Shell::Elvish.generate(cmd, buf),
            CompletionShell::Nushell => Nushell.generate(cmd, buf),
        }
    }

    fn file_name(&self, name: &str) -> String {
        match self {
            CompletionShell::Bash => Shell::Bash.file_name(name),
            CompletionShell::Zsh => Shell::Zsh.file_name(name),
            CompletionShell::Fish => Shell::Fish.file_name(name),
            CompletionShell::PowerShell => Shell::PowerShell.file_name(name),
            CompletionShell::Elvish => Shell::Elvish.file_name(name),
            CompletionShell::Nushell => Nushell.file_name(name),
        }
    }
}

/// Helper trait for accessing verbosity flags on commands.
pub trait GetVerbosity {
    fn get_verbosity(&self) -> &Verbosity<InfoLevel>;
}

impl GetVerbosity for Cmd {
    fn get_verbosity(&self) -> &Verbosity<InfoLevel> {
        match self {
            Cmd::Run { verbosity, .. } => verbosity,
            Cmd::Show { verbosity, .. } => verbosity,
            Cmd::Completion { verbosity, .. } => verbosity,
        }
    }
}

/// Effective settings of a run, recorded in the run report.
#[derive(Debug, Serialize)]
struct RunConfig<'a> {
    input: &'a PathBuf,
    api_base: String,
    embedding: &'a EmbeddingArgs,
    clustering: &'a ClusterArgs,
    projection: &'a ProjectionArgs,
    labeling: &'a LabelArgs,
}

impl Cmd {
    /// Execute the chosen top-level command.
    #[tracing::instrument(name = "Running command", level = "info", skip(self))]
    pub async fn run(&self) -> AppResult<()> {
        match self {
            Cmd::Run {
                input,
                output,
                server,
                embedding,
                clustering,
                projection,
                labeling,
                ..
            } => {
                let config = RunConfig {
                    input,
                    api_base: server.api_base(),
                    embedding,
                    clustering,
                    projection,
                    labeling,
                };
                run_pipeline(output.as_ref(), server, &config).await
            }
            Cmd::Show { target, .. } => {
                tracing_indicatif::indicatif_println!("{}", target.render()?);
                Ok(())
            }
            Cmd::Completion { shell, output, .. } => {
                let mut cmd = Cli::command();
                if let Some(output_path) = output {
                    let mut file = std::fs::OpenOptions::new()
                        .write(true)
                        .truncate(true)
                        .create(true)
                        .open(output_path)?;
                    // Write completion script to the requested file.
                    generate(shell, &mut cmd, "post-clusters", &mut file);
                    info!(
                        "Generated completion script for {} at {}",
                        shell,
                        output_path.display()
                    );
                } else {
                    generate(shell, &mut cmd, "post-clusters", &mut std::io::stdout());
                }
                Ok(())
            }
        }
    }
}

#[tracing::instrument(name = "Clustering posts", level = "info", skip_all)]
async fn run_pipeline(
    output: Option<&PathBuf>,
    server: &ServerArgs,
    config: &RunConfig<'_>,
) -> AppResult<()> {
    let started_at = OffsetDateTime::now_utc();
    let documents = load_documents(config.input).await?;

    let client = server.get_client();
    info!("Using model server at {}", config.api_base);
    let embedding = EmbeddingClient::new(
        OAIEmbedder::new(&client, config.embedding.model.clone()),
        config.embedding,
    );
    let projector = (!config.projection.no_plot).then(|| Projector::new(config.projection));
    let labeler = ClusterLabeler::new(
        OAIGenerator::new(
            &client,
            config.labeling.model.clone(),
            config.labeling.temperature,
        ),
        config.labeling,
    );
    let classifier = Classifier::new(
        embedding,
        HdbscanClusterer::new(config.clustering),
        projector,
        labeler,
    );

    let output_run = classifier.run(documents).await?;

    let dir = match output {
        Some(dir) => dir.clone(),
        None => {
            let run_name = started_at.format(format_description!(
                "[year]-[month]-[day]T[hour]-[minute]-[second]"
            ))?;
            DirType::Data.ensure_run_dir_async(run_name).await?
        }
    };
    let metadata = RunMetadata {
        started_at,
        finished_at: OffsetDateTime::now_utc(),
        config,
        report: &output_run.report,
    };
    let written = write_artifacts(&dir, &output_run, &metadata).await?;
    for path in written {
        tracing_indicatif::indicatif_println!("{}", path.display());
    }
    Ok(())
}
