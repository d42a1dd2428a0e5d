//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use linksort_classifier::{Classifier, OpenAiClassifier};
use linksort_core::{
    CategorizeConfig, ProgressReporter, apply_topics, build_artifact, categorize,
    default_artifact_path, read_artifact, write_artifact,
};
use linksort_fetcher::ApiClient;
use linksort_shared::{
    ApiConfig, AppConfig, ClassifierConfig, HallucinationCounter, Item, LinksortError, RunId,
    auth_token, classifier_api_key, init_config, load_config,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// linksort: sort your saved links into topics.
#[derive(Parser)]
#[command(
    name = "linksort",
    version,
    about = "Categorize saved links into topics with an LLM and write them back.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch saved links, categorize them, and write a run file.
    Categorize {
        /// User whose links to categorize (defaults to `api.user_id`).
        #[arg(short, long, env = "LINKSORT_USER_ID")]
        user: Option<String>,

        /// Also re-categorize links that already have topics.
        #[arg(long)]
        all: bool,

        /// Categorize at most this many links.
        #[arg(long)]
        limit: Option<usize>,

        /// Listing requests kept in flight.
        #[arg(long)]
        concurrency: Option<u32>,

        /// Links per classifier call.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Classifier model.
        #[arg(long)]
        model: Option<String>,

        /// Where to write the run file (defaults to linksort-run-<id>.json).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Write the topics from a run file back to the API.
    Apply {
        /// Run file produced by `categorize`.
        #[arg(long)]
        results: PathBuf,

        /// Authorization header value (defaults to the configured env var).
        #[arg(long)]
        token: Option<String>,
    },

    /// List a user's existing topics.
    Topics {
        /// User whose topics to list (defaults to `api.user_id`).
        #[arg(short, long, env = "LINKSORT_USER_ID")]
        user: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "linksort=info",
        1 => "linksort=debug",
        _ => "linksort=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Categorize {
            user,
            all,
            limit,
            concurrency,
            batch_size,
            model,
            out,
        } => {
            let options = CategorizeOptions {
                user,
                all,
                limit,
                concurrency,
                batch_size,
                model,
                out,
            };
            cmd_categorize(options).await
        }
        Command::Apply { results, token } => cmd_apply(&results, token).await,
        Command::Topics { user } => cmd_topics(user).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping");
            token.cancel();
        }
    });
    cancel
}

/// Resolve the user from the flag or the config file.
fn resolve_user(config: &AppConfig, user: Option<String>) -> Result<String> {
    user.or_else(|| config.api.user_id.clone()).ok_or_else(|| {
        eyre!("no user id given: pass --user, set LINKSORT_USER_ID, or set api.user_id in the config file")
    })
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

struct CategorizeOptions {
    user: Option<String>,
    all: bool,
    limit: Option<usize>,
    concurrency: Option<u32>,
    batch_size: Option<usize>,
    model: Option<String>,
    out: Option<PathBuf>,
}

async fn cmd_categorize(options: CategorizeOptions) -> Result<()> {
    let mut config = load_config()?;
    let api_key = classifier_api_key(&config)?;

    if let Some(concurrency) = options.concurrency {
        config.fetch.concurrency = concurrency;
    }
    if let Some(batch_size) = options.batch_size {
        if batch_size == 0 {
            return Err(eyre!("--batch-size must be at least 1"));
        }
        config.classifier.batch_size = batch_size;
    }
    if let Some(model) = options.model {
        config.classifier.model = model;
    }

    let user_id = resolve_user(&config, options.user)?;
    let api = ApiClient::new(ApiConfig::from_app(&config, &user_id)?)?;
    let classifier_config = ClassifierConfig::from(&config);
    let batch_size = classifier_config.batch_size;
    let classifier = OpenAiClassifier::new(classifier_config, api_key)?;

    let categorize_config = CategorizeConfig {
        batch_size,
        only_untopiced: !options.all,
        limit: options.limit,
    };

    info!(
        user_id = %user_id,
        model = classifier.model(),
        batch_size,
        only_untopiced = categorize_config.only_untopiced,
        "categorizing saved links"
    );

    let cancel = cancel_on_ctrl_c();
    let hallucinations = HallucinationCounter::new();
    let reporter = CliProgress::new();

    let result = categorize(
        &api,
        &classifier,
        &categorize_config,
        &hallucinations,
        &reporter,
        &cancel,
    )
    .await;
    reporter.finish();

    let run_id = RunId::new();
    let out = options.out.unwrap_or_else(|| default_artifact_path(&run_id));

    let result = match result {
        Ok(result) => result,
        Err(failure) => {
            if let Some(partial) = failure.partial.as_ref().filter(|p| !p.items.is_empty()) {
                let mut artifact =
                    build_artifact(run_id, &user_id, classifier.model(), batch_size, partial);
                artifact.partial = true;
                write_artifact(&out, &artifact)?;

                print_items(&partial.items);
                println!();
                println!(
                    "  Categorization stopped after {} of {} batches.",
                    partial.batches, failure.total_batches
                );
                println!("  Partial results: {}", out.display());
                println!();
            }
            if failure.is_cancelled() {
                return Err(eyre!("categorize interrupted"));
            }
            return Err(failure.into());
        }
    };

    let artifact = build_artifact(run_id, &user_id, classifier.model(), batch_size, &result);
    write_artifact(&out, &artifact)?;

    print_items(&result.items);

    println!();
    println!("  Categorization complete!");
    println!("  Run:            {}", artifact.run_id);
    println!("  Links fetched:  {}", result.links_fetched);
    println!("  Categorized:    {}", result.items.len());
    println!("  Batches:        {}", result.batches);
    println!("  New topics:     {}", result.new_topics.len());
    println!("  Hallucinations: {}", result.hallucinations);
    if !result.pages_failed.is_empty() {
        println!("  Failed pages:   {}", result.pages_failed.len());
    }
    println!("  Results:        {}", out.display());
    println!("  Time:           {:.1}s", result.elapsed.as_secs_f64());
    println!();
    println!("  Review the file, then run: linksort apply --results {}", out.display());
    println!();

    Ok(())
}

async fn cmd_apply(results: &Path, token: Option<String>) -> Result<()> {
    let config = load_config()?;
    let token = token.or_else(|| auth_token(&config)).ok_or_else(|| {
        eyre!(
            "no auth token: pass --token or set {}",
            config.api.auth_token_env
        )
    })?;

    let artifact = read_artifact(results)?;
    if artifact.partial {
        warn!(run_id = %artifact.run_id, "run file holds partial results from an interrupted run");
    }
    let api = ApiClient::new(ApiConfig::from_app(&config, &artifact.user_id)?)?;

    info!(
        run_id = %artifact.run_id,
        user_id = %artifact.user_id,
        items = artifact.items.len(),
        "applying topics"
    );

    let cancel = cancel_on_ctrl_c();
    let reporter = CliProgress::new();
    let report = apply_topics(&api, &artifact.items, &token, &reporter, &cancel).await;
    reporter.finish();

    let report = match report {
        Ok(report) => report,
        Err(LinksortError::Cancelled) => return Err(eyre!("apply interrupted")),
        Err(e) => return Err(e.into()),
    };

    println!();
    println!("  Updated: {}", report.updated.len());
    println!("  Skipped: {}", report.skipped.len());
    println!("  Failed:  {}", report.failed.len());
    for (id, reason) in &report.failed {
        println!("    {id}: {reason}");
    }
    println!();

    if !report.is_clean() {
        return Err(eyre!("{} topic updates failed", report.failed.len()));
    }
    Ok(())
}

async fn cmd_topics(user: Option<String>) -> Result<()> {
    let config = load_config()?;
    let user_id = resolve_user(&config, user)?;
    let api = ApiClient::new(ApiConfig::from_app(&config, &user_id)?)?;

    let mut topics = api.fetch_topics().await;
    topics.sort();
    topics.dedup();

    if topics.is_empty() {
        println!("No topics found for user {user_id}.");
        return Ok(());
    }
    for topic in &topics {
        println!("{topic}");
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_items(items: &[Item]) {
    if items.is_empty() {
        println!("No links needed categorizing.");
        return;
    }

    println!("{:>10}  {:<40}  TOPICS", "ID", "TITLE");
    for item in items {
        let title = if item.title.is_empty() {
            &item.url
        } else {
            &item.title
        };
        println!(
            "{:>10}  {:<40}  {}",
            item.id,
            truncate(title, 40),
            item.topics.join(", ")
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Resolution of the progress bar; fractions are scaled to this length.
const PROGRESS_STEPS: u64 = 1000;

/// CLI progress reporter using an indicatif bar with a spinner.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(PROGRESS_STEPS);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {msg:<40} [{bar:30.cyan/blue}] {percent:>3}%",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
        .progress_chars("=> ");
        bar.set_style(style);
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.bar.set_position(0);
        self.bar.set_message(name.to_string());
    }

    fn progress(&self, fraction: f64, label: Option<&str>) {
        let position = (fraction.clamp(0.0, 1.0) * PROGRESS_STEPS as f64).round() as u64;
        self.bar.set_position(position);
        if let Some(label) = label {
            self.bar.set_message(label.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ünïcödé-heavy title", 6), "ünïcö…");
    }

    #[test]
    fn user_flag_overrides_config() {
        let mut config = AppConfig::default();
        config.api.user_id = Some("from-config".into());

        assert_eq!(resolve_user(&config, Some("flag".into())).unwrap(), "flag");
        assert_eq!(resolve_user(&config, None).unwrap(), "from-config");

        config.api.user_id = None;
        assert!(resolve_user(&config, None).is_err());
    }

    #[test]
    fn cli_parses_categorize_flags() {
        let cli = Cli::try_parse_from([
            "linksort",
            "-vv",
            "categorize",
            "--user",
            "7",
            "--all",
            "--limit",
            "50",
            "--batch-size",
            "10",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Categorize {
                user,
                all,
                limit,
                batch_size,
                ..
            } => {
                assert_eq!(user.as_deref(), Some("7"));
                assert!(all);
                assert_eq!(limit, Some(50));
                assert_eq!(batch_size, Some(10));
            }
            _ => panic!("expected categorize"),
        }
    }
}
