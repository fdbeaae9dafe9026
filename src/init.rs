use neptune_judge_client::{
    api::{HttpJudgeApi, JudgeApi},
    channel::ChannelManager,
    config,
    history::{Case, HistoryCache, HistoryLoader},
    message::{
        submit::{Source, SubmitPayload},
        update::SubmissionUpdate,
    },
    session::JudgingSession,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct CLIArgs {
    #[clap(short, long)]
    pub config: String,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit a solution and follow its judging
    Submit {
        #[clap(long)]
        case: String,
        #[clap(long)]
        language: i64,
        #[clap(long)]
        file: PathBuf,
        /// Upload the file as is instead of sending its text
        #[clap(long)]
        as_file: bool,
        #[clap(long)]
        contest: Option<String>,
        #[clap(long)]
        class: Option<String>,
        /// Problem code shown in the history for this case
        #[clap(long)]
        case_code: Option<String>,
    },
    /// Follow the judging of an existing submission
    Watch {
        submission_id: String,
        #[clap(long)]
        contest: Option<String>,
    },
    /// Print the submission history of a contest
    History {
        contest: String,
        #[clap(long)]
        class: Option<String>,
    },
}

pub async fn main() -> Result<()> {
    let cli_args = CLIArgs::parse();

    let config = std::fs::read_to_string(&cli_args.config)
        .with_context(|| format!("Failed to read config from {}", cli_args.config))?;

    let config: config::Config = toml::from_str(&config).context("Config is invalid")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let api: Arc<dyn JudgeApi> = Arc::new(HttpJudgeApi::new(&config.server.api_url));
    let cache = Arc::new(HistoryCache::new());
    let loader = HistoryLoader::new(api.clone(), cache.clone());

    match cli_args.command {
        Command::Submit {
            case,
            language,
            file,
            as_file,
            contest,
            class,
            case_code,
        } => {
            let contents = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read source from {}", file.display()))?;
            let source = if as_file {
                Source::File {
                    file_name: file
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "source".to_string()),
                    contents,
                }
            } else {
                Source::Code(String::from_utf8(contents).with_context(|| {
                    format!(
                        "Source {} is not valid UTF-8 (use --as-file to upload it as is)",
                        file.display()
                    )
                })?)
            };

            if let Some(contest) = &contest {
                preload_history(&loader, contest, class.as_deref()).await;
            }

            let cases = case_code
                .map(|problem_code| {
                    vec![Case {
                        case_id: case.clone(),
                        name: String::new(),
                        problem_code,
                    }]
                })
                .unwrap_or_default();

            let session = JudgingSession::new(
                api.clone(),
                ChannelManager::new(&config.server.ws_url),
                cache.clone(),
                contest.clone(),
                cases,
            );
            let mut refresh = cache.subscribe_refresh();
            session
                .submit(SubmitPayload {
                    case_id: case,
                    language_id: language,
                    source,
                    contest_id: contest.clone(),
                    class_transaction_id: class,
                })
                .await;

            if let Some(error) = session.state().submission_error {
                bail!("Submission failed: {error}");
            }

            follow(&session).await?;
            if refresh.has_changed().unwrap_or(false) {
                info!(
                    refreshes = *refresh.borrow_and_update(),
                    "Final verdict recorded, the contest leaderboard is stale"
                );
            }
            if let Some(contest) = contest {
                print_history(&cache, &contest).await;
            }
        }
        Command::Watch {
            submission_id,
            contest,
        } => {
            if let Some(contest) = &contest {
                preload_history(&loader, contest, None).await;
            }
            let session = JudgingSession::new(
                api.clone(),
                ChannelManager::new(&config.server.ws_url),
                cache.clone(),
                contest.clone(),
                Vec::new(),
            );
            session.watch(&submission_id).await;

            follow(&session).await?;
            if let Some(contest) = contest {
                print_history(&cache, &contest).await;
            }
        }
        Command::History { contest, class } => {
            loader
                .ensure_loaded(&contest, class.as_deref())
                .await
                .map_err(|e| anyhow::anyhow!("{}: {e}", e.user_message()))?;
            print_history(&cache, &contest).await;
        }
    }

    Ok(())
}

async fn preload_history(loader: &HistoryLoader, contest: &str, class: Option<&str>) {
    if let Err(e) = loader.ensure_loaded(contest, class).await {
        warn!("{} ({e})", e.user_message());
    }
}

/// Prints updates until a final verdict arrives, the channel goes away or
/// the user interrupts. There is no timeout.
async fn follow(session: &JudgingSession) -> Result<()> {
    let mut state = session.subscribe();
    let mut printed: Option<SubmissionUpdate> = None;
    let mut was_judging = false;

    let result = loop {
        let current = state.borrow_and_update().clone();

        if let Some(update) = &current.latest_update {
            if printed.as_ref() != Some(update) {
                print_update(update);
                printed = Some(update.clone());
            }
            if update.is_terminal() {
                break Ok(());
            }
        }
        if let Some(error) = current.judging_error {
            break Err(anyhow::anyhow!(
                "Connection error, the verdict may still arrive later: {error}"
            ));
        }
        if was_judging && !current.is_judging() {
            warn!("Submission channel closed before a final verdict arrived");
            break Ok(());
        }
        was_judging |= current.is_judging();

        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, no longer following the submission");
                break Ok(());
            }
        }
    };

    session.dispose().await;
    result
}

fn print_update(update: &SubmissionUpdate) {
    println!(
        "{} [{}] score {}",
        update.submission_id, update.status, update.score
    );
    for testcase in &update.testcases {
        println!(
            "  #{:<3} {:<24} {:>8.0} ms {:>8} KB",
            testcase.number, testcase.verdict, testcase.time_ms, testcase.memory_kb
        );
        if let Some(stderr) = testcase.stderr.as_deref().filter(|s| !s.is_empty()) {
            println!("       stderr: {}", stderr.trim_end());
        }
    }
}

async fn print_history(cache: &HistoryCache, contest: &str) {
    let Some(history) = cache.get(contest).await else {
        println!("History of contest {contest} is not loaded");
        return;
    };
    if history.is_empty() {
        println!("No submissions in contest {contest}");
        return;
    }
    for item in history {
        println!(
            "{}  {:<10} {:<24} {:>6}  {}  {}",
            item.submit_time.format("%Y-%m-%d %H:%M:%S"),
            item.case_code,
            item.status,
            item.score,
            item.username.as_deref().unwrap_or("-"),
            item.submission_id
        );
    }
}
