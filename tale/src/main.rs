//! Command-line tools for saved scenes.
//!
//! ```bash
//! tale saves ./saves
//! tale inspect ./saves/tavern.json
//! tale context ./saves/tavern.json --budget 2048 --chapter-labels
//! tale fix-time ./saves/tavern.json --write
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tale_core::context::{ApproximateTokenCounter, KeepDirector};
use tale_core::message::ConversationFormat;
use tale_core::persist::list_saves;
use tale_core::{build_context, GameConfig, MessageKind, SavedScene};
use tracing::info;

const KINDS: [MessageKind; 7] = [
    MessageKind::Scene,
    MessageKind::Character,
    MessageKind::Narrator,
    MessageKind::Director,
    MessageKind::TimePassage,
    MessageKind::Reinforcement,
    MessageKind::ContextInvestigation,
];

#[derive(Parser)]
#[command(name = "tale")]
#[command(about = "Inspect and repair saved scenes")]
#[command(version)]
struct Args {
    /// Game config (TOML). Defaults are used when it is missing.
    #[arg(short, long, default_value = "tale.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the saves in a directory, newest first
    Saves { dir: PathBuf },

    /// Summarize a save
    Inspect { save: PathBuf },

    /// Print the context window a save would produce
    Context {
        save: PathBuf,

        /// Token budget (defaults to the config's)
        #[arg(short, long)]
        budget: Option<usize>,

        /// Label layered summaries with chapter numbers
        #[arg(long)]
        chapter_labels: bool,

        /// Keep director messages that target a character
        #[arg(long)]
        keep_director: bool,

        /// Lay the dialogue out as a movie script
        #[arg(long)]
        movie_script: bool,
    },

    /// Recompute the scene clock and summary timestamps from time passages
    FixTime {
        save: PathBuf,

        /// Write the repaired save back in place
        #[arg(long)]
        write: bool,
    },

    /// Print the last lines of the history
    Snapshot {
        save: PathBuf,

        #[arg(short, long, default_value_t = 20)]
        lines: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();
    tale_core::logging::init_with_default("warn");

    let args = Args::parse();
    let config = GameConfig::load_or_default(&args.config);

    match args.command {
        Command::Saves { dir } => saves(dir).await,
        Command::Inspect { save } => inspect(save).await,
        Command::Context {
            save,
            budget,
            chapter_labels,
            keep_director,
            movie_script,
        } => {
            let mut request = config.context_request().with_chapter_labels(chapter_labels);
            if let Some(budget) = budget {
                request.budget = budget;
            }
            if keep_director {
                request = request.with_keep_director(KeepDirector::Any);
            }
            if movie_script {
                let mode = request.direction_mode;
                request = request.with_format(ConversationFormat::MovieScript, mode);
            }
            context(save, request).await
        }
        Command::FixTime { save, write } => fix_time(save, write).await,
        Command::Snapshot { save, lines } => {
            let saved = load(&save).await?;
            let format = config.context_request().format;
            println!("{}", saved.history_store().snapshot(lines, None, None, format));
            Ok(())
        }
    }
}

async fn load(path: &Path) -> Result<SavedScene> {
    SavedScene::load_json(path)
        .await
        .with_context(|| format!("failed to load {}", path.display()))
}

async fn saves(dir: PathBuf) -> Result<()> {
    let saves = list_saves(&dir)
        .await
        .with_context(|| format!("failed to read {}", dir.display()))?;

    if saves.is_empty() {
        println!("No saves found in {}.", dir.display());
        return Ok(());
    }

    for save in saves {
        let meta = save.metadata;
        println!(
            "{}  {} ({} messages, {}) {}",
            meta.saved_at, meta.name, meta.message_count, meta.scene_time, save.path
        );
    }
    Ok(())
}

async fn inspect(path: PathBuf) -> Result<()> {
    let saved = load(&path).await?;

    println!("Scene:     {}", saved.name);
    if !saved.title.is_empty() {
        println!("Title:     {}", saved.title);
    }
    println!("Saved at:  {}", saved.saved_at);
    println!("Time:      {}", saved.ts.to_human("", "Start"));
    println!(
        "Player:    {}",
        saved.metadata.player_character.as_deref().unwrap_or("-")
    );
    println!("Cast:      {}", saved.metadata.characters.join(", "));
    if let Some(restore_from) = &saved.restore_from {
        println!("Restores:  {restore_from}");
    }

    println!("\nMessages:  {}", saved.history.len());
    for kind in KINDS {
        let n = saved.count(kind);
        if n > 0 {
            println!("  {:<22}{n}", kind.as_str());
        }
    }
    println!("Summaries: {}", saved.archived_history.len());
    for (i, layer) in saved.layered_history.iter().enumerate() {
        println!("  layer {i:<16}{}", layer.len());
    }
    Ok(())
}

async fn context(path: PathBuf, request: tale_core::ContextRequest) -> Result<()> {
    let saved = load(&path).await?;
    let store = saved.history_store();

    let built = build_context(&store, &request, &ApproximateTokenCounter);
    info!(
        tokens = built.token_count,
        context = built.context.len(),
        dialogue = built.dialogue.len(),
        "context built"
    );

    for part in built.parts() {
        println!("{part}");
    }
    eprintln!(
        "\n{} tokens of {} ({} context segments, {} dialogue lines)",
        built.token_count,
        request.budget,
        built.context.len(),
        built.dialogue.len()
    );
    Ok(())
}

async fn fix_time(path: PathBuf, write: bool) -> Result<()> {
    let mut saved = load(&path).await?;
    let mut store = saved.history_store();

    let before = store.clock();
    let after = store.fix_time();
    println!("Scene time: {} -> {}", before.to_human("", "Start"), after.to_human("", "Start"));

    if !write {
        return Ok(());
    }

    saved.archived_history = store.archived().to_vec();
    saved.layered_history = store.layers().to_vec();
    saved.ts = after;
    saved
        .stamp()
        .save_json(&path)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}
