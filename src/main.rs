use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use journal_feedback::{Config, DatabaseManager, EnrichmentManager, FeedbackEngine, NewVocabularyItem};

#[derive(Parser)]
#[command(name = "journal-feedback")]
#[command(about = "Feedback and vocabulary enrichment for language-learning journals", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (missing file means defaults)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a journal entry
    Analyze {
        #[arg(short, long)]
        language: String,
        /// Save the entry and its extracted words for this user
        #[arg(long)]
        save: bool,
        #[arg(short, long, default_value_t = 1)]
        user: i64,
        text: String,
    },
    /// Save a word to a user's vocabulary
    AddWord {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        language: String,
        #[arg(long)]
        definition: Option<String>,
        #[arg(long)]
        part_of_speech: Option<String>,
        #[arg(long)]
        example: Option<String>,
        term: String,
    },
    /// List a user's vocabulary
    Words {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        language: Option<String>,
    },
    /// Delete a vocabulary item and its cached enrichment
    DeleteWord {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        item: i64,
    },
    /// List a user's saved journal entries, newest first
    Entries {
        #[arg(short, long)]
        user: i64,
    },
    /// Enrich one vocabulary item (cached)
    Enrich {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        item: i64,
        #[arg(short, long)]
        language: String,
        /// Regenerate even when cached
        #[arg(long)]
        refresh: bool,
    },
    /// Enrich every vocabulary item of a user in one language
    EnrichAll {
        #[arg(short, long)]
        user: i64,
        #[arg(short, long)]
        language: String,
    },
    /// Explain a term as if to a five-year-old
    Explain {
        #[arg(short, long)]
        language: String,
        #[arg(long)]
        context: Option<String>,
        term: String,
    },
    /// Generate new example sentences for a term
    Examples {
        #[arg(short, long)]
        language: String,
        /// Existing example to avoid (repeatable)
        #[arg(long)]
        existing: Vec<String>,
        #[arg(long)]
        level: Option<String>,
        /// Number of sentences (1-10, default 3)
        #[arg(short, long)]
        count: Option<usize>,
        term: String,
    },
    /// Generate a multiple-choice quiz for a term
    Quiz {
        #[arg(short, long)]
        language: String,
        #[arg(short, long)]
        questions: Option<usize>,
        #[arg(short, long)]
        difficulty: Option<String>,
        term: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_path(&cli.config)?;
    let engine = FeedbackEngine::new(config.clone())?;

    match cli.command {
        Commands::Analyze { language, save, user, text } => {
            let generated = engine.analyze_entry(&text, &language).await;
            if generated.placeholder {
                eprintln!("⚠️  没有可用的 provider，结果为占位内容");
            }
            if save {
                let db = DatabaseManager::new(&config).await?;
                let entry = db.save_entry(user, &text, &language, &generated.value).await?;
                let words = db
                    .save_extracted_words(user, &language, &generated.value.extracted_words, Some(entry.id))
                    .await?;
                eprintln!("💾 日记已保存 (id {})，新增 {} 个生词", entry.id, words.len());
                print_json(&entry)?;
            } else {
                print_json(&generated.value)?;
            }
        }
        Commands::AddWord { user, language, definition, part_of_speech, example, term } => {
            let db = DatabaseManager::new(&config).await?;
            let item = NewVocabularyItem {
                definition: definition.unwrap_or_default(),
                part_of_speech: part_of_speech.unwrap_or_default(),
                example: example.unwrap_or_default(),
                ..NewVocabularyItem::new(user, term, language)
            };
            print_json(&db.save_vocabulary(&item).await?)?;
        }
        Commands::Words { user, language } => {
            let db = DatabaseManager::new(&config).await?;
            print_json(&db.list_vocabulary(user, language.as_deref()).await?)?;
        }
        Commands::DeleteWord { user, item } => {
            let db = DatabaseManager::new(&config).await?;
            if db.delete_vocabulary(item, user).await? {
                eprintln!("🗑️  已删除单词 {}", item);
            } else {
                eprintln!("❌ 用户 {} 没有 id 为 {} 的单词", user, item);
            }
        }
        Commands::Entries { user } => {
            let db = DatabaseManager::new(&config).await?;
            print_json(&db.list_entries(user).await?)?;
        }
        Commands::Enrich { user, item, language, refresh } => {
            let db = Arc::new(DatabaseManager::new(&config).await?);
            let manager = EnrichmentManager::new(Arc::new(engine), db.clone(), db);
            let entry = manager.get_or_generate(user, item, &language, refresh).await?;
            print_json(&entry)?;
        }
        Commands::EnrichAll { user, language } => {
            let db = Arc::new(DatabaseManager::new(&config).await?);
            let manager = EnrichmentManager::new(Arc::new(engine), db.clone(), db);
            print_json(&manager.enrich_all(user, &language).await?)?;
        }
        Commands::Explain { language, context, term } => {
            let generated = engine.explain_simply(&term, &language, context.as_deref()).await;
            print_json(&generated.value)?;
        }
        Commands::Examples { language, existing, level, count, term } => {
            let generated = engine
                .more_examples(&term, &language, &existing, level.as_deref(), count)
                .await;
            print_json(&generated.value)?;
        }
        Commands::Quiz { language, questions, difficulty, term } => {
            let generated = engine.mini_quiz(&term, &language, questions, difficulty.as_deref()).await;
            print_json(&generated.value)?;
        }
    }

    Ok(())
}
