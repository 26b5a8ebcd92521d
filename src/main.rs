use anyhow::Result;
use clap::Parser;
use datasight::config::Settings;
use datasight::db::PgConnectionProvider;
use datasight::file_loader::LocalFileProvider;
use datasight::llm::OpenAiInference;
use datasight::pipeline::{QueryContext, QueryPipeline};
use datasight::providers::FileHandle;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "datasight")]
#[command(about = "Ask questions of your data: files, databases, or both")]
struct Args {
    /// The question in natural language
    question: String,

    /// Path to an uploaded CSV or Parquet file
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Postgres connection URL (or set DATABASE_URL env var)
    #[arg(long)]
    database_url: Option<String>,

    /// OpenAI API key (or set OPENAI_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut settings = Settings::from_env();
    if let Some(api_key) = args.api_key {
        settings.openai_api_key = api_key;
    }

    info!("Datasight starting...");
    info!("Question: {}", args.question);

    let inference = OpenAiInference::new(settings.openai_api_key.clone())
        .with_base_url(settings.openai_base_url.clone())
        .with_model(settings.openai_model.clone());
    let files = LocalFileProvider::new(settings.max_file_bytes);

    let database_url = args
        .database_url
        .or_else(|| std::env::var("DATABASE_URL").ok());
    let connection = match database_url {
        Some(url) => Some(Arc::new(
            PgConnectionProvider::connect(&url, settings.pool_size, settings.acquire_timeout)
                .await?,
        ) as Arc<dyn datasight::providers::ConnectionProvider>),
        None => None,
    };

    let pipeline = QueryPipeline::new(settings, Arc::new(inference), Arc::new(files), None);
    let context = QueryContext {
        file: args.file.map(FileHandle::new),
        connection,
    };

    let result = pipeline.process_query(&args.question, &context).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
