use anyhow::bail;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use marketplace_scraper::api::{HttpMarketApi, MarketApi};
use marketplace_scraper::config::Config;
use marketplace_scraper::constants;
use marketplace_scraper::listings::{parse_category_url, CategoryCrawler};
use marketplace_scraper::logging;
use marketplace_scraper::reviews::ReviewFetcher;
use marketplace_scraper::storage::{load_products, CsvRecordSink, RecordSink};

#[derive(Parser)]
#[command(name = "marketplace_scraper")]
#[command(about = "Product listing and review scraper for a marketplace API")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl a category tree and append its product listings to a CSV file
    Listings {
        /// Category URL of the form .../<name>/c<id>; prompted for when omitted
        #[arg(long)]
        url: Option<String>,
        /// Price floor to restart an interrupted crawl from
        #[arg(long, default_value_t = 0)]
        min_price: u64,
        /// Output CSV path (default: data/<category-name>.csv)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Config file (default: config.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Fetch reviews for every product in a listings CSV
    Reviews {
        /// Listings CSV with id, seller_id, seller_product_id, review_count columns
        #[arg(long)]
        input: PathBuf,
        /// Output CSV path (default: <input-stem>-reviews.csv)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Worker pool size (default: configured value or host parallelism)
        #[arg(long)]
        workers: Option<usize>,
        /// Config file (default: config.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize logging
    logging::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Listings {
            url,
            min_price,
            output,
            config,
        } => run_listings(url, min_price, output, config).await,
        Commands::Reviews {
            input,
            output,
            workers,
            config,
        } => run_reviews(input, output, workers, config).await,
    }
}

async fn run_listings(
    url: Option<String>,
    min_price: u64,
    output: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = Config::load(config_path.as_deref())?;

    let url = match url {
        Some(url) => url,
        None => prompt_for_url()?,
    };
    let Some((category_name, category_id)) = parse_category_url(&url) else {
        bail!("unrecognized category URL '{url}'; expected .../<name>/c<id>");
    };

    let output =
        output.unwrap_or_else(|| Path::new(constants::DATA_DIR).join(format!("{category_name}.csv")));

    println!("🛒 Crawling category {category_name} (id {category_id})...");
    info!(
        category = %category_id,
        output = %output.display(),
        min_price,
        "starting listings crawl"
    );

    let api: Arc<dyn MarketApi> = Arc::new(HttpMarketApi::new(&config.api)?);
    let mut sink = CsvRecordSink::append_to(&output)?;

    let progress = ProgressBar::new_spinner();
    progress.set_style(ProgressStyle::with_template("{spinner} {pos} items").unwrap());

    let crawler =
        CategoryCrawler::new(api, config.listings_retry()).with_progress(progress.clone());
    let stats = crawler.crawl(category_id, min_price, &mut sink).await?;
    progress.finish_and_clear();

    println!("\n📊 Crawl results for {category_name}:");
    println!("   Leaf categories: {}", stats.categories);
    println!("   Pages fetched: {}", stats.pages);
    println!("   Items written: {}", stats.items);
    if stats.gave_up > 0 {
        println!("   ⚠️  Categories abandoned: {}", stats.gave_up);
    }
    println!("   Output file: {}", output.display());
    println!(
        "   Finished at: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    Ok(())
}

async fn run_reviews(
    input: PathBuf,
    output: Option<PathBuf>,
    workers: Option<usize>,
    config_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = Config::load(config_path.as_deref())?;

    let products = load_products(&input)?;
    println!("📝 Crawling reviews for {} products...", products.len());

    let output = output.unwrap_or_else(|| default_reviews_output(&input));
    let workers = workers.unwrap_or_else(|| config.review_workers());

    let api: Arc<dyn MarketApi> = Arc::new(HttpMarketApi::new(&config.api)?);

    let progress = ProgressBar::new(products.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} products {elapsed}").unwrap(),
    );

    let fetcher =
        ReviewFetcher::new(api, config.reviews_retry(), workers).with_progress(progress.clone());
    let reviews = fetcher.fetch_all(products).await;
    progress.finish_and_clear();

    let mut sink = CsvRecordSink::create(&output)?;
    sink.write_batch(&reviews).await?;

    println!("\n✅ Reviews crawl complete:");
    println!("   Reviews written: {}", reviews.len());
    println!("   Output file: {}", output.display());
    println!(
        "   Finished at: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    Ok(())
}

fn prompt_for_url() -> anyhow::Result<String> {
    print!("Enter category link: ");
    std::io::stdout().flush()?;
    let mut url = String::new();
    std::io::stdin().read_line(&mut url)?;
    Ok(url.trim().to_string())
}

fn default_reviews_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "listings".to_string());
    input.with_file_name(format!("{stem}-reviews.csv"))
}
