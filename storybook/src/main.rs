//! Headless storybook reader.
//!
//! A line-oriented interface for creating and reading branching stories
//! against a running storybook backend:
//!
//! ```bash
//! cargo run -p storybook -- --genre fantasy --scenes 6 --prompt "A dragon who loves tea"
//! ```

mod headless;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout stays a clean protocol stream
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let options = headless::parse_options_from_args(&args)?;
    headless::run_headless(options).await.map_err(|e| e.into())
}

fn print_help() {
    println!("Storybook - branching illustrated stories");
    println!();
    println!("USAGE:");
    println!("  storybook [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -h, --help            Show this help message");
    println!("  --api-url <URL>       Backend base URL (default: http://localhost:5001)");
    println!("  --storage-dir <DIR>   Keep saved stories in DIR (default: memory only)");
    println!("  --age <GROUP>         Reader age group (default: 7-10)");
    println!("  --genre <GENRE>       Story genre (default: adventure)");
    println!("  --style <STYLE>       Illustration style (default: watercolor)");
    println!("  --scenes <N>          Planned scenes, 3 to 10 (default: 5)");
    println!("  --prompt <TEXT>       Create a story right away");
    println!();
    println!("AGE GROUPS:");
    println!("  3-6, 7-10, 11-14, 15+");
    println!();
    println!("GENRES:");
    println!("  adventure, fantasy, science-fiction, mystery, comedy, educational");
    println!();
    println!("STYLES:");
    println!("  watercolor, cartoon, pixel-art, anime, realistic, sketch");
    println!();
    println!("ENVIRONMENT:");
    println!("  STORYBOOK_API_URL, STORYBOOK_STORAGE_DIR, STORYBOOK_MAX_SAVED,");
    println!("  STORYBOOK_AUTOSAVE_SECS, RUST_LOG");
}
