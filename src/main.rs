use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use serde_json::Value;

use fragment_template::{discover_custom_elements, EngineConfig, Evaluator, Mode, TemplateContext, TemplateEngine};

/// Render fragment templates from the command line.
#[derive(Parser, Debug)]
#[command(name = "fragt", author, version, about)]
struct Cli {
    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a template from the root, resolve components and print the output
    Render {
        /// Template path relative to --root
        identity: String,
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// development, production or test
        #[arg(long, env = "FRAGMENT_ENV", default_value = "development")]
        mode: Mode,
        #[arg(long, default_value_t = fragment_template::config::DEFAULT_MAX_DEPTH)]
        max_depth: usize,
        /// Print cache statistics to stderr afterwards
        #[arg(long)]
        stats: bool,
        #[command(flatten)]
        context: ContextArgs,
    },
    /// Evaluate a single expression and print the result as JSON
    Eval {
        expr: String,
        #[command(flatten)]
        context: ContextArgs,
    },
    /// List the custom elements found in a markup file
    Discover { file: PathBuf },
}

#[derive(ClapArgs, Debug)]
struct ContextArgs {
    /// Context object as inline JSON
    #[arg(long, conflicts_with = "context_file")]
    context: Option<String>,
    /// Read the context object from a JSON file
    #[arg(long)]
    context_file: Option<PathBuf>,
}

impl ContextArgs {
    async fn load(&self) -> Result<TemplateContext, String> {
        let raw = match (&self.context, &self.context_file) {
            (Some(inline), _) => inline.clone(),
            (None, Some(path)) => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| format!("cannot read {}: {e}", path.display()))?,
            (None, None) => return Ok(TemplateContext::new()),
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(TemplateContext::from(map)),
            Ok(other) => Err(format!("context must be a JSON object, got {other}")),
            Err(e) => Err(format!("invalid context JSON: {e}")),
        }
    }
}

async fn run(command: Command) -> Result<(), String> {
    match command {
        Command::Render {
            identity,
            root,
            mode,
            max_depth,
            stats,
            context,
        } => {
            let ctx = context.load().await?;
            let config = EngineConfig::from_env(root)
                .with_mode(mode)
                .with_max_depth(max_depth);
            let engine = TemplateEngine::new(config);
            let out = engine
                .load_template(&identity, &ctx)
                .await
                .map_err(|e| e.to_string())?;
            println!("{out}");
            if stats {
                let stats = serde_json::to_string(&engine.template_cache_stats()).map_err(|e| e.to_string())?;
                eprintln!("{stats}");
            }
        }
        Command::Eval { expr, context } => {
            let ctx = context.load().await?;
            let value = Evaluator::default()
                .with_env(std::env::vars().collect())
                .eval(&expr, &ctx)
                .map_err(|e| e.to_string())?;
            let pretty = serde_json::to_string_pretty(&value).map_err(|e| e.to_string())?;
            println!("{pretty}");
        }
        Command::Discover { file } => {
            let markup = tokio::fs::read_to_string(&file)
                .await
                .map_err(|e| format!("cannot read {}: {e}", file.display()))?;
            for el in discover_custom_elements(&markup) {
                println!("{}\t{}", el.tag_name, el.fragment_identity());
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli.command).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
