//! View Compiler CLI
//!
//! Usage:
//!   view-compiler [OPTIONS] <VIEW>
//!
//! Options:
//!   --views <DIR>          View directory (repeatable)
//!   --components <DIR>     Component directory (repeatable)
//!   --data <FILE>          JSON object with the render data
//!   --config <FILE>        Engine configuration (TOML format)
//!   --authenticated        Render as an authenticated user
//!   --csrf-token <TOKEN>   Token emitted by @csrf
//!   -h, --help             Print help

use std::fs;
use std::path::PathBuf;

use clap::Parser;

use view_compiler::{EngineConfig, RenderContext, StaticAuth, ViewEngine};

#[derive(Parser)]
#[command(name = "view-compiler")]
#[command(about = "Render component-aware view templates")]
struct Cli {
    /// View name, e.g. `pages.home`
    view: String,

    /// View directory; may be given more than once
    #[arg(long = "views", value_name = "DIR")]
    views: Vec<PathBuf>,

    /// Component directory; may be given more than once
    #[arg(long = "components", value_name = "DIR")]
    components: Vec<PathBuf>,

    /// JSON file holding an object with the render data
    #[arg(long, value_name = "FILE")]
    data: Option<PathBuf>,

    /// Engine configuration file (TOML format)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Render as an authenticated user
    #[arg(long)]
    authenticated: bool,

    /// Token emitted by @csrf
    #[arg(long, value_name = "TOKEN")]
    csrf_token: Option<String>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(output) => {
            print!("{}", output);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> Result<String, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .map_err(|e| format!("loading config '{}': {}", path.display(), e))?,
        None => EngineConfig::default(),
    };
    config.view_paths.extend(cli.views.iter().cloned());
    config.component_paths.extend(cli.components.iter().cloned());
    if config.view_paths.is_empty() {
        config.view_paths.push(PathBuf::from("."));
    }

    let context = match &cli.data {
        Some(path) => load_data(path)?,
        None => RenderContext::new(),
    };

    let mut auth = if cli.authenticated {
        StaticAuth::authenticated()
    } else {
        StaticAuth::guest()
    };
    if let Some(token) = &cli.csrf_token {
        auth = auth.with_token(token.clone());
    }

    let engine = ViewEngine::from_config(config)?.with_auth(auth);
    Ok(engine.render(&cli.view, &context)?)
}

fn load_data(path: &PathBuf) -> Result<RenderContext, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("reading data file '{}': {}", path.display(), e))?;
    let json: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| format!("parsing data file '{}': {}", path.display(), e))?;
    RenderContext::from_json(json)
        .ok_or_else(|| format!("data file '{}' must hold a JSON object", path.display()).into())
}
