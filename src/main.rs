//! tmpldev - template intelligence engine and live-reload dev server.

mod analyze;
mod cli;
mod config;
mod logger;
mod render;
mod serve;
mod template;
mod utils;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{Value as Json, json};

use analyze::Analyzer;
use cli::{Cli, Commands};
use config::ServeConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect {
            entry,
            workspace,
            files,
        } => run_inspect(&entry, &workspace, &files),
        Commands::Render {
            entry,
            data,
            workspace,
            template,
            files,
        } => run_render(&entry, data.as_deref(), &workspace, template.as_deref(), &files),
        Commands::Serve { config } => {
            let cfg = ServeConfig::load(&config)?;
            tokio::runtime::Runtime::new()?.block_on(serve::run(cfg))
        }
    }
}

/// Analyze the template graph and print it as pretty JSON on stdout.
/// Per-file warnings go to stderr; only an unparseable entry fails.
fn run_inspect(entry: &std::path::Path, workspace: &std::path::Path, files: &[PathBuf]) -> Result<()> {
    let result = Analyzer::new(workspace).analyze(entry, files)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Render the entry template and write the bytes to stdout.
fn run_render(
    entry: &std::path::Path,
    data: Option<&str>,
    workspace: &std::path::Path,
    template: Option<&str>,
    files: &[PathBuf],
) -> Result<()> {
    let data = load_data_arg(data)?;
    let output = render::render(entry, &data, template, files, workspace)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

/// The `--data` argument is a file path when one exists, inline JSON
/// otherwise.
fn load_data_arg(arg: Option<&str>) -> Result<Json> {
    let Some(arg) = arg else {
        return Ok(json!({}));
    };
    match std::fs::read_to_string(arg) {
        Ok(text) => serde_json::from_str(&text).context("invalid JSON in data file"),
        Err(_) => serde_json::from_str(arg).context("invalid JSON data"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_data_arg_inline() {
        let data = load_data_arg(Some(r#"{"Name": "Ada"}"#)).unwrap();
        assert_eq!(data["Name"], json!("Ada"));
    }

    #[test]
    fn test_load_data_arg_missing_defaults_empty() {
        assert_eq!(load_data_arg(None).unwrap(), json!({}));
    }

    #[test]
    fn test_load_data_arg_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, r#"{"Count": 12.0}"#).unwrap();
        let data = load_data_arg(Some(&path.to_string_lossy())).unwrap();
        assert_eq!(data["Count"], json!(12.0));
    }

    #[test]
    fn test_load_data_arg_invalid_is_error() {
        assert!(load_data_arg(Some("{nope")).is_err());
    }
}
