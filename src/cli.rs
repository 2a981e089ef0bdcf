//! Command-line interface definitions.
//!
//! Defines all CLI arguments and subcommands using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Template intelligence engine and dev server CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Analyze a template graph and print the result as JSON
    Inspect {
        /// Entry template file
        #[arg(short, long)]
        entry: PathBuf,

        /// Workspace directory (scanned when no file list is given)
        #[arg(short, long)]
        workspace: PathBuf,

        /// Comma-separated template files to include
        #[arg(short, long, value_delimiter = ',')]
        files: Vec<PathBuf>,
    },

    /// Render a template against a data map and print the output
    Render {
        /// Entry template file
        #[arg(short, long)]
        entry: PathBuf,

        /// JSON data: a file path or inline JSON
        #[arg(short, long)]
        data: Option<String>,

        /// Workspace directory (scanned when no file list is given)
        #[arg(short, long)]
        workspace: PathBuf,

        /// Specific template name to render instead of the entry
        #[arg(short, long)]
        template: Option<String>,

        /// Comma-separated template files to include
        #[arg(short, long, value_delimiter = ',')]
        files: Vec<PathBuf>,
    },

    /// Serve templates with auto-discovery and live reload
    Serve {
        /// Server configuration: inline JSON or a path to a JSON file
        #[arg(short, long)]
        config: String,
    },
}

#[allow(unused)]
impl Cli {
    pub fn is_inspect(&self) -> bool {
        matches!(self.command, Commands::Inspect { .. })
    }
    pub fn is_render(&self) -> bool {
        matches!(self.command, Commands::Render { .. })
    }
    pub fn is_serve(&self) -> bool {
        matches!(self.command, Commands::Serve { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_args() {
        let cli = Cli::parse_from([
            "tmpldev", "inspect", "--entry", "a.html", "--workspace", ".", "--files", "b.html,c.html",
        ]);
        match cli.command {
            Commands::Inspect { entry, files, .. } => {
                assert_eq!(entry, PathBuf::from("a.html"));
                assert_eq!(files, vec![PathBuf::from("b.html"), PathBuf::from("c.html")]);
            }
            other => panic!("expected inspect, got {other:?}"),
        }
    }

    #[test]
    fn test_render_args() {
        let cli = Cli::parse_from([
            "tmpldev", "render", "-e", "a.html", "-w", ".", "-d", r#"{"Name":"Ada"}"#, "-t", "content",
        ]);
        match cli.command {
            Commands::Render { data, template, .. } => {
                assert_eq!(data.as_deref(), Some(r#"{"Name":"Ada"}"#));
                assert_eq!(template.as_deref(), Some("content"));
            }
            other => panic!("expected render, got {other:?}"),
        }
    }

    #[test]
    fn test_workspace_required() {
        assert!(Cli::try_parse_from(["tmpldev", "inspect", "--entry", "a.html"]).is_err());
    }
}
