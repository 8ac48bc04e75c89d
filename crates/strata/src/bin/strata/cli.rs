//! strata cli interface

use clap::{Parser, ValueEnum};
use std::fmt::Formatter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Hierarchy config file
    ///
    /// Defaults to `strata.yaml` (or $STRATA_CONFIGFILE) in the work directory.
    #[clap(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Set a scope variable, the value is parsed as YAML
    ///
    /// Can be specified multiple times.
    #[clap(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    /// Load scope variables from a YAML or JSON file
    ///
    /// Variables given with --var take precedence.
    #[clap(long = "vars", value_name = "FILE")]
    pub vars_file: Option<PathBuf>,

    /// Merge strategy, overrides lookup_options
    #[clap(short = 'm', long = "merge", value_parser = ["first", "unique", "hash", "deep"])]
    pub merge: Option<String>,

    /// Value to use when a key is not found, parsed as YAML
    #[clap(short = 'd', long = "default")]
    pub default: Option<String>,

    /// Print an explanation of how the value was found instead of the value
    #[clap(short = 'e', long = "explain")]
    pub explain: bool,

    /// Like --explain but also show how lookup_options were found
    #[clap(long = "explain-options")]
    pub explain_options: bool,

    #[arg(short = 'F', long = "render-as", default_value_t)]
    pub format: OutputFormat,

    /// Keys to look up
    #[clap(required = true)]
    pub keys: Vec<String>,
}

fn parse_var(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{arg}'")),
    }
}

#[derive(ValueEnum, Clone, Default, Debug)]
pub enum OutputFormat {
    Json,
    #[default]
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Yaml => f.write_str("yaml"),
        }
    }
}
