mod cli;

use anyhow::Context;
use std::sync::Arc;
use strata::{ExplainTree, Explainer, LookupOptions, Map, Session, SessionOptions, Value};

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("STRATA_LOG"))
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            for error in e.chain() {
                eprintln!("{error}")
            }
            std::process::exit(1);
        }
    }
}

/// Look up all keys, returns whether every key was found
fn run(cli: cli::Cli) -> anyhow::Result<bool> {
    let session = Session::new(session_options(&cli)?)?;

    let mut options = LookupOptions::default();
    options.merge = cli.merge.clone().map(Value::String);
    options.default = cli.default.as_deref().map(parse_value).transpose()?;

    let explainer = (cli.explain || cli.explain_options)
        .then(|| Arc::new(ExplainTree::new().with_options(cli.explain_options)));

    let mut found = Map::new();
    let mut all_found = true;
    for key in &cli.keys {
        let sink = explainer.clone().map(|tree| tree as Arc<dyn Explainer>);
        match strata::lookup(&session, key, &options, sink)? {
            Some(value) => {
                found.insert(key.clone(), value);
            }
            None => {
                tracing::info!(key, "not found");
                all_found = false;
            }
        }
    }
    session.shutdown();

    if let Some(explainer) = explainer {
        print!("{}", explainer.render());
        return Ok(all_found);
    }

    // several keys render as a mapping of the keys found
    let value = if cli.keys.len() == 1 {
        match found.pop() {
            Some((_, value)) => value,
            None => return Ok(false),
        }
    } else {
        Value::Object(found)
    };
    output(&cli.format, &value)?;
    Ok(all_found)
}

fn session_options(cli: &cli::Cli) -> anyhow::Result<SessionOptions> {
    let mut options = SessionOptions::default();
    if let Some(path) = &cli.config {
        options = options.with_config_path(path);
    }

    if let Some(path) = &cli.vars_file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read variables from {}", path.display()))?;
        let vars: Value = serde_yaml::from_str(&text)
            .with_context(|| format!("Failed to parse variables in {}", path.display()))?;
        match vars {
            Value::Object(vars) => options.scope.extend(vars),
            Value::Null => {}
            other => anyhow::bail!(
                "{} must contain a mapping, found {}",
                path.display(),
                other.type_name()
            ),
        }
    }

    for (name, value) in &cli.vars {
        options = options.with_scope_var(name, parse_value(value)?);
    }

    Ok(options)
}

/// Command line values are YAML, `port=80` is a number
fn parse_value(text: &str) -> anyhow::Result<Value> {
    serde_yaml::from_str(text).with_context(|| format!("Failed to parse value '{text}'"))
}

fn output(format: &cli::OutputFormat, value: &Value) -> anyhow::Result<()> {
    match format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), value)?,
        cli::OutputFormat::Json => {
            serde_json::to_writer_pretty(std::io::stdout(), value)?;
            println!();
        }
    };

    Ok(())
}
