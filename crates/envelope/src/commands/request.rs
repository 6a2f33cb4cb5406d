//! Get and send commands - raw API access through the request gateway.

use anyhow::{Result, anyhow, bail};
use clap::Args;
use console::style;
use envelope_client::{GatewayError, RequestMethod, RequestSpec};

use super::Context;

/// Arguments for the get command.
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Path relative to the backend URL, e.g. rest/v1/envelopes
    pub path: String,

    /// Cache namespace (default: last path segment)
    #[arg(long)]
    pub namespace: Option<String>,

    /// Query parameter as key=value (repeatable)
    #[arg(long = "query", short = 'q', value_parser = parse_key_value)]
    pub query: Vec<(String, String)>,
}

/// Arguments for the send command.
#[derive(Args, Debug)]
pub struct SendArgs {
    /// HTTP method: POST, PUT, PATCH or DELETE
    pub method: RequestMethod,

    /// Path relative to the backend URL
    pub path: String,

    /// Invalidation group, e.g. transaction_written
    #[arg(long)]
    pub group: String,

    /// JSON request body
    #[arg(long)]
    pub body: Option<String>,

    /// Query parameter as key=value (repeatable)
    #[arg(long = "query", short = 'q', value_parser = parse_key_value)]
    pub query: Vec<(String, String)>,
}

pub async fn run_get(args: GetArgs, ctx: &Context) -> Result<()> {
    let namespace = args
        .namespace
        .clone()
        .unwrap_or_else(|| default_namespace(&args.path));

    let mut spec = RequestSpec::read(namespace, &args.path);
    for (key, value) in args.query {
        spec = spec.query(key, value);
    }

    let gateway = ctx.gateway()?;
    let value = gateway.execute(spec).await.map_err(explain)?;
    super::print_json(&value, ctx.json_output)
}

pub async fn run_send(args: SendArgs, ctx: &Context) -> Result<()> {
    if args.method == RequestMethod::Get {
        bail!("Use 'envelope get' for reads");
    }

    let gateway = ctx.gateway()?;
    if !gateway.cache().groups().contains(&args.group) {
        eprintln!(
            "{} unknown group '{}', the whole cache will be cleared",
            style("warning:").yellow(),
            args.group
        );
    }

    let mut spec = RequestSpec::write(args.method, &args.path, &args.group);
    for (key, value) in args.query {
        spec = spec.query(key, value);
    }
    if let Some(body) = &args.body {
        let body = serde_json::from_str(body).map_err(|e| anyhow!("Invalid --body JSON: {}", e))?;
        spec = spec.body(body);
    }

    let value = gateway.execute(spec).await.map_err(explain)?;
    if ctx.verbose && !ctx.json_output {
        eprintln!("{} {}", style(args.method).green(), args.path);
    }
    super::print_json(&value, ctx.json_output)
}

/// Attach a remediation hint to gateway errors.
fn explain(err: GatewayError) -> anyhow::Error {
    if err.requires_reauthentication() {
        anyhow!("{}\nRun 'envelope auth login --email <email>' to sign in again.", err)
    } else if err.is_transient() {
        anyhow!("{}\nThe service may be unavailable; try again later.", err)
    } else {
        err.into()
    }
}

fn default_namespace(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("default")
        .to_string()
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}
