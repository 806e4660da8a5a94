//! CLI commands

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use clap::Args;
use serde_json::Value;

use crate::client::ApiClient;
use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Template identifier
    pub template: String,
    /// Variable values as KEY=VALUE; keys are upper-cased
    pub values: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Run in every pod of the service instead of the first
    #[arg(short, long)]
    pub all: bool,
    /// Service name
    pub name: String,
    /// Command and arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Service name
    pub name: String,
}

#[derive(Args, Debug)]
pub struct InjectArgs {
    /// Manifest file, `-` for stdin
    pub file: PathBuf,
    /// Mark workloads so dataset volumes are not mounted
    #[arg(long)]
    pub no_datasets: bool,
}

/// Parse `KEY=VALUE` pairs, upper-casing keys
pub fn parse_values(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::invalid_argument(format!("expected KEY=VALUE, got '{pair}'")))?;
            if key.is_empty() {
                return Err(Error::invalid_argument(format!("empty key in '{pair}'")));
            }
            Ok((key.to_uppercase(), value.to_string()))
        })
        .collect()
}

fn field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

pub async fn list_services(client: &ApiClient) -> Result<()> {
    let services = client.list_services().await?;

    println!("{:<30} {:<20} {:<50}", "NAME", "TEMPLATE", "URL");
    for service in services.as_array().into_iter().flatten() {
        println!(
            "{:<30} {:<20} {:<50}",
            field(service, "name"),
            field(service, "templateId"),
            field(service, "url")
        );
    }
    Ok(())
}

pub async fn list_templates(client: &ApiClient) -> Result<()> {
    let listing = client.list_templates().await?;

    println!("{:<20} {:<30} {:<50}", "ID", "NAME", "DESCRIPTION");
    for template in listing["templates"].as_array().into_iter().flatten() {
        println!(
            "{:<20} {:<30} {:<50}",
            field(template, "id"),
            field(template, "name"),
            field(template, "description")
        );
    }
    for skipped in listing["skipped"].as_array().into_iter().flatten() {
        eprintln!(
            "skipped {}: {}",
            field(skipped, "id"),
            field(skipped, "reason")
        );
    }
    Ok(())
}

pub async fn create_service(client: &ApiClient, args: CreateArgs) -> Result<()> {
    let values = parse_values(&args.values)?;
    let created = client.create_service(&args.template, &values).await?;

    println!("{}", field(&created, "name"));
    if let Some(url) = created.get("url").and_then(Value::as_str) {
        println!("{url}");
    }
    Ok(())
}

pub async fn exec_service(client: &ApiClient, args: ExecArgs) -> Result<()> {
    let result = client
        .exec_service(&args.name, &args.command, args.all)
        .await?;

    for target in &result.targets {
        if let Some(error) = target.get("error").and_then(Value::as_str) {
            eprintln!("{}: {}", field(target, "pod"), error);
        }
    }
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(result.output.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

pub async fn delete_service(client: &ApiClient, args: DeleteArgs) -> Result<()> {
    client.delete_service(&args.name).await?;
    eprintln!("Deleted {}", args.name);
    Ok(())
}

pub async fn inject(client: &ApiClient, args: InjectArgs) -> Result<()> {
    let manifest = if args.file.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(&args.file)?
    };

    let out = client.inject(manifest, !args.no_datasets).await?;
    print!("{out}");
    Ok(())
}
