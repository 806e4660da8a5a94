//! berth CLI library

pub mod client;
pub mod commands;
pub mod config;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

use crate::client::ApiClient;
use crate::config::ClientConfig;

/// berth - materialize service templates into your namespace
#[derive(Parser, Debug)]
#[command(name = "berth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List your services
    ListServices,
    /// Create a service from a template
    CreateService(commands::CreateArgs),
    /// Run a command in a service's pods
    ExecService(commands::ExecArgs),
    /// Delete one of your services
    DeleteService(commands::DeleteArgs),
    /// List service templates
    ListTemplates,
    /// Mount your storage into a manifest and print it
    Inject(commands::InjectArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let config = ClientConfig::discover()?;
        let client = ApiClient::new(&config);

        match self.command {
            Commands::ListServices => commands::list_services(&client).await,
            Commands::CreateService(args) => commands::create_service(&client, args).await,
            Commands::ExecService(args) => commands::exec_service(&client, args).await,
            Commands::DeleteService(args) => commands::delete_service(&client, args).await,
            Commands::ListTemplates => commands::list_templates(&client).await,
            Commands::Inject(args) => commands::inject(&client, args).await,
        }
    }
}
