//! Command-line interface

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::api;
use crate::config::AppConfig;
use crate::engine::{facade, ConnectionDescriptor, DriverFactory, MetadataAction};

/// Query and inspect SQLite, PostgreSQL, MySQL, SQL Server and Oracle databases
#[derive(Parser, Debug)]
#[command(name = "polyquery")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP API
    Serve {
        /// Address to bind (overrides config and POLYQUERY_BIND)
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on (overrides config and POLYQUERY_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run a single statement
    Query {
        /// Engine tag: sqlite, postgres, mysql, mssql or oracle
        #[arg(short, long)]
        engine: String,

        /// Engine-specific connection target
        #[arg(short, long)]
        target: String,

        /// Statement text
        sql: String,
    },

    /// Inspect schema metadata
    Meta {
        #[arg(short, long)]
        engine: String,

        #[arg(short, long)]
        target: String,

        /// list-tables, list-columns, list-views, list-indexes, get-ddl,
        /// list-primary-keys or list-foreign-keys
        action: String,

        /// Table name for table-scoped actions
        #[arg(long)]
        table: Option<String>,
    },

    /// List supported engines
    Engines,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render result")?;
    println!("{rendered}");
    Ok(())
}

/// Executes a parsed command. `config` already carries file and env values.
///
/// Returns false when the printed result is the error form.
pub async fn run(cli: Cli, mut config: AppConfig) -> anyhow::Result<bool> {
    match cli.command {
        Commands::Serve { bind, port } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            if let Some(port) = port {
                config.port = port;
            }
            api::serve(&config)
                .await
                .with_context(|| format!("server on {} failed", config.socket_addr()))?;
            Ok(true)
        }
        Commands::Query {
            engine,
            target,
            sql,
        } => {
            let descriptor = ConnectionDescriptor::parse(&engine, target)?;
            let result = facade::execute_query(&descriptor, &sql).await;
            print_json(&result)?;
            Ok(!result.is_error())
        }
        Commands::Meta {
            engine,
            target,
            action,
            table,
        } => {
            let action: MetadataAction = action.parse()?;
            let descriptor = ConnectionDescriptor::parse(&engine, target)?;
            let value = facade::run_metadata(action, &descriptor, table.as_deref()).await?;
            print_json(&value)?;
            Ok(value.get("error").is_none())
        }
        Commands::Engines => {
            for kind in DriverFactory::supported() {
                println!("{:<10} {}", kind.tag(), kind.display_name());
            }
            Ok(true)
        }
    }
}
