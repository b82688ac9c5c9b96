//! Headless command-line driver.
//!
//! Runs the same [`Runtime`] the UI talks to, with in-memory host bindings:
//! list plugins and actions, execute actions, install and uninstall plugins.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;

use crate::actions::DiscoveryContext;
use crate::config::Config;
use crate::logging;
use crate::plugins::BuiltinModules;
use crate::runtime::{HostBindings, Runtime};

#[derive(Parser)]
#[command(name = "lantern")]
#[command(about = "Plugin action runtime for a keyboard launcher", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: platform config dir)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Extra development plugin directory
    #[arg(long, global = true, value_name = "DIR")]
    pub dev_dir: Option<String>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List discovered plugins
    Plugins,

    /// List actions for a keyword
    Actions {
        #[arg(default_value = "")]
        keyword: String,

        /// Name of the application the launcher is overlaid on
        #[arg(long)]
        app: Option<String>,
    },

    /// Execute an action by its global id (pluginId:actionId)
    Exec {
        global_id: String,

        #[arg(default_value = "")]
        keyword: String,
    },

    /// Install a plugin from a local directory
    Install { path: PathBuf },

    /// Remove a user-installed plugin
    Uninstall { id: String },

    /// Send one raw JSON request through the IPC dispatcher
    Ipc { request: String },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    if let Some(dir) = cli.dev_dir {
        config.plugins.developer_dir = Some(dir);
    }

    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    logging::init(level);

    let runtime = Runtime::new(&config, BuiltinModules::new(), HostBindings::headless());
    runtime.scan();

    match cli.command {
        Commands::Plugins => list_plugins(&runtime),
        Commands::Actions { keyword, app } => {
            let context = app.map(DiscoveryContext::overlaid).unwrap_or_default();
            list_actions(&runtime, &keyword, &context).await;
        }
        Commands::Exec { global_id, keyword } => {
            let result = runtime
                .execute_action(&global_id, &keyword)
                .await
                .with_context(|| format!("Failed to execute {}", global_id))?;
            println!(
                "{} {}",
                style("✓").green().bold(),
                style(&global_id).bold()
            );
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Install { path } => {
            let plugin = runtime
                .install_plugin(&path)
                .with_context(|| format!("Failed to install from {}", path.display()))?;
            println!(
                "{} Installed {} {}",
                style("✓").green().bold(),
                style(&plugin.id).bold(),
                style(plugin.path.display()).dim()
            );
        }
        Commands::Uninstall { id } => {
            runtime
                .uninstall_plugin(&id)
                .with_context(|| format!("Failed to uninstall {}", id))?;
            println!("{} Uninstalled {}", style("✓").green().bold(), style(&id).bold());
        }
        Commands::Ipc { request } => {
            println!("{}", runtime.handle_ipc(&request).await);
        }
    }

    Ok(())
}

fn list_plugins(runtime: &Runtime) {
    let plugins = runtime.list_plugins();
    if plugins.is_empty() {
        println!("{}", style("No plugins found.").dim());
        for root in runtime.registry().roots() {
            println!("  {} {}", style(root.kind).cyan(), style(root.path.display()).dim());
        }
        return;
    }

    for plugin in plugins.iter() {
        println!(
            "{} {} {} {}",
            style(&plugin.id).bold(),
            style(&plugin.version).dim(),
            style(format!("[{}]", plugin.source_kind)).cyan(),
            plugin.title
        );
    }
}

async fn list_actions(runtime: &Runtime, keyword: &str, context: &DiscoveryContext) {
    let actions = runtime.get_actions(keyword, context).await;
    if actions.is_empty() {
        println!("{}", style("No actions.").dim());
        return;
    }

    for action in &actions {
        let view = if action.view_path.is_some() {
            style(" (view)").yellow().to_string()
        } else {
            String::new()
        };
        println!("{}{}  {}", style(&action.global_id).bold(), view, action.title);
        if !action.description.is_empty() {
            println!("    {}", style(&action.description).dim());
        }
    }
}
