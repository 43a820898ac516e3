use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tender_core::{HttpBackend, ProjectId, TaskKind, Workspace, WorkspaceConfig};
use tracing_subscriber::EnvFilter;

mod scenario;

use scenario::{render_panel, Scenario};

fn cli() -> Command {
    Command::new("tender")
        .version(tender_core::VERSION)
        .about("Tender workspace task orchestration")
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Workspace configuration file (TOML)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .default_value("info")
                .help("Log filter used when RUST_LOG is not set"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Play a scripted scenario against the in-memory backend")
                .arg(
                    Arg::new("scenario")
                        .long("scenario")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Scenario file (TOML)"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("watch")
                .about("Open a project on the HTTP backend and follow its tasks")
                .arg(
                    Arg::new("project")
                        .long("project")
                        .required(true)
                        .help("Project identifier"),
                ),
        )
        .subcommand(Command::new("check-config").about("Validate and print the configuration"))
}

fn init_tracing(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level {level:?}"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))
}

fn load_config(matches: &ArgMatches) -> Result<WorkspaceConfig> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => Ok(WorkspaceConfig::from_file(path)?),
        None => Ok(WorkspaceConfig::default()),
    }
}

async fn simulate(config: WorkspaceConfig, args: &ArgMatches) -> Result<()> {
    let Some(path) = args.get_one::<PathBuf>("scenario") else {
        anyhow::bail!("--scenario is required");
    };
    let scenario = Scenario::from_file(path)?;
    let report = scenario.run(config).await?;

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

async fn watch(config: WorkspaceConfig, project: ProjectId) -> Result<()> {
    let backend = HttpBackend::new(&config.backend)?;
    let workspace = Workspace::new(Arc::new(backend), config)?;
    let mut changes = workspace.subscribe();

    let summary = workspace.select_project(project.clone()).await?;
    tracing::info!(
        project = %project,
        polling = ?summary.polling,
        "watching project"
    );

    let mut shown = workspace.view();
    println!("project {project}");
    for (kind, panel) in &shown.panels {
        print!("{}", render_panel(*kind, panel));
    }

    while !workspace.live_timers().is_empty() {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = changes.borrow_and_update().clone();
                for kind in TaskKind::ALL {
                    let panel = view.panel(kind);
                    if panel != shown.panel(kind) {
                        print!("{}", render_panel(kind, &panel));
                    }
                }
                shown = view;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    workspace.leave_project();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let level = matches
        .get_one::<String>("log-level")
        .map_or("info", String::as_str);
    init_tracing(level, matches.get_flag("log-json"))?;
    let config = load_config(&matches)?;

    match matches.subcommand() {
        Some(("simulate", args)) => simulate(config, args).await,
        Some(("watch", args)) => {
            let project = args
                .get_one::<String>("project")
                .map(|id| ProjectId::new(id.as_str()))
                .context("--project is required")?;
            watch(config, project).await
        }
        Some(("check-config", _)) => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let matches = cli()
            .try_get_matches_from(["tender", "check-config", "--log-level", "debug", "--log-json"])
            .unwrap();

        assert_eq!(
            matches.get_one::<String>("log-level").map(String::as_str),
            Some("debug")
        );
        assert!(matches.get_flag("log-json"));
    }

    #[test]
    fn watch_requires_project() {
        assert!(cli().try_get_matches_from(["tender", "watch"]).is_err());
    }

    #[test]
    fn config_file_is_loaded_and_validated() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "poll_interval_ms = 750").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let matches = cli()
            .try_get_matches_from(["tender", "--config", path.as_str(), "check-config"])
            .unwrap();
        let config = load_config(&matches).unwrap();
        assert_eq!(config.poll_interval_ms, 750);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "poll_interval_ms = 0").unwrap();
        let path = bad.path().to_string_lossy().to_string();
        let matches = cli()
            .try_get_matches_from(["tender", "--config", path.as_str(), "check-config"])
            .unwrap();
        assert!(load_config(&matches).is_err());
    }
}
