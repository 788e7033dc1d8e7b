use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::{error, info};

use trafficgen_engine::config::{AppConfig, CliCommand, ConfigManager};
use trafficgen_engine::interrupt::{InterruptHandle, start_signal_listener};
use trafficgen_engine::placeholder::ConfiguredSupplier;
use trafficgen_engine::scenario::{ScenarioRunner, load_scenario};

/// Exit code for configuration and scenario validation errors
const CONFIG_ERROR_EXIT_CODE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    // Load configuration from CLI and environment
    let config_manager = match ConfigManager::from_cli_and_env() {
        Ok(config_manager) => config_manager,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(CONFIG_ERROR_EXIT_CODE);
        }
    };

    // Validate configuration
    if let Err(e) = config_manager.validate() {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(CONFIG_ERROR_EXIT_CODE);
    }

    // Initialize logging
    if let Err(e) = config_manager.init_logging() {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(CONFIG_ERROR_EXIT_CODE);
    }

    match run(config_manager.app).await {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(app: AppConfig) -> Result<i32> {
    info!(
        "Starting trafficgen {} ({:?}) with workspace {:?}",
        env!("CARGO_PKG_VERSION"),
        app.command,
        app.workspace
    );

    let interrupt = InterruptHandle::new();
    start_signal_listener(&interrupt).context("Failed to install signal handlers")?;

    let scenario = match load_scenario(&app.scenario_path) {
        Ok(scenario) => scenario,
        Err(e) => {
            error!("Invalid scenario {:?}: {}", app.scenario_path, e);
            return Ok(i32::from(CONFIG_ERROR_EXIT_CODE));
        }
    };

    let supplier = ConfiguredSupplier::new(app.answer_mode, app.answers.clone(), interrupt.token());
    let mut runner = ScenarioRunner::new(app.runner_config(), supplier, interrupt.token())
        .context("Failed to initialize scenario runner")?;

    match app.command {
        CliCommand::Validate => {
            let report = runner.validate(&scenario).await;
            print!("{}", report.render());
            Ok(report.exit_code())
        }
        CliCommand::Run => {
            let report = runner
                .execute(&scenario)
                .await
                .context("Failed to record scenario results")?;
            if let Some(path) = &report.metadata_path {
                println!("Scenario metadata: {}", path.display());
            }
            Ok(report.exit_code())
        }
    }
}
