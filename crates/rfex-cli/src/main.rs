use anyhow::Result;
use log::LevelFilter;

use rfex_cli::input::{command, RunConfig};
use rfex_cli::run;

fn main() -> Result<()> {
    env_logger::Builder::default()
        .filter_level(LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or(
            "RFEX_LOG",
            "error,rfex=info,rfex_classifiers=info,rfex_deep=info,rfex_cli=info",
        ))
        .init();

    let matches = command().get_matches();
    let params = match RunConfig::from_arguments(&matches) {
        Ok(params) => params,
        Err(e) => {
            log::error!("Invalid configuration: {:#}", e);
            eprintln!("Error: {:#}", e);
            std::process::exit(1)
        }
    };

    if !params.from_file {
        let json = serde_json::to_string_pretty(&params).unwrap_or_default();
        log::info!("[rfex] No config file provided; effective configuration:\n{}", json);
    }
    log::info!(
        "[rfex] mode {:?} on dataset {} ({})",
        params.mode,
        params.experiment.data.dataset_id,
        params.experiment.data.task
    );

    match run::run(&params) {
        Ok(_) => Ok(()),
        Err(e) => {
            log::error!("Run failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            std::process::exit(1)
        }
    }
}
