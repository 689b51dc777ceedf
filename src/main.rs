use std::process::ExitCode;

use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

mod api;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match api::config::Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let log_config = ConfigBuilder::new()
        .add_filter_allow_str(env!("CARGO_CRATE_NAME"))
        .build();
    if let Err(e) = TermLogger::init(
        config.log_level,
        log_config,
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ) {
        eprintln!("Failed to initialize logger: {}", e);
    }

    match api::serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
