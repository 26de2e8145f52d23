//! IEC 61850 device-control adapter (`iecsrv`)

use std::process::ExitCode;

use clap::Parser;

use iecsrv::cli::{self, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    let code = match cli::run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            // Logging may not be initialized yet
            eprintln!("iecsrv: {:#}", e);
            ExitCode::FAILURE
        },
    };

    common::logging::flush();
    code
}
