use clap::Parser;
use gitops_replacer::{cli::Args, create_replacer_application, output::output_results};
use log::error;
use std::process::ExitCode;

fn init_logging(verbose: bool) {
    let filter = if verbose {
        "info,gitops_replacer=debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let app = match create_replacer_application(&args) {
        Ok(app) => app,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = match app.run().await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = output_results(&outcome) {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::from(outcome.exit_code())
}
