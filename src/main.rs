use std::process::ExitCode;

use clap::Parser;
use multicopy::{Args, Role};

fn main() -> ExitCode {
    let args = Args::parse();

    let _guard = match multicopy::logging::init(args.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("multicopy: failed to set up logging: {e}");
            return ExitCode::from(3);
        }
    };

    if let Err(e) = multicopy::cleanup::install_interrupt_handler() {
        tracing::error!(error = %e, "startup failed");
        return ExitCode::from(e.exit_code());
    }

    tracing::info!(
        input = %args.input.display(),
        output = %args.output.display(),
        channel = %args.channel,
        "starting"
    );

    match multicopy::run(&args.input, &args.output, &args.channel, &args.options()) {
        Ok(Role::Exit) => {
            tracing::info!("exiting without taking part in the transfer");
            ExitCode::SUCCESS
        }
        Ok(role) => {
            tracing::info!(%role, "process finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "transfer failed");
            ExitCode::from(e.exit_code())
        }
    }
}
