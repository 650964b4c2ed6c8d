use clap::error::ErrorKind;
use clap::Parser;

use par2mend::args::{Cli, Command};
use par2mend::{run, ConsoleReporter, NoiseLevel, Status};

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let code = match error.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => Status::InvalidCommandLine.exit_code(),
            };
            let _ = error.print();
            std::process::exit(code);
        }
    };

    let (args, do_repair) = match &cli.command {
        Command::Verify(args) => (args, false),
        Command::Repair(args) => (args, true),
    };

    let noise = args.noise_level();
    let mut logger = env_logger::Builder::from_default_env();
    logger
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false);
    if noise == NoiseLevel::Debug {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    let reporter = ConsoleReporter::new(noise);
    let status = run(args.options(), do_repair, &reporter);
    std::process::exit(status.exit_code());
}
