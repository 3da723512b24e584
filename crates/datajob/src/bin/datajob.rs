use std::io;

use clap::{CommandFactory, FromArgMatches};
use clap_complete::generate;

use datajob::common::cli::{GenerateCompletionOpts, RootOptions, SubCommand};
use datajob::common::setup::{flush_logging, setup_logging};
use datajob::server::bootstrap::command_server;

fn generate_completion(opts: GenerateCompletionOpts) -> anyhow::Result<()> {
    let generator = opts.shell;

    let mut app = RootOptions::command();
    eprintln!("Generating completion file for {generator}...");
    generate(generator, &mut app, "datajob".to_string(), &mut io::stdout());
    Ok(())
}

#[tokio::main]
async fn main() -> datajob::Result<()> {
    let matches = RootOptions::command().get_matches();
    let top_opts = match RootOptions::from_arg_matches(&matches) {
        Ok(opts) => opts,
        Err(error) => error.exit(),
    };

    setup_logging(top_opts.common.debug);

    let result = match top_opts.subcmd {
        SubCommand::Server(opts) => command_server(opts).await,
        SubCommand::GenerateCompletion(opts) => generate_completion(opts),
    };

    if let Err(error) = result {
        log::error!("{error:?}");
        flush_logging();
        std::process::exit(1);
    }
    flush_logging();

    Ok(())
}
