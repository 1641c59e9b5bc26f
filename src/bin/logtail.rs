use clap::Parser;
use logtail::cli::{commands, Cli, Commands};
use logtail::logging::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Init(args) => {
            let init_args = commands::InitArgs {
                endpoint: args.endpoint,
                tls: args.tls,
                insecure_skip_verify: args.insecure_skip_verify,
                proxy: args.proxy,
                keepalive_secs: args.keepalive_secs,
                force: args.force,
            };
            commands::execute_init(init_args)?
        }
        Commands::Tail(args) => commands::execute_tail(args).await?,
    }

    Ok(())
}
