use argp::FromArgs;

pub mod cmd;

// Re-export wud
pub use wud;

#[derive(FromArgs, Debug)]
#[argp(subcommand)]
pub enum SubCommand {
    Compress(cmd::compress::Args),
    Decompress(cmd::decompress::Args),
    Extract(cmd::extract::Args),
}

pub fn run(command: SubCommand) -> wud::Result<()> {
    match command {
        SubCommand::Compress(c_args) => cmd::compress::run(c_args),
        SubCommand::Decompress(c_args) => cmd::decompress::run(c_args),
        SubCommand::Extract(c_args) => cmd::extract::run(c_args),
    }
}
