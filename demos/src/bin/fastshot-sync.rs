//! Manually exercises `Facade::submit_sync` against a TOML config file,
//! polling the operation to completion and printing the resulting
//! metadata listing. Not part of the library's public surface (§6: CLI is
//! out of scope) -- a demo binary for driving the facade by hand.

use std::path::PathBuf;

use clap::Parser;
use fastshot_core::{Config, Facade};
use fastshot_types::{OperationState, OrphanPolicy};

#[derive(Parser, Debug)]
#[command(version, about = "sync the local metadata cache against the configured object store")]
struct Args {
    /// path to a fastshot config.toml
    #[arg(long)]
    config: PathBuf,

    #[arg(long, value_enum, default_value = "prompt")]
    orphans: OrphanArg,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum OrphanArg {
    Keep,
    Delete,
    Prompt,
}

impl From<OrphanArg> for OrphanPolicy {
    fn from(value: OrphanArg) -> Self {
        match value {
            OrphanArg::Keep => OrphanPolicy::Keep,
            OrphanArg::Delete => OrphanPolicy::Delete,
            OrphanArg::Prompt => OrphanPolicy::Prompt,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fastshot_core::logging::init();
    let args = Args::parse();

    let config = Config::from_file(&args.config)?;
    let facade = Facade::new(config).await?;

    let id = facade.submit_sync(args.orphans.into());
    loop {
        let record = facade.status(id).expect("just-submitted operation always has a record");
        if record.state.is_terminal() {
            match record.state {
                OperationState::Completed => println!("sync complete: {:?}", record.result),
                OperationState::Failed => eprintln!("sync failed: {:?}", record.error),
                _ => {}
            }
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }

    for entry in facade.list_metadata() {
        println!("{}\t{}\t{} images", entry.filename, entry.metadata.name, entry.metadata.image_count);
    }

    Ok(())
}
