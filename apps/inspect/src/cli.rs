use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "partsync-inspect",
    version,
    about = "Prints the resume state recorded in a partsync completion log",
    after_help = "\
Environment variables:
  PARTSYNC_CONFIG                      Path to the transfer config file
  PARTSYNC_TABLE_FILE                  Completion log used when no path is given
  PARTSYNC_PROGRESS_UPDATE_FREQUENCY   Progress callback interval in seconds"
)]
pub(crate) struct Cli {
    /// Completion log to replay (overrides the configured table file)
    pub log: Option<PathBuf>,

    /// Path to the transfer config file
    #[arg(short, long, env = "PARTSYNC_CONFIG")]
    pub config: Option<PathBuf>,
}
