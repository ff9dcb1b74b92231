use clap::{Parser, Subcommand};

use crate::Role;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Name of the workload to serve
    #[clap(short, long)]
    pub workload: String,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the implemented stages and requirements as JSON
    Info,
    /// Run the map stage
    Map(StageFds),
    /// Run the combine stage
    Combine(StageFds),
    /// Run the reduce stage
    Reduce(StageFds),
    /// Re-execute the given stage with stdin and stdout passed as
    /// descriptor numbers, keeping stray output off the record stream
    Pipe {
        #[arg(value_enum)]
        role: Role,
    },
}

/// Descriptors to use instead of stdin and stdout.
#[derive(clap::Args, Debug, Default)]
pub struct StageFds {
    /// Descriptor to read input records from
    #[arg(requires = "write_fd")]
    pub read_fd: Option<i32>,
    /// Descriptor to write output records to
    pub write_fd: Option<i32>,
}
