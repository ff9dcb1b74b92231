use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Commands,

    /// Directory holding input and output records when S3 is not used
    #[clap(long, default_value = ".")]
    pub root: PathBuf,

    /// S3 (MinIO) endpoint, e.g. http://localhost:9000. Enables S3 storage.
    #[clap(long = "os", requires_all = ["user", "pw"])]
    pub os: Option<String>,

    /// S3 access key id
    #[clap(long)]
    pub user: Option<String>,

    /// S3 secret access key
    #[clap(long)]
    pub pw: Option<String>,

    /// S3 bucket
    #[clap(long, default_value = "tbpipe")]
    pub bucket: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a job on this machine
    Run {
        /// Record files to read, in order
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<String>,

        /// Where to write the final records; printed as text when omitted
        #[arg(short, long)]
        output: Option<String>,

        /// Stop feeding the map stage after this many records
        #[arg(long)]
        max_input: Option<usize>,

        /// File to copy into every stage's working directory
        #[arg(long = "file")]
        files: Vec<PathBuf>,

        /// NAME=value set in every stage's environment
        #[arg(long = "cmdenv")]
        cmdenvs: Vec<String>,

        /// Give workers the record pipes on stdin/stdout directly
        #[arg(long)]
        no_pipe: bool,

        /// Leave stage working directories behind
        #[arg(long)]
        keep_tempdir: bool,

        /// Buffer at most this many output records per stage
        #[arg(long)]
        queue_bound: Option<usize>,

        /// The worker command; the stage name is appended to it
        #[clap(value_parser, last = true, required = true)]
        command: Vec<String>,
    },
    /// Print record files as `key\tvalue` lines
    Dump {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Store `key\tvalue` lines read from stdin as a record file
    Load { path: String },
}
