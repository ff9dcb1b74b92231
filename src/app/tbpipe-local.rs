use anyhow::Result;
use clap::Parser;
use std::io::{self, BufWriter};
use tbpipe::cmd::local::{Args, Commands};
use tbpipe::encode::stream::{TabLineReader, TextWriter};
use tbpipe::encode::RecordSink;
use tbpipe::local::engine::parse_cmdenv;
use tbpipe::local::{launch_local, JobInput, LocalJob};
use tbpipe::storage::{self, LocalFs, S3Store, Storage};
use tbpipe::KeyValue;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn open_storage(args: &Args) -> Result<Box<dyn Storage>> {
    match (&args.os, &args.user, &args.pw) {
        (Some(url), Some(user), Some(pw)) => {
            info!(%url, bucket = %args.bucket, "using s3 storage");
            Ok(Box::new(S3Store::connect(url, user, pw, &args.bucket)?))
        }
        _ => Ok(Box::new(LocalFs::new(&args.root))),
    }
}

fn print_records<I>(records: I) -> Result<()>
where
    I: IntoIterator<Item = tbpipe::Result<KeyValue>>,
{
    let mut sink = TextWriter::new(BufWriter::new(io::stdout().lock()));
    for kv in records {
        sink.write(&kv?)?;
    }
    sink.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let store = open_storage(&args)?;

    match args.command {
        Commands::Run {
            input,
            output,
            max_input,
            files,
            cmdenvs,
            no_pipe,
            keep_tempdir,
            queue_bound,
            command,
        } => {
            let cmdenvs = cmdenvs
                .iter()
                .map(String::as_str)
                .map(parse_cmdenv)
                .collect::<tbpipe::Result<Vec<_>>>()?;
            let job = LocalJob::new(command)
                .max_input(max_input)
                .files(files)
                .cmdenvs(cmdenvs)
                .isolate_stdio(!no_pipe)
                .remove_tempdir(!keep_tempdir)
                .queue_bound(queue_bound);

            let out = launch_local(&job, JobInput::Paths(input), output.as_deref(), store.as_ref())?;
            let shape = out.shape;
            match output {
                Some(path) => info!(?shape, %path, "job finished"),
                None => print_records(out)?,
            }
        }
        Commands::Dump { paths } => {
            print_records(storage::read_records(store.as_ref(), &paths)?.into_iter().map(Ok))?;
        }
        Commands::Load { path } => {
            let records = TabLineReader::new(io::stdin().lock());
            let n = storage::write_records(store.as_ref(), &path, records)?;
            info!(%path, records = n, "stored records");
        }
    }
    Ok(())
}
