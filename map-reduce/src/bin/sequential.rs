use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use log::trace;
use structopt::StructOpt;

use map_reduce::app;
use map_reduce::storage::{output_path, partition, shuffle, write_output};

#[derive(StructOpt, Debug)]
#[structopt(name = "sequential", version = env!("CARGO_PKG_VERSION"), about = "Single-process reference run", author = env!("CARGO_PKG_AUTHORS"))]
struct Opt {
    /// Files to process
    #[structopt(name = "FILE", parse(from_os_str))]
    files: Vec<PathBuf>,

    #[structopt(long, default_value = "10")]
    nreduce: usize,

    /// Output directory
    #[structopt(short, long, default_value = "target", parse(from_os_str))]
    dir: PathBuf,

    #[structopt(short, long, default_value = "wc")]
    app: String,
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    let opt = Opt::from_args();
    let (map, reduce) = app::lookup(&opt.app).ok_or_else(|| anyhow!("unknown app {}", opt.app))?;

    let mut records = Vec::new();
    for fname in opt.files.iter() {
        let contents = fs::read_to_string(fname)
            .with_context(|| format!("unable to read {}", fname.display()))?;
        records.extend(map(fname, &contents));
    }

    for (r, bucket) in partition(records, opt.nreduce)?.into_iter().enumerate() {
        let lines: Vec<(String, String)> = shuffle(bucket)
            .into_iter()
            .map(|(k, vs)| {
                let v = reduce(&k, &vs);
                (k, v)
            })
            .collect();
        let path = output_path(&opt.dir, r);
        write_output(&path, &lines)?;
        trace!("output {:?}", path);
    }
    Ok(())
}
