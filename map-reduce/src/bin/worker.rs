use std::path::PathBuf;
use std::process;
use std::time::Duration;

use structopt::StructOpt;

use map_reduce::{app, Worker};

#[derive(StructOpt, Debug)]
#[structopt(name = "worker", version = env!("CARGO_PKG_VERSION"), about = env!("CARGO_PKG_DESCRIPTION"), author = env!("CARGO_PKG_AUTHORS"))]
struct Opt {
    /// Coordinator address, host:port
    #[structopt(short, long)]
    server: String,

    /// Directory for intermediate and output files
    #[structopt(short, long, default_value = ".", parse(from_os_str))]
    dir: PathBuf,

    /// Application to run (wc, crash)
    #[structopt(short, long, default_value = "wc")]
    app: String,

    /// Milliseconds to sleep when there is no task to run
    #[structopt(long, default_value = "1000")]
    backoff: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();

    let opt = Opt::from_args();
    let (map, reduce) = app::lookup(&opt.app).ok_or_else(|| format!("unknown app {}", opt.app))?;
    let w = Worker {
        id: u64::from(process::id()),
        server: opt.server,
        dir: opt.dir,
        backoff: Duration::from_millis(opt.backoff),
        map,
        reduce,
    };
    w.launch().await?;
    Ok(())
}
