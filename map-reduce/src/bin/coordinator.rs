use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use structopt::StructOpt;

use map_reduce::Coordinator;

#[derive(StructOpt, Debug)]
#[structopt(name = "coordinator", version = env!("CARGO_PKG_VERSION"), about = env!("CARGO_PKG_DESCRIPTION"), author = env!("CARGO_PKG_AUTHORS"))]
struct Opt {
    /// Port to serve workers on
    #[structopt(short, long)]
    port: u16,

    /// Seconds before an unreported task is handed to another worker
    #[structopt(short, long, default_value = "10")]
    timeout: u64,

    /// Number of reduce partitions
    #[structopt(long, default_value = "10")]
    nreduce: usize,

    /// Input files, one map task each
    #[structopt(name = "FILE", parse(from_os_str))]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();

    let opt = Opt::from_args();
    let c = Coordinator {
        addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, opt.port)),
        timeout: Duration::from_secs(opt.timeout),
        files: opt.files,
        nreduce: opt.nreduce,
    };
    c.launch().await?;
    Ok(())
}
