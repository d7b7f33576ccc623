//! Simulated sensor node on stdin/stdout, e.g. for use behind a pty pair.

use std::io::{self, Read, Write};

use clap::Parser;
use sensorlink_proto::node::Node;

#[derive(Parser, Debug)]
#[command(name = "node_sim")]
#[command(about = "Answer sensor node requests on stdin/stdout")]
struct Cli {
    /// Answer this many requests with the busy token first
    #[arg(long, default_value_t = 0)]
    busy: usize,
}

fn node_main_loop(mut node: Node) -> io::Result<()> {
    let mut stdin = io::stdin().lock();
    let mut stdout = io::stdout().lock();
    let mut buf = [0; 64];
    loop {
        let len = stdin.read(&mut buf)?;
        if len == 0 {
            break;
        }
        for reply in node.receive_data(&buf[..len]) {
            log::debug!("-> {}", reply);
            stdout.write_all(reply.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
        stdout.flush()?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut node = Node::default();
    node.set_busy(cli.busy);
    node_main_loop(node)?;
    Ok(())
}
