use std::io;

use clap::Parser;
use mcuload_core::sim::{serve, SimulatedDevice};

/// Simulated device firmware speaking the framed load protocol on
/// stdin/stdout. Exits when stdin closes.
#[derive(Parser, Debug)]
#[command(name = "mcuload-device-sim", version)]
struct Args {
    /// Bytes available for declarations; unlimited when omitted.
    #[arg(long, value_name = "BYTES")]
    capacity: Option<u64>,

    /// Value every invoked task completes with.
    #[arg(long, value_name = "N", default_value_t = 0, allow_negative_numbers = true)]
    completion_value: i32,
}

fn main() {
    let args = Args::parse();
    let mut device = SimulatedDevice::new().with_completion_value(args.completion_value);
    if let Some(capacity) = args.capacity {
        device = device.with_capacity(capacity);
    }

    let mut stdin = io::stdin().lock();
    let mut stdout = io::stdout().lock();
    if let Err(e) = serve(&mut device, &mut stdin, &mut stdout) {
        eprintln!("mcuload-device-sim: {e}");
        std::process::exit(1);
    }
}
