use leaky_pipe::{LeakyPipe, PipeConfig, StdinSource, StdoutSink, DEFAULT_CAPACITY};
use std::env;
use std::io::Write;
use std::sync::atomic::Ordering;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format(|buf, record| {
            let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            writeln!(buf, "[{} {}] {}", ts, record.level(), record.args())
        })
        .init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let capacity = match args.len() {
        1 => DEFAULT_CAPACITY,
        2 => match args[1].parse::<usize>() {
            Ok(bytes) => bytes,
            Err(_) => {
                eprintln!("Error: invalid capacity '{}' - must be a byte count", args[1]);
                std::process::exit(1);
            }
        },
        _ => {
            eprintln!("Usage: {} [capacity-bytes]", args[0]);
            eprintln!("Example: {} 2097152", args[0]);
            std::process::exit(1);
        }
    };

    let config = PipeConfig {
        capacity,
        ..PipeConfig::default()
    };

    let pipe = match LeakyPipe::new(StdinSource::new(), StdoutSink::new(), config) {
        Ok(pipe) => pipe,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let metrics = pipe.metrics();
    let code = pipe.run().await;

    log::debug!(
        "in={} out={} dropped={}",
        metrics.bytes_in.load(Ordering::Relaxed),
        metrics.bytes_out.load(Ordering::Relaxed),
        metrics.bytes_dropped.load(Ordering::Relaxed),
    );

    std::process::exit(code);
}
