use clap::Parser;

#[derive(Parser, Clone, Debug)]
#[command(about, long_about = None, version)]
pub struct Args {
    /// Number of micro-tubes to spread tasks across.
    #[arg(short, long, default_value_t = 4)]
    pub utubes: u32,
    /// Concurrency limit applied to each micro-tube.
    #[arg(short, long, default_value_t = 2)]
    pub limit: u32,
    /// Total number of tasks to put.
    #[arg(short, long, default_value_t = 200)]
    pub tasks: u64,
    /// Number of consumer workers.
    #[arg(short, long, default_value_t = 4)]
    pub workers: u32,
    /// Milliseconds between puts.
    #[arg(long, default_value_t = 2)]
    pub put_interval_ms: u64,
    /// Simulated per-task work time in milliseconds.
    #[arg(long, default_value_t = 5)]
    pub work_ms: u64,
    /// Enables human-friendly logging.
    #[arg(short, long, default_value_t)]
    pub debug: bool,
}
