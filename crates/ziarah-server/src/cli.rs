use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "ziarah-server", about = "Ziarah group travel realtime server")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/ziarah.toml")]
    pub config: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}
