use clap::Parser;

#[derive(Parser)]
#[command(name = "aiproxy", about = "Multi-provider LLM API proxy")]
pub(crate) struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml")]
    pub(crate) config: String,
    /// Override the configured bind host.
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured bind port.
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Override the credential directory.
    #[arg(long)]
    pub(crate) auth_dir: Option<String>,
    /// Credential pick policy: fill-first or round-robin.
    #[arg(long, default_value = "fill-first")]
    pub(crate) selector: String,
}
