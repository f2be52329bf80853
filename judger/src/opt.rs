use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
pub struct Opts {
    /// Path of the problem directory
    #[clap(long, default_value = "/input")]
    pub problem: PathBuf,

    /// Path of the submitted source file
    #[clap(long, default_value = "/code")]
    pub source: PathBuf,

    /// Language id of the submission
    #[clap(long)]
    pub language: String,

    /// Judger configuration file (TOML)
    #[clap(long, short)]
    pub config: Option<PathBuf>,

    /// Override the temp directory
    #[clap(long)]
    pub tempdir: Option<PathBuf>,

    /// Override the language definition directory
    #[clap(long)]
    pub langconf: Option<PathBuf>,

    /// Override the mirror fs configuration file
    #[clap(long)]
    pub mirrorfs_conf: Option<PathBuf>,

    /// Override the number of concurrent judging workers
    #[clap(long)]
    pub thread: Option<usize>,

    /// `host:port` of the UDP status sink
    #[clap(long)]
    pub udp_host: Option<String>,

    /// Identifier prefixed to status datagrams
    #[clap(long)]
    pub udp_uid: Option<String>,
}
