use clap::Parser;

#[derive(Parser)]
pub struct Args {
    #[clap(long)]
    pub(crate) http_addr: String,
    /// Directory the blob store persists chunks and metadata under.
    #[clap(long)]
    pub(crate) data_dir: String,
    /// Directory for per-request staging files. Defaults to the system
    /// temp directory.
    #[clap(long)]
    pub(crate) staging_dir: Option<String>,
}
