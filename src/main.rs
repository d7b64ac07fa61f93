use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use searchdl::prelude::*;

#[derive(Parser)]
#[command(name = "searchdl")]
#[command(about = "Download the results of a completed search job")]
#[command(version)]
struct Cli {
    /// The search query to run
    #[arg(long)]
    search: Option<String>,

    /// An already-completed search id to download from
    #[arg(long)]
    sid: Option<String>,

    /// The earliest time to search from
    #[arg(long, default_value = "-24h")]
    earliest: String,

    /// The latest time to search to
    #[arg(long, default_value = "now")]
    latest: String,

    /// Authentication token
    #[arg(long, env = "SPLUNK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Username for basic authentication
    #[arg(long, env = "SPLUNK_USERNAME")]
    username: Option<String>,

    /// Password for basic authentication
    #[arg(long, env = "SPLUNK_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// The server host to connect to
    #[arg(long)]
    host: String,

    /// The server management port
    #[arg(long, default_value_t = 8089)]
    port: u16,

    /// Skip TLS certificate verification
    #[arg(short = 'k', long)]
    insecure: bool,

    /// Delete the job when done downloading
    #[arg(short = 'd', long)]
    delete_when_done: bool,

    /// Maximum concurrent connections to use for downloading results
    #[arg(long, default_value_t = 8)]
    max_connections: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output file; the extension picks the format (.txt, .csv, .ndjson, .json)
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "searchdl=debug"
    } else {
        "searchdl=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let format = OutputFormat::from_extension(&cli.output)
        .context("output file must have a .txt, .csv, .ndjson or .json extension")?;

    let auth = if let Some(token) = cli.token {
        AuthConfig::Token(token)
    } else if let (Some(username), Some(password)) = (cli.username, cli.password) {
        AuthConfig::Basic { username, password }
    } else {
        bail!("no authentication method provided; pass --token or --username and --password");
    };

    let client = SplunkClient::new(ClientConfig {
        host: cli.host,
        port: cli.port,
        auth,
        use_tls: true,
        verify_tls: !cli.insecure,
    })?;

    let sid = match (cli.sid, cli.search) {
        (Some(sid), _) => sid,
        (None, Some(query)) => {
            let sid = client
                .create_search_job(&query, &cli.earliest, &cli.latest)
                .await?;
            info!(%sid, "created search job, waiting for it to finish");
            client.wait_until_done(&sid).await?;
            sid
        }
        (None, None) => bail!("either --search or --sid is required"),
    };

    info!(%sid, output = %cli.output.display(), "downloading search results");

    let downloader = Downloader::new(
        client,
        DownloadConfig {
            sid,
            format,
            max_connections: cli.max_connections,
            delete_when_done: cli.delete_when_done,
            filename: cli.output.clone(),
        },
    );

    // Ctrl-C aborts the in-flight download cleanly.
    let cancel = downloader.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling download");
            cancel.cancel();
        }
    });

    downloader.run().await?;

    info!(output = %cli.output.display(), "search results downloaded");
    Ok(())
}
