use std::path::PathBuf;
use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sectester::{
    api,
    command::{nmap_command, ScanConfig},
    config::ServiceCfg,
    error,
};

#[derive(Parser)]
#[command(name = "sectester", version, about = "Control plane for network diagnostic runs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and live feed
    Serve {
        #[arg(long, default_value = "sectester.yaml")]
        config: PathBuf,
        /// Overrides `bind` from the config file
        #[arg(long)]
        bind: Option<String>,
    },
    /// Print the nmap command a scan request would run, without running it
    Preview {
        #[arg(short, long, num_args = 1.., default_value = "192.168.122.1")]
        targets: Vec<String>,
        #[arg(short, long, default_value = "1-1000")]
        ports: String,
        /// tcp | connect | udp | both
        #[arg(long, default_value = "tcp")]
        scan_type: String,
        #[arg(long, default_value = "T4")]
        timing: String,
        #[arg(long)]
        quiet: bool,
        #[arg(long)]
        no_service_detection: bool,
        #[arg(long)]
        no_os_detection: bool,
        #[arg(long)]
        script_scan: bool,
        #[arg(long, default_value = "nmap")]
        nmap: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Commands::Serve { config, bind } => {
            let mut cfg = ServiceCfg::load(&config).await?;
            if let Some(bind) = bind {
                cfg.bind = bind;
            }
            api::serve(cfg).await
        }
        Commands::Preview {
            targets,
            ports,
            scan_type,
            timing,
            quiet,
            no_service_detection,
            no_os_detection,
            script_scan,
            nmap,
        } => {
            let cfg = ScanConfig {
                targets,
                port_range: ports,
                scan_type,
                timing,
                verbose: !quiet,
                service_detection: !no_service_detection,
                os_detection: !no_os_detection,
                script_scan,
            };
            error::validate_targets(&cfg.targets)?;
            error::validate_ports(&cfg.port_range)?;
            error::validate_timing(&cfg.timing)?;
            println!("{}", nmap_command(&nmap, &cfg));
            Ok(())
        }
    }
}
