use crate::client::{ClientConfig, TorrentClient};
use crate::error::Result;
use crate::torrent::Metainfo;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "leechr")]
#[command(about = "A BitTorrent client for downloading and seeding single files", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a torrent
    Download {
        /// Path to the .torrent file
        torrent: PathBuf,

        /// Destination file (defaults to the torrent's name)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Port reported to the tracker
        #[arg(short, long, default_value = "6881")]
        port: u16,

        /// Maximum number of peers to connect to
        #[arg(short, long, default_value = "50")]
        max_peers: usize,
    },

    /// Serve a complete file to other peers
    Seed {
        /// Path to the .torrent file
        torrent: PathBuf,

        /// The complete file (defaults to the torrent's name)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Port to listen on
        #[arg(short, long, default_value = "6881")]
        port: u16,
    },

    /// Show information about a torrent file
    Info {
        /// Path to the .torrent file
        torrent: PathBuf,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Download {
                torrent,
                output,
                port,
                max_peers,
            } => {
                let metainfo = crate::torrent::load_torrent_file(torrent).await?;
                print_summary(&metainfo);

                let output = default_path(output.as_deref(), &metainfo);
                let config = ClientConfig {
                    listen_port: *port,
                    max_peers: *max_peers,
                    ..Default::default()
                };

                let client = TorrentClient::new(config)?;
                client.download(&metainfo, &output).await?;
                println!("Saved to {}", output.display());
            }

            Commands::Seed {
                torrent,
                file,
                port,
            } => {
                let metainfo = crate::torrent::load_torrent_file(torrent).await?;
                println!("Seeder running for torrent: {}", metainfo.info.name);
                println!("Info Hash: {}", metainfo.info_hash_hex());
                println!("Total Size: {} bytes", metainfo.info.total_length);

                let file = default_path(file.as_deref(), &metainfo);
                let config = ClientConfig {
                    listen_port: *port,
                    ..Default::default()
                };

                let client = TorrentClient::new(config)?;
                client.seed(&metainfo, &file).await?;
            }

            Commands::Info { torrent } => {
                self.show_torrent_info(torrent).await?;
            }
        }

        Ok(())
    }

    async fn show_torrent_info(&self, torrent_path: &Path) -> Result<()> {
        let metainfo = crate::torrent::load_torrent_file(torrent_path).await?;
        let info = &metainfo.info;

        print_summary(&metainfo);
        println!(
            "Pieces: {} x {} bytes (last {} bytes)",
            info.piece_count(),
            info.piece_length,
            info.piece_len(info.piece_count().saturating_sub(1))
        );

        println!("Files:");
        for file in &info.files {
            println!("  {} ({} bytes)", file.path.join("/"), file.length);
        }

        let urls = metainfo.announce_urls();
        if urls.len() > 1 {
            println!("Fallback trackers:");
            for url in &urls[1..] {
                println!("  {}", url);
            }
        }

        Ok(())
    }
}

fn print_summary(metainfo: &Metainfo) {
    println!("Tracker URL: {}", metainfo.announce);
    println!("Torrent Name: {}", metainfo.info.name);
    println!("Info Hash: {}", metainfo.info_hash_hex());
    println!("Total Size: {} bytes", metainfo.info.total_length);
}

fn default_path(explicit: Option<&Path>, metainfo: &Metainfo) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&metainfo.info.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::tests::test_metainfo;

    #[test]
    fn test_download_args() {
        let cli = Cli::try_parse_from(["leechr", "download", "a.torrent", "-o", "out.bin", "-m", "5"])
            .unwrap();
        match cli.command {
            Commands::Download {
                torrent,
                output,
                port,
                max_peers,
            } => {
                assert_eq!(torrent, PathBuf::from("a.torrent"));
                assert_eq!(output, Some(PathBuf::from("out.bin")));
                assert_eq!(port, 6881);
                assert_eq!(max_peers, 5);
            }
            _ => panic!("expected download"),
        }
    }

    #[test]
    fn test_output_defaults_to_torrent_name() {
        let metainfo = test_metainfo("udp://t:1", 16384, 10);
        assert_eq!(default_path(None, &metainfo), PathBuf::from("test.bin"));
        assert_eq!(
            default_path(Some(Path::new("x")), &metainfo),
            PathBuf::from("x")
        );
    }
}
