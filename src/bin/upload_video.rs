#![forbid(unsafe_code)]

//! Uploads one local video file, outside of any batch or history.

use anyhow::{Context, Result, bail};
use clap::Parser;
use reelmirror_tools::{
    auth::{Authenticator, ClientSecrets},
    config::{DEFAULT_CHUNK_SIZE_MB, DEFAULT_SHORT_THRESHOLD_SECS, DEFAULT_TOKEN_FILE},
    fetch::{ClipDuration, DurationProbe, FfprobeProbe},
    logging,
    metadata::{DEFAULT_CATEGORY_ID, PrivacyStatus},
    upload::{UploadClient, UploadRequest, Uploader},
    youtube::YoutubeSession,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Upload a single video to YouTube.")]
struct Cli {
    #[arg(long = "file", value_name = "PATH", help = "Video file to upload")]
    file: PathBuf,
    #[arg(long = "title", help = "Video title")]
    title: String,
    #[arg(long = "description", default_value = "", help = "Video description")]
    description: String,
    #[arg(
        long = "privacy-status",
        value_enum,
        default_value_t = PrivacyStatus::Private,
        help = "Video privacy status"
    )]
    privacy_status: PrivacyStatus,
    #[arg(long = "tags", default_value = "", help = "Comma separated list of tags")]
    tags: String,
    #[arg(
        long = "category-id",
        default_value = DEFAULT_CATEGORY_ID,
        help = "Category id (22 = People & Blogs)"
    )]
    category_id: String,
    #[arg(
        long = "client-secrets",
        value_name = "PATH",
        help = "Path to client_secrets.json"
    )]
    client_secrets: PathBuf,
    #[arg(long = "token", value_name = "PATH", default_value = DEFAULT_TOKEN_FILE)]
    token: PathBuf,
    #[arg(long = "chunk-size-mb", value_name = "MB", default_value_t = DEFAULT_CHUNK_SIZE_MB)]
    chunk_size_mb: usize,
    #[arg(short = 'v', long = "verbose", help = "Log debug output")]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if !cli.file.is_file() {
        bail!("File '{}' does not exist.", cli.file.display());
    }
    if !cli.client_secrets.is_file() {
        bail!(
            "Client secrets file '{}' does not exist.",
            cli.client_secrets.display()
        );
    }
    if cli.title.trim().is_empty() {
        bail!("--title must not be empty");
    }

    let duration = FfprobeProbe::default().probe(&cli.file);
    if let ClipDuration::Seconds(secs) = duration {
        println!("Video duration: {secs:.2} seconds");
    }
    if duration.is_at_most(DEFAULT_SHORT_THRESHOLD_SECS) {
        println!(
            "Warning: This video is 60 seconds or less and will likely be uploaded as a YouTube Short."
        );
    }

    let secrets = ClientSecrets::load(&cli.client_secrets)?;
    let session = YoutubeSession::new(Authenticator::new(secrets, &cli.token))
        .with_chunk_bytes(cli.chunk_size_mb.max(1) * 1024 * 1024);
    let mut client = UploadClient::new(session);

    let request = UploadRequest {
        file: cli.file.clone(),
        title: cli.title.clone(),
        description: cli.description.clone(),
        tags: split_tags(&cli.tags),
        privacy: cli.privacy_status,
        category_id: cli.category_id.clone(),
    };
    let video_id = client
        .upload(request, &mut |percent| {
            println!("Upload progress: {percent}%")
        })
        .with_context(|| format!("uploading {}", cli.file.display()))?;

    println!("Upload Complete! Video ID: {video_id}");
    Ok(())
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}
