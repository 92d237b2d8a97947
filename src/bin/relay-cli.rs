// Command-line front-end for the image relay
//
// Collects a prompt and an optional input image, submits them through a
// RelaySession, and renders the outcome: images are written to disk,
// text is printed verbatim.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use image_relay::client::{
    FileKeyStore, ImageUpload, RelaySession, Rendered, SubmitOutcome,
};

#[derive(Parser)]
#[command(name = "relay-cli", about = "Send a generation request through the image relay")]
struct Args {
    /// Generation prompt
    #[arg(long)]
    prompt: String,

    /// Input image to edit
    #[arg(long)]
    image: Option<PathBuf>,

    /// Model identifier override
    #[arg(long)]
    model: Option<String>,

    /// API key; stored and reused on later runs when given
    #[arg(long)]
    api_key: Option<String>,

    /// Relay base URL
    #[arg(long, default_value = "http://localhost:3001")]
    relay: String,

    /// Where to write a returned image
    #[arg(long, default_value = "output.png")]
    out: PathBuf,
}

fn key_store_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("image-relay")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let store = FileKeyStore::new(&key_store_dir()).context("failed to open key store")?;
    let mut session =
        RelaySession::new(args.relay.clone(), Box::new(store)).context("failed to build session")?;

    if let Some(key) = &args.api_key {
        session.remember_key(key);
    }

    let upload = match &args.image {
        Some(path) => {
            let bytes = fs::read(path)
                .with_context(|| format!("failed to read image {}", path.display()))?;
            let mime = mime_guess::from_path(path).first_or_octet_stream().to_string();
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "image".to_string());
            Some(ImageUpload {
                file_name,
                mime,
                bytes,
            })
        }
        None => None,
    };

    let outcome = session
        .submit(&args.prompt, upload, args.model.as_deref())
        .await?;

    match outcome {
        SubmitOutcome::Success(Rendered::Image {
            bytes,
            mime,
            substitute,
        }) => {
            fs::write(&args.out, &bytes)
                .with_context(|| format!("failed to write {}", args.out.display()))?;
            if let Some(notice) = substitute {
                eprintln!("note: {}", notice);
            }
            println!("saved {} ({}, {} bytes)", args.out.display(), mime, bytes.len());
        }
        SubmitOutcome::Success(Rendered::Text(text)) => {
            println!("{}", text);
        }
        SubmitOutcome::Error { code, message } => {
            bail!("{}: {}", code, message);
        }
        SubmitOutcome::Timeout => {
            bail!("request timed out");
        }
    }

    Ok(())
}
