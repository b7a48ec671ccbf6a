//! Builds a tiny synthetic session (no real screen capture -- this is a
//! demo, not the capture pipeline) and publishes it through `Facade`,
//! printing the assigned filename on success.

use std::path::PathBuf;

use chrono::Utc;
use clap::Parser;
use fastshot_codec::{Geometry, ImageFiles, ImagePayload, Session, WindowCapture};
use fastshot_core::{Config, Facade};
use fastshot_types::SessionMetadata;

#[derive(Parser, Debug)]
#[command(version, about = "publish a synthetic demo session through the facade")]
struct Args {
    #[arg(long)]
    config: PathBuf,

    #[arg(long, default_value = "demo session")]
    name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fastshot_core::logging::init();
    let args = Args::parse();

    let config = Config::from_file(&args.config)?;
    let facade = Facade::new(config).await?;

    let created_at = Utc::now();
    let session = Session {
        version: "1.0".to_string(),
        created_at,
        windows: vec![WindowCapture {
            geometry: Geometry { x: 0, y: 0, width: 1, height: 1 },
            scale: 1.0,
            image: ImagePayload::File { path: "blank.png".to_string() },
            draw_history: vec![],
        }],
        metadata: SessionMetadata {
            name: args.name.clone(),
            desc: "produced by fastshot-publish".to_string(),
            tags: vec!["demo".to_string()],
            color: String::new(),
            class: String::new(),
            image_count: 1,
            created_at,
            file_size: 0,
        },
    };

    let mut image_files = ImageFiles::new();
    image_files.insert("blank.png".to_string(), one_pixel_png());

    let filename = format!("{}_demo.fastshot", created_at.format("%Y%m%d%H%M%S"));
    facade.publish_now(&filename, &session, &image_files).await?;
    println!("published {filename}");
    Ok(())
}

/// A minimal valid 1x1 transparent PNG, hand-encoded so this demo has no
/// extra dependency on an image-writing crate beyond what `fastshot-codec`
/// already pulls in for the thumbnail collage.
fn one_pixel_png() -> Vec<u8> {
    let img = image::RgbaImage::new(1, 1);
    let mut buf = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .expect("encoding a 1x1 png never fails");
    buf.into_inner()
}
