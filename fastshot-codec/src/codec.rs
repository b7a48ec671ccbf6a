use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use chrono::{DateTime, Utc};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use fastshot_types::{Checksum, MetadataIndex, SessionMetadata, LEGACY_SCHEMA_VERSION};

use crate::collage::thumbnail_collage;
use crate::session::{ImagePayload, Session};
use crate::xor::{find_sentinel, xor_keystream};
use crate::Error;

const SENTINEL: &[u8; 4] = b"FHDR";
const SESSION_ENTRY: &str = "manifest.json";

/// Extra binary payloads referenced by `ImagePayload::File` entries in a
/// session, keyed by their `images/<name>.png` path relative to the ZIP
/// root.
pub type ImageFiles = BTreeMap<String, Vec<u8>>;

/// Builds the bit-exact on-wire artifact for `session` (§4.2):
/// `cover PNG ‖ "FHDR" ‖ XOR(deflated ZIP{manifest.json, images/*.png})`.
pub fn encode(session: &Session, image_files: &ImageFiles, passphrase: &[u8]) -> Result<Vec<u8>, Error> {
    let cover = thumbnail_collage(&decode_thumbnail_sources(session, image_files)?)?;

    let mut plaintext = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut plaintext);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file(SESSION_ENTRY, options)?;
        zip.write_all(&serde_json::to_vec(session)?)?;

        for (path, bytes) in image_files {
            zip.start_file(format!("images/{path}"), options)?;
            zip.write_all(bytes)?;
        }
        zip.finish()?;
    }

    let mut ciphertext = plaintext.into_inner();
    xor_keystream(&mut ciphertext, passphrase);

    let mut artifact = cover;
    artifact.extend_from_slice(SENTINEL);
    artifact.extend_from_slice(&ciphertext);
    Ok(artifact)
}

/// Decodes a session body produced by [`encode`], returning the session
/// plus any sibling image files. Failure modes follow §4.2 exactly:
/// missing sentinel is `CorruptArtifact`, a ZIP that doesn't parse after
/// XOR is `DecryptionFailed` (almost always a wrong passphrase), and a
/// ZIP that parses but is missing required JSON fields is
/// `SchemaMismatch`.
pub fn decode(bytes: &[u8], passphrase: &[u8]) -> Result<(Session, ImageFiles), Error> {
    let sentinel_at = find_sentinel(bytes).ok_or(Error::CorruptArtifact)?;
    let mut plaintext = bytes[sentinel_at + SENTINEL.len()..].to_vec();
    xor_keystream(&mut plaintext, passphrase);

    let mut archive = ZipArchive::new(Cursor::new(plaintext)).map_err(|_| Error::DecryptionFailed)?;

    let session_bytes = {
        let mut entry = archive
            .by_name(SESSION_ENTRY)
            .map_err(|_| Error::SchemaMismatch(format!("missing {SESSION_ENTRY}")))?;
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        buf
    };
    let session: Session = serde_json::from_slice(&session_bytes)
        .map_err(|e| Error::SchemaMismatch(e.to_string()))?;

    let mut image_files = ImageFiles::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if let Some(name) = entry.name().strip_prefix("images/").map(str::to_string) {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            image_files.insert(name, buf);
        }
    }

    Ok((session, image_files))
}

/// Given a session and its already-uploaded body checksum, derives the
/// `MetadataIndex` the manifest and local cache reference (§4.2
/// "Derivation" (a)).
pub fn derive_index(
    session: &Session,
    filename: &str,
    body_checksum: Checksum,
    body_size: u64,
    now: DateTime<Utc>,
) -> MetadataIndex {
    let mut metadata = session.metadata.clone();
    metadata.image_count = session.image_count();
    metadata.file_size = body_size;

    MetadataIndex {
        version: fastshot_types::INDEX_SCHEMA_VERSION.to_string(),
        filename: filename.to_string(),
        metadata,
        checksum: body_checksum,
        created_at: session.created_at,
        last_updated: now,
    }
}

/// Synthesizes a best-effort index for a body that fails to decode with
/// `SchemaMismatch` -- a pre-metadata-era artifact (§4.2 last paragraph,
/// §4.3 "Backward compatibility": "Legacy body files without a derivable
/// index trigger on-demand derivation via AC").
pub fn derive_legacy_index(
    filename: &str,
    body_checksum: Checksum,
    body_size: u64,
    now: DateTime<Utc>,
) -> MetadataIndex {
    MetadataIndex {
        version: LEGACY_SCHEMA_VERSION.to_string(),
        filename: filename.to_string(),
        metadata: SessionMetadata::synthesize(now, body_size),
        checksum: body_checksum,
        created_at: now,
        last_updated: now,
    }
}

fn decode_thumbnail_sources(
    session: &Session,
    image_files: &ImageFiles,
) -> Result<Vec<image::DynamicImage>, Error> {
    let mut sources = Vec::with_capacity(session.windows.len());
    for window in &session.windows {
        let bytes: Option<Vec<u8>> = match &window.image {
            ImagePayload::Inline { base64 } => Some(decode_base64(base64)?),
            ImagePayload::File { path } => image_files.get(path).cloned(),
        };
        if let Some(bytes) = bytes {
            sources.push(image::load_from_memory(&bytes)?);
        }
    }
    Ok(sources)
}

fn decode_base64(s: &str) -> Result<Vec<u8>, Error> {
    // minimal standard-alphabet base64 decoder; avoids pulling in the
    // `base64` crate for a single call site the way `peoci` keeps
    // `digest_eq` hand-rolled rather than reaching for a crate.
    fn value(c: u8) -> Option<u8> {
        match c {
            b'A'..=b'Z' => Some(c - b'A'),
            b'a'..=b'z' => Some(c - b'a' + 26),
            b'0'..=b'9' => Some(c - b'0' + 52),
            b'+' => Some(62),
            b'/' => Some(63),
            _ => None,
        }
    }
    let clean: Vec<u8> = s.bytes().filter(|&b| b != b'=' && !b.is_ascii_whitespace()).collect();
    let mut out = Vec::with_capacity(clean.len() * 3 / 4);
    for chunk in clean.chunks(4) {
        let vals: Vec<u8> = chunk
            .iter()
            .map(|&b| value(b).ok_or_else(|| Error::SchemaMismatch("bad base64 image payload".into())))
            .collect::<Result<_, _>>()?;
        out.push((vals[0] << 2) | (vals.get(1).copied().unwrap_or(0) >> 4));
        if vals.len() > 2 {
            out.push((vals[1] << 4) | (vals[2] >> 2));
        }
        if vals.len() > 3 {
            out.push((vals[2] << 6) | vals[3]);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Geometry, WindowCapture};
    use chrono::TimeZone;
    use fastshot_types::SessionMetadata;
    use image::{DynamicImage, RgbaImage};
    use std::io::Cursor as IoCursor;

    fn sample_session() -> Session {
        let created_at = Utc.with_ymd_and_hms(2025, 6, 21, 11, 46, 15).unwrap();
        Session {
            version: "1.0".to_string(),
            created_at,
            windows: vec![WindowCapture {
                geometry: Geometry { x: 0, y: 0, width: 40, height: 20 },
                scale: 1.0,
                image: ImagePayload::File { path: "win0.png".to_string() },
                draw_history: vec![],
            }],
            metadata: SessionMetadata {
                name: "Test".to_string(),
                desc: "".to_string(),
                tags: vec!["t1".to_string()],
                color: "".to_string(),
                class: "".to_string(),
                image_count: 1,
                created_at,
                file_size: 0,
            },
        }
    }

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(w, h));
        let mut buf = IoCursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn encode_decode_round_trips_session() {
        let session = sample_session();
        let mut files = ImageFiles::new();
        files.insert("win0.png".to_string(), png_bytes(40, 20));

        let artifact = encode(&session, &files, b"correct horse battery staple").unwrap();
        assert_eq!(&artifact[find_sentinel(&artifact).unwrap()..][..4], SENTINEL);

        let (decoded, decoded_files) = decode(&artifact, b"correct horse battery staple").unwrap();
        assert_eq!(decoded, session);
        assert_eq!(decoded_files.get("win0.png"), files.get("win0.png"));
    }

    #[test]
    fn wrong_passphrase_is_decryption_failed() {
        let session = sample_session();
        let files = ImageFiles::new();
        let artifact = encode(&session, &files, b"right-key").unwrap();
        let err = decode(&artifact, b"wrong-key").unwrap_err();
        assert!(matches!(err, Error::DecryptionFailed));
    }

    #[test]
    fn missing_sentinel_is_corrupt_artifact() {
        let err = decode(b"not an artifact at all", b"key").unwrap_err();
        assert!(matches!(err, Error::CorruptArtifact));
    }

    #[test]
    fn derive_index_copies_counts_and_checksum() {
        let session = sample_session();
        let checksum = Checksum::of(b"body bytes");
        let now = Utc.with_ymd_and_hms(2025, 6, 21, 12, 0, 0).unwrap();
        let index = derive_index(&session, "f.fastshot", checksum.clone(), 42, now);
        assert_eq!(index.metadata.image_count, 1);
        assert_eq!(index.metadata.file_size, 42);
        assert_eq!(index.checksum, checksum);
        assert_eq!(index.last_updated, now);
    }

    #[test]
    fn legacy_index_uses_defaults_and_old_version_marker() {
        let checksum = Checksum::of(b"legacy body");
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let index = derive_legacy_index("old.fastshot", checksum, 10, now);
        assert_eq!(index.version, LEGACY_SCHEMA_VERSION);
        assert_eq!(index.metadata.image_count, 0);
        assert!(index.needs_upgrade());
    }
}
