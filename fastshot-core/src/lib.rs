//! Top-level crate wiring the Object Store Adapter, Artifact Codec, Meta
//! Cache Manager and Async Operation Manager into one `Facade` (§9).

pub mod config;
pub mod error;
pub mod facade;
pub mod logging;

pub use config::Config;
pub use error::Error;
pub use facade::Facade;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fastshot_codec::{Geometry, ImagePayload, Session, WindowCapture};
    use fastshot_types::SessionMetadata;

    fn sample_session() -> Session {
        let created_at = Utc::now();
        Session {
            version: "1.0".to_string(),
            created_at,
            windows: vec![WindowCapture {
                geometry: Geometry { x: 0, y: 0, width: 10, height: 10 },
                scale: 1.0,
                image: ImagePayload::File { path: "w0.png".to_string() },
                draw_history: vec![],
            }],
            metadata: SessionMetadata {
                name: "Demo".to_string(),
                desc: String::new(),
                tags: vec![],
                color: String::new(),
                class: String::new(),
                image_count: 1,
                created_at,
                file_size: 0,
            },
        }
    }

    #[tokio::test]
    async fn facade_without_object_store_runs_purely_local() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.cache.root_dir = dir.path().to_path_buf();
        let facade = Facade::new(config).await.unwrap();

        assert!(facade.list_metadata().is_empty());
        let report = facade.validate_integrity().unwrap();
        assert!(report.is_valid());

        let err = facade.publish_now("x.fastshot", &sample_session(), &Default::default()).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn submit_publish_without_object_store_fails_as_not_configured() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.cache.root_dir = dir.path().to_path_buf();
        config.security.encryption_key = Some("k".to_string());
        let facade = Facade::new(config).await.unwrap();

        let id = facade.submit_publish("x.fastshot".to_string(), sample_session(), Default::default());
        for _ in 0..50 {
            if let Some(record) = facade.status(id) {
                if record.state.is_terminal() {
                    assert_eq!(record.state, fastshot_types::OperationState::Failed);
                    assert_eq!(record.error, Some(fastshot_types::ErrorKind::NotConfigured));
                    return;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("operation never reached a terminal state");
    }
}
