//! Integration tests for the SdcmApi public interface.
//!
//! Each test builds a small WebUI/ComfyUI layout in a temp dir and drives
//! the engine through the facade with a scripted registry.

use async_trait::async_trait;
use sdcm_core::registry::RegistryResponse;
use sdcm_core::{
    compute_identity, CancellationToken, ComfyUiPaths, Event, LibraryConfig, ModelKind,
    RegistryClient, Result, ScanState, SdcmApi, SdcmError, UiTool, WebUiPaths,
};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Registry double keyed by model id and file hash.
#[derive(Default)]
struct ScriptedRegistry {
    models: Mutex<HashMap<i64, RegistryResponse>>,
    by_hash: Mutex<HashMap<String, RegistryResponse>>,
    images: Mutex<HashMap<String, RegistryResponse>>,
}

#[async_trait]
impl RegistryClient for ScriptedRegistry {
    async fn fetch_model(&self, model_id: i64) -> Result<RegistryResponse> {
        Ok(self
            .models
            .lock()
            .unwrap()
            .get(&model_id)
            .cloned()
            .unwrap_or(RegistryResponse::NotFound))
    }

    async fn fetch_version(&self, _version_id: i64) -> Result<RegistryResponse> {
        Ok(RegistryResponse::NotFound)
    }

    async fn fetch_version_by_hash(&self, hash: &str) -> Result<RegistryResponse> {
        Ok(self
            .by_hash
            .lock()
            .unwrap()
            .get(hash)
            .cloned()
            .unwrap_or(RegistryResponse::NotFound))
    }

    async fn fetch_image(&self, url: &str) -> Result<RegistryResponse> {
        Ok(self
            .images
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or(RegistryResponse::NotFound))
    }
}

struct TestEnv {
    _temp: TempDir,
    webui_lora: PathBuf,
    comfy_lora: PathBuf,
    registry: Arc<ScriptedRegistry>,
    api: SdcmApi,
}

fn create_test_env() -> TestEnv {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let webui_lora = temp.path().join("webui/models/Lora");
    let comfy_lora = temp.path().join("comfy/models/loras");
    std::fs::create_dir_all(&webui_lora).unwrap();
    std::fs::create_dir_all(&comfy_lora).unwrap();

    let config = LibraryConfig {
        web_ui: Some(WebUiPaths {
            lora: webui_lora.clone(),
            ..Default::default()
        }),
        comfy_ui: Some(ComfyUiPaths {
            lora: comfy_lora.clone(),
            ..Default::default()
        }),
        ..Default::default()
    };
    let registry = Arc::new(ScriptedRegistry::default());
    let api = SdcmApi::builder(config)
        .database(temp.path().join("cache/sdcm.db"))
        .with_client(registry.clone())
        .build()
        .unwrap();

    TestEnv {
        _temp: temp,
        webui_lora,
        comfy_lora,
        registry,
        api,
    }
}

fn version_doc(version_id: i64, model_id: i64, hash: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": version_id,
        "modelId": model_id,
        "name": "v1",
        "baseModel": "SD 1.5",
        "trainedWords": ["glow, neon"],
        "model": {"name": "Neon Glow", "type": "LORA", "nsfw": false},
        "files": [{"id": version_id * 10, "name": "neon.safetensors", "sizeKB": 1.0, "primary": true, "hashes": {"SHA256": hash}}],
        "images": [{"url": "https://img/neon.png", "hash": "UNEON"}]
    }))
    .unwrap()
}

fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_fn(16, 16, |x, y| {
        image::Rgb([(x * 16) as u8, (y * 16) as u8, 128])
    });
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn sha(path: &Path) -> String {
    compute_identity(path).unwrap().sha256
}

#[tokio::test]
async fn test_rescan_adds_no_records() {
    let env = create_test_env();
    std::fs::write(env.webui_lora.join("a.safetensors"), b"a").unwrap();
    std::fs::write(env.webui_lora.join("b.ckpt"), b"b").unwrap();
    let cancel = CancellationToken::new();

    let first = env
        .api
        .scan_directory(UiTool::WebUi, ModelKind::Lora, "", "", &cancel)
        .await
        .unwrap();
    let second = env
        .api
        .scan_directory(UiTool::WebUi, ModelKind::Lora, "", "", &cancel)
        .await
        .unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
    assert_eq!(env.api.store().file_record_count().unwrap(), 2);
}

#[tokio::test]
async fn test_scan_reports_batch_events() {
    let env = create_test_env();
    std::fs::write(env.webui_lora.join("a.safetensors"), b"a").unwrap();
    let mut rx = env.api.subscribe();

    env.api
        .scan_directory(UiTool::WebUi, ModelKind::Lora, "", "", &CancellationToken::new())
        .await
        .unwrap();

    let mut states = Vec::new();
    let mut batches = Vec::new();
    while let Ok(Event::ScanBatch(event)) = rx.try_recv() {
        states.push(event.state);
        batches.push(event.batch);
    }
    assert_eq!(
        states,
        vec![ScanState::Start, ScanState::Progress, ScanState::Finish]
    );
    assert!(batches.windows(2).all(|w| w[0] == w[1]));

    let encoded = serde_json::to_value(Event::ScanBatch(sdcm_core::ScanEvent {
        batch: "b1".into(),
        state: ScanState::Start,
        file: None,
        amount: Some(3),
        message: None,
    }))
    .unwrap();
    assert_eq!(
        encoded,
        json!({"channel": "scan-batch", "payload": {"batch": "b1", "state": "start", "amount": 3}})
    );
}

#[tokio::test]
async fn test_duplicates_across_tools() {
    let env = create_test_env();
    std::fs::write(env.webui_lora.join("neon.safetensors"), b"neon weights").unwrap();
    std::fs::create_dir_all(env.comfy_lora.join("styles")).unwrap();
    std::fs::write(env.comfy_lora.join("styles/neon-copy.safetensors"), b"neon weights").unwrap();
    std::fs::write(env.comfy_lora.join("other.safetensors"), b"something else").unwrap();

    let groups = env
        .api
        .find_duplicates(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].files.len(), 2);
    assert_eq!(groups[0].hash, sha(&env.webui_lora.join("neon.safetensors")));
}

#[tokio::test]
async fn test_full_scan_then_directory_scan() {
    let env = create_test_env();
    std::fs::create_dir_all(env.webui_lora.join("deep/er")).unwrap();
    std::fs::write(env.webui_lora.join("deep/er/x.safetensors"), b"x").unwrap();
    std::fs::write(env.webui_lora.join("y.safetensors"), b"y").unwrap();
    let cancel = CancellationToken::new();

    let report = env.api.full_scan(&cancel).await.unwrap();
    assert_eq!(report.discovered, 2);
    assert_eq!(report.written, 2);

    let listed = env
        .api
        .scan_directory(UiTool::WebUi, ModelKind::Lora, "deep/er", "", &cancel)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(env.api.store().file_record_count().unwrap(), 2);
    assert_eq!(
        env.api
            .list_sub_categories(UiTool::WebUi, ModelKind::Lora)
            .unwrap(),
        vec!["deep"]
    );
}

#[tokio::test]
async fn test_refresh_by_hash_links_and_writes_descriptor() {
    let env = create_test_env();
    let model = env.webui_lora.join("neon.safetensors");
    std::fs::write(&model, b"neon weights").unwrap();
    let hash = sha(&model);
    env.registry
        .by_hash
        .lock()
        .unwrap()
        .insert(hash.clone(), RegistryResponse::Found(version_doc(900, 90, &hash)));
    let cancel = CancellationToken::new();

    env.api
        .scan_directory(UiTool::WebUi, ModelKind::Lora, "", "", &cancel)
        .await
        .unwrap();
    let ingested = env.api.refresh_by_hash(&hash.to_lowercase()).await.unwrap();
    assert_eq!(ingested.version.id, 900);

    let descriptor = env.webui_lora.join("neon.civitai.info");
    assert!(descriptor.exists());

    let summaries = env
        .api
        .scan_directory(UiTool::WebUi, ModelKind::Lora, "", "Neon", &cancel)
        .await
        .unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].name, "Neon Glow");
    assert_eq!(summaries[0].related_version, Some(900));
    assert_eq!(summaries[0].prompts, vec!["glow", "neon"]);
    assert_eq!(summaries[0].base_model.as_deref(), Some("SD 1.5"));

    let version = env.api.version(900).unwrap();
    assert_eq!(version.model.unwrap().name, "Neon Glow");
    assert!(env.api.version_downloaded(900).await.unwrap());

    assert!(matches!(
        env.api.refresh_by_hash("00FF").await,
        Err(SdcmError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_refresh_model_withdrawn() {
    let env = create_test_env();
    let model = env.webui_lora.join("neon.safetensors");
    std::fs::write(&model, b"neon weights").unwrap();
    std::fs::write(
        env.webui_lora.join("neon.civitai.info"),
        version_doc(901, 91, &sha(&model)),
    )
    .unwrap();
    env.api
        .scan_directory(UiTool::WebUi, ModelKind::Lora, "", "", &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(
        env.api.refresh_model(91).await,
        Err(SdcmError::NotFound { .. })
    ));
    assert!(env.api.store().model(91).unwrap().unwrap().withdrawn);
}

#[tokio::test]
async fn test_rename_then_rescan() {
    let env = create_test_env();
    let model = env.webui_lora.join("old.safetensors");
    std::fs::write(&model, b"weights").unwrap();
    std::fs::write(env.webui_lora.join("old.civitai.info"), b"not json").unwrap();
    let cancel = CancellationToken::new();

    let before = env
        .api
        .scan_directory(UiTool::WebUi, ModelKind::Lora, "", "", &cancel)
        .await
        .unwrap();
    let renamed = env.api.rename_file(&before[0].id, "new").await.unwrap();
    assert_eq!(renamed.path, env.webui_lora.join("new.safetensors"));
    assert!(env.webui_lora.join("new.civitai.info").exists());

    let after = env
        .api
        .scan_directory(UiTool::WebUi, ModelKind::Lora, "", "", &cancel)
        .await
        .unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].id, before[0].id);
    assert_eq!(env.api.store().file_record_count().unwrap(), 1);
}

#[tokio::test]
async fn test_gallery_image_download_and_cover() {
    let env = create_test_env();
    let model = env.webui_lora.join("neon.safetensors");
    std::fs::write(&model, b"neon weights").unwrap();
    std::fs::write(
        env.webui_lora.join("neon.civitai.info"),
        version_doc(902, 92, &sha(&model)),
    )
    .unwrap();
    env.api
        .scan_directory(UiTool::WebUi, ModelKind::Lora, "", "", &CancellationToken::new())
        .await
        .unwrap();

    let images = env.api.version_images(902).unwrap();
    assert_eq!(images.len(), 1);
    assert!(images[0].local_path.is_none());
    env.registry.images.lock().unwrap().insert(
        "https://img/neon.png".into(),
        RegistryResponse::Found(png_bytes()),
    );

    let downloaded = env.api.download_gallery_image(&images[0].id).await.unwrap();
    let local = downloaded.local_path.clone().unwrap();
    assert!(local.exists());
    assert!(local.starts_with(env.api.image_dir().unwrap()));
    assert_eq!(local.extension().unwrap(), "png");
    assert_eq!(downloaded.fingerprint.as_ref().map(String::len), Some(16));

    // A second request is served from the local copy.
    env.registry.images.lock().unwrap().clear();
    let again = env.api.download_gallery_image(&images[0].id).await.unwrap();
    assert_eq!(again.local_path, Some(local));

    let thumbnail = env
        .api
        .use_gallery_image_as_cover(902, &images[0].id)
        .await
        .unwrap();
    assert!(thumbnail.exists());
    let record = env.api.store().file_record_by_path(&model).unwrap().unwrap();
    assert_eq!(record.thumbnail_path, Some(thumbnail));
}

#[tokio::test]
async fn test_gallery_image_missing_upstream() {
    let env = create_test_env();
    let model = env.webui_lora.join("neon.safetensors");
    std::fs::write(&model, b"neon weights").unwrap();
    std::fs::write(
        env.webui_lora.join("neon.civitai.info"),
        version_doc(903, 93, &sha(&model)),
    )
    .unwrap();
    env.api
        .scan_directory(UiTool::WebUi, ModelKind::Lora, "", "", &CancellationToken::new())
        .await
        .unwrap();
    let image_id = env.api.version_images(903).unwrap()[0].id.clone();

    assert!(matches!(
        env.api.download_gallery_image(&image_id).await,
        Err(SdcmError::NotFound { .. })
    ));
    env.registry.images.lock().unwrap().insert(
        "https://img/neon.png".into(),
        RegistryResponse::Found(b"<html>gone</html>".to_vec()),
    );
    assert!(matches!(
        env.api.download_gallery_image(&image_id).await,
        Err(SdcmError::Image { .. })
    ));
    assert!(env.api.store().image(&image_id).unwrap().unwrap().local_path.is_none());
    assert!(matches!(
        env.api.use_gallery_image_as_cover(903, &image_id).await,
        Err(SdcmError::Image { .. })
    ));
}
