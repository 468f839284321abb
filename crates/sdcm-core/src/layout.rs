//! Tool-specific directory layouts.
//!
//! Each UI tool stores model kinds in its own directories. Callers ask a
//! [`ModelDirectoryResolver`] for the roots of a kind instead of branching on
//! the tool at every call site.

use crate::config::{ComfyUiPaths, LibraryConfig, WebUiPaths};
use crate::error::{Result, SdcmError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// UI tools whose model directories can be scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiTool {
    WebUi,
    ComfyUi,
}

impl UiTool {
    pub const ALL: [UiTool; 2] = [UiTool::ComfyUi, UiTool::WebUi];

    pub fn as_str(&self) -> &'static str {
        match self {
            UiTool::WebUi => "webui",
            UiTool::ComfyUi => "comfyui",
        }
    }

    /// Parse a tool name. `a111` is accepted as an alias of the WebUI.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "webui" | "a111" => Some(UiTool::WebUi),
            "comfyui" | "comfy" => Some(UiTool::ComfyUi),
            _ => None,
        }
    }
}

impl std::fmt::Display for UiTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Categories of model files, each stored under its own directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Checkpoint,
    Hypernet,
    Embedding,
    Lora,
    Locon,
    Vae,
    Controlnet,
    Upscaler,
}

impl ModelKind {
    /// Kinds visited by the full-library scan and the duplicate scan.
    pub const SCANNABLE: [ModelKind; 8] = [
        ModelKind::Checkpoint,
        ModelKind::Hypernet,
        ModelKind::Embedding,
        ModelKind::Lora,
        ModelKind::Locon,
        ModelKind::Vae,
        ModelKind::Controlnet,
        ModelKind::Upscaler,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Checkpoint => "checkpoint",
            ModelKind::Hypernet => "hypernet",
            ModelKind::Embedding => "embedding",
            ModelKind::Lora => "lora",
            ModelKind::Locon => "locon",
            ModelKind::Vae => "vae",
            ModelKind::Controlnet => "controlnet",
            ModelKind::Upscaler => "upscaler",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ckpt" | "checkpoint" => Some(ModelKind::Checkpoint),
            "hypernet" | "hypernetwork" => Some(ModelKind::Hypernet),
            "texture" | "embedding" | "textualinversion" => Some(ModelKind::Embedding),
            "lora" => Some(ModelKind::Lora),
            "locon" | "lycoris" => Some(ModelKind::Locon),
            "vae" => Some(ModelKind::Vae),
            "controlnet" => Some(ModelKind::Controlnet),
            "upscaler" => Some(ModelKind::Upscaler),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolves a model kind to the directories that hold it for one tool.
pub trait ModelDirectoryResolver: Send + Sync {
    /// The tool this resolver describes.
    fn tool(&self) -> UiTool;

    /// Configured roots for `kind`. Unset (empty) entries are omitted.
    fn directories(&self, kind: ModelKind) -> Vec<PathBuf>;
}

/// Directory layout of an A1111 WebUI installation.
pub struct WebUiLayout<'a> {
    paths: &'a WebUiPaths,
}

impl ModelDirectoryResolver for WebUiLayout<'_> {
    fn tool(&self) -> UiTool {
        UiTool::WebUi
    }

    fn directories(&self, kind: ModelKind) -> Vec<PathBuf> {
        let p = self.paths;
        let dirs = match kind {
            ModelKind::Checkpoint => vec![&p.checkpoint],
            ModelKind::Hypernet => vec![&p.hypernet],
            ModelKind::Embedding => vec![&p.embedding],
            ModelKind::Lora => vec![&p.lora],
            ModelKind::Locon => vec![&p.locon],
            ModelKind::Vae => vec![&p.vae],
            ModelKind::Controlnet => vec![&p.controlnet],
            ModelKind::Upscaler => vec![&p.esrgan, &p.real_esrgan, &p.swin_ir],
        };
        non_empty(dirs)
    }
}

/// Directory layout of a ComfyUI installation.
///
/// ComfyUI keeps LyCORIS models in its LoRA directory.
pub struct ComfyUiLayout<'a> {
    paths: &'a ComfyUiPaths,
}

impl ModelDirectoryResolver for ComfyUiLayout<'_> {
    fn tool(&self) -> UiTool {
        UiTool::ComfyUi
    }

    fn directories(&self, kind: ModelKind) -> Vec<PathBuf> {
        let p = self.paths;
        let dirs = match kind {
            ModelKind::Checkpoint => vec![&p.checkpoint],
            ModelKind::Hypernet => vec![&p.hypernet],
            ModelKind::Embedding => vec![&p.embedding],
            ModelKind::Lora | ModelKind::Locon => vec![&p.lora],
            ModelKind::Vae => vec![&p.vae],
            ModelKind::Controlnet => vec![&p.controlnet],
            ModelKind::Upscaler => vec![&p.upscaler],
        };
        non_empty(dirs)
    }
}

fn non_empty(dirs: Vec<&PathBuf>) -> Vec<PathBuf> {
    dirs.into_iter()
        .filter(|d| !d.as_os_str().is_empty())
        .cloned()
        .collect()
}

/// Select the resolver for `tool`.
///
/// Fails if the tool has no configured paths.
pub fn resolver_for(tool: UiTool, config: &LibraryConfig) -> Result<Box<dyn ModelDirectoryResolver + '_>> {
    match tool {
        UiTool::WebUi => config
            .web_ui
            .as_ref()
            .map(|paths| Box::new(WebUiLayout { paths }) as Box<dyn ModelDirectoryResolver>)
            .ok_or_else(|| SdcmError::Config {
                message: "WebUI model paths are not configured".into(),
            }),
        UiTool::ComfyUi => config
            .comfy_ui
            .as_ref()
            .map(|paths| Box::new(ComfyUiLayout { paths }) as Box<dyn ModelDirectoryResolver>)
            .ok_or_else(|| SdcmError::Config {
                message: "ComfyUI model paths are not configured".into(),
            }),
    }
}

/// Every distinct root of every configured tool and scannable kind.
///
/// Roots shared between kinds (ComfyUI LoRA/LyCORIS) appear once so a
/// full walk never visits the same file twice. Unconfigured tools are
/// skipped.
pub fn all_roots(config: &LibraryConfig) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut roots = Vec::new();
    for tool in UiTool::ALL {
        let Ok(resolver) = resolver_for(tool, config) else {
            continue;
        };
        for kind in ModelKind::SCANNABLE {
            for dir in resolver.directories(kind) {
                if seen.insert(dir.clone()) {
                    roots.push(dir);
                }
            }
        }
    }
    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LibraryConfig {
        LibraryConfig {
            web_ui: Some(WebUiPaths {
                lora: "/webui/models/Lora".into(),
                esrgan: "/webui/models/ESRGAN".into(),
                swin_ir: "/webui/models/SwinIR".into(),
                ..Default::default()
            }),
            comfy_ui: Some(ComfyUiPaths {
                lora: "/comfy/models/loras".into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(UiTool::parse("A111"), Some(UiTool::WebUi));
        assert_eq!(UiTool::parse("comfyui"), Some(UiTool::ComfyUi));
        assert_eq!(UiTool::parse("invoke"), None);
        assert_eq!(ModelKind::parse("ckpt"), Some(ModelKind::Checkpoint));
        assert_eq!(ModelKind::parse("texture"), Some(ModelKind::Embedding));
    }

    #[test]
    fn test_webui_upscaler_skips_unset_dirs() {
        let config = config();
        let resolver = resolver_for(UiTool::WebUi, &config).unwrap();
        assert_eq!(
            resolver.directories(ModelKind::Upscaler),
            vec![
                PathBuf::from("/webui/models/ESRGAN"),
                PathBuf::from("/webui/models/SwinIR")
            ]
        );
        assert!(resolver.directories(ModelKind::Vae).is_empty());
    }

    #[test]
    fn test_comfy_locon_shares_lora_dir() {
        let config = config();
        let resolver = resolver_for(UiTool::ComfyUi, &config).unwrap();
        assert_eq!(
            resolver.directories(ModelKind::Locon),
            resolver.directories(ModelKind::Lora)
        );
    }

    #[test]
    fn test_unconfigured_tool_is_error() {
        let config = LibraryConfig::default();
        assert!(matches!(
            resolver_for(UiTool::WebUi, &config),
            Err(SdcmError::Config { .. })
        ));
    }

    #[test]
    fn test_all_roots_deduplicates() {
        let roots = all_roots(&config());
        assert_eq!(roots.len(), 4);
        assert_eq!(
            roots.iter().filter(|r| r.ends_with("loras")).count(),
            1
        );
    }
}
