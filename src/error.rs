//! Configuration errors raised while bringing up the renderer.
//!
//! Driver failures travel as `ash::vk::Result` inside `anyhow::Error` with
//! context naming the step; the variants here are the cases where the
//! machine or the install cannot satisfy what the renderer needs.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InitError {
    #[error("Missing validation layers: {}", .0.join(", "))]
    ValidationLayersMissing(Vec<String>),

    #[error("Missing instance extensions: {}", .0.join(", "))]
    ExtensionsMissing(Vec<String>),

    #[error("No GPU supports graphics, presentation and swap chains for this surface")]
    NoSuitableDevice,

    #[error("No memory type in {type_bits:#034b} has properties {required:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("Shader binary not found: {0:?}")]
    ShaderNotFound(PathBuf),

    #[error("Failed to create window: {0}")]
    WindowCreation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_layers_are_listed_by_name() {
        let err = InitError::ValidationLayersMissing(vec![
            "VK_LAYER_KHRONOS_validation".to_string(),
            "VK_LAYER_LUNARG_monitor".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Missing validation layers: VK_LAYER_KHRONOS_validation, VK_LAYER_LUNARG_monitor"
        );
    }

    #[test]
    fn downcasts_through_anyhow() {
        let err: anyhow::Error = InitError::NoSuitableDevice.into();
        let err = err.context("Failed to pick physical device");
        assert!(matches!(
            err.downcast_ref::<InitError>(),
            Some(InitError::NoSuitableDevice)
        ));
    }
}
