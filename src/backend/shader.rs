// Shader module loading
//
// SPIR-V is read from disk at runtime so pipelines pick up recompiled
// shaders on the next swap-chain rebuild.

use anyhow::{Context, Result};
use ash::vk;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use crate::error::InitError;

/// Decode SPIR-V into 4-byte aligned little-endian words.
///
/// `read_spv` copies into a `Vec<u32>`, so the pointer handed to the
/// driver is always aligned regardless of how the bytes were read.
pub fn read_spirv<R: Read + Seek>(reader: &mut R) -> Result<Vec<u32>> {
    ash::util::read_spv(reader).context("Invalid SPIR-V")
}

/// Read a SPIR-V file fully, in binary mode
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(InitError::ShaderNotFound(path.to_path_buf()).into());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to open shader {:?}", path));
        }
    };

    read_spirv(&mut file).with_context(|| format!("Failed to read shader {:?}", path))
}

/// Load a SPIR-V file and wrap it in a shader module
pub fn create_shader_module(device: &ash::Device, path: &Path) -> Result<vk::ShaderModule> {
    let code = load_spirv(path)?;
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

    let module = unsafe { device.create_shader_module(&create_info, None) }
        .with_context(|| format!("Failed to create shader module from {:?}", path))?;

    log::debug!("Loaded shader {:?} ({} words)", path, code.len());
    Ok(module)
}
