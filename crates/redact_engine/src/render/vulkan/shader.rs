//! Shader management
//!
//! The pixelation program is an opaque compiled SPIR-V artifact loaded from a
//! fixed path at compute-stage initialization. Loading and validating it
//! happens *before* any Vulkan object is created, so a missing or corrupt
//! artifact aborts startup without leaving partial pipeline state behind.

use ash::{vk, Device};
use std::path::Path;

use crate::render::vulkan::{VulkanError, VulkanResult};

/// SPIR-V magic number, first word of every valid module
const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Load a SPIR-V artifact and validate its framing.
///
/// Fails with [`VulkanError::ShaderLoad`] if the file is missing, empty, not
/// a whole number of 32-bit words, or does not start with the SPIR-V magic.
pub fn load_spirv<P: AsRef<Path>>(path: P) -> VulkanResult<Vec<u32>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| {
        VulkanError::ShaderLoad(format!("failed to read {}: {}", path.display(), e))
    })?;

    if bytes.len() % std::mem::size_of::<u32>() != 0 {
        return Err(VulkanError::ShaderLoad(format!(
            "{}: size {} is not a whole number of SPIR-V words",
            path.display(),
            bytes.len()
        )));
    }
    // The byte buffer carries no alignment guarantee, so re-collect into
    // words instead of casting in place.
    let words: Vec<u32> = bytemuck::pod_collect_to_vec(&bytes);

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(_) => Err(VulkanError::ShaderLoad(format!(
            "{}: not a SPIR-V module (bad magic)",
            path.display()
        ))),
        None => Err(VulkanError::ShaderLoad(format!(
            "{}: empty shader artifact",
            path.display()
        ))),
    }
}

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create a shader module from validated SPIR-V words.
    pub fn from_words(device: Device, words: &[u32]) -> VulkanResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(words);

        let module = unsafe {
            device
                .create_shader_module(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, module })
    }

    /// Get the shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("redact_engine_shader_test_{}_{}", std::process::id(), name));
        path
    }

    fn write_temp(name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = temp_path(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn test_missing_artifact_is_shader_load_error() {
        let result = load_spirv(temp_path("does_not_exist.spv"));
        assert!(matches!(result, Err(VulkanError::ShaderLoad(_))));
    }

    #[test]
    fn test_truncated_artifact_rejected() {
        let path = write_temp("truncated.spv", &[0x03, 0x02, 0x23, 0x07, 0xAA]);
        let result = load_spirv(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(VulkanError::ShaderLoad(_))));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let path = write_temp("bad_magic.spv", &0xDEAD_BEEFu32.to_le_bytes());
        let result = load_spirv(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(VulkanError::ShaderLoad(_))));
    }

    #[test]
    fn test_empty_artifact_rejected() {
        let path = write_temp("empty.spv", &[]);
        let result = load_spirv(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(VulkanError::ShaderLoad(_))));
    }

    #[test]
    fn test_valid_framing_accepted() {
        // Minimal five-word SPIR-V header: magic, version 1.0, generator,
        // bound, schema.
        let mut bytes = Vec::new();
        for word in [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        let path = write_temp("valid.spv", &bytes);
        let words = load_spirv(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }
}
