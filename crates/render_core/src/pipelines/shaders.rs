//! Shader module cache

use std::collections::HashMap;
use std::path::PathBuf;

use crate::backend::VulkanResult;
use crate::resources::{ResourceFactory, ShaderModuleHandle};

/// Compiled shader modules by file name.
///
/// Modules are created on first use and shared by every pipeline naming the
/// same file. Registered in-memory sources take precedence over the directory.
#[derive(Debug)]
pub struct ShaderLibrary {
    directory: PathBuf,
    sources: HashMap<String, Vec<u8>>,
    modules: HashMap<String, ShaderModuleHandle>,
}

impl ShaderLibrary {
    /// Library reading `.spv` files from `directory`
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            sources: HashMap::new(),
            modules: HashMap::new(),
        }
    }

    /// Register SPIR-V bytes under `name`
    pub fn insert_source(&mut self, name: impl Into<String>, spirv: Vec<u8>) {
        self.sources.insert(name.into(), spirv);
    }

    /// Module for `name`, created on first request
    pub fn module(&mut self, factory: &mut ResourceFactory, name: &str) -> VulkanResult<ShaderModuleHandle> {
        if let Some(&handle) = self.modules.get(name) {
            return Ok(handle);
        }
        let handle = match self.sources.get(name) {
            Some(spirv) => factory.create_shader_module(spirv)?,
            None => factory.load_shader_module(self.directory.join(name))?,
        };
        log::debug!("Loaded shader {}", name);
        self.modules.insert(name.to_string(), handle);
        Ok(handle)
    }

    /// Number of created modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether no module was created yet
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Destroy every created module
    pub fn release(&mut self, factory: &mut ResourceFactory) -> VulkanResult<()> {
        for (_, handle) in self.modules.drain() {
            factory.destroy_shader_module(handle)?;
        }
        Ok(())
    }
}

/// Smallest valid SPIR-V header: magic number, version 1.0, zeroed tail
#[cfg(test)]
pub(crate) fn minimal_spirv() -> Vec<u8> {
    [0x0723_0203_u32, 0x0001_0000, 0, 1, 0]
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GpuDevice, HeadlessDevice, ObjectKind, VulkanError};
    use std::sync::Arc;

    #[test]
    fn modules_are_shared_by_name() {
        let device = Arc::new(HeadlessDevice::new());
        let mut factory = ResourceFactory::new(device.clone() as Arc<dyn GpuDevice>).unwrap();
        let mut library = ShaderLibrary::new("missing");
        library.insert_source("scene_vert.spv", minimal_spirv());

        let first = library.module(&mut factory, "scene_vert.spv").unwrap();
        let second = library.module(&mut factory, "scene_vert.spv").unwrap();
        assert_eq!(first, second);
        assert_eq!(device.live_count(ObjectKind::ShaderModule), 1);

        library.release(&mut factory).unwrap();
        assert!(library.is_empty());
        assert_eq!(device.live_count(ObjectKind::ShaderModule), 0);
    }

    #[test]
    fn missing_file_is_an_asset_error() {
        let device = Arc::new(HeadlessDevice::new());
        let mut factory = ResourceFactory::new(device as Arc<dyn GpuDevice>).unwrap();
        let mut library = ShaderLibrary::new("/nonexistent/shaders");
        let err = library.module(&mut factory, "nothing.spv").unwrap_err();
        assert!(matches!(err, VulkanError::AssetLoad { .. }));
    }
}
