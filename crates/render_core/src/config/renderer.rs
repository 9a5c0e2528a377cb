//! Renderer configuration

use serde::{Deserialize, Serialize};

use super::{Config, ConfigError};

/// Present mode the swapchain should use when the surface offers it.
///
/// FIFO is always available and is the fallback for every preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresentModePreference {
    /// Vsync, never tears
    Fifo,
    /// Low latency triple buffering
    Mailbox,
    /// No vsync
    Immediate,
}

/// Device features a physical device must expose to be selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRequirements {
    /// Geometry shader stage support
    pub geometry_shader: bool,
    /// Tessellation shader stages support
    pub tessellation_shader: bool,
    /// Anisotropic sampler filtering
    pub sampler_anisotropy: bool,
}

impl Default for DeviceRequirements {
    fn default() -> Self {
        Self {
            geometry_shader: true,
            tessellation_shader: true,
            sampler_anisotropy: true,
        }
    }
}

/// # Renderer Configuration
///
/// Settings consumed by the device layer, the swapchain manager and the frame
/// orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Resolution requested when the surface leaves the extent to the application
    pub desired_resolution: (u32, u32),
    /// Lower bound on swapchain images before surface limits are applied
    pub minimum_image_count: u32,
    /// Preferred present mode
    pub present_mode: PresentModePreference,
    /// Frames the CPU may record ahead of the GPU
    pub frames_in_flight: usize,
    /// Whether to enable Vulkan validation layers; `None` follows the build type
    pub enable_validation: Option<bool>,
    /// Directory holding compiled SPIR-V shaders
    pub shader_directory: String,
    /// Edge length of each shadow map
    pub shadow_map_resolution: u32,
    /// Number of shadow-map slots rendered each frame
    pub shadow_map_slots: u32,
    /// Request ray tracing extensions when the device supports them
    pub ray_tracing: bool,
    /// Required device features
    pub device_requirements: DeviceRequirements,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            ..Self::default()
        }
    }

    /// Set the desired resolution
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.desired_resolution = (width, height);
        self
    }

    /// Set the configured minimum image count
    pub fn with_minimum_image_count(mut self, count: u32) -> Self {
        self.minimum_image_count = count;
        self
    }

    /// Set maximum frames in flight
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Whether validation layers should be enabled
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames_in_flight == 0 {
            return Err(ConfigError::Invalid {
                field: "frames_in_flight",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.minimum_image_count == 0 {
            return Err(ConfigError::Invalid {
                field: "minimum_image_count",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.desired_resolution.0 == 0 || self.desired_resolution.1 == 0 {
            return Err(ConfigError::Invalid {
                field: "desired_resolution",
                reason: format!("{:?} has a zero dimension", self.desired_resolution),
            });
        }
        if self.shadow_map_slots > 4 {
            return Err(ConfigError::Invalid {
                field: "shadow_map_slots",
                reason: format!("{} exceeds the 4 visibility bits", self.shadow_map_slots),
            });
        }
        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "Render Core".to_string(),
            desired_resolution: (1920, 1080),
            minimum_image_count: 3,
            present_mode: PresentModePreference::Mailbox,
            frames_in_flight: 2,
            enable_validation: None,
            shader_directory: "target/shaders".to_string(),
            shadow_map_resolution: 2048,
            shadow_map_slots: 1,
            ray_tracing: false,
            device_requirements: DeviceRequirements::default(),
        }
    }
}

impl Config for RendererConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_round_trip_keeps_overrides() {
        let text = r#"
            application_name = "Sandbox"
            minimum_image_count = 2
            present_mode = "Fifo"
        "#;
        let config = RendererConfig::parse("renderer.toml", text).unwrap();
        assert_eq!(config.application_name, "Sandbox");
        assert_eq!(config.minimum_image_count, 2);
        assert_eq!(config.present_mode, PresentModePreference::Fifo);
        assert_eq!(config.frames_in_flight, 2);
    }

    #[test]
    fn ron_is_supported() {
        let config = RendererConfig::parse("renderer.ron", "(desired_resolution: (800, 600))").unwrap();
        assert_eq!(config.desired_resolution, (800, 600));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = RendererConfig::parse("renderer.json", "{}").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }

    #[test]
    fn validate_rejects_zero_frames_in_flight() {
        let config = RendererConfig::default().with_frames_in_flight(0);
        assert!(config.validate().is_err());
        assert!(RendererConfig::default().validate().is_ok());
    }
}
