//! Context configuration.
//!
//! Everything the layer needs to know up front lives in [`ContextConfig`].
//! There is no global state: the config is passed to
//! [`Context::new`](crate::context::Context::new) and consumed there.

use crate::{
    instance::VulkanLogLevel,
    selector::{DeviceRequirements, RankTable},
};

/// Upper bound on frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Environment variable that turns on safe mode when set to `1`/`true`.
pub const SAFE_MODE_ENV: &str = "RHAL_SAFE_MODE";

/// Environment variable listing instance layers that must not be enabled,
/// separated by `,` or `:`.
pub const DISABLE_LAYERS_ENV: &str = "RHAL_DISABLE_LAYERS";

#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub app_name: String,
    /// Number of frame slots, `1..=MAX_FRAMES_IN_FLIGHT`.
    pub frames_in_flight: usize,
    /// Enables the validation layer and recreates command pools every
    /// frame instead of resetting them.
    pub safe_mode: bool,
    /// Minimum severity forwarded from the validation layer.
    pub validation_log_level: VulkanLogLevel,
    /// Instance layers that are never enabled, even in safe mode.
    pub disabled_layers: Vec<String>,
    /// Timestamp queries available per frame. `0` disables the query
    /// pools entirely.
    pub timestamp_queries_per_frame: u32,
    pub requirements: DeviceRequirements,
    pub ranks: RankTable,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("rhal"),
            frames_in_flight: 2,
            safe_mode: cfg!(debug_assertions),
            validation_log_level: VulkanLogLevel::Warning,
            disabled_layers: Vec::new(),
            timestamp_queries_per_frame: 0,
            requirements: DeviceRequirements::default(),
            ranks: RankTable::default(),
        }
    }
}

impl ContextConfig {
    /// Apply `RHAL_SAFE_MODE` and `RHAL_DISABLE_LAYERS` on top of `self`.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        if let Some(value) = lookup(SAFE_MODE_ENV) {
            match parse_flag(&value) {
                Some(flag) => self.safe_mode = flag,
                None => tracing::warn!(
                    "Ignoring {SAFE_MODE_ENV}={value:?}, expected 0/1/true/false"
                ),
            }
        }
        if let Some(value) = lookup(DISABLE_LAYERS_ENV) {
            self.disabled_layers.extend(parse_layer_list(&value));
        }
        self
    }
}

/// Returns `true` if `layer` is named in `disabled_layers`, or the list
/// holds the `*` wildcard.
pub fn layer_disabled(disabled_layers: &[String], layer: &str) -> bool {
    disabled_layers
        .iter()
        .any(|disabled| disabled == layer || disabled == "*")
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Split a layer-disable string into layer names.
pub fn parse_layer_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split([',', ':'])
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_list_splits_on_commas_and_colons() {
        let layers: Vec<_> = parse_layer_list(
            "VK_LAYER_KHRONOS_validation, VK_LAYER_MESA_overlay::",
        )
        .collect();
        assert_eq!(
            layers,
            ["VK_LAYER_KHRONOS_validation", "VK_LAYER_MESA_overlay"]
        );
    }

    #[test]
    fn env_overrides_apply_on_top_of_config() {
        let config = ContextConfig {
            safe_mode: false,
            ..Default::default()
        }
        .with_overrides_from(|key| match key {
            SAFE_MODE_ENV => Some("TRUE".into()),
            DISABLE_LAYERS_ENV => Some("VK_LAYER_KHRONOS_validation".into()),
            _ => None,
        });

        assert!(config.safe_mode);
        assert!(layer_disabled(&config.disabled_layers, "VK_LAYER_KHRONOS_validation"));
        assert!(!layer_disabled(&config.disabled_layers, "VK_LAYER_MESA_overlay"));
    }

    #[test]
    fn unparseable_safe_mode_keeps_configured_value() {
        let config = ContextConfig {
            safe_mode: true,
            ..Default::default()
        }
        .with_overrides_from(|key| {
            (key == SAFE_MODE_ENV).then(|| "maybe".to_owned())
        });
        assert!(config.safe_mode);
    }

    #[test]
    fn wildcard_disables_every_layer() {
        let config = ContextConfig {
            disabled_layers: vec!["*".into()],
            ..Default::default()
        };
        assert!(layer_disabled(&config.disabled_layers, "VK_LAYER_KHRONOS_validation"));
    }
}
