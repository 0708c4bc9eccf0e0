//! Property-based tests for configuration validation

use super::*;
use proptest::prelude::*;

prop_compose! {
    fn valid_config()(
        mode in prop_oneof![
            Just(CompositorMode::OpenGl),
            Just(CompositorMode::XRender),
            Just(CompositorMode::ServerAuto),
        ],
        refresh_rate in 1u32..=1000,
        max_texture_size in proptest::option::of(MIN_TEXTURE_SIZE..16384u32),
        prefer_double_buffer in any::<bool>(),
        filter in proptest::sample::select(PICTURE_FILTERS.to_vec()),
        ignore_errors in any::<bool>(),
    ) -> CompositorConfig {
        CompositorConfig {
            general: GeneralConfig {
                mode,
                refresh_rate,
                display: None,
                plugins: vec!["fade".to_string()],
            },
            x11: X11Config {
                ignore_errors,
                synchronize: false,
            },
            opengl: OpenGlConfig {
                max_texture_size,
                prefer_double_buffer,
            },
            xrender: XRenderConfig {
                preview_filter: filter.to_string(),
            },
            plugin_paths: PluginPathsConfig::default(),
        }
    }
}

proptest! {
    #[test]
    fn prop_valid_configs_validate_and_survive_toml(config in valid_config()) {
        prop_assert!(config.validate().is_ok());
        let text = toml::to_string(&config).unwrap();
        let parsed: CompositorConfig = toml::from_str(&text).unwrap();
        prop_assert_eq!(parsed, config);
    }

    #[test]
    fn prop_out_of_range_refresh_rate_is_rejected(rate in 1001u32..) {
        let mut config = CompositorConfig::default();
        config.general.refresh_rate = rate;
        prop_assert!(config.validate().is_err());
    }
}
