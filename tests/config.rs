//! Renderer configuration loaded from TOML.

use rstest::rstest;
use stellar_deferred::gpu::BufferIndex;
use stellar_deferred::{DeferredRenderer, RenderError, RendererConfig, SoftwareBackend};

const SAMPLE: &str = r#"
width = 640
height = 360
frames_in_flight = 3
max_lights = 16
clear_color = [0.0, 0.0, 0.0, 1.0]

[shadow]
resolution = 1024
depth_bias = 0.005

[terrain]
max_tessellation = 32

[ambient]
color = [1.0, 0.9, 0.8]
intensity = 0.2

[[bindings.remap]]
buffer = "materials"
slot = 30
"#;

#[test]
fn test_sample_file_parses_with_defaults() {
    let config: RendererConfig = toml::from_str(SAMPLE).unwrap();
    config.validate().unwrap();
    assert_eq!((config.width, config.height), (640, 360));
    assert_eq!(config.frames_in_flight, 3);
    assert_eq!(config.max_lights, 16);
    assert_eq!(config.max_instances, RendererConfig::default().max_instances);
    assert_eq!(config.shadow.resolution, 1024);
    assert_eq!(config.shadow.depth_bias, 0.005);
    assert_eq!(config.shadow.half_extent, 15.0);
    assert_eq!(config.terrain.max_tessellation, 32);
    assert_eq!(config.ambient.intensity, 0.2);
    assert_eq!(config.bindings.slot(BufferIndex::Materials), 30);
    assert_eq!(config.bindings.slot(BufferIndex::Lights), 2);
}

#[test]
fn test_empty_file_is_default() {
    let config: RendererConfig = toml::from_str("").unwrap();
    assert_eq!(config, RendererConfig::default());
}

#[test]
fn test_config_round_trips_through_toml() {
    let config: RendererConfig = toml::from_str(SAMPLE).unwrap();
    let text = toml::to_string(&config).unwrap();
    let reparsed: RendererConfig = toml::from_str(&text).unwrap();
    assert_eq!(reparsed, config);
}

#[rstest]
#[case::zero_width("width = 0")]
#[case::too_many_frames("frames_in_flight = 4")]
#[case::tessellation("[terrain]\nmax_tessellation = 0")]
#[case::slot_clash("[[bindings.remap]]\nbuffer = \"lights\"\nslot = 13")]
fn test_invalid_files_fail_renderer_creation(#[case] text: &str) {
    let config: RendererConfig = toml::from_str(text).unwrap();
    let error = DeferredRenderer::new(SoftwareBackend::new(), config)
        .err()
        .expect("renderer accepted an invalid config");
    assert!(matches!(
        error,
        RenderError::InvalidConfig(_) | RenderError::BindingConflict { .. }
    ));
}
