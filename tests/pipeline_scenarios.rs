//! End-to-end frames through the software backend.

use glam::{UVec2, Vec2, Vec3, Vec4};
use rstest::{fixture, rstest};
use std::f32::consts::PI;
use bytemuck::Pod;
use stellar_deferred::backend::{BufferDescriptor, BufferUsage, CompletionMode, GraphicsBackend};
use stellar_deferred::error::Diagnostics;
use stellar_deferred::frame::FrameId;
use stellar_deferred::config::DEFAULT_CLEAR_COLOR;
use stellar_deferred::pipeline::scene_buffers::unpack_lights;
use stellar_deferred::pipeline::{
    plan_shadow, FrameOutcome, InstanceStreamBuilder, InstanceStreamInput, SceneBufferBuilder,
    SceneBufferInput, ShadowConfig, Terrain,
};
use stellar_deferred::resources::{GeometryArena, HeightMap, Material, MaterialId, Mesh, MeshId};
use stellar_deferred::scene::{AmbientLight, LightType, SpotCone};
use stellar_deferred::{
    Camera, DeferredRenderer, Diagnostic, Drawable, FrameInput, GBufferTexture, Light,
    RenderError, RendererConfig, SoftwareBackend, TextureReadback,
};

const SIZE: u32 = 24;

fn config() -> RendererConfig {
    RendererConfig::default()
        .with_size(SIZE, SIZE)
        .with_shadow(ShadowConfig {
            resolution: 64,
            ..Default::default()
        })
}

struct Scene {
    renderer: DeferredRenderer<SoftwareBackend>,
    plane: MeshId,
    cube: MeshId,
}

#[fixture]
fn scene() -> Scene {
    let mut renderer = DeferredRenderer::new(SoftwareBackend::new(), config()).unwrap();
    let plane = renderer.register_mesh(&Mesh::plane(40.0, 40.0, 1));
    let cube = renderer.register_mesh(&Mesh::cube());
    Scene {
        renderer,
        plane,
        cube,
    }
}

fn ground_input(plane: MeshId, material: Material) -> FrameInput {
    let mut input = FrameInput::new(Camera::new(Vec3::new(0.0, 5.0, 5.0), Vec3::ZERO));
    let id = input.add_material(material);
    input.add_drawable(Drawable::new(plane, id));
    input.ambient = Some(AmbientLight {
        color: Vec3::ONE,
        intensity: 0.1,
    });
    input
}

fn assert_close(actual: [f32; 4], expected: Vec3, tolerance: f32) {
    let actual = Vec3::new(actual[0], actual[1], actual[2]);
    assert!(
        (actual - expected).abs().max_element() < tolerance,
        "expected {expected:?}, got {actual:?}"
    );
}

fn all_finite(image: &TextureReadback) -> bool {
    image.texels.iter().all(|v| v.is_finite())
}

#[rstest]
fn test_sun_lit_plane_matches_closed_form(mut scene: Scene) {
    let base = Vec3::new(0.7, 0.4, 0.2);
    let material = Material::plastic(base)
        .with_roughness(0.5)
        .with_metallic(0.0)
        .with_specular_color(Vec3::ONE)
        .with_ambient_occlusion(1.0);
    let mut input = ground_input(scene.plane, material);
    input.add_light(Light::sun(Vec3::NEG_Y, Vec3::ONE, 1.5).with_specular(Vec3::ONE));

    let report = scene.renderer.render_frame(&input).unwrap();
    assert_eq!(report.stats.shadow_caster, Some(0));

    let (x, y) = (SIZE / 2, SIZE / 2);
    let position = scene.renderer.debug_view(GBufferTexture::Position).unwrap().texel(x, y);
    assert_eq!(position[3], 1.0);
    let p = Vec3::new(position[0], position[1], position[2]);
    assert!(p.y.abs() < 1e-3);

    // Overhead sun on an upward plane: N = L = +Y, so N.L = 1.
    let v = (Vec3::new(0.0, 5.0, 5.0) - p).normalize();
    let h = (Vec3::Y + v).normalize();
    let (n_dot_v, n_dot_h, v_dot_h) = (v.y, h.y, v.dot(h));
    // GGX with alpha = 0.5^2, Smith with k = (0.5 + 1)^2 / 8, Schlick with F0 = 0.04.
    let a2 = 0.25f32 * 0.25;
    let d = a2 / (PI * (n_dot_h * n_dot_h * (a2 - 1.0) + 1.0).powi(2));
    let k = 1.5f32 * 1.5 / 8.0;
    let g = n_dot_v / (n_dot_v * (1.0 - k) + k);
    let f = 0.04 + 0.96 * (1.0 - v_dot_h).powi(5);
    let specular = d * g * f / (4.0 * n_dot_v);
    let ambient = 0.1 * base;
    let expected = ambient + 1.5 * (base + Vec3::splat(specular));

    let composite = scene.renderer.present_image().unwrap();
    assert_close(composite.texel(x, y), expected, 1e-3);
}

#[rstest]
fn test_no_lights_is_ambient_only(mut scene: Scene) {
    let material = Material::rubber(Vec3::new(0.5, 0.6, 0.7));
    let input = ground_input(scene.plane, material.clone());

    let report = scene.renderer.render_frame(&input).unwrap();
    assert_eq!(report.stats.lights, 0);
    assert_eq!(report.stats.shadow_caster, None);
    assert!(report
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::NoShadowCaster)));

    let composite = scene.renderer.present_image().unwrap();
    assert!(all_finite(&composite));
    let expected = 0.1 * material.base_color * material.ambient_occlusion;
    assert_close(composite.texel(SIZE / 2, SIZE / 2), expected, 1e-5);
}

#[rstest]
fn test_background_keeps_clear_color(mut scene: Scene) {
    let mut input = FrameInput::new(Camera::new(Vec3::new(0.0, 0.0, 8.0), Vec3::ZERO));
    let material = input.add_material(Material::default());
    input.add_drawable(Drawable::new(scene.cube, material));
    input.add_light(Light::sun(Vec3::new(0.0, -1.0, -1.0), Vec3::ONE, 1.0));

    scene.renderer.render_frame(&input).unwrap();
    let composite = scene.renderer.present_image().unwrap();
    assert_eq!(composite.texel(0, 0), DEFAULT_CLEAR_COLOR);
    assert_ne!(composite.texel(SIZE / 2, SIZE / 2), DEFAULT_CLEAR_COLOR);
}

#[rstest]
fn test_clip_plane_discards_geometry_below_it(mut scene: Scene) {
    let mut input = ground_input(scene.plane, Material::default());
    input.add_light(Light::sun(Vec3::NEG_Y, Vec3::ONE, 1.0));
    scene.renderer.render_frame(&input).unwrap();
    let lit = scene.renderer.present_image().unwrap();
    assert_ne!(lit.texel(SIZE / 2, SIZE / 2), DEFAULT_CLEAR_COLOR);

    // Keep only y >= 0.5; the ground at y = 0 is clipped away.
    input.camera = input.camera.with_clip_plane(Vec4::new(0.0, 1.0, 0.0, -0.5));
    scene.renderer.render_frame(&input).unwrap();
    let position = scene.renderer.debug_view(GBufferTexture::Position).unwrap();
    assert_eq!(position.texel(SIZE / 2, SIZE / 2)[3], 0.0);
    let clipped = scene.renderer.present_image().unwrap();
    assert_eq!(clipped.texel(SIZE / 2, SIZE / 2), DEFAULT_CLEAR_COLOR);
}

#[test]
fn test_light_overflow_submits_nothing() {
    let mut renderer =
        DeferredRenderer::new(SoftwareBackend::new(), config().with_max_lights(2)).unwrap();
    let plane = renderer.register_mesh(&Mesh::plane(10.0, 10.0, 1));
    let mut input = ground_input(plane, Material::default());
    for i in 0..3 {
        input.add_light(Light::point(
            Vec3::new(i as f32, 2.0, 0.0),
            Vec3::ONE,
            1.0,
            Vec3::new(1.0, 0.1, 0.01),
        ));
    }

    let outcome = renderer.tick(&input).unwrap();
    assert!(!outcome.is_presented());
    let FrameOutcome::Dropped { error } = outcome else {
        panic!("frame with too many lights was presented");
    };
    assert!(matches!(
        error,
        RenderError::CapacityExceeded {
            resource: "lights",
            requested: 3,
            capacity: 2
        }
    ));
    assert_eq!(renderer.backend().submission_count(), 0);
    assert_eq!(renderer.last_presented(), None);
    assert!(renderer
        .take_diagnostics()
        .iter()
        .any(|d| matches!(d, Diagnostic::FrameDropped { .. })));
}

#[test]
fn test_instance_overflow_submits_nothing() {
    let mut renderer =
        DeferredRenderer::new(SoftwareBackend::new(), config().with_max_instances(2)).unwrap();
    let cube = renderer.register_mesh(&Mesh::cube());
    let mut input = FrameInput::new(Camera::default());
    let material = input.add_material(Material::default());
    for i in 0..3 {
        input.add_drawable(
            Drawable::new(cube, material).with_position(Vec3::new(i as f32 * 2.0, 0.0, 0.0)),
        );
    }
    input.add_light(Light::sun(Vec3::new(0.0, -1.0, -1.0), Vec3::ONE, 1.0));

    let FrameOutcome::Dropped { error } = renderer.tick(&input).unwrap() else {
        panic!("frame with too many instances was presented");
    };
    assert!(matches!(
        error,
        RenderError::CapacityExceeded {
            resource: "instances",
            requested: 3,
            capacity: 2
        }
    ));
    assert_eq!(renderer.backend().submission_count(), 0);
    assert_eq!(renderer.last_presented(), None);

    // The next frame within capacity renders normally.
    input.drawables.truncate(2);
    assert!(renderer.tick(&input).unwrap().is_presented());
    assert_eq!(renderer.backend().submission_count(), 1);
}

/// Writes `value` into a fresh backend buffer and reads it back.
fn through_buffer<T: Pod>(backend: &mut SoftwareBackend, value: &T) -> T {
    let bytes = bytemuck::bytes_of(value);
    let buffer = backend
        .create_buffer(&BufferDescriptor {
            label: Some("round trip".to_string()),
            size: bytes.len() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST | BufferUsage::COPY_SRC,
        })
        .unwrap();
    backend.write_buffer(buffer, 0, bytes).unwrap();
    let read = backend.read_buffer(buffer).unwrap();
    backend.destroy_buffer(buffer);
    bytemuck::pod_read_unaligned(&read[..bytes.len()])
}

#[test]
fn test_frame_constants_survive_buffer_upload() {
    let camera = Camera::new(Vec3::new(3.0, 4.0, -2.0), Vec3::new(0.5, 0.0, 1.0))
        .with_clip_plane(Vec4::new(0.0, 1.0, 0.0, -0.25));
    let lights = vec![
        Light::sun(Vec3::new(0.2, -1.0, -0.4), Vec3::new(1.0, 0.9, 0.8), 1.2),
        Light::point(Vec3::new(1.0, 2.0, 3.0), Vec3::X, 2.0, Vec3::new(1.0, 0.2, 0.05)),
    ];
    let materials = vec![Material::plastic(Vec3::new(0.7, 0.4, 0.2)), Material::grass()];
    let shadow = plan_shadow(&lights, &camera, &ShadowConfig::default()).unwrap();
    let buffers = SceneBufferBuilder::new(8, 8)
        .build(&SceneBufferInput {
            camera: &camera,
            lights: &lights,
            materials: &materials,
            ambient: AmbientLight {
                color: Vec3::new(0.2, 0.3, 0.4),
                intensity: 0.5,
            },
            shadow: Some(&shadow),
        })
        .unwrap();

    let mut backend = SoftwareBackend::new();
    assert_eq!(through_buffer(&mut backend, &buffers.scene_constants), buffers.scene_constants);
    assert_eq!(through_buffer(&mut backend, &buffers.fragment_uniforms), buffers.fragment_uniforms);
    assert_eq!(through_buffer(&mut backend, &buffers.uniforms), buffers.uniforms);
    assert_eq!(through_buffer(&mut backend, &buffers.light_constants), buffers.light_constants);
    for light in &buffers.lights {
        assert_eq!(through_buffer(&mut backend, light), *light);
    }
    for material in &buffers.materials {
        assert_eq!(through_buffer(&mut backend, material), *material);
    }
    // Spot-check values carried through, not only bytes.
    let uniforms = through_buffer(&mut backend, &buffers.uniforms);
    assert_eq!(uniforms.clip_plane, camera.clip_plane);
    assert_eq!(uniforms.camera_position, camera.position);
    let fragment = through_buffer(&mut backend, &buffers.fragment_uniforms);
    assert_eq!(fragment.light_count, 2);
    assert_eq!(fragment.shadow_enabled, 1);

    let mut geometry = GeometryArena::new();
    let cube = geometry.add(&Mesh::cube());
    let drawables = vec![
        Drawable::new(cube, MaterialId(1)).with_position(Vec3::new(1.0, 2.0, 3.0)),
        Drawable::new(cube, MaterialId(0)).with_texture(4),
    ];
    let stream = InstanceStreamBuilder::new(16)
        .build(
            &InstanceStreamInput {
                frame: FrameId(0),
                drawables: &drawables,
                morph_overrides: &[],
                geometry: &geometry,
                material_count: materials.len(),
            },
            &Diagnostics::new(),
        )
        .unwrap();
    for record in &stream.instances {
        assert_eq!(through_buffer(&mut backend, record), *record);
    }
    assert_eq!(backend.live_buffers(), 0);
}

#[rstest]
fn test_depth_view_covers_geometry(mut scene: Scene) {
    let mut input = FrameInput::new(Camera::new(Vec3::new(0.0, 0.0, 8.0), Vec3::ZERO));
    let material = input.add_material(Material::default());
    input.add_drawable(Drawable::new(scene.cube, material));
    scene.renderer.render_frame(&input).unwrap();

    let depth = scene.renderer.depth_view().unwrap();
    let center = depth.texel(SIZE / 2, SIZE / 2)[0];
    let corner = depth.texel(0, 0)[0];
    assert!(center < corner, "cube depth {center} not in front of {corner}");
    assert_eq!(corner, 1.0);
}

#[rstest]
#[case::unused(Light::unused())]
#[case::dark_point(Light::point(Vec3::new(0.0, 1.0, 0.0), Vec3::ONE, 0.0, Vec3::new(1.0, 0.0, 0.0)))]
#[case::dark_spot(Light::spot(
    Vec3::new(0.0, 3.0, 0.0),
    SpotCone { direction: Vec3::NEG_Y, angle: 0.5, attenuation: 1.0 },
    Vec3::ONE,
    -1.0,
))]
fn test_inert_lights_leave_image_unchanged(mut scene: Scene, #[case] inert: Light) {
    let mut input = ground_input(scene.plane, Material::plastic(Vec3::splat(0.5)));
    input.add_light(Light::sun(Vec3::new(-0.3, -1.0, -0.2), Vec3::ONE, 1.0));
    scene.renderer.render_frame(&input).unwrap();
    let before = scene.renderer.present_image().unwrap();

    input.add_light(inert);
    scene.renderer.render_frame(&input).unwrap();
    let after = scene.renderer.present_image().unwrap();
    assert_eq!(before.texels, after.texels);
}

#[test]
fn test_packed_lights_unpack_to_the_same_lights() {
    let lights = vec![
        Light::sun(Vec3::new(0.0, -1.0, -1.0), Vec3::ONE, 1.0),
        Light::unused(),
        Light::point(Vec3::new(1.0, 2.0, 3.0), Vec3::X, 2.0, Vec3::new(1.0, 0.2, 0.05)),
        Light::ambient(Vec3::splat(0.3), 0.5),
    ];
    let camera = Camera::default();
    let buffers = SceneBufferBuilder::new(8, 8)
        .build(&SceneBufferInput {
            camera: &camera,
            lights: &lights,
            materials: &[],
            ambient: AmbientLight::default(),
            shadow: None,
        })
        .unwrap();
    assert_eq!(buffers.light_count(), 3);

    let unpacked = unpack_lights(&buffers.lights);
    let expected: Vec<&Light> = lights
        .iter()
        .filter(|l| l.light_type() != LightType::Unused)
        .collect();
    assert_eq!(unpacked.len(), expected.len());
    for (got, want) in unpacked.iter().zip(expected) {
        assert_eq!(got.light_type(), want.light_type());
        assert_eq!(got.color, want.color);
        assert_eq!(got.intensity, want.intensity);
    }
}

#[rstest]
fn test_terrain_frame_counts_patches(mut scene: Scene) {
    let mut input = ground_input(scene.plane, Material::default());
    input.add_light(Light::sun(Vec3::new(0.0, -1.0, -1.0), Vec3::ONE, 1.0));
    let grass = input.add_material(Material::grass());
    input.terrain = Some(Terrain::new(
        Vec2::new(20.0, 20.0),
        2.0,
        UVec2::new(4, 4),
        HeightMap::hills(17),
        grass,
    ));

    let report = scene.renderer.render_frame(&input).unwrap();
    assert_eq!(report.stats.terrain_patches, 16);
    assert!(report.stats.culled_patches <= report.stats.terrain_patches);
    assert!(all_finite(&scene.renderer.present_image().unwrap()));
}

#[rstest]
#[case::one_slot(1)]
#[case::two_slots(2)]
#[case::three_slots(3)]
fn test_deferred_completion_reuses_slots(#[case] frames_in_flight: usize) {
    let backend = SoftwareBackend::with_completion(CompletionMode::Deferred);
    let mut renderer =
        DeferredRenderer::new(backend, config().with_frames_in_flight(frames_in_flight)).unwrap();
    let cube = renderer.register_mesh(&Mesh::cube());
    let mut input = FrameInput::new(Camera::default());
    let material = input.add_material(Material::default());
    input.add_drawable(Drawable::new(cube, material));
    input.add_light(Light::sun(Vec3::new(0.0, -1.0, -1.0), Vec3::ONE, 1.0));

    for _ in 0..5 {
        let report = renderer.render_frame(&input).unwrap();
        assert!(renderer.frame_pool().in_flight() <= frames_in_flight);
        assert!(!report.fence.is_signaled());
    }
    assert_eq!(renderer.backend().submission_count(), 5);
    let image = renderer.present_image().unwrap();
    assert!(all_finite(&image));
}
