//! Renders the demo scene offscreen and writes the composite and G-buffer views as PNGs.

use clap::Parser;
use glam::{UVec2, Vec2, Vec3};
use stellar_deferred::backend::GraphicsBackend;
use stellar_deferred::pipeline::{FrameOutcome, Terrain};
use stellar_deferred::resources::{HeightMap, Material, Mesh};
use stellar_deferred::scene::{
    default_sun_direction, scatter_point_lights, Projection, Transform, FAR, NEAR,
};
use stellar_deferred::{
    init_logging, Camera, DeferredRenderer, Drawable, FrameInput, GBufferTexture, Light,
    LoggingConfig, RendererConfig, SoftwareBackend, TextureReadback,
};
use std::path::{Path, PathBuf};

/// Backend selection for the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliBackend {
    /// CPU rasterizer, always available.
    #[default]
    Software,
    /// Headless GPU through wgpu (requires the `wgpu-backend` feature).
    Wgpu,
}

#[derive(Parser, Debug)]
#[command(
    name = "stellar-headless",
    about = "Render the Stellar demo scene offscreen",
    version
)]
struct Args {
    /// Backend executing the recorded frames.
    #[arg(long, default_value = "software", value_enum)]
    backend: CliBackend,

    /// Output width in pixels.
    #[arg(long, default_value = "320")]
    width: u32,

    /// Output height in pixels.
    #[arg(long, default_value = "180")]
    height: u32,

    /// Number of frames to render before writing images.
    #[arg(long, default_value = "3")]
    frames: u32,

    /// Scattered point lights in addition to the sun.
    #[arg(long, default_value = "8")]
    point_lights: usize,

    /// Seed for the light scatter.
    #[arg(long, default_value = "7")]
    seed: u64,

    /// Include the tessellated terrain.
    #[arg(long)]
    terrain: bool,

    /// Also write albedo, normal, position, specular and shadow views.
    #[arg(long)]
    debug_views: bool,

    /// Directory the PNGs are written to.
    #[arg(long, default_value = "out")]
    output: PathBuf,

    /// Log filter, e.g. `debug` or `stellar_deferred=trace`.
    #[arg(long, default_value = "info")]
    log: String,
}

fn demo_scene<B: GraphicsBackend>(renderer: &mut DeferredRenderer<B>, args: &Args) -> FrameInput {
    let cube = renderer.register_mesh(&Mesh::cube());
    let sphere = renderer.register_mesh(&Mesh::sphere(24, 16));
    let ground = renderer.register_mesh(&Mesh::plane(20.0, 20.0, 1));

    let aspect = args.width as f32 / args.height.max(1) as f32;
    let camera = Camera::new(Vec3::new(0.0, 4.0, 9.0), Vec3::new(0.0, 0.5, 0.0))
        .with_projection(Projection::perspective(60.0, aspect, NEAR, FAR));
    let mut input = FrameInput::new(camera);

    let floor = input.add_material(Material::rubber(Vec3::splat(0.6)));
    let red = input.add_material(Material::plastic(Vec3::new(0.8, 0.1, 0.1)));
    let gold = input.add_material(Material::gold());
    let steel = input.add_material(Material::metal(Vec3::splat(0.7), 0.3));

    input.add_drawable(Drawable::new(ground, floor));
    for i in 0..5 {
        let x = i as f32 * 2.0 - 4.0;
        let material = if i % 2 == 0 { red } else { steel };
        let placement = Transform::from_translation(Vec3::new(x, 0.5, 0.0)).with_yaw(i as f32 * 0.3);
        input.add_drawable(Drawable::new(cube, material).with_transform(placement));
        input.add_drawable(Drawable::new(sphere, gold).with_position(Vec3::new(x, 0.5, -2.5)));
    }

    input.add_light(Light::sun(default_sun_direction(), Vec3::ONE, 1.0));
    input.lights.extend(scatter_point_lights(args.point_lights, 8.0, 1.5, args.seed));

    if args.terrain {
        let grass = input.add_material(Material::grass());
        let terrain = Terrain::new(
            Vec2::new(40.0, 40.0),
            3.0,
            UVec2::new(8, 8),
            HeightMap::hills(65),
            grass,
        )
        .with_transform(glam::Mat4::from_translation(Vec3::new(0.0, -0.05, -25.0)));
        input.terrain = Some(terrain);
    }
    input
}

fn save_png(
    readback: &TextureReadback,
    path: &Path,
    encode: impl Fn([f32; 4]) -> [f32; 4],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut pixels = Vec::with_capacity((readback.width * readback.height * 4) as usize);
    for y in 0..readback.height {
        for x in 0..readback.width {
            for value in encode(readback.texel(x, y)) {
                pixels.push((value.clamp(0.0, 1.0) * 255.0).round() as u8);
            }
        }
    }
    let image = image::RgbaImage::from_raw(readback.width, readback.height, pixels)
        .ok_or("texel count does not match the image size")?;
    image.save(path)?;
    log::info!("Wrote {}", path.display());
    Ok(())
}

/// Maps a G-buffer channel into displayable colors.
fn visualize(channel: GBufferTexture) -> impl Fn([f32; 4]) -> [f32; 4] {
    move |[r, g, b, _]| match channel {
        GBufferTexture::Normal => [r * 0.5 + 0.5, g * 0.5 + 0.5, b * 0.5 + 0.5, 1.0],
        GBufferTexture::Position => [r / 20.0 + 0.5, g / 20.0 + 0.5, b / 20.0 + 0.5, 1.0],
        GBufferTexture::Shadow => [r, r, r, 1.0],
        GBufferTexture::Albedo | GBufferTexture::Specular => [r, g, b, 1.0],
    }
}

fn run<B: GraphicsBackend>(backend: B, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = RendererConfig::default().with_size(args.width, args.height);
    let mut renderer = DeferredRenderer::new(backend, config)?;
    let input = demo_scene(&mut renderer, args);

    for _ in 0..args.frames {
        match renderer.tick(&input)? {
            FrameOutcome::Presented(report) => log::info!(
                "{}: {} batches, {} instances, {} lights, {} of {} terrain patches culled",
                report.frame,
                report.stats.batches,
                report.stats.instances,
                report.stats.lights,
                report.stats.culled_patches,
                report.stats.terrain_patches
            ),
            FrameOutcome::Dropped { error } => log::warn!("Frame dropped: {error}"),
        }
    }

    std::fs::create_dir_all(&args.output)?;
    let composite = renderer.present_image()?;
    save_png(&composite, &args.output.join("composite.png"), |texel| texel)?;
    if args.debug_views {
        for channel in GBufferTexture::ALL {
            let view = renderer.debug_view(channel)?;
            let name = format!("{channel:?}").to_lowercase();
            save_png(&view, &args.output.join(format!("{name}.png")), visualize(channel))?;
        }
    }
    renderer.shutdown()?;
    Ok(())
}

#[cfg(feature = "wgpu-backend")]
fn wgpu_backend() -> stellar_deferred::RenderResult<stellar_deferred::backend::WgpuBackend> {
    Ok(stellar_deferred::backend::WgpuBackend::new_headless()?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&LoggingConfig::default().with_filter(args.log.clone()));
    log::info!("Starting Stellar headless renderer ({:?})", args.backend);

    match args.backend {
        CliBackend::Software => run(SoftwareBackend::new(), &args),
        #[cfg(feature = "wgpu-backend")]
        CliBackend::Wgpu => run(wgpu_backend()?, &args),
        #[cfg(not(feature = "wgpu-backend"))]
        CliBackend::Wgpu => {
            Err("this build has no wgpu backend; rebuild with --features wgpu-backend".into())
        }
    }
}
