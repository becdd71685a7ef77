use std::error::Error;
use std::sync::Arc;

use glam::{Affine3A, Quat, UVec3, Vec3};
use volume_label::{
    LabelFormat, LabelStatus, LabelerConfig, LinearColor, VolumeLabeler, WorldParameters,
    create_labeling_volume_with_format, init_labeling_volume, mapping,
};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;
    log::info!("using adapter {:?}", adapter.get_info().name);

    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        required_features: wgpu::Features::empty(),
        required_limits: wgpu::Limits::default(),
        label: Some("label-demo"),
        memory_hints: wgpu::MemoryHints::Performance,
        trace: wgpu::Trace::Off,
    }))?;

    let labeler = VolumeLabeler::new(
        Arc::new(device),
        Arc::new(queue),
        LabelerConfig::default().with_warm_format(LabelFormat::Rgba8Unorm),
    )?;

    let dims = UVec3::new(128, 128, 64);
    let volume =
        create_labeling_volume_with_format(&labeler, "ct_labels", dims, LabelFormat::Rgba8Unorm)?;

    // Scan placed one meter up and rotated a quarter turn around z.
    let world = WorldParameters::new(
        Affine3A::from_scale_rotation_translation(
            Vec3::splat(2.0),
            Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
            Vec3::new(0.0, 0.0, 100.0),
        ),
        Vec3::new(50.0, 50.0, 25.0),
    );

    let brushes = [
        (Vec3::new(0.0, 0.0, 100.0), 20.0, LinearColor::gray(0.5)),
        (Vec3::new(30.0, -10.0, 110.0), 12.0, LinearColor::WHITE),
        (Vec3::new(-40.0, 25.0, 90.0), 8.0, LinearColor::new(1.0, 0.0, 0.0, 1.0)),
    ];
    for (center, radius, color) in brushes {
        let region = mapping::brush_region(&world, center, radius, volume.dimensions());
        let status = labeler.label_sphere(&volume, center, radius, &world, color);
        log::info!("brush at {center:?} r={radius} -> {region:?}: {status:?}");
    }

    if let LabelStatus::Failed(e) = init_labeling_volume(&labeler, &volume, dims) {
        log::warn!("could not reset volume: {e}");
    }

    labeler.flush()?;
    log::info!(
        "{} dispatches, {} uploads, {} commands executed",
        labeler.stats().dispatches(),
        labeler.stats().uploads(),
        labeler.queue_counters().executed()
    );
    Ok(())
}
