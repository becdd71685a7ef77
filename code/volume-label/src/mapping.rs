//! 坐标映射: World space -> texture space conversion for spherical brushes.
//!
//! The volume occupies the unit cube `[0,1]^3` in texture space. Its local
//! origin is the mesh center and the mesh spans `[-mesh_max_bounds,
//! mesh_max_bounds]` on each axis.

use glam::{Affine3A, IVec3, UVec3, Vec3};

/// Placement of a volume in the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldParameters {
    /// Volume-local to world transform.
    pub volume_transform: Affine3A,
    /// Half-extent of the mesh the volume is drawn on, in local units.
    pub mesh_max_bounds: Vec3,
}

impl WorldParameters {
    pub fn new(volume_transform: Affine3A, mesh_max_bounds: Vec3) -> Self {
        Self {
            volume_transform,
            mesh_max_bounds,
        }
    }
}

impl Default for WorldParameters {
    fn default() -> Self {
        Self {
            volume_transform: Affine3A::IDENTITY,
            mesh_max_bounds: Vec3::splat(50.0),
        }
    }
}

/// Voxel-space bounding box of a brush, centered on `center`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrushRegion {
    pub center: IVec3,
    pub size: IVec3,
}

pub fn texture_space_position(world: &WorldParameters, point: Vec3) -> Vec3 {
    let local = world.volume_transform.inverse().transform_point3(point);
    local / world.mesh_max_bounds / 2.0 + 0.5
}

/// Normalized brush diameter.
///
/// Only the local x axis is measured, so a non-uniform transform yields the
/// diameter along that axis rather than a true ellipsoid.
pub fn texture_space_diameter(world: &WorldParameters, radius: f32) -> f32 {
    let local = world
        .volume_transform
        .inverse()
        .transform_vector3(Vec3::new(radius, 0.0, 0.0));
    (local / (world.mesh_max_bounds * 2.0)).length() * 2.0
}

/// Truncating conversion of a normalized position to voxel coordinates.
pub fn voxel_center(normalized: Vec3, dims: UVec3) -> IVec3 {
    (normalized * dims.as_vec3()).as_ivec3()
}

/// Per-axis brush size in voxels.
///
/// The isotropic diameter is scaled by each texture dimension independently.
/// This is exact only when the voxel grid has the same aspect ratio as the
/// mesh bounds; other shapes get an approximate box.
pub fn brush_extent(diameter: f32, dims: UVec3) -> IVec3 {
    (dims.as_vec3() * diameter).as_ivec3()
}

pub fn brush_region(world: &WorldParameters, center: Vec3, radius: f32, dims: UVec3) -> BrushRegion {
    let normalized = texture_space_position(world, center);
    let diameter = texture_space_diameter(world, radius);
    BrushRegion {
        center: voxel_center(normalized, dims),
        size: brush_extent(diameter, dims),
    }
}
