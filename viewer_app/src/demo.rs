//! Built-in scene: a spinning textured cube on a checkered floor, lit by two
//! point lights and a sun

use render_core::prelude::*;

const CHECKER_SIZE: u32 = 64;
const CHECKER_CELLS: u32 = 8;

fn checkerboard(dark: [u8; 4], light: [u8; 4]) -> RenderResult<Image> {
    let cell = CHECKER_SIZE / CHECKER_CELLS;
    let mut data = Vec::with_capacity((CHECKER_SIZE * CHECKER_SIZE * 4) as usize);
    for y in 0..CHECKER_SIZE {
        for x in 0..CHECKER_SIZE {
            let texel = if (x / cell + y / cell) % 2 == 0 { dark } else { light };
            data.extend_from_slice(&texel);
        }
    }
    Image::new(CHECKER_SIZE, CHECKER_SIZE, ImageFormat::Rgba8, data)
}

/// Unit cube centred on the origin, one primitive with per-face normals
fn cube(material: usize) -> ScenePrimitive {
    // (normal, tangent axis, bitangent axis)
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ];
    let corners = [(-1.0, -1.0, 0.0, 1.0), (1.0, -1.0, 1.0, 1.0), (1.0, 1.0, 1.0, 0.0), (-1.0, 1.0, 0.0, 0.0)];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (n, t, b) in faces {
        let base = u32::try_from(vertices.len()).unwrap_or(0);
        for (s, r, u, v) in corners {
            let position = [
                0.5 * (n[0] + s * t[0] + r * b[0]),
                0.5 * (n[1] + s * t[1] + r * b[1]),
                0.5 * (n[2] + s * t[2] + r * b[2]),
            ];
            vertices.push(Vertex::new(position, n, [u, v]));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    ScenePrimitive {
        vertices,
        indices,
        material,
    }
}

/// Scene content for the viewer
pub fn scene_data() -> RenderResult<SceneData> {
    let cube_mesh = SceneMesh {
        primitives: vec![cube(0)],
    };
    let floor_mesh = SceneMesh {
        primitives: vec![cube(1)],
    };

    Ok(SceneData {
        images: vec![
            checkerboard([200, 80, 40, 255], [240, 220, 200, 255])?,
            checkerboard([40, 40, 48, 255], [150, 150, 160, 255])?,
        ],
        materials: vec![SceneMaterial { albedo: Some(0) }, SceneMaterial { albedo: Some(1) }],
        meshes: vec![cube_mesh, floor_mesh],
        mesh_instances: vec![
            SceneMeshInstance {
                mesh: 0,
                transform: Mat4::identity(),
            },
            SceneMeshInstance {
                mesh: 1,
                transform: Mat4::new_translation(&Vec3::new(0.0, -1.0, 0.0))
                    * Mat4::new_nonuniform_scaling(&Vec3::new(8.0, 0.2, 8.0)),
            },
        ],
        lights: vec![
            SceneLight {
                kind: SceneLightKind::Point { range: Some(8.0) },
                transform: Mat4::new_translation(&Vec3::new(2.0, 2.0, 2.0)),
                color: Vec3::new(1.0, 0.85, 0.7),
                intensity: 6.0,
            },
            SceneLight {
                kind: SceneLightKind::Point { range: Some(6.0) },
                transform: Mat4::new_translation(&Vec3::new(-2.5, 1.0, -1.0)),
                color: Vec3::new(0.4, 0.6, 1.0),
                intensity: 4.0,
            },
            SceneLight {
                kind: SceneLightKind::Directional,
                // Tilt -Z down towards the floor
                transform: Mat4::from_euler_angles(-0.9, 0.4, 0.0),
                color: Vec3::new(1.0, 0.98, 0.9),
                intensity: 0.8,
            },
        ],
    })
}

/// Camera placed up and back, looking at the origin
pub fn camera_transform() -> Mat4 {
    let eye = nalgebra::Point3::new(0.0, 1.5, 4.0);
    let target = nalgebra::Point3::origin();
    // look_at_rh builds world-to-view; the camera wants view-to-world
    Mat4::look_at_rh(&eye, &target, &Vec3::y())
        .try_inverse()
        .unwrap_or_else(Mat4::identity)
}

/// Rotation about +Y by `angle` radians
pub fn spin_transform(angle: f32) -> Mat4 {
    Mat4::from_axis_angle(&Vec3::y_axis(), angle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_scene_is_consistent() {
        let data = scene_data().unwrap();
        assert!(data.validate().is_ok());
        assert_eq!(data.meshes[0].primitives[0].vertices.len(), 24);
        assert_eq!(data.meshes[0].primitives[0].indices.len(), 36);
    }

    #[test]
    fn test_cube_normals_point_outward() {
        let primitive = cube(0);
        for vertex in &primitive.vertices {
            let p = Vec3::from(vertex.position);
            let n = Vec3::from(vertex.normal);
            assert!((p.dot(&n) - 0.5).abs() < 1e-6);
        }
    }
}
