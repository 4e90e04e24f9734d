//! Camera frustum supplied by the scene evaluator

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// View and projection of the camera for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraFrustum {
    pub view: Mat4,
    pub projection: Mat4,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraFrustum {
    fn default() -> Self {
        Self::perspective(
            Vec3::new(0.0, 2.0, 6.0),
            Vec3::ZERO,
            45.0,
            16.0 / 9.0,
            0.1,
            100.0,
        )
    }
}

impl CameraFrustum {
    /// Right-handed perspective camera looking from `eye` at `target`.
    pub fn perspective(
        eye: Vec3,
        target: Vec3,
        fov_y_degrees: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> Self {
        Self {
            view: Mat4::look_at_rh(eye, target, Vec3::Y),
            projection: Mat4::perspective_rh(fov_y_degrees.to_radians(), aspect, near, far),
            near,
            far,
        }
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    pub fn position(&self) -> Vec3 {
        self.view.inverse().w_axis.truncate()
    }

    /// World-space corners of the sub-frustum between two view distances.
    ///
    /// Near-plane corners first, then far-plane corners.
    pub fn slice_corners(&self, near: f32, far: f32) -> [Vec3; 8] {
        let inv_view_proj = self.view_projection().inverse();
        let mut corners = [Vec3::ZERO; 8];
        let mut i = 0;
        for z in [0.0, 1.0] {
            for y in [-1.0, 1.0] {
                for x in [-1.0, 1.0] {
                    let p = inv_view_proj * Vec4::new(x, y, z, 1.0);
                    corners[i] = p.truncate() / p.w;
                    i += 1;
                }
            }
        }

        // Interpolate the full frustum edges to the requested distances.
        let range = (self.far - self.near).max(f32::EPSILON);
        let t_near = ((near - self.near) / range).clamp(0.0, 1.0);
        let t_far = ((far - self.near) / range).clamp(0.0, 1.0);
        let mut sliced = [Vec3::ZERO; 8];
        for edge in 0..4 {
            let a = corners[edge];
            let b = corners[edge + 4];
            sliced[edge] = a.lerp(b, t_near);
            sliced[edge + 4] = a.lerp(b, t_far);
        }
        sliced
    }

    /// Uniform block uploaded for geometry passes.
    pub fn uniform(&self) -> CameraUniform {
        let position = self.position();
        CameraUniform {
            view: self.view,
            proj: self.projection,
            view_proj: self.view_projection(),
            position: position.extend(1.0),
            near_far: Vec4::new(self.near, self.far, 0.0, 0.0),
        }
    }
}

/// Camera uniform data
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniform {
    pub view: Mat4,
    pub proj: Mat4,
    pub view_proj: Mat4,
    pub position: Vec4, // w unused
    pub near_far: Vec4, // x=near, y=far, zw unused
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_covers_requested_range() {
        let camera = CameraFrustum::default();
        let full = camera.slice_corners(camera.near, camera.far);
        let half = camera.slice_corners(camera.near, (camera.near + camera.far) * 0.5);

        // Near planes coincide, far plane of the half slice is closer.
        assert!(full[0].distance(half[0]) < 1e-3);
        let eye = camera.position();
        assert!(half[4].distance(eye) < full[4].distance(eye));
    }

    #[test]
    fn test_position_from_view() {
        let camera = CameraFrustum::perspective(Vec3::new(1.0, 2.0, 3.0), Vec3::ZERO, 60.0, 1.0, 0.1, 10.0);
        assert!(camera.position().distance(Vec3::new(1.0, 2.0, 3.0)) < 1e-4);
    }
}
