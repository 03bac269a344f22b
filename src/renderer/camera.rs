use glam::{DMat4, DVec3};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    Perspective { fov_y: f64 },
    Ortho { scale: f64 },
}

/// Camera with double precision view and projection
#[derive(Clone, Debug)]
pub struct Camera {
    pub eye: DVec3,
    pub look: DVec3,
    pub up: DVec3,
    pub projection: Projection,
    pub aspect: f64,
    pub near: f64,
    pub far: f64,
    pub view_matrix: DMat4,
    pub proj_matrix: DMat4,
}

impl Camera {
    /// Create a new camera with default settings
    pub fn new() -> Camera {
        let mut camera = Camera {
            eye: DVec3::new(0.0, 0.0, 10.0),
            look: DVec3::ZERO,
            up: DVec3::Y,
            projection: Projection::Perspective {
                fov_y: 60f64.to_radians(),
            },
            aspect: 1.0,
            near: 0.1,
            far: 10000.0,
            view_matrix: DMat4::IDENTITY,
            proj_matrix: DMat4::IDENTITY,
        };
        camera.update();
        camera
    }

    /// Point the camera and rebuild its view matrix
    pub fn look_at(&mut self, eye: DVec3, look: DVec3, up: DVec3) {
        self.eye = eye;
        self.look = look;
        self.up = up;
        self.update();
    }

    /// Update the aspect ratio from the canvas size
    ///
    /// # Arguments
    /// * `canvas_width` - Canvas width in pixels
    /// * `canvas_height` - Canvas height in pixels
    pub fn set_viewport(&mut self, canvas_width: u32, canvas_height: u32) {
        self.aspect = canvas_width as f64 / (canvas_height.max(1)) as f64;
        self.update();
    }

    pub fn set_projection(&mut self, projection: Projection) {
        self.projection = projection;
        self.update();
    }

    fn update(&mut self) {
        self.view_matrix = DMat4::look_at_rh(self.eye, self.look, self.up);
        self.proj_matrix = match self.projection {
            Projection::Perspective { fov_y } => {
                DMat4::perspective_rh_gl(fov_y, self.aspect, self.near, self.far)
            }
            Projection::Ortho { scale } => {
                let half_h = scale * 0.5;
                let half_w = half_h * self.aspect;
                DMat4::orthographic_rh_gl(-half_w, half_w, -half_h, half_h, self.near, self.far)
            }
        };
    }

    pub fn is_perspective(&self) -> bool {
        matches!(self.projection, Projection::Perspective { .. })
    }

    /// Inverse-transpose of the view matrix, for transforming normals
    pub fn view_normal_matrix(&self) -> DMat4 {
        self.view_matrix.inverse().transpose()
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_look_at_places_target_on_negative_z() {
        let mut camera = Camera::new();
        camera.look_at(DVec3::new(0.0, 0.0, 5.0), DVec3::ZERO, DVec3::Y);
        let target = camera.view_matrix.transform_point3(DVec3::ZERO);
        assert!((target.z + 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_viewport_updates_aspect() {
        let mut camera = Camera::new();
        camera.set_viewport(800, 400);
        assert_eq!(camera.aspect, 2.0);
        assert!(camera.is_perspective());
    }
}
