//! Light types for the scene

use glam::Vec3;

/// Light kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    /// Infinitely distant light shining along `direction`
    Directional { direction: Vec3 },
    /// Omnidirectional light at `position`
    Point { position: Vec3, radius: f32 },
}

/// An active light for the frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    pub casts_shadow: bool,
}

impl Light {
    pub fn directional(direction: Vec3) -> Self {
        Self {
            kind: LightKind::Directional { direction },
            color: Vec3::ONE,
            intensity: 1.0,
            casts_shadow: true,
        }
    }

    pub fn point(position: Vec3, radius: f32) -> Self {
        Self {
            kind: LightKind::Point { position, radius },
            color: Vec3::ONE,
            intensity: 1.0,
            casts_shadow: false,
        }
    }

    pub fn with_color(mut self, color: Vec3, intensity: f32) -> Self {
        self.color = color;
        self.intensity = intensity;
        self
    }

    pub fn with_shadow(mut self, casts_shadow: bool) -> Self {
        self.casts_shadow = casts_shadow;
        self
    }

    /// Direction the light travels, if it has one.
    pub fn direction(&self) -> Option<Vec3> {
        match self.kind {
            LightKind::Directional { direction } => Some(direction.normalize_or_zero()),
            LightKind::Point { .. } => None,
        }
    }
}
