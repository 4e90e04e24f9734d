//! Renderer settings and structural fingerprints
//!
//! Most settings can change every frame without touching GPU resources. A few
//! decide which attachments exist or what the compiled pipelines look like.
//! Passes summarise those into a small comparable fingerprint and only
//! reallocate when it changes.

/// Shadow map configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowSettings {
    pub enabled: bool,
    /// Number of cascades, one array layer each
    pub cascades: u32,
    /// Edge length of each cascade in texels
    pub resolution: u32,
    /// Blend between uniform (0) and logarithmic (1) cascade splits
    pub split_lambda: f32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cascades: 4,
            resolution: 2048,
            split_lambda: 0.5,
        }
    }
}

/// Screen-space ambient occlusion configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SsaoSettings {
    pub enabled: bool,
    /// Resolution relative to the viewport
    pub scale: f32,
    pub radius: f32,
}

impl Default for SsaoSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            scale: 0.5,
            radius: 0.5,
        }
    }
}

/// Environment cubemap configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentSettings {
    pub enabled: bool,
    /// Edge length of each cube face in texels
    pub resolution: u32,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            resolution: 256,
        }
    }
}

/// User-facing settings of a render path
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    /// MSAA sample count for the main geometry pass. 1 disables MSAA.
    pub msaa_samples: u32,
    /// Render the main pass into a floating-point target
    pub hdr: bool,
    pub clear_color: [f32; 4],
    pub shadows: ShadowSettings,
    pub ssao: SsaoSettings,
    pub environment: EnvironmentSettings,
    /// Write per-draw ids for point picking
    pub picking: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            msaa_samples: 1,
            hdr: true,
            clear_color: [0.05, 0.05, 0.08, 1.0],
            shadows: ShadowSettings::default(),
            ssao: SsaoSettings::default(),
            environment: EnvironmentSettings::default(),
            picking: false,
        }
    }
}

/// Structural settings of the main geometry pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeometryFingerprint {
    pub msaa_samples: u32,
    pub hdr: bool,
    pub normals: bool,
    pub ids: bool,
    pub shadows: bool,
    pub environment: bool,
}

impl GeometryFingerprint {
    pub fn of(settings: &RenderSettings) -> Self {
        Self {
            msaa_samples: settings.msaa_samples.max(1),
            hdr: settings.hdr,
            normals: settings.ssao.enabled,
            ids: settings.picking,
            shadows: settings.shadows.enabled,
            environment: settings.environment.enabled,
        }
    }
}

/// Structural settings of the shadow pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShadowFingerprint {
    pub cascades: u32,
    pub resolution: u32,
}

impl ShadowFingerprint {
    pub fn of(settings: &RenderSettings) -> Self {
        Self {
            cascades: settings.shadows.cascades.max(1),
            resolution: settings.shadows.resolution.max(1),
        }
    }
}

/// Structural settings of the environment pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvironmentFingerprint {
    pub resolution: u32,
}

impl EnvironmentFingerprint {
    pub fn of(settings: &RenderSettings) -> Self {
        Self {
            resolution: settings.environment.resolution.max(1),
        }
    }
}

/// Structural settings of the output pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputFingerprint {
    pub ao: bool,
    pub tonemap: bool,
}

impl OutputFingerprint {
    pub fn of(settings: &RenderSettings) -> Self {
        Self {
            ao: settings.ssao.enabled,
            tonemap: settings.hdr,
        }
    }
}

/// Remembers the last fingerprint seen by a pass.
#[derive(Debug, Clone)]
pub struct FingerprintGuard<T> {
    last: Option<T>,
}

impl<T> Default for FingerprintGuard<T> {
    fn default() -> Self {
        Self { last: None }
    }
}

impl<T: PartialEq + Clone> FingerprintGuard<T> {
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Record `next`, returning whether it differs from the previous value.
    ///
    /// The first call always reports a change.
    pub fn changed(&mut self, next: &T) -> bool {
        if self.last.as_ref() == Some(next) {
            return false;
        }
        self.last = Some(next.clone());
        true
    }

    pub fn last(&self) -> Option<&T> {
        self.last.as_ref()
    }

    /// Forget the last value so the next comparison reports a change.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_reports_first_and_changed_values() {
        let mut guard = FingerprintGuard::new();
        let settings = RenderSettings::default();
        let fp = GeometryFingerprint::of(&settings);

        assert!(guard.changed(&fp));
        assert!(!guard.changed(&fp));

        let mut msaa = settings.clone();
        msaa.msaa_samples = 4;
        assert!(guard.changed(&GeometryFingerprint::of(&msaa)));

        guard.reset();
        assert!(guard.changed(&GeometryFingerprint::of(&msaa)));
    }

    #[test]
    fn test_non_structural_settings_keep_fingerprint() {
        let settings = RenderSettings::default();
        let mut tweaked = settings.clone();
        tweaked.clear_color = [1.0, 0.0, 0.0, 1.0];
        tweaked.ssao.radius = 2.0;
        tweaked.shadows.split_lambda = 0.9;

        assert_eq!(
            GeometryFingerprint::of(&settings),
            GeometryFingerprint::of(&tweaked)
        );
        assert_eq!(ShadowFingerprint::of(&settings), ShadowFingerprint::of(&tweaked));
    }
}
