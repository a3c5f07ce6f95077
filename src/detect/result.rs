/// Outcome of classifying one space on one frame.
///
/// Only `occupied` feeds the debouncer; the remaining fields are diagnostics. Fields a
/// strategy does not compute stay at 0.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SpaceScore {
    /// Raw, undebounced verdict.
    pub occupied: bool,
    /// Foreground pixels over polygon area.
    pub occupation_ratio: f64,
    /// Edge pixels over ROI area.
    pub edge_density: f64,
    /// Bounding rectangle width over height.
    pub roi_aspect: f64,
    /// Largest foreground component width over height.
    pub contour_aspect: f64,
    /// Mean masked Laplacian magnitude.
    pub texture_energy: f64,
}

impl SpaceScore {
    pub fn free() -> Self {
        Self::default()
    }
}
