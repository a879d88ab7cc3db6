// passes/mod.rs — Concrete pipeline stages.
//
// | id           | type            | input  | output                          |
// |--------------|-----------------|--------|---------------------------------|
// | rec709-luma  | LumaPass        | quad   | single luma                     |
// | orientation  | OrientationPass | single | single, flipped                 |
// | temporal     | TemporalPass    | any    | same layout, median of 5 frames |
// | bilateral    | BilateralPass   | single | single                          |
// | downscale    | DownscalePass   | any    | same layout, ⌈w/f⌉ × ⌈h/f⌉      |
// | sobel        | StructurePass   | single | single traced luma              |
// | ray-box      | RayBoxPass      | any    | quad overlay                    |
// | hough        | HoughPass       | single | quad overlay                    |
// | dog          | DogPass         | single | quad encoded DoG                |
// | low-cutoff   | LowCutoffPass   | any    | quad, dim channels zeroed       |
// | magnitude-gate | MagnitudeGatePass | any | quad, weak pixels blanked      |
//
// Every pass owns its output buffer and any scratch it needs, and exposes
// a public `settings` field. Settings are read at the start of every
// `apply`, so changes take effect on the next render.

pub mod filters;
pub mod hough;
pub mod ray_box;
pub mod structure;
pub mod temporal;

pub use filters::{
    BilateralPass, BilateralSettings, DogPass, DogSettings, DownscalePass, DownscaleSettings,
    LowCutoffPass, LowCutoffSettings, LumaPass, MagnitudeGatePass, MagnitudeGateSettings,
    OrientationPass, OrientationSettings,
};
pub use hough::{HoughPass, HoughSettings};
pub use ray_box::RayBoxPass;
pub use structure::StructurePass;
pub use temporal::{HistoryRing, TemporalPass, HISTORY_DEPTH};
