#[cfg(feature = "sdl-display")]
pub mod display;
pub mod persist;
pub mod surface;

#[cfg(feature = "sdl-display")]
pub use display::Sdl2Surface;
pub use persist::{compose_side_by_side, FsPersistence, Persistence};
pub use surface::{HeadlessSurface, KeyCommand, RenderSurface};
