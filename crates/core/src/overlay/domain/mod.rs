pub mod drawing_surface;
pub mod overlay_synchronizer;
