pub mod image_canvas;
pub mod rect_list_surface;
