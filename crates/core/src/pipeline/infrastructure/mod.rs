pub mod threaded_overlay_loop;
