pub mod cover;
pub mod excerpt;

pub use cover::extract_cover_image;
pub use excerpt::extract_excerpt;
