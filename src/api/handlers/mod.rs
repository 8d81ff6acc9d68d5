pub mod health;
pub mod images;

pub use health::{health, live, ready, root};
pub use images::{generate, get_image, list_images};
