pub mod category;
pub mod comment;
pub mod order;
pub mod post;
pub mod product;
pub mod user;

pub use category::CategoryRepository;
pub use comment::CommentRepository;
pub use order::OrderRepository;
pub use post::PostRepository;
pub use product::{ProductRepository, ProductWriteParams};
pub use user::UserRepository;
