pub mod cursor;
pub mod page;
pub mod tree;
pub mod verify;

pub use cursor::Cursor;
pub use tree::BTree;
pub use verify::{verify_tree, VerifyReport};
