pub mod frame;
pub mod pool;
pub mod write_order;

pub use frame::Frame;
pub use pool::BufferPool;
pub use write_order::WriteOrderGraph;
