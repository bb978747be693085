// Database layer module

pub mod memory;
pub mod pool;
pub mod table;

pub use memory::MemoryJobTable;
pub use pool::DbPool;
pub use table::{JobTable, PgJobTable};
