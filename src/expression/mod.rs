pub mod placeholder;
pub mod switch;
pub mod var_pool;
