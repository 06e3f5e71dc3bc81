pub mod address_list;
pub mod args;

pub use address_list::{parse_address_lines, read_address_file};
pub use args::{parse_runtime_args, RunMode, USAGE};
