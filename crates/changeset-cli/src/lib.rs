pub mod cmd;
pub mod output;
pub mod store_path;
