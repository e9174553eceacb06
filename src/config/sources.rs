pub mod project_file;
pub mod user_file;
