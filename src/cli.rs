//! CLI domain: parse, route, output, and presentation only.
//! No persistence logic; the route table dispatches to the tree data service.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::map_error;
pub use parse::{Cli, Commands, ListFormat};
pub use presentation::{format_trees_json, format_trees_table};
pub use route::RunContext;
