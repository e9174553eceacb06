//! CLI presentation: tree listings as tables or JSON.

use crate::trees::Tree;
use comfy_table::Table;

pub fn format_trees_table(trees: &[Tree]) -> String {
    if trees.is_empty() {
        return "No trees stored.".to_string();
    }

    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Species", "Latitude", "Longitude", "Address", "Planted"]);
    for tree in trees {
        table.add_row(vec![
            tree.species.clone(),
            format!("{:.5}", tree.latitude),
            format!("{:.5}", tree.longitude),
            tree.address.clone().unwrap_or_else(|| "-".to_string()),
            tree.planted_on.clone().unwrap_or_else(|| "-".to_string()),
        ]);
    }
    format!("{table}\n{} tree(s)", trees.len())
}

pub fn format_trees_json(trees: &[Tree]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(trees)
}
