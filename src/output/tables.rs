use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use crate::providers::teamcity::RUNNING_STATE;

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn color_coded_state_cell(state: Option<&str>) -> Cell {
    match state {
        Some(RUNNING_STATE) => Cell::new(RUNNING_STATE).fg(TableColor::Yellow),
        Some(state) => Cell::new(state).fg(TableColor::Green),
        None => Cell::new("unknown").fg(TableColor::Red),
    }
}
