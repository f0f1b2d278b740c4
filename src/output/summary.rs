use comfy_table::{Cell, Color as TableColor};

use crate::providers::teamcity::{BuildRef, BuildSnapshot, TriggeredBuild};

use super::styling::{dim, failure, link, success};
use super::tables::{color_coded_state_cell, create_table};

/// Prints a build or configuration snapshot as a two-column table.
pub fn print_snapshot(build: &BuildRef, snapshot: &BuildSnapshot) {
    println!("{}", render_snapshot(build, snapshot));
}

/// Prints the message for an inspection that produced no snapshot.
pub fn print_unknown_state(build: &BuildRef) {
    println!(
        "{} {}",
        failure("✗"),
        failure(format!(
            "Could not determine the state of {}",
            describe(build)
        ))
    );
}

/// Prints the public URL of a freshly queued build.
pub fn print_triggered(build: &TriggeredBuild, web_url: &str) {
    println!("{}", render_triggered(build, web_url));
}

fn render_triggered(build: &TriggeredBuild, web_url: &str) -> String {
    let mut lines = vec![format!("{} Build Triggered:{}", success("✓"), link(web_url))];
    if let Some(id) = &build.id {
        lines.push(format!("  {}", dim(format!("queue id {id}, {}", build.href))));
    }
    lines.join("\n")
}

fn describe(build: &BuildRef) -> String {
    match build {
        BuildRef::Build(id) => format!("build {id}"),
        BuildRef::Configuration(id) => format!("build configuration {id}"),
    }
}

fn render_snapshot(build: &BuildRef, snapshot: &BuildSnapshot) -> String {
    let mut table = create_table();
    table.set_header(vec![
        Cell::new("Field").fg(TableColor::Cyan),
        Cell::new(describe(build)).fg(TableColor::Cyan),
    ]);

    table.add_row(vec![
        Cell::new("Build type"),
        Cell::new(snapshot.build_type_id.as_deref().unwrap_or("-")),
    ]);
    table.add_row(vec![
        Cell::new("Branch"),
        Cell::new(snapshot.branch_name.as_deref().unwrap_or("<default>")),
    ]);
    table.add_row(vec![
        Cell::new("State"),
        color_coded_state_cell(snapshot.state.as_deref()),
    ]);

    let changes = if snapshot.changes.is_empty() {
        "None".to_string()
    } else {
        snapshot.changes.join(", ")
    };
    table.add_row(vec![Cell::new("Changes"), Cell::new(changes)]);

    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_snapshot_lists_fields() {
        let snapshot = BuildSnapshot {
            build_type_id: Some("Proj_Checks".into()),
            branch_name: None,
            state: Some("finished".into()),
            changes: vec!["10".into(), "30".into()],
        };

        let rendered = render_snapshot(&BuildRef::Build("42".into()), &snapshot);
        assert!(rendered.contains("build 42"));
        assert!(rendered.contains("Proj_Checks"));
        assert!(rendered.contains("<default>"));
        assert!(rendered.contains("finished"));
        assert!(rendered.contains("10, 30"));
    }

    #[test]
    fn test_render_triggered_announces_url_once() {
        let build = TriggeredBuild {
            id: Some("901".into()),
            href: "/app/rest/buildQueue/id:901".into(),
            web_url: Some("https://tc.example.com/viewQueued.html?itemId=901".into()),
            state: Some("queued".into()),
        };

        let rendered = console::strip_ansi_codes(&render_triggered(
            &build,
            "https://tc.example.com/viewQueued.html?itemId=901",
        ))
        .into_owned();

        assert_eq!(rendered.matches("Build Triggered:").count(), 1);
        assert!(rendered.starts_with(
            "✓ Build Triggered:https://tc.example.com/viewQueued.html?itemId=901"
        ));
        assert!(rendered.contains("queue id 901, /app/rest/buildQueue/id:901"));
    }
}
