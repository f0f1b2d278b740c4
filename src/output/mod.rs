mod progress;
mod styling;
mod summary;
mod tables;

pub use progress::WaitProgress;
use styling::{dim, heading};
pub use summary::{print_snapshot, print_triggered, print_unknown_state};

/// Prints the `cirerun` banner to stderr.
///
/// Displays the tool name, version, and description at the start of execution.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        heading("🔁 cirerun"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("TeamCity build re-trigger tool")
    );
}
