use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::styling::{build_state, failure, pending, success};

/// Spinner shown while waiting for the original build to finish.
pub struct WaitProgress {
    pb: ProgressBar,
}

impl WaitProgress {
    pub fn start(build_id: &str) -> Self {
        let pb = create_spinner(pending(format!("Inspecting build {build_id}")).to_string());
        Self { pb }
    }

    pub fn still_running(&self, build_id: &str, poll: u32, budget: u32) {
        self.pb.set_message(
            pending(format!("Build {build_id} still running (poll {poll}/{budget})"))
                .to_string(),
        );
    }

    pub fn finish(self, build_id: &str, state: &str) {
        self.pb.finish_with_message(format!(
            "{} {} {}",
            success(format!("Build {build_id} is")),
            build_state(Some(state)),
            success("✓")
        ));
    }

    pub fn abandon(self, message: &str) {
        self.pb.abandon_with_message(failure(message).to_string());
    }
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {msg} {spinner}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
