use indexmap::IndexMap;
use log::{debug, error, info};
use std::time::Duration;

use crate::auth::SessionToken;
use crate::error::{CiRerunError, Result};
use crate::output::WaitProgress;

use super::client::{Inspection, TeamCityClient};
use super::types::{latest_change, BuildRef, BuildSnapshot, TriggerRequest, TriggeredBuild};

const DEFAULT_POLL_ATTEMPTS: u32 = 120;
const DEFAULT_POLL_SECONDS: u64 = 30;

/// How long to wait for the original build to leave the `running` state.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Maximum number of inspections of the original build.
    pub attempts: u32,
    /// Delay between two inspections.
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_POLL_ATTEMPTS,
            interval: Duration::from_secs(DEFAULT_POLL_SECONDS),
        }
    }
}

/// What to re-trigger.
#[derive(Debug, Clone)]
pub struct RetriggerRequest {
    /// Build whose branch and revision are reused.
    pub original_build: Option<String>,
    /// Configuration to trigger. Takes precedence over the original build's
    /// configuration.
    pub build_type_id: Option<String>,
    pub properties: IndexMap<String, String>,
    pub comment: Option<String>,
    pub queue_at_top: bool,
    /// Refuse to trigger while the original build is still running.
    pub only_if_finished: bool,
}

impl Default for RetriggerRequest {
    fn default() -> Self {
        Self {
            original_build: None,
            build_type_id: None,
            properties: IndexMap::new(),
            comment: None,
            queue_at_top: false,
            only_if_finished: true,
        }
    }
}

/// A successfully queued re-run.
#[derive(Debug)]
pub struct Retriggered {
    pub web_url: String,
    pub build: TriggeredBuild,
    pub session: Option<SessionToken>,
}

/// Configuration, branch and base change the new build is started with.
#[derive(Debug, PartialEq)]
struct Revision {
    build_type_id: String,
    branch: String,
    base_change: Option<String>,
}

/// TeamCity build re-trigger provider.
///
/// Resolves the branch and change of an original build, waiting for that
/// build to finish when asked to, and queues a new build on the same
/// revision.
pub struct TeamCityProvider {
    pub client: TeamCityClient,
    pub poll: PollPolicy,
}

impl TeamCityProvider {
    pub fn new(client: TeamCityClient, poll: PollPolicy) -> Self {
        Self { client, poll }
    }

    /// Inspects a single build or build configuration.
    pub async fn inspect(&self, build: &BuildRef, session: Option<SessionToken>) -> Inspection {
        self.client.build_details(build, session).await
    }

    /// Queues a new build on the revision of `request.original_build`, or a
    /// fresh build of `request.build_type_id` when no original build is given.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - neither an original build nor a configuration id is given
    /// - the original build cannot be inspected
    /// - the original build is still running after the poll budget while
    ///   `only_if_finished` is set
    /// - the queue never returns a build link, or the queued build has no web URL
    pub async fn retrigger(
        &self,
        request: RetriggerRequest,
        session: Option<SessionToken>,
    ) -> Result<Retriggered> {
        let original_build = request.original_build.as_deref().filter(|id| !id.is_empty());
        let build_type_id = request.build_type_id.as_deref().filter(|id| !id.is_empty());

        let (revision, session) = match (original_build, build_type_id) {
            (Some(original), _) => {
                self.resolve_original(original, build_type_id, request.only_if_finished, session)
                    .await?
            }
            (None, Some(build_type_id)) => (
                Revision {
                    build_type_id: build_type_id.to_owned(),
                    branch: String::new(),
                    base_change: None,
                },
                session,
            ),
            (None, None) => {
                error!("Insufficient input: no original build and no build configuration id");
                return Err(CiRerunError::InsufficientInput);
            }
        };

        let trigger = TriggerRequest {
            build_type_id: revision.build_type_id,
            branch: revision.branch,
            queue_at_top: request.queue_at_top,
            comment: request.comment,
            base_change: revision.base_change,
            properties: request.properties,
        };

        let triggered = self.client.trigger_build(&trigger, session).await?;

        let web_url = triggered
            .build
            .web_url
            .clone()
            .ok_or_else(|| CiRerunError::MissingWebUrl(triggered.build.href.clone()))?;

        debug!("Queued {} as {web_url}", triggered.build.href);

        Ok(Retriggered {
            web_url,
            build: triggered.build,
            session: triggered.session,
        })
    }

    /// Polls the original build until it is no longer running or the poll
    /// budget is spent, then reads its configuration, branch and latest change.
    async fn resolve_original(
        &self,
        original: &str,
        build_type_id: Option<&str>,
        only_if_finished: bool,
        session: Option<SessionToken>,
    ) -> Result<(Revision, Option<SessionToken>)> {
        let budget = if only_if_finished {
            self.poll.attempts.max(1)
        } else {
            1
        };

        let build = BuildRef::Build(original.to_owned());
        let progress = WaitProgress::start(original);
        let mut session = session;
        let mut polls = 0;

        let snapshot: BuildSnapshot = loop {
            let inspection = self.client.build_details(&build, session.take()).await;
            session = inspection.session;

            let Some(snapshot) = inspection.snapshot else {
                progress.abandon(&format!("Original build {original} is invalid"));
                error!("Original build ID is invalid: {original}");
                return Err(CiRerunError::InvalidOriginalBuild(original.to_owned()));
            };

            polls += 1;
            if snapshot.is_running() && polls < budget {
                progress.still_running(original, polls, budget);
                tokio::time::sleep(self.poll.interval).await;
            } else {
                break snapshot;
            }
        };

        if only_if_finished && snapshot.is_running() {
            progress.abandon(&format!("Original build {original} still running"));
            error!("Original build still running, after {budget} attempts. Exit without trigger.");
            return Err(CiRerunError::StillRunning {
                build: original.to_owned(),
                attempts: budget,
            });
        }

        progress.finish(original, snapshot.state.as_deref().unwrap_or("unknown"));

        let build_type_id = build_type_id
            .map(str::to_owned)
            .or(snapshot.build_type_id)
            .ok_or_else(|| CiRerunError::UnknownBuildType(original.to_owned()))?;

        let revision = Revision {
            build_type_id,
            branch: snapshot.branch_name.unwrap_or_default(),
            base_change: latest_change(&snapshot.changes),
        };

        info!(
            "Original build {original}: configuration={}, branch='{}', change={}",
            revision.build_type_id,
            revision.branch,
            revision.base_change.as_deref().unwrap_or("none")
        );

        Ok((revision, session))
    }
}
