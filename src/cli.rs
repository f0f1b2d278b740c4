use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use log::info;
use std::path::PathBuf;

use cirerun::auth::Credentials;
use cirerun::output;
use cirerun::providers::teamcity::{
    BuildRef, RetriggerRequest, TeamCityClient, TeamCityProvider,
};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "cirerun")]
#[command(author, version, about = "TeamCity build re-trigger tool", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Server hosting TeamCity
    #[arg(short = 'H', long = "teamcity-host", env = "TEAMCITY_URL", global = true)]
    server: Option<String>,

    #[arg(short, long, env = "TEAMCITY_USER", global = true)]
    user: Option<String>,

    #[arg(short, long, env = "TEAMCITY_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verify the server's TLS certificate
    #[arg(long, global = true, default_value_t = false)]
    verify_tls: bool,

    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a new build on the revision of an earlier build
    Retrigger {
        /// Original build ID
        #[arg(short, long, default_value = "")]
        orig_build: String,

        /// Build configuration to trigger
        #[arg(short, long, default_value = "")]
        build_type_id: String,

        /// Other build properties in format "key=value;key=value"
        #[arg(long, default_value = "")]
        other_param: String,

        /// Mark this as a rerun; the configuration must be on the allow-list
        #[arg(short, long, default_value_t = false)]
        rerun: bool,

        #[arg(long)]
        comment: Option<String>,

        /// Put the build at the top of the queue
        #[arg(long, default_value_t = false)]
        top: bool,

        /// Trigger even if the original build is still running
        #[arg(long, default_value_t = false)]
        no_wait: bool,
    },
    /// Show the state of a build or build configuration
    Inspect {
        #[arg(long, required_unless_present = "build_type", conflicts_with = "build_type")]
        build: Option<String>,

        #[arg(long)]
        build_type: Option<String>,

        /// Print the snapshot as JSON
        #[arg(long, default_value_t = false)]
        json: bool,

        #[arg(long, default_value_t = false)]
        pretty: bool,
    },
}

impl Cli {
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    fn server(&self, config: &Config) -> Result<String> {
        self.server
            .clone()
            .or_else(|| config.server.url.clone())
            .context("No TeamCity server given (use --teamcity-host, TEAMCITY_URL or server.url)")
    }

    fn provider(&self, config: &Config, server: &str) -> Result<TeamCityProvider> {
        let user = self
            .user
            .clone()
            .or_else(|| config.server.user.clone())
            .context("No TeamCity user given (use --user, TEAMCITY_USER or server.user)")?;
        let password = self
            .password
            .clone()
            .context("No TeamCity password given (use --password or TEAMCITY_PASSWORD)")?;

        let accept_invalid_certs = config.server.accept_invalid_certs && !self.verify_tls;

        let client = TeamCityClient::new(
            server,
            Credentials::new(user, password),
            config.retry_policy(),
            accept_invalid_certs,
        )?;

        Ok(TeamCityProvider::new(client, config.poll_policy()))
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_retrigger(
        &self,
        config: &Config,
        orig_build: &str,
        build_type_id: &str,
        other_param: &str,
        rerun: bool,
        comment: Option<&str>,
        top: bool,
        no_wait: bool,
    ) -> Result<()> {
        if rerun && !config.rerun.allows(build_type_id) {
            info!("{build_type_id} skipped");
            return Ok(());
        }

        let server = self.server(config)?;
        let properties = build_properties(&server, orig_build, other_param)?;
        let provider = self.provider(config, &server)?;

        let request = RetriggerRequest {
            original_build: Some(orig_build.to_owned()).filter(|id| !id.is_empty()),
            build_type_id: Some(build_type_id.to_owned()).filter(|id| !id.is_empty()),
            properties,
            comment: comment.map(str::to_owned),
            queue_at_top: top,
            only_if_finished: config.poll.only_if_finished && !no_wait,
        };

        let retriggered = provider.retrigger(request, None).await?;
        output::print_triggered(&retriggered.build, &retriggered.web_url);

        Ok(())
    }

    async fn execute_inspect(
        &self,
        config: &Config,
        build: Option<&str>,
        build_type: Option<&str>,
        json: bool,
        pretty: bool,
    ) -> Result<()> {
        let build = match (build, build_type) {
            (Some(id), _) => BuildRef::Build(id.to_owned()),
            (None, Some(id)) => BuildRef::Configuration(id.to_owned()),
            (None, None) => bail!("Either --build or --build-type is required"),
        };

        let server = self.server(config)?;
        let provider = self.provider(config, &server)?;

        let Some(snapshot) = provider.inspect(&build, None).await.snapshot else {
            output::print_unknown_state(&build);
            bail!("Inspection of {} failed", build.id());
        };

        if json {
            let rendered = if pretty {
                serde_json::to_string_pretty(&snapshot)?
            } else {
                serde_json::to_string(&snapshot)?
            };
            println!("{rendered}");
        } else {
            output::print_snapshot(&build, &snapshot);
        }

        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;

        match &self.command {
            Commands::Retrigger {
                orig_build,
                build_type_id,
                other_param,
                rerun,
                comment,
                top,
                no_wait,
            } => {
                self.execute_retrigger(
                    &config,
                    orig_build,
                    build_type_id,
                    other_param,
                    *rerun,
                    comment.as_deref(),
                    *top,
                    *no_wait,
                )
                .await
            }
            Commands::Inspect {
                build,
                build_type,
                json,
                pretty,
            } => {
                self.execute_inspect(
                    &config,
                    build.as_deref(),
                    build_type.as_deref(),
                    *json,
                    *pretty,
                )
                .await
            }
        }
    }
}

/// Properties passed to the new build: the origin of a re-run first, then
/// `key=value` pairs separated by `;`.
fn build_properties(
    server: &str,
    orig_build: &str,
    other_param: &str,
) -> Result<IndexMap<String, String>> {
    let mut properties = IndexMap::new();

    if !orig_build.is_empty() {
        properties.insert("origControlBuildServer".to_owned(), server.to_owned());
        properties.insert("origControlBuildId".to_owned(), orig_build.to_owned());
    }

    for pair in other_param.split(';').map(str::trim).filter(|pair| !pair.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("Invalid --other-param entry '{pair}', expected key=value"))?;
        properties.insert(key.trim().to_owned(), value.to_owned());
    }

    Ok(properties)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_retrigger_arguments() {
        let cli = Cli::try_parse_from([
            "cirerun",
            "retrigger",
            "-H",
            "https://tc.example.com",
            "-u",
            "ci-bot",
            "-p",
            "secret",
            "-o",
            "4711",
            "-b",
            "Proj_ReviewRerun",
            "--other-param",
            "a=1;b=2",
            "--rerun",
        ])
        .unwrap();

        assert_eq!(cli.server.as_deref(), Some("https://tc.example.com"));
        match cli.command {
            Commands::Retrigger {
                orig_build,
                build_type_id,
                rerun,
                no_wait,
                ..
            } => {
                assert_eq!(orig_build, "4711");
                assert_eq!(build_type_id, "Proj_ReviewRerun");
                assert!(rerun);
                assert!(!no_wait);
            }
            Commands::Inspect { .. } => panic!("expected retrigger"),
        }
    }

    #[test]
    fn test_inspect_requires_a_target() {
        assert!(Cli::try_parse_from(["cirerun", "inspect"]).is_err());
        assert!(Cli::try_parse_from(["cirerun", "inspect", "--build", "1", "--build-type", "X"]).is_err());
        assert!(Cli::try_parse_from(["cirerun", "inspect", "--build-type", "X"]).is_ok());
    }

    #[test]
    fn test_build_properties_for_rerun() {
        let properties = build_properties("tc.example.com", "4711", "a=1;b=x=y").unwrap();
        let pairs: Vec<(&str, &str)> = properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        assert_eq!(
            pairs,
            vec![
                ("origControlBuildServer", "tc.example.com"),
                ("origControlBuildId", "4711"),
                ("a", "1"),
                ("b", "x=y"),
            ]
        );
    }

    #[test]
    fn test_build_properties_without_original_build() {
        assert!(build_properties("tc", "", "").unwrap().is_empty());
        assert_eq!(build_properties("tc", "", ";k=v;").unwrap().len(), 1);
    }

    #[test]
    fn test_build_properties_rejects_missing_equals() {
        let err = build_properties("tc", "", "novalue").unwrap_err();
        assert!(err.to_string().contains("novalue"));
    }

    #[test]
    fn test_verify_tls_turns_certificate_checks_on() {
        let args = ["cirerun", "inspect", "--build", "1", "-u", "ci-bot", "-p", "secret"];
        let server = "https://tc.example.com";

        let lenient = Cli::try_parse_from(args).unwrap();
        let provider = lenient.provider(&Config::default(), server).unwrap();
        assert!(provider.client.accepts_invalid_certs());

        let strict = Cli::try_parse_from(args.iter().copied().chain(["--verify-tls"])).unwrap();
        let provider = strict.provider(&Config::default(), server).unwrap();
        assert!(!provider.client.accepts_invalid_certs());

        let mut config = Config::default();
        config.server.accept_invalid_certs = false;
        let provider = lenient.provider(&config, server).unwrap();
        assert!(!provider.client.accepts_invalid_certs());
    }

    #[tokio::test]
    async fn test_rerun_outside_allow_list_is_skipped_without_network() {
        let cli = Cli::try_parse_from(["cirerun", "retrigger", "-b", "Other", "--rerun"]).unwrap();
        let mut config = Config::default();
        config.rerun.allowed_build_types = vec!["Proj_ReviewRerun".to_string()];

        // No server, user or password is configured: reaching the network
        // path would fail.
        cli.execute_retrigger(&config, "", "Other", "", true, None, false, false)
            .await
            .unwrap();
    }
}
