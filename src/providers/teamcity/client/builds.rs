use log::warn;

use super::{Payload, RestRequest, TeamCityClient};
use crate::auth::SessionToken;
use crate::providers::teamcity::types::{BuildRef, BuildSnapshot};

/// Outcome of a build inspection.
#[derive(Debug)]
pub struct Inspection {
    /// `None` when the state could not be determined. This does not mean the
    /// build does not exist.
    pub snapshot: Option<BuildSnapshot>,
    pub session: Option<SessionToken>,
}

impl TeamCityClient {
    /// Fetches the current details of a build or build configuration.
    ///
    /// Failures are logged and reported as an empty snapshot rather than an
    /// error.
    pub async fn build_details(
        &self,
        build: &BuildRef,
        session: Option<SessionToken>,
    ) -> Inspection {
        let path = build.rest_path();

        match self.call(&RestRequest::get_json(&path), session).await {
            Ok(reply) => {
                let snapshot = reply
                    .data
                    .as_ref()
                    .and_then(Payload::as_value)
                    .and_then(|value| BuildSnapshot::from_value(build, value));

                if snapshot.is_none() {
                    warn!(
                        "!!! WARNING: {}/{path} returned no usable build details",
                        self.server().origin()
                    );
                }

                Inspection {
                    snapshot,
                    session: reply.session,
                }
            }
            Err(e) => {
                warn!("!!! WARNING: {}/{path} failed: {e}", self.server().origin());
                Inspection {
                    snapshot: None,
                    session: e.session(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::auth::SessionToken;
    use crate::providers::teamcity::client::tests::test_client;
    use crate::providers::teamcity::types::BuildRef;

    #[tokio::test]
    async fn test_running_build_snapshot() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/app/rest/builds/id:1234")
            .with_status(200)
            .with_header("set-cookie", "TCSESSIONID=s1")
            .with_body(
                r#"{"id":1234,"buildTypeId":"Proj_Checks","state":"running","branchName":"main",
                    "lastChanges":{"count":1,"change":[{"id":77,"version":"abc"}]}}"#,
            )
            .create_async()
            .await;

        let client = test_client(&server.url(), 1);
        let inspection = client
            .build_details(&BuildRef::Build("1234".into()), None)
            .await;

        let snapshot = inspection.snapshot.unwrap();
        assert_eq!(snapshot.build_type_id.as_deref(), Some("Proj_Checks"));
        assert_eq!(snapshot.changes, vec!["77"]);
        assert!(snapshot.is_running());
        assert_eq!(inspection.session, Some(SessionToken::from("s1")));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_configuration_uses_build_types_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/app/rest/buildTypes/id:Proj_Checks")
            .with_status(200)
            .with_body(r#"{"id":"Proj_Checks","name":"Checks"}"#)
            .create_async()
            .await;

        let client = test_client(&server.url(), 1);
        let inspection = client
            .build_details(&BuildRef::Configuration("Proj_Checks".into()), None)
            .await;

        assert_eq!(
            inspection.snapshot.unwrap().build_type_id.as_deref(),
            Some("Proj_Checks")
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failures_become_empty_snapshot() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server
            .mock("GET", "/app/rest/builds/id:404")
            .with_status(404)
            .create_async()
            .await;
        let _garbage = server
            .mock("GET", "/app/rest/builds/id:500")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let client = test_client(&server.url(), 1);

        let missing = client
            .build_details(&BuildRef::Build("404".into()), Some(SessionToken::from("s")))
            .await;
        assert!(missing.snapshot.is_none());
        assert!(missing.session.is_none());

        let garbage = client
            .build_details(&BuildRef::Build("500".into()), Some(SessionToken::from("s")))
            .await;
        assert!(garbage.snapshot.is_none());
        assert_eq!(garbage.session, Some(SessionToken::from("s")));
    }
}
