use log::{debug, info, warn};
use quick_xml::events::BytesText;
use quick_xml::Writer;

use super::{Payload, RestRequest, TeamCityClient};
use crate::auth::SessionToken;
use crate::error::{CiRerunError, Result};
use crate::providers::teamcity::types::{TriggerRequest, TriggeredBuild};
use crate::providers::teamcity::xml::XmlError;

const BUILD_QUEUE_PATH: &str = "httpAuth/app/rest/buildQueue";

/// Submissions made before a queue response without a build link is given up.
pub const MAX_TRIGGER_ATTEMPTS: u32 = 2;

/// A queued build and the session to keep using.
#[derive(Debug)]
pub struct Triggered {
    pub build: TriggeredBuild,
    pub session: Option<SessionToken>,
}

impl TriggerRequest {
    /// Serializes the request into TeamCity's `buildQueue` XML body.
    ///
    /// ```xml
    /// <build branchName="...">
    ///   <buildType id="..."/>
    ///   <triggeringOptions queueAtTop="true"/>
    ///   <comment><text>...</text></comment>
    ///   <lastChanges><change id="..." personal="false"/></lastChanges>
    ///   <properties><property name="..." value="..."/></properties>
    /// </build>
    /// ```
    pub fn to_xml(&self) -> std::result::Result<String, XmlError> {
        let mut writer = Writer::new(Vec::new());

        writer
            .create_element("build")
            .with_attribute(("branchName", self.branch_name()))
            .write_inner_content(|w| {
                w.create_element("buildType")
                    .with_attribute(("id", self.build_type_id.as_str()))
                    .write_empty()?;

                if self.queue_at_top {
                    w.create_element("triggeringOptions")
                        .with_attribute(("queueAtTop", "true"))
                        .write_empty()?;
                }

                if let Some(comment) = self.comment.as_deref().filter(|c| !c.is_empty()) {
                    w.create_element("comment").write_inner_content(|w| {
                        w.create_element("text")
                            .write_text_content(BytesText::new(comment))?;
                        Ok::<(), quick_xml::Error>(())
                    })?;
                }

                if let Some(change) = self.base_change.as_deref().filter(|c| !c.is_empty()) {
                    w.create_element("lastChanges").write_inner_content(|w| {
                        w.create_element("change")
                            .with_attribute(("id", change))
                            .with_attribute(("personal", "false"))
                            .write_empty()?;
                        Ok::<(), quick_xml::Error>(())
                    })?;
                }

                w.create_element("properties").write_inner_content(|w| {
                    for (name, value) in &self.properties {
                        w.create_element("property")
                            .with_attribute(("name", name.as_str()))
                            .with_attribute(("value", value.as_str()))
                            .write_empty()?;
                    }
                    Ok::<(), quick_xml::Error>(())
                })?;

                Ok::<(), quick_xml::Error>(())
            })?;

        String::from_utf8(writer.into_inner()).map_err(|e| XmlError::Utf8(e.utf8_error()))
    }
}

impl TeamCityClient {
    /// Puts a build into the queue.
    ///
    /// The response must contain a `build` entry with an `href`. When it does
    /// not, the whole submission is repeated, up to [`MAX_TRIGGER_ATTEMPTS`]
    /// submissions in total.
    ///
    /// # Errors
    ///
    /// Returns [`CiRerunError::TriggerFailed`] when no submission produced a
    /// build link, or [`CiRerunError::Payload`] when the request cannot be
    /// serialized.
    pub async fn trigger_build(
        &self,
        request: &TriggerRequest,
        session: Option<SessionToken>,
    ) -> Result<Triggered> {
        info!(
            "------ Triggering build configuration {} ------",
            request.build_type_id
        );

        let payload = request.to_xml()?;
        debug!("build request:\n{payload}");

        let mut session = session;

        for attempt in 1..=MAX_TRIGGER_ATTEMPTS {
            info!("Submitting build request (attempt {attempt} of {MAX_TRIGGER_ATTEMPTS})");

            let reply = match self
                .call(&RestRequest::post_xml(BUILD_QUEUE_PATH, &payload), session.take())
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("--- Retry attempt {attempt} of {MAX_TRIGGER_ATTEMPTS}: {e} ---");
                    session = e.session();
                    continue;
                }
            };

            session = reply.session;

            let entry = reply
                .data
                .as_ref()
                .and_then(Payload::as_value)
                .and_then(|value| value.get("build"));

            match entry {
                Some(entry) => match TriggeredBuild::from_value(entry) {
                    Some(build) => return Ok(Triggered { build, session }),
                    None => {
                        warn!(
                            "--- Retry attempt {attempt} of {MAX_TRIGGER_ATTEMPTS}: build link not found in the response ---"
                        );
                        debug!("{entry}");
                    }
                },
                None => {
                    warn!(
                        "--- Retry attempt {attempt} of {MAX_TRIGGER_ATTEMPTS}: no build response received ---"
                    );
                    if let Some(data) = &reply.data {
                        debug!("{data:?}");
                    }
                }
            }
        }

        Err(CiRerunError::TriggerFailed {
            attempts: MAX_TRIGGER_ATTEMPTS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::teamcity::client::tests::test_client;
    use mockito::Matcher;

    const QUEUED: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><build id="900" buildTypeId="Cfg1" state="queued" href="/app/rest/buildQueue/id:900" webUrl="https://tc.example.com/viewQueued.html?itemId=900"><buildType id="Cfg1"/></build>"#;

    fn release_request() -> TriggerRequest {
        let mut request = TriggerRequest::new("Cfg1");
        request.branch = "release/1.0".into();
        request.properties.insert("a".into(), "1".into());
        request.properties.insert("b".into(), "2".into());
        request
    }

    #[test]
    fn test_minimal_payload() {
        assert_eq!(
            release_request().to_xml().unwrap(),
            concat!(
                r#"<build branchName="release/1.0">"#,
                r#"<buildType id="Cfg1"/>"#,
                r#"<properties><property name="a" value="1"/><property name="b" value="2"/></properties>"#,
                r#"</build>"#
            )
        );
    }

    #[test]
    fn test_full_payload() {
        let mut request = release_request();
        request.branch = "<default>".into();
        request.queue_at_top = true;
        request.comment = Some("rerun of #41".into());
        request.base_change = Some("30".into());

        assert_eq!(
            request.to_xml().unwrap(),
            concat!(
                r#"<build branchName="">"#,
                r#"<buildType id="Cfg1"/>"#,
                r#"<triggeringOptions queueAtTop="true"/>"#,
                r#"<comment><text>rerun of #41</text></comment>"#,
                r#"<lastChanges><change id="30" personal="false"/></lastChanges>"#,
                r#"<properties><property name="a" value="1"/><property name="b" value="2"/></properties>"#,
                r#"</build>"#
            )
        );
    }

    #[test]
    fn test_property_order_follows_insertion() {
        let mut request = TriggerRequest::new("Cfg1");
        request.properties.insert("zeta".into(), "1".into());
        request.properties.insert("alpha".into(), "2".into());

        let xml = request.to_xml().unwrap();
        let zeta = xml.find(r#"name="zeta""#).unwrap();
        let alpha = xml.find(r#"name="alpha""#).unwrap();
        assert!(zeta < alpha);
        assert!(xml.contains("<properties>"));
    }

    #[test]
    fn test_values_are_escaped() {
        let mut request = TriggerRequest::new("Cfg1");
        request.comment = Some("a < b".into());
        request
            .properties
            .insert("env.FLAGS".into(), r#"--name="x" & y"#.into());

        let xml = request.to_xml().unwrap();
        assert!(xml.contains("<text>a &lt; b</text>"));
        assert!(xml.contains(r#"value="--name=&quot;x&quot; &amp; y""#));
    }

    #[tokio::test]
    async fn test_trigger_returns_queued_build() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/app/rest/buildQueue")
            .match_header("content-type", "application/xml")
            .match_body(Matcher::Regex(r#"<buildType id="Cfg1"/>"#.into()))
            .with_status(200)
            .with_body(QUEUED)
            .expect(1)
            .create_async()
            .await;

        let client = test_client(&server.url(), 1);
        let triggered = client.trigger_build(&release_request(), None).await.unwrap();

        assert_eq!(triggered.build.href, "/app/rest/buildQueue/id:900");
        assert_eq!(
            triggered.build.web_url.as_deref(),
            Some("https://tc.example.com/viewQueued.html?itemId=900")
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_link_is_retried_once() {
        let mut server = mockito::Server::new_async().await;
        let without_link = server
            .mock("POST", "/app/rest/buildQueue")
            .with_status(200)
            .with_body(r#"<build id="900" state="queued"/>"#)
            .expect(1)
            .create_async()
            .await;
        let with_link = server
            .mock("POST", "/app/rest/buildQueue")
            .with_status(200)
            .with_body(QUEUED)
            .expect(1)
            .create_async()
            .await;

        let client = test_client(&server.url(), 1);
        let triggered = client.trigger_build(&release_request(), None).await.unwrap();

        assert_eq!(triggered.build.id.as_deref(), Some("900"));
        without_link.assert_async().await;
        with_link.assert_async().await;
    }

    #[tokio::test]
    async fn test_gives_up_after_two_submissions() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/app/rest/buildQueue")
            .with_status(200)
            .with_body("<queued/>")
            .expect(2)
            .create_async()
            .await;

        let client = test_client(&server.url(), 1);
        let err = client
            .trigger_build(&release_request(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, CiRerunError::TriggerFailed { attempts: 2 }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_submission_counts_as_attempt() {
        let mut server = mockito::Server::new_async().await;
        let rejected = server
            .mock("POST", "/app/rest/buildQueue")
            .with_status(400)
            .expect(1)
            .create_async()
            .await;
        let accepted = server
            .mock("POST", "/app/rest/buildQueue")
            .with_status(200)
            .with_body(QUEUED)
            .expect(1)
            .create_async()
            .await;

        let client = test_client(&server.url(), 1);
        let triggered = client.trigger_build(&release_request(), None).await.unwrap();

        assert_eq!(triggered.build.state.as_deref(), Some("queued"));
        rejected.assert_async().await;
        accepted.assert_async().await;
    }
}
