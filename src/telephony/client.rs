//! Telephony control-plane client.
//!
//! Thin typed client over the provider's REST API: outbound call placement,
//! live-call TwiML updates, and conference creation. Requests are
//! form-encoded with basic auth, the way the provider expects.

use std::time::Duration;

use http::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::stream::TelephonyError;

/// Handle to a placed call.
#[derive(Debug, Clone, Deserialize)]
pub struct CallHandle {
    #[serde(rename = "sid")]
    pub call_sid: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Minimal control-plane client for the telephony provider.
#[derive(Clone)]
pub struct TelephonyClient {
    base_url: String,
    account_sid: String,
    auth_token: String,
    /// Caller id used for outbound legs.
    pub phone_number: String,
    client: Client,
}

impl TelephonyClient {
    pub fn new(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        phone_number: impl Into<String>,
    ) -> Self {
        Self::with_base_url("https://api.twilio.com", account_sid, auth_token, phone_number)
    }

    /// Point the client at a different API host (tests, regional endpoints).
    pub fn with_base_url(
        base_url: impl Into<String>,
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        phone_number: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            phone_number: phone_number.into(),
            client: Client::new(),
        }
    }

    fn endpoint(&self, resource: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.account_sid,
            resource
        )
    }

    async fn post_form(
        &self,
        url: String,
        form: &[(&str, &str)],
    ) -> Result<reqwest::Response, TelephonyError> {
        let resp = self
            .client
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(form)
            // Real failures respond quickly; a hung control-plane call must
            // not stall the session loop.
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| TelephonyError::ControlPlane(format!("request failed: {e}")))?;

        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(TelephonyError::ControlPlane(format!(
                "provider returned {status}: {body}"
            )))
        }
    }

    /// Place an outbound call whose media is streamed to `callback_url`.
    ///
    /// The callback URL carries query-string context (appointment id, role)
    /// which the provider echoes back in the stream's custom parameters.
    pub async fn place_call(
        &self,
        from: &str,
        to: &str,
        callback_url: &str,
    ) -> Result<CallHandle, TelephonyError> {
        info!("Placing outbound call to {}", to);
        let url = self.endpoint("Calls.json");
        let resp = self
            .post_form(url, &[("From", from), ("To", to), ("Url", callback_url)])
            .await?;
        resp.json::<CallHandle>()
            .await
            .map_err(|e| TelephonyError::ControlPlane(format!("bad call response: {e}")))
    }

    /// Replace the TwiML of a live call. Used to move a leg into a
    /// conference and to hang up.
    pub async fn update_call(&self, call_sid: &str, twiml: &str) -> Result<(), TelephonyError> {
        debug!("Updating call {} with new TwiML", call_sid);
        let url = self.endpoint(&format!("Calls/{call_sid}.json"));
        self.post_form(url, &[("Twiml", twiml)]).await?;
        Ok(())
    }

    /// Terminate a live call.
    pub async fn hang_up(&self, call_sid: &str) -> Result<(), TelephonyError> {
        self.update_call(call_sid, "<Response><Hangup/></Response>").await
    }

    /// Dial a participant into a named conference. The conference itself is
    /// created by the provider when the first leg joins the room; `twiml_url`
    /// answers the new leg with the conference-join TwiML.
    pub async fn create_conference(
        &self,
        conference_name: &str,
        dial_to: &str,
        twiml_url: &str,
    ) -> Result<CallHandle, TelephonyError> {
        info!("Dialing {} into conference {}", dial_to, conference_name);

        let url = self.endpoint("Calls.json");
        let resp = self
            .post_form(
                url,
                &[
                    ("From", self.phone_number.as_str()),
                    ("To", dial_to),
                    ("Url", twiml_url),
                ],
            )
            .await?;
        resp.json::<CallHandle>()
            .await
            .map_err(|e| TelephonyError::ControlPlane(format!("bad dial response: {e}")))
    }
}

/// TwiML that parks a call in a conference room.
pub fn conference_twiml(conference_name: &str) -> String {
    format!(
        "<Response><Dial><Conference>{}</Conference></Dial></Response>",
        xml_escape(conference_name)
    )
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conference_twiml_escapes_name() {
        let twiml = conference_twiml("deal <&> room");
        assert_eq!(
            twiml,
            "<Response><Dial><Conference>deal &lt;&amp;&gt; room</Conference></Dial></Response>"
        );
    }

    #[test]
    fn test_endpoint_layout() {
        let client = TelephonyClient::with_base_url("https://api.example.com/", "AC1", "tok", "+1555");
        assert_eq!(
            client.endpoint("Calls.json"),
            "https://api.example.com/2010-04-01/Accounts/AC1/Calls.json"
        );
    }
}
