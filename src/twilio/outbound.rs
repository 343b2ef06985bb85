use crate::config::TwilioConfig;

/// Twilio REST API client: outbound calls and recording downloads.
pub struct TwilioClient {
    client: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl TwilioClient {
    pub fn new(twilio_config: &TwilioConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: twilio_config.api_base.trim_end_matches('/').to_string(),
            account_sid: twilio_config.account_sid.clone(),
            auth_token: twilio_config.auth_token.clone(),
            from_number: twilio_config.phone_number.clone(),
        }
    }

    /// Initiate an outbound call. Twilio will call `to`, and when answered,
    /// POST to `webhook_url` for TwiML. Lifecycle events go to `status_url`.
    pub async fn call(
        &self,
        to: &str,
        webhook_url: &str,
        status_url: &str,
    ) -> Result<String, TwilioError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.api_base, self.account_sid
        );

        let params = [
            ("To", to),
            ("From", self.from_number.as_str()),
            ("Url", webhook_url),
            ("StatusCallback", status_url),
            ("StatusCallbackEvent", "completed"),
        ];

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| TwilioError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(TwilioError::Api(format!("{status}: {body}")));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| TwilioError::Request(e.to_string()))?;

        let call_sid = body["sid"]
            .as_str()
            .ok_or_else(|| TwilioError::Api("response missing call sid".to_string()))?
            .to_string();

        tracing::info!(to, call_sid = %call_sid, "Outbound call initiated");
        Ok(call_sid)
    }

    /// Fetch a call recording as WAV. Twilio serves the media at
    /// `<RecordingUrl>.wav` behind account basic auth.
    ///
    /// Only URLs on the configured API origin are fetched, so the account
    /// credentials never leave for another host.
    pub async fn download_recording(&self, recording_url: &str) -> Result<Vec<u8>, TwilioError> {
        if !self.is_api_url(recording_url) {
            return Err(TwilioError::UntrustedUrl(recording_url.to_string()));
        }
        let url = if recording_url.ends_with(".wav") {
            recording_url.to_string()
        } else {
            format!("{recording_url}.wav")
        };

        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(|e| TwilioError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(TwilioError::Api(format!("recording download {status}")));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| TwilioError::Request(e.to_string()))?;
        tracing::debug!(bytes = bytes.len(), "Downloaded recording");
        Ok(bytes.to_vec())
    }

    fn is_api_url(&self, url: &str) -> bool {
        match (reqwest::Url::parse(url), reqwest::Url::parse(&self.api_base)) {
            (Ok(url), Ok(base)) => url.origin() == base.origin(),
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TwilioError {
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("Twilio API error: {0}")]
    Api(String),
    #[error("refusing to fetch recording from {0}")]
    UntrustedUrl(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> TwilioClient {
        TwilioClient::new(&TwilioConfig {
            account_sid: "AC123".to_string(),
            auth_token: "secret".to_string(),
            phone_number: "+15550001111".to_string(),
            api_base: server.base_url(),
            validate_signatures: false,
        })
    }

    #[tokio::test]
    async fn call_posts_form_and_returns_sid() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/2010-04-01/Accounts/AC123/Calls.json")
                    .header_exists("authorization")
                    .x_www_form_urlencoded_tuple("To", "+15550009999")
                    .x_www_form_urlencoded_tuple("From", "+15550001111");
                then.status(201).json_body(json!({ "sid": "CA42" }));
            })
            .await;

        let sid = client(&server)
            .call(
                "+15550009999",
                "https://clara.example.com/twilio/voice/outreach?job_id=j1",
                "https://clara.example.com/twilio/status",
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(sid, "CA42");
    }

    #[tokio::test]
    async fn call_surfaces_api_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(400).body("invalid To number");
            })
            .await;

        let err = client(&server)
            .call("+1", "https://x/hook", "https://x/status")
            .await
            .unwrap_err();
        assert!(matches!(err, TwilioError::Api(msg) if msg.contains("invalid To number")));
    }

    #[tokio::test]
    async fn recording_download_appends_wav() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/Recordings/RE1.wav");
                then.status(200).body(b"RIFFdata".to_vec());
            })
            .await;

        let bytes = client(&server)
            .download_recording(&format!("{}/Recordings/RE1", server.base_url()))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(bytes, b"RIFFdata");
    }

    #[tokio::test]
    async fn recording_on_another_host_is_not_fetched() {
        let server = MockServer::start_async().await;
        let elsewhere = MockServer::start_async().await;
        let mock = elsewhere
            .mock_async(|when, then| {
                when.any_request();
                then.status(200).body(b"RIFF".to_vec());
            })
            .await;

        let err = client(&server)
            .download_recording(&format!("{}/Recordings/RE1", elsewhere.base_url()))
            .await
            .unwrap_err();

        mock.assert_hits_async(0).await;
        assert!(matches!(err, TwilioError::UntrustedUrl(_)));

        let err = client(&server)
            .download_recording("not a url")
            .await
            .unwrap_err();
        assert!(matches!(err, TwilioError::UntrustedUrl(_)));
    }
}
