pub mod metadata;

pub use metadata::{didl_metadata, escape_xml, format_duration};

use reqwest::Client;
use tracing::{debug, error, info};

use crate::constants::AVTRANSPORT_SERVICE;
use crate::error::{Error, Result};

/// Client for the renderer's AVTransport control endpoint. Exactly two
/// actions are used: SetAVTransportURI followed by Play.
pub struct RemoteControlClient {
    client: Client,
}

impl RemoteControlClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Hand the renderer a media URL and start playback.
    ///
    /// Play is only attempted after SetAVTransportURI succeeded; either
    /// command failing surfaces the rejected action and response status.
    pub async fn play(&self, control_url: &str, media_url: &str, metadata: &str) -> Result<()> {
        info!("Sending playback command to {}", control_url);
        self.set_av_transport_uri(control_url, media_url, metadata)
            .await?;
        self.play_current(control_url).await?;
        Ok(())
    }

    async fn set_av_transport_uri(
        &self,
        control_url: &str,
        media_url: &str,
        metadata: &str,
    ) -> Result<()> {
        let envelope = format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"
            s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
  <s:Body>
    <u:SetAVTransportURI xmlns:u="{service}">
      <InstanceID>0</InstanceID>
      <CurrentURI>{uri}</CurrentURI>
      <CurrentURIMetaData>
      {metadata}
      </CurrentURIMetaData>
    </u:SetAVTransportURI>
  </s:Body>
</s:Envelope>"#,
            service = AVTRANSPORT_SERVICE,
            uri = media_url,
            metadata = metadata,
        );
        self.soap_post(control_url, "SetAVTransportURI", envelope)
            .await
    }

    async fn play_current(&self, control_url: &str) -> Result<()> {
        let envelope = format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"
            s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
  <s:Body>
    <u:Play xmlns:u="{service}">
      <InstanceID>0</InstanceID>
      <Speed>1</Speed>
    </u:Play>
  </s:Body>
</s:Envelope>"#,
            service = AVTRANSPORT_SERVICE,
        );
        self.soap_post(control_url, "Play", envelope).await
    }

    async fn soap_post(&self, control_url: &str, action: &str, envelope: String) -> Result<()> {
        debug!("SOAP {} -> {}", action, control_url);
        let response = self
            .client
            .post(control_url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header(
                "SOAPACTION",
                format!("\"{}#{}\"", AVTRANSPORT_SERVICE, action),
            )
            .body(envelope)
            .send()
            .await
            .map_err(Error::network)?;

        let status = response.status();
        if !status.is_success() {
            error!("{} failed with status {}", action, status);
            return Err(Error::Playback {
                action: action.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
