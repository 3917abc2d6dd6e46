use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;
use tracing::warn;

use crate::constants::{AVTRANSPORT_SERVICE, MEDIA_RENDERER_MARKER, RENDERING_CONTROL_SERVICE};
use crate::discovery::ssdp::SsdpReply;
use crate::error::{Error, Result};

/// Flat description of one discovered device, one per unique location URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlnaDeviceDescription {
    pub usn: String,
    pub search_target: String,
    pub location: String,
    pub friendly_name: String,
    pub manufacturer: String,
    pub model_name: String,
    pub device_type: String,
    pub av_transport_url: Option<String>,
    pub rendering_control_url: Option<String>,
}

impl DlnaDeviceDescription {
    /// A device can be driven iff it exposes an AVTransport control URL
    pub fn is_playable(&self) -> bool {
        self.av_transport_url.is_some()
    }

    pub fn is_media_renderer(&self) -> bool {
        self.device_type.contains(MEDIA_RENDERER_MARKER)
    }
}

/// Fetch and parse the description document behind one SSDP reply.
///
/// Any failure (network, parse, missing device element) yields None so a
/// single broken device never aborts the discovery session.
pub async fn fetch_device_description(
    client: &Client,
    reply: SsdpReply,
) -> Option<DlnaDeviceDescription> {
    match try_fetch(client, &reply).await {
        Ok(description) => Some(description),
        Err(e) => {
            warn!("Discarding device at {}: {}", reply.location, e);
            None
        }
    }
}

async fn try_fetch(client: &Client, reply: &SsdpReply) -> Result<DlnaDeviceDescription> {
    let response = client
        .get(&reply.location)
        .send()
        .await
        .map_err(Error::network)?;

    if !response.status().is_success() {
        return Err(Error::Network(format!(
            "description fetch returned status {}",
            response.status()
        )));
    }

    let body = response.text().await.map_err(Error::network)?;
    parse_description(&body, reply)
}

#[derive(Default)]
struct DeviceFields {
    friendly_name: Option<String>,
    manufacturer: Option<String>,
    model_name: Option<String>,
    device_type: Option<String>,
}

/// Parse a device description document, resolving relative control URLs
/// against the description's own base URL.
pub fn parse_description(xml: &str, reply: &SsdpReply) -> Result<DlnaDeviceDescription> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut seen_device = false;
    let mut fields = DeviceFields::default();
    let mut av_transport_url: Option<String> = None;
    let mut rendering_control_url: Option<String> = None;

    let mut in_service = false;
    let mut service_type = String::new();
    let mut control_url = String::new();
    let mut current_tag: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match name.as_str() {
                    "device" => seen_device = true,
                    "service" => {
                        in_service = true;
                        service_type.clear();
                        control_url.clear();
                    }
                    _ => current_tag = Some(name),
                }
            }
            Ok(Event::Text(ref t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| Error::Discovery(format!("bad description text: {}", e)))?
                    .trim()
                    .to_string();
                if text.is_empty() {
                    continue;
                }
                let Some(ref tag) = current_tag else { continue };
                if in_service {
                    match tag.as_str() {
                        "serviceType" => service_type = text,
                        "controlURL" => control_url = text,
                        _ => {}
                    }
                } else if seen_device {
                    // first occurrence wins, matching a top-down document scan
                    match tag.as_str() {
                        "friendlyName" => fields.friendly_name.get_or_insert(text),
                        "manufacturer" => fields.manufacturer.get_or_insert(text),
                        "modelName" => fields.model_name.get_or_insert(text),
                        "deviceType" => fields.device_type.get_or_insert(text),
                        _ => continue,
                    };
                }
            }
            Ok(Event::End(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name == "service" {
                    if service_type == AVTRANSPORT_SERVICE && av_transport_url.is_none() {
                        av_transport_url = resolve_control_url(&reply.location, &control_url);
                    }
                    if service_type == RENDERING_CONTROL_SERVICE && rendering_control_url.is_none()
                    {
                        rendering_control_url = resolve_control_url(&reply.location, &control_url);
                    }
                    in_service = false;
                }
                current_tag = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::Discovery(format!("description parse error: {}", e)));
            }
            _ => {}
        }
    }

    if !seen_device {
        return Err(Error::Discovery(
            "description has no device element".to_string(),
        ));
    }

    let unknown = || "unknown".to_string();
    Ok(DlnaDeviceDescription {
        usn: reply.usn.clone(),
        search_target: reply.search_target.clone(),
        location: reply.location.clone(),
        friendly_name: fields.friendly_name.unwrap_or_else(unknown),
        manufacturer: fields.manufacturer.unwrap_or_else(unknown),
        model_name: fields.model_name.unwrap_or_else(unknown),
        device_type: fields.device_type.unwrap_or_else(unknown),
        av_transport_url,
        rendering_control_url,
    })
}

/// Resolve a control URL against the scheme/host/port of the description
/// document. Absolute URLs pass through untouched.
fn resolve_control_url(base: &str, control: &str) -> Option<String> {
    if control.is_empty() {
        return None;
    }
    let mut base_url = Url::parse(base).ok()?;
    base_url.set_path("/");
    base_url.set_query(None);
    base_url.join(control).ok().map(|u| u.to_string())
}
