use crate::constants::{DLNA_FLAGS, DLNA_OP};
use crate::server::PublishedMedia;

/// Escape the five XML special characters for embedding in DIDL documents
pub fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Format a millisecond duration as HH:MM:SS for DIDL `duration` attributes
pub fn format_duration(duration_ms: u64) -> String {
    let total_secs = duration_ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}

/// Build the DIDL-Lite metadata document a renderer receives alongside the
/// transport URI
pub fn didl_metadata(media: &PublishedMedia, media_url: &str) -> String {
    format!(
        r#"<DIDL-Lite xmlns:dc="http://purl.org/dc/elements/1.1/"
    xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/"
    xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/">
    <item id="{id}" parentID="0" restricted="1">
        <dc:title>{title}</dc:title>
        <dc:creator>{creator}</dc:creator>
        <upnp:class>object.item.videoItem</upnp:class>
        <res protocolInfo="http-get:*:video/mp4:DLNA.ORG_PN={profile};DLNA.ORG_OP={op};DLNA.ORG_CI=0;DLNA.ORG_FLAGS={flags}" duration="{duration}">{url}</res>
    </item>
</DIDL-Lite>"#,
        id = escape_xml(&media.id),
        title = escape_xml(&media.title),
        creator = escape_xml(&media.uploader),
        profile = media.quality.dlna_profile(),
        op = DLNA_OP,
        flags = DLNA_FLAGS,
        duration = format_duration(media.duration_ms),
        url = media_url,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::MediaState;
    use crate::settings::VideoQuality;
    use std::path::PathBuf;

    #[test]
    fn escapes_all_special_characters() {
        assert_eq!(
            escape_xml(r#"a & b < c > "d" 'e'"#),
            "a &amp; b &lt; c &gt; &quot;d&quot; &apos;e&apos;"
        );
    }

    #[test]
    fn duration_formats_as_clock() {
        assert_eq!(format_duration(0), "00:00:00");
        assert_eq!(format_duration(61_000), "00:01:01");
        assert_eq!(format_duration(3_725_000), "01:02:05");
    }

    #[test]
    fn metadata_carries_escaped_title_and_url() {
        let media = PublishedMedia {
            id: "vid1".to_string(),
            file_path: PathBuf::from("/tmp/vid1.mp4"),
            title: "Cats & Dogs".to_string(),
            uploader: "some <channel>".to_string(),
            duration_ms: 90_000,
            quality: VideoQuality::P720,
            state: MediaState::Finalized,
        };

        let didl = didl_metadata(&media, "http://192.168.1.2:9000/vid1");
        assert!(didl.contains("Cats &amp; Dogs"));
        assert!(didl.contains("some &lt;channel&gt;"));
        assert!(didl.contains("http://192.168.1.2:9000/vid1"));
        assert!(didl.contains(r#"duration="00:01:30""#));
        assert!(didl.contains("DLNA.ORG_PN=AVC_MP4_MP_HD_720p_AAC"));
    }
}
