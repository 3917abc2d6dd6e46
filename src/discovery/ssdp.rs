use std::collections::HashMap;

use crate::constants::{SSDP_MULTICAST_ADDR, SSDP_MX, SSDP_PORT};

/// Build one M-SEARCH datagram for the given search target
pub fn build_search_request(search_target: &str) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}:{}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\
         \r\n",
        SSDP_MULTICAST_ADDR, SSDP_PORT, SSDP_MX, search_target
    )
}

/// Parse an SSDP reply into an uppercase-keyed header map.
///
/// The status line is skipped; lines without a colon are ignored. Header
/// names are case-insensitive on the wire, so keys are normalized.
pub fn parse_headers(response: &str) -> HashMap<String, String> {
    response
        .lines()
        .skip(1)
        .filter_map(|line| {
            let idx = line.find(':')?;
            Some((
                line[..idx].trim().to_uppercase(),
                line[idx + 1..].trim().to_string(),
            ))
        })
        .collect()
}

/// The fields of one usable SSDP reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpReply {
    pub usn: String,
    pub search_target: String,
    pub location: String,
}

/// Extract the required headers from a reply, or None for malformed ones
pub fn parse_reply(response: &str) -> Option<SsdpReply> {
    let headers = parse_headers(response);
    Some(SsdpReply {
        usn: headers.get("USN")?.clone(),
        search_target: headers
            .get("ST")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string()),
        location: headers.get("LOCATION")?.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = "HTTP/1.1 200 OK\r\n\
        CACHE-CONTROL: max-age=1800\r\n\
        Location: http://192.168.1.50:8080/description.xml\r\n\
        ST: upnp:rootdevice\r\n\
        usn: uuid:abc::upnp:rootdevice\r\n\
        \r\n";

    #[test]
    fn search_request_shape() {
        let request = build_search_request("upnp:rootdevice");
        assert!(request.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(request.contains("HOST: 239.255.255.250:1900\r\n"));
        assert!(request.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(request.contains("MX: 5\r\n"));
        assert!(request.contains("ST: upnp:rootdevice\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn headers_are_case_insensitive() {
        let headers = parse_headers(REPLY);
        assert_eq!(
            headers.get("LOCATION").map(String::as_str),
            Some("http://192.168.1.50:8080/description.xml")
        );
        assert_eq!(
            headers.get("USN").map(String::as_str),
            Some("uuid:abc::upnp:rootdevice")
        );
    }

    #[test]
    fn reply_parses_required_fields() {
        let reply = parse_reply(REPLY).unwrap();
        assert_eq!(reply.usn, "uuid:abc::upnp:rootdevice");
        assert_eq!(reply.search_target, "upnp:rootdevice");
        assert_eq!(reply.location, "http://192.168.1.50:8080/description.xml");
    }

    #[test]
    fn missing_usn_is_rejected() {
        let reply = "HTTP/1.1 200 OK\r\nLOCATION: http://x/desc.xml\r\n\r\n";
        assert!(parse_reply(reply).is_none());
    }

    #[test]
    fn missing_location_is_rejected() {
        let reply = "HTTP/1.1 200 OK\r\nUSN: uuid:abc\r\n\r\n";
        assert!(parse_reply(reply).is_none());
    }

    #[test]
    fn missing_st_defaults_to_unknown() {
        let reply = "HTTP/1.1 200 OK\r\nUSN: uuid:abc\r\nLOCATION: http://x/d.xml\r\n\r\n";
        assert_eq!(parse_reply(reply).unwrap().search_target, "unknown");
    }
}
