// Protocol constants. The SSDP search targets and DLNA content-feature
// values are observed working values; renderers are picky about them, so
// they are kept exactly as captured.

/// SSDP multicast group
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250";

/// SSDP multicast port
pub const SSDP_PORT: u16 = 1900;

/// MX value advertised in M-SEARCH requests (seconds a device may delay)
pub const SSDP_MX: u32 = 5;

/// Search targets queried during one discovery session
pub const SSDP_SEARCH_TARGETS: [&str; 5] = [
    "ssdp:all",
    "upnp:rootdevice",
    "urn:schemas-upnp-org:device:MediaRenderer:1",
    "urn:schemas-upnp-org:device:MediaServer:1",
    "urn:schemas-upnp-org:service:AVTransport:1",
];

/// Service type whose control URL is required for playback
pub const AVTRANSPORT_SERVICE: &str = "urn:schemas-upnp-org:service:AVTransport:1";

/// Optional volume/mute control service type
pub const RENDERING_CONTROL_SERVICE: &str = "urn:schemas-upnp-org:service:RenderingControl:1";

/// Device-type fragment identifying a playback target
pub const MEDIA_RENDERER_MARKER: &str = "MediaRenderer";

/// DLNA.ORG_FLAGS value for streamed progressive MP4
pub const DLNA_FLAGS: &str = "01700000000000000000000000000000";

/// DLNA operations parameter: range seek supported
pub const DLNA_OP: &str = "11";
