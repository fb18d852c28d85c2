// ── Captive portal policy ──
//
// Only in effect while the device is serving its own access point:
// every DNS name resolves to the device, and connectivity probes or
// unknown paths are sent to the configuration page.

use std::net::Ipv4Addr;

use tally_api::dns;
use tracing::trace;

use crate::model::ConnectivitySummary;

/// Where redirected clients land.
pub const PORTAL_ROOT: &str = "/";

/// Paths operating systems fetch to detect a captive portal.
pub const PROBE_PATHS: &[&str] = &[
    "/generate_204",
    "/gen_204",
    "/hotspot-detect.html",
    "/library/test/success.html",
    "/ncsi.txt",
    "/connecttest.txt",
    "/redirect",
    "/canonical.html",
    "/success.txt",
    "/fwlink",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptivePortal {
    address: Ipv4Addr,
}

impl CaptivePortal {
    /// The active portal, if the access point is up.
    pub fn from_summary(summary: &ConnectivitySummary) -> Option<Self> {
        summary.captive_address().map(|address| Self { address })
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// Answer a raw DNS query with our own address.
    pub fn answer_dns(&self, query: &[u8]) -> Option<Vec<u8>> {
        let response = dns::captive_response(query, self.address);
        if response.is_none() {
            trace!(len = query.len(), "unanswerable DNS packet");
        }
        response
    }

    /// Redirect target for an HTTP path that no route matched.
    pub fn redirect_for(&self, path: &str) -> Option<&'static str> {
        (path != PORTAL_ROOT).then_some(PORTAL_ROOT)
    }

    pub fn is_probe(path: &str) -> bool {
        PROBE_PATHS
            .iter()
            .any(|probe| path.eq_ignore_ascii_case(probe))
    }
}
