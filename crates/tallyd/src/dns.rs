// ── Captive DNS responder ──
//
// While the access point is up, every query arriving on the AP address
// is answered with that address. The socket exists only in AP mode so the
// host's own resolver keeps port 53 otherwise.

use std::net::SocketAddr;

use tally_core::{Appliance, CaptivePortal};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Large enough for any query a client sends over UDP.
const MAX_QUERY: usize = 512;

/// Follow connectivity and answer DNS on `port` whenever a portal is active.
pub async fn run(appliance: Appliance, port: u16, cancel: CancellationToken) {
    let mut changes = appliance.state().subscribe_connectivity();

    loop {
        let portal = CaptivePortal::from_summary(&changes.borrow_and_update());
        let serving = async {
            match portal {
                Some(portal) => serve_portal(portal, port).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            () = serving => {}
        }
    }
    debug!("captive DNS stopped");
}

async fn serve_portal(portal: CaptivePortal, port: u16) {
    let addr = SocketAddr::from((portal.address(), port));
    match UdpSocket::bind(addr).await {
        Ok(socket) => {
            info!(%addr, "captive DNS listening");
            answer_queries(&socket, portal).await;
        }
        Err(e) => warn!(%addr, error = %e, "captive DNS could not bind"),
    }
    // Idle until connectivity changes rather than rebinding in a loop.
    std::future::pending::<()>().await;
}

/// Answer queries on `socket` until a receive fails.
pub async fn answer_queries(socket: &UdpSocket, portal: CaptivePortal) {
    let mut buf = [0u8; MAX_QUERY];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!(error = %e, "captive DNS receive failed");
                return;
            }
        };
        let Some(query) = buf.get(..len) else {
            continue;
        };
        if let Some(response) = portal.answer_dns(query) {
            trace!(%from, "captive DNS answer");
            if let Err(e) = socket.send_to(&response, from).await {
                debug!(%from, error = %e, "captive DNS send failed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use tally_core::{AccessPointInfo, ConnectivitySummary};

    use super::*;

    fn portal(address: Ipv4Addr) -> CaptivePortal {
        CaptivePortal::from_summary(&ConnectivitySummary {
            configured: true,
            access_point: Some(AccessPointInfo {
                ssid: "TSL-Tally-ABCDEF".into(),
                address,
            }),
            ..ConnectivitySummary::default()
        })
        .unwrap()
    }

    fn a_query(id: u16, name: &str) -> Vec<u8> {
        let mut msg = Vec::new();
        msg.extend_from_slice(&id.to_be_bytes());
        msg.extend_from_slice(&[0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0]);
        for label in name.split('.') {
            msg.push(u8::try_from(label.len()).unwrap());
            msg.extend_from_slice(label.as_bytes());
        }
        msg.extend_from_slice(&[0, 0, 1, 0, 1]);
        msg
    }

    #[tokio::test]
    async fn any_name_resolves_to_portal() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let device = Ipv4Addr::new(192, 168, 4, 1);
        let task = tokio::spawn(async move { answer_queries(&server, portal(device)).await });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(&a_query(0x1234, "connectivitycheck.gstatic.com"), server_addr)
            .await
            .unwrap();

        let mut buf = [0u8; 512];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let reply = &buf[..len];
        assert_eq!(&reply[..2], &[0x12, 0x34]);
        assert_eq!(&reply[len - 4..], &device.octets());
        task.abort();
    }

    #[tokio::test]
    async fn garbage_gets_no_answer() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let task = tokio::spawn(async move {
            answer_queries(&server, portal(Ipv4Addr::new(10, 42, 0, 1))).await;
        });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&[1, 2, 3], server_addr).await.unwrap();
        let mut buf = [0u8; 64];
        let reply =
            tokio::time::timeout(Duration::from_millis(200), client.recv_from(&mut buf)).await;
        assert!(reply.is_err());
        task.abort();
    }
}
