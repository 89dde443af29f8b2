//! End-to-end transport tests over real loopback sockets.

use std::net::{IpAddr, Ipv4Addr, TcpListener};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use trellis_net::{Node, PeerId, UserFd};

fn localhost() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn node() -> Node {
    Node::init(localhost(), 0, None).unwrap()
}

/// Let `node` make progress for a short while.
fn pump(node: &mut Node) {
    node.wait_for_data(Some(Duration::from_millis(10)), &mut [])
        .unwrap();
}

/// Drive both sides until `to` has a message, then deliver it.
fn deliver(from: &mut Node, to: &mut Node) -> (PeerId, Vec<u8>) {
    for _ in 0..100 {
        if to
            .wait_for_data(Some(Duration::from_millis(20)), &mut [])
            .unwrap()
        {
            return to.recv_from().unwrap();
        }
        pump(from);
    }
    panic!("message was never delivered");
}

#[test]
fn single_message() {
    let mut a = node();
    let mut b = node();

    let sent = a.send_to(b.local_id(), b"hi").unwrap();
    assert_eq!(sent, 2);

    let (remote, msg) = deliver(&mut a, &mut b);
    assert_eq!(msg, b"hi");
    assert_eq!(remote, a.local_id());
}

#[test]
fn zero_byte_payload() {
    let mut a = node();
    let mut b = node();

    assert_eq!(a.send_to(b.local_id(), b"").unwrap(), 0);

    let (remote, msg) = deliver(&mut a, &mut b);
    assert!(msg.is_empty());
    assert_eq!(remote, a.local_id());
}

#[test]
fn per_peer_order_is_preserved() {
    let mut a = node();
    let mut b = node();

    for i in 0..3u8 {
        // Wait out the sender between messages; it holds one at a time.
        for _ in 0..100 {
            match a.send_to(b.local_id(), &[i]) {
                Ok(_) => break,
                Err(trellis_net::Error::SenderBusy) => pump(&mut a),
                Err(err) => panic!("send failed: {}", err),
            }
        }
    }

    for i in 0..3u8 {
        let (_, msg) = deliver(&mut a, &mut b);
        assert_eq!(msg, vec![i]);
    }
}

#[test]
fn reconnect_after_peer_restart() {
    let mut a = node();
    let mut b = node();
    let b_addr = b.local_id();

    a.send_to(b_addr, b"one").unwrap();
    assert_eq!(deliver(&mut a, &mut b).1, b"one");

    // Restart the peer on the same port.
    drop(b);
    let mut b = Node::init(localhost(), b_addr.port(), None).unwrap();

    // Let the EOF from the old stream surface, then retry; the dictionary
    // slot reconnects on the next send.
    let mut delivered = false;
    for _ in 0..10 {
        pump(&mut a);
        if a.send_to(b_addr, b"two").is_err() {
            continue;
        }
        if b.wait_for_data(Some(Duration::from_millis(50)), &mut []).unwrap() {
            delivered = true;
            break;
        }
    }
    assert!(delivered, "send never reached the restarted peer");

    let (remote, msg) = b.recv_from().unwrap();
    assert_eq!(msg, b"two");
    assert_eq!(remote, a.local_id());
}

#[test]
fn connect_to_dead_peer_fails_then_recovers() {
    let dead = {
        let probe = TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap()
    };

    let mut a = node();
    assert!(a.send_to(dead, b"x").is_err());

    // A listener appears on that port; the same slot now connects.
    let mut b = Node::init(localhost(), dead.port(), None).unwrap();
    a.send_to(dead, b"x").unwrap();
    assert_eq!(deliver(&mut a, &mut b).1, b"x");
}

#[test]
fn completed_message_outlives_the_sender() {
    let mut a = node();
    let mut b = node();

    a.send_to(b.local_id(), b"parting gift").unwrap();
    for _ in 0..5 {
        pump(&mut a);
    }
    drop(a);

    let (_, msg) = b.recv_from().unwrap();
    assert_eq!(msg, b"parting gift");
}

#[test]
fn wait_for_data_times_out_quietly() {
    let mut a = node();

    assert!(!a
        .wait_for_data(Some(Duration::from_millis(30)), &mut [])
        .unwrap());
}

#[test]
fn user_descriptor_wakes_the_wait() {
    let mut a = node();
    let (mut tx, rx) = UnixStream::pair().unwrap();

    let mut user_fds = [UserFd::from(rx.as_raw_fd())];

    std::io::Write::write_all(&mut tx, b"!").unwrap();
    let woke = a
        .wait_for_data(Some(Duration::from_secs(2)), &mut user_fds)
        .unwrap();

    assert!(woke);
    assert!(user_fds[0].ready);
}

#[test]
fn large_message_crosses_many_scans() {
    let mut a = node();
    let mut b = node();

    let payload: Vec<u8> = (0..200_000u32).map(|i| i as u8).collect();
    a.send_to(b.local_id(), &payload).unwrap();

    let (_, msg) = deliver(&mut a, &mut b);
    assert_eq!(msg, payload);
}
