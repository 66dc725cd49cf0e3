//! Canned reply frame and packet dumps for the network relay.

use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::{
    EthernetAddress, EthernetFrame, EthernetProtocol, EthernetRepr, IpAddress, IpProtocol,
    Ipv4Address, Ipv4Packet, Ipv4Repr, PrettyPrinter, UdpPacket, UdpRepr,
};

pub const REPLY_SRC_MAC: EthernetAddress = EthernetAddress([0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
pub const REPLY_DST_MAC: EthernetAddress = EthernetAddress([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
pub const REPLY_SRC_IP: Ipv4Address = Ipv4Address([192, 168, 0, 2]);
pub const REPLY_DST_IP: Ipv4Address = Ipv4Address([192, 168, 0, 1]);
pub const REPLY_TTL: u8 = 100;
pub const REPLY_PORT: u16 = 1;
pub const REPLY_PAYLOAD: &[u8] = b"test";

/// Build the fixed Ethernet/IPv4/UDP frame sent back for every guest frame.
///
/// Length and checksum fields are computed; the result is the same on
/// every call.
pub fn synthesize_reply() -> Vec<u8> {
    let eth = EthernetRepr {
        src_addr: REPLY_SRC_MAC,
        dst_addr: REPLY_DST_MAC,
        ethertype: EthernetProtocol::Ipv4,
    };
    let udp = UdpRepr {
        src_port: REPLY_PORT,
        dst_port: REPLY_PORT,
    };
    let udp_len = udp.header_len() + REPLY_PAYLOAD.len();
    let ip = Ipv4Repr {
        src_addr: REPLY_SRC_IP,
        dst_addr: REPLY_DST_IP,
        next_header: IpProtocol::Udp,
        payload_len: udp_len,
        hop_limit: REPLY_TTL,
    };

    let checksums = ChecksumCapabilities::default();
    let mut buf = vec![0u8; eth.buffer_len() + ip.buffer_len() + udp_len];

    let mut frame = EthernetFrame::new_unchecked(&mut buf[..]);
    eth.emit(&mut frame);

    let mut packet = Ipv4Packet::new_unchecked(frame.payload_mut());
    ip.emit(&mut packet, &checksums);

    let mut datagram = UdpPacket::new_unchecked(packet.payload_mut());
    udp.emit(
        &mut datagram,
        &IpAddress::Ipv4(REPLY_SRC_IP),
        &IpAddress::Ipv4(REPLY_DST_IP),
        REPLY_PAYLOAD.len(),
        |payload| payload.copy_from_slice(REPLY_PAYLOAD),
        &checksums,
    );

    buf
}

/// Human-readable layer dump of an Ethernet frame.
///
/// Undecodable input still produces text describing the failure.
pub fn describe_packet(frame: &[u8]) -> String {
    PrettyPrinter::<EthernetFrame<&'static [u8]>>::new("", &frame).to_string()
}
