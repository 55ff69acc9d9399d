//! Whole connections driven through the endpoint, the peer played by hand-written segments.
use alloc::vec;
use alloc::vec::Vec;

use crate::layer::Error;
use crate::layer::ip::Capture;
use crate::layer::socket::{
    CloseToken,
    Completion,
    Config,
    ConnectToken,
    EventId,
    ListenToken,
    Options,
    Outcome,
    RxToken,
    TxToken};
use crate::managed::Key;
use crate::storage::NetBuf;
use crate::wire::{
    Checksum,
    IcmpError,
    IpAddress,
    IpEndpoint,
    TcpFlags,
    TcpOptions,
    TcpPacket,
    TcpRepr,
    TcpSeqNumber,
    TcpTimestamp};

use super::{Congestion, Endpoint, EngineConfig, State, DEFAULT_MSS, RTO_MIN};

const HERE: IpAddress = IpAddress::v4(10, 0, 0, 1);
const THERE: IpAddress = IpAddress::v4(10, 0, 0, 2);
const PEER_PORT: u16 = 4000;

fn engine() -> Endpoint<Capture> {
    let config = EngineConfig { secret: Some([0x42; 16]), ..EngineConfig::default() };
    let mut tcp = Endpoint::new(Capture::new(), config);
    tcp.set_station_address(HERE);
    tcp
}

fn seq(value: i32) -> TcpSeqNumber {
    TcpSeqNumber(value)
}

/// A segment of the peer towards our port 80.
fn repr(flags: TcpFlags, seq_number: TcpSeqNumber, ack_number: TcpSeqNumber, payload_len: usize) -> TcpRepr {
    TcpRepr {
        src_port: PEER_PORT,
        dst_port: 80,
        flags,
        seq_number,
        ack_number,
        window_len: 0xffff,
        urgent_at: 0,
        options: TcpOptions::default(),
        payload_len,
    }
}

fn emit(repr: &TcpRepr, payload: &[u8]) -> Vec<u8> {
    let mut buffer = vec![0; repr.buffer_len()];
    let mut packet = TcpPacket::new_unchecked(&mut buffer[..]);
    repr.emit(&mut packet);
    packet.payload_mut_slice().copy_from_slice(payload);
    packet.fill_checksum(THERE, HERE);
    buffer
}

fn arrive(tcp: &mut Endpoint<Capture>, repr: TcpRepr, payload: &[u8]) {
    let bytes = emit(&repr, payload);
    tcp.segment_arrived(&bytes, THERE, HERE);
}

/// Every segment sent since the last call, with its options and payload.
fn sent(tcp: &mut Endpoint<Capture>) -> Vec<(TcpRepr, Vec<u8>)> {
    tcp.network_mut().take().into_iter().map(|sent| {
        let packet = TcpPacket::new_unchecked(&sent.segment[..]);
        let checksum = Checksum::Manual { src_addr: sent.src, dst_addr: sent.dst };
        let repr = TcpRepr::parse(&packet, checksum).unwrap();
        let options = packet.parse_options().unwrap();
        (TcpRepr { options, ..repr }, packet.payload_slice().to_vec())
    }).collect()
}

fn completions(tcp: &mut Endpoint<Capture>) -> Vec<Completion> {
    tcp.completions().collect()
}

fn tx(event: u64, len: usize) -> TxToken {
    TxToken {
        event: EventId(event),
        data: NetBuf::from_slice(&vec![0xaa; len]),
        push: false,
        urgent: false,
    }
}

/// A listener on port 80 and the connection it accepted from a peer whose SYN had seq 100.
///
/// Returns the engine, the listener, the connection and our initial sequence number.
fn establish(options: Options) -> (Endpoint<Capture>, Key, Key, TcpSeqNumber) {
    establish_offering(options, TcpOptions::default())
}

/// Like `establish`, the peer's SYN carrying `offer`.
fn establish_offering(options: Options, offer: TcpOptions) -> (Endpoint<Capture>, Key, Key, TcpSeqNumber) {
    let mut tcp = engine();
    let listener = tcp.create();
    tcp.configure(listener, Some(Config { options, ..Config::passive(80) })).unwrap();
    tcp.accept(listener, ListenToken { event: EventId(1) }).unwrap();

    let mut syn = repr(TcpFlags::SYN, seq(100), seq(0), 0);
    syn.options = offer;
    arrive(&mut tcp, syn, &[]);
    let iss = sent(&mut tcp)[0].0.seq_number;
    arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), iss + 1, 0), &[]);

    let done = completions(&mut tcp);
    assert_eq!(done.len(), 1);
    let conn = match done[0].outcome {
        Outcome::Accept(Ok(conn)) => conn,
        ref other => panic!("unexpected {:?}", other),
    };
    (tcp, listener, conn, iss)
}

#[test]
fn passive_open() {
    let mut tcp = engine();
    let listener = tcp.create();
    tcp.configure(listener, Some(Config::passive(80))).unwrap();
    tcp.accept(listener, ListenToken { event: EventId(1) }).unwrap();

    arrive(&mut tcp, repr(TcpFlags::SYN, seq(100), seq(0), 0), &[]);
    let synack = sent(&mut tcp);
    assert_eq!(synack.len(), 1);
    let (synack, _) = &synack[0];
    assert_eq!(synack.flags, TcpFlags::SYN | TcpFlags::ACK);
    assert_eq!(synack.ack_number, seq(101));
    assert_eq!(synack.dst_port, PEER_PORT);
    // Nobody offered window scaling or timestamps, nothing is answered.
    assert_eq!(synack.options.window_scale, None);
    assert_eq!(synack.options.timestamp, None);
    assert!(completions(&mut tcp).is_empty());

    let iss = synack.seq_number;
    arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), iss + 1, 0), &[]);
    let done = completions(&mut tcp);
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].socket, listener);
    assert_eq!(done[0].event, EventId(1));
    let conn = match done[0].outcome {
        Outcome::Accept(Ok(conn)) => conn,
        ref other => panic!("unexpected {:?}", other),
    };

    assert_eq!(tcp.state(conn), Some(State::Established));
    assert_eq!(tcp.state(listener), Some(State::Listen));
    let mode = tcp.mode(conn).unwrap();
    assert_eq!(mode.local, IpEndpoint::new(HERE, 80));
    assert_eq!(mode.remote, IpEndpoint::new(THERE, PEER_PORT));
    assert_eq!(mode.snd_mss, DEFAULT_MSS);
}

#[test]
fn accept_after_handshake() {
    let mut tcp = engine();
    let listener = tcp.create();
    tcp.configure(listener, Some(Config::passive(80))).unwrap();

    arrive(&mut tcp, repr(TcpFlags::SYN, seq(100), seq(0), 0), &[]);
    let iss = sent(&mut tcp)[0].0.seq_number;
    arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), iss + 1, 0), &[]);
    assert!(completions(&mut tcp).is_empty());

    tcp.accept(listener, ListenToken { event: EventId(2) }).unwrap();
    let done = completions(&mut tcp);
    assert_eq!(done.len(), 1);
    match done[0].outcome {
        Outcome::Accept(Ok(conn)) => assert_eq!(tcp.state(conn), Some(State::Established)),
        ref other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn active_open() {
    let mut tcp = engine();
    let socket = tcp.create();
    tcp.configure(socket, Some(Config::active(IpEndpoint::new(THERE, 80)))).unwrap();
    tcp.connect(socket, ConnectToken { event: EventId(9) }).unwrap();
    assert_eq!(tcp.state(socket), Some(State::SynSent));

    let syn = sent(&mut tcp);
    assert_eq!(syn.len(), 1);
    let (syn, _) = &syn[0];
    assert_eq!(syn.flags, TcpFlags::SYN);
    // The window of a SYN is never scaled.
    assert_eq!(syn.window_len, 0xffff);
    assert!(syn.options.window_scale.is_some());
    assert_eq!(syn.options.max_seg_size, Some(1460));

    let mut synack = repr(TcpFlags::SYN | TcpFlags::ACK, seq(300), syn.seq_number + 1, 0);
    synack.src_port = 80;
    synack.dst_port = syn.src_port;
    synack.window_len = 1000;
    synack.options = TcpOptions {
        max_seg_size: Some(1400),
        window_scale: Some(3),
        timestamp: None,
    };
    arrive(&mut tcp, synack, &[]);

    let mode = tcp.mode(socket).unwrap();
    assert_eq!(mode.state, State::Established);
    assert_eq!(mode.snd_wnd, 1000);
    assert_eq!(mode.snd_wnd_scale, 3);
    assert_eq!(mode.snd_mss, 1400);

    let done = completions(&mut tcp);
    assert_eq!(done, [Completion {
        socket,
        event: EventId(9),
        outcome: Outcome::Connect(Ok(())),
    }]);

    let ack = sent(&mut tcp);
    assert_eq!(ack.len(), 1);
    assert_eq!(ack[0].0.flags, TcpFlags::ACK);
    assert_eq!(ack[0].0.ack_number, seq(301));
}

#[test]
fn refused_connect() {
    let mut tcp = engine();
    let socket = tcp.create();
    tcp.configure(socket, Some(Config::active(IpEndpoint::new(THERE, 80)))).unwrap();
    tcp.connect(socket, ConnectToken { event: EventId(9) }).unwrap();
    let syn = sent(&mut tcp).remove(0).0;

    let mut rst = repr(TcpFlags::RST | TcpFlags::ACK, seq(0), syn.seq_number + 1, 0);
    rst.src_port = 80;
    rst.dst_port = syn.src_port;
    arrive(&mut tcp, rst, &[]);

    assert_eq!(tcp.state(socket), Some(State::Closed));
    let done = completions(&mut tcp);
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].outcome, Outcome::Connect(Err(Error::ConnectionReset)));
}

#[test]
fn fast_retransmit() {
    let (mut tcp, _, conn, iss) = establish(Options::default());
    let mss = usize::from(DEFAULT_MSS);
    tcp.send(conn, tx(2, mss)).unwrap();

    let data = sent(&mut tcp);
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].0.seq_number, iss + 1);
    assert_eq!(data[0].1.len(), mss);

    for _ in 0..2 {
        arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), iss + 1, 0), &[]);
        assert!(sent(&mut tcp).is_empty());
    }
    assert_eq!(tcp.mode(conn).unwrap().congestion, Congestion::Open);

    arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), iss + 1, 0), &[]);
    let mode = tcp.mode(conn).unwrap();
    assert_eq!(mode.congestion, Congestion::Recover);
    let mss = u32::from(DEFAULT_MSS);
    assert_eq!(mode.ssthresh, 2 * mss);
    assert_eq!(mode.cwnd, 2 * mss + 3 * mss);

    let again = sent(&mut tcp);
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].0.seq_number, iss + 1);
    assert_eq!(again[0].1.len(), mss as usize);

    // The full acknowledgement ends recovery and completes the send.
    arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), iss + 1 + mss as usize, 0), &[]);
    assert_eq!(tcp.mode(conn).unwrap().congestion, Congestion::Open);
    let done = completions(&mut tcp);
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].outcome, Outcome::Send(Ok(())));
}

#[test]
fn old_segment_is_acked() {
    let (mut tcp, _, conn, iss) = establish(Options::default());
    arrive(&mut tcp, repr(TcpFlags::ACK, seq(50), iss + 1, 10), &[1; 10]);

    let answer = sent(&mut tcp);
    assert_eq!(answer.len(), 1);
    assert_eq!(answer[0].0.flags, TcpFlags::ACK);
    assert_eq!(answer[0].0.ack_number, seq(101));
    assert_eq!(tcp.state(conn), Some(State::Established));
}

#[test]
fn pending_receive_woken() {
    let (mut tcp, _, conn, iss) = establish(Options::default());
    tcp.receive(conn, RxToken { event: EventId(3), capacity: 1000 }).unwrap();
    assert!(completions(&mut tcp).is_empty());

    let payload = [7; 512];
    arrive(&mut tcp, repr(TcpFlags::ACK | TcpFlags::PSH, seq(101), iss + 1, 512), &payload);

    let done = completions(&mut tcp);
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].event, EventId(3));
    match &done[0].outcome {
        Outcome::Receive(Ok(received)) => {
            assert_eq!(received.data.as_slice(), &payload[..]);
            assert!(!received.urgent);
        },
        other => panic!("unexpected {:?}", other),
    }

    // The push is acknowledged at once.
    let ack = sent(&mut tcp);
    assert_eq!(ack.last().unwrap().0.ack_number, seq(613));
}

#[test]
fn buffered_receive() {
    let (mut tcp, _, conn, iss) = establish(Options::default());
    arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), iss + 1, 300), &[1; 300]);
    assert!(completions(&mut tcp).is_empty());

    tcp.receive(conn, RxToken { event: EventId(3), capacity: 100 }).unwrap();
    tcp.receive(conn, RxToken { event: EventId(4), capacity: 500 }).unwrap();
    let lengths: Vec<_> = completions(&mut tcp).into_iter()
        .map(|done| match done.outcome {
            Outcome::Receive(Ok(received)) => received.data.len(),
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(lengths, [100, 200]);
}

#[test]
fn out_of_order_delivery() {
    let (mut tcp, _, conn, iss) = establish(Options::default());

    arrive(&mut tcp, repr(TcpFlags::ACK, seq(111), iss + 1, 10), &[2; 10]);
    // The gap is reported immediately.
    let dup = sent(&mut tcp);
    assert_eq!(dup.len(), 1);
    assert_eq!(dup[0].0.ack_number, seq(101));

    arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), iss + 1, 10), &[1; 10]);
    let ack = sent(&mut tcp);
    assert_eq!(ack.last().unwrap().0.ack_number, seq(121));

    tcp.receive(conn, RxToken { event: EventId(3), capacity: 1000 }).unwrap();
    let done = completions(&mut tcp);
    assert_eq!(done.len(), 1);
    match &done[0].outcome {
        Outcome::Receive(Ok(received)) => {
            let mut expected = vec![1; 10];
            expected.extend_from_slice(&[2; 10]);
            assert_eq!(received.data.as_slice(), &expected[..]);
        },
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn retransmission_gives_up() {
    let (mut tcp, _, conn, iss) = establish(Options::default());
    tcp.send(conn, tx(2, 100)).unwrap();
    tcp.receive(conn, RxToken { event: EventId(3), capacity: 100 }).unwrap();
    let retries = tcp.mode(conn).unwrap().options.data_retries as usize;

    let mut transmissions = sent(&mut tcp).len();
    for _ in 0..10_000 {
        tcp.tick();
        transmissions += sent(&mut tcp).iter()
            .filter(|(repr, _)| repr.seq_number == iss + 1)
            .count();
        if tcp.state(conn) == Some(State::Closed) {
            break;
        }
    }

    assert_eq!(tcp.state(conn), Some(State::Closed));
    assert_eq!(transmissions, 1 + retries);
    let done = completions(&mut tcp);
    assert_eq!(done.len(), 2);
    assert!(done.iter().all(|done| done.outcome.error() == Some(Error::Timeout)));
    assert!(done.iter().any(|done| done.event == EventId(2)));
    assert!(done.iter().any(|done| done.event == EventId(3)));
}

#[test]
fn graceful_close() {
    let (mut tcp, _, conn, iss) = establish(Options::default());
    tcp.close(conn, CloseToken { event: EventId(5), abort: false }).unwrap();
    assert_eq!(tcp.state(conn), Some(State::FinWait1));

    let fin = sent(&mut tcp);
    assert_eq!(fin.len(), 1);
    assert_eq!(fin[0].0.flags, TcpFlags::FIN | TcpFlags::ACK);
    assert_eq!(fin[0].0.seq_number, iss + 1);

    arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), iss + 2, 0), &[]);
    assert_eq!(tcp.state(conn), Some(State::FinWait2));

    arrive(&mut tcp, repr(TcpFlags::FIN | TcpFlags::ACK, seq(101), iss + 2, 0), &[]);
    assert_eq!(tcp.state(conn), Some(State::TimeWait));
    let ack = sent(&mut tcp);
    assert_eq!(ack.len(), 1);
    assert_eq!(ack[0].0.ack_number, seq(102));
    assert!(completions(&mut tcp).is_empty());

    for _ in 0..20 {
        tcp.tick();
    }
    assert_eq!(tcp.state(conn), Some(State::Closed));
    assert_eq!(completions(&mut tcp), [Completion {
        socket: conn,
        event: EventId(5),
        outcome: Outcome::Close(Ok(())),
    }]);
}

#[test]
fn time_wait_disabled() {
    let options = Options { time_wait_timeout: Some(0), ..Options::default() };
    let (mut tcp, _, conn, iss) = establish(options);
    tcp.close(conn, CloseToken { event: EventId(5), abort: false }).unwrap();
    arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), iss + 2, 0), &[]);
    arrive(&mut tcp, repr(TcpFlags::FIN | TcpFlags::ACK, seq(101), iss + 2, 0), &[]);

    assert_eq!(tcp.state(conn), Some(State::Closed));
    let done = completions(&mut tcp);
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].outcome, Outcome::Close(Ok(())));
    // The FIN was still acknowledged.
    let last = sent(&mut tcp).pop().unwrap().0;
    assert_eq!(last.ack_number, seq(102));
}

#[test]
fn passive_close() {
    let (mut tcp, _, conn, iss) = establish(Options::default());
    arrive(&mut tcp, repr(TcpFlags::FIN | TcpFlags::ACK, seq(101), iss + 1, 0), &[]);
    assert_eq!(tcp.state(conn), Some(State::CloseWait));
    assert_eq!(tcp.receive(conn, RxToken { event: EventId(3), capacity: 10 }),
        Err(Error::ConnectionFin));

    // Sending is still allowed.
    tcp.send(conn, tx(4, 10)).unwrap();
    tcp.close(conn, CloseToken { event: EventId(5), abort: false }).unwrap();
    assert_eq!(tcp.state(conn), Some(State::LastAck));
    let out = sent(&mut tcp);
    assert!(out.last().unwrap().0.flags.fin());

    arrive(&mut tcp, repr(TcpFlags::ACK, seq(102), iss + 12, 0), &[]);
    assert_eq!(tcp.state(conn), Some(State::Closed));
    let events: Vec<_> = completions(&mut tcp).into_iter()
        .map(|done| (done.event, done.outcome.error()))
        .collect();
    assert_eq!(events, [(EventId(4), None), (EventId(5), None)]);
}

#[test]
fn abort_resets() {
    let (mut tcp, _, conn, _) = establish(Options::default());
    tcp.receive(conn, RxToken { event: EventId(3), capacity: 10 }).unwrap();
    tcp.close(conn, CloseToken { event: EventId(5), abort: true }).unwrap();

    let rst = sent(&mut tcp);
    assert_eq!(rst.len(), 1);
    assert!(rst[0].0.flags.rst());
    assert_eq!(tcp.state(conn), Some(State::Closed));

    let done = completions(&mut tcp);
    assert_eq!(done.len(), 2);
    assert!(done.iter().any(|done| done.outcome == Outcome::Close(Ok(()))));
    assert!(done.iter().any(|done| done.outcome == Outcome::Receive(Err(Error::Aborted))));
}

#[test]
fn peer_reset() {
    let (mut tcp, _, conn, iss) = establish(Options::default());
    tcp.receive(conn, RxToken { event: EventId(3), capacity: 10 }).unwrap();
    arrive(&mut tcp, repr(TcpFlags::RST, seq(101), iss + 1, 0), &[]);

    assert_eq!(tcp.state(conn), Some(State::Closed));
    assert!(sent(&mut tcp).is_empty());
    let done = completions(&mut tcp);
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].outcome, Outcome::Receive(Err(Error::ConnectionReset)));
}

#[test]
fn flush_twice() {
    let (mut tcp, _, conn, _) = establish(Options::default());
    tcp.receive(conn, RxToken { event: EventId(3), capacity: 10 }).unwrap();

    tcp.flush(conn).unwrap();
    let rst = sent(&mut tcp);
    assert_eq!(rst.len(), 1);
    assert!(rst[0].0.flags.rst());
    assert_eq!(completions(&mut tcp).len(), 1);

    tcp.flush(conn).unwrap();
    assert!(sent(&mut tcp).is_empty());
    assert!(completions(&mut tcp).is_empty());
    tcp.cancel(conn, None).unwrap();
    tcp.cancel(conn, None).unwrap();
    assert!(completions(&mut tcp).is_empty());
    assert_eq!(tcp.state(conn), Some(State::Closed));
}

#[test]
fn hard_icmp_error() {
    let (mut tcp, _, conn, _) = establish(Options::default());
    tcp.send(conn, tx(2, 100)).unwrap();
    let quoted = tcp.network_mut().take().remove(0).segment;

    tcp.icmp_error_arrived(&quoted[..8], IcmpError::PortUnreachable, HERE, THERE);
    assert_eq!(tcp.state(conn), Some(State::Closed));
    let done = completions(&mut tcp);
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].outcome, Outcome::Send(Err(Error::PortUnreachable)));
}

#[test]
fn soft_icmp_error() {
    let (mut tcp, _, conn, _) = establish(Options::default());
    tcp.send(conn, tx(2, 100)).unwrap();
    let quoted = tcp.network_mut().take().remove(0).segment;

    tcp.icmp_error_arrived(&quoted, IcmpError::NetUnreachable, HERE, THERE);
    let mode = tcp.mode(conn).unwrap();
    assert_eq!(mode.state, State::Established);
    assert_eq!(mode.soft_error, Some(Error::NetworkUnreachable));
    assert!(completions(&mut tcp).is_empty());

    tcp.icmp_error_arrived(&quoted, IcmpError::SourceQuench, HERE, THERE);
    assert_eq!(tcp.state(conn), Some(State::Established));
}

#[test]
fn icmp_outside_flight_ignored() {
    let mut tcp = engine();
    let listener = tcp.create();
    tcp.configure(listener, Some(Config::passive(80))).unwrap();
    tcp.accept(listener, ListenToken { event: EventId(1) }).unwrap();
    arrive(&mut tcp, repr(TcpFlags::SYN, seq(100), seq(0), 0), &[]);
    let synack = tcp.network_mut().take().remove(0).segment;
    let iss = TcpPacket::new_unchecked(&synack[..]).seq_number();
    arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), iss + 1, 0), &[]);
    let conn = match completions(&mut tcp).remove(0).outcome {
        Outcome::Accept(Ok(conn)) => conn,
        other => panic!("unexpected {:?}", other),
    };

    // The SYN-ACK was acknowledged, an error about it is stale.
    tcp.icmp_error_arrived(&synack, IcmpError::PortUnreachable, HERE, THERE);
    assert_eq!(tcp.state(conn), Some(State::Established));
    assert_eq!(tcp.mode(conn).unwrap().soft_error, None);
}

#[test]
fn backlog_exhausted() {
    let mut tcp = engine();
    let listener = tcp.create();
    let options = Options { backlog: Some(5), ..Options::default() };
    tcp.configure(listener, Some(Config { options, ..Config::passive(80) })).unwrap();

    for port in 0..6 {
        let mut syn = repr(TcpFlags::SYN, seq(100), seq(0), 0);
        syn.src_port = PEER_PORT + port;
        arrive(&mut tcp, syn, &[]);
    }

    let answers = sent(&mut tcp);
    assert_eq!(answers.len(), 5);
    assert!(answers.iter().all(|(repr, _)| repr.flags == TcpFlags::SYN | TcpFlags::ACK));
}

#[test]
fn closing_listener_drops_children() {
    let mut tcp = engine();
    let listener = tcp.create();
    tcp.configure(listener, Some(Config::passive(80))).unwrap();
    arrive(&mut tcp, repr(TcpFlags::SYN, seq(100), seq(0), 0), &[]);
    let iss = sent(&mut tcp)[0].0.seq_number;

    tcp.close(listener, CloseToken { event: EventId(5), abort: false }).unwrap();
    assert_eq!(tcp.state(listener), Some(State::Closed));

    // The half open connection is gone, its peer is reset.
    arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), iss + 1, 0), &[]);
    let rst = sent(&mut tcp);
    assert!(rst.iter().any(|(repr, _)| repr.flags.rst()));
}

#[test]
fn no_connection_resets() {
    let mut tcp = engine();
    arrive(&mut tcp, repr(TcpFlags::SYN, seq(100), seq(0), 0), &[]);
    let rst = sent(&mut tcp);
    assert_eq!(rst.len(), 1);
    assert_eq!(rst[0].0.flags, TcpFlags::RST | TcpFlags::ACK);
    assert_eq!(rst[0].0.ack_number, seq(101));

    arrive(&mut tcp, repr(TcpFlags::RST, seq(100), seq(0), 0), &[]);
    assert!(sent(&mut tcp).is_empty());
}

#[test]
fn corrupted_segment_dropped() {
    let mut tcp = engine();
    let listener = tcp.create();
    tcp.configure(listener, Some(Config::passive(80))).unwrap();

    let mut bytes = emit(&repr(TcpFlags::SYN, seq(100), seq(0), 4), b"data");
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    tcp.segment_arrived(&bytes, THERE, HERE);
    assert!(sent(&mut tcp).is_empty());

    // A segment across address families is dropped as well.
    let bytes = emit(&repr(TcpFlags::SYN, seq(100), seq(0), 0), &[]);
    tcp.segment_arrived(&bytes, IpAddress::v6(0xfe80, 0, 0, 0, 0, 0, 0, 2), HERE);
    assert!(sent(&mut tcp).is_empty());
}

#[test]
fn zero_window_probe() {
    let (mut tcp, _, conn, iss) = establish(Options::default());
    let mut closing = repr(TcpFlags::ACK, seq(101), iss + 1, 1);
    closing.window_len = 0;
    arrive(&mut tcp, closing, &[1]);
    assert_eq!(tcp.mode(conn).unwrap().snd_wnd, 0);
    sent(&mut tcp);

    tcp.send(conn, tx(2, 100)).unwrap();
    assert!(sent(&mut tcp).is_empty());

    let mut probes = 0;
    for _ in 0..100 {
        tcp.tick();
        probes += sent(&mut tcp).len();
    }
    assert!(probes > 0);
    assert_eq!(tcp.state(conn), Some(State::Established));
}

#[test]
fn forged_timestamp_echo_ignored() {
    let offer = TcpOptions {
        timestamp: Some(TcpTimestamp { value: 1, echo: 0 }),
        ..TcpOptions::default()
    };
    let (mut tcp, _, conn, iss) = establish_offering(Options::default(), offer);
    tcp.send(conn, tx(2, 100)).unwrap();
    let data = sent(&mut tcp);
    assert_eq!(data.len(), 1);
    assert!(data[0].0.options.timestamp.is_some());

    // The echo claims a send time far before the connection existed.
    let mut ack = repr(TcpFlags::ACK, seq(101), iss + 101, 0);
    ack.options.timestamp = Some(TcpTimestamp { value: 2, echo: 0u32.wrapping_sub(1 << 28) });
    arrive(&mut tcp, ack, &[]);

    let mode = tcp.mode(conn).unwrap();
    assert_eq!(mode.state, State::Established);
    assert_eq!(mode.rto, RTO_MIN);
    assert_eq!(completions(&mut tcp), [Completion {
        socket: conn,
        event: EventId(2),
        outcome: Outcome::Send(Ok(())),
    }]);
}

#[test]
fn flush_signals_close() {
    let (mut tcp, _, conn, _) = establish(Options::default());
    tcp.close(conn, CloseToken { event: EventId(5), abort: false }).unwrap();
    assert_eq!(tcp.state(conn), Some(State::FinWait1));
    sent(&mut tcp);

    tcp.flush(conn).unwrap();
    assert!(sent(&mut tcp).iter().any(|(repr, _)| repr.flags.rst()));
    assert_eq!(completions(&mut tcp), [Completion {
        socket: conn,
        event: EventId(5),
        outcome: Outcome::Close(Err(Error::Aborted)),
    }]);
    assert_eq!(tcp.state(conn), Some(State::Closed));
}

#[test]
fn destroy_signals_close() {
    let (mut tcp, _, conn, iss) = establish(Options::default());
    arrive(&mut tcp, repr(TcpFlags::FIN | TcpFlags::ACK, seq(101), iss + 1, 0), &[]);
    tcp.close(conn, CloseToken { event: EventId(5), abort: false }).unwrap();
    assert_eq!(tcp.state(conn), Some(State::LastAck));

    tcp.destroy(conn).unwrap();
    assert_eq!(tcp.state(conn), None);
    assert_eq!(completions(&mut tcp), [Completion {
        socket: conn,
        event: EventId(5),
        outcome: Outcome::Close(Err(Error::Aborted)),
    }]);
}

#[test]
fn persist_timer_stops_after_window_opens() {
    let (mut tcp, _, conn, iss) = establish(Options::default());
    let mut closing = repr(TcpFlags::ACK, seq(101), iss + 1, 1);
    closing.window_len = 0;
    arrive(&mut tcp, closing, &[1]);
    sent(&mut tcp);

    tcp.send(conn, tx(2, 100)).unwrap();
    assert!(sent(&mut tcp).is_empty());

    arrive(&mut tcp, repr(TcpFlags::ACK, seq(102), iss + 1, 0), &[]);
    let data = sent(&mut tcp);
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].0.seq_number, iss + 1);
    assert_eq!(data[0].1.len(), 100);

    arrive(&mut tcp, repr(TcpFlags::ACK, seq(102), iss + 101, 0), &[]);
    assert_eq!(completions(&mut tcp).len(), 1);

    // Ten minutes idle, far below the keepalive time.
    for _ in 0..3000 {
        tcp.tick();
    }
    assert!(sent(&mut tcp).is_empty());
    assert_eq!(tcp.state(conn), Some(State::Established));
}

/// Send and acknowledge three segments, growing the congestion window to four.
///
/// Returns the sequence number of the next byte to send.
fn slow_start(tcp: &mut Endpoint<Capture>, conn: Key, iss: TcpSeqNumber) -> TcpSeqNumber {
    let mss = usize::from(DEFAULT_MSS);
    tcp.send(conn, tx(2, 3 * mss)).unwrap();
    assert_eq!(sent(tcp).len(), 1);

    arrive(tcp, repr(TcpFlags::ACK, seq(101), iss + 1 + mss, 0), &[]);
    assert_eq!(sent(tcp).len(), 2);
    arrive(tcp, repr(TcpFlags::ACK, seq(101), iss + 1 + 2 * mss, 0), &[]);
    arrive(tcp, repr(TcpFlags::ACK, seq(101), iss + 1 + 3 * mss, 0), &[]);
    assert!(sent(tcp).is_empty());

    assert_eq!(tcp.mode(conn).unwrap().cwnd, 4 * u32::from(DEFAULT_MSS));
    assert_eq!(completions(tcp).len(), 1);
    iss + 1 + 3 * mss
}

#[test]
fn partial_ack_in_recovery() {
    let (mut tcp, _, conn, iss) = establish(Options::default());
    let base = slow_start(&mut tcp, conn, iss);
    let mss = usize::from(DEFAULT_MSS);
    let mss32 = u32::from(DEFAULT_MSS);

    tcp.send(conn, tx(3, 4 * mss)).unwrap();
    let flight: Vec<_> = sent(&mut tcp).into_iter().map(|(repr, _)| repr.seq_number).collect();
    assert_eq!(flight, [base, base + mss, base + 2 * mss, base + 3 * mss]);

    for _ in 0..3 {
        arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), base, 0), &[]);
    }
    let again = sent(&mut tcp);
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].0.seq_number, base);
    let mode = tcp.mode(conn).unwrap();
    assert_eq!(mode.congestion, Congestion::Recover);
    assert_eq!(mode.ssthresh, 2 * mss32);
    assert_eq!(mode.cwnd, 5 * mss32);

    // Two segments acknowledged, the window deflates by one and the next hole is filled.
    arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), base + 2 * mss, 0), &[]);
    let again = sent(&mut tcp);
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].0.seq_number, base + 2 * mss);
    assert_eq!(again[0].1.len(), mss);
    let mode = tcp.mode(conn).unwrap();
    assert_eq!(mode.congestion, Congestion::Recover);
    assert_eq!(mode.cwnd, 4 * mss32);
    assert!(completions(&mut tcp).is_empty());

    arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), base + 4 * mss, 0), &[]);
    let mode = tcp.mode(conn).unwrap();
    assert_eq!(mode.congestion, Congestion::Open);
    assert_eq!(mode.cwnd, 2 * mss32);
    let done = completions(&mut tcp);
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].event, EventId(3));
    assert_eq!(done[0].outcome, Outcome::Send(Ok(())));
}

#[test]
fn loss_recovery() {
    let (mut tcp, _, conn, iss) = establish(Options::default());
    let base = slow_start(&mut tcp, conn, iss);
    let mss = usize::from(DEFAULT_MSS);
    let mss32 = u32::from(DEFAULT_MSS);

    tcp.send(conn, tx(3, 4 * mss)).unwrap();
    assert_eq!(sent(&mut tcp).len(), 4);

    let mut again = Vec::new();
    for _ in 0..50 {
        tcp.tick();
        again = sent(&mut tcp);
        if !again.is_empty() {
            break;
        }
    }
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].0.seq_number, base);
    let mode = tcp.mode(conn).unwrap();
    assert_eq!(mode.congestion, Congestion::Loss);
    assert_eq!(mode.cwnd, mss32);
    assert_eq!(mode.ssthresh, 2 * mss32);

    // Partial: the next unacknowledged segment goes out at once.
    arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), base + mss, 0), &[]);
    let again = sent(&mut tcp);
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].0.seq_number, base + mss);
    assert_eq!(tcp.mode(conn).unwrap().congestion, Congestion::Loss);

    // Full: everything sent before the timeout is acknowledged.
    arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), base + 4 * mss, 0), &[]);
    let mode = tcp.mode(conn).unwrap();
    assert_eq!(mode.congestion, Congestion::Open);
    assert_eq!(mode.cwnd, 5 * mss32 / 2);
    assert_eq!(completions(&mut tcp)[0].outcome, Outcome::Send(Ok(())));
}

fn scaled_offer() -> TcpOptions {
    TcpOptions { window_scale: Some(4), ..TcpOptions::default() }
}

#[test]
fn window_retraction_tolerated() {
    let (mut tcp, _, conn, iss) = establish_offering(Options::default(), scaled_offer());
    assert_eq!(tcp.mode(conn).unwrap().snd_wnd_scale, 4);
    tcp.send(conn, tx(2, 100)).unwrap();
    assert_eq!(sent(&mut tcp).len(), 1);

    // The right edge falls ten bytes short of what was sent, less than one scaled unit.
    let mut shrink = repr(TcpFlags::ACK, seq(101), iss + 91, 0);
    shrink.window_len = 0;
    arrive(&mut tcp, shrink, &[]);
    assert_eq!(tcp.mode(conn).unwrap().snd_wnd, 0);
    assert!(sent(&mut tcp).is_empty());

    let mut rest = repr(TcpFlags::ACK, seq(101), iss + 101, 0);
    rest.window_len = 0;
    arrive(&mut tcp, rest, &[]);
    assert_eq!(completions(&mut tcp)[0].outcome, Outcome::Send(Ok(())));
}

#[test]
fn window_retraction_pulls_back() {
    let (mut tcp, _, conn, iss) = establish_offering(Options::default(), scaled_offer());
    tcp.send(conn, tx(2, 100)).unwrap();
    assert_eq!(sent(&mut tcp).len(), 1);

    let mut shrink = repr(TcpFlags::ACK, seq(101), iss + 51, 0);
    shrink.window_len = 0;
    arrive(&mut tcp, shrink, &[]);
    assert!(sent(&mut tcp).is_empty());

    // The second half counts as unsent now, acknowledging it is answered.
    arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), iss + 101, 0), &[]);
    let answer = sent(&mut tcp);
    assert_eq!(answer.len(), 1);
    assert_eq!(answer[0].0.ack_number, seq(101));
    assert!(answer[0].1.is_empty());
    assert!(completions(&mut tcp).is_empty());

    arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), iss + 51, 0), &[]);
    let resent = sent(&mut tcp);
    assert_eq!(resent.len(), 1);
    assert_eq!(resent[0].0.seq_number, iss + 51);
    assert_eq!(resent[0].1.len(), 50);

    arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), iss + 101, 0), &[]);
    assert_eq!(completions(&mut tcp)[0].outcome, Outcome::Send(Ok(())));
}

#[test]
fn urgent_data() {
    let (mut tcp, _, conn, iss) = establish(Options::default());
    let token = TxToken { urgent: true, ..tx(2, 10) };
    tcp.send(conn, token).unwrap();
    let out = sent(&mut tcp);
    assert_eq!(out.len(), 1);
    assert!(out[0].0.flags.urg());
    // Points at the last urgent byte.
    assert_eq!(out[0].0.urgent_at, 9);

    arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), iss + 11, 0), &[]);
    tcp.send(conn, tx(3, 5)).unwrap();
    let out = sent(&mut tcp);
    assert_eq!(out.len(), 1);
    assert!(!out[0].0.flags.urg());
    completions(&mut tcp);

    let mut incoming = repr(TcpFlags::ACK | TcpFlags::URG, seq(101), iss + 11, 8);
    incoming.urgent_at = 3;
    arrive(&mut tcp, incoming, b"!!!!data");

    tcp.receive(conn, RxToken { event: EventId(4), capacity: 100 }).unwrap();
    tcp.receive(conn, RxToken { event: EventId(5), capacity: 100 }).unwrap();
    let received: Vec<_> = completions(&mut tcp).into_iter()
        .map(|done| match done.outcome {
            Outcome::Receive(Ok(received)) => (received.urgent, received.data.as_slice().to_vec()),
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(received, [(true, b"!!!!".to_vec()), (false, b"data".to_vec())]);
}

#[test]
fn connect_timeout() {
    let options = Options { connection_timeout: Some(1), ..Options::default() };
    let mut tcp = engine();
    let socket = tcp.create();
    let config = Config { options, ..Config::active(IpEndpoint::new(THERE, 80)) };
    tcp.configure(socket, Some(config)).unwrap();
    tcp.connect(socket, ConnectToken { event: EventId(9) }).unwrap();
    sent(&mut tcp);

    for _ in 0..4 {
        tcp.tick();
    }
    assert_eq!(tcp.state(socket), Some(State::SynSent));
    tcp.tick();
    assert_eq!(tcp.state(socket), Some(State::Closed));
    assert!(sent(&mut tcp).iter().all(|(repr, _)| !repr.flags.rst()));
    assert_eq!(completions(&mut tcp), [Completion {
        socket,
        event: EventId(9),
        outcome: Outcome::Connect(Err(Error::Timeout)),
    }]);
}

#[test]
fn half_open_timeout_resets() {
    let options = Options { connection_timeout: Some(1), ..Options::default() };
    let mut tcp = engine();
    let listener = tcp.create();
    tcp.configure(listener, Some(Config { options, ..Config::passive(80) })).unwrap();
    tcp.accept(listener, ListenToken { event: EventId(1) }).unwrap();

    arrive(&mut tcp, repr(TcpFlags::SYN, seq(100), seq(0), 0), &[]);
    let iss = sent(&mut tcp)[0].0.seq_number;
    for _ in 0..5 {
        tcp.tick();
    }
    let rst = sent(&mut tcp);
    assert_eq!(rst.len(), 1);
    assert_eq!(rst[0].0.flags, TcpFlags::RST | TcpFlags::ACK);
    assert_eq!(rst[0].0.seq_number, iss + 1);
    assert_eq!(rst[0].0.ack_number, seq(101));
    assert_eq!(rst[0].0.dst_port, PEER_PORT);

    // The late acknowledgement finds no connection and the listener keeps listening.
    arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), iss + 1, 0), &[]);
    assert!(sent(&mut tcp).iter().any(|(repr, _)| repr.flags.rst()));
    assert!(completions(&mut tcp).is_empty());
    assert_eq!(tcp.state(listener), Some(State::Listen));
}

#[test]
fn keepalive_gives_up() {
    let options = Options {
        keepalive_probes: Some(4),
        keepalive_interval: Some(30),
        ..Options::default()
    };
    let (mut tcp, _, conn, iss) = establish(options);
    tcp.receive(conn, RxToken { event: EventId(3), capacity: 10 }).unwrap();

    let mut probes = Vec::new();
    let mut ticks = 0u32;
    while tcp.state(conn) != Some(State::Closed) && ticks < 40_000 {
        tcp.tick();
        ticks += 1;
        for (repr, _) in sent(&mut tcp) {
            assert_eq!(repr.seq_number, iss);
            probes.push(ticks);
        }
    }

    // Two hours idle, then four probes thirty seconds apart.
    assert_eq!(probes, [36_000, 36_150, 36_300, 36_450]);
    assert_eq!(ticks, 36_600);
    assert_eq!(tcp.state(conn), Some(State::Closed));
    let done = completions(&mut tcp);
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].outcome, Outcome::Receive(Err(Error::Timeout)));
}

#[test]
fn fin_wait2_timeout() {
    let (mut tcp, _, conn, iss) = establish(Options::default());
    tcp.close(conn, CloseToken { event: EventId(5), abort: false }).unwrap();
    arrive(&mut tcp, repr(TcpFlags::ACK, seq(101), iss + 2, 0), &[]);
    assert_eq!(tcp.state(conn), Some(State::FinWait2));
    sent(&mut tcp);

    for _ in 0..9 {
        tcp.tick();
    }
    assert_eq!(tcp.state(conn), Some(State::FinWait2));
    tcp.tick();
    assert_eq!(tcp.state(conn), Some(State::Closed));
    assert!(sent(&mut tcp).is_empty());
    assert_eq!(completions(&mut tcp), [Completion {
        socket: conn,
        event: EventId(5),
        outcome: Outcome::Close(Ok(())),
    }]);
}

#[test]
fn simultaneous_open() {
    let mut tcp = engine();
    let socket = tcp.create();
    tcp.configure(socket, Some(Config::active(IpEndpoint::new(THERE, 80)))).unwrap();
    tcp.connect(socket, ConnectToken { event: EventId(9) }).unwrap();
    let syn = sent(&mut tcp).remove(0).0;
    let iss = syn.seq_number;

    let mut crossing = repr(TcpFlags::SYN, seq(300), seq(0), 0);
    crossing.src_port = 80;
    crossing.dst_port = syn.src_port;
    arrive(&mut tcp, crossing, &[]);
    assert_eq!(tcp.state(socket), Some(State::SynRcvd));

    // Our SYN again, now acknowledging theirs.
    let synack = sent(&mut tcp);
    assert_eq!(synack.len(), 1);
    assert_eq!(synack[0].0.flags, TcpFlags::SYN | TcpFlags::ACK);
    assert_eq!(synack[0].0.seq_number, iss);
    assert_eq!(synack[0].0.ack_number, seq(301));
    assert!(completions(&mut tcp).is_empty());

    let mut ack = repr(TcpFlags::ACK, seq(301), iss + 1, 0);
    ack.src_port = 80;
    ack.dst_port = syn.src_port;
    arrive(&mut tcp, ack, &[]);
    assert_eq!(tcp.state(socket), Some(State::Established));
    assert_eq!(completions(&mut tcp), [Completion {
        socket,
        event: EventId(9),
        outcome: Outcome::Connect(Ok(())),
    }]);
}
