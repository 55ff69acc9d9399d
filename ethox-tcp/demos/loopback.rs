//! Transfers data between two engines over an in-memory link.
//!
//! # Usage
//!
//! Both engines record their segments in a `Capture`, the loop below carries them to the other
//! side. Every n-th segment can be dropped to watch retransmission and recovery at work.
//!
//!   > $ cargo run --features log --example loopback -- --bytes 1000000 --drop-every 13
use structopt::StructOpt;

use ethox_tcp::layer::Error;
use ethox_tcp::layer::ip::Capture;
use ethox_tcp::layer::socket::{
    CloseToken,
    Config,
    ConnectToken,
    EventId,
    ListenToken,
    Outcome,
    RxToken,
    TxToken};
use ethox_tcp::layer::tcp::{Endpoint, EngineConfig};
use ethox_tcp::managed::Key;
use ethox_tcp::storage::NetBuf;
use ethox_tcp::wire::{IpAddress, IpEndpoint};

const CLIENT: IpAddress = IpAddress::v4(10, 0, 0, 1);
const SERVER: IpAddress = IpAddress::v4(10, 0, 0, 2);
const PORT: u16 = 80;
const CHUNK: usize = 8192;

fn main() {
    let Options {
        bytes,
        drop_every,
        ticks,
    } = Options::from_args();

    let mut client = engine(CLIENT, [1; 16]);
    let mut server = engine(SERVER, [2; 16]);
    let mut link = Link { carried: 0, dropped: 0, drop_every };

    let listener = server.create();
    server.configure(listener, Some(Config::passive(PORT))).expect("Couldn't configure listener");
    server.accept(listener, ListenToken { event: EventId(0) }).expect("Couldn't accept");

    let socket = client.create();
    client.configure(socket, Some(Config::active(IpEndpoint::new(SERVER, PORT))))
        .expect("Couldn't configure client");
    client.connect(socket, ConnectToken { event: EventId(0) }).expect("Couldn't connect");

    let payload: Vec<u8> = (0..bytes).map(|i| i as u8).collect();
    let chunks: Vec<&[u8]> = payload.chunks(CHUNK).collect();
    for (idx, chunk) in chunks.iter().enumerate() {
        let token = TxToken {
            event: EventId(1 + idx as u64),
            data: NetBuf::from_slice(chunk),
            push: idx + 1 == chunks.len(),
            urgent: false,
        };
        client.send(socket, token).expect("Couldn't queue data");
    }

    let mut server_side = Server { conn: None, received: Vec::with_capacity(bytes), next_event: 1 };
    let mut sent_chunks = 0;
    let mut client_closed = false;
    let mut server_closed = false;

    for tick in 0..ticks {
        while link.carry(&mut client, &mut server) | link.carry(&mut server, &mut client) {}

        let done: Vec<_> = client.completions().collect();
        for done in done {
            match done.outcome {
                Outcome::Connect(Ok(())) => println!("Connected after {} ticks", tick),
                Outcome::Send(Ok(())) => {
                    sent_chunks += 1;
                    if sent_chunks == chunks.len() {
                        println!("All data acknowledged after {} ticks", tick);
                        let token = CloseToken { event: EventId(u64::max_value()), abort: false };
                        client.close(socket, token).expect("Couldn't close client");
                    }
                },
                Outcome::Close(Ok(())) => client_closed = true,
                other => panic!("Client request {:?} failed: {:?}", done.event, other.error()),
            }
        }

        let done: Vec<_> = server.completions().collect();
        for done in done {
            match done.outcome {
                Outcome::Accept(Ok(conn)) => {
                    println!("Accepted after {} ticks", tick);
                    server_side.conn = Some(conn);
                    server_side.receive(&mut server);
                },
                Outcome::Receive(Ok(received)) => {
                    server_side.received.extend_from_slice(received.data.as_slice());
                    server_side.receive(&mut server);
                },
                Outcome::Receive(Err(Error::ConnectionFin)) => server_side.close(&mut server),
                Outcome::Close(Ok(())) => server_closed = true,
                other => panic!("Server request {:?} failed: {:?}", done.event, other.error()),
            }
        }

        if client_closed && server_closed {
            println!("Closed after {} ticks", tick);
            break;
        }

        client.tick();
        server.tick();
    }

    println!("Carried {} segments, dropped {}", link.carried, link.dropped);
    if server_side.received == payload {
        println!("Received all {} bytes intact", bytes);
    } else {
        println!("Received {} of {} bytes", server_side.received.len(), bytes);
        std::process::exit(1);
    }
}

fn engine(address: IpAddress, secret: [u8; 16]) -> Endpoint<Capture> {
    let config = EngineConfig { secret: Some(secret), ..EngineConfig::default() };
    let mut tcp = Endpoint::new(Capture::new(), config);
    tcp.set_station_address(address);
    tcp
}

struct Link {
    carried: usize,
    dropped: usize,
    drop_every: Option<usize>,
}

impl Link {
    /// Move every segment `from` sent to the other engine. Returns whether there were any.
    fn carry(&mut self, from: &mut Endpoint<Capture>, to: &mut Endpoint<Capture>) -> bool {
        let segments = from.network_mut().take();
        let any = !segments.is_empty();
        for sent in segments {
            self.carried += 1;
            if self.drop_every.map_or(false, |n| n > 0 && self.carried % n == 0) {
                self.dropped += 1;
                continue;
            }
            to.segment_arrived(&sent.segment, sent.src, sent.dst);
        }
        any
    }
}

struct Server {
    conn: Option<Key>,
    received: Vec<u8>,
    next_event: u64,
}

impl Server {
    fn receive(&mut self, tcp: &mut Endpoint<Capture>) {
        let conn = match self.conn {
            Some(conn) => conn,
            None => return,
        };
        let token = RxToken { event: EventId(self.next_event), capacity: 1 << 16 };
        self.next_event += 1;
        match tcp.receive(conn, token) {
            Ok(()) => (),
            Err(Error::ConnectionFin) => self.close(tcp),
            Err(err) => panic!("Couldn't receive: {}", err),
        }
    }

    fn close(&mut self, tcp: &mut Endpoint<Capture>) {
        if let Some(conn) = self.conn.take() {
            let token = CloseToken { event: EventId(0), abort: false };
            tcp.close(conn, token).expect("Couldn't close server side");
        }
    }
}

#[derive(StructOpt)]
struct Options {
    /// Number of bytes sent from client to server.
    #[structopt(long, default_value = "1048576")]
    bytes: usize,
    /// Drop every n-th segment on the link.
    #[structopt(long)]
    drop_every: Option<usize>,
    /// Give up after this many ticks.
    #[structopt(long, default_value = "100000")]
    ticks: u32,
}
