//! The tcp segment header, its options and sequence space arithmetic.
use core::{cmp, fmt, ops};
use byteorder::{ByteOrder, NetworkEndian};

use super::{Checksum, Error, IpProtocol, IpAddress, Result};
use super::field::Field;
use super::ip::checksum;

/// A position in tcp sequence space.
///
/// Arithmetic wraps modulo 2<sup>32</sup> and comparison is relative: `a < b` holds when `b` is
/// less than 2<sup>31</sup> octets ahead of `a`. This is only meaningful for numbers from the
/// same window, which is all the state machine ever compares.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct SeqNumber(pub i32);

impl SeqNumber {
    /// Signed distance, positive when `self` is ahead of `other`.
    pub fn diff(self, other: SeqNumber) -> i32 {
        self.0.wrapping_sub(other.0)
    }

    /// The later of the two.
    pub fn max(self, other: SeqNumber) -> SeqNumber {
        cmp::max_by(self, other, |a, b| a.diff(*b).cmp(&0))
    }

    /// The earlier of the two.
    pub fn min(self, other: SeqNumber) -> SeqNumber {
        cmp::min_by(self, other, |a, b| a.diff(*b).cmp(&0))
    }

    /// Whether `start <= self < end`.
    pub fn in_range(self, start: SeqNumber, end: SeqNumber) -> bool {
        self.diff(start) >= 0 && end.diff(self) > 0
    }

    /// The number as it appears on the wire.
    pub fn raw(self) -> u32 {
        self.0 as u32
    }

    fn offset(len: usize) -> i32 {
        assert!(len <= i32::max_value() as usize, "sequence offset {} exceeds half the space", len);
        len as i32
    }
}

impl From<u32> for SeqNumber {
    fn from(raw: u32) -> Self {
        SeqNumber(raw as i32)
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.raw(), f)
    }
}

impl ops::Add<usize> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, len: usize) -> SeqNumber {
        SeqNumber(self.0.wrapping_add(SeqNumber::offset(len)))
    }
}

impl ops::Sub<usize> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, len: usize) -> SeqNumber {
        SeqNumber(self.0.wrapping_sub(SeqNumber::offset(len)))
    }
}

impl ops::AddAssign<usize> for SeqNumber {
    fn add_assign(&mut self, len: usize) {
        *self = *self + len;
    }
}

impl ops::SubAssign<usize> for SeqNumber {
    fn sub_assign(&mut self, len: usize) {
        *self = *self - len;
    }
}

/// The octets from `rhs` up to `self`.
///
/// Panics when `rhs` is ahead of `self`.
impl ops::Sub for SeqNumber {
    type Output = usize;

    fn sub(self, rhs: SeqNumber) -> usize {
        let distance = self.diff(rhs);
        assert!(distance >= 0, "sequence number {} is behind {}", self, rhs);
        distance as usize
    }
}

impl cmp::PartialOrd for SeqNumber {
    fn partial_cmp(&self, other: &SeqNumber) -> Option<cmp::Ordering> {
        Some(self.diff(*other).cmp(&0))
    }
}

mod field {
    use super::Field;

    pub const SRC_PORT: Field = 0..2;
    pub const DST_PORT: Field = 2..4;
    pub const SEQ: Field = 4..8;
    pub const ACK: Field = 8..12;
    /// Data offset in the top nibble, control bits in the low nine.
    pub const OFFSET_FLAGS: Field = 12..14;
    pub const WINDOW: Field = 14..16;
    pub const CHECKSUM: Field = 16..18;
    pub const URGENT: Field = 18..20;

    pub const FLAG_MASK: u16 = 0x01ff;
    pub const OFFSET_MASK: u16 = 0xf000;

    pub const KIND_END: u8 = 0;
    pub const KIND_NOP: u8 = 1;
    pub const KIND_MSS: u8 = 2;
    pub const KIND_WS: u8 = 3;
    pub const KIND_TS: u8 = 8;

    pub const MSS_LEN: usize = 4;
    pub const WS_LEN: usize = 3;
    pub const TS_LEN: usize = 10;
}

/// Length of a header without options.
pub const HEADER_LEN: usize = field::URGENT.end;

/// Length of a header with the largest option area.
pub const MAX_HEADER_LEN: usize = 60;

/// Shift counts above this are treated as this (RFC 7323, 2.3).
pub const MAX_WINDOW_SCALE: u8 = 14;

/// The control bits of a segment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Flags(pub u16);

macro_rules! flag_bits {
    ($($name:ident = $bit:expr, $get:ident, $set:ident;)*) => {
        impl Flags {
            $(
                #[doc = concat!("Only the ", stringify!($name), " bit.")]
                pub const $name: Flags = Flags($bit);

                #[doc = concat!("Whether ", stringify!($name), " is set.")]
                #[inline]
                pub fn $get(&self) -> bool {
                    self.contains(Flags::$name)
                }

                #[doc = concat!("Set or clear ", stringify!($name), ".")]
                #[inline]
                pub fn $set(&mut self, value: bool) {
                    self.assign(Flags::$name, value)
                }
            )*
        }
    }
}

flag_bits! {
    FIN = 0x001, fin, set_fin;
    SYN = 0x002, syn, set_syn;
    RST = 0x004, rst, set_rst;
    PSH = 0x008, psh, set_psh;
    ACK = 0x010, ack, set_ack;
    URG = 0x020, urg, set_urg;
}

impl Flags {
    const NAMES: [(u16, &'static str); 8] = [
        (0x002, "syn"),
        (0x001, "fin"),
        (0x004, "rst"),
        (0x008, "psh"),
        (0x010, "ack"),
        (0x020, "urg"),
        (0x040, "ece"),
        (0x080, "cwr"),
    ];

    /// Whether all bits of `other` are set.
    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no bit is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// SYN and FIN each occupy one sequence number.
    pub fn sequence_len(self) -> usize {
        usize::from(self.syn()) + usize::from(self.fin())
    }

    fn assign(&mut self, bits: Flags, value: bool) {
        if value {
            self.0 |= bits.0;
        } else {
            self.0 &= !bits.0;
        }
    }
}

impl ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(mut self, rhs: Flags) -> Flags {
        self |= rhs;
        self
    }
}

impl ops::BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.0 & field::FLAG_MASK == 0 {
            return f.write_str("-");
        }
        let mut names = Flags::NAMES.iter()
            .filter(|(bit, _)| self.0 & bit != 0)
            .map(|(_, name)| name);
        if let Some(name) = names.next() {
            f.write_str(name)?;
        }
        for name in names {
            write!(f, "|{}", name)?;
        }
        Ok(())
    }
}

/// A view of a buffer as a tcp segment.
///
/// The accessors index into the buffer directly. Use [`new_checked`] when the buffer comes from
/// the network so none of them can panic.
///
/// [`new_checked`]: #method.new_checked
#[derive(Debug, PartialEq, Clone)]
pub struct Packet<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    /// Wrap a buffer without checking its length.
    pub fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    /// Wrap the buffer after [`check_len`] succeeds.
    ///
    /// [`check_len`]: #method.check_len
    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Packet { buffer };
        packet.check_len()?;
        Ok(packet)
    }

    /// Verify that the buffer holds the full header including its options.
    ///
    /// A buffer shorter than either is `Truncated`, a data offset pointing into the fixed header
    /// is `Malformed`. Changing the header length afterwards voids the check.
    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < HEADER_LEN {
            return Err(Error::Truncated);
        }
        match usize::from(self.header_len()) {
            header if header < HEADER_LEN => Err(Error::Malformed),
            header if header > len => Err(Error::Truncated),
            _ => Ok(()),
        }
    }

    /// Give back the buffer.
    pub fn into_inner(self) -> T {
        self.buffer
    }

    fn read_u16(&self, at: Field) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[at])
    }

    fn read_seq(&self, at: Field) -> SeqNumber {
        SeqNumber(NetworkEndian::read_i32(&self.buffer.as_ref()[at]))
    }

    fn options_range(&self) -> Field {
        HEADER_LEN..usize::from(self.header_len())
    }

    /// The source port.
    #[inline]
    pub fn src_port(&self) -> u16 {
        self.read_u16(field::SRC_PORT)
    }

    /// The destination port.
    #[inline]
    pub fn dst_port(&self) -> u16 {
        self.read_u16(field::DST_PORT)
    }

    /// The sequence number of the first octet.
    #[inline]
    pub fn seq_number(&self) -> SeqNumber {
        self.read_seq(field::SEQ)
    }

    /// The acknowledgement field, meaningful only with the ACK flag.
    #[inline]
    pub fn ack_number(&self) -> SeqNumber {
        self.read_seq(field::ACK)
    }

    /// The control bits, without the reserved ones.
    pub fn flags(&self) -> Flags {
        Flags(self.read_u16(field::OFFSET_FLAGS) & field::FLAG_MASK)
    }

    /// The data offset in octets.
    #[inline]
    pub fn header_len(&self) -> u8 {
        let words = self.read_u16(field::OFFSET_FLAGS) >> 12;
        (words * 4) as u8
    }

    /// The unscaled window field.
    #[inline]
    pub fn window_len(&self) -> u16 {
        self.read_u16(field::WINDOW)
    }

    /// The raw checksum field.
    #[inline]
    pub fn checksum(&self) -> u16 {
        self.read_u16(field::CHECKSUM)
    }

    /// The urgent pointer, an offset from the sequence number.
    #[inline]
    pub fn urgent_at(&self) -> u16 {
        self.read_u16(field::URGENT)
    }

    /// Payload length plus one for each of SYN and FIN.
    pub fn sequence_len(&self) -> usize {
        self.buffer.as_ref().len() - usize::from(self.header_len()) + self.flags().sequence_len()
    }

    /// Collect the options, see [`Options::parse`].
    ///
    /// [`Options::parse`]: struct.Options.html#method.parse
    pub fn parse_options(&self) -> Result<Options> {
        Options::parse(&self.buffer.as_ref()[self.options_range()])
    }

    /// Check the checksum over the pseudo header and the whole segment.
    ///
    /// The addresses must both be IPv4 or both IPv6. Always succeeds when built for fuzzing.
    pub fn verify_checksum(&self, src_addr: IpAddress, dst_addr: IpAddress) -> bool {
        cfg!(fuzzing) || self.sum(src_addr, dst_addr) == !0
    }

    fn sum(&self, src_addr: IpAddress, dst_addr: IpAddress) -> u16 {
        let data = self.buffer.as_ref();
        let pseudo = checksum::pseudo_header(&src_addr, &dst_addr, IpProtocol::Tcp, data.len() as u32);
        checksum::combine(&[pseudo, checksum::data(data)])
    }
}

impl<'a> Packet<&'a [u8]> {
    /// The raw option area, with the lifetime of the buffer.
    #[inline]
    pub fn options(&self) -> &'a [u8] {
        let range = self.options_range();
        &self.buffer[range]
    }

    /// Everything after the header, with the lifetime of the buffer.
    #[inline]
    pub fn payload_slice(&self) -> &'a [u8] {
        let start = usize::from(self.header_len());
        &self.buffer[start..]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    fn write_u16(&mut self, at: Field, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[at], value)
    }

    fn write_seq(&mut self, at: Field, value: SeqNumber) {
        NetworkEndian::write_i32(&mut self.buffer.as_mut()[at], value.0)
    }

    /// Set the source port.
    #[inline]
    pub fn set_src_port(&mut self, value: u16) {
        self.write_u16(field::SRC_PORT, value)
    }

    /// Set the destination port.
    #[inline]
    pub fn set_dst_port(&mut self, value: u16) {
        self.write_u16(field::DST_PORT, value)
    }

    /// Set the sequence number.
    #[inline]
    pub fn set_seq_number(&mut self, value: SeqNumber) {
        self.write_seq(field::SEQ, value)
    }

    /// Set the acknowledgement field.
    #[inline]
    pub fn set_ack_number(&mut self, value: SeqNumber) {
        self.write_seq(field::ACK, value)
    }

    /// Replace the control bits, clearing the reserved ones and keeping the data offset.
    #[inline]
    pub fn set_flags(&mut self, flags: Flags) {
        let offset = self.read_u16(field::OFFSET_FLAGS) & field::OFFSET_MASK;
        self.write_u16(field::OFFSET_FLAGS, offset | (flags.0 & field::FLAG_MASK))
    }

    /// Set the data offset in octets, rounded down to whole words.
    #[inline]
    pub fn set_header_len(&mut self, value: u8) {
        let flags = self.read_u16(field::OFFSET_FLAGS) & !field::OFFSET_MASK;
        let words = u16::from(value / 4) << 12;
        self.write_u16(field::OFFSET_FLAGS, words | flags)
    }

    /// Set the window field, already scaled down by the sender.
    #[inline]
    pub fn set_window_len(&mut self, value: u16) {
        self.write_u16(field::WINDOW, value)
    }

    /// Overwrite the checksum field.
    #[inline]
    pub fn set_checksum(&mut self, value: u16) {
        self.write_u16(field::CHECKSUM, value)
    }

    /// Set the urgent pointer.
    #[inline]
    pub fn set_urgent_at(&mut self, value: u16) {
        self.write_u16(field::URGENT, value)
    }

    /// Compute the checksum after header and payload are final.
    ///
    /// The addresses must both be IPv4 or both IPv6.
    pub fn fill_checksum(&mut self, src_addr: IpAddress, dst_addr: IpAddress) {
        self.set_checksum(0);
        let sum = self.sum(src_addr, dst_addr);
        self.set_checksum(!sum)
    }

    /// The option area, sized by the header length.
    #[inline]
    pub fn options_mut(&mut self) -> &mut [u8] {
        let range = self.options_range();
        &mut self.buffer.as_mut()[range]
    }

    /// Everything after the header.
    #[inline]
    pub fn payload_mut_slice(&mut self) -> &mut [u8] {
        let start = usize::from(self.header_len());
        &mut self.buffer.as_mut()[start..]
    }
}

impl<T: AsRef<[u8]>> AsRef<[u8]> for Packet<T> {
    fn as_ref(&self) -> &[u8] {
        self.buffer.as_ref()
    }
}

/// The timestamp option of RFC 7323.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct Timestamp {
    /// TSval, the clock of the sender.
    pub value: u32,
    /// TSecr, the last TSval received from the other side.
    pub echo: u32,
}

impl Timestamp {
    fn read(data: &[u8]) -> Timestamp {
        Timestamp {
            value: NetworkEndian::read_u32(&data[..4]),
            echo: NetworkEndian::read_u32(&data[4..8]),
        }
    }

    fn write(self, data: &mut [u8]) {
        NetworkEndian::write_u32(&mut data[..4], self.value);
        NetworkEndian::write_u32(&mut data[4..8], self.echo);
    }
}

/// One entry of the option area.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TcpOption<'a> {
    /// Stops the scan, the rest of the area is padding.
    EndOfList,
    /// Single octet padding.
    NoOperation,
    /// The largest segment the sender accepts.
    MaxSegmentSize(u16),
    /// Shift count for windows the sender announces.
    WindowScale(u8),
    /// Clock value and echo.
    Timestamp(Timestamp),
    /// Any other kind, kept as its raw value.
    Unknown {
        /// The option kind.
        kind: u8,
        /// The octets after the length field.
        data: &'a [u8],
    },
}

impl<'a> TcpOption<'a> {
    /// Split the first option off `buffer`.
    ///
    /// Fails with `Truncated` if the option runs past the buffer and with `Malformed` if its
    /// length does not fit its kind.
    pub fn parse(buffer: &'a [u8]) -> Result<(&'a [u8], TcpOption<'a>)> {
        let kind = *buffer.first().ok_or(Error::Truncated)?;
        if kind == field::KIND_END {
            return Ok((&buffer[1..], TcpOption::EndOfList));
        }
        if kind == field::KIND_NOP {
            return Ok((&buffer[1..], TcpOption::NoOperation));
        }

        let length = usize::from(*buffer.get(1).ok_or(Error::Truncated)?);
        if length < 2 {
            return Err(Error::Malformed);
        }
        let data = buffer.get(2..length).ok_or(Error::Truncated)?;
        let expected = match kind {
            field::KIND_MSS => Some(field::MSS_LEN),
            field::KIND_WS => Some(field::WS_LEN),
            field::KIND_TS => Some(field::TS_LEN),
            _ => None,
        };
        if expected.map_or(false, |expected| expected != length) {
            return Err(Error::Malformed);
        }

        let option = match kind {
            field::KIND_MSS => TcpOption::MaxSegmentSize(NetworkEndian::read_u16(data)),
            field::KIND_WS => TcpOption::WindowScale(data[0]),
            field::KIND_TS => TcpOption::Timestamp(Timestamp::read(data)),
            _ => TcpOption::Unknown { kind, data },
        };
        Ok((&buffer[length..], option))
    }

    /// Octets occupied, without padding.
    pub fn buffer_len(&self) -> usize {
        match self {
            TcpOption::EndOfList | TcpOption::NoOperation => 1,
            TcpOption::MaxSegmentSize(_) => field::MSS_LEN,
            TcpOption::WindowScale(_) => field::WS_LEN,
            TcpOption::Timestamp(_) => field::TS_LEN,
            TcpOption::Unknown { data, .. } => 2 + data.len(),
        }
    }

    /// Write the option at the front of `buffer` and return the remainder.
    ///
    /// An end of list fills all of `buffer`, so trailing padding is initialized too.
    pub fn emit<'b>(&self, buffer: &'b mut [u8]) -> &'b mut [u8] {
        let length = self.buffer_len();
        let (kind, body) = match *self {
            TcpOption::EndOfList => {
                buffer.iter_mut().for_each(|octet| *octet = field::KIND_END);
                return &mut buffer[length..];
            },
            TcpOption::NoOperation => {
                buffer[0] = field::KIND_NOP;
                return &mut buffer[length..];
            },
            TcpOption::MaxSegmentSize(_) => (field::KIND_MSS, &mut buffer[2..length]),
            TcpOption::WindowScale(_) => (field::KIND_WS, &mut buffer[2..length]),
            TcpOption::Timestamp(_) => (field::KIND_TS, &mut buffer[2..length]),
            TcpOption::Unknown { kind, .. } => (kind, &mut buffer[2..length]),
        };

        match *self {
            TcpOption::MaxSegmentSize(mss) => NetworkEndian::write_u16(body, mss),
            TcpOption::WindowScale(shift) => body[0] = shift,
            TcpOption::Timestamp(ts) => ts.write(body),
            TcpOption::Unknown { data, .. } => body.copy_from_slice(data),
            TcpOption::EndOfList | TcpOption::NoOperation => (),
        }

        buffer[0] = kind;
        buffer[1] = length as u8;
        &mut buffer[length..]
    }
}

/// The options the engine understands, collected from an option area.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct Options {
    /// MSS, only sent on SYN segments.
    pub max_seg_size: Option<u16>,
    /// Never above `MAX_WINDOW_SCALE` after parsing.
    pub window_scale: Option<u8>,
    /// Present on every segment once negotiated.
    pub timestamp: Option<Timestamp>,
}

impl Options {
    /// Collect the known options of an option area.
    ///
    /// Unknown kinds are skipped and an end of list stops the scan. Any malformed option fails
    /// the whole area.
    pub fn parse(area: &[u8]) -> Result<Options> {
        let mut options = Options::default();

        // Every segment of a timestamp connection carries exactly this layout.
        if area.len() == 12 && area[..4] == [field::KIND_NOP, field::KIND_NOP, field::KIND_TS, 10] {
            options.timestamp = Some(Timestamp::read(&area[4..]));
            return Ok(options);
        }

        let mut rest = area;
        while !rest.is_empty() {
            let (next, option) = TcpOption::parse(rest)?;
            rest = next;
            match option {
                TcpOption::EndOfList => break,
                TcpOption::MaxSegmentSize(mss) => options.max_seg_size = Some(mss),
                TcpOption::WindowScale(shift) if shift > MAX_WINDOW_SCALE => {
                    net_debug!("tcp: window scale {} clamped to {}", shift, MAX_WINDOW_SCALE);
                    options.window_scale = Some(MAX_WINDOW_SCALE);
                },
                TcpOption::WindowScale(shift) => options.window_scale = Some(shift),
                TcpOption::Timestamp(ts) => options.timestamp = Some(ts),
                TcpOption::NoOperation | TcpOption::Unknown { .. } => (),
            }
        }

        Ok(options)
    }

    /// The options in emission order, with NOP padding keeping each one word aligned.
    fn layout(&self) -> [Option<TcpOption<'static>>; 6] {
        let nop = |present: bool| if present { Some(TcpOption::NoOperation) } else { None };
        [
            self.max_seg_size.map(TcpOption::MaxSegmentSize),
            nop(self.window_scale.is_some()),
            self.window_scale.map(TcpOption::WindowScale),
            nop(self.timestamp.is_some()),
            nop(self.timestamp.is_some()),
            self.timestamp.map(TcpOption::Timestamp),
        ]
    }

    /// Length of the emitted option area, always a whole number of words.
    pub fn buffer_len(&self) -> usize {
        self.layout().iter().flatten().map(TcpOption::buffer_len).sum()
    }

    /// Write MSS, then window scale, then timestamp, padding what is left with end of list.
    pub fn emit(&self, buffer: &mut [u8]) {
        let rest = self.layout().iter().flatten()
            .fold(buffer, |rest, option| option.emit(rest));
        if !rest.is_empty() {
            TcpOption::EndOfList.emit(rest);
        }
    }
}

/// The decoded header of a segment.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    /// Source port.
    pub src_port: u16,
    /// Destination port.
    pub dst_port: u16,
    /// Control bits.
    pub flags: Flags,
    /// Sequence number of the first octet, SYN included.
    pub seq_number: SeqNumber,
    /// Copied regardless of the ACK flag.
    pub ack_number: SeqNumber,
    /// The window as on the wire, before scaling.
    pub window_len: u16,
    /// Raw urgent pointer.
    pub urgent_at: u16,
    /// Options to emit. Left empty by parse.
    pub options: Options,
    /// Octets after the header.
    pub payload_len: usize,
}

impl Repr {
    /// Decode the fixed header, verifying the checksum when asked to.
    ///
    /// `options` stays empty. Bad options call for a reset while a bad header is dropped
    /// silently, so the caller parses them separately with [`Packet::parse_options`].
    ///
    /// [`Packet::parse_options`]: struct.Packet.html#method.parse_options
    pub fn parse<T: AsRef<[u8]>>(packet: &Packet<T>, checksum: Checksum) -> Result<Repr> {
        packet.check_len()?;

        if let Checksum::Manual { src_addr, dst_addr } = checksum {
            if !packet.verify_checksum(src_addr, dst_addr) {
                return Err(Error::WrongChecksum);
            }
        }

        Ok(Repr {
            src_port: packet.src_port(),
            dst_port: packet.dst_port(),
            flags: packet.flags(),
            seq_number: packet.seq_number(),
            ack_number: packet.ack_number(),
            window_len: packet.window_len(),
            urgent_at: packet.urgent_at(),
            options: Options::default(),
            payload_len: packet.as_ref().len() - usize::from(packet.header_len()),
        })
    }

    /// The header length including the option area.
    pub fn header_len(&self) -> usize {
        HEADER_LEN + self.options.buffer_len()
    }

    /// Header and payload together.
    pub fn buffer_len(&self) -> usize {
        self.header_len() + self.payload_len
    }

    /// Write header and options. Payload and checksum are left to the caller.
    pub fn emit<T>(&self, packet: &mut Packet<T>)
        where T: AsRef<[u8]> + AsMut<[u8]>
    {
        packet.set_src_port(self.src_port);
        packet.set_dst_port(self.dst_port);
        packet.set_seq_number(self.seq_number);
        packet.set_ack_number(self.ack_number);
        packet.set_header_len(self.header_len() as u8);
        packet.set_flags(self.flags);
        packet.set_window_len(self.window_len);
        packet.set_urgent_at(self.urgent_at);
        self.options.emit(packet.options_mut());
    }

    /// Payload plus SYN and FIN.
    pub fn sequence_len(&self) -> usize {
        self.payload_len + self.flags.sequence_len()
    }
}

impl<T: AsRef<[u8]>> fmt::Display for Packet<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut repr = match Repr::parse(self, Checksum::Ignored) {
            Ok(repr) => repr,
            Err(err) => return write!(f, "TCP ({})", err),
        };
        match self.parse_options() {
            Ok(options) => {
                repr.options = options;
                fmt::Display::fmt(&repr, f)
            },
            Err(err) => write!(f, "{} (options: {})", repr, err),
        }
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TCP {}->{} {} seq={}", self.src_port, self.dst_port, self.flags, self.seq_number)?;
        if self.flags.ack() {
            write!(f, " ack={}", self.ack_number)?;
        }
        write!(f, " win={} len={}", self.window_len, self.payload_len)?;
        if self.flags.urg() {
            write!(f, " urg={}", self.urgent_at)?;
        }
        if let Some(mss) = self.options.max_seg_size {
            write!(f, " mss={}", mss)?;
        }
        if let Some(shift) = self.options.window_scale {
            write!(f, " ws={}", shift)?;
        }
        if let Some(ts) = self.options.timestamp {
            write!(f, " ts={}/{}", ts.value, ts.echo)?;
        }
        Ok(())
    }
}
