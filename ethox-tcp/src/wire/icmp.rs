//! Classes of ICMP errors that concern a tcp connection.
//!
//! The IP substrate translates both ICMPv4 and ICMPv6 error messages into one of these classes
//! before handing the quoted tcp header to the engine.
enum_with_unknown! {
    /// The kind of an ICMP error report.
    pub doc enum IcmpError(u8) {
        /// Destination network unreachable.
        NetUnreachable = 0,
        /// Destination host unreachable.
        HostUnreachable = 1,
        /// Destination protocol unreachable.
        ProtocolUnreachable = 2,
        /// Destination port unreachable.
        PortUnreachable = 3,
        /// Fragmentation needed but forbidden, or packet too big.
        MessageTooBig = 4,
        /// Source route failed.
        SourceRouteFailed = 5,
        /// Hop limit exceeded in transit.
        TimeExceededInTransit = 6,
        /// Fragment reassembly time exceeded.
        TimeExceededReassembly = 7,
        /// Source quench.
        SourceQuench = 8,
        /// Parameter problem in the header.
        ParameterProblem = 9
    }
}

impl core::fmt::Display for IcmpError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            IcmpError::NetUnreachable => write!(f, "network unreachable"),
            IcmpError::HostUnreachable => write!(f, "host unreachable"),
            IcmpError::ProtocolUnreachable => write!(f, "protocol unreachable"),
            IcmpError::PortUnreachable => write!(f, "port unreachable"),
            IcmpError::MessageTooBig => write!(f, "message too big"),
            IcmpError::SourceRouteFailed => write!(f, "source route failed"),
            IcmpError::TimeExceededInTransit => write!(f, "time exceeded in transit"),
            IcmpError::TimeExceededReassembly => write!(f, "reassembly time exceeded"),
            IcmpError::SourceQuench => write!(f, "source quench"),
            IcmpError::ParameterProblem => write!(f, "parameter problem"),
            IcmpError::Unknown(code) => write!(f, "icmp error {}", code),
        }
    }
}
