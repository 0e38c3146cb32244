//! The replay driver's socket boundary, generalized behind a trait so the
//! pacing/state-machine logic in [`super::Driver`] is testable without a
//! real TCP connection (spec §4.6 generalizes this as "deliver them to a
//! TCP endpoint").

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::error::{Error, Result};

/// One message-at-a-time send, one opportunistic receive. The driver
/// never validates that a read's bytes match a logged RECV — only that
/// something arrived before the timeout (spec §4.6).
pub trait Transport {
    fn write_message(&mut self, bytes: &[u8]) -> Result<()>;

    /// `Ok(Some(bytes))` on a successful read, `Ok(None)` on timeout
    /// (spec §7's `response-timeout`: a warning, not a fatal error).
    fn read_message(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;
}

/// A blocking `TcpStream`-backed transport, bound in `bin/wiretrace.rs` for
/// the external TCP client (spec §1's "TCP client used during replay").
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).map_err(Error::Connect)?;
        Ok(TcpTransport { stream })
    }
}

impl Transport for TcpTransport {
    fn write_message(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes)?;
        Ok(())
    }

    fn read_message(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        self.stream.set_read_timeout(Some(timeout))?;
        let mut buf = [0u8; 65536];
        match self.stream.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(n) => Ok(Some(buf[..n].to_vec())),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// An in-memory transport for exercising the driver's pacing and
/// response-wait logic deterministically, shared by this module's and
/// [`super`]'s tests.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::VecDeque;

    pub struct MockTransport {
        pub sent: Vec<Vec<u8>>,
        pub replies: VecDeque<Option<Vec<u8>>>,
    }

    impl MockTransport {
        pub fn new(replies: Vec<Option<Vec<u8>>>) -> Self {
            MockTransport {
                sent: Vec::new(),
                replies: replies.into(),
            }
        }
    }

    impl Transport for MockTransport {
        fn write_message(&mut self, bytes: &[u8]) -> Result<()> {
            self.sent.push(bytes.to_vec());
            Ok(())
        }

        fn read_message(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>> {
            Ok(self.replies.pop_front().flatten())
        }
    }
}

#[cfg(test)]
mod test {
    use super::test_support::MockTransport;
    use super::*;

    #[test]
    fn mock_transport_records_writes() {
        let mut transport = MockTransport::new(vec![]);
        transport.write_message(&[1, 2, 3]).unwrap();
        assert_eq!(transport.sent, vec![vec![1, 2, 3]]);
    }
}
